//! Flattens a finalized grammar into the `Syntax` table the parser interprets
//! directly: one opcode-tagged integer vector per rule, with anonymous
//! subrules deduplicated and single-wrapper bodies inlined.

use std::collections::HashMap;
use smol_str::SmolStr;

use crate::error::{Error, ErrorKind, Result};
use crate::rule::{Finalized, Rule, RuleOption};
use crate::vocabulary::Vocabulary;

pub const AND: i32 = 0;
pub const OR: i32 = 1;
pub const ONE_OR_MORE: i32 = 2;
pub const ZERO_OR_MORE: i32 = 3;
pub const OPTIONAL: i32 = 4;
pub const TEST_NOT: i32 = 5;
pub const TEST: i32 = 6;
pub const TERMINAL: i32 = 7;
pub const NON_TERMINAL: i32 = 8;

pub fn opcode_name(op: i32) -> &'static str {
    match op {
        AND => "AND",
        OR => "OR",
        ONE_OR_MORE => "ONE_OR_MORE",
        ZERO_OR_MORE => "ZERO_OR_MORE",
        OPTIONAL => "OPTIONAL",
        TEST_NOT => "TEST_NOT",
        TEST => "TEST",
        TERMINAL => "TERMINAL",
        NON_TERMINAL => "NON_TERMINAL",
        _ => "UNKNOWN",
    }
}

/// The parser's immutable table: one entry per rule-id, parser rules and
/// lexer rules alike. Rule-ids `<= last_named_rule` are named grammar rules
/// (these, and only these, may surface as AST nodes); ids above it are
/// synthesized anonymous subrules.
#[derive(Debug, Clone)]
pub struct Syntax {
    pub rule_names: Vec<SmolStr>,
    pub rule_options: Vec<u32>,
    pub rule_bodies: Vec<Vec<i32>>,
    pub start_rule: u32,
    pub last_named_rule: u32,
}

impl Syntax {
    pub fn rule_name(&self, id: u32) -> &str {
        self.rule_names.get(id as usize).map(SmolStr::as_str).unwrap_or("?")
    }

    pub fn rule_id(&self, name: &str) -> Option<u32> {
        self.rule_names.iter().position(|n| n.eq_ignore_ascii_case(name)).map(|i| i as u32)
    }

    pub fn has_option(&self, id: u32, opt: RuleOption) -> bool {
        self.rule_options.get(id as usize).map(|bits| bits & opt.code_bit() != 0).unwrap_or(false)
    }

    pub fn is_subrule(&self, id: u32) -> bool {
        id > self.last_named_rule
    }

    pub fn rules_count(&self) -> usize {
        self.rule_names.len()
    }
}

struct Builder {
    rule_names: Vec<SmolStr>,
    rule_options: Vec<u32>,
    rule_bodies: Vec<Vec<i32>>,
    /// maps a named rule (parser or lexer) to its pre-assigned id.
    named_id_of: HashMap<SmolStr, u32>,
    named_count: u32,
    /// dedups compound subrule bodies (opcode + child ids) globally across
    /// the whole grammar.
    dedup: HashMap<Vec<i32>, u32>,
    current_name: SmolStr,
    next_anon: u32,
}

impl Builder {
    fn materialize(&mut self, body: Vec<i32>) -> u32 {
        if let Some(&id) = self.dedup.get(&body) {
            return id;
        }
        let id = self.rule_names.len() as u32;
        let name = SmolStr::new(format!("{}#{}", self.current_name, self.next_anon));
        self.next_anon += 1;
        self.dedup.insert(body.clone(), id);
        self.rule_names.push(name);
        self.rule_options.push(0);
        self.rule_bodies.push(body);
        id
    }

    fn flatten(&mut self, rule: &Rule) -> Result<u32> {
        match rule {
            Rule::NonTerminal(name) => self
                .named_id_of
                .get(name)
                .copied()
                .ok_or_else(|| Error::new(ErrorKind::UndefinedRule, format!("undefined rule '{name}'"))),
            Rule::And(cs) => self.flatten_compound(AND, cs),
            Rule::Or(cs) => self.flatten_compound(OR, cs),
            Rule::Optional(i) => self.flatten_simple(OPTIONAL, i),
            Rule::ZeroOrMore(i) => self.flatten_simple(ZERO_OR_MORE, i),
            Rule::OneOrMore(i) => self.flatten_simple(ONE_OR_MORE, i),
            Rule::Test(i) => self.flatten_simple(TEST, i),
            Rule::Not(i) => self.flatten_simple(TEST_NOT, i),
            Rule::Char { .. } | Rule::Range { .. } | Rule::StringLit { .. } => {
                unreachable!("literals are hoisted into lexer rules before flattening")
            }
        }
    }

    fn flatten_compound(&mut self, opcode: i32, children: &[Rule]) -> Result<u32> {
        let mut body = Vec::with_capacity(children.len() + 1);
        body.push(opcode);
        for c in children {
            body.push(self.flatten(c)? as i32);
        }
        Ok(self.materialize(body))
    }

    fn flatten_simple(&mut self, opcode: i32, inner: &Rule) -> Result<u32> {
        let child = self.flatten(inner)?;
        Ok(self.materialize(vec![opcode, child as i32]))
    }

    /// Flattens one named parser rule's body, then resolves the top-level
    /// inlining rule: a bare reference to an existing named rule becomes
    /// `[NON_TERMINAL, id]`; a freshly materialized wrapper (created, and
    /// used, nowhere but here) is inlined and its slot reclaimed; a wrapper
    /// shared via dedup with some other rule is copied rather than deleted,
    /// since deleting it would orphan that other rule's reference.
    fn flatten_top_level(&mut self, name: &SmolStr, body: &Rule) -> Result<Vec<i32>> {
        self.current_name = name.clone();
        self.next_anon = 1;
        let top_id = self.flatten(body)?;
        if (top_id as usize) < self.named_count as usize {
            return Ok(vec![NON_TERMINAL, top_id as i32]);
        }
        if top_id as usize == self.rule_names.len() - 1 {
            let body = self.rule_bodies.pop().expect("just-materialized wrapper is the last rule pushed");
            self.rule_names.pop();
            self.rule_options.pop();
            self.dedup.remove(&body);
            return Ok(body);
        }
        Ok(self.rule_bodies[top_id as usize].clone())
    }
}

/// Builds the `Syntax` table from a finalized grammar and its assembled
/// vocabulary. `start_rule` must name one of `finalized.parser_grammar`'s
/// definitions (typically the one tagged `Main`).
pub fn build(finalized: &Finalized, vocab: &Vocabulary, start_rule: &str) -> Result<Syntax> {
    let parser_defs: Vec<_> = finalized.parser_grammar.iter().collect();
    let lexer_defs: Vec<_> = finalized.lexer_grammar.iter().collect();
    let named_count = (parser_defs.len() + lexer_defs.len()) as u32;

    let mut rule_names = Vec::with_capacity(named_count as usize);
    let mut rule_options = Vec::with_capacity(named_count as usize);
    let mut named_id_of = HashMap::with_capacity(named_count as usize);

    for def in parser_defs.iter().chain(lexer_defs.iter()) {
        named_id_of.insert(def.id.clone(), rule_names.len() as u32);
        rule_names.push(def.id.clone());
        rule_options.push(def.options.bits());
    }

    // lexer rules flatten trivially: `[TERMINAL, token_id]`.
    let mut rule_bodies: Vec<Vec<i32>> = vec![Vec::new(); named_count as usize];
    for def in &lexer_defs {
        let token_id = vocab
            .token_names
            .iter()
            .position(|n| n == &def.id)
            .or_else(|| {
                // rules renamed via the `Name` option surface under a
                // different token name than their grammar id.
                let renamed = def.options.name_param().cloned().unwrap_or_else(|| def.id.clone());
                vocab.token_names.iter().position(|n| n == &renamed)
            })
            .ok_or_else(|| Error::new(ErrorKind::UndefinedRule, format!("no token for lexer rule '{}'", def.id)))?;
        let id = named_id_of[&def.id];
        rule_bodies[id as usize] = vec![TERMINAL, token_id as i32];
    }

    let mut builder = Builder {
        rule_names,
        rule_options,
        rule_bodies,
        named_id_of,
        named_count,
        dedup: HashMap::new(),
        current_name: SmolStr::new(""),
        next_anon: 1,
    };

    for def in &parser_defs {
        let body = builder.flatten_top_level(&def.id, &def.body)?;
        let id = builder.named_id_of[&def.id];
        builder.rule_bodies[id as usize] = body;
    }

    let start_id = builder
        .named_id_of
        .get(start_rule)
        .copied()
        .ok_or_else(|| Error::new(ErrorKind::UndefinedRule, format!("start rule '{start_rule}' is undefined")))?;

    Ok(Syntax {
        rule_names: builder.rule_names,
        rule_options: builder.rule_options,
        rule_bodies: builder.rule_bodies,
        start_rule: start_id,
        last_named_rule: named_count - 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automata::{build_nfa, minimize, subset_construction};
    use crate::rule::{self, finalize, Grammar, RuleBuilder};
    use crate::vocabulary;

    fn build_syntax(g: &Grammar, start: &str) -> Syntax {
        let finalized = finalize(g, start).unwrap();
        let nfa = build_nfa(&finalized.lexer_grammar, &finalized.lexer_names).unwrap();
        let dfa = minimize(&subset_construction(&nfa));
        let vocab = vocabulary::assemble(&dfa, &finalized.lexer_grammar);
        build(&finalized, &vocab, start).unwrap()
    }

    #[test]
    fn lexer_rule_flattens_to_terminal() {
        let mut g = Grammar::new();
        g.define("id", rule::one_or_more(rule::range('a', 'z'))).unwrap();
        g.add(
            RuleBuilder::new("call")
                .option(RuleOption::Main)
                .unwrap()
                .body(rule::non_terminal("id"))
                .finish()
                .unwrap(),
        )
        .unwrap();
        let syntax = build_syntax(&g, "call");
        let id_id = syntax.rule_id("id").unwrap();
        assert_eq!(syntax.rule_bodies[id_id as usize][0], TERMINAL);
    }

    #[test]
    fn identical_compound_subrules_are_deduplicated() {
        let mut g = Grammar::new();
        g.define("digit", rule::range('0', '9')).unwrap();
        g.add(
            RuleBuilder::new("pair")
                .option(RuleOption::Main)
                .unwrap()
                .body(rule::or(vec![
                    rule::and(vec![rule::non_terminal("digit"), rule::non_terminal("digit")]),
                    rule::and(vec![rule::non_terminal("digit"), rule::non_terminal("digit")]),
                ]))
                .finish()
                .unwrap(),
        )
        .unwrap();
        let syntax = build_syntax(&g, "pair");
        // the `pair` body is an OR of two structurally identical AND subrules;
        // both branches must resolve to the same anonymous rule-id.
        let pair_id = syntax.rule_id("pair").unwrap();
        let or_body = &syntax.rule_bodies[pair_id as usize];
        assert_eq!(or_body[0], OR);
        assert_eq!(or_body[1], or_body[2], "identical AND branches should dedupe to one anonymous rule");
    }

    #[test]
    fn single_wrapper_top_level_is_inlined() {
        let mut g = Grammar::new();
        g.define("digit", rule::range('0', '9')).unwrap();
        g.add(
            RuleBuilder::new("num")
                .option(RuleOption::Main)
                .unwrap()
                .body(rule::one_or_more(rule::non_terminal("digit")))
                .finish()
                .unwrap(),
        )
        .unwrap();
        let syntax = build_syntax(&g, "num");
        let num_id = syntax.rule_id("num").unwrap();
        // the wrapper created for the top-level OneOrMore must be inlined
        // directly into `num`'s own body, not left as an indirection.
        assert_eq!(syntax.rule_bodies[num_id as usize][0], ONE_OR_MORE);
        // no rule should be left referencing `num#1` by name.
        assert!(syntax.rule_id("num#1").is_none());
    }

    #[test]
    fn start_rule_resolves_to_main_tagged_rule_id() {
        let mut g = Grammar::new();
        g.add(
            RuleBuilder::new("top")
                .option(RuleOption::Main)
                .unwrap()
                .body(rule::char('x'))
                .finish()
                .unwrap(),
        )
        .unwrap();
        let syntax = build_syntax(&g, "top");
        assert_eq!(syntax.start_rule, syntax.rule_id("top").unwrap());
    }
}
