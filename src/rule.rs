//! The rule algebra: a tagged-variant tree of PEG-style combinators, plus the
//! grammar store that owns named, possibly-cyclic `NonTerminal` definitions.
//!
//! A grammar is encoded as a map of definitions: `SmolStr -> RuleDef`, keyed
//! by name rather than owned as a tree, so that a reference to another named
//! rule from inside a body is a `Rule::NonTerminal(name)` leaf — a handle
//! lookup into the grammar's table, never an embedded subtree. That's what
//! lets the grammar graph be cyclic.

use std::collections::HashMap;
use std::fmt;
use smol_str::SmolStr;

use crate::error::{Error, ErrorKind, Result};

/// Closed set of rule-level options, each a distinct power-of-two code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleOption {
    Main,
    Token,
    Atomic,
    SkipNode,
    Fragment,
    Name,
    Memoize,
    Ignore,
    StartLine,
    OnlyIgnored,
}

impl RuleOption {
    pub fn code_bit(self) -> u32 {
        match self {
            RuleOption::Main => 1 << 0,
            RuleOption::Token => 1 << 1,
            RuleOption::Atomic => 1 << 2,
            RuleOption::SkipNode => 1 << 3,
            RuleOption::Fragment => 1 << 4,
            RuleOption::Name => 1 << 5,
            RuleOption::Memoize => 1 << 6,
            RuleOption::Ignore => 1 << 7,
            RuleOption::StartLine => 1 << 8,
            RuleOption::OnlyIgnored => 1 << 9,
        }
    }

    /// `Name` carries a mandatory string parameter (the alternate token name);
    /// every other option is a bare flag.
    pub fn parameterized(self) -> bool {
        matches!(self, RuleOption::Name)
    }

    pub fn parameter_mandatory(self) -> bool {
        self.parameterized()
    }

    fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "Main" => RuleOption::Main,
            "Token" => RuleOption::Token,
            "Atomic" => RuleOption::Atomic,
            "SkipNode" => RuleOption::SkipNode,
            "Fragment" => RuleOption::Fragment,
            "Name" => RuleOption::Name,
            "Memoize" => RuleOption::Memoize,
            "Ignore" => RuleOption::Ignore,
            "StartLine" => RuleOption::StartLine,
            "OnlyIgnored" => RuleOption::OnlyIgnored,
            _ => return None,
        })
    }

    pub fn parse(s: &str) -> Result<Self> {
        Self::from_str(s).ok_or_else(|| Error::new(ErrorKind::UnknownOption, format!("unknown rule option '{s}'")))
    }
}

/// A bitset over `RuleOption`, plus the single parameterized value any grammar
/// needs (`Name`'s alternate token name).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleOptions {
    bits: u32,
    name_param: Option<SmolStr>,
}

impl RuleOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, opt: RuleOption) -> Result<Self> {
        if opt.parameter_mandatory() {
            return Err(Error::new(
                ErrorKind::InvalidOptionArgument,
                format!("option {opt:?} requires a parameter"),
            ));
        }
        self.bits |= opt.code_bit();
        Ok(self)
    }

    pub fn with_param(mut self, opt: RuleOption, value: impl Into<SmolStr>) -> Result<Self> {
        if !opt.parameterized() {
            return Err(Error::new(
                ErrorKind::InvalidOptionArgument,
                format!("option {opt:?} does not take a parameter"),
            ));
        }
        self.bits |= opt.code_bit();
        self.name_param = Some(value.into());
        Ok(self)
    }

    pub fn contains(&self, opt: RuleOption) -> bool {
        self.bits & opt.code_bit() != 0
    }

    pub fn name_param(&self) -> Option<&SmolStr> {
        self.name_param.as_ref()
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }
}

impl fmt::Display for RuleOptions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let all = [
            RuleOption::Main, RuleOption::Token, RuleOption::Atomic, RuleOption::SkipNode,
            RuleOption::Fragment, RuleOption::Name, RuleOption::Memoize, RuleOption::Ignore,
            RuleOption::StartLine, RuleOption::OnlyIgnored,
        ];
        let names: Vec<String> = all.iter().filter(|o| self.contains(**o)).map(|o| format!("{o:?}")).collect();
        write!(f, "{{{}}}", names.join(","))
    }
}

/// The PEG combinator tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    /// A reference to a named definition, resolved by lookup in `Grammar`.
    NonTerminal(SmolStr),
    And(Vec<Rule>),
    Or(Vec<Rule>),
    Optional(Box<Rule>),
    ZeroOrMore(Box<Rule>),
    OneOrMore(Box<Rule>),
    Test(Box<Rule>),
    Not(Box<Rule>),
    Char { codepoint: i32, case_sensitive: bool },
    Range { start: i32, end: i32 },
    StringLit { text: SmolStr, min_prefix_len: i32, case_sensitive: bool },
}

/// Reserved end-of-input terminal: `Char(0x03, case-insensitive)` named `EOI`.
pub const EOI_CODEPOINT: i32 = 0x03;
pub const EOI_NAME: &str = "EOI";

impl Rule {
    pub fn children(&self) -> Vec<&Rule> {
        match self {
            Rule::And(cs) | Rule::Or(cs) => cs.iter().collect(),
            Rule::Optional(c) | Rule::ZeroOrMore(c) | Rule::OneOrMore(c) | Rule::Test(c) | Rule::Not(c) => vec![c.as_ref()],
            Rule::NonTerminal(_) | Rule::Char { .. } | Rule::Range { .. } | Rule::StringLit { .. } => vec![],
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Rule::Char { .. } | Rule::Range { .. } | Rule::StringLit { .. })
    }
}

// --- builder operations -----------------------------------------------

pub fn and(children: Vec<Rule>) -> Rule { Rule::And(children) }
pub fn or(children: Vec<Rule>) -> Rule { Rule::Or(children) }
pub fn optional(inner: Rule) -> Rule { Rule::Optional(Box::new(inner)) }
pub fn one_or_more(inner: Rule) -> Rule { Rule::OneOrMore(Box::new(inner)) }
pub fn zero_or_more(inner: Rule) -> Rule { Rule::ZeroOrMore(Box::new(inner)) }
pub fn test(inner: Rule) -> Rule { Rule::Test(Box::new(inner)) }
pub fn not(inner: Rule) -> Rule { Rule::Not(Box::new(inner)) }
pub fn char(c: char) -> Rule { Rule::Char { codepoint: c as i32, case_sensitive: true } }
pub fn char_ci(c: char) -> Rule { Rule::Char { codepoint: c as i32, case_sensitive: false } }
pub fn range(start: char, end: char) -> Rule { Rule::Range { start: start as i32, end: end as i32 } }
pub fn string(text: &str) -> Rule {
    Rule::StringLit { text: SmolStr::new(text), min_prefix_len: text.chars().count() as i32, case_sensitive: true }
}
pub fn string_ci(text: &str) -> Rule {
    Rule::StringLit { text: SmolStr::new(text), min_prefix_len: text.chars().count() as i32, case_sensitive: false }
}
pub fn string_partial(text: &str, min_prefix_len: i32) -> Rule {
    Rule::StringLit { text: SmolStr::new(text), min_prefix_len, case_sensitive: true }
}
pub fn non_terminal(name: &str) -> Rule { Rule::NonTerminal(SmolStr::new(name)) }

/// A named, option-tagged top-level definition.
#[derive(Debug, Clone)]
pub struct RuleDef {
    pub id: SmolStr,
    pub body: Rule,
    pub options: RuleOptions,
}

/// Fluent construction of a `RuleDef`, split from `Grammar::define` between
/// "build in isolation" and "merge into the store".
pub struct RuleBuilder {
    id: SmolStr,
    options: RuleOptions,
    body: Option<Rule>,
}

impl RuleBuilder {
    pub fn new(name: &str) -> Self {
        Self { id: SmolStr::new(name), options: RuleOptions::new(), body: None }
    }

    pub fn option(mut self, opt: RuleOption) -> Result<Self> {
        self.options = self.options.with(opt)?;
        Ok(self)
    }

    pub fn option_with(mut self, opt: RuleOption, value: impl Into<SmolStr>) -> Result<Self> {
        self.options = self.options.with_param(opt, value)?;
        Ok(self)
    }

    pub fn body(mut self, body: Rule) -> Self {
        self.body = Some(body);
        self
    }

    pub fn finish(self) -> Result<RuleDef> {
        let body = self.body.ok_or_else(|| Error::new(ErrorKind::GrammarSyntax, format!("rule '{}' has no body", self.id)))?;
        Ok(RuleDef { id: self.id, body, options: self.options })
    }
}

/// The primary owner of all grammar data structures: a map of definitions,
/// keyed by name, plus a record of first-seen order for deterministic
/// iteration (token/rule ids are assigned in registration order downstream).
#[derive(Debug, Clone, Default)]
pub struct Grammar {
    order: crate::orderedset::OrderedSet<SmolStr>,
    table: HashMap<SmolStr, RuleDef>,
}

impl Grammar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, def: RuleDef) -> Result<()> {
        if self.table.contains_key(&def.id) {
            return Err(Error::new(ErrorKind::DuplicateRule, format!("rule '{}' already defined", def.id)));
        }
        self.order.insert(def.id.clone());
        self.table.insert(def.id.clone(), def);
        Ok(())
    }

    /// Convenience for `grammar.add(RuleBuilder::new(name).body(body).finish()?)`.
    pub fn define(&mut self, name: &str, body: Rule) -> Result<()> {
        self.add(RuleBuilder::new(name).body(body).finish()?)
    }

    pub fn get(&self, name: &str) -> Option<&RuleDef> {
        self.table.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &SmolStr> {
        self.order.iter()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RuleDef> {
        self.order.iter().filter_map(move |name| self.table.get(name))
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }
}

// --- rule classification and grammar finalization ----------------------

/// Classifies every rule as lexer (`true`) or parser (`false`) by the
/// recursive predicate over the rule algebra, computed as a memoized fixed point so it
/// tolerates cycles: start optimistic (everything lexer-eligible) and relax
/// to `false` until no further change, which terminates because a rule can
/// only flip `true -> false`, never back.
pub fn classify(grammar: &Grammar) -> Result<HashMap<SmolStr, bool>> {
    let mut lexer_of: HashMap<SmolStr, bool> = grammar.iter().map(|d| (d.id.clone(), true)).collect();
    let fragment_of: HashMap<SmolStr, bool> =
        grammar.iter().map(|d| (d.id.clone(), d.options.contains(RuleOption::Fragment))).collect();
    loop {
        let mut changed = false;
        for def in grammar.iter() {
            // `Token`/`Main` are an explicit override of the structural
            // predicate: a rule tagged `Token` is always lexer, one tagged
            // `Main` (a designated parse entry point) is always parser, even
            // if its body would otherwise satisfy the literal-only predicate.
            let computed = if def.options.contains(RuleOption::Token) {
                true
            } else if def.options.contains(RuleOption::Main) {
                false
            } else {
                classify_body(&def.body, grammar, &lexer_of, &fragment_of)?
            };
            if lexer_of[&def.id] != computed {
                lexer_of.insert(def.id.clone(), computed);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    Ok(lexer_of)
}

fn classify_body(
    rule: &Rule,
    grammar: &Grammar,
    lexer_of: &HashMap<SmolStr, bool>,
    fragment_of: &HashMap<SmolStr, bool>,
) -> Result<bool> {
    match rule {
        Rule::NonTerminal(name) => {
            if !grammar.contains(name) {
                return Err(Error::new(ErrorKind::UndefinedRule, format!("undefined rule '{name}'")));
            }
            Ok(*lexer_of.get(name).unwrap_or(&false) || *fragment_of.get(name).unwrap_or(&false))
        }
        Rule::Char { .. } | Rule::Range { .. } | Rule::StringLit { .. } => Ok(true),
        Rule::And(cs) | Rule::Or(cs) => {
            for c in cs {
                if !classify_body(c, grammar, lexer_of, fragment_of)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Rule::Optional(i) | Rule::ZeroOrMore(i) | Rule::OneOrMore(i) | Rule::Test(i) | Rule::Not(i) => {
            classify_body(i, grammar, lexer_of, fragment_of)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LiteralKey {
    Char(i32, bool),
    Range(i32, i32),
    StringLit(SmolStr, i32, bool),
}

impl LiteralKey {
    fn from_rule(rule: &Rule) -> Option<Self> {
        match rule {
            Rule::Char { codepoint, case_sensitive } => Some(LiteralKey::Char(*codepoint, *case_sensitive)),
            Rule::Range { start, end } => Some(LiteralKey::Range(*start, *end)),
            Rule::StringLit { text, min_prefix_len, case_sensitive } => {
                Some(LiteralKey::StringLit(text.clone(), *min_prefix_len, *case_sensitive))
            }
            _ => None,
        }
    }
}

/// Punctuation -> word-name table for auto-naming synthesized lexer rules.
fn punctuation_name(c: char) -> Option<&'static str> {
    Some(match c {
        '(' => "lparen", ')' => "rparen", '[' => "lbracket", ']' => "rbracket",
        '{' => "lbrace", '}' => "rbrace", '+' => "plus", '-' => "minus",
        '*' => "star", '/' => "slash", '.' => "dot", ',' => "comma",
        ';' => "semi", ':' => "colon", '=' => "eq", '<' => "lt", '>' => "gt",
        '!' => "bang", '?' => "question", '&' => "amp", '|' => "pipe",
        '"' => "quote", '\'' => "apos", '_' => "underscore", ' ' => "space",
        '\n' => "newline", '\t' => "tab", '\\' => "backslash", '%' => "percent",
        '#' => "hash", '@' => "at", '^' => "caret", '~' => "tilde", '`' => "backtick",
        _ => return None,
    })
}

fn char_label(cp: i32) -> String {
    match char::from_u32(cp as u32) {
        Some(c) if c.is_ascii_alphanumeric() => c.to_ascii_lowercase().to_string(),
        Some(c) => punctuation_name(c).map(str::to_string).unwrap_or_else(|| format!("0x{cp:02X}")),
        None => format!("0x{cp:02X}"),
    }
}

fn string_label(text: &str) -> String {
    let label: String = text
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase().to_string() } else { format!("_{}", char_label(c as i32)) })
        .collect();
    if label.is_empty() { "empty".to_string() } else { label }
}

fn auto_name(rule: &Rule) -> String {
    match rule {
        Rule::Char { codepoint, .. } => format!("chr_{}", char_label(*codepoint)),
        Rule::Range { start, end } => format!("range_{}_{}", char_label(*start), char_label(*end)),
        Rule::StringLit { text, .. } => format!("str_{}", string_label(text)),
        _ => unreachable!("auto_name is only called on literal constructs"),
    }
}

/// Walks a parser rule's body in post-order, replacing inline literal
/// constructs with references to synthesized, deduplicated, auto-named lexer
/// rules.
fn hoist_literals(
    rule: &Rule,
    lexer_grammar: &mut Grammar,
    synth_table: &mut HashMap<LiteralKey, SmolStr>,
    used_names: &mut std::collections::HashSet<SmolStr>,
) -> Result<Rule> {
    if let Some(key) = LiteralKey::from_rule(rule) {
        if let Some(name) = synth_table.get(&key) {
            return Ok(Rule::NonTerminal(name.clone()));
        }
        let base = auto_name(rule);
        let mut name = SmolStr::new(&base);
        let mut suffix = 2;
        while used_names.contains(&name) {
            name = SmolStr::new(format!("{base}_{suffix}"));
            suffix += 1;
        }
        used_names.insert(name.clone());
        synth_table.insert(key, name.clone());
        lexer_grammar.define(&name, rule.clone())?;
        return Ok(Rule::NonTerminal(name));
    }
    Ok(match rule {
        Rule::NonTerminal(n) => Rule::NonTerminal(n.clone()),
        Rule::And(cs) => Rule::And(hoist_children(cs, lexer_grammar, synth_table, used_names)?),
        Rule::Or(cs) => Rule::Or(hoist_children(cs, lexer_grammar, synth_table, used_names)?),
        Rule::Optional(i) => Rule::Optional(Box::new(hoist_literals(i, lexer_grammar, synth_table, used_names)?)),
        Rule::ZeroOrMore(i) => Rule::ZeroOrMore(Box::new(hoist_literals(i, lexer_grammar, synth_table, used_names)?)),
        Rule::OneOrMore(i) => Rule::OneOrMore(Box::new(hoist_literals(i, lexer_grammar, synth_table, used_names)?)),
        Rule::Test(i) => Rule::Test(Box::new(hoist_literals(i, lexer_grammar, synth_table, used_names)?)),
        Rule::Not(i) => Rule::Not(Box::new(hoist_literals(i, lexer_grammar, synth_table, used_names)?)),
        Rule::Char { .. } | Rule::Range { .. } | Rule::StringLit { .. } => unreachable!(),
    })
}

fn hoist_children(
    cs: &[Rule],
    lexer_grammar: &mut Grammar,
    synth_table: &mut HashMap<LiteralKey, SmolStr>,
    used_names: &mut std::collections::HashSet<SmolStr>,
) -> Result<Vec<Rule>> {
    cs.iter().map(|c| hoist_literals(c, lexer_grammar, synth_table, used_names)).collect()
}

fn check_no_parser_refs(rule: &Rule, lexer_of: &HashMap<SmolStr, bool>) -> Result<()> {
    match rule {
        Rule::NonTerminal(name) => {
            if !*lexer_of.get(name).unwrap_or(&false) {
                return Err(Error::new(
                    ErrorKind::LexerReferencesParser,
                    format!("lexer rule references parser rule '{name}'"),
                ));
            }
            Ok(())
        }
        other => other.children().into_iter().try_for_each(|c| check_no_parser_refs(c, lexer_of)),
    }
}

/// Output of grammar finalization: the lexer-classified rules (original plus
/// every synthesized literal rule reachable from a parser rule), and the
/// parser-classified rules rewritten so every terminal appearance goes
/// through a `NonTerminal` reference into the lexer grammar.
pub struct Finalized {
    pub lexer_names: Vec<SmolStr>,
    pub lexer_grammar: Grammar,
    pub parser_grammar: Grammar,
}

pub fn finalize(grammar: &Grammar, start_rule: &str) -> Result<Finalized> {
    if !grammar.contains(start_rule) {
        return Err(Error::new(ErrorKind::UndefinedRule, format!("start rule '{start_rule}' is undefined")));
    }
    let lexer_of = classify(grammar)?;
    log::debug!(
        "classified {} rules: {} lexer, {} parser",
        lexer_of.len(),
        lexer_of.values().filter(|v| **v).count(),
        lexer_of.values().filter(|v| !**v).count(),
    );

    let mut lexer_grammar = Grammar::new();
    let mut parser_grammar = Grammar::new();
    let mut used_names: std::collections::HashSet<SmolStr> = grammar.names().cloned().collect();
    let mut synth_table: HashMap<LiteralKey, SmolStr> = HashMap::new();

    for def in grammar.iter() {
        if lexer_of[&def.id] {
            lexer_grammar.add(def.clone())?;
        }
    }
    for def in grammar.iter() {
        if !lexer_of[&def.id] {
            let new_body = hoist_literals(&def.body, &mut lexer_grammar, &mut synth_table, &mut used_names)?;
            parser_grammar.add(RuleDef { id: def.id.clone(), body: new_body, options: def.options.clone() })?;
        }
    }

    for def in lexer_grammar.iter() {
        check_no_parser_refs(&def.body, &lexer_of)?;
    }

    let lexer_names: Vec<SmolStr> = lexer_grammar.names().cloned().collect();
    log::info!("finalized grammar for start rule '{start_rule}': {} lexer rules, {} parser rules", lexer_names.len(), parser_grammar.len());
    Ok(Finalized { lexer_names, lexer_grammar, parser_grammar })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_rule_is_rejected() {
        let mut g = Grammar::new();
        g.define("a", char('x')).unwrap();
        let err = g.define("a", char('y')).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateRule);
    }

    #[test]
    fn option_roundtrip() {
        let def = RuleBuilder::new("ws").option(RuleOption::Ignore).unwrap().body(char(' ')).finish().unwrap();
        assert!(def.options.contains(RuleOption::Ignore));
        assert!(!def.options.contains(RuleOption::Fragment));
    }

    #[test]
    fn name_option_requires_parameter() {
        let err = RuleBuilder::new("kw").option(RuleOption::Name).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidOptionArgument);
    }

    #[test]
    fn classifies_lexer_and_parser_rules() {
        let mut g = Grammar::new();
        g.define("digit", range('0', '9')).unwrap();
        g.define("id", and(vec![range('a', 'z'), zero_or_more(range('a', 'z'))])).unwrap();
        g.add(
            RuleBuilder::new("call")
                .option(RuleOption::Main)
                .unwrap()
                .body(and(vec![non_terminal("id"), char('('), non_terminal("id"), char(')')]))
                .finish()
                .unwrap(),
        )
        .unwrap();
        let lexer_of = classify(&g).unwrap();
        assert!(lexer_of["digit"]);
        assert!(lexer_of["id"]);
        assert!(!lexer_of["call"], "Main-tagged rules are always parser rules");
    }

    #[test]
    fn undefined_reference_is_rejected_during_classification() {
        let mut g = Grammar::new();
        g.define("id", non_terminal("nope")).unwrap();
        let err = classify(&g).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UndefinedRule);
    }

    #[test]
    fn finalize_hoists_inline_literals_out_of_parser_rules() {
        let mut g = Grammar::new();
        g.define("id", one_or_more(range('a', 'z'))).unwrap();
        g.add(
            RuleBuilder::new("call")
                .option(RuleOption::Main)
                .unwrap()
                .body(and(vec![non_terminal("id"), char('('), non_terminal("id"), char(')')]))
                .finish()
                .unwrap(),
        )
        .unwrap();
        let finalized = finalize(&g, "call").unwrap();
        assert!(finalized.lexer_names.contains(&SmolStr::new("chr_lparen")));
        assert!(finalized.lexer_names.contains(&SmolStr::new("id")));
        let call_def = finalized.parser_grammar.get("call").unwrap();
        assert!(matches!(&call_def.body, Rule::And(cs) if cs.iter().all(|c| matches!(c, Rule::NonTerminal(_)))));
    }

    #[test]
    fn finalize_rejects_undefined_start_rule() {
        let g = Grammar::new();
        let err = finalize(&g, "nope").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UndefinedRule);
    }
}
