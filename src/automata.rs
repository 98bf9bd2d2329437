//! Thompson NFA construction, subset construction to a DFA, and Hopcroft-style
//! table-filling minimization. States are stored as `Vec<State>` indexed by
//! integer id: this removes all back-pointer concerns and makes serialization
//! trivial.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use itertools::Itertools;
use smol_str::SmolStr;

use crate::error::{Error, ErrorKind, Result};
use crate::rule::{Grammar, Rule, RuleOption, EOI_CODEPOINT, EOI_NAME};

pub const EPSILON: i32 = 0;
pub const ANY: i32 = 0x7FFF_FFFF;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TokenType {
    pub id: u32,
    pub name: SmolStr,
    pub source_rule: SmolStr,
}

#[derive(Debug, Clone, Default)]
pub struct NfaState {
    pub id: u32,
    pub initial: bool,
    pub final_: bool,
    pub transitions: Vec<(i32, u32)>,
    pub token_types: Vec<TokenType>,
}

#[derive(Debug, Default)]
pub struct Nfa {
    pub states: Vec<NfaState>,
    pub start: u32,
}

impl Nfa {
    fn new_state(&mut self) -> u32 {
        let id = self.states.len() as u32;
        self.states.push(NfaState { id, ..Default::default() });
        log::trace!("nfa: new state {id}");
        id
    }

    fn add_edge(&mut self, from: u32, symbol: i32, to: u32) {
        log::trace!("nfa: edge {from} -{symbol}-> {to}");
        self.states[from as usize].transitions.push((symbol, to));
    }

    /// ε-closure of a single state, guaranteed to contain the state itself.
    pub fn epsilon_closure(&self, states: &BTreeSet<u32>) -> BTreeSet<u32> {
        let mut closure: BTreeSet<u32> = states.clone();
        let mut stack: Vec<u32> = states.iter().copied().collect();
        while let Some(s) = stack.pop() {
            for &(sym, to) in &self.states[s as usize].transitions {
                if sym == EPSILON && closure.insert(to) {
                    stack.push(to);
                }
            }
        }
        closure
    }

    pub fn max_symbol(&self) -> i32 {
        self.states
            .iter()
            .flat_map(|s| s.transitions.iter())
            .map(|&(sym, _)| sym)
            .filter(|&sym| sym != EPSILON && sym != ANY)
            .max()
            .unwrap_or(0)
    }
}

#[derive(Clone, Copy)]
struct Fragment {
    start: u32,
    end: u32,
}

struct DeferredNegation {
    start: u32,
    final_: u32,
    excluded: BTreeSet<i32>,
}

struct Builder<'g> {
    grammar: &'g Grammar,
    nfa: Nfa,
    cache: HashMap<SmolStr, Fragment>,
    building: HashSet<SmolStr>,
    deferred_negations: Vec<DeferredNegation>,
}

impl<'g> Builder<'g> {
    fn visit(&mut self, rule: &Rule) -> Result<Fragment> {
        match rule {
            Rule::NonTerminal(name) => self.visit_named(name),
            Rule::Char { codepoint, case_sensitive } => Ok(self.build_char(*codepoint, *case_sensitive)),
            Rule::Range { start, end } => Ok(self.build_range(*start, *end)),
            Rule::StringLit { text, min_prefix_len, case_sensitive } => {
                Ok(self.build_string(text, *min_prefix_len, *case_sensitive))
            }
            Rule::And(children) => self.build_and(children),
            Rule::Or(children) => self.build_or(children),
            Rule::Optional(inner) => self.build_optional(inner),
            Rule::ZeroOrMore(inner) => self.build_zero_or_more(inner),
            Rule::OneOrMore(inner) => self.build_one_or_more(inner),
            Rule::Not(inner) => self.build_not(inner),
            Rule::Test(_) => Err(Error::new(
                ErrorKind::UnsupportedForLexer,
                "syntactic predicates belong to the parser, not the lexer".to_string(),
            )),
        }
    }

    fn visit_named(&mut self, name: &SmolStr) -> Result<Fragment> {
        if let Some(frag) = self.cache.get(name) {
            return Ok(*frag);
        }
        if self.building.contains(name) {
            // cyclic reference through a NonTerminal: states were already reserved
            // below before recursing, so this lookup should have hit the cache.
            return Err(Error::new(ErrorKind::UndefinedRule, format!("rule '{name}' is cyclic before its fragment is reserved")));
        }
        let def = self
            .grammar
            .get(name)
            .ok_or_else(|| Error::new(ErrorKind::UndefinedRule, format!("undefined rule '{name}'")))?;
        let start = self.nfa.new_state();
        let end = self.nfa.new_state();
        self.cache.insert(name.clone(), Fragment { start, end });
        self.building.insert(name.clone());
        let body_frag = self.visit(&def.body)?;
        self.nfa.add_edge(start, EPSILON, body_frag.start);
        self.nfa.add_edge(body_frag.end, EPSILON, end);
        self.building.remove(name);
        Ok(Fragment { start, end })
    }

    fn build_char(&mut self, codepoint: i32, case_sensitive: bool) -> Fragment {
        let start = self.nfa.new_state();
        let end = self.nfa.new_state();
        for sym in case_variants(codepoint, case_sensitive) {
            self.nfa.add_edge(start, sym, end);
        }
        Fragment { start, end }
    }

    fn build_range(&mut self, a: i32, b: i32) -> Fragment {
        let start = self.nfa.new_state();
        let end = self.nfa.new_state();
        for cp in a..=b {
            self.nfa.add_edge(start, cp, end);
        }
        Fragment { start, end }
    }

    fn build_string(&mut self, text: &str, min_prefix_len: i32, case_sensitive: bool) -> Fragment {
        let chars: Vec<char> = text.chars().collect();
        let start = self.nfa.new_state();
        let mut cur = start;
        for (i, ch) in chars.iter().enumerate() {
            let next = self.nfa.new_state();
            for sym in case_variants(*ch as i32, case_sensitive) {
                self.nfa.add_edge(cur, sym, next);
            }
            cur = next;
            // positions from `min_prefix_len` onward are final too, so any
            // prefix of at least that length is a complete match (string_partial).
            if (i + 1) as i32 >= min_prefix_len {
                self.nfa.states[next as usize].final_ = true;
            }
        }
        if chars.is_empty() {
            self.nfa.states[start as usize].final_ = true;
        }
        Fragment { start, end: cur }
    }

    fn build_and(&mut self, children: &[Rule]) -> Result<Fragment> {
        if children.is_empty() {
            let s = self.nfa.new_state();
            return Ok(Fragment { start: s, end: s });
        }
        let mut frags = Vec::with_capacity(children.len());
        for c in children {
            frags.push(self.visit(c)?);
        }
        for w in frags.windows(2) {
            self.nfa.add_edge(w[0].end, EPSILON, w[1].start);
        }
        let end = frags.last().expect("non-empty children checked above").end;
        Ok(Fragment { start: frags[0].start, end })
    }

    fn build_or(&mut self, children: &[Rule]) -> Result<Fragment> {
        let start = self.nfa.new_state();
        let end = self.nfa.new_state();
        for c in children {
            let frag = self.visit(c)?;
            self.nfa.add_edge(start, EPSILON, frag.start);
            self.nfa.add_edge(frag.end, EPSILON, end);
        }
        Ok(Fragment { start, end })
    }

    fn build_optional(&mut self, inner: &Rule) -> Result<Fragment> {
        let frag = self.visit(inner)?;
        let start = self.nfa.new_state();
        let end = self.nfa.new_state();
        self.nfa.add_edge(start, EPSILON, frag.start);
        self.nfa.add_edge(frag.end, EPSILON, end);
        self.nfa.add_edge(start, EPSILON, end);
        Ok(Fragment { start, end })
    }

    fn build_zero_or_more(&mut self, inner: &Rule) -> Result<Fragment> {
        let frag = self.visit(inner)?;
        let start = self.nfa.new_state();
        let end = self.nfa.new_state();
        self.nfa.add_edge(start, EPSILON, frag.start);
        self.nfa.add_edge(frag.end, EPSILON, end);
        self.nfa.add_edge(start, EPSILON, end);
        self.nfa.add_edge(frag.end, EPSILON, frag.start);
        Ok(Fragment { start, end })
    }

    fn build_one_or_more(&mut self, inner: &Rule) -> Result<Fragment> {
        let frag = self.visit(inner)?;
        let start = self.nfa.new_state();
        let end = self.nfa.new_state();
        self.nfa.add_edge(start, EPSILON, frag.start);
        self.nfa.add_edge(frag.end, EPSILON, end);
        self.nfa.add_edge(frag.end, EPSILON, frag.start);
        Ok(Fragment { start, end })
    }

    fn build_not(&mut self, inner: &Rule) -> Result<Fragment> {
        let excluded = literal_symbol_set(inner)
            .ok_or_else(|| Error::new(ErrorKind::UnsupportedForLexer, "Not is only supported over literal character classes in the lexer".to_string()))?;
        let start = self.nfa.new_state();
        let final_ = self.nfa.new_state();
        self.deferred_negations.push(DeferredNegation { start, final_, excluded });
        Ok(Fragment { start, end: final_ })
    }

    fn resolve_negations(&mut self) {
        let max_symbol = self.nfa.max_symbol().max(1);
        let deferred = std::mem::take(&mut self.deferred_negations);
        for neg in deferred {
            for sym in 1..=max_symbol {
                if !neg.excluded.contains(&sym) {
                    self.nfa.add_edge(neg.start, sym, neg.final_);
                }
            }
            if !neg.excluded.contains(&ANY) {
                self.nfa.add_edge(neg.start, ANY, neg.final_);
            }
        }
    }
}

fn case_variants(codepoint: i32, case_sensitive: bool) -> Vec<i32> {
    if case_sensitive {
        return vec![codepoint];
    }
    let Some(ch) = char::from_u32(codepoint as u32) else { return vec![codepoint] };
    let lower = ch.to_lowercase().next().map(|c| c as i32).unwrap_or(codepoint);
    let upper = ch.to_uppercase().next().map(|c| c as i32).unwrap_or(codepoint);
    if lower == upper {
        vec![lower]
    } else {
        vec![lower, upper]
    }
}

/// Flattens a literal-only construct (`Char`, `Range`, single-char `StringLit`,
/// or an `Or` of such) to its symbol set, for use by `Not`. Returns `None` if
/// `rule` isn't shaped like a character class.
fn literal_symbol_set(rule: &Rule) -> Option<BTreeSet<i32>> {
    match rule {
        Rule::Char { codepoint, case_sensitive } => Some(case_variants(*codepoint, *case_sensitive).into_iter().collect()),
        Rule::Range { start, end } => Some((*start..=*end).collect()),
        Rule::StringLit { text, .. } if text.chars().count() == 1 => {
            let only = text.chars().next().expect("count() == 1 checked above");
            Some(vec![only as i32].into_iter().collect())
        }
        Rule::Or(children) => {
            let mut set = BTreeSet::new();
            for c in children {
                set.extend(literal_symbol_set(c)?);
            }
            Some(set)
        }
        _ => None,
    }
}

/// Builds the union NFA of every lexer rule that is not `Fragment`-marked,
/// plus the reserved `EOI` rule. `lexer_rule_names` must already be filtered to
/// the grammar's lexer-classified rules (see `crate::rule::classify`).
pub fn build_nfa(grammar: &Grammar, lexer_rule_names: &[SmolStr]) -> Result<Nfa> {
    let mut nfa = Nfa::default();
    let global_start = nfa.new_state();
    nfa.states[global_start as usize].initial = true;
    nfa.start = global_start;

    let mut builder = Builder { grammar, nfa, cache: HashMap::new(), building: HashSet::new(), deferred_negations: Vec::new() };

    // `rule_id` is the grammar key used both to find the rule's NFA fragment
    // and (later, in `vocabulary::assemble`) to look its option bits back up;
    // `display_name` is what actually surfaces as the token's name and may be
    // overridden per-rule via the `Name` option.
    let mut next_token_id: u32 = 0;
    let mut wire_token = |builder: &mut Builder, rule_id: &str, display_name: &str| -> Result<()> {
        let frag = builder.visit_named(&SmolStr::new(rule_id))?;
        let id = next_token_id;
        next_token_id += 1;
        let final_state = builder.nfa.new_state();
        builder.nfa.states[final_state as usize].final_ = true;
        builder.nfa.states[final_state as usize].token_types.push(TokenType {
            id,
            name: SmolStr::new(display_name),
            source_rule: SmolStr::new(rule_id),
        });
        builder.nfa.add_edge(global_start, EPSILON, frag.start);
        builder.nfa.add_edge(frag.end, EPSILON, final_state);
        Ok(())
    };

    // EOI is always token id 0.
    {
        let eoi_start = builder.nfa.new_state();
        let eoi_end = builder.nfa.new_state();
        builder.nfa.add_edge(eoi_start, EOI_CODEPOINT, eoi_end);
        builder.cache.insert(SmolStr::new(EOI_NAME), Fragment { start: eoi_start, end: eoi_end });
        wire_token(&mut builder, EOI_NAME, EOI_NAME)?;
    }

    for name in lexer_rule_names {
        let def = grammar.get(name).ok_or_else(|| Error::new(ErrorKind::UndefinedRule, format!("undefined rule '{name}'")))?;
        if def.options.contains(RuleOption::Fragment) {
            continue;
        }
        let token_name = def.options.name_param().cloned().unwrap_or_else(|| name.clone());
        wire_token(&mut builder, name, &token_name)?;
    }

    builder.resolve_negations();
    log::info!("nfa built: {} states, {} token types", builder.nfa.states.len(), next_token_id);
    Ok(builder.nfa)
}

// --- DFA --------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct DfaState {
    pub id: u32,
    pub final_: bool,
    /// dense row indexed by symbol (0 reserved for `ANY` fallback); 0 means dead.
    pub row: Vec<u32>,
    pub token_types: Vec<TokenType>,
}

#[derive(Debug, Default)]
pub struct Dfa {
    pub states: Vec<DfaState>,
    pub start: u32,
    pub max_symbol: i32,
}

/// Subset construction (NFA → DFA). State 0 is always the dead state.
pub fn subset_construction(nfa: &Nfa) -> Dfa {
    let max_symbol = nfa.max_symbol();
    let mut dfa = Dfa { states: vec![DfaState { id: 0, ..Default::default() }], start: 0, max_symbol };

    let mut seen: HashMap<BTreeSet<u32>, u32> = HashMap::new();
    let start_set = nfa.epsilon_closure(&BTreeSet::from([nfa.start]));
    let start_id = dfa.states.len() as u32;
    dfa.states.push(new_dfa_state(start_id, &start_set, nfa));
    seen.insert(start_set.clone(), start_id);
    dfa.start = start_id;

    let mut worklist: VecDeque<BTreeSet<u32>> = VecDeque::new();
    worklist.push_back(start_set);

    while let Some(set) = worklist.pop_front() {
        let from_id = seen[&set];
        let symbols: BTreeSet<i32> = set
            .iter()
            .flat_map(|&s| nfa.states[s as usize].transitions.iter())
            .map(|&(sym, _)| sym)
            .filter(|&sym| sym != EPSILON)
            .collect();

        for &symbol in &symbols {
            let moved: BTreeSet<u32> = set
                .iter()
                .flat_map(|&s| nfa.states[s as usize].transitions.iter())
                .filter(|&&(sym, _)| sym == symbol)
                .map(|&(_, to)| to)
                .collect();
            let closure = nfa.epsilon_closure(&moved);
            if closure.is_empty() {
                continue;
            }
            let to_id = *seen.entry(closure.clone()).or_insert_with(|| {
                let id = dfa.states.len() as u32;
                dfa.states.push(new_dfa_state(id, &closure, nfa));
                worklist.push_back(closure.clone());
                id
            });
            set_transition(&mut dfa, from_id, symbol, to_id);
        }
    }
    log::info!("subset construction: {} DFA states from {} NFA states", dfa.states.len(), nfa.states.len());
    dfa
}

fn new_dfa_state(id: u32, set: &BTreeSet<u32>, nfa: &Nfa) -> DfaState {
    let final_ = set.iter().any(|&s| nfa.states[s as usize].final_);
    let token_types: Vec<TokenType> = set
        .iter()
        .flat_map(|&s| nfa.states[s as usize].token_types.iter().cloned())
        .sorted_by_key(|tt| tt.id)
        .dedup_by(|a, b| a.id == b.id)
        .collect();
    DfaState { id, final_, row: Vec::new(), token_types }
}

fn set_transition(dfa: &mut Dfa, from: u32, symbol: i32, to: u32) {
    if symbol == ANY {
        ensure_row_len(&mut dfa.states[from as usize], 1);
        dfa.states[from as usize].row[0] = to;
    } else {
        let col = symbol as usize + 1;
        ensure_row_len(&mut dfa.states[from as usize], col + 1);
        dfa.states[from as usize].row[col] = to;
    }
}

fn ensure_row_len(state: &mut DfaState, len: usize) {
    if state.row.len() < len {
        state.row.resize(len, 0);
    }
}

fn row_lookup(state: &DfaState, symbol: i32) -> u32 {
    if symbol == ANY {
        return state.row.first().copied().unwrap_or(0);
    }
    let col = symbol as usize + 1;
    state.row.get(col).copied().unwrap_or_else(|| state.row.first().copied().unwrap_or(0))
}

/// Hopcroft-style table-filling minimization.
pub fn minimize(dfa: &Dfa) -> Dfa {
    let n = dfa.states.len();
    let mut marked = vec![vec![false; n]; n];
    for i in 0..n {
        for j in 0..i {
            if dfa.states[i].final_ != dfa.states[j].final_
                || (dfa.states[i].final_ && token_ids(&dfa.states[i]) != token_ids(&dfa.states[j]))
            {
                marked[i][j] = true;
            }
        }
    }
    loop {
        let mut changed = false;
        for i in 0..n {
            for j in 0..i {
                if marked[i][j] {
                    continue;
                }
                for sym in 0..=dfa.max_symbol {
                    let ti = row_lookup(&dfa.states[i], sym) as usize;
                    let tj = row_lookup(&dfa.states[j], sym) as usize;
                    if ti != tj && marked[ti.max(tj)][ti.min(tj)] {
                        marked[i][j] = true;
                        changed = true;
                        break;
                    }
                }
                let ai = row_lookup(&dfa.states[i], ANY) as usize;
                let aj = row_lookup(&dfa.states[j], ANY) as usize;
                if !marked[i][j] && ai != aj && marked[ai.max(aj)][ai.min(aj)] {
                    marked[i][j] = true;
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }

    // union-find style grouping of unmarked pairs into equivalence classes.
    let mut class_of: Vec<usize> = (0..n).collect();
    for i in 0..n {
        for j in 0..i {
            if !marked[i][j] && class_of[i] != class_of[j] {
                let (lo, hi) = (class_of[i].min(class_of[j]), class_of[i].max(class_of[j]));
                for c in class_of.iter_mut() {
                    if *c == hi {
                        *c = lo;
                    }
                }
            }
        }
    }
    let mut canon: Vec<usize> = class_of.clone();
    canon.sort_unstable();
    canon.dedup();
    let remap: HashMap<usize, u32> = canon.iter().enumerate().map(|(new_id, &old)| (old, new_id as u32)).collect();

    let mut out_states: Vec<DfaState> = Vec::with_capacity(canon.len());
    for &rep in &canon {
        let members: Vec<usize> = (0..n).filter(|&i| class_of[i] == rep).collect();
        let token_types: Vec<TokenType> = members
            .iter()
            .flat_map(|&i| dfa.states[i].token_types.iter().cloned())
            .sorted_by_key(|tt| tt.id)
            .dedup_by(|a, b| a.id == b.id)
            .collect();
        out_states.push(DfaState {
            id: remap[&rep],
            final_: dfa.states[rep].final_,
            row: Vec::new(),
            token_types,
        });
    }
    let max_row = dfa.states.iter().map(|s| s.row.len()).max().unwrap_or(0);
    for (new_id, &rep) in canon.iter().enumerate() {
        let mut row = vec![0u32; max_row];
        for col in 0..max_row {
            let target = dfa.states[rep].row.get(col).copied().unwrap_or(0);
            row[col] = if target == 0 { 0 } else { remap[&(class_of[target as usize])] };
        }
        out_states[new_id].row = row;
    }

    log::info!("minimization: {} states collapsed to {}", dfa.states.len(), out_states.len());
    Dfa { states: out_states, start: remap[&class_of[dfa.start as usize]], max_symbol: dfa.max_symbol }
}

fn token_ids(state: &DfaState) -> Vec<u32> {
    state.token_types.iter().map(|t| t.id).collect()
}

impl Dfa {
    pub fn transition(&self, state: u32, symbol: i32) -> u32 {
        row_lookup(&self.states[state as usize], symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{self, RuleBuilder};

    fn id_grammar() -> Grammar {
        let mut g = Grammar::new();
        g.define(
            "id",
            rule::and(vec![
                rule::or(vec![rule::range('a', 'z'), rule::range('A', 'Z'), rule::char('_')]),
                rule::zero_or_more(rule::or(vec![
                    rule::range('a', 'z'),
                    rule::range('A', 'Z'),
                    rule::range('0', '9'),
                    rule::char('_'),
                ])),
            ]),
        )
        .unwrap();
        g
    }

    #[test]
    fn epsilon_closure_contains_self() {
        let g = id_grammar();
        let nfa = build_nfa(&g, &[SmolStr::new("id")]).unwrap();
        for s in &nfa.states {
            let closure = nfa.epsilon_closure(&BTreeSet::from([s.id]));
            assert!(closure.contains(&s.id));
        }
    }

    #[test]
    fn dfa_transition_is_deterministic() {
        let g = id_grammar();
        let nfa = build_nfa(&g, &[SmolStr::new("id")]).unwrap();
        let dfa = subset_construction(&nfa);
        // every state/symbol row entry is a single id by construction (dense table).
        assert!(dfa.states.len() > 1);
    }

    #[test]
    fn minimization_is_idempotent() {
        let g = id_grammar();
        let nfa = build_nfa(&g, &[SmolStr::new("id")]).unwrap();
        let dfa = subset_construction(&nfa);
        let min1 = minimize(&dfa);
        let min2 = minimize(&min1);
        assert_eq!(min1.states.len(), min2.states.len());
    }

    #[test]
    fn not_over_unsupported_shape_errors() {
        let mut g = Grammar::new();
        g.define("weird", rule::not(rule::and(vec![rule::char('a'), rule::char('b')]))).unwrap();
        let err = build_nfa(&g, &[SmolStr::new("weird")]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnsupportedForLexer);
    }

    #[test]
    fn fragment_rules_build_no_standalone_token() {
        let mut g = Grammar::new();
        g.add(RuleBuilder::new("digit").option(RuleOption::Fragment).unwrap().body(rule::range('0', '9')).finish().unwrap()).unwrap();
        g.define("number", rule::one_or_more(rule::non_terminal("digit"))).unwrap();
        let nfa = build_nfa(&g, &[SmolStr::new("digit"), SmolStr::new("number")]).unwrap();
        let names: HashSet<&str> = nfa.states.iter().flat_map(|s| s.token_types.iter()).map(|t| t.name.as_str()).collect();
        assert!(!names.contains("digit"));
        assert!(names.contains("number"));
    }
}
