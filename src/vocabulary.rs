//! Packages a minimized DFA into the dense, immutable artifact the lexer
//! actually runs against: `token_names`, `token_options`, a `transitions`
//! matrix, and a per-state accepting-token list.

use itertools::Itertools;
use smol_str::SmolStr;

use crate::automata::{Dfa, ANY};
use crate::rule::{Grammar, RuleOption};

#[derive(Debug, Clone)]
pub struct Vocabulary {
    /// index 0 reserved for EOI.
    pub token_names: Vec<SmolStr>,
    /// bitset per token id, combining the options of all rules that produced it.
    pub token_options: Vec<u32>,
    /// `transitions[state][col]`; column 0 is the `ANY` wildcard fallback,
    /// column `symbol + 1` otherwise. `0` means dead/no-transition.
    pub transitions: Vec<Vec<u32>>,
    /// accepting token ids per state, in deterministic (ascending id) order.
    pub accepts: Vec<Vec<u32>>,
    pub max_symbol: i32,
}

impl Vocabulary {
    pub fn num_states(&self) -> usize {
        self.transitions.len()
    }

    pub fn transition(&self, state: u32, symbol: i32) -> u32 {
        let row = &self.transitions[state as usize];
        if symbol == ANY {
            return row.first().copied().unwrap_or(0);
        }
        let col = symbol as usize + 1;
        row.get(col).copied().unwrap_or_else(|| row.first().copied().unwrap_or(0))
    }

    pub fn is_final(&self, state: u32) -> bool {
        !self.accepts[state as usize].is_empty()
    }

    pub fn token_name(&self, token_id: u32) -> &str {
        self.token_names.get(token_id as usize).map(SmolStr::as_str).unwrap_or("?")
    }

    pub fn token_has_option(&self, token_id: u32, opt: RuleOption) -> bool {
        self.token_options.get(token_id as usize).map(|bits| bits & opt.code_bit() != 0).unwrap_or(false)
    }
}

/// Combines the option bitsets of every rule in `lexer_grammar` sharing a
/// given token name into one bitset per token id, in first-discovered order
/// (EOI is always id 0).
pub fn assemble(dfa: &Dfa, lexer_grammar: &Grammar) -> Vocabulary {
    // Token ids are already canonical: `automata::build_nfa` assigns them in
    // registration order with EOI fixed at 0, and minimization preserves them.
    let max_id = dfa
        .states
        .iter()
        .flat_map(|s| s.token_types.iter())
        .map(|tt| tt.id)
        .max()
        .map(|m| m as usize + 1)
        .unwrap_or(1);
    let mut token_names: Vec<SmolStr> = vec![SmolStr::new(""); max_id];
    let mut token_options: Vec<u32> = vec![0; max_id];
    for state in &dfa.states {
        for tt in &state.token_types {
            let idx = tt.id as usize;
            token_names[idx] = tt.name.clone();
            token_options[idx] = lexer_grammar.get(&tt.source_rule).map(|d| d.options.bits()).unwrap_or(0);
        }
    }

    let mut accepts: Vec<Vec<u32>> = Vec::with_capacity(dfa.states.len());
    let mut transitions: Vec<Vec<u32>> = Vec::with_capacity(dfa.states.len());
    for state in &dfa.states {
        let ids: Vec<u32> = state.token_types.iter().map(|tt| tt.id).sorted_unstable().dedup().collect();
        accepts.push(ids);
        transitions.push(state.row.clone());
    }

    log::info!("vocabulary assembled: {} states, {} token names", transitions.len(), token_names.len());
    Vocabulary { token_names, token_options, transitions, accepts, max_symbol: dfa.max_symbol }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automata::{build_nfa, minimize, subset_construction};
    use crate::rule;

    #[test]
    fn eoi_is_token_zero() {
        let mut g = Grammar::new();
        g.define("id", rule::range('a', 'z')).unwrap();
        let nfa = build_nfa(&g, &[SmolStr::new("id")]).unwrap();
        let dfa = minimize(&subset_construction(&nfa));
        let vocab = assemble(&dfa, &g);
        assert_eq!(vocab.token_names[0], "EOI");
    }
}
