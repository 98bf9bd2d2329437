//! Debug-only persisted formats: DOT dumps of an NFA/DFA, and
//! plain-text dumps of a `Vocabulary`/`Syntax`, built on the same
//! `IndentedWriter` support container. Stable/diffable across two builds of
//! the same grammar, which is what makes it the preferred acceptance
//! artifact for automaton correctness tests.

use std::collections::HashMap;

use crate::automata::{Dfa, Nfa, ANY, EPSILON};
use crate::syntax::{self, Syntax};
use crate::textwriter::IndentedWriter;
use crate::vocabulary::Vocabulary;

/// Escapes a label for embedding in a DOT `label="..."` attribute: `\n`,
/// `\r`, `\t`, `"`, `\`, and other control codes become `0xNN`; ε becomes
/// `€`; the wildcard `ANY` symbol becomes `…`.
fn escape_label(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c if (c as u32) < 0x20 => out.push_str(&format!("0x{:02X}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

fn symbol_label(sym: i32) -> String {
    if sym == EPSILON {
        return "\u{20AC}".to_string(); // €
    }
    if sym == ANY {
        return "\u{2026}".to_string(); // …
    }
    match char::from_u32(sym as u32) {
        Some(c) if !c.is_control() => escape_label(&c.to_string()),
        _ => format!("0x{sym:02X}"),
    }
}

/// Groups a state's outgoing symbols by target, collapsing a target whose
/// symbol set covers more than half of `[1..=max_symbol]` into a
/// `[^excluded...]` negated-class label (a "character-class
/// negation rendered as `[^…]`").
fn group_labels(edges: &[(i32, u32)], max_symbol: i32) -> Vec<(u32, String)> {
    let mut by_target: HashMap<u32, Vec<i32>> = HashMap::new();
    for &(sym, to) in edges {
        by_target.entry(to).or_default().push(sym);
    }
    let mut out: Vec<(u32, String)> = Vec::with_capacity(by_target.len());
    for (to, mut syms) in by_target {
        syms.sort_unstable();
        let universe = max_symbol.max(1) as usize;
        let non_any_count = syms.iter().filter(|&&s| s != ANY && s != EPSILON).count();
        if universe > 2 && non_any_count * 2 > universe {
            let present: std::collections::HashSet<i32> = syms.iter().copied().collect();
            let excluded: Vec<i32> = (1..=max_symbol).filter(|s| !present.contains(s)).collect();
            let label = format!("[^{}]", excluded.iter().map(|&s| symbol_label(s)).collect::<Vec<_>>().join(""));
            out.push((to, label));
        } else {
            let label = syms.iter().map(|&s| symbol_label(s)).collect::<Vec<_>>().join(",");
            out.push((to, label));
        }
    }
    out.sort_by_key(|(to, _)| *to);
    out
}

pub fn dump_nfa_dot(nfa: &Nfa, name: &str) -> String {
    let mut w = IndentedWriter::new();
    w.writeln(&format!("digraph {name} {{"));
    w.indent();
    w.writeln("rankdir=LR;");
    for state in &nfa.states {
        let shape = if state.final_ { "doublecircle" } else { "circle" };
        w.writeln(&format!("{} [shape={shape}, label=\"{}\"];", state.id, state.id));
        if state.initial {
            w.writeln(&format!("start_{} [shape=point]; start_{} -> {};", state.id, state.id, state.id));
        }
    }
    for state in &nfa.states {
        for (to, label) in group_labels(&state.transitions, nfa.max_symbol()) {
            w.writeln(&format!("{} -> {} [label=\"{}\"];", state.id, to, escape_label(&label)));
        }
    }
    w.dedent();
    w.writeln("}");
    w.into_string()
}

pub fn dump_dfa_dot(dfa: &Dfa, name: &str) -> String {
    let mut w = IndentedWriter::new();
    w.writeln(&format!("digraph {name} {{"));
    w.indent();
    w.writeln("rankdir=LR;");
    for state in &dfa.states {
        let shape = if state.final_ { "doublecircle" } else { "circle" };
        let tag = if state.token_types.is_empty() {
            String::new()
        } else {
            format!("\\n{}", state.token_types.iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join(","))
        };
        w.writeln(&format!("{} [shape={shape}, label=\"{}{}\"];", state.id, state.id, escape_label(&tag)));
    }
    w.writeln(&format!("start_{0} [shape=point]; start_{0} -> {0};", dfa.start));
    for state in &dfa.states {
        let mut edges: Vec<(i32, u32)> = Vec::new();
        for (col, &to) in state.row.iter().enumerate() {
            if to == 0 {
                continue;
            }
            let sym = if col == 0 { ANY } else { col as i32 - 1 };
            edges.push((sym, to));
        }
        for (to, label) in group_labels(&edges, dfa.max_symbol) {
            w.writeln(&format!("{} -> {} [label=\"{}\"];", state.id, to, escape_label(&label)));
        }
    }
    w.dedent();
    w.writeln("}");
    w.into_string()
}

/// Plain-text dump of a `Vocabulary`: token names, per-token option bitset,
/// and the transition matrix.
pub fn dump_vocabulary_text(vocab: &Vocabulary) -> String {
    let mut w = IndentedWriter::new();
    w.writeln(&format!("vocabulary: {} states, {} tokens", vocab.num_states(), vocab.token_names.len()));
    w.indent();
    for (id, name) in vocab.token_names.iter().enumerate() {
        w.writeln(&format!("token {id}: {name} (options=0x{:X})", vocab.token_options.get(id).copied().unwrap_or(0)));
    }
    for (id, accepts) in vocab.accepts.iter().enumerate() {
        if !accepts.is_empty() {
            let names: Vec<&str> = accepts.iter().map(|&t| vocab.token_name(t)).collect();
            w.writeln(&format!("state {id} accepts: {}", names.join(",")));
        }
    }
    w.dedent();
    w.into_string()
}

/// Plain-text dump of a `Syntax` table: start rule, per-rule opcode vector.
pub fn dump_syntax_text(syntax: &Syntax) -> String {
    let mut w = IndentedWriter::new();
    w.writeln(&format!("syntax: start={}, {} rules", syntax.rule_name(syntax.start_rule), syntax.rules_count()));
    w.indent();
    for (id, name) in syntax.rule_names.iter().enumerate() {
        let body = &syntax.rule_bodies[id];
        let opcode = syntax::opcode_name(body[0]);
        let operands: Vec<String> = body[1..].iter().map(|o| o.to_string()).collect();
        let subrule = if syntax.is_subrule(id as u32) { " (anon)" } else { "" };
        w.writeln(&format!("{id} {name}{subrule}: {opcode} {}", operands.join(" ")));
    }
    w.dedent();
    w.into_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automata::{build_nfa, minimize, subset_construction};
    use crate::rule::{self, Grammar};
    use smol_str::SmolStr;

    fn id_grammar() -> Grammar {
        let mut g = Grammar::new();
        g.define("id", rule::one_or_more(rule::range('a', 'z'))).unwrap();
        g
    }

    #[test]
    fn nfa_dot_dump_is_well_formed() {
        let g = id_grammar();
        let nfa = build_nfa(&g, &[SmolStr::new("id")]).unwrap();
        let dot = dump_nfa_dot(&nfa, "test_nfa");
        assert!(dot.starts_with("digraph test_nfa {"));
        assert!(dot.trim_end().ends_with('}'));
    }

    #[test]
    fn dfa_dot_dump_is_stable_across_builds() {
        let g = id_grammar();
        let nfa1 = build_nfa(&g, &[SmolStr::new("id")]).unwrap();
        let dfa1 = minimize(&subset_construction(&nfa1));
        let dot1 = dump_dfa_dot(&dfa1, "id");

        let nfa2 = build_nfa(&g, &[SmolStr::new("id")]).unwrap();
        let dfa2 = minimize(&subset_construction(&nfa2));
        let dot2 = dump_dfa_dot(&dfa2, "id");

        assert_eq!(dot1, dot2, "two builds of the same grammar must produce an identical DOT dump");
    }

    #[test]
    fn negated_class_renders_with_caret() {
        let mut g = Grammar::new();
        g.define("not_digit", rule::not(rule::range('0', '9'))).unwrap();
        let nfa = build_nfa(&g, &[SmolStr::new("not_digit")]).unwrap();
        let dot = dump_nfa_dot(&nfa, "neg");
        assert!(dot.contains("[^"), "a wide negated transition set should collapse to a [^...] label");
    }
}
