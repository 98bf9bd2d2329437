//! Hand-built demo grammars for the CLI and for tests, in the spirit of the
//! teacher's `builtin_grammars.rs` "smoke test" catalogue. None of these
//! read a `.gp` grammar file — they call the builder API directly, exactly
//! as a textual front end would on the caller's behalf.

use crate::rule::{self, Grammar, RuleBuilder, RuleOption};

/// `id: [A-Za-z_][A-Za-z0-9_]*` — the identifier-lexer scenario.
pub fn identifier_grammar() -> (Grammar, &'static str) {
    let mut g = Grammar::new();
    g.add(
        RuleBuilder::new("id")
            .option(RuleOption::Main)
            .unwrap()
            .body(rule::and(vec![
                rule::or(vec![rule::range('a', 'z'), rule::range('A', 'Z'), rule::char('_')]),
                rule::zero_or_more(rule::or(vec![
                    rule::range('a', 'z'),
                    rule::range('A', 'Z'),
                    rule::range('0', '9'),
                    rule::char('_'),
                ])),
            ]))
            .finish()
            .unwrap(),
    )
    .unwrap();
    (g, "id")
}

/// `if_kw: "if"`, `id: [A-Za-z]+` — the longest-match keyword-vs-identifier
/// scenario. Both rules are tagged `Token` so the lexer can
/// tokenize against either without a parser wrapping them.
pub fn keyword_vs_identifier_grammar() -> (Grammar, &'static str) {
    let mut g = Grammar::new();
    g.add(RuleBuilder::new("if_kw").option(RuleOption::Token).unwrap().body(rule::string("if")).finish().unwrap()).unwrap();
    g.add(RuleBuilder::new("id").option(RuleOption::Main).unwrap().body(rule::one_or_more(rule::range('a', 'z'))).finish().unwrap()).unwrap();
    (g, "id")
}

/// `call: id "(" id ")"`, memoized, with `ws` ignored — the ignore +
/// memoization scenario.
pub fn function_call_grammar() -> (Grammar, &'static str) {
    let mut g = Grammar::new();
    g.add(
        RuleBuilder::new("ws")
            .option(RuleOption::Ignore)
            .unwrap()
            .body(rule::one_or_more(rule::or(vec![rule::char(' '), rule::char('\t'), rule::char('\n')])))
            .finish()
            .unwrap(),
    )
    .unwrap();
    g.define("id", rule::one_or_more(rule::or(vec![rule::range('a', 'z'), rule::range('A', 'Z'), rule::range('0', '9')]))).unwrap();
    g.add(
        RuleBuilder::new("call")
            .option(RuleOption::Main)
            .unwrap()
            .option(RuleOption::Memoize)
            .unwrap()
            .body(rule::and(vec![
                rule::non_terminal("id"),
                rule::char('('),
                rule::non_terminal("id"),
                rule::char(')'),
            ]))
            .finish()
            .unwrap(),
    )
    .unwrap();
    (g, "call")
}

/// `S: &"foo" id` — the syntactic-predicate scenario.
pub fn predicate_grammar() -> (Grammar, &'static str) {
    let mut g = Grammar::new();
    g.define("id", rule::one_or_more(rule::range('a', 'z'))).unwrap();
    g.add(
        RuleBuilder::new("s")
            .option(RuleOption::Main)
            .unwrap()
            .body(rule::and(vec![rule::test(rule::string("foo")), rule::non_terminal("id")]))
            .finish()
            .unwrap(),
    )
    .unwrap();
    (g, "s")
}

/// Every demo grammar by name, for CLI subcommand dispatch.
pub fn by_name(name: &str) -> Option<(Grammar, &'static str)> {
    Some(match name {
        "id" => identifier_grammar(),
        "keyword" => keyword_vs_identifier_grammar(),
        "call" => function_call_grammar(),
        "predicate" => predicate_grammar(),
        _ => return None,
    })
}

pub const DEMO_NAMES: &[&str] = &["id", "keyword", "call", "predicate"];
