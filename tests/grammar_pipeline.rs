use indoc::indoc;
use pegloom::error::ErrorKind;
use pegloom::input::StringInput;
use pegloom::lexer::Lexer;
use pegloom::parser::Parser;
use pegloom::rule::{self, Grammar, RuleBuilder, RuleOption};
use pegloom::{compile, demo_grammars};

fn token_names(compiled: &pegloom::Compiled, text: &str) -> Vec<String> {
    let mut lexer = Lexer::new(&compiled.vocabulary, StringInput::new(text));
    let mut names = Vec::new();
    loop {
        let tok = lexer.next_token().unwrap();
        let is_eoi = compiled.vocabulary.token_name(tok.types[0]) == "EOI";
        names.push(tok.types.iter().map(|&id| compiled.vocabulary.token_name(id).to_string()).collect::<Vec<_>>().join("+"));
        if is_eoi {
            break;
        }
    }
    names
}

#[test]
fn identifier_lexer_scenario() {
    let (g, start) = demo_grammars::identifier_grammar();
    let compiled = compile(&g, start).unwrap();

    let mut lexer = Lexer::new(&compiled.vocabulary, StringInput::new("hello_42"));
    let tok = lexer.next_token().unwrap();
    assert_eq!(tok.row, 1);
    assert_eq!(tok.col, 1);
    assert_eq!(tok.len, 8);
    assert_eq!(compiled.vocabulary.token_name(tok.types[0]), "id");
    let eoi = lexer.next_token().unwrap();
    assert_eq!(compiled.vocabulary.token_name(eoi.types[0]), "EOI");

    let mut empty = Lexer::new(&compiled.vocabulary, StringInput::new(""));
    let tok = empty.next_token().unwrap();
    assert_eq!(compiled.vocabulary.token_name(tok.types[0]), "EOI");
}

#[test]
fn longest_match_keyword_vs_identifier() {
    let (g, start) = demo_grammars::keyword_vs_identifier_grammar();
    let compiled = compile(&g, start).unwrap();
    let names = token_names(&compiled, "iffy");
    assert_eq!(names[0], "id", "the DFA's longest-match path must diverge past 'if' into the identifier");
}

#[test]
fn case_insensitive_literal_scenario() {
    let mut g = Grammar::new();
    g.add(RuleBuilder::new("func").option(RuleOption::Main).unwrap().body(rule::string_ci("function")).finish().unwrap()).unwrap();
    let compiled = compile(&g, "func").unwrap();
    let mut lexer = Lexer::new(&compiled.vocabulary, StringInput::new("FuNcTiOn"));
    let tok = lexer.next_token().unwrap();
    assert_eq!(compiled.vocabulary.token_name(tok.types[0]), "func");
    assert_eq!(tok.len, 8);
}

#[test]
fn peg_ordered_choice_scenario() {
    let mut g = Grammar::new();
    g.add(
        RuleBuilder::new("expr")
            .option(RuleOption::Main)
            .unwrap()
            .body(rule::or(vec![rule::string("ab"), rule::string("a")]))
            .finish()
            .unwrap(),
    )
    .unwrap();
    let compiled = compile(&g, "expr").unwrap();

    let lexer = Lexer::new(&compiled.vocabulary, StringInput::new("ab"));
    let mut parser = Parser::new(lexer, &compiled.syntax).unwrap();
    let ast = parser.execute().unwrap();
    assert!(ast.root().is_some());
    assert_eq!(parser.lexer().index(), 1, "the 'ab' literal consumes as one token");

    let lexer2 = Lexer::new(&compiled.vocabulary, StringInput::new("ac"));
    let mut parser2 = Parser::new(lexer2, &compiled.syntax).unwrap();
    let ast2 = parser2.execute().unwrap();
    assert!(ast2.root().is_some(), "second alternative 'a' must match, leaving 'c' unconsumed");
    assert_eq!(parser2.lexer().index(), 1);
}

#[test]
fn predicate_scenario() {
    let (g, start) = demo_grammars::predicate_grammar();
    let compiled = compile(&g, start).unwrap();
    let lexer = Lexer::new(&compiled.vocabulary, StringInput::new("foobar"));
    let mut parser = Parser::new(lexer, &compiled.syntax).unwrap();
    let ast = parser.execute().unwrap();
    let root = ast.root().unwrap();
    assert!(root.find(&compiled.syntax, "id").is_some());
    assert_eq!(root.start_token(), 0);
    assert_eq!(root.end_token(), root.first_child().unwrap().end_token());
}

#[test]
fn ignore_and_memoization_scenario() {
    let (g, start) = demo_grammars::function_call_grammar();
    let compiled = compile(&g, start).unwrap();

    let run = || {
        let lexer = Lexer::new(&compiled.vocabulary, StringInput::new("foo ( bar )"));
        let mut parser = Parser::new(lexer, &compiled.syntax).unwrap();
        let ast = parser.execute().unwrap();
        let root = ast.root().unwrap();
        assert_eq!(root.list(&compiled.syntax, "id").len(), 2);
        assert!(root.list(&compiled.syntax, "ws").is_empty());
        root.list(&compiled.syntax, "id").iter().map(|n| (n.start_token(), n.end_token())).collect::<Vec<_>>()
    };
    let first = run();
    let second = run();
    assert_eq!(first, second, "re-parsing must reproduce a structurally equal AST");
}

#[test]
fn fragment_rules_never_surface_as_tokens() {
    let mut g = Grammar::new();
    g.add(RuleBuilder::new("digit").option(RuleOption::Fragment).unwrap().body(rule::range('0', '9')).finish().unwrap()).unwrap();
    g.add(RuleBuilder::new("number").option(RuleOption::Main).unwrap().body(rule::one_or_more(rule::non_terminal("digit"))).finish().unwrap())
        .unwrap();
    let compiled = compile(&g, "number").unwrap();
    assert!(!compiled.vocabulary.token_names.iter().any(|n| n == "digit"));
    let names = token_names(&compiled, "42");
    assert_eq!(names[0], "number");
}

#[test]
fn duplicate_rule_name_is_an_error() {
    let mut g = Grammar::new();
    g.define("a", rule::char('x')).unwrap();
    let err = g.define("a", rule::char('y')).unwrap_err();
    assert_eq!(err.kind, ErrorKind::DuplicateRule);
}

#[test]
fn undefined_rule_reference_is_an_error() {
    let mut g = Grammar::new();
    g.define("a", rule::non_terminal("nope")).unwrap();
    let err = pegloom::rule::finalize(&g, "a").unwrap_err();
    assert_eq!(err.kind, ErrorKind::UndefinedRule);
}

#[test]
fn lexer_rule_referencing_parser_rule_is_an_error() {
    // `Token` forces a rule into the lexer classification regardless of its
    // body; tagging one whose body refers to a `Main`-tagged parser rule is
    // the only way to reach `check_no_parser_refs`'s error path, since the
    // ordinary fixed-point classifier would otherwise propagate "parser" up
    // through any such reference on its own.
    let mut g = Grammar::new();
    g.add(RuleBuilder::new("top").option(RuleOption::Main).unwrap().body(rule::char('x')).finish().unwrap()).unwrap();
    g.add(RuleBuilder::new("bad_lexer").option(RuleOption::Token).unwrap().body(rule::non_terminal("top")).finish().unwrap()).unwrap();
    let err = compile(&g, "top").unwrap_err();
    assert_eq!(err.kind, ErrorKind::LexerReferencesParser);
}

#[test]
fn minimization_collapses_equivalent_states_and_dot_dump_is_stable() {
    let mut g = Grammar::new();
    g.add(RuleBuilder::new("kw").option(RuleOption::Main).unwrap().body(rule::or(vec![rule::string("cat"), rule::string("car")])).finish().unwrap())
        .unwrap();
    let finalized = pegloom::rule::finalize(&g, "kw").unwrap();
    let nfa1 = pegloom::automata::build_nfa(&finalized.lexer_grammar, &finalized.lexer_names).unwrap();
    let dfa1 = pegloom::automata::minimize(&pegloom::automata::subset_construction(&nfa1));
    let dot1 = pegloom::dot::dump_dfa_dot(&dfa1, "kw");

    let nfa2 = pegloom::automata::build_nfa(&finalized.lexer_grammar, &finalized.lexer_names).unwrap();
    let dfa2 = pegloom::automata::minimize(&pegloom::automata::subset_construction(&nfa2));
    let dot2 = pegloom::dot::dump_dfa_dot(&dfa2, "kw");

    assert_eq!(dot1, dot2);
    let minimized_twice = pegloom::automata::minimize(&dfa1);
    assert_eq!(minimized_twice.states.len(), dfa1.states.len(), "minimize(minimize(D)) must equal minimize(D)");
}

#[test]
fn ignore_rule_spans_embedded_newlines() {
    let (g, start) = demo_grammars::function_call_grammar();
    let compiled = compile(&g, start).unwrap();
    let input = indoc! {"
        foo (
            bar
        )
    "};
    let lexer = Lexer::new(&compiled.vocabulary, StringInput::new(input));
    let mut parser = Parser::new(lexer, &compiled.syntax).unwrap();
    let ast = parser.execute().unwrap();
    let root = ast.root().unwrap();
    assert_eq!(root.list(&compiled.syntax, "id").len(), 2);
}

#[test]
fn every_demo_grammar_compiles() {
    for name in demo_grammars::DEMO_NAMES {
        let (g, start) = demo_grammars::by_name(name).unwrap();
        compile(&g, start).unwrap_or_else(|e| panic!("demo grammar '{name}' failed to compile: {e}"));
    }
}
