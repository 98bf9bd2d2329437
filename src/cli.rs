//! Thin demo binary: exercises the builder API, the compiled vocabulary/
//! syntax, and the DOT/plain-text dumpers end to end. Hand-builds its demo
//! grammars via [`pegloom::demo_grammars`] — no `.gp` ingestion — and is not
//! part of the conformance surface.

use argh::FromArgs;

use pegloom::ast::NodeRef;
use pegloom::demo_grammars;
use pegloom::dot;
use pegloom::input::StringInput;
use pegloom::lexer::Lexer;
use pegloom::parser::Parser;

#[derive(FromArgs)]
/// A parser-generator toolkit: builds a DFA lexer and a backtracking PEG
/// parser from a rule graph and runs them against an input string.
struct Args {
    #[argh(subcommand)]
    subcommand: Subcommand,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Subcommand {
    Dot(Dot),
    Tokenize(Tokenize),
    Parse(Parse),
}

#[derive(FromArgs)]
/// dump a built-in demo grammar's minimized DFA as a DOT graph
#[argh(subcommand, name = "dot")]
struct Dot {
    /// which demo grammar to compile (one of: id, keyword, call, predicate)
    #[argh(positional)]
    grammar: String,
}

impl Dot {
    fn run(self) {
        let Some((grammar, start)) = demo_grammars::by_name(&self.grammar) else {
            eprintln!("unknown demo grammar '{}'; try one of: {}", self.grammar, demo_grammars::DEMO_NAMES.join(", "));
            std::process::exit(1);
        };
        let finalized = pegloom::rule::finalize(&grammar, start).unwrap_or_else(|e| {
            eprintln!("{e}");
            std::process::exit(1);
        });
        let nfa = pegloom::automata::build_nfa(&finalized.lexer_grammar, &finalized.lexer_names).unwrap();
        let dfa = pegloom::automata::minimize(&pegloom::automata::subset_construction(&nfa));
        println!("{}", dot::dump_dfa_dot(&dfa, &self.grammar));
    }
}

#[derive(FromArgs)]
/// tokenize a string against a built-in demo grammar's vocabulary
#[argh(subcommand, name = "tokenize")]
struct Tokenize {
    /// which demo grammar to compile
    #[argh(positional)]
    grammar: String,
    /// the string to tokenize
    #[argh(positional)]
    text: String,
}

impl Tokenize {
    fn run(self) {
        let Some((grammar, start)) = demo_grammars::by_name(&self.grammar) else {
            eprintln!("unknown demo grammar '{}'; try one of: {}", self.grammar, demo_grammars::DEMO_NAMES.join(", "));
            std::process::exit(1);
        };
        let compiled = pegloom::compile(&grammar, start).unwrap_or_else(|e| {
            eprintln!("{e}");
            std::process::exit(1);
        });
        println!("{}", dot::dump_vocabulary_text(&compiled.vocabulary));
        let mut lexer = Lexer::new(&compiled.vocabulary, StringInput::new(&self.text));
        loop {
            match lexer.next_token() {
                Ok(tok) => {
                    let names: Vec<&str> = tok.types.iter().map(|&id| compiled.vocabulary.token_name(id)).collect();
                    let is_eoi = tok.types.first().map(|&id| compiled.vocabulary.token_name(id) == "EOI").unwrap_or(false);
                    println!("{}:{} len={} {}", tok.row, tok.col, tok.len, names.join(","));
                    if is_eoi {
                        break;
                    }
                }
                Err(e) => {
                    println!("{e}");
                }
            }
        }
    }
}

#[derive(FromArgs)]
/// parse a string against a built-in demo grammar's syntax and print the AST
#[argh(subcommand, name = "parse")]
struct Parse {
    /// which demo grammar to compile
    #[argh(positional)]
    grammar: String,
    /// the string to parse
    #[argh(positional)]
    text: String,
}

impl Parse {
    fn run(self) {
        let Some((grammar, start)) = demo_grammars::by_name(&self.grammar) else {
            eprintln!("unknown demo grammar '{}'; try one of: {}", self.grammar, demo_grammars::DEMO_NAMES.join(", "));
            std::process::exit(1);
        };
        let compiled = pegloom::compile(&grammar, start).unwrap_or_else(|e| {
            eprintln!("{e}");
            std::process::exit(1);
        });
        println!("{}", dot::dump_syntax_text(&compiled.syntax));
        let lexer = Lexer::new(&compiled.vocabulary, StringInput::new(&self.text));
        let mut parser = Parser::new(lexer, &compiled.syntax).unwrap_or_else(|e| {
            eprintln!("{e}");
            std::process::exit(1);
        });
        match parser.execute() {
            Some(ast) => {
                if let Some(root) = ast.root() {
                    print_node(root, &compiled.syntax, 0);
                }
            }
            None => {
                for e in parser.errors() {
                    eprintln!("{e}");
                }
                std::process::exit(1);
            }
        }
    }
}

fn print_node(node: NodeRef, syntax: &pegloom::syntax::Syntax, depth: usize) {
    println!("{}{} [{}..{}]", "  ".repeat(depth), syntax.rule_name(node.rule_type() as u32), node.start_token(), node.end_token());
    for child in node.children() {
        print_node(child, syntax, depth + 1);
    }
}

fn main() {
    env_logger::init();
    let args: Args = argh::from_env();
    match args.subcommand {
        Subcommand::Dot(cmd) => cmd.run(),
        Subcommand::Tokenize(cmd) => cmd.run(),
        Subcommand::Parse(cmd) => cmd.run(),
    }
}
