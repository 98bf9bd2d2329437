//! A parser-generator toolkit: a PEG-style rule algebra compiles, at runtime,
//! to a DFA-driven lexer and a backtracking recursive-descent parser that
//! emits an AST suitable for downstream visitors.
//!
//! The pipeline a caller drives is: build a [`rule::Grammar`] with the
//! builder functions in [`rule`], [`rule::finalize`] it against a start
//! rule, run [`automata::build_nfa`] / [`automata::subset_construction`] /
//! [`automata::minimize`] over the lexer-classified rules, pack the result
//! into a [`vocabulary::Vocabulary`] with [`vocabulary::assemble`], flatten
//! the parser-classified rules into a [`syntax::Syntax`] table with
//! [`syntax::build`], then drive a [`lexer::Lexer`] and [`parser::Parser`]
//! over some [`input::Input`] to get an [`ast::Ast`].

pub mod ast;
pub mod automata;
pub mod demo_grammars;
pub mod dot;
pub mod error;
pub mod input;
pub mod lexer;
pub mod orderedset;
pub mod parser;
pub mod rule;
pub mod syntax;
pub mod textwriter;
pub mod vocabulary;

pub use error::{Error, ErrorKind, Result};

/// The artifacts a caller needs to drive a [`lexer::Lexer`] and
/// [`parser::Parser`]: the packed DFA and the flattened parser table.
pub struct Compiled {
    pub vocabulary: vocabulary::Vocabulary,
    pub syntax: syntax::Syntax,
}

/// Runs the full pipeline: finalize the grammar, build and minimize
/// the lexer's automaton, pack it into a `Vocabulary`, then flatten the
/// parser-classified rules into a `Syntax` table against `start_rule`.
pub fn compile(grammar: &rule::Grammar, start_rule: &str) -> Result<Compiled> {
    let finalized = rule::finalize(grammar, start_rule)?;
    let nfa = automata::build_nfa(&finalized.lexer_grammar, &finalized.lexer_names)?;
    let dfa = automata::minimize(&automata::subset_construction(&nfa));
    let vocabulary = vocabulary::assemble(&dfa, &finalized.lexer_grammar);
    let syntax = syntax::build(&finalized, &vocabulary, start_rule)?;
    log::info!("compiled grammar: {} lexer states, {} parser rules", vocabulary.num_states(), syntax.rules_count());
    Ok(Compiled { vocabulary, syntax })
}
