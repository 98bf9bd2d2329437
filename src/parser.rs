//! The backtracking PEG interpreter: walks a `Syntax` table against a
//! `Lexer`, threading matched named rules onto the AST's frontier.

use crate::ast::{Ast, NodeId};
use crate::error::{Error, ErrorKind, Result};
use crate::input::Input;
use crate::lexer::Lexer;
use crate::rule::RuleOption;
use crate::syntax::{self, Syntax};

#[derive(Debug, Clone, Copy)]
struct MemoEntry {
    start: usize,
    /// `None` records a cached failure at `start`; `Some(end)` a cached
    /// success ending at lexer token-index `end`.
    end: Option<usize>,
}

/// Interprets one `Syntax` table against one `Lexer`. Single-threaded,
/// mutable, owns its cursor: never share an instance across threads.
pub struct Parser<'v, 's, I> {
    lexer: Lexer<'v, I>,
    syntax: &'s Syntax,
    ast: Ast,
    frontier: NodeId,
    /// one start-guarded single-slot memo per rule-id, active only for
    /// rules carrying the `Memoize` option.
    memo: Vec<Option<MemoEntry>>,
    ignore: bool,
    /// set while evaluating a `Test`/`Not` child: routes `TERMINAL` through
    /// `Lexer::probe_type` instead of the buffered longest-match token, since
    /// a predicate asks "does this match here", not "is this the token the
    /// greedy lexer would pick here".
    predicate: bool,
    errors: Vec<Error>,
}

impl<'v, 's, I: Input> Parser<'v, 's, I> {
    pub fn new(lexer: Lexer<'v, I>, syntax: &'s Syntax) -> Result<Self> {
        if syntax.start_rule as usize >= syntax.rules_count() {
            return Err(Error::new(ErrorKind::UndefinedRule, "start rule is out of range"));
        }
        let rules_count = syntax.rules_count();
        Ok(Self {
            lexer,
            syntax,
            ast: Ast::new(),
            frontier: Ast::frontier_root(),
            memo: vec![None; rules_count],
            ignore: false,
            predicate: false,
            errors: Vec::new(),
        })
    }

    pub fn syntax(&self) -> &'s Syntax {
        self.syntax
    }

    pub fn lexer(&self) -> &Lexer<'v, I> {
        &self.lexer
    }

    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// Runs the start rule. Returns the completed `Ast` on success; on
    /// failure, a caller still has `errors()` to inspect.
    pub fn execute(&mut self) -> Option<Ast> {
        log::info!("parse starting at rule '{}'", self.syntax.rule_name(self.syntax.start_rule));
        let matched = self.parse_rule(self.syntax.start_rule);
        if !matched {
            log::info!("parse failed; {} error(s) accumulated", self.errors.len());
            return None;
        }
        let mut ast = std::mem::replace(&mut self.ast, Ast::new());
        ast.set_root(self.frontier);
        self.frontier = Ast::frontier_root();
        log::info!("parse succeeded, consumed {} tokens", self.lexer.index());
        Some(ast)
    }

    fn parse_rule(&mut self, rule_id: u32) -> bool {
        let previous_ignore = self.ignore;
        if self.syntax.has_option(rule_id, RuleOption::Ignore) {
            self.ignore = true;
        }
        // the frontier this rule's own node (if any) must attach to is the one
        // in effect *before* any child parsing moves it; capturing it after
        // dispatch would anchor onto the last child instead of this rule's
        // siblings, leaving `first_child` empty.
        let saved = self.frontier;
        let start = self.lexer.index();
        let memoize = self.syntax.has_option(rule_id, RuleOption::Memoize);

        if memoize {
            if let Some(mem) = self.memo[rule_id as usize] {
                if mem.start == start {
                    let matched = match mem.end {
                        Some(end) => {
                            self.lexer.set_index(end);
                            true
                        }
                        None => false,
                    };
                    self.ignore = previous_ignore;
                    return matched;
                }
            }
        }

        let syntax = self.syntax;
        let body = &syntax.rule_bodies[rule_id as usize];
        let opcode = body[0];
        let operands = &body[1..];
        log::trace!("parse_rule {} ({}) at token {}", syntax.rule_name(rule_id), syntax::opcode_name(opcode), start);
        let matched = match opcode {
            syntax::AND => self.parse_and(operands),
            syntax::OR => self.parse_or(operands),
            syntax::ONE_OR_MORE => self.parse_one_or_more(operands[0] as u32),
            syntax::ZERO_OR_MORE => self.parse_zero_or_more(operands[0] as u32),
            syntax::OPTIONAL => self.parse_optional(operands[0] as u32),
            syntax::TEST_NOT => self.parse_test_not(operands[0] as u32),
            syntax::TEST => self.parse_test(operands[0] as u32),
            syntax::NON_TERMINAL => self.parse_non_terminal(operands[0] as u32),
            syntax::TERMINAL => self.parse_terminal(operands[0] as u32),
            _ => unreachable!("Syntax tables only ever contain the nine opcodes"),
        };

        if matched && !self.ignore && !self.syntax.is_subrule(rule_id) && !self.syntax.has_option(rule_id, RuleOption::SkipNode) {
            self.create_node(rule_id, saved, start, memoize);
        } else if memoize {
            self.memo[rule_id as usize] = Some(MemoEntry { start, end: None });
        }
        self.ignore = previous_ignore;
        matched
    }

    fn create_node(&mut self, rule_id: u32, saved: NodeId, start: usize, memoize: bool) {
        let end_token = self.lexer.index().saturating_sub(1);
        self.frontier = self.ast.create_node(saved, rule_id, start, end_token);
        if memoize {
            self.memo[rule_id as usize] = Some(MemoEntry { start, end: Some(self.lexer.index()) });
        }
    }

    fn parse_and(&mut self, operands: &[i32]) -> bool {
        let start = self.lexer.index();
        for &sub in operands {
            if !self.parse_rule(sub as u32) {
                self.lexer.set_index(start);
                return false;
            }
        }
        true
    }

    fn parse_or(&mut self, operands: &[i32]) -> bool {
        let start = self.lexer.index();
        for &sub in operands {
            if self.parse_rule(sub as u32) {
                return true;
            }
            self.lexer.set_index(start);
        }
        false
    }

    fn parse_one_or_more(&mut self, child: u32) -> bool {
        let start = self.lexer.index();
        if !self.parse_rule(child) {
            self.lexer.set_index(start);
            return false;
        }
        let mut last_good = self.lexer.index();
        while self.parse_rule(child) {
            last_good = self.lexer.index();
        }
        self.lexer.set_index(last_good);
        true
    }

    fn parse_zero_or_more(&mut self, child: u32) -> bool {
        let mut last_good = self.lexer.index();
        while self.parse_rule(child) {
            last_good = self.lexer.index();
        }
        self.lexer.set_index(last_good);
        true
    }

    fn parse_optional(&mut self, child: u32) -> bool {
        let start = self.lexer.index();
        if !self.parse_rule(child) {
            self.lexer.set_index(start);
        }
        true
    }

    fn parse_test(&mut self, child: u32) -> bool {
        let start = self.lexer.index();
        let previous_predicate = self.predicate;
        self.predicate = true;
        let matched = self.parse_rule(child);
        self.predicate = previous_predicate;
        self.lexer.set_index(start);
        matched
    }

    fn parse_test_not(&mut self, child: u32) -> bool {
        let start = self.lexer.index();
        let previous_predicate = self.predicate;
        self.predicate = true;
        let matched = self.parse_rule(child);
        self.predicate = previous_predicate;
        self.lexer.set_index(start);
        !matched
    }

    fn parse_non_terminal(&mut self, child: u32) -> bool {
        let start = self.lexer.index();
        if self.parse_rule(child) {
            return true;
        }
        self.lexer.set_index(start);
        false
    }

    fn parse_terminal(&mut self, token_id: u32) -> bool {
        let start = self.lexer.index();
        loop {
            match self.lexer.next_token() {
                Ok(tok) => {
                    if self.lexer.is_ignored(&tok) {
                        continue;
                    }
                    let matched = if self.predicate {
                        // the buffered token here reports whatever the greedy
                        // longest-match lexer would actually emit, which can
                        // shadow `token_id` if some other rule matches more
                        // input from the same position; probe independently.
                        self.lexer.probe_type(self.lexer.index() - 1, token_id)
                    } else {
                        tok.has_type(token_id)
                    };
                    if matched {
                        return true;
                    }
                    self.lexer.set_index(start);
                    return false;
                }
                Err(e) => {
                    self.errors.push(e);
                    self.lexer.set_index(start);
                    return false;
                }
            }
        }
    }
}
