//! The DFA-driven lexer: longest match, context-sensitive token options
//! (`Ignore`, `StartLine`, `OnlyIgnored`), row/column tracking.

use crate::error::{Error, ErrorKind, Result};
use crate::input::Input;
use crate::rule::RuleOption;
use crate::vocabulary::Vocabulary;

/// State 0 is always the DFA's dead state; simulation starts at state 1.
const START_STATE: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// start offset into the input, in scalar values.
    pub index: usize,
    pub len: usize,
    pub row: usize,
    pub col: usize,
    pub types: Vec<u32>,
}

impl Token {
    pub fn has_type(&self, token_id: u32) -> bool {
        self.types.contains(&token_id)
    }
}

#[derive(Clone, Copy)]
struct Checkpoint {
    consumed: usize,
    index: usize,
    row: usize,
    col: usize,
    state: u32,
}

pub struct Lexer<'v, I> {
    vocab: &'v Vocabulary,
    input: I,
    buffer: Vec<Token>,
    cursor: usize,
    row: usize,
    col: usize,
    last_row_seen: usize,
    tokens_on_this_line: usize,
    only_ignored_so_far_on_this_line: bool,
    eoi_emitted: bool,
    errors: Vec<Error>,
}

impl<'v, I: Input> Lexer<'v, I> {
    pub fn new(vocab: &'v Vocabulary, input: I) -> Self {
        Self {
            vocab,
            input,
            buffer: Vec::new(),
            cursor: 0,
            row: 1,
            col: 1,
            last_row_seen: 1,
            tokens_on_this_line: 0,
            only_ignored_so_far_on_this_line: true,
            eoi_emitted: false,
            errors: Vec::new(),
        }
    }

    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// Current position in the token-stream (not the character stream).
    pub fn index(&self) -> usize {
        self.cursor
    }

    /// Repositions the token-stream cursor to a previously-emitted index.
    pub fn set_index(&mut self, index: usize) {
        debug_assert!(index <= self.buffer.len());
        self.cursor = index;
    }

    pub fn next_token(&mut self) -> Result<Token> {
        if let Some(tok) = self.buffer.get(self.cursor) {
            let tok = tok.clone();
            self.cursor += 1;
            return Ok(tok);
        }
        let tok = self.scan_one()?;
        self.buffer.push(tok.clone());
        self.cursor += 1;
        Ok(tok)
    }

    /// Whether every type in `tok`'s type-set is `Ignore`-flagged; the parser
    /// uses this to skip whitespace/comment tokens ahead of a terminal match.
    pub fn is_ignored(&self, tok: &Token) -> bool {
        tok.types.iter().all(|&id| self.vocab.token_has_option(id, RuleOption::Ignore))
    }

    /// Whether `token_id` matches starting at token-stream position `at`,
    /// independent of which token the greedy longest-match lexer would
    /// actually emit there. A `Test`/`Not` predicate over a literal that is a
    /// prefix of a longer-matching sibling rule (a keyword that is also a
    /// valid prefix of an identifier, say) would otherwise never see its own
    /// token type, since the buffered token at that position always reports
    /// the longest alternative instead. Read-only: never advances `index()`,
    /// touches the buffer, or updates row/col/line-context state.
    pub fn probe_type(&mut self, at: usize, token_id: u32) -> bool {
        let raw_start = match self.buffer.get(at) {
            Some(tok) => tok.index,
            None => self.input.index(),
        };
        let saved = self.input.index();
        self.input.set_index(raw_start);
        let found = if self.input.eof() {
            token_id == 0
        } else {
            let mut state = START_STATE;
            let mut matched = false;
            loop {
                if self.vocab.is_final(state) && self.vocab.accepts[state as usize].contains(&token_id) {
                    matched = true;
                    break;
                }
                let Some(ch) = self.input.get_char() else { break };
                let next = self.vocab.transition(state, ch as i32);
                if next == 0 {
                    break;
                }
                self.input.skip();
                state = next;
            }
            matched
        };
        self.input.set_index(saved);
        found
    }

    fn advance_rowcol(ch: char, row: &mut usize, col: &mut usize) {
        match ch {
            '\n' => { *row += 1; *col = 1; }
            '\r' => {}
            _ => *col += 1,
        }
    }

    fn scan_one(&mut self) -> Result<Token> {
        if self.input.eof() {
            if self.eoi_emitted {
                let err = Error::at(ErrorKind::UnexpectedEndOfInput, self.row, self.col, self.input.index(), "unexpected end of input");
                self.errors.push(err.clone());
                return Err(err);
            }
            self.eoi_emitted = true;
            self.update_line_context(self.row);
            return Ok(self.finish_token(self.input.index(), self.row, self.col, 0, vec![0]));
        }

        let start_index = self.input.index();
        let start_row = self.row;
        let start_col = self.col;

        let mut state = START_STATE;
        let mut consumed = 0usize;
        let mut row = start_row;
        let mut col = start_col;
        let mut checkpoints: Vec<Checkpoint> = Vec::new();
        let mut first_char: Option<char> = None;

        loop {
            let Some(ch) = self.input.get_char() else { break };
            first_char.get_or_insert(ch);
            let next = self.vocab.transition(state, ch as i32);
            if next == 0 {
                break;
            }
            self.input.skip();
            consumed += 1;
            Self::advance_rowcol(ch, &mut row, &mut col);
            state = next;
            if self.vocab.is_final(state) {
                checkpoints.push(Checkpoint { consumed, index: self.input.index(), row, col, state });
            }
        }

        self.update_line_context(start_row);

        // Try checkpoints from the longest match down to the shortest: a
        // checkpoint whose whole type-set gets filtered away by StartLine/
        // OnlyIgnored context doesn't count as a match, so fall back to the
        // next-longest one that still has a surviving type.
        for cp in checkpoints.iter().rev() {
            let ids = &self.vocab.accepts[cp.state as usize];
            if let Some(filtered) = self.filter_ids(ids) {
                self.input.set_index(cp.index);
                self.row = cp.row;
                self.col = cp.col;
                return Ok(self.finish_token(start_index, start_row, start_col, cp.consumed, filtered));
            }
        }

        // no accepting state reached at all (or every one's types were
        // filtered to nothing): consume the offending character and report
        // it, accumulating the error rather than aborting the whole lex.
        let bad_index = start_index;
        let bad_row = start_row;
        let bad_col = start_col;
        if consumed == 0 {
            if let Some(ch) = first_char {
                self.input.skip();
                Self::advance_rowcol(ch, &mut self.row, &mut self.col);
            }
        } else {
            self.row = row;
            self.col = col;
        }
        let err = Error::at(ErrorKind::InvalidCharacter, bad_row, bad_col, bad_index, "invalid character");
        log::warn!("{err}");
        self.errors.push(err.clone());
        Err(err)
    }

    /// Resets the sticky per-line context flags when a new token starts on a
    /// row we haven't seen a token begin on yet.
    fn update_line_context(&mut self, start_row: usize) {
        if start_row != self.last_row_seen {
            self.tokens_on_this_line = 0;
            self.only_ignored_so_far_on_this_line = true;
            self.last_row_seen = start_row;
        }
    }

    /// Applies `StartLine`/`OnlyIgnored` filtering; `None` means every type
    /// this state accepts was filtered out by the current line context.
    fn filter_ids(&self, ids: &[u32]) -> Option<Vec<u32>> {
        let filtered: Vec<u32> = ids
            .iter()
            .copied()
            .filter(|&id| {
                if self.vocab.token_has_option(id, RuleOption::StartLine) && self.tokens_on_this_line != 0 {
                    return false;
                }
                if self.vocab.token_has_option(id, RuleOption::OnlyIgnored) && !self.only_ignored_so_far_on_this_line {
                    return false;
                }
                true
            })
            .collect();
        if filtered.is_empty() {
            None
        } else {
            Some(filtered)
        }
    }

    /// Updates the sticky context flags for the chosen token and builds it.
    fn finish_token(&mut self, start_index: usize, start_row: usize, start_col: usize, len: usize, filtered: Vec<u32>) -> Token {
        let all_ignore = filtered.iter().all(|&id| self.vocab.token_has_option(id, RuleOption::Ignore));
        if !all_ignore {
            self.tokens_on_this_line += 1;
            self.only_ignored_so_far_on_this_line = false;
        }
        log::debug!(
            "token at {start_row}:{start_col} len={len} types={:?}",
            filtered.iter().map(|&id| self.vocab.token_name(id)).collect::<Vec<_>>()
        );
        Token { index: start_index, len, row: start_row, col: start_col, types: filtered }
    }
}
