//! The AST the parser builds: a sibling/first-child linked tree stored as a
//! flat `Vec<Node>` indexed by integer id, in the same "no back-pointers"
//! idiom already used for the NFA/DFA.
//!
//! Node 0 is always a sentinel root (`rule_type == -1`) that anchors the
//! "frontier" the parser threads new nodes onto; it never surfaces to callers.

use crate::syntax::Syntax;

pub type NodeId = u32;

pub(crate) const FRONTIER_ROOT: NodeId = 0;

#[derive(Debug, Clone)]
pub struct Node {
    pub rule_type: i32,
    pub start_token: usize,
    pub end_token: usize,
    sibling: Option<NodeId>,
    first_child: Option<NodeId>,
}

/// Owns every node created during one `Parser::execute()` run.
#[derive(Debug, Clone)]
pub struct Ast {
    nodes: Vec<Node>,
    root: Option<NodeId>,
}

impl Default for Ast {
    fn default() -> Self {
        Self::new()
    }
}

impl Ast {
    pub fn new() -> Self {
        Self { nodes: vec![Node { rule_type: -1, start_token: 0, end_token: 0, sibling: None, first_child: None }], root: None }
    }

    pub(crate) fn frontier_root() -> NodeId {
        FRONTIER_ROOT
    }

    /// Threads a new node onto `frontier`: the new node adopts whatever was
    /// already `frontier`'s sibling as its own `first_child`, and becomes
    /// `frontier`'s sibling in turn (the "frontier" trick).
    pub(crate) fn create_node(&mut self, frontier: NodeId, rule_type: u32, start_token: usize, end_token: usize) -> NodeId {
        let first_child = self.nodes[frontier as usize].sibling;
        let id = self.nodes.len() as NodeId;
        self.nodes.push(Node { rule_type: rule_type as i32, start_token, end_token, sibling: None, first_child });
        self.nodes[frontier as usize].sibling = Some(id);
        id
    }

    pub(crate) fn set_root(&mut self, root: NodeId) {
        self.root = Some(root);
    }

    pub fn root(&self) -> Option<NodeRef<'_>> {
        self.root.map(|id| NodeRef { ast: self, id })
    }

    pub fn get(&self, id: NodeId) -> NodeRef<'_> {
        NodeRef { ast: self, id }
    }
}

/// A borrowed handle to one node.
#[derive(Clone, Copy)]
pub struct NodeRef<'a> {
    ast: &'a Ast,
    id: NodeId,
}

impl<'a> NodeRef<'a> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn rule_type(&self) -> i32 {
        self.ast.nodes[self.id as usize].rule_type
    }

    pub fn start_token(&self) -> usize {
        self.ast.nodes[self.id as usize].start_token
    }

    pub fn end_token(&self) -> usize {
        self.ast.nodes[self.id as usize].end_token
    }

    pub fn first_child(&self) -> Option<NodeRef<'a>> {
        self.ast.nodes[self.id as usize].first_child.map(|id| NodeRef { ast: self.ast, id })
    }

    pub fn sibling(&self) -> Option<NodeRef<'a>> {
        self.ast.nodes[self.id as usize].sibling.map(|id| NodeRef { ast: self.ast, id })
    }

    /// Direct children, left to right.
    pub fn children(&self) -> Children<'a> {
        Children { next: self.first_child() }
    }

    fn find_segments(&self, syntax: &Syntax, segments: &[&str]) -> Option<NodeRef<'a>> {
        let Some((head, rest)) = segments.split_first() else { return None };
        let mut child = self.first_child();
        while let Some(c) = child {
            if syntax.rule_name(c.rule_type() as u32).eq_ignore_ascii_case(head) {
                return if rest.is_empty() { Some(c) } else { c.find_segments(syntax, rest) };
            }
            child = c.sibling();
        }
        None
    }

    /// Left-to-right child lookup by rule-name, case-insensitive, one path
    /// segment per tree level.
    pub fn find(&self, syntax: &Syntax, path: &str) -> Option<NodeRef<'a>> {
        let segments: Vec<&str> = path.split('/').collect();
        self.find_segments(syntax, &segments)
    }

    /// Every direct child of the penultimate path node matching the final
    /// segment's rule name.
    pub fn list(&self, syntax: &Syntax, path: &str) -> Vec<NodeRef<'a>> {
        let segments: Vec<&str> = path.split('/').collect();
        let Some((last, init)) = segments.split_last() else { return Vec::new() };
        let start = if init.is_empty() { Some(*self) } else { self.find_segments(syntax, init) };
        let Some(start) = start else { return Vec::new() };
        start.children().filter(|c| syntax.rule_name(c.rule_type() as u32).eq_ignore_ascii_case(last)).collect()
    }
}

pub struct Children<'a> {
    next: Option<NodeRef<'a>>,
}

impl<'a> Iterator for Children<'a> {
    type Item = NodeRef<'a>;
    fn next(&mut self) -> Option<Self::Item> {
        let cur = self.next?;
        self.next = cur.sibling();
        Some(cur)
    }
}

type Callback<'cb> = Box<dyn FnMut(NodeRef) + 'cb>;

/// Pre-order AST walker with per-rule enter/exit callbacks, registered by
/// rule id or by rule name.
#[derive(Default)]
pub struct Walker<'cb> {
    enter: std::collections::HashMap<i32, Callback<'cb>>,
    exit: std::collections::HashMap<i32, Callback<'cb>>,
}

impl<'cb> Walker<'cb> {
    pub fn new() -> Self {
        Self { enter: std::collections::HashMap::new(), exit: std::collections::HashMap::new() }
    }

    pub fn on_enter(&mut self, rule_id: u32, callback: impl FnMut(NodeRef) + 'cb) {
        self.enter.insert(rule_id as i32, Box::new(callback));
    }

    pub fn on_exit(&mut self, rule_id: u32, callback: impl FnMut(NodeRef) + 'cb) {
        self.exit.insert(rule_id as i32, Box::new(callback));
    }

    pub fn on_enter_name(&mut self, syntax: &Syntax, name: &str, callback: impl FnMut(NodeRef) + 'cb) -> Option<()> {
        let id = syntax.rule_id(name)?;
        self.on_enter(id, callback);
        Some(())
    }

    pub fn on_exit_name(&mut self, syntax: &Syntax, name: &str, callback: impl FnMut(NodeRef) + 'cb) -> Option<()> {
        let id = syntax.rule_id(name)?;
        self.on_exit(id, callback);
        Some(())
    }

    pub fn walk(&mut self, node: NodeRef) {
        let rule_type = node.rule_type();
        if let Some(cb) = self.enter.get_mut(&rule_type) {
            cb(node);
        }
        let mut child = node.first_child();
        while let Some(c) = child {
            self.walk(c);
            child = c.sibling();
        }
        if let Some(cb) = self.exit.get_mut(&rule_type) {
            cb(node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automata::{build_nfa, minimize, subset_construction};
    use crate::input::StringInput;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use crate::rule::{self, finalize, Grammar, RuleBuilder, RuleOption};
    use crate::vocabulary;

    fn build_all(g: &Grammar, start: &str) -> (Vocabulary, Syntax) {
        let finalized = finalize(g, start).unwrap();
        let nfa = build_nfa(&finalized.lexer_grammar, &finalized.lexer_names).unwrap();
        let dfa = minimize(&subset_construction(&nfa));
        let vocab = vocabulary::assemble(&dfa, &finalized.lexer_grammar);
        let syntax = crate::syntax::build(&finalized, &vocab, start).unwrap();
        (vocab, syntax)
    }
    use crate::vocabulary::Vocabulary;

    #[test]
    fn find_and_list_locate_direct_children_case_insensitively() {
        let mut g = Grammar::new();
        g.define("id", rule::one_or_more(rule::range('a', 'z'))).unwrap();
        g.add(
            RuleBuilder::new("call")
                .option(RuleOption::Main)
                .unwrap()
                .body(rule::and(vec![rule::non_terminal("id"), rule::char('('), rule::non_terminal("id"), rule::char(')')]))
                .finish()
                .unwrap(),
        )
        .unwrap();
        let (vocab, syntax) = build_all(&g, "call");
        let lexer = Lexer::new(&vocab, StringInput::new("foo(bar)"));
        let mut parser = Parser::new(lexer, &syntax).unwrap();
        let ast = parser.execute().unwrap();
        let root = ast.root().unwrap();
        assert!(root.find(&syntax, "ID").is_some(), "rule-name lookup must be case-insensitive");
        assert_eq!(root.list(&syntax, "id").len(), 2);
    }
}
