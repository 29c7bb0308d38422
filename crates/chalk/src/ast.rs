//! Flat abstract syntax tree storage.
//!
//! Tokens and non-terminal nodes share one element type and live in a single
//! append-only array. A node references its children as the contiguous range
//! `[child_index, child_index + children)`, always stored before the node itself,
//! so the root of a parse is the last element. Every element also records its
//! parent, which the code generator uses to climb left-recursive lists.
//!
//! Children are placed when their parent is reduced: the parser hands
//! [`Ast::reduce`] the pending child elements, which are appended contiguously,
//! and each placed child's own children receive their parent link at that point.

use smallvec::SmallVec;
use strum::{Display, IntoStaticStr};

use crate::lexer::{Token, TokenKind};

/// Index of an element in the [`Ast`] array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    #[must_use]
    pub fn from_raw(index: usize) -> Self {
        Self(u32::try_from(index).unwrap_or(u32::MAX))
    }

    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns the id `offset` elements after this one.
    #[inline]
    #[must_use]
    pub fn offset(self, offset: u32) -> Self {
        Self(self.0 + offset)
    }
}

/// Non-terminal symbols of the grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr, Display)]
pub enum NodeKind {
    ListElementList,
    List,
    DictElement,
    DictElementList,
    Dict,
    StringLiteralList,
    PrimaryExpression,
    PostfixExpression,
    ArgumentExpressionList,
    UnaryExpression,
    UnaryOperator,
    BinaryExpression,
    ConditionalExpression,
    AssignmentExpression,
    AssignmentOperator,
    Expression,
    VariableSpecifier,
    VariableDeclaration,
    VariableDefinition,
    Statement,
    CompoundStatement,
    StatementList,
    ExpressionStatement,
    SelectionStatement,
    IterationStatement,
    JumpStatement,
    TryEnding,
    ExceptStatement,
    ExceptStatementList,
    TryStatement,
    IdentifierList,
    FunctionDefinition,
    FunctionDeclaration,
    ClassMember,
    ClassMemberList,
    ClassBody,
    ClassDefinition,
    ModuleName,
    ImportStatement,
    ExternalDeclaration,
    TranslationUnit,
}

/// A reduced non-terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AstNode {
    pub kind: NodeKind,
    pub child_index: NodeId,
    pub children: u32,
    pub parent: Option<NodeId>,
    /// Line of the first child, or of the previous token for empty nodes.
    pub line: u32,
}

impl AstNode {
    /// Returns the id of child `i`.
    #[inline]
    #[must_use]
    pub fn child(&self, i: u32) -> NodeId {
        debug_assert!(i < self.children, "child {i} out of range for {}", self.kind);
        self.child_index.offset(i)
    }

    /// Returns the id of the last child.
    #[inline]
    #[must_use]
    pub fn last_child(&self) -> NodeId {
        self.child_index.offset(self.children.saturating_sub(1))
    }
}

/// A token stored in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenElement {
    pub token: Token,
    pub parent: Option<NodeId>,
}

/// One element of the flat array: a terminal or a non-terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AstElement {
    Token(TokenElement),
    Node(AstNode),
}

impl AstElement {
    #[must_use]
    pub fn from_token(token: Token) -> Self {
        Self::Token(TokenElement { token, parent: None })
    }

    #[must_use]
    pub fn line(&self) -> u32 {
        match self {
            Self::Token(t) => t.token.line,
            Self::Node(n) => n.line,
        }
    }

    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        match self {
            Self::Token(t) => t.parent,
            Self::Node(n) => n.parent,
        }
    }

    fn set_parent(&mut self, parent: NodeId) {
        match self {
            Self::Token(t) => t.parent = Some(parent),
            Self::Node(n) => n.parent = Some(parent),
        }
    }

    #[must_use]
    pub fn as_node(&self) -> Option<&AstNode> {
        match self {
            Self::Node(n) => Some(n),
            Self::Token(_) => None,
        }
    }

    #[must_use]
    pub fn as_token(&self) -> Option<&Token> {
        match self {
            Self::Token(t) => Some(&t.token),
            Self::Node(_) => None,
        }
    }

    /// Returns true for a node of kind `kind`.
    #[must_use]
    pub fn is_node(&self, kind: NodeKind) -> bool {
        matches!(self, Self::Node(n) if n.kind == kind)
    }

    /// Returns true for a token of kind `kind`.
    #[must_use]
    pub fn is_token(&self, kind: TokenKind) -> bool {
        matches!(self, Self::Token(t) if t.token.kind == kind)
    }
}

/// Pending children handed to [`Ast::reduce`]; most productions have few.
pub type Children = SmallVec<[AstElement; 8]>;

/// The flat node array for one translation unit.
#[derive(Debug, Default, Clone)]
pub struct Ast {
    elements: Vec<AstElement>,
}

impl Ast {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&AstElement> {
        self.elements.get(id.index())
    }

    /// Returns the non-terminal at `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is a token. Node shapes are fixed by the parser, so this
    /// signals a parser/generator mismatch rather than bad input.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &AstNode {
        match &self.elements[id.index()] {
            AstElement::Node(node) => node,
            AstElement::Token(t) => panic!("expected a node at {}, found token {:?}", id.index(), t.token.kind),
        }
    }

    /// Returns the terminal at `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is a non-terminal, for the same reason as [`Ast::node`].
    #[must_use]
    pub fn token(&self, id: NodeId) -> &Token {
        match &self.elements[id.index()] {
            AstElement::Token(t) => &t.token,
            AstElement::Node(n) => panic!("expected a token at {}, found node {}", id.index(), n.kind),
        }
    }

    /// Returns the element at `id`.
    #[must_use]
    pub fn element(&self, id: NodeId) -> &AstElement {
        &self.elements[id.index()]
    }

    /// Places `children` contiguously and returns the pending parent node.
    ///
    /// The returned element is not yet in the array; it is placed when its own
    /// parent reduces, or by [`Ast::finish`] for the root.
    pub fn reduce(&mut self, kind: NodeKind, children: Children, previous_line: u32) -> AstElement {
        let child_index = self.next_id();
        let line = children.first().map_or(previous_line, AstElement::line);
        for child in children {
            self.place(child);
        }
        AstElement::Node(AstNode {
            kind,
            child_index,
            children: self.next_id().0 - child_index.0,
            parent: None,
            line,
        })
    }

    /// Appends the root element and returns its id.
    pub fn finish(&mut self, root: AstElement) -> NodeId {
        self.place(root)
    }

    fn place(&mut self, element: AstElement) -> NodeId {
        let id = self.next_id();
        if let AstElement::Node(node) = &element {
            let start = node.child_index.index();
            for grandchild in &mut self.elements[start..start + node.children as usize] {
                grandchild.set_parent(id);
            }
        }
        self.elements.push(element);
        id
    }

    fn next_id(&self) -> NodeId {
        NodeId(u32::try_from(self.elements.len()).unwrap_or(u32::MAX))
    }

    /// Renders the subtree at `id` as an indented outline, one element per line.
    #[must_use]
    pub fn dump(&self, source: &str, id: NodeId) -> String {
        let mut out = String::new();
        self.dump_into(source, id, 0, &mut out);
        out
    }

    fn dump_into(&self, source: &str, id: NodeId, indent: usize, out: &mut String) {
        for _ in 0..indent {
            out.push_str("  ");
        }
        match self.element(id) {
            AstElement::Token(t) => {
                let name: &'static str = t.token.kind.into();
                out.push_str(name);
                out.push(' ');
                out.push_str(t.token.text(source));
                out.push('\n');
            }
            AstElement::Node(node) => {
                let node = *node;
                let name: &'static str = node.kind.into();
                out.push_str(name);
                out.push('\n');
                for i in 0..node.children {
                    self.dump_into(source, node.child(i), indent + 1, out);
                }
            }
        }
    }
}
