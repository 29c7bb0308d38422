//! Recursive descent parser producing the flat [`Ast`].
//!
//! Each grammar production reduces into a fixed node shape; the code generator
//! indexes children by position, so the shapes here are a contract. Lists are
//! left-recursive (`[List, Item]` or `[List, Separator, Item]`), mirroring an
//! LALR reduction order, so children always precede their parents in the array.
//!
//! Binary operators are parsed by precedence climbing. Every binary operator
//! reduces to a three-child `BinaryExpression`; levels with a single operand do
//! not produce a wrapper node.

use std::collections::VecDeque;

use smallvec::smallvec;

use crate::{
    ast::{Ast, AstElement, Children, NodeId, NodeKind},
    lexer::{LexError, Lexer, Token, TokenKind},
    stack::with_stack,
};

/// Why a parse stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    Lexical,
    Syntax,
}

impl ParseErrorKind {
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::Lexical => "Lexical error",
            Self::Syntax => "Syntax error",
        }
    }
}

/// A fatal parse failure, located at the last token consumed before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub token: Token,
}

/// A successfully parsed translation unit.
#[derive(Debug)]
pub struct Parsed {
    pub ast: Ast,
    pub root: NodeId,
}

/// Parses `source` as a translation unit whose first line is numbered `line`.
pub fn parse(source: &str, line: u32) -> Result<Parsed, ParseError> {
    let mut parser = Parser::new(source, line);
    let root = parser.translation_unit()?;
    let root = parser.ast.finish(root);
    Ok(Parsed { ast: parser.ast, root })
}

type PResult<T> = Result<T, ParseError>;

struct Parser<'src> {
    lexer: Lexer<'src>,
    lookahead: VecDeque<Token>,
    ast: Ast,
    previous: Token,
}

impl<'src> Parser<'src> {
    fn new(source: &'src str, line: u32) -> Self {
        let lexer = Lexer::new(source, line);
        Self {
            lexer,
            lookahead: VecDeque::with_capacity(2),
            ast: Ast::new(),
            previous: Token {
                kind: TokenKind::Eof,
                position: 0,
                size: 0,
                line: line.max(1),
            },
        }
    }

    // ---- token plumbing ------------------------------------------------

    fn peek_nth(&mut self, n: usize) -> PResult<TokenKind> {
        while self.lookahead.len() <= n {
            let token = self.lexer.next_token().map_err(|err| self.lex_error(err))?;
            self.lookahead.push_back(token);
        }
        Ok(self.lookahead[n].kind)
    }

    fn peek(&mut self) -> PResult<TokenKind> {
        self.peek_nth(0)
    }

    fn check(&mut self, kind: TokenKind) -> PResult<bool> {
        Ok(self.peek()? == kind)
    }

    fn advance(&mut self) -> PResult<AstElement> {
        self.peek()?;
        match self.lookahead.pop_front() {
            Some(token) => {
                self.previous = token;
                Ok(AstElement::from_token(token))
            }
            None => Err(self.error(ParseErrorKind::Syntax)),
        }
    }

    fn expect(&mut self, kind: TokenKind) -> PResult<AstElement> {
        if self.check(kind)? {
            self.advance()
        } else {
            Err(self.error(ParseErrorKind::Syntax))
        }
    }

    fn error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError {
            kind,
            token: self.previous,
        }
    }

    fn lex_error(&self, _err: LexError) -> ParseError {
        self.error(ParseErrorKind::Lexical)
    }

    fn reduce(&mut self, kind: NodeKind, children: Children) -> AstElement {
        self.ast.reduce(kind, children, self.previous.line)
    }

    /// Runs `f` for a production that may recurse into itself.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        with_stack(|| f(self))
    }

    // ---- declarations --------------------------------------------------

    fn translation_unit(&mut self) -> PResult<AstElement> {
        if self.check(TokenKind::Eof)? {
            return Ok(self.reduce(NodeKind::TranslationUnit, Children::new()));
        }
        let first = self.external_declaration()?;
        let mut unit = self.reduce(NodeKind::TranslationUnit, smallvec![first]);
        while !self.check(TokenKind::Eof)? {
            let next = self.external_declaration()?;
            unit = self.reduce(NodeKind::TranslationUnit, smallvec![unit, next]);
        }
        Ok(unit)
    }

    fn external_declaration(&mut self) -> PResult<AstElement> {
        let inner = match self.peek()? {
            TokenKind::Class => self.class_definition()?,
            TokenKind::Import | TokenKind::From => self.import_statement()?,
            _ => self.statement()?,
        };
        Ok(self.reduce(NodeKind::ExternalDeclaration, smallvec![inner]))
    }

    fn class_definition(&mut self) -> PResult<AstElement> {
        let class = self.expect(TokenKind::Class)?;
        let name = self.expect(TokenKind::Identifier)?;
        let mut children: Children = smallvec![class, name];
        if self.check(TokenKind::Is)? {
            children.push(self.advance()?);
            children.push(self.expression()?);
        }
        children.push(self.class_body()?);
        Ok(self.reduce(NodeKind::ClassDefinition, children))
    }

    fn class_body(&mut self) -> PResult<AstElement> {
        let open = self.expect(TokenKind::OpenBrace)?;
        if self.check(TokenKind::CloseBrace)? {
            let close = self.advance()?;
            return Ok(self.reduce(NodeKind::ClassBody, smallvec![open, close]));
        }
        let member = self.class_member()?;
        let mut members = self.reduce(NodeKind::ClassMemberList, smallvec![member]);
        while !self.check(TokenKind::CloseBrace)? {
            let member = self.class_member()?;
            members = self.reduce(NodeKind::ClassMemberList, smallvec![members, member]);
        }
        let close = self.advance()?;
        Ok(self.reduce(NodeKind::ClassBody, smallvec![open, members, close]))
    }

    fn class_member(&mut self) -> PResult<AstElement> {
        let first = self.peek()?;
        let second = if first == TokenKind::Static {
            self.peek_nth(1)?
        } else {
            first
        };
        let inner = match second {
            TokenKind::Function => self.function()?,
            TokenKind::Var => self.variable_definition()?,
            _ => return Err(self.error(ParseErrorKind::Syntax)),
        };
        Ok(self.reduce(NodeKind::ClassMember, smallvec![inner]))
    }

    /// Parses a function definition, or a forward declaration ending in `;`.
    fn function(&mut self) -> PResult<AstElement> {
        let mut children = Children::new();
        if self.check(TokenKind::Static)? {
            children.push(self.advance()?);
        }
        children.push(self.expect(TokenKind::Function)?);
        children.push(self.expect(TokenKind::Identifier)?);
        children.push(self.expect(TokenKind::OpenParentheses)?);
        children.push(self.identifier_list(true)?);
        children.push(self.expect(TokenKind::CloseParentheses)?);
        if self.check(TokenKind::Semicolon)? {
            children.push(self.advance()?);
            return Ok(self.reduce(NodeKind::FunctionDeclaration, children));
        }
        children.push(self.compound_statement()?);
        Ok(self.reduce(NodeKind::FunctionDefinition, children))
    }

    fn identifier_list(&mut self, allow_empty: bool) -> PResult<AstElement> {
        if allow_empty && !self.check(TokenKind::Identifier)? {
            return Ok(self.reduce(NodeKind::IdentifierList, Children::new()));
        }
        let id = self.expect(TokenKind::Identifier)?;
        let mut list = self.reduce(NodeKind::IdentifierList, smallvec![id]);
        while self.check(TokenKind::Comma)? {
            let comma = self.advance()?;
            let id = self.expect(TokenKind::Identifier)?;
            list = self.reduce(NodeKind::IdentifierList, smallvec![list, comma, id]);
        }
        Ok(list)
    }

    fn import_statement(&mut self) -> PResult<AstElement> {
        if self.check(TokenKind::Import)? {
            let import = self.advance()?;
            let name = self.module_name()?;
            let semicolon = self.expect(TokenKind::Semicolon)?;
            return Ok(self.reduce(NodeKind::ImportStatement, smallvec![import, name, semicolon]));
        }
        let from = self.expect(TokenKind::From)?;
        let name = self.module_name()?;
        let import = self.expect(TokenKind::Import)?;
        let what = if self.check(TokenKind::Asterisk)? {
            self.advance()?
        } else {
            self.identifier_list(false)?
        };
        let semicolon = self.expect(TokenKind::Semicolon)?;
        Ok(self.reduce(NodeKind::ImportStatement, smallvec![from, name, import, what, semicolon]))
    }

    fn module_name(&mut self) -> PResult<AstElement> {
        let id = self.expect(TokenKind::Identifier)?;
        let mut name = self.reduce(NodeKind::ModuleName, smallvec![id]);
        while self.check(TokenKind::Dot)? {
            let dot = self.advance()?;
            let id = self.expect(TokenKind::Identifier)?;
            name = self.reduce(NodeKind::ModuleName, smallvec![name, dot, id]);
        }
        Ok(name)
    }

    fn variable_definition(&mut self) -> PResult<AstElement> {
        let specifier = self.variable_specifier()?;
        if self.check(TokenKind::Assign)? {
            let assign = self.advance()?;
            let value = self.expression()?;
            let semicolon = self.expect(TokenKind::Semicolon)?;
            return Ok(self.reduce(
                NodeKind::VariableDefinition,
                smallvec![specifier, assign, value, semicolon],
            ));
        }
        let semicolon = self.expect(TokenKind::Semicolon)?;
        let declaration = self.reduce(NodeKind::VariableDeclaration, smallvec![specifier, semicolon]);
        Ok(self.reduce(NodeKind::VariableDefinition, smallvec![declaration]))
    }

    fn variable_specifier(&mut self) -> PResult<AstElement> {
        let mut children = Children::new();
        if self.check(TokenKind::Static)? {
            children.push(self.advance()?);
        }
        children.push(self.expect(TokenKind::Var)?);
        children.push(self.expect(TokenKind::Identifier)?);
        Ok(self.reduce(NodeKind::VariableSpecifier, children))
    }

    // ---- statements ----------------------------------------------------

    fn statement(&mut self) -> PResult<AstElement> {
        self.nested(|p| {
            let inner = match p.peek()? {
                TokenKind::Function => p.function()?,
                TokenKind::Var => p.variable_definition()?,
                TokenKind::Static => match p.peek_nth(1)? {
                    TokenKind::Function => p.function()?,
                    TokenKind::Var => p.variable_definition()?,
                    _ => {
                        p.advance()?;
                        return Err(p.error(ParseErrorKind::Syntax));
                    }
                },
                TokenKind::If => p.selection_statement()?,
                TokenKind::While | TokenKind::Do | TokenKind::For => p.iteration_statement()?,
                TokenKind::Break | TokenKind::Continue | TokenKind::Return => p.jump_statement()?,
                TokenKind::Try => p.try_statement()?,
                _ => p.expression_statement()?,
            };
            Ok(p.reduce(NodeKind::Statement, smallvec![inner]))
        })
    }

    fn compound_statement(&mut self) -> PResult<AstElement> {
        let open = self.expect(TokenKind::OpenBrace)?;
        if self.check(TokenKind::CloseBrace)? {
            let close = self.advance()?;
            return Ok(self.reduce(NodeKind::CompoundStatement, smallvec![open, close]));
        }
        let first = self.statement()?;
        let mut list = self.reduce(NodeKind::StatementList, smallvec![first]);
        while !self.check(TokenKind::CloseBrace)? {
            if self.check(TokenKind::Eof)? {
                return Err(self.error(ParseErrorKind::Syntax));
            }
            let next = self.statement()?;
            list = self.reduce(NodeKind::StatementList, smallvec![list, next]);
        }
        let close = self.advance()?;
        Ok(self.reduce(NodeKind::CompoundStatement, smallvec![open, list, close]))
    }

    fn expression_statement(&mut self) -> PResult<AstElement> {
        if self.check(TokenKind::Semicolon)? {
            let semicolon = self.advance()?;
            return Ok(self.reduce(NodeKind::ExpressionStatement, smallvec![semicolon]));
        }
        let expression = self.expression()?;
        let semicolon = self.expect(TokenKind::Semicolon)?;
        Ok(self.reduce(NodeKind::ExpressionStatement, smallvec![expression, semicolon]))
    }

    /// `if (c) {..}` with an optional `else {..}` or `else if`. A chain of
    /// `else if` arms reduces into nested seven-child nodes, built innermost
    /// first once the whole chain has been read.
    fn selection_statement(&mut self) -> PResult<AstElement> {
        let mut outer_arms: Vec<Children> = Vec::new();
        let last = loop {
            let mut children: Children = smallvec![
                self.expect(TokenKind::If)?,
                self.expect(TokenKind::OpenParentheses)?,
                self.expression()?,
                self.expect(TokenKind::CloseParentheses)?,
                self.compound_statement()?,
            ];
            if !self.check(TokenKind::Else)? {
                break children;
            }
            children.push(self.advance()?);
            if !self.check(TokenKind::If)? {
                children.push(self.compound_statement()?);
                break children;
            }
            outer_arms.push(children);
        };

        let mut statement = self.reduce(NodeKind::SelectionStatement, last);
        while let Some(mut children) = outer_arms.pop() {
            children.push(statement);
            statement = self.reduce(NodeKind::SelectionStatement, children);
        }
        Ok(statement)
    }

    fn try_statement(&mut self) -> PResult<AstElement> {
        let keyword = self.expect(TokenKind::Try)?;
        let body = self.compound_statement()?;
        let first = self.except_statement()?;
        let mut clauses = self.reduce(NodeKind::ExceptStatementList, smallvec![first]);
        while self.check(TokenKind::Except)? {
            let next = self.except_statement()?;
            clauses = self.reduce(NodeKind::ExceptStatementList, smallvec![clauses, next]);
        }
        let ending = self.try_ending()?;
        Ok(self.reduce(NodeKind::TryStatement, smallvec![keyword, body, clauses, ending]))
    }

    /// `except expression [as name] {..}`.
    fn except_statement(&mut self) -> PResult<AstElement> {
        let mut children: Children = smallvec![self.expect(TokenKind::Except)?, self.expression()?];
        if self.check(TokenKind::As)? {
            children.push(self.advance()?);
            children.push(self.expect(TokenKind::Identifier)?);
        }
        children.push(self.compound_statement()?);
        Ok(self.reduce(NodeKind::ExceptStatement, children))
    }

    /// `[else {..}] [finally {..}]`; empty when neither is present.
    fn try_ending(&mut self) -> PResult<AstElement> {
        let mut children = Children::new();
        if self.check(TokenKind::Else)? {
            children.push(self.advance()?);
            children.push(self.compound_statement()?);
        }
        if self.check(TokenKind::Finally)? {
            children.push(self.advance()?);
            children.push(self.compound_statement()?);
        }
        Ok(self.reduce(NodeKind::TryEnding, children))
    }

    fn iteration_statement(&mut self) -> PResult<AstElement> {
        let children: Children = match self.peek()? {
            TokenKind::While => smallvec![
                self.advance()?,
                self.expect(TokenKind::OpenParentheses)?,
                self.expression()?,
                self.expect(TokenKind::CloseParentheses)?,
                self.compound_statement()?,
            ],
            TokenKind::Do => smallvec![
                self.advance()?,
                self.compound_statement()?,
                self.expect(TokenKind::While)?,
                self.expect(TokenKind::OpenParentheses)?,
                self.expression()?,
                self.expect(TokenKind::CloseParentheses)?,
                self.expect(TokenKind::Semicolon)?,
            ],
            _ => {
                let for_token = self.expect(TokenKind::For)?;
                let open = self.expect(TokenKind::OpenParentheses)?;
                if self.peek()? == TokenKind::Identifier && self.peek_nth(1)? == TokenKind::In {
                    smallvec![
                        for_token,
                        open,
                        self.advance()?,
                        self.advance()?,
                        self.expression()?,
                        self.expect(TokenKind::CloseParentheses)?,
                        self.compound_statement()?,
                    ]
                } else {
                    let mut children: Children = smallvec![
                        for_token,
                        open,
                        self.statement()?,
                        self.expression()?,
                        self.expect(TokenKind::Semicolon)?,
                    ];
                    if !self.check(TokenKind::CloseParentheses)? {
                        children.push(self.expression()?);
                    }
                    children.push(self.expect(TokenKind::CloseParentheses)?);
                    children.push(self.compound_statement()?);
                    children
                }
            }
        };
        Ok(self.reduce(NodeKind::IterationStatement, children))
    }

    fn jump_statement(&mut self) -> PResult<AstElement> {
        let keyword = self.advance()?;
        let mut children: Children = smallvec![keyword];
        if keyword.is_token(TokenKind::Return) && !self.check(TokenKind::Semicolon)? {
            children.push(self.expression()?);
        }
        children.push(self.expect(TokenKind::Semicolon)?);
        Ok(self.reduce(NodeKind::JumpStatement, children))
    }

    // ---- expressions ---------------------------------------------------

    fn expression(&mut self) -> PResult<AstElement> {
        let first = self.assignment()?;
        let mut expression = self.reduce(NodeKind::Expression, smallvec![first]);
        while self.check(TokenKind::Comma)? {
            let comma = self.advance()?;
            let next = self.assignment()?;
            expression = self.reduce(NodeKind::Expression, smallvec![expression, comma, next]);
        }
        Ok(expression)
    }

    fn assignment(&mut self) -> PResult<AstElement> {
        self.nested(|p| {
            let left = p.binary(1)?;
            if p.peek()?.is_assignment_operator() {
                if !left.is_node(NodeKind::UnaryExpression) {
                    p.advance()?;
                    return Err(p.error(ParseErrorKind::Syntax));
                }
                let operator = p.advance()?;
                let operator = p.reduce(NodeKind::AssignmentOperator, smallvec![operator]);
                let value = p.assignment()?;
                return Ok(p.reduce(NodeKind::AssignmentExpression, smallvec![left, operator, value]));
            }
            let conditional = p.finish_conditional(left)?;
            Ok(p.reduce(NodeKind::AssignmentExpression, smallvec![conditional]))
        })
    }

    fn conditional(&mut self) -> PResult<AstElement> {
        self.nested(|p| {
            let condition = p.binary(1)?;
            p.finish_conditional(condition)
        })
    }

    fn finish_conditional(&mut self, condition: AstElement) -> PResult<AstElement> {
        if !self.check(TokenKind::Question)? {
            return Ok(self.reduce(NodeKind::ConditionalExpression, smallvec![condition]));
        }
        let question = self.advance()?;
        let when_true = self.expression()?;
        let colon = self.expect(TokenKind::Colon)?;
        let when_false = self.conditional()?;
        Ok(self.reduce(
            NodeKind::ConditionalExpression,
            smallvec![condition, question, when_true, colon, when_false],
        ))
    }

    fn binary(&mut self, min_precedence: u8) -> PResult<AstElement> {
        let mut left = self.unary()?;
        loop {
            let Some(precedence) = binary_precedence(self.peek()?) else {
                break;
            };
            if precedence < min_precedence {
                break;
            }
            let operator = self.advance()?;
            let right = self.binary(precedence + 1)?;
            left = self.reduce(NodeKind::BinaryExpression, smallvec![left, operator, right]);
        }
        Ok(left)
    }

    fn unary(&mut self) -> PResult<AstElement> {
        match self.peek()? {
            TokenKind::Plus | TokenKind::Minus | TokenKind::BitNot | TokenKind::LogicalNot => {
                let token = self.advance()?;
                let operator = self.reduce(NodeKind::UnaryOperator, smallvec![token]);
                let operand = self.nested(Self::unary)?;
                Ok(self.reduce(NodeKind::UnaryExpression, smallvec![operator, operand]))
            }
            TokenKind::Increment | TokenKind::Decrement => {
                let token = self.advance()?;
                let operand = self.nested(Self::unary)?;
                Ok(self.reduce(NodeKind::UnaryExpression, smallvec![token, operand]))
            }
            _ => {
                let postfix = self.postfix()?;
                Ok(self.reduce(NodeKind::UnaryExpression, smallvec![postfix]))
            }
        }
    }

    fn postfix(&mut self) -> PResult<AstElement> {
        let primary = self.primary()?;
        let mut postfix = self.reduce(NodeKind::PostfixExpression, smallvec![primary]);
        loop {
            let children: Children = match self.peek()? {
                TokenKind::Increment | TokenKind::Decrement => smallvec![postfix, self.advance()?],
                TokenKind::Dot => {
                    let dot = self.advance()?;
                    let name = self.expect(TokenKind::Identifier)?;
                    if self.check(TokenKind::OpenParentheses)? {
                        smallvec![
                            postfix,
                            dot,
                            name,
                            self.advance()?,
                            self.argument_list()?,
                            self.expect(TokenKind::CloseParentheses)?,
                        ]
                    } else {
                        smallvec![postfix, dot, name]
                    }
                }
                TokenKind::OpenParentheses => smallvec![
                    postfix,
                    self.advance()?,
                    self.argument_list()?,
                    self.expect(TokenKind::CloseParentheses)?,
                ],
                TokenKind::OpenBracket => smallvec![
                    postfix,
                    self.advance()?,
                    self.expression()?,
                    self.expect(TokenKind::CloseBracket)?,
                ],
                _ => return Ok(postfix),
            };
            postfix = self.reduce(NodeKind::PostfixExpression, children);
        }
    }

    fn argument_list(&mut self) -> PResult<AstElement> {
        if self.check(TokenKind::CloseParentheses)? {
            return Ok(self.reduce(NodeKind::ArgumentExpressionList, Children::new()));
        }
        let first = self.assignment()?;
        let mut list = self.reduce(NodeKind::ArgumentExpressionList, smallvec![first]);
        while self.check(TokenKind::Comma)? {
            let comma = self.advance()?;
            let next = self.assignment()?;
            list = self.reduce(NodeKind::ArgumentExpressionList, smallvec![list, comma, next]);
        }
        Ok(list)
    }

    fn primary(&mut self) -> PResult<AstElement> {
        let inner: Children = match self.peek()? {
            TokenKind::Identifier
            | TokenKind::Constant
            | TokenKind::HexConstant
            | TokenKind::BinaryConstant
            | TokenKind::Null
            | TokenKind::This
            | TokenKind::Super
            | TokenKind::True
            | TokenKind::False => smallvec![self.advance()?],
            TokenKind::String => smallvec![self.string_literal_list()?],
            TokenKind::OpenParentheses => smallvec![
                self.advance()?,
                self.expression()?,
                self.expect(TokenKind::CloseParentheses)?,
            ],
            TokenKind::OpenBracket => smallvec![self.list()?],
            TokenKind::OpenBrace => smallvec![self.dict()?],
            _ => {
                self.advance()?;
                return Err(self.error(ParseErrorKind::Syntax));
            }
        };
        Ok(self.reduce(NodeKind::PrimaryExpression, inner))
    }

    fn string_literal_list(&mut self) -> PResult<AstElement> {
        let first = self.expect(TokenKind::String)?;
        let mut list = self.reduce(NodeKind::StringLiteralList, smallvec![first]);
        while self.check(TokenKind::String)? {
            let next = self.advance()?;
            list = self.reduce(NodeKind::StringLiteralList, smallvec![list, next]);
        }
        Ok(list)
    }

    fn list(&mut self) -> PResult<AstElement> {
        let open = self.expect(TokenKind::OpenBracket)?;
        if self.check(TokenKind::CloseBracket)? {
            let close = self.advance()?;
            return Ok(self.reduce(NodeKind::List, smallvec![open, close]));
        }
        let first = self.conditional()?;
        let mut elements = self.reduce(NodeKind::ListElementList, smallvec![first]);
        loop {
            if !self.check(TokenKind::Comma)? {
                let close = self.expect(TokenKind::CloseBracket)?;
                return Ok(self.reduce(NodeKind::List, smallvec![open, elements, close]));
            }
            let comma = self.advance()?;
            if self.check(TokenKind::CloseBracket)? {
                let close = self.advance()?;
                return Ok(self.reduce(NodeKind::List, smallvec![open, elements, comma, close]));
            }
            let next = self.conditional()?;
            elements = self.reduce(NodeKind::ListElementList, smallvec![elements, comma, next]);
        }
    }

    fn dict(&mut self) -> PResult<AstElement> {
        let open = self.expect(TokenKind::OpenBrace)?;
        if self.check(TokenKind::CloseBrace)? {
            let close = self.advance()?;
            return Ok(self.reduce(NodeKind::Dict, smallvec![open, close]));
        }
        let first = self.dict_element()?;
        let mut elements = self.reduce(NodeKind::DictElementList, smallvec![first]);
        loop {
            if !self.check(TokenKind::Comma)? {
                let close = self.expect(TokenKind::CloseBrace)?;
                return Ok(self.reduce(NodeKind::Dict, smallvec![open, elements, close]));
            }
            let comma = self.advance()?;
            if self.check(TokenKind::CloseBrace)? {
                let close = self.advance()?;
                return Ok(self.reduce(NodeKind::Dict, smallvec![open, elements, comma, close]));
            }
            let next = self.dict_element()?;
            elements = self.reduce(NodeKind::DictElementList, smallvec![elements, comma, next]);
        }
    }

    fn dict_element(&mut self) -> PResult<AstElement> {
        let key = self.assignment()?;
        let key = self.reduce(NodeKind::Expression, smallvec![key]);
        let colon = self.expect(TokenKind::Colon)?;
        let value = self.conditional()?;
        Ok(self.reduce(NodeKind::DictElement, smallvec![key, colon, value]))
    }
}

/// Binding strength of binary operators; higher binds tighter.
fn binary_precedence(kind: TokenKind) -> Option<u8> {
    Some(match kind {
        TokenKind::LogicalOr => 1,
        TokenKind::LogicalAnd => 2,
        TokenKind::BitOr => 3,
        TokenKind::Xor => 4,
        TokenKind::BitAnd => 5,
        TokenKind::IsEqual | TokenKind::IsNotEqual => 6,
        TokenKind::LessThan
        | TokenKind::LessOrEqual
        | TokenKind::GreaterThan
        | TokenKind::GreaterOrEqual
        | TokenKind::Is => 7,
        TokenKind::LeftShift | TokenKind::RightShift => 8,
        TokenKind::DotDot | TokenKind::DotDotDot => 9,
        TokenKind::Plus | TokenKind::Minus => 10,
        TokenKind::Asterisk | TokenKind::Divide | TokenKind::Modulo => 11,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn outline(source: &str) -> String {
        let parsed = parse(source, 1).unwrap();
        parsed.ast.dump(source, parsed.root)
    }

    fn kind_of(parsed: &Parsed, id: NodeId) -> NodeKind {
        parsed.ast.node(id).kind
    }

    #[test]
    fn root_is_last_element() {
        let parsed = parse("var a = 1; a;", 1).unwrap();
        assert_eq!(parsed.root.index(), parsed.ast.len() - 1);
        assert_eq!(kind_of(&parsed, parsed.root), NodeKind::TranslationUnit);
        let unit = parsed.ast.node(parsed.root);
        assert_eq!(unit.children, 2);
        assert_eq!(kind_of(&parsed, unit.child(0)), NodeKind::TranslationUnit);
    }

    #[test]
    fn empty_source_is_an_empty_unit() {
        let parsed = parse("  // nothing\n", 1).unwrap();
        assert_eq!(parsed.ast.node(parsed.root).children, 0);
    }

    #[test]
    fn binary_precedence_nests_tighter_operators_deeper() {
        assert_eq!(
            outline("1 + 2 * 3;"),
            "TranslationUnit
  ExternalDeclaration
    Statement
      ExpressionStatement
        Expression
          AssignmentExpression
            ConditionalExpression
              BinaryExpression
                UnaryExpression
                  PostfixExpression
                    PrimaryExpression
                      Constant 1
                Plus +
                BinaryExpression
                  UnaryExpression
                    PostfixExpression
                      PrimaryExpression
                        Constant 2
                  Asterisk *
                  UnaryExpression
                    PostfixExpression
                      PrimaryExpression
                        Constant 3
        Semicolon ;
"
        );
    }

    #[test]
    fn method_call_has_six_children() {
        let parsed = parse("a.b(1, 2);", 1).unwrap();
        let postfix = (0..parsed.ast.len())
            .filter_map(|i| parsed.ast.element(NodeId::from_raw(i)).as_node().copied())
            .filter(|n| n.kind == NodeKind::PostfixExpression)
            .max_by_key(|n| n.children)
            .unwrap();
        assert_eq!(postfix.children, 6);
        let args = parsed.ast.node(postfix.child(4));
        assert_eq!(args.kind, NodeKind::ArgumentExpressionList);
        assert_eq!(args.children, 3);
    }

    #[test]
    fn assignment_requires_unary_target() {
        assert!(parse("a = b = 3;", 1).is_ok());
        assert!(parse("1 = 2;", 1).is_ok());
        let err = parse("a + b = 3;", 1).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Syntax);
    }

    #[test]
    fn for_loop_shapes() {
        let c_style = parse("for (var i = 0; i < 3; i += 1) { }", 1).unwrap();
        let iteration = find(&c_style, NodeKind::IterationStatement);
        assert_eq!(iteration.children, 8);

        let no_step = parse("for (; x;) { }", 1).unwrap();
        assert_eq!(find(&no_step, NodeKind::IterationStatement).children, 7);

        let for_in = parse("for (x in y) { }", 1).unwrap();
        let iteration = find(&for_in, NodeKind::IterationStatement);
        assert_eq!(iteration.children, 7);
        assert!(for_in.ast.element(iteration.child(2)).is_token(TokenKind::Identifier));
    }

    #[test]
    fn functions_and_forward_declarations() {
        let parsed = parse("function f(a, b);\nfunction f(a, b) { return a; }", 1).unwrap();
        assert_eq!(find(&parsed, NodeKind::FunctionDeclaration).children, 6);
        let definition = find(&parsed, NodeKind::FunctionDefinition);
        assert_eq!(definition.children, 6);
        assert_eq!(definition.line, 2);
    }

    #[test]
    fn class_with_superclass_and_members() {
        let parsed = parse("class A is B { var x; static function make() { } }", 1).unwrap();
        assert_eq!(find(&parsed, NodeKind::ClassDefinition).children, 5);
        assert_eq!(find(&parsed, NodeKind::ClassBody).children, 3);
        assert_eq!(find(&parsed, NodeKind::FunctionDefinition).children, 7);
    }

    #[test]
    fn list_and_dict_accept_trailing_commas() {
        let parsed = parse("[1, 2,]; {1: 2, 3: 4,};", 1).unwrap();
        assert_eq!(find(&parsed, NodeKind::List).children, 4);
        assert_eq!(find(&parsed, NodeKind::Dict).children, 4);
    }

    #[test]
    fn imports() {
        let parsed = parse("import a.b.c; from d import e, f; from g import *;", 1).unwrap();
        let imports: Vec<u32> = nodes(&parsed, NodeKind::ImportStatement).map(|n| n.children).collect();
        assert_eq!(imports, vec![3, 5, 5]);
    }

    #[test]
    fn errors_point_at_last_consumed_token() {
        let err = parse("var a = 1;\nvar = 2;", 1).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Syntax);
        assert_eq!(err.token.line, 2);

        let err = parse("var a = 1;\n@", 1).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Lexical);
    }

    #[test]
    fn deep_nesting_has_no_fixed_limit() {
        let source = format!("{}1{};", "(".repeat(5000), ")".repeat(5000));
        assert!(parse(&source, 1).is_ok());

        let blocks = format!("{}{}", "if (a) { ".repeat(5000), "} ".repeat(5000));
        assert!(parse(&blocks, 1).is_ok());
    }

    #[test]
    fn else_if_chains_nest_innermost_first() {
        let mut source = String::from("if (a) { }");
        for _ in 0..300 {
            source.push_str(" else if (a) { }");
        }
        source.push_str(" else { b; }");
        let parsed = parse(&source, 1).unwrap();

        let selections: Vec<_> = nodes(&parsed, NodeKind::SelectionStatement).collect();
        assert_eq!(selections.len(), 301);
        assert!(selections.iter().all(|n| n.children == 7));
        // each arm's else branch is the arm placed just before it
        let innermost = selections[0];
        assert!(parsed.ast.element(innermost.child(6)).is_node(NodeKind::CompoundStatement));
        for pair in selections.windows(2) {
            let outer = pair[1];
            assert_eq!(parsed.ast.node(outer.child(6)), &pair[0]);
        }
    }

    #[test]
    fn try_statement_shapes() {
        let parsed = parse(
            "try { a; } except E as e { } except F { } else { } finally { }",
            1,
        )
        .unwrap();
        assert_eq!(find(&parsed, NodeKind::TryStatement).children, 4);
        let clauses: Vec<u32> = nodes(&parsed, NodeKind::ExceptStatement).map(|n| n.children).collect();
        assert_eq!(clauses, vec![5, 3]);
        assert_eq!(find(&parsed, NodeKind::TryEnding).children, 4);

        let bare = parse("try { } except E { }", 1).unwrap();
        assert_eq!(find(&bare, NodeKind::TryEnding).children, 0);

        let err = parse("try { } finally { }", 1).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Syntax);
    }

    fn nodes(parsed: &Parsed, kind: NodeKind) -> impl Iterator<Item = crate::ast::AstNode> + '_ {
        (0..parsed.ast.len())
            .filter_map(|i| parsed.ast.element(NodeId::from_raw(i)).as_node().copied())
            .filter(move |n| n.kind == kind)
    }

    fn find(parsed: &Parsed, kind: NodeKind) -> crate::ast::AstNode {
        nodes(parsed, kind).next().unwrap()
    }
}
