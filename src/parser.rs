use std::collections::HashMap;

use tracing::debug;

use crate::{
    ast::{
        AssignOp, Block, ExceptClause, Expr, ExprKind, FormatString, ImportNames, InfixOp, Literal,
        PrefixOp, Program, Stmt, StmtKind, StringKind,
    },
    diagnostics::{Diagnostic, SourceSpan},
    lexer::Lexer,
    registry::{Associativity, Precedence, TokenRegistry},
    token::{Keyword, StringForm, Token, TokenKind},
};

#[derive(Debug, Clone)]
pub struct ParserOptions {
    /// Errors past this count are dropped; parsing itself continues.
    pub max_errors: usize,
    pub stop_on_first_error: bool,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            max_errors: 200,
            stop_on_first_error: false,
        }
    }
}

pub type PrefixParseFn<'a> = fn(&mut Parser<'a>) -> Option<Expr>;
pub type InfixParseFn<'a> = fn(&mut Parser<'a>, Expr) -> Option<Expr>;
pub type StatementParseFn<'a> = fn(&mut Parser<'a>) -> Option<Stmt>;
pub type ErrorHook<'a> = Box<dyn FnMut(&Diagnostic) + 'a>;

#[derive(Debug)]
pub struct ParseOutput {
    pub program: Program,
    /// Lexer diagnostics followed by parser diagnostics.
    pub errors: Vec<Diagnostic>,
}

/// Parses everything `lexer` produces.
///
/// Malformed input is reported through [`ParseOutput::errors`]; `Err` is
/// reserved for a fatal lexer error or the first error in strict mode.
pub fn parse(lexer: Lexer<'_>, options: ParserOptions) -> Result<ParseOutput, Diagnostic> {
    let mut parser = Parser::new(lexer, options);
    let program = parser.parse_program()?;
    Ok(ParseOutput {
        program,
        errors: parser.diagnostics(),
    })
}

/// Pratt parser over a [`Lexer`] token stream.
///
/// Parse functions follow one convention: they start with the first token of
/// their construct in `cur` and leave `cur` on its last token.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    registry: &'a TokenRegistry,
    options: ParserOptions,
    cur: Token,
    peek: Token,
    errors: Vec<Diagnostic>,
    fatal: Option<Diagnostic>,
    halted: bool,
    prefix_fns: HashMap<TokenKind, PrefixParseFn<'a>>,
    infix_fns: HashMap<TokenKind, InfixParseFn<'a>>,
    statement_fns: HashMap<TokenKind, StatementParseFn<'a>>,
    error_hooks: Vec<ErrorHook<'a>>,
}

impl<'a> Parser<'a> {
    pub fn new(lexer: Lexer<'a>, options: ParserOptions) -> Self {
        let registry = lexer.registry();
        let placeholder = Token::new(TokenKind::Eof, "", SourceSpan::default());
        let mut parser = Self {
            lexer,
            registry,
            options,
            cur: placeholder.clone(),
            peek: placeholder,
            errors: Vec::new(),
            fatal: None,
            halted: false,
            prefix_fns: HashMap::new(),
            infix_fns: HashMap::new(),
            statement_fns: HashMap::new(),
            error_hooks: Vec::new(),
        };
        parser.register_defaults();
        parser.next_token();
        parser.next_token();
        parser
    }

    fn register_defaults(&mut self) {
        use TokenKind as T;

        self.register_prefix(T::Identifier, Self::parse_identifier);
        for kind in [T::Int, T::Binary, T::Octal, T::Hex] {
            self.register_prefix(kind, Self::parse_integer);
        }
        self.register_prefix(T::Float, Self::parse_float);
        self.register_prefix(T::String, Self::parse_string);
        for keyword in [Keyword::True, Keyword::False] {
            self.register_prefix(T::Keyword(keyword), Self::parse_boolean);
        }
        for keyword in [Keyword::Null, Keyword::None, Keyword::Undefined] {
            self.register_prefix(T::Keyword(keyword), Self::parse_null);
        }
        for kind in [T::Bang, T::Minus, T::Plus, T::Tilde] {
            self.register_prefix(kind, Self::parse_prefix);
        }
        self.register_prefix(T::LParen, Self::parse_grouped);
        self.register_prefix(T::LBracket, Self::parse_array);
        self.register_prefix(T::LBrace, Self::parse_hash);
        self.register_prefix(T::Keyword(Keyword::If), Self::parse_if);
        self.register_prefix(T::Keyword(Keyword::Fn), Self::parse_function);
        self.register_prefix(T::Keyword(Keyword::SelfValue), Self::parse_self);
        self.register_prefix(T::Keyword(Keyword::Super), Self::parse_super);
        self.register_prefix(T::Keyword(Keyword::New), Self::parse_new);
        self.register_prefix(T::Keyword(Keyword::Yield), Self::parse_yield);
        self.register_prefix(T::Keyword(Keyword::Await), Self::parse_await);
        // Built-in names that the keyword table also reserves.
        self.register_prefix(T::Keyword(Keyword::Print), Self::parse_identifier);
        self.register_prefix(T::Keyword(Keyword::Type), Self::parse_identifier);

        for kind in [
            T::Plus,
            T::Minus,
            T::Star,
            T::Slash,
            T::FloorDivide,
            T::Percent,
            T::Power,
            T::EqualEqual,
            T::BangEqual,
            T::Less,
            T::Greater,
            T::LessEqual,
            T::GreaterEqual,
            T::DoubleAmpersand,
            T::DoublePipe,
            T::NullCoalesce,
            T::Ampersand,
            T::Pipe,
            T::Caret,
            T::ShiftLeft,
            T::ShiftRight,
        ] {
            self.register_infix(kind, Self::parse_infix);
        }
        let assignment: Vec<TokenKind> = self.registry.assignment_kinds().cloned().collect();
        for kind in assignment {
            self.register_infix(kind, Self::parse_assignment);
        }
        self.register_infix(T::LParen, Self::parse_call);
        self.register_infix(T::LBracket, Self::parse_index);
        self.register_infix(T::Dot, Self::parse_member);
    }

    pub fn register_prefix(&mut self, kind: TokenKind, parse: PrefixParseFn<'a>) {
        self.prefix_fns.insert(kind, parse);
    }

    pub fn register_infix(&mut self, kind: TokenKind, parse: InfixParseFn<'a>) {
        self.infix_fns.insert(kind, parse);
    }

    /// Registered statements take priority over the built-in ones.
    pub fn register_statement(&mut self, kind: TokenKind, parse: StatementParseFn<'a>) {
        self.statement_fns.insert(kind, parse);
    }

    pub fn register_error_hook<F>(&mut self, hook: F)
    where
        F: FnMut(&Diagnostic) + 'a,
    {
        self.error_hooks.push(Box::new(hook));
    }

    pub fn registry(&self) -> &'a TokenRegistry {
        self.registry
    }

    pub fn cur_token(&self) -> &Token {
        &self.cur
    }

    pub fn peek_token(&self) -> &Token {
        &self.peek
    }

    /// Parser errors recorded so far.
    pub fn errors(&self) -> &[Diagnostic] {
        &self.errors
    }

    /// Lexer errors followed by parser errors.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.lexer
            .errors()
            .iter()
            .chain(self.errors.iter())
            .cloned()
            .collect()
    }

    pub fn next_token(&mut self) {
        let next = if self.halted {
            Token::new(TokenKind::Eof, "", self.peek.span)
        } else {
            match self.lexer.next_token() {
                Ok(token) => token,
                Err(diagnostic) => {
                    let span = diagnostic.span.unwrap_or(self.peek.span);
                    self.fatal.get_or_insert(diagnostic);
                    self.halted = true;
                    Token::new(TokenKind::Eof, "", span)
                }
            }
        };
        self.cur = std::mem::replace(&mut self.peek, next);
    }

    pub fn cur_is(&self, kind: &TokenKind) -> bool {
        self.cur.kind == *kind
    }

    pub fn peek_is(&self, kind: &TokenKind) -> bool {
        self.peek.kind == *kind
    }

    /// Advances only when the next token has the expected kind.
    pub fn expect_peek(&mut self, kind: TokenKind) -> bool {
        if self.peek.kind == kind {
            self.next_token();
            true
        } else {
            let message = format!("expected {}, got {}", kind, describe(&self.peek));
            self.record_error(Diagnostic::parser(message).with_span(self.peek.span));
            false
        }
    }

    pub fn record_error(&mut self, diagnostic: Diagnostic) {
        debug!(message = %diagnostic.message, "parse error");
        for hook in &mut self.error_hooks {
            hook(&diagnostic);
        }
        if self.options.stop_on_first_error {
            self.fatal.get_or_insert_with(|| diagnostic.clone());
            self.halted = true;
        }
        if self.errors.len() < self.options.max_errors {
            self.errors.push(diagnostic);
        }
    }

    pub fn parse_program(&mut self) -> Result<Program, Diagnostic> {
        let mut program = Program::default();
        while !self.cur_is(&TokenKind::Eof) {
            if !self.cur_is(&TokenKind::Semicolon) {
                match self.parse_statement() {
                    Some(stmt) => program.statements.push(stmt),
                    None => self.synchronize_statement(),
                }
            }
            self.next_token();
        }
        match self.fatal.take() {
            Some(diagnostic) => Err(diagnostic),
            None => Ok(program),
        }
    }

    fn synchronize_statement(&mut self) {
        while !matches!(
            self.cur.kind,
            TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof
        ) {
            self.next_token();
        }
    }

    fn synchronize_expression(&mut self) {
        while !matches!(
            self.peek.kind,
            TokenKind::Semicolon
                | TokenKind::Comma
                | TokenKind::RParen
                | TokenKind::RBracket
                | TokenKind::RBrace
                | TokenKind::Eof
        ) {
            self.next_token();
        }
    }

    /// The lexer already reported the bad token; strict mode still has to stop.
    fn illegal_token(&mut self) {
        if self.options.stop_on_first_error {
            let diagnostic = self.lexer.errors().last().cloned().unwrap_or_else(|| {
                Diagnostic::lexer(format!("illegal token {}", describe(&self.cur)))
                    .with_span(self.cur.span)
            });
            self.fatal.get_or_insert(diagnostic);
            self.halted = true;
        }
    }

    fn span_from(&self, start: SourceSpan) -> SourceSpan {
        SourceSpan::new(start.start, self.cur.span.end, start.line, start.column)
    }

    fn skip_semicolon(&mut self) {
        if self.peek_is(&TokenKind::Semicolon) {
            self.next_token();
        }
    }

    fn is_name(&self, token: &Token) -> bool {
        match token.kind {
            TokenKind::Identifier => true,
            TokenKind::Keyword(_) => self.registry.is_soft_keyword(&token.literal),
            _ => false,
        }
    }

    /// Advances onto an identifier (soft keywords included) and returns its text.
    pub fn expect_identifier(&mut self) -> Option<String> {
        if self.is_name(&self.peek) {
            self.next_token();
            Some(self.cur.literal.clone())
        } else {
            let message = format!("expected identifier, got {}", describe(&self.peek));
            self.record_error(Diagnostic::parser(message).with_span(self.peek.span));
            None
        }
    }

    /// Skips `: Type` after a binding; annotations are not checked.
    fn skip_type_annotation(&mut self) {
        if self.peek_is(&TokenKind::Colon) {
            self.next_token();
            self.next_token();
        }
    }

    pub fn parse_statement(&mut self) -> Option<Stmt> {
        if let Some(parse) = self.statement_fns.get(&self.cur.kind).copied() {
            return parse(self);
        }
        match self.cur.kind.clone() {
            TokenKind::Illegal => {
                self.illegal_token();
                None
            }
            TokenKind::LBrace => {
                let start = self.cur.span;
                let block = self.parse_block()?;
                Some(Stmt {
                    kind: StmtKind::Block(block),
                    span: self.span_from(start),
                })
            }
            TokenKind::Keyword(keyword) => match keyword {
                Keyword::Let | Keyword::Var | Keyword::Const => self.parse_let(),
                Keyword::Return => self.parse_return(),
                Keyword::While => self.parse_while(),
                Keyword::For => self.parse_for(),
                Keyword::Break => self.parse_simple(StmtKind::Break),
                Keyword::Continue => self.parse_simple(StmtKind::Continue),
                Keyword::Pass => self.parse_simple(StmtKind::Pass),
                Keyword::Class => self.parse_class(),
                Keyword::Import => self.parse_import(),
                Keyword::Use => self.parse_use(),
                Keyword::From => self.parse_from_import(),
                Keyword::Try => self.parse_try(),
                Keyword::Raise | Keyword::Throw => self.parse_raise(),
                Keyword::Assert => self.parse_assert(),
                Keyword::With => self.parse_with(),
                Keyword::Async => self.parse_async(),
                _ => self.parse_expression_statement(),
            },
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_simple(&mut self, kind: StmtKind) -> Option<Stmt> {
        let span = self.cur.span;
        self.skip_semicolon();
        Some(Stmt { kind, span })
    }

    fn parse_let(&mut self) -> Option<Stmt> {
        let start = self.cur.span;
        let mut mutable = self.cur.kind.is_keyword(Keyword::Var);
        if self.peek_is(&TokenKind::Keyword(Keyword::Mut)) {
            self.next_token();
            mutable = true;
        }
        let name = self.expect_identifier()?;
        self.skip_type_annotation();
        let value = if self.peek_is(&TokenKind::Assign) {
            self.next_token();
            self.next_token();
            Some(self.parse_expression(Precedence::Lowest)?)
        } else {
            None
        };
        self.skip_semicolon();
        Some(Stmt {
            kind: StmtKind::Let {
                name,
                mutable,
                value,
            },
            span: self.span_from(start),
        })
    }

    fn ends_statement(&self) -> bool {
        matches!(
            self.peek.kind,
            TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof
        )
    }

    fn parse_optional_value(&mut self) -> Option<Option<Expr>> {
        if self.ends_statement() {
            return Some(None);
        }
        self.next_token();
        let value = self.parse_expression(Precedence::Lowest)?;
        Some(Some(value))
    }

    fn parse_return(&mut self) -> Option<Stmt> {
        let start = self.cur.span;
        let value = self.parse_optional_value()?;
        self.skip_semicolon();
        Some(Stmt {
            kind: StmtKind::Return(value),
            span: self.span_from(start),
        })
    }

    fn parse_raise(&mut self) -> Option<Stmt> {
        let start = self.cur.span;
        let value = self.parse_optional_value()?;
        self.skip_semicolon();
        Some(Stmt {
            kind: StmtKind::Raise(value),
            span: self.span_from(start),
        })
    }

    fn parse_expression_statement(&mut self) -> Option<Stmt> {
        let start = self.cur.span;
        let expr = self.parse_expression(Precedence::Lowest)?;
        self.skip_semicolon();
        Some(Stmt {
            kind: StmtKind::Expr(expr),
            span: self.span_from(start),
        })
    }

    /// Parses `{ ... }` with `cur` on the opening brace.
    pub fn parse_block(&mut self) -> Option<Block> {
        let open = self.cur.span;
        let mut statements = Vec::new();
        self.next_token();
        while !self.cur_is(&TokenKind::RBrace) && !self.cur_is(&TokenKind::Eof) {
            if !self.cur_is(&TokenKind::Semicolon) {
                match self.parse_statement() {
                    Some(stmt) => statements.push(stmt),
                    None => {
                        self.synchronize_statement();
                        if self.cur_is(&TokenKind::RBrace) || self.cur_is(&TokenKind::Eof) {
                            break;
                        }
                    }
                }
            }
            self.next_token();
        }
        if !self.cur_is(&TokenKind::RBrace) {
            self.record_error(Diagnostic::parser("unterminated block, expected `}`").with_span(open));
            return None;
        }
        Some(statements)
    }

    fn expect_block(&mut self) -> Option<Block> {
        if !self.expect_peek(TokenKind::LBrace) {
            return None;
        }
        self.parse_block()
    }

    fn parse_while(&mut self) -> Option<Stmt> {
        let start = self.cur.span;
        self.next_token();
        let condition = self.parse_expression(Precedence::Lowest)?;
        let body = self.expect_block()?;
        Some(Stmt {
            kind: StmtKind::While { condition, body },
            span: self.span_from(start),
        })
    }

    /// `for (x in xs)`, `for (k, v in xs)` or `for (init; condition; update)`;
    /// the parentheses are optional.
    fn parse_for(&mut self) -> Option<Stmt> {
        let start = self.cur.span;
        let parenthesized = self.peek_is(&TokenKind::LParen);
        if parenthesized {
            self.next_token();
        }
        self.next_token();

        if self.is_name(&self.cur) && self.peek_is(&TokenKind::Keyword(Keyword::In)) {
            let binding = self.cur.literal.clone();
            return self.parse_for_in(start, None, binding, parenthesized);
        }
        if self.is_name(&self.cur) && self.peek_is(&TokenKind::Comma) {
            let key = self.cur.literal.clone();
            self.next_token();
            let binding = self.expect_identifier()?;
            return self.parse_for_in(start, Some(key), binding, parenthesized);
        }

        let init = if self.cur_is(&TokenKind::Semicolon) {
            None
        } else if matches!(
            self.cur.kind,
            TokenKind::Keyword(Keyword::Let | Keyword::Var | Keyword::Const)
        ) {
            let stmt = self.parse_let()?;
            if !self.cur_is(&TokenKind::Semicolon) && !self.expect_peek(TokenKind::Semicolon) {
                return None;
            }
            Some(Box::new(stmt))
        } else {
            let init_start = self.cur.span;
            let expr = self.parse_expression(Precedence::Lowest)?;
            let stmt = Stmt {
                kind: StmtKind::Expr(expr),
                span: self.span_from(init_start),
            };
            if !self.expect_peek(TokenKind::Semicolon) {
                return None;
            }
            Some(Box::new(stmt))
        };

        self.next_token();
        let condition = if self.cur_is(&TokenKind::Semicolon) {
            None
        } else {
            let condition = self.parse_expression(Precedence::Lowest)?;
            if !self.expect_peek(TokenKind::Semicolon) {
                return None;
            }
            Some(condition)
        };

        let close = if parenthesized {
            TokenKind::RParen
        } else {
            TokenKind::LBrace
        };
        let update = if self.peek_is(&close) {
            None
        } else {
            self.next_token();
            Some(self.parse_expression(Precedence::Lowest)?)
        };
        if parenthesized && !self.expect_peek(TokenKind::RParen) {
            return None;
        }
        let body = self.expect_block()?;
        Some(Stmt {
            kind: StmtKind::For {
                init,
                condition,
                update,
                body,
            },
            span: self.span_from(start),
        })
    }

    fn parse_for_in(
        &mut self,
        start: SourceSpan,
        key: Option<String>,
        binding: String,
        parenthesized: bool,
    ) -> Option<Stmt> {
        if !self.expect_peek(TokenKind::Keyword(Keyword::In)) {
            return None;
        }
        self.next_token();
        let iterable = self.parse_expression(Precedence::Lowest)?;
        if parenthesized && !self.expect_peek(TokenKind::RParen) {
            return None;
        }
        let body = self.expect_block()?;
        Some(Stmt {
            kind: StmtKind::ForIn {
                key,
                binding,
                iterable,
                body,
            },
            span: self.span_from(start),
        })
    }

    fn parse_class(&mut self) -> Option<Stmt> {
        let start = self.cur.span;
        let name = self.expect_identifier()?;
        let superclass = if self.peek_is(&TokenKind::Colon)
            || self.peek_is(&TokenKind::Keyword(Keyword::Extends))
        {
            self.next_token();
            Some(self.expect_identifier()?)
        } else if self.peek_is(&TokenKind::LParen) {
            self.next_token();
            let base = self.expect_identifier()?;
            if !self.expect_peek(TokenKind::RParen) {
                return None;
            }
            Some(base)
        } else {
            None
        };
        let body = self.expect_block()?;
        Some(Stmt {
            kind: StmtKind::Class {
                name,
                superclass,
                body,
            },
            span: self.span_from(start),
        })
    }

    /// Module path: a string literal or dotted/`::` separated names.
    fn parse_module_path(&mut self) -> Option<String> {
        if self.peek_is(&TokenKind::String) {
            self.next_token();
            return Some(self.cur.literal.clone());
        }
        let mut path = self.expect_identifier()?;
        while self.peek_is(&TokenKind::Dot) || self.peek_is(&TokenKind::DoubleColon) {
            self.next_token();
            path.push('.');
            path.push_str(&self.expect_identifier()?);
        }
        Some(path)
    }

    fn parse_import(&mut self) -> Option<Stmt> {
        let start = self.cur.span;
        let path = self.parse_module_path()?;
        let alias = if self.peek_is(&TokenKind::Keyword(Keyword::As)) {
            self.next_token();
            Some(self.expect_identifier()?)
        } else {
            None
        };
        self.skip_semicolon();
        Some(Stmt {
            kind: StmtKind::Import { path, alias },
            span: self.span_from(start),
        })
    }

    fn parse_use(&mut self) -> Option<Stmt> {
        let start = self.cur.span;
        let path = self.parse_module_path()?;
        self.skip_semicolon();
        Some(Stmt {
            kind: StmtKind::Use { path },
            span: self.span_from(start),
        })
    }

    fn parse_from_import(&mut self) -> Option<Stmt> {
        let start = self.cur.span;
        let path = self.parse_module_path()?;
        if !self.expect_peek(TokenKind::Keyword(Keyword::Import)) {
            return None;
        }
        let names = if self.peek_is(&TokenKind::Star) {
            self.next_token();
            ImportNames::All
        } else {
            let mut names = vec![self.expect_identifier()?];
            while self.peek_is(&TokenKind::Comma) {
                self.next_token();
                names.push(self.expect_identifier()?);
            }
            ImportNames::Names(names)
        };
        self.skip_semicolon();
        Some(Stmt {
            kind: StmtKind::FromImport { path, names },
            span: self.span_from(start),
        })
    }

    fn parse_try(&mut self) -> Option<Stmt> {
        let start = self.cur.span;
        let body = self.expect_block()?;

        let except = if self.peek_is(&TokenKind::Keyword(Keyword::Except))
            || self.peek_is(&TokenKind::Keyword(Keyword::Catch))
        {
            self.next_token();
            let binding = if self.peek_is(&TokenKind::LParen) {
                self.next_token();
                let name = self.expect_identifier()?;
                if !self.expect_peek(TokenKind::RParen) {
                    return None;
                }
                Some(name)
            } else if self.is_name(&self.peek) {
                let mut name = self.expect_identifier()?;
                // `except Kind as name`
                if self.peek_is(&TokenKind::Keyword(Keyword::As)) {
                    self.next_token();
                    name = self.expect_identifier()?;
                }
                Some(name)
            } else {
                None
            };
            let body = self.expect_block()?;
            Some(ExceptClause { binding, body })
        } else {
            None
        };

        let finally = if self.peek_is(&TokenKind::Keyword(Keyword::Finally)) {
            self.next_token();
            Some(self.expect_block()?)
        } else {
            None
        };

        Some(Stmt {
            kind: StmtKind::Try {
                body,
                except,
                finally,
            },
            span: self.span_from(start),
        })
    }

    fn parse_assert(&mut self) -> Option<Stmt> {
        let start = self.cur.span;
        self.next_token();
        let condition = self.parse_expression(Precedence::Lowest)?;
        let message = if self.peek_is(&TokenKind::Comma) {
            self.next_token();
            self.next_token();
            Some(self.parse_expression(Precedence::Lowest)?)
        } else {
            None
        };
        self.skip_semicolon();
        Some(Stmt {
            kind: StmtKind::Assert { condition, message },
            span: self.span_from(start),
        })
    }

    fn parse_with(&mut self) -> Option<Stmt> {
        let start = self.cur.span;
        self.next_token();
        let context = self.parse_expression(Precedence::Lowest)?;
        let binding = if self.peek_is(&TokenKind::Keyword(Keyword::As)) {
            self.next_token();
            Some(self.expect_identifier()?)
        } else {
            None
        };
        let body = self.expect_block()?;
        Some(Stmt {
            kind: StmtKind::With {
                context,
                binding,
                body,
            },
            span: self.span_from(start),
        })
    }

    fn parse_async(&mut self) -> Option<Stmt> {
        let start = self.cur.span;
        self.next_token();
        let inner = self.parse_statement()?;
        Some(Stmt {
            kind: StmtKind::Async(Box::new(inner)),
            span: self.span_from(start),
        })
    }

    pub fn parse_expression(&mut self, precedence: Precedence) -> Option<Expr> {
        let prefix: PrefixParseFn<'a> = match self.prefix_fns.get(&self.cur.kind).copied() {
            Some(prefix) => prefix,
            None if self.is_name(&self.cur) => Self::parse_identifier,
            None => {
                if self.cur_is(&TokenKind::Illegal) {
                    self.illegal_token();
                } else {
                    let message = format!("no prefix parse function for {} found", describe(&self.cur));
                    self.record_error(Diagnostic::parser(message).with_span(self.cur.span));
                }
                self.synchronize_expression();
                return None;
            }
        };
        let mut left = prefix(self)?;

        while !self.peek_is(&TokenKind::Semicolon) && precedence < self.peek_precedence() {
            // A call or index on the next line starts a new statement.
            if matches!(self.peek.kind, TokenKind::LParen | TokenKind::LBracket)
                && self.peek.span.line > self.cur.span.line
            {
                break;
            }
            let Some(infix) = self.infix_fns.get(&self.peek.kind).copied() else {
                break;
            };
            self.next_token();
            left = infix(self, left)?;
        }
        Some(left)
    }

    fn peek_precedence(&self) -> Precedence {
        self.registry.precedence(&self.peek.kind)
    }

    fn parse_identifier(&mut self) -> Option<Expr> {
        Some(Expr {
            kind: ExprKind::Identifier(self.cur.literal.clone()),
            span: self.cur.span,
        })
    }

    fn parse_integer(&mut self) -> Option<Expr> {
        let text = self.cur.literal.replace('_', "");
        let (negative, digits) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text.strip_prefix('+').unwrap_or(&text)),
        };
        let radix = match self.cur.kind {
            TokenKind::Binary => 2,
            TokenKind::Octal => 8,
            TokenKind::Hex => 16,
            _ => 10,
        };
        let digits = if radix == 10 { digits } else { &digits[2..] };
        let Ok(magnitude) = i64::from_str_radix(digits, radix) else {
            let message = format!("could not parse `{}` as integer", self.cur.literal);
            self.record_error(Diagnostic::parser(message).with_span(self.cur.span));
            return None;
        };
        let value = if negative { -magnitude } else { magnitude };
        let literal = match self.cur.kind {
            TokenKind::Binary => Literal::Binary(value),
            TokenKind::Octal => Literal::Octal(value),
            TokenKind::Hex => Literal::Hex(value),
            _ => Literal::Integer(value),
        };
        Some(Expr {
            kind: ExprKind::Literal(literal),
            span: self.cur.span,
        })
    }

    fn parse_float(&mut self) -> Option<Expr> {
        let text = self.cur.literal.replace('_', "");
        let Ok(value) = text.parse::<f64>() else {
            let message = format!("could not parse `{}` as float", self.cur.literal);
            self.record_error(Diagnostic::parser(message).with_span(self.cur.span));
            return None;
        };
        Some(Expr {
            kind: ExprKind::Literal(Literal::Float(value)),
            span: self.cur.span,
        })
    }

    fn parse_string(&mut self) -> Option<Expr> {
        let span = self.cur.span;
        let kind = match self.cur.string_form.clone() {
            Some(StringForm::Format {
                pieces,
                interpolations,
            }) => return self.parse_format_string(pieces, interpolations, span),
            Some(StringForm::Multiline) => StringKind::Multiline,
            Some(StringForm::Raw) => StringKind::Raw,
            Some(StringForm::Bytes) => StringKind::Bytes,
            Some(StringForm::Plain) | None => StringKind::Plain,
        };
        Some(Expr {
            kind: ExprKind::Literal(Literal::String {
                value: self.cur.literal.clone(),
                kind,
            }),
            span,
        })
    }

    fn parse_format_string(
        &mut self,
        pieces: Vec<String>,
        interpolations: Vec<(usize, String)>,
        span: SourceSpan,
    ) -> Option<Expr> {
        let mut parts = Vec::with_capacity(interpolations.len());
        let mut failed = false;
        for (slot, text) in interpolations {
            match self.parse_interpolation(&text, span) {
                Some(expr) => parts.push((slot, expr)),
                None => failed = true,
            }
        }
        if failed {
            return None;
        }
        Some(Expr {
            kind: ExprKind::FormatString(FormatString { pieces, parts }),
            span,
        })
    }

    /// Parses one `{...}` of a format string with the same grammar.
    fn parse_interpolation(&mut self, text: &str, span: SourceSpan) -> Option<Expr> {
        let note = format!("in format string interpolation `{{{text}}}`");
        if text.is_empty() {
            self.record_error(
                Diagnostic::parser("empty expression in format string").with_span(span),
            );
            return None;
        }

        let lexer = Lexer::with_options(text, self.registry, self.lexer.options().clone());
        let options = ParserOptions {
            stop_on_first_error: false,
            ..self.options.clone()
        };
        let mut sub = Parser::new(lexer, options);
        let program = match sub.parse_program() {
            Ok(program) => program,
            Err(diagnostic) => {
                self.record_error(diagnostic.with_span(span).with_note(note));
                return None;
            }
        };
        let diagnostics = sub.diagnostics();
        if !diagnostics.is_empty() {
            for diagnostic in diagnostics {
                self.record_error(diagnostic.with_span(span).with_note(note.clone()));
            }
            return None;
        }

        let mut statements = program.statements;
        if statements.len() == 1 {
            if let StmtKind::Expr(expr) = statements.remove(0).kind {
                return Some(expr);
            }
        }
        self.record_error(
            Diagnostic::parser("format string interpolation must be a single expression")
                .with_span(span)
                .with_note(note),
        );
        None
    }

    fn parse_boolean(&mut self) -> Option<Expr> {
        Some(Expr {
            kind: ExprKind::Literal(Literal::Boolean(
                self.cur_is(&TokenKind::Keyword(Keyword::True)),
            )),
            span: self.cur.span,
        })
    }

    fn parse_null(&mut self) -> Option<Expr> {
        Some(Expr {
            kind: ExprKind::Literal(Literal::Null),
            span: self.cur.span,
        })
    }

    fn parse_prefix(&mut self) -> Option<Expr> {
        let start = self.cur.span;
        let op = match self.cur.kind {
            TokenKind::Bang => PrefixOp::Not,
            TokenKind::Minus => PrefixOp::Negate,
            TokenKind::Plus => PrefixOp::Plus,
            _ => PrefixOp::BitNot,
        };
        self.next_token();
        let operand = self.parse_expression(Precedence::Prefix)?;
        Some(Expr {
            kind: ExprKind::Prefix {
                op,
                operand: Box::new(operand),
            },
            span: self.span_from(start),
        })
    }

    fn parse_grouped(&mut self) -> Option<Expr> {
        self.next_token();
        let expr = self.parse_expression(Precedence::Lowest)?;
        if !self.expect_peek(TokenKind::RParen) {
            return None;
        }
        Some(expr)
    }

    /// Comma separated expressions up to `end`; a trailing comma is allowed.
    pub fn parse_expression_list(&mut self, end: TokenKind) -> Option<Vec<Expr>> {
        let mut items = Vec::new();
        if self.peek_is(&end) {
            self.next_token();
            return Some(items);
        }
        self.next_token();
        items.push(self.parse_expression(Precedence::Lowest)?);
        while self.peek_is(&TokenKind::Comma) {
            self.next_token();
            if self.peek_is(&end) {
                break;
            }
            self.next_token();
            items.push(self.parse_expression(Precedence::Lowest)?);
        }
        if !self.expect_peek(end) {
            return None;
        }
        Some(items)
    }

    fn parse_array(&mut self) -> Option<Expr> {
        let start = self.cur.span;
        let items = self.parse_expression_list(TokenKind::RBracket)?;
        Some(Expr {
            kind: ExprKind::Array(items),
            span: self.span_from(start),
        })
    }

    fn parse_hash(&mut self) -> Option<Expr> {
        let start = self.cur.span;
        let mut pairs = Vec::new();
        while !self.peek_is(&TokenKind::RBrace) {
            self.next_token();
            let key = self.parse_expression(Precedence::Lowest)?;
            if !self.expect_peek(TokenKind::Colon) {
                return None;
            }
            self.next_token();
            let value = self.parse_expression(Precedence::Lowest)?;
            pairs.push((key, value));
            if !self.peek_is(&TokenKind::RBrace) && !self.expect_peek(TokenKind::Comma) {
                return None;
            }
        }
        if !self.expect_peek(TokenKind::RBrace) {
            return None;
        }
        Some(Expr {
            kind: ExprKind::Hash(pairs),
            span: self.span_from(start),
        })
    }

    /// `if cond { } else if cond { } elif cond { } else { }`; `cur` is `if` or `elif`.
    fn parse_if(&mut self) -> Option<Expr> {
        let start = self.cur.span;
        self.next_token();
        let condition = self.parse_expression(Precedence::Lowest)?;
        let consequence = self.expect_block()?;

        let alternative = if self.peek_is(&TokenKind::Keyword(Keyword::Elif)) {
            self.next_token();
            Some(vec![self.parse_nested_if()?])
        } else if self.peek_is(&TokenKind::Keyword(Keyword::Else)) {
            self.next_token();
            if self.peek_is(&TokenKind::Keyword(Keyword::If)) {
                self.next_token();
                Some(vec![self.parse_nested_if()?])
            } else {
                Some(self.expect_block()?)
            }
        } else {
            None
        };

        Some(Expr {
            kind: ExprKind::If {
                condition: Box::new(condition),
                consequence,
                alternative,
            },
            span: self.span_from(start),
        })
    }

    fn parse_nested_if(&mut self) -> Option<Stmt> {
        let expr = self.parse_if()?;
        let span = expr.span;
        Some(Stmt {
            kind: StmtKind::Expr(expr),
            span,
        })
    }

    fn parse_function(&mut self) -> Option<Expr> {
        let start = self.cur.span;
        let name = if self.is_name(&self.peek) {
            self.next_token();
            Some(self.cur.literal.clone())
        } else {
            None
        };
        if !self.expect_peek(TokenKind::LParen) {
            return None;
        }
        let params = self.parse_parameters()?;
        if self.peek_is(&TokenKind::ThinArrow) {
            self.next_token();
            self.next_token();
        }
        let body = self.expect_block()?;
        Some(Expr {
            kind: ExprKind::Function { name, params, body },
            span: self.span_from(start),
        })
    }

    fn parse_parameters(&mut self) -> Option<Vec<String>> {
        let mut params = Vec::new();
        if self.peek_is(&TokenKind::RParen) {
            self.next_token();
            return Some(params);
        }
        loop {
            if self.peek_is(&TokenKind::Keyword(Keyword::SelfValue)) {
                self.next_token();
                params.push(self.cur.literal.clone());
            } else {
                params.push(self.expect_identifier()?);
            }
            self.skip_type_annotation();
            if !self.peek_is(&TokenKind::Comma) {
                break;
            }
            self.next_token();
        }
        if !self.expect_peek(TokenKind::RParen) {
            return None;
        }
        Some(params)
    }

    fn parse_self(&mut self) -> Option<Expr> {
        Some(Expr {
            kind: ExprKind::SelfRef,
            span: self.cur.span,
        })
    }

    fn parse_super(&mut self) -> Option<Expr> {
        Some(Expr {
            kind: ExprKind::Super,
            span: self.cur.span,
        })
    }

    fn parse_new(&mut self) -> Option<Expr> {
        let start = self.cur.span;
        self.next_token();
        let class = self.parse_expression(Precedence::Call)?;
        let args = if self.peek_is(&TokenKind::LParen) {
            self.next_token();
            self.parse_expression_list(TokenKind::RParen)?
        } else {
            Vec::new()
        };
        Some(Expr {
            kind: ExprKind::New {
                class: Box::new(class),
                args,
            },
            span: self.span_from(start),
        })
    }

    fn parse_yield(&mut self) -> Option<Expr> {
        let start = self.cur.span;
        let value = if self.ends_statement() || self.peek_is(&TokenKind::RParen) {
            None
        } else {
            self.next_token();
            Some(Box::new(self.parse_expression(Precedence::Yield)?))
        };
        Some(Expr {
            kind: ExprKind::Yield(value),
            span: self.span_from(start),
        })
    }

    fn parse_await(&mut self) -> Option<Expr> {
        let start = self.cur.span;
        self.next_token();
        let value = self.parse_expression(Precedence::Prefix)?;
        Some(Expr {
            kind: ExprKind::Await(Box::new(value)),
            span: self.span_from(start),
        })
    }

    fn parse_infix(&mut self, left: Expr) -> Option<Expr> {
        let Some(op) = infix_op(&self.cur.kind) else {
            let message = format!("{} is not a binary operator", describe(&self.cur));
            self.record_error(Diagnostic::parser(message).with_span(self.cur.span));
            return None;
        };
        let mut precedence = self.registry.precedence(&self.cur.kind);
        if self.registry.associativity(&self.cur.kind) == Associativity::Right {
            precedence = precedence.lower();
        }
        self.next_token();
        let right = self.parse_expression(precedence)?;
        let span = SourceSpan::new(
            left.span.start,
            right.span.end,
            left.span.line,
            left.span.column,
        );
        Some(Expr {
            kind: ExprKind::Infix {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            span,
        })
    }

    fn parse_assignment(&mut self, target: Expr) -> Option<Expr> {
        if !matches!(
            target.kind,
            ExprKind::Identifier(_) | ExprKind::Member { .. } | ExprKind::Index { .. }
        ) {
            self.record_error(
                Diagnostic::parser(format!(
                    "invalid assignment target before {}",
                    describe(&self.cur)
                ))
                .with_span(target.span),
            );
            return None;
        }
        let op = assign_op(&self.cur.kind);
        self.next_token();
        let value = self.parse_expression(Precedence::Assign.lower())?;
        let span = SourceSpan::new(
            target.span.start,
            value.span.end,
            target.span.line,
            target.span.column,
        );
        Some(Expr {
            kind: ExprKind::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
            span,
        })
    }

    fn parse_call(&mut self, callee: Expr) -> Option<Expr> {
        let start = callee.span;
        let args = self.parse_expression_list(TokenKind::RParen)?;
        Some(Expr {
            kind: ExprKind::Call {
                callee: Box::new(callee),
                args,
            },
            span: self.span_from(start),
        })
    }

    fn parse_index(&mut self, target: Expr) -> Option<Expr> {
        let start = target.span;
        self.next_token();
        let index = self.parse_expression(Precedence::Lowest)?;
        if !self.expect_peek(TokenKind::RBracket) {
            return None;
        }
        Some(Expr {
            kind: ExprKind::Index {
                target: Box::new(target),
                index: Box::new(index),
            },
            span: self.span_from(start),
        })
    }

    fn parse_member(&mut self, object: Expr) -> Option<Expr> {
        let start = object.span;
        if !matches!(
            self.peek.kind,
            TokenKind::Identifier | TokenKind::Keyword(_)
        ) {
            let message = format!("expected property name after `.`, got {}", describe(&self.peek));
            self.record_error(Diagnostic::parser(message).with_span(self.peek.span));
            return None;
        }
        self.next_token();
        Some(Expr {
            kind: ExprKind::Member {
                object: Box::new(object),
                property: self.cur.literal.clone(),
            },
            span: self.span_from(start),
        })
    }
}

fn describe(token: &Token) -> String {
    match token.kind {
        TokenKind::Eof => "end of input".to_string(),
        _ if token.literal.is_empty() => token.kind.to_string(),
        _ => format!("`{}`", token.literal),
    }
}

fn infix_op(kind: &TokenKind) -> Option<InfixOp> {
    let op = match kind {
        TokenKind::Plus => InfixOp::Add,
        TokenKind::Minus => InfixOp::Sub,
        TokenKind::Star => InfixOp::Mul,
        TokenKind::Slash => InfixOp::Div,
        TokenKind::FloorDivide => InfixOp::FloorDiv,
        TokenKind::Percent => InfixOp::Mod,
        TokenKind::Power => InfixOp::Pow,
        TokenKind::EqualEqual => InfixOp::Equal,
        TokenKind::BangEqual => InfixOp::NotEqual,
        TokenKind::Less => InfixOp::Less,
        TokenKind::Greater => InfixOp::Greater,
        TokenKind::LessEqual => InfixOp::LessEqual,
        TokenKind::GreaterEqual => InfixOp::GreaterEqual,
        TokenKind::DoubleAmpersand => InfixOp::And,
        TokenKind::DoublePipe => InfixOp::Or,
        TokenKind::NullCoalesce => InfixOp::NullCoalesce,
        TokenKind::Ampersand => InfixOp::BitAnd,
        TokenKind::Pipe => InfixOp::BitOr,
        TokenKind::Caret => InfixOp::BitXor,
        TokenKind::ShiftLeft => InfixOp::ShiftLeft,
        TokenKind::ShiftRight => InfixOp::ShiftRight,
        _ => return None,
    };
    Some(op)
}

fn assign_op(kind: &TokenKind) -> AssignOp {
    let op = match kind {
        TokenKind::ColonAssign => return AssignOp::Declare,
        TokenKind::PlusAssign => InfixOp::Add,
        TokenKind::MinusAssign => InfixOp::Sub,
        TokenKind::StarAssign => InfixOp::Mul,
        TokenKind::SlashAssign => InfixOp::Div,
        TokenKind::PercentAssign => InfixOp::Mod,
        TokenKind::FloorDivideAssign => InfixOp::FloorDiv,
        TokenKind::PowerAssign => InfixOp::Pow,
        TokenKind::AmpersandAssign => InfixOp::BitAnd,
        TokenKind::PipeAssign => InfixOp::BitOr,
        TokenKind::CaretAssign => InfixOp::BitXor,
        TokenKind::ShiftLeftAssign => InfixOp::ShiftLeft,
        TokenKind::ShiftRightAssign => InfixOp::ShiftRight,
        TokenKind::OrAssign => InfixOp::Or,
        TokenKind::AndAssign => InfixOp::And,
        TokenKind::NullCoalesceAssign => InfixOp::NullCoalesce,
        _ => return AssignOp::Assign,
    };
    AssignOp::Compound(op)
}
