use std::sync::Arc;

use tracing::warn;

use crate::{
    diagnostics::{Diagnostic, SourceSpan},
    registry::TokenRegistry,
    token::{Keyword, StringForm, Token, TokenKind},
};

/// Knobs controlling which lexical forms are accepted.
#[derive(Debug, Clone)]
pub struct LexerOptions {
    pub allow_hash_comments: bool,
    pub allow_cpp_line_comments: bool,
    pub allow_c_block_comments: bool,
    pub max_token_length: usize,
    pub allow_multiline_strings: bool,
    pub allow_format_strings: bool,
    pub allow_raw_strings: bool,
    pub allow_byte_strings: bool,
    pub allow_unicode_identifiers: bool,
    pub recover_from_errors: bool,
    pub max_consecutive_errors: usize,
    pub track_trivia: bool,
    pub source_file: Option<String>,
}

impl Default for LexerOptions {
    fn default() -> Self {
        Self {
            allow_hash_comments: true,
            allow_cpp_line_comments: false,
            allow_c_block_comments: true,
            max_token_length: 1_000_000,
            allow_multiline_strings: true,
            allow_format_strings: true,
            allow_raw_strings: true,
            allow_byte_strings: true,
            allow_unicode_identifiers: true,
            recover_from_errors: true,
            max_consecutive_errors: 1000,
            track_trivia: false,
            source_file: None,
        }
    }
}

/// Position snapshot used for speculative lexing.
#[derive(Debug, Clone)]
pub struct LexerState {
    pos: usize,
    line: usize,
    column: usize,
    prev_kind: Option<TokenKind>,
    consecutive_errors: usize,
    scope_depth: u32,
    finished: bool,
}

pub type TokenHook<'a> = Box<dyn Fn(Token) -> Token + 'a>;

pub struct Lexer<'a> {
    source: &'a str,
    registry: &'a TokenRegistry,
    options: LexerOptions,
    source_file: Option<Arc<str>>,
    pos: usize,
    line: usize,
    column: usize,
    prev_kind: Option<TokenKind>,
    errors: Vec<Diagnostic>,
    consecutive_errors: usize,
    scope_depth: u32,
    hooks: Vec<TokenHook<'a>>,
    pending_error: Option<String>,
    finished: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, registry: &'a TokenRegistry) -> Self {
        Self::with_options(source, registry, LexerOptions::default())
    }

    pub fn with_options(source: &'a str, registry: &'a TokenRegistry, options: LexerOptions) -> Self {
        let source_file = options.source_file.as_deref().map(Arc::from);
        Self {
            source,
            registry,
            options,
            source_file,
            pos: 0,
            line: 1,
            column: 1,
            prev_kind: None,
            errors: Vec::new(),
            consecutive_errors: 0,
            scope_depth: 0,
            hooks: Vec::new(),
            pending_error: None,
            finished: false,
        }
    }

    pub fn registry(&self) -> &'a TokenRegistry {
        self.registry
    }

    pub fn options(&self) -> &LexerOptions {
        &self.options
    }

    /// Recoverable errors recorded so far.
    pub fn errors(&self) -> &[Diagnostic] {
        &self.errors
    }

    /// Adds a hook that sees every token after the registry transformers.
    pub fn add_token_hook<F>(&mut self, hook: F)
    where
        F: Fn(Token) -> Token + 'a,
    {
        self.hooks.push(Box::new(hook));
    }

    pub fn save_state(&self) -> LexerState {
        LexerState {
            pos: self.pos,
            line: self.line,
            column: self.column,
            prev_kind: self.prev_kind.clone(),
            consecutive_errors: self.consecutive_errors,
            scope_depth: self.scope_depth,
            finished: self.finished,
        }
    }

    pub fn restore_state(&mut self, state: LexerState) {
        self.pos = state.pos;
        self.line = state.line;
        self.column = state.column;
        self.prev_kind = state.prev_kind;
        self.consecutive_errors = state.consecutive_errors;
        self.scope_depth = state.scope_depth;
        self.finished = state.finished;
    }

    /// One-shot iterator over the remaining tokens, ending after EOF.
    pub fn tokens(&mut self) -> Tokens<'_, 'a> {
        Tokens {
            lexer: self,
            done: false,
        }
    }

    /// Produces the next token. Once the input is exhausted every call returns EOF.
    ///
    /// Errors only when recovery is disabled or the consecutive-error ceiling
    /// is reached.
    pub fn next_token(&mut self) -> Result<Token, Diagnostic> {
        let trivia = self.skip_trivia();
        let start = self.pos;
        let (line, column) = (self.line, self.column);

        let Some(ch) = self.peek() else {
            self.finished = true;
            let token = Token::new(TokenKind::Eof, "", SourceSpan::new(start, start, line, column));
            return Ok(self.finish_token(token, trivia));
        };

        let (kind, literal, form) = if let Some(scanned) = self.scan_string(ch) {
            scanned
        } else if ch.is_ascii_digit() || (self.sign_allowed() && self.signed_number_ahead(ch)) {
            let (kind, literal) = self.scan_number();
            (kind, literal, None)
        } else if self.is_identifier_start(ch) {
            let (kind, literal) = self.scan_identifier();
            (kind, literal, None)
        } else {
            let (kind, literal) = self.scan_operator();
            (kind, literal, None)
        };

        let span = SourceSpan::new(start, self.pos, line, column);
        let kind = if kind != TokenKind::Illegal && literal.chars().count() > self.options.max_token_length {
            self.pending_error = Some(format!(
                "token exceeds maximum length of {}",
                self.options.max_token_length
            ));
            TokenKind::Illegal
        } else {
            kind
        };
        if kind == TokenKind::Illegal {
            let message = self
                .pending_error
                .take()
                .unwrap_or_else(|| format!("illegal character `{literal}`"));
            self.record_error(message, span)?;
        }

        let mut token = Token::new(kind, literal, span);
        token.string_form = form;
        Ok(self.finish_token(token, trivia))
    }

    fn finish_token(&mut self, mut token: Token, trivia: Option<String>) -> Token {
        if token.kind == TokenKind::RBrace {
            self.scope_depth = self.scope_depth.saturating_sub(1);
        }
        token.scope_depth = self.scope_depth;
        if token.kind == TokenKind::LBrace {
            self.scope_depth += 1;
        }
        token.source_file = self.source_file.clone();
        token.leading_trivia = trivia;
        if token.kind != TokenKind::Illegal {
            self.consecutive_errors = 0;
        }

        let token = self.registry.transform(token);
        let token = self.hooks.iter().fold(token, |token, hook| hook(token));
        self.prev_kind = Some(token.kind.clone());
        token
    }

    fn record_error(&mut self, message: String, span: SourceSpan) -> Result<(), Diagnostic> {
        let diagnostic = Diagnostic::lexer(message).with_span(span);
        self.errors.push(diagnostic.clone());
        self.consecutive_errors += 1;
        if self.consecutive_errors >= self.options.max_consecutive_errors {
            warn!(
                errors = self.consecutive_errors,
                line = span.line,
                "lexer error ceiling reached"
            );
            return Err(Diagnostic::lexer(format!(
                "too many consecutive lexical errors ({})",
                self.consecutive_errors
            ))
            .with_span(span));
        }
        if !self.options.recover_from_errors {
            return Err(diagnostic);
        }
        Ok(())
    }

    fn rest(&self) -> &'a str {
        &self.source[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn bump_str(&mut self, text: &str) {
        for _ in text.chars() {
            self.bump();
        }
    }

    fn skip_trivia(&mut self) -> Option<String> {
        let start = self.pos;
        loop {
            match self.peek() {
                Some(ch) if ch.is_whitespace() => {
                    self.bump();
                }
                Some('#') if self.options.allow_hash_comments => self.skip_line(),
                Some('/') if self.options.allow_cpp_line_comments && self.peek_nth(1) == Some('/') => {
                    self.skip_line()
                }
                Some('/') if self.options.allow_c_block_comments && self.peek_nth(1) == Some('*') => {
                    self.skip_block_comment()
                }
                _ => break,
            }
        }
        if self.options.track_trivia && self.pos > start {
            Some(self.source[start..self.pos].to_string())
        } else {
            None
        }
    }

    fn skip_line(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn skip_block_comment(&mut self) {
        self.bump_str("/*");
        let mut depth = 1usize;
        while depth > 0 {
            match (self.peek(), self.peek_nth(1)) {
                (Some('/'), Some('*')) => {
                    self.bump_str("/*");
                    depth += 1;
                }
                (Some('*'), Some('/')) => {
                    self.bump_str("*/");
                    depth -= 1;
                }
                (Some(_), _) => {
                    self.bump();
                }
                (None, _) => break,
            }
        }
    }

    fn is_identifier_start(&self, ch: char) -> bool {
        if self.options.allow_unicode_identifiers {
            ch == '_' || ch.is_alphabetic()
        } else {
            ch == '_' || ch.is_ascii_alphabetic()
        }
    }

    fn is_identifier_continue(&self, ch: char) -> bool {
        if self.options.allow_unicode_identifiers {
            ch == '_' || ch.is_alphanumeric()
        } else {
            ch == '_' || ch.is_ascii_alphanumeric()
        }
    }

    fn scan_identifier(&mut self) -> (TokenKind, String) {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if !self.is_identifier_continue(ch) {
                break;
            }
            self.bump();
        }
        let text = &self.source[start..self.pos];
        let kind = self
            .registry
            .keyword(text)
            .cloned()
            .unwrap_or(TokenKind::Identifier);
        (kind, text.to_string())
    }

    /// A leading sign is part of a number only where a binary operator cannot
    /// appear, so `a - 1` stays a subtraction.
    fn sign_allowed(&self) -> bool {
        match &self.prev_kind {
            None => true,
            Some(kind) => matches!(
                kind,
                TokenKind::Assign
                    | TokenKind::Plus
                    | TokenKind::Minus
                    | TokenKind::Star
                    | TokenKind::Slash
                    | TokenKind::Percent
                    | TokenKind::FloorDivide
                    | TokenKind::LParen
                    | TokenKind::LBracket
                    | TokenKind::Comma
                    | TokenKind::Colon
                    | TokenKind::Semicolon
                    | TokenKind::Keyword(Keyword::Return)
                    | TokenKind::Keyword(Keyword::Let)
            ),
        }
    }

    fn signed_number_ahead(&self, ch: char) -> bool {
        matches!(ch, '+' | '-') && self.peek_nth(1).is_some_and(|next| next.is_ascii_digit())
    }

    fn scan_number(&mut self) -> (TokenKind, String) {
        let start = self.pos;
        if matches!(self.peek(), Some('+' | '-')) {
            self.bump();
        }

        if self.peek() == Some('0') {
            let radix = match self.peek_nth(1) {
                Some('b' | 'B') => Some((TokenKind::Binary, 2)),
                Some('o' | 'O') => Some((TokenKind::Octal, 8)),
                Some('x' | 'X') => Some((TokenKind::Hex, 16)),
                _ => None,
            };
            if let Some((kind, radix)) = radix {
                if self.peek_nth(2).is_some_and(|ch| ch.is_digit(radix)) {
                    self.bump();
                    self.bump();
                    while let Some(ch) = self.peek() {
                        if !(ch.is_digit(radix) || ch == '_') {
                            break;
                        }
                        self.bump();
                    }
                    return (kind, self.source[start..self.pos].to_string());
                }
            }
        }

        let mut kind = TokenKind::Int;
        let mut seen_dot = false;
        let mut seen_exponent = false;
        while let Some(ch) = self.peek() {
            match ch {
                '0'..='9' | '_' => {
                    self.bump();
                }
                '.' if !seen_dot
                    && !seen_exponent
                    && self.peek_nth(1).is_some_and(|next| next.is_ascii_digit()) =>
                {
                    seen_dot = true;
                    kind = TokenKind::Float;
                    self.bump();
                }
                'e' | 'E' if !seen_exponent && self.exponent_ahead() => {
                    seen_exponent = true;
                    kind = TokenKind::Float;
                    self.bump();
                    if matches!(self.peek(), Some('+' | '-')) {
                        self.bump();
                    }
                }
                _ => break,
            }
        }
        (kind, self.source[start..self.pos].to_string())
    }

    fn exponent_ahead(&self) -> bool {
        match self.peek_nth(1) {
            Some(ch) if ch.is_ascii_digit() => true,
            Some('+' | '-') => self.peek_nth(2).is_some_and(|ch| ch.is_ascii_digit()),
            _ => false,
        }
    }

    fn scan_operator(&mut self) -> (TokenKind, String) {
        let rest = self.rest();
        let registry = self.registry;
        if let Some((text, kind)) = registry
            .multi_char_operators()
            .iter()
            .find(|(text, _)| rest.starts_with(text.as_str()))
        {
            self.bump_str(text);
            return (kind.clone(), text.clone());
        }
        let ch = self.bump().unwrap_or('\0');
        match registry.single_char(ch) {
            Some(kind) => (kind.clone(), ch.to_string()),
            None => (TokenKind::Illegal, ch.to_string()),
        }
    }

    /// Recognizes every string flavor starting at `ch`; `None` if `ch` does not
    /// open a string.
    fn scan_string(&mut self, ch: char) -> Option<(TokenKind, String, Option<StringForm>)> {
        let next = self.peek_nth(1);
        let opens = |c: Option<char>| matches!(c, Some('"' | '\''));
        match ch {
            '"' | '\'' => {
                let triple = self.peek_nth(1) == Some(ch) && self.peek_nth(2) == Some(ch);
                if triple && self.options.allow_multiline_strings {
                    Some(self.scan_multiline(ch))
                } else {
                    Some(self.scan_plain(ch))
                }
            }
            'f' | 'F' if opens(next) && self.options.allow_format_strings => {
                self.bump();
                Some(self.scan_format(next.unwrap_or('"')))
            }
            'r' | 'R' if opens(next) && self.options.allow_raw_strings => {
                self.bump();
                Some(self.scan_raw(next.unwrap_or('"'), StringForm::Raw))
            }
            'b' | 'B' if opens(next) && self.options.allow_byte_strings => {
                self.bump();
                Some(self.scan_raw(next.unwrap_or('"'), StringForm::Bytes))
            }
            _ => None,
        }
    }

    fn unterminated(&mut self, start: usize, what: &str) -> (TokenKind, String, Option<StringForm>) {
        self.pending_error = Some(format!("unterminated {what}"));
        (TokenKind::Illegal, self.source[start..self.pos].to_string(), None)
    }

    fn scan_escape(&mut self, value: &mut String) {
        match self.bump() {
            Some('n') => value.push('\n'),
            Some('t') => value.push('\t'),
            Some('r') => value.push('\r'),
            Some('0') => value.push('\0'),
            Some('\\') => value.push('\\'),
            Some('"') => value.push('"'),
            Some('\'') => value.push('\''),
            Some(other) => {
                value.push('\\');
                value.push(other);
            }
            None => value.push('\\'),
        }
    }

    fn scan_plain(&mut self, quote: char) -> (TokenKind, String, Option<StringForm>) {
        let start = self.pos;
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                None => return self.unterminated(start, "string literal"),
                Some(ch) if ch == quote => break,
                Some('\\') => self.scan_escape(&mut value),
                Some(ch) => value.push(ch),
            }
        }
        (TokenKind::String, value, Some(StringForm::Plain))
    }

    fn scan_multiline(&mut self, quote: char) -> (TokenKind, String, Option<StringForm>) {
        let start = self.pos;
        let delimiter: String = std::iter::repeat(quote).take(3).collect();
        self.bump_str(&delimiter);
        let body_start = self.pos;
        match self.rest().find(delimiter.as_str()) {
            Some(offset) => {
                let value = self.source[body_start..body_start + offset].to_string();
                self.bump_str(&value);
                self.bump_str(&delimiter);
                (TokenKind::String, value, Some(StringForm::Multiline))
            }
            None => {
                let rest = self.rest();
                self.bump_str(rest);
                self.unterminated(start, "multiline string")
            }
        }
    }

    fn scan_raw(&mut self, quote: char, form: StringForm) -> (TokenKind, String, Option<StringForm>) {
        let start = self.pos - 1;
        self.bump();
        let body_start = self.pos;
        match self.rest().find(quote) {
            Some(offset) => {
                let value = self.source[body_start..body_start + offset].to_string();
                self.bump_str(&value);
                self.bump();
                (TokenKind::String, value, Some(form))
            }
            None => {
                let rest = self.rest();
                self.bump_str(rest);
                self.unterminated(start, "raw string literal")
            }
        }
    }

    /// Splits `f"a{x}b"` into literal pieces and `(slot, expression)` pairs.
    /// The token literal is the template with `{}` placeholders.
    fn scan_format(&mut self, quote: char) -> (TokenKind, String, Option<StringForm>) {
        let start = self.pos - 1;
        self.bump();
        let mut pieces = vec![String::new()];
        let mut interpolations = Vec::new();
        let mut template = String::new();
        loop {
            match self.bump() {
                None => return self.unterminated(start, "format string"),
                Some(ch) if ch == quote => break,
                Some('\\') => {
                    let mut escaped = String::new();
                    self.scan_escape(&mut escaped);
                    template.push_str(&escaped);
                    if let Some(piece) = pieces.last_mut() {
                        piece.push_str(&escaped);
                    }
                }
                Some('{') if self.peek() == Some('{') => {
                    self.bump();
                    template.push_str("{{");
                    if let Some(piece) = pieces.last_mut() {
                        piece.push('{');
                    }
                }
                Some('}') if self.peek() == Some('}') => {
                    self.bump();
                    template.push_str("}}");
                    if let Some(piece) = pieces.last_mut() {
                        piece.push('}');
                    }
                }
                Some('{') => {
                    let mut depth = 1usize;
                    let mut expr = String::new();
                    loop {
                        match self.peek() {
                            None => return self.unterminated(start, "format string"),
                            Some(ch) if ch == quote => {
                                return self.unterminated(start, "format interpolation")
                            }
                            Some('{') => depth += 1,
                            Some('}') => {
                                depth -= 1;
                                if depth == 0 {
                                    self.bump();
                                    break;
                                }
                            }
                            Some(_) => {}
                        }
                        if let Some(ch) = self.bump() {
                            expr.push(ch);
                        }
                    }
                    interpolations.push((pieces.len() - 1, expr.trim().to_string()));
                    pieces.push(String::new());
                    template.push_str("{}");
                }
                Some(ch) => {
                    template.push(ch);
                    if let Some(piece) = pieces.last_mut() {
                        piece.push(ch);
                    }
                }
            }
        }
        (
            TokenKind::String,
            template,
            Some(StringForm::Format {
                pieces,
                interpolations,
            }),
        )
    }
}

pub struct Tokens<'l, 'a> {
    lexer: &'l mut Lexer<'a>,
    done: bool,
}

impl Iterator for Tokens<'_, '_> {
    type Item = Result<Token, Diagnostic>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let result = self.lexer.next_token();
        match &result {
            Ok(token) if token.kind == TokenKind::Eof => self.done = true,
            Err(_) => self.done = true,
            Ok(_) => {}
        }
        Some(result)
    }
}

/// Lexes `source` to completion. The returned vector always ends with EOF.
pub fn tokenize(
    source: &str,
    registry: Option<&TokenRegistry>,
    options: Option<LexerOptions>,
) -> Result<Vec<Token>, Diagnostic> {
    let default_registry;
    let registry = match registry {
        Some(registry) => registry,
        None => {
            default_registry = TokenRegistry::default();
            &default_registry
        }
    };
    let mut lexer = Lexer::with_options(source, registry, options.unwrap_or_default());
    lexer.tokens().collect()
}
