//! Grammar tables shared by the lexer and the parser.
//!
//! A [`TokenRegistry`] is built once, either through [`TokenRegistry::default`]
//! or by extending the default grammar with a [`RegistryBuilder`], and is then
//! only read. Lexer and parser borrow the same instance so they always agree on
//! keywords, operators and binding powers.

use std::{fmt, sync::Arc};

use indexmap::{IndexMap, IndexSet};

use crate::token::{Token, TokenCategory, TokenKind, KEYWORDS};

/// Binding power of an operator, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Precedence {
    Lowest = 1,
    Assign,
    Yield,
    Logical,
    Equals,
    LessGreater,
    BitOr,
    BitXor,
    BitAnd,
    Shift,
    Sum,
    Product,
    Prefix,
    Call,
    Index,
}

impl Precedence {
    /// The next weaker binding power; used to parse right-associative operands.
    pub fn lower(self) -> Precedence {
        match self {
            Precedence::Lowest | Precedence::Assign => Precedence::Lowest,
            Precedence::Yield => Precedence::Assign,
            Precedence::Logical => Precedence::Yield,
            Precedence::Equals => Precedence::Logical,
            Precedence::LessGreater => Precedence::Equals,
            Precedence::BitOr => Precedence::LessGreater,
            Precedence::BitXor => Precedence::BitOr,
            Precedence::BitAnd => Precedence::BitXor,
            Precedence::Shift => Precedence::BitAnd,
            Precedence::Sum => Precedence::Shift,
            Precedence::Product => Precedence::Sum,
            Precedence::Prefix => Precedence::Product,
            Precedence::Call => Precedence::Prefix,
            Precedence::Index => Precedence::Call,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Associativity {
    Left,
    Right,
}

pub type TokenTransformer = Arc<dyn Fn(Token) -> Token + Send + Sync>;

/// Description of one operator added through [`RegistryBuilder::operator`].
#[derive(Debug, Clone)]
pub struct OperatorSpec {
    pub text: String,
    pub kind: TokenKind,
    pub precedence: Option<Precedence>,
    pub associativity: Associativity,
    pub assignment: bool,
}

impl OperatorSpec {
    pub fn new(text: impl Into<String>, kind: TokenKind) -> Self {
        Self {
            text: text.into(),
            kind,
            precedence: None,
            associativity: Associativity::Left,
            assignment: false,
        }
    }

    pub fn with_precedence(mut self, precedence: Precedence, associativity: Associativity) -> Self {
        self.precedence = Some(precedence);
        self.associativity = associativity;
        self
    }

    /// Marks the operator as assignment-like (`x <op> value`).
    pub fn assignment(mut self) -> Self {
        self.assignment = true;
        self.precedence = Some(Precedence::Assign);
        self.associativity = Associativity::Right;
        self
    }
}

const MULTI_CHAR_OPERATORS: &[(&str, TokenKind)] = &[
    ("//=", TokenKind::FloorDivideAssign),
    ("<<=", TokenKind::ShiftLeftAssign),
    (">>=", TokenKind::ShiftRightAssign),
    ("**=", TokenKind::PowerAssign),
    ("||=", TokenKind::OrAssign),
    ("&&=", TokenKind::AndAssign),
    ("??=", TokenKind::NullCoalesceAssign),
    ("..=", TokenKind::RangeInclusive),
    ("<=>", TokenKind::Spaceship),
    ("...", TokenKind::Spread),
    ("::", TokenKind::DoubleColon),
    ("##", TokenKind::DoubleHash),
    ("<<", TokenKind::ShiftLeft),
    (">>", TokenKind::ShiftRight),
    ("==", TokenKind::EqualEqual),
    ("!=", TokenKind::BangEqual),
    ("<=", TokenKind::LessEqual),
    (">=", TokenKind::GreaterEqual),
    ("+=", TokenKind::PlusAssign),
    ("-=", TokenKind::MinusAssign),
    ("*=", TokenKind::StarAssign),
    ("/=", TokenKind::SlashAssign),
    ("%=", TokenKind::PercentAssign),
    ("&=", TokenKind::AmpersandAssign),
    ("|=", TokenKind::PipeAssign),
    ("^=", TokenKind::CaretAssign),
    ("//", TokenKind::FloorDivide),
    ("**", TokenKind::Power),
    ("&&", TokenKind::DoubleAmpersand),
    ("||", TokenKind::DoublePipe),
    (":=", TokenKind::ColonAssign),
    ("=>", TokenKind::FatArrow),
    ("->", TokenKind::ThinArrow),
    ("..", TokenKind::Range),
    ("??", TokenKind::NullCoalesce),
    ("?.", TokenKind::QuestionDot),
    ("|>", TokenKind::Pipeline),
    ("?:", TokenKind::Elvis),
];

const SINGLE_CHAR_OPERATORS: &[(char, TokenKind)] = &[
    ('=', TokenKind::Assign),
    ('+', TokenKind::Plus),
    ('-', TokenKind::Minus),
    ('!', TokenKind::Bang),
    ('*', TokenKind::Star),
    ('/', TokenKind::Slash),
    ('%', TokenKind::Percent),
    ('&', TokenKind::Ampersand),
    ('|', TokenKind::Pipe),
    ('^', TokenKind::Caret),
    ('~', TokenKind::Tilde),
    ('<', TokenKind::Less),
    ('>', TokenKind::Greater),
    (',', TokenKind::Comma),
    (';', TokenKind::Semicolon),
    (':', TokenKind::Colon),
    ('.', TokenKind::Dot),
    ('@', TokenKind::At),
    ('#', TokenKind::Hash),
    ('?', TokenKind::Question),
    ('(', TokenKind::LParen),
    (')', TokenKind::RParen),
    ('{', TokenKind::LBrace),
    ('}', TokenKind::RBrace),
    ('[', TokenKind::LBracket),
    (']', TokenKind::RBracket),
];

const ASSIGNMENT_KINDS: &[TokenKind] = &[
    TokenKind::Assign,
    TokenKind::PlusAssign,
    TokenKind::MinusAssign,
    TokenKind::StarAssign,
    TokenKind::SlashAssign,
    TokenKind::PercentAssign,
    TokenKind::FloorDivideAssign,
    TokenKind::PowerAssign,
    TokenKind::AmpersandAssign,
    TokenKind::PipeAssign,
    TokenKind::CaretAssign,
    TokenKind::ShiftLeftAssign,
    TokenKind::ShiftRightAssign,
    TokenKind::OrAssign,
    TokenKind::AndAssign,
    TokenKind::NullCoalesceAssign,
    TokenKind::ColonAssign,
];

const SOFT_KEYWORDS: &[&str] = &["async", "await", "match", "trait", "macro"];

/// Keyword, operator and precedence tables for one grammar.
#[derive(Clone)]
pub struct TokenRegistry {
    keywords: IndexMap<String, TokenKind>,
    multi_char: Vec<(String, TokenKind)>,
    single_char: IndexMap<char, TokenKind>,
    assignment: IndexSet<TokenKind>,
    contextual: IndexMap<String, TokenKind>,
    precedence: IndexMap<TokenKind, Precedence>,
    associativity: IndexMap<TokenKind, Associativity>,
    soft_keywords: IndexSet<String>,
    categories: IndexMap<TokenKind, TokenCategory>,
    transformers: Vec<TokenTransformer>,
}

impl TokenRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            registry: TokenRegistry::default(),
        }
    }

    /// Keyword kind for `text`, checking contextual keywords after the fixed table.
    pub fn keyword(&self, text: &str) -> Option<&TokenKind> {
        self.keywords
            .get(text)
            .or_else(|| self.contextual.get(text))
    }

    pub fn is_soft_keyword(&self, text: &str) -> bool {
        self.soft_keywords.contains(text)
    }

    /// Multi-character operators, longest first.
    pub fn multi_char_operators(&self) -> &[(String, TokenKind)] {
        &self.multi_char
    }

    pub fn single_char(&self, ch: char) -> Option<&TokenKind> {
        self.single_char.get(&ch)
    }

    pub fn is_assignment(&self, kind: &TokenKind) -> bool {
        self.assignment.contains(kind)
    }

    pub fn assignment_kinds(&self) -> impl Iterator<Item = &TokenKind> {
        self.assignment.iter()
    }

    pub fn precedence(&self, kind: &TokenKind) -> Precedence {
        self.precedence
            .get(kind)
            .copied()
            .unwrap_or(Precedence::Lowest)
    }

    pub fn associativity(&self, kind: &TokenKind) -> Associativity {
        self.associativity
            .get(kind)
            .copied()
            .unwrap_or(Associativity::Left)
    }

    pub fn category(&self, kind: &TokenKind) -> Option<&TokenCategory> {
        self.categories.get(kind)
    }

    /// Runs every registered transformer over `token`, in registration order.
    pub fn transform(&self, token: Token) -> Token {
        self.transformers
            .iter()
            .fold(token, |token, transformer| transformer(token))
    }

    fn sort_operators(&mut self) {
        self.multi_char
            .sort_by(|(a, _), (b, _)| b.chars().count().cmp(&a.chars().count()));
    }
}

impl Default for TokenRegistry {
    fn default() -> Self {
        let keywords: IndexMap<String, TokenKind> = KEYWORDS
            .iter()
            .map(|(text, keyword)| (text.to_string(), TokenKind::Keyword(*keyword)))
            .collect();

        let mut precedence = IndexMap::new();
        let mut associativity = IndexMap::new();
        for kind in ASSIGNMENT_KINDS {
            precedence.insert(kind.clone(), Precedence::Assign);
            associativity.insert(kind.clone(), Associativity::Right);
        }
        let levels = [
            (TokenKind::DoublePipe, Precedence::Logical),
            (TokenKind::DoubleAmpersand, Precedence::Logical),
            (TokenKind::NullCoalesce, Precedence::Logical),
            (TokenKind::EqualEqual, Precedence::Equals),
            (TokenKind::BangEqual, Precedence::Equals),
            (TokenKind::Less, Precedence::LessGreater),
            (TokenKind::Greater, Precedence::LessGreater),
            (TokenKind::LessEqual, Precedence::LessGreater),
            (TokenKind::GreaterEqual, Precedence::LessGreater),
            (TokenKind::Pipe, Precedence::BitOr),
            (TokenKind::Caret, Precedence::BitXor),
            (TokenKind::Ampersand, Precedence::BitAnd),
            (TokenKind::ShiftLeft, Precedence::Shift),
            (TokenKind::ShiftRight, Precedence::Shift),
            (TokenKind::Plus, Precedence::Sum),
            (TokenKind::Minus, Precedence::Sum),
            (TokenKind::Star, Precedence::Product),
            (TokenKind::Slash, Precedence::Product),
            (TokenKind::Percent, Precedence::Product),
            (TokenKind::FloorDivide, Precedence::Product),
            (TokenKind::Power, Precedence::Prefix),
            (TokenKind::Dot, Precedence::Call),
            (TokenKind::LParen, Precedence::Call),
            (TokenKind::LBracket, Precedence::Index),
        ];
        for (kind, level) in levels {
            precedence.insert(kind, level);
        }
        associativity.insert(TokenKind::Power, Associativity::Right);

        let mut categories = IndexMap::new();
        for kind in keywords.values() {
            categories.insert(kind.clone(), TokenCategory::Keyword);
        }
        for kind in [
            TokenKind::Int,
            TokenKind::Float,
            TokenKind::String,
            TokenKind::Binary,
            TokenKind::Octal,
            TokenKind::Hex,
        ] {
            categories.insert(kind, TokenCategory::Literal);
        }
        for (_, kind) in MULTI_CHAR_OPERATORS {
            categories.insert(kind.clone(), TokenCategory::Operator);
        }
        for (ch, kind) in SINGLE_CHAR_OPERATORS {
            let category = match ch {
                '(' | ')' | '{' | '}' | '[' | ']' => TokenCategory::Delimiter,
                ',' | ';' | ':' | '.' => TokenCategory::Punctuation,
                _ => TokenCategory::Operator,
            };
            categories.insert(kind.clone(), category);
        }

        let mut registry = Self {
            keywords,
            multi_char: MULTI_CHAR_OPERATORS
                .iter()
                .map(|(text, kind)| (text.to_string(), kind.clone()))
                .collect(),
            single_char: SINGLE_CHAR_OPERATORS.iter().cloned().collect(),
            assignment: ASSIGNMENT_KINDS.iter().cloned().collect(),
            contextual: IndexMap::new(),
            precedence,
            associativity,
            soft_keywords: SOFT_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            categories,
            transformers: Vec::new(),
        };
        registry.sort_operators();
        registry
    }
}

impl fmt::Debug for TokenRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRegistry")
            .field("keywords", &self.keywords.len())
            .field("multi_char", &self.multi_char.len())
            .field("single_char", &self.single_char.len())
            .field("contextual", &self.contextual.len())
            .field("soft_keywords", &self.soft_keywords)
            .field("transformers", &self.transformers.len())
            .finish()
    }
}

/// Extends the default grammar; the result is frozen by [`RegistryBuilder::build`].
pub struct RegistryBuilder {
    registry: TokenRegistry,
}

impl RegistryBuilder {
    pub fn keyword(mut self, text: impl Into<String>, kind: TokenKind) -> Self {
        self.registry
            .categories
            .insert(kind.clone(), TokenCategory::Keyword);
        self.registry.keywords.insert(text.into(), kind);
        self
    }

    pub fn contextual_keyword(mut self, text: impl Into<String>, kind: TokenKind) -> Self {
        self.registry.contextual.insert(text.into(), kind);
        self
    }

    pub fn soft_keyword(mut self, text: impl Into<String>) -> Self {
        self.registry.soft_keywords.insert(text.into());
        self
    }

    /// Adds an operator. Operators longer than one character join the
    /// longest-match table, which is kept sorted.
    pub fn operator(mut self, spec: OperatorSpec) -> Self {
        let mut chars = spec.text.chars();
        match (chars.next(), chars.next()) {
            (Some(ch), None) => {
                self.registry.single_char.insert(ch, spec.kind.clone());
            }
            _ => {
                self.registry
                    .multi_char
                    .retain(|(text, _)| *text != spec.text);
                self.registry
                    .multi_char
                    .push((spec.text.clone(), spec.kind.clone()));
                self.registry.sort_operators();
            }
        }
        if spec.assignment {
            self.registry.assignment.insert(spec.kind.clone());
        }
        if let Some(level) = spec.precedence {
            self.registry.precedence.insert(spec.kind.clone(), level);
            self.registry
                .associativity
                .insert(spec.kind.clone(), spec.associativity);
        }
        self.registry
            .categories
            .entry(spec.kind)
            .or_insert(TokenCategory::Operator);
        self
    }

    pub fn precedence(
        mut self,
        kind: TokenKind,
        precedence: Precedence,
        associativity: Associativity,
    ) -> Self {
        self.registry.precedence.insert(kind.clone(), precedence);
        self.registry.associativity.insert(kind, associativity);
        self
    }

    pub fn category(mut self, kind: TokenKind, category: TokenCategory) -> Self {
        self.registry.categories.insert(kind, category);
        self
    }

    pub fn transformer<F>(mut self, transformer: F) -> Self
    where
        F: Fn(Token) -> Token + Send + Sync + 'static,
    {
        self.registry.transformers.push(Arc::new(transformer));
        self
    }

    pub fn build(self) -> TokenRegistry {
        self.registry
    }
}

