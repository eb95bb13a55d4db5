use std::{fmt, sync::Arc};

use indexmap::IndexMap;

use crate::diagnostics::SourceSpan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Fn,
    Let,
    Mut,
    Const,
    Var,
    True,
    False,
    If,
    Else,
    Elif,
    Return,
    While,
    For,
    In,
    Break,
    Continue,
    Print,
    Class,
    Struct,
    Trait,
    Interface,
    Impl,
    Enum,
    Super,
    SelfValue,
    New,
    Extends,
    Implements,
    Import,
    Use,
    From,
    As,
    Export,
    Pub,
    Priv,
    Mod,
    Namespace,
    Package,
    Try,
    Catch,
    Except,
    Finally,
    Raise,
    Throw,
    Assert,
    With,
    Yield,
    Async,
    Await,
    Spawn,
    Channel,
    Select,
    Lock,
    Actor,
    Match,
    Case,
    When,
    Where,
    Loop,
    Do,
    Goto,
    Defer,
    Type,
    Typeof,
    Instanceof,
    Is,
    Static,
    Dynamic,
    Any,
    Void,
    Never,
    Pass,
    Null,
    None,
    Undefined,
    Macro,
    Inline,
    Unsafe,
    Extern,
    Ref,
    Move,
    Copy,
    Sizeof,
    Alignof,
    Global,
    StaticAssert,
    Comptime,
}

/// Source spelling of every built-in keyword.
pub const KEYWORDS: &[(&str, Keyword)] = &[
    ("fn", Keyword::Fn),
    ("let", Keyword::Let),
    ("mut", Keyword::Mut),
    ("const", Keyword::Const),
    ("var", Keyword::Var),
    ("true", Keyword::True),
    ("false", Keyword::False),
    ("if", Keyword::If),
    ("else", Keyword::Else),
    ("elif", Keyword::Elif),
    ("return", Keyword::Return),
    ("while", Keyword::While),
    ("for", Keyword::For),
    ("in", Keyword::In),
    ("break", Keyword::Break),
    ("continue", Keyword::Continue),
    ("print", Keyword::Print),
    ("class", Keyword::Class),
    ("struct", Keyword::Struct),
    ("trait", Keyword::Trait),
    ("interface", Keyword::Interface),
    ("impl", Keyword::Impl),
    ("enum", Keyword::Enum),
    ("super", Keyword::Super),
    ("self", Keyword::SelfValue),
    ("new", Keyword::New),
    ("extends", Keyword::Extends),
    ("implements", Keyword::Implements),
    ("import", Keyword::Import),
    ("use", Keyword::Use),
    ("from", Keyword::From),
    ("as", Keyword::As),
    ("export", Keyword::Export),
    ("pub", Keyword::Pub),
    ("priv", Keyword::Priv),
    ("mod", Keyword::Mod),
    ("namespace", Keyword::Namespace),
    ("package", Keyword::Package),
    ("try", Keyword::Try),
    ("catch", Keyword::Catch),
    ("except", Keyword::Except),
    ("finally", Keyword::Finally),
    ("raise", Keyword::Raise),
    ("throw", Keyword::Throw),
    ("assert", Keyword::Assert),
    ("with", Keyword::With),
    ("yield", Keyword::Yield),
    ("async", Keyword::Async),
    ("await", Keyword::Await),
    ("spawn", Keyword::Spawn),
    ("channel", Keyword::Channel),
    ("select", Keyword::Select),
    ("lock", Keyword::Lock),
    ("actor", Keyword::Actor),
    ("match", Keyword::Match),
    ("case", Keyword::Case),
    ("when", Keyword::When),
    ("where", Keyword::Where),
    ("loop", Keyword::Loop),
    ("do", Keyword::Do),
    ("goto", Keyword::Goto),
    ("defer", Keyword::Defer),
    ("type", Keyword::Type),
    ("typeof", Keyword::Typeof),
    ("instanceof", Keyword::Instanceof),
    ("is", Keyword::Is),
    ("static", Keyword::Static),
    ("dynamic", Keyword::Dynamic),
    ("any", Keyword::Any),
    ("void", Keyword::Void),
    ("never", Keyword::Never),
    ("pass", Keyword::Pass),
    ("null", Keyword::Null),
    ("none", Keyword::None),
    ("undefined", Keyword::Undefined),
    ("macro", Keyword::Macro),
    ("inline", Keyword::Inline),
    ("unsafe", Keyword::Unsafe),
    ("extern", Keyword::Extern),
    ("ref", Keyword::Ref),
    ("move", Keyword::Move),
    ("copy", Keyword::Copy),
    ("sizeof", Keyword::Sizeof),
    ("alignof", Keyword::Alignof),
    ("global", Keyword::Global),
    ("static_assert", Keyword::StaticAssert),
    ("comptime", Keyword::Comptime),
];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Illegal,
    Eof,

    Identifier,
    Int,
    Float,
    String,
    Binary,
    Octal,
    Hex,
    Keyword(Keyword),

    Assign,
    Plus,
    Minus,
    Bang,
    Star,
    Slash,
    Power,
    Percent,
    FloorDivide,
    Ampersand,
    Pipe,
    Caret,
    Tilde,
    ShiftLeft,
    ShiftRight,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    FloorDivideAssign,
    PowerAssign,
    AmpersandAssign,
    PipeAssign,
    CaretAssign,
    ShiftLeftAssign,
    ShiftRightAssign,
    OrAssign,
    AndAssign,
    NullCoalesceAssign,
    ColonAssign,
    DoubleAmpersand,
    DoublePipe,
    FatArrow,
    ThinArrow,

    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    EqualEqual,
    BangEqual,

    Comma,
    Semicolon,
    Colon,
    Dot,
    At,
    Hash,
    Question,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,

    QuestionDot,
    NullCoalesce,
    Range,
    RangeInclusive,
    Spread,
    Pipeline,
    Spaceship,
    Elvis,
    DoubleColon,
    DoubleHash,

    /// Kind introduced through a registry extension.
    Custom(String),
}

impl TokenKind {
    pub fn is_keyword(&self, keyword: Keyword) -> bool {
        matches!(self, TokenKind::Keyword(k) if *k == keyword)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Keyword(keyword) => {
                let text = KEYWORDS
                    .iter()
                    .find(|(_, k)| k == keyword)
                    .map(|(text, _)| *text)
                    .unwrap_or("?");
                write!(f, "keyword `{text}`")
            }
            TokenKind::Custom(name) => write!(f, "{name}"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Flavor of a string literal as written in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StringForm {
    Plain,
    Multiline,
    Raw,
    Bytes,
    /// `pieces` are the literal runs; each interpolation is `(slot, expression text)`
    /// and renders right after `pieces[slot]`.
    Format {
        pieces: Vec<String>,
        interpolations: Vec<(usize, String)>,
    },
}

/// Semantic grouping of token kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TokenCategory {
    Keyword,
    Operator,
    Literal,
    Delimiter,
    Punctuation,
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub literal: String,
    pub span: SourceSpan,
    pub source_file: Option<Arc<str>>,
    pub leading_trivia: Option<String>,
    pub trailing_trivia: Option<String>,
    pub semantic_type: Option<String>,
    pub scope_depth: u32,
    pub is_inserted: bool,
    pub is_removed: bool,
    pub string_form: Option<StringForm>,
    pub metadata: IndexMap<String, String>,
}

impl Token {
    pub fn new(kind: TokenKind, literal: impl Into<String>, span: SourceSpan) -> Self {
        Self {
            kind,
            literal: literal.into(),
            span,
            source_file: None,
            leading_trivia: None,
            trailing_trivia: None,
            semantic_type: None,
            scope_depth: 0,
            is_inserted: false,
            is_removed: false,
            string_form: None,
            metadata: IndexMap::new(),
        }
    }

    pub fn line(&self) -> usize {
        self.span.line
    }

    pub fn column(&self) -> usize {
        self.span.column
    }

    pub fn byte_offset(&self) -> usize {
        self.span.start
    }

    pub fn byte_len(&self) -> usize {
        self.span.len()
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_trivia(mut self, leading: Option<String>, trailing: Option<String>) -> Self {
        if leading.is_some() {
            self.leading_trivia = leading;
        }
        if trailing.is_some() {
            self.trailing_trivia = trailing;
        }
        self
    }
}
