use crate::diagnostics::SourceSpan;

pub type Block = Vec<Stmt>;

#[derive(Debug, Clone, Default)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringKind {
    Plain,
    Multiline,
    Raw,
    Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    String { value: String, kind: StringKind },
    Boolean(bool),
    Null,
    Binary(i64),
    Octal(i64),
    Hex(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixOp {
    Negate,
    Plus,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfixOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Equal,
    NotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    And,
    Or,
    NullCoalesce,
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
}

impl InfixOp {
    pub fn symbol(self) -> &'static str {
        match self {
            InfixOp::Add => "+",
            InfixOp::Sub => "-",
            InfixOp::Mul => "*",
            InfixOp::Div => "/",
            InfixOp::FloorDiv => "//",
            InfixOp::Mod => "%",
            InfixOp::Pow => "**",
            InfixOp::Equal => "==",
            InfixOp::NotEqual => "!=",
            InfixOp::Less => "<",
            InfixOp::Greater => ">",
            InfixOp::LessEqual => "<=",
            InfixOp::GreaterEqual => ">=",
            InfixOp::And => "&&",
            InfixOp::Or => "||",
            InfixOp::NullCoalesce => "??",
            InfixOp::BitAnd => "&",
            InfixOp::BitOr => "|",
            InfixOp::BitXor => "^",
            InfixOp::ShiftLeft => "<<",
            InfixOp::ShiftRight => ">>",
        }
    }
}

/// `=` rebinds, `:=` declares in the current scope, the rest combine first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Declare,
    Compound(InfixOp),
}

/// Parsed `f"..."` literal; each part renders after `pieces[slot]`.
#[derive(Debug, Clone)]
pub struct FormatString {
    pub pieces: Vec<String>,
    pub parts: Vec<(usize, Expr)>,
}

/// Node produced by a registered parser extension. The interpreter does not
/// know its semantics.
#[derive(Debug, Clone)]
pub struct ExtensionNode {
    pub name: String,
    pub children: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Identifier(String),
    Literal(Literal),
    Prefix {
        op: PrefixOp,
        operand: Box<Expr>,
    },
    Infix {
        op: InfixOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Assign {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Member {
        object: Box<Expr>,
        property: String,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Array(Vec<Expr>),
    Hash(Vec<(Expr, Expr)>),
    If {
        condition: Box<Expr>,
        consequence: Block,
        alternative: Option<Block>,
    },
    Function {
        name: Option<String>,
        params: Vec<String>,
        body: Block,
    },
    SelfRef,
    Super,
    New {
        class: Box<Expr>,
        args: Vec<Expr>,
    },
    Yield(Option<Box<Expr>>),
    Await(Box<Expr>),
    FormatString(FormatString),
    Extension(ExtensionNode),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportNames {
    All,
    Names(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct ExceptClause {
    pub binding: Option<String>,
    pub body: Block,
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Let {
        name: String,
        mutable: bool,
        value: Option<Expr>,
    },
    Return(Option<Expr>),
    Expr(Expr),
    Block(Block),
    While {
        condition: Expr,
        body: Block,
    },
    For {
        init: Option<Box<Stmt>>,
        condition: Option<Expr>,
        update: Option<Expr>,
        body: Block,
    },
    ForIn {
        key: Option<String>,
        binding: String,
        iterable: Expr,
        body: Block,
    },
    Break,
    Continue,
    Class {
        name: String,
        superclass: Option<String>,
        body: Block,
    },
    Import {
        path: String,
        alias: Option<String>,
    },
    Use {
        path: String,
    },
    FromImport {
        path: String,
        names: ImportNames,
    },
    Try {
        body: Block,
        except: Option<ExceptClause>,
        finally: Option<Block>,
    },
    Raise(Option<Expr>),
    Assert {
        condition: Expr,
        message: Option<Expr>,
    },
    With {
        context: Expr,
        binding: Option<String>,
        body: Block,
    },
    Async(Box<Stmt>),
    Pass,
    Extension(ExtensionNode),
}
