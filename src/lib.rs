//! Core library for the Nyx scripting language: a data-driven token
//! registry, lexer, Pratt parser and tree-walking interpreter, plus an
//! advisory ownership and borrow verification engine.

pub mod ast;
pub mod diagnostics;
pub mod environment;
pub mod lexer;
pub mod ownership;
pub mod parser;
pub mod registry;
pub mod repl;
pub mod runtime;
pub mod stdlib;
pub mod token;
pub mod value;

pub use diagnostics::{Diagnostic, DiagnosticKind, NyxError, SourceSpan};
pub use lexer::{tokenize, Lexer, LexerOptions};
pub use ownership::{OwnershipError, SafetyEngine};
pub use parser::{parse, ParseOutput, Parser, ParserOptions};
pub use registry::TokenRegistry;
pub use repl::Repl;
pub use runtime::{ControlFlow, Interpreter, InterpreterOptions};
pub use value::Value;
