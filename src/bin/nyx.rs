use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use nyx::{
    ownership::{parse_trace_lines, EnhancedBorrowChecker},
    parse, Interpreter, InterpreterOptions, Lexer, LexerOptions, NyxError, ParserOptions, Repl,
    TokenRegistry,
};

#[derive(Parser)]
#[command(author, version, about = "Nyx language interpreter")]
struct Cli {
    #[command(flatten)]
    config: Config,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args)]
struct Config {
    /// Evaluation steps allowed before a script is aborted
    #[arg(long, global = true, default_value_t = 1_000_000)]
    max_steps: usize,
    /// Nested function calls allowed before a script is aborted
    #[arg(long, global = true, default_value_t = 256)]
    max_call_depth: usize,
    /// Fail on syntax the evaluator cannot execute
    #[arg(long, global = true)]
    strict: bool,
    /// Accept `//` line comments
    #[arg(long, global = true)]
    cpp_comments: bool,
    /// Abort parsing at the first syntax error
    #[arg(long, global = true)]
    stop_on_first_error: bool,
}

impl Config {
    fn lexer_options(&self, path: Option<&Path>) -> LexerOptions {
        LexerOptions {
            allow_cpp_line_comments: self.cpp_comments,
            source_file: path.map(|p| p.display().to_string()),
            ..LexerOptions::default()
        }
    }

    fn parser_options(&self) -> ParserOptions {
        ParserOptions {
            stop_on_first_error: self.stop_on_first_error,
            ..ParserOptions::default()
        }
    }

    fn interpreter(&self, path: Option<&Path>) -> Interpreter {
        Interpreter::with_options(InterpreterOptions {
            max_steps: self.max_steps,
            max_call_depth: self.max_call_depth,
            strict_unknown_nodes: self.strict,
        })
        .with_lexer_options(self.lexer_options(path))
        .with_parser_options(self.parser_options())
    }
}

#[derive(Subcommand)]
enum Command {
    /// Run a Nyx script file
    Run { script: PathBuf },
    /// Evaluate a snippet of Nyx code
    Eval { source: String },
    /// Start an interactive REPL session
    Repl,
    /// Print the token stream of a file
    Tokens { script: PathBuf },
    /// Report lexical and syntax errors without running
    Check { script: PathBuf },
    /// Replay a borrow trace and print the verifier report
    Trace { trace: PathBuf },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("NYX_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match dispatch(&cli.config, cli.command.unwrap_or(Command::Repl)) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn dispatch(config: &Config, command: Command) -> Result<ExitCode, NyxError> {
    match command {
        Command::Run { script } => {
            let source = fs::read_to_string(&script)?;
            config.interpreter(Some(script.as_path())).eval_source(&source)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Eval { source } => {
            let value = config.interpreter(None).eval_source(&source)?;
            if !value.is_null() {
                println!("{value}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Repl => {
            Repl::with_interpreter(config.interpreter(None)).run()?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Tokens { script } => dump_tokens(config, &script),
        Command::Check { script } => check(config, &script),
        Command::Trace { trace } => replay_trace(&trace),
    }
}

fn dump_tokens(config: &Config, path: &Path) -> Result<ExitCode, NyxError> {
    let source = fs::read_to_string(path)?;
    let registry = TokenRegistry::default();
    let mut lexer = Lexer::with_options(&source, &registry, config.lexer_options(Some(path)));
    let tokens = lexer.tokens().collect::<Result<Vec<_>, _>>()?;
    for token in &tokens {
        println!(
            "{}:{}\t{}\t{:?}",
            token.line(),
            token.column(),
            token.kind,
            token.literal
        );
    }
    for error in lexer.errors() {
        eprintln!("{error}");
    }
    Ok(if lexer.errors().is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn check(config: &Config, path: &Path) -> Result<ExitCode, NyxError> {
    let source = fs::read_to_string(path)?;
    let registry = TokenRegistry::default();
    let lexer = Lexer::with_options(&source, &registry, config.lexer_options(Some(path)));
    let output = parse(lexer, config.parser_options())?;
    if output.errors.is_empty() {
        println!("{}: ok ({} statements)", path.display(), output.program.statements.len());
        return Ok(ExitCode::SUCCESS);
    }
    for error in &output.errors {
        eprintln!("{}: {error}", path.display());
    }
    Ok(ExitCode::FAILURE)
}

fn replay_trace(path: &Path) -> Result<ExitCode, NyxError> {
    let text = fs::read_to_string(path)?;
    let steps = parse_trace_lines(&text)?;
    let mut checker = EnhancedBorrowChecker::new().with_source_name(path.display().to_string());
    for (line, step) in &steps {
        checker.apply_step(step, *line);
    }
    let (_, report) = checker.verify_with_report();
    for message in checker.verifier().messages() {
        println!("{message}");
    }
    println!("{report}");
    Ok(ExitCode::from(checker.verifier().exit_code() as u8))
}
