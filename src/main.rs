use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use gravlax as lox;

use clap::error::ErrorKind;
use clap::Parser as ClapParser;
use log::info;

use lox::error::LoxError;
use lox::interpreter::Interpreter;
use lox::parser::Parser;
use lox::resolver::Resolver;
use lox::scanner::Scanner;
use lox::token::Token;

#[derive(ClapParser, Debug)]
#[command(name = "gravlax", version, about = "Tree-walking Lox interpreter", long_about = None)]
pub struct Cli {
    /// Lox source file to run; starts a REPL when omitted
    script: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = match Cli::try_parse() {
        Ok(args) => args,

        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit();
        }

        Err(_) => {
            eprintln!("Usage: gravlax [script]");
            process::exit(64);
        }
    };

    match args.script {
        Some(path) => run_file(path),
        None => run_prompt(),
    }
}

fn run_file(path: PathBuf) -> anyhow::Result<()> {
    let source = fs::read_to_string(&path)?;

    info!("Running {} ({} bytes)", path.display(), source.len());

    let mut interpreter = Interpreter::new(io::stdout());

    let mut scanner = Scanner::new(source.as_str());
    let (tokens, mut had_static_error) = drain_tokens(&mut scanner);

    let statements = match Parser::new(tokens).parse() {
        Ok(statements) => statements,

        Err(diagnostics) => {
            report_all(&diagnostics);
            had_static_error = true;
            Vec::new()
        }
    };

    if !had_static_error {
        if let Err(diagnostics) = Resolver::new(&mut interpreter).resolve(&statements) {
            report_all(&diagnostics);
            had_static_error = true;
        }
    }

    if had_static_error {
        process::exit(65);
    }

    if let Err(e) = interpreter.interpret(&statements) {
        eprintln!("{}", e);
        process::exit(70);
    }

    Ok(())
}

fn run_prompt() -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut interpreter = Interpreter::new(io::stdout());

    // Scanner state carried across prompt lines, so a `/*` left open on
    // one line keeps consuming input on the next.
    let mut line = 1usize;
    let mut in_block_comment = false;

    let mut input = String::new();
    loop {
        if !in_block_comment {
            print!("> ");
            io::stdout().flush()?;
        }

        input.clear();
        if stdin.lock().read_line(&mut input)? == 0 {
            println!("bye!");
            break;
        }

        let mut scanner = Scanner::with_state(input.as_str(), line, in_block_comment);
        let (tokens, had_scan_error) = drain_tokens(&mut scanner);
        line = scanner.line();
        in_block_comment = scanner.in_block_comment();

        if in_block_comment || had_scan_error {
            continue;
        }

        let statements = match Parser::new(tokens).parse() {
            Ok(statements) => statements,

            Err(diagnostics) => {
                report_all(&diagnostics);
                continue;
            }
        };

        if let Err(diagnostics) = Resolver::new(&mut interpreter).resolve(&statements) {
            report_all(&diagnostics);
            continue;
        }

        if let Err(e) = interpreter.interpret_interactive(&statements) {
            eprintln!("{}", e);
        }
    }

    Ok(())
}

/// Collect the token stream, printing scan errors as they surface so the
/// parser still sees a best-effort sequence.
fn drain_tokens(scanner: &mut Scanner) -> (Vec<Token>, bool) {
    let mut tokens = Vec::new();
    let mut had_error = false;

    for item in scanner.by_ref() {
        match item {
            Ok(token) => tokens.push(token),

            Err(e) => {
                eprintln!("{}", e);
                had_error = true;
            }
        }
    }

    (tokens, had_error)
}

fn report_all(diagnostics: &[LoxError]) {
    for diagnostic in diagnostics {
        eprintln!("{}", diagnostic);
    }
}
