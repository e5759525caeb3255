mod cli;
mod compiler;


use std::path::PathBuf;

use clap::Parser as _;
use cli::{Cli, Command};
use obc_backend::linker::LinkerError;
use obc_backend::{BackendError, Options};
use target_lexicon::Triple;
use tracing_subscriber::EnvFilter;

#[derive(thiserror::Error, Debug)]
enum CompilerError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid program: {0}")]
    Json(#[from] serde_json::Error),

    #[error("error during codegen: {0}")]
    Backend(#[from] BackendError),

    #[error("error linking: {0}")]
    Linker(#[from] LinkerError),

    #[error("invalid target: {0}")]
    Target(String),

    #[error("no known linker for target {0}")]
    NoLinker(Triple),

    #[error("couldn't create temporary directory: {0}")]
    TempDir(String),
}

type CompilerResult<T> = Result<T, CompilerError>;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> CompilerResult<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Build {
            input,
            output,
            generator,
            procedures,
            target,
            literal_pool_distance,
            link,
            verbose,
        } => {
            init_logging(verbose);

            let target = compiler::parse_target(&target)?;
            let options = Options {
                generator: generator.into(),
                procedures: procedures.into(),
                literal_pool_distance,
            };

            tracing::info!("building {} for {target}", input.display());

            let source = std::fs::read_to_string(&input)?;
            let listing = compiler::build(&source, &target, &options)?;

            if link {
                let output = output.unwrap_or_else(|| executable_path(&input));
                compiler::link(&listing, &target, &output)?;
            } else {
                match output {
                    Some(output) => std::fs::write(output, listing)?,
                    None => print!("{listing}"),
                }
            }

            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// `prog.json` links to `prog`.
fn executable_path(input: &std::path::Path) -> PathBuf {
    input.with_extension("")
}
