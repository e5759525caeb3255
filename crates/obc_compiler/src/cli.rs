use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use obc_backend::{Generator, ProcedureEmission, DEFAULT_LITERAL_POOL_DISTANCE};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Build a program.
    Build {
        /// The checked program, as JSON.
        input: PathBuf,

        /// The output file. If not specified, prints assembly to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = GeneratorArg::Register)]
        generator: GeneratorArg,

        /// When procedure bodies are emitted.
        #[arg(long, value_enum, default_value_t = ProceduresArg::OnFirstCall)]
        procedures: ProceduresArg,

        #[arg(long, default_value = "armv7-unknown-linux-gnueabihf")]
        target: String,

        /// Maximum number of instructions between literal pools in `main`.
        #[arg(long, default_value_t = DEFAULT_LITERAL_POOL_DISTANCE)]
        literal_pool_distance: usize,

        /// Assemble and link into an executable instead of writing assembly.
        #[arg(long, action)]
        link: bool,

        #[arg(short, long, action)]
        verbose: bool,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorArg {
    Naive,
    Register,
}

impl From<GeneratorArg> for Generator {
    fn from(arg: GeneratorArg) -> Self {
        match arg {
            GeneratorArg::Naive => Self::Naive,
            GeneratorArg::Register => Self::Register,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProceduresArg {
    OnFirstCall,
    Eager,
}

impl From<ProceduresArg> for ProcedureEmission {
    fn from(arg: ProceduresArg) -> Self {
        match arg {
            ProceduresArg::OnFirstCall => Self::OnFirstCall,
            ProceduresArg::Eager => Self::Eager,
        }
    }
}
