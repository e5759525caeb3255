use obc_ir::symbols::EntryId;
use obc_ir::{Program, Span};
use target_lexicon::{Architecture, Triple};

pub mod asm;
pub mod codegen;
pub mod emit;
pub mod frame;
pub mod guards;
pub mod layout;
pub mod linker;
pub mod naive;
pub mod procedures;
pub mod registers;

#[cfg(test)]
mod tests;

use asm::{Listing, Reg};

#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("unsupported architecture: {0}")]
    UnsupportedArch(Architecture),

    #[error("ran out of registers")]
    RegistersExhausted,

    #[error("freed register {0}, which was not allocated")]
    RegisterNotAllocated(Reg),

    #[error(
        "index {index} is out of bounds for an array of length {length} at line {}, position: ({}, {})",
        .span.line, .span.start, .span.end
    )]
    IndexOutOfBounds { index: i32, length: u32, span: Span },

    #[error("procedure {procedure} takes {count} arguments, at most 4 are supported")]
    TooManyArguments { procedure: String, count: usize },

    #[error("no storage was allocated for {0:?}")]
    MissingOffset(EntryId),

    #[error("{0:?} is not a procedure")]
    NotAProcedure(EntryId),

    #[error("{0:?} is not a variable")]
    NotAVariable(EntryId),

    #[error("{0:?} is a local of another procedure")]
    NonLocalVariable(EntryId),

    #[error("procedure {0:?} has no return value")]
    MissingReturn(EntryId),

    #[error(
        "array or record used as a value at line {}, position: ({}, {})",
        .0.line, .0.start, .0.end
    )]
    AggregateValue(Span),

    #[error(
        "indexed location is not an array at line {}, position: ({}, {})",
        .0.line, .0.start, .0.end
    )]
    NotAnArray(Span),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Literal pool distance used unless configured otherwise, in instructions.
pub const DEFAULT_LITERAL_POOL_DISTANCE: usize = 800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Generator {
    /// Evaluates everything through the stack.
    Naive,
    /// Keeps values in registers.
    #[default]
    Register,
}

/// When procedure bodies are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcedureEmission {
    /// Once, after the first call to the procedure is generated. Procedures
    /// that are never called are left out.
    #[default]
    OnFirstCall,
    /// Every procedure, called or not.
    Eager,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub generator: Generator,
    pub procedures: ProcedureEmission,
    pub literal_pool_distance: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            generator: Generator::default(),
            procedures: ProcedureEmission::default(),
            literal_pool_distance: DEFAULT_LITERAL_POOL_DISTANCE,
        }
    }
}

pub fn check_target(target: &Triple) -> BackendResult<()> {
    match target.architecture {
        Architecture::Arm(_) => Ok(()),
        arch => Err(BackendError::UnsupportedArch(arch)),
    }
}

/// Allocates storage for `program` and generates its assembly listing.
pub fn compile_program(
    program: &mut Program,
    target: &Triple,
    options: &Options,
) -> BackendResult<Listing> {
    check_target(target)?;

    let globals_size = layout::allocate(&mut program.symbols);
    frame::layout_frames(&mut program.symbols);

    tracing::info!("generating code with the {:?} generator", options.generator);

    match options.generator {
        Generator::Naive => naive::generate(program, globals_size, options),
        Generator::Register => codegen::generate(program, globals_size, options),
    }
}
