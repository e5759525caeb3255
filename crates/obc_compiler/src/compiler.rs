use std::path::Path;
use std::str::FromStr;

use obc_backend::linker::Linker;
use obc_backend::{compile_program, Options};
use obc_ir::Program;
use target_lexicon::Triple;
use temp_dir::TempDir;

use crate::{CompilerError, CompilerResult};

pub fn parse_target(triple: &str) -> CompilerResult<Triple> {
    Triple::from_str(triple).map_err(|err| CompilerError::Target(err.to_string()))
}

pub fn load_program(source: &str) -> CompilerResult<Program> {
    Ok(serde_json::from_str(source)?)
}

/// Compiles a program given as JSON into an assembly listing.
pub fn build(source: &str, target: &Triple, options: &Options) -> CompilerResult<String> {
    let mut program = load_program(source)?;
    tracing::debug!("loaded program with {} entries", program.symbols.entries.len());

    let listing = compile_program(&mut program, target, options)?;
    Ok(listing.to_string())
}

/// Assembles and links a listing into the executable `output`.
pub fn link(listing: &str, target: &Triple, output: &Path) -> CompilerResult<()> {
    let linker = Linker::detect(target).ok_or_else(|| CompilerError::NoLinker(target.clone()))?;

    let dir = TempDir::new().map_err(|err| CompilerError::TempDir(err.to_string()))?;
    let asm_path = dir.child("program.s");
    std::fs::write(&asm_path, listing)?;

    linker.link(&[asm_path], output)?;
    Ok(())
}
