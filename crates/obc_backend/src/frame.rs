//! Procedure frames.
//!
//! ```text
//!        | caller's stack  |
//! fp ->  | saved lr        |
//!        | saved fp        |  fp - 4
//!        | formal 1        |  fp - 8
//!        | ...             |
//!        | formal n        |
//!        | locals          |  in name order
//!        | padding         |
//! sp ->  +-----------------+
//! ```
//!
//! Formals take one word each: integers are copied in, arrays and records
//! are passed as the address of the caller's storage. Locals take the size of
//! their type. Slot offsets are distances below `fp` to the lowest address of
//! the slot.

use obc_ir::symbols::{Entry, EntryId, Procedure, ScopeId, Symbols, VariableKind};

use crate::asm::{is_immediate, Inst, Label, Mem, Operand, Reg};
use crate::emit::CodeBuffer;
use crate::layout::{self, set_offset, size_of, variables_in};
use crate::{BackendError, BackendResult};

/// What a known offset is relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Base {
    /// Above the start of the global data block, held in `r7`.
    Globals,
    /// Below the frame pointer.
    Frame,
}

impl Base {
    pub fn reg(self) -> Reg {
        match self {
            Self::Globals => Reg::GLOBALS,
            Self::Frame => Reg::Fp,
        }
    }

    /// The signed memory operand offset for a place `offset` bytes away.
    pub fn displacement(self, offset: u32) -> i32 {
        match self {
            Self::Globals => offset as i32,
            Self::Frame => -(offset as i32),
        }
    }

    /// The offset of the place `delta` bytes above the place at `offset`.
    pub fn advance(self, offset: u32, delta: u32) -> u32 {
        match self {
            Self::Globals => offset + delta,
            Self::Frame => offset - delta,
        }
    }
}

/// Saved frame pointer slot below `fp`.
const SAVED_FP: u32 = 4;

/// Lays out the frame of every procedure in the program.
pub fn layout_frames(symbols: &mut Symbols) {
    let procedures: Vec<EntryId> = symbols
        .entries
        .iter_keyed()
        .filter(|(_, entry)| matches!(entry, Entry::Procedure(_)))
        .map(|(id, _)| id)
        .collect();

    for id in procedures {
        layout_frame(symbols, id);
    }
}

fn layout_frame(symbols: &mut Symbols, id: EntryId) {
    let Some(proc) = symbols.procedure(id) else {
        return;
    };
    let (name, scope, params) = (proc.name.clone(), proc.scope, proc.params.clone());

    let mut top = SAVED_FP;

    for &param in &params {
        top += 4;
        set_offset(symbols, param, top);
    }

    for (local, id) in variables_in(symbols, scope) {
        let Some(var) = symbols.variable(id).copied() else {
            continue;
        };
        if var.kind != VariableKind::Local {
            continue;
        }

        top = top.saturating_add(size_of(symbols, var.ty));
        set_offset(symbols, id, top);
        tracing::trace!("{name}: local {local} at fp - {top}");
    }

    // One word of padding below the last slot.
    let frame_size = top;
    tracing::debug!("{name}: {} formals, frame of {frame_size} bytes", params.len());

    if let Some(proc) = symbols.procedure_mut(id) {
        proc.frame_size = Some(frame_size);
    }
}

/// Emits a procedure's label and prologue, spilling its formals to their slots.
pub fn prologue(code: &mut CodeBuffer, symbols: &Symbols, id: EntryId) -> BackendResult<()> {
    let proc = procedure(symbols, id)?;
    let frame_size = proc.frame_size.ok_or(BackendError::MissingOffset(id))?;

    if proc.params.len() > Reg::ARGUMENTS.len() {
        return Err(BackendError::TooManyArguments {
            procedure: proc.name.clone(),
            count: proc.params.len(),
        });
    }

    code.label(Label::Procedure(proc.name.clone()));
    code.push(&[Reg::Fp, Reg::Lr]);
    code.emit(Inst::Add(Reg::Fp, Reg::Sp, Operand::Imm(4)));

    let frame_size = frame_size as i32;
    if is_immediate(frame_size) {
        code.emit(Inst::Sub(Reg::Sp, Reg::Sp, Operand::Imm(frame_size)));
    } else {
        code.emit(Inst::LoadConst(Reg::Ip, frame_size));
        code.emit(Inst::Sub(Reg::Sp, Reg::Sp, Operand::Reg(Reg::Ip)));
    }

    for (&param, reg) in proc.params.iter().zip(Reg::ARGUMENTS) {
        let offset = symbols
            .variable(param)
            .and_then(|var| var.offset)
            .ok_or(BackendError::MissingOffset(param))?;

        code.emit(Inst::Str(reg, Mem::Offset(Reg::Fp, Base::Frame.displacement(offset))));
    }

    Ok(())
}

pub fn epilogue(code: &mut CodeBuffer) {
    code.emit(Inst::Sub(Reg::Sp, Reg::Fp, Operand::Imm(4)));
    code.pop(&[Reg::Fp, Reg::Lr]);
    code.emit(Inst::Bx(Reg::Lr));
}

pub fn procedure(symbols: &Symbols, id: EntryId) -> BackendResult<&Procedure> {
    symbols.procedure(id).ok_or(BackendError::NotAProcedure(id))
}

/// Checks that a local or formal belongs to the frame of the procedure whose
/// scope is `current`. Enclosing procedures' frames can't be reached.
pub fn check_own_slot(
    symbols: &Symbols,
    current: Option<ScopeId>,
    id: EntryId,
) -> BackendResult<()> {
    let owned =
        current.is_some_and(|scope| symbols.scope(scope).table.values().any(|&entry| entry == id));
    if owned {
        Ok(())
    } else {
        Err(BackendError::NonLocalVariable(id))
    }
}

/// Whether a formal is passed as the address of the caller's storage.
pub fn by_reference(symbols: &Symbols, param: EntryId) -> bool {
    symbols
        .variable(param)
        .is_some_and(|var| layout::is_aggregate(symbols, var.ty))
}
