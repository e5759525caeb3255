//! Runtime checks that print a diagnostic and exit the program with status 1.

use std::collections::BTreeSet;

use obc_ir::Span;

use crate::asm::{Callee, Extern, Format, Inst, Label, Operand, Reg, Symbol};
use crate::emit::CodeBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Check {
    Div,
    Mod,
    /// The faulting index is in the given register.
    Index(Reg),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Guard {
    label: Label,
    check: Check,
    span: Span,
}

/// Guard blocks branched to from the current code unit, emitted after it.
#[derive(Debug, Default)]
pub struct Guards {
    pending: Vec<Guard>,

    div: u32,
    modulo: u32,
    index: u32,
}

impl Guards {
    pub fn new() -> Self {
        Self::default()
    }

    /// A guard for a zero divisor whose expression is at `span`.
    pub fn div(&mut self, span: Span) -> Label {
        self.div += 1;
        self.add(Label::DivError(self.div), Check::Div, span)
    }

    pub fn modulo(&mut self, span: Span) -> Label {
        self.modulo += 1;
        self.add(Label::ModError(self.modulo), Check::Mod, span)
    }

    /// A guard for an out of bounds index held in `value`.
    pub fn index(&mut self, value: Reg, span: Span) -> Label {
        self.index += 1;
        self.add(Label::IndexError(self.index), Check::Index(value), span)
    }

    fn add(&mut self, label: Label, check: Check, span: Span) -> Label {
        self.pending.push(Guard {
            label: label.clone(),
            check,
            span,
        });
        label
    }

    /// Emits the pending guard blocks, recording the formats they print.
    pub fn flush(&mut self, code: &mut CodeBuffer, formats: &mut BTreeSet<Format>) {
        for guard in self.pending.drain(..) {
            code.label(guard.label);

            let Span { line, start, end } = guard.span;
            let format = match guard.check {
                Check::Div | Check::Mod => {
                    code.load_imm(Reg::R1, line as i32);
                    code.load_imm(Reg::R2, start as i32);
                    code.load_imm(Reg::R3, end as i32);

                    if guard.check == Check::Div {
                        Format::DivError
                    } else {
                        Format::ModError
                    }
                }

                Check::Index(value) => {
                    code.mov(Reg::R1, value);
                    code.load_imm(Reg::R2, line as i32);
                    code.load_imm(Reg::R3, start as i32);
                    code.load_imm(Reg::Ip, end as i32);
                    code.push(&[Reg::Ip]);

                    Format::IndexError
                }
            };

            formats.insert(format);
            code.emit(Inst::LoadAddr(Reg::R0, Symbol::Format(format)));
            code.emit(Inst::Bl(Callee::Extern(Extern::Printf)));
            code.emit(Inst::Mov(Reg::R0, Operand::Imm(1)));
            code.emit(Inst::Bl(Callee::Extern(Extern::Exit)));
        }
    }
}
