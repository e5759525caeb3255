//! The stack evaluating generator.
//!
//! Every intermediate value goes through the machine stack. `r1` to `r3` are
//! scratch registers that never hold a value from one node to the next, and
//! `r0` only carries call arguments and results.

use std::collections::BTreeSet;

use obc_ir::ast::{
    BinOp, Condition, Expression, ExpressionKind, Instruction, InstructionKind, Location,
    LocationKind,
};
use obc_ir::symbols::{EntryId, ScopeId, Symbols, TypeId, TypeKind, VariableKind};
use obc_ir::Program;

use crate::asm::{Callee, Cond, Extern, Format, Inst, Label, Line, Listing, Mem, Operand, Reg, Symbol};
use crate::emit::CodeBuffer;
use crate::frame::{self, Base};
use crate::guards::Guards;
use crate::layout;
use crate::procedures::ProcedureQueue;
use crate::{BackendError, BackendResult, Options};

/// Where a location is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Address {
    Known { base: Base, offset: u32 },
    /// Pushed on the stack.
    Stacked,
}

/// `r4` is unused, it keeps the stack 8-byte aligned.
const MAIN_SAVED: [Reg; 4] = [Reg::R4, Reg::R7, Reg::Fp, Reg::Lr];

pub fn generate(program: &Program, globals_size: u32, options: &Options) -> BackendResult<Listing> {
    let mut codegen = NaiveCodegen {
        symbols: &program.symbols,
        code: CodeBuffer::with_literal_pool(options.literal_pool_distance),
        guards: Guards::new(),
        procedures: ProcedureQueue::new(options.procedures, &program.symbols),
        formats: Format::ALL.into_iter().collect(),
        scope: None,
        false_labels: 0,
        end_labels: 0,
        repeat_labels: 0,
    };

    codegen.code.label(Label::Main);
    codegen.code.push(&MAIN_SAVED);
    codegen.code.emit(Inst::LoadAddr(Reg::GLOBALS, Symbol::Variables));

    codegen.gen_sequence(program.body.as_ref())?;

    codegen.code.emit(Inst::Mov(Reg::R0, Operand::Imm(0)));
    codegen.code.pop(&MAIN_SAVED);
    codegen.code.emit(Inst::Bx(Reg::Lr));

    let mut lines = codegen.end_unit(CodeBuffer::new());

    while let Some(id) = codegen.procedures.next() {
        codegen.gen_procedure(id)?;
        lines.extend(codegen.end_unit(CodeBuffer::new()));
    }

    Ok(Listing {
        globals_size,
        formats: codegen.formats.into_iter().collect(),
        lines,
    })
}

struct NaiveCodegen<'a> {
    symbols: &'a Symbols,

    code: CodeBuffer,
    guards: Guards,
    procedures: ProcedureQueue,
    formats: BTreeSet<Format>,

    /// Scope of the procedure being generated, `None` in `main`.
    scope: Option<ScopeId>,

    false_labels: u32,
    end_labels: u32,
    repeat_labels: u32,
}

impl NaiveCodegen<'_> {
    /// Finishes the current unit and starts `next`.
    fn end_unit(&mut self, next: CodeBuffer) -> Vec<Line> {
        self.guards.flush(&mut self.code, &mut self.formats);
        self.code.ltorg();
        std::mem::replace(&mut self.code, next).into_lines()
    }

    fn gen_procedure(&mut self, id: EntryId) -> BackendResult<()> {
        let proc = frame::procedure(self.symbols, id)?;
        tracing::debug!("generating procedure {}", proc.name);
        self.scope = Some(proc.scope);

        frame::prologue(&mut self.code, self.symbols, id)?;
        self.gen_sequence(proc.body.as_ref())?;

        if let Some(expr) = &proc.return_expr {
            self.gen_value(expr)?;
            self.pop(Reg::R0);
        }

        frame::epilogue(&mut self.code);
        Ok(())
    }

    fn gen_sequence(&mut self, seq: Option<&Instruction>) -> BackendResult<()> {
        for instr in seq.into_iter().flat_map(Instruction::iter) {
            self.gen_instr(instr)?;
        }
        Ok(())
    }

    fn gen_instr(&mut self, instr: &Instruction) -> BackendResult<()> {
        match &instr.kind {
            InstructionKind::Assign { location, expr } if self.is_aggregate(location.ty) => {
                let ExpressionKind::Location(source) = &expr.kind else {
                    return Err(BackendError::AggregateValue(expr.span));
                };

                let dst = self.gen_location(location)?;
                self.stack_address(dst);
                let src = self.gen_location(source)?;
                self.stack_address(src);

                let words = self.size_of(location.ty) / 4;
                self.pop(Reg::R2);
                self.pop(Reg::R1);
                self.code.copy_words(Reg::R1, Reg::R2, Reg::R3, words);
            }

            InstructionKind::Assign { location, expr } => {
                let dst = self.gen_location(location)?;
                self.gen_value(expr)?;
                self.pop(Reg::R2);

                match dst {
                    Address::Known { base, offset } => {
                        self.code.store_known(Reg::R2, base, offset, Reg::R1);
                    }
                    Address::Stacked => {
                        self.pop(Reg::R1);
                        self.code.emit(Inst::Str(Reg::R2, Mem::Offset(Reg::R1, 0)));
                    }
                }
            }

            InstructionKind::Read(location) => {
                let addr = self.gen_location(location)?;
                self.address_into(Reg::R1, addr);

                self.code.emit(Inst::LoadAddr(Reg::R0, Symbol::Format(Format::Scan)));
                self.code.emit(Inst::Bl(Callee::Extern(Extern::Scanf)));
            }

            InstructionKind::Write(expr) => {
                self.gen_value(expr)?;
                self.pop(Reg::R1);

                self.code.emit(Inst::LoadAddr(Reg::R0, Symbol::Format(Format::Print)));
                self.code.emit(Inst::Bl(Callee::Extern(Extern::Printf)));
            }

            InstructionKind::If {
                condition,
                then,
                otherwise,
            } => {
                let cond = self.gen_condition(condition)?;

                self.end_labels += 1;
                let end = Label::End(self.end_labels);

                match otherwise.as_deref() {
                    None => {
                        self.code.emit(Inst::B(Some(cond.negated()), end.clone()));
                        self.gen_sequence(then.as_deref())?;
                    }
                    Some(otherwise) => {
                        self.false_labels += 1;
                        let false_label = Label::False(self.false_labels);

                        self.code.emit(Inst::B(Some(cond.negated()), false_label.clone()));
                        self.gen_sequence(then.as_deref())?;
                        self.code.emit(Inst::B(None, end.clone()));

                        self.code.label(false_label);
                        self.gen_sequence(Some(otherwise))?;
                    }
                }

                self.code.label(end);
            }

            InstructionKind::Repeat { body, condition } => {
                self.repeat_labels += 1;
                let top = Label::Repeat(self.repeat_labels);

                self.code.label(top.clone());
                self.gen_sequence(body.as_deref())?;

                let cond = self.gen_condition(condition)?;
                self.code.emit(Inst::B(Some(cond.negated()), top));
            }

            InstructionKind::Call { procedure, args } => {
                let returns = self.gen_call(*procedure, args)?;
                if returns {
                    // Discard the result.
                    self.code.emit(Inst::Add(Reg::Sp, Reg::Sp, Operand::Imm(4)));
                }
            }
        }

        Ok(())
    }

    fn gen_condition(&mut self, condition: &Condition) -> BackendResult<Cond> {
        self.gen_value(&condition.lhs)?;
        self.gen_value(&condition.rhs)?;

        self.pop(Reg::R2);
        self.pop(Reg::R1);
        self.code.emit(Inst::Cmp(Reg::R1, Operand::Reg(Reg::R2)));

        Ok(Cond::from(condition.relation))
    }

    /// Pushes the value of `expr`.
    fn gen_value(&mut self, expr: &Expression) -> BackendResult<()> {
        match &expr.kind {
            ExpressionKind::Number(value) => {
                self.code.load_imm(Reg::R1, *value);
                self.push(Reg::R1);
            }

            ExpressionKind::Location(location) => {
                if self.is_aggregate(location.ty) {
                    return Err(BackendError::AggregateValue(expr.span));
                }

                match self.gen_location(location)? {
                    Address::Known { base, offset } => {
                        self.code.load_known(Reg::R1, base, offset);
                    }
                    Address::Stacked => {
                        self.pop(Reg::R1);
                        self.code.emit(Inst::Ldr(Reg::R1, Mem::Offset(Reg::R1, 0)));
                    }
                }
                self.push(Reg::R1);
            }

            ExpressionKind::Binary { op, lhs, rhs } => {
                self.gen_value(lhs)?;
                self.gen_value(rhs)?;

                self.pop(Reg::R2);
                self.pop(Reg::R1);

                let result = match op {
                    BinOp::Add => {
                        self.code.emit(Inst::Add(Reg::R1, Reg::R1, Operand::Reg(Reg::R2)));
                        Reg::R1
                    }
                    BinOp::Sub => {
                        self.code.emit(Inst::Sub(Reg::R1, Reg::R1, Operand::Reg(Reg::R2)));
                        Reg::R1
                    }
                    BinOp::Mul => {
                        self.code.emit(Inst::Mul(Reg::R3, Reg::R1, Reg::R2));
                        Reg::R3
                    }
                    BinOp::Div | BinOp::Mod => {
                        let (guard, helper, out) = if *op == BinOp::Div {
                            (self.guards.div(rhs.span), Extern::Idiv, Reg::R0)
                        } else {
                            (self.guards.modulo(rhs.span), Extern::Idivmod, Reg::R1)
                        };

                        self.code.emit(Inst::Cmp(Reg::R2, Operand::Imm(0)));
                        self.code.emit(Inst::B(Some(Cond::Eq), guard));
                        self.code.mov(Reg::R0, Reg::R1);
                        self.code.mov(Reg::R1, Reg::R2);
                        self.code.emit(Inst::Bl(Callee::Extern(helper)));
                        out
                    }
                };

                self.push(result);
            }

            ExpressionKind::Call { procedure, args } => {
                if !self.gen_call(*procedure, args)? {
                    return Err(BackendError::MissingReturn(*procedure));
                }
            }
        }

        Ok(())
    }

    /// Calls a procedure, pushing the result of a function. Returns whether a
    /// result was pushed.
    fn gen_call(&mut self, id: EntryId, args: &[Expression]) -> BackendResult<bool> {
        let proc = frame::procedure(self.symbols, id)?;
        if args.len() > Reg::ARGUMENTS.len() {
            return Err(BackendError::TooManyArguments {
                procedure: proc.name.clone(),
                count: args.len(),
            });
        }

        for (arg, &param) in args.iter().zip(&proc.params) {
            if frame::by_reference(self.symbols, param) {
                let ExpressionKind::Location(location) = &arg.kind else {
                    return Err(BackendError::AggregateValue(arg.span));
                };
                let addr = self.gen_location(location)?;
                self.stack_address(addr);
            } else {
                self.gen_value(arg)?;
            }
        }

        for &target in Reg::ARGUMENTS[..args.len()].iter().rev() {
            self.pop(target);
        }

        self.procedures.request(id);
        self.code.emit(Inst::Bl(Callee::Label(Label::Procedure(proc.name.clone()))));

        let returns = proc.return_type.is_some();
        if returns {
            self.push(Reg::R0);
        }
        Ok(returns)
    }

    /// Resolves a location, leaving its address on the stack unless it is
    /// known.
    fn gen_location(&mut self, location: &Location) -> BackendResult<Address> {
        match &location.kind {
            LocationKind::Variable(id) => {
                let var = self
                    .symbols
                    .variable(*id)
                    .ok_or(BackendError::NotAVariable(*id))?;
                let offset = var.offset.ok_or(BackendError::MissingOffset(*id))?;

                if matches!(var.kind, VariableKind::Local | VariableKind::Formal) {
                    frame::check_own_slot(self.symbols, self.scope, *id)?;
                }

                match var.kind {
                    VariableKind::Global => Ok(Address::Known {
                        base: Base::Globals,
                        offset,
                    }),
                    VariableKind::Formal if frame::by_reference(self.symbols, *id) => {
                        self.code.load_known(Reg::R1, Base::Frame, offset);
                        self.push(Reg::R1);
                        Ok(Address::Stacked)
                    }
                    VariableKind::Local | VariableKind::Formal => Ok(Address::Known {
                        base: Base::Frame,
                        offset,
                    }),
                    VariableKind::Field => Err(BackendError::NotAVariable(*id)),
                }
            }

            LocationKind::Index { base, index } => {
                let TypeKind::Array { length, .. } = self.symbols.ty(base.ty).kind else {
                    return Err(BackendError::NotAnArray(base.span));
                };
                let elem_size = self.size_of(location.ty);

                let addr = self.gen_location(base)?;

                if let Some(value) = index.as_number() {
                    if value < 0 || value as u32 >= length {
                        return Err(BackendError::IndexOutOfBounds {
                            index: value,
                            length,
                            span: index.span,
                        });
                    }
                    return Ok(self.advance(addr, value as u32 * elem_size));
                }

                self.stack_address(addr);
                self.gen_value(index)?;
                self.pop(Reg::R2);
                self.pop(Reg::R1);

                let guard = self.guards.index(Reg::R2, index.span);
                self.code.emit(Inst::Cmp(Reg::R2, Operand::Imm(0)));
                self.code.emit(Inst::B(Some(Cond::Lt), guard.clone()));
                self.code.load_imm(Reg::R3, length as i32);
                self.code.emit(Inst::Cmp(Reg::R2, Operand::Reg(Reg::R3)));
                self.code.emit(Inst::B(Some(Cond::Ge), guard));

                self.code.load_imm(Reg::R3, elem_size as i32);
                self.code.emit(Inst::Mul(Reg::R0, Reg::R2, Reg::R3));
                self.code.emit(Inst::Add(Reg::R1, Reg::R1, Operand::Reg(Reg::R0)));
                self.push(Reg::R1);

                Ok(Address::Stacked)
            }

            LocationKind::Field { base, field } => {
                let offset = self
                    .symbols
                    .variable(*field)
                    .and_then(|var| var.offset)
                    .ok_or(BackendError::MissingOffset(*field))?;

                let addr = self.gen_location(base)?;
                Ok(self.advance(addr, offset))
            }
        }
    }

    fn advance(&mut self, addr: Address, delta: u32) -> Address {
        match addr {
            Address::Known { base, offset } => Address::Known {
                base,
                offset: base.advance(offset, delta),
            },
            Address::Stacked => {
                self.pop(Reg::R1);
                self.code.add_imm(Reg::R1, Reg::R1, delta as i32, Reg::R2);
                self.push(Reg::R1);
                Address::Stacked
            }
        }
    }

    /// Makes sure the address is on the stack.
    fn stack_address(&mut self, addr: Address) {
        if let Address::Known { base, offset } = addr {
            self.code.address_known(Reg::R1, base, offset);
            self.push(Reg::R1);
        }
    }

    fn address_into(&mut self, reg: Reg, addr: Address) {
        match addr {
            Address::Known { base, offset } => self.code.address_known(reg, base, offset),
            Address::Stacked => self.pop(reg),
        }
    }

    fn push(&mut self, reg: Reg) {
        self.code.push(&[reg]);
    }

    fn pop(&mut self, reg: Reg) {
        self.code.pop(&[reg]);
    }

    fn is_aggregate(&self, ty: TypeId) -> bool {
        layout::is_aggregate(self.symbols, ty)
    }

    fn size_of(&self, ty: TypeId) -> u32 {
        self.symbols.ty(ty).size.unwrap_or(4)
    }
}
