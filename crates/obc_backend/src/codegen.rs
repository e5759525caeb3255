//! The register allocating generator.
//!
//! Expression values live in registers drawn from a [`RegisterPool`]; number
//! literals stay immediates until an instruction needs them. Procedure bodies
//! are generated into their own units after `main`.

use std::collections::BTreeSet;

use obc_ir::ast::{
    BinOp, Condition, Expression, ExpressionKind, Instruction, InstructionKind, Location,
    LocationKind,
};
use obc_ir::symbols::{EntryId, ScopeId, Symbols, TypeId, TypeKind, VariableKind};
use obc_ir::{Program, Span};

use crate::asm::{is_immediate, Callee, Cond, Extern, Format, Inst, Label, Line, Listing, Mem};
use crate::asm::{Operand, Reg, Symbol};
use crate::emit::{CodeBuffer, MAX_MEM_OFFSET};
use crate::frame::{self, Base};
use crate::guards::Guards;
use crate::layout;
use crate::procedures::ProcedureQueue;
use crate::registers::RegisterPool;
use crate::{BackendError, BackendResult, Options};

/// Where a location is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Place {
    /// At a fixed offset, no code emitted.
    Known { base: Base, offset: u32 },
    /// At the address held in a register.
    Runtime(Reg),
}

/// An expression's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Imm(i32),
    Reg(Reg),
}

/// Registers `main` uses that its caller expects preserved.
const MAIN_SAVED: [Reg; 6] = [Reg::R4, Reg::R5, Reg::R6, Reg::R7, Reg::Fp, Reg::Lr];

pub fn generate(program: &Program, globals_size: u32, options: &Options) -> BackendResult<Listing> {
    let mut codegen = Codegen::new(&program.symbols, options);

    let mut lines = codegen.gen_main(program.body.as_ref())?;

    while let Some(id) = codegen.procedures.next() {
        lines.extend(codegen.gen_procedure(id)?);
    }

    Ok(Listing {
        globals_size,
        formats: codegen.formats.into_iter().collect(),
        lines,
    })
}

pub struct Codegen<'a> {
    symbols: &'a Symbols,
    options: &'a Options,

    registers: RegisterPool,
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

impl<'a> Codegen<'a> {
    pub fn new(symbols: &'a Symbols, options: &'a Options) -> Self {
        Self {
            symbols,
            options,

            registers: RegisterPool::new(),
            code: CodeBuffer::new(),
            guards: Guards::new(),
            procedures: ProcedureQueue::new(options.procedures, symbols),
            formats: BTreeSet::new(),

            scope: None,

            false_labels: 0,
            end_labels: 0,
            repeat_labels: 0,
        }
    }

    pub fn gen_main(&mut self, body: Option<&Instruction>) -> BackendResult<Vec<Line>> {
        self.begin_unit(CodeBuffer::with_literal_pool(self.options.literal_pool_distance));
        self.scope = None;

        self.code.label(Label::Main);
        self.code.push(&MAIN_SAVED);
        self.code.emit(Inst::LoadAddr(Reg::GLOBALS, Symbol::Variables));

        self.gen_sequence(body)?;

        self.code.emit(Inst::Mov(Reg::R0, Operand::Imm(0)));
        self.code.pop(&MAIN_SAVED);
        self.code.emit(Inst::Bx(Reg::Lr));

        Ok(self.end_unit())
    }

    pub fn gen_procedure(&mut self, id: EntryId) -> BackendResult<Vec<Line>> {
        let proc = frame::procedure(self.symbols, id)?;
        tracing::debug!("generating procedure {}", proc.name);

        self.begin_unit(CodeBuffer::new());
        self.scope = Some(proc.scope);

        frame::prologue(&mut self.code, self.symbols, id)?;
        self.gen_sequence(proc.body.as_ref())?;

        if let Some(expr) = &proc.return_expr {
            match self.gen_expr(expr)? {
                Value::Imm(value) => self.code.load_imm(Reg::R0, value),
                Value::Reg(reg) => {
                    self.code.mov(Reg::R0, reg);
                    self.registers.free(reg)?;
                }
            }
        }

        frame::epilogue(&mut self.code);

        Ok(self.end_unit())
    }

    fn begin_unit(&mut self, code: CodeBuffer) {
        self.code = code;
        self.registers = RegisterPool::new();
    }

    fn end_unit(&mut self) -> Vec<Line> {
        self.guards.flush(&mut self.code, &mut self.formats);
        self.code.ltorg();
        std::mem::take(&mut self.code).into_lines()
    }

    /// The allocation and free counts of the current unit.
    pub fn register_counts(&self) -> (usize, usize) {
        self.registers.counts()
    }

    pub fn gen_sequence(&mut self, seq: Option<&Instruction>) -> BackendResult<()> {
        for instr in seq.into_iter().flat_map(Instruction::iter) {
            self.gen_instr(instr)?;
        }
        Ok(())
    }

    fn gen_instr(&mut self, instr: &Instruction) -> BackendResult<()> {
        match &instr.kind {
            InstructionKind::Assign { location, expr } => {
                if self.is_aggregate(location) {
                    self.gen_copy(location, expr)
                } else {
                    self.gen_assign(location, expr)
                }
            }

            InstructionKind::Read(location) => self.gen_read(location),

            InstructionKind::Write(expr) => self.gen_write(expr),

            InstructionKind::If {
                condition,
                then,
                otherwise,
            } => self.gen_if(condition, then.as_deref(), otherwise.as_deref()),

            InstructionKind::Repeat { body, condition } => {
                self.repeat_labels += 1;
                let top = Label::Repeat(self.repeat_labels);

                self.code.label(top.clone());
                self.gen_sequence(body.as_deref())?;

                let cond = self.gen_condition(condition)?;
                self.code.emit(Inst::B(Some(cond.negated()), top));

                Ok(())
            }

            InstructionKind::Call { procedure, args } => {
                if let Some(result) = self.gen_call(*procedure, args)? {
                    self.registers.free(result)?;
                }
                Ok(())
            }
        }
    }

    fn gen_assign(&mut self, location: &Location, expr: &Expression) -> BackendResult<()> {
        let place = self.gen_location(location)?;
        let value = self.gen_expr(expr)?;
        let value = self.materialize(value)?;

        self.store(value, place)?;
        self.registers.free(value)
    }

    /// Copies an array or record word by word.
    fn gen_copy(&mut self, location: &Location, expr: &Expression) -> BackendResult<()> {
        let ExpressionKind::Location(source) = &expr.kind else {
            return Err(BackendError::AggregateValue(expr.span));
        };

        let words = self.size_of(location.ty) / 4;

        let dst = self.gen_location(location)?;
        let dst = self.address(dst)?;
        let src = self.gen_location(source)?;
        let src = self.address(src)?;
        let tmp = self.registers.alloc()?;

        self.code.copy_words(dst, src, tmp, words);

        for reg in [tmp, src, dst] {
            self.registers.free(reg)?;
        }
        Ok(())
    }

    fn gen_read(&mut self, location: &Location) -> BackendResult<()> {
        let place = self.gen_location(location)?;
        let addr = self.address(place)?;

        let saved = self.registers.live_arguments(&[addr]);
        self.code.push(&saved);
        self.code.mov(Reg::R1, addr);
        self.call_extern_with_format(Extern::Scanf, Format::Scan);
        self.code.pop(&saved);

        self.registers.free(addr)
    }

    fn gen_write(&mut self, expr: &Expression) -> BackendResult<()> {
        let value = self.gen_expr(expr)?;

        let except = match value {
            Value::Reg(reg) => vec![reg],
            Value::Imm(_) => vec![],
        };
        let saved = self.registers.live_arguments(&except);
        self.code.push(&saved);

        match value {
            Value::Reg(reg) => self.code.mov(Reg::R1, reg),
            Value::Imm(value) => self.code.load_imm(Reg::R1, value),
        }
        self.call_extern_with_format(Extern::Printf, Format::Print);
        self.code.pop(&saved);

        if let Value::Reg(reg) = value {
            self.registers.free(reg)?;
        }
        Ok(())
    }

    fn call_extern_with_format(&mut self, ext: Extern, format: Format) {
        self.formats.insert(format);
        self.code.emit(Inst::LoadAddr(Reg::R0, Symbol::Format(format)));
        self.code.emit(Inst::Bl(Callee::Extern(ext)));
    }

    fn gen_if(
        &mut self,
        condition: &Condition,
        then: Option<&Instruction>,
        otherwise: Option<&Instruction>,
    ) -> BackendResult<()> {
        let cond = self.gen_condition(condition)?;

        self.end_labels += 1;
        let end = Label::End(self.end_labels);

        match otherwise {
            None => {
                self.code.emit(Inst::B(Some(cond.negated()), end.clone()));
                self.gen_sequence(then)?;
            }

            Some(otherwise) => {
                self.false_labels += 1;
                let false_label = Label::False(self.false_labels);

                self.code.emit(Inst::B(Some(cond.negated()), false_label.clone()));
                self.gen_sequence(then)?;
                self.code.emit(Inst::B(None, end.clone()));

                self.code.label(false_label);
                self.gen_sequence(Some(otherwise))?;
            }
        }

        self.code.label(end);
        Ok(())
    }

    /// Compares the operands of `condition`, returning the condition code
    /// under which it holds.
    fn gen_condition(&mut self, condition: &Condition) -> BackendResult<Cond> {
        let lhs = self.gen_expr(&condition.lhs)?;
        let rhs = self.gen_expr(&condition.rhs)?;

        let (reg, other, relation) = match (lhs, rhs) {
            (Value::Reg(lhs), rhs) => (lhs, rhs, condition.relation),
            (Value::Imm(lhs), Value::Reg(rhs)) => {
                (rhs, Value::Imm(lhs), condition.relation.swapped())
            }
            (Value::Imm(lhs), Value::Imm(rhs)) => {
                (self.materialize(Value::Imm(lhs))?, Value::Imm(rhs), condition.relation)
            }
        };

        let (operand, other_reg) = self.operand(other)?;
        self.code.emit(Inst::Cmp(reg, operand));

        self.registers.free(reg)?;
        if let Some(other_reg) = other_reg {
            self.registers.free(other_reg)?;
        }

        Ok(Cond::from(relation))
    }

    /// Turns a value into an instruction operand, loading immediates that
    /// can't be encoded. Returns the register to free afterwards, if any.
    fn operand(&mut self, value: Value) -> BackendResult<(Operand, Option<Reg>)> {
        match value {
            Value::Imm(value) if is_immediate(value) => Ok((Operand::Imm(value), None)),
            value => {
                let reg = self.materialize(value)?;
                Ok((Operand::Reg(reg), Some(reg)))
            }
        }
    }

    pub fn gen_expr(&mut self, expr: &Expression) -> BackendResult<Value> {
        match &expr.kind {
            ExpressionKind::Number(value) => Ok(Value::Imm(*value)),

            ExpressionKind::Binary { op, lhs, rhs } => self.gen_binary(*op, lhs, rhs),

            ExpressionKind::Location(location) => {
                if self.is_aggregate(location) {
                    return Err(BackendError::AggregateValue(expr.span));
                }

                let place = self.gen_location(location)?;
                self.load(place).map(Value::Reg)
            }

            ExpressionKind::Call { procedure, args } => self
                .gen_call(*procedure, args)?
                .map(Value::Reg)
                .ok_or(BackendError::MissingReturn(*procedure)),
        }
    }

    fn gen_binary(&mut self, op: BinOp, lhs: &Expression, rhs: &Expression) -> BackendResult<Value> {
        let rhs_span = rhs.span;
        let lhs = self.gen_expr(lhs)?;
        let rhs = self.gen_expr(rhs)?;

        let result = match (op, lhs, rhs) {
            (BinOp::Div | BinOp::Mod, lhs, rhs) => self.gen_division(op, lhs, rhs, rhs_span)?,

            (BinOp::Add, Value::Reg(reg), Value::Imm(value))
            | (BinOp::Add, Value::Imm(value), Value::Reg(reg)) => {
                self.add_imm(reg, value)?;
                reg
            }

            (BinOp::Sub, Value::Reg(reg), Value::Imm(value)) => {
                self.add_imm(reg, value.wrapping_neg())?;
                reg
            }

            (BinOp::Sub, Value::Imm(value), Value::Reg(reg)) if is_immediate(value) => {
                self.code.emit(Inst::Rsb(reg, reg, Operand::Imm(value)));
                reg
            }

            (BinOp::Add | BinOp::Sub, lhs, rhs) => {
                let lhs = self.materialize(lhs)?;
                let (rhs, rhs_reg) = self.operand(rhs)?;

                if op == BinOp::Add {
                    self.code.emit(Inst::Add(lhs, lhs, rhs));
                } else {
                    self.code.emit(Inst::Sub(lhs, lhs, rhs));
                }

                if let Some(rhs_reg) = rhs_reg {
                    self.registers.free(rhs_reg)?;
                }
                lhs
            }

            (BinOp::Mul, lhs, rhs) => {
                let lhs = self.materialize(lhs)?;
                let rhs = self.materialize(rhs)?;

                self.code.emit(Inst::Mul(rhs, lhs, rhs));
                self.registers.free(lhs)?;
                rhs
            }
        };

        Ok(Value::Reg(result))
    }

    /// `reg := reg + value`.
    fn add_imm(&mut self, reg: Reg, value: i32) -> BackendResult<()> {
        if is_immediate(value) || (value != i32::MIN && is_immediate(-value)) {
            // No scratch needed.
            self.code.add_imm(reg, reg, value, reg);
            return Ok(());
        }

        let scratch = self.registers.alloc()?;
        self.code.add_imm(reg, reg, value, scratch);
        self.registers.free(scratch)
    }

    /// Divides through the EABI helpers, which take their operands in `r0` and
    /// `r1` and clobber the other argument registers. A zero divisor branches
    /// to a guard instead.
    fn gen_division(&mut self, op: BinOp, lhs: Value, rhs: Value, span: Span) -> BackendResult<Reg> {
        // The operands are consumed, but keep their values until moved below.
        for value in [lhs, rhs] {
            if let Value::Reg(reg) = value {
                self.registers.free(reg)?;
            }
        }

        let result = self.registers.alloc()?;
        let saved = self.registers.live_arguments(&[result]);
        self.code.push(&saved);

        // Through the stack, since the operands may sit in each other's target.
        for value in [lhs, rhs] {
            if let Value::Reg(reg) = value {
                self.code.push(&[reg]);
            }
        }
        for (value, target) in [(rhs, Reg::R1), (lhs, Reg::R0)] {
            if let Value::Reg(_) = value {
                self.code.pop(&[target]);
            }
        }
        for (value, target) in [(lhs, Reg::R0), (rhs, Reg::R1)] {
            if let Value::Imm(value) = value {
                self.code.load_imm(target, value);
            }
        }

        let (guard, helper, out) = match op {
            BinOp::Mod => (self.guards.modulo(span), Extern::Idivmod, Reg::R1),
            _ => (self.guards.div(span), Extern::Idiv, Reg::R0),
        };

        self.code.emit(Inst::Cmp(Reg::R1, Operand::Imm(0)));
        self.code.emit(Inst::B(Some(Cond::Eq), guard));
        self.code.emit(Inst::Bl(Callee::Extern(helper)));
        self.code.mov(result, out);

        self.code.pop(&saved);
        Ok(result)
    }

    /// Calls a procedure. Returns the register holding the result of a
    /// function.
    fn gen_call(&mut self, id: EntryId, args: &[Expression]) -> BackendResult<Option<Reg>> {
        let proc = frame::procedure(self.symbols, id)?;
        if args.len() > Reg::ARGUMENTS.len() {
            return Err(BackendError::TooManyArguments {
                procedure: proc.name.clone(),
                count: args.len(),
            });
        }

        // The callee is free to use every allocatable register.
        let saved = self.registers.in_use();
        self.code.push(&saved);

        for (arg, &param) in args.iter().zip(&proc.params) {
            let reg = if frame::by_reference(self.symbols, param) {
                let ExpressionKind::Location(location) = &arg.kind else {
                    return Err(BackendError::AggregateValue(arg.span));
                };
                let place = self.gen_location(location)?;
                self.address(place)?
            } else {
                let value = self.gen_expr(arg)?;
                self.materialize(value)?
            };

            self.code.push(&[reg]);
            self.registers.free(reg)?;
        }

        for &target in Reg::ARGUMENTS[..args.len()].iter().rev() {
            self.code.pop(&[target]);
        }

        self.procedures.request(id);
        self.code.emit(Inst::Bl(Callee::Label(Label::Procedure(proc.name.clone()))));

        let result = match proc.return_type {
            Some(_) => {
                let reg = self.registers.alloc()?;
                self.code.mov(reg, Reg::R0);
                Some(reg)
            }
            None => None,
        };

        self.code.pop(&saved);
        Ok(result)
    }

    pub fn gen_location(&mut self, location: &Location) -> BackendResult<Place> {
        match &location.kind {
            LocationKind::Variable(id) => self.gen_variable(*id),

            LocationKind::Index { base, index } => {
                let TypeKind::Array { length, .. } = self.symbols.ty(base.ty).kind else {
                    return Err(BackendError::NotAnArray(base.span));
                };
                let elem_size = self.size_of(location.ty);

                let place = self.gen_location(base)?;

                if let Some(value) = index.as_number() {
                    if value < 0 || value as u32 >= length {
                        return Err(BackendError::IndexOutOfBounds {
                            index: value,
                            length,
                            span: index.span,
                        });
                    }
                    return self.advance(place, value as u32 * elem_size);
                }

                let addr = self.address(place)?;
                let index_value = self.gen_expr(index)?;
                let index_reg = self.materialize(index_value)?;

                let guard = self.guards.index(index_reg, index.span);
                self.code.emit(Inst::Cmp(index_reg, Operand::Imm(0)));
                self.code.emit(Inst::B(Some(Cond::Lt), guard.clone()));

                let (len, len_reg) = self.operand(Value::Imm(length as i32))?;
                self.code.emit(Inst::Cmp(index_reg, len));
                self.code.emit(Inst::B(Some(Cond::Ge), guard));
                if let Some(len_reg) = len_reg {
                    self.registers.free(len_reg)?;
                }

                if elem_size.is_power_of_two() {
                    let shift = elem_size.trailing_zeros();
                    self.code.emit(Inst::Add(addr, addr, Operand::Lsl(index_reg, shift)));
                } else {
                    let scaled = self.registers.alloc()?;
                    self.code.load_imm(scaled, elem_size as i32);
                    self.code.emit(Inst::Mul(scaled, index_reg, scaled));
                    self.code.emit(Inst::Add(addr, addr, Operand::Reg(scaled)));
                    self.registers.free(scaled)?;
                }

                self.registers.free(index_reg)?;
                Ok(Place::Runtime(addr))
            }

            LocationKind::Field { base, field } => {
                let offset = self
                    .symbols
                    .variable(*field)
                    .and_then(|var| var.offset)
                    .ok_or(BackendError::MissingOffset(*field))?;

                let place = self.gen_location(base)?;
                self.advance(place, offset)
            }
        }
    }

    fn gen_variable(&mut self, id: EntryId) -> BackendResult<Place> {
        let var = self
            .symbols
            .variable(id)
            .ok_or(BackendError::NotAVariable(id))?;
        let offset = var.offset.ok_or(BackendError::MissingOffset(id))?;

        if matches!(var.kind, VariableKind::Local | VariableKind::Formal) {
            frame::check_own_slot(self.symbols, self.scope, id)?;
        }

        match var.kind {
            VariableKind::Global => Ok(Place::Known {
                base: Base::Globals,
                offset,
            }),

            VariableKind::Formal if frame::by_reference(self.symbols, id) => {
                let reg = self.registers.alloc()?;
                self.code.load_known(reg, Base::Frame, offset);
                Ok(Place::Runtime(reg))
            }

            VariableKind::Local | VariableKind::Formal => Ok(Place::Known {
                base: Base::Frame,
                offset,
            }),

            VariableKind::Field => Err(BackendError::NotAVariable(id)),
        }
    }

    /// The place `delta` bytes above `place`.
    fn advance(&mut self, place: Place, delta: u32) -> BackendResult<Place> {
        match place {
            Place::Known { base, offset } => Ok(Place::Known {
                base,
                offset: base.advance(offset, delta),
            }),
            Place::Runtime(reg) => {
                self.add_imm(reg, delta as i32)?;
                Ok(Place::Runtime(reg))
            }
        }
    }

    fn load(&mut self, place: Place) -> BackendResult<Reg> {
        match place {
            Place::Known { base, offset } => {
                let reg = self.registers.alloc()?;
                self.code.load_known(reg, base, offset);
                Ok(reg)
            }
            Place::Runtime(reg) => {
                self.code.emit(Inst::Ldr(reg, Mem::Offset(reg, 0)));
                Ok(reg)
            }
        }
    }

    fn store(&mut self, value: Reg, place: Place) -> BackendResult<()> {
        match place {
            Place::Known { base, offset } if offset <= MAX_MEM_OFFSET => {
                self.code.store_known(value, base, offset, value);
                Ok(())
            }
            Place::Known { base, offset } => {
                let scratch = self.registers.alloc()?;
                self.code.store_known(value, base, offset, scratch);
                self.registers.free(scratch)
            }
            Place::Runtime(reg) => {
                self.code.emit(Inst::Str(value, Mem::Offset(reg, 0)));
                self.registers.free(reg)
            }
        }
    }

    fn address(&mut self, place: Place) -> BackendResult<Reg> {
        match place {
            Place::Known { base, offset } => {
                let reg = self.registers.alloc()?;
                self.code.address_known(reg, base, offset);
                Ok(reg)
            }
            Place::Runtime(reg) => Ok(reg),
        }
    }

    fn materialize(&mut self, value: Value) -> BackendResult<Reg> {
        match value {
            Value::Reg(reg) => Ok(reg),
            Value::Imm(value) => {
                let reg = self.registers.alloc()?;
                self.code.load_imm(reg, value);
                Ok(reg)
            }
        }
    }

    fn is_aggregate(&self, location: &Location) -> bool {
        layout::is_aggregate(self.symbols, location.ty)
    }

    fn size_of(&self, ty: TypeId) -> u32 {
        self.symbols.ty(ty).size.unwrap_or(4)
    }
}
