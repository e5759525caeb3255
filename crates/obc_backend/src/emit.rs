use crate::asm::{is_immediate, Inst, Label, Line, Mem, Operand, Reg};
use crate::frame::Base;

/// The instructions of one code unit: `main` or a single procedure.
#[derive(Debug, Default)]
pub struct CodeBuffer {
    lines: Vec<Line>,
    pool: Option<LiteralPool>,
}

#[derive(Debug)]
struct LiteralPool {
    distance: usize,
    since_flush: usize,
    flushes: u32,
}

/// Largest offset a word load or store can encode directly.
pub const MAX_MEM_OFFSET: u32 = 4095;

impl CodeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A buffer that dumps its literal pool, behind a branch, every `distance`
    /// instructions.
    pub fn with_literal_pool(distance: usize) -> Self {
        Self {
            lines: vec![],
            pool: Some(LiteralPool {
                distance: distance.max(1),
                since_flush: 0,
                flushes: 0,
            }),
        }
    }

    pub fn emit(&mut self, inst: Inst) {
        self.lines.push(Line::Inst(inst));

        let Some(pool) = &mut self.pool else {
            return;
        };

        pool.since_flush += 1;
        if pool.since_flush >= pool.distance {
            pool.flushes += 1;
            pool.since_flush = 0;

            let label = Label::Pool(pool.flushes);
            tracing::trace!("flushing literal pool at {label}");

            self.lines.push(Line::Inst(Inst::B(None, label.clone())));
            self.lines.push(Line::Ltorg);
            self.lines.push(Line::Label(label));
        }
    }

    pub fn label(&mut self, label: Label) {
        self.lines.push(Line::Label(label));
    }

    /// Dumps the literal pool at the end of a unit.
    pub fn ltorg(&mut self) {
        self.lines.push(Line::Ltorg);
        if let Some(pool) = &mut self.pool {
            pool.since_flush = 0;
        }
    }

    pub fn into_lines(self) -> Vec<Line> {
        self.lines
    }

    pub fn push(&mut self, regs: &[Reg]) {
        if !regs.is_empty() {
            self.emit(Inst::Push(sorted(regs)));
        }
    }

    pub fn pop(&mut self, regs: &[Reg]) {
        if !regs.is_empty() {
            self.emit(Inst::Pop(sorted(regs)));
        }
    }

    pub fn mov(&mut self, dst: Reg, src: Reg) {
        if dst != src {
            self.emit(Inst::Mov(dst, Operand::Reg(src)));
        }
    }

    pub fn load_imm(&mut self, dst: Reg, value: i32) {
        if is_immediate(value) {
            self.emit(Inst::Mov(dst, Operand::Imm(value)));
        } else {
            self.emit(Inst::LoadConst(dst, value));
        }
    }

    /// `dst := src + value`. `scratch` is written when `value` has no
    /// immediate encoding and must not be `src`.
    pub fn add_imm(&mut self, dst: Reg, src: Reg, value: i32, scratch: Reg) {
        if value == 0 {
            self.mov(dst, src);
        } else if is_immediate(value) {
            self.emit(Inst::Add(dst, src, Operand::Imm(value)));
        } else if value != i32::MIN && is_immediate(-value) {
            self.emit(Inst::Sub(dst, src, Operand::Imm(-value)));
        } else {
            self.emit(Inst::LoadConst(scratch, value));
            self.emit(Inst::Add(dst, src, Operand::Reg(scratch)));
        }
    }

    /// Loads the word stored at a known place.
    pub fn load_known(&mut self, dst: Reg, base: Base, offset: u32) {
        if offset <= MAX_MEM_OFFSET {
            self.emit(Inst::Ldr(dst, Mem::Offset(base.reg(), base.displacement(offset))));
        } else {
            self.address_known(dst, base, offset);
            self.emit(Inst::Ldr(dst, Mem::Offset(dst, 0)));
        }
    }

    /// Stores `src` to a known place. `scratch` is only written for offsets out
    /// of reach of a single store.
    pub fn store_known(&mut self, src: Reg, base: Base, offset: u32, scratch: Reg) {
        if offset <= MAX_MEM_OFFSET {
            self.emit(Inst::Str(src, Mem::Offset(base.reg(), base.displacement(offset))));
        } else {
            self.address_known(scratch, base, offset);
            self.emit(Inst::Str(src, Mem::Offset(scratch, 0)));
        }
    }

    /// Computes the address of a known place into `dst`.
    pub fn address_known(&mut self, dst: Reg, base: Base, offset: u32) {
        let offset = offset as i32;
        let op = if is_immediate(offset) {
            Operand::Imm(offset)
        } else {
            self.emit(Inst::LoadConst(dst, offset));
            Operand::Reg(dst)
        };

        match base {
            Base::Globals => self.emit(Inst::Add(dst, Reg::GLOBALS, op)),
            Base::Frame => self.emit(Inst::Sub(dst, Reg::Fp, op)),
        }
    }

    /// Copies `words` words from the address in `src` to the address in `dst`,
    /// advancing both.
    pub fn copy_words(&mut self, dst: Reg, src: Reg, tmp: Reg, words: u32) {
        for _ in 0..words {
            self.emit(Inst::Ldr(tmp, Mem::PostIndexed(src, 4)));
            self.emit(Inst::Str(tmp, Mem::PostIndexed(dst, 4)));
        }
    }
}

fn sorted(regs: &[Reg]) -> Vec<Reg> {
    let mut regs = regs.to_vec();
    regs.sort_unstable();
    regs.dedup();
    regs
}
