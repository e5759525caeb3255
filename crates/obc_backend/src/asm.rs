//! ARM assembly as typed instructions, and its textual rendering.

use std::fmt;

use obc_ir::ast::Relation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Reg {
    R0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    Fp,
    Ip,
    Sp,
    Lr,
}

impl Reg {
    /// Registers carrying the first four call arguments.
    pub const ARGUMENTS: [Self; 4] = [Self::R0, Self::R1, Self::R2, Self::R3];

    /// Holds the address of the global data block throughout the program.
    pub const GLOBALS: Self = Self::R7;
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::R0 => "r0",
            Self::R1 => "r1",
            Self::R2 => "r2",
            Self::R3 => "r3",
            Self::R4 => "r4",
            Self::R5 => "r5",
            Self::R6 => "r6",
            Self::R7 => "r7",
            Self::Fp => "fp",
            Self::Ip => "ip",
            Self::Sp => "sp",
            Self::Lr => "lr",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Cond {
    #[must_use]
    pub fn negated(self) -> Self {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Lt => Self::Ge,
            Self::Le => Self::Gt,
            Self::Gt => Self::Le,
            Self::Ge => Self::Lt,
        }
    }
}

impl From<Relation> for Cond {
    fn from(relation: Relation) -> Self {
        match relation {
            Relation::Eq => Self::Eq,
            Relation::NotEq => Self::Ne,
            Relation::Less => Self::Lt,
            Relation::LessEq => Self::Le,
            Relation::Greater => Self::Gt,
            Relation::GreaterEq => Self::Ge,
        }
    }
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Gt => "gt",
            Self::Ge => "ge",
        };
        f.write_str(name)
    }
}

/// The flexible second operand of data processing instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Reg(Reg),
    /// Must be encodable, see [`is_immediate`].
    Imm(i32),
    Lsl(Reg, u32),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Reg(reg) => write!(f, "{reg}"),
            Self::Imm(value) => write!(f, "#{value}"),
            Self::Lsl(reg, shift) => write!(f, "{reg}, lsl #{shift}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mem {
    /// `[rn, #offset]`
    Offset(Reg, i32),
    /// `[rn, rm]`
    Indexed(Reg, Reg),
    /// `[rn], #offset`, writing `rn + offset` back to `rn`.
    PostIndexed(Reg, i32),
}

impl fmt::Display for Mem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Offset(base, 0) => write!(f, "[{base}]"),
            Self::Offset(base, offset) => write!(f, "[{base}, #{offset}]"),
            Self::Indexed(base, index) => write!(f, "[{base}, {index}]"),
            Self::PostIndexed(base, offset) => write!(f, "[{base}], #{offset}"),
        }
    }
}

/// Routines provided by the C library and the ARM EABI runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extern {
    Printf,
    Scanf,
    Exit,
    /// Quotient in `r0`.
    Idiv,
    /// Quotient in `r0`, remainder in `r1`.
    Idivmod,
}

impl fmt::Display for Extern {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Printf => "printf",
            Self::Scanf => "scanf",
            Self::Exit => "exit",
            Self::Idiv => "__aeabi_idiv",
            Self::Idivmod => "__aeabi_idivmod",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Callee {
    Label(Label),
    Extern(Extern),
}

impl fmt::Display for Callee {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Label(label) => write!(f, "{label}"),
            Self::Extern(ext) => write!(f, "{ext}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Label {
    Main,
    Procedure(String),
    False(u32),
    End(u32),
    Repeat(u32),
    Pool(u32),
    DivError(u32),
    ModError(u32),
    IndexError(u32),
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Main => write!(f, "main"),
            Self::Procedure(name) => write!(f, "proc_{name}"),
            Self::False(n) => write!(f, ".false{n}"),
            Self::End(n) => write!(f, ".end{n}"),
            Self::Repeat(n) => write!(f, ".repeat{n}"),
            Self::Pool(n) => write!(f, "L{n}"),
            Self::DivError(n) => write!(f, ".diverror{n}"),
            Self::ModError(n) => write!(f, ".moderror{n}"),
            Self::IndexError(n) => write!(f, ".indexerror{n}"),
        }
    }
}

/// Format strings passed to `printf` and `scanf`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Format {
    Print,
    Scan,
    DivError,
    ModError,
    IndexError,
}

impl Format {
    pub const ALL: [Self; 5] = [
        Self::Print,
        Self::Scan,
        Self::DivError,
        Self::ModError,
        Self::IndexError,
    ];

    pub fn text(self) -> &'static str {
        match self {
            Self::Print => "%d\n",
            Self::Scan => "%d",
            Self::DivError => "error: the expression on the right-hand side of the DIV cannot evaluate to zero at line %d, position: (%d, %d)\n",
            Self::ModError => "error: the expression on the right-hand side of the MOD cannot evaluate to zero at line %d, position: (%d, %d)\n",
            Self::IndexError => "error: the index value %d is out of bounds at line %d, position: (%d, %d)\n",
        }
    }
}

/// Data symbols an instruction can take the address of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Symbol {
    /// The global data block.
    Variables,
    Format(Format),
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Variables => write!(f, "variable"),
            Self::Format(Format::Print) => write!(f, ".fmt_print"),
            Self::Format(Format::Scan) => write!(f, ".fmt_scan"),
            Self::Format(Format::DivError) => write!(f, ".fmt_div"),
            Self::Format(Format::ModError) => write!(f, ".fmt_mod"),
            Self::Format(Format::IndexError) => write!(f, ".fmt_index"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Inst {
    Mov(Reg, Operand),
    /// `ldr rd, =value`, through the literal pool.
    LoadConst(Reg, i32),
    /// `ldr rd, =symbol`, through the literal pool.
    LoadAddr(Reg, Symbol),
    Ldr(Reg, Mem),
    Str(Reg, Mem),

    Add(Reg, Reg, Operand),
    Sub(Reg, Reg, Operand),
    Rsb(Reg, Reg, Operand),
    /// `rd := rm * rs`. `rd` and `rm` must differ.
    Mul(Reg, Reg, Reg),
    Cmp(Reg, Operand),

    B(Option<Cond>, Label),
    Bl(Callee),
    Bx(Reg),

    /// Register lists are kept in ascending order.
    Push(Vec<Reg>),
    Pop(Vec<Reg>),
}

struct RegList<'a>(&'a [Reg]);

impl fmt::Display for RegList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{")?;
        for (i, reg) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{reg}")?;
        }
        write!(f, "}}")
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Mov(rd, op) => write!(f, "mov {rd}, {op}"),
            Self::LoadConst(rd, value) => write!(f, "ldr {rd}, ={value}"),
            Self::LoadAddr(rd, symbol) => write!(f, "ldr {rd}, ={symbol}"),
            Self::Ldr(rd, mem) => write!(f, "ldr {rd}, {mem}"),
            Self::Str(rd, mem) => write!(f, "str {rd}, {mem}"),

            Self::Add(rd, rn, op) => write!(f, "add {rd}, {rn}, {op}"),
            Self::Sub(rd, rn, op) => write!(f, "sub {rd}, {rn}, {op}"),
            Self::Rsb(rd, rn, op) => write!(f, "rsb {rd}, {rn}, {op}"),
            Self::Mul(rd, rm, rs) => write!(f, "mul {rd}, {rm}, {rs}"),
            Self::Cmp(rn, op) => write!(f, "cmp {rn}, {op}"),

            Self::B(None, label) => write!(f, "b {label}"),
            Self::B(Some(cond), label) => write!(f, "b{cond} {label}"),
            Self::Bl(callee) => write!(f, "bl {callee}"),
            Self::Bx(rm) => write!(f, "bx {rm}"),

            Self::Push(regs) => write!(f, "push {}", RegList(regs)),
            Self::Pop(regs) => write!(f, "pop {}", RegList(regs)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Line {
    Inst(Inst),
    Label(Label),
    /// Dumps the pending literal pool.
    Ltorg,
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Inst(inst) => write!(f, "    {inst}"),
            Self::Label(label) => write!(f, "{label}:"),
            Self::Ltorg => write!(f, "    .ltorg"),
        }
    }
}

/// A complete assembly listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    /// Size of the global data block in bytes.
    pub globals_size: u32,
    pub formats: Vec<Format>,
    pub lines: Vec<Line>,
}

impl Listing {
    pub fn instructions(&self) -> impl Iterator<Item = &Inst> {
        self.lines.iter().filter_map(|line| match line {
            Line::Inst(inst) => Some(inst),
            _ => None,
        })
    }
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "    .data")?;
        writeln!(f, "{}:", Symbol::Variables)?;
        writeln!(f, "    .space {}, 0", self.globals_size)?;
        writeln!(f, "    .align 2")?;

        for format in &self.formats {
            writeln!(f, "{}:", Symbol::Format(*format))?;
            writeln!(f, "    .asciz \"{}\"", format.text().escape_default())?;
        }

        writeln!(f, "    .text")?;
        writeln!(f, "    .align 2")?;
        writeln!(f, "    .global {}", Label::Main)?;

        for line in &self.lines {
            writeln!(f, "{line}")?;
        }

        Ok(())
    }
}

/// Whether `value` fits an ARM data processing immediate: an 8-bit value
/// rotated right by an even amount.
pub fn is_immediate(value: i32) -> bool {
    let value = value as u32;
    (0..16).any(|rot| value.rotate_left(rot * 2) <= 0xff)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediates() {
        for value in [0, 1, 255, 256, 0x3fc, 0xff00_0000_u32 as i32, 0xf000_000f_u32 as i32] {
            assert!(is_immediate(value), "{value:#x}");
        }

        for value in [257, 0x1fe0_0001, -1, 0x0001_0001] {
            assert!(!is_immediate(value), "{value:#x}");
        }
    }

    #[test]
    fn rendering() {
        let lines = [
            Line::Label(Label::IndexError(3)),
            Line::Inst(Inst::Ldr(Reg::R2, Mem::Offset(Reg::Fp, -8))),
            Line::Inst(Inst::Ldr(Reg::R2, Mem::PostIndexed(Reg::R3, 4))),
            Line::Inst(Inst::Add(Reg::R1, Reg::R1, Operand::Lsl(Reg::R2, 2))),
            Line::Inst(Inst::B(Some(Cond::Ge), Label::IndexError(3))),
            Line::Inst(Inst::Push(vec![Reg::R4, Reg::Fp, Reg::Lr])),
            Line::Inst(Inst::Bl(Callee::Extern(Extern::Idivmod))),
            Line::Inst(Inst::LoadAddr(Reg::R0, Symbol::Format(Format::Print))),
        ];
        let text: Vec<String> = lines.iter().map(ToString::to_string).collect();

        assert_eq!(
            text,
            [
                ".indexerror3:",
                "    ldr r2, [fp, #-8]",
                "    ldr r2, [r3], #4",
                "    add r1, r1, r2, lsl #2",
                "    bge .indexerror3",
                "    push {r4, fp, lr}",
                "    bl __aeabi_idivmod",
                "    ldr r0, =.fmt_print",
            ]
        );
    }
}
