use crate::symbols::{EntryId, Symbols, TypeId};
use crate::{Node, NodeCopy, Span};

#[derive(NodeCopy!)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinOp {
    /// Evaluates the operator the way the generated code does: wrapping 32-bit
    /// arithmetic, truncating division. `None` for a zero divisor.
    pub fn eval(self, lhs: i32, rhs: i32) -> Option<i32> {
        match self {
            Self::Add => Some(lhs.wrapping_add(rhs)),
            Self::Sub => Some(lhs.wrapping_sub(rhs)),
            Self::Mul => Some(lhs.wrapping_mul(rhs)),
            Self::Div => (rhs != 0).then(|| lhs.wrapping_div(rhs)),
            Self::Mod => (rhs != 0).then(|| lhs.wrapping_rem(rhs)),
        }
    }
}

#[derive(NodeCopy!)]
pub enum Relation {
    Eq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
}

impl Relation {
    /// The relation that holds exactly when `self` does not.
    #[must_use]
    pub fn negated(self) -> Self {
        match self {
            Self::Eq => Self::NotEq,
            Self::NotEq => Self::Eq,
            Self::Less => Self::GreaterEq,
            Self::LessEq => Self::Greater,
            Self::Greater => Self::LessEq,
            Self::GreaterEq => Self::Less,
        }
    }

    /// The relation with its operands swapped: `a < b` is `b > a`.
    #[must_use]
    pub fn swapped(self) -> Self {
        match self {
            Self::Eq => Self::Eq,
            Self::NotEq => Self::NotEq,
            Self::Less => Self::Greater,
            Self::LessEq => Self::GreaterEq,
            Self::Greater => Self::Less,
            Self::GreaterEq => Self::LessEq,
        }
    }
}

#[derive(Node!)]
pub struct Expression {
    pub kind: ExpressionKind,
    pub ty: TypeId,
    pub span: Span,
}

#[derive(Node!)]
pub enum ExpressionKind {
    Number(i32),
    Binary {
        op: BinOp,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    Location(Location),
    Call {
        procedure: EntryId,
        args: Vec<Expression>,
    },
}

impl Expression {
    /// An integer literal, reduced modulo 2^32.
    pub fn number(value: i64, span: Span) -> Self {
        Self {
            kind: ExpressionKind::Number(value as i32),
            ty: Symbols::INTEGER,
            span,
        }
    }

    /// A binary operation. Two number operands are folded into one number,
    /// except for a division or modulo by zero, which is kept for the runtime
    /// guard to report.
    pub fn binary(op: BinOp, lhs: Self, rhs: Self, span: Span) -> Self {
        if let (ExpressionKind::Number(a), ExpressionKind::Number(b)) = (&lhs.kind, &rhs.kind) {
            if let Some(value) = op.eval(*a, *b) {
                return Self {
                    span,
                    ..lhs.with_value(value)
                };
            }
        }

        Self {
            kind: ExpressionKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            ty: Symbols::INTEGER,
            span,
        }
    }

    pub fn location(location: Location) -> Self {
        Self {
            ty: location.ty,
            span: location.span,
            kind: ExpressionKind::Location(location),
        }
    }

    /// A function call. `ty` is the callee's return type.
    pub fn call(procedure: EntryId, args: Vec<Self>, ty: TypeId, span: Span) -> Self {
        Self {
            kind: ExpressionKind::Call { procedure, args },
            ty,
            span,
        }
    }

    /// A number with this expression's type and span.
    #[must_use]
    pub fn with_value(&self, value: i32) -> Self {
        Self {
            kind: ExpressionKind::Number(value),
            ty: self.ty,
            span: self.span,
        }
    }

    pub fn as_number(&self) -> Option<i32> {
        match self.kind {
            ExpressionKind::Number(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Node!)]
pub struct Location {
    pub kind: LocationKind,
    pub ty: TypeId,
    pub span: Span,
}

#[derive(Node!)]
pub enum LocationKind {
    Variable(EntryId),
    Index {
        base: Box<Location>,
        index: Box<Expression>,
    },
    Field {
        base: Box<Location>,
        field: EntryId,
    },
}

impl Location {
    pub fn variable(entry: EntryId, ty: TypeId, span: Span) -> Self {
        Self {
            kind: LocationKind::Variable(entry),
            ty,
            span,
        }
    }

    /// An array element. `ty` is the element type of `base`.
    pub fn index(base: Self, index: Expression, ty: TypeId, span: Span) -> Self {
        Self {
            kind: LocationKind::Index {
                base: Box::new(base),
                index: Box::new(index),
            },
            ty,
            span,
        }
    }

    /// A record field. `ty` is the field's type.
    pub fn field(base: Self, field: EntryId, ty: TypeId, span: Span) -> Self {
        Self {
            kind: LocationKind::Field {
                base: Box::new(base),
                field,
            },
            ty,
            span,
        }
    }
}

#[derive(Node!)]
pub struct Condition {
    pub relation: Relation,
    pub lhs: Expression,
    pub rhs: Expression,
    pub span: Span,
}

impl Condition {
    pub fn new(relation: Relation, lhs: Expression, rhs: Expression, span: Span) -> Self {
        Self {
            relation,
            lhs,
            rhs,
            span,
        }
    }

    /// The same comparison with the relation negated.
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self {
            relation: self.relation.negated(),
            ..self.clone()
        }
    }
}

/// A statement and the rest of its statement sequence.
///
/// Serialized as a flat sequence of statements rather than a nested chain.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(into = "Vec<InstructionKind>", try_from = "Vec<InstructionKind>")]
pub struct Instruction {
    pub kind: InstructionKind,
    pub next: Option<Box<Instruction>>,
}

#[derive(Node!)]
pub enum InstructionKind {
    Assign {
        location: Location,
        expr: Expression,
    },
    Read(Location),
    Write(Expression),
    If {
        condition: Condition,
        then: Option<Box<Instruction>>,
        otherwise: Option<Box<Instruction>>,
    },
    Repeat {
        body: Option<Box<Instruction>>,
        condition: Condition,
    },
    Call {
        procedure: EntryId,
        args: Vec<Expression>,
    },
}

impl Instruction {
    pub fn new(kind: InstructionKind) -> Self {
        Self { kind, next: None }
    }

    pub fn assign(location: Location, expr: Expression) -> Self {
        Self::new(InstructionKind::Assign { location, expr })
    }

    pub fn read(location: Location) -> Self {
        Self::new(InstructionKind::Read(location))
    }

    pub fn write(expr: Expression) -> Self {
        Self::new(InstructionKind::Write(expr))
    }

    pub fn if_then(condition: Condition, then: Option<Self>) -> Self {
        Self::new(InstructionKind::If {
            condition,
            then: then.map(Box::new),
            otherwise: None,
        })
    }

    pub fn if_else(condition: Condition, then: Option<Self>, otherwise: Option<Self>) -> Self {
        Self::new(InstructionKind::If {
            condition,
            then: then.map(Box::new),
            otherwise: otherwise.map(Box::new),
        })
    }

    /// A post-test loop: runs `body` until `condition` holds.
    pub fn repeat(body: Option<Self>, condition: Condition) -> Self {
        Self::new(InstructionKind::Repeat {
            body: body.map(Box::new),
            condition,
        })
    }

    /// A pre-test loop, lowered to `IF c THEN REPEAT body UNTIL NOT c END`.
    pub fn while_loop(condition: Condition, body: Option<Self>) -> Self {
        let until = condition.reversed();
        Self::if_then(condition, Some(Self::repeat(body, until)))
    }

    pub fn call(procedure: EntryId, args: Vec<Expression>) -> Self {
        Self::new(InstructionKind::Call { procedure, args })
    }

    /// Links the given statements into one sequence, replacing any successors
    /// they had. `None` for an empty sequence.
    pub fn chain(instructions: impl IntoIterator<Item = Self>) -> Option<Self> {
        let instructions: Vec<Self> = instructions.into_iter().collect();

        instructions.into_iter().rev().fold(None, |next, mut instr| {
            instr.next = next.map(Box::new);
            Some(instr)
        })
    }

    /// Iterates over this statement and its successors.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            current: Some(self),
        }
    }
}

impl Drop for Instruction {
    // Unlinks the sequence one statement at a time, so dropping a long
    // sequence doesn't recurse once per statement.
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(mut instr) = next {
            next = instr.next.take();
        }
    }
}

pub struct Iter<'a> {
    current: Option<&'a Instruction>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Instruction;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;
        self.current = current.next.as_deref();
        Some(current)
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("empty statement sequence")]
pub struct EmptySequence;

impl From<Instruction> for Vec<InstructionKind> {
    fn from(instr: Instruction) -> Self {
        instr.iter().map(|instr| instr.kind.clone()).collect()
    }
}

impl TryFrom<Vec<InstructionKind>> for Instruction {
    type Error = EmptySequence;

    fn try_from(kinds: Vec<InstructionKind>) -> Result<Self, Self::Error> {
        Self::chain(kinds.into_iter().map(Self::new)).ok_or(EmptySequence)
    }
}
