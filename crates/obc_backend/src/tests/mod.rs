mod codegen;

use std::str::FromStr;

use obc_ir::ast::{BinOp, Expression, Location};
use obc_ir::symbols::{EntryId, Symbols};
use obc_ir::{Program, Span};
use target_lexicon::Triple;

use crate::asm::Listing;
use crate::{compile_program, BackendResult, Generator, Options};
use machine::{Machine, Outcome};

pub const GENERATORS: [Generator; 2] = [Generator::Register, Generator::Naive];

pub fn arm() -> Triple {
    Triple::from_str("armv7-unknown-linux-gnueabihf").unwrap()
}

pub fn at(line: u32, start: u32, end: u32) -> Span {
    Span::new(line, start, end)
}

pub fn num(value: i64) -> Expression {
    Expression::number(value, Span::default())
}

pub fn num_at(value: i64, span: Span) -> Expression {
    Expression::number(value, span)
}

pub fn var(symbols: &Symbols, id: EntryId) -> Location {
    var_at(symbols, id, Span::default())
}

pub fn var_at(symbols: &Symbols, id: EntryId, span: Span) -> Location {
    let ty = symbols.variable(id).unwrap().ty;
    Location::variable(id, ty, span)
}

pub fn index(symbols: &Symbols, base: Location, index: Expression) -> Location {
    let ty = symbols.element_type(base.ty).unwrap();
    let span = index.span;
    Location::index(base, index, ty, span)
}

pub fn field(symbols: &Symbols, base: Location, name: &str) -> Location {
    let id = symbols.field(base.ty, name).unwrap();
    let ty = symbols.variable(id).unwrap().ty;
    let span = base.span;
    Location::field(base, id, ty, span)
}

pub fn value(location: Location) -> Expression {
    Expression::location(location)
}

pub fn bin(op: BinOp, lhs: Expression, rhs: Expression) -> Expression {
    Expression::binary(op, lhs, rhs, Span::default())
}

pub fn call(symbols: &Symbols, procedure: EntryId, args: Vec<Expression>) -> Expression {
    let ty = symbols.procedure(procedure).unwrap().return_type.unwrap();
    Expression::call(procedure, args, ty, Span::default())
}

pub fn compile(program: &Program, options: Options) -> BackendResult<Listing> {
    let mut program = program.clone();
    compile_program(&mut program, &arm(), &options)
}

pub fn compile_with(program: &Program, generator: Generator) -> BackendResult<Listing> {
    compile(
        program,
        Options {
            generator,
            ..Options::default()
        },
    )
}

pub fn run(program: &Program, generator: Generator, input: &[i32]) -> Outcome {
    let listing = compile_with(program, generator).unwrap();
    Machine::new(&listing).run(input)
}

/// Runs the program with both generators, which must agree.
pub fn run_both(program: &Program, input: &[i32]) -> Outcome {
    let register = run(program, Generator::Register, input);
    let naive = run(program, Generator::Naive, input);
    assert_eq!(register, naive, "generators disagree");
    register
}
