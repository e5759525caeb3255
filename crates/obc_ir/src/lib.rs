//! Types describing a checked program as handed over by the front end: the
//! symbol table with its types, entries and scopes, and the statement tree.

#[macro_use]
extern crate macro_rules_attribute;

pub mod ast;
pub mod symbols;


use ast::Instruction;
use symbols::Symbols;

derive_alias! {
    #[derive(Node!)] = #[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)];
    #[derive(NodeCopy!)] = #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)];
}

/// A source position: the line and the `(start, end)` column span on it.
#[derive(NodeCopy!, Default)]
pub struct Span {
    pub line: u32,
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(line: u32, start: u32, end: u32) -> Self {
        Self { line, start, end }
    }
}

/// A whole program: its symbol table and the top level statement sequence.
#[derive(Node!, Default)]
pub struct Program {
    pub symbols: Symbols,
    pub body: Option<Instruction>,
}

impl Program {
    pub fn new(symbols: Symbols, body: Option<Instruction>) -> Self {
        Self { symbols, body }
    }
}
