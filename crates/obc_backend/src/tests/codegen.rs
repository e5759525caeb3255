use obc_ir::ast::{BinOp, Instruction};
use obc_ir::symbols::Symbols;
use obc_ir::Program;

use super::*;
use crate::asm::{Callee, Format, Inst, Label, Line, Mem};
use crate::codegen::{Codegen, Value};
use crate::{frame, layout, BackendError, ProcedureEmission};

fn count(listing: &Listing, pred: impl Fn(&Inst) -> bool) -> usize {
    listing.instructions().filter(|inst| pred(inst)).count()
}

fn procedure_labels(listing: &Listing) -> Vec<String> {
    listing
        .lines
        .iter()
        .filter_map(|line| match line {
            Line::Label(Label::Procedure(name)) => Some(name.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn write_constant() {
    let program = Program::new(
        Symbols::new(),
        Instruction::chain([Instruction::write(bin(
            BinOp::Add,
            num(2),
            bin(BinOp::Mul, num(3), num(4)),
        ))]),
    );

    let listing = compile_with(&program, Generator::Register).unwrap();
    insta::assert_snapshot!(listing.to_string().trim_end(), @r###"
    .data
variable:
    .space 0, 0
    .align 2
.fmt_print:
    .asciz "%d\n"
    .text
    .align 2
    .global main
main:
    push {r4, r5, r6, r7, fp, lr}
    ldr r7, =variable
    mov r1, #14
    ldr r0, =.fmt_print
    bl printf
    mov r0, #0
    pop {r4, r5, r6, r7, fp, lr}
    bx lr
    .ltorg
"###);
}

#[test]
fn write_constant_naive() {
    let program = Program::new(
        Symbols::new(),
        Instruction::chain([Instruction::write(num(14))]),
    );

    let listing = compile_with(&program, Generator::Naive).unwrap();
    let text: Vec<String> = listing.lines.iter().map(ToString::to_string).collect();
    assert_eq!(
        text,
        [
            "main:",
            "    push {r4, r7, fp, lr}",
            "    ldr r7, =variable",
            "    mov r1, #14",
            "    push {r1}",
            "    pop {r1}",
            "    ldr r0, =.fmt_print",
            "    bl printf",
            "    mov r0, #0",
            "    pop {r4, r7, fp, lr}",
            "    bx lr",
            "    .ltorg",
        ]
    );

    // The naive generator always carries every format string.
    assert_eq!(listing.formats, Format::ALL);
}

#[test]
fn division_guard() {
    let mut symbols = Symbols::new();
    let x = symbols.declare_global("x", Symbols::INTEGER);

    let body = Instruction::chain([Instruction::assign(
        var(&symbols, x),
        bin(BinOp::Div, num(10), value(var_at(&symbols, x, at(2, 12, 13)))),
    )]);
    let program = Program::new(symbols.clone(), body);

    let listing = compile_with(&program, Generator::Register).unwrap();
    insta::assert_snapshot!(listing.to_string().trim_end(), @r###"
    .data
variable:
    .space 4, 0
    .align 2
.fmt_div:
    .asciz "error: the expression on the right-hand side of the DIV cannot evaluate to zero at line %d, position: (%d, %d)\n"
    .text
    .align 2
    .global main
main:
    push {r4, r5, r6, r7, fp, lr}
    ldr r7, =variable
    ldr r0, [r7]
    push {r0}
    pop {r1}
    mov r0, #10
    cmp r1, #0
    beq .diverror1
    bl __aeabi_idiv
    mov r1, r0
    str r1, [r7]
    mov r0, #0
    pop {r4, r5, r6, r7, fp, lr}
    bx lr
.diverror1:
    mov r1, #2
    mov r2, #12
    mov r3, #13
    ldr r0, =.fmt_div
    bl printf
    mov r0, #1
    bl exit
    .ltorg
"###);
}

#[test]
fn function_frame() {
    let mut symbols = Symbols::new();
    let root = symbols.root;
    let inc = symbols.declare_procedure(
        root,
        "inc",
        &[("n", Symbols::INTEGER)],
        &[],
        Some(Symbols::INTEGER),
    );
    let n = symbols.local(symbols.procedure(inc).unwrap().scope, "n").unwrap();
    symbols.define_procedure(inc, None, Some(bin(BinOp::Add, value(var(&symbols, n)), num(1))));

    let body = Instruction::chain([Instruction::write(call(&symbols, inc, vec![num(41)]))]);
    let program = Program::new(symbols.clone(), body);

    let listing = compile_with(&program, Generator::Register).unwrap();
    let text: Vec<String> = listing.lines.iter().map(ToString::to_string).collect();
    assert_eq!(
        text,
        [
            "main:",
            "    push {r4, r5, r6, r7, fp, lr}",
            "    ldr r7, =variable",
            "    mov r0, #41",
            "    push {r0}",
            "    pop {r0}",
            "    bl proc_inc",
            "    mov r1, r0",
            "    ldr r0, =.fmt_print",
            "    bl printf",
            "    mov r0, #0",
            "    pop {r4, r5, r6, r7, fp, lr}",
            "    bx lr",
            "    .ltorg",
            "proc_inc:",
            "    push {fp, lr}",
            "    add fp, sp, #4",
            "    sub sp, sp, #8",
            "    str r0, [fp, #-8]",
            "    ldr r0, [fp, #-8]",
            "    add r0, r0, #1",
            "    sub sp, fp, #4",
            "    pop {fp, lr}",
            "    bx lr",
            "    .ltorg",
        ]
    );

    let outcome = machine::Machine::new(&listing).run(&[]);
    assert_eq!(outcome.output, "42\n");
}

#[test]
fn only_used_formats_are_emitted() {
    let mut symbols = Symbols::new();
    let x = symbols.declare_global("x", Symbols::INTEGER);
    let body = Instruction::chain([Instruction::read(var(&symbols, x))]);
    let program = Program::new(symbols.clone(), body);

    let listing = compile_with(&program, Generator::Register).unwrap();
    assert_eq!(listing.formats, [Format::Scan]);
}

#[test]
fn aggregate_copy_moves_each_word_once() {
    let mut symbols = Symbols::new();
    let array = symbols.array_type(Symbols::INTEGER, 7);
    let a = symbols.declare_global("a", array);
    let b = symbols.declare_global("b", array);

    let body = Instruction::chain([
        Instruction::assign(index(&symbols, var(&symbols, b), num(6)), num(9)),
        Instruction::assign(var(&symbols, a), value(var(&symbols, b))),
        Instruction::write(value(index(&symbols, var(&symbols, a), num(6)))),
    ]);
    let program = Program::new(symbols.clone(), body);

    for generator in GENERATORS {
        let listing = compile_with(&program, generator).unwrap();

        let loads = count(&listing, |inst| matches!(inst, Inst::Ldr(_, Mem::PostIndexed(_, 4))));
        let stores = count(&listing, |inst| matches!(inst, Inst::Str(_, Mem::PostIndexed(_, 4))));
        assert_eq!((loads, stores), (7, 7), "{generator:?}");

        let outcome = machine::Machine::new(&listing).run(&[]);
        assert_eq!(outcome.output, "9\n");
    }
}

#[test]
fn constant_expressions_emit_no_arithmetic() {
    let program = Program::new(
        Symbols::new(),
        Instruction::chain([Instruction::write(bin(
            BinOp::Sub,
            bin(BinOp::Mul, num(6), num(3)),
            bin(BinOp::Div, num(9), num(2)),
        ))]),
    );

    for generator in GENERATORS {
        let listing = compile_with(&program, generator).unwrap();
        let arithmetic = count(&listing, |inst| {
            matches!(
                inst,
                Inst::Add(..) | Inst::Sub(..) | Inst::Rsb(..) | Inst::Mul(..)
            ) || *inst == Inst::Bl(Callee::Extern(crate::asm::Extern::Idiv))
        });
        assert_eq!(arithmetic, 0, "{generator:?}");

        let outcome = machine::Machine::new(&listing).run(&[]);
        assert_eq!(outcome.output, "14\n");
    }
}

#[test]
fn constant_index_out_of_bounds() {
    let mut symbols = Symbols::new();
    let array = symbols.array_type(Symbols::INTEGER, 5);
    let a = symbols.declare_global("a", array);

    let index_expr = bin(BinOp::Add, num(2), num_at(5, at(9, 4, 9)));
    let body = Instruction::chain([Instruction::assign(
        index(&symbols, var(&symbols, a), index_expr),
        num(1),
    )]);
    let program = Program::new(symbols.clone(), body);

    for generator in GENERATORS {
        let err = compile_with(&program, generator).unwrap_err();
        assert!(
            matches!(
                err,
                BackendError::IndexOutOfBounds {
                    index: 7,
                    length: 5,
                    ..
                }
            ),
            "{generator:?}: {err}"
        );
    }
}

#[test]
fn aggregate_values_are_rejected() {
    let mut symbols = Symbols::new();
    let array = symbols.array_type(Symbols::INTEGER, 2);
    let a = symbols.declare_global("a", array);

    let body = Instruction::chain([Instruction::write(value(var_at(&symbols, a, at(1, 7, 8))))]);
    let program = Program::new(symbols.clone(), body);

    for generator in GENERATORS {
        let err = compile_with(&program, generator).unwrap_err();
        assert_eq!(
            err.to_string(),
            "array or record used as a value at line 1, position: (7, 8)"
        );
    }
}

#[test]
fn too_many_arguments() {
    let mut symbols = Symbols::new();
    let root = symbols.root;
    let params: Vec<(String, _)> = (0..5).map(|i| (format!("p{i}"), Symbols::INTEGER)).collect();
    let params: Vec<(&str, _)> = params.iter().map(|(name, ty)| (name.as_str(), *ty)).collect();
    let wide = symbols.declare_procedure(root, "wide", &params, &[], None);

    let args = (0..5).map(num).collect();
    let program = Program::new(symbols.clone(), Instruction::chain([Instruction::call(wide, args)]));

    for generator in GENERATORS {
        assert!(matches!(
            compile_with(&program, generator),
            Err(BackendError::TooManyArguments { count: 5, .. })
        ));
    }
}

#[test]
fn enclosing_locals_are_rejected() {
    let mut symbols = Symbols::new();
    let root = symbols.root;

    let outer = symbols.declare_procedure(root, "outer", &[], &[("k", Symbols::INTEGER)], None);
    let outer_scope = symbols.procedure(outer).unwrap().scope;
    let k = symbols.local(outer_scope, "k").unwrap();

    let inner = symbols.declare_procedure(outer_scope, "inner", &[], &[], None);
    symbols.define_procedure(
        inner,
        Instruction::chain([Instruction::write(value(var(&symbols, k)))]),
        None,
    );

    let outer_body = Instruction::chain([
        Instruction::assign(var(&symbols, k), num(7)),
        Instruction::call(inner, vec![]),
    ]);
    symbols.define_procedure(outer, outer_body, None);

    let main_body = Instruction::chain([Instruction::call(outer, vec![])]);
    let program = Program::new(symbols.clone(), main_body);
    for generator in GENERATORS {
        assert!(matches!(
            compile_with(&program, generator),
            Err(BackendError::NonLocalVariable(id)) if id == k
        ));
    }

    // A procedure's local used from `main`.
    let main_body = Instruction::chain([Instruction::read(var(&symbols, k))]);
    let program = Program::new(symbols, main_body);
    for generator in GENERATORS {
        assert!(matches!(
            compile_with(&program, generator),
            Err(BackendError::NonLocalVariable(id)) if id == k
        ));
    }
}

#[test]
fn unsupported_target() {
    let mut program = Program::new(Symbols::new(), None);
    let target = Triple::from_str("x86_64-unknown-linux-gnu").unwrap();

    let err = compile_program(&mut program, &target, &Options::default()).unwrap_err();
    assert_eq!(err.to_string(), "unsupported architecture: x86_64");
}

/// A program calling `twice` two times, with `never` and `never::inner`
/// left uncalled.
fn procedures_program() -> Program {
    let mut symbols = Symbols::new();
    let root = symbols.root;

    let twice = symbols.declare_procedure(root, "twice", &[], &[], None);
    symbols.define_procedure(twice, Instruction::chain([Instruction::write(num(2))]), None);

    let never = symbols.declare_procedure(root, "never", &[], &[], None);
    let never_scope = symbols.procedure(never).unwrap().scope;
    symbols.declare_procedure(never_scope, "inner", &[], &[], None);

    let body = Instruction::chain([
        Instruction::call(twice, vec![]),
        Instruction::call(twice, vec![]),
    ]);
    Program::new(symbols, body)
}

#[test]
fn procedures_are_emitted_once_on_first_call() {
    let program = procedures_program();

    for generator in GENERATORS {
        let listing = compile_with(&program, generator).unwrap();
        assert_eq!(procedure_labels(&listing), ["twice"]);

        let calls = count(&listing, |inst| {
            *inst == Inst::Bl(Callee::Label(Label::Procedure("twice".to_owned())))
        });
        assert_eq!(calls, 2);

        let outcome = machine::Machine::new(&listing).run(&[]);
        assert_eq!(outcome.output, "2\n2\n");
    }
}

#[test]
fn eager_emission_includes_uncalled_procedures() {
    let program = procedures_program();

    for generator in GENERATORS {
        let options = Options {
            generator,
            procedures: ProcedureEmission::Eager,
            ..Options::default()
        };
        let listing = compile(&program, options).unwrap();
        assert_eq!(procedure_labels(&listing), ["never", "inner", "twice"]);

        let outcome = machine::Machine::new(&listing).run(&[]);
        assert_eq!(outcome.output, "2\n2\n");
    }
}

#[test]
fn literal_pool_is_dumped_in_main_only() {
    let mut symbols = Symbols::new();
    let root = symbols.root;
    let big = symbols.declare_procedure(root, "big", &[], &[], None);
    let writes = (0..20).map(|i| Instruction::write(num(100_000 + i)));
    symbols.define_procedure(big, Instruction::chain(writes), None);

    let mut body: Vec<_> = (0..20).map(|i| Instruction::write(num(1_000_000 + i))).collect();
    body.push(Instruction::call(big, vec![]));
    let program = Program::new(symbols.clone(), Instruction::chain(body));

    let expected: String = (0..20)
        .map(|i| format!("{}\n", 1_000_000 + i))
        .chain((0..20).map(|i| format!("{}\n", 100_000 + i)))
        .collect();

    for generator in GENERATORS {
        let options = Options {
            generator,
            literal_pool_distance: 5,
            ..Options::default()
        };
        let listing = compile(&program, options).unwrap();

        let procedure_start = listing
            .lines
            .iter()
            .position(|line| *line == Line::Label(Label::Procedure("big".to_owned())))
            .unwrap();
        let pools: Vec<usize> = listing
            .lines
            .iter()
            .enumerate()
            .filter(|(_, line)| matches!(line, Line::Label(Label::Pool(_))))
            .map(|(i, _)| i)
            .collect();

        assert!(pools.len() >= 10, "{generator:?}: {} pools", pools.len());
        assert!(pools.iter().all(|&i| i < procedure_start));

        let outcome = machine::Machine::new(&listing).run(&[]);
        assert_eq!(outcome.output, expected);
    }
}

/// Sets up storage the way [`compile_program`] does, for driving a
/// [`Codegen`] directly.
fn allocated(mut symbols: Symbols) -> Symbols {
    layout::allocate(&mut symbols);
    frame::layout_frames(&mut symbols);
    symbols
}

#[test]
fn expressions_leave_one_register_allocated() {
    let mut symbols = Symbols::new();
    let array = symbols.array_type(Symbols::INTEGER, 4);
    let rec = symbols.record_type(&[("f", Symbols::INTEGER), ("g", array)]);
    let a = symbols.declare_global("a", array);
    let r = symbols.declare_global("r", rec);
    let x = symbols.declare_global("x", Symbols::INTEGER);
    let y = symbols.declare_global("y", Symbols::INTEGER);

    let root = symbols.root;
    let f = symbols.declare_procedure(
        root,
        "f",
        &[("n", Symbols::INTEGER)],
        &[],
        Some(Symbols::INTEGER),
    );

    let x_val = || value(var(&symbols, x));
    let y_val = || value(var(&symbols, y));
    let expressions = [
        bin(BinOp::Add, x_val(), bin(BinOp::Mul, y_val(), num(3))),
        bin(
            BinOp::Add,
            bin(BinOp::Mod, bin(BinOp::Div, x_val(), y_val()), num(7)),
            call(&symbols, f, vec![x_val()]),
        ),
        bin(
            BinOp::Sub,
            value(index(&symbols, var(&symbols, a), x_val())),
            value(index(
                &symbols,
                field(&symbols, var(&symbols, r), "g"),
                y_val(),
            )),
        ),
        bin(BinOp::Sub, num(7), x_val()),
        bin(BinOp::Add, x_val(), num(0x12345)),
        value(field(&symbols, var(&symbols, r), "f")),
    ];

    let symbols = allocated(symbols.clone());
    let options = Options::default();

    for expr in &expressions {
        let mut codegen = Codegen::new(&symbols, &options);
        let result = codegen.gen_expr(expr).unwrap();
        assert!(matches!(result, Value::Reg(_)));

        let (allocs, frees) = codegen.register_counts();
        assert_eq!(allocs, frees + 1, "{expr:?}");
    }

    let mut codegen = Codegen::new(&symbols, &options);
    assert_eq!(codegen.gen_expr(&num(5)).unwrap(), Value::Imm(5));
    assert_eq!(codegen.register_counts(), (0, 0));
}

#[test]
fn statements_free_every_register() {
    let mut symbols = Symbols::new();
    let array = symbols.array_type(Symbols::INTEGER, 4);
    let a = symbols.declare_global("a", array);
    let b = symbols.declare_global("b", array);
    let x = symbols.declare_global("x", Symbols::INTEGER);

    let x_val = || value(var(&symbols, x));
    let statements = [
        Instruction::read(index(&symbols, var(&symbols, a), x_val())),
        Instruction::assign(var(&symbols, b), value(var(&symbols, a))),
        Instruction::assign(
            index(&symbols, var(&symbols, a), x_val()),
            bin(BinOp::Div, x_val(), num(2)),
        ),
        Instruction::write(bin(BinOp::Mod, x_val(), x_val())),
    ];

    let symbols = allocated(symbols.clone());
    let options = Options::default();

    for statement in statements {
        let mut codegen = Codegen::new(&symbols, &options);
        codegen.gen_sequence(Some(&statement)).unwrap();

        let (allocs, frees) = codegen.register_counts();
        assert!(allocs > 0);
        assert_eq!(allocs, frees);
    }
}
