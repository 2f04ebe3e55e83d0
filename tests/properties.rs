//! Property tests for the compiler and VM.

use proptest::prelude::*;

use kaede::bytecode::cfg::{function_blocks, reachable};
use kaede::bytecode::Optimizer;
use kaede::{
    compile_to_bytecode, load_bytecode, CompilerContext, CompilerOptions, ExecutorContext, Module,
    Value,
};

#[derive(Debug, Clone)]
enum Arith {
    Num(i64),
    Add(Box<Arith>, Box<Arith>),
    Sub(Box<Arith>, Box<Arith>),
    Mul(Box<Arith>, Box<Arith>),
}

impl Arith {
    fn render(&self) -> String {
        match self {
            Arith::Num(n) => n.to_string(),
            Arith::Add(a, b) => format!("({} + {})", a.render(), b.render()),
            Arith::Sub(a, b) => format!("({} - {})", a.render(), b.render()),
            Arith::Mul(a, b) => format!("{} * {}", a.render(), b.render()),
        }
    }

    fn eval(&self) -> i64 {
        match self {
            Arith::Num(n) => *n,
            Arith::Add(a, b) => a.eval() + b.eval(),
            Arith::Sub(a, b) => a.eval() - b.eval(),
            Arith::Mul(a, b) => a.eval() * b.eval(),
        }
    }
}

/// Small trees so products stay far from overflow.
fn arith() -> impl Strategy<Value = Arith> {
    let leaf = (0i64..10).prop_map(Arith::Num);
    leaf.prop_recursive(3, 16, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(a, b)| Arith::Add(Box::new(a), Box::new(b))),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| Arith::Sub(Box::new(a), Box::new(b))),
            (inner.clone(), inner).prop_map(|(a, b)| Arith::Mul(Box::new(a), Box::new(b))),
        ]
    })
}

fn compile(source: &str, level: u8) -> Module {
    let mut compiler = CompilerContext::new(CompilerOptions {
        optimization_level: level,
        ..CompilerOptions::default()
    });
    compiler
        .compile(source, "prop")
        .unwrap_or_else(|err| panic!("{}\n{}", err, source))
}

fn execute(module: &Module) -> Value {
    ExecutorContext::default()
        .execute_module(module)
        .unwrap_or_else(|err| panic!("{}", err))
}

fn branchy_program(a: i64, b: i64) -> String {
    format!(
        "fn f() {{\n    if {a} > {b} {{\n        return {a} - {b}\n    }} else {{\n        return {b} - {a}\n    }}\n    return -1\n}}\nf()\n"
    )
}

/// Loops, early exits and code after `return` give the CFG several blocks,
/// some of them unreachable.
fn looping_program(expr: &str, limit: i64, stop: i64) -> String {
    format!(
        "fn g(n) {{\n    let total = -{expr}\n    while n < {limit} {{\n        n += 1\n        if n == {stop} {{ break }}\n        total += n * 2\n    }}\n    try {{\n        total += 1\n    }} catch (Exception e) {{\n        return 0\n    }}\n    return total\n    total = 99\n}}\ng(0)\n"
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn arithmetic_matches_evaluation(expr in arith()) {
        let source = expr.render();
        let expected = Value::Int(expr.eval());
        prop_assert_eq!(execute(&compile(&source, 0)), expected.clone());
        prop_assert_eq!(execute(&compile(&source, 1)), expected);
    }

    #[test]
    fn optimizer_is_idempotent(expr in arith(), a in 0i64..50, b in 0i64..50) {
        let source = format!("let x = {}\n{}", expr.render(), branchy_program(a, b));
        let once = compile(&source, 1);
        let mut twice = once.clone();
        let stats = Optimizer::new(10).optimize_module(&mut twice).unwrap();
        prop_assert!(stats.pass_changes.values().all(|&n| n == 0), "{:?}", stats);
        for (name, function) in &once.functions {
            prop_assert_eq!(&twice.functions[name].code, &function.code);
        }
    }

    #[test]
    fn optimization_preserves_behaviour(a in -20i64..20, b in -20i64..20) {
        let source = branchy_program(a, b);
        let plain = compile(&source, 0);
        let optimized = compile(&source, 1);
        prop_assert_eq!(execute(&plain), Value::Int((a - b).abs()));
        prop_assert_eq!(execute(&optimized), Value::Int((a - b).abs()));
        for function in optimized.functions.values() {
            prop_assert!(!function.code.is_empty(), "{} lost its entry block", function.name);
        }
    }

    #[test]
    fn binary_round_trip_is_stable(expr in arith(), a in 0i64..50, b in 0i64..50) {
        let source = format!("let x = {}\n{}", expr.render(), branchy_program(a, b));
        let module = compile(&source, 1);
        let bytes = compile_to_bytecode(&module).unwrap();
        let loaded = load_bytecode(&bytes).unwrap();
        prop_assert_eq!(compile_to_bytecode(&loaded).unwrap(), bytes);
        prop_assert_eq!(execute(&loaded), execute(&module));
    }

    #[test]
    fn dead_block_elimination_keeps_the_entry(
        expr in arith(),
        limit in 0i64..20,
        stop in 0i64..20,
        a in -20i64..20,
        b in -20i64..20,
    ) {
        let source = format!(
            "{}{}",
            looping_program(&expr.render(), limit, stop),
            branchy_program(a, b)
        );
        let plain = compile(&source, 0);
        let optimizer = Optimizer::default();
        for function in plain.functions.values() {
            let before = function_blocks(function).unwrap();
            let mut optimized = (**function).clone();
            optimizer.optimize_function(&mut optimized).unwrap();
            let after = function_blocks(&optimized).unwrap();

            prop_assert!(
                reachable(&after).len() <= reachable(&before).len(),
                "{} gained reachable blocks",
                function.name
            );
            match before.first().and_then(|block| block.instructions.first()) {
                Some(entry) => {
                    let kept = after.first().and_then(|block| block.instructions.first());
                    prop_assert!(kept.is_some(), "{} lost its entry block", function.name);
                    prop_assert_eq!(kept.map(|instr| instr.opcode), Some(entry.opcode));
                }
                None => prop_assert!(after.is_empty()),
            }
        }
        prop_assert_eq!(execute(&compile(&source, 1)), execute(&plain));
    }
}
