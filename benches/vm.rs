//! Benchmarks for the compiler and the bytecode VM.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kaede::vm::Output;
use kaede::{
    compile_to_bytecode, load_bytecode, CompilerContext, CompilerOptions, ExecutorContext, Module,
};

const FIB_RECURSIVE: &str = "\
fn fib(n) {
    if n <= 1 { return n }
    return fib(n - 1) + fib(n - 2)
}
fib(20)
";

const LOOP_SUM: &str = "\
let total = 0
for (let i = 0; i < 10000; i++) {
    total += i * 2 + 1
}
total
";

const OBJECTS: &str = "\
class Counter {
    int n = 0
    fn bump() { n += 1 }
}
let c = new Counter()
for (let i = 0; i < 2000; i++) { c.bump() }
c.n
";

fn compile(source: &str, level: u8) -> Module {
    CompilerContext::new(CompilerOptions {
        optimization_level: level,
        ..CompilerOptions::default()
    })
    .compile(source, "bench")
    .expect("compile error")
}

/// Execute with a fresh executor, discarding printed output.
fn run(module: &Module) {
    let mut executor = ExecutorContext::default().with_output(Output::capture());
    executor.execute_module(module).expect("runtime error");
}

fn optimization_comparison(c: &mut Criterion) {
    for (name, source) in [
        ("fib_recursive", FIB_RECURSIVE),
        ("loop_sum", LOOP_SUM),
        ("objects", OBJECTS),
    ] {
        let mut group = c.benchmark_group(name);
        for level in [0u8, 1] {
            let module = compile(source, level);
            group.bench_with_input(BenchmarkId::new("opt_level", level), &module, |b, module| {
                b.iter(|| run(black_box(module)))
            });
        }
        group.finish();
    }
}

fn fib_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("fib_scaling");

    for n in [10, 15, 20] {
        let source = format!(
            "fn fib(n) {{\n    if n <= 1 {{ return n }}\n    return fib(n - 1) + fib(n - 2)\n}}\nfib({})\n",
            n
        );
        let module = compile(&source, 1);
        group.bench_with_input(BenchmarkId::new("vm", n), &module, |b, module| {
            b.iter(|| run(black_box(module)))
        });
    }

    group.finish();
}

/// Compilation alone, with the cache bypassed by a fresh context per run.
fn compilation_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("compilation_overhead");

    group.bench_function("compile_fib", |b| {
        b.iter(|| compile(black_box(FIB_RECURSIVE), 1))
    });
    group.bench_function("compile_objects", |b| {
        b.iter(|| compile(black_box(OBJECTS), 1))
    });

    let bytes = compile_to_bytecode(&compile(OBJECTS, 1)).expect("format error");
    group.bench_function("load_binary", |b| {
        b.iter(|| load_bytecode(black_box(&bytes)).expect("format error"))
    });

    group.finish();
}

criterion_group!(
    benches,
    optimization_comparison,
    fib_scaling,
    compilation_overhead,
);

criterion_main!(benches);
