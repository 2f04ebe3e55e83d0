//! End-to-end tests: source text through the compiler and the VM.

use pretty_assertions::assert_eq;

use std::sync::Arc;

use kaede::bytecode::Function;
use kaede::error::RuntimeErrorKind;
use kaede::jit::{AnalysisResult, FunctionKey, JitHook, NativeCode, NativeCompiler};
use kaede::vm::Output;
use kaede::{
    compile_source, compile_to_bytecode, load_bytecode, ExecutorConfig, ExecutorContext,
    KaedeError, Value,
};

fn run(source: &str) -> (Value, Vec<String>) {
    kaede::run_captured(source).unwrap_or_else(|err| panic!("{}", err))
}

fn value(source: &str) -> Value {
    run(source).0
}

fn output(source: &str) -> Vec<String> {
    run(source).1
}

fn run_err(source: &str) -> KaedeError {
    match kaede::run_captured(source) {
        Ok((value, _)) => panic!("expected an error, got {}", value),
        Err(err) => err,
    }
}

fn runtime_kind(err: &KaedeError) -> &RuntimeErrorKind {
    match err {
        KaedeError::Runtime { source, .. } => &source.kind,
        other => panic!("expected a runtime error, got {}", other),
    }
}

#[test]
fn arithmetic_respects_precedence() {
    assert_eq!(value("1 + 2 * 3"), Value::Int(7));
    assert_eq!(value("(1 + 2) * 3"), Value::Int(9));
    assert_eq!(value("2 ** 10"), Value::Int(1024));
    assert_eq!(value("10 - 4 - 3"), Value::Int(3));
}

#[test]
fn integer_range_edges() {
    assert_eq!(value("-9223372036854775808"), Value::Int(i64::MIN));
    assert_eq!(value("-9223372036854775807 - 1"), Value::Int(i64::MIN));
    let err = kaede::run("9223372036854775808").unwrap_err();
    assert_eq!(err.kind(), "syntax");
}

#[test]
fn recursive_function() {
    let source = "\
fn fib(n) {
    if n < 2 { return n }
    return fib(n - 1) + fib(n - 2)
}
fib(15)
";
    assert_eq!(value(source), Value::Int(610));
}

#[test]
fn main_is_the_entry_point() {
    let source = "\
let base = 40
fn main() {
    print(\"in main\")
    return base + 2
}
";
    let (result, lines) = run(source);
    assert_eq!(result, Value::Int(42));
    assert_eq!(lines, vec!["in main".to_string()]);
}

#[test]
fn loops_and_compound_assignment() {
    let source = "\
let total = 0
for (let i = 0; i < 10; i++) { total += i }
for x in [1, 2, 3] { total += x }
let n = 0
while true {
    n += 1
    if n == 5 { break }
}
total + n
";
    assert_eq!(value(source), Value::Int(56));
}

#[test]
fn default_parameters_and_lambdas() {
    let source = "\
fn greet(name, greeting = \"hi\") { return greeting + \" \" + name }
let add = lambda a, b: a + b
print(greet(\"bo\"))
print(greet(\"bo\", \"hey\"))
add(2, 3)
";
    let (result, lines) = run(source);
    assert_eq!(result, Value::Int(5));
    assert_eq!(lines, vec!["hi bo".to_string(), "hey bo".to_string()]);
}

#[test]
fn classes_with_inheritance() {
    let source = "\
class Animal {
    fn __init__(name) { self.name = name }
    fn speak() { return self.name + \" makes a sound\" }
}
class Dog extends Animal {
    fn speak() { return super.speak() + \"!\" }
}
let d = new Dog(\"Rex\")
print(d.speak())
d.name
";
    let (result, lines) = run(source);
    assert_eq!(result, Value::str("Rex"));
    assert_eq!(lines, vec!["Rex makes a sound!".to_string()]);
}

#[test]
fn synthesized_constructor_assigns_fields() {
    let source = "\
class Point {
    int x = 0
    int y = 0
    fn norm() { return x * x + y * y }
}
let p = new Point(3, 4)
let q = new Point()
p.norm() + q.x
";
    assert_eq!(value(source), Value::Int(25));
}

#[test]
fn try_catch_finally() {
    let source = "\
fn risky(x) {
    if x > 1 { raise ValueError(\"too big\") }
    return x
}
try {
    risky(5)
    print(\"unreachable\")
} catch (KeyError e) {
    print(\"wrong handler\")
} catch (ValueError e) {
    print(e.message)
} finally {
    print(\"done\")
}
";
    assert_eq!(output(source), vec!["too big".to_string(), "done".to_string()]);
}

#[test]
fn finally_runs_on_early_return() {
    let source = "\
fn f() {
    try {
        return 1
    } finally {
        print(\"cleanup\")
    }
}
f()
";
    let (result, lines) = run(source);
    assert_eq!(result, Value::Int(1));
    assert_eq!(lines, vec!["cleanup".to_string()]);
}

#[test]
fn unmatched_catch_propagates() {
    let source = "\
try {
    raise ValueError(\"nope\")
} catch (KeyError e) {
    print(\"caught\")
}
";
    let err = run_err(source);
    assert_eq!(err.kind(), "ValueError");
}

#[test]
fn uncaught_errors_report_line_and_function() {
    let source = "\
fn divide(a, b) {
    return a / b
}
divide(1, 0)
";
    let err = run_err(source);
    assert!(matches!(runtime_kind(&err), RuntimeErrorKind::DivisionByZero));
    assert_eq!(err.kind(), "ZeroDivisionError");
    assert_eq!(err.span().map(|span| span.line), Some(2));
    match &err {
        KaedeError::Runtime { source, .. } => {
            assert_eq!(source.function.as_deref(), Some("divide"))
        }
        _ => unreachable!(),
    }
}

#[test]
fn handlers_belong_to_their_frame() {
    let source = "\
fn guarded() {
    try {
        return 1
    } catch (Exception e) {
        print(\"wrong frame\")
    }
}
fn boom() { raise ValueError(\"x\") }
guarded()
boom()
";
    let err = run_err(source);
    assert_eq!(err.kind(), "ValueError");
    assert_eq!(err.span().map(|span| span.line), Some(8));
}

#[test]
fn recursion_limit_is_catchable() {
    let source = "\
fn down(n) { return down(n + 1) }
try {
    down(0)
} catch (RecursionError e) {
    print(\"caught\")
}
";
    assert_eq!(output(source), vec!["caught".to_string()]);

    let err = run_err("fn down(n) { return down(n + 1) }\ndown(0)\n");
    assert!(matches!(
        runtime_kind(&err),
        RuntimeErrorKind::RecursionLimit(256)
    ));
}

#[test]
fn wrong_arity_is_a_type_error() {
    let err = run_err("fn f(a, b) { return a }\nf(1)\n");
    match runtime_kind(&err) {
        RuntimeErrorKind::WrongArity { name, expected, got } => {
            assert_eq!(name, "f");
            assert_eq!(expected, "2");
            assert_eq!(*got, 1);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn match_statement() {
    let source = "\
fn classify(x) {
    match x {
        case 1 => print(\"one\"),
        case n if n > 10 => print(\"big\"),
        case _ => print(\"other\")
    }
}
classify(1)
classify(50)
classify(5)
";
    assert_eq!(
        output(source),
        vec!["one".to_string(), "big".to_string(), "other".to_string()]
    );
}

#[test]
fn enums_and_namespaces() {
    let source = "\
enum Color { Red, Green = 5, Blue }
namespace math {
    fn sq(x) { return x * x }
}
math.sq(4) + Color.Blue + Color.Red
";
    assert_eq!(value(source), Value::Int(22));
}

#[test]
fn collections() {
    let source = "\
let d = {\"a\": 1}
d[\"b\"] = 2
let xs = [1, 2, 3]
xs.append(4)
len(d) + d[\"a\"] + xs[-1]
";
    assert_eq!(value(source), Value::Int(7));

    let err = run_err("let d = {\"a\": 1}\nd[\"zz\"]\n");
    assert!(matches!(runtime_kind(&err), RuntimeErrorKind::KeyNotFound(_)));
    let err = run_err("[1, 2][5]\n");
    assert!(matches!(
        runtime_kind(&err),
        RuntimeErrorKind::IndexOutOfBounds { index: 5, length: 2 }
    ));
}

#[test]
fn explicit_memory_management() {
    assert_eq!(value("int* p = new int[4];\ndelete[] p;\n1\n"), Value::Int(1));

    let err = run_err("int* p = new int[4];\ndelete[] p;\ndelete[] p;\n");
    assert!(matches!(runtime_kind(&err), RuntimeErrorKind::InvalidFree(_)));

    let err = run_err("class Box { int v = 1 }\nlet b = new Box()\ndelete b\nb.v\n");
    assert!(matches!(
        runtime_kind(&err),
        RuntimeErrorKind::UseAfterDelete(name) if name == "Box"
    ));
}

#[test]
fn memory_limit_is_enforced() {
    let module = compile_source("int* p = new int[1000];\n", "alloc").unwrap();
    let config = ExecutorConfig {
        memory_limit: Some(64),
        ..ExecutorConfig::default()
    };
    let err = ExecutorContext::new(config).execute_module(&module).unwrap_err();
    assert!(matches!(err.kind, RuntimeErrorKind::OutOfMemory(_)));
}

#[test]
fn binary_module_runs_like_the_original() {
    let source = "\
class Counter {
    int n = 0
    fn bump() { n += 1; return n }
}
let c = new Counter()
c.bump()
c.bump()
print(\"count\", c.n)
c.n * 10
";
    let module = compile_source(source, "counter").unwrap();
    let bytes = compile_to_bytecode(&module).unwrap();
    let loaded = load_bytecode(&bytes).unwrap();

    let mut original = ExecutorContext::default().with_output(Output::capture());
    let mut decoded = ExecutorContext::default().with_output(Output::capture());
    let expected = original.execute_module(&module).unwrap();
    let actual = decoded.execute_module(&loaded).unwrap();
    assert_eq!(actual, expected);
    assert_eq!(actual, Value::Int(20));
    assert_eq!(decoded.take_output(), original.take_output());
}

#[test]
fn profiling_tracks_hot_functions() {
    let source = "\
fn inc(x) { return x + 1 }
let n = 0
for (let i = 0; i < 150; i++) { n = inc(n) }
n
";
    let module = compile_source(source, "hot").unwrap();
    let mut executor = ExecutorContext::new(ExecutorConfig::default());
    assert_eq!(executor.execute_module(&module).unwrap(), Value::Int(150));

    let profile = executor.profiling_data();
    assert_eq!(profile.executions, 1);
    assert_eq!(profile.jit.hot_functions, vec!["hot::inc".to_string()]);
    assert_eq!(profile.jit.functions_compiled, 0);
    assert_eq!(profile.functions["hot::inc"].calls, 150);
}

/// Hands the function's bytecode back as its native body.
struct CopyCompiler;

impl NativeCompiler for CopyCompiler {
    fn name(&self) -> &'static str {
        "copy"
    }

    fn compile(
        &self,
        key: &FunctionKey,
        function: &Function,
        _analysis: &AnalysisResult,
    ) -> Option<NativeCode> {
        Some(NativeCode {
            function: key.clone(),
            code: function.code.clone(),
        })
    }
}

#[test]
fn modules_sharing_a_jit_keep_their_own_functions() {
    let first = compile_source("fn f(x) { return x + 1 }\nf(1)\nf(2)\n", "first").unwrap();
    let second = compile_source("fn f(x) { return x * 10 }\nf(3)\n", "second").unwrap();
    let jit = JitHook::with_compiler(2, Arc::new(CopyCompiler));

    let mut executor = ExecutorContext::default().with_jit(jit.clone());
    assert_eq!(executor.execute_module(&first).unwrap(), Value::Int(3));
    assert_eq!(executor.execute_module(&second).unwrap(), Value::Int(30));

    let first_f = &first.functions["f"];
    let second_f = &second.functions["f"];
    let native = first_f.native().expect("first::f ran hot");
    assert_eq!(native.function, FunctionKey::new("first", "f"));
    assert_eq!(native.code, first_f.code);
    assert!(second_f.native().is_none());
    assert!(jit.is_hot("first", "f"));
    assert!(!jit.is_hot("second", "f"));

    let profile = executor.profiling_data();
    assert_eq!(profile.functions["first::f"].calls, 2);
    assert_eq!(profile.functions["second::f"].calls, 1);
    assert!(profile.functions.contains_key("first::__init__"));
    assert!(profile.functions.contains_key("second::__init__"));
}

#[test]
fn disabled_jit_records_nothing() {
    let module = compile_source("fn f() { return 1 }\nf()\n", "cold").unwrap();
    let config = ExecutorConfig {
        enable_jit: false,
        ..ExecutorConfig::default()
    };
    let mut executor = ExecutorContext::new(config);
    executor.execute_module(&module).unwrap();
    assert_eq!(executor.profiling_data().jit.calls_recorded, 0);
}
