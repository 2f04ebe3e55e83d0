//! Parser tests.

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::ast::*;
    use crate::lexer::Scanner;
    use crate::parser::Parser;

    fn parse_program(source: &str) -> Program {
        let tokens = Scanner::new(source).scan_tokens().unwrap();
        let mut parser = Parser::new(tokens);
        parser.parse().unwrap()
    }

    fn parse_expr(source: &str) -> Expr {
        let program = parse_program(source);
        match program.statements.into_iter().next().unwrap().kind {
            StmtKind::Expression(expr) => expr,
            other => panic!("Expected expression statement, got {:?}", other),
        }
    }

    fn first_stmt(source: &str) -> StmtKind {
        parse_program(source).statements.into_iter().next().unwrap().kind
    }

    #[test]
    fn test_binary_expr() {
        let expr = parse_expr("1 + 2;");
        match expr.kind {
            ExprKind::Binary { operator, .. } => assert_eq!(operator, BinaryOp::Add),
            _ => panic!("Expected binary expression"),
        }
    }

    #[test]
    fn test_precedence() {
        // 1 + 2 * 3 should parse as 1 + (2 * 3)
        let expr = parse_expr("1 + 2 * 3");
        match expr.kind {
            ExprKind::Binary {
                operator: BinaryOp::Add,
                right,
                ..
            } => match right.kind {
                ExprKind::Binary {
                    operator: BinaryOp::Multiply,
                    ..
                } => {}
                _ => panic!("Expected multiply on right"),
            },
            _ => panic!("Expected add at top"),
        }
    }

    #[test]
    fn test_power_is_right_associative() {
        let expr = parse_expr("2 ** 3 ** 2");
        match expr.kind {
            ExprKind::Binary {
                operator: BinaryOp::Power,
                left,
                right,
            } => {
                assert_eq!(left.kind, ExprKind::IntLiteral(2));
                assert!(matches!(
                    right.kind,
                    ExprKind::Binary {
                        operator: BinaryOp::Power,
                        ..
                    }
                ));
            }
            _ => panic!("Expected power at top"),
        }
    }

    #[test]
    fn test_unary_binds_looser_than_power() {
        // -2 ** 2 is -(2 ** 2)
        let expr = parse_expr("-2 ** 2");
        match expr.kind {
            ExprKind::Unary {
                operator: UnaryOp::Negate,
                operand,
            } => assert!(matches!(operand.kind, ExprKind::Binary { .. })),
            _ => panic!("Expected negation at top"),
        }
    }

    #[test]
    fn test_ternary_is_lowest() {
        let expr = parse_expr("a || b ? 1 : 2");
        match expr.kind {
            ExprKind::Ternary { condition, .. } => {
                assert!(matches!(condition.kind, ExprKind::Logical { .. }))
            }
            _ => panic!("Expected ternary"),
        }
    }

    #[test]
    fn test_spaceship_and_bitwise_order() {
        // `|` binds tighter than `<=>`
        let expr = parse_expr("a <=> b | c");
        match expr.kind {
            ExprKind::Binary {
                operator: BinaryOp::Compare,
                right,
                ..
            } => assert!(matches!(
                right.kind,
                ExprKind::Binary {
                    operator: BinaryOp::BitOr,
                    ..
                }
            )),
            _ => panic!("Expected comparison at top"),
        }
    }

    #[test]
    fn test_call() {
        let expr = parse_expr("foo(1, 2);");
        match expr.kind {
            ExprKind::Call { arguments, .. } => assert_eq!(arguments.len(), 2),
            _ => panic!("Expected call expression"),
        }
    }

    #[test]
    fn test_postfix_chain() {
        let expr = parse_expr("a.b(1)[0]->c++");
        match expr.kind {
            ExprKind::Update {
                target,
                increment: true,
                prefix: false,
            } => assert!(matches!(target.kind, ExprKind::Member { arrow: true, .. })),
            other => panic!("Expected postfix update, got {:?}", other),
        }
    }

    #[test]
    fn test_cast_and_grouping() {
        assert!(matches!(parse_expr("(int) x").kind, ExprKind::Cast { .. }));
        assert!(matches!(parse_expr("x as float").kind, ExprKind::Cast { .. }));
        assert!(matches!(
            parse_expr("(x) - 1").kind,
            ExprKind::Binary {
                operator: BinaryOp::Subtract,
                ..
            }
        ));
    }

    #[test]
    fn test_compound_assignment() {
        match parse_expr("x += 2").kind {
            ExprKind::Assign { operator, .. } => assert_eq!(operator, Some(BinaryOp::Add)),
            _ => panic!("Expected assignment"),
        }
    }

    #[test]
    fn test_invalid_assignment_target() {
        let tokens = Scanner::new("1 = 2").scan_tokens().unwrap();
        assert!(Parser::new(tokens).parse().is_err());
    }

    #[test]
    fn test_collections_and_lambda() {
        match parse_expr("[1, 2, 3,]").kind {
            ExprKind::List(items) => assert_eq!(items.len(), 3),
            _ => panic!("Expected list"),
        }
        match parse_expr("x = {\"a\": 1, \"b\": 2}").kind {
            ExprKind::Assign { value, .. } => {
                assert!(matches!(value.kind, ExprKind::Dict(ref e) if e.len() == 2))
            }
            _ => panic!("Expected assignment"),
        }
        match parse_expr("lambda a, b: a + b").kind {
            ExprKind::Lambda { params, .. } => assert_eq!(params.len(), 2),
            _ => panic!("Expected lambda"),
        }
    }

    #[test]
    fn test_new_and_move() {
        match parse_expr("new Point(1, 2)").kind {
            ExprKind::New {
                class_name,
                arguments,
            } => {
                assert_eq!(class_name, "Point");
                assert_eq!(arguments.len(), 2);
            }
            _ => panic!("Expected new"),
        }
        assert!(matches!(
            parse_expr("new int[10]").kind,
            ExprKind::NewArray { .. }
        ));
        assert!(matches!(parse_expr("move buf").kind, ExprKind::Move(_)));
    }

    #[test]
    fn test_indented_and_braced_blocks_are_equivalent() {
        let indented = parse_program("if x:\n    y = 1\nelse:\n    y = 2\n");
        let braced = parse_program("if x { y = 1 } else { y = 2 }");

        fn shape(program: &Program) -> (usize, usize) {
            match &program.statements[0].kind {
                StmtKind::If {
                    then_branch,
                    else_branch: Some(else_branch),
                    ..
                } => match (&then_branch.kind, &else_branch.kind) {
                    (StmtKind::Block(a), StmtKind::Block(b)) => (a.len(), b.len()),
                    _ => panic!("Expected blocks"),
                },
                _ => panic!("Expected if/else"),
            }
        }
        assert_eq!(shape(&indented), shape(&braced));
    }

    #[test]
    fn test_elif_chain() {
        let kind = first_stmt("if a:\n    x\nelif b:\n    y\nelse:\n    z\n");
        match kind {
            StmtKind::If {
                else_branch: Some(inner),
                ..
            } => assert!(matches!(inner.kind, StmtKind::If { .. })),
            _ => panic!("Expected if"),
        }
    }

    #[test]
    fn test_function_styles() {
        let sources = [
            "fn add(a, b) { return a + b }",
            "def add(a, b):\n    return a + b\n",
            "int add(int a, int b) { return a + b; }",
            "fn add(a: int, b: int) -> int => a + b",
            "add(a, b) -> int { return a + b }",
        ];
        for source in sources {
            match first_stmt(source) {
                StmtKind::Function(decl) => {
                    assert_eq!(decl.name, "add", "{}", source);
                    assert_eq!(decl.params.len(), 2, "{}", source);
                    assert_eq!(decl.body.len(), 1, "{}", source);
                }
                other => panic!("Expected function for {:?}, got {:?}", source, other),
            }
        }
    }

    #[test]
    fn test_default_parameters() {
        match first_stmt("fn greet(name, greeting = \"hi\") { }") {
            StmtKind::Function(decl) => {
                assert!(decl.params[0].default_value.is_none());
                assert!(decl.params[1].default_value.is_some());
            }
            _ => panic!("Expected function"),
        }
    }

    #[test]
    fn test_typed_variable_declarations() {
        match first_stmt("int* p = new int[4];") {
            StmtKind::VarDecl(decl) => {
                assert_eq!(decl.name, "p");
                assert!(matches!(
                    decl.type_annotation.map(|t| t.kind),
                    Some(TypeKind::Pointer(_))
                ));
            }
            other => panic!("Expected declaration, got {:?}", other),
        }
        match first_stmt("const x: int = 5") {
            StmtKind::VarDecl(decl) => {
                assert_eq!(decl.kind, VarKind::Const);
                assert!(decl.type_annotation.is_some());
            }
            _ => panic!("Expected declaration"),
        }
        // `a < b` is an expression, not a generic declaration
        assert!(matches!(first_stmt("a < b\n"), StmtKind::Expression(_)));
    }

    #[test]
    fn test_class_members() {
        let source = "\
class Point extends Base {
    let x = 0
    int y = 0;
    static count = 0
    Point(x, y) { this.x = x }
    fn norm(self) -> float { return 0.0 }
}";
        match first_stmt(source) {
            StmtKind::Class(class) => {
                assert_eq!(class.base.as_deref(), Some("Base"));
                assert_eq!(class.fields.len(), 3);
                assert!(class.fields[2].is_static);
                assert_eq!(class.methods.len(), 2);
                assert_eq!(class.methods[0].name, "Point");
                assert!(class.methods[1].params.is_empty());
            }
            _ => panic!("Expected class"),
        }
    }

    #[test]
    fn test_python_style_class() {
        let source = "class Dog(Animal):\n    def __init__(self, name):\n        self.name = name\n    def speak(self):\n        return \"woof\"\n";
        match first_stmt(source) {
            StmtKind::Class(class) => {
                assert_eq!(class.base.as_deref(), Some("Animal"));
                assert_eq!(class.methods.len(), 2);
                assert_eq!(class.methods[0].params.len(), 1);
            }
            _ => panic!("Expected class"),
        }
    }

    #[test]
    fn test_struct_enum_namespace() {
        assert!(matches!(
            first_stmt("struct P { int x; int y; };"),
            StmtKind::Class(ClassDecl {
                is_struct: true,
                ..
            })
        ));
        match first_stmt("enum Color { Red, Green = 5, Blue }") {
            StmtKind::Enum(decl) => {
                assert_eq!(decl.variants.len(), 3);
                assert!(decl.variants[1].value.is_some());
            }
            _ => panic!("Expected enum"),
        }
        match first_stmt("namespace math {\n    fn sq(x) { return x * x }\n}") {
            StmtKind::Namespace { name, body } => {
                assert_eq!(name, "math");
                assert_eq!(body.len(), 1);
            }
            _ => panic!("Expected namespace"),
        }
    }

    #[test]
    fn test_template_wraps_declaration() {
        match first_stmt("template<typename T> class Box { T value; }") {
            StmtKind::Template {
                params,
                declaration,
            } => {
                assert_eq!(params, vec!["T".to_string()]);
                match declaration.kind {
                    StmtKind::Class(class) => assert_eq!(class.type_params, params),
                    _ => panic!("Expected class inside template"),
                }
            }
            _ => panic!("Expected template"),
        }
    }

    #[test]
    fn test_try_catch_finally() {
        let source = "try {\n    risky()\n} catch (ValueError e) {\n    print(e)\n} finally {\n    done()\n}";
        match first_stmt(source) {
            StmtKind::Try {
                catches, finally, ..
            } => {
                assert_eq!(catches.len(), 1);
                assert_eq!(catches[0].exception_type.as_deref(), Some("ValueError"));
                assert_eq!(catches[0].variable.as_deref(), Some("e"));
                assert!(finally.is_some());
            }
            _ => panic!("Expected try"),
        }
    }

    #[test]
    fn test_python_except() {
        let source = "try:\n    risky()\nexcept KeyError as e:\n    pass\nexcept:\n    pass\n";
        match first_stmt(source) {
            StmtKind::Try { catches, .. } => {
                assert_eq!(catches.len(), 2);
                assert_eq!(catches[0].exception_type.as_deref(), Some("KeyError"));
                assert!(catches[1].exception_type.is_none());
            }
            _ => panic!("Expected try"),
        }
    }

    #[test]
    fn test_match_arms() {
        let source = "match x {\n    case 1 => print(\"one\"),\n    case n if n > 10 => print(\"big\"),\n    case _ => print(\"other\")\n}";
        match first_stmt(source) {
            StmtKind::Match { arms, .. } => {
                assert_eq!(arms.len(), 3);
                assert!(matches!(arms[0].pattern, Pattern::Value(_)));
                assert!(matches!(&arms[1].pattern, Pattern::Binding(n) if n == "n"));
                assert!(arms[1].guard.is_some());
                assert!(matches!(arms[2].pattern, Pattern::Wildcard));
            }
            _ => panic!("Expected match"),
        }
    }

    #[test]
    fn test_for_loops() {
        assert!(matches!(
            first_stmt("for x in items:\n    print(x)\n"),
            StmtKind::ForIn { .. }
        ));
        match first_stmt("for (let i = 0; i < 10; i++) { }") {
            StmtKind::For {
                init,
                condition,
                update,
                ..
            } => {
                assert!(init.is_some());
                assert!(condition.is_some());
                assert!(update.is_some());
            }
            _ => panic!("Expected C-style for"),
        }
    }

    #[test]
    fn test_imports() {
        match first_stmt("from math.utils import sqrt, pow") {
            StmtKind::Import(decl) => {
                assert_eq!(decl.module, "math.utils");
                assert_eq!(decl.items, vec!["sqrt".to_string(), "pow".to_string()]);
            }
            _ => panic!("Expected import"),
        }
        assert!(matches!(
            first_stmt("using namespace std;"),
            StmtKind::Using(ref n) if n == "std"
        ));
    }

    #[test]
    fn test_error_recovery_collects_multiple_errors() {
        let tokens = Scanner::new("let = 1\nlet y = 2\nfn (\nlet z = 3\n")
            .scan_tokens()
            .unwrap();
        let errors = Parser::new(tokens).parse().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors.iter().next().unwrap().span().line, 1);
    }

    #[test]
    fn test_node_ids_are_unique() {
        let program = parse_program("fn f(a) { return a + 1 }\nlet x = f(2) * 3\n");
        let mut ids: Vec<NodeId> = program.nodes().iter().map(|n| n.id()).collect();
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), total);
    }

    #[test]
    fn test_min_int_literal() {
        match parse_expr("-9223372036854775808;").kind {
            ExprKind::IntLiteral(n) => assert_eq!(n, i64::MIN),
            other => panic!("Expected integer literal, got {:?}", other),
        }

        let tokens = Scanner::new("9223372036854775808;").scan_tokens().unwrap();
        assert!(Parser::new(tokens).parse().is_err());
    }
}
