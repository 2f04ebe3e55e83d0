//! Declaration compilation: functions, classes, enums, namespaces and modules.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::ast::{
    ClassDecl, EnumDecl, Expr, ExprKind, FieldDecl, FunctionDecl, NodeId, Parameter, Stmt,
    StmtKind,
};
use crate::bytecode::chunk::Constant;
use crate::bytecode::function::ClassInfo;
use crate::error::CompileError;
use crate::span::Span;

use super::compiler::{CompileResult, Compiler, FunctionBuilder, Resolved};

/// Method names that declare a constructor, besides the class's own name.
const CONSTRUCTOR_NAMES: &[&str] = &["__init__", "init", "constructor"];

impl Compiler {
    pub(crate) fn compile_declaration(&mut self, stmt: &Stmt) -> CompileResult<()> {
        let span = stmt.span;
        match &stmt.kind {
            StmtKind::Function(decl) => self.compile_function_decl(decl),
            StmtKind::Class(decl) => self.compile_class(decl, span),
            StmtKind::Enum(decl) => self.compile_enum(decl, span),
            StmtKind::Namespace { name, body } => {
                let segments: Vec<String> = name.split('.').map(str::to_string).collect();
                for segment in &segments {
                    self.namespace.push(segment.clone());
                    let qualified = self.namespace.join(".");
                    if !self.module.namespaces.contains(&qualified) {
                        self.module.namespaces.push(qualified.clone());
                    }
                    self.globals.insert(qualified);
                }
                let result = body.iter().try_for_each(|stmt| {
                    self.compile_stmt(stmt)?;
                    self.flush_pending_inits()
                });
                let depth = self.namespace.len() - segments.len();
                self.namespace.truncate(depth);
                result
            }
            StmtKind::Template {
                params,
                declaration,
            } => match &declaration.kind {
                // Templates are erased: the body runs for every instantiation.
                StmtKind::Function(_) | StmtKind::Class(_) => self.compile_stmt(declaration),
                _ => Err(CompileError::template(
                    format!(
                        "template<{}> must introduce a function or class",
                        params.join(", ")
                    ),
                    span,
                )),
            },
            StmtKind::Import(decl) => {
                if decl.items.is_empty() {
                    self.module.imports.push(decl.module.clone());
                } else {
                    for item in &decl.items {
                        self.module.imports.push(format!("{}.{}", decl.module, item));
                    }
                }
                debug!(module = %decl.module, "recorded import");
                Ok(())
            }
            StmtKind::Using(name) => {
                if !self.using.contains(name) {
                    self.using.push(name.clone());
                }
                Ok(())
            }
            StmtKind::Export(inner) => {
                self.compile_stmt(inner)?;
                let name = match &inner.kind {
                    StmtKind::Function(decl) => Some(&decl.name),
                    StmtKind::Class(decl) => Some(&decl.name),
                    StmtKind::Enum(decl) => Some(&decl.name),
                    StmtKind::VarDecl(decl) => Some(&decl.name),
                    StmtKind::Namespace { name, .. } => Some(name),
                    StmtKind::Template { declaration, .. } => match &declaration.kind {
                        StmtKind::Function(decl) => Some(&decl.name),
                        StmtKind::Class(decl) => Some(&decl.name),
                        _ => None,
                    },
                    _ => None,
                };
                if let Some(name) = name {
                    let qualified = self.qualify(name);
                    self.module.exports.push(qualified);
                }
                Ok(())
            }
            _ => self.compile_stmt(stmt),
        }
    }

    fn compile_function_decl(&mut self, decl: &FunctionDecl) -> CompileResult<()> {
        let name = self.qualify(&decl.name);
        self.globals.insert(name.clone());
        let builder = FunctionBuilder::new(name);
        self.compile_function_body(builder, &decl.params, &decl.body, decl.span)
    }

    fn compile_class(&mut self, decl: &ClassDecl, span: Span) -> CompileResult<()> {
        let name = self.qualify(&decl.name);
        if self.module.classes.contains_key(&name) {
            return Err(CompileError::duplicate(name, span));
        }

        let mut info = ClassInfo::new(&name);
        info.is_struct = decl.is_struct;
        info.base = match &decl.base {
            Some(base) => match self.resolve(base) {
                Resolved::Global(global) => Some(global),
                _ => Some(base.clone()),
            },
            None => None,
        };

        // Fields whose initial value must be computed when an instance is built.
        let mut computed: Vec<&FieldDecl> = Vec::new();
        let mut statics = HashSet::new();
        for field in &decl.fields {
            if field.is_static {
                let global = format!("{}.{}", name, field.name);
                statics.insert(field.name.clone());
                self.globals.insert(global.clone());
                match &field.initializer {
                    None => {
                        self.module.globals.insert(global, Constant::Null);
                    }
                    Some(init) => match Self::constant_of(init) {
                        Some(constant) => {
                            self.module.globals.insert(global, constant);
                        }
                        None => self.pending_inits.push((global, init.clone())),
                    },
                }
                continue;
            }
            let default = match &field.initializer {
                None => Constant::Null,
                Some(init) => Self::constant_of(init).unwrap_or_else(|| {
                    computed.push(field);
                    Constant::Null
                }),
            };
            info.fields.insert(field.name.clone(), default);
        }

        let method_name = |method: &FunctionDecl| {
            if method.name == decl.name || CONSTRUCTOR_NAMES.contains(&method.name.as_str()) {
                "__init__".to_string()
            } else {
                method.name.clone()
            }
        };
        for method in &decl.methods {
            let method = method_name(method);
            if info.methods.contains(&method) {
                return Err(CompileError::duplicate(info.method_function(&method), span));
            }
            info.methods.push(method);
        }
        let has_constructor = info.methods.iter().any(|m| m == "__init__");
        let synthesize = !has_constructor && !info.fields.is_empty();
        if synthesize {
            info.methods.push("__init__".to_string());
        }

        self.class_statics.insert(name.clone(), statics);
        self.globals.insert(name.clone());
        self.module.classes.insert(name.clone(), Arc::new(info));

        for method in &decl.methods {
            let method_name = method_name(method);
            let prologue = if method_name == "__init__" {
                field_initializers(&computed)
            } else {
                Vec::new()
            };
            let mut builder = FunctionBuilder::new(format!("{}.{}", name, method_name));
            builder.class = Some(name.clone());
            if !method.is_static {
                builder.params.push("self".to_string());
                builder.is_method = true;
            }
            let body: Vec<Stmt> = prologue.into_iter().chain(method.body.iter().cloned()).collect();
            self.compile_function_body(builder, &method.params, &body, method.span)?;
        }

        if synthesize {
            self.synthesize_constructor(&name, decl, span)?;
        }
        debug!(class = %name, methods = decl.methods.len(), "compiled class");
        Ok(())
    }

    /// `__init__(self, f1 = default1, ...)` assigning each instance field.
    fn synthesize_constructor(
        &mut self,
        class: &str,
        decl: &ClassDecl,
        span: Span,
    ) -> CompileResult<()> {
        let fields: Vec<&FieldDecl> = decl.fields.iter().filter(|f| !f.is_static).collect();
        let params: Vec<Parameter> = fields
            .iter()
            .map(|field| Parameter {
                name: field.name.clone(),
                type_annotation: field.type_annotation.clone(),
                default_value: Some(
                    field
                        .initializer
                        .clone()
                        .unwrap_or_else(|| expr(ExprKind::Null, field.span)),
                ),
                span: field.span,
            })
            .collect();
        let body = fields
            .iter()
            .map(|field| {
                assign_field(
                    &field.name,
                    expr(ExprKind::Identifier(field.name.clone()), field.span),
                    field.span,
                )
            })
            .collect::<Vec<_>>();

        let mut builder = FunctionBuilder::new(format!("{}.__init__", class));
        builder.class = Some(class.to_string());
        builder.params.push("self".to_string());
        builder.is_method = true;
        self.compile_function_body(builder, &params, &body, span)
    }

    fn compile_enum(&mut self, decl: &EnumDecl, span: Span) -> CompileResult<()> {
        let name = self.qualify(&decl.name);
        let mut next: i64 = 0;
        for variant in &decl.variants {
            let value = match &variant.value {
                None => next,
                Some(value) => match Self::constant_of(value) {
                    Some(Constant::Int(n)) => n,
                    _ => {
                        return Err(CompileError::new(
                            format!(
                                "value of {}.{} must be an integer constant",
                                name, variant.name
                            ),
                            variant.span,
                        ))
                    }
                },
            };
            let global = format!("{}.{}", name, variant.name);
            self.globals.insert(global.clone());
            self.module.globals.insert(global, Constant::Int(value));
            next = value
                .checked_add(1)
                .ok_or_else(|| CompileError::new("enum value overflows", span))?;
        }
        self.globals.insert(name.clone());
        if !self.module.namespaces.contains(&name) {
            self.module.namespaces.push(name);
        }
        Ok(())
    }
}

fn expr(kind: ExprKind, span: Span) -> Expr {
    Expr::new(NodeId::default(), kind, span)
}

/// `self.name = value;`
fn assign_field(name: &str, value: Expr, span: Span) -> Stmt {
    let target = expr(
        ExprKind::Member {
            object: Box::new(expr(ExprKind::Identifier("self".to_string()), span)),
            name: name.to_string(),
            arrow: false,
        },
        span,
    );
    let assign = expr(
        ExprKind::Assign {
            target: Box::new(target),
            operator: None,
            value: Box::new(value),
        },
        span,
    );
    Stmt::new(NodeId::default(), StmtKind::Expression(assign), span)
}

fn field_initializers(fields: &[&FieldDecl]) -> Vec<Stmt> {
    fields
        .iter()
        .filter_map(|field| {
            let init = field.initializer.clone()?;
            Some(assign_field(&field.name, init, field.span))
        })
        .collect()
}
