//! Function calls, returns and instantiation.

use std::rc::Rc;
use std::sync::Arc;

use crate::bytecode::{ClassInfo, Function};
use crate::error::RuntimeErrorKind;
use crate::vm::builtins::BuiltinContext;
use crate::vm::value::{Builtin, Object, Value};

use super::vm::{CallFrame, Flow, Vm};

impl Vm<'_> {
    /// Call `callee`. User functions get a new frame and produce their value
    /// later through `RET`, so they return `None`; natives return at once.
    pub(crate) fn call_value(
        &mut self,
        callee: Value,
        args: Vec<Value>,
    ) -> Result<Option<Value>, RuntimeErrorKind> {
        match callee {
            Value::Function(function) => {
                self.push_frame(function, args, None)?;
                Ok(None)
            }
            Value::BoundMethod(method) => {
                let args = with_receiver(&method.receiver, args);
                self.push_frame(method.function.clone(), args, None)?;
                Ok(None)
            }
            Value::Builtin(builtin) => self.call_builtin(builtin, args).map(Some),
            Value::BoundBuiltin(bound) => {
                let args = with_receiver(&bound.receiver, args);
                self.call_builtin(bound.builtin, args).map(Some)
            }
            Value::Class(class) => self.instantiate(class, args),
            other => Err(RuntimeErrorKind::NotCallable(other.type_name())),
        }
    }

    /// `NEW`: like calling a class. Builtins are accepted too, so
    /// `new ValueError("x")` works.
    pub(crate) fn construct(
        &mut self,
        class: Value,
        args: Vec<Value>,
    ) -> Result<Option<Value>, RuntimeErrorKind> {
        match class {
            Value::Class(class) => self.instantiate(class, args),
            Value::Builtin(builtin) => self.call_builtin(builtin, args).map(Some),
            other => Err(RuntimeErrorKind::type_error(format!(
                "cannot instantiate {}",
                other.type_name()
            ))),
        }
    }

    pub(crate) fn call_builtin(
        &mut self,
        builtin: Builtin,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeErrorKind> {
        let mut ctx = BuiltinContext {
            name: builtin.name,
            output: &mut *self.output,
            module: self.module,
        };
        (builtin.func)(&mut ctx, args)
    }

    /// Check arity and the depth limit, then enter `function`.
    pub(crate) fn push_frame(
        &mut self,
        function: Arc<Function>,
        args: Vec<Value>,
        construct: Option<Value>,
    ) -> Result<(), RuntimeErrorKind> {
        let total = function.params.len();
        let required = function.required_params;
        if args.len() < required || args.len() > total {
            // The receiver is implicit at the call site.
            let implicit = usize::from(function.params.first().is_some_and(|p| p == "self"));
            let (required, total) = (required.saturating_sub(implicit), total - implicit);
            let expected = if required == total {
                required.to_string()
            } else {
                format!("{}-{}", required, total)
            };
            return Err(RuntimeErrorKind::WrongArity {
                name: function.name.clone(),
                expected,
                got: args.len().saturating_sub(implicit),
            });
        }
        if self.state.frames.len() >= self.max_call_depth {
            return Err(RuntimeErrorKind::RecursionLimit(self.max_call_depth));
        }

        function.record_call();
        if let Some(jit) = self.jit {
            if let Some(native) = jit.record_call(&self.module.name, &function) {
                if function.native().is_none() {
                    function.attach_native(native);
                }
            }
        }
        let mut frame = CallFrame::new(function, args);
        frame.construct = construct;
        self.state.frames.push(frame);
        Ok(())
    }

    /// Leave the current frame with `value`. Constructor frames yield the
    /// object they built.
    pub(crate) fn return_from_frame(
        &mut self,
        value: Value,
        base: usize,
    ) -> Result<Flow, RuntimeErrorKind> {
        let frame = self
            .pop_frame()
            .ok_or_else(|| RuntimeErrorKind::InvalidBytecode("return without a frame".into()))?;
        let value = frame.construct.unwrap_or(value);
        if self.state.frames.len() <= base {
            return Ok(Flow::Finished(value));
        }
        self.push(value)?;
        Ok(Flow::Next)
    }

    /// Build an instance: field defaults from the root base down, then the
    /// nearest `__init__` along the chain.
    pub(crate) fn instantiate(
        &mut self,
        class: Arc<ClassInfo>,
        args: Vec<Value>,
    ) -> Result<Option<Value>, RuntimeErrorKind> {
        let chain = self.module.class_chain(&class);
        let object = Object::new(class.clone());
        {
            let mut fields = object.fields.borrow_mut();
            for info in chain.iter().rev() {
                for (name, default) in &info.fields {
                    fields.insert(name.clone(), Value::from_constant(default));
                }
            }
        }
        let object = Value::Object(Rc::new(object));

        let init = chain
            .iter()
            .find(|info| info.methods.iter().any(|m| m == "__init__"))
            .and_then(|info| self.module.function(&info.method_function("__init__")))
            .cloned();
        match init {
            Some(init) => {
                let args = with_receiver(&object, args);
                self.push_frame(init, args, Some(object))?;
                Ok(None)
            }
            None if args.is_empty() => Ok(Some(object)),
            None => Err(RuntimeErrorKind::WrongArity {
                name: class.name.clone(),
                expected: "0".into(),
                got: args.len(),
            }),
        }
    }
}

fn with_receiver(receiver: &Value, args: Vec<Value>) -> Vec<Value> {
    let mut full = Vec::with_capacity(args.len() + 1);
    full.push(receiver.clone());
    full.extend(args);
    full
}
