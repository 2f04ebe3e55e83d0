//! Exception handling for the VM: handler ranges, unwinding and catch matching.

use tracing::debug;

use crate::bytecode::Module;
use crate::error::{RuntimeError, RuntimeErrorKind};
use crate::span::Span;
use crate::vm::value::Value;

use super::vm::{ExecutionMode, Handler, Vm};

/// Names a typed catch clause can use to catch anything.
const CATCH_ALL: &[&str] = &["Exception", "Error"];

/// The value a `catch` clause binds for a runtime failure.
pub fn exception_value(kind: &RuntimeErrorKind) -> Value {
    match kind {
        RuntimeErrorKind::Raised(value) => value.clone(),
        other => Value::exception(other.exception_name(), other.to_string()),
    }
}

/// Whether `value` is caught by `catch (type_name e)`.
pub fn exception_matches(value: &Value, type_name: &str, module: &Module) -> bool {
    if CATCH_ALL.contains(&type_name) {
        return true;
    }
    match value {
        Value::Exception(exc) => exc.kind == type_name,
        Value::Object(obj) => module
            .class_chain(&obj.class)
            .iter()
            .any(|class| class.name == type_name || class.name.rsplit('.').next() == Some(type_name)),
        _ => false,
    }
}

impl Vm<'_> {
    /// Install the handler for the region opened by the `SETUP_TRY` at `offset`.
    pub(crate) fn setup_try(&mut self, offset: usize) -> Result<(), RuntimeErrorKind> {
        let frame = self.frame_mut()?;
        let region = frame.function.region_for(offset).ok_or_else(|| {
            RuntimeErrorKind::InvalidBytecode(format!("SETUP_TRY at {} has no END_TRY", offset))
        })?;
        let stack_depth = frame.stack.len();
        frame.handlers.push(Handler {
            start: region.start,
            end: region.end,
            handler: region.handler,
            stack_depth,
        });
        Ok(())
    }

    pub(crate) fn pop_try(&mut self) -> Result<(), RuntimeErrorKind> {
        self.frame_mut()?
            .handlers
            .pop()
            .map(|_| ())
            .ok_or_else(|| RuntimeErrorKind::InvalidBytecode("no active try region".into()))
    }

    /// Route a failure to the innermost handler whose range covers the failing
    /// instruction, popping frames that have none. Frames at or below
    /// `base_depth` belong to an outer execution and are left alone; when the
    /// search reaches them the failure is returned as an uncaught error.
    pub(crate) fn unwind(
        &mut self,
        kind: RuntimeErrorKind,
        base_depth: usize,
    ) -> Result<(), RuntimeError> {
        self.state.mode = ExecutionMode::Unwinding;
        let origin = self
            .state
            .frames
            .last()
            .map(|frame| (frame.line(), frame.function.name.clone()));

        while self.state.frames.len() > base_depth {
            let Some(frame) = self.state.frames.last_mut() else {
                break;
            };
            let current = frame.current;
            let found = frame
                .handlers
                .iter()
                .rposition(|h| h.start <= current && current <= h.end);
            if let Some(index) = found {
                let handler = frame.handlers[index];
                frame.handlers.truncate(index);
                frame.stack.truncate(handler.stack_depth);
                frame.stack.push(exception_value(&kind));
                frame.pc = handler.handler;
                self.state.exception = None;
                self.state.mode = ExecutionMode::Running;
                return Ok(());
            }
            self.state.exception = Some(exception_value(&kind));
            self.pop_frame();
        }

        let (line, function) = origin.unwrap_or((0, String::new()));
        debug!(error = %kind, line, function = %function, "uncaught runtime error");
        let mut error = RuntimeError::new(kind, Span::at_line(line as usize));
        if !function.is_empty() {
            error = error.in_function(function);
        }
        Err(error)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::bytecode::ClassInfo;
    use crate::vm::value::Object;
    use std::rc::Rc;

    #[test]
    fn test_builtin_errors_become_exception_values() {
        let value = exception_value(&RuntimeErrorKind::DivisionByZero);
        assert_eq!(value.to_string(), "ZeroDivisionError: Division by zero");
        let raised = exception_value(&RuntimeErrorKind::Raised(Value::Int(7)));
        assert_eq!(raised, Value::Int(7));
    }

    #[test]
    fn test_matching_by_kind_and_class_chain() {
        let mut module = Module::new("m");
        let base = ClassInfo::new("AppError");
        let mut derived = ClassInfo::new("NotFound");
        derived.base = Some("AppError".into());
        module.classes.insert("AppError".into(), Arc::new(base));
        let derived = Arc::new(derived);
        module.classes.insert("NotFound".into(), derived.clone());

        let value = Value::exception("KeyError", "k");
        assert!(exception_matches(&value, "KeyError", &module));
        assert!(exception_matches(&value, "Exception", &module));
        assert!(!exception_matches(&value, "ValueError", &module));

        let object = Value::Object(Rc::new(Object::new(derived)));
        assert!(exception_matches(&object, "AppError", &module));
        assert!(!exception_matches(&object, "KeyError", &module));
        assert!(!exception_matches(&Value::Int(1), "KeyError", &module));
    }
}
