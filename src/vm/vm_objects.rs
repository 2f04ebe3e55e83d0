//! Attribute and item access, collections and explicit memory management.

use std::rc::Rc;

use crate::error::RuntimeErrorKind;
use crate::vm::value::{BoundBuiltin, BoundMethod, DictMap, HashKey, Object, Value};

use super::vm::Vm;

impl Vm<'_> {
    pub(crate) fn get_attr(&self, target: &Value, name: &str) -> Result<Value, RuntimeErrorKind> {
        match target {
            Value::Object(object) => {
                ensure_alive(object)?;
                if let Some(value) = object.fields.borrow().get(name) {
                    return Ok(value.clone());
                }
                for class in self.module.class_chain(&object.class) {
                    if !class.methods.iter().any(|m| m == name) {
                        continue;
                    }
                    if let Some(function) = self.module.function(&class.method_function(name)) {
                        if function.params.first().is_some_and(|p| p == "self") {
                            return Ok(Value::BoundMethod(Rc::new(BoundMethod {
                                receiver: target.clone(),
                                function: function.clone(),
                            })));
                        }
                        return Ok(Value::Function(function.clone()));
                    }
                }
                Err(RuntimeErrorKind::no_such_attribute(&object.class.name, name))
            }
            Value::Class(class) => {
                for info in self.module.class_chain(class) {
                    let qualified = info.method_function(name);
                    if let Some(value) = self.state.globals.get(&qualified) {
                        return Ok(value.clone());
                    }
                    if let Some(function) = self.module.function(&qualified) {
                        return Ok(Value::Function(function.clone()));
                    }
                }
                Err(RuntimeErrorKind::no_such_attribute(&class.name, name))
            }
            Value::Namespace(namespace) => {
                let qualified = format!("{}.{}", namespace, name);
                self.state
                    .globals
                    .get(&qualified)
                    .cloned()
                    .ok_or_else(|| RuntimeErrorKind::no_such_attribute(namespace.as_ref(), name))
            }
            Value::Exception(exception) => match name {
                "message" => Ok(Value::str(&exception.message)),
                "kind" | "type" | "name" => Ok(Value::str(&exception.kind)),
                _ => Err(RuntimeErrorKind::no_such_attribute(&exception.kind, name)),
            },
            Value::List(_) | Value::Str(_) | Value::Dict(_) => {
                if let Some(builtin) = self.stdlib.method(target, name) {
                    return Ok(Value::BoundBuiltin(Rc::new(BoundBuiltin {
                        receiver: target.clone(),
                        builtin,
                    })));
                }
                if let Value::Dict(dict) = target {
                    if let Some(value) = dict.borrow().get(&HashKey::Str(Rc::from(name))) {
                        return Ok(value.clone());
                    }
                }
                Err(RuntimeErrorKind::no_such_attribute(target.type_name(), name))
            }
            other => Err(RuntimeErrorKind::no_such_attribute(other.type_name(), name)),
        }
    }

    pub(crate) fn set_attr(
        &mut self,
        target: &Value,
        name: &str,
        value: Value,
    ) -> Result<(), RuntimeErrorKind> {
        match target {
            Value::Object(object) => {
                ensure_alive(object)?;
                object.fields.borrow_mut().insert(name.to_string(), value);
                Ok(())
            }
            Value::Class(class) => {
                self.state
                    .globals
                    .insert(class.method_function(name), value);
                Ok(())
            }
            Value::Namespace(namespace) => {
                self.state
                    .globals
                    .insert(format!("{}.{}", namespace, name), value);
                Ok(())
            }
            Value::Dict(dict) => {
                dict.borrow_mut()
                    .insert(HashKey::Str(Rc::from(name)), value);
                Ok(())
            }
            other => Err(RuntimeErrorKind::type_error(format!(
                "cannot set attribute '{}' on {}",
                name,
                other.type_name()
            ))),
        }
    }

    pub(crate) fn get_item(&self, container: &Value, key: &Value) -> Result<Value, RuntimeErrorKind> {
        match container {
            Value::List(items) => {
                let items = items.borrow();
                let index = list_index(key, items.len())?;
                Ok(items[index].clone())
            }
            Value::Str(s) => {
                let length = s.chars().count();
                let index = list_index(key, length)?;
                Ok(s.chars()
                    .nth(index)
                    .map(|c| Value::str(c.to_string()))
                    .unwrap_or(Value::Null))
            }
            Value::Dict(dict) => {
                let hash_key = HashKey::from_value(key)?;
                dict.borrow()
                    .get(&hash_key)
                    .cloned()
                    .ok_or_else(|| RuntimeErrorKind::KeyNotFound(key.repr()))
            }
            Value::Object(object) => {
                ensure_alive(object)?;
                let name = key.as_str().ok_or_else(|| {
                    RuntimeErrorKind::type_error("object keys must be strings")
                })?;
                self.get_attr(container, name)
            }
            other => Err(RuntimeErrorKind::type_error(format!(
                "'{}' is not subscriptable",
                other.type_name()
            ))),
        }
    }

    pub(crate) fn set_item(
        &mut self,
        container: &Value,
        key: &Value,
        value: Value,
    ) -> Result<(), RuntimeErrorKind> {
        match container {
            Value::List(items) => {
                let mut items = items.borrow_mut();
                let index = list_index(key, items.len())?;
                items[index] = value;
                Ok(())
            }
            Value::Dict(dict) => {
                let hash_key = HashKey::from_value(key)?;
                dict.borrow_mut().insert(hash_key, value);
                Ok(())
            }
            Value::Object(_) => {
                let name = key.as_str().ok_or_else(|| {
                    RuntimeErrorKind::type_error("object keys must be strings")
                })?;
                self.set_attr(container, name, value)
            }
            other => Err(RuntimeErrorKind::type_error(format!(
                "'{}' does not support item assignment",
                other.type_name()
            ))),
        }
    }

    /// Pair up `k0, v0, k1, v1, ...`; later keys overwrite earlier ones.
    pub(crate) fn build_dict(&self, flat: Vec<Value>) -> Result<Value, RuntimeErrorKind> {
        let mut map = DictMap::default();
        let mut iter = flat.into_iter();
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            map.insert(HashKey::from_value(&key)?, value);
        }
        Ok(Value::dict(map))
    }

    pub(crate) fn length(&self, value: &Value) -> Result<usize, RuntimeErrorKind> {
        match value {
            Value::List(items) => Ok(items.borrow().len()),
            Value::Dict(dict) => Ok(dict.borrow().len()),
            Value::Str(s) => Ok(s.chars().count()),
            other => Err(RuntimeErrorKind::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            ))),
        }
    }

    /// The list a `for` loop walks: a snapshot of a list, the keys of a
    /// dictionary or the characters of a string.
    pub(crate) fn iterate(&self, value: &Value) -> Result<Value, RuntimeErrorKind> {
        let items = match value {
            Value::List(items) => items.borrow().clone(),
            Value::Dict(dict) => dict.borrow().keys().map(HashKey::to_value).collect(),
            Value::Str(s) => s.chars().map(|c| Value::str(c.to_string())).collect(),
            other => {
                return Err(RuntimeErrorKind::type_error(format!(
                    "'{}' is not iterable",
                    other.type_name()
                )))
            }
        };
        Ok(Value::list(items))
    }

    pub(crate) fn allocate(&self, size: &Value) -> Result<Value, RuntimeErrorKind> {
        let size = match size {
            Value::Int(n) if *n >= 0 => *n as usize,
            Value::Int(n) => {
                return Err(RuntimeErrorKind::type_error(format!(
                    "cannot allocate a negative size ({})",
                    n
                )))
            }
            other => {
                return Err(RuntimeErrorKind::type_error(format!(
                    "allocation size must be int, not {}",
                    other.type_name()
                )))
            }
        };
        let addr = self
            .memory
            .allocate(size)
            .ok_or(RuntimeErrorKind::OutOfMemory(size))?;
        Ok(Value::Pointer { addr, size })
    }

    pub(crate) fn free(&self, pointer: &Value) -> Result<(), RuntimeErrorKind> {
        match pointer {
            Value::Pointer { addr, .. } => {
                if self.memory.free(*addr) {
                    Ok(())
                } else {
                    Err(RuntimeErrorKind::InvalidFree(*addr))
                }
            }
            Value::Null => Ok(()),
            other => Err(RuntimeErrorKind::type_error(format!(
                "cannot free {}",
                other.type_name()
            ))),
        }
    }

    pub(crate) fn delete(&self, target: &Value) -> Result<(), RuntimeErrorKind> {
        match target {
            Value::Object(object) => {
                ensure_alive(object)?;
                object.alive.set(false);
                object.fields.borrow_mut().clear();
                Ok(())
            }
            Value::Pointer { .. } | Value::Null => self.free(target),
            other => Err(RuntimeErrorKind::type_error(format!(
                "cannot delete {}",
                other.type_name()
            ))),
        }
    }
}

fn ensure_alive(object: &Object) -> Result<(), RuntimeErrorKind> {
    if object.alive.get() {
        Ok(())
    } else {
        Err(RuntimeErrorKind::UseAfterDelete(object.class.name.clone()))
    }
}

/// Resolve a possibly negative index against `length`.
fn list_index(key: &Value, length: usize) -> Result<usize, RuntimeErrorKind> {
    let index = match key {
        Value::Int(n) => *n,
        other => {
            return Err(RuntimeErrorKind::type_error(format!(
                "indices must be integers, not {}",
                other.type_name()
            )))
        }
    };
    let resolved = if index < 0 {
        index.checked_add(length as i64)
    } else {
        Some(index)
    };
    match resolved {
        Some(i) if i >= 0 && (i as usize) < length => Ok(i as usize),
        _ => Err(RuntimeErrorKind::IndexOutOfBounds { index, length }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_index_resolution() {
        assert_eq!(list_index(&Value::Int(0), 3).unwrap(), 0);
        assert_eq!(list_index(&Value::Int(-1), 3).unwrap(), 2);
        assert!(matches!(
            list_index(&Value::Int(3), 3),
            Err(RuntimeErrorKind::IndexOutOfBounds { index: 3, length: 3 })
        ));
        assert!(matches!(
            list_index(&Value::Int(-4), 3),
            Err(RuntimeErrorKind::IndexOutOfBounds { index: -4, .. })
        ));
        assert!(matches!(
            list_index(&Value::str("0"), 3),
            Err(RuntimeErrorKind::TypeError(_))
        ));
    }
}
