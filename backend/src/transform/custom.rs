//! Caller-supplied custom conversion functions.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::panic_message;

/// A pure conversion `(value, parameters) -> value` registered by name.
///
/// Returning `Err` (or panicking) records an error finding and writes
/// `null` for the field.
pub trait CustomFunction: Send + Sync {
    fn call(&self, value: &Value, parameters: &Map<String, Value>) -> Result<Value, String>;
}

impl<F> CustomFunction for F
where
    F: Fn(&Value, &Map<String, Value>) -> Result<Value, String> + Send + Sync,
{
    fn call(&self, value: &Value, parameters: &Map<String, Value>) -> Result<Value, String> {
        self(value, parameters)
    }
}

/// Named custom functions, injected when an engine is built.
#[derive(Clone, Default)]
pub struct CustomFunctions {
    functions: HashMap<String, Arc<dyn CustomFunction>>,
}

impl CustomFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function, replacing any previous one with the same name.
    pub fn register(&mut self, name: impl Into<String>, function: impl CustomFunction + 'static) -> &mut Self {
        self.functions.insert(name.into(), Arc::new(function));
        self
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, name: impl Into<String>, function: impl CustomFunction + 'static) -> Self {
        self.register(name, function);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CustomFunction>> {
        self.functions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for CustomFunctions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomFunctions")
            .field("functions", &self.names())
            .finish()
    }
}

/// Call a custom function, turning a panic into an error message.
pub(crate) fn call_guarded(
    function: &dyn CustomFunction,
    value: &Value,
    parameters: &Map<String, Value>,
) -> Result<Value, String> {
    match catch_unwind(AssertUnwindSafe(|| function.call(value, parameters))) {
        Ok(result) => result,
        Err(panic) => Err(format!("custom function panicked: {}", panic_message(&*panic))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_and_call() {
        let functions = CustomFunctions::new().with("double", |v: &Value, _: &Map<String, Value>| {
            v.as_i64()
                .map(|n| json!(n * 2))
                .ok_or_else(|| "not a number".to_string())
        });

        let f = functions.get("double").unwrap();
        assert_eq!(f.call(&json!(21), &Map::new()), Ok(json!(42)));
        assert!(f.call(&json!("x"), &Map::new()).is_err());
        assert!(!functions.contains("triple"));
    }

    #[test]
    fn test_panic_becomes_error() {
        let boom = |_: &Value, _: &Map<String, Value>| -> Result<Value, String> { panic!("boom") };
        let err = call_guarded(&boom, &Value::Null, &Map::new()).unwrap_err();
        assert!(err.contains("boom"));
    }
}
