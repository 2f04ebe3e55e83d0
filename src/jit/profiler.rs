//! Hot-function detection.
//!
//! Tracks call counts per function and remembers which functions crossed the
//! threshold and which were handed a native body. Functions are identified by
//! module and name, so modules sharing one table never see each other's
//! entries.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use super::NativeCode;

/// Calls after which a function is considered hot.
pub const JIT_THRESHOLD: u64 = 100;

/// A function as the profiler sees it: `module::function`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionKey {
    pub module: String,
    pub function: String,
}

impl FunctionKey {
    pub fn new(module: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            function: function.into(),
        }
    }
}

impl fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.module, self.function)
    }
}

#[derive(Debug)]
pub struct Profiler {
    threshold: u64,
    call_counts: HashMap<FunctionKey, u64>,
    hot_functions: BTreeSet<FunctionKey>,
    compiled: HashMap<FunctionKey, Arc<NativeCode>>,
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new(JIT_THRESHOLD)
    }
}

impl Profiler {
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold: threshold.max(1),
            call_counts: HashMap::new(),
            hot_functions: BTreeSet::new(),
            compiled: HashMap::new(),
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Record a call. Returns true if the function just became hot.
    pub fn record_call(&mut self, key: &FunctionKey) -> bool {
        let count = self.call_counts.entry(key.clone()).or_insert(0);
        *count += 1;
        if *count >= self.threshold && !self.hot_functions.contains(key) {
            self.hot_functions.insert(key.clone());
            return true;
        }
        false
    }

    pub fn is_hot(&self, key: &FunctionKey) -> bool {
        self.hot_functions.contains(key)
    }

    pub fn call_count(&self, key: &FunctionKey) -> u64 {
        self.call_counts.get(key).copied().unwrap_or(0)
    }

    pub fn hot_functions(&self) -> impl Iterator<Item = &FunctionKey> {
        self.hot_functions.iter()
    }

    pub fn insert_compiled(&mut self, code: NativeCode) -> Arc<NativeCode> {
        let code = Arc::new(code);
        self.compiled.insert(code.function.clone(), code.clone());
        code
    }

    pub fn compiled(&self, key: &FunctionKey) -> Option<Arc<NativeCode>> {
        self.compiled.get(key).cloned()
    }

    pub fn compiled_count(&self) -> usize {
        self.compiled.len()
    }

    pub fn total_calls(&self) -> u64 {
        self.call_counts.values().sum()
    }

    pub fn reset(&mut self) {
        self.call_counts.clear();
        self.hot_functions.clear();
        self.compiled.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hot_detection() {
        let mut profiler = Profiler::new(10);
        let hot = FunctionKey::new("m", "hot");
        for i in 0..10 {
            let became_hot = profiler.record_call(&hot);
            assert_eq!(became_hot, i == 9, "call {}", i);
        }
        assert!(!profiler.record_call(&hot), "only reported once");
        assert!(profiler.is_hot(&hot));
        assert_eq!(profiler.call_count(&hot), 11);
    }

    #[test]
    fn test_functions_are_tracked_separately() {
        let mut profiler = Profiler::default();
        let a = FunctionKey::new("m", "a");
        let b = FunctionKey::new("m", "b");
        for _ in 0..JIT_THRESHOLD {
            profiler.record_call(&a);
        }
        for _ in 0..50 {
            profiler.record_call(&b);
        }
        assert!(profiler.is_hot(&a));
        assert!(!profiler.is_hot(&b));
        assert_eq!(profiler.hot_functions().count(), 1);
        assert_eq!(profiler.total_calls(), JIT_THRESHOLD + 50);
    }

    #[test]
    fn test_same_name_in_two_modules() {
        let mut profiler = Profiler::new(2);
        let first = FunctionKey::new("first", "f");
        let second = FunctionKey::new("second", "f");
        profiler.record_call(&first);
        profiler.record_call(&first);
        profiler.record_call(&second);
        assert!(profiler.is_hot(&first));
        assert!(!profiler.is_hot(&second));
        assert_eq!(profiler.call_count(&second), 1);
        assert_eq!(first.to_string(), "first::f");
    }
}
