//! Boundary to the external hint executor.
//!
//! The engine does not interpret hint code. It stores per-pc hint bundles
//! supplied at load time and hands them, together with the program constants
//! and the execution-scope store, to an executor right before the register
//! update of the matching step.

use std::any::Any;
use std::collections::HashMap;

use thiserror::Error;

use crate::execution::vm::VirtualMachine;
use crate::field::Felt;

/// A failure reported by the executor; it aborts the run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("hint execution failed: {0}")]
pub struct HintError(pub String);

/// One hint attached to a program counter: the hint code identifier and the
/// identifier-reference map it closes over. Both are opaque to the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HintData {
    pub code: String,
    pub ids: HashMap<String, String>,
}

impl HintData {
    pub fn new(code: impl Into<String>, ids: HashMap<String, String>) -> Self {
        Self {
            code: code.into(),
            ids,
        }
    }
}

pub trait HintExecutor {
    /// Runs one hint. The executor reads and writes memory through the same
    /// interface as the engine and may mutate the topmost execution scope.
    fn execute_hint(
        &mut self,
        vm: &mut VirtualMachine,
        hint_data: &HintData,
        constants: &HashMap<String, Felt>,
        exec_scopes: &mut ExecutionScopes,
    ) -> Result<(), HintError>;
}

/// Executor for engine-only runs: any hint is an error.
#[derive(Debug, Default)]
pub struct NullHintExecutor;

impl HintExecutor for NullHintExecutor {
    fn execute_hint(
        &mut self,
        _vm: &mut VirtualMachine,
        hint_data: &HintData,
        _constants: &HashMap<String, Felt>,
        _exec_scopes: &mut ExecutionScopes,
    ) -> Result<(), HintError> {
        Err(HintError(format!(
            "no executor registered for hint {:?}",
            hint_data.code
        )))
    }
}

/// A stack of name -> value scopes shared across hint invocations. The
/// bottom (main) scope always exists.
pub struct ExecutionScopes {
    data: Vec<HashMap<String, Box<dyn Any>>>,
}

impl ExecutionScopes {
    pub fn new() -> Self {
        Self {
            data: vec![HashMap::new()],
        }
    }

    pub fn depth(&self) -> usize {
        self.data.len()
    }

    pub fn enter_scope(&mut self, scope: HashMap<String, Box<dyn Any>>) {
        self.data.push(scope);
    }

    /// Pops the current scope; the main scope cannot be exited.
    pub fn exit_scope(&mut self) -> Result<(), HintError> {
        if self.data.len() <= 1 {
            return Err(HintError("cannot exit the main scope".to_string()));
        }
        self.data.pop();
        Ok(())
    }

    /// Binds `name` in the topmost scope.
    pub fn insert_value(&mut self, name: impl Into<String>, value: Box<dyn Any>) {
        if let Some(scope) = self.data.last_mut() {
            scope.insert(name.into(), value);
        }
    }

    pub fn get_any(&self, name: &str) -> Option<&dyn Any> {
        self.data.last()?.get(name).map(Box::as_ref)
    }

    /// Typed read from the topmost scope.
    pub fn get<T: 'static>(&self, name: &str) -> Option<&T> {
        self.get_any(name)?.downcast_ref()
    }
}

impl Default for ExecutionScopes {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_stack_and_shadow() {
        let mut scopes = ExecutionScopes::new();
        scopes.insert_value("n", Box::new(1_u64));
        assert_eq!(scopes.get::<u64>("n"), Some(&1));

        scopes.enter_scope(HashMap::new());
        assert_eq!(scopes.get::<u64>("n"), None);
        scopes.insert_value("n", Box::new(2_u64));
        assert_eq!(scopes.get::<u64>("n"), Some(&2));

        scopes.exit_scope().unwrap();
        assert_eq!(scopes.get::<u64>("n"), Some(&1));
    }

    #[test]
    fn main_scope_cannot_be_exited() {
        let mut scopes = ExecutionScopes::new();
        assert!(scopes.exit_scope().is_err());
        assert_eq!(scopes.depth(), 1);
    }

    #[test]
    fn typed_reads_check_the_type() {
        let mut scopes = ExecutionScopes::new();
        scopes.insert_value("x", Box::new("hello".to_string()));
        assert_eq!(scopes.get::<String>("x"), Some(&"hello".to_string()));
        assert_eq!(scopes.get::<u64>("x"), None);
    }
}
