//! The program record handed over by the external loader.

use std::collections::HashMap;

use crate::field::Felt;
use crate::relocatable::Value;

/// A member of a composite identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Member {
    pub type_name: String,
    pub offset: usize,
}

/// One entry of the symbol table: a fully-qualified name bound to metadata
/// the hint executor resolves against.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Identifier {
    pub full_name: Option<String>,
    pub members: HashMap<String, Member>,
    pub size: Option<usize>,
    pub decorators: Vec<String>,
    pub pc: Option<usize>,
    pub type_name: Option<String>,
    pub value: Option<Felt>,
}

/// An immutable compiled program: data words, declared builtins in order,
/// and the identifier table.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub data: Vec<Value>,
    pub builtins: Vec<String>,
    pub identifiers: HashMap<String, Identifier>,
}

impl Program {
    pub fn new(
        data: Vec<Value>,
        builtins: Vec<String>,
        identifiers: HashMap<String, Identifier>,
    ) -> Self {
        Self {
            data,
            builtins,
            identifiers,
        }
    }

    /// The `const`-typed identifiers with a bound value, as the name ->
    /// Felt table fed to the hint executor.
    pub fn constants(&self) -> HashMap<String, Felt> {
        self.identifiers
            .iter()
            .filter_map(|(name, identifier)| {
                match (identifier.type_name.as_deref(), identifier.value) {
                    (Some("const"), Some(value)) => Some((name.clone(), value)),
                    _ => None,
                }
            })
            .collect()
    }
}
