//! Transaction definitions: what a caller asks for when opening a scope.

use serde::{Deserialize, Serialize};

use crate::transaction::propagation::Propagation;

/// Attributes of a requested logical transaction scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionDefinition {
    /// How the scope relates to an already active transaction.
    pub propagation: Propagation,
    /// Optional name, used in log output.
    pub name: Option<String>,
    /// Read-only hint passed to the resource when a physical transaction
    /// is started.
    pub read_only: bool,
}

impl TransactionDefinition {
    /// Create a definition with the given propagation behavior.
    pub fn new(propagation: Propagation) -> Self {
        Self {
            propagation,
            ..Default::default()
        }
    }

    /// Set the propagation behavior.
    pub fn propagation(mut self, propagation: Propagation) -> Self {
        self.propagation = propagation;
        self
    }

    /// Set the scope name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the read-only flag.
    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Name for log output.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }
}

impl From<Propagation> for TransactionDefinition {
    fn from(propagation: Propagation) -> Self {
        Self::new(propagation)
    }
}
