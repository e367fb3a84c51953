//! Run-time faults raised while interpreting a candidate program.

use crate::table::TableError;
use serde::{Deserialize, Serialize};

/// Category of a runtime fault, reported to callers in
/// [`crate::ExecutionOutcome::RuntimeFault`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    ZeroDivision,
    TypeError,
    KeyError,
    NameError,
    AttributeError,
    IndexError,
    ValueError,
    Overflow,
    ResourceLimit,
    Unsupported,
    Internal,
    /// The run's cancellation flag was raised; surfaces as a timeout
    Interrupted,
}

impl FaultKind {
    /// Python-style exception name shown in messages
    pub fn label(&self) -> &'static str {
        match self {
            FaultKind::ZeroDivision => "ZeroDivisionError",
            FaultKind::TypeError => "TypeError",
            FaultKind::KeyError => "KeyError",
            FaultKind::NameError => "NameError",
            FaultKind::AttributeError => "AttributeError",
            FaultKind::IndexError => "IndexError",
            FaultKind::ValueError => "ValueError",
            FaultKind::Overflow => "OverflowError",
            FaultKind::ResourceLimit => "ResourceLimitError",
            FaultKind::Unsupported => "NotImplementedError",
            FaultKind::Internal => "InternalError",
            FaultKind::Interrupted => "Interrupted",
        }
    }

    /// Whether a `try` block in the program may catch this fault
    pub fn is_catchable(&self) -> bool {
        !matches!(
            self,
            FaultKind::ResourceLimit | FaultKind::Internal | FaultKind::Interrupted
        )
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
}

pub type FaultResult<T> = std::result::Result<T, Fault>;

impl Fault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(FaultKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(FaultKind::ValueError, message)
    }

    pub fn key_error(message: impl Into<String>) -> Self {
        Self::new(FaultKind::KeyError, message)
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::new(FaultKind::IndexError, message)
    }

    pub fn zero_division(message: impl Into<String>) -> Self {
        Self::new(FaultKind::ZeroDivision, message)
    }

    pub fn overflow() -> Self {
        Self::new(FaultKind::Overflow, "integer result out of range")
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Unsupported, message)
    }

    pub fn resource_limit(message: impl Into<String>) -> Self {
        Self::new(FaultKind::ResourceLimit, message)
    }

    pub fn interrupted() -> Self {
        Self::new(FaultKind::Interrupted, "run cancelled")
    }

    /// `KeyError: 'sales'` style text for users
    pub fn render(&self) -> String {
        format!("{}: {}", self.kind.label(), self.message)
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<TableError> for Fault {
    fn from(err: TableError) -> Self {
        let kind = match &err {
            TableError::MissingColumn(_) => FaultKind::KeyError,
            TableError::TypeMismatch(_) => FaultKind::TypeError,
            TableError::DuplicateColumn(_)
            | TableError::LengthMismatch { .. }
            | TableError::Invalid(_) => FaultKind::ValueError,
        };
        Fault::new(kind, err.to_string())
    }
}
