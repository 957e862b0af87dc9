//! Unified error system for Verity
//!
//! A single error type shared by every crate in the workspace. Test bodies do
//! not use this type directly; they report through [`crate::outcome::Interrupt`].

use serde::{Deserialize, Serialize};

/// Unified error type for all Verity operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum VerityError {
    /// Invalid input or configuration
    #[error("Invalid: {message}")]
    Invalid {
        /// Error message describing the invalid input
        message: String,
    },

    /// A resource name was requested that no factory is registered for
    #[error("Unknown resource: {name}")]
    UnknownResource {
        /// The requested resource name
        name: String,
    },

    /// Resource dependencies form a cycle
    #[error("Resource dependency cycle: {}", path.join(" -> "))]
    DependencyCycle {
        /// Resource names along the cycle, first and last entries are equal
        path: Vec<String>,
    },

    /// A resource factory failed while constructing an instance
    #[error("Resource '{name}' failed to build: {message}")]
    ResourceFactory {
        /// Name of the resource whose factory failed
        name: String,
        /// Error message reported by the factory
        message: String,
    },

    /// A resolved instance did not have the requested type
    #[error("Resource '{name}' is not a {expected}")]
    TypeMismatch {
        /// Name of the resource
        name: String,
        /// Requested type name
        expected: String,
    },

    /// Modifier parameters rejected at build time
    #[error("Invalid modifier: {message}")]
    InvalidModifier {
        /// Error message describing the violated constraint
        message: String,
    },

    /// Operation not allowed in the current lifecycle state
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Error message describing the state violation
        message: String,
    },

    /// Configuration could not be loaded or failed validation
    #[error("Config error: {message}")]
    Config {
        /// Error message describing the configuration problem
        message: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message describing the serialization failure
        message: String,
    },

    /// Storage operation failed
    #[error("Storage error: {message}")]
    Storage {
        /// Error message describing the storage failure
        message: String,
    },

    /// Internal system error
    #[error("Internal error: {message}")]
    Internal {
        /// Error message describing the internal error
        message: String,
    },
}

impl VerityError {
    /// Create an invalid input error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create an unknown resource error
    pub fn unknown_resource(name: impl Into<String>) -> Self {
        Self::UnknownResource { name: name.into() }
    }

    /// Create a resource factory error
    pub fn resource_factory(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ResourceFactory {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an invalid modifier error
    pub fn invalid_modifier(message: impl Into<String>) -> Self {
        Self::InvalidModifier {
            message: message.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Short machine-readable kind, used when flattening errors into results
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Invalid { .. } => "invalid",
            Self::UnknownResource { .. } => "unknown_resource",
            Self::DependencyCycle { .. } => "dependency_cycle",
            Self::ResourceFactory { .. } => "resource_factory",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::InvalidModifier { .. } => "invalid_modifier",
            Self::InvalidState { .. } => "invalid_state",
            Self::Config { .. } => "config",
            Self::Serialization { .. } => "serialization",
            Self::Storage { .. } => "storage",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Standard Result type for Verity operations
pub type Result<T> = std::result::Result<T, VerityError>;

impl From<std::io::Error> for VerityError {
    fn from(err: std::io::Error) -> Self {
        Self::storage(err.to_string())
    }
}

impl From<serde_json::Error> for VerityError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<toml::de::Error> for VerityError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}
