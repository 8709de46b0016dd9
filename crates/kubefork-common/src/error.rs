//! Error types for kubefork
//!
//! Errors carry the resource kind, name or identity key they concern so a
//! failed reconciliation can be traced back to the object that caused it.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for kubefork operations
#[derive(Debug, Error)]
pub enum Error {
    /// Resource store operation failed
    #[error("store {operation} failed for {kind} {name}: {source}")]
    Store {
        /// Operation that failed (get, list, create, replace, delete)
        operation: &'static str,
        /// Resource kind
        kind: String,
        /// Namespaced name (or namespace for list calls)
        name: String,
        /// The underlying kube-rs error
        #[source]
        source: kube::Error,
    },

    /// Malformed user input in an intent object
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Namespaced name of the offending object
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.manager")
        field: Option<String>,
    },

    /// Identity function could not compute a key
    #[error("identity error for {kind}: {message}")]
    Identity {
        /// Resource kind being identified
        kind: String,
        /// Description of what failed
        message: String,
    },

    /// Owner reference could not be attached
    #[error("owner reference error for {child}: {message}")]
    OwnerReference {
        /// Name of the child object
        child: String,
        /// Description of the conflict
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being converted (if known)
        kind: Option<String>,
    },

    /// A refresh pass failed for one desired item or live child
    #[error("refresh of {kind} [{identity}] failed: {source}")]
    Refresh {
        /// Resource kind being refreshed
        kind: String,
        /// Identity key of the item being processed
        identity: String,
        /// What went wrong
        #[source]
        source: Box<Error>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "deadline-watcher")
        context: String,
    },
}

impl Error {
    /// Wrap a store failure with the operation and object it concerned
    pub fn store(
        operation: &'static str,
        kind: impl Into<String>,
        name: impl Into<String>,
        source: kube::Error,
    ) -> Self {
        Self::Store {
            operation,
            kind: kind.into(),
            name: name.into(),
            source,
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error for a specific field of a resource
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create an identity error
    pub fn identity(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Identity {
            kind: kind.into(),
            message: msg.into(),
        }
    }

    /// Create an owner reference error
    pub fn owner_reference(child: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::OwnerReference {
            child: child.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Attach refresh context (kind + identity key) to an error
    pub fn in_refresh(self, kind: impl Into<String>, identity: impl Into<String>) -> Self {
        Self::Refresh {
            kind: kind.into(),
            identity: identity.into(),
            source: Box::new(self),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// The underlying kube error, looking through refresh context
    pub fn kube_source(&self) -> Option<&kube::Error> {
        match self {
            Error::Store { source, .. } => Some(source),
            Error::Refresh { source, .. } => source.kube_source(),
            _ => None,
        }
    }

    /// Check if this error is a 404 from the API server
    pub fn is_not_found(&self) -> bool {
        matches!(self.kube_source(), Some(kube::Error::Api(ae)) if ae.code == 404)
    }

    /// Check if this error is retryable
    ///
    /// Malformed input and serialization problems need a spec fix; 4xx
    /// responses from the API server other than conflicts are not transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Store { source, .. } => match source {
                kube::Error::Api(ae) => ae.code == 409 || !(400..500).contains(&ae.code),
                _ => true,
            },
            Error::Validation { .. } => false,
            Error::Identity { .. } => false,
            Error::OwnerReference { .. } => false,
            Error::Serialization { .. } => false,
            Error::Refresh { source, .. } => source.is_retryable(),
            Error::Internal { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "Test".to_string(),
            code,
        })
    }

    /// Story: a malformed manager reference surfaces the field and never retries
    #[test]
    fn story_validation_error_names_the_field() {
        let err = Error::validation_for_field("team-a/my-fork", "spec.manager", "expected ns/name");
        assert!(err.to_string().contains("team-a/my-fork"));
        assert!(err.to_string().contains("expected ns/name"));
        assert!(!err.is_retryable());
    }

    /// Story: a store failure deep inside a refresh keeps both contexts
    #[test]
    fn story_refresh_context_wraps_store_failure() {
        let err = Error::store("replace", "Mapping", "ambassador/api-x", api_error(500))
            .in_refresh("Mapping", "api.example.com|x");

        let msg = err.to_string();
        assert!(msg.contains("Mapping"));
        assert!(msg.contains("api.example.com|x"));
        assert!(err.is_retryable());
        assert!(!err.is_not_found());
    }

    #[test]
    fn not_found_is_detected_through_refresh_context() {
        let err = Error::store("get", "Fork", "ns/f", api_error(404)).in_refresh("Fork", "f");
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
    }

    #[test]
    fn conflicts_are_retryable() {
        assert!(Error::store("replace", "Mapping", "gateway/m", api_error(409)).is_retryable());
        assert!(!Error::store("create", "Mapping", "gateway/m", api_error(422)).is_retryable());
    }
}
