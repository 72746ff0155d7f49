//! Error types for nodewright
//!
//! Errors are structured with fields to aid debugging in production. Each
//! variant maps onto one failure category of the node lifecycle:
//! configuration errors fail fast, transient cluster errors surface only as
//! timeouts, and remote-instance errors propagate immediately.

use std::fmt;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Lifecycle phase a wrapped error originated from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Cordon before reconfiguration or removal
    Cordon,
    /// Generating and pushing bootstrap artifacts
    WriteBootstrapArtifacts,
    /// Starting required services on the instance
    Bootstrap,
    /// Waiting for the cluster to register the instance as a node
    DiscoverNode,
    /// Annotating the node with identity metadata
    ApplyIdentity,
    /// Pointing the configuration daemon at the cluster
    ConfigureSidecar,
    /// Announcing the desired version and waiting for convergence
    AnnounceDesiredVersion,
    /// Refreshing the node and making it schedulable
    Uncordon,
    /// Evicting workloads from the node
    Drain,
    /// Running the configuration daemon cleanup on the instance
    Cleanup,
    /// Waiting for an in-flight reboot to finish
    AwaitReboot,
    /// Rebooting the instance and reconnecting
    Reboot,
    /// Removing node files and networks from the instance
    RemoveFiles,
    /// Clearing version annotations from a deconfigured node
    ClearAnnotations,
}

impl Phase {
    /// Stable name used in logs and error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Cordon => "cordon",
            Phase::WriteBootstrapArtifacts => "write-bootstrap-artifacts",
            Phase::Bootstrap => "bootstrap",
            Phase::DiscoverNode => "discover-node",
            Phase::ApplyIdentity => "apply-identity",
            Phase::ConfigureSidecar => "configure-sidecar",
            Phase::AnnounceDesiredVersion => "announce-desired-version",
            Phase::Uncordon => "uncordon",
            Phase::Drain => "drain",
            Phase::Cleanup => "cleanup",
            Phase::AwaitReboot => "await-reboot",
            Phase::Reboot => "reboot",
            Phase::RemoveFiles => "remove-files",
            Phase::ClearAnnotations => "clear-annotations",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for nodewright operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Invalid or missing configuration input (malformed CIDR, missing secret key, ...)
    #[error("configuration error [{context}]: {message}")]
    Configuration {
        /// Identifier of the offending input (secret name, CIDR, field)
        context: String,
        /// Description of what's invalid
        message: String,
    },

    /// A bounded wait exhausted its timeout
    #[error("timeout [{context}]: {message}")]
    Timeout {
        /// What was being waited on
        context: String,
        /// Description of the condition that never became true
        message: String,
    },

    /// A remote operation on the instance failed
    #[error("instance error for {instance}: {message}")]
    Instance {
        /// Address of the instance
        instance: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The document kind being serialized (if known)
        kind: Option<String>,
    },

    /// The operation was cancelled by the caller
    #[error("cancelled [{context}]")]
    Cancelled {
        /// Operation that observed the cancellation
        context: String,
    },

    /// A lifecycle phase failed for a node or instance
    #[error("{phase} failed for {target}: {source}")]
    Phase {
        /// Phase that failed
        phase: Phase,
        /// Node name, or instance address when no node is known
        target: String,
        /// Underlying cause
        #[source]
        source: Box<Error>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred
        context: String,
    },
}

impl Error {
    /// Create a configuration error naming the offending input
    pub fn configuration(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Configuration {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Timeout {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create an instance error
    pub fn instance(instance: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Instance {
            instance: instance.into(),
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

    /// Create a serialization error with document kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(context: impl Into<String>) -> Self {
        Self::Cancelled {
            context: context.into(),
        }
    }

    /// Wrap an error with the phase and target it failed in
    pub fn in_phase(self, phase: Phase, target: impl Into<String>) -> Self {
        Self::Phase {
            phase,
            target: target.into(),
            source: Box::new(self),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Configuration and serialization errors require a fix before retrying.
    /// Remote-instance errors are not retried internally, but a later
    /// reconciliation may succeed, so they count as retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 429
            ),
            Error::Configuration { .. } => false,
            Error::Timeout { .. } => true,
            Error::Instance { .. } => true,
            Error::Serialization { .. } => false,
            Error::Cancelled { .. } => false,
            Error::Phase { source, .. } => source.is_retryable(),
            Error::Internal { .. } => true,
        }
    }

    /// Phase a wrapped error failed in
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Error::Phase { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Innermost cause, unwrapping phase context
    pub fn root(&self) -> &Error {
        match self {
            Error::Phase { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether this error (or its root) is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Error::Timeout { .. })
    }

    /// Whether this error (or its root) is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Error::Cancelled { .. })
    }
}

/// Returns true when a kube error is an API 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}
