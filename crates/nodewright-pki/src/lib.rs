//! PKI operations for node trust bundles
//!
//! A trust bundle is an ordered concatenation of PEM blocks. The node's kubelet
//! trusts whatever its bundle holds, so when the cluster rotates a signer the
//! old certificate must be swapped for the new bundle in place, without
//! reordering or touching the other anchors.
//!
//! - [`Certificate`] - one decoded X.509 certificate (subject + DER)
//! - [`merge_trust_bundle`] - subject-keyed replacement used during CA rotation

#![deny(missing_docs)]

mod bundle;
mod certificate;

pub use bundle::merge_trust_bundle;
pub use certificate::{decode_pem_blocks, Certificate};

use thiserror::Error;

/// Trust bundle errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BundleError {
    /// The subject substring used to select certificates was empty
    #[error("subject substring must not be empty")]
    EmptySubject,

    /// A replacement bundle was supplied but had no content
    #[error("new bundle was supplied but is empty")]
    EmptyNewBundle,

    /// The initial bundle could not be decoded as PEM
    #[error("failed to decode initial bundle: {0}")]
    Decode(String),

    /// A PEM block did not hold a valid X.509 certificate
    #[error("certificate parsing error: {0}")]
    Parse(String),
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, BundleError>;
