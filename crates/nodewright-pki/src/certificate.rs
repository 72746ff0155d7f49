//! Certificate decoding

use ::pem::{EncodeConfig, LineEnding, Pem};
use tracing::debug;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::{BundleError, Result};

/// One X.509 certificate decoded from a PEM block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    subject: String,
    der: Vec<u8>,
}

impl Certificate {
    /// Parse a DER-encoded certificate
    ///
    /// Trailing bytes after the certificate are rejected.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (rest, cert) = X509Certificate::from_der(der)
            .map_err(|e| BundleError::Parse(format!("failed to parse certificate: {}", e)))?;
        if !rest.is_empty() {
            return Err(BundleError::Parse(format!(
                "{} trailing bytes after certificate",
                rest.len()
            )));
        }

        Ok(Self {
            subject: cert.subject().to_string(),
            der: der.to_vec(),
        })
    }

    /// Parse the contents of a PEM block as a certificate
    pub fn from_pem_block(block: &Pem) -> Result<Self> {
        Self::from_der(block.contents())
    }

    /// Subject distinguished name in its canonical string form (`CN=..., OU=...`)
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Raw DER encoding
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Canonical PEM encoding of the certificate
    pub fn to_pem(&self) -> String {
        encode_block(&Pem::new("CERTIFICATE", self.der.clone()))
    }
}

const BEGIN_MARKER: &[u8] = b"-----BEGIN ";
const END_MARKER: &[u8] = b"-----END ";
const DASHES: &[u8] = b"-----";

/// Decode every PEM block in `data`, in order
///
/// Text between blocks is ignored. A block whose body does not decode is
/// skipped and scanning resumes after its END line.
pub fn decode_pem_blocks(data: &[u8]) -> Vec<Pem> {
    let mut blocks = Vec::new();
    let mut rest = data;
    while let Some(span) = next_block_span(rest) {
        match ::pem::parse(&rest[span.clone()]) {
            Ok(block) => blocks.push(block),
            Err(e) => debug!(error = %e, "skipping undecodable PEM block"),
        }
        rest = &rest[span.end..];
    }
    blocks
}

/// Byte range of the next BEGIN..END block, including the END line's newline
fn next_block_span(data: &[u8]) -> Option<std::ops::Range<usize>> {
    let start = find(data, BEGIN_MARKER)?;
    let end_line = start + find(&data[start..], END_MARKER)? + END_MARKER.len();
    let mut end = end_line + find(&data[end_line..], DASHES)? + DASHES.len();
    if data[end..].starts_with(b"\r\n") {
        end += 2;
    } else if data[end..].starts_with(b"\n") {
        end += 1;
    }
    Some(start..end)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Canonical PEM encoding: 64 column base64, LF line endings
pub(crate) fn encode_block(block: &Pem) -> String {
    ::pem::encode_config(block, EncodeConfig::new().set_line_ending(LineEnding::LF))
}
