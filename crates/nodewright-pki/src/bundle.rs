//! Subject-keyed trust bundle merge for signer rotation

use tracing::debug;

use crate::certificate::{decode_pem_blocks, encode_block, Certificate};
use crate::{BundleError, Result};

/// Replace certificates whose subject contains `subject` with `new_bundle`.
///
/// Blocks of `initial` are visited in order:
/// - blocks that do not decode or do not parse as X.509 are dropped from the output
/// - certificates whose subject contains `subject` are replaced by the full,
///   verbatim contents of `new_bundle`
/// - every other certificate is emitted in canonical PEM form
///
/// `new_bundle` is emitted once per matching certificate. Two generations of a
/// signer can legitimately coexist mid-rotation, but a substring that matches
/// unrelated signers duplicates the new bundle, so callers must pass a
/// specific subject.
///
/// Returns `initial` unchanged when `new_bundle` is `None`.
pub fn merge_trust_bundle(
    initial: &[u8],
    new_bundle: Option<&[u8]>,
    subject: &str,
) -> Result<Vec<u8>> {
    if subject.is_empty() {
        return Err(BundleError::EmptySubject);
    }
    let new_bundle = match new_bundle {
        None => return Ok(initial.to_vec()),
        Some(b) if b.is_empty() => return Err(BundleError::EmptyNewBundle),
        Some(b) => b,
    };

    let blocks = decode_pem_blocks(initial);
    if blocks.is_empty() {
        return Err(BundleError::Decode("no decodable PEM blocks found".to_string()));
    }

    let mut merged = Vec::with_capacity(initial.len() + new_bundle.len());
    for (index, block) in blocks.iter().enumerate() {
        let cert = match Certificate::from_pem_block(block) {
            Ok(cert) => cert,
            Err(e) => {
                debug!(index, tag = %block.tag(), error = %e, "dropping unparseable bundle entry");
                continue;
            }
        };

        if cert.subject().contains(subject) {
            debug!(index, subject = %cert.subject(), "replacing rotated certificate");
            merged.extend_from_slice(new_bundle);
        } else {
            merged.extend_from_slice(encode_block(block).as_bytes());
        }
    }

    Ok(merged)
}
