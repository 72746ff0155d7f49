//! merge-bundle command - swap a rotated signer into a trust bundle
//!
//! Every certificate in the initial bundle whose subject contains `--subject`
//! is replaced by the contents of `--new`; everything else is kept in order.
//! Without `--new` the initial bundle is printed unchanged.

use std::io::Write;
use std::path::PathBuf;

use clap::Args;
use tracing::debug;

use nodewright_common::KUBELET_SIGNER_SUBJECT;

use super::read_file;
use crate::Result;

/// merge-bundle arguments
#[derive(Args, Debug)]
pub struct MergeBundleArgs {
    /// PEM bundle to start from
    #[arg(long)]
    pub initial: PathBuf,

    /// PEM bundle replacing the matching certificates
    #[arg(long)]
    pub new: Option<PathBuf>,

    /// Subject substring selecting the certificates to replace
    #[arg(long, default_value = KUBELET_SIGNER_SUBJECT)]
    pub subject: String,
}

/// Run the merge-bundle command
pub fn run(args: MergeBundleArgs) -> Result<()> {
    let merged = merge(&args)?;
    std::io::stdout().write_all(&merged)?;
    Ok(())
}

fn merge(args: &MergeBundleArgs) -> Result<Vec<u8>> {
    let initial = read_file(&args.initial)?;
    let new = args.new.as_deref().map(read_file).transpose()?;

    let merged = nodewright_pki::merge_trust_bundle(&initial, new.as_deref(), &args.subject)?;
    debug!(bytes = merged.len(), subject = %args.subject, "bundle merged");
    Ok(merged)
}
