//! inspect-boot-config command - show what bootstrap takes from a boot document

use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use nodewright_bootstrap::{BootConfig, IgnitionBootConfig};

use super::read_file_to_string;
use crate::Result;

/// inspect-boot-config arguments
#[derive(Args, Debug)]
pub struct InspectBootConfigArgs {
    /// Ignition v3 JSON document
    #[arg(long)]
    pub file: PathBuf,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct Summary {
    service_args: std::collections::BTreeMap<String, String>,
    files: Vec<String>,
    trust_anchor_certificates: usize,
}

/// Run the inspect-boot-config command
pub fn run(args: InspectBootConfigArgs) -> Result<()> {
    let boot_config = IgnitionBootConfig::parse(&read_file_to_string(&args.file)?)?;
    println!("{}", serde_json::to_string_pretty(&summarize(&boot_config))?);
    Ok(())
}

fn summarize(boot_config: &dyn BootConfig) -> Summary {
    let anchors = nodewright_pki::decode_pem_blocks(&boot_config.trust_anchor_data());
    Summary {
        service_args: boot_config.service_args(),
        files: boot_config.files().into_iter().map(|f| f.path).collect(),
        trust_anchor_certificates: anchors.len(),
    }
}
