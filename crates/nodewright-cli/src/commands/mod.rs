//! CLI commands

use std::path::Path;

use crate::{Error, Result};

pub mod cluster_dns;
pub mod inspect_boot_config;
pub mod merge_bundle;
pub mod probe_credentials;
pub mod render_mirrors;

/// Read a whole file, naming it in the error
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Read a whole UTF-8 file, naming it in the error
pub fn read_file_to_string(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })
}
