//! Mirror registry configuration for the container runtime
//!
//! Image mirror declarations are merged into one [`MirrorSet`] per source
//! registry host, then rendered into the `hosts.toml` document the container
//! runtime reads from `<registries dir>/<source host>/hosts.toml`, with any
//! port folded into the directory name by [`host_directory`].
//!
//! The whole pipeline is pure: [`build_mirror_sets`] merges declarations,
//! [`MirrorSet::render`] produces one document and [`mirror_config_files`]
//! produces the directory contents handed to the instance transport.

#![deny(missing_docs)]

mod mirror;

pub use mirror::{
    build_mirror_sets, extract_hostname, host_directory, mirror_config_files, truncate_mirror,
    Mirror, MirrorSet, SourcePolicy,
};
