//! Bootstrap artifact generation for Windows worker instances
//!
//! Turns cluster state into the files an instance needs before its kubelet can
//! join: the kubelet configuration, a bootstrap kubeconfig, trust bundles, TLS
//! material, container runtime mirror configuration and whatever the boot
//! specification embeds.

#![deny(missing_docs)]

pub mod artifacts;
pub mod boot_config;
pub mod credentials;
pub mod kubeconfig;
pub mod kubelet_config;

pub use artifacts::{
    kubelet_ca_bundle, trusted_ca_bundle, ArtifactBatch, ArtifactDir, ArtifactFile,
    BootstrapInputs, TlsPair,
};
pub use boot_config::{BootConfig, BootFile, IgnitionBootConfig, StaticBootConfig};
pub use credentials::ClusterCredentials;
pub use kubeconfig::Kubeconfig;
pub use kubelet_config::{cluster_dns, KubeletConfiguration};
