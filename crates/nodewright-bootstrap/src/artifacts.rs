//! Bootstrap artifact assembly
//!
//! Everything written to an instance before its kubelet starts is assembled
//! here as one [`ArtifactBatch`]. Gathering the inputs from the cluster is the
//! caller's job; this module only turns inputs into file contents.

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;
use zeroize::Zeroizing;

use nodewright_common::{
    Error, Result, BOOTSTRAP_KUBECONFIG_FILE, KUBELET_ARGS_FILE, KUBELET_CA_FILE,
    KUBELET_CONFIG_FILE, KUBELET_SIGNER_SUBJECT, K_DIR, REGISTRIES_DIR, TLS_CERT_FILE, TLS_DIR,
    TLS_KEY_FILE, TRUSTED_CA_FILE,
};
use nodewright_registries::{mirror_config_files, MirrorSet};

use crate::boot_config::BootConfig;
use crate::credentials::ClusterCredentials;
use crate::kubeconfig::Kubeconfig;
use crate::kubelet_config::{cluster_dns, KubeletConfiguration};

/// One file to ensure on the instance
#[derive(Clone, PartialEq, Eq)]
pub struct ArtifactFile {
    /// Directory on the instance
    pub dir: String,
    /// File name within `dir`
    pub name: String,
    /// File contents, wiped on drop
    pub contents: Zeroizing<Vec<u8>>,
}

impl ArtifactFile {
    fn new(dir: &str, name: &str, contents: Vec<u8>) -> Self {
        Self {
            dir: dir.to_string(),
            name: name.to_string(),
            contents: Zeroizing::new(contents),
        }
    }

    /// Full path on the instance
    pub fn path(&self) -> String {
        format!("{}\\{}", self.dir, self.name)
    }
}

impl fmt::Debug for ArtifactFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactFile")
            .field("path", &self.path())
            .field("len", &self.contents.len())
            .finish()
    }
}

/// A directory whose contents are replaced wholesale
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactDir {
    /// Directory on the instance
    pub dir: String,
    /// Relative path to contents
    pub files: BTreeMap<String, Vec<u8>>,
}

/// TLS certificate and key from a cluster secret
#[derive(Clone)]
pub struct TlsPair {
    /// PEM certificate chain
    pub cert: Vec<u8>,
    /// PEM private key
    pub key: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for TlsPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsPair")
            .field("cert_len", &self.cert.len())
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Inputs gathered from the cluster for one bootstrap run
pub struct BootstrapInputs<'a> {
    /// Extracted boot configuration
    pub boot_config: &'a dyn BootConfig,
    /// API endpoint and CA for the bootstrap kubeconfig
    pub credentials: &'a ClusterCredentials,
    /// Cluster-issued bootstrap token
    pub bootstrap_token: &'a str,
    /// Service network the cluster DNS address is derived from
    pub service_cidr: &'a str,
    /// Rotated kubelet client CA bundle, `None` when no rotation is published
    pub kubelet_client_ca: Option<&'a [u8]>,
    /// Image registry and proxy trust bundle
    pub trusted_ca_bundle: &'a [u8],
    /// TLS pair for services on the instance
    pub tls: &'a TlsPair,
    /// Mirror configuration for the container runtime
    pub mirror_sets: &'a [MirrorSet],
}

/// All artifacts pushed to an instance before bootstrap
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArtifactBatch {
    /// Individual files, in write order
    pub files: Vec<ArtifactFile>,
    /// Directories replaced wholesale
    pub dirs: Vec<ArtifactDir>,
}

impl ArtifactBatch {
    /// Assemble the batch.
    ///
    /// Boot files land in `C:\k` under their base name unless a generated
    /// artifact uses the same name, in which case the generated one wins.
    pub fn build(inputs: &BootstrapInputs<'_>) -> Result<Self> {
        let mut k_files: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        for file in inputs.boot_config.files() {
            k_files.insert(file.file_name().to_string(), file.decode()?);
        }

        let args = serde_json::to_vec_pretty(&inputs.boot_config.service_args())
            .map_err(|e| Error::serialization_for_kind("kubelet args", e.to_string()))?;
        k_files.insert(KUBELET_ARGS_FILE.to_string(), args);

        let dns = cluster_dns(inputs.service_cidr)?;
        k_files.insert(
            KUBELET_CONFIG_FILE.to_string(),
            KubeletConfiguration::windows(dns).to_json()?,
        );

        let kubeconfig = Kubeconfig::bearer(
            inputs.credentials.api_endpoint(),
            inputs.credentials.ca_bundle(),
            inputs.bootstrap_token,
        );
        k_files.insert(BOOTSTRAP_KUBECONFIG_FILE.to_string(), kubeconfig.to_json()?);

        k_files.insert(
            KUBELET_CA_FILE.to_string(),
            kubelet_ca_bundle(&inputs.boot_config.trust_anchor_data(), inputs.kubelet_client_ca)?,
        );
        k_files.insert(TRUSTED_CA_FILE.to_string(), inputs.trusted_ca_bundle.to_vec());

        let mut files: Vec<ArtifactFile> = k_files
            .into_iter()
            .map(|(name, contents)| ArtifactFile::new(K_DIR, &name, contents))
            .collect();
        files.push(ArtifactFile::new(TLS_DIR, TLS_CERT_FILE, inputs.tls.cert.clone()));
        files.push(ArtifactFile::new(TLS_DIR, TLS_KEY_FILE, inputs.tls.key.to_vec()));

        let dirs = vec![ArtifactDir {
            dir: REGISTRIES_DIR.to_string(),
            files: mirror_config_files(inputs.mirror_sets),
        }];

        debug!(files = files.len(), mirror_sets = inputs.mirror_sets.len(), "assembled bootstrap artifacts");
        Ok(Self { files, dirs })
    }

    #[cfg(test)]
    fn file(&self, path: &str) -> Option<&ArtifactFile> {
        self.files.iter().find(|f| f.path() == path)
    }
}

/// Kubelet client CA: the boot trust anchor with the rotated signer swapped in
pub fn kubelet_ca_bundle(trust_anchor: &[u8], rotated: Option<&[u8]>) -> Result<Vec<u8>> {
    nodewright_pki::merge_trust_bundle(trust_anchor, rotated, KUBELET_SIGNER_SUBJECT)
        .map_err(|e| Error::configuration(KUBELET_CA_FILE, e.to_string()))
}

/// Image registry CAs (sorted by key) followed by the proxy trust bundle.
///
/// Each piece is newline-terminated so PEM blocks never run together.
pub fn trusted_ca_bundle(
    image_registry_cas: &BTreeMap<String, String>,
    proxy_bundle: Option<&str>,
) -> Vec<u8> {
    let mut out = String::new();
    for piece in image_registry_cas.values().map(String::as_str).chain(proxy_bundle) {
        if piece.trim().is_empty() {
            continue;
        }
        out.push_str(piece);
        if !piece.ends_with('\n') {
            out.push('\n');
        }
    }
    out.into_bytes()
}
