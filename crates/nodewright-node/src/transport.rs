//! Remote instance capability
//!
//! Session management and the remote service manager live behind
//! [`InstanceTransport`]; the orchestrator only issues these operations.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use zeroize::Zeroizing;

#[cfg(test)]
use mockall::automock;

use nodewright_common::kube_utils::public_key_hash;
use nodewright_common::Error;

/// SSH credential used to reach an instance
#[derive(Clone)]
pub struct SshKeyPair {
    /// Public key in authorized_keys format
    pub public_key: String,
    /// Private key, wiped on drop
    pub private_key: Zeroizing<String>,
}

impl SshKeyPair {
    /// Create a key pair
    pub fn new(public_key: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            private_key: Zeroizing::new(private_key.into()),
        }
    }

    /// Hash annotated on the node to bind it to this credential
    pub fn public_key_hash(&self) -> String {
        public_key_hash(&self.public_key)
    }
}

impl fmt::Debug for SshKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshKeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// A VM being turned into, or maintained as, a worker node
#[derive(Clone, Debug)]
pub struct Instance {
    /// Network address the instance is reached at and reports to the cluster
    pub address: String,
    /// SSH credential
    pub credential: SshKeyPair,
    /// Name of the node backing this instance, once known
    pub node_name: Option<String>,
}

impl Instance {
    /// Instance not yet associated with a node
    pub fn new(address: impl Into<String>, credential: SshKeyPair) -> Self {
        Self {
            address: address.into(),
            credential,
            node_name: None,
        }
    }

    /// Associate the instance with an existing node
    pub fn with_node_name(mut self, node_name: impl Into<String>) -> Self {
        self.node_name = Some(node_name.into());
        self
    }
}

/// Operations the orchestrator runs on an instance
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InstanceTransport: Send + Sync {
    /// Write `contents` to `dir\file_name` unless it already holds exactly that
    async fn ensure_file_content(
        &self,
        contents: &[u8],
        file_name: &str,
        dir: &str,
    ) -> Result<(), Error>;

    /// Replace everything under `dir` with `files` (relative path to contents)
    async fn replace_dir(&self, files: &BTreeMap<String, Vec<u8>>, dir: &str)
        -> Result<(), Error>;

    /// Start the services a node needs, at `version`
    async fn bootstrap(&self, version: &str, namespace: &str, kubeconfig: &[u8])
        -> Result<(), Error>;

    /// Point the configuration daemon at the cluster
    async fn configure_sidecar(&self, namespace: &str, kubeconfig: &[u8]) -> Result<(), Error>;

    /// Stop node services through the configuration daemon's cleanup
    async fn run_cleanup(&self, namespace: &str, kubeconfig: &[u8]) -> Result<(), Error>;

    /// Reboot the instance and wait until it is reachable again
    async fn reboot_and_reconnect(&self) -> Result<(), Error>;

    /// Remove node files and container networks
    async fn remove_files_and_networks(&self) -> Result<(), Error>;

    /// Network address of the instance
    fn address(&self) -> String;
}
