//! Bootstrap kubeconfig document
//!
//! The kubelet and the configuration daemon on the instance authenticate with
//! a single-cluster, single-user kubeconfig carrying a bearer token. The
//! document is written as JSON (a YAML subset every consumer accepts) with the
//! standard kubeconfig field names.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use nodewright_common::{Error, Result};

/// Cluster, user and context name used in generated kubeconfigs
pub const KUBECONFIG_ENTRY_NAME: &str = "local";

/// Kubeconfig structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeconfig {
    /// API version
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    /// Kind (always "Config")
    pub kind: String,
    /// Clusters
    pub clusters: Vec<KubeconfigCluster>,
    /// Users
    pub users: Vec<KubeconfigUser>,
    /// Contexts
    pub contexts: Vec<KubeconfigContext>,
    /// Current context
    pub current_context: String,
}

/// Cluster entry in kubeconfig
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubeconfigCluster {
    /// Cluster name
    pub name: String,
    /// Cluster config
    pub cluster: ClusterConfig,
}

/// Cluster configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterConfig {
    /// API server URL
    pub server: String,
    /// CA certificate (base64 encoded)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_authority_data: Option<String>,
}

/// User entry in kubeconfig
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubeconfigUser {
    /// User name
    pub name: String,
    /// User config
    pub user: UserConfig,
}

/// User configuration
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    /// Bearer token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl std::fmt::Debug for UserConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserConfig")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Drop for UserConfig {
    fn drop(&mut self) {
        if let Some(token) = self.token.as_mut() {
            token.zeroize();
        }
    }
}

/// Context entry in kubeconfig
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubeconfigContext {
    /// Context name
    pub name: String,
    /// Context config
    pub context: ContextConfig,
}

/// Context configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Cluster name (reference)
    pub cluster: String,
    /// User name (reference)
    pub user: String,
}

impl Kubeconfig {
    /// Single-entry kubeconfig authenticating with a bearer token
    pub fn bearer(server: &str, ca_pem: &[u8], token: &str) -> Self {
        let name = KUBECONFIG_ENTRY_NAME.to_string();
        Self {
            api_version: "v1".to_string(),
            kind: "Config".to_string(),
            clusters: vec![KubeconfigCluster {
                name: name.clone(),
                cluster: ClusterConfig {
                    server: server.to_string(),
                    certificate_authority_data: Some(STANDARD.encode(ca_pem)),
                },
            }],
            users: vec![KubeconfigUser {
                name: name.clone(),
                user: UserConfig {
                    token: Some(token.to_string()),
                },
            }],
            contexts: vec![KubeconfigContext {
                name: name.clone(),
                context: ContextConfig {
                    cluster: name.clone(),
                    user: name.clone(),
                },
            }],
            current_context: name,
        }
    }

    /// Serialize to the JSON document written on the instance
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| Error::serialization_for_kind("Kubeconfig", e.to_string()))
    }
}
