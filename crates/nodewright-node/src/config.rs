//! Orchestrator configuration

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use nodewright_common::retry::PollProfile;
use nodewright_common::{
    DEFAULT_DAEMON_NAMESPACE, DEFAULT_DAEMON_SERVICE_ACCOUNT, WINDOWS_NODE_SELECTOR,
};

/// Namespaced reference to a cluster object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectRef {
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
}

impl ObjectRef {
    /// Create a reference
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Cluster objects read while generating bootstrap artifacts
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterObjectRefs {
    /// Secret whose `token` key authenticates the kubelet's first connection
    pub bootstrap_token: ObjectRef,
    /// Secret holding `tls.crt` and `tls.key` for services on the instance
    pub tls: ObjectRef,
    /// ConfigMap publishing the rotated kubelet client CA as `ca-bundle.crt`
    pub kubelet_client_ca: ObjectRef,
    /// ConfigMap with one CA per image registry
    pub image_registry_ca: ObjectRef,
    /// ConfigMap with the proxy's `ca-bundle.crt`; set only when a proxy is enabled
    pub proxy_trusted_ca: Option<ObjectRef>,
}

impl Default for ClusterObjectRefs {
    fn default() -> Self {
        Self {
            bootstrap_token: ObjectRef::new(
                "openshift-machine-config-operator",
                "node-bootstrapper-token",
            ),
            tls: ObjectRef::new(DEFAULT_DAEMON_NAMESPACE, "windows-machine-config-operator-tls"),
            kubelet_client_ca: ObjectRef::new(
                "openshift-kube-apiserver-operator",
                "kube-apiserver-to-kubelet-client-ca",
            ),
            image_registry_ca: ObjectRef::new(
                "openshift-image-registry",
                "image-registry-certificates",
            ),
            proxy_trusted_ca: None,
        }
    }
}

/// Settings shared by every orchestrator run
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Namespace of the configuration daemon service account
    pub daemon_namespace: String,
    /// Configuration daemon service account
    pub daemon_service_account: String,
    /// Version announced to the configuration daemon
    pub version: String,
    /// Label selector for nodes eligible for discovery
    pub node_selector: String,
    /// Cluster service network
    pub service_cidr: String,
    /// Labels applied to the node with its identity
    pub extra_labels: BTreeMap<String, String>,
    /// Annotations applied to the node with its identity
    pub extra_annotations: BTreeMap<String, String>,
    /// Reconfiguration paths and readbacks
    pub quick: PollProfile,
    /// Discovery, convergence and drain waits
    pub standard: PollProfile,
    /// Lifetime of tokens minted for the configuration daemon
    pub token_lifetime: Duration,
    /// Cluster objects bootstrap artifacts are generated from
    pub cluster_objects: ClusterObjectRefs,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            daemon_namespace: DEFAULT_DAEMON_NAMESPACE.to_string(),
            daemon_service_account: DEFAULT_DAEMON_SERVICE_ACCOUNT.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            node_selector: WINDOWS_NODE_SELECTOR.to_string(),
            service_cidr: "172.30.0.0/16".to_string(),
            extra_labels: BTreeMap::new(),
            extra_annotations: BTreeMap::new(),
            quick: PollProfile::quick(),
            standard: PollProfile::standard(),
            token_lifetime: Duration::from_secs(3600),
            cluster_objects: ClusterObjectRefs::default(),
        }
    }
}
