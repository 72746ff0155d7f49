//! Common types for nodewright: errors, wire constants, polling and telemetry

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod retry;
pub mod telemetry;

pub use error::{Error, Phase};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Node annotation and label keys
// =============================================================================
// These keys are a wire contract with the on-instance configuration daemon.
// Changing any value breaks nodes configured by earlier releases.

/// Hash of the SSH public key used to configure the instance behind a node
pub const PUB_KEY_HASH_ANNOTATION: &str = "windowsmachineconfig.openshift.io/pub-key-hash";

/// Version the orchestrator wants the configuration daemon to converge to
pub const DESIRED_VERSION_ANNOTATION: &str = "windowsmachineconfig.openshift.io/desired-version";

/// Version the configuration daemon reports once services and networking converged
pub const VERSION_ANNOTATION: &str = "windowsmachineconfig.openshift.io/version";

/// Set by the configuration daemon while the instance needs (or is performing) a reboot
pub const REBOOT_ANNOTATION: &str = "windowsmachineconfig.openshift.io/reboot-required";

/// Label marking a node that is being upgraded
pub const UPGRADING_LABEL: &str = "windowsmachineconfig.openshift.io/upgrading";

/// Label key identifying the operating system of a node
pub const OS_LABEL: &str = "kubernetes.io/os";

/// Label selector for nodes the orchestrator is allowed to manage
pub const WINDOWS_NODE_SELECTOR: &str = "kubernetes.io/os=windows";

// =============================================================================
// Cluster object defaults
// =============================================================================

/// Namespace the configuration daemon service account lives in
pub const DEFAULT_DAEMON_NAMESPACE: &str = "openshift-windows-machine-config-operator";

/// Service account the configuration daemon authenticates as
pub const DEFAULT_DAEMON_SERVICE_ACCOUNT: &str = "windows-instance-config-daemon";

/// Subject substring identifying the kubelet client signer during CA rotation
pub const KUBELET_SIGNER_SUBJECT: &str = "kube-apiserver-to-kubelet-signer";

/// ConfigMap data key holding a PEM trust bundle
pub const CA_BUNDLE_KEY: &str = "ca-bundle.crt";

/// Field manager name used for patches issued by the orchestrator
pub const FIELD_MANAGER: &str = "nodewright";

// =============================================================================
// Instance filesystem layout
// =============================================================================

/// Root directory for node artifacts on the instance
pub const K_DIR: &str = "C:\\k";

/// Directory holding the TLS key pair on the instance
pub const TLS_DIR: &str = "C:\\k\\tls";

/// Directory holding one `hosts.toml` per mirrored source registry
pub const REGISTRIES_DIR: &str = "C:\\k\\containerd\\registries";

/// Kubelet configuration document file name
pub const KUBELET_CONFIG_FILE: &str = "kubelet.conf";

/// Extracted kubelet service arguments file name
pub const KUBELET_ARGS_FILE: &str = "kubelet-args.json";

/// Bootstrap kubeconfig file name
pub const BOOTSTRAP_KUBECONFIG_FILE: &str = "bootstrap-kubeconfig";

/// Merged kubelet trust bundle file name
pub const KUBELET_CA_FILE: &str = "kubelet-ca.crt";

/// Image registry and proxy trust bundle file name
pub const TRUSTED_CA_FILE: &str = "ca-bundle.crt";

/// TLS certificate file name
pub const TLS_CERT_FILE: &str = "tls.crt";

/// TLS private key file name
pub const TLS_KEY_FILE: &str = "tls.key";

/// Mirror configuration file name within each registry directory
pub const HOSTS_TOML_FILE: &str = "hosts.toml";
