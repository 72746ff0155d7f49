//! Kubelet configuration document for Windows workers

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

use nodewright_common::{Error, Result, K_DIR, KUBELET_CA_FILE};

/// Offset of the cluster DNS service within the service network
pub const CLUSTER_DNS_OFFSET: u32 = 10;

/// Cluster domain served by cluster DNS
pub const CLUSTER_DOMAIN: &str = "cluster.local";

/// `KubeletConfiguration` (`kubelet.config.k8s.io/v1beta1`), limited to the
/// fields set for Windows workers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeletConfiguration {
    /// Always `KubeletConfiguration`
    pub kind: String,
    /// Always `kubelet.config.k8s.io/v1beta1`
    pub api_version: String,
    /// Rotate client certificates as they near expiry
    pub rotate_certificates: bool,
    /// Request serving certificates through the CSR API
    #[serde(rename = "serverTLSBootstrap")]
    pub server_tls_bootstrap: bool,
    /// Client authentication settings
    pub authentication: KubeletAuthentication,
    /// Request authorization settings
    pub authorization: KubeletAuthorization,
    /// Cluster DNS domain
    pub cluster_domain: String,
    /// Cluster DNS server addresses
    #[serde(rename = "clusterDNS")]
    pub cluster_dns: Vec<String>,
    /// Windows has no QoS cgroups
    #[serde(rename = "cgroupsPerQOS")]
    pub cgroups_per_qos: bool,
    /// Empty on Windows, allocatable is not enforced
    pub enforce_node_allocatable: Vec<String>,
    /// Runtime request timeout
    pub runtime_request_timeout: String,
    /// Maximum pods per node
    pub max_pods: u32,
    /// API QPS limit
    #[serde(rename = "kubeAPIQPS")]
    pub kube_api_qps: u32,
    /// API burst limit
    #[serde(rename = "kubeAPIBurst")]
    pub kube_api_burst: u32,
    /// Pull images in parallel
    pub serialize_image_pulls: bool,
    /// Rotate container logs at this size
    pub container_log_max_size: String,
    /// Resources reserved for the operating system
    pub system_reserved: BTreeMap<String, String>,
    /// Feature gate overrides
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub feature_gates: BTreeMap<String, bool>,
}

/// Kubelet authentication settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubeletAuthentication {
    /// X.509 client certificate authentication
    pub x509: KubeletX509Authentication,
    /// Anonymous requests
    pub anonymous: KubeletAnonymousAuthentication,
}

/// X.509 client authentication settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeletX509Authentication {
    /// Path of the client CA bundle on the instance
    #[serde(rename = "clientCAFile")]
    pub client_ca_file: String,
}

/// Anonymous authentication settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubeletAnonymousAuthentication {
    /// Whether anonymous requests are allowed
    pub enabled: bool,
}

/// Kubelet authorization settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubeletAuthorization {
    /// Authorization mode
    pub mode: String,
}

impl KubeletConfiguration {
    /// Windows defaults pointing at the given cluster DNS address
    pub fn windows(cluster_dns: impl Into<String>) -> Self {
        Self {
            kind: "KubeletConfiguration".to_string(),
            api_version: "kubelet.config.k8s.io/v1beta1".to_string(),
            rotate_certificates: true,
            server_tls_bootstrap: true,
            authentication: KubeletAuthentication {
                x509: KubeletX509Authentication {
                    client_ca_file: format!("{}\\{}", K_DIR, KUBELET_CA_FILE),
                },
                anonymous: KubeletAnonymousAuthentication { enabled: false },
            },
            authorization: KubeletAuthorization {
                mode: "Webhook".to_string(),
            },
            cluster_domain: CLUSTER_DOMAIN.to_string(),
            cluster_dns: vec![cluster_dns.into()],
            cgroups_per_qos: false,
            enforce_node_allocatable: Vec::new(),
            runtime_request_timeout: "10m0s".to_string(),
            max_pods: 250,
            kube_api_qps: 50,
            kube_api_burst: 100,
            serialize_image_pulls: false,
            container_log_max_size: "50Mi".to_string(),
            system_reserved: BTreeMap::from([
                ("cpu".to_string(), "500m".to_string()),
                ("ephemeral-storage".to_string(), "1Gi".to_string()),
                ("memory".to_string(), "1Gi".to_string()),
            ]),
            feature_gates: BTreeMap::new(),
        }
    }

    /// Serialize to the JSON document written on the instance
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| Error::serialization_for_kind("KubeletConfiguration", e.to_string()))
    }
}

/// Cluster DNS address for a service network: its tenth address.
///
/// `service_cidr` must be a network address with a prefix length, IPv4 or
/// IPv6. Errors name the CIDR.
pub fn cluster_dns(service_cidr: &str) -> Result<String> {
    let invalid = |msg: &str| Error::configuration(format!("service CIDR {}", service_cidr), msg);

    let (addr, prefix) = service_cidr
        .trim()
        .split_once('/')
        .ok_or_else(|| invalid("missing prefix length"))?;
    let addr: IpAddr = addr.parse().map_err(|_| invalid("invalid network address"))?;
    let prefix: u32 = prefix.parse().map_err(|_| invalid("invalid prefix length"))?;

    match addr {
        IpAddr::V4(v4) => {
            if prefix > 32 {
                return Err(invalid("invalid prefix length"));
            }
            let host_bits = 32 - prefix;
            let base = u32::from(v4);
            let host_mask = if host_bits == 32 { u32::MAX } else { (1u32 << host_bits) - 1 };
            if base & host_mask != 0 {
                return Err(invalid("address is not the network address"));
            }
            if host_mask <= CLUSTER_DNS_OFFSET {
                return Err(invalid("network too small for the cluster DNS address"));
            }
            Ok(Ipv4Addr::from(base + CLUSTER_DNS_OFFSET).to_string())
        }
        IpAddr::V6(v6) => {
            if prefix > 128 {
                return Err(invalid("invalid prefix length"));
            }
            let host_bits = 128 - prefix;
            let base = u128::from(v6);
            let host_mask = if host_bits == 128 { u128::MAX } else { (1u128 << host_bits) - 1 };
            if base & host_mask != 0 {
                return Err(invalid("address is not the network address"));
            }
            if host_mask <= u128::from(CLUSTER_DNS_OFFSET) {
                return Err(invalid("network too small for the cluster DNS address"));
            }
            Ok(Ipv6Addr::from(base + u128::from(CLUSTER_DNS_OFFSET)).to_string())
        }
    }
}
