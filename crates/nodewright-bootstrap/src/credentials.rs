//! Cluster endpoint and CA shared by every orchestrator in the process.
//!
//! Loaded once at startup. A failed load is returned to the caller, so no
//! orchestrator can be constructed against half-initialized state.

use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client};
use tracing::info;

use nodewright_common::{Error, Result};

/// ConfigMap published in every namespace with the API server CA
pub const ROOT_CA_CONFIGMAP: &str = "kube-root-ca.crt";

/// Key of the CA bundle in [`ROOT_CA_CONFIGMAP`]
pub const ROOT_CA_KEY: &str = "ca.crt";

/// API endpoint and CA bundle written into instance kubeconfigs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterCredentials {
    api_endpoint: String,
    ca_bundle: Vec<u8>,
}

impl ClusterCredentials {
    /// Validate and wrap an endpoint and CA bundle.
    ///
    /// The endpoint must be an `https://` URL and the bundle must hold at
    /// least one certificate.
    pub fn from_parts(api_endpoint: impl Into<String>, ca_bundle: Vec<u8>) -> Result<Self> {
        let api_endpoint = api_endpoint.into();
        let trimmed = api_endpoint.trim().trim_end_matches('/');
        if !trimmed.starts_with("https://") || trimmed.len() == "https://".len() {
            return Err(Error::configuration(
                format!("api endpoint {}", api_endpoint),
                "must be an https:// URL",
            ));
        }

        if nodewright_pki::decode_pem_blocks(&ca_bundle).is_empty() {
            return Err(Error::configuration(ROOT_CA_CONFIGMAP, "CA bundle holds no certificates"));
        }

        Ok(Self {
            api_endpoint: trimmed.to_string(),
            ca_bundle,
        })
    }

    /// Load the CA from the cluster and pair it with the external API endpoint
    pub async fn load(client: &Client, namespace: &str, api_endpoint: &str) -> Result<Self> {
        let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
        let cm = api.get(ROOT_CA_CONFIGMAP).await?;
        let ca = cm
            .data
            .and_then(|mut d| d.remove(ROOT_CA_KEY))
            .filter(|ca| !ca.trim().is_empty())
            .ok_or_else(|| {
                Error::configuration(
                    format!("{}/{}", namespace, ROOT_CA_CONFIGMAP),
                    format!("missing {} key", ROOT_CA_KEY),
                )
            })?;

        let credentials = Self::from_parts(api_endpoint, ca.into_bytes())?;
        info!(endpoint = %credentials.api_endpoint, "loaded cluster credentials");
        Ok(credentials)
    }

    /// External API server URL
    pub fn api_endpoint(&self) -> &str {
        &self.api_endpoint
    }

    /// PEM bundle the instance uses to verify the API server
    pub fn ca_bundle(&self) -> &[u8] {
        &self.ca_bundle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair};

    fn ca_pem() -> Vec<u8> {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "kube-apiserver-lb-signer");
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let key = KeyPair::generate().expect("key generation should succeed");
        params
            .self_signed(&key)
            .expect("self-signing should succeed")
            .pem()
            .into_bytes()
    }

    #[test]
    fn test_from_parts_accepts_https_endpoint() {
        let creds = ClusterCredentials::from_parts("https://api.example.com:6443/", ca_pem())
            .expect("valid credentials");
        assert_eq!(creds.api_endpoint(), "https://api.example.com:6443");
        assert!(!creds.ca_bundle().is_empty());
    }

    #[test]
    fn test_from_parts_rejects_plain_http() {
        let err = ClusterCredentials::from_parts("http://api:6443", ca_pem())
            .expect_err("http is rejected");
        assert!(err.to_string().contains("http://api:6443"));
        assert!(ClusterCredentials::from_parts("https://", ca_pem()).is_err());
    }

    #[test]
    fn test_from_parts_rejects_empty_ca() {
        assert!(ClusterCredentials::from_parts("https://api", Vec::new()).is_err());
        assert!(ClusterCredentials::from_parts("https://api", b"not pem".to_vec()).is_err());
    }
}
