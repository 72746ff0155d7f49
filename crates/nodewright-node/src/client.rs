//! Cluster object store access
//!
//! Provides a trait-based abstraction over the cluster API so orchestrator
//! tests can mock it while production code uses kube-rs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::authentication::v1::{TokenRequest, TokenRequestSpec};
use k8s_openapi::api::core::v1::{ConfigMap, Node, Pod, Secret, ServiceAccount};
use kube::api::{Api, DeleteParams, EvictParams, ListParams, Patch, PatchParams};
use kube::Client;
use tracing::{debug, info};

#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
#[cfg(test)]
use mockall::automock;

use nodewright_common::crd::{ImageDigestMirrorSet, ImageTagMirrorSet};
use nodewright_common::error::is_not_found;
use nodewright_common::{Error, FIELD_MANAGER};

/// Label and annotation changes for a node.
///
/// A `None` value removes the key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetadataPatch {
    /// Label changes
    pub labels: BTreeMap<String, Option<String>>,
    /// Annotation changes
    pub annotations: BTreeMap<String, Option<String>>,
}

impl MetadataPatch {
    /// Empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an annotation
    pub fn annotate(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), Some(value.into()));
        self
    }

    /// Remove an annotation
    pub fn remove_annotation(mut self, key: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), None);
        self
    }

    /// Set a label
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), Some(value.into()));
        self
    }

    /// Remove a label
    pub fn remove_label(mut self, key: impl Into<String>) -> Self {
        self.labels.insert(key.into(), None);
        self
    }

    /// Whether the patch changes nothing
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.annotations.is_empty()
    }

    /// JSON merge patch body; removals are `null`
    pub fn to_merge_patch(&self) -> serde_json::Value {
        let mut metadata = serde_json::Map::new();
        if !self.labels.is_empty() {
            metadata.insert("labels".to_string(), serde_json::json!(self.labels));
        }
        if !self.annotations.is_empty() {
            metadata.insert("annotations".to_string(), serde_json::json!(self.annotations));
        }
        serde_json::json!({ "metadata": metadata })
    }

    /// Apply the patch to object metadata in place, as the API server would
    #[cfg(test)]
    pub(crate) fn apply_to(&self, meta: &mut ObjectMeta) {
        apply_changes(meta.labels.get_or_insert_with(BTreeMap::new), &self.labels);
        apply_changes(meta.annotations.get_or_insert_with(BTreeMap::new), &self.annotations);
    }
}

#[cfg(test)]
fn apply_changes(target: &mut BTreeMap<String, String>, changes: &BTreeMap<String, Option<String>>) {
    for (key, value) in changes {
        match value {
            Some(v) => {
                target.insert(key.clone(), v.clone());
            }
            None => {
                target.remove(key);
            }
        }
    }
}

/// Trait abstracting cluster API operations used by the node lifecycle
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Get a node by name, `None` if it doesn't exist
    async fn get_node(&self, name: &str) -> Result<Option<Node>, Error>;

    /// List nodes matching a label selector
    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<Node>, Error>;

    /// Apply label and annotation changes to a node
    async fn patch_node_metadata(&self, name: &str, patch: &MetadataPatch) -> Result<(), Error>;

    /// Mark a node (un)schedulable
    async fn set_unschedulable(&self, name: &str, unschedulable: bool) -> Result<(), Error>;

    /// List pods bound to a node
    async fn list_pods_on_node(&self, node: &str) -> Result<Vec<Pod>, Error>;

    /// Evict a pod through the Eviction API; a pod that is already gone is not an error
    async fn evict_pod(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Delete a pod; a pod that is already gone is not an error
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Decoded data of a Secret, `None` if it doesn't exist
    async fn get_secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>, Error>;

    /// Data of a ConfigMap, `None` if it doesn't exist
    async fn get_configmap_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, Error>;

    /// All digest mirror declarations, empty if the resource type isn't served
    async fn list_digest_mirror_sets(&self) -> Result<Vec<ImageDigestMirrorSet>, Error>;

    /// All tag mirror declarations, empty if the resource type isn't served
    async fn list_tag_mirror_sets(&self) -> Result<Vec<ImageTagMirrorSet>, Error>;

    /// Mint a short-lived token for a service account via the TokenRequest API
    async fn request_service_account_token(
        &self,
        namespace: &str,
        service_account: &str,
        expiration_secs: i64,
    ) -> Result<String, Error>;
}

/// Real cluster client implementation
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Create a new cluster client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_node(&self, name: &str) -> Result<Option<Node>, Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        match api.get(name).await {
            Ok(node) => Ok(Some(node)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<Node>, Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api.list(&ListParams::default().labels(label_selector)).await?;
        Ok(nodes.items)
    }

    async fn patch_node_metadata(&self, name: &str, patch: &MetadataPatch) -> Result<(), Error> {
        if patch.is_empty() {
            return Ok(());
        }
        let api: Api<Node> = Api::all(self.client.clone());
        api.patch(
            name,
            &PatchParams {
                field_manager: Some(FIELD_MANAGER.to_string()),
                ..Default::default()
            },
            &Patch::Merge(&patch.to_merge_patch()),
        )
        .await?;
        debug!(node = %name, "patched node metadata");
        Ok(())
    }

    async fn set_unschedulable(&self, name: &str, unschedulable: bool) -> Result<(), Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        if unschedulable {
            api.cordon(name).await?;
        } else {
            api.uncordon(name).await?;
        }
        Ok(())
    }

    async fn list_pods_on_node(&self, node: &str) -> Result<Vec<Pod>, Error> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let pods = api
            .list(&ListParams::default().fields(&format!("spec.nodeName={}", node)))
            .await?;
        Ok(pods.items)
    }

    async fn evict_pod(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api.evict(name, &EvictParams::default()).await {
            Ok(_) => {
                info!(pod = %name, namespace = %namespace, "evicted pod");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(secret) => Ok(Some(
                secret
                    .data
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(k, v)| (k, v.0))
                    .collect(),
            )),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_configmap_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(cm) => Ok(Some(cm.data.unwrap_or_default())),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_digest_mirror_sets(&self) -> Result<Vec<ImageDigestMirrorSet>, Error> {
        let api: Api<ImageDigestMirrorSet> = Api::all(self.client.clone());
        match api.list(&ListParams::default()).await {
            Ok(list) => Ok(list.items),
            Err(e) if is_not_found(&e) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_tag_mirror_sets(&self) -> Result<Vec<ImageTagMirrorSet>, Error> {
        let api: Api<ImageTagMirrorSet> = Api::all(self.client.clone());
        match api.list(&ListParams::default()).await {
            Ok(list) => Ok(list.items),
            Err(e) if is_not_found(&e) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn request_service_account_token(
        &self,
        namespace: &str,
        service_account: &str,
        expiration_secs: i64,
    ) -> Result<String, Error> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);

        let token_request = TokenRequest {
            metadata: Default::default(),
            spec: TokenRequestSpec {
                audiences: vec![],
                expiration_seconds: Some(expiration_secs),
                bound_object_ref: None,
            },
            status: None,
        };

        let result = api
            .create_token_request(service_account, &Default::default(), &token_request)
            .await?;

        let token = result
            .status
            .ok_or_else(|| {
                Error::internal_with_context(
                    format!("{}/{}", namespace, service_account),
                    "token response missing status",
                )
            })?
            .token;

        if token.is_empty() {
            return Err(Error::internal_with_context(
                format!("{}/{}", namespace, service_account),
                "server returned empty token",
            ));
        }
        Ok(token)
    }
}

/// Exact match of `address` against a node's reported addresses
pub fn node_has_address(node: &Node, address: &str) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.addresses.as_ref())
        .is_some_and(|addrs| addrs.iter().any(|a| a.address == address))
}

/// Annotation value on a node
pub fn node_annotation<'a>(node: &'a Node, key: &str) -> Option<&'a str> {
    node.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
}

/// Whether a node is marked unschedulable
pub fn node_is_unschedulable(node: &Node) -> bool {
    node.spec
        .as_ref()
        .and_then(|s| s.unschedulable)
        .unwrap_or(false)
}
