//! Node lifecycle orchestration
//!
//! [`NodeConfig`] drives one instance through one of three flows:
//!
//! - [`NodeConfig::configure`]: turn a prepared instance into a ready node
//! - [`NodeConfig::deconfigure`]: drain a node and strip node services from its instance
//! - [`NodeConfig::safe_reboot`]: cordon, drain, reboot and return a node to service
//!
//! Each step runs under a [`StepPolicy`]. Required steps wrap their error with
//! the failing [`Phase`] and the node name (or instance address before the node
//! is known) and stop the run. Advisory steps log and continue. Every step is
//! recorded in the orchestrator's [`StepJournal`].
//!
//! Runs hold no state between invocations beyond the node object last
//! observed, so any flow can be re-run after a failure.

mod configure;
mod deconfigure;
mod reboot;

#[cfg(test)]
pub(crate) mod test_support;

use std::future::Future;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Node;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use nodewright_bootstrap::{BootConfig, ClusterCredentials, Kubeconfig};
use nodewright_common::retry::{
    cancellable, poll_until, retry_with_backoff, PollProfile, RetryConfig,
};
use nodewright_common::{Error, Phase, Result, UPGRADING_LABEL};

use crate::client::{node_has_address, node_is_unschedulable, ClusterClient, MetadataPatch};
use crate::config::OrchestratorConfig;
use crate::journal::{StepJournal, StepOutcome, StepPolicy};
use crate::transport::{Instance, InstanceTransport};

/// Attempts for a single node metadata write before giving up
const PATCH_ATTEMPTS: u32 = 3;

/// Orchestrator for one instance and the node backing it
pub struct NodeConfig {
    cluster: Arc<dyn ClusterClient>,
    transport: Arc<dyn InstanceTransport>,
    credentials: Arc<ClusterCredentials>,
    boot_config: Option<Arc<dyn BootConfig>>,
    config: OrchestratorConfig,
    instance: Instance,
    node: Option<Node>,
    cancel: CancellationToken,
    journal: StepJournal,
}

/// Builder for [`NodeConfig`]
pub struct NodeConfigBuilder {
    cluster: Arc<dyn ClusterClient>,
    transport: Arc<dyn InstanceTransport>,
    credentials: Arc<ClusterCredentials>,
    instance: Instance,
    boot_config: Option<Arc<dyn BootConfig>>,
    config: OrchestratorConfig,
    cancel: CancellationToken,
}

impl NodeConfigBuilder {
    /// Boot configuration the bootstrap artifacts are generated from.
    ///
    /// Only [`NodeConfig::configure`] needs one.
    pub fn boot_config(mut self, boot_config: Arc<dyn BootConfig>) -> Self {
        self.boot_config = Some(boot_config);
        self
    }

    /// Replace the default settings
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Token that aborts in-flight waits and remote calls when cancelled
    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Build the orchestrator.
    ///
    /// Fails if the transport is connected to a different address than the
    /// instance being orchestrated.
    pub fn build(self) -> Result<NodeConfig> {
        let connected = self.transport.address();
        if connected != self.instance.address {
            return Err(Error::configuration(
                &self.instance.address,
                format!("transport is connected to {}", connected),
            ));
        }

        Ok(NodeConfig {
            cluster: self.cluster,
            transport: self.transport,
            credentials: self.credentials,
            boot_config: self.boot_config,
            config: self.config,
            instance: self.instance,
            node: None,
            cancel: self.cancel,
            journal: StepJournal::new(),
        })
    }
}

impl NodeConfig {
    /// Start building an orchestrator for `instance`
    pub fn builder(
        cluster: Arc<dyn ClusterClient>,
        transport: Arc<dyn InstanceTransport>,
        credentials: Arc<ClusterCredentials>,
        instance: Instance,
    ) -> NodeConfigBuilder {
        NodeConfigBuilder {
            cluster,
            transport,
            credentials,
            instance,
            boot_config: None,
            config: OrchestratorConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Steps of the most recent run
    pub fn journal(&self) -> &StepJournal {
        &self.journal
    }

    /// Node object as last observed
    pub fn node(&self) -> Option<&Node> {
        self.node.as_ref()
    }

    /// Instance being orchestrated
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    fn node_name(&self) -> Option<String> {
        self.node
            .as_ref()
            .and_then(|n| n.metadata.name.clone())
            .or_else(|| self.instance.node_name.clone())
    }

    /// Node name, or the instance address while no node is known
    fn target(&self) -> String {
        self.node_name()
            .unwrap_or_else(|| self.instance.address.clone())
    }

    fn required<T>(&self, phase: Phase, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.journal
                    .record(phase, StepPolicy::Required, StepOutcome::Completed);
                Ok(value)
            }
            Err(e) => {
                self.journal.record(
                    phase,
                    StepPolicy::Required,
                    StepOutcome::Failed(e.to_string()),
                );
                Err(e.in_phase(phase, self.target()))
            }
        }
    }

    fn advisory(&self, phase: Phase, result: Result<()>) {
        match result {
            Ok(()) => {
                self.journal
                    .record(phase, StepPolicy::Advisory, StepOutcome::Completed)
            }
            Err(e) => {
                warn!(target_node = %self.target(), phase = %phase, error = %e, "advisory step failed, continuing");
                self.journal.record(
                    phase,
                    StepPolicy::Advisory,
                    StepOutcome::Ignored(e.to_string()),
                );
            }
        }
    }

    fn skipped(&self, phase: Phase, policy: StepPolicy) {
        debug!(target_node = %self.target(), phase = %phase, "step not needed");
        self.journal.record(phase, policy, StepOutcome::Skipped);
    }

    /// Run a remote call, abandoning it on cancellation
    async fn guard<T>(&self, context: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        cancellable(&self.cancel, context, fut).await
    }

    /// Write node metadata, retrying transient API failures
    async fn patch_node(&self, name: &str, patch: &MetadataPatch) -> Result<()> {
        let cluster = self.cluster.as_ref();
        let context = format!("patch node {}", name);
        self.guard(
            &context,
            retry_with_backoff(
                &RetryConfig::with_max_attempts(PATCH_ATTEMPTS),
                &context,
                |e: &Error| matches!(e, Error::Kube { .. }) && e.is_retryable(),
                || cluster.patch_node_metadata(name, patch),
            ),
        )
        .await
    }

    async fn cordon(&self, name: &str) -> Result<()> {
        self.guard(
            &format!("cordon {}", name),
            self.cluster.set_unschedulable(name, true),
        )
        .await
    }

    /// Find the one node reporting the instance's address
    async fn discover_node(&self, profile: PollProfile) -> Result<Node> {
        let cluster = self.cluster.as_ref();
        let address = self.instance.address.as_str();
        let selector = self.config.node_selector.as_str();
        let context = format!("node with address {}", address);

        poll_until(profile, &self.cancel, &context, || async move {
            let mut matches: Vec<Node> = cluster
                .list_nodes(selector)
                .await?
                .into_iter()
                .filter(|n| node_has_address(n, address))
                .collect();
            match matches.len() {
                0 => Ok(None),
                1 => Ok(matches.pop()),
                n => Err(Error::internal_with_context(
                    address,
                    format!("{} nodes report this address", n),
                )),
            }
        })
        .await
    }

    /// Load the node named by the instance, or discover it by address.
    ///
    /// Used by flows that operate on an existing node.
    async fn require_node(&mut self) -> Result<String> {
        let node = match self.instance.node_name.clone() {
            Some(name) => self
                .guard(&format!("get node {}", name), self.cluster.get_node(&name))
                .await?
                .ok_or_else(|| Error::configuration(&name, "node not found"))?,
            None => self.discover_node(self.config.quick).await?,
        };
        let name = node
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::internal_with_context(&self.instance.address, "node has no name"))?;
        self.node = Some(node);
        Ok(name)
    }

    /// Kubeconfig for the configuration daemon, backed by a freshly minted token
    async fn daemon_kubeconfig(&self) -> Result<Zeroizing<Vec<u8>>> {
        let lifetime = self.config.token_lifetime;
        let expiration_secs = i64::try_from(lifetime.as_secs()).map_err(|_| {
            Error::configuration(
                "daemon token lifetime",
                format!("{:?} is out of range for a token request", lifetime),
            )
        })?;
        let token = Zeroizing::new(
            self.guard(
                "service account token",
                self.cluster.request_service_account_token(
                    &self.config.daemon_namespace,
                    &self.config.daemon_service_account,
                    expiration_secs,
                ),
            )
            .await?,
        );
        let kubeconfig = Kubeconfig::bearer(
            self.credentials.api_endpoint(),
            self.credentials.ca_bundle(),
            &token,
        );
        Ok(Zeroizing::new(kubeconfig.to_json()?))
    }

    /// Make the node schedulable, clear upgrade markers and read it back
    async fn uncordon(&self, name: &str) -> Result<Node> {
        let node = self
            .guard(&format!("get node {}", name), self.cluster.get_node(name))
            .await?
            .ok_or_else(|| Error::internal_with_context(name, "node not found"))?;

        self.guard(
            &format!("uncordon {}", name),
            self.cluster.set_unschedulable(name, false),
        )
        .await?;

        let upgrading = node
            .metadata
            .labels
            .as_ref()
            .is_some_and(|l| l.contains_key(UPGRADING_LABEL));
        if upgrading {
            let cleared = self
                .patch_node(name, &MetadataPatch::new().remove_label(UPGRADING_LABEL))
                .await;
            self.advisory(Phase::Uncordon, cleared);
        }

        let cluster = self.cluster.as_ref();
        poll_until(
            self.config.quick,
            &self.cancel,
            &format!("{} schedulable", name),
            || async move {
                Ok(cluster
                    .get_node(name)
                    .await?
                    .filter(|n| !node_is_unschedulable(n)))
            },
        )
        .await
    }
}
