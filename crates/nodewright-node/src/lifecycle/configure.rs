//! Configure: turn a prepared instance into a ready node

use std::collections::BTreeMap;

use tracing::{info, instrument, warn};
use zeroize::Zeroizing;

use nodewright_bootstrap::{trusted_ca_bundle, ArtifactBatch, BootConfig, BootstrapInputs, TlsPair};
use nodewright_common::{
    Error, Phase, Result, CA_BUNDLE_KEY, DESIRED_VERSION_ANNOTATION, PUB_KEY_HASH_ANNOTATION,
    TLS_CERT_FILE, TLS_KEY_FILE, VERSION_ANNOTATION,
};
use nodewright_registries::build_mirror_sets;

use super::NodeConfig;
use crate::client::MetadataPatch;
use crate::config::ObjectRef;
use crate::journal::StepPolicy;
use crate::watch::{AnnotationCondition, AnnotationWatch};

/// Secret key holding the kubelet bootstrap token
const BOOTSTRAP_TOKEN_KEY: &str = "token";

impl NodeConfig {
    /// Configure the instance as a node at the configured version.
    ///
    /// Steps, in order:
    /// 1. Cordon the node if the instance already backs one (advisory)
    /// 2. Generate bootstrap artifacts and push them to the instance
    /// 3. Bootstrap node services with a daemon kubeconfig
    /// 4. Discover the node by the instance's address
    /// 5. Cordon (advisory)
    /// 6. Annotate the node with the credential hash and extra metadata
    /// 7. Point the configuration daemon at the cluster
    /// 8. Announce the desired version and wait for the daemon to report it
    /// 9. Uncordon
    ///
    /// Once bootstrap succeeded, any later failure runs the daemon's cleanup on
    /// the instance once before the error is returned, unless the run was
    /// cancelled.
    #[instrument(skip(self), fields(instance = %self.instance.address, version = %self.config.version))]
    pub async fn configure(&mut self) -> Result<()> {
        self.journal.clear();

        let Some(boot_config) = self.boot_config.clone() else {
            let missing = Err(Error::configuration(
                &self.instance.address,
                "a boot configuration is required to configure an instance",
            ));
            return self.required(Phase::WriteBootstrapArtifacts, missing);
        };

        self.load_existing_node().await;
        match self.node_name() {
            Some(name) if self.node.is_some() => {
                let cordoned = self.cordon(&name).await;
                self.advisory(Phase::Cordon, cordoned);
            }
            _ => self.skipped(Phase::Cordon, StepPolicy::Advisory),
        }

        let written = self.write_bootstrap_artifacts(boot_config.as_ref()).await;
        self.required(Phase::WriteBootstrapArtifacts, written)?;

        let bootstrapped = self.bootstrap().await;
        let kubeconfig = self.required(Phase::Bootstrap, bootstrapped)?;

        let result = self.configure_node(&kubeconfig).await;
        if let Err(e) = &result {
            if e.is_cancelled() {
                warn!(target_node = %self.target(), "configuration cancelled, skipping cleanup");
            } else {
                let cleaned = self
                    .guard(
                        "cleanup",
                        self.transport
                            .run_cleanup(&self.config.daemon_namespace, &kubeconfig),
                    )
                    .await;
                self.advisory(Phase::Cleanup, cleaned);
            }
        }
        result
    }

    /// Pick up the node the instance names, if it exists.
    ///
    /// A failed read only means the node is discovered later by address.
    async fn load_existing_node(&mut self) {
        let Some(name) = self.instance.node_name.clone() else {
            return;
        };
        match self
            .guard(&format!("get node {}", name), self.cluster.get_node(&name))
            .await
        {
            Ok(node) => self.node = node,
            Err(e) => warn!(node = %name, error = %e, "failed to read node, will discover it"),
        }
    }

    async fn write_bootstrap_artifacts(&self, boot_config: &dyn BootConfig) -> Result<()> {
        let refs = &self.config.cluster_objects;

        let token_secret = self.required_secret(&refs.bootstrap_token).await?;
        let token = secret_value(&token_secret, BOOTSTRAP_TOKEN_KEY, &refs.bootstrap_token)?;
        let token = Zeroizing::new(String::from_utf8(token).map_err(|_| {
            Error::configuration(refs.bootstrap_token.to_string(), "token is not valid UTF-8")
        })?);

        let tls_secret = self.required_secret(&refs.tls).await?;
        let tls = TlsPair {
            cert: secret_value(&tls_secret, TLS_CERT_FILE, &refs.tls)?,
            key: Zeroizing::new(secret_value(&tls_secret, TLS_KEY_FILE, &refs.tls)?),
        };

        // Published without a bundle: the merge rejects the empty value
        let kubelet_client_ca = self
            .configmap(&refs.kubelet_client_ca)
            .await?
            .map(|data| data.get(CA_BUNDLE_KEY).cloned().unwrap_or_default());

        let registry_cas = self
            .configmap(&refs.image_registry_ca)
            .await?
            .unwrap_or_default();
        let proxy_ca = match &refs.proxy_trusted_ca {
            Some(proxy) => self
                .configmap(proxy)
                .await?
                .and_then(|data| data.get(CA_BUNDLE_KEY).cloned()),
            None => None,
        };
        let trusted = trusted_ca_bundle(&registry_cas, proxy_ca.as_deref());

        let digest_sets = self
            .guard("list digest mirror sets", self.cluster.list_digest_mirror_sets())
            .await?;
        let tag_sets = self
            .guard("list tag mirror sets", self.cluster.list_tag_mirror_sets())
            .await?;
        let digest: Vec<_> = digest_sets
            .into_iter()
            .flat_map(|s| s.spec.image_digest_mirrors)
            .collect();
        let tag: Vec<_> = tag_sets
            .into_iter()
            .flat_map(|s| s.spec.image_tag_mirrors)
            .collect();
        let mirror_sets = build_mirror_sets(&digest, &tag);

        let batch = ArtifactBatch::build(&BootstrapInputs {
            boot_config,
            credentials: &self.credentials,
            bootstrap_token: &token,
            service_cidr: &self.config.service_cidr,
            kubelet_client_ca: kubelet_client_ca.as_deref().map(str::as_bytes),
            trusted_ca_bundle: &trusted,
            tls: &tls,
            mirror_sets: &mirror_sets,
        })?;

        for file in &batch.files {
            self.guard(
                &file.path(),
                self.transport
                    .ensure_file_content(&file.contents, &file.name, &file.dir),
            )
            .await?;
        }
        for dir in &batch.dirs {
            self.guard(&dir.dir, self.transport.replace_dir(&dir.files, &dir.dir))
                .await?;
        }

        info!(
            instance = %self.instance.address,
            files = batch.files.len(),
            mirror_sets = mirror_sets.len(),
            "bootstrap artifacts written"
        );
        Ok(())
    }

    async fn required_secret(
        &self,
        secret: &ObjectRef,
    ) -> Result<BTreeMap<String, Vec<u8>>> {
        self.guard(
            &secret.to_string(),
            self.cluster.get_secret_data(&secret.namespace, &secret.name),
        )
        .await?
        .ok_or_else(|| Error::configuration(secret.to_string(), "secret not found"))
    }

    async fn configmap(
        &self,
        configmap: &ObjectRef,
    ) -> Result<Option<BTreeMap<String, String>>> {
        self.guard(
            &configmap.to_string(),
            self.cluster
                .get_configmap_data(&configmap.namespace, &configmap.name),
        )
        .await
    }

    async fn bootstrap(&self) -> Result<Zeroizing<Vec<u8>>> {
        let kubeconfig = self.daemon_kubeconfig().await?;
        self.guard(
            "bootstrap",
            self.transport.bootstrap(
                &self.config.version,
                &self.config.daemon_namespace,
                &kubeconfig,
            ),
        )
        .await?;
        Ok(kubeconfig)
    }

    /// Steps after bootstrap; any error here triggers cleanup
    async fn configure_node(&mut self, kubeconfig: &[u8]) -> Result<()> {
        let name = match self.node.as_ref().and_then(|n| n.metadata.name.clone()) {
            Some(name) => {
                self.skipped(Phase::DiscoverNode, StepPolicy::Required);
                name
            }
            None => {
                let address = self.instance.address.clone();
                let discovered = self.discover_node(self.config.standard).await.and_then(|node| {
                    let name = node.metadata.name.clone().ok_or_else(|| {
                        Error::internal_with_context(&address, "node has no name")
                    })?;
                    Ok((node, name))
                });
                let (node, name) = self.required(Phase::DiscoverNode, discovered)?;
                info!(instance = %self.instance.address, node = %name, "node discovered");
                self.node = Some(node);
                name
            }
        };

        let cordoned = self.cordon(&name).await;
        self.advisory(Phase::Cordon, cordoned);

        let identity = self.patch_node(&name, &self.identity_patch()).await;
        self.required(Phase::ApplyIdentity, identity)?;

        let sidecar = self
            .guard(
                "configure sidecar",
                self.transport
                    .configure_sidecar(&self.config.daemon_namespace, kubeconfig),
            )
            .await;
        self.required(Phase::ConfigureSidecar, sidecar)?;

        let converged = self.announce_desired_version(&name).await;
        self.required(Phase::AnnounceDesiredVersion, converged)?;

        let uncordoned = self.uncordon(&name).await;
        let node = self.required(Phase::Uncordon, uncordoned)?;
        self.node = Some(node);

        info!(node = %name, version = %self.config.version, "instance configured");
        Ok(())
    }

    fn identity_patch(&self) -> MetadataPatch {
        let mut patch = MetadataPatch::new().annotate(
            PUB_KEY_HASH_ANNOTATION,
            self.instance.credential.public_key_hash(),
        );
        for (k, v) in &self.config.extra_annotations {
            patch = patch.annotate(k, v);
        }
        for (k, v) in &self.config.extra_labels {
            patch = patch.label(k, v);
        }
        patch
    }

    async fn announce_desired_version(&self, name: &str) -> Result<()> {
        let version = &self.config.version;
        self.patch_node(
            name,
            &MetadataPatch::new().annotate(DESIRED_VERSION_ANNOTATION, version),
        )
        .await?;

        AnnotationWatch::new(
            name,
            VERSION_ANNOTATION,
            AnnotationCondition::Equals(version.clone()),
        )
        .with_profile(self.config.standard)
        .wait(self.cluster.as_ref(), &self.cancel)
        .await?;
        Ok(())
    }
}

fn secret_value(
    data: &BTreeMap<String, Vec<u8>>,
    key: &str,
    secret: &ObjectRef,
) -> Result<Vec<u8>> {
    data.get(key)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| Error::configuration(secret.to_string(), format!("missing key {}", key)))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::config::OrchestratorConfig;
    use crate::journal::{StepOutcome, StepPolicy};
    use nodewright_common::{
        Error, Phase, DESIRED_VERSION_ANNOTATION, PUB_KEY_HASH_ANNOTATION, VERSION_ANNOTATION,
    };
    use std::sync::Arc;
    use std::time::Duration;

    /// Story: a fresh instance registers, converges and becomes schedulable
    #[tokio::test]
    async fn story_fresh_instance_becomes_ready_node() {
        let harness = Harness::new();
        harness.world().register_on_bootstrap = true;
        harness.world().daemon_delay = 2;

        let mut orchestrator = harness.orchestrator(instance());
        orchestrator.configure().await.expect("configure should succeed");

        let log = harness.log();
        assert!(log.before("write:kubelet.conf", "bootstrap"));
        assert!(log.before("bootstrap", "list_nodes"));
        assert!(log.before("list_nodes", &format!("annotate:{}", PUB_KEY_HASH_ANNOTATION)));
        assert!(log.before("configure_sidecar", &format!("annotate:{}", DESIRED_VERSION_ANNOTATION)));
        assert!(log.before("converged", "uncordon"));
        assert_eq!(log.count("run_cleanup"), 0);

        let node = harness.node(NODE).expect("node should exist");
        assert!(!harness.unschedulable(NODE));
        let annotations = node.metadata.annotations.expect("annotations");
        assert_eq!(annotations[PUB_KEY_HASH_ANNOTATION], instance().credential.public_key_hash());
        assert_eq!(annotations[DESIRED_VERSION_ANNOTATION], VERSION);
        assert_eq!(annotations[VERSION_ANNOTATION], VERSION);
        assert_eq!(orchestrator.node().and_then(|n| n.metadata.name.as_deref()), Some(NODE));

        assert_eq!(
            orchestrator.journal().phases(),
            vec![
                Phase::Cordon,
                Phase::WriteBootstrapArtifacts,
                Phase::Bootstrap,
                Phase::DiscoverNode,
                Phase::Cordon,
                Phase::ApplyIdentity,
                Phase::ConfigureSidecar,
                Phase::AnnounceDesiredVersion,
                Phase::Uncordon,
            ]
        );
    }

    #[tokio::test]
    async fn test_all_artifacts_and_registries_pushed() {
        let harness = Harness::new();
        harness.world().register_on_bootstrap = true;

        let mut orchestrator = harness.orchestrator(instance());
        orchestrator.configure().await.expect("configure should succeed");

        let log = harness.log();
        for file in [
            "kubelet-args.json",
            "kubelet.conf",
            "bootstrap-kubeconfig",
            "kubelet-ca.crt",
            "ca-bundle.crt",
            "tls.crt",
            "tls.key",
        ] {
            assert_eq!(log.count(&format!("write:{}", file)), 1, "{} written once", file);
        }
        assert_eq!(log.count("replace_dir"), 1);
        assert!(log.before("replace_dir", "bootstrap"));
    }

    #[tokio::test]
    async fn test_failure_after_bootstrap_runs_cleanup_once() {
        let harness = Harness::new();
        harness.world().register_on_bootstrap = true;
        harness.world().fail.insert("configure_sidecar");

        let mut orchestrator = harness.orchestrator(instance());
        let err = orchestrator.configure().await.expect_err("sidecar failure");

        assert_eq!(err.phase(), Some(Phase::ConfigureSidecar));
        assert!(err.to_string().contains(NODE));
        assert_eq!(harness.log().count("run_cleanup"), 1);
        assert_eq!(
            orchestrator.journal().last(Phase::Cleanup).map(|r| r.policy),
            Some(StepPolicy::Advisory)
        );
    }

    #[tokio::test]
    async fn test_discovery_timeout_names_address_and_cleans_up() {
        let harness = Harness::new();

        let mut orchestrator = harness.orchestrator(instance());
        let err = orchestrator.configure().await.expect_err("node never registers");

        assert_eq!(err.phase(), Some(Phase::DiscoverNode));
        assert!(err.is_timeout());
        assert!(err.to_string().contains(ADDRESS));
        assert_eq!(harness.log().count("run_cleanup"), 1);
    }

    #[tokio::test]
    async fn test_ambiguous_address_never_discovers() {
        let harness = Harness::new();
        harness.add_node(windows_node("win-a", ADDRESS, &[]));
        harness.add_node(windows_node("win-b", ADDRESS, &[]));

        let mut orchestrator = harness.orchestrator(instance());
        let err = orchestrator.configure().await.expect_err("two nodes share the address");

        assert_eq!(err.phase(), Some(Phase::DiscoverNode));
        assert!(err.to_string().contains("2 nodes report this address"));
    }

    #[tokio::test]
    async fn test_node_stays_cordoned_until_version_observed() {
        let harness = Harness::new();
        harness.world().register_on_bootstrap = true;
        harness.world().daemon_converges = false;

        let mut orchestrator = harness.orchestrator(instance());
        let err = orchestrator.configure().await.expect_err("daemon never converges");

        assert_eq!(err.phase(), Some(Phase::AnnounceDesiredVersion));
        assert!(err.is_timeout());
        assert_eq!(harness.log().count("uncordon"), 0);
        assert!(harness.unschedulable(NODE));
        assert_eq!(harness.log().count("run_cleanup"), 1);
    }

    #[tokio::test]
    async fn test_bootstrap_failure_skips_cleanup() {
        let harness = Harness::new();
        harness.world().fail.insert("bootstrap");

        let mut orchestrator = harness.orchestrator(instance());
        let err = orchestrator.configure().await.expect_err("bootstrap failure");

        assert_eq!(err.phase(), Some(Phase::Bootstrap));
        assert!(err.to_string().contains(ADDRESS));
        assert_eq!(harness.log().count("run_cleanup"), 0);
    }

    #[tokio::test]
    async fn test_artifact_write_failure_stops_before_bootstrap() {
        let harness = Harness::new();
        harness.world().fail.insert("write");

        let mut orchestrator = harness.orchestrator(instance());
        let err = orchestrator.configure().await.expect_err("write failure");

        assert_eq!(err.phase(), Some(Phase::WriteBootstrapArtifacts));
        assert_eq!(harness.log().count("bootstrap"), 0);
        assert_eq!(harness.log().count("run_cleanup"), 0);
    }

    #[tokio::test]
    async fn test_missing_bootstrap_token_is_configuration_error() {
        let harness = Harness::new();
        harness.world().secrets.clear();

        let mut orchestrator = harness.orchestrator(instance());
        let err = orchestrator.configure().await.expect_err("no token secret");

        assert_eq!(err.phase(), Some(Phase::WriteBootstrapArtifacts));
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("node-bootstrapper-token"));
        assert_eq!(harness.log().count("write:kubelet.conf"), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_token_lifetime_is_configuration_error() {
        let harness = Harness::new();
        let mut orchestrator = harness
            .builder(instance())
            .boot_config(Arc::new(boot_config()))
            .config(OrchestratorConfig {
                token_lifetime: Duration::MAX,
                ..test_config()
            })
            .build()
            .expect("orchestrator should build");

        let err = orchestrator.configure().await.expect_err("lifetime out of range");

        assert_eq!(err.phase(), Some(Phase::Bootstrap));
        assert!(matches!(err.root(), Error::Configuration { .. }));
        assert_eq!(harness.log().count("token"), 0);
        assert_eq!(harness.log().count("bootstrap"), 0);
    }

    #[tokio::test]
    async fn test_rotation_without_bundle_fails_artifacts() {
        let harness = Harness::new();
        harness.publish_kubelet_ca("");

        let mut orchestrator = harness.orchestrator(instance());
        let err = orchestrator.configure().await.expect_err("empty rotated bundle");

        assert_eq!(err.phase(), Some(Phase::WriteBootstrapArtifacts));
        assert!(err.to_string().contains("kubelet-ca.crt"));
    }

    #[tokio::test]
    async fn test_configure_requires_boot_config() {
        let harness = Harness::new();
        let mut orchestrator = harness.orchestrator_without_boot_config(instance());

        let err = orchestrator.configure().await.expect_err("no boot config");
        assert_eq!(err.phase(), Some(Phase::WriteBootstrapArtifacts));
        assert!(harness.log().calls().is_empty());
    }

    /// Story: re-running configure on a converged node changes nothing
    #[tokio::test]
    async fn story_rerun_on_converged_node_is_idempotent() {
        let harness = Harness::new();
        let hash = instance().credential.public_key_hash();
        harness.add_node(windows_node(
            NODE,
            ADDRESS,
            &[
                (PUB_KEY_HASH_ANNOTATION, hash.as_str()),
                (DESIRED_VERSION_ANNOTATION, VERSION),
                (VERSION_ANNOTATION, VERSION),
            ],
        ));

        let mut orchestrator = harness.orchestrator(instance().with_node_name(NODE));
        orchestrator.configure().await.expect("first run");
        let first = harness.node(NODE).expect("node").metadata.annotations;

        orchestrator.configure().await.expect("second run");
        let second = harness.node(NODE).expect("node").metadata.annotations;

        assert_eq!(first, second);
        assert!(!harness.unschedulable(NODE));
        assert_eq!(harness.log().count("list_nodes"), 0);
        assert_eq!(
            orchestrator.journal().last(Phase::DiscoverNode).map(|r| r.outcome),
            Some(StepOutcome::Skipped)
        );
    }

    #[tokio::test]
    async fn test_advisory_cordon_failure_is_ignored() {
        let harness = Harness::new();
        harness.add_node(windows_node(NODE, ADDRESS, &[]));
        harness.world().fail.insert("cordon");

        let mut orchestrator = harness.orchestrator(instance().with_node_name(NODE));
        orchestrator.configure().await.expect("cordon is advisory");

        let record = orchestrator.journal().last(Phase::Cordon).expect("cordon recorded");
        assert_eq!(record.policy, StepPolicy::Advisory);
        assert!(matches!(record.outcome, StepOutcome::Ignored(_)));
    }

    #[tokio::test]
    async fn test_upgrading_label_cleared_on_uncordon() {
        let harness = Harness::new();
        let mut node = windows_node(NODE, ADDRESS, &[]);
        node.metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert(nodewright_common::UPGRADING_LABEL.to_string(), "true".to_string());
        harness.add_node(node);

        let mut orchestrator = harness.orchestrator(instance().with_node_name(NODE));
        orchestrator.configure().await.expect("configure should succeed");

        let labels = harness.node(NODE).and_then(|n| n.metadata.labels).expect("labels");
        assert!(!labels.contains_key(nodewright_common::UPGRADING_LABEL));
    }

    #[tokio::test]
    async fn test_cancellation_during_convergence_skips_cleanup() {
        let harness = Harness::new();
        harness.world().register_on_bootstrap = true;
        harness.world().daemon_converges = false;

        let mut orchestrator = harness.orchestrator(instance());
        let cancel = harness.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let err = orchestrator.configure().await.expect_err("cancelled");
        assert!(err.is_cancelled());
        assert_eq!(harness.log().count("run_cleanup"), 0);
        assert!(harness.unschedulable(NODE));
    }
}
