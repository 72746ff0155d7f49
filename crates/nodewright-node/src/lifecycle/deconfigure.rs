//! Deconfigure: return a node's instance to a plain VM

use tracing::{info, instrument};

use nodewright_common::{
    Phase, Result, DESIRED_VERSION_ANNOTATION, REBOOT_ANNOTATION, VERSION_ANNOTATION,
};

use super::NodeConfig;
use crate::client::MetadataPatch;
use crate::drain::drain_node;
use crate::watch::{AnnotationCondition, AnnotationWatch};

impl NodeConfig {
    /// Drain the node and remove node services from its instance.
    ///
    /// The node object itself is left in place; its controller removes it once
    /// the kubelet stops reporting. Every step is required except clearing the
    /// version annotations at the end.
    #[instrument(skip(self), fields(instance = %self.instance.address))]
    pub async fn deconfigure(&mut self) -> Result<()> {
        self.journal.clear();

        let found = self.require_node().await;
        let name = self.required(Phase::DiscoverNode, found)?;

        let cordoned = self.cordon(&name).await;
        self.required(Phase::Cordon, cordoned)?;

        let drained = drain_node(
            self.cluster.as_ref(),
            &name,
            self.config.standard,
            &self.cancel,
        )
        .await;
        self.required(Phase::Drain, drained)?;

        let cleaned = async {
            let kubeconfig = self.daemon_kubeconfig().await?;
            self.guard(
                "cleanup",
                self.transport
                    .run_cleanup(&self.config.daemon_namespace, &kubeconfig),
            )
            .await
        }
        .await;
        self.required(Phase::Cleanup, cleaned)?;

        // Cleanup may schedule a reboot through the daemon
        let rebooted = AnnotationWatch::new(&name, REBOOT_ANNOTATION, AnnotationCondition::Absent)
            .with_profile(self.config.standard)
            .wait(self.cluster.as_ref(), &self.cancel)
            .await
            .map(|_| ());
        self.required(Phase::AwaitReboot, rebooted)?;

        let removed = self
            .guard(
                "remove files and networks",
                self.transport.remove_files_and_networks(),
            )
            .await;
        self.required(Phase::RemoveFiles, removed)?;

        let cleared = self
            .patch_node(
                &name,
                &MetadataPatch::new()
                    .remove_annotation(DESIRED_VERSION_ANNOTATION)
                    .remove_annotation(VERSION_ANNOTATION),
            )
            .await;
        self.advisory(Phase::ClearAnnotations, cleared);

        info!(node = %name, "instance deconfigured");
        Ok(())
    }
}
