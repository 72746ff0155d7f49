//! SafeReboot: reboot a node without disrupting workloads

use tracing::{info, instrument};

use nodewright_common::{Phase, Result, REBOOT_ANNOTATION};

use super::NodeConfig;
use crate::client::MetadataPatch;
use crate::drain::drain_node;

impl NodeConfig {
    /// Cordon, drain, reboot the instance, then return the node to service.
    ///
    /// Fails closed: if any step fails the node stays cordoned.
    #[instrument(skip(self), fields(instance = %self.instance.address))]
    pub async fn safe_reboot(&mut self) -> Result<()> {
        self.journal.clear();

        let found = self.require_node().await;
        let name = self.required(Phase::DiscoverNode, found)?;

        let cordoned = self.cordon(&name).await;
        self.required(Phase::Cordon, cordoned)?;

        let drained = drain_node(
            self.cluster.as_ref(),
            &name,
            self.config.quick,
            &self.cancel,
        )
        .await;
        self.required(Phase::Drain, drained)?;

        let rebooted = async {
            self.guard("reboot", self.transport.reboot_and_reconnect())
                .await?;
            self.patch_node(&name, &MetadataPatch::new().remove_annotation(REBOOT_ANNOTATION))
                .await
        }
        .await;
        self.required(Phase::Reboot, rebooted)?;

        let uncordoned = self.uncordon(&name).await;
        let node = self.required(Phase::Uncordon, uncordoned)?;
        self.node = Some(node);

        info!(node = %name, "node rebooted");
        Ok(())
    }
}
