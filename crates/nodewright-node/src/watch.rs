//! Waiting on node annotations set by the configuration daemon

use std::fmt;

use k8s_openapi::api::core::v1::Node;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use nodewright_common::retry::{poll_until, PollProfile};
use nodewright_common::{Error, Result};

use crate::client::{node_annotation, ClusterClient};

/// Condition on a single annotation value
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnnotationCondition {
    /// Key exists with any value
    Present,
    /// Key exists with exactly this value
    Equals(String),
    /// Key does not exist
    Absent,
}

impl AnnotationCondition {
    /// Check against the annotation's current value
    pub fn is_met(&self, value: Option<&str>) -> bool {
        match self {
            AnnotationCondition::Present => value.is_some(),
            AnnotationCondition::Equals(expected) => value == Some(expected.as_str()),
            AnnotationCondition::Absent => value.is_none(),
        }
    }
}

impl fmt::Display for AnnotationCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnnotationCondition::Present => f.write_str("present"),
            AnnotationCondition::Equals(v) => write!(f, "= {}", v),
            AnnotationCondition::Absent => f.write_str("absent"),
        }
    }
}

/// Wait until annotation `key` on `node` satisfies a condition
#[derive(Clone, Debug)]
pub struct AnnotationWatch {
    node: String,
    key: String,
    condition: AnnotationCondition,
    profile: PollProfile,
}

impl AnnotationWatch {
    /// Watch with the standard poll profile
    pub fn new(
        node: impl Into<String>,
        key: impl Into<String>,
        condition: AnnotationCondition,
    ) -> Self {
        Self {
            node: node.into(),
            key: key.into(),
            condition,
            profile: PollProfile::standard(),
        }
    }

    /// Use a different poll profile
    pub fn with_profile(mut self, profile: PollProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Poll the node until the condition holds, returning the node as observed.
    ///
    /// A missing node or a failed read counts as "not yet"; only the profile's
    /// timeout or `cancel` ends the wait unsuccessfully.
    pub async fn wait(
        &self,
        cluster: &dyn ClusterClient,
        cancel: &CancellationToken,
    ) -> Result<Node> {
        let context = format!("{} {} on {}", self.key, self.condition, self.node);
        let node = poll_until(self.profile, cancel, &context, || async move {
            let node = cluster
                .get_node(&self.node)
                .await?
                .ok_or_else(|| Error::internal_with_context(&self.node, "node not found"))?;
            let met = self.condition.is_met(node_annotation(&node, &self.key));
            Ok(met.then_some(node))
        })
        .await?;

        debug!(
            node = %self.node,
            key = %self.key,
            condition = %self.condition,
            "annotation condition met"
        );
        Ok(node)
    }
}
