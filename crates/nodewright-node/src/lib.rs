//! Node lifecycle orchestration for Windows worker instances
//!
//! [`NodeConfig`] configures an instance as a node, deconfigures it, or reboots
//! it safely. The cluster and the instance are reached through the
//! [`ClusterClient`] and [`InstanceTransport`] traits.

#![deny(missing_docs)]

pub mod client;
pub mod config;
pub mod drain;
pub mod journal;
pub mod lifecycle;
pub mod transport;
pub mod watch;

pub use client::{ClusterClient, KubeClusterClient, MetadataPatch};
pub use config::{ClusterObjectRefs, ObjectRef, OrchestratorConfig};
pub use journal::{StepJournal, StepOutcome, StepPolicy, StepRecord};
pub use lifecycle::{NodeConfig, NodeConfigBuilder};
pub use transport::{Instance, InstanceTransport, SshKeyPair};
pub use watch::{AnnotationCondition, AnnotationWatch};
