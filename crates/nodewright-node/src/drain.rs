//! Node drain
//!
//! Evicts every pod bound to the node except those the node itself manages:
//! DaemonSet pods (recreated on the node anyway) and static mirror pods.
//! Pods using ephemeral storage are evicted like any other. Finished pods are
//! deleted outright since there is nothing left to disrupt.

use futures::future::join_all;
use k8s_openapi::api::core::v1::Pod;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use nodewright_common::retry::{poll_until, PollProfile};
use nodewright_common::{Error, Result};

use crate::client::ClusterClient;

/// Annotation marking the API mirror of a static pod
pub const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

/// What drain does with a pod
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PodDisposition {
    /// Left on the node
    Ignore,
    /// Evicted through the Eviction API
    Evict,
    /// Already finished, deleted directly
    Delete,
    /// Already being deleted, waited on
    Terminating,
}

/// Decide what drain does with a pod
pub fn classify_pod(pod: &Pod) -> PodDisposition {
    let is_mirror = pod
        .metadata
        .annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(MIRROR_POD_ANNOTATION));
    let is_daemonset = pod
        .metadata
        .owner_references
        .as_ref()
        .is_some_and(|refs| refs.iter().any(|r| r.kind == "DaemonSet"));
    if is_mirror || is_daemonset {
        return PodDisposition::Ignore;
    }

    if pod.metadata.deletion_timestamp.is_some() {
        return PodDisposition::Terminating;
    }

    match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
        Some("Succeeded") | Some("Failed") => PodDisposition::Delete,
        _ => PodDisposition::Evict,
    }
}

fn is_too_many_requests(err: &Error) -> bool {
    matches!(err, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 429)
}

/// Evict pods from `node` until none that drain is responsible for remain.
///
/// Evictions rejected by a disruption budget (429) are retried on the next
/// poll; any other eviction error is retried the same way and surfaces in the
/// timeout error if the drain never completes.
pub async fn drain_node(
    cluster: &dyn ClusterClient,
    node: &str,
    profile: PollProfile,
    cancel: &CancellationToken,
) -> Result<()> {
    let context = format!("drain {}", node);
    poll_until(profile, cancel, &context, || async move {
        let pods = cluster.list_pods_on_node(node).await?;

        let mut remaining = 0usize;
        let mut evict = Vec::new();
        let mut delete = Vec::new();
        for pod in &pods {
            let Some(key) = pod_key(pod) else { continue };
            match classify_pod(pod) {
                PodDisposition::Ignore => {}
                PodDisposition::Terminating => remaining += 1,
                PodDisposition::Evict => {
                    remaining += 1;
                    evict.push(key);
                }
                PodDisposition::Delete => {
                    remaining += 1;
                    delete.push(key);
                }
            }
        }

        if remaining == 0 {
            return Ok(Some(()));
        }
        debug!(node = %node, remaining, evicting = evict.len(), deleting = delete.len(), "draining");

        let evictions = join_all(evict.iter().map(|(ns, name)| cluster.evict_pod(ns, name)));
        let deletions = join_all(delete.iter().map(|(ns, name)| cluster.delete_pod(ns, name)));
        let (evicted, deleted) = futures::join!(evictions, deletions);

        for result in evicted.into_iter().chain(deleted) {
            match result {
                Ok(()) => {}
                Err(e) if is_too_many_requests(&e) => {
                    debug!(node = %node, "eviction blocked by disruption budget");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    })
    .await?;

    info!(node = %node, "node drained");
    Ok(())
}

fn pod_key(pod: &Pod) -> Option<(String, String)> {
    Some((pod.metadata.namespace.clone()?, pod.metadata.name.clone()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockClusterClient;
    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time};
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn pod(name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn owned_by(mut p: Pod, kind: &str) -> Pod {
        p.metadata.owner_references = Some(vec![OwnerReference {
            kind: kind.to_string(),
            name: "owner".to_string(),
            api_version: "apps/v1".to_string(),
            uid: "uid".to_string(),
            ..Default::default()
        }]);
        p
    }

    fn in_phase(mut p: Pod, phase: &str) -> Pod {
        p.status = Some(PodStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        });
        p
    }

    fn fast() -> PollProfile {
        PollProfile::new(Duration::from_millis(1), Duration::from_millis(200))
    }

    fn too_many_requests() -> Error {
        Error::from(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "Cannot evict pod as it would violate the pod's disruption budget."
                .to_string(),
            reason: "TooManyRequests".to_string(),
            code: 429,
        }))
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify_pod(&pod("web")), PodDisposition::Evict);
        assert_eq!(classify_pod(&owned_by(pod("ds"), "DaemonSet")), PodDisposition::Ignore);
        assert_eq!(classify_pod(&owned_by(pod("rs"), "ReplicaSet")), PodDisposition::Evict);
        assert_eq!(classify_pod(&in_phase(pod("job"), "Succeeded")), PodDisposition::Delete);
        assert_eq!(classify_pod(&in_phase(pod("crash"), "Failed")), PodDisposition::Delete);

        let mut mirror = pod("static");
        mirror.metadata.annotations = Some(BTreeMap::from([(
            MIRROR_POD_ANNOTATION.to_string(),
            "hash".to_string(),
        )]));
        assert_eq!(classify_pod(&mirror), PodDisposition::Ignore);

        let mut terminating = pod("going");
        terminating.metadata.deletion_timestamp = Some(Time(Default::default()));
        assert_eq!(classify_pod(&terminating), PodDisposition::Terminating);
    }

    #[test]
    fn test_emptydir_pods_are_evicted() {
        use k8s_openapi::api::core::v1::{EmptyDirVolumeSource, PodSpec, Volume};
        let mut p = pod("cache");
        p.spec = Some(PodSpec {
            volumes: Some(vec![Volume {
                name: "scratch".to_string(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Default::default()
            }]),
            ..Default::default()
        });
        assert_eq!(classify_pod(&p), PodDisposition::Evict);
    }

    /// Story: evictable pods go, DaemonSet pods stay, finished pods are deleted
    #[tokio::test]
    async fn story_drain_evicts_until_only_managed_pods_remain() {
        let pods = Arc::new(Mutex::new(vec![
            pod("web"),
            owned_by(pod("node-exporter"), "DaemonSet"),
            in_phase(pod("job"), "Succeeded"),
        ]));
        let evicted = Arc::new(Mutex::new(Vec::new()));

        let mut cluster = MockClusterClient::new();
        let p = pods.clone();
        cluster
            .expect_list_pods_on_node()
            .returning(move |_| Ok(p.lock().expect("mutex should not be poisoned").clone()));
        let (p, e) = (pods.clone(), evicted.clone());
        cluster.expect_evict_pod().returning(move |_, name| {
            e.lock().expect("mutex should not be poisoned").push(name.to_string());
            p.lock()
                .expect("mutex should not be poisoned")
                .retain(|pod| pod.metadata.name.as_deref() != Some(name));
            Ok(())
        });
        let p = pods.clone();
        cluster.expect_delete_pod().times(1).returning(move |_, name| {
            p.lock()
                .expect("mutex should not be poisoned")
                .retain(|pod| pod.metadata.name.as_deref() != Some(name));
            Ok(())
        });

        drain_node(&cluster, "win-a", fast(), &CancellationToken::new())
            .await
            .expect("drain should complete");

        assert_eq!(*evicted.lock().expect("mutex should not be poisoned"), vec!["web"]);
        let left: Vec<_> = pods
            .lock()
            .expect("mutex should not be poisoned")
            .iter()
            .filter_map(|p| p.metadata.name.clone())
            .collect();
        assert_eq!(left, vec!["node-exporter"]);
    }

    #[tokio::test]
    async fn test_disruption_budget_rejection_is_retried() {
        let attempts = Arc::new(Mutex::new(0u32));
        let gone = Arc::new(Mutex::new(false));

        let mut cluster = MockClusterClient::new();
        let g = gone.clone();
        cluster.expect_list_pods_on_node().returning(move |_| {
            if *g.lock().expect("mutex should not be poisoned") {
                Ok(vec![])
            } else {
                Ok(vec![pod("guarded")])
            }
        });
        let (a, g) = (attempts.clone(), gone.clone());
        cluster.expect_evict_pod().returning(move |_, _| {
            let mut n = a.lock().expect("mutex should not be poisoned");
            *n += 1;
            if *n < 3 {
                Err(too_many_requests())
            } else {
                *g.lock().expect("mutex should not be poisoned") = true;
                Ok(())
            }
        });

        drain_node(&cluster, "win-a", fast(), &CancellationToken::new())
            .await
            .expect("drain should complete once the budget allows");
        assert_eq!(*attempts.lock().expect("mutex should not be poisoned"), 3);
    }

    #[tokio::test]
    async fn test_drain_times_out_when_pods_never_leave() {
        let mut cluster = MockClusterClient::new();
        cluster
            .expect_list_pods_on_node()
            .returning(|_| Ok(vec![pod("stuck")]));
        cluster
            .expect_evict_pod()
            .returning(|_, _| Err(too_many_requests()));

        let err = drain_node(&cluster, "win-a", fast(), &CancellationToken::new())
            .await
            .expect_err("drain should time out");
        assert!(err.is_timeout());
        assert!(err.to_string().contains("drain win-a"));
    }
}
