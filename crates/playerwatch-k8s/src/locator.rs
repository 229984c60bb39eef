use std::future::Future;

use anyhow::Result;

use playerwatch_types::TargetInstance;

/// Raw pod query against the control plane
pub trait PodLister {
    /// List pods matching a label selector, in API response order
    fn list_instances(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> impl Future<Output = Result<Vec<TargetInstance>>> + Send;
}

/// Finds the pod whose logs should be streamed
pub trait InstanceLocator {
    /// Returns the current target pod, or `None` when there is none or the
    /// lookup failed. Callers retry; errors are not propagated.
    fn find(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> impl Future<Output = Option<TargetInstance>> + Send;
}

/// Pick the first running pod in the order the API returned them
pub fn select_running(pods: Vec<TargetInstance>) -> Option<TargetInstance> {
    pods.into_iter().find(TargetInstance::is_running)
}

/// InstanceLocator backed by a pod listing
#[derive(Clone)]
pub struct PodLocator<P> {
    lister: P,
}

impl<P> PodLocator<P> {
    pub fn new(lister: P) -> Self {
        Self { lister }
    }
}

impl<P> InstanceLocator for PodLocator<P>
where
    P: PodLister + Sync,
{
    async fn find(&self, namespace: &str, label_selector: &str) -> Option<TargetInstance> {
        match self.lister.list_instances(namespace, label_selector).await {
            Ok(pods) => {
                let candidates = pods.len();
                let found = select_running(pods);
                if found.is_none() {
                    tracing::debug!(
                        namespace,
                        selector = label_selector,
                        candidates,
                        "No running pod matches selector"
                    );
                }
                found
            }
            Err(e) => {
                tracing::warn!(
                    namespace,
                    selector = label_selector,
                    error = %format!("{:#}", e),
                    "Pod lookup failed"
                );
                None
            }
        }
    }
}
