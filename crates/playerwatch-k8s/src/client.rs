use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};

use crate::locator::PodLister;
use playerwatch_types::{PodPhase, TargetInstance};

/// Kubernetes client wrapper
#[derive(Clone)]
pub struct KubeClient {
    pub(crate) client: kube::Client,
}

impl KubeClient {
    /// Create a new KubeClient.
    ///
    /// With a context name the local kubeconfig is used; otherwise the config
    /// is inferred (in-cluster service account first, then the current
    /// kubeconfig context).
    pub async fn new(context: Option<&str>) -> Result<Self> {
        let config = match context {
            Some(context_name) => {
                let kubeconfig = Kubeconfig::read()
                    .context("Failed to read kubeconfig. Is kubectl configured?")?;

                kube::Config::from_custom_kubeconfig(
                    kubeconfig,
                    &KubeConfigOptions {
                        context: Some(context_name.to_string()),
                        ..Default::default()
                    },
                )
                .await
                .context(format!(
                    "Failed to create config for context: {}",
                    context_name
                ))?
            }
            None => kube::Config::infer().await.context(
                "Failed to load Kubernetes config. No service account or kubeconfig available?",
            )?,
        };

        let client =
            kube::Client::try_from(config).context("Failed to create Kubernetes client")?;

        Ok(Self { client })
    }

    /// Validate that the client can make API calls in the namespace
    pub async fn validate(&self, namespace: &str) -> Result<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        // Just try to list with limit 1 to validate auth and RBAC
        pods.list(&ListParams::default().limit(1))
            .await
            .context(format!("Failed to list pods in namespace {}", namespace))?;
        Ok(())
    }

    /// Convert a k8s Pod to a TargetInstance
    fn pod_to_instance(pod: Pod) -> TargetInstance {
        let name = pod.metadata.name.unwrap_or_default();
        let phase = pod
            .status
            .and_then(|s| s.phase)
            .as_deref()
            .map(PodPhase::from)
            .unwrap_or(PodPhase::Unknown);

        let containers: Vec<String> = pod
            .spec
            .map(|spec| spec.containers.into_iter().map(|c| c.name).collect())
            .unwrap_or_default();

        TargetInstance::new(name, phase).with_containers(containers)
    }
}

impl PodLister for KubeClient {
    async fn list_instances(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<TargetInstance>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);

        let list = pods
            .list(&ListParams::default().labels(label_selector))
            .await
            .context(format!(
                "Failed to list pods matching '{}' in {}",
                label_selector, namespace
            ))?;

        Ok(list.items.into_iter().map(Self::pod_to_instance).collect())
    }
}
