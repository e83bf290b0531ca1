//! Orchestrator seam and its Kubernetes implementation.
//!
//! The lifecycle controller, reaper and ingress mutator all talk to the
//! cluster through the [`Orchestrator`] trait; tests swap in an in-memory
//! fake. `KubeOrchestrator` is the production implementation.

use std::pin::pin;

use anyhow::Context as _;
use async_trait::async_trait;
use futures::TryStreamExt as _;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::watcher;
use thiserror::Error;

use crate::config::Conf;
use crate::fedid::Fedid;
use crate::naming;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("object not found")]
    NotFound,
    #[error("Kubernetes API call failed")]
    Api(#[source] kube::Error),
    #[error("pod watch failed")]
    Watch(#[source] watcher::Error),
    #[error("watch stream ended before the pod became ready")]
    WatchEnded,
}

impl From<kube::Error> for OrchestratorError {
    fn from(error: kube::Error) -> Self {
        match error {
            kube::Error::Api(ref response) if response.code == 404 => Self::NotFound,
            other => Self::Api(other),
        }
    }
}

#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Users whose session pod is currently running: labelled for a user,
    /// not the launcher itself, and not in the process of being deleted.
    async fn running_session_users(&self) -> Result<Vec<Fedid>, OrchestratorError>;

    /// Same predicate as [`Self::running_session_users`], for a single user.
    async fn is_pod_running(&self, fedid: &Fedid) -> Result<bool, OrchestratorError>;

    /// Whether any pod labelled for this user exists, deleting or not. This
    /// is the guard used before creating resources.
    async fn pod_exists(&self, fedid: &Fedid) -> Result<bool, OrchestratorError>;

    async fn service_exists(&self, fedid: &Fedid) -> Result<bool, OrchestratorError>;

    async fn create_service(&self, service: Service) -> Result<(), OrchestratorError>;

    async fn create_deployment(&self, deployment: Deployment) -> Result<(), OrchestratorError>;

    async fn delete_deployment(&self, fedid: &Fedid) -> Result<(), OrchestratorError>;

    async fn delete_service(&self, fedid: &Fedid) -> Result<(), OrchestratorError>;

    async fn fetch_ingress(&self) -> Result<Ingress, OrchestratorError>;

    async fn patch_ingress(&self, body: serde_json::Value) -> Result<(), OrchestratorError>;

    /// Resolves once a pod labelled for this user reports phase `Running`.
    /// Never resolves on its own otherwise; the caller bounds the wait.
    async fn wait_pod_running(&self, fedid: &Fedid) -> Result<(), OrchestratorError>;
}

pub struct KubeOrchestrator {
    client: kube::Client,
    namespace: String,
    ingress_name: String,
}

impl KubeOrchestrator {
    pub async fn connect(conf: &Conf) -> anyhow::Result<Self> {
        let client = if conf.in_cluster {
            kube::Client::try_default()
                .await
                .context("in-cluster Kubernetes configuration")?
        } else {
            let cluster_url = conf
                .api_server_url
                .as_str()
                .parse()
                .context("orchestrator URL is not a valid URI")?;

            let mut config = kube::Config::new(cluster_url);
            config.default_namespace = conf.namespace.clone();

            kube::Client::try_from(config).context("out-of-cluster Kubernetes configuration")?
        };

        Ok(Self {
            client,
            namespace: conf.namespace.clone(),
            ingress_name: conf.ingress_name.clone(),
        })
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn services(&self) -> Api<Service> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn deployments(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn ingresses(&self) -> Api<Ingress> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

fn pod_owner(pod: &Pod) -> Option<Fedid> {
    let label = pod.metadata.labels.as_ref()?.get("app")?;
    naming::user_from_app_label(label)
}

fn is_running(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_none() && pod_owner(pod).is_some()
}

#[async_trait]
impl Orchestrator for KubeOrchestrator {
    async fn running_session_users(&self) -> Result<Vec<Fedid>, OrchestratorError> {
        let pods = self.pods().list(&ListParams::default()).await?;

        Ok(pods
            .items
            .iter()
            .filter(|pod| pod.metadata.deletion_timestamp.is_none())
            .filter_map(pod_owner)
            .collect())
    }

    async fn is_pod_running(&self, fedid: &Fedid) -> Result<bool, OrchestratorError> {
        let params = ListParams::default().labels(&naming::app_label_selector(fedid));
        let pods = self.pods().list(&params).await?;

        Ok(pods.items.iter().any(is_running))
    }

    async fn pod_exists(&self, fedid: &Fedid) -> Result<bool, OrchestratorError> {
        let params = ListParams::default().labels(&naming::app_label_selector(fedid));
        let pods = self.pods().list(&params).await?;

        Ok(!pods.items.is_empty())
    }

    async fn service_exists(&self, fedid: &Fedid) -> Result<bool, OrchestratorError> {
        let service = self.services().get_opt(&naming::service_name(fedid)).await?;
        Ok(service.is_some())
    }

    async fn create_service(&self, service: Service) -> Result<(), OrchestratorError> {
        self.services().create(&PostParams::default(), &service).await?;
        Ok(())
    }

    async fn create_deployment(&self, deployment: Deployment) -> Result<(), OrchestratorError> {
        self.deployments().create(&PostParams::default(), &deployment).await?;
        Ok(())
    }

    async fn delete_deployment(&self, fedid: &Fedid) -> Result<(), OrchestratorError> {
        let params = DeleteParams::background().grace_period(0);
        self.deployments().delete(&naming::deployment_name(fedid), &params).await?;
        Ok(())
    }

    async fn delete_service(&self, fedid: &Fedid) -> Result<(), OrchestratorError> {
        let params = DeleteParams::background().grace_period(0);
        self.services().delete(&naming::service_name(fedid), &params).await?;
        Ok(())
    }

    async fn fetch_ingress(&self) -> Result<Ingress, OrchestratorError> {
        Ok(self.ingresses().get(&self.ingress_name).await?)
    }

    async fn patch_ingress(&self, body: serde_json::Value) -> Result<(), OrchestratorError> {
        let params = PatchParams {
            field_manager: Some(naming::INGRESS_FIELD_MANAGER.to_owned()),
            ..PatchParams::default()
        };

        self.ingresses()
            .patch(&self.ingress_name, &params, &Patch::Merge(&body))
            .await?;

        Ok(())
    }

    async fn wait_pod_running(&self, fedid: &Fedid) -> Result<(), OrchestratorError> {
        let config = watcher::Config::default().labels(&naming::app_label_selector(fedid));
        let mut stream = pin!(watcher(self.pods(), config));

        while let Some(event) = stream.try_next().await.map_err(OrchestratorError::Watch)? {
            let pod = match event {
                watcher::Event::Apply(pod) | watcher::Event::InitApply(pod) => pod,
                _ => continue,
            };

            let phase = pod.status.as_ref().and_then(|status| status.phase.as_deref());

            if phase == Some("Running") {
                return Ok(());
            }
        }

        Err(OrchestratorError::WatchEnded)
    }
}
