//! In-memory fakes for the external collaborators, used by the test suites.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::{Ingress, IngressRule, IngressSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use parking_lot::Mutex;

use crate::config::{Conf, RunMode};
use crate::directory::{Directory, DirectoryError, DirectoryRecord};
use crate::fedid::Fedid;
use crate::kubernetes::{Orchestrator, OrchestratorError};

pub const TEST_HOST: &str = "hebi.diamond.ac.uk";

pub fn test_conf() -> Conf {
    Conf {
        run_mode: RunMode::Development,
        bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        jwt_key: "test-signing-key".to_owned(),
        in_cluster: false,
        api_server_url: "http://localhost:8090".parse().expect("valid URL"),
        namespace: "hebi".to_owned(),
        ingress_name: "hebi-ingress".to_owned(),
        ingress_host: TEST_HOST.to_owned(),
        ldap_url: "ldap://ldap.diamond.ac.uk".to_owned(),
        cas_server: "https://auth.diamond.ac.uk/cas".parse().expect("valid URL"),
        session_image: "hebi-session:latest".to_owned(),
        heartbeat_interval: Duration::from_secs(20),
        reap_interval: Duration::from_secs(120),
        inactivity_threshold: Duration::from_secs(2 * 24 * 60 * 60),
        activity_flush_interval: Duration::from_secs(300),
        activity_file: "/tmp/hebi-test/all_sessions_activity.json".into(),
        pod_ready_timeout: Duration::from_secs(120),
    }
}

pub fn staff_record(uid: i64) -> DirectoryRecord {
    DirectoryRecord {
        uid,
        is_uid_root: uid == 0,
        is_staff: true,
        is_sysadmin: false,
        is_functional: false,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FakePod {
    pub running: bool,
    pub deleting: bool,
}

#[derive(Default)]
struct FakeCluster {
    pods: HashMap<Fedid, FakePod>,
    services: HashSet<String>,
    deployments: HashMap<String, Deployment>,
    ingress: Option<Ingress>,
    calls: Vec<String>,
}

/// Records every mutating call so tests can assert on side effects.
pub struct FakeOrchestrator {
    inner: Mutex<FakeCluster>,
    /// When unset, `wait_pod_running` never resolves; the caller's timeout
    /// fires instead.
    pods_become_ready: bool,
}

impl Default for FakeOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeOrchestrator {
    pub fn new() -> Self {
        let ingress = Ingress {
            metadata: ObjectMeta {
                name: Some("hebi-ingress".to_owned()),
                ..Default::default()
            },
            spec: Some(IngressSpec {
                rules: Some(vec![IngressRule {
                    host: Some(TEST_HOST.to_owned()),
                    http: None,
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        Self {
            inner: Mutex::new(FakeCluster {
                ingress: Some(ingress),
                ..Default::default()
            }),
            pods_become_ready: true,
        }
    }

    pub fn with_stuck_pods() -> Self {
        Self {
            pods_become_ready: false,
            ..Self::new()
        }
    }

    pub fn insert_pod(&self, fedid: Fedid, pod: FakePod) {
        self.inner.lock().pods.insert(fedid, pod);
    }

    pub fn insert_service(&self, fedid: &Fedid) {
        self.inner.lock().services.insert(crate::naming::service_name(fedid));
    }

    pub fn has_pod(&self, fedid: &Fedid) -> bool {
        self.inner.lock().pods.contains_key(fedid)
    }

    pub fn deployment(&self, fedid: &Fedid) -> Option<Deployment> {
        self.inner
            .lock()
            .deployments
            .get(&crate::naming::deployment_name(fedid))
            .cloned()
    }

    pub fn has_service(&self, fedid: &Fedid) -> bool {
        self.inner
            .lock()
            .services
            .contains(&crate::naming::service_name(fedid))
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().calls.clone()
    }

    pub fn create_calls(&self) -> usize {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|call| call.starts_with("create") || call.starts_with("patch"))
            .count()
    }

    pub fn ingress_paths(&self) -> Vec<String> {
        let guard = self.inner.lock();

        guard
            .ingress
            .as_ref()
            .and_then(|ingress| ingress.spec.as_ref())
            .and_then(|spec| spec.rules.as_ref())
            .and_then(|rules| rules.first())
            .and_then(|rule| rule.http.as_ref())
            .map(|http| http.paths.iter().filter_map(|path| path.path.clone()).collect())
            .unwrap_or_default()
    }

    fn record(&self, call: impl Into<String>) {
        self.inner.lock().calls.push(call.into());
    }
}

#[async_trait]
impl Orchestrator for FakeOrchestrator {
    async fn running_session_users(&self) -> Result<Vec<Fedid>, OrchestratorError> {
        Ok(self
            .inner
            .lock()
            .pods
            .iter()
            .filter(|(_, pod)| !pod.deleting)
            .map(|(fedid, _)| fedid.clone())
            .collect())
    }

    async fn is_pod_running(&self, fedid: &Fedid) -> Result<bool, OrchestratorError> {
        Ok(self
            .inner
            .lock()
            .pods
            .get(fedid)
            .is_some_and(|pod| !pod.deleting))
    }

    async fn pod_exists(&self, fedid: &Fedid) -> Result<bool, OrchestratorError> {
        Ok(self.inner.lock().pods.contains_key(fedid))
    }

    async fn service_exists(&self, fedid: &Fedid) -> Result<bool, OrchestratorError> {
        Ok(self
            .inner
            .lock()
            .services
            .contains(&crate::naming::service_name(fedid)))
    }

    async fn create_service(&self, service: Service) -> Result<(), OrchestratorError> {
        self.record("create_service");

        let name = service.metadata.name.unwrap_or_default();
        self.inner.lock().services.insert(name);

        Ok(())
    }

    async fn create_deployment(&self, deployment: Deployment) -> Result<(), OrchestratorError> {
        self.record("create_deployment");

        let name = deployment.metadata.name.clone().unwrap_or_default();

        let mut guard = self.inner.lock();
        guard.deployments.insert(name.clone(), deployment);

        if let Some(fedid) = name.strip_prefix("hebi-").and_then(|s| s.parse().ok()) {
            guard.pods.insert(
                fedid,
                FakePod {
                    running: self.pods_become_ready,
                    deleting: false,
                },
            );
        }

        Ok(())
    }

    async fn delete_deployment(&self, fedid: &Fedid) -> Result<(), OrchestratorError> {
        self.record("delete_deployment");

        let mut guard = self.inner.lock();
        guard.deployments.remove(&crate::naming::deployment_name(fedid));

        match guard.pods.remove(fedid) {
            Some(_) => Ok(()),
            None => Err(OrchestratorError::NotFound),
        }
    }

    async fn delete_service(&self, fedid: &Fedid) -> Result<(), OrchestratorError> {
        self.record("delete_service");

        let name = crate::naming::service_name(fedid);
        if self.inner.lock().services.remove(&name) {
            Ok(())
        } else {
            Err(OrchestratorError::NotFound)
        }
    }

    async fn fetch_ingress(&self) -> Result<Ingress, OrchestratorError> {
        self.inner
            .lock()
            .ingress
            .clone()
            .ok_or(OrchestratorError::NotFound)
    }

    async fn patch_ingress(&self, body: serde_json::Value) -> Result<(), OrchestratorError> {
        self.record("patch_ingress");

        let spec: IngressSpec = serde_json::from_value(body["spec"].clone())
            .map_err(|_| OrchestratorError::NotFound)?;

        let mut guard = self.inner.lock();
        if let Some(ingress) = guard.ingress.as_mut() {
            ingress.spec = Some(spec);
        }

        Ok(())
    }

    async fn wait_pod_running(&self, fedid: &Fedid) -> Result<(), OrchestratorError> {
        let ready = self
            .inner
            .lock()
            .pods
            .get(fedid)
            .is_some_and(|pod| pod.running);

        if ready {
            Ok(())
        } else {
            std::future::pending().await
        }
    }
}

/// A directory whose answers are fixed up front. Unknown users fail the
/// lookup the way an empty LDAP search result does.
#[derive(Default)]
pub struct StaticDirectory {
    records: HashMap<Fedid, DirectoryRecord>,
}

impl StaticDirectory {
    pub fn with_record(fedid: Fedid, record: DirectoryRecord) -> Self {
        let mut records = HashMap::new();
        records.insert(fedid, record);
        Self { records }
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn lookup(&self, fedid: &Fedid) -> Result<DirectoryRecord, DirectoryError> {
        self.records
            .get(fedid)
            .cloned()
            .ok_or_else(|| DirectoryError::UnknownUser(fedid.clone()))
    }
}
