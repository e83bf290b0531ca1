//! Read-modify-patch of the shared ingress routing table.
//!
//! The ingress is a singleton: one rule for the well-known host, one path per
//! live session. All in-process mutations serialise through a single async
//! mutex held across read → modify → patch, otherwise two interleaved
//! read-modify-write cycles lose one of the updates.
//!
//! When the last route is removed, the rule is collapsed to a host-only form:
//! the orchestrator rejects an empty `paths` list, and a patch that only
//! removes nested keys can be silently dropped.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context as _;
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use serde_json::json;

use crate::fedid::Fedid;
use crate::kubernetes::Orchestrator;
use crate::naming;

const DEFAULT_API_VERSION: &str = "networking.k8s.io/v1";

/// In-memory working copy of the ingress, between read and patch.
#[derive(Debug, Clone)]
pub struct IngressDocument {
    api_version: String,
    name: String,
    annotations: Option<BTreeMap<String, String>>,
    spec: IngressSpec,
    host: String,
}

impl IngressDocument {
    pub fn from_ingress(ingress: Ingress, host: &str) -> anyhow::Result<Self> {
        // The apiVersion of the original submission is recorded in the first
        // managed-fields entry; fall back to the well-known default.
        let api_version = ingress
            .metadata
            .managed_fields
            .as_ref()
            .and_then(|fields| fields.first())
            .and_then(|field| field.api_version.clone())
            .unwrap_or_else(|| DEFAULT_API_VERSION.to_owned());

        let name = ingress.metadata.name.context("ingress has no name")?;
        let annotations = ingress.metadata.annotations;

        let mut spec = ingress.spec.unwrap_or_default();

        if spec.rules.as_ref().is_none_or(Vec::is_empty) {
            spec.rules = Some(vec![IngressRule {
                host: Some(host.to_owned()),
                http: None,
            }]);
        }

        Ok(Self {
            api_version,
            name,
            annotations,
            spec,
            host: host.to_owned(),
        })
    }

    fn rule(&mut self) -> &mut IngressRule {
        self.spec
            .rules
            .as_mut()
            .and_then(|rules| rules.first_mut())
            .expect("rules are initialised in from_ingress")
    }

    /// Adds the route for `fedid`, initialising `http.paths` when absent.
    /// Any stale route with the same path is replaced, never duplicated.
    pub fn insert_route(&mut self, fedid: &Fedid) {
        let path = naming::ingress_path(fedid);

        let route = HTTPIngressPath {
            path: Some(path.clone()),
            path_type: "Prefix".to_owned(),
            backend: IngressBackend {
                service: Some(IngressServiceBackend {
                    name: naming::service_name(fedid),
                    port: Some(ServiceBackendPort {
                        number: Some(naming::SESSION_PORT),
                        ..Default::default()
                    }),
                }),
                ..Default::default()
            },
        };

        let http = self
            .rule()
            .http
            .get_or_insert_with(|| HTTPIngressRuleValue { paths: Vec::new() });

        http.paths.retain(|existing| existing.path.as_deref() != Some(path.as_str()));
        http.paths.push(route);
    }

    /// Drops the route for `fedid`; collapses the rule to host-only form when
    /// no route is left.
    pub fn remove_route(&mut self, fedid: &Fedid) {
        let path = naming::ingress_path(fedid);
        let host = self.host.clone();

        let rule = self.rule();

        if let Some(http) = rule.http.as_mut() {
            http.paths.retain(|existing| existing.path.as_deref() != Some(path.as_str()));
        }

        let is_empty = rule.http.as_ref().is_some_and(|http| http.paths.is_empty());

        if is_empty {
            *rule = IngressRule {
                host: Some(host),
                http: None,
            };
        }
    }

    pub fn contains_route(&self, fedid: &Fedid) -> bool {
        let path = naming::ingress_path(fedid);

        self.spec
            .rules
            .as_ref()
            .and_then(|rules| rules.first())
            .and_then(|rule| rule.http.as_ref())
            .is_some_and(|http| {
                http.paths
                    .iter()
                    .any(|existing| existing.path.as_deref() == Some(path.as_str()))
            })
    }

    pub fn route_count(&self) -> usize {
        self.spec
            .rules
            .as_ref()
            .and_then(|rules| rules.first())
            .and_then(|rule| rule.http.as_ref())
            .map_or(0, |http| http.paths.len())
    }

    /// The patch body submitted back to the orchestrator. The typed spec
    /// serialises with the attribute naming the patch format expects.
    pub fn to_patch(&self) -> anyhow::Result<serde_json::Value> {
        let spec = serde_json::to_value(&self.spec).context("failed to serialise ingress spec")?;

        Ok(json!({
            "apiVersion": self.api_version,
            "kind": "Ingress",
            "metadata": {
                "name": self.name,
                "annotations": self.annotations,
            },
            "spec": spec,
        }))
    }
}

/// Serialised access to the shared ingress object.
#[derive(Clone)]
pub struct IngressMutator {
    inner: Arc<IngressMutatorInner>,
}

struct IngressMutatorInner {
    orchestrator: Arc<dyn Orchestrator>,
    host: String,
    lock: tokio::sync::Mutex<()>,
}

impl IngressMutator {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, host: String) -> Self {
        Self {
            inner: Arc::new(IngressMutatorInner {
                orchestrator,
                host,
                lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub async fn add_route(&self, fedid: &Fedid) -> anyhow::Result<()> {
        let _guard = self.inner.lock.lock().await;

        let ingress = self
            .inner
            .orchestrator
            .fetch_ingress()
            .await
            .context("failed to fetch ingress")?;

        let mut document = IngressDocument::from_ingress(ingress, &self.inner.host)?;
        document.insert_route(fedid);

        self.inner
            .orchestrator
            .patch_ingress(document.to_patch()?)
            .await
            .context("failed to patch ingress")?;

        info!(%fedid, "Ingress path added");

        Ok(())
    }

    pub async fn remove_route(&self, fedid: &Fedid) -> anyhow::Result<()> {
        let _guard = self.inner.lock.lock().await;

        let ingress = self
            .inner
            .orchestrator
            .fetch_ingress()
            .await
            .context("failed to fetch ingress")?;

        let mut document = IngressDocument::from_ingress(ingress, &self.inner.host)?;
        document.remove_route(fedid);

        self.inner
            .orchestrator
            .patch_ingress(document.to_patch()?)
            .await
            .context("failed to patch ingress")?;

        info!(%fedid, "Ingress path removed");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ManagedFieldsEntry, ObjectMeta};

    const HOST: &str = "hebi.diamond.ac.uk";

    fn fedid(s: &str) -> Fedid {
        s.parse().unwrap()
    }

    fn bare_ingress() -> Ingress {
        Ingress {
            metadata: ObjectMeta {
                name: Some("hebi-ingress".to_owned()),
                ..Default::default()
            },
            spec: Some(IngressSpec {
                rules: Some(vec![IngressRule {
                    host: Some(HOST.to_owned()),
                    http: None,
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn api_version_comes_from_managed_fields_when_present() {
        let mut ingress = bare_ingress();
        ingress.metadata.managed_fields = Some(vec![ManagedFieldsEntry {
            api_version: Some("networking.k8s.io/v1beta1".to_owned()),
            ..Default::default()
        }]);

        let document = IngressDocument::from_ingress(ingress, HOST).unwrap();
        let patch = document.to_patch().unwrap();
        assert_eq!(patch["apiVersion"], "networking.k8s.io/v1beta1");

        let document = IngressDocument::from_ingress(bare_ingress(), HOST).unwrap();
        let patch = document.to_patch().unwrap();
        assert_eq!(patch["apiVersion"], "networking.k8s.io/v1");
    }

    #[test]
    fn insert_initialises_http_when_absent() {
        let mut document = IngressDocument::from_ingress(bare_ingress(), HOST).unwrap();
        assert_eq!(document.route_count(), 0);

        document.insert_route(&fedid("abc12345"));

        assert_eq!(document.route_count(), 1);
        assert!(document.contains_route(&fedid("abc12345")));
    }

    #[test]
    fn routes_are_never_duplicated() {
        let mut document = IngressDocument::from_ingress(bare_ingress(), HOST).unwrap();

        document.insert_route(&fedid("abc12345"));
        document.insert_route(&fedid("abc12345"));

        assert_eq!(document.route_count(), 1);
    }

    #[test]
    fn removing_the_last_route_collapses_to_host_only() {
        let mut document = IngressDocument::from_ingress(bare_ingress(), HOST).unwrap();
        document.insert_route(&fedid("abc12345"));

        document.remove_route(&fedid("abc12345"));

        assert_eq!(document.route_count(), 0);
        let patch = document.to_patch().unwrap();
        assert_eq!(patch["spec"]["rules"][0], serde_json::json!({"host": HOST}));
    }

    #[test]
    fn removing_one_route_keeps_the_others() {
        let mut document = IngressDocument::from_ingress(bare_ingress(), HOST).unwrap();
        document.insert_route(&fedid("abc12345"));
        document.insert_route(&fedid("xyz99"));

        document.remove_route(&fedid("abc12345"));

        assert_eq!(document.route_count(), 1);
        assert!(document.contains_route(&fedid("xyz99")));
        assert!(!document.contains_route(&fedid("abc12345")));
    }

    #[test]
    fn removing_an_unknown_route_is_a_no_op() {
        let mut document = IngressDocument::from_ingress(bare_ingress(), HOST).unwrap();
        document.insert_route(&fedid("abc12345"));

        document.remove_route(&fedid("ghost"));

        assert_eq!(document.route_count(), 1);
    }

    #[test]
    fn patch_uses_camel_case_attribute_names() {
        let mut document = IngressDocument::from_ingress(bare_ingress(), HOST).unwrap();
        document.insert_route(&fedid("abc12345"));

        let patch = document.to_patch().unwrap();
        let route = &patch["spec"]["rules"][0]["http"]["paths"][0];

        assert_eq!(route["pathType"], "Prefix");
        assert_eq!(route["path"], "/abc12345(/|$)(.*)");
        assert_eq!(route["backend"]["service"]["name"], "hebi-service-abc12345");
        assert_eq!(route["backend"]["service"]["port"]["number"], 8080);
    }
}
