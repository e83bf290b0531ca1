//! Workload document rendering.
//!
//! The renderer is an opaque collaborator from the lifecycle controller's
//! point of view: given the per-user parameters it returns ready-to-submit
//! workload documents. The built-in renderer produces the conventional
//! objects directly; deployments with bespoke manifests swap in their own
//! implementation.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSecurityContext, PodSpec, PodTemplateSpec, Service,
    ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use typed_builder::TypedBuilder;

use crate::fedid::Fedid;
use crate::naming;

#[derive(Debug, Clone, TypedBuilder)]
pub struct WorkloadSpec {
    pub fedid: Fedid,
    pub uid: i64,
    pub gid: i64,
    pub service_url: String,
    pub cas_server: String,
    pub websocket_server: String,
}

pub trait ManifestRenderer: Send + Sync {
    fn service(&self, fedid: &Fedid) -> Service;
    fn deployment(&self, spec: &WorkloadSpec) -> Deployment;
}

pub struct BuiltinRenderer {
    pub image: String,
}

fn app_labels(fedid: &Fedid) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_owned(), naming::app_label_value(fedid))])
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_owned(),
        value: Some(value.to_owned()),
        ..Default::default()
    }
}

impl ManifestRenderer for BuiltinRenderer {
    fn service(&self, fedid: &Fedid) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(naming::service_name(fedid)),
                labels: Some(app_labels(fedid)),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(app_labels(fedid)),
                ports: Some(vec![ServicePort {
                    name: Some("web".to_owned()),
                    protocol: Some("TCP".to_owned()),
                    port: naming::SESSION_PORT,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn deployment(&self, spec: &WorkloadSpec) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some(naming::deployment_name(&spec.fedid)),
                labels: Some(app_labels(&spec.fedid)),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(app_labels(&spec.fedid)),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(app_labels(&spec.fedid)),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        security_context: Some(PodSecurityContext {
                            run_as_user: Some(spec.uid),
                            run_as_group: Some(spec.gid),
                            ..Default::default()
                        }),
                        containers: vec![Container {
                            name: "hebi".to_owned(),
                            image: Some(self.image.clone()),
                            ports: Some(vec![ContainerPort {
                                container_port: naming::SESSION_PORT,
                                ..Default::default()
                            }]),
                            env: Some(vec![
                                env_var("FEDID", spec.fedid.as_str()),
                                env_var("SERVICE_URL", &spec.service_url),
                                env_var("CAS_SERVER", &spec.cas_server),
                                env_var("WEBSOCKET_SERVER", &spec.websocket_server),
                            ]),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload() -> WorkloadSpec {
        WorkloadSpec::builder()
            .fedid("abc12345".parse().unwrap())
            .uid(10234)
            .gid(10234)
            .service_url("https://hebi.diamond.ac.uk/abc12345/".to_owned())
            .cas_server("https://auth.diamond.ac.uk/cas".to_owned())
            .websocket_server("https://hebi.diamond.ac.uk".to_owned())
            .build()
    }

    #[test]
    fn service_follows_the_naming_contract() {
        let renderer = BuiltinRenderer {
            image: "hebi-session:latest".to_owned(),
        };

        let service = renderer.service(&"abc12345".parse().unwrap());
        assert_eq!(service.metadata.name.as_deref(), Some("hebi-service-abc12345"));

        let spec = service.spec.expect("spec rendered");
        assert_eq!(
            spec.selector.unwrap().get("app").map(String::as_str),
            Some("hebi-abc12345")
        );
        assert_eq!(spec.ports.unwrap()[0].port, 8080);
    }

    #[test]
    fn deployment_selector_matches_template_labels() {
        let renderer = BuiltinRenderer {
            image: "hebi-session:latest".to_owned(),
        };

        let deployment = renderer.deployment(&workload());
        assert_eq!(deployment.metadata.name.as_deref(), Some("hebi-abc12345"));

        let spec = deployment.spec.expect("spec rendered");
        assert_eq!(spec.selector.match_labels, spec.template.metadata.unwrap().labels);

        let pod_spec = spec.template.spec.expect("pod spec rendered");
        let security = pod_spec.security_context.expect("security context set");
        assert_eq!(security.run_as_user, Some(10234));
        assert_eq!(security.run_as_group, Some(10234));
    }
}
