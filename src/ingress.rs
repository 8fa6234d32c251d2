//! Cluster-independent view of the Ingress objects the gateway serves.

use std::str::FromStr;

use k8s_openapi::api::networking::v1::{self as networking, HTTPIngressPath};
use kube::ResourceExt;

use crate::routing::PathType;

/// Annotation used before `spec.ingressClassName` existed.
pub(crate) const LEGACY_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IngressSpec {
    pub(crate) namespace: String,
    pub(crate) name: String,
    pub(crate) class: Option<String>,
    pub(crate) rules: Vec<IngressRule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IngressRule {
    pub(crate) host: String,
    /// `None` when the rule has no http block.
    pub(crate) paths: Option<Vec<IngressPath>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IngressPath {
    pub(crate) path: String,
    pub(crate) path_type: PathType,
    pub(crate) backend: Option<BackendRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BackendRef {
    Service {
        name: String,
        port: ServicePort,
    },
    Resource {
        api_group: Option<String>,
        kind: String,
        name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ServicePort {
    Number(u16),
    Name(String),
    Unset,
}

impl IngressSpec {
    pub(crate) fn id(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl From<&networking::Ingress> for IngressSpec {
    fn from(ingress: &networking::Ingress) -> Self {
        let spec = ingress.spec.as_ref();

        let class = spec
            .and_then(|spec| spec.ingress_class_name.clone())
            .or_else(|| ingress.annotations().get(LEGACY_CLASS_ANNOTATION).cloned())
            .filter(|class| !class.is_empty());

        let rules = spec
            .and_then(|spec| spec.rules.as_ref())
            .map(|rules| {
                rules
                    .iter()
                    .map(|rule| IngressRule {
                        host: rule.host.clone().unwrap_or_default(),
                        paths: rule
                            .http
                            .as_ref()
                            .map(|http| http.paths.iter().map(IngressPath::from).collect()),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            namespace: ingress.namespace().unwrap_or_default(),
            name: ingress.name_any(),
            class,
            rules,
        }
    }
}

impl From<&HTTPIngressPath> for IngressPath {
    fn from(entry: &HTTPIngressPath) -> Self {
        Self {
            path: entry.path.clone().unwrap_or_default(),
            path_type: PathType::from_str(&entry.path_type).unwrap_or_default(),
            backend: BackendRef::from_ingress_backend(&entry.backend),
        }
    }
}

impl BackendRef {
    /// A resource reference takes precedence over a service.
    fn from_ingress_backend(backend: &networking::IngressBackend) -> Option<Self> {
        if let Some(resource) = &backend.resource {
            return Some(Self::Resource {
                api_group: resource.api_group.clone(),
                kind: resource.kind.clone(),
                name: resource.name.clone(),
            });
        }

        backend.service.as_ref().map(|service| {
            let port = match &service.port {
                Some(networking::ServiceBackendPort {
                    name: Some(name), ..
                }) if !name.is_empty() => ServicePort::Name(name.clone()),
                Some(networking::ServiceBackendPort {
                    number: Some(number),
                    ..
                }) => u16::try_from(*number)
                    .map(ServicePort::Number)
                    .unwrap_or(ServicePort::Unset),
                _ => ServicePort::Unset,
            };

            Self::Service {
                name: service.name.clone(),
                port,
            }
        })
    }
}
