use std::sync::Arc;

use derive_more::Display;
use tracing::{debug, warn};
use url::Url;

use crate::{
    cluster::{ClusterQuery, ClusterResource, DEFAULT_CLUSTER_DOMAIN},
    error::{QueryError, ResolveError},
    ingress::{BackendRef, ServicePort},
};

/// Concrete network location of a backend.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
#[display(fmt = "{}:{}", host, port)]
pub(crate) struct BackendAddress {
    pub(crate) host: String,
    pub(crate) port: u16,
}

impl BackendAddress {
    fn service(name: &str, namespace: &str, domain: &str, port: u16) -> Self {
        Self {
            host: format!("{name}.{namespace}.svc.{domain}"),
            port,
        }
    }

    pub(crate) fn url(&self) -> Result<Url, ResolveError> {
        Url::parse(&format!("http://{self}"))
            .map_err(|error| ResolveError::InvalidBackend(format!("{self}: {error}")))
    }
}

/// Turns backend references into cluster DNS addresses.
#[derive(Clone)]
pub(crate) struct BackendResolver {
    cluster: Arc<dyn ClusterQuery>,
}

impl BackendResolver {
    pub(crate) fn new(cluster: Arc<dyn ClusterQuery>) -> Self {
        Self { cluster }
    }

    /// Never fails; an unreachable or empty answer yields the default.
    pub(crate) async fn cluster_domain(&self) -> String {
        match self.cluster.cluster_domain().await {
            Ok(domain) if !domain.is_empty() => domain,
            Ok(_) => DEFAULT_CLUSTER_DOMAIN.to_string(),
            Err(error) => {
                warn!(%error, "Cluster domain lookup failed, using {DEFAULT_CLUSTER_DOMAIN}");
                DEFAULT_CLUSTER_DOMAIN.to_string()
            }
        }
    }

    pub(crate) async fn resolve(
        &self,
        namespace: &str,
        backend: &BackendRef,
        domain: &str,
    ) -> Result<BackendAddress, ResolveError> {
        match backend {
            BackendRef::Service { name, port } => {
                self.resolve_service(namespace, name, port, domain).await
            }
            BackendRef::Resource { kind, name, .. } => {
                self.resolve_resource(namespace, kind, name, domain).await
            }
        }
    }

    async fn resolve_service(
        &self,
        namespace: &str,
        name: &str,
        port: &ServicePort,
        domain: &str,
    ) -> Result<BackendAddress, ResolveError> {
        if name.is_empty() {
            return Err(ResolveError::InvalidBackend(
                "service backend without a name".to_string(),
            ));
        }

        let port = match port {
            ServicePort::Number(0) | ServicePort::Unset => {
                return Err(ResolveError::InvalidBackend(format!(
                    "service {namespace}/{name} without a port"
                )))
            }
            ServicePort::Number(number) => *number,
            ServicePort::Name(port_name) => self
                .cluster
                .service_port_by_name(namespace, name, port_name)
                .await
                .map_err(|error| match error {
                    QueryError::PortNotFound { port, .. } => ResolveError::PortNotFound {
                        namespace: namespace.to_string(),
                        service: name.to_string(),
                        port,
                    },
                    source => ResolveError::ResourceUnavailable {
                        namespace: namespace.to_string(),
                        name: name.to_string(),
                        source,
                    },
                })?,
        };

        Ok(BackendAddress::service(name, namespace, domain, port))
    }

    /// Only a resource that turns out to be a Service can be routed to; its
    /// first declared port is used.
    async fn resolve_resource(
        &self,
        namespace: &str,
        kind: &str,
        name: &str,
        domain: &str,
    ) -> Result<BackendAddress, ResolveError> {
        let resource = self
            .cluster
            .get_resource(namespace, kind, name)
            .await
            .map_err(|error| match error {
                QueryError::UnsupportedKind(kind) => ResolveError::UnsupportedBackendType {
                    kind,
                    name: name.to_string(),
                },
                source => ResolveError::ResourceUnavailable {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    source,
                },
            })?;

        match resource {
            ClusterResource::Service { name, ports } => {
                let Some(first) = ports.first() else {
                    return Err(ResolveError::PortNotFound {
                        namespace: namespace.to_string(),
                        service: name,
                        port: "(any)".to_string(),
                    });
                };

                if ports.len() > 1 {
                    warn!(
                        service = %format!("{namespace}/{name}"),
                        port = first.port,
                        "Resource backend has several ports, using the first"
                    );
                } else {
                    debug!(service = %format!("{namespace}/{name}"), port = first.port, "Resource backend is a service");
                }

                Ok(BackendAddress::service(&name, namespace, domain, first.port))
            }
            ClusterResource::Opaque { kind, name } => Err(ResolveError::UnsupportedBackendType {
                kind: kind.to_string(),
                name,
            }),
        }
    }
}
