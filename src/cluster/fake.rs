use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;

use super::{ClusterQuery, ClusterResource, IngressSource, NamedPort, ResourceKind};
use crate::{error::QueryError, ingress::IngressSpec};

/// In-memory cluster for tests.
#[derive(Default)]
pub(crate) struct FakeCluster {
    resources: HashMap<(String, ResourceKind, String), ClusterResource>,
    domain: Option<String>,
    domain_unavailable: bool,
    domain_queries: AtomicUsize,
}

impl FakeCluster {
    pub(crate) fn with_service(mut self, namespace: &str, name: &str, ports: &[(&str, u16)]) -> Self {
        let ports = ports
            .iter()
            .map(|(port_name, port)| NamedPort {
                name: Some(port_name.to_string()).filter(|n| !n.is_empty()),
                port: *port,
            })
            .collect();

        self.resources.insert(
            (namespace.to_string(), ResourceKind::Service, name.to_string()),
            ClusterResource::Service {
                name: name.to_string(),
                ports,
            },
        );
        self
    }

    pub(crate) fn with_opaque(mut self, namespace: &str, kind: ResourceKind, name: &str) -> Self {
        self.resources.insert(
            (namespace.to_string(), kind, name.to_string()),
            ClusterResource::Opaque {
                kind,
                name: name.to_string(),
            },
        );
        self
    }

    pub(crate) fn with_domain(mut self, domain: &str) -> Self {
        self.domain = Some(domain.to_string());
        self
    }

    pub(crate) fn with_domain_unavailable(mut self) -> Self {
        self.domain_unavailable = true;
        self
    }

    pub(crate) fn domain_queries(&self) -> usize {
        self.domain_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterQuery for FakeCluster {
    async fn get_resource(
        &self,
        namespace: &str,
        kind: &str,
        name: &str,
    ) -> Result<ClusterResource, QueryError> {
        let parsed =
            ResourceKind::parse(kind).ok_or_else(|| QueryError::UnsupportedKind(kind.to_string()))?;

        self.resources
            .get(&(namespace.to_string(), parsed, name.to_string()))
            .cloned()
            .ok_or_else(|| QueryError::NotFound {
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    async fn service_port_by_name(
        &self,
        namespace: &str,
        service: &str,
        port_name: &str,
    ) -> Result<u16, QueryError> {
        match self.get_resource(namespace, "Service", service).await? {
            ClusterResource::Service { ports, .. } => ports
                .into_iter()
                .find(|port| port.name.as_deref() == Some(port_name))
                .map(|port| port.port)
                .ok_or_else(|| QueryError::PortNotFound {
                    namespace: namespace.to_string(),
                    service: service.to_string(),
                    port: port_name.to_string(),
                }),
            ClusterResource::Opaque { .. } => unreachable!("services are stored as services"),
        }
    }

    async fn cluster_domain(&self) -> Result<String, QueryError> {
        self.domain_queries.fetch_add(1, Ordering::SeqCst);

        if self.domain_unavailable {
            return Err(QueryError::Timeout(Duration::from_secs(10)));
        }

        Ok(self
            .domain
            .clone()
            .unwrap_or_else(|| super::DEFAULT_CLUSTER_DOMAIN.to_string()))
    }
}

/// Ingress listing that can be swapped or made to fail between passes.
#[derive(Default)]
pub(crate) struct FakeIngresses {
    listing: Mutex<Option<Vec<IngressSpec>>>,
    lists: AtomicUsize,
}

impl FakeIngresses {
    pub(crate) fn new(ingresses: Vec<IngressSpec>) -> Self {
        Self {
            listing: Mutex::new(Some(ingresses)),
            lists: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set(&self, ingresses: Vec<IngressSpec>) {
        *self.listing.lock().unwrap_or_else(PoisonError::into_inner) = Some(ingresses);
    }

    pub(crate) fn fail(&self) {
        *self.listing.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub(crate) fn lists(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IngressSource for FakeIngresses {
    async fn list(&self) -> Result<Vec<IngressSpec>, QueryError> {
        self.lists.fetch_add(1, Ordering::SeqCst);

        self.listing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(QueryError::Timeout(Duration::from_secs(10)))
    }
}
