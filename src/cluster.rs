//! Queries against the cluster API, behind traits so routing can be tested
//! without a cluster.

mod client;
mod domain;
#[cfg(test)]
pub(crate) mod fake;
mod watch;

use async_trait::async_trait;
use derive_more::Display;

use crate::{error::QueryError, ingress::IngressSpec};

pub(crate) use client::{KubeCluster, KubeIngresses};
pub(crate) use domain::DEFAULT_CLUSTER_DOMAIN;
pub(crate) use watch::IngressWatch;

/// Resource kinds the cluster client knows how to fetch.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ResourceKind {
    Pod,
    Service,
    Deployment,
    Ingress,
    ConfigMap,
    Secret,
    StatefulSet,
    DaemonSet,
    Job,
    CronJob,
}

impl ResourceKind {
    /// Case-insensitive, accepts singular and plural forms.
    pub(crate) fn parse(kind: &str) -> Option<Self> {
        let kind = kind.to_ascii_lowercase();
        let kind = match kind.as_str() {
            "ingress" | "ingresses" => "ingress",
            plural => plural.strip_suffix('s').unwrap_or(plural),
        };

        match kind {
            "pod" => Some(Self::Pod),
            "service" => Some(Self::Service),
            "deployment" => Some(Self::Deployment),
            "ingress" => Some(Self::Ingress),
            "configmap" => Some(Self::ConfigMap),
            "secret" => Some(Self::Secret),
            "statefulset" => Some(Self::StatefulSet),
            "daemonset" => Some(Self::DaemonSet),
            "job" => Some(Self::Job),
            "cronjob" => Some(Self::CronJob),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NamedPort {
    pub(crate) name: Option<String>,
    pub(crate) port: u16,
}

/// A fetched resource, reduced to what backend resolution needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ClusterResource {
    Service { name: String, ports: Vec<NamedPort> },
    /// Exists, but carries nothing that can be routed to.
    Opaque { kind: ResourceKind, name: String },
}

#[async_trait]
pub(crate) trait ClusterQuery: Send + Sync {
    async fn get_resource(
        &self,
        namespace: &str,
        kind: &str,
        name: &str,
    ) -> Result<ClusterResource, QueryError>;

    async fn service_port_by_name(
        &self,
        namespace: &str,
        service: &str,
        port_name: &str,
    ) -> Result<u16, QueryError>;

    /// The DNS suffix for service names, falling back to
    /// [`DEFAULT_CLUSTER_DOMAIN`] when the cluster does not advertise one.
    async fn cluster_domain(&self) -> Result<String, QueryError>;
}

#[async_trait]
pub(crate) trait IngressSource: Send + Sync {
    async fn list(&self) -> Result<Vec<IngressSpec>, QueryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_kind_singular_and_plural() {
        assert_eq!(ResourceKind::parse("Service"), Some(ResourceKind::Service));
        assert_eq!(ResourceKind::parse("services"), Some(ResourceKind::Service));
        assert_eq!(ResourceKind::parse("POD"), Some(ResourceKind::Pod));
        assert_eq!(ResourceKind::parse("Ingresses"), Some(ResourceKind::Ingress));
        assert_eq!(ResourceKind::parse("ingress"), Some(ResourceKind::Ingress));
        assert_eq!(ResourceKind::parse("ConfigMaps"), Some(ResourceKind::ConfigMap));
        assert_eq!(ResourceKind::parse("cronjob"), Some(ResourceKind::CronJob));
        assert_eq!(ResourceKind::parse("DaemonSets"), Some(ResourceKind::DaemonSet));
    }

    #[test]
    fn parse_kind_ending_in_s() {
        assert_eq!(ResourceKind::parse("Ingress"), Some(ResourceKind::Ingress));
        assert_eq!(ResourceKind::parse("INGRESS"), Some(ResourceKind::Ingress));
        assert_eq!(ResourceKind::parse("ingresss"), None);
    }

    #[test]
    fn parse_kind_unsupported() {
        assert_eq!(ResourceKind::parse("StorageBucket"), None);
        assert_eq!(ResourceKind::parse(""), None);
        assert_eq!(ResourceKind::parse("s"), None);
    }
}
