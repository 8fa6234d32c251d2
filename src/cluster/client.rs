use std::{fmt::Debug, future::Future, time::Duration};

use async_trait::async_trait;
use k8s_openapi::{
    api::{
        apps::v1::{DaemonSet, Deployment, StatefulSet},
        batch::v1::{CronJob, Job},
        core::v1::{ConfigMap, Pod, Secret, Service},
        networking::v1::Ingress,
    },
    NamespaceResourceScope,
};
use kube::{api::ListParams, Api, Client, Resource};
use serde::de::DeserializeOwned;
use tokio::time;
use tracing::{debug, warn};

use super::{
    domain::{
        parse_cluster_domain, DEFAULT_CLUSTER_DOMAIN, KUBELET_CONFIG_KEY, KUBELET_CONFIG_NAME,
        KUBELET_CONFIG_NAMESPACE,
    },
    ClusterQuery, ClusterResource, IngressSource, NamedPort, ResourceKind,
};
use crate::{error::QueryError, ingress::IngressSpec};

/// Answers resolver queries straight from the API server.
///
/// Every call is bounded by the configured timeout.
#[derive(Clone)]
pub(crate) struct KubeCluster {
    client: Client,
    timeout: Duration,
}

impl KubeCluster {
    pub(crate) fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn get<K>(&self, namespace: &str, name: &str) -> Result<K, QueryError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);

        bounded(self.timeout, api.get(name))
            .await
            .map_err(|error| match error {
                QueryError::Api(kube::Error::Api(response)) if response.code == 404 => {
                    QueryError::NotFound {
                        kind: K::kind(&Default::default()).to_string(),
                        namespace: namespace.to_string(),
                        name: name.to_string(),
                    }
                }
                other => other,
            })
    }

    /// Confirms the object exists; its contents are irrelevant to routing.
    async fn opaque<K>(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<ClusterResource, QueryError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        self.get::<K>(namespace, name).await?;

        Ok(ClusterResource::Opaque {
            kind,
            name: name.to_string(),
        })
    }
}

#[async_trait]
impl ClusterQuery for KubeCluster {
    async fn get_resource(
        &self,
        namespace: &str,
        kind: &str,
        name: &str,
    ) -> Result<ClusterResource, QueryError> {
        let kind = ResourceKind::parse(kind)
            .ok_or_else(|| QueryError::UnsupportedKind(kind.to_string()))?;

        debug!(%kind, %namespace, %name, "Fetching backend resource");

        match kind {
            ResourceKind::Service => {
                let service = self.get::<Service>(namespace, name).await?;
                Ok(ClusterResource::Service {
                    name: name.to_string(),
                    ports: service_ports(&service),
                })
            }
            ResourceKind::Pod => self.opaque::<Pod>(kind, namespace, name).await,
            ResourceKind::Deployment => self.opaque::<Deployment>(kind, namespace, name).await,
            ResourceKind::Ingress => self.opaque::<Ingress>(kind, namespace, name).await,
            ResourceKind::ConfigMap => self.opaque::<ConfigMap>(kind, namespace, name).await,
            ResourceKind::Secret => self.opaque::<Secret>(kind, namespace, name).await,
            ResourceKind::StatefulSet => self.opaque::<StatefulSet>(kind, namespace, name).await,
            ResourceKind::DaemonSet => self.opaque::<DaemonSet>(kind, namespace, name).await,
            ResourceKind::Job => self.opaque::<Job>(kind, namespace, name).await,
            ResourceKind::CronJob => self.opaque::<CronJob>(kind, namespace, name).await,
        }
    }

    async fn service_port_by_name(
        &self,
        namespace: &str,
        service: &str,
        port_name: &str,
    ) -> Result<u16, QueryError> {
        let object = self.get::<Service>(namespace, service).await?;

        service_ports(&object)
            .into_iter()
            .find(|port| port.name.as_deref() == Some(port_name))
            .map(|port| port.port)
            .ok_or_else(|| QueryError::PortNotFound {
                namespace: namespace.to_string(),
                service: service.to_string(),
                port: port_name.to_string(),
            })
    }

    async fn cluster_domain(&self) -> Result<String, QueryError> {
        let config_map = match self
            .get::<ConfigMap>(KUBELET_CONFIG_NAMESPACE, KUBELET_CONFIG_NAME)
            .await
        {
            Ok(config_map) => config_map,
            Err(QueryError::NotFound { .. }) => {
                debug!("No kubelet config published, using {DEFAULT_CLUSTER_DOMAIN}");
                return Ok(DEFAULT_CLUSTER_DOMAIN.to_string());
            }
            Err(error) => return Err(error),
        };

        let domain = config_map
            .data
            .as_ref()
            .and_then(|data| data.get(KUBELET_CONFIG_KEY))
            .and_then(|kubelet| parse_cluster_domain(kubelet));

        Ok(domain.unwrap_or_else(|| {
            warn!("Kubelet config has no usable clusterDomain, using {DEFAULT_CLUSTER_DOMAIN}");
            DEFAULT_CLUSTER_DOMAIN.to_string()
        }))
    }
}

/// Lists Ingress objects in one namespace or cluster-wide.
#[derive(Clone)]
pub(crate) struct KubeIngresses {
    api: Api<Ingress>,
    timeout: Duration,
}

impl KubeIngresses {
    pub(crate) fn new(client: Client, namespace: Option<&str>, timeout: Duration) -> Self {
        let api = match namespace {
            Some(namespace) => Api::namespaced(client, namespace),
            None => Api::all(client),
        };

        Self { api, timeout }
    }

    pub(crate) fn api(&self) -> Api<Ingress> {
        self.api.clone()
    }
}

#[async_trait]
impl IngressSource for KubeIngresses {
    async fn list(&self) -> Result<Vec<IngressSpec>, QueryError> {
        let list = bounded(self.timeout, self.api.list(&ListParams::default())).await?;

        Ok(list.items.iter().map(IngressSpec::from).collect())
    }
}

async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, QueryError>
where
    F: Future<Output = Result<T, kube::Error>>,
{
    match time::timeout(timeout, call).await {
        Ok(result) => result.map_err(QueryError::from),
        Err(_) => Err(QueryError::Timeout(timeout)),
    }
}

fn service_ports(service: &Service) -> Vec<NamedPort> {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .map(|ports| {
            ports
                .iter()
                .filter_map(|port| {
                    Some(NamedPort {
                        name: port.name.clone(),
                        port: u16::try_from(port.port).ok()?,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};

    use super::*;

    #[test]
    fn ports_keep_declaration_order() {
        let service = Service {
            spec: Some(ServiceSpec {
                ports: Some(vec![
                    ServicePort {
                        name: Some("http".to_string()),
                        port: 80,
                        ..Default::default()
                    },
                    ServicePort {
                        name: Some("metrics".to_string()),
                        port: 9090,
                        ..Default::default()
                    },
                    ServicePort {
                        port: -1,
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert_eq!(
            service_ports(&service),
            vec![
                NamedPort {
                    name: Some("http".to_string()),
                    port: 80,
                },
                NamedPort {
                    name: Some("metrics".to_string()),
                    port: 9090,
                },
            ]
        );
    }

    #[test]
    fn service_without_spec_has_no_ports() {
        assert!(service_ports(&Service::default()).is_empty());
    }

    #[tokio::test]
    async fn bounded_call_times_out() {
        let result: Result<(), QueryError> = bounded(
            Duration::from_millis(10),
            futures::future::pending::<Result<(), kube::Error>>(),
        )
        .await;

        assert!(matches!(result, Err(QueryError::Timeout(_))));
    }
}
