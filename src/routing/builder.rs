use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{BackendResolver, Route, RouteMap};
use crate::{
    config::EmptyClassPolicy,
    ingress::{IngressPath, IngressSpec},
    proxy::ProxyFactory,
};

/// Selects the ingresses this instance is responsible for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ClassFilter {
    class: String,
    empty: EmptyClassPolicy,
}

impl ClassFilter {
    pub(crate) fn new(class: impl Into<String>, empty: EmptyClassPolicy) -> Self {
        Self {
            class: class.into(),
            empty,
        }
    }

    /// An empty configured class defers to the policy. Otherwise only
    /// objects declaring exactly that class are admitted.
    pub(crate) fn admits(&self, class: Option<&str>) -> bool {
        if self.class.is_empty() {
            return self.empty == EmptyClassPolicy::MatchAll;
        }

        class == Some(self.class.as_str())
    }
}

/// Turns a listing of ingresses into a complete route map.
#[derive(Clone)]
pub(crate) struct RouteBuilder {
    resolver: BackendResolver,
    proxies: ProxyFactory,
}

impl RouteBuilder {
    pub(crate) fn new(resolver: BackendResolver, proxies: ProxyFactory) -> Self {
        Self { resolver, proxies }
    }

    /// Entries that cannot be resolved are logged and skipped; building
    /// itself never fails.
    pub(crate) async fn build(&self, ingresses: &[IngressSpec], filter: &ClassFilter) -> RouteMap {
        let domain = self.resolver.cluster_domain().await;
        let mut routes = RouteMap::new();

        for ingress in ingresses {
            if !filter.admits(ingress.class.as_deref()) {
                debug!(ingress = %ingress.id(), class = ?ingress.class, "Skipping ingress of another class");
                continue;
            }
            if ingress.rules.is_empty() {
                debug!(ingress = %ingress.id(), "Skipping ingress without rules");
                continue;
            }

            for rule in &ingress.rules {
                if rule.host.is_empty() {
                    debug!(ingress = %ingress.id(), "Skipping rule without host");
                    continue;
                }
                let Some(paths) = &rule.paths else {
                    debug!(ingress = %ingress.id(), host = %rule.host, "Skipping rule without http paths");
                    continue;
                };

                for entry in paths {
                    if let Some(route) = self.route(ingress, entry, &domain).await {
                        routes
                            .entry(rule.host.to_ascii_lowercase())
                            .or_default()
                            .push(Arc::new(route));
                    }
                }
            }
        }

        for host_routes in routes.values_mut() {
            // Stable, so equal lengths keep declaration order.
            host_routes.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
        }

        info!(
            hosts = routes.len(),
            routes = routes.values().map(Vec::len).sum::<usize>(),
            "Built routing table"
        );

        routes
    }

    async fn route(&self, ingress: &IngressSpec, entry: &IngressPath, domain: &str) -> Option<Route> {
        let Some(backend) = &entry.backend else {
            debug!(ingress = %ingress.id(), path = %entry.path, "Skipping path without backend");
            return None;
        };

        let address = match self.resolver.resolve(&ingress.namespace, backend, domain).await {
            Ok(address) => address,
            Err(error) => {
                warn!(ingress = %ingress.id(), path = %entry.path, %error, "Skipping unresolvable backend");
                return None;
            }
        };

        let built = address
            .url()
            .map_err(|error| error.to_string())
            .and_then(|url| {
                let proxy = self.proxies.proxy_for(&url).map_err(|error| error.to_string())?;
                Ok((url, proxy))
            });

        match built {
            Ok((backend, proxy)) => Some(Route {
                path: entry.path.clone(),
                path_type: entry.path_type,
                backend,
                proxy,
            }),
            Err(error) => {
                warn!(ingress = %ingress.id(), path = %entry.path, %address, %error, "Skipping backend without a usable address");
                None
            }
        }
    }
}
