use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use itertools::Itertools;

use super::Route;

/// Routes per lower-cased host, each list ordered longest path first.
pub(crate) type RouteMap = HashMap<String, Vec<Arc<Route>>>;

/// Host/path lookup shared by every request handler.
///
/// Readers take a snapshot of the current map and never observe a
/// half-built table. Writers replace the map wholesale; the lock is held
/// only for the pointer replacement.
#[derive(Default)]
pub(crate) struct RoutingTable {
    current: RwLock<Arc<RouteMap>>,
}

impl RoutingTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Arc<RouteMap> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Publishes a freshly built map.
    pub(crate) fn swap(&self, routes: RouteMap) {
        let routes = Arc::new(routes);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = routes;
    }

    /// First route of `host` matching `path`. The host may carry a port.
    pub(crate) fn match_route(&self, host: &str, path: &str) -> Option<Arc<Route>> {
        let host = strip_port(host).to_ascii_lowercase();

        self.snapshot()
            .get(&host)?
            .iter()
            .find(|route| route.matches(path))
            .cloned()
    }

    pub(crate) fn host_count(&self) -> usize {
        self.snapshot().len()
    }
}

/// Per-host access for introspection and tests; the request path only
/// uses [`RoutingTable::match_route`].
#[cfg_attr(not(test), allow(dead_code))]
impl RoutingTable {
    /// Copy-on-write edit of the current map.
    fn update(&self, edit: impl FnOnce(&mut RouteMap)) {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = RouteMap::clone(&current);
        edit(&mut next);
        *current = Arc::new(next);
    }

    pub(crate) fn get_routes(&self, host: &str) -> Option<Vec<Arc<Route>>> {
        self.snapshot().get(&host.to_ascii_lowercase()).cloned()
    }

    /// Replaces the routes of one host, keeping them ordered longest path first.
    pub(crate) fn set_routes(&self, host: &str, mut routes: Vec<Arc<Route>>) {
        routes.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
        let host = host.to_ascii_lowercase();

        self.update(move |map| {
            map.insert(host, routes);
        });
    }

    pub(crate) fn delete_routes(&self, host: &str) {
        let host = host.to_ascii_lowercase();

        self.update(|map| {
            map.remove(&host);
        });
    }

    /// An independent copy; later changes to the table do not affect it.
    pub(crate) fn list_all(&self) -> RouteMap {
        RouteMap::clone(&self.snapshot())
    }

    pub(crate) fn clear(&self) {
        self.swap(RouteMap::new());
    }
}

impl fmt::Display for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();

        for (host, routes) in snapshot.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
            writeln!(f, "{host}")?;
            for route in routes {
                writeln!(f, "  {route}")?;
            }
        }

        Ok(())
    }
}

/// Drops a trailing `:port`, leaving bracketed IPv6 literals intact.
pub(crate) fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return match rest.find(']') {
            Some(end) => &host[..end + 2],
            None => host,
        };
    }

    match host.split_once(':') {
        Some((name, _)) if !name.is_empty() => name,
        _ => host,
    }
}
