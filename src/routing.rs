//! Host and path routing built from Ingress objects.

mod builder;
mod resolver;
mod route;
mod table;

pub(crate) use builder::{ClassFilter, RouteBuilder};
pub(crate) use resolver::BackendResolver;
pub(crate) use route::{PathType, Route};
pub(crate) use table::{strip_port, RouteMap, RoutingTable};
