use std::str::FromStr;

use derive_more::Display;
use url::Url;

use crate::proxy::RouteProxy;

/// How a route's path is compared with the request path.
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum PathType {
    Exact,
    Prefix,
    /// Behaves like `Prefix`.
    #[default]
    ImplementationSpecific,
}

impl FromStr for PathType {
    type Err = std::convert::Infallible;

    /// Unknown and empty values fall back to `ImplementationSpecific`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "Exact" => Self::Exact,
            "Prefix" => Self::Prefix,
            _ => Self::ImplementationSpecific,
        })
    }
}

impl PathType {
    /// Prefix matching is a plain byte prefix: `/foo` matches `/foobar`.
    pub(crate) fn matches(&self, route_path: &str, request_path: &str) -> bool {
        match self {
            Self::Exact => request_path == route_path,
            Self::Prefix | Self::ImplementationSpecific => request_path.starts_with(route_path),
        }
    }
}

/// A fully resolved routing rule for one host.
#[derive(Debug, Display)]
#[display(fmt = "{} {} -> {}", path_type, path, backend)]
pub(crate) struct Route {
    pub(crate) path: String,
    pub(crate) path_type: PathType,
    pub(crate) backend: Url,
    pub(crate) proxy: RouteProxy,
}

impl Route {
    pub(crate) fn matches(&self, request_path: &str) -> bool {
        self.path_type.matches(&self.path, request_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_path_type() {
        assert_eq!(PathType::from_str("Exact").unwrap(), PathType::Exact);
        assert_eq!(PathType::from_str("Prefix").unwrap(), PathType::Prefix);
        assert_eq!(
            PathType::from_str("ImplementationSpecific").unwrap(),
            PathType::ImplementationSpecific
        );
        assert_eq!(
            PathType::from_str("").unwrap(),
            PathType::ImplementationSpecific
        );
        assert_eq!(
            PathType::from_str("exact").unwrap(),
            PathType::ImplementationSpecific
        );
    }

    #[test]
    fn exact_matches_only_equal_path() {
        assert!(PathType::Exact.matches("/foo", "/foo"));
        assert!(!PathType::Exact.matches("/foo", "/foo/bar"));
        assert!(!PathType::Exact.matches("/foo", "/fo"));
        assert!(!PathType::Exact.matches("/foo", "/foo/"));
    }

    #[test]
    fn prefix_matches() {
        assert!(PathType::Prefix.matches("/foo", "/foo"));
        assert!(PathType::Prefix.matches("/foo", "/foo/bar"));
        assert!(!PathType::Prefix.matches("/foo", "/fo"));
        assert!(!PathType::Prefix.matches("/foo", "/bar/foo"));
    }

    #[test]
    fn prefix_ignores_segment_boundaries() {
        assert!(PathType::Prefix.matches("/foo", "/foobar"));
        assert!(PathType::ImplementationSpecific.matches("/foo", "/foobar"));
    }

    #[test]
    fn empty_path_matches_everything() {
        assert!(PathType::Prefix.matches("", "/anything"));
        assert!(PathType::ImplementationSpecific.matches("", "/"));
        assert!(!PathType::Exact.matches("", "/"));
    }
}
