use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

/// Failure of a single call against the cluster API.
#[derive(Error, Debug)]
pub(crate) enum QueryError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("service {namespace}/{service} has no port named {port}")]
    PortNotFound {
        namespace: String,
        service: String,
        port: String,
    },

    #[error("unsupported resource kind: {0}")]
    UnsupportedKind(String),

    #[error("cluster query timed out after {0:?}")]
    Timeout(Duration),

    #[error("cluster API error: {0}")]
    Api(#[from] kube::Error),
}

/// Reasons a path entry's backend could not be turned into an address.
///
/// None of these abort a reconciliation pass; the entry is skipped.
#[derive(Error, Debug)]
pub(crate) enum ResolveError {
    #[error("service {namespace}/{service} has no port {port}")]
    PortNotFound {
        namespace: String,
        service: String,
        port: String,
    },

    #[error("backend {namespace}/{name} unavailable: {source}")]
    ResourceUnavailable {
        namespace: String,
        name: String,
        #[source]
        source: QueryError,
    },

    #[error("{kind} {name} cannot be used as a backend")]
    UnsupportedBackendType { kind: String, name: String },

    #[error("invalid backend: {0}")]
    InvalidBackend(String),
}

#[derive(Error, Debug)]
pub(crate) enum ProxyError {
    #[error("invalid proxy target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("failed to build TLS client config: {0}")]
    Tls(#[from] rustls::Error),

    #[error("failed to read CA bundle {path}: {source}")]
    CaBundle {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("backend certificate verification enabled without a CA bundle")]
    MissingCaBundle,

    #[error("failed to build outbound request: {0}")]
    Request(#[from] http::Error),

    #[error("backend request failed: {0}")]
    Backend(#[from] hyper_util::client::legacy::Error),

    #[error("backend did not respond within {0:?}")]
    Timeout(Duration),
}

#[derive(Error, Debug)]
pub(crate) enum ReconcileError {
    #[error("failed to list ingresses: {0}")]
    List(#[from] QueryError),

    #[error("reconciliation pass exceeded {0:?}")]
    Timeout(Duration),

    #[error("ingress cache did not sync: {0}")]
    CacheSync(String),
}
