use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use duration_string::DurationString;

use crate::config::{EmptyClassPolicy, LogFormat};

/// Kubernetes Ingress controller with an in-process reverse proxy.
///
/// Every flag overrides the matching key of the config file.
#[derive(Parser, Debug)]
#[command(version, about)]
pub(crate) struct Args {
    /// YAML config file
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    pub(crate) config: Option<PathBuf>,

    /// Ingress class this instance serves
    #[arg(long, env = "INGRESS_CLASS")]
    pub(crate) ingress_class: Option<String>,

    /// What an empty ingress class selects: no ingresses or all of them
    #[arg(long, env = "EMPTY_CLASS_POLICY", value_enum)]
    pub(crate) empty_class_policy: Option<EmptyClassPolicy>,

    /// Address the proxy listens on
    #[arg(short, long, env = "LISTEN_ADDR")]
    pub(crate) listen: Option<SocketAddr>,

    /// Path to a kubeconfig; in-cluster config or the default kubeconfig otherwise
    #[arg(long, env = "KUBECONFIG")]
    pub(crate) kubeconfig: Option<PathBuf>,

    /// Namespace to watch, empty for all
    #[arg(short, long, env = "WATCH_NAMESPACE")]
    pub(crate) namespace: Option<String>,

    /// Periodic full resync, e.g. 30s; 0s disables it
    #[arg(long, env = "RESYNC_PERIOD", value_parser = parse_duration)]
    pub(crate) resync_period: Option<DurationString>,

    /// 0 = info, 1 = debug, 2 or more = trace
    #[arg(short, long, env = "VERBOSITY")]
    pub(crate) verbosity: Option<u8>,

    #[arg(long, env = "LOG_FORMAT", value_enum)]
    pub(crate) log_format: Option<LogFormat>,
}

fn parse_duration(value: &str) -> Result<DurationString, String> {
    value.parse().map_err(|error| format!("invalid duration {value:?}: {error}"))
}
