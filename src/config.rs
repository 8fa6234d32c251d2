use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::Context;
use duration_string::DurationString;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{cli::Args, proxy::TransportConfig};

pub(crate) const DEFAULT_INGRESS_CLASS: &str = "ingress-gateway";

/// What an empty ingress class filter selects.
#[derive(Deserialize, Serialize, Debug, Default, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum EmptyClassPolicy {
    #[default]
    MatchNone,
    MatchAll,
}

#[derive(Deserialize, Serialize, Debug, Default, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case", default)]
pub(crate) struct Config {
    pub(crate) ingress_class: String,
    pub(crate) empty_class_policy: EmptyClassPolicy,
    pub(crate) listen: SocketAddr,
    pub(crate) kubeconfig: Option<PathBuf>,
    /// Watch a single namespace; all namespaces when unset.
    pub(crate) namespace: Option<String>,
    /// Zero disables the periodic resync.
    pub(crate) resync_period: DurationString,
    pub(crate) query_timeout: DurationString,
    pub(crate) pass_timeout: DurationString,
    pub(crate) sync_timeout: DurationString,
    pub(crate) verbosity: u8,
    pub(crate) log_format: LogFormat,
    /// Inbound header values matching this are never forwarded.
    #[serde(with = "serde_regex")]
    pub(crate) unsafe_header_pattern: Option<Regex>,
    pub(crate) transport: TransportConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ingress_class: DEFAULT_INGRESS_CLASS.to_string(),
            empty_class_policy: EmptyClassPolicy::default(),
            listen: SocketAddr::from(([0, 0, 0, 0], 80)),
            kubeconfig: None,
            namespace: None,
            resync_period: DurationString::from(Duration::from_secs(30)),
            query_timeout: DurationString::from(Duration::from_secs(10)),
            pass_timeout: DurationString::from(Duration::from_secs(60)),
            sync_timeout: DurationString::from(Duration::from_secs(120)),
            verbosity: 0,
            log_format: LogFormat::default(),
            unsafe_header_pattern: None,
            transport: TransportConfig::default(),
        }
    }
}

impl Config {
    /// Reads the optional config file, then applies command line and
    /// environment overrides on top of it.
    pub(crate) fn load(args: &Args) -> anyhow::Result<Self> {
        let mut config = match &args.config {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                Self::from_yaml(&contents)
                    .with_context(|| format!("failed to parse config file {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply(args);
        Ok(config)
    }

    pub(crate) fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(contents)
    }

    fn apply(&mut self, args: &Args) {
        if let Some(class) = &args.ingress_class {
            self.ingress_class = class.clone();
        }
        if let Some(policy) = args.empty_class_policy {
            self.empty_class_policy = policy;
        }
        if let Some(listen) = args.listen {
            self.listen = listen;
        }
        if let Some(kubeconfig) = &args.kubeconfig {
            self.kubeconfig = Some(kubeconfig.clone());
        }
        if let Some(namespace) = &args.namespace {
            self.namespace = Some(namespace.clone());
        }
        if let Some(period) = args.resync_period {
            self.resync_period = period;
        }
        if let Some(verbosity) = args.verbosity {
            self.verbosity = verbosity;
        }
        if let Some(format) = args.log_format {
            self.log_format = format;
        }
        if self.namespace.as_deref().is_some_and(str::is_empty) {
            self.namespace = None;
        }
    }

    pub(crate) fn resync_period(&self) -> Option<Duration> {
        Some(Duration::from(self.resync_period)).filter(|period| !period.is_zero())
    }

    pub(crate) fn query_timeout(&self) -> Duration {
        self.query_timeout.into()
    }

    pub(crate) fn pass_timeout(&self) -> Duration {
        self.pass_timeout.into()
    }

    pub(crate) fn sync_timeout(&self) -> Duration {
        self.sync_timeout.into()
    }

    /// Default directive for the log filter when `RUST_LOG` is unset.
    pub(crate) fn log_level(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
