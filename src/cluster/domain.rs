use serde::Deserialize;

pub(crate) const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";

pub(crate) const KUBELET_CONFIG_NAMESPACE: &str = "kube-system";
pub(crate) const KUBELET_CONFIG_NAME: &str = "kubelet-config";
pub(crate) const KUBELET_CONFIG_KEY: &str = "kubelet";

/// Longest DNS name allowed by RFC 1035.
const MAX_DOMAIN_LEN: usize = 253;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct KubeletConfiguration {
    cluster_domain: Option<String>,
}

/// Extracts `clusterDomain` from a serialized kubelet configuration.
///
/// Returns `None` for unparsable documents and for values that cannot be a
/// domain name, so callers can fall back to [`DEFAULT_CLUSTER_DOMAIN`].
pub(crate) fn parse_cluster_domain(kubelet: &str) -> Option<String> {
    let config: KubeletConfiguration = serde_yaml::from_str(kubelet).ok()?;
    let domain = config.cluster_domain?;
    let domain = domain.trim().trim_end_matches('.');

    if domain.is_empty()
        || domain.len() > MAX_DOMAIN_LEN
        || domain.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return None;
    }

    Some(domain.to_string())
}
