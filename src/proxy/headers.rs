use http::{header, HeaderMap, HeaderName, HeaderValue};
use regex::Regex;
use tracing::debug;

/// Control characters, markup and grouping punctuation, backslashes and
/// runs of whitespace. `%` and `^` are allowed since percent-encoded values
/// are common in cookies and tokens.
pub(crate) const DEFAULT_UNSAFE_HEADER_PATTERN: &str = r#"[\x00-\x1f\x7f<>\[\]()\\]|\s{2,}"#;

/// Headers meaningful only for a single transport-level connection.
pub(crate) fn is_hop_by_hop_header(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Decides which inbound headers reach a backend.
#[derive(Debug, Clone)]
pub(crate) struct HeaderPolicy {
    unsafe_values: Regex,
}

impl HeaderPolicy {
    pub(crate) fn new(unsafe_values: Regex) -> Self {
        Self { unsafe_values }
    }

    pub(crate) fn with_default_pattern() -> Result<Self, regex::Error> {
        Ok(Self::new(Regex::new(DEFAULT_UNSAFE_HEADER_PATTERN)?))
    }

    fn is_safe(&self, value: &HeaderValue) -> bool {
        value
            .to_str()
            .map(|value| !self.unsafe_values.is_match(value))
            .unwrap_or(false)
    }

    /// Copies forwardable headers.
    ///
    /// A header is dropped as a whole when any of its values is unsafe or
    /// not valid UTF-8. `Host` is never copied.
    pub(crate) fn forwardable(&self, inbound: &HeaderMap) -> HeaderMap {
        let mut outbound = HeaderMap::with_capacity(inbound.keys_len());

        for name in inbound.keys() {
            if name == header::HOST || is_hop_by_hop_header(name) {
                continue;
            }

            let values = inbound.get_all(name);
            if !values.iter().all(|value| self.is_safe(value)) {
                debug!(header = %name, "Dropping header with unsafe value");
                continue;
            }

            for value in values {
                outbound.append(name.clone(), value.clone());
            }
        }

        outbound
    }
}
