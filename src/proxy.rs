//! Outbound forwarding of matched requests.

mod headers;
mod transport;

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use bytes::Bytes;
use http::{
    header::{self, HeaderName, HeaderValue},
    uri::{Authority, Scheme},
    Request, Response, StatusCode, Uri,
};
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Body;
use tokio::time;
use tracing::{debug, warn};
use url::Url;

use crate::error::ProxyError;

pub(crate) use headers::HeaderPolicy;
pub(crate) use transport::{build_client, HttpClient, TransportConfig};

pub(crate) const PROXY_NAME: &str = "ingress-gateway";

static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
static X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
static X_PROXY_BY: HeaderName = HeaderName::from_static("x-proxy-by");

pub(crate) fn full<T: Into<Bytes>>(chunk: T) -> BoxBody<Bytes, hyper::Error> {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

/// Hands out route proxies that share one connection pool.
#[derive(Clone)]
pub(crate) struct ProxyFactory {
    client: HttpClient,
    policy: Arc<HeaderPolicy>,
    request_timeout: Duration,
}

impl ProxyFactory {
    pub(crate) fn new(
        transport: &TransportConfig,
        policy: HeaderPolicy,
    ) -> Result<Self, ProxyError> {
        Ok(Self {
            client: build_client(transport)?,
            policy: Arc::new(policy),
            request_timeout: transport.request_timeout(),
        })
    }

    pub(crate) fn proxy_for(&self, target: &Url) -> Result<RouteProxy, ProxyError> {
        let invalid = |reason: String| ProxyError::InvalidTarget {
            target: target.to_string(),
            reason,
        };

        let scheme = Scheme::from_str(target.scheme()).map_err(|e| invalid(e.to_string()))?;
        let host = target
            .host_str()
            .ok_or_else(|| invalid("missing host".to_string()))?;
        let port = target
            .port_or_known_default()
            .ok_or_else(|| invalid("missing port".to_string()))?;
        let authority =
            Authority::from_str(&format!("{host}:{port}")).map_err(|e| invalid(e.to_string()))?;

        Ok(RouteProxy {
            scheme,
            authority,
            client: self.client.clone(),
            policy: self.policy.clone(),
            request_timeout: self.request_timeout,
        })
    }
}

/// Forwards requests to a single backend.
#[derive(Clone)]
pub(crate) struct RouteProxy {
    scheme: Scheme,
    authority: Authority,
    client: HttpClient,
    policy: Arc<HeaderPolicy>,
    request_timeout: Duration,
}

impl fmt::Debug for RouteProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteProxy")
            .field("scheme", &self.scheme)
            .field("authority", &self.authority)
            .finish_non_exhaustive()
    }
}

impl RouteProxy {
    pub(crate) fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Rewrites `req` for the backend and relays the response.
    ///
    /// `host` is the inbound host as the client sent it, port included. It
    /// is kept as the outbound `Host` so virtual-hosted backends see the
    /// name the client asked for. Backend failures become
    /// `502 Bad Gateway`, or `504 Gateway Timeout` when no response arrives
    /// in time.
    pub(crate) async fn forward<B>(
        &self,
        req: Request<B>,
        host: &str,
    ) -> Response<BoxBody<Bytes, hyper::Error>>
    where
        B: Body<Data = Bytes, Error = hyper::Error> + Send + Sync + 'static,
    {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let mut response = match self.send(req, host).await {
            Ok(response) => response.map(|body| body.boxed()),
            Err(ProxyError::Timeout(after)) => {
                warn!(%method, %path, backend = %self.authority, ?after, "Backend timed out");
                status_response(StatusCode::GATEWAY_TIMEOUT)
            }
            Err(error) => {
                warn!(%method, %path, backend = %self.authority, %error, "Backend request failed");
                status_response(StatusCode::BAD_GATEWAY)
            }
        };

        debug!(%method, %path, backend = %self.authority, status = %response.status(), "Proxied");

        response
            .headers_mut()
            .insert(X_PROXY_BY.clone(), HeaderValue::from_static(PROXY_NAME));
        response
    }

    async fn send<B>(
        &self,
        req: Request<B>,
        host: &str,
    ) -> Result<Response<hyper::body::Incoming>, ProxyError>
    where
        B: Body<Data = Bytes, Error = hyper::Error> + Send + Sync + 'static,
    {
        let outbound = self.rewrite(req, host)?;

        match time::timeout(self.request_timeout, self.client.request(outbound)).await {
            Ok(response) => Ok(response?),
            Err(_) => Err(ProxyError::Timeout(self.request_timeout)),
        }
    }

    fn rewrite<B>(
        &self,
        req: Request<B>,
        host: &str,
    ) -> Result<Request<BoxBody<Bytes, hyper::Error>>, ProxyError>
    where
        B: Body<Data = Bytes, Error = hyper::Error> + Send + Sync + 'static,
    {
        let (parts, body) = req.into_parts();

        let mut uri = Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone());
        if let Some(path_and_query) = parts.uri.path_and_query() {
            uri = uri.path_and_query(path_and_query.clone());
        } else {
            uri = uri.path_and_query("/");
        }

        let authority = HeaderValue::from_str(self.authority.as_str()).map_err(http::Error::from)?;
        let scheme = HeaderValue::from_str(self.scheme.as_str()).map_err(http::Error::from)?;

        let mut headers = self.policy.forwardable(&parts.headers);
        match HeaderValue::from_str(host) {
            Ok(value) if !host.is_empty() => {
                headers.insert(header::HOST, value.clone());
                headers.insert(X_FORWARDED_HOST.clone(), value);
            }
            _ => {
                debug!(%host, "Inbound host unusable, addressing the backend directly");
                headers.insert(header::HOST, authority.clone());
            }
        }
        headers.insert(X_FORWARDED_PROTO.clone(), scheme);
        headers.insert(X_FORWARDED_FOR.clone(), authority);
        headers.insert(X_PROXY_BY.clone(), HeaderValue::from_static(PROXY_NAME));

        let mut outbound = Request::builder()
            .method(parts.method)
            .uri(uri.build()?)
            .body(body.boxed())?;
        *outbound.headers_mut() = headers;

        Ok(outbound)
    }
}

fn status_response(status: StatusCode) -> Response<BoxBody<Bytes, hyper::Error>> {
    let mut response = Response::new(full(format!(
        "{PROXY_NAME}: {}\n",
        status.canonical_reason().unwrap_or("error")
    )));
    *response.status_mut() = status;
    response
}
