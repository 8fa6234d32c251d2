//! Inbound HTTP listener and per-request dispatch.

use std::{convert::Infallible, future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use http::{header, StatusCode};
use http_body_util::combinators::BoxBody;
use hyper::{body::Body, service::service_fn, Request, Response};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
};
use tokio::{net::TcpListener, time};
use tracing::{debug, info, warn};

use crate::{
    proxy::{full, PROXY_NAME},
    routing::{strip_port, RoutingTable},
};

/// Pause after a failed accept, typically descriptor exhaustion.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub(crate) struct HttpServer {
    listener: TcpListener,
    table: Arc<RoutingTable>,
}

impl HttpServer {
    pub(crate) async fn bind(addr: SocketAddr, table: Arc<RoutingTable>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;

        Ok(Self { listener, table })
    }

    pub(crate) fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` completes. Connections already
    /// accepted keep being served by their own tasks.
    pub(crate) async fn run(self, shutdown: impl Future<Output = ()>) -> io::Result<()> {
        tokio::pin!(shutdown);

        info!(
            addr = %self.local_addr()?,
            hosts = self.table.host_count(),
            "Listening for HTTP"
        );

        loop {
            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => {
                    info!("HTTP listener stopped");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(error) => {
                        accept_failed(&error).await;
                        continue;
                    }
                },
            };

            let io = TokioIo::new(stream);
            let table = self.table.clone();

            let service = service_fn(move |req| {
                let table = table.clone();

                async move { Ok::<_, Infallible>(dispatch(req, &table).await) }
            });

            tokio::spawn(async move {
                let builder = auto::Builder::new(TokioExecutor::new());

                if let Err(error) = builder.serve_connection(io, service).await {
                    debug!(%peer, %error, "Error serving connection");
                }
            });
        }
    }
}

async fn accept_failed(error: &io::Error) {
    warn!(%error, "Failed to accept connection");
    time::sleep(ACCEPT_BACKOFF).await;
}

/// Routes one request by host and path, forwarding it or answering 404.
pub(crate) async fn dispatch<B>(
    req: Request<B>,
    table: &RoutingTable,
) -> Response<BoxBody<Bytes, hyper::Error>>
where
    B: Body<Data = Bytes, Error = hyper::Error> + Send + Sync + 'static,
{
    // HTTP/2 requests carry the host in the URI rather than a header.
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| req.uri().authority().map(|authority| authority.as_str()))
        .unwrap_or_default()
        .to_string();

    match table.match_route(strip_port(&host), req.uri().path()) {
        Some(route) => route.proxy.forward(req, &host).await,
        None => {
            debug!(%host, path = req.uri().path(), "No route");
            not_found()
        }
    }
}

fn not_found() -> Response<BoxBody<Bytes, hyper::Error>> {
    let mut response = Response::new(full(format!("{PROXY_NAME}: no route found\n")));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}
