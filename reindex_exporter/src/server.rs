//! The exporter's HTTP server.
//!
//! Serves a small landing page at `/` and runs one scrape per request to the
//! configured telemetry path. Scrapes from concurrent requests queue on the
//! [`Collector`] lock.

use std::{future::Future, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Method, Request, Response, StatusCode, body::Incoming, header, service::service_fn};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::{client::TaskSource, collector::Collector, exposition};

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Server`].
pub enum Error {
    /// Wrapper for [`std::io::Error`].
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn landing_page(telemetry_path: &str) -> Bytes {
    Bytes::from(format!(
        r#"<html>
<head><title>Elasticsearch Reindex Exporter</title></head>
<body>
<h1>Elasticsearch Reindex Exporter</h1>
<p><a href="{telemetry_path}">Metrics</a></p>
</body>
</html>
"#
    ))
}

#[derive(Debug)]
struct State<S> {
    collector: Collector<S>,
    telemetry_path: String,
    landing_page: Bytes,
}

/// The exporter's HTTP server.
#[derive(Debug)]
pub struct Server<S> {
    listener: TcpListener,
    state: Arc<State<S>>,
}

impl<S> Server<S>
where
    S: TaskSource + Send + Sync + 'static,
{
    /// Bind a new [`Server`] to `addr`.
    ///
    /// # Errors
    ///
    /// Function will return an error if the address cannot be bound.
    pub async fn bind(
        addr: SocketAddr,
        telemetry_path: &str,
        collector: Collector<S>,
    ) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr).await?;
        let state = Arc::new(State {
            collector,
            telemetry_path: telemetry_path.to_string(),
            landing_page: landing_page(telemetry_path),
        });
        Ok(Self { listener, state })
    }

    /// The address the server is listening on.
    ///
    /// # Errors
    ///
    /// Function will return an error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    /// Run [`Server`] until `shutdown` resolves.
    ///
    /// Every accepted connection is served on its own task. Connection errors
    /// are logged and do not stop the server.
    ///
    /// # Errors
    ///
    /// None are known.
    pub async fn run<F>(self, shutdown: F) -> Result<(), Error>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                incoming = self.listener.accept() => {
                    let (stream, addr) = match incoming {
                        Ok(sa) => sa,
                        Err(e) => {
                            error!("Error accepting connection: {e}");
                            continue;
                        }
                    };
                    debug!("Accepted connection from {addr}");

                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            let state = Arc::clone(&state);
                            async move { handle_request(state, req).await }
                        });

                        if let Err(err) = auto::Builder::new(TokioExecutor::new())
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            error!("Error serving {addr}: {err}");
                        }
                    });
                }
                () = &mut shutdown => {
                    info!("shutdown signal received");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_request<S>(
    state: Arc<State<S>>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, http::Error>
where
    S: TaskSource,
{
    let path = req.uri().path().to_string();
    let method = req.method().clone();
    drop(req);

    // The landing page is served on `/` only, not as a catch-all.
    let known_path = path == state.telemetry_path || path == "/";
    if !known_path {
        return Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::new()));
    }
    if method != Method::GET {
        warn!("Received other than GET method: {method}");
        return Response::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .header(header::ALLOW, "GET")
            .body(Full::new(Bytes::new()));
    }

    if path == state.telemetry_path {
        let samples = state.collector.samples().await;
        let body = exposition::render(&samples);
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, exposition::CONTENT_TYPE)
            .body(Full::new(Bytes::from(body)))
    } else {
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
            .body(Full::new(state.landing_page.clone()))
    }
}
