use std::{convert::Infallible, future::Future, net::SocketAddr, sync::Arc, time::Duration};

use http_body_util::Full;
use hyper::{
    body::{Bytes, Incoming},
    header::{HeaderValue, CONTENT_TYPE},
    server::conn::http1::Builder as HyperHttpBuilder,
    service::service_fn,
    Method, Request, Response, StatusCode,
};
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinSet,
};
use tracing::{error, info, warn};

use super::{ExporterError, ExporterFuture, ShutdownHandle};
use crate::{collector::Collector, common::BuildError, registry::Registry};

/// How long open connections get to finish once shutdown is requested.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";
const PLAIN_TEXT: &str = "text/plain; charset=utf-8";
const HTML: &str = "text/html; charset=utf-8";

pub(crate) const HEALTH_PATH: &str = "/health";
pub(crate) const SHUTDOWN_PATH: &str = "/shutdown";

struct HttpListeningExporter {
    inner: Arc<Inner>,
}

struct Inner {
    collector: Collector,
    telemetry_path: String,
    read_timeout: Duration,
    shutdown: ShutdownHandle,
}

impl HttpListeningExporter {
    async fn serve(&self, listener: std::net::TcpListener) -> Result<(), ExporterError> {
        let listener = TcpListener::from_std(listener)?;
        let mut connections = JoinSet::new();

        loop {
            let stream = tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        warn!("Error accepting connection. Ignoring request. Error: {:?}", e);
                        continue;
                    }
                },
                () = self.inner.shutdown.wait() => break,
            };

            connections.spawn(self.process_stream(stream));

            // Reap finished connections so the set does not grow without bound.
            while connections.try_join_next().is_some() {}
        }

        info!("Stopping HTTP server...");
        drop(listener);

        let drain = async { while connections.join_next().await.is_some() {} };
        if tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, drain).await.is_err() {
            warn!(
                open = connections.len(),
                "connections still open after {:?}, closing them", SHUTDOWN_GRACE_PERIOD
            );
            connections.abort_all();
        }
        info!("Server stopped");

        Ok(())
    }

    fn process_stream(&self, stream: TcpStream) -> impl Future<Output = ()> + Send + 'static {
        let inner = self.inner.clone();
        let shutdown = inner.shutdown.clone();
        let mut builder = HyperHttpBuilder::new();
        builder.timer(TokioTimer::new()).header_read_timeout(inner.read_timeout);

        let service = service_fn(move |req: Request<Incoming>| {
            let inner = inner.clone();
            let method = req.method().clone();
            let path = req.uri().path().to_owned();
            async move {
                Ok::<_, Infallible>(Self::handle_http_request(&inner, &method, &path).await)
            }
        });

        async move {
            let conn = builder.serve_connection(TokioIo::new(stream), service);
            tokio::pin!(conn);

            let mut draining = false;
            let result = loop {
                tokio::select! {
                    result = conn.as_mut() => break result,
                    () = shutdown.wait(), if !draining => {
                        conn.as_mut().graceful_shutdown();
                        draining = true;
                    }
                }
            };
            if let Err(err) = result {
                warn!("Error serving connection.  Error: {:?}", err);
            }
        }
    }

    async fn handle_http_request(
        inner: &Inner,
        method: &Method,
        path: &str,
    ) -> Response<Full<Bytes>> {
        if *method != Method::GET {
            return new_response(StatusCode::METHOD_NOT_ALLOWED, PLAIN_TEXT, "Method Not Allowed");
        }

        match path {
            "/" => new_response(StatusCode::OK, HTML, home_page(&inner.telemetry_path)),
            HEALTH_PATH => new_response(StatusCode::OK, PLAIN_TEXT, "OK"),
            SHUTDOWN_PATH => {
                if inner.shutdown.shutdown() {
                    info!("Shutdown request (HTTP {})", SHUTDOWN_PATH);
                }
                new_response(StatusCode::OK, PLAIN_TEXT, "Shutting Down... bye! :)")
            }
            path if path == inner.telemetry_path => Self::render_metrics(inner).await,
            _ => new_response(StatusCode::NOT_FOUND, PLAIN_TEXT, "Not Found"),
        }
    }

    async fn render_metrics(inner: &Inner) -> Response<Full<Bytes>> {
        let registry = Arc::new(Registry::new());
        match inner.collector.scrape(registry.clone()).await {
            Ok(_) => new_response(StatusCode::OK, TEXT_FORMAT, registry.render()),
            Err(e) => {
                error!(error = %e, "scrape failed");
                new_response(StatusCode::SERVICE_UNAVAILABLE, PLAIN_TEXT, e.to_string())
            }
        }
    }
}

fn new_response(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn home_page(telemetry_path: &str) -> String {
    format!(
        "<html>\n\
         <head><title>InstaClustr Exporter</title></head>\n\
         <body>\n\
         <h1>InstaClustr Exporter</h1>\n\
         <p><a href=\"{telemetry_path}\">Metrics</a></p>\n\
         </body>\n\
         </html>\n"
    )
}

/// Creates an `ExporterFuture` implementing a http listener that serves the scraped metrics.
///
/// # Errors
/// Will return Err if it cannot bind to the listen address
pub(crate) fn new_http_listener(
    collector: Collector,
    listen_address: SocketAddr,
    telemetry_path: String,
    read_timeout: Duration,
    shutdown: ShutdownHandle,
) -> Result<ExporterFuture, BuildError> {
    let listener = std::net::TcpListener::bind(listen_address)
        .and_then(|listener| {
            listener.set_nonblocking(true)?;
            Ok(listener)
        })
        .map_err(|e| BuildError::FailedToCreateHTTPListener(e.to_string()))?;

    let exporter = HttpListeningExporter {
        inner: Arc::new(Inner { collector, telemetry_path, read_timeout, shutdown }),
    };

    Ok(Box::pin(async move { exporter.serve(listener).await }))
}

#[cfg(test)]
mod tests {
    use super::{home_page, new_response, PLAIN_TEXT};
    use hyper::{header::CONTENT_TYPE, StatusCode};

    #[test]
    fn new_response_sets_status_and_type() {
        let response = new_response(StatusCode::NOT_FOUND, PLAIN_TEXT, "Not Found");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[CONTENT_TYPE], PLAIN_TEXT);
    }

    #[test]
    fn home_page_links_telemetry_path() {
        assert!(home_page("/custom").contains("<a href=\"/custom\">Metrics</a>"));
    }
}
