//! Hyper HTTP client used for every outbound call of the client.
//!
//! The pool is sized for a handful of remote sites and one coordinator:
//! - Max idle connections per host: 32
//! - Max idle connection duration: 30s
//! - Connection timeout: 3s
//! - TCP_NODELAY: enabled

use std::time::Duration;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use hyper_rustls::HttpsConnector;
use http_body_util::combinators::BoxBody;
use hyper::body::Bytes;

/// Connection pool configuration constants.
pub const CONNS_PER_HOST: usize = 32;
pub const MAX_IDLE_CONN_DURATION: Duration = Duration::from_secs(30);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

pub type HyperClient = Client<HttpsConnector<HttpConnector>, BoxBody<Bytes, hyper::Error>>;

/// Creates a Hyper HTTP client able to talk both plain HTTP (same-origin
/// site proxies) and HTTPS (absolute instance addresses).
///
/// Uses `BoxBody` for requests (supports Empty/Full) and `Incoming` for responses.
pub fn create_client() -> HyperClient {
    let mut http_connector = HttpConnector::new();
    http_connector.set_nodelay(true);
    http_connector.set_keepalive(Some(Duration::from_secs(30)));
    http_connector.set_connect_timeout(Some(CONNECT_TIMEOUT));
    http_connector.enforce_http(false);

    let tls = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .wrap_connector(http_connector);

    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(MAX_IDLE_CONN_DURATION)
        .pool_max_idle_per_host(CONNS_PER_HOST)
        .build(tls)
}
