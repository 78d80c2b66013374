//! `GET /metrics` (§6): Prometheus text exposition.
//!
//! The metrics exporter pipeline itself — per-request histograms, provider
//! counters, the registry that would back a real deployment — is out of
//! scope (§1 "metrics exporter plumbing"); this only serves the narrow
//! interface a scraper expects to find, with the one gauge the core
//! doesn't need an external collaborator to know.

use axum::response::{IntoResponse, Response};

const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

pub async fn metrics() -> Response {
    let body = "# HELP modelgate_up Whether the gateway process is serving requests.\n\
                # TYPE modelgate_up gauge\n\
                modelgate_up 1\n";
    ([(axum::http::header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response()
}
