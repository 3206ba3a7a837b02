// SPDX-License-Identifier: Apache-2.0
use actix_web::{
    Error, HttpMessage, HttpRequest, HttpResponse,
    http::{StatusCode, header},
    web,
};
use awc::error::SendRequestError;
use futures::TryStreamExt;
use std::time::Duration;
use tracing::{debug, error, instrument};

use crate::middleware::Forwarding;
use crate::rewrite::upstream_url;

/// Headers that describe a single connection and are never relayed.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";

fn is_hop_by_hop(name: &header::HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// HTTP client used for upstream requests; one per worker.
pub fn build_client(timeout: Duration) -> awc::Client {
    let connector = awc::Connector::new()
        .timeout(Duration::from_secs(10))
        .conn_keep_alive(Duration::from_secs(15))
        .disconnect_timeout(Duration::from_secs(2));

    awc::ClientBuilder::new()
        .timeout(timeout)
        .disable_redirects()
        .connector(connector)
        .finish()
}

/// Relay a granted request to its application's upstream and stream the
/// response back unchanged.
#[instrument(skip(req, payload, client), fields(method = %req.method(), path = %req.uri().path()))]
pub async fn forward(req: HttpRequest, payload: web::Payload, client: web::Data<awc::Client>) -> Result<HttpResponse, Error> {
    let Some(forwarding) = req.extensions().get::<Forwarding>().cloned() else {
        error!("Request reached the forwarder without an access decision");
        return Err(actix_web::error::ErrorInternalServerError("Internal error"));
    };

    let forwarded_url = upstream_url(&forwarding.policy.upstream, req.uri().path(), req.uri().query());
    debug!(forwarded_url = %forwarded_url, reason = ?forwarding.reason, "Proxying request");

    let mut forwarded_req = client
        .request(req.method().clone(), forwarded_url)
        .no_decompress();

    // The original Host is kept so upstreams generate public URLs.
    for (header_name, header_value) in req
        .headers()
        .iter()
        .filter(|(h, _)| !is_hop_by_hop(h) && *h != header::CONTENT_LENGTH && h.as_str() != X_FORWARDED_FOR)
    {
        forwarded_req = forwarded_req.append_header((header_name.clone(), header_value.clone()));
    }

    if let Some(peer) = req.peer_addr() {
        let prior = req
            .headers()
            .get_all(X_FORWARDED_FOR)
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>();
        let chain = if prior.is_empty() {
            peer.ip().to_string()
        } else {
            format!("{}, {}", prior.join(", "), peer.ip())
        };
        forwarded_req = forwarded_req.insert_header((X_FORWARDED_FOR, chain));
    } else if let Some(prior) = req.headers().get(X_FORWARDED_FOR) {
        forwarded_req = forwarded_req.insert_header((X_FORWARDED_FOR, prior.clone()));
    }

    let forwarded_req = if has_body(&req) {
        forwarded_req.send_stream(payload)
    } else {
        forwarded_req.send()
    };

    let forwarded_res = forwarded_req.await.map_err(|e| {
        error!(error = %e, "Forwarding error to upstream {}", forwarding.policy.upstream);
        match e {
            SendRequestError::Timeout => actix_web::error::ErrorGatewayTimeout(e),
            e => actix_web::error::ErrorBadGateway(e),
        }
    })?;

    debug!(status = %forwarded_res.status(), "Received response from upstream");

    let mut client_res = HttpResponse::build(
        StatusCode::from_u16(forwarded_res.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY),
    );

    for (header_name, header_value) in forwarded_res
        .headers()
        .iter()
        .filter(|(h, _)| !is_hop_by_hop(h) && *h != header::CONTENT_LENGTH)
    {
        client_res.append_header((header_name.clone(), header_value.clone()));
    }

    let stream = forwarded_res.map_err(|e| {
        error!(error = %e, "Upstream body stream error");
        actix_web::error::ErrorBadGateway(e)
    });
    Ok(client_res.streaming(stream))
}

/// GET-style requests without a declared body are sent without a body
/// stream; some upstreams wait for a body that never comes otherwise.
fn has_body(req: &HttpRequest) -> bool {
    if req.headers().contains_key(header::TRANSFER_ENCODING) {
        return true;
    }
    req.headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .is_some_and(|len| len > 0)
}
