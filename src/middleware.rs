// SPDX-License-Identifier: Apache-2.0
use actix_web::body::EitherBody;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header;
use actix_web::http::uri::{PathAndQuery, Uri};
use actix_web::{Error, HttpMessage, HttpResponse};
use futures::future::{LocalBoxFuture, Ready, ok};
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, instrument};

use crate::client_ip::resolve_client_ip;
use crate::engine::{AccessDecision, AccessEngine, AccessRequest, GrantReason};
use crate::registry::ApplicationPolicy;
use crate::rewrite::decode_path;

/// Request extension set by [`AccessGate`] for requests that may be forwarded.
#[derive(Debug, Clone)]
pub struct Forwarding {
    pub policy: Arc<ApplicationPolicy>,
    pub client_ip: String,
    pub reason: GrantReason,
}

/// Runs the access decision in front of the wrapped service. Only granted
/// requests reach it, with their URI already rewritten and a [`Forwarding`]
/// extension attached; everything else is answered here.
pub struct AccessGate {
    engine: AccessEngine,
}

impl AccessGate {
    pub fn new(engine: AccessEngine) -> Self {
        AccessGate { engine }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AccessGate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = AccessGateService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AccessGateService {
            service: Rc::new(service),
            engine: self.engine.clone(),
        })
    }
}

pub struct AccessGateService<S> {
    service: Rc<S>,
    engine: AccessEngine,
}

impl<S, B> Service<ServiceRequest> for AccessGateService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, ctx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    #[instrument(name = "access_gate", skip(self, req), fields(path = %req.path(), method = %req.method()))]
    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let engine = self.engine.clone();

        Box::pin(async move {
            let host = request_host(&req);
            let client_ip = resolve_client_ip(req.headers(), req.peer_addr());
            let raw_path = req.uri().path().to_owned();
            let path = decode_path(&raw_path);
            let user_agent = req
                .headers()
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);

            let decision = engine
                .decide(&AccessRequest {
                    host: &host,
                    client_ip: &client_ip,
                    path: &path,
                    raw_path: &raw_path,
                    user_agent: user_agent.as_deref(),
                })
                .await;

            let response = match decision {
                AccessDecision::Forward {
                    policy,
                    raw_path: forwarded_path,
                    reason,
                    ..
                } => {
                    if forwarded_path != raw_path {
                        rewrite_path(&mut req, &forwarded_path)?;
                    }
                    debug!(
                        upstream = %policy.upstream,
                        "Forwarding request from {} {} {}", client_ip, req.method(), req.path()
                    );
                    req.extensions_mut().insert(Forwarding {
                        policy,
                        client_ip,
                        reason,
                    });
                    let res = service.call(req).await?;
                    return Ok(res.map_into_left_body());
                }
                AccessDecision::NotFound => HttpResponse::NotFound().body("Not Found"),
                AccessDecision::Denied => HttpResponse::Forbidden().body("Access denied"),
                AccessDecision::StoreFailure => HttpResponse::InternalServerError().body("Internal error"),
                AccessDecision::Redirect { location } => HttpResponse::Found()
                    .append_header((header::LOCATION, location))
                    .finish(),
            };
            Ok(req.into_response(response).map_into_right_body())
        })
    }
}

/// `Host` header, or the URI authority for HTTP/2 requests without one.
fn request_host(req: &ServiceRequest) -> String {
    req.headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .or_else(|| req.uri().authority().map(|a| a.to_string()))
        .unwrap_or_default()
}

/// Replace the request path, keeping the query string.
fn rewrite_path(req: &mut ServiceRequest, path: &str) -> Result<(), Error> {
    let path_and_query = match req.uri().query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_owned(),
    };
    let mut parts = req.uri().clone().into_parts();
    parts.path_and_query =
        Some(PathAndQuery::try_from(path_and_query).map_err(actix_web::error::ErrorBadRequest)?);
    let uri = Uri::from_parts(parts).map_err(actix_web::error::ErrorBadRequest)?;

    req.match_info_mut().get_mut().update(&uri);
    req.head_mut().uri = uri;
    Ok(())
}
