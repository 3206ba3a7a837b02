// SPDX-License-Identifier: Apache-2.0
mod common;

use actix_web::http::{StatusCode, header};
use actix_web::{App, HttpRequest, HttpResponse, HttpServer, test, web};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use secretgate::middleware::AccessGate;
use secretgate::proxy;
use secretgate::session_store::SessionStore;

/// Upstream that echoes what it received.
async fn echo(req: HttpRequest, body: web::Bytes) -> HttpResponse {
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    };
    HttpResponse::Ok()
        .insert_header(("X-Upstream", "echo"))
        .json(json!({
            "method": req.method().as_str(),
            "path": req.uri().path(),
            "query": req.uri().query(),
            "host": header("host"),
            "x_forwarded_for": header("x-forwarded-for"),
            "body": String::from_utf8_lossy(&body),
        }))
}

async fn spawn_upstream() -> SocketAddr {
    let server = HttpServer::new(|| App::new().default_service(web::to(echo)))
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();
    let addr = server.addrs()[0];
    actix_web::rt::spawn(server.run());
    addr
}

fn peer() -> SocketAddr {
    format!("{}:40000", CLIENT_IP).parse().unwrap()
}

macro_rules! gate {
    ($store:expr, $policies:expr) => {
        test::init_service(
            App::new()
                .wrap(AccessGate::new(engine_with($store, $policies)))
                .app_data(web::Data::new(proxy::build_client(Duration::from_secs(5))))
                .default_service(web::to(proxy::forward)),
        )
        .await
    };
}

fn upstream_policy(addr: SocketAddr) -> secretgate::registry::ApplicationPolicy {
    let mut policy = app_policy();
    policy.upstream = url::Url::parse(&format!("http://{}", addr)).unwrap();
    policy
}

#[actix_web::test]
async fn test_unmapped_host_returns_404() {
    let store = RecordingStore::new();
    let app = gate!(store.clone(), vec![app_policy()]);

    let req = test::TestRequest::get()
        .uri("/secret_path/x")
        .insert_header((header::HOST, "nobody.example.com"))
        .peer_addr(peer())
        .to_request();
    let res = test::call_service(&app, req).await;

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(test::read_body(res).await, "Not Found");
    assert_eq!(store.total_calls(), 0);
}

#[actix_web::test]
async fn test_browser_unlock_redirects_to_stripped_path() {
    let store = RecordingStore::new();
    let app = gate!(store.clone(), vec![app_policy()]);

    let req = test::TestRequest::get()
        .uri("/secret_path/docs/index.html?lang=en")
        .insert_header((header::HOST, "app.example.com:8080"))
        .insert_header((header::USER_AGENT, BROWSER_UA))
        .peer_addr(peer())
        .to_request();
    let res = test::call_service(&app, req).await;

    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(res.headers().get(header::LOCATION).unwrap(), "/docs/index.html");
    assert!(store.inner.exists(&session_key(APP_HOST, CLIENT_IP)).await.unwrap());
}

#[actix_web::test]
async fn test_app_client_unlock_is_forbidden_then_forwarded() {
    let upstream = spawn_upstream().await;
    let store = RecordingStore::new();
    let app = gate!(store.clone(), vec![upstream_policy(upstream)]);

    let unlock = || {
        test::TestRequest::get()
            .uri("/secret_path/api/items")
            .insert_header((header::HOST, APP_HOST))
            .insert_header((header::USER_AGENT, APP_UA))
            .peer_addr(peer())
            .to_request()
    };

    let res = test::call_service(&app, unlock()).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(test::read_body(res).await, "Access denied");

    let res = test::call_service(&app, unlock()).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["path"], "/api/items");
}

#[actix_web::test]
async fn test_store_write_failure_returns_500() {
    let store = RecordingStore::new();
    store.fail_set.store(true, std::sync::atomic::Ordering::SeqCst);
    let app = gate!(store.clone(), vec![app_policy()]);

    let req = test::TestRequest::get()
        .uri("/secret_path/")
        .insert_header((header::HOST, APP_HOST))
        .insert_header((header::USER_AGENT, BROWSER_UA))
        .peer_addr(peer())
        .to_request();
    let res = test::call_service(&app, req).await;

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(test::read_body(res).await, "Internal error");
}

#[actix_web::test]
async fn test_unlocked_client_is_forwarded_with_rewritten_path() {
    let upstream = spawn_upstream().await;
    let store = RecordingStore::new();
    // The forwarded-for address, not the peer, identifies the client.
    store.seed(&session_key(APP_HOST, "192.0.2.1"), Duration::from_secs(60)).await;
    let app = gate!(store.clone(), vec![upstream_policy(upstream)]);

    let req = test::TestRequest::post()
        .uri("/secret_path/submit%20form?draft=1")
        .insert_header((header::HOST, APP_HOST))
        .insert_header((header::CONTENT_TYPE, "text/plain"))
        .insert_header(("X-Forwarded-For", "192.0.2.1"))
        .peer_addr(peer())
        .set_payload("hello upstream")
        .to_request();
    let res = test::call_service(&app, req).await;

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers().get("x-upstream").unwrap(), "echo");
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["method"], "POST");
    assert_eq!(body["path"], "/submit%20form");
    assert_eq!(body["query"], "draft=1");
    assert_eq!(body["host"], APP_HOST);
    assert_eq!(body["x_forwarded_for"], format!("192.0.2.1, {}", CLIENT_IP));
    assert_eq!(body["body"], "hello upstream");
    assert_eq!(store.refreshes(), 1);
}

#[actix_web::test]
async fn test_percent_encoded_secret_prefix_is_not_forwarded() {
    let upstream = spawn_upstream().await;
    let store = RecordingStore::new();
    store.seed(&session_key(APP_HOST, CLIENT_IP), Duration::from_secs(60)).await;
    let mut policy = upstream_policy(upstream);
    policy.secret_path_prefix = "/cl\u{e9}".to_string();
    let app = gate!(store.clone(), vec![policy]);

    let req = test::TestRequest::get()
        .uri("/cl%C3%A9/api/items")
        .insert_header((header::HOST, APP_HOST))
        .peer_addr(peer())
        .to_request();
    let res = test::call_service(&app, req).await;

    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["path"], "/api/items");
}

#[actix_web::test]
async fn test_allow_listed_client_is_forwarded_verbatim() {
    let upstream = spawn_upstream().await;
    let store = RecordingStore::new();
    let app = gate!(store.clone(), vec![upstream_policy(upstream)]);

    let req = test::TestRequest::get()
        .uri("/secret_path/health")
        .insert_header((header::HOST, APP_HOST))
        .insert_header(("CF-Connecting-IP", "10.1.2.99"))
        .peer_addr(peer())
        .to_request();
    let res = test::call_service(&app, req).await;

    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["path"], "/secret_path/health");
    assert_eq!(store.total_calls(), 0);
}

#[actix_web::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    let store = RecordingStore::new();
    store.seed(&session_key(APP_HOST, CLIENT_IP), Duration::from_secs(60)).await;
    // Port 9 (discard) on localhost is expected to refuse connections.
    let app = gate!(store.clone(), vec![app_policy()]);

    let req = test::TestRequest::get()
        .uri("/")
        .insert_header((header::HOST, APP_HOST))
        .peer_addr(peer())
        .to_request();
    let res = test::call_service(&app, req).await;

    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
}

#[actix_web::test]
async fn test_sessions_survive_across_gate_instances() {
    // Two gates sharing a store behave like instances behind a load balancer.
    let upstream = spawn_upstream().await;
    let store = RecordingStore::new();
    let first = gate!(store.clone(), vec![upstream_policy(upstream)]);
    let second = gate!(Arc::clone(&store), vec![upstream_policy(upstream)]);

    let unlock = test::TestRequest::get()
        .uri("/secret_path/")
        .insert_header((header::HOST, APP_HOST))
        .insert_header((header::USER_AGENT, BROWSER_UA))
        .peer_addr(peer())
        .to_request();
    assert_eq!(test::call_service(&first, unlock).await.status(), StatusCode::FOUND);

    let follow = test::TestRequest::get()
        .uri("/")
        .insert_header((header::HOST, APP_HOST))
        .insert_header((header::USER_AGENT, BROWSER_UA))
        .peer_addr(peer())
        .to_request();
    assert_eq!(test::call_service(&second, follow).await.status(), StatusCode::OK);
}
