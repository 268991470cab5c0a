//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::{Request, Response};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use edge_gateway::config::{BackendConfig, GatewayConfig, RouteConfig};

pub const SECRET: &str = "integration-test-secret-0123456789";
pub const ISSUER: &str = "http://keycloak:8080/realms/shop";

/// Start a backend that answers every request with 200 and the raw request
/// head (request line + headers) as the body.
pub async fn start_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let end = buf.windows(4).position(|w| w == b"\r\n\r\n").unwrap_or(buf.len());
                let head = String::from_utf8_lossy(&buf[..end]).to_string();

                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    head.len(),
                    head
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// Start a backend that accepts connections and never answers.
pub async fn start_silent_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    addr
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Default configuration with HS256 tokens and every service on `upstream`.
pub fn gateway_config(upstream: SocketAddr) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.auth.issuer = ISSUER.to_string();
    config.auth.hmac_secret = Some(SECRET.to_string());
    config.auth.algorithms = vec!["HS256".to_string()];
    config.health_check.enabled = false;
    config.timeouts.upstream_secs = 1;
    config.timeouts.connect_secs = 1;

    config.backends = ["user-service", "auth-service", "product-service"]
        .iter()
        .map(|service| BackendConfig {
            name: format!("{}-1", service),
            group: service.to_string(),
            address: upstream.to_string(),
            max_connections: 100,
        })
        .collect();

    config.routes.push(RouteConfig {
        id: "admin-console-route".to_string(),
        path: "/api/admin-console/**".to_string(),
        strip_prefix: 2,
        upstream: "lb://user-service".to_string(),
        rate_limited: false,
        rate_limit: None,
    });
    config.routes.push(RouteConfig {
        id: "reports-route".to_string(),
        path: "/api/management/reports/**".to_string(),
        strip_prefix: 3,
        upstream: "lb://user-service".to_string(),
        rate_limited: false,
        rate_limit: None,
    });
    config
}

/// Mint a token signed with [`SECRET`].
pub fn token(sub: &str, role: Option<&str>, scopes: Option<&str>) -> String {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
    let mut claims = json!({ "sub": sub, "iss": ISSUER, "iat": now, "exp": now + 300 });
    if let Some(role) = role {
        claims["primary_role"] = json!(role);
    }
    if let Some(scopes) = scopes {
        claims["scp"] = json!(scopes);
    }
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

pub fn get(path: &str) -> axum::http::request::Builder {
    Request::builder().method("GET").uri(path)
}

pub fn authed(path: &str, token: &str) -> Request<Body> {
    get(path)
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}

/// Case-insensitive header lookup in an echoed request head.
pub fn echoed_header<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines().skip(1).find_map(|line| {
        let (k, v) = line.split_once(':')?;
        k.trim().eq_ignore_ascii_case(name).then(|| v.trim())
    })
}
