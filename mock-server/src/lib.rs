use std::collections::BTreeMap;
use std::time::Duration;

use axum::{
    extract::{Path, Query},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

pub const CONTENT: &str = "Hello from the mock server";

/// Cookies the server received, as echoed by `/cookies`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CookieEcho {
    pub cookies: BTreeMap<String, String>,
}

pub fn app() -> Router {
    Router::new()
        .route("/content", get(content))
        .route("/headers", any(echo_headers))
        .route("/method", any(echo_method))
        .route("/status/{code}", any(status))
        .route("/delay/{millis}", get(delay))
        .route("/bytes/{count}", get(bytes))
        .route("/cookies", get(cookies))
        .route("/cookies/set", get(set_cookies))
        .route("/redirect", get(redirect))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn content() -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CONTENT_LANGUAGE, "en"),
        ],
        CONTENT,
    )
}

/// Request headers as a JSON object; repeated names are joined with commas.
async fn echo_headers(headers: HeaderMap) -> Json<BTreeMap<String, String>> {
    let mut echoed: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in &headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        echoed
            .entry(name.as_str().to_string())
            .and_modify(|joined| {
                joined.push(',');
                joined.push_str(&value);
            })
            .or_insert(value);
    }
    Json(echoed)
}

async fn echo_method(method: Method) -> Response {
    if method == Method::HEAD {
        return ([("x-method", "HEAD")], ()).into_response();
    }
    ([("x-method", method.as_str().to_string())], method.as_str().to_string()).into_response()
}

async fn status(Path(code): Path<u16>) -> Response {
    match StatusCode::from_u16(code) {
        Ok(StatusCode::NO_CONTENT) => StatusCode::NO_CONTENT.into_response(),
        Ok(status) => (status, format!("status {code}")).into_response(),
        Err(_) => (StatusCode::BAD_REQUEST, "invalid status code").into_response(),
    }
}

async fn delay(Path(millis): Path<u64>) -> &'static str {
    tokio::time::sleep(Duration::from_millis(millis)).await;
    "done"
}

async fn bytes(Path(count): Path<usize>) -> Vec<u8> {
    (0..count).map(|i| (i % 251) as u8).collect()
}

async fn cookies(headers: HeaderMap) -> Json<CookieEcho> {
    let cookies = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();
    Json(CookieEcho { cookies })
}

/// Sets one cookie per query parameter.
async fn set_cookies(Query(params): Query<BTreeMap<String, String>>) -> Response {
    let mut headers = HeaderMap::new();
    for (name, value) in &params {
        if let Ok(cookie) = HeaderValue::from_str(&format!("{name}={value}; Path=/")) {
            headers.append(header::SET_COOKIE, cookie);
        }
    }
    (StatusCode::OK, headers, "cookies set").into_response()
}

async fn redirect() -> Response {
    (StatusCode::FOUND, [(header::LOCATION, "/content")], "").into_response()
}
