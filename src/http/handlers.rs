use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, Query, Request, State},
    http::{HeaderMap, StatusCode},
    response::Response,
    Json,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::channel::SubscribeRequest;
use crate::http::error::AppError;
use crate::http::state::AppState;
use crate::message::Payload;

/// Query parameters EventSource polyfills use instead of the header.
const RESUME_QUERY_KEYS: [&str; 2] = ["lastEventId", "evs_last_event_id"];

pub async fn subscribe(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, AppError> {
    let address = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let mut subscribe = SubscribeRequest::new(address);
    subscribe.last_event_id = resume_id(&request);

    let subscription = state.channel.subscribe(subscribe)?;

    let body = Body::from_stream(
        subscription
            .stream
            .map(|chunk| Ok::<_, Infallible>(Bytes::copy_from_slice(chunk.as_bytes()))),
    );

    let mut builder = Response::builder().status(StatusCode::OK);
    for (name, value) in subscription.headers {
        builder = builder.header(name, value);
    }
    builder
        .body(body)
        .map_err(|err| AppError::InternalError(err.into()))
}

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub event: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub id: Option<u64>,
}

pub async fn publish(
    State(state): State<AppState>,
    Json(payload): Json<PublishRequest>,
) -> Result<Json<PublishResponse>, AppError> {
    let data = match payload.data {
        None | Some(serde_json::Value::Null) => Payload::Empty,
        Some(serde_json::Value::String(text)) => Payload::Text(text),
        Some(value) => Payload::Json(value),
    };

    let record = state.channel.publish(data, payload.event.as_deref())?;
    Ok(Json(PublishResponse { id: record.id() }))
}

pub async fn clients(State(state): State<AppState>) -> Json<BTreeMap<String, usize>> {
    Json(state.channel.list_clients())
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub subscribers: usize,
    pub next_id: u64,
    pub history_len: usize,
    pub stopped: bool,
    pub metrics: BTreeMap<String, u64>,
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let channel = &state.channel;
    Json(StatsResponse {
        subscribers: channel.subscriber_count(),
        next_id: channel.next_id(),
        history_len: channel.history_len(),
        stopped: channel.is_stopped(),
        metrics: channel.metrics().export(),
    })
}

/// `Last-Event-ID` header, else the polyfill query parameters.
fn resume_id(request: &Request) -> Option<String> {
    if let Some(id) = header_str(request.headers(), "last-event-id") {
        return Some(id);
    }

    let Query(params) = Query::<HashMap<String, String>>::try_from_uri(request.uri()).ok()?;
    RESUME_QUERY_KEYS
        .iter()
        .find_map(|key| params.get(*key).cloned())
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
