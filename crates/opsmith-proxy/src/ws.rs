//! WebSocket proxying.
//!
//! Accepts the client upgrade, dials the backend over the matching scheme
//! (`ws` for http backends, `wss` for https), and relays frames in both
//! directions until either side closes.

use crate::route::Route;
use axum::body::Body;
use axum::extract::FromRequestParts;
use axum::extract::ws::{Message as ClientMessage, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use http::{Request, Response, StatusCode};
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tracing::{debug, warn};
use url::Url;

/// Handle a request on a websocket route.
pub async fn handle(route: Arc<Route>, req: Request<Body>, client_ip: String) -> Response<Body> {
    let Some(backend) = route.balancer.select(&route.backends, &client_ip) else {
        return Response::builder()
            .status(StatusCode::SERVICE_UNAVAILABLE)
            .body(Body::from("no healthy backends available"))
            .expect("static response");
    };

    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let Some(target) = ws_target(&backend.url, &path_and_query) else {
        return Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::from("invalid backend URL"))
            .expect("static response");
    };

    let (mut parts, _body) = req.into_parts();
    match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(upgrade) => {
            backend.health.inc_connections();
            let backend = backend.clone();
            upgrade
                .on_upgrade(move |client| async move {
                    relay(client, target).await;
                    backend.health.dec_connections();
                })
                .into_response()
        }
        Err(rejection) => rejection.into_response(),
    }
}

/// Rewrite a backend URL to its websocket equivalent with the request path.
fn ws_target(backend: &Url, path_and_query: &str) -> Option<String> {
    let scheme = match backend.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    let host = backend.host_str()?;
    let port = backend
        .port()
        .map(|p| format!(":{p}"))
        .unwrap_or_default();
    Some(format!("{scheme}://{host}{port}{path_and_query}"))
}

/// Relay frames between the accepted client socket and the backend socket
/// until either side closes.
async fn relay(client: WebSocket, target: String) {
    debug!(%target, "dialing websocket backend");
    let upstream = match tokio_tungstenite::connect_async(target.as_str()).await {
        Ok((stream, _resp)) => stream,
        Err(e) => {
            warn!(%target, error = %e, "websocket backend dial failed");
            let mut client = client;
            let _ = client.send(ClientMessage::Close(None)).await;
            return;
        }
    };

    let (mut upstream_tx, mut upstream_rx) = upstream.split();
    let (mut client_tx, mut client_rx) = client.split();

    let client_to_upstream = async {
        while let Some(Ok(msg)) = client_rx.next().await {
            let Some(converted) = to_upstream(msg) else {
                break;
            };
            if upstream_tx.send(converted).await.is_err() {
                break;
            }
        }
        let _ = upstream_tx.close().await;
    };

    let upstream_to_client = async {
        while let Some(Ok(msg)) = upstream_rx.next().await {
            let Some(converted) = to_client(msg) else {
                break;
            };
            if client_tx.send(converted).await.is_err() {
                break;
            }
        }
        let _ = client_tx.close().await;
    };

    tokio::join!(client_to_upstream, upstream_to_client);
    debug!(%target, "websocket relay finished");
}

/// Convert a client frame for the backend. `None` ends the relay.
fn to_upstream(msg: ClientMessage) -> Option<UpstreamMessage> {
    match msg {
        ClientMessage::Text(text) => Some(UpstreamMessage::text(text.to_string())),
        ClientMessage::Binary(data) => Some(UpstreamMessage::binary(data.to_vec())),
        ClientMessage::Ping(data) => Some(UpstreamMessage::Ping(data.to_vec().into())),
        ClientMessage::Pong(data) => Some(UpstreamMessage::Pong(data.to_vec().into())),
        ClientMessage::Close(_) => None,
    }
}

/// Convert a backend frame for the client. `None` ends the relay.
fn to_client(msg: UpstreamMessage) -> Option<ClientMessage> {
    match msg {
        UpstreamMessage::Text(text) => Some(ClientMessage::Text(text.to_string().into())),
        UpstreamMessage::Binary(data) => Some(ClientMessage::Binary(data.to_vec().into())),
        UpstreamMessage::Ping(data) => Some(ClientMessage::Ping(data.to_vec().into())),
        UpstreamMessage::Pong(data) => Some(ClientMessage::Pong(data.to_vec().into())),
        UpstreamMessage::Close(_) => None,
        UpstreamMessage::Frame(_) => None,
    }
}
