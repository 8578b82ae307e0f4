// http surface: live graph stream on /ws plus read-only REST queries

use crate::error::{NetPulseError, Result, SendFailure};
use crate::models::dto::{HealthReport, HostList, NetworkSummary, ServerMessage};
use crate::session::Session;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::json;
use std::net::{IpAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

pub fn router(session: Arc<Session>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/network/summary", get(network_summary))
        .route("/network/hosts", get(network_hosts))
        .route("/network/hosts/:ip", get(network_host))
        .route("/health", get(health))
        // the dashboard page is served from another origin
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(session)
}

/// Serves until the session's shutdown signal fires.
pub async fn serve(listener: TcpListener, session: Arc<Session>) -> Result<()> {
    listener.set_nonblocking(true)?;
    let addr = listener.local_addr()?;
    let shutdown = session.shutdown.clone();

    info!(%addr, "dashboard listening");
    axum::Server::from_tcp(listener)
        .map_err(|e| NetPulseError::Server(e.to_string()))?
        .serve(router(session).into_make_service())
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
        .map_err(|e| NetPulseError::Server(e.to_string()))
}

async fn ws_handler(ws: WebSocketUpgrade, State(session): State<Arc<Session>>) -> Response {
    ws.on_upgrade(move |socket| stream_graph(socket, session))
}

async fn stream_graph(socket: WebSocket, session: Arc<Session>) {
    let (mut sink, mut incoming) = socket.split();
    let mut subscription = session.hub.subscribe();
    let id = subscription.id();
    let limit = session.send_timeout;
    debug!(subscriber = id, "websocket connected");

    if let Some(init) = subscription.init_message() {
        if let Err(failure) = send_message(&mut sink, &init, limit).await {
            debug!(subscriber = id, %failure, "could not deliver init");
            return;
        }
    }

    loop {
        tokio::select! {
            delta = subscription.next_delta() => {
                let Some(delta) = delta else { break };
                let message = ServerMessage::from(delta.as_ref());
                if let Err(failure) = send_message(&mut sink, &message, limit).await {
                    debug!(subscriber = id, %failure, "websocket send failed");
                    break;
                }
            }
            frame = incoming.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break,
                // client messages are reserved for future control commands
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(subscriber = id, %err, "websocket read failed");
                    break;
                }
            },
            _ = session.shutdown.wait() => break,
        }
    }

    drop(subscription);
    let _ = tokio::time::timeout(limit, sink.send(Message::Close(None))).await;
    debug!(subscriber = id, "websocket closed");
}

async fn send_message(
    sink: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
    limit: Duration,
) -> std::result::Result<(), SendFailure> {
    let text = encode(message)?;
    match tokio::time::timeout(limit, sink.send(Message::Text(text))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(SendFailure::Closed),
        Err(_) => Err(SendFailure::Lagging),
    }
}

/// A frame that cannot be encoded ends the stream instead of leaving a gap.
fn encode<T: Serialize>(message: &T) -> std::result::Result<String, SendFailure> {
    serde_json::to_string(message).map_err(|err| {
        warn!(%err, "failed to encode message");
        SendFailure::Closed
    })
}

async fn network_summary(State(session): State<Arc<Session>>) -> Json<NetworkSummary> {
    Json(session.query.summary())
}

async fn network_hosts(State(session): State<Arc<Session>>) -> Json<HostList> {
    Json(session.query.hosts())
}

async fn network_host(State(session): State<Arc<Session>>, Path(ip): Path<String>) -> Response {
    let addr: IpAddr = match ip.parse() {
        Ok(addr) => addr,
        Err(_) => {
            let body = Json(json!({ "error": format!("{ip} is not an IP address") }));
            return (StatusCode::BAD_REQUEST, body).into_response();
        }
    };
    match session.query.host(&addr.to_string()) {
        Some(host) => Json(host).into_response(),
        None => {
            let body = Json(json!({ "error": format!("host {addr} has not been seen") }));
            (StatusCode::NOT_FOUND, body).into_response()
        }
    }
}

async fn health(State(session): State<Arc<Session>>) -> Json<HealthReport> {
    let pipeline = &session.pipeline;
    Json(HealthReport {
        capturing: pipeline.capture_active(),
        events_accepted: pipeline.accepted(),
        events_dropped: pipeline.dropped(),
        events_processed: pipeline.processed(),
        frames_skipped: pipeline.skipped(),
        subscribers: session.hub.subscriber_count(),
        uptime: session.uptime().as_secs_f64(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn unencodable_message_closes_the_stream() {
        // json object keys must be strings
        let mut bad = HashMap::new();
        bad.insert((1u8, 2u8), 3u8);
        assert_eq!(encode(&bad), Err(SendFailure::Closed));
    }

    #[test]
    fn init_message_encodes() {
        let message = ServerMessage::Init {
            nodes: Vec::new(),
            edges: Vec::new(),
        };
        let text = encode(&message).unwrap();
        assert!(text.contains("\"type\":\"init\""));
    }
}
