//! WebSocket surface: event publishing and subscriptions (NIP-01 subset).

use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::StreamExt;
use serde_json::Value;

use crate::{error::RelayError, event::Event, pipeline::Pipeline, store::Filter};

/// Start a WebSocket server accepting `EVENT`, `REQ`, and `CLOSE` frames.
pub async fn serve_ws(
    addr: SocketAddr,
    pipeline: Arc<Pipeline>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = Router::new().route("/", get(handler)).with_state(pipeline);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}

/// Consult the connection gate, then hand the socket to the processor.
async fn handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(pipeline): State<Arc<Pipeline>>,
) -> impl IntoResponse {
    if let Err(reason) = pipeline.auth().on_connection(&remote.to_string()) {
        let err = RelayError::ConnectionRejected(reason);
        tracing::debug!(%remote, %err, "connection rejected");
        return (StatusCode::FORBIDDEN, err.to_string()).into_response();
    }
    pipeline.auth().on_connect(&remote.to_string());
    ws.on_upgrade(move |socket| async move { process(socket, pipeline).await })
        .into_response()
}

/// Process incoming EVENT/REQ/CLOSE messages on one connection. Malformed
/// frames are ignored rather than dropping the connection.
async fn process(mut socket: WebSocket, pipeline: Arc<Pipeline>) {
    while let Some(Ok(msg)) = socket.next().await {
        let Message::Text(txt) = msg else { continue };
        let Ok(val) = serde_json::from_str::<Value>(&txt) else {
            continue;
        };
        let Some(arr) = val.as_array() else { continue };
        match arr.first().and_then(|v| v.as_str()) {
            Some("EVENT") if arr.len() >= 2 => {
                let reply = match serde_json::from_value::<Event>(arr[1].clone()) {
                    Ok(ev) => publish(&pipeline, ev).await,
                    Err(_) => serde_json::json!(["NOTICE", "invalid: could not parse event"]),
                };
                let _ = socket.send(Message::Text(reply.to_string())).await;
            }
            Some("REQ") if arr.len() >= 3 => {
                let sub = arr[1].as_str().unwrap_or_default().to_string();
                let filters: Vec<Filter> = arr[2..].iter().map(Filter::from_value).collect();
                subscription(&mut socket, &pipeline, sub, &filters).await;
            }
            Some("CLOSE") => {
                // Subscriptions are one-shot; nothing to tear down.
            }
            _ => {}
        }
    }
}

/// Admit one published event and build the `OK` reply.
///
/// Admission runs on its own task so that a client disconnecting
/// mid-dispatch does not abandon a storage commit already in flight.
async fn publish(pipeline: &Arc<Pipeline>, ev: Event) -> Value {
    let id = ev.id.clone();
    let pipeline = Arc::clone(pipeline);
    let admitted = tokio::spawn(async move { pipeline.admit(ev).await }).await;
    match admitted {
        Ok(Ok(_)) => serde_json::json!(["OK", id, true, ""]),
        Ok(Err(err)) => serde_json::json!(["OK", id, false, err.ok_reason()]),
        Err(join) => serde_json::json!(["OK", id, false, format!("error: {join}")]),
    }
}

/// Answer one REQ: events then EOSE, a CLOSED frame on gate rejection, or an
/// empty result plus a notice when storage misbehaves.
async fn subscription(
    socket: &mut WebSocket,
    pipeline: &Pipeline,
    sub: String,
    filters: &[Filter],
) {
    match pipeline.run_query(filters) {
        Ok(events) => {
            for ev in events {
                let msg = serde_json::json!(["EVENT", sub, ev]);
                let _ = socket.send(Message::Text(msg.to_string())).await;
            }
            let eose = serde_json::json!(["EOSE", sub]);
            let _ = socket.send(Message::Text(eose.to_string())).await;
        }
        Err(RelayError::QueryRejected(reason)) => {
            let closed = serde_json::json!(["CLOSED", sub, reason]);
            let _ = socket.send(Message::Text(closed.to_string())).await;
        }
        Err(err) => {
            tracing::warn!(%err, "query failed");
            let notice = serde_json::json!(["NOTICE", err.to_string()]);
            let _ = socket.send(Message::Text(notice.to_string())).await;
            let eose = serde_json::json!(["EOSE", sub]);
            let _ = socket.send(Message::Text(eose.to_string())).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{AuthGate, OpenGate},
        hooks::HookDispatcher,
        kinds,
        limiter::RateLimiter,
        store::MemoryStore,
    };
    use futures_util::SinkExt;
    use std::{collections::HashMap, time::Duration};
    use tokio_tungstenite::tungstenite::protocol::Message as TungMessage;

    fn pipeline() -> Arc<Pipeline> {
        pipeline_with_gate(Arc::new(OpenGate))
    }

    fn pipeline_with_gate(gate: Arc<dyn AuthGate>) -> Arc<Pipeline> {
        let store = Arc::new(MemoryStore::new());
        let limiter = Arc::new(RateLimiter::new(
            Duration::from_secs(60),
            100,
            HashMap::new(),
        ));
        let dispatcher = Arc::new(HookDispatcher::new(store, Duration::from_secs(5)));
        Arc::new(Pipeline::new(gate, limiter, dispatcher))
    }

    async fn start(pipeline: Arc<Pipeline>) -> (String, tokio::task::JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/", get(handler)).with_state(pipeline);
        let server = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        );
        let handle = tokio::spawn(async move {
            server.await.unwrap();
        });
        (format!("ws://{}/", addr), handle)
    }

    fn promotion_json() -> serde_json::Value {
        serde_json::json!({
            "id": "pr1",
            "pubkey": "adv",
            "kind": kinds::PROMOTION,
            "created_at": 1,
            "tags": [["d", "promo1"], ["a", "30420:mp:main"]],
            "content": "{\"bid_sats\":100,\"duration_secs\":30}",
            "sig": ""
        })
    }

    #[tokio::test]
    async fn publish_then_query_round_trip() {
        let (url, handle) = start(pipeline()).await;
        let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

        let publish = serde_json::json!(["EVENT", promotion_json()]);
        ws.send(TungMessage::Text(publish.to_string()))
            .await
            .unwrap();
        let reply = match ws.next().await.unwrap().unwrap() {
            TungMessage::Text(t) => t,
            other => panic!("unexpected frame: {other:?}"),
        };
        let ok: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(ok[0], "OK");
        assert_eq!(ok[1], "pr1");
        assert_eq!(ok[2], true);

        let req = serde_json::json!(["REQ", "s", {"kinds": [kinds::PROMOTION]}]);
        ws.send(TungMessage::Text(req.to_string())).await.unwrap();
        let mut ids = vec![];
        while let Some(msg) = ws.next().await {
            match msg.unwrap() {
                TungMessage::Text(t) => {
                    let v: serde_json::Value = serde_json::from_str(&t).unwrap();
                    if v[0] == "EVENT" {
                        ids.push(v[2]["id"].as_str().unwrap().to_string());
                    }
                    if v[0] == "EOSE" {
                        break;
                    }
                }
                _ => {}
            }
        }
        assert_eq!(ids, vec!["pr1".to_string()]);
        handle.abort();
    }

    #[tokio::test]
    async fn invalid_event_gets_ok_false_with_reason() {
        let (url, handle) = start(pipeline()).await;
        let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

        let mut bad = promotion_json();
        bad["content"] = serde_json::Value::String("not json".into());
        let publish = serde_json::json!(["EVENT", bad]);
        ws.send(TungMessage::Text(publish.to_string()))
            .await
            .unwrap();
        let reply = match ws.next().await.unwrap().unwrap() {
            TungMessage::Text(t) => t,
            other => panic!("unexpected frame: {other:?}"),
        };
        let ok: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(ok[2], false);
        assert!(ok[3].as_str().unwrap().starts_with("invalid:"));
        handle.abort();
    }

    #[tokio::test]
    async fn rate_limited_publish_reports_reason() {
        let pipeline = pipeline();
        let (url, handle) = start(Arc::clone(&pipeline)).await;
        let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

        // Burn the author's quota out of band.
        let limit = pipeline.limiter().limit_for(1);
        for _ in 0..limit {
            assert!(pipeline.limiter().allow("p1", 1));
        }

        let note = serde_json::json!({
            "id": "n1", "pubkey": "p1", "kind": 1, "created_at": 1,
            "tags": [], "content": "", "sig": ""
        });
        ws.send(TungMessage::Text(
            serde_json::json!(["EVENT", note]).to_string(),
        ))
        .await
        .unwrap();
        let reply = match ws.next().await.unwrap().unwrap() {
            TungMessage::Text(t) => t,
            other => panic!("unexpected frame: {other:?}"),
        };
        let ok: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(ok[2], false);
        assert!(ok[3].as_str().unwrap().starts_with("rate-limited:"));
        handle.abort();
    }

    #[tokio::test]
    async fn req_with_no_matches_returns_only_eose() {
        let (url, handle) = start(pipeline()).await;
        let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        let req = serde_json::json!(["REQ", "s", {"authors": ["nobody"]}]);
        ws.send(TungMessage::Text(req.to_string())).await.unwrap();
        let mut saw_event = false;
        let mut saw_eose = false;
        while let Some(msg) = ws.next().await {
            if let TungMessage::Text(t) = msg.unwrap() {
                if t.contains("EVENT") {
                    saw_event = true;
                }
                if t.contains("EOSE") {
                    saw_eose = true;
                    break;
                }
            }
        }
        assert!(!saw_event);
        assert!(saw_eose);
        handle.abort();
    }

    #[tokio::test]
    async fn rejected_req_gets_closed_frame() {
        struct NoReq;
        impl AuthGate for NoReq {
            fn reject_req(&self, _: &[Filter]) -> Option<String> {
                Some("auth required".into())
            }
        }
        let (url, handle) = start(pipeline_with_gate(Arc::new(NoReq))).await;
        let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        let req = serde_json::json!(["REQ", "s", {}]);
        ws.send(TungMessage::Text(req.to_string())).await.unwrap();
        let reply = match ws.next().await.unwrap().unwrap() {
            TungMessage::Text(t) => t,
            other => panic!("unexpected frame: {other:?}"),
        };
        let v: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(v[0], "CLOSED");
        assert_eq!(v[1], "s");
        assert!(v[2].as_str().unwrap().contains("auth required"));
        handle.abort();
    }

    #[tokio::test]
    async fn malformed_frames_are_ignored() {
        let (url, handle) = start(pipeline()).await;
        let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        ws.send(TungMessage::Text("not json".into())).await.unwrap();
        ws.send(TungMessage::Text("{}".into())).await.unwrap();
        let req = serde_json::json!(["REQ", "s", {}]);
        ws.send(TungMessage::Text(req.to_string())).await.unwrap();
        let mut saw_eose = false;
        while let Some(msg) = ws.next().await {
            if let TungMessage::Text(t) = msg.unwrap() {
                if t.contains("EOSE") {
                    saw_eose = true;
                    break;
                }
            }
        }
        assert!(saw_eose);
        handle.abort();
    }

    #[tokio::test]
    async fn serve_ws_bind_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(
            serve_ws(addr, pipeline(), std::future::pending())
                .await
                .is_err()
        );
    }
}
