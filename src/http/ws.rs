use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::AppState;

const DEFAULT_HISTORY_HOURS: i64 = 48;

/// Inbound `authorize` frame: the client names itself, proves it holds a
/// secret the AuthorityTable recognises, and asks for a history window.
#[derive(Debug, Deserialize)]
struct AuthorizeFrame {
    #[serde(default)]
    client: Option<String>,
    secret: String,
    #[serde(default, rename = "historyHours")]
    history_hours: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event")]
enum InboundFrame {
    #[serde(rename = "authorize")]
    Authorize(AuthorizeFrame),
    #[serde(rename = "loadRetro")]
    LoadRetro {
        #[serde(default, rename = "loadedMills")]
        loaded_mills: Option<i64>,
    },
    #[serde(rename = "alarm")]
    Alarm,
}

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session(socket, state))
}

async fn session(mut socket: WebSocket, state: AppState) {
    let _ = socket
        .send(Message::Text(json!({ "event": "connected" }).to_string().into()))
        .await;

    let mut subscribed = false;
    let mut rx = state.realtime.subscribe();

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let Some(Ok(Message::Text(text))) = incoming else {
                    break;
                };
                let Ok(frame) = serde_json::from_str::<InboundFrame>(&text) else {
                    continue;
                };
                match frame {
                    InboundFrame::Authorize(auth) => {
                        let subject = state.auth.resolve(Some(&auth.secret));
                        if !state.auth.is_permitted(&subject, "api:entries:read") {
                            let _ = socket
                                .send(Message::Text(json!({ "event": "denied" }).to_string().into()))
                                .await;
                            continue;
                        }
                        subscribed = true;
                        let history_hours = auth.history_hours.unwrap_or(DEFAULT_HISTORY_HOURS);
                        let entries = state.query.recent_entries((history_hours.max(1) as usize) * 60);
                        let snapshot = crate::realtime::RealtimeHub::history_snapshot(
                            &entries,
                            Utc::now(),
                            history_hours,
                            &state.devices,
                        );
                        tracing::debug!("realtime session authorized for client {:?}", auth.client);
                        let _ = socket.send(Message::Text(snapshot.to_string().into())).await;
                    }
                    InboundFrame::LoadRetro { .. } | InboundFrame::Alarm => {
                        // Acknowledged but not acted on: retro-loading and alarms
                        // don't change what this session receives going forward.
                    }
                }
            }
            delta = rx.recv() => {
                if !subscribed {
                    continue;
                }
                match delta {
                    Ok(frame) => {
                        if socket.send(Message::Text(frame.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}
