//! Viewer connection: one WebSocket per connection id.
//!
//! On connect the viewer receives the full tree as a `set` frame. Afterwards
//! every push on the session bus is forwarded, and inbound `get`/`action`
//! frames are applied to the session state.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
    routing::get,
    Router,
};
use creatorpay_core::SessionState;
use creatorpay_schema::{BackendState, ClientMessage, RemoteAction, ServerMessage, Toast, BACKEND_STATE_KEY};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;

use crate::state::AppState;

type ViewerSink = SplitSink<WebSocket, Message>;

pub fn router() -> Router<AppState> {
    Router::new().route("/{session_id}", get(upgrade))
}

async fn upgrade(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| serve_viewer(socket, state, session_id))
}

async fn serve_viewer(socket: WebSocket, app: AppState, session_id: String) {
    let attached = app.sessions.connect(&session_id).await;
    let state = attached.session.state.clone();
    let mut events = attached.events;
    let (mut sink, mut stream) = socket.split();

    let initial = state.snapshot().await;
    if send_frames(&mut sink, &initial, attached.notice.as_ref())
        .await
        .is_err()
    {
        tracing::debug!(session_id = %session_id, "viewer left before initial state");
        return;
    }
    tracing::info!(
        session_id = %session_id,
        created = attached.created,
        viewers = state.bus().viewer_count(),
        "viewer attached"
    );

    let send_state = state.clone();
    let send_id = session_id.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            let sent = match events.recv().await {
                Ok(event) => send_frames(&mut sink, &event.snapshot, event.toast.as_ref()).await,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(session_id = %send_id, skipped, "viewer lagged, resending tree");
                    let snapshot = send_state.snapshot().await;
                    send_frames(&mut sink, &snapshot, None).await
                }
                Err(RecvError::Closed) => break,
            };
            if sent.is_err() {
                break;
            }
        }
    });

    let recv_state = state.clone();
    let recv_id = session_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => handle_frame(&recv_state, text.as_str()).await,
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(session_id = %recv_id, error = %e, "viewer socket error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    tracing::info!(session_id = %session_id, "viewer detached");
}

async fn handle_frame(state: &Arc<SessionState>, text: &str) {
    let frame = match serde_json::from_str::<ClientMessage>(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(session_id = %state.id(), error = %e, "malformed viewer frame");
            state.notify(Toast::error(format!("Malformed message: {e}"))).await;
            return;
        }
    };

    match frame {
        ClientMessage::Get => {
            state.sync(None).await;
        }
        ClientMessage::Action { action, payload } => {
            match RemoteAction::from_parts(&action, payload) {
                Ok(action) => {
                    // Actions can wait on the model and the payment rail; keep reading frames.
                    let state = state.clone();
                    tokio::spawn(async move { state.handle_action(action).await });
                }
                Err(e) => {
                    tracing::warn!(session_id = %state.id(), action = %action, error = %e, "rejected action");
                    state
                        .notify(Toast::error(format!("Unknown action {action}: {e}")))
                        .await;
                }
            }
        }
    }
}

async fn send_frames(
    sink: &mut ViewerSink,
    snapshot: &BackendState,
    toast: Option<&Toast>,
) -> Result<(), axum::Error> {
    let value = match serde_json::to_value(snapshot) {
        Ok(value) => value,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize state tree");
            return Ok(());
        }
    };
    send_json(
        sink,
        &ServerMessage::Set {
            key: BACKEND_STATE_KEY.to_string(),
            value,
        },
    )
    .await?;
    if let Some(toast) = toast {
        send_json(
            sink,
            &ServerMessage::Toast {
                toast: toast.clone(),
            },
        )
        .await?;
    }
    Ok(())
}

async fn send_json(sink: &mut ViewerSink, message: &ServerMessage) -> Result<(), axum::Error> {
    match serde_json::to_string(message) {
        Ok(json) => sink.send(Message::Text(json.into())).await,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize server frame");
            Ok(())
        }
    }
}
