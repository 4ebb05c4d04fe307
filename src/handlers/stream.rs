//! # Alert Stream
//!
//! WebSocket push channel. A session is registered before its initial snapshot is read, so
//! no delta can fall between the two; the client's version rule discards the overlap.

use std::fmt::Display;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::response::Response;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::Viewer;
use crate::models::ViewerIdentity;
use crate::realtime::{ClientFrame, ServerFrame};
use crate::server::AppState;

/// Open the live alert stream
#[utoipa::path(
    get,
    path = "/alerts/stream",
    security(("bearer_auth" = [])),
    params(
        ("access_token" = Option<String>, Query, description = "Viewer token for clients that cannot set headers")
    ),
    responses(
        (status = 101, description = "Switching to WebSocket; frames are JSON tagged by `type`"),
        (status = 401, description = "Missing or invalid token", body = crate::error::ApiError)
    ),
    tag = "alerts"
)]
pub async fn alert_stream(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        drive_session(state, viewer, sink, stream).await;
    })
}

/// Runs one live session over any message sink/stream pair until either side closes.
pub async fn drive_session<Tx, Rx, E>(
    state: AppState,
    viewer: ViewerIdentity,
    mut sink: Tx,
    mut stream: Rx,
) where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
    Rx: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let session_id = Uuid::new_v4();
    let Some(mut outbound) = state.registry.register(session_id, viewer.clone()) else {
        return;
    };
    let Some(cancel) = state
        .registry
        .get(session_id)
        .map(|handle| handle.cancel_token().clone())
    else {
        return;
    };

    let ended = async {
        send_frame(&mut sink, &cancel, &ServerFrame::Hello { session_id }).await?;
        send_snapshot(&state, &viewer, &mut sink, &cancel).await?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err("session cancelled".to_string()),
                _ = state.shutdown.cancelled() => return Err("server shutting down".to_string()),
                envelope = outbound.recv() => match envelope {
                    Some(envelope) => {
                        send_frame(&mut sink, &cancel, &ServerFrame::from(envelope.as_ref())).await?;
                    }
                    None => return Err("outbound queue closed".to_string()),
                },
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(text.as_str()) {
                            Ok(ClientFrame::Ack { tenant_scope, version }) => {
                                state.registry.ack(session_id, tenant_scope, version);
                            }
                            Ok(ClientFrame::Resync) => {
                                send_snapshot(&state, &viewer, &mut sink, &cancel).await?;
                            }
                            Err(err) => {
                                let frame = ServerFrame::Error {
                                    code: "INVALID_FRAME".to_string(),
                                    message: err.to_string(),
                                };
                                send_frame(&mut sink, &cancel, &frame).await?;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Err(format!("transport error: {}", err)),
                },
            }
        }
    }
    .await;

    match ended {
        Ok(()) => info!(%session_id, "Live session closed by client"),
        Err(reason) => debug!(%session_id, %reason, "Live session ended"),
    }

    state.registry.unregister(session_id);
    let _ = sink.close().await;
}

async fn send_snapshot<Tx>(
    state: &AppState,
    viewer: &ViewerIdentity,
    sink: &mut Tx,
    cancel: &CancellationToken,
) -> Result<(), String>
where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
{
    let frame = match state.lifecycle.list(viewer, None, None).await {
        Ok(snapshot) => ServerFrame::Snapshot(snapshot),
        Err(err) => {
            warn!(error = %err, viewer_id = %viewer.viewer_id, "Snapshot failed");
            ServerFrame::Error {
                code: "SNAPSHOT_UNAVAILABLE".to_string(),
                message: "Snapshot failed; send resync to retry".to_string(),
            }
        }
    };
    send_frame(sink, cancel, &frame).await
}

async fn send_frame<Tx>(
    sink: &mut Tx,
    cancel: &CancellationToken,
    frame: &ServerFrame,
) -> Result<(), String>
where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
{
    let text = serde_json::to_string(frame).map_err(|err| err.to_string())?;
    tokio::select! {
        _ = cancel.cancelled() => Err("session cancelled".to_string()),
        sent = sink.send(Message::Text(text.into())) => sent.map_err(|err| err.to_string()),
    }
}
