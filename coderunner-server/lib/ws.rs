//! The interactive execution channel over WebSocket.
//!
//! The adapter stays thin: it parses the JSON envelope, hands sessions to
//! the orchestrator, forwards session events back as wire messages, and
//! relays input messages unfiltered — routing by execution id happens inside
//! the session. Closing the socket drops the event channel, which the
//! orchestrator observes as cancellation.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use coderunner_core::exec::{ExecutionStatus, InputMessage, SessionEvent, SessionHandle};
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use tokio::sync::mpsc;

use crate::payload::{ClientMessage, ServerMessage};
use crate::state::AppState;

const EVENT_CHANNEL_CAPACITY: usize = 64;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Handler upgrading the connection into an interactive channel.
pub async fn interactive_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_session(socket, state))
}

async fn handle_session(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (event_tx, mut event_rx) = mpsc::channel::<SessionEvent>(EVENT_CHANNEL_CAPACITY);
    let mut active: Option<SessionHandle> = None;

    loop {
        tokio::select! {
            message = stream.next() => {
                let Some(Ok(message)) = message else { break };
                match message {
                    Message::Text(text) => {
                        let parsed = match serde_json::from_str::<ClientMessage>(text.as_str()) {
                            Ok(parsed) => parsed,
                            Err(error) => {
                                let unrecognized = ServerMessage::Error {
                                    message: format!("unrecognized message: {}", error),
                                };
                                if send_message(&mut sink, &unrecognized).await.is_err() {
                                    break;
                                }
                                continue;
                            }
                        };
                        if handle_client_message(parsed, &state, &event_tx, &mut active, &mut sink)
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let is_complete = matches!(event, SessionEvent::Completed { .. });
                let message = ServerMessage::from(event);
                if send_message(&mut sink, &message).await.is_err() {
                    break;
                }
                if is_complete {
                    active = None;
                }
            }
        }
    }

    // Dropping the event receiver cancels any execution still running.
}

async fn handle_client_message(
    message: ClientMessage,
    state: &AppState,
    event_tx: &mpsc::Sender<SessionEvent>,
    active: &mut Option<SessionHandle>,
    sink: &mut SplitSink<WebSocket, Message>,
) -> Result<(), axum::Error> {
    match message {
        ClientMessage::ExecuteInteractive { language, code } => {
            if active.is_some() {
                return send_message(
                    sink,
                    &ServerMessage::Error {
                        message: "an execution is already in progress on this channel".to_string(),
                    },
                )
                .await;
            }

            match state
                .get_orchestrator()
                .start_interactive(&language, code, event_tx.clone())
            {
                Ok(handle) => {
                    *active = Some(handle);
                    Ok(())
                }
                Err(error) => {
                    send_message(
                        sink,
                        &ServerMessage::Error {
                            message: error.to_string(),
                        },
                    )
                    .await?;
                    send_message(
                        sink,
                        &ServerMessage::ExecutionComplete {
                            status: ExecutionStatus::Error,
                            exit_code: -1,
                            execution_id: None,
                        },
                    )
                    .await
                }
            }
        }
        ClientMessage::Input { execution_id, data } => {
            if let Some(handle) = active {
                handle.send_input(InputMessage { execution_id, data });
            }
            Ok(())
        }
    }
}

async fn send_message(
    sink: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    match serde_json::to_string(message) {
        Ok(text) => sink.send(Message::Text(text.into())).await,
        Err(error) => {
            tracing::warn!("failed to serialize server message: {}", error);
            Ok(())
        }
    }
}
