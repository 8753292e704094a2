//! Manages the WebSocket connection lifecycle for one tutoring room.

use super::{protocol::ServerMessage, provider::OpenAIRealtimeProvider, room::WebSocketRoom};
use crate::state::AppState;
use anyhow::Result;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use lectern_core::{SessionController, generic_types::GenericServerEvent, prompt::PromptComposer};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, instrument};
use uuid::Uuid;

const OUTBOUND_BUFFER_CAPACITY: usize = 256;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Main handler for an individual WebSocket connection.
///
/// Each connection becomes its own room, served by a fresh `SessionController`
/// until the learner leaves or the session fails to start.
#[instrument(name = "ws_session", skip_all, fields(room))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let room_name = format!("room-{}", Uuid::new_v4());
    tracing::Span::current().record("room", room_name.as_str());
    info!("New WebSocket connection. Awaiting join...");

    let (socket_tx, socket_rx) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER_CAPACITY);
    tokio::spawn(write_outbound(socket_tx, outbound_rx).in_current_span());

    let session_span = tracing::info_span!("tutor_session", room = %room_name);
    let room = Arc::new(WebSocketRoom::new(room_name, socket_rx, outbound_tx));
    let provider = Arc::new(OpenAIRealtimeProvider::new(
        state.config.clone(),
        room.clone(),
    ));
    let composer = PromptComposer::new(state.config.subject.clone());
    let mut controller =
        SessionController::new(room.clone(), provider, state.content.clone(), composer);
    if let Some(dir) = &state.config.transcripts_dir {
        controller = controller.with_transcripts(dir.clone());
    }

    match controller.run().instrument(session_span).await {
        Ok(summary) => info!(
            identity = %summary.participant.identity,
            mode = %summary.mode,
            sections = summary.sections,
            paragraphs = summary.paragraphs,
            "Tutoring session finished."
        ),
        Err(e) => {
            error!(error = %e, "Tutoring session ended with error.");
            let _ = room.emit(GenericServerEvent::Error(e.to_string())).await;
        }
    }
    room.close().await;
}

/// Writes queued server messages to the socket until every sender is gone.
async fn write_outbound(
    mut socket_tx: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<ServerMessage>,
) {
    while let Some(msg) = outbound_rx.recv().await {
        if let Err(e) = send_msg(&mut socket_tx, msg).await {
            debug!(error = ?e, "Client socket is gone, dropping outbound messages");
            break;
        }
    }
    let _ = socket_tx.close().await;
    debug!("WebSocket writer finished.");
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
