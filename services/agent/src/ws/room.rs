//! A tutoring room carried over a single browser WebSocket.
//!
//! The first frame must be a `join` message naming the learner. After that,
//! text frames are data-channel packets (control signals) and binary frames
//! are PCM16 microphone audio at 24 kHz, handed to whichever model attaches
//! to the room via [`WebSocketRoom::take_audio`].

use super::protocol::{ClientMessage, ServerMessage};
use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use axum::extract::ws::Message;
use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream::BoxStream};
use lectern_core::{
    generic_types::GenericServerEvent,
    room::{DataPacket, Participant, RoomEvent, RoomTransport},
};
use tokio::{
    sync::{Mutex, broadcast, mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

const ROOM_EVENT_CAPACITY: usize = 64;
const AUDIO_BUFFER_CAPACITY: usize = 256;

type FrameStream = BoxStream<'static, Result<Message, axum::Error>>;

pub struct WebSocketRoom {
    name: String,
    outbound: mpsc::Sender<ServerMessage>,
    events: broadcast::Sender<RoomEvent>,
    audio_tx: mpsc::Sender<Bytes>,
    audio_rx: Mutex<Option<mpsc::Receiver<Bytes>>>,
    frames: Mutex<Option<(FrameStream, oneshot::Sender<Participant>)>>,
    joined: Mutex<Option<oneshot::Receiver<Participant>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketRoom {
    /// Creates a room reading client frames from `frames` and writing server
    /// messages to `outbound`. Nothing is read until [`RoomTransport::connect`].
    pub fn new<S>(name: impl Into<String>, frames: S, outbound: mpsc::Sender<ServerMessage>) -> Self
    where
        S: Stream<Item = Result<Message, axum::Error>> + Send + 'static,
    {
        let (events, _) = broadcast::channel(ROOM_EVENT_CAPACITY);
        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_BUFFER_CAPACITY);
        let (join_tx, join_rx) = oneshot::channel();
        Self {
            name: name.into(),
            outbound,
            events,
            audio_tx,
            audio_rx: Mutex::new(Some(audio_rx)),
            frames: Mutex::new(Some((frames.boxed(), join_tx))),
            joined: Mutex::new(Some(join_rx)),
            pump: Mutex::new(None),
        }
    }

    /// Hands the learner's audio stream to a model. Only the first caller gets it.
    pub async fn take_audio(&self) -> Option<mpsc::Receiver<Bytes>> {
        self.audio_rx.lock().await.take()
    }

    /// Sends a provider event to the learner.
    pub async fn emit(&self, event: GenericServerEvent) -> Result<()> {
        self.send(ServerMessage::from(event)).await
    }

    pub async fn send(&self, msg: ServerMessage) -> Result<()> {
        self.outbound
            .send(msg)
            .await
            .map_err(|_| anyhow!("room {} is no longer writable", self.name))
    }

    /// Stops reading from the client.
    pub async fn close(&self) {
        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
        }
    }
}

#[async_trait]
impl RoomTransport for WebSocketRoom {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        let Some((frames, join_tx)) = self.frames.lock().await.take() else {
            bail!("room {} is already connected", self.name);
        };
        let pump = FramePump {
            room: self.name.clone(),
            outbound: self.outbound.clone(),
            events: self.events.clone(),
            audio: self.audio_tx.clone(),
        };
        *self.pump.lock().await = Some(tokio::spawn(pump.run(frames, join_tx)));
        debug!(room = %self.name, "Room connected");
        Ok(())
    }

    async fn wait_for_participant(&self) -> Result<Participant> {
        let joined = self
            .joined
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow!("participant for room {} was already claimed", self.name))?;
        joined
            .await
            .map_err(|_| anyhow!("room {} closed before a participant joined", self.name))
    }

    fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.events.subscribe()
    }
}

impl Drop for WebSocketRoom {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().take() {
            pump.abort();
        }
    }
}

/// Reads client frames and turns them into room events.
struct FramePump {
    room: String,
    outbound: mpsc::Sender<ServerMessage>,
    events: broadcast::Sender<RoomEvent>,
    audio: mpsc::Sender<Bytes>,
}

impl FramePump {
    async fn run(self, mut frames: FrameStream, join_tx: oneshot::Sender<Participant>) {
        let participant = match self.await_join(&mut frames).await {
            Ok(Some(participant)) => participant,
            Ok(None) => {
                info!(room = %self.room, "Client left before joining");
                let _ = self.events.send(RoomEvent::Disconnected);
                return;
            }
            Err(e) => {
                warn!(room = %self.room, error = %e, "Rejected join");
                let _ = self
                    .outbound
                    .send(ServerMessage::Error {
                        message: e.to_string(),
                    })
                    .await;
                let _ = self.events.send(RoomEvent::Disconnected);
                return;
            }
        };

        let identity = participant.identity.clone();
        let _ = self
            .outbound
            .send(ServerMessage::Joined {
                room: self.room.clone(),
            })
            .await;
        if join_tx.send(participant).is_err() {
            debug!(room = %self.room, "Nobody is waiting for the participant");
        }

        while let Some(frame) = frames.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    let packet = DataPacket {
                        payload: text.as_str().as_bytes().to_vec(),
                        topic: None,
                        sender: Some(identity.clone()),
                    };
                    if self.events.send(RoomEvent::DataReceived(packet)).is_err() {
                        debug!(room = %self.room, "Data packet arrived with no listener");
                    }
                }
                Ok(Message::Binary(data)) => {
                    if self.audio.try_send(data).is_err() {
                        debug!(room = %self.room, "Dropping audio frame, no model is consuming audio");
                    }
                }
                Ok(Message::Close(_)) => {
                    info!(room = %self.room, "Client sent close frame");
                    break;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Err(e) => {
                    warn!(room = %self.room, error = ?e, "Error receiving from client WebSocket");
                    break;
                }
            }
        }

        let _ = self
            .events
            .send(RoomEvent::ParticipantDisconnected { identity });
        let _ = self.events.send(RoomEvent::Disconnected);
    }

    /// Reads the `join` message. `Ok(None)` means the client went away first.
    async fn await_join(&self, frames: &mut FrameStream) -> Result<Option<Participant>> {
        let text = match frames.next().await {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return Ok(None),
            Some(Ok(_)) => bail!("First message must be a text `join` message"),
        };
        let ClientMessage::Join { identity, metadata } = serde_json::from_str(text.as_str())
            .map_err(|e| anyhow!("First message must be a `join` message: {e}"))?;
        if identity.trim().is_empty() {
            bail!("`identity` is required for `join`");
        }
        Ok(Some(Participant { identity, metadata }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use std::time::Duration;

    struct Harness {
        room: WebSocketRoom,
        client: mpsc::UnboundedSender<Result<Message, axum::Error>>,
        server: mpsc::Receiver<ServerMessage>,
    }

    fn harness() -> Harness {
        let (client, rx) = mpsc::unbounded_channel();
        let frames = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|m| (m, rx)) });
        let (outbound, server) = mpsc::channel(16);
        Harness {
            room: WebSocketRoom::new("room-1", frames, outbound),
            client,
            server,
        }
    }

    fn text(s: &str) -> Result<Message, axum::Error> {
        Ok(Message::Text(s.into()))
    }

    async fn next_event(events: &mut broadcast::Receiver<RoomEvent>) -> RoomEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for room event")
            .expect("room event channel closed")
    }

    #[tokio::test]
    async fn test_join_resolves_participant() {
        let mut h = harness();
        h.room.connect().await.unwrap();
        h.client
            .send(text(r#"{"type":"join","identity":"learner","metadata":"CIRCLE-2"}"#))
            .unwrap();

        let participant = h.room.wait_for_participant().await.unwrap();
        assert_eq!(participant.identity, "learner");
        assert_eq!(participant.mode_key(), "CIRCLE-2");
        assert_eq!(
            h.server.recv().await,
            Some(ServerMessage::Joined {
                room: "room-1".into()
            })
        );
    }

    #[tokio::test]
    async fn test_frames_after_join_become_room_events() {
        let h = harness();
        h.room.connect().await.unwrap();
        let mut events = h.room.subscribe();
        let mut audio = h.room.take_audio().await.unwrap();
        assert!(h.room.take_audio().await.is_none());

        h.client.send(text(r#"{"type":"join","identity":"TRIANGLE-9"}"#)).unwrap();
        h.room.wait_for_participant().await.unwrap();

        h.client.send(text(r#"{"type":"interrupt"}"#)).unwrap();
        h.client
            .send(Ok(Message::Binary(Bytes::from_static(&[1, 0, 2, 0]))))
            .unwrap();
        h.client.send(Ok(Message::Close(None))).unwrap();

        match next_event(&mut events).await {
            RoomEvent::DataReceived(packet) => {
                assert_eq!(packet.payload, br#"{"type":"interrupt"}"#.to_vec());
                assert_eq!(packet.sender.as_deref(), Some("TRIANGLE-9"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(audio.recv().await, Some(Bytes::from_static(&[1, 0, 2, 0])));
        assert_eq!(
            next_event(&mut events).await,
            RoomEvent::ParticipantDisconnected {
                identity: "TRIANGLE-9".into()
            }
        );
        assert_eq!(next_event(&mut events).await, RoomEvent::Disconnected);
    }

    #[tokio::test]
    async fn test_invalid_join_is_rejected() {
        let mut h = harness();
        h.room.connect().await.unwrap();
        h.client.send(text(r#"{"type":"interrupt"}"#)).unwrap();

        assert!(h.room.wait_for_participant().await.is_err());
        assert!(matches!(
            h.server.recv().await,
            Some(ServerMessage::Error { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_identity_is_rejected() {
        let h = harness();
        h.room.connect().await.unwrap();
        h.client.send(text(r#"{"type":"join","identity":"  "}"#)).unwrap();
        assert!(h.room.wait_for_participant().await.is_err());
    }

    #[tokio::test]
    async fn test_client_leaving_before_join() {
        let h = harness();
        h.room.connect().await.unwrap();
        drop(h.client);
        let err = h.room.wait_for_participant().await.unwrap_err();
        assert!(err.to_string().contains("closed before a participant joined"));
    }

    #[tokio::test]
    async fn test_connect_twice_fails() {
        let h = harness();
        h.room.connect().await.unwrap();
        assert!(h.room.connect().await.is_err());
    }

    #[tokio::test]
    async fn test_emit_maps_provider_events() {
        let mut h = harness();
        h.room
            .emit(GenericServerEvent::Transcription {
                text: "hello".into(),
                is_final: true,
            })
            .await
            .unwrap();
        assert_eq!(
            h.server.recv().await,
            Some(ServerMessage::TranscriptionUpdate {
                text: "hello".into(),
                is_final: true
            })
        );

        drop(h.server);
        assert!(h.room.emit(GenericServerEvent::Speaking).await.is_err());
    }
}
