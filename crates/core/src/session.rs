//! Tutoring Session Controller
//!
//! Owns the lifecycle of one participant's session:
//!
//! `AwaitingParticipant → ModeResolved → PlanReady → ModelConstructed → SessionActive → Terminated`
//!
//! with any start-up failure ending in `Errored`. Every step of the start-up
//! sequence is a sequential suspension point. Once the conversation is
//! running, data-channel signals are handled by a separate listener task
//! while the controller waits for the participant to leave.

use crate::{
    content::ContentAccessor,
    generic_types::{ConversationItem, GenericSessionConfig},
    mode::SessionMode,
    plan::build_plan,
    prompt::PromptComposer,
    realtime::{ConversationSession, ModelProvider},
    room::{DataPacket, Participant, RoomEvent, RoomTransport},
    signal::{ControlSignal, parse_signal},
    transcript::{Speaker, TranscriptWriter},
};
use std::{fmt, path::PathBuf, sync::Arc};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};

/// System item injected when the learner raises a hand in hand-raise mode.
pub const HAND_RAISE_PROMPT: &str = "The user has raised their hand. Finish your current sentence, then respond with 'I see you've raised your hand. What's your question?' and wait for their input.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingParticipant,
    ModeResolved,
    PlanReady,
    ModelConstructed,
    SessionActive,
    Terminated,
    Errored,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The room failed before a participant could be served.
    #[error("room transport failed: {0:#}")]
    Transport(anyhow::Error),
    /// The conversational model could not be constructed or started.
    #[error("failed to start the tutoring session: {0:#}")]
    StartFailure(anyhow::Error),
}

/// What a completed session looked like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub participant: Participant,
    pub mode: SessionMode,
    pub sections: usize,
    pub paragraphs: usize,
}

/// Drives one tutoring session from participant join to disconnect.
pub struct SessionController {
    room: Arc<dyn RoomTransport>,
    provider: Arc<dyn ModelProvider>,
    content: Arc<dyn ContentAccessor>,
    composer: PromptComposer,
    transcripts_dir: Option<PathBuf>,
    state: SessionState,
}

impl SessionController {
    pub fn new(
        room: Arc<dyn RoomTransport>,
        provider: Arc<dyn ModelProvider>,
        content: Arc<dyn ContentAccessor>,
        composer: PromptComposer,
    ) -> Self {
        Self {
            room,
            provider,
            content,
            composer,
            transcripts_dir: None,
            state: SessionState::AwaitingParticipant,
        }
    }

    /// Writes a transcript of the session below `dir`.
    pub fn with_transcripts(mut self, dir: impl Into<PathBuf>) -> Self {
        self.transcripts_dir = Some(dir.into());
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs the session to completion.
    ///
    /// Start-up failures are logged and returned; the caller is expected to
    /// end the job rather than continue with a half-initialised session.
    pub async fn run(&mut self) -> Result<SessionSummary, SessionError> {
        match self.drive().await {
            Ok(summary) => {
                self.transition(SessionState::Terminated);
                Ok(summary)
            }
            Err(e) => {
                error!(error = %e, state = %self.state, "Tutoring session failed");
                self.transition(SessionState::Errored);
                Err(e)
            }
        }
    }

    async fn drive(&mut self) -> Result<SessionSummary, SessionError> {
        self.room.connect().await.map_err(SessionError::Transport)?;
        let mut lifecycle = self.room.subscribe();

        info!(room = self.room.name(), "Waiting for participant");
        let participant = self
            .room
            .wait_for_participant()
            .await
            .map_err(SessionError::Transport)?;
        let mode = SessionMode::from_key(participant.mode_key());
        info!(identity = %participant.identity, %mode, "Participant joined");
        self.transition(SessionState::ModeResolved);

        let plan = build_plan(self.content.as_ref()).await;
        self.transition(SessionState::PlanReady);

        let instructions = self.composer.compose(&plan, mode);
        let transcript = self.open_transcript(mode).await;
        let model = self
            .provider
            .construct(GenericSessionConfig {
                instructions,
                mode,
                study_material: self.content.clone(),
                transcript: transcript.clone(),
            })
            .map_err(SessionError::StartFailure)?;
        self.transition(SessionState::ModelConstructed);

        let conversation = model
            .start(&participant)
            .await
            .map_err(SessionError::StartFailure)?;

        let handler = SignalHandler::new(conversation.clone(), mode, transcript.clone());
        let listener = tokio::spawn(handler.listen(self.room.subscribe()));

        let welcome = self.composer.welcome_message(&plan, mode);
        if let Err(e) = seed_conversation(conversation.as_ref(), &welcome).await {
            listener.abort();
            if let Err(close_err) = conversation.close().await {
                warn!(error = %close_err, "Failed to close conversation after a failed start");
            }
            return Err(SessionError::StartFailure(e));
        }
        if let Some(transcript) = &transcript {
            transcript.record(Speaker::Agent, &welcome).await;
        }
        self.transition(SessionState::SessionActive);

        wait_for_departure(&mut lifecycle, &participant.identity).await;

        listener.abort();
        if let Err(e) = conversation.close().await {
            warn!(error = %e, "Failed to close conversation cleanly");
        }
        Ok(SessionSummary {
            participant,
            mode,
            sections: plan.section_count(),
            paragraphs: plan.paragraph_count(),
        })
    }

    async fn open_transcript(&self, mode: SessionMode) -> Option<Arc<TranscriptWriter>> {
        let dir = self.transcripts_dir.as_ref()?;
        match TranscriptWriter::create(dir, self.room.name(), mode).await {
            Ok(transcript) => {
                info!(path = %transcript.path().display(), "Transcript will be saved");
                Some(Arc::new(transcript))
            }
            Err(e) => {
                error!(error = ?e, "Failed to open transcript, continuing without one");
                None
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        info!(from = %self.state, to = %next, "Session state change");
        self.state = next;
    }
}

/// Enqueues the welcome utterance, then asks for the model's first turn.
async fn seed_conversation(conversation: &dyn ConversationSession, welcome: &str) -> anyhow::Result<()> {
    conversation
        .create_item(ConversationItem::assistant(welcome))
        .await?;
    conversation.create_response().await
}

async fn wait_for_departure(events: &mut broadcast::Receiver<RoomEvent>, identity: &str) {
    loop {
        match events.recv().await {
            Ok(RoomEvent::Disconnected) => {
                info!("Room disconnected");
                return;
            }
            Ok(RoomEvent::ParticipantDisconnected { identity: left }) if left == identity => {
                info!(identity = %left, "Participant left");
                return;
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "Lifecycle watcher lagged behind room events");
            }
            Err(RecvError::Closed) => return,
        }
    }
}

/// Reacts to control signals arriving on the room's data channel.
///
/// Malformed payloads and failed model calls are logged; nothing here ends
/// the session.
pub struct SignalHandler {
    conversation: Arc<dyn ConversationSession>,
    mode: SessionMode,
    transcript: Option<Arc<TranscriptWriter>>,
}

impl SignalHandler {
    pub fn new(
        conversation: Arc<dyn ConversationSession>,
        mode: SessionMode,
        transcript: Option<Arc<TranscriptWriter>>,
    ) -> Self {
        Self {
            conversation,
            mode,
            transcript,
        }
    }

    /// Handles data packets until the room goes away.
    pub async fn listen(self, mut events: broadcast::Receiver<RoomEvent>) {
        loop {
            match events.recv().await {
                Ok(RoomEvent::DataReceived(packet)) => self.handle_packet(&packet).await,
                Ok(RoomEvent::Disconnected) | Err(RecvError::Closed) => break,
                Ok(RoomEvent::ParticipantDisconnected { .. }) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Signal listener lagged, data packets were dropped");
                }
            }
        }
        debug!("Signal listener stopped");
    }

    pub async fn handle_packet(&self, packet: &DataPacket) {
        let signal = match parse_signal(&packet.payload) {
            Ok(signal) => signal,
            Err(e) => {
                warn!(error = %e, topic = ?packet.topic, "Discarding malformed data packet");
                return;
            }
        };

        match signal {
            ControlSignal::Interrupt => {
                info!(sender = ?packet.sender, "Interrupt received");
                self.record(Speaker::System, "User interrupted").await;
                if let Err(e) = self.conversation.interrupt().await {
                    error!(error = %e, "Failed to interrupt the conversation");
                }
            }
            ControlSignal::HandRaise if self.mode.gates_on_hand_raise() => {
                info!(sender = ?packet.sender, "Hand raised");
                self.record(Speaker::System, "User raised hand").await;
                if let Err(e) = self.yield_to_question().await {
                    error!(error = %e, "Failed to hand the floor to the learner");
                }
                if let Err(e) = self.conversation.set_voice_interruptions(true).await {
                    error!(error = %e, "Failed to allow voice interruptions");
                }
            }
            ControlSignal::HandRaise => {
                debug!(mode = %self.mode, "Ignoring hand raise outside hand-raise mode");
            }
            ControlSignal::HandLower if self.mode.gates_on_hand_raise() => {
                info!(sender = ?packet.sender, "Hand lowered");
                if let Err(e) = self.conversation.set_voice_interruptions(false).await {
                    error!(error = %e, "Failed to forbid voice interruptions");
                }
            }
            ControlSignal::HandLower => debug!("Hand lowered"),
            ControlSignal::Unrecognized => debug!("Ignoring data packet without an actionable type"),
        }
    }

    async fn yield_to_question(&self) -> anyhow::Result<()> {
        self.conversation.interrupt().await?;
        self.conversation
            .create_item(ConversationItem::system(HAND_RAISE_PROMPT))
            .await?;
        self.conversation.create_response().await
    }

    async fn record(&self, speaker: Speaker, text: &str) {
        if let Some(transcript) = &self.transcript {
            transcript.record(speaker, text).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        content::InMemoryContentStore,
        generic_types::ItemRole,
        realtime::RealtimeModel,
    };
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::{Notify, oneshot};

    // --- Fakes ---

    struct FakeRoom {
        events: broadcast::Sender<RoomEvent>,
        joined: tokio::sync::Mutex<Option<oneshot::Receiver<Participant>>>,
    }

    impl FakeRoom {
        fn new() -> (Arc<Self>, oneshot::Sender<Participant>) {
            let (events, _) = broadcast::channel(32);
            let (join_tx, join_rx) = oneshot::channel();
            let room = Arc::new(Self {
                events,
                joined: tokio::sync::Mutex::new(Some(join_rx)),
            });
            (room, join_tx)
        }

        fn send_data(&self, payload: &str) {
            let _ = self.events.send(RoomEvent::DataReceived(DataPacket {
                payload: payload.as_bytes().to_vec(),
                topic: None,
                sender: Some("learner".into()),
            }));
        }

        fn disconnect(&self) {
            let _ = self.events.send(RoomEvent::Disconnected);
        }
    }

    #[async_trait]
    impl RoomTransport for FakeRoom {
        fn name(&self) -> &str {
            "test-room"
        }

        async fn connect(&self) -> Result<()> {
            Ok(())
        }

        async fn wait_for_participant(&self) -> Result<Participant> {
            let rx = self
                .joined
                .lock()
                .await
                .take()
                .ok_or_else(|| anyhow!("already joined"))?;
            Ok(rx.await?)
        }

        fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
            self.events.subscribe()
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Item(ConversationItem),
        Response,
        Interrupt,
        VoiceInterruptions(bool),
        Close,
    }

    #[derive(Default)]
    struct FakeConversation {
        calls: Mutex<Vec<Call>>,
        changed: Notify,
        reject_items: bool,
    }

    impl FakeConversation {
        fn push(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
            self.changed.notify_waiters();
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, call: &Call) -> usize {
            self.calls().iter().filter(|c| *c == call).count()
        }

        /// Waits until `predicate` holds for the recorded calls.
        async fn wait_until(&self, predicate: impl Fn(&[Call]) -> bool) {
            tokio::time::timeout(Duration::from_secs(5), async {
                loop {
                    let notified = self.changed.notified();
                    if predicate(&self.calls()) {
                        return;
                    }
                    notified.await;
                }
            })
            .await
            .expect("condition was not reached in time");
        }
    }

    #[async_trait]
    impl ConversationSession for FakeConversation {
        async fn create_item(&self, item: ConversationItem) -> Result<()> {
            if self.reject_items {
                return Err(anyhow!("conversation rejected the item"));
            }
            self.push(Call::Item(item));
            Ok(())
        }

        async fn create_response(&self) -> Result<()> {
            self.push(Call::Response);
            Ok(())
        }

        async fn interrupt(&self) -> Result<()> {
            self.push(Call::Interrupt);
            Ok(())
        }

        async fn set_voice_interruptions(&self, allowed: bool) -> Result<()> {
            self.push(Call::VoiceInterruptions(allowed));
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.push(Call::Close);
            Ok(())
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Failure {
        None,
        Construct,
        Start,
        Seed,
    }

    struct FakeProvider {
        conversation: Arc<FakeConversation>,
        instructions: Mutex<Option<String>>,
        mode: Mutex<Option<SessionMode>>,
        failure: Failure,
    }

    impl FakeProvider {
        fn new(failure: Failure) -> Arc<Self> {
            Arc::new(Self {
                conversation: Arc::new(FakeConversation {
                    reject_items: failure == Failure::Seed,
                    ..Default::default()
                }),
                instructions: Mutex::new(None),
                mode: Mutex::new(None),
                failure,
            })
        }
    }

    struct FakeModel {
        conversation: Arc<FakeConversation>,
        fail_start: bool,
    }

    impl ModelProvider for FakeProvider {
        fn construct(&self, config: GenericSessionConfig) -> Result<Box<dyn RealtimeModel>> {
            if self.failure == Failure::Construct {
                return Err(anyhow!("model rejected configuration"));
            }
            *self.instructions.lock().unwrap() = Some(config.instructions);
            *self.mode.lock().unwrap() = Some(config.mode);
            Ok(Box::new(FakeModel {
                conversation: self.conversation.clone(),
                fail_start: self.failure == Failure::Start,
            }))
        }
    }

    #[async_trait]
    impl RealtimeModel for FakeModel {
        async fn start(&self, _participant: &Participant) -> Result<Arc<dyn ConversationSession>> {
            if self.fail_start {
                return Err(anyhow!("transport rejected the session"));
            }
            Ok(self.conversation.clone())
        }
    }

    fn two_section_store() -> Arc<InMemoryContentStore> {
        Arc::new(
            InMemoryContentStore::new()
                .with_section(1, ["A", "B"])
                .with_section(2, ["C"]),
        )
    }

    fn controller(
        room: Arc<FakeRoom>,
        provider: Arc<FakeProvider>,
        content: Arc<InMemoryContentStore>,
    ) -> SessionController {
        SessionController::new(room, provider, content, PromptComposer::new("philosophy"))
    }

    fn is_welcomed(calls: &[Call]) -> bool {
        calls.contains(&Call::Response)
    }

    // --- Tests ---

    #[tokio::test]
    async fn test_full_session_lifecycle() {
        let (room, join) = FakeRoom::new();
        let provider = FakeProvider::new(Failure::None);
        let conversation = provider.conversation.clone();
        let mut controller = controller(room.clone(), provider.clone(), two_section_store());
        assert_eq!(controller.state(), SessionState::AwaitingParticipant);

        let session = tokio::spawn(async move {
            let result = controller.run().await;
            (result, controller.state())
        });
        join.send(Participant::new("CIRCLE-42")).unwrap();
        conversation.wait_until(is_welcomed).await;
        room.disconnect();

        let (result, state) = session.await.unwrap();
        let summary = result.unwrap();
        assert_eq!(state, SessionState::Terminated);
        assert_eq!(summary.mode, SessionMode::ComprehensionCheck);
        assert_eq!(summary.sections, 2);
        assert_eq!(summary.paragraphs, 3);
        assert_eq!(
            *provider.mode.lock().unwrap(),
            Some(SessionMode::ComprehensionCheck)
        );

        let instructions = provider.instructions.lock().unwrap().clone().unwrap();
        assert!(instructions.contains("A B C"));
        assert!(instructions.contains("in their own words"));

        let calls = conversation.calls();
        match &calls[0] {
            Call::Item(item) => {
                assert_eq!(item.role, ItemRole::Assistant);
                assert!(item.text.contains("covering 2 sections"));
            }
            other => panic!("expected the welcome item first, got {:?}", other),
        }
        assert_eq!(calls[1], Call::Response);
        assert_eq!(calls.last(), Some(&Call::Close));
    }

    #[tokio::test]
    async fn test_empty_content_still_starts() {
        let (room, join) = FakeRoom::new();
        let provider = FakeProvider::new(Failure::None);
        let conversation = provider.conversation.clone();
        let mut controller = controller(
            room.clone(),
            provider.clone(),
            Arc::new(InMemoryContentStore::new()),
        );

        let session = tokio::spawn(async move { controller.run().await });
        join.send(Participant::new("learner")).unwrap();
        conversation.wait_until(is_welcomed).await;
        room.disconnect();

        let summary = session.await.unwrap().unwrap();
        assert_eq!(summary.sections, 0);
        assert_eq!(summary.mode, SessionMode::SelfPaced);
        assert!(!provider.instructions.lock().unwrap().clone().unwrap().is_empty());
        match &conversation.calls()[0] {
            Call::Item(item) => assert!(item.text.contains("covering 0 sections")),
            other => panic!("expected the welcome item first, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_interrupt_signal_triggers_exactly_one_interrupt() {
        let (room, join) = FakeRoom::new();
        let provider = FakeProvider::new(Failure::None);
        let conversation = provider.conversation.clone();
        let mut controller = controller(room.clone(), provider, two_section_store());

        let session = tokio::spawn(async move { controller.run().await });
        join.send(Participant::new("SQUARE-1")).unwrap();
        conversation.wait_until(is_welcomed).await;

        room.send_data(r#"{"type":"interrupt"}"#);
        conversation
            .wait_until(|calls| calls.contains(&Call::Interrupt))
            .await;
        room.disconnect();
        session.await.unwrap().unwrap();

        assert_eq!(conversation.count(&Call::Interrupt), 1);
    }

    #[tokio::test]
    async fn test_other_and_malformed_payloads_are_ignored() {
        let (room, join) = FakeRoom::new();
        let provider = FakeProvider::new(Failure::None);
        let conversation = provider.conversation.clone();
        let mut controller = controller(room.clone(), provider, two_section_store());

        let session = tokio::spawn(async move { controller.run().await });
        join.send(Participant::new("SQUARE-1")).unwrap();
        conversation.wait_until(is_welcomed).await;

        room.send_data(r#"{"type":"other"}"#);
        room.send_data("definitely not json");
        room.send_data(r#"{"type":"hand_raise"}"#);
        // Signals are handled in order, so once this one lands the three
        // above have already been processed by the still-running listener.
        room.send_data(r#"{"type":"interrupt"}"#);
        conversation
            .wait_until(|calls| calls.contains(&Call::Interrupt))
            .await;
        room.disconnect();
        session.await.unwrap().unwrap();

        assert_eq!(conversation.count(&Call::Interrupt), 1);
        assert_eq!(conversation.count(&Call::Response), 1);
    }

    #[tokio::test]
    async fn test_interrupt_before_listener_registration_is_dropped() {
        let (room, join) = FakeRoom::new();
        let provider = FakeProvider::new(Failure::None);
        let conversation = provider.conversation.clone();
        let mut controller = controller(room.clone(), provider, two_section_store());

        let session = tokio::spawn(async move { controller.run().await });
        // Nobody is listening for signals yet: the controller is still
        // waiting for a participant.
        tokio::task::yield_now().await;
        room.send_data(r#"{"type":"interrupt"}"#);
        join.send(Participant::new("SQUARE-1")).unwrap();
        conversation.wait_until(is_welcomed).await;
        room.disconnect();
        session.await.unwrap().unwrap();

        assert_eq!(conversation.count(&Call::Interrupt), 0);
    }

    #[tokio::test]
    async fn test_hand_raise_yields_the_floor_in_hand_raise_mode() {
        let (room, join) = FakeRoom::new();
        let provider = FakeProvider::new(Failure::None);
        let conversation = provider.conversation.clone();
        let mut controller = controller(room.clone(), provider, two_section_store());

        let session = tokio::spawn(async move { controller.run().await });
        join.send(Participant::new("TRIANGLE-9")).unwrap();
        conversation.wait_until(is_welcomed).await;

        room.send_data(r#"{"type":"hand_raise"}"#);
        conversation
            .wait_until(|calls| calls.iter().filter(|c| **c == Call::Response).count() == 2)
            .await;
        room.disconnect();
        session.await.unwrap().unwrap();

        let calls = conversation.calls();
        assert_eq!(calls[2], Call::Interrupt);
        assert_eq!(calls[3], Call::Item(ConversationItem::system(HAND_RAISE_PROMPT)));
        assert_eq!(calls[4], Call::Response);
    }

    #[tokio::test]
    async fn test_construct_failure_is_errored() {
        let (room, join) = FakeRoom::new();
        let provider = FakeProvider::new(Failure::Construct);
        let conversation = provider.conversation.clone();
        let mut controller = controller(room, provider, two_section_store());

        join.send(Participant::new("CIRCLE-1")).unwrap();
        let err = controller.run().await.unwrap_err();

        assert!(matches!(err, SessionError::StartFailure(_)));
        assert!(err.to_string().contains("model rejected configuration"));
        assert_eq!(controller.state(), SessionState::Errored);
        assert!(conversation.calls().is_empty());
    }

    #[tokio::test]
    async fn test_start_failure_is_errored() {
        let (room, join) = FakeRoom::new();
        let provider = FakeProvider::new(Failure::Start);
        let conversation = provider.conversation.clone();
        let mut controller = controller(room, provider, two_section_store());

        join.send(Participant::new("CIRCLE-1")).unwrap();
        let err = controller.run().await.unwrap_err();

        assert!(matches!(err, SessionError::StartFailure(_)));
        assert_eq!(controller.state(), SessionState::Errored);
        assert!(conversation.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_welcome_closes_the_conversation() {
        let (room, join) = FakeRoom::new();
        let provider = FakeProvider::new(Failure::Seed);
        let conversation = provider.conversation.clone();
        let mut controller = controller(room, provider, two_section_store());

        join.send(Participant::new("SQUARE-1")).unwrap();
        let err = controller.run().await.unwrap_err();

        assert!(matches!(err, SessionError::StartFailure(_)));
        assert!(err.to_string().contains("conversation rejected the item"));
        assert_eq!(controller.state(), SessionState::Errored);
        assert_eq!(conversation.calls(), vec![Call::Close]);
    }

    #[tokio::test]
    async fn test_hand_signals_toggle_voice_interruptions_in_hand_raise_mode() {
        let (room, join) = FakeRoom::new();
        let provider = FakeProvider::new(Failure::None);
        let conversation = provider.conversation.clone();
        let mut controller = controller(room.clone(), provider.clone(), two_section_store());

        let session = tokio::spawn(async move { controller.run().await });
        join.send(Participant::new("TRIANGLE-3")).unwrap();
        conversation.wait_until(is_welcomed).await;

        room.send_data(r#"{"type":"hand_raise"}"#);
        conversation
            .wait_until(|calls| calls.contains(&Call::VoiceInterruptions(true)))
            .await;
        room.send_data(r#"{"type":"hand_lower"}"#);
        conversation
            .wait_until(|calls| calls.contains(&Call::VoiceInterruptions(false)))
            .await;
        room.disconnect();
        session.await.unwrap().unwrap();

        assert_eq!(*provider.mode.lock().unwrap(), Some(SessionMode::HandRaise));
        let toggles: Vec<Call> = conversation
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::VoiceInterruptions(_)))
            .collect();
        assert_eq!(
            toggles,
            vec![Call::VoiceInterruptions(true), Call::VoiceInterruptions(false)]
        );
    }

    #[tokio::test]
    async fn test_hand_signals_leave_voice_interruptions_alone_outside_hand_raise_mode() {
        let (room, join) = FakeRoom::new();
        let provider = FakeProvider::new(Failure::None);
        let conversation = provider.conversation.clone();
        let mut controller = controller(room.clone(), provider, two_section_store());

        let session = tokio::spawn(async move { controller.run().await });
        join.send(Participant::new("CIRCLE-3")).unwrap();
        conversation.wait_until(is_welcomed).await;

        room.send_data(r#"{"type":"hand_raise"}"#);
        room.send_data(r#"{"type":"hand_lower"}"#);
        room.send_data(r#"{"type":"interrupt"}"#);
        conversation
            .wait_until(|calls| calls.contains(&Call::Interrupt))
            .await;
        room.disconnect();
        session.await.unwrap().unwrap();

        assert!(!conversation
            .calls()
            .iter()
            .any(|c| matches!(c, Call::VoiceInterruptions(_))));
    }

    #[tokio::test]
    async fn test_room_closing_before_join_is_transport_error() {
        let (room, join) = FakeRoom::new();
        drop(join);
        let provider = FakeProvider::new(Failure::None);
        let mut controller = controller(room, provider, two_section_store());

        let err = controller.run().await.unwrap_err();

        assert!(matches!(err, SessionError::Transport(_)));
        assert_eq!(controller.state(), SessionState::Errored);
    }

    #[tokio::test]
    async fn test_transcript_records_welcome_and_signals() {
        let dir = tempfile::tempdir().unwrap();
        let (room, join) = FakeRoom::new();
        let provider = FakeProvider::new(Failure::None);
        let conversation = provider.conversation.clone();
        let mut controller =
            controller(room.clone(), provider, two_section_store()).with_transcripts(dir.path());

        let session = tokio::spawn(async move { controller.run().await });
        join.send(Participant::new("SQUARE-1")).unwrap();
        conversation.wait_until(is_welcomed).await;
        room.send_data(r#"{"type":"interrupt"}"#);
        conversation
            .wait_until(|calls| calls.contains(&Call::Interrupt))
            .await;
        room.disconnect();
        session.await.unwrap().unwrap();

        let room_dir = dir.path().join("test-room");
        let file = std::fs::read_dir(&room_dir)
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        let text = std::fs::read_to_string(file).unwrap();
        assert!(text.contains("Mode: self_paced"));
        assert!(text.contains("Agent: Welcome to your philosophy tutorial session!"));
        assert!(text.contains("System: User interrupted"));
    }
}
