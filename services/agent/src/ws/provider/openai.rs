//! Handles the real-time WebSocket connection to OpenAI for voice interaction.
//!
//! The model is configured with the composed instructions and with every tool
//! the in-process `StudyMaterialService` advertises over MCP. Function calls
//! coming back from the model are executed against that service and their
//! results fed back into the conversation.

use crate::{
    audio_utils,
    config::{Config, Voice},
    ws::room::WebSocketRoom,
};
use anyhow::{Context, Result, anyhow, bail};
use async_openai::types::realtime::{
    self as oai_realtime, ClientEvent as OAIClientEvent, ServerEvent as OAIServerEvent,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Sink, SinkExt, StreamExt};
use lectern_core::{
    generic_types::{ConversationItem, GenericServerEvent, GenericSessionConfig, ItemRole},
    mode::SessionMode,
    realtime::{ConversationSession, ModelProvider, RealtimeModel},
    room::Participant,
    tools::StudyMaterialService,
    transcript::{Speaker, TranscriptWriter},
};
use rmcp::{
    RoleClient, ServiceExt,
    model::{CallToolRequestParam, JsonObject, RawContent},
    service::RunningService,
};
use std::sync::Arc;
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message as WsMessage},
};
use tracing::{Instrument, debug, error, info, warn};

const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";
const COMMAND_BUFFER_CAPACITY: usize = 32;

type McpClient = RunningService<RoleClient, ()>;

/// Builds OpenAI Realtime models bound to one WebSocket room.
pub struct OpenAIRealtimeProvider {
    config: Arc<Config>,
    room: Arc<WebSocketRoom>,
}

impl OpenAIRealtimeProvider {
    pub fn new(config: Arc<Config>, room: Arc<WebSocketRoom>) -> Self {
        Self { config, room }
    }
}

impl ModelProvider for OpenAIRealtimeProvider {
    fn construct(&self, session: GenericSessionConfig) -> Result<Box<dyn RealtimeModel>> {
        if session.instructions.trim().is_empty() {
            bail!("Refusing to build a realtime model without instructions");
        }
        Ok(Box::new(OpenAIRealtimeModel {
            config: self.config.clone(),
            room: self.room.clone(),
            session,
        }))
    }
}

pub struct OpenAIRealtimeModel {
    config: Arc<Config>,
    room: Arc<WebSocketRoom>,
    session: GenericSessionConfig,
}

#[async_trait]
impl RealtimeModel for OpenAIRealtimeModel {
    async fn start(&self, participant: &Participant) -> Result<Arc<dyn ConversationSession>> {
        let audio_rx = self
            .room
            .take_audio()
            .await
            .context("Room audio is already attached to a model")?;

        // Serve the study material tool in-process and talk to it as an MCP client.
        let (server_transport, client_transport) = tokio::io::duplex(4096);
        let tool_service = StudyMaterialService::new(self.session.study_material.clone());
        let tool_handle = tokio::spawn(async move {
            match tool_service.serve(server_transport).await {
                Ok(service) => {
                    let _ = service.waiting().await;
                }
                Err(e) => error!(error = ?e, "Study material tool service failed to start"),
            }
        });
        let mcp_client = ().serve(client_transport).await?;
        let tools = mcp_client
            .list_all_tools()
            .await?
            .into_iter()
            .map(|t| {
                Ok(oai_realtime::ToolDefinition::Function {
                    name: t.name.to_string(),
                    description: t.description.map(|d| d.to_string()).unwrap_or_default(),
                    parameters: serde_json::to_value(&*t.input_schema)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let url = format!("{}?model={}", OPENAI_REALTIME_URL, self.config.realtime_model);
        let mut request = url.into_client_request()?;
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {}", self.config.openai_api_key).parse()?,
        );
        request
            .headers_mut()
            .insert("OpenAI-Beta", "realtime=v1".parse()?);

        let (ws_stream, _) = connect_async(request)
            .await
            .context("Failed to connect to OpenAI Realtime WebSocket")?;
        let (mut openai_tx, openai_rx) = ws_stream.split();
        info!(
            model = %self.config.realtime_model,
            sample_rate = audio_utils::OPENAI_REALTIME_API_PCM16_SAMPLE_RATE,
            "Connected to OpenAI Realtime API."
        );

        let event = OAIClientEvent::SessionUpdate(oai_realtime::SessionUpdateEvent {
            session: session_resource(
                &self.config,
                &self.session.instructions,
                self.session.mode,
                tools,
            ),
            event_id: None,
        });
        send_event(&mut openai_tx, &event).await?;

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER_CAPACITY);
        let relay = Relay {
            room: self.room.clone(),
            mcp_client,
            transcript: self.session.transcript.clone(),
        };
        let room = self.room.clone();
        let span = tracing::info_span!("openai_relay", identity = %participant.identity);
        let relay_handle = tokio::spawn(
            async move {
                if let Err(e) = relay.run(openai_tx, openai_rx, audio_rx, commands_rx).await {
                    error!(error = ?e, "Realtime provider task failed");
                    let _ = room
                        .emit(GenericServerEvent::Error(format!(
                            "Voice connection failed: {}",
                            e
                        )))
                        .await;
                }
                debug!("Realtime relay finished");
            }
            .instrument(span),
        );

        Ok(Arc::new(OpenAIConversation {
            commands: commands_tx,
            room: self.room.clone(),
            tasks: Mutex::new(vec![relay_handle, tool_handle]),
        }))
    }
}

/// Server VAD settings. `interrupt` decides whether the learner's speech
/// cancels a response in progress.
pub fn turn_detection(interrupt: bool) -> oai_realtime::TurnDetection {
    oai_realtime::TurnDetection::ServerVAD {
        threshold: 0.5,
        prefix_padding_ms: 200,
        silence_duration_ms: 700,
        interrupt_response: Some(interrupt),
        create_response: Some(true),
    }
}

/// Session parameters sent in the initial `session.update`.
///
/// In hand-raise mode speech does not cut the tutor off until a hand is raised.
pub fn session_resource(
    config: &Config,
    instructions: &str,
    mode: SessionMode,
    tools: Vec<oai_realtime::ToolDefinition>,
) -> oai_realtime::SessionResource {
    let voice = match config.voice {
        Voice::Alloy => oai_realtime::RealtimeVoice::Alloy,
        Voice::Echo => oai_realtime::RealtimeVoice::Echo,
        Voice::Shimmer => oai_realtime::RealtimeVoice::Shimmer,
    };
    oai_realtime::SessionResource {
        model: Some(config.realtime_model.clone()),
        modalities: Some(vec!["text".to_string(), "audio".to_string()]),
        instructions: Some(instructions.to_string()),
        voice: Some(voice),
        input_audio_format: Some(oai_realtime::AudioFormat::PCM16),
        output_audio_format: Some(oai_realtime::AudioFormat::PCM16),
        input_audio_transcription: Some(oai_realtime::AudioTranscription {
            model: Some("whisper-1".to_string()),
            ..Default::default()
        }),
        turn_detection: Some(turn_detection(!mode.gates_on_hand_raise())),
        tools: Some(tools),
        ..Default::default()
    }
}

/// Converts a conversation item into the provider's message item.
pub fn message_item(item: &ConversationItem) -> oai_realtime::Item {
    let (role, content_type) = match item.role {
        ItemRole::System => (
            oai_realtime::ItemRole::System,
            oai_realtime::ItemContentType::InputText,
        ),
        ItemRole::User => (
            oai_realtime::ItemRole::User,
            oai_realtime::ItemContentType::InputText,
        ),
        ItemRole::Assistant => (
            oai_realtime::ItemRole::Assistant,
            oai_realtime::ItemContentType::Text,
        ),
    };
    oai_realtime::Item {
        r#type: Some(oai_realtime::ItemType::Message),
        role: Some(role),
        content: Some(vec![oai_realtime::ItemContent {
            r#type: content_type,
            text: Some(item.text.clone()),
            audio: None,
            transcript: None,
        }]),
        id: None,
        status: None,
        call_id: None,
        name: None,
        arguments: None,
        output: None,
    }
}

fn function_call_output(call_id: String, output: String) -> oai_realtime::Item {
    oai_realtime::Item {
        r#type: Some(oai_realtime::ItemType::FunctionCallOutput),
        call_id: Some(call_id),
        output: Some(output),
        id: None,
        status: None,
        role: None,
        content: None,
        name: None,
        arguments: None,
    }
}

/// A function call the model asked for.
#[derive(Debug, PartialEq)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    pub arguments: JsonObject,
}

impl ToolCall {
    /// Extracts a function call from a completed output item, if it is one.
    pub fn from_item(item: &oai_realtime::Item) -> Result<Option<Self>> {
        if !matches!(item.r#type, Some(oai_realtime::ItemType::FunctionCall)) {
            return Ok(None);
        }
        let call_id = item.call_id.clone().context("Function call without call_id")?;
        let name = item.name.clone().context("Function call without name")?;
        let arguments = match item.arguments.as_deref() {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw)
                .with_context(|| format!("Invalid arguments for tool '{}'", name))?,
            _ => JsonObject::new(),
        };
        Ok(Some(Self {
            call_id,
            name,
            arguments,
        }))
    }
}

/// What the relay does with one event from the model.
#[derive(Debug, Default, PartialEq)]
pub struct Reaction {
    pub forward: Option<GenericServerEvent>,
    pub record: Option<(Speaker, String)>,
    pub run_tool: bool,
}

impl Reaction {
    fn forward(event: GenericServerEvent) -> Self {
        Self {
            forward: Some(event),
            ..Default::default()
        }
    }
}

/// Decides how a server event is relayed to the learner and the transcript.
pub fn react(event: &OAIServerEvent) -> Reaction {
    match event {
        OAIServerEvent::ConversationItemInputAudioTranscriptionDelta(e) => {
            Reaction::forward(GenericServerEvent::Transcription {
                text: e.delta.clone(),
                is_final: false,
            })
        }
        OAIServerEvent::ConversationItemInputAudioTranscriptionCompleted(e) => Reaction {
            forward: Some(GenericServerEvent::Transcription {
                text: e.transcript.clone(),
                is_final: true,
            }),
            record: Some((Speaker::User, e.transcript.clone())),
            run_tool: false,
        },
        OAIServerEvent::ResponseAudioDelta(e) => {
            Reaction::forward(GenericServerEvent::AudioChunk(e.delta.clone()))
        }
        OAIServerEvent::ResponseAudioTranscriptDone(e) => Reaction {
            record: Some((Speaker::Agent, e.transcript.clone())),
            ..Default::default()
        },
        OAIServerEvent::ResponseCreated(_) => Reaction::forward(GenericServerEvent::Speaking),
        OAIServerEvent::ResponseDone(_) => Reaction::forward(GenericServerEvent::SpeakingDone),
        // Server VAD cancels the response when the learner starts talking.
        OAIServerEvent::InputAudioBufferSpeechStarted(_) => {
            Reaction::forward(GenericServerEvent::Interrupted)
        }
        OAIServerEvent::ResponseOutputItemDone(e) => Reaction {
            run_tool: matches!(e.item.r#type, Some(oai_realtime::ItemType::FunctionCall)),
            ..Default::default()
        },
        OAIServerEvent::Error(e) => {
            Reaction::forward(GenericServerEvent::Error(e.error.message.clone()))
        }
        _ => Reaction::default(),
    }
}

/// Proxies audio and events between the room and OpenAI.
struct Relay {
    room: Arc<WebSocketRoom>,
    mcp_client: McpClient,
    transcript: Option<Arc<TranscriptWriter>>,
}

impl Relay {
    async fn run<W, R>(
        self,
        mut openai_tx: W,
        mut openai_rx: R,
        mut audio_rx: mpsc::Receiver<Bytes>,
        mut commands_rx: mpsc::Receiver<OAIClientEvent>,
    ) -> Result<()>
    where
        W: Sink<WsMessage> + Unpin,
        W::Error: std::error::Error + Send + Sync + 'static,
        R: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        loop {
            tokio::select! {
                biased;
                command = commands_rx.recv() => match command {
                    Some(event) => send_event(&mut openai_tx, &event).await?,
                    None => {
                        debug!("Conversation handle dropped, closing relay");
                        break;
                    }
                },
                Some(data) = audio_rx.recv() => {
                    let samples = audio_utils::pcm16_from_le_bytes(&data);
                    let append_event = oai_realtime::InputAudioBufferAppendEvent {
                        audio: audio_utils::encode_i16(&samples),
                        event_id: None,
                    };
                    send_event(&mut openai_tx, &OAIClientEvent::InputAudioBufferAppend(append_event)).await?;
                },
                frame = openai_rx.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<OAIServerEvent>(&text) {
                            Ok(event) => self.handle_event(event, &mut openai_tx).await?,
                            Err(e) => debug!(error = %e, "Skipping unparsed realtime event"),
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        info!("OpenAI Realtime connection closed.");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                },
            }
        }
        let _ = self.mcp_client.cancel().await;
        Ok(())
    }

    async fn handle_event<W>(&self, event: OAIServerEvent, openai_tx: &mut W) -> Result<()>
    where
        W: Sink<WsMessage> + Unpin,
        W::Error: std::error::Error + Send + Sync + 'static,
    {
        if let OAIServerEvent::Error(e) = &event {
            warn!(message = %e.error.message, "OpenAI Realtime API reported an error");
        }
        let reaction = react(&event);
        if let Some(forward) = reaction.forward {
            self.room.emit(forward).await?;
        }
        if let (Some((speaker, text)), Some(transcript)) = (reaction.record, &self.transcript) {
            transcript.record(speaker, &text).await;
        }
        if reaction.run_tool {
            if let OAIServerEvent::ResponseOutputItemDone(e) = event {
                match ToolCall::from_item(&e.item) {
                    Ok(Some(call)) => self.answer_tool_call(call, openai_tx).await?,
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Ignoring malformed function call"),
                }
            }
        }
        Ok(())
    }

    /// Runs a tool over MCP and feeds its output back so the model continues.
    async fn answer_tool_call<W>(&self, call: ToolCall, openai_tx: &mut W) -> Result<()>
    where
        W: Sink<WsMessage> + Unpin,
        W::Error: std::error::Error + Send + Sync + 'static,
    {
        info!(tool = %call.name, args = ?call.arguments, "Model requested a tool");
        let output = match self
            .mcp_client
            .peer()
            .call_tool(CallToolRequestParam {
                name: call.name.clone().into(),
                arguments: Some(call.arguments),
            })
            .await
        {
            Ok(result) => match result.content.and_then(|mut content| content.pop()) {
                Some(annotated) => match annotated.raw {
                    RawContent::Text(text_content) => text_content.text,
                    _ => "{\"error\": \"Unexpected content type from tool\"}".to_string(),
                },
                None => "{\"error\": \"Tool returned no content\"}".to_string(),
            },
            Err(e) => {
                error!(tool = %call.name, error = ?e, "Tool call failed");
                serde_json::json!({ "error": e.to_string() }).to_string()
            }
        };

        let create_event = oai_realtime::ConversationItemCreateEvent {
            item: function_call_output(call.call_id, output),
            event_id: None,
            previous_item_id: None,
        };
        send_event(openai_tx, &OAIClientEvent::ConversationItemCreate(create_event)).await?;
        let response_event = oai_realtime::ResponseCreateEvent {
            response: None,
            event_id: None,
        };
        send_event(openai_tx, &OAIClientEvent::ResponseCreate(response_event)).await
    }
}

async fn send_event<W>(openai_tx: &mut W, event: &OAIClientEvent) -> Result<()>
where
    W: Sink<WsMessage> + Unpin,
    W::Error: std::error::Error + Send + Sync + 'static,
{
    openai_tx
        .send(WsMessage::Text(serde_json::to_string(event)?.into()))
        .await?;
    Ok(())
}

/// The controller's handle on a running OpenAI conversation.
pub struct OpenAIConversation {
    commands: mpsc::Sender<OAIClientEvent>,
    room: Arc<WebSocketRoom>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl OpenAIConversation {
    async fn dispatch(&self, event: OAIClientEvent) -> Result<()> {
        self.commands
            .send(event)
            .await
            .map_err(|_| anyhow!("OpenAI conversation is closed"))
    }
}

#[async_trait]
impl ConversationSession for OpenAIConversation {
    async fn create_item(&self, item: ConversationItem) -> Result<()> {
        let create_event = oai_realtime::ConversationItemCreateEvent {
            item: message_item(&item),
            event_id: None,
            previous_item_id: None,
        };
        self.dispatch(OAIClientEvent::ConversationItemCreate(create_event))
            .await
    }

    async fn create_response(&self) -> Result<()> {
        let response_event = oai_realtime::ResponseCreateEvent {
            response: None,
            event_id: None,
        };
        self.dispatch(OAIClientEvent::ResponseCreate(response_event))
            .await
    }

    async fn interrupt(&self) -> Result<()> {
        self.dispatch(OAIClientEvent::ResponseCancel(
            oai_realtime::ResponseCancelEvent { event_id: None },
        ))
        .await?;
        // Tell the client to drop audio it has already buffered.
        self.room.emit(GenericServerEvent::Interrupted).await
    }

    async fn set_voice_interruptions(&self, allowed: bool) -> Result<()> {
        debug!(allowed, "Updating voice interruption setting");
        let update = oai_realtime::SessionUpdateEvent {
            session: oai_realtime::SessionResource {
                turn_detection: Some(turn_detection(allowed)),
                ..Default::default()
            },
            event_id: None,
        };
        self.dispatch(OAIClientEvent::SessionUpdate(update)).await
    }

    async fn close(&self) -> Result<()> {
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        Ok(())
    }
}
