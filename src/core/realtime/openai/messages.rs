//! Wire types for the OpenAI Realtime API: the negotiation REST exchange and
//! the JSON events flowing over the session socket. Only the events the
//! bridge acts on are modeled; everything else parses as `Unknown`.

use serde::{Deserialize, Serialize};

use crate::core::realtime::base::RealtimeSessionConfig;

// =============================================================================
// Negotiation (REST)
// =============================================================================

/// Body of the ephemeral-credential request.
#[derive(Debug, Serialize)]
pub struct NegotiationRequest {
    pub model: String,
    pub voice: String,
    pub modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_response_output_tokens: Option<i32>,
}

impl From<&RealtimeSessionConfig> for NegotiationRequest {
    fn from(config: &RealtimeSessionConfig) -> Self {
        Self {
            model: config.model.clone(),
            voice: config.voice.clone(),
            modalities: config.modalities.clone(),
            instructions: config.instructions.clone(),
            temperature: config.temperature,
            max_response_output_tokens: config.max_output_tokens,
        }
    }
}

/// Reply from the negotiation endpoint.
#[derive(Debug, Deserialize)]
pub struct NegotiationResponse {
    #[serde(default)]
    pub id: Option<String>,
    pub client_secret: ClientSecret,
}

#[derive(Debug, Deserialize)]
pub struct ClientSecret {
    pub value: String,
    #[serde(default)]
    pub expires_at: Option<i64>,
}

// =============================================================================
// Client events (bridge -> provider)
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionUpdateConfig },

    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    #[serde(rename = "response.create")]
    ResponseCreate {},
}

#[derive(Debug, Default, Serialize)]
pub struct SessionUpdateConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_response_output_tokens: Option<i32>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tools: Vec<ToolDef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
}

/// Flattened tool definition as the provider expects it.
#[derive(Debug, Serialize)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ConversationItem {
    /// A `function_call_output` item answering a tool invocation.
    pub fn function_call_output(call_id: &str, output: &str) -> Self {
        Self {
            item_type: "function_call_output".to_string(),
            call_id: Some(call_id.to_string()),
            output: Some(output.to_string()),
        }
    }
}

// =============================================================================
// Server events (provider -> bridge)
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated { session: SessionMeta },

    #[serde(rename = "session.updated")]
    SessionUpdated { session: SessionMeta },

    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        delta: String,
        #[serde(default)]
        item_id: Option<String>,
    },

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,

    #[serde(rename = "response.output_item.added")]
    OutputItemAdded { item: OutputItem },

    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        call_id: String,
        arguments: String,
        #[serde(default)]
        item_id: Option<String>,
    },

    #[serde(rename = "response.done")]
    ResponseDone { response: ResponseMeta },

    #[serde(rename = "error")]
    Error { error: ApiError },

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub struct SessionMeta {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct OutputItem {
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseMeta {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiError {
    #[serde(rename = "type", default)]
    pub error_type: String,
    pub message: String,
}
