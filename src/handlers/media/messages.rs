//! Twilio media-stream wire frames.
//!
//! Every frame on the media socket is a JSON object tagged by an `event`
//! field. Field names on this leg are camelCase.

use serde::{Deserialize, Serialize};

/// Frames the telephony provider sends us.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundFrame {
    /// First frame after the socket opens.
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },

    /// Stream metadata; carries the identifiers that tie the socket to a call.
    Start { start: StartMeta },

    /// One chunk of caller audio.
    Media { media: MediaPayload },

    /// The provider is done sending audio.
    Stop {
        #[serde(default)]
        stop: Option<StopMeta>,
    },

    /// Echo of a mark we sent, after all audio queued before it has played.
    Mark { mark: MarkPayload },

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMeta {
    pub stream_sid: String,
    pub call_sid: String,
    #[serde(default)]
    pub account_sid: Option<String>,
    #[serde(default)]
    pub media_format: Option<MediaFormat>,
}

#[derive(Debug, Deserialize)]
pub struct MediaFormat {
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default, rename = "sampleRate")]
    pub sample_rate: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct MediaPayload {
    /// Base64-encoded audio.
    pub payload: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopMeta {
    #[serde(default)]
    pub call_sid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

/// Frames we send to the telephony provider.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundFrame {
    /// One chunk of agent audio.
    #[serde(rename_all = "camelCase")]
    Media {
        stream_sid: String,
        media: OutboundMedia,
    },

    /// Named checkpoint; the provider echoes it back once playback reaches it.
    #[serde(rename_all = "camelCase")]
    Mark { stream_sid: String, mark: MarkName },

    /// Drop any audio the provider has buffered but not yet played.
    #[serde(rename_all = "camelCase")]
    Clear { stream_sid: String },
}

#[derive(Debug, Serialize)]
pub struct OutboundMedia {
    /// Base64-encoded audio.
    pub payload: String,
}

#[derive(Debug, Serialize)]
pub struct MarkName {
    pub name: String,
}

impl OutboundFrame {
    pub fn media(stream_sid: &str, payload_b64: String) -> Self {
        Self::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia {
                payload: payload_b64,
            },
        }
    }

    pub fn mark(stream_sid: &str, name: &str) -> Self {
        Self::Mark {
            stream_sid: stream_sid.to_string(),
            mark: MarkName {
                name: name.to_string(),
            },
        }
    }

    pub fn clear(stream_sid: &str) -> Self {
        Self::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }
}
