use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[must_use]
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

/// Lifecycle states for a call. `Ringing` is the initial state for both
/// directions; the last four variants are terminal and accept no further
/// transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStatus {
    Ringing,
    Connecting,
    InProgress,
    Completed,
    Failed,
    NoAnswer,
    Transferred,
}

impl CallStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ringing => "RINGING",
            Self::Connecting => "CONNECTING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::NoAnswer => "NO_ANSWER",
            Self::Transferred => "TRANSFERRED",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "RINGING" => Some(Self::Ringing),
            "CONNECTING" => Some(Self::Connecting),
            "IN_PROGRESS" => Some(Self::InProgress),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "NO_ANSWER" => Some(Self::NoAnswer),
            "TRANSFERRED" => Some(Self::Transferred),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::NoAnswer | Self::Transferred
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

impl CallDirection {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "INBOUND",
            Self::Outbound => "OUTBOUND",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "INBOUND" => Some(Self::Inbound),
            "OUTBOUND" => Some(Self::Outbound),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TranscriptRole {
    Caller,
    Agent,
}

impl TranscriptRole {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Caller => "CALLER",
            Self::Agent => "AGENT",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CALLER" => Some(Self::Caller),
            "AGENT" => Some(Self::Agent),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "POSITIVE",
            Self::Neutral => "NEUTRAL",
            Self::Negative => "NEGATIVE",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "POSITIVE" => Some(Self::Positive),
            "NEUTRAL" => Some(Self::Neutral),
            "NEGATIVE" => Some(Self::Negative),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TelephonyProvider {
    Exotel,
    Plivo,
    Twilio,
    Vonage,
}

impl TelephonyProvider {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exotel => "EXOTEL",
            Self::Plivo => "PLIVO",
            Self::Twilio => "TWILIO",
            Self::Vonage => "VONAGE",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "EXOTEL" => Some(Self::Exotel),
            "PLIVO" => Some(Self::Plivo),
            "TWILIO" => Some(Self::Twilio),
            "VONAGE" => Some(Self::Vonage),
            _ => None,
        }
    }
}

/// A phone number's record within one tenant. `is_saved == true` always
/// implies `expires_at == None`; an unsaved caller always carries a concrete
/// expiry. The retention reaper is the only component allowed to delete a
/// caller.
#[derive(Clone, Debug, Serialize)]
pub struct CallerRow {
    pub caller_id: String,
    pub tenant_id: String,
    pub phone_number: String,
    pub is_saved: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub total_calls: i64,
    pub last_call_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CallRow {
    pub call_id: String,
    pub external_id: String,
    pub tenant_id: String,
    pub phone_number_id: String,
    pub caller_id: String,
    pub direction: CallDirection,
    pub status: CallStatus,
    pub started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<i32>,
    pub summary: Option<String>,
    pub sentiment: Option<Sentiment>,
}

#[derive(Clone, Debug, Serialize)]
pub struct TranscriptRow {
    pub transcript_id: String,
    pub call_id: String,
    pub seq: i32,
    pub role: TranscriptRole,
    pub content: String,
    pub confidence: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ExtractionRow {
    pub extraction_id: String,
    pub call_id: String,
    pub kind: String,
    pub data: Value,
    pub confidence: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RecordingRow {
    pub recording_id: String,
    pub call_id: String,
    pub url: String,
    pub duration_secs: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewCallInput {
    pub external_id: String,
    pub tenant_id: String,
    pub phone_number_id: String,
    pub caller_id: String,
    pub direction: CallDirection,
    pub initial_status: CallStatus,
}

#[derive(Clone, Debug)]
pub struct StatusUpdate {
    pub status: CallStatus,
    pub duration_secs: Option<i32>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl StatusUpdate {
    #[must_use]
    pub fn new(status: CallStatus) -> Self {
        Self {
            status,
            duration_secs: None,
            ended_at: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct NewTranscriptInput {
    pub call_id: String,
    pub role: TranscriptRole,
    pub content: String,
    pub confidence: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct NewExtractionInput {
    pub call_id: String,
    pub kind: String,
    pub data: Value,
    pub confidence: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct NewRecordingInput {
    pub call_id: String,
    pub url: String,
    pub duration_secs: Option<i32>,
}

/// Row counts removed by one caller's cascading purge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PurgeCounts {
    pub calls: u64,
    pub transcripts: u64,
    pub extractions: u64,
    pub recordings: u64,
}
