use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Number;
use std::fmt::Debug;

#[cfg(any(test, feature = "mocks"))]
use mockall::automock;

/// Turns a free-text order email into structured order fields.
#[cfg_attr(any(test, feature = "mocks"), automock)]
#[async_trait]
pub trait OrderExtractor: Debug {
    async fn extract(&self, order: &str) -> Result<ExtractedOrder, ExtractionError>;
}

/// Append-only destination for order records.
///
/// A successful call may still carry per-row insert errors; only a failure of
/// the call as a whole is reported as `Err`.
#[cfg_attr(any(test, feature = "mocks"), automock)]
#[async_trait]
pub trait RecordSink: Debug {
    async fn append_rows(&self, rows: &[OrderRecord]) -> Result<Vec<RowInsertError>, SinkError>;
}

/// Hands out a currently valid OAuth access token, refreshing it when the
/// previous one has expired.
#[cfg_attr(any(test, feature = "mocks"), automock)]
#[async_trait]
pub trait AccessTokenSource: Debug + Send + Sync {
    async fn access_token(&self) -> Result<String, SinkError>;
}

#[cfg_attr(any(test, feature = "mocks"), automock)]
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("extraction request failed: {0}")]
    Transport(String),
    #[error("extraction service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("extraction reply is malformed: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("append request failed: {0}")]
    Transport(String),
    #[error("warehouse credentials unavailable: {0}")]
    Credentials(String),
    #[error("warehouse returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("warehouse reply is malformed: {0}")]
    MalformedResponse(String),
}

/// Order fields as returned by the extraction service. Any of them may be
/// unknown.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ExtractedOrder {
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub quantity: Option<Number>,
}

/// The row written to the warehouse for every processed order.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OrderRecord {
    pub timestamp: String,
    pub email: String,
    pub customer: Option<String>,
    pub product: Option<String>,
    pub quantity: Option<Number>,
}

impl OrderRecord {
    pub fn new(processed_at: DateTime<Utc>, email: String, extracted: ExtractedOrder) -> Self {
        Self {
            timestamp: processed_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            email,
            customer: extracted.customer,
            product: extracted.product,
            quantity: extracted.quantity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RowInsertError {
    pub index: u32,
    #[serde(default)]
    pub errors: Vec<InsertErrorDetail>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InsertErrorDetail {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
