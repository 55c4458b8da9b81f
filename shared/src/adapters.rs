use crate::core::{AccessTokenSource, OrderRecord, RecordSink, RowInsertError, SinkError};
use crate::observability::current_traceparent;
use async_trait::async_trait;
use gcp_auth::TokenProvider;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";

/// Fully qualified warehouse table, `project.dataset.table`.
#[derive(Debug, Clone, PartialEq)]
pub struct TableReference {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl TableReference {
    pub fn new(
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
        table_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
            table_id: table_id.into(),
        }
    }
}

impl std::fmt::Display for TableReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}

/// Google OAuth tokens for BigQuery. The provider caches the token and
/// fetches a new one once it is about to expire.
pub struct GcpTokenSource {
    provider: Arc<dyn TokenProvider>,
}

impl GcpTokenSource {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self { provider }
    }

    /// Uses the service-account key when one is given, otherwise the ambient
    /// Google credentials (`GOOGLE_APPLICATION_CREDENTIALS`, metadata server,
    /// gcloud).
    pub async fn from_credentials(service_account_json: Option<&str>) -> Result<Self, gcp_auth::Error> {
        let provider: Arc<dyn TokenProvider> = match service_account_json {
            Some(json) => Arc::new(gcp_auth::CustomServiceAccount::from_json(json)?),
            None => gcp_auth::provider().await?,
        };

        Ok(Self::new(provider))
    }

    /// Project the credentials belong to.
    pub async fn project_id(&self) -> Result<String, gcp_auth::Error> {
        self.provider.project_id().await.map(|project| project.to_string())
    }
}

impl std::fmt::Debug for GcpTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcpTokenSource").finish_non_exhaustive()
    }
}

#[async_trait]
impl AccessTokenSource for GcpTokenSource {
    async fn access_token(&self) -> Result<String, SinkError> {
        self.provider
            .token(&[BIGQUERY_SCOPE])
            .await
            .map(|token| token.as_str().to_string())
            .map_err(|e| SinkError::Credentials(e.to_string()))
    }
}

#[derive(Debug, Serialize)]
struct InsertAllRequest<'a> {
    rows: Vec<InsertAllRow<'a>>,
}

#[derive(Debug, Serialize)]
struct InsertAllRow<'a> {
    json: &'a OrderRecord,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<RowInsertError>,
}

/// Streams rows into a BigQuery table through the `tabledata.insertAll` API.
#[derive(Debug)]
pub struct BigQueryRecordSink {
    http_client: Client,
    base_url: String,
    token_source: Box<dyn AccessTokenSource>,
    table: TableReference,
}

impl BigQueryRecordSink {
    pub fn new(
        http_client: Client,
        base_url: impl Into<String>,
        token_source: Box<dyn AccessTokenSource>,
        table: TableReference,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into(),
            token_source,
            table,
        }
    }

    fn insert_all_url(&self) -> String {
        format!(
            "{}/bigquery/v2/projects/{}/datasets/{}/tables/{}/insertAll",
            self.base_url.trim_end_matches('/'),
            self.table.project_id,
            self.table.dataset_id,
            self.table.table_id
        )
    }
}

#[async_trait]
impl RecordSink for BigQueryRecordSink {
    #[tracing::instrument(name = "append rows", skip(self, rows), fields(
        db.system = "bigquery",
        db.collection.name = %self.table,
        rows = rows.len(),
    ))]
    async fn append_rows(&self, rows: &[OrderRecord]) -> Result<Vec<RowInsertError>, SinkError> {
        let access_token = self.token_source.access_token().await?;
        let body = InsertAllRequest {
            rows: rows.iter().map(|row| InsertAllRow { json: row }).collect(),
        };

        let mut request = self
            .http_client
            .post(self.insert_all_url())
            .bearer_auth(access_token)
            .json(&body);
        if let Some(traceparent) = current_traceparent(&tracing::Span::current()) {
            request = request.header("traceparent", traceparent);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<InsertAllResponse>()
            .await
            .map(|reply| reply.insert_errors)
            .map_err(|e| SinkError::MalformedResponse(e.to_string()))
    }
}
