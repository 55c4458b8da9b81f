use crate::adapters::TableReference;
use aws_sdk_ssm::Client;
use figment::providers::{Env, Format, Json, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};

const REQUIRED_KEYS: [&str; 3] = ["ANTHROPIC_API_KEY", "BIGQUERY_DATASET_ID", "BIGQUERY_TABLE_ID"];

const OPTIONAL_KEYS: [&str; 2] = ["BIGQUERY_PROJECT_ID", "BIGQUERY_SERVICE_ACCOUNT_JSON"];

const TUNABLE_KEYS: [&str; 6] = [
    "ANTHROPIC_MODEL",
    "ANTHROPIC_MAX_TOKENS",
    "ANTHROPIC_TEMPERATURE",
    "ANTHROPIC_BASE_URL",
    "BIGQUERY_BASE_URL",
    "HTTP_TIMEOUT_SECS",
];

/// Values with a sensible default. Required settings have none, so a missing
/// key fails extraction instead of silently running with an empty string.
#[derive(Debug, Serialize, Deserialize)]
struct Tunables {
    anthropic_model: String,
    anthropic_max_tokens: u32,
    anthropic_temperature: f32,
    anthropic_base_url: String,
    bigquery_base_url: String,
    http_timeout_secs: u64,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            anthropic_model: "claude-3-5-sonnet-20241022".to_string(),
            anthropic_max_tokens: 4096,
            anthropic_temperature: 0.3,
            anthropic_base_url: "https://api.anthropic.com".to_string(),
            bigquery_base_url: "https://bigquery.googleapis.com".to_string(),
            http_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    pub anthropic_api_key: String,
    pub anthropic_model: String,
    pub anthropic_max_tokens: u32,
    pub anthropic_temperature: f32,
    pub anthropic_base_url: String,
    /// Falls back to the project of the Google credentials when unset.
    #[serde(default)]
    pub bigquery_project_id: Option<String>,
    pub bigquery_dataset_id: String,
    pub bigquery_table_id: String,
    /// Service-account key JSON. When unset the ambient Google credentials
    /// are used.
    #[serde(default)]
    pub bigquery_service_account_json: Option<String>,
    pub bigquery_base_url: String,
    pub http_timeout_secs: u64,
}

impl Configuration {
    /// Layers, lowest precedence first: built-in defaults, environment, the
    /// JSON document in the SSM parameter named by
    /// `CONFIGURATION_PARAMETER_NAME`, and the JSON secret named by
    /// `SECRET_MANAGER_SECRET_ID`.
    pub async fn load(
        ssm_client: &Client,
        secret_client: &aws_sdk_secretsmanager::Client,
    ) -> Result<Self, figment::Error> {
        let mut config = Configuration::from_env();

        if let Some(ssm_config) = Configuration::load_from_ssm(ssm_client).await {
            config = config.merge(Json::string(&ssm_config));
        }

        if let Some(secret_config) = Configuration::load_from_secret_manager(secret_client).await {
            config = config.merge(Json::string(&secret_config));
        }

        let config: Configuration = config.extract()?;
        tracing::info!("{}", config);

        Ok(config)
    }

    pub(crate) fn from_env() -> Figment {
        Figment::from(Serialized::defaults(Tunables::default()))
            .merge(Env::raw().only(&REQUIRED_KEYS))
            .merge(Env::raw().only(&OPTIONAL_KEYS))
            .merge(Env::raw().only(&TUNABLE_KEYS))
    }

    /// The configured table in `project_id`.
    pub fn table_in(&self, project_id: impl Into<String>) -> TableReference {
        TableReference::new(
            project_id,
            self.bigquery_dataset_id.as_str(),
            self.bigquery_table_id.as_str(),
        )
    }

    async fn load_from_ssm(ssm_client: &Client) -> Option<String> {
        let parameter_name = std::env::var("CONFIGURATION_PARAMETER_NAME").ok()?;
        if parameter_name.is_empty() {
            return None;
        }

        let ssm_configuration = ssm_client
            .get_parameter()
            .name(&parameter_name)
            .with_decryption(true)
            .send()
            .await;

        match ssm_configuration {
            Ok(output) => output.parameter.and_then(|parameter| parameter.value),
            Err(e) => {
                tracing::warn!("Failed to read configuration parameter {}: {:?}", parameter_name, e);
                None
            }
        }
    }

    async fn load_from_secret_manager(
        secret_client: &aws_sdk_secretsmanager::Client,
    ) -> Option<String> {
        let secret_id = std::env::var("SECRET_MANAGER_SECRET_ID").ok()?;
        if secret_id.is_empty() {
            return None;
        }

        let secret_value = secret_client
            .get_secret_value()
            .secret_id(&secret_id)
            .send()
            .await;

        match secret_value {
            Ok(value) => value.secret_string,
            Err(e) => {
                tracing::warn!("Failed to read configuration secret {}: {:?}", secret_id, e);
                None
            }
        }
    }
}

impl std::fmt::Display for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Configuration {{ table: {}, model: {}, max_tokens: {}, temperature: {}, timeout: {}s }}",
            self.table_in(
                self.bigquery_project_id
                    .as_deref()
                    .unwrap_or("<credentials project>")
            ),
            self.anthropic_model,
            self.anthropic_max_tokens,
            self.anthropic_temperature,
            self.http_timeout_secs
        )
    }
}
