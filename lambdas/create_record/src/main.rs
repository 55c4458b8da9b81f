use std::sync::Arc;
use std::time::Duration;

use crate::http_handler::{function_handler, HandlerDeps};
use lambda_http::{run, service_fn, Error};
use shared::adapters::{BigQueryRecordSink, GcpTokenSource};
use shared::configuration::Configuration;
use shared::core::SystemClock;
use shared::extraction::{AnthropicOrderExtractor, ExtractionSettings};

mod http_handler;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let otel_guard = Arc::new(shared::observability::init_otel()?);
    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let config = Configuration::load(
        &aws_sdk_ssm::Client::new(&aws_config),
        &aws_sdk_secretsmanager::Client::new(&aws_config),
    )
    .await?;

    let token_source =
        GcpTokenSource::from_credentials(config.bigquery_service_account_json.as_deref()).await?;
    let project_id = match config.bigquery_project_id.clone() {
        Some(project_id) => project_id,
        None => token_source.project_id().await?,
    };
    let table = config.table_in(project_id);

    let http_client = shared::Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .build()?;
    let extractor = AnthropicOrderExtractor::new(
        http_client.clone(),
        config.anthropic_base_url,
        config.anthropic_api_key,
        ExtractionSettings {
            model: config.anthropic_model,
            max_tokens: config.anthropic_max_tokens,
            temperature: config.anthropic_temperature,
        },
    );
    let sink = BigQueryRecordSink::new(
        http_client,
        config.bigquery_base_url,
        Box::new(token_source),
        table,
    );
    let deps = HandlerDeps {
        extractor,
        sink,
        clock: SystemClock,
    };

    run(service_fn(|event| async {
        let res = function_handler(&deps, event).await;

        otel_guard.flush();

        res
    }))
    .await
}
