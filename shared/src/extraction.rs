use crate::core::{ExtractedOrder, ExtractionError, OrderExtractor};
use crate::observability::current_traceparent;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const TOOL_NAME: &str = "order_extractor";

/// Renders the instruction sent to the model for a single order email.
pub fn render_prompt(order: &str) -> String {
    format!(
        r#"You are an expert email order reader, who needs to extract order information from customer emails.
You MUST return your extraction in this EXACT format, as it will be ingested into a data analytics tool:
{{
    "customer": "<the customer making the order>",
    "product": "<the product being ordered>",
    "quantity": "<the quantity of the product being ordered>",
}}

If you do not know the customer, product, or quantity, return a null value.
Use only the information explicitly written in the order.

Extract the customer, product, and quantity from the following order:
"{order}""#
    )
}

fn order_tool() -> Tool {
    Tool {
        name: TOOL_NAME,
        description: "Extract the order using well-structured JSON.",
        input_schema: json!({
            "type": "object",
            "properties": {
                "customer": {"type": "string", "description": "The person placing the order"},
                "product": {"type": "string", "description": "The type/name of product being ordered"},
                "quantity": {"type": "number", "description": "The quantity of product being ordered"}
            },
            "required": ["customer"]
        }),
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message>,
    tools: Vec<Tool>,
    tool_choice: ToolChoice,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct Tool {
    name: &'static str,
    description: &'static str,
    input_schema: Value,
}

#[derive(Debug, Serialize)]
struct ToolChoice {
    #[serde(rename = "type")]
    choice_type: &'static str,
    name: &'static str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    ToolUse {
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

/// Model settings for an extraction call.
#[derive(Debug, Clone)]
pub struct ExtractionSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Extracts orders through the Anthropic Messages API, forcing the reply
/// through the `order_extractor` tool so it always carries JSON input.
#[derive(Debug)]
pub struct AnthropicOrderExtractor {
    http_client: Client,
    base_url: String,
    api_key: String,
    settings: ExtractionSettings,
}

impl AnthropicOrderExtractor {
    pub fn new(
        http_client: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        settings: ExtractionSettings,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            settings,
        }
    }

    fn request_body(&self, order: &str) -> MessagesRequest<'_> {
        MessagesRequest {
            model: &self.settings.model,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            messages: vec![Message {
                role: "user",
                content: render_prompt(order),
            }],
            tools: vec![order_tool()],
            tool_choice: ToolChoice {
                choice_type: "tool",
                name: TOOL_NAME,
            },
        }
    }
}

fn parse_tool_input(response: MessagesResponse) -> Result<ExtractedOrder, ExtractionError> {
    let input = response
        .content
        .into_iter()
        .find_map(|block| match block {
            ContentBlock::ToolUse { name, input } if name == TOOL_NAME => Some(input),
            _ => None,
        })
        .ok_or_else(|| {
            ExtractionError::MalformedResponse(format!("no {} tool_use block in reply", TOOL_NAME))
        })?;

    serde_json::from_value(input)
        .map_err(|e| ExtractionError::MalformedResponse(format!("unexpected tool input: {}", e)))
}

#[async_trait]
impl OrderExtractor for AnthropicOrderExtractor {
    #[tracing::instrument(name = "extract order", skip(self, order), fields(
        gen_ai.system = "anthropic",
        gen_ai.request.model = %self.settings.model,
    ))]
    async fn extract(&self, order: &str) -> Result<ExtractedOrder, ExtractionError> {
        let mut request = self
            .http_client
            .post(format!("{}/v1/messages", self.base_url.trim_end_matches('/')))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.request_body(order));
        if let Some(traceparent) = current_traceparent(&tracing::Span::current()) {
            request = request.header("traceparent", traceparent);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExtractionError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ExtractionError::MalformedResponse(e.to_string()))?;

        parse_tool_input(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn extractor(base_url: &str) -> AnthropicOrderExtractor {
        AnthropicOrderExtractor::new(
            Client::new(),
            base_url,
            "sk-test",
            ExtractionSettings {
                model: "claude-3-5-sonnet-20241022".to_string(),
                max_tokens: 4096,
                temperature: 0.3,
            },
        )
    }

    fn tool_reply(input: Value) -> Value {
        json!({
            "id": "msg_01",
            "type": "message",
            "role": "assistant",
            "model": "claude-3-5-sonnet-20241022",
            "stop_reason": "tool_use",
            "content": [
                {"type": "tool_use", "id": "toolu_01", "name": "order_extractor", "input": input}
            ]
        })
    }

    #[test]
    fn when_prompt_is_rendered_should_quote_order_text() {
        let prompt = render_prompt("Hi, Alice here. Please send 3 widgets.");

        assert!(prompt.starts_with("You are an expert email order reader"));
        assert!(prompt.contains("return a null value"));
        assert!(prompt.ends_with("\"Hi, Alice here. Please send 3 widgets.\""));
    }

    #[test]
    fn when_request_is_built_should_force_the_order_tool() {
        let body = serde_json::to_value(extractor("http://unused").request_body("3 widgets")).unwrap();

        assert_eq!(body["model"], "claude-3-5-sonnet-20241022");
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["tools"][0]["name"], "order_extractor");
        assert_eq!(body["tools"][0]["input_schema"]["required"], json!(["customer"]));
        assert_eq!(
            body["tools"][0]["input_schema"]["properties"]["quantity"]["type"],
            "number"
        );
        assert_eq!(body["tool_choice"], json!({"type": "tool", "name": "order_extractor"}));
    }

    #[test]
    fn when_reply_has_text_before_tool_use_should_pick_the_tool_block() {
        let reply: MessagesResponse = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "Here you go"},
                {"type": "tool_use", "id": "toolu_01", "name": "order_extractor", "input": {"customer": "Alice"}}
            ]
        }))
        .unwrap();

        let extracted = parse_tool_input(reply).unwrap();

        assert_eq!(extracted.customer.as_deref(), Some("Alice"));
        assert!(extracted.product.is_none());
    }

    #[test]
    fn when_reply_has_no_tool_use_should_be_malformed() {
        let reply: MessagesResponse = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "I cannot help with that"}]
        }))
        .unwrap();

        let result = parse_tool_input(reply);

        assert!(matches!(result, Err(ExtractionError::MalformedResponse(_))));
    }

    #[tokio::test]
    async fn when_service_replies_with_tool_use_should_return_extracted_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-test"))
            .and(header("anthropic-version", "2023-06-01"))
            .and(body_partial_json(json!({"tool_choice": {"type": "tool", "name": "order_extractor"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(tool_reply(
                json!({"customer": "Alice", "product": "Widget", "quantity": 3}),
            )))
            .expect(1)
            .mount(&server)
            .await;

        let extracted = extractor(&server.uri())
            .extract("Alice wants 3 widgets")
            .await
            .unwrap();

        assert_eq!(
            serde_json::to_value(extracted).unwrap(),
            json!({"customer": "Alice", "product": "Widget", "quantity": 3})
        );
    }

    #[tokio::test]
    async fn when_service_rejects_request_should_return_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let result = extractor(&server.uri()).extract("Alice wants 3 widgets").await;

        match result {
            Err(ExtractionError::Status { status, body }) => {
                assert_eq!(status, 429);
                assert_eq!(body, "rate limited");
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn when_tool_input_has_wrong_types_should_be_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(tool_reply(json!({"customer": "Alice", "quantity": "three"}))),
            )
            .mount(&server)
            .await;

        let result = extractor(&server.uri()).extract("Alice wants three widgets").await;

        assert!(matches!(result, Err(ExtractionError::MalformedResponse(_))));
    }
}
