use lambda_http::{http::StatusCode, Body, Error, IntoResponse, Request};
use serde::Deserialize;
use serde_json::Value;
use shared::core::{Clock, OrderExtractor, OrderRecord, RecordSink};
use shared::utils::{empty_response, json_response, text_response};

#[derive(Debug, Deserialize)]
pub struct CreateRecordRequest {
    pub order: String,
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub(crate) enum OrderRequestError {
    #[error("Order JSON payload is missing")]
    BadRequest,
    #[error("Order field is missing")]
    MissingOrder,
}

pub(crate) struct HandlerDeps<X: OrderExtractor, S: RecordSink, C: Clock> {
    pub extractor: X,
    pub sink: S,
    pub clock: C,
}

/// An empty body, invalid JSON and any falsy JSON value (`null`, `false`,
/// `0`, `""`, `[]`, `{}`) count as a missing payload. Any other JSON without
/// a non-blank string `order` is a missing order.
pub(crate) fn parse_order(body: &Body) -> Result<String, OrderRequestError> {
    let payload: Value =
        serde_json::from_slice(body.as_ref()).map_err(|_| OrderRequestError::BadRequest)?;

    if is_falsy(&payload) {
        return Err(OrderRequestError::BadRequest);
    }

    let request: CreateRecordRequest =
        serde_json::from_value(payload).map_err(|_| OrderRequestError::MissingOrder)?;
    if request.order.trim().is_empty() {
        return Err(OrderRequestError::MissingOrder);
    }

    Ok(request.order)
}

fn is_falsy(payload: &Value) -> bool {
    match payload {
        Value::Null => true,
        Value::Bool(value) => !value,
        Value::Number(number) => number.as_f64() == Some(0.0),
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
    }
}

#[tracing::instrument(skip(deps, event))]
pub(crate) async fn function_handler<X: OrderExtractor, S: RecordSink, C: Clock>(
    deps: &HandlerDeps<X, S, C>,
    event: Request,
) -> Result<impl IntoResponse, Error> {
    tracing::debug!(method = %event.method(), uri = %event.uri(), "Received event");

    let order = match parse_order(event.body()) {
        Ok(order) => order,
        Err(e) => {
            tracing::warn!("Rejected order request: {}", e);
            return text_response(&StatusCode::BAD_REQUEST, &e.to_string());
        }
    };

    let extracted = match deps.extractor.extract(&order).await {
        Ok(extracted) => extracted,
        Err(e) => {
            tracing::error!("Failed to extract order: {:?}", e);
            return empty_response(&StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let record = OrderRecord::new(deps.clock.now(), order, extracted.clone());
    match deps.sink.append_rows(std::slice::from_ref(&record)).await {
        Ok(row_errors) if !row_errors.is_empty() => {
            // Row-level rejections are not surfaced to the caller.
            tracing::warn!("Warehouse rejected order record: {:?}", row_errors);
        }
        Ok(_) => tracing::info!("Order record appended"),
        Err(e) => {
            tracing::error!("Failed to append order record: {:?}", e);
            return empty_response(&StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    json_response(&StatusCode::OK, &extracted)
}
