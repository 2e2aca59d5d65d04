use reqwest::{Response, StatusCode};
use serde_json::Value;
use tracing::debug;

use super::base::Usage;
use super::errors::ProviderError;

/// Maps a non-ok response status to a ProviderError
pub async fn non_ok_response_to_provider_error(payload: &Value, response: Response) -> ProviderError {
    let status = response.status();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::Authentication(format!("Authentication failed. Please ensure your API keys are valid and have the required permissions. \
                Status: {}. Response: {:?}", status, response.text().await.unwrap_or_default()))
        }
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimitExceeded(format!(
            "Rate limit exceeded. Please retry after some time. Status: {}",
            status
        )),
        StatusCode::INTERNAL_SERVER_ERROR | StatusCode::SERVICE_UNAVAILABLE => {
            ProviderError::ServerError(format!("Server error occurred. Status: {}", status))
        }
        _ => {
            let body = response.text().await.unwrap_or_default();
            debug!(
                "Provider request failed with status: {}. Body: {:?}. Payload: {}",
                status, body, payload
            );
            if body.to_lowercase().contains("too long") {
                return ProviderError::ContextLengthExceeded(body);
            }
            ProviderError::RequestFailed(format!("Request failed with status: {}.", status))
        }
    }
}

/// Return the JSON body of a successful response, or the matching ProviderError
pub async fn handle_response(payload: &Value, response: Response) -> Result<Value, ProviderError> {
    match response.status() {
        StatusCode::OK => Ok(response.json().await?),
        _ => Err(non_ok_response_to_provider_error(payload, response).await),
    }
}

/// Extract the model name from a JSON object. Common with most providers to have this top level attribute.
pub fn get_model(data: &Value) -> String {
    data.get("model")
        .and_then(|m| m.as_str())
        .unwrap_or("Unknown")
        .to_string()
}

pub fn emit_debug_trace<T: serde::Serialize>(
    model_config: &T,
    payload: &Value,
    response: &Value,
    usage: &Usage,
) {
    debug!(
        model_config = %serde_json::to_string_pretty(model_config).unwrap_or_default(),
        input = %serde_json::to_string_pretty(payload).unwrap_or_default(),
        output = %serde_json::to_string_pretty(response).unwrap_or_default(),
        input_tokens = ?usage.input_tokens.unwrap_or_default(),
        output_tokens = ?usage.output_tokens.unwrap_or_default(),
        total_tokens = ?usage.total_tokens.unwrap_or_default(),
    );
}
