use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ChatApiConfig;
use crate::error::{classify_status, parse_error_message, ChatApiError};
use crate::events::ChatStreamEvent;
use crate::headers::build_headers;
use crate::payload::ChatRequest;
use crate::retry::{is_retryable, retry_delay_ms, MAX_RETRIES};
use crate::sse::SseStreamParser;
use crate::url::normalize_chat_url;

#[derive(Debug)]
pub struct ChatApiClient {
    http: Client,
    config: ChatApiConfig,
}

/// Everything observed on one completed stream.
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    pub events: Vec<ChatStreamEvent>,
    /// Whether the `[DONE]` sentinel was observed before EOF.
    pub done: bool,
}

impl ChatApiClient {
    pub fn new(config: ChatApiConfig) -> Result<Self, ChatApiError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(ChatApiError::from)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ChatApiConfig {
        &self.config
    }

    pub fn normalized_endpoint(&self) -> String {
        normalize_chat_url(&self.config.base_url)
    }

    pub fn build_request(
        &self,
        request: &ChatRequest,
    ) -> Result<reqwest::RequestBuilder, ChatApiError> {
        if request.messages.is_empty() {
            return Err(ChatApiError::InvalidRequestPayload(
                "'messages' must not be empty".to_string(),
            ));
        }

        let headers = build_headers(&self.config)?;
        let mut out = HeaderMap::new();
        for (key, value) in headers {
            out.insert(
                HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
                    ChatApiError::InvalidBaseUrl(format!("invalid header key: {key}"))
                })?,
                HeaderValue::from_str(&value).map_err(|_| {
                    ChatApiError::InvalidBaseUrl(format!("invalid header value for {key}"))
                })?,
            );
        }

        let mut payload = request.clone();
        payload.stream = true;

        Ok(self
            .http
            .post(self.normalized_endpoint())
            .headers(out)
            .json(&payload))
    }

    /// Send the request, retrying transient failures with exponential
    /// backoff. Retry decisions are driven by the typed error kind.
    pub async fn send_with_retry(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<Response, ChatApiError> {
        let mut last_status: Option<StatusCode> = None;
        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            if cancel.is_cancelled() {
                return Err(ChatApiError::Cancelled);
            }

            let send = self.build_request(request)?.send();
            let response = tokio::select! {
                response = send => response.map_err(ChatApiError::from),
                () = cancel.cancelled() => return Err(ChatApiError::Cancelled),
            };

            match response {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    last_status = Some(status);
                    let body = tokio::select! {
                        body = response.text() => body.unwrap_or_default(),
                        () = cancel.cancelled() => return Err(ChatApiError::Cancelled),
                    };
                    let message = parse_error_message(status, &body);
                    last_error = Some(message.clone());

                    if attempt < MAX_RETRIES && is_retryable(classify_status(status)) {
                        warn!(%status, attempt, "chat request failed, backing off");
                        tokio::select! {
                            () = tokio::time::sleep(retry_delay_ms(attempt)) => continue,
                            () = cancel.cancelled() => return Err(ChatApiError::Cancelled),
                        }
                    }

                    return Err(ChatApiError::Status { status, message });
                }
                Err(error) => {
                    let retryable = is_retryable(error.kind());
                    last_error = Some(error.to_string());
                    if attempt < MAX_RETRIES && retryable {
                        warn!(attempt, %error, "chat request errored, backing off");
                        tokio::select! {
                            () = tokio::time::sleep(retry_delay_ms(attempt)) => continue,
                            () = cancel.cancelled() => return Err(ChatApiError::Cancelled),
                        }
                    }
                    return Err(error);
                }
            }
        }

        Err(ChatApiError::RetryExhausted {
            status: last_status,
            last_error,
        })
    }

    /// Stream a response, invoking `on_event` per parsed event until EOF or
    /// the `[DONE]` sentinel. Returns whether `[DONE]` was observed.
    pub async fn stream_with_handler<F>(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
        mut on_event: F,
    ) -> Result<bool, ChatApiError>
    where
        F: FnMut(ChatStreamEvent),
    {
        let response = self.send_with_retry(request, cancel).await?;
        debug!(endpoint = %self.normalized_endpoint(), "streaming chat response");

        let mut bytes = response.bytes_stream();
        let mut parser = SseStreamParser::default();
        let mut done = false;

        loop {
            let chunk = tokio::select! {
                chunk = bytes.next() => chunk,
                () = cancel.cancelled() => return Err(ChatApiError::Cancelled),
            };
            let Some(chunk) = chunk else {
                break;
            };
            let chunk = chunk.map_err(ChatApiError::from)?;

            for event in parser.feed(&chunk) {
                match event {
                    ChatStreamEvent::Done => {
                        done = true;
                    }
                    ChatStreamEvent::Error { message } => {
                        return Err(ChatApiError::StreamFailed { message });
                    }
                    event => on_event(event),
                }
            }
            if done {
                break;
            }
        }

        Ok(done)
    }

    /// Collect a whole stream into memory. Prefer
    /// [`stream_with_handler`](Self::stream_with_handler) for incremental
    /// consumption.
    pub async fn stream(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome, ChatApiError> {
        let mut events = Vec::new();
        let done = self
            .stream_with_handler(request, cancel, |event| events.push(event))
            .await?;
        Ok(StreamOutcome { events, done })
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::ChatApiClient;
    use crate::config::ChatApiConfig;
    use crate::error::ChatApiError;
    use crate::payload::{ChatRequest, WireMessage};

    fn client() -> ChatApiClient {
        ChatApiClient::new(ChatApiConfig::new("sk-test")).expect("client should build")
    }

    #[test]
    fn empty_message_list_is_rejected_before_send() {
        let request = ChatRequest::new("gpt-test", Vec::new());
        let error = client()
            .build_request(&request)
            .err()
            .expect("empty messages must fail");
        assert!(matches!(error, ChatApiError::InvalidRequestPayload(_)));
    }

    #[test]
    fn build_request_succeeds_with_messages() {
        let request = ChatRequest::new("gpt-test", vec![WireMessage::text("user", "hello")]);
        assert!(client().build_request(&request).is_ok());
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits_send() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let request = ChatRequest::new("gpt-test", vec![WireMessage::text("user", "hello")]);
        let error = client()
            .send_with_retry(&request, &cancel)
            .await
            .expect_err("pre-cancelled send must fail");
        assert!(matches!(error, ChatApiError::Cancelled));
    }
}
