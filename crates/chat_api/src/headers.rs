use std::collections::BTreeMap;

use crate::config::ChatApiConfig;
use crate::error::ChatApiError;

pub const HEADER_SESSION_ID: &str = "session_id";
pub const HEADER_ACCEPT: &str = "accept";
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_AUTHORIZATION: &str = "authorization";
pub const HEADER_ORGANIZATION: &str = "openai-organization";
pub const HEADER_USER_AGENT: &str = "user-agent";

/// Build a deterministic header map for chat transport requests.
pub fn build_headers(config: &ChatApiConfig) -> Result<BTreeMap<String, String>, ChatApiError> {
    if config.api_key.trim().is_empty() {
        return Err(ChatApiError::MissingApiKey);
    }

    let mut headers = BTreeMap::new();
    headers.insert(
        HEADER_AUTHORIZATION.to_owned(),
        format!("Bearer {}", config.api_key.trim()),
    );
    headers.insert(HEADER_ACCEPT.to_owned(), "text/event-stream".to_owned());
    headers.insert(HEADER_CONTENT_TYPE.to_owned(), "application/json".to_owned());

    if let Some(organization) = config.organization.as_deref() {
        if !organization.trim().is_empty() {
            headers.insert(HEADER_ORGANIZATION.to_owned(), organization.trim().to_owned());
        }
    }

    if let Some(user_agent) = config.user_agent.as_deref() {
        if !user_agent.trim().is_empty() {
            headers.insert(HEADER_USER_AGENT.to_owned(), user_agent.trim().to_owned());
        }
    }

    for (key, value) in &config.extra_headers {
        headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_owned());
    }

    if let Some(session_id) = &config.session_id {
        if !session_id.trim().is_empty() {
            headers.insert(HEADER_SESSION_ID.to_owned(), session_id.trim().to_owned());
        }
    }

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::{build_headers, HEADER_AUTHORIZATION, HEADER_SESSION_ID};
    use crate::config::ChatApiConfig;
    use crate::error::ChatApiError;

    #[test]
    fn missing_api_key_is_rejected() {
        let error = build_headers(&ChatApiConfig::default()).expect_err("empty key must fail");
        assert!(matches!(error, ChatApiError::MissingApiKey));
    }

    #[test]
    fn bearer_token_and_optional_headers_are_set() {
        let config = ChatApiConfig::new("sk-test")
            .with_session_id("session-1")
            .insert_header("X-Trace", "abc");
        let headers = build_headers(&config).expect("headers");

        assert_eq!(headers.get(HEADER_AUTHORIZATION).map(String::as_str), Some("Bearer sk-test"));
        assert_eq!(headers.get(HEADER_SESSION_ID).map(String::as_str), Some("session-1"));
        assert_eq!(headers.get("x-trace").map(String::as_str), Some("abc"));
    }
}
