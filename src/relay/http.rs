use std::time::Duration;
use async_trait::async_trait;
use log::debug;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;

use crate::error::RelayError;

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

#[derive(Debug, Serialize)]
pub struct RelayBody<'a> {
    pub data: &'a str,
}

/// `{"data":"<text>"}`, with the text escaped as a JSON string.
pub fn encode_body(text: &str) -> Result<String, RelayError> {
    Ok(serde_json::to_string(&RelayBody { data: text })?)
}

/// Delivers one encoded status body somewhere.
#[async_trait]
pub trait Dispatch: Send + Sync + 'static {
    async fn dispatch(&self, body: String) -> Result<(), RelayError>;
}

pub struct HttpDispatch {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpDispatch {
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(HttpDispatch { client, endpoint: endpoint.into() })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Dispatch for HttpDispatch {
    async fn dispatch(&self, body: String) -> Result<(), RelayError> {
        let response = self.client.post(&self.endpoint)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let response_body = response.text().await?;

        if !status.is_success() {
            return Err(RelayError::Status { status: status.as_u16(), body: response_body });
        }

        debug!("Server response: {}", response_body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_encode_without_whitespace() {
        assert_eq!(encode_body("ON").unwrap(), r#"{"data":"ON"}"#);
        assert_eq!(encode_body("OFF").unwrap(), r#"{"data":"OFF"}"#);
    }

    #[test]
    fn peripheral_text_is_escaped() {
        assert_eq!(encode_body("temp=25\n").unwrap(), r#"{"data":"temp=25\n"}"#);
        assert_eq!(encode_body("say \"hi\"").unwrap(), r#"{"data":"say \"hi\""}"#);
        let decoded: serde_json::Value = serde_json::from_str(&encode_body("a\u{fffd}b").unwrap()).unwrap();
        assert_eq!(decoded["data"], "a\u{fffd}b");
    }
}
