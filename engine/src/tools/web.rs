//! `web_operations` tool: HTTP GET and POST through reqwest

use async_trait::async_trait;
use reqwest::Client;
use sdk::{SideEffect, Tool, ToolError, ToolRequest, ToolResult};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

pub struct WebTool {
    client: Client,
    timeout: Duration,
}

impl WebTool {
    pub fn new(timeout: Duration) -> Result<Self, ToolError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("waypoint/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ToolError::ExecutionFailure(format!("HTTP client: {}", e)))?;
        Ok(Self { client, timeout })
    }

    fn url(request: &ToolRequest) -> Result<String, ToolError> {
        let url = request.param_str("url")?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ToolError::InvalidParameters(format!(
                "only http(s) URLs are supported: {}",
                url
            )));
        }
        Ok(url)
    }

    fn request_error(&self, error: reqwest::Error) -> ToolError {
        if error.is_timeout() {
            ToolError::Timeout(self.timeout.as_millis() as u64)
        } else {
            ToolError::ExecutionFailure(error.to_string())
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder, url: &str) -> Result<Value, ToolError> {
        let response = builder.send().await.map_err(|e| self.request_error(e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| self.request_error(e))?;
        debug!("{} -> {} ({} bytes)", url, status, body.len());

        if !status.is_success() {
            return Err(ToolError::ExecutionFailure(format!(
                "HTTP {} from {}",
                status.as_u16(),
                url
            )));
        }

        let parsed = serde_json::from_str::<Value>(&body).ok();
        Ok(json!({
            "status": status.as_u16(),
            "body": body,
            "json": parsed,
        }))
    }
}

#[async_trait]
impl Tool for WebTool {
    fn name(&self) -> &str {
        "web_operations"
    }

    fn operations(&self) -> &[&'static str] {
        &["get", "post"]
    }

    fn validate(&self, request: &ToolRequest) -> Result<(), ToolError> {
        match request.param_str("operation")?.as_str() {
            "get" | "post" => Self::url(request).map(|_| ()),
            other => Err(ToolError::InvalidParameters(format!(
                "unknown web operation '{}'",
                other
            ))),
        }
    }

    async fn invoke(&self, request: &ToolRequest) -> Result<ToolResult, ToolError> {
        let url = Self::url(request)?;
        let mut builder = match request.param_str("operation")?.as_str() {
            "get" => self.client.get(&url),
            "post" => {
                let builder = self.client.post(&url);
                match request.params.get("body") {
                    Some(Value::String(text)) => builder.body(text.clone()),
                    Some(body) => builder.json(body),
                    None => builder,
                }
            }
            other => {
                return Err(ToolError::InvalidParameters(format!(
                    "unknown web operation '{}'",
                    other
                )))
            }
        };

        if let Some(Value::Object(headers)) = request.params.get("headers") {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    builder = builder.header(name.as_str(), value);
                }
            }
        }

        info!("HTTP {} {}", request.operation().unwrap_or("get"), url);
        let output = self.send(builder, &url).await?;

        let result = ToolResult::json(output);
        if request.operation() == Some("post") {
            Ok(result.with_side_effect(SideEffect::new("http_post", url)))
        } else {
            Ok(result)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn web(operation: &str, url: String) -> ToolRequest {
        ToolRequest::new("web_operations")
            .with_param("operation", json!(operation))
            .with_param("url", json!(url))
    }

    #[tokio::test]
    async fn test_get_parses_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let tool = WebTool::new(Duration::from_secs(5)).unwrap();
        let result = tool
            .invoke(&web("get", format!("{}/status", server.uri())))
            .await
            .unwrap();

        assert_eq!(result.output["status"], 200);
        assert_eq!(result.output["json"]["ok"], true);
        assert!(result.side_effect.is_none());
    }

    #[tokio::test]
    async fn test_post_sends_body_and_reports_side_effect() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/items"))
            .and(body_json(json!({"name": "a"})))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let tool = WebTool::new(Duration::from_secs(5)).unwrap();
        let request = web("post", format!("{}/items", server.uri())).with_param("body", json!({"name": "a"}));
        let result = tool.invoke(&request).await.unwrap();

        assert_eq!(result.output["status"], 201);
        assert_eq!(result.side_effect.unwrap().kind, "http_post");
    }

    #[tokio::test]
    async fn test_non_2xx_is_execution_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let tool = WebTool::new(Duration::from_secs(5)).unwrap();
        let result = tool.invoke(&web("get", server.uri())).await;
        assert!(matches!(result, Err(ToolError::ExecutionFailure(msg)) if msg.contains("503")));
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let tool = WebTool::new(Duration::from_millis(50)).unwrap();
        let result = tool.invoke(&web("get", server.uri())).await;
        assert!(matches!(result, Err(ToolError::Timeout(50))));
    }

    #[test]
    fn test_validate_rejects_non_http() {
        let tool = WebTool::new(Duration::from_secs(1)).unwrap();
        assert!(matches!(
            tool.validate(&web("get", "file:///etc/passwd".into())),
            Err(ToolError::InvalidParameters(_))
        ));
        assert!(matches!(
            tool.validate(&web("delete", "http://x".into())),
            Err(ToolError::InvalidParameters(_))
        ));
    }
}
