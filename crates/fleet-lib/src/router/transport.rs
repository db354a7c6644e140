//! Wire envelope and transports for agent tool calls
//!
//! Agents expose a single JSON-RPC style endpoint. Every call is a POST of
//! a `tools/call` envelope naming the tool and its argument object.

use super::RouterError;
use crate::models::JsonMap;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Envelope protocol version
pub const PROTOCOL_VERSION: &str = "2.0";

/// The only method agents are asked to perform
pub const INVOKE_METHOD: &str = "tools/call";

/// Request envelope sent to an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub jsonrpc: String,
    pub id: String,
    pub method: String,
    pub params: ToolCallParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    pub arguments: JsonMap,
}

impl ToolCallRequest {
    pub fn new(tool: &str, arguments: JsonMap) -> Self {
        Self {
            jsonrpc: PROTOCOL_VERSION.to_string(),
            id: format!("{}-{}", tool, uuid::Uuid::new_v4()),
            method: INVOKE_METHOD.to_string(),
            params: ToolCallParams {
                name: tool.to_string(),
                arguments,
            },
        }
    }

    pub fn tool(&self) -> &str {
        &self.params.name
    }
}

/// Interpret a decoded response body.
///
/// An `error` member makes the call a remote failure; otherwise the `result`
/// member is the payload, falling back to the whole object when absent.
pub fn interpret_response(body: Value) -> Result<Value, RouterError> {
    let Value::Object(mut object) = body else {
        return Err(RouterError::Decode(
            "response body is not a JSON object".to_string(),
        ));
    };

    if let Some(error) = object.remove("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| match &error {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });
        return Err(RouterError::Remote(message));
    }

    match object.remove("result") {
        Some(result) => Ok(result),
        None => Ok(Value::Object(object)),
    }
}

/// Transport used by the router to reach agents
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform a single attempt of a tool call against an agent endpoint
    async fn call(&self, endpoint: &str, request: &ToolCallRequest) -> Result<Value, RouterError>;

    /// Release pooled connections
    async fn close(&self) {}
}

/// HTTP transport backed by a lazily built, shared reqwest client
pub struct HttpTransport {
    timeout: Duration,
    client: RwLock<Option<Client>>,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            client: RwLock::new(None),
        }
    }

    /// Get or create the pooled client
    async fn client(&self) -> Result<Client, RouterError> {
        {
            let client = self.client.read().await;
            if let Some(c) = client.as_ref() {
                return Ok(c.clone());
            }
        }

        let mut slot = self.client.write().await;
        if let Some(c) = slot.as_ref() {
            return Ok(c.clone());
        }

        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| RouterError::Transport(format!("failed to build HTTP client: {}", e)))?;
        debug!(timeout_secs = self.timeout.as_secs_f64(), "Created HTTP client");
        *slot = Some(client.clone());

        Ok(client)
    }

    /// Whether a client is currently held
    pub async fn is_open(&self) -> bool {
        self.client.read().await.is_some()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, endpoint: &str, request: &ToolCallRequest) -> Result<Value, RouterError> {
        let client = self.client().await?;

        let response = client
            .post(endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| RouterError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RouterError::Status(status.as_u16()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| RouterError::Decode(e.to_string()))?;

        interpret_response(body)
    }

    async fn close(&self) {
        let mut slot = self.client.write().await;
        if slot.take().is_some() {
            debug!("Closed HTTP client");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn system_info_request() -> ToolCallRequest {
        ToolCallRequest::new("system_info", JsonMap::new())
    }

    #[test]
    fn test_envelope_shape() {
        let mut args = JsonMap::new();
        args.insert("governor".to_string(), json!("powersave"));
        let request = ToolCallRequest::new("set_cpu_governor", args);

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["method"], "tools/call");
        assert_eq!(value["params"]["name"], "set_cpu_governor");
        assert_eq!(value["params"]["arguments"]["governor"], "powersave");
        assert!(value["id"].as_str().unwrap().starts_with("set_cpu_governor-"));
    }

    #[test]
    fn test_interpret_result_member() {
        let payload = assert_ok!(interpret_response(
            json!({"jsonrpc": "2.0", "result": {"cpu_percent": 12.5}})
        ));
        assert_eq!(payload, json!({"cpu_percent": 12.5}));
    }

    #[test]
    fn test_interpret_bare_object() {
        let payload = assert_ok!(interpret_response(json!({"cpu_percent": 3.0})));
        assert_eq!(payload["cpu_percent"], 3.0);
    }

    #[test]
    fn test_interpret_error_member() {
        let err = assert_err!(interpret_response(
            json!({"error": {"code": -32601, "message": "Unknown tool"}})
        ));
        assert_eq!(err, RouterError::Remote("Unknown tool".to_string()));

        let err = assert_err!(interpret_response(json!({"error": "plain"})));
        assert_eq!(err, RouterError::Remote("plain".to_string()));
    }

    #[test]
    fn test_interpret_non_object() {
        let err = assert_err!(interpret_response(json!([1, 2, 3])));
        assert!(matches!(err, RouterError::Decode(_)));
    }

    #[tokio::test]
    async fn test_http_transport_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/mcp")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::PartialJson(json!({
                "method": "tools/call",
                "params": {"name": "system_info"}
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":"x","result":{"cpu_percent":42.0}}"#)
            .create_async()
            .await;

        let transport = HttpTransport::new(Duration::from_secs(5));
        let endpoint = format!("{}/mcp", server.url());
        let payload = assert_ok!(transport.call(&endpoint, &system_info_request()).await);

        assert_eq!(payload["cpu_percent"], 42.0);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_transport_status_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/mcp")
            .with_status(503)
            .create_async()
            .await;

        let transport = HttpTransport::new(Duration::from_secs(5));
        let endpoint = format!("{}/mcp", server.url());
        let err = assert_err!(transport.call(&endpoint, &system_info_request()).await);

        assert_eq!(err, RouterError::Status(503));
    }

    #[tokio::test]
    async fn test_http_transport_remote_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/mcp")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "jsonrpc": "2.0",
                    "id": "x",
                    "error": {"code": -32000, "message": "tool crashed"}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let transport = HttpTransport::new(Duration::from_secs(5));
        let endpoint = format!("{}/mcp", server.url());
        let err = assert_err!(transport.call(&endpoint, &system_info_request()).await);

        assert_eq!(err, RouterError::Remote("tool crashed".to_string()));
    }

    #[tokio::test]
    async fn test_http_transport_connection_refused() {
        let transport = HttpTransport::new(Duration::from_secs(2));
        let err = assert_err!(
            transport
                .call("http://127.0.0.1:1/mcp", &system_info_request())
                .await
        );

        assert!(matches!(err, RouterError::Transport(_)));
    }

    #[tokio::test]
    async fn test_http_transport_close_and_reopen() {
        let transport = HttpTransport::new(Duration::from_secs(2));
        assert!(!transport.is_open().await);

        assert_ok!(transport.client().await);
        assert!(transport.is_open().await);

        transport.close().await;
        assert!(!transport.is_open().await);

        assert_ok!(transport.client().await);
        assert!(transport.is_open().await);
    }
}
