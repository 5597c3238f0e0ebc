//! HTTP transport for named remote procedures.
//!
//! Procedures are invoked as `POST {base_url}{rpc_path}/{procedure}` with the
//! parameters as the JSON body. Every failure leaves this module already
//! classified as a [`RemoteError`].

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use waybill_core::{ErrorSignal, RemoteError, RemoteResult};

use crate::backend::RemoteBackend;
use crate::config::ClientConfig;
use crate::error::ClientError;

/// Error body returned by the backend on a non-success status.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<String>,
    #[serde(default)]
    hint: Option<String>,
}

#[derive(Clone)]
pub struct RpcClient {
    client: reqwest::Client,
    endpoint: String,
    request_timeout: Duration,
    timeout_is_transient: bool,
}

impl RpcClient {
    pub fn new(
        config: &ClientConfig,
        request_timeout: Duration,
        timeout_is_transient: bool,
    ) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .default_headers(build_auth_headers(config)?)
            .build()?;

        let endpoint = format!(
            "{}{}",
            config.base_url.trim_end_matches('/'),
            config.rpc_path.trim_end_matches('/')
        );
        Ok(Self {
            client,
            endpoint,
            request_timeout,
            timeout_is_transient,
        })
    }

    /// URL a procedure is posted to.
    pub fn procedure_url(&self, procedure: &str) -> String {
        format!("{}/{}", self.endpoint, procedure)
    }

    fn transport_error(&self, err: reqwest::Error) -> RemoteError {
        if err.is_timeout() {
            return RemoteError::timeout(self.request_timeout, self.timeout_is_transient);
        }
        // Classify without the URL: ports and procedure names can look like
        // status markers.
        let status = err.status().map(|status| status.as_u16());
        RemoteError::from_signal(ErrorSignal {
            status,
            code: None,
            message: Some(err.without_url().to_string()),
        })
    }

    async fn parse_response(&self, response: reqwest::Response) -> RemoteResult<Value> {
        let status = response.status();
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }

        let text = response
            .text()
            .await
            .map_err(|err| self.transport_error(err))?;

        if status.is_success() {
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text).map_err(|err| {
                RemoteError::permanent(format!("invalid response body: {}", err))
                    .with_status(status.as_u16())
            });
        }

        Err(RemoteError::from_signal(parse_error_body(status.as_u16(), &text)))
    }
}

#[async_trait]
impl RemoteBackend for RpcClient {
    async fn call(&self, procedure: &str, params: &Value) -> RemoteResult<Value> {
        let url = self.procedure_url(procedure);
        tracing::debug!(procedure, "Calling remote procedure");

        let response = self
            .client
            .post(&url)
            .json(params)
            .send()
            .await
            .map_err(|err| self.transport_error(err))?;

        let result = self.parse_response(response).await;
        if let Err(err) = &result {
            tracing::debug!(
                procedure,
                kind = %err.kind(),
                status = ?err.status(),
                error = %err.message(),
                "Remote procedure failed"
            );
        }
        result
    }
}

/// Turn a non-success response into a raw signal for classification.
///
/// JSON bodies contribute their `code` and a message assembled from
/// `message`, `details` and `hint`; anything else is used verbatim.
pub fn parse_error_body(status: u16, text: &str) -> ErrorSignal {
    let mut signal = ErrorSignal::status(status);
    match serde_json::from_str::<ErrorBody>(text) {
        Ok(body) => {
            signal.code = body.code.and_then(|code| match code {
                Value::String(code) => Some(code),
                Value::Number(code) => Some(code.to_string()),
                _ => None,
            });
            let parts: Vec<String> = [body.message, body.details, body.hint]
                .into_iter()
                .flatten()
                .filter(|part| !part.trim().is_empty())
                .collect();
            if !parts.is_empty() {
                signal.message = Some(parts.join(" | "));
            }
        }
        Err(_) => {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                signal.message = Some(trimmed.to_string());
            }
        }
    }
    signal
}

fn build_auth_headers(config: &ClientConfig) -> Result<HeaderMap, ClientError> {
    let mut headers = HeaderMap::new();
    if let Some(api_key) = &config.api_key {
        headers.insert(
            HeaderName::from_static("apikey"),
            HeaderValue::from_str(api_key).map_err(|e| ClientError::Config(e.to_string()))?,
        );
    }
    if let Some(token) = &config.bearer_token {
        let value = format!("Bearer {}", token);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&value).map_err(|e| ClientError::Config(e.to_string()))?,
        );
    }
    Ok(headers)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;
    use waybill_core::ErrorKind;

    /// Serve exactly one HTTP response and hand back the raw request.
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            request
        });
        (format!("http://{}", addr), handle)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(split) = text.find("\r\n\r\n") {
                let content_length = text[..split]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= split + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    fn client(base_url: &str) -> RpcClient {
        let config = ClientConfig::new(base_url)
            .with_api_key("anon-key")
            .with_bearer_token("session-token");
        RpcClient::new(&config, Duration::from_secs(5), true).unwrap()
    }

    #[tokio::test]
    async fn test_success_posts_params_with_auth() {
        let (base_url, server) = serve_once("200 OK", r#"[{"week":1,"utr":0.82}]"#).await;
        let result = client(&base_url)
            .call("get_utr_summary", &json!({ "week": 1 }))
            .await
            .unwrap();
        assert_eq!(result, json!([{ "week": 1, "utr": 0.82 }]));

        let request = server.await.unwrap();
        let lower = request.to_ascii_lowercase();
        assert!(request.starts_with("POST /rest/v1/rpc/get_utr_summary HTTP/1.1"));
        assert!(lower.contains("apikey: anon-key"));
        assert!(lower.contains("authorization: bearer session-token"));
        assert!(request.ends_with(r#"{"week":1}"#));
    }

    #[tokio::test]
    async fn test_no_content_is_null() {
        let (base_url, server) = serve_once("204 No Content", "").await;
        let result = client(&base_url).call("touch", &json!({})).await.unwrap();
        assert_eq!(result, Value::Null);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_server_fault_is_transient() {
        let (base_url, server) = serve_once(
            "500 Internal Server Error",
            r#"{"code":"XX000","message":"could not serialize access","details":null,"hint":null}"#,
        )
        .await;
        let err = client(&base_url).call("get_otd", &json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientServer);
        assert_eq!(err.status(), Some(500));
        assert_eq!(err.code(), Some("XX000"));
        assert_eq!(err.message(), "could not serialize access");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_too_many_requests_is_rate_limited() {
        let (base_url, server) = serve_once("429 Too Many Requests", "slow down").await;
        let err = client(&base_url).call("get_otd", &json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert_eq!(err.message(), "slow down");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_error_is_permanent() {
        let (base_url, server) = serve_once(
            "404 Not Found",
            r#"{"code":"PGRST202","message":"Could not find the function","hint":"Check the name"}"#,
        )
        .await;
        let err = client(&base_url).call("missing", &json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permanent);
        assert_eq!(err.message(), "Could not find the function | Check the name");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(socket);
        });

        let config = ClientConfig::new(format!("http://{}", addr));
        let client = RpcClient::new(&config, Duration::from_millis(100), true).unwrap();
        let err = client.call("slow", &json!({})).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.kind(), ErrorKind::TransientServer);
        server.abort();
    }

    #[tokio::test]
    async fn test_connection_failure_kind_ignores_url() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client(&format!("http://{}", addr));
        let plain = client.call("get_hubs", &json!({})).await.unwrap_err();
        let numbered = client
            .call("get_top_500_hubs", &json!({ "limit": 429 }))
            .await
            .unwrap_err();

        assert_eq!(plain.kind(), ErrorKind::Permanent);
        assert_eq!(numbered.kind(), plain.kind());
        assert!(!numbered.message().contains("get_top_500_hubs"));
        assert!(!numbered.message().contains(&addr.port().to_string()));
    }

    #[test]
    fn test_parse_error_body_variants() {
        let signal = parse_error_body(503, "");
        assert_eq!(signal.status, Some(503));
        assert_eq!(signal.message, None);

        let signal = parse_error_body(400, r#"{"code":42,"message":"bad"}"#);
        assert_eq!(signal.code.as_deref(), Some("42"));
        assert_eq!(signal.message.as_deref(), Some("bad"));

        let signal = parse_error_body(502, "<html>Bad Gateway</html>");
        assert_eq!(signal.message.as_deref(), Some("<html>Bad Gateway</html>"));
    }

    #[test]
    fn test_procedure_url_joins_cleanly() {
        let config = ClientConfig::new("https://api.example.com/").with_rpc_path("/rpc/");
        let client = RpcClient::new(&config, Duration::from_secs(1), true).unwrap();
        assert_eq!(client.procedure_url("get_otd"), "https://api.example.com/rpc/get_otd");
    }

    #[test]
    fn test_invalid_header_value_is_config_error() {
        let config = ClientConfig::new("http://localhost").with_api_key("bad\nkey");
        assert!(matches!(
            RpcClient::new(&config, Duration::from_secs(1), true),
            Err(ClientError::Config(_))
        ));
    }
}
