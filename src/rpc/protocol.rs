//! JSON-RPC 2.0 envelopes shared by the HTTP and IPC transports.
//!
//! Results are carried as raw JSON so that big integers (token amounts)
//! reach the client exactly as the chain reported them.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::value::{to_raw_value, RawValue};
use serde_json::Value;
use thiserror::Error;

use crate::blockchain::BlockchainError;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
/// Method ran and failed, e.g. the chain rejected the query.
pub const SERVER_ERROR: i64 = -32000;

/// Error object of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{message} ({code})")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            METHOD_NOT_FOUND,
            format!("the method {} does not exist/is not available", method),
        )
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(SERVER_ERROR, message)
    }
}

impl From<BlockchainError> for RpcError {
    fn from(e: BlockchainError) -> Self {
        Self::server(e.to_string())
    }
}

pub type RpcResult = Result<Box<RawValue>, RpcError>;

/// Serialize a method result.
pub fn to_result<T: Serialize + ?Sized>(value: &T) -> RpcResult {
    to_raw_value(value).map_err(|e| RpcError::new(INTERNAL_ERROR, e.to_string()))
}

/// One namespace of RPC methods, e.g. `query` for `query_account`.
#[async_trait]
pub trait RpcService: Send + Sync {
    fn namespace(&self) -> &'static str;

    /// Run `method`, given without its namespace prefix.
    async fn call(&self, method: &str, params: &Value) -> RpcResult;
}

#[derive(Debug, Serialize)]
struct Response {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Box<RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

impl Response {
    fn success(id: Value, result: Box<RawValue>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn failure(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Reply {
    Single(Response),
    Batch(Vec<Response>),
}

/// Answer one request body, either a single call or a batch.
pub async fn handle_payload(service: &dyn RpcService, body: &str) -> String {
    let reply = match serde_json::from_str::<Value>(body) {
        Err(e) => Reply::Single(Response::failure(
            Value::Null,
            RpcError::new(PARSE_ERROR, format!("parse error: {}", e)),
        )),
        Ok(Value::Array(requests)) if requests.is_empty() => Reply::Single(Response::failure(
            Value::Null,
            RpcError::new(INVALID_REQUEST, "empty batch"),
        )),
        Ok(Value::Array(requests)) => {
            let mut responses = Vec::with_capacity(requests.len());
            for request in &requests {
                responses.push(handle_single(service, request).await);
            }
            Reply::Batch(responses)
        }
        Ok(request) => Reply::Single(handle_single(service, &request).await),
    };

    serde_json::to_string(&reply).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Unserializable RPC reply");
        format!(
            r#"{{"jsonrpc":"2.0","id":null,"error":{{"code":{},"message":"internal error"}}}}"#,
            INTERNAL_ERROR
        )
    })
}

async fn handle_single(service: &dyn RpcService, request: &Value) -> Response {
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    if !(id.is_null() || id.is_string() || id.is_number()) {
        return Response::failure(Value::Null, RpcError::new(INVALID_REQUEST, "id must be a string or number"));
    }
    if request.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Response::failure(id, RpcError::new(INVALID_REQUEST, "jsonrpc must be \"2.0\""));
    }
    let Some(method) = request.get("method").and_then(Value::as_str) else {
        return Response::failure(id, RpcError::new(INVALID_REQUEST, "missing method"));
    };

    let name = method
        .strip_prefix(service.namespace())
        .and_then(|rest| rest.strip_prefix('_'));
    let Some(name) = name else {
        return Response::failure(id, RpcError::method_not_found(method));
    };

    let params = request.get("params").unwrap_or(&Value::Null);
    match service.call(name, params).await {
        Ok(result) => Response::success(id, result),
        Err(e) => {
            tracing::debug!(method, code = e.code, error = %e.message, "RPC call failed");
            Response::failure(id, e)
        }
    }
}

/// Positional argument `index`, decoded as `T`.
pub fn param<T: DeserializeOwned>(params: &Value, index: usize) -> Result<T, RpcError> {
    let value = match params {
        Value::Array(items) => items.get(index),
        Value::Null => None,
        _ => return Err(RpcError::invalid_params("non-array args")),
    }
    .ok_or_else(|| RpcError::invalid_params(format!("missing value for required argument {}", index)))?;

    serde_json::from_value(value.clone())
        .map_err(|e| RpcError::invalid_params(format!("invalid argument {}: {}", index, e)))
}

/// Reject calls with more than `max` positional arguments.
pub fn expect_at_most(params: &Value, max: usize) -> Result<(), RpcError> {
    let count = match params {
        Value::Array(items) => items.len(),
        Value::Null => 0,
        _ => return Err(RpcError::invalid_params("non-array args")),
    };
    if count > max {
        return Err(RpcError::invalid_params(format!(
            "too many arguments, want at most {}",
            max
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl RpcService for Echo {
        fn namespace(&self) -> &'static str {
            "echo"
        }

        async fn call(&self, method: &str, params: &Value) -> RpcResult {
            match method {
                "first" => {
                    expect_at_most(params, 1)?;
                    to_result(&param::<String>(params, 0)?)
                }
                "fail" => Err(RpcError::server("chain unavailable")),
                _ => Err(RpcError::method_not_found(&format!("echo_{}", method))),
            }
        }
    }

    async fn call(body: &str) -> Value {
        serde_json::from_str(&handle_payload(&Echo, body).await).unwrap()
    }

    #[tokio::test]
    async fn test_result_keeps_request_id() {
        let response = call(r#"{"jsonrpc":"2.0","id":7,"method":"echo_first","params":["a"]}"#).await;
        assert_eq!(response, json!({"jsonrpc": "2.0", "id": 7, "result": "a"}));
    }

    #[tokio::test]
    async fn test_error_codes() {
        let parse = call("{not json").await;
        assert_eq!(parse["error"]["code"], PARSE_ERROR);
        assert_eq!(parse["id"], Value::Null);

        let version = call(r#"{"jsonrpc":"1.0","id":1,"method":"echo_first"}"#).await;
        assert_eq!(version["error"]["code"], INVALID_REQUEST);

        let other_namespace = call(r#"{"jsonrpc":"2.0","id":1,"method":"query_first","params":["a"]}"#).await;
        assert_eq!(other_namespace["error"]["code"], METHOD_NOT_FOUND);

        let unknown = call(r#"{"jsonrpc":"2.0","id":1,"method":"echo_missing"}"#).await;
        assert_eq!(unknown["error"]["code"], METHOD_NOT_FOUND);
        assert_eq!(
            unknown["error"]["message"],
            "the method echo_missing does not exist/is not available"
        );

        let missing = call(r#"{"jsonrpc":"2.0","id":1,"method":"echo_first","params":[]}"#).await;
        assert_eq!(missing["error"]["code"], INVALID_PARAMS);

        let extra = call(r#"{"jsonrpc":"2.0","id":1,"method":"echo_first","params":["a","b"]}"#).await;
        assert_eq!(extra["error"]["code"], INVALID_PARAMS);

        let wrong_type = call(r#"{"jsonrpc":"2.0","id":1,"method":"echo_first","params":[5]}"#).await;
        assert_eq!(wrong_type["error"]["code"], INVALID_PARAMS);

        let failed = call(r#"{"jsonrpc":"2.0","id":"x","method":"echo_fail"}"#).await;
        assert_eq!(failed["error"]["code"], SERVER_ERROR);
        assert_eq!(failed["id"], "x");
        assert!(failed.get("result").is_none());
    }

    #[tokio::test]
    async fn test_batch_answers_in_order() {
        let response = call(
            r#"[{"jsonrpc":"2.0","id":1,"method":"echo_first","params":["a"]},
                {"jsonrpc":"2.0","id":2,"method":"echo_fail"}]"#,
        )
        .await;
        let responses = response.as_array().unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["result"], "a");
        assert_eq!(responses[1]["error"]["code"], SERVER_ERROR);

        assert_eq!(call("[]").await["error"]["code"], INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_raw_result_is_not_reparsed() {
        struct Big;

        #[async_trait]
        impl RpcService for Big {
            fn namespace(&self) -> &'static str {
                "big"
            }

            async fn call(&self, _method: &str, _params: &Value) -> RpcResult {
                Ok(RawValue::from_string("123456789012345678901234567890".to_string()).unwrap())
            }
        }

        let reply = handle_payload(&Big, r#"{"jsonrpc":"2.0","id":1,"method":"big_any"}"#).await;
        assert_eq!(reply, r#"{"jsonrpc":"2.0","id":1,"result":123456789012345678901234567890}"#);
    }
}
