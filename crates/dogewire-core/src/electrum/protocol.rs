//! Electrum JSON-RPC wire format.
//!
//! Every inbound line is decoded exactly once into a [`ServerMessage`]:
//! frames carrying an `id` are responses, frames without one are
//! notifications. Downstream code matches on the variant instead of
//! re-inspecting raw JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, RpcError};
use crate::scripthash::Scripthash;

pub(crate) const METHOD_SCRIPTHASH_SUBSCRIBE: &str = "blockchain.scripthash.subscribe";
pub(crate) const METHOD_HEADERS_SUBSCRIBE: &str = "blockchain.headers.subscribe";

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a [Value],
}

/// Serialize a request line. The line terminator is added by the framing codec.
pub(crate) fn encode_request(id: u64, method: &str, params: &[Value]) -> Result<String, CoreError> {
    let request = JsonRpcRequest {
        jsonrpc: "2.0",
        id,
        method,
        params,
    };
    serde_json::to_string(&request).map_err(|e| RpcError::Encode(e).into())
}

// ==============================================================================
// Inbound Messages
// ==============================================================================

#[derive(Debug)]
pub(crate) enum ServerMessage {
    Response {
        id: u64,
        outcome: Result<Value, RpcError>,
    },
    Notification(Notification),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Notification {
    ScripthashStatus {
        scripthash: Scripthash,
        status: Option<String>,
    },
    Header {
        height: u32,
    },
    Other {
        method: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum FrameError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid response id: {0}")]
    Id(Value),

    #[error("frame has neither an id nor a method")]
    Unroutable,

    #[error("invalid params for {method}: {reason}")]
    Params { method: String, reason: String },
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
}

pub(crate) fn decode_frame(line: &str) -> Result<ServerMessage, FrameError> {
    let frame: RawFrame = serde_json::from_str(line)?;

    if let Some(id) = frame.id {
        let id = parse_id(&id)?;
        let outcome = match frame.error {
            Some(err) => Err(parse_jsonrpc_error(err)),
            None => Ok(frame.result.unwrap_or(Value::Null)),
        };
        return Ok(ServerMessage::Response { id, outcome });
    }

    let method = frame.method.ok_or(FrameError::Unroutable)?;
    let params = frame.params.unwrap_or(Value::Null);
    let notification = match method.as_str() {
        METHOD_SCRIPTHASH_SUBSCRIBE => decode_scripthash_status(&method, params)?,
        METHOD_HEADERS_SUBSCRIBE => decode_header(&method, params)?,
        _ => Notification::Other { method },
    };
    Ok(ServerMessage::Notification(notification))
}

fn decode_scripthash_status(method: &str, params: Value) -> Result<Notification, FrameError> {
    let (scripthash, status): (Scripthash, Option<String>) =
        serde_json::from_value(params).map_err(|e| FrameError::Params {
            method: method.to_owned(),
            reason: e.to_string(),
        })?;
    Ok(Notification::ScripthashStatus { scripthash, status })
}

fn decode_header(method: &str, params: Value) -> Result<Notification, FrameError> {
    #[derive(Deserialize)]
    struct HeaderParam {
        height: u32,
    }

    let (header,): (HeaderParam,) =
        serde_json::from_value(params).map_err(|e| FrameError::Params {
            method: method.to_owned(),
            reason: e.to_string(),
        })?;
    Ok(Notification::Header {
        height: header.height,
    })
}

fn parse_id(id: &Value) -> Result<u64, FrameError> {
    if let Some(n) = id.as_u64() {
        return Ok(n);
    }
    if let Some(n) = id.as_str().and_then(|s| s.parse::<u64>().ok()) {
        return Ok(n);
    }
    Err(FrameError::Id(id.clone()))
}

/// Turn a JSON-RPC `error` member into an [`RpcError`].
///
/// ElectrumX sends `{"code": <int>, "message": <string>}`, some forks send a
/// bare string. Anything else is kept as raw JSON.
pub(crate) fn parse_jsonrpc_error(err: Value) -> RpcError {
    match err {
        Value::String(message) => RpcError::ServerError {
            code: None,
            message,
        },
        Value::Object(ref map) => match map.get("message").and_then(Value::as_str) {
            Some(message) => RpcError::ServerError {
                code: map.get("code").and_then(Value::as_i64),
                message: message.to_owned(),
            },
            None => RpcError::InvalidResponse(format!("non-standard JSON-RPC error: {err}")),
        },
        other => RpcError::InvalidResponse(format!("non-standard JSON-RPC error: {other}")),
    }
}
