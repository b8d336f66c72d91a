// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! LSP wire protocol: JSON-RPC message types and Content-Length framing.
//!
//! Each message is a JSON body wrapped in a header block terminated by a
//! blank line. `Content-Length` counts bytes of the UTF-8 encoding, not
//! characters. A malformed header is fatal to the connection; incomplete
//! data is not an error, the decoder just waits for more bytes.

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

const fn default_null() -> serde_json::Value {
    serde_json::Value::Null
}

/// A JSON-RPC request message.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RequestMessage {
    /// The JSON-RPC version.
    pub jsonrpc: String,
    /// The request ID.
    pub id: RequestId,
    /// The method name.
    pub method: String,
    /// The request parameters.
    #[serde(default = "default_null")]
    pub params: serde_json::Value,
}

/// A JSON-RPC response message.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResponseMessage {
    /// The JSON-RPC version.
    pub jsonrpc: String,
    /// The ID of the request this responds to.
    pub id: Option<RequestId>,
    /// The result value, on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// The error, on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

/// A JSON-RPC notification message (no ID, no reply).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NotificationMessage {
    /// The JSON-RPC version.
    pub jsonrpc: String,
    /// The method name.
    pub method: String,
    /// The notification parameters.
    #[serde(default = "default_null")]
    pub params: serde_json::Value,
}

/// A request or response ID.
///
/// The bridge always issues numeric IDs, but servers are free to use
/// strings in server-to-client requests, so both are accepted.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    /// A numeric ID.
    Number(i64),
    /// A string ID.
    String(String),
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResponseError {
    /// The error code.
    pub code: i64,
    /// The error message.
    pub message: String,
    /// Additional error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Builds a framed message ready to be written to the server's stdin.
#[must_use]
pub fn encode_frame(body: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 32);
    out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
    out.extend_from_slice(body.as_bytes());
    out
}

/// Tries to extract one complete message from the buffer.
///
/// Returns `Ok(None)` when the buffer does not yet hold a full message.
/// Consumed bytes are removed from the buffer, so this can be called in a
/// loop to drain several messages that arrived together.
///
/// # Errors
///
/// Returns [`BridgeError::Protocol`] when the header block is complete but
/// carries no parseable `Content-Length`, or when the body is not valid
/// UTF-8. Both are fatal: the byte stream can no longer be resynchronized.
pub fn try_parse_message(buffer: &mut BytesMut) -> Result<Option<String>> {
    let Some(header_end) = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| i + 4)
    else {
        return Ok(None);
    };

    let headers = std::str::from_utf8(&buffer[..header_end - 4])
        .map_err(|e| BridgeError::Protocol(format!("header block is not UTF-8: {e}")))?;

    let mut content_length: Option<usize> = None;
    for line in headers.lines() {
        let Some((name, value)) = line.split_once(':') else {
            return Err(BridgeError::Protocol(format!("malformed header: {line:?}")));
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            content_length = Some(value.trim().parse().map_err(|e| {
                BridgeError::Protocol(format!("invalid Content-Length {value:?}: {e}"))
            })?);
        }
    }

    let Some(content_length) = content_length else {
        return Err(BridgeError::Protocol(
            "missing Content-Length header".to_string(),
        ));
    };

    if buffer.len() < header_end + content_length {
        return Ok(None);
    }

    buffer.advance(header_end);
    let body = buffer.split_to(content_length);
    let message = String::from_utf8(body.to_vec())
        .map_err(|e| BridgeError::Protocol(format!("message body is not UTF-8: {e}")))?;

    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn parse_complete_message() -> Result<()> {
        let body = r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#;
        let raw = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);
        let mut buffer = BytesMut::from(raw.as_str());

        let result = try_parse_message(&mut buffer)?;
        assert_eq!(result, Some(body.to_string()));
        assert!(buffer.is_empty());
        Ok(())
    }

    #[test]
    fn parse_incomplete_header() -> Result<()> {
        let mut buffer = BytesMut::from("Content-Length: 10\r\n");
        assert_eq!(try_parse_message(&mut buffer)?, None);
        Ok(())
    }

    #[test]
    fn parse_incomplete_body() -> Result<()> {
        let mut buffer = BytesMut::from("Content-Length: 100\r\n\r\n{\"partial\":");
        assert_eq!(try_parse_message(&mut buffer)?, None);
        Ok(())
    }

    #[test]
    fn parse_multiple_messages() -> Result<()> {
        let body1 = r#"{"jsonrpc":"2.0","id":1}"#;
        let body2 = r#"{"jsonrpc":"2.0","id":2}"#;
        let raw = format!(
            "Content-Length: {}\r\n\r\n{}Content-Length: {}\r\n\r\n{}",
            body1.len(),
            body1,
            body2.len(),
            body2
        );
        let mut buffer = BytesMut::from(raw.as_str());

        assert_eq!(try_parse_message(&mut buffer)?, Some(body1.to_string()));
        assert_eq!(try_parse_message(&mut buffer)?, Some(body2.to_string()));
        assert!(buffer.is_empty());
        Ok(())
    }

    #[test]
    fn parse_case_insensitive_header() -> Result<()> {
        let body = r#"{"test":true}"#;
        let raw = format!("content-length: {}\r\n\r\n{}", body.len(), body);
        let mut buffer = BytesMut::from(raw.as_str());

        assert_eq!(try_parse_message(&mut buffer)?, Some(body.to_string()));
        Ok(())
    }

    #[test]
    fn parse_extra_content_type_header() -> Result<()> {
        let body = r#"{"test":true}"#;
        let raw = format!(
            "Content-Length: {}\r\nContent-Type: application/vscode-jsonrpc; charset=utf-8\r\n\r\n{}",
            body.len(),
            body
        );
        let mut buffer = BytesMut::from(raw.as_str());

        assert_eq!(try_parse_message(&mut buffer)?, Some(body.to_string()));
        Ok(())
    }

    #[test]
    fn content_length_counts_utf8_bytes() -> Result<()> {
        // "ö" is two bytes in UTF-8; a char-counting reader would stall.
        let body = r#"{"message":"größer"}"#;
        let mut buffer = BytesMut::from(&encode_frame(body)[..]);

        assert_eq!(try_parse_message(&mut buffer)?, Some(body.to_string()));
        assert!(buffer.is_empty());
        Ok(())
    }

    #[test]
    fn missing_content_length_is_fatal() {
        let mut buffer = BytesMut::from("X-Other: 1\r\n\r\n{}");
        assert!(try_parse_message(&mut buffer).is_err());
    }

    #[test]
    fn unparseable_content_length_is_fatal() {
        let mut buffer = BytesMut::from("Content-Length: banana\r\n\r\n{}");
        assert!(try_parse_message(&mut buffer).is_err());
    }

    #[test]
    fn header_line_without_colon_is_fatal() {
        let mut buffer = BytesMut::from("garbage\r\n\r\n{}");
        assert!(try_parse_message(&mut buffer).is_err());
    }

    #[test]
    fn request_id_number() -> Result<()> {
        let json = r#"{"jsonrpc":"2.0","id":42,"method":"test"}"#;
        let msg: RequestMessage = serde_json::from_str(json)?;
        assert_eq!(msg.id, RequestId::Number(42));
        Ok(())
    }

    #[test]
    fn request_id_string() -> Result<()> {
        let json = r#"{"jsonrpc":"2.0","id":"abc-123","method":"test"}"#;
        let msg: RequestMessage = serde_json::from_str(json)?;
        assert_eq!(msg.id, RequestId::String("abc-123".to_string()));
        Ok(())
    }

    #[test]
    fn response_with_error() -> Result<()> {
        let json =
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32600,"message":"Invalid Request"}}"#;
        let msg: ResponseMessage = serde_json::from_str(json)?;
        assert!(msg.result.is_none());
        let err = msg.error.ok_or_else(|| anyhow::anyhow!("missing error"))?;
        assert_eq!(err.code, -32600);
        Ok(())
    }

    #[test]
    fn notification_has_no_id() -> Result<()> {
        let json = r#"{"jsonrpc":"2.0","method":"initialized","params":{}}"#;
        let msg: NotificationMessage = serde_json::from_str(json)?;
        assert_eq!(msg.method, "initialized");
        Ok(())
    }

    #[test]
    fn encode_frame_round_trips() -> Result<()> {
        let body = r#"{"jsonrpc":"2.0","method":"exit"}"#;
        let mut buffer = BytesMut::from(&encode_frame(body)[..]);
        assert_eq!(try_parse_message(&mut buffer)?, Some(body.to_string()));
        Ok(())
    }
}
