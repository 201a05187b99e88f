//! Hub Codec
//!
//! Encoding and decoding for the JSON hub protocol.
//!
//! One WebSocket text message may carry several frames, each terminated by
//! the record separator. Frames are decoded independently so one malformed
//! frame does not take its neighbours down with it.
//!
//! Example message carrying two pushes:
//! ```text
//! {"type":1,"target":"PriceUpdate","arguments":[{...}]}␞{"type":6}␞
//! ```

use serde::Serialize;
use serde_json::Value;

use super::messages::{
    CloseMessage, CompletionMessage, HandshakeRequest, HandshakeResponse, HubFrame,
    InvocationMessage, PingMessage, RECORD_SEPARATOR, frame_type, target,
};
use crate::application::ports::{HubEvent, HubRequest};
use crate::domain::streaming::timestamp;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame has no numeric `type` field.
    #[error("frame without type: {0}")]
    MissingType(String),

    /// Invocation target the client does not handle.
    #[error("unknown invocation target: {0}")]
    UnknownTarget(String),

    /// Push invocation without its payload argument.
    #[error("invocation {0} carries no argument")]
    MissingArgument(String),

    /// Handshake response not terminated yet.
    #[error("incomplete handshake response")]
    IncompleteHandshake,

    /// Server refused the handshake.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),
}

impl CodecError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Json(_) => "json",
            Self::MissingType(_) => "missing_type",
            Self::UnknownTarget(_) => "unknown_target",
            Self::MissingArgument(_) => "missing_argument",
            Self::IncompleteHandshake => "incomplete_handshake",
            Self::HandshakeRejected(_) => "handshake_rejected",
        }
    }
}

/// JSON hub protocol codec.
#[derive(Debug, Default, Clone)]
pub struct HubCodec;

impl HubCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    // =========================================================================
    // Encoding
    // =========================================================================

    /// Encode the handshake request.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode_handshake(&self) -> Result<String, CodecError> {
        frame(&HandshakeRequest::default())
    }

    /// Encode a client operation as an invocation.
    ///
    /// Group joins and leaves are sent without an invocation id; requests
    /// carry their correlation token.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode_request(&self, request: &HubRequest) -> Result<String, CodecError> {
        let message = match request {
            HubRequest::JoinGroup { symbol } => InvocationMessage::new(
                target::JOIN_MARKET_GROUP,
                vec![Value::from(symbol.as_str())],
                None,
            ),
            HubRequest::LeaveGroup { symbol } => InvocationMessage::new(
                target::LEAVE_MARKET_GROUP,
                vec![Value::from(symbol.as_str())],
                None,
            ),
            HubRequest::RequestCurrentPrice { symbol, request_id } => InvocationMessage::new(
                target::REQUEST_CURRENT_PRICE,
                vec![Value::from(symbol.as_str())],
                Some(request_id.to_string()),
            ),
            HubRequest::RequestPriceHistory {
                symbol,
                from,
                to,
                request_id,
            } => InvocationMessage::new(
                target::GET_PRICE_HISTORY,
                vec![
                    Value::from(symbol.as_str()),
                    Value::from(timestamp::format(from)),
                    Value::from(timestamp::format(to)),
                ],
                Some(request_id.to_string()),
            ),
        };
        frame(&message)
    }

    /// Encode an invocation with one payload argument.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode_invocation<T: Serialize>(
        &self,
        target: &str,
        payload: &T,
    ) -> Result<String, CodecError> {
        let argument = serde_json::to_value(payload)?;
        frame(&InvocationMessage::new(target, vec![argument], None))
    }

    /// Encode a keep-alive ping.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode_ping(&self) -> Result<String, CodecError> {
        frame(&PingMessage::default())
    }

    /// Encode a close frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode_close(&self) -> Result<String, CodecError> {
        frame(&CloseMessage::normal())
    }

    // =========================================================================
    // Decoding
    // =========================================================================

    /// Decode the handshake response at the start of `text`.
    ///
    /// Returns whatever follows the response, which may already hold frames.
    ///
    /// # Errors
    ///
    /// Returns an error if the response is incomplete, malformed or a rejection.
    pub fn decode_handshake<'a>(&self, text: &'a str) -> Result<&'a str, CodecError> {
        let (response, rest) = text
            .split_once(RECORD_SEPARATOR)
            .ok_or(CodecError::IncompleteHandshake)?;

        let response: HandshakeResponse = serde_json::from_str(response)?;
        match response.error {
            Some(error) => Err(CodecError::HandshakeRejected(error)),
            None => Ok(rest),
        }
    }

    /// Decode every frame in a text message.
    #[must_use]
    pub fn decode(&self, text: &str) -> Vec<Result<HubFrame, CodecError>> {
        text.split(RECORD_SEPARATOR)
            .filter(|raw| !raw.trim().is_empty())
            .map(decode_frame)
            .collect()
    }

    /// Turn a frame into a client event.
    ///
    /// Pings and unknown frame types yield `None`. Close frames also yield
    /// `None`; the transport handles them itself.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown targets or payloads that do not decode.
    pub fn to_event(&self, frame: HubFrame) -> Result<Option<HubEvent>, CodecError> {
        match frame {
            HubFrame::Invocation(invocation) => decode_invocation(invocation).map(Some),
            HubFrame::Completion(CompletionMessage {
                invocation_id,
                error,
                ..
            }) => Ok(Some(HubEvent::Completion {
                invocation_id,
                error,
            })),
            HubFrame::Ping | HubFrame::Close(_) | HubFrame::Other(_) => Ok(None),
        }
    }
}

fn frame<T: Serialize>(message: &T) -> Result<String, CodecError> {
    let mut text = serde_json::to_string(message)?;
    text.push(RECORD_SEPARATOR);
    Ok(text)
}

fn decode_frame(raw: &str) -> Result<HubFrame, CodecError> {
    let value: Value = serde_json::from_str(raw)?;
    let msg_type = value
        .get("type")
        .and_then(Value::as_u64)
        .ok_or_else(|| CodecError::MissingType(preview(raw)))?;

    let frame = match msg_type {
        frame_type::INVOCATION => HubFrame::Invocation(serde_json::from_value(value)?),
        frame_type::COMPLETION => HubFrame::Completion(serde_json::from_value(value)?),
        frame_type::PING => HubFrame::Ping,
        frame_type::CLOSE => HubFrame::Close(serde_json::from_value(value)?),
        other => HubFrame::Other(other),
    };
    Ok(frame)
}

fn decode_invocation(invocation: InvocationMessage) -> Result<HubEvent, CodecError> {
    let InvocationMessage {
        target: name,
        arguments,
        ..
    } = invocation;

    let known = [
        target::PRICE_UPDATE,
        target::MARKET_UPDATE,
        target::CURRENT_PRICE,
        target::PRICE_HISTORY,
        target::TRADE_MESSAGE,
    ];
    if !known.contains(&name.as_str()) {
        return Err(CodecError::UnknownTarget(name));
    }

    let Some(payload) = arguments.into_iter().next() else {
        return Err(CodecError::MissingArgument(name));
    };

    let event = match name.as_str() {
        target::PRICE_UPDATE => HubEvent::PriceUpdate(serde_json::from_value(payload)?),
        target::MARKET_UPDATE => HubEvent::MarketUpdate(serde_json::from_value(payload)?),
        target::CURRENT_PRICE => HubEvent::CurrentPrice(serde_json::from_value(payload)?),
        target::PRICE_HISTORY => HubEvent::PriceHistory(serde_json::from_value(payload)?),
        _ => HubEvent::Trade(serde_json::from_value(payload)?),
    };
    Ok(event)
}

fn preview(raw: &str) -> String {
    raw.chars().take(50).collect()
}
