//! Frame codec.
//!
//! Each WebSocket library in the proxy has its own message type: axum on the
//! client-facing side, tungstenite on the backend side. [`Frame`] is the
//! common currency between them. It keeps the payload as raw bytes next to an
//! explicit [`PayloadType`] tag, so a text message always comes out as text and
//! a binary message as binary, whichever side it is copied to.

use bytes::{BufMut, Bytes, BytesMut};

use axum::extract::ws as axum_ws;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Message as TungsteniteMessage, Utf8Bytes};

/// Frame type carried alongside the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadType {
    Text,
    Binary,
    Ping,
    Pong,
    Close,
}

impl PayloadType {
    /// Control frames are generated by the protocol itself, not by the application.
    pub fn is_control(self) -> bool {
        matches!(self, PayloadType::Ping | PayloadType::Pong | PayloadType::Close)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PayloadType::Text => "text",
            PayloadType::Binary => "binary",
            PayloadType::Ping => "ping",
            PayloadType::Pong => "pong",
            PayloadType::Close => "close",
        }
    }
}

/// One WebSocket message with its frame type.
///
/// Close frames use the wire layout: empty, or a big-endian status code
/// followed by a UTF-8 reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload_type: PayloadType,
    payload: Bytes,
}

impl Frame {
    pub fn new(payload_type: PayloadType, payload: impl Into<Bytes>) -> Self {
        Self {
            payload_type,
            payload: payload.into(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(PayloadType::Text, Bytes::from(text.into()))
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::new(PayloadType::Binary, data)
    }

    /// A close frame with a status code and reason.
    pub fn close(code: u16, reason: &str) -> Self {
        let mut payload = BytesMut::with_capacity(2 + reason.len());
        payload.put_u16(code);
        payload.put_slice(reason.as_bytes());
        Self::new(PayloadType::Close, payload.freeze())
    }

    pub fn payload_type(&self) -> PayloadType {
        self.payload_type
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Status code of a close frame, if it carries one.
    pub fn close_code(&self) -> Option<u16> {
        match (self.payload_type, self.payload.as_ref()) {
            (PayloadType::Close, [hi, lo, ..]) => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        }
    }

    /// Hand the payload to a UTF-8 string type without copying it.
    fn into_text<T: TryFrom<Bytes>>(self) -> Result<T, CodecError> {
        let payload_type = self.payload_type;
        T::try_from(self.payload).map_err(|_| CodecError::InvalidUtf8(payload_type))
    }

    /// Split a close payload into `(code, reason)`; `None` for an empty payload.
    fn close_parts(&self) -> Result<Option<(u16, &str)>, CodecError> {
        match self.payload.len() {
            0 => Ok(None),
            1 => Err(CodecError::InvalidClosePayload),
            _ => {
                let code = u16::from_be_bytes([self.payload[0], self.payload[1]]);
                let reason = std::str::from_utf8(&self.payload[2..])
                    .map_err(|_| CodecError::InvalidUtf8(PayloadType::Close))?;
                Ok(Some((code, reason)))
            }
        }
    }
}

/// Error type for frame conversion.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("{} payload is not valid UTF-8", .0.as_str())]
    InvalidUtf8(PayloadType),

    #[error("close payload must be empty or at least two bytes")]
    InvalidClosePayload,

    #[error("unsupported message: {0}")]
    Unsupported(&'static str),
}

/// Conversion between a transport's message type and a tagged [`Frame`].
pub trait FrameCodec: Sized {
    /// Turn a received message into a frame, keeping its type.
    fn decode(self) -> Result<Frame, CodecError>;

    /// Turn a frame into a message of the same type for sending.
    fn encode(frame: Frame) -> Result<Self, CodecError>;
}

impl FrameCodec for TungsteniteMessage {
    fn decode(self) -> Result<Frame, CodecError> {
        let frame = match self {
            TungsteniteMessage::Text(text) => Frame::new(PayloadType::Text, Bytes::from(text)),
            TungsteniteMessage::Binary(data) => Frame::binary(data),
            TungsteniteMessage::Ping(data) => Frame::new(PayloadType::Ping, data),
            TungsteniteMessage::Pong(data) => Frame::new(PayloadType::Pong, data),
            TungsteniteMessage::Close(None) => Frame::new(PayloadType::Close, Bytes::new()),
            TungsteniteMessage::Close(Some(close)) => {
                Frame::close(u16::from(close.code), close.reason.as_str())
            }
            TungsteniteMessage::Frame(_) => return Err(CodecError::Unsupported("raw frame")),
        };
        Ok(frame)
    }

    fn encode(frame: Frame) -> Result<Self, CodecError> {
        let message = match frame.payload_type {
            PayloadType::Text => TungsteniteMessage::Text(frame.into_text()?),
            PayloadType::Binary => TungsteniteMessage::Binary(frame.payload),
            PayloadType::Ping => TungsteniteMessage::Ping(frame.payload),
            PayloadType::Pong => TungsteniteMessage::Pong(frame.payload),
            PayloadType::Close => {
                TungsteniteMessage::Close(frame.close_parts()?.map(|(code, reason)| CloseFrame {
                    code: CloseCode::from(code),
                    reason: Utf8Bytes::from(reason),
                }))
            }
        };
        Ok(message)
    }
}

impl FrameCodec for axum_ws::Message {
    fn decode(self) -> Result<Frame, CodecError> {
        let frame = match self {
            axum_ws::Message::Text(text) => Frame::new(PayloadType::Text, Bytes::from(text)),
            axum_ws::Message::Binary(data) => Frame::binary(data),
            axum_ws::Message::Ping(data) => Frame::new(PayloadType::Ping, data),
            axum_ws::Message::Pong(data) => Frame::new(PayloadType::Pong, data),
            axum_ws::Message::Close(None) => Frame::new(PayloadType::Close, Bytes::new()),
            axum_ws::Message::Close(Some(close)) => Frame::close(close.code, close.reason.as_str()),
        };
        Ok(frame)
    }

    fn encode(frame: Frame) -> Result<Self, CodecError> {
        let message = match frame.payload_type {
            PayloadType::Text => axum_ws::Message::Text(frame.into_text()?),
            PayloadType::Binary => axum_ws::Message::Binary(frame.payload),
            PayloadType::Ping => axum_ws::Message::Ping(frame.payload),
            PayloadType::Pong => axum_ws::Message::Pong(frame.payload),
            PayloadType::Close => {
                axum_ws::Message::Close(frame.close_parts()?.map(|(code, reason)| {
                    axum_ws::CloseFrame {
                        code,
                        reason: axum_ws::Utf8Bytes::from(reason),
                    }
                }))
            }
        };
        Ok(message)
    }
}
