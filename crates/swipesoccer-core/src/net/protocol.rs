use serde::{Deserialize, Serialize};

use super::messages::{
    ClientMessage, GameStateMsg, KickBallMsg, MessageType, MoveRejectedMsg, RegisterMsg,
    RegisterResponseMsg, ServerMessage,
};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum message payload size in bytes.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024; // 64 KiB

#[derive(Debug)]
pub enum ProtocolError {
    EmptyMessage,
    UnknownMessageType(u8),
    PayloadTooLarge(usize),
    SerializeError(String),
    DeserializeError(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::UnknownMessageType(b) => write!(f, "unknown message type: 0x{b:02x}"),
            Self::PayloadTooLarge(size) => {
                write!(
                    f,
                    "payload too large: {size} bytes (max {MAX_MESSAGE_SIZE})"
                )
            },
            Self::SerializeError(e) => write!(f, "serialize error: {e}"),
            Self::DeserializeError(e) => write!(f, "deserialize error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Encode a serializable payload with a 1-byte type prefix.
pub fn encode_message<T: Serialize>(
    msg_type: MessageType,
    payload: &T,
) -> Result<Vec<u8>, ProtocolError> {
    let payload_bytes =
        rmp_serde::to_vec(payload).map_err(|e| ProtocolError::SerializeError(e.to_string()))?;
    let total = 1 + payload_bytes.len();
    if total > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(total));
    }
    let mut buf = Vec::with_capacity(total);
    buf.push(msg_type as u8);
    buf.extend_from_slice(&payload_bytes);
    Ok(buf)
}

/// Encode a `ClientMessage` to wire format.
pub fn encode_client_message(msg: &ClientMessage) -> Result<Vec<u8>, ProtocolError> {
    match msg {
        ClientMessage::Register(m) => encode_message(MessageType::Register, m),
        ClientMessage::KickBall(m) => encode_message(MessageType::KickBall, m),
    }
}

/// Encode a `ServerMessage` to wire format.
pub fn encode_server_message(msg: &ServerMessage) -> Result<Vec<u8>, ProtocolError> {
    match msg {
        ServerMessage::RegisterResponse(m) => encode_message(MessageType::RegisterResponse, m),
        ServerMessage::GameState(m) => encode_message(MessageType::GameState, m),
        ServerMessage::MoveRejected(m) => encode_message(MessageType::MoveRejected, m),
    }
}

/// Extract the message type byte from raw wire data.
pub fn decode_message_type(data: &[u8]) -> Result<MessageType, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    MessageType::from_byte(data[0]).ok_or(ProtocolError::UnknownMessageType(data[0]))
}

/// Decode a MessagePack payload (bytes after the type prefix).
pub fn decode_payload<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    rmp_serde::from_slice(&data[1..]).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
}

/// Decode raw wire data into a `ClientMessage`.
pub fn decode_client_message(data: &[u8]) -> Result<ClientMessage, ProtocolError> {
    let msg_type = decode_message_type(data)?;
    match msg_type {
        MessageType::Register => Ok(ClientMessage::Register(decode_payload::<RegisterMsg>(
            data,
        )?)),
        MessageType::KickBall => Ok(ClientMessage::KickBall(decode_payload::<KickBallMsg>(
            data,
        )?)),
        _ => Err(ProtocolError::UnknownMessageType(data[0])),
    }
}

/// Decode raw wire data into a `ServerMessage`.
pub fn decode_server_message(data: &[u8]) -> Result<ServerMessage, ProtocolError> {
    let msg_type = decode_message_type(data)?;
    match msg_type {
        MessageType::RegisterResponse => Ok(ServerMessage::RegisterResponse(decode_payload::<
            RegisterResponseMsg,
        >(data)?)),
        MessageType::GameState => Ok(ServerMessage::GameState(Box::new(decode_payload::<
            GameStateMsg,
        >(data)?))),
        MessageType::MoveRejected => Ok(ServerMessage::MoveRejected(decode_payload::<
            MoveRejectedMsg,
        >(data)?)),
        _ => Err(ProtocolError::UnknownMessageType(data[0])),
    }
}
