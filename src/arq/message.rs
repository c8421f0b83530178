use super::timer::Timer;
use crate::error::ModemError;

/// Connection id 0 addresses everyone; real sessions negotiate a non-zero id.
pub const BROADCAST_ID: u8 = 0x00;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    None,
    DataLong,
    DataShort,
    AckControl,
    AckRange,
    AckMulti,
    Control,
}

impl MessageType {
    pub fn as_u8(self) -> u8 {
        match self {
            MessageType::None => 0x00,
            MessageType::DataLong => 0x10,
            MessageType::DataShort => 0x11,
            MessageType::AckControl => 0x20,
            MessageType::AckRange => 0x21,
            MessageType::AckMulti => 0x22,
            MessageType::Control => 0x30,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x10 => Some(MessageType::DataLong),
            0x11 => Some(MessageType::DataShort),
            0x20 => Some(MessageType::AckControl),
            0x21 => Some(MessageType::AckRange),
            0x22 => Some(MessageType::AckMulti),
            0x30 => Some(MessageType::Control),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCode {
    StartConnection,
    TestConnection,
    CloseConnection,
    KeepAlive,
    FileStart,
    FileEnd,
    PipeOpen,
    PipeClose,
    SwitchRole,
    BlockEnd,
    SetConfig,
    RepeatLastAck,
}

impl ControlCode {
    pub fn as_u8(self) -> u8 {
        match self {
            ControlCode::StartConnection => 0x31,
            ControlCode::TestConnection => 0x32,
            ControlCode::CloseConnection => 0x33,
            ControlCode::KeepAlive => 0x34,
            ControlCode::FileStart => 0x35,
            ControlCode::FileEnd => 0x36,
            ControlCode::PipeOpen => 0x37,
            ControlCode::PipeClose => 0x38,
            ControlCode::SwitchRole => 0x39,
            ControlCode::BlockEnd => 0x3A,
            ControlCode::SetConfig => 0x3B,
            ControlCode::RepeatLastAck => 0x3C,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x31 => Some(ControlCode::StartConnection),
            0x32 => Some(ControlCode::TestConnection),
            0x33 => Some(ControlCode::CloseConnection),
            0x34 => Some(ControlCode::KeepAlive),
            0x35 => Some(ControlCode::FileStart),
            0x36 => Some(ControlCode::FileEnd),
            0x37 => Some(ControlCode::PipeOpen),
            0x38 => Some(ControlCode::PipeClose),
            0x39 => Some(ControlCode::SwitchRole),
            0x3A => Some(ControlCode::BlockEnd),
            0x3B => Some(ControlCode::SetConfig),
            0x3C => Some(ControlCode::RepeatLastAck),
            _ => None,
        }
    }
}

/// Lifecycle of one outstanding message slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Free,
    AddedToList,
    AddedToBatchBuffer,
    PendingAck,
    Acked,
    AckTimedOut,
    Failed,
    Received,
}

/// Session-level link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Dropped,
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Listening,
    ConnectionReceived,
    ConnectionAccepted,
    Negotiating,
}

/// What the engine is doing inside a connected session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Idle,
    TransmittingData,
    Receiving,
    ReceivingAcksData,
    AcknowledgingData,
    TransmittingControl,
    ReceivingAcksControl,
    AcknowledgingControl,
}

/// Exactly one commander per session; the responder listens and acks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Commander,
    Responder,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub message_type: MessageType,
    pub id: u8,
    pub sequence_number: u8,
    pub length: usize,
    pub data: Vec<u8>,
    pub n_resends: u8,
    pub ack_timeout: i64,
    pub ack_timer: Timer,
    pub status: MessageStatus,
}

impl Message {
    pub fn free(max_data_length: usize) -> Self {
        Message {
            message_type: MessageType::None,
            id: 0,
            sequence_number: 0,
            length: 0,
            data: vec![0; max_data_length],
            n_resends: 0,
            ack_timeout: 0,
            ack_timer: Timer::new(),
            status: MessageStatus::Free,
        }
    }

    pub fn clear(&mut self) {
        self.message_type = MessageType::None;
        self.id = 0;
        self.sequence_number = 0;
        self.length = 0;
        self.n_resends = 0;
        self.ack_timeout = 0;
        self.ack_timer.stop();
        self.ack_timer.reset();
        self.status = MessageStatus::Free;
    }
}

/// Encode one message into the frame byte layout:
///
/// ```text
/// DATA_LONG   : [0x10][conn_id][seq][msg_id][payload ...]
/// DATA_SHORT  : [0x11][conn_id][seq][msg_id][length][payload ...]
/// ACK_RANGE   : [0x21][conn_id][seq][msg_id][start][end]
/// ACK_MULTI   : [0x22][conn_id][seq][msg_id][count][ids ...]
/// CONTROL     : [0x30][conn_id][seq][cmd][args ...]
/// ACK_CONTROL : [0x20][conn_id][seq][cmd][args ...]
/// ```
pub fn encode_frame(message: &Message, connection_id: u8) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(5 + message.length);
    bytes.push(message.message_type.as_u8());
    bytes.push(connection_id);
    bytes.push(message.sequence_number);
    match message.message_type {
        MessageType::DataLong | MessageType::AckRange | MessageType::AckMulti => {
            bytes.push(message.id);
        }
        MessageType::DataShort => {
            bytes.push(message.id);
            bytes.push(message.length as u8);
        }
        _ => {}
    }
    bytes.extend_from_slice(&message.data[..message.length]);
    bytes
}

/// A frame parsed back out of decoded payload bytes.
#[derive(Debug, Clone)]
pub struct ParsedFrame {
    pub message_type: MessageType,
    pub connection_id: u8,
    pub sequence_number: u8,
    pub id: u8,
    pub data: Vec<u8>,
}

/// Decode a received frame. `max_data_length` bounds DATA_LONG payloads,
/// which fill the whole frame.
pub fn decode_frame(bytes: &[u8], max_data_length: usize) -> Result<ParsedFrame, ModemError> {
    if bytes.len() < 3 {
        return Err(ModemError::MessageLength {
            length: bytes.len(),
            limit: 3,
        });
    }
    let message_type = MessageType::from_u8(bytes[0]).ok_or_else(|| {
        ModemError::Config(format!("unknown frame type {:#04x}", bytes[0]))
    })?;
    let connection_id = bytes[1];
    let sequence_number = bytes[2];

    let header_len = match message_type {
        MessageType::DataShort => 5,
        MessageType::DataLong | MessageType::AckRange | MessageType::AckMulti => 4,
        _ => 3,
    };
    if bytes.len() < header_len {
        return Err(ModemError::MessageLength {
            length: bytes.len(),
            limit: header_len,
        });
    }

    let frame = match message_type {
        MessageType::DataLong => ParsedFrame {
            message_type,
            connection_id,
            sequence_number,
            id: bytes[3],
            data: bytes[4..(4 + max_data_length).min(bytes.len())].to_vec(),
        },
        MessageType::DataShort => {
            let length = bytes[4] as usize;
            if 5 + length > bytes.len() {
                return Err(ModemError::MessageLength {
                    length,
                    limit: bytes.len().saturating_sub(5),
                });
            }
            ParsedFrame {
                message_type,
                connection_id,
                sequence_number,
                id: bytes[3],
                data: bytes[5..5 + length].to_vec(),
            }
        }
        MessageType::AckRange | MessageType::AckMulti => ParsedFrame {
            message_type,
            connection_id,
            sequence_number,
            id: bytes[3],
            data: bytes[4..(4 + max_data_length).min(bytes.len())].to_vec(),
        },
        MessageType::Control | MessageType::AckControl => ParsedFrame {
            message_type,
            connection_id,
            sequence_number,
            id: 0,
            data: bytes[3..(3 + max_data_length).min(bytes.len())].to_vec(),
        },
        MessageType::None => {
            return Err(ModemError::Config("empty frame type".into()));
        }
    };
    Ok(frame)
}

/// SNR travels inside TEST_CONNECTION as a 4-byte little-endian float.
pub fn encode_snr(snr: f64) -> [u8; 4] {
    (snr as f32).to_le_bytes()
}

pub fn decode_snr(bytes: &[u8]) -> f64 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    f32::from_le_bytes(raw) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_message(message_type: MessageType, id: u8, payload: &[u8]) -> Message {
        let mut message = Message::free(64);
        message.message_type = message_type;
        message.id = id;
        message.sequence_number = 3;
        message.length = payload.len();
        message.data[..payload.len()].copy_from_slice(payload);
        message
    }

    #[test]
    fn data_long_wire_layout() {
        let message = data_message(MessageType::DataLong, 9, &[0xDE, 0xAD]);
        let bytes = encode_frame(&message, 0x42);
        assert_eq!(&bytes[..4], &[0x10, 0x42, 3, 9]);
        assert_eq!(&bytes[4..], &[0xDE, 0xAD]);
    }

    #[test]
    fn data_short_carries_explicit_length() {
        let message = data_message(MessageType::DataShort, 7, &[1, 2, 3]);
        let bytes = encode_frame(&message, 1);
        assert_eq!(&bytes[..5], &[0x11, 1, 3, 7, 3]);

        let parsed = decode_frame(&bytes, 64).unwrap();
        assert_eq!(parsed.message_type, MessageType::DataShort);
        assert_eq!(parsed.id, 7);
        assert_eq!(parsed.data, vec![1, 2, 3]);
    }

    #[test]
    fn control_frames_round_trip() {
        let mut message = Message::free(16);
        message.message_type = MessageType::Control;
        message.sequence_number = 0;
        message.length = 5;
        message.data[0] = ControlCode::TestConnection.as_u8();
        message.data[1..5].copy_from_slice(&encode_snr(23.5));

        let bytes = encode_frame(&message, 5);
        let parsed = decode_frame(&bytes, 16).unwrap();
        assert_eq!(parsed.message_type, MessageType::Control);
        assert_eq!(ControlCode::from_u8(parsed.data[0]), Some(ControlCode::TestConnection));
        assert!((decode_snr(&parsed.data[1..5]) - 23.5).abs() < 1e-6);
    }

    #[test]
    fn ack_range_round_trip() {
        let message = data_message(MessageType::AckRange, 0, &[4, 17]);
        let bytes = encode_frame(&message, 8);
        assert_eq!(bytes, vec![0x21, 8, 3, 0, 4, 17]);

        let parsed = decode_frame(&bytes, 8).unwrap();
        assert_eq!(parsed.data[0], 4);
        assert_eq!(parsed.data[1], 17);
    }

    #[test]
    fn junk_frames_are_rejected() {
        assert!(decode_frame(&[0xFF, 0, 0, 0], 16).is_err());
        assert!(decode_frame(&[0x10], 16).is_err());
    }

    #[test]
    fn wire_codes_match_the_frame_table() {
        assert_eq!(MessageType::DataLong.as_u8(), 0x10);
        assert_eq!(MessageType::DataShort.as_u8(), 0x11);
        assert_eq!(MessageType::AckControl.as_u8(), 0x20);
        assert_eq!(MessageType::AckRange.as_u8(), 0x21);
        assert_eq!(MessageType::AckMulti.as_u8(), 0x22);
        assert_eq!(MessageType::Control.as_u8(), 0x30);
        assert_eq!(ControlCode::StartConnection.as_u8(), 0x31);
        assert_eq!(ControlCode::RepeatLastAck.as_u8(), 0x3C);
    }
}
