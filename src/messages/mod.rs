//! Decoded RTMP messages as the connection core sees them.
//!
//! The chunk-level byte codec lives outside this crate; what crosses the
//! boundary is a [`Packet`], a decoded message together with the header
//! fields the dispatcher and the per-stream bookkeeping care about.

mod shared_object;

pub use self::shared_object::{SharedObjectEvent, SharedObjectEventType, SharedObjectMessage};

use bytes::Bytes;
use rml_amf0::Amf0Value;

use crate::service::ServiceCall;

/// RTMP message data types, by wire type id.
#[derive(Eq, PartialEq, Debug, Copy, Clone)]
pub enum MessageType {
    SetChunkSize,
    Abort,
    BytesRead,
    Ping,
    ServerBandwidth,
    ClientBandwidth,
    AudioData,
    VideoData,
    FlexStreamSend,
    FlexSharedObject,
    FlexMessage,
    Notify,
    SharedObject,
    Invoke,
    Aggregate,
    Unknown(u8),
}

impl MessageType {
    pub fn type_id(&self) -> u8 {
        match *self {
            MessageType::SetChunkSize => 1,
            MessageType::Abort => 2,
            MessageType::BytesRead => 3,
            MessageType::Ping => 4,
            MessageType::ServerBandwidth => 5,
            MessageType::ClientBandwidth => 6,
            MessageType::AudioData => 8,
            MessageType::VideoData => 9,
            MessageType::FlexStreamSend => 15,
            MessageType::FlexSharedObject => 16,
            MessageType::FlexMessage => 17,
            MessageType::Notify => 18,
            MessageType::SharedObject => 19,
            MessageType::Invoke => 20,
            MessageType::Aggregate => 22,
            MessageType::Unknown(type_id) => type_id,
        }
    }

    pub fn from_type_id(type_id: u8) -> MessageType {
        match type_id {
            1 => MessageType::SetChunkSize,
            2 => MessageType::Abort,
            3 => MessageType::BytesRead,
            4 => MessageType::Ping,
            5 => MessageType::ServerBandwidth,
            6 => MessageType::ClientBandwidth,
            8 => MessageType::AudioData,
            9 => MessageType::VideoData,
            15 => MessageType::FlexStreamSend,
            16 => MessageType::FlexSharedObject,
            17 => MessageType::FlexMessage,
            18 => MessageType::Notify,
            19 => MessageType::SharedObject,
            20 => MessageType::Invoke,
            22 => MessageType::Aggregate,
            other => MessageType::Unknown(other),
        }
    }

    /// Control messages are handled on the transport thread instead of
    /// being queued on the worker pool.
    pub fn is_control(&self) -> bool {
        match *self {
            MessageType::Ping
            | MessageType::Abort
            | MessageType::BytesRead
            | MessageType::SetChunkSize
            | MessageType::ClientBandwidth
            | MessageType::ServerBandwidth => true,
            _ => false,
        }
    }
}

/// How the peer should enforce an advertised client bandwidth.
#[derive(Eq, PartialEq, Debug, Copy, Clone)]
pub enum BandwidthLimitType {
    Hard,
    Soft,
    Dynamic,
}

impl BandwidthLimitType {
    pub fn limit_id(&self) -> u8 {
        match *self {
            BandwidthLimitType::Hard => 0,
            BandwidthLimitType::Soft => 1,
            BandwidthLimitType::Dynamic => 2,
        }
    }
}

/// User-control event kinds carried inside a [`PingEvent`].
#[derive(Eq, PartialEq, Debug, Copy, Clone)]
pub enum PingEventType {
    StreamBegin,
    StreamPlayBufferClear,
    StreamDry,
    ClientBuffer,
    RecordedStream,
    PingClient,
    PongServer,
    BufferEmpty,
    BufferFull,
}

impl PingEventType {
    pub fn event_id(&self) -> u16 {
        match *self {
            PingEventType::StreamBegin => 0,
            PingEventType::StreamPlayBufferClear => 1,
            PingEventType::StreamDry => 2,
            PingEventType::ClientBuffer => 3,
            PingEventType::RecordedStream => 4,
            PingEventType::PingClient => 6,
            PingEventType::PongServer => 7,
            PingEventType::BufferEmpty => 31,
            PingEventType::BufferFull => 32,
        }
    }
}

/// A user-control ("ping") event.  For liveness probes `value2` carries
/// the low 32 bits of the sender's clock and is echoed back unchanged
/// by the peer.
#[derive(PartialEq, Debug, Clone)]
pub struct PingEvent {
    pub event_type: PingEventType,
    pub value2: u32,
    pub value3: Option<u32>,
    pub value4: Option<u32>,
}

impl PingEvent {
    pub fn ping_request(timestamp: u32) -> PingEvent {
        PingEvent {
            event_type: PingEventType::PingClient,
            value2: timestamp,
            value3: None,
            value4: None,
        }
    }

    pub fn pong_response(timestamp: u32) -> PingEvent {
        PingEvent {
            event_type: PingEventType::PongServer,
            value2: timestamp,
            value3: None,
            value4: None,
        }
    }
}

/// A single decoded RTMP message.
#[derive(PartialEq, Debug, Clone)]
pub enum RtmpMessage {
    Unknown { type_id: u8, data: Bytes },
    SetChunkSize { size: u32 },
    Abort { channel_id: u32 },
    BytesRead { sequence_number: u32 },
    Ping(PingEvent),
    ServerBandwidth { window_size: u32 },
    ClientBandwidth { window_size: u32, limit_type: BandwidthLimitType },
    AudioData { data: Bytes },
    VideoData { data: Bytes },
    FlexStreamSend { values: Vec<Amf0Value> },
    Notify { call: ServiceCall },
    Invoke { transaction_id: u32, call: ServiceCall },
    SharedObject(SharedObjectMessage),
    Aggregate { data: Bytes },
}

impl RtmpMessage {
    pub fn message_type(&self) -> MessageType {
        match *self {
            RtmpMessage::Unknown { type_id, .. } => MessageType::Unknown(type_id),
            RtmpMessage::SetChunkSize { .. } => MessageType::SetChunkSize,
            RtmpMessage::Abort { .. } => MessageType::Abort,
            RtmpMessage::BytesRead { .. } => MessageType::BytesRead,
            RtmpMessage::Ping(_) => MessageType::Ping,
            RtmpMessage::ServerBandwidth { .. } => MessageType::ServerBandwidth,
            RtmpMessage::ClientBandwidth { .. } => MessageType::ClientBandwidth,
            RtmpMessage::AudioData { .. } => MessageType::AudioData,
            RtmpMessage::VideoData { .. } => MessageType::VideoData,
            RtmpMessage::FlexStreamSend { .. } => MessageType::FlexStreamSend,
            RtmpMessage::Notify { .. } => MessageType::Notify,
            RtmpMessage::Invoke { .. } => MessageType::Invoke,
            RtmpMessage::SharedObject(ref message) => {
                if message.flex {
                    MessageType::FlexSharedObject
                } else {
                    MessageType::SharedObject
                }
            }
            RtmpMessage::Aggregate { .. } => MessageType::Aggregate,
        }
    }
}

/// The header fields of a decoded packet the connection needs: which
/// logical channel carried it, which NetStream it belongs to and its
/// RTMP timestamp.
#[derive(PartialEq, Debug, Clone)]
pub struct Header {
    pub channel_id: u32,
    pub stream_id: u32,
    pub timestamp: u32,
}

impl Header {
    pub fn new(channel_id: u32, stream_id: u32) -> Header {
        Header {
            channel_id,
            stream_id,
            timestamp: 0,
        }
    }
}

/// A decoded message with its header, as delivered by the transport or
/// produced for it.
#[derive(PartialEq, Debug, Clone)]
pub struct Packet {
    pub header: Header,
    pub message: RtmpMessage,
}

impl Packet {
    pub fn new(header: Header, message: RtmpMessage) -> Packet {
        Packet { header, message }
    }

    pub fn message_type(&self) -> MessageType {
        self.message.message_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_ids_round_trip() {
        let all = [
            MessageType::SetChunkSize,
            MessageType::Abort,
            MessageType::BytesRead,
            MessageType::Ping,
            MessageType::ServerBandwidth,
            MessageType::ClientBandwidth,
            MessageType::AudioData,
            MessageType::VideoData,
            MessageType::FlexStreamSend,
            MessageType::FlexSharedObject,
            MessageType::FlexMessage,
            MessageType::Notify,
            MessageType::SharedObject,
            MessageType::Invoke,
            MessageType::Aggregate,
        ];

        for message_type in &all {
            assert_eq!(
                MessageType::from_type_id(message_type.type_id()),
                *message_type,
                "type id {} did not round trip",
                message_type.type_id()
            );
        }

        assert_eq!(MessageType::from_type_id(99), MessageType::Unknown(99));
    }

    #[test]
    fn control_types_are_exactly_the_fast_path_set() {
        assert!(MessageType::Ping.is_control());
        assert!(MessageType::Abort.is_control());
        assert!(MessageType::BytesRead.is_control());
        assert!(MessageType::SetChunkSize.is_control());
        assert!(MessageType::ClientBandwidth.is_control());
        assert!(MessageType::ServerBandwidth.is_control());

        assert!(!MessageType::AudioData.is_control());
        assert!(!MessageType::VideoData.is_control());
        assert!(!MessageType::Invoke.is_control());
        assert!(!MessageType::Notify.is_control());
        assert!(!MessageType::SharedObject.is_control());
        assert!(!MessageType::Aggregate.is_control());
    }

    #[test]
    fn shared_object_message_type_depends_on_flex_flag() {
        let classic = RtmpMessage::SharedObject(SharedObjectMessage::new("scoreboard", 1, false));
        let flex = RtmpMessage::SharedObject(SharedObjectMessage::new_flex("scoreboard", 1, false));

        assert_eq!(classic.message_type(), MessageType::SharedObject);
        assert_eq!(flex.message_type(), MessageType::FlexSharedObject);
    }
}
