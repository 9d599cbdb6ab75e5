// ABOUTME: Re-exports generated protobuf types for both streaming wires.
// ABOUTME: The envelope wire is the crate root; the framed wire carries bare DataMessage frames.

#![allow(clippy::derive_partial_eq_without_eq)]

/// Envelope wire: `StreamMessage` carrying data or acks in both directions.
pub mod envelope {
    include!(concat!(env!("OUT_DIR"), "/envelope/streaming.rs"));
}

/// Framed wire: bare `DataMessage` frames with a string payload and no acks.
pub mod framed {
    include!(concat!(env!("OUT_DIR"), "/framed/streaming.rs"));
}

// Re-export the envelope types at crate root for convenience
pub use envelope::*;

// Re-export client types under a client module
pub mod client {
    pub use super::envelope::streaming_service_client::StreamingServiceClient;
    pub use super::framed::streaming_service_client::StreamingServiceClient as FramedStreamingServiceClient;
}

pub use client::{FramedStreamingServiceClient, StreamingServiceClient};

impl StreamMessage {
    /// Wrap a data message in an envelope.
    pub fn data(msg: DataMessage) -> Self {
        Self {
            message_type: Some(stream_message::MessageType::Data(msg)),
        }
    }

    /// Wrap an ack in an envelope.
    pub fn ack(msg: AckMessage) -> Self {
        Self {
            message_type: Some(stream_message::MessageType::Ack(msg)),
        }
    }

    pub fn as_data(&self) -> Option<&DataMessage> {
        match &self.message_type {
            Some(stream_message::MessageType::Data(d)) => Some(d),
            _ => None,
        }
    }

    pub fn as_ack(&self) -> Option<&AckMessage> {
        match &self.message_type {
            Some(stream_message::MessageType::Ack(a)) => Some(a),
            _ => None,
        }
    }
}

/// A framed peer never asks for acks.
impl From<framed::DataMessage> for DataMessage {
    fn from(msg: framed::DataMessage) -> Self {
        Self {
            id: msg.id,
            timestamp: msg.timestamp,
            payload: msg.payload.into_bytes(),
            needs_ack: false,
        }
    }
}

impl From<&DataMessage> for framed::DataMessage {
    fn from(msg: &DataMessage) -> Self {
        Self {
            id: msg.id,
            timestamp: msg.timestamp,
            payload: String::from_utf8_lossy(&msg.payload).into_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_envelope_accessors() {
        let data = StreamMessage::data(DataMessage {
            id: 7,
            timestamp: 1,
            payload: b"Message 7".to_vec(),
            needs_ack: true,
        });
        assert_eq!(data.as_data().map(|d| d.id), Some(7));
        assert!(data.as_ack().is_none());

        let ack = StreamMessage::ack(AckMessage {
            ack_id: 7,
            timestamp: 2,
        });
        assert_eq!(ack.as_ack().map(|a| a.ack_id), Some(7));
        assert!(ack.as_data().is_none());

        assert!(StreamMessage::default().as_data().is_none());
    }

    #[test]
    fn test_envelope_data_decodes_string_payload() {
        // `string payload = 3` and `bytes payload = 3` share a wire type.
        let bytes = framed::DataMessage {
            id: 3,
            timestamp: 9,
            payload: "Message 3".to_string(),
        }
        .encode_to_vec();

        let decoded = DataMessage::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded.id, 3);
        assert_eq!(decoded.payload, b"Message 3");
        assert!(!decoded.needs_ack);
    }

    #[test]
    fn test_framed_frame_is_not_an_envelope() {
        // Field 1 is a varint id on the framed wire but a submessage in the envelope.
        let frame = framed::DataMessage {
            id: 1,
            timestamp: 1_700_000_000,
            payload: "Message 1".to_string(),
        }
        .encode_to_vec();

        assert!(StreamMessage::decode(frame.as_slice()).is_err());
        let decoded = framed::DataMessage::decode(frame.as_slice()).unwrap();
        assert_eq!(decoded.payload, "Message 1");
    }

    #[test]
    fn test_framed_conversions() {
        let frame = framed::DataMessage {
            id: 4,
            timestamp: 5,
            payload: "Message 4".to_string(),
        };

        let data = DataMessage::from(frame.clone());
        assert_eq!(data.id, 4);
        assert_eq!(data.timestamp, 5);
        assert_eq!(data.payload, b"Message 4");
        assert!(!data.needs_ack);

        assert_eq!(framed::DataMessage::from(&data), frame);
    }
}
