use crate::proto::{ContentStructure, DataMessageStructure, SentStructure, SyncMessageStructure};
use crate::{AttachmentPointer, Error};
use prost::Message;

/// Flag bit asking the recipient to drop every session with the sender.
pub const END_SESSION_FLAG: u32 = 1;

/// A user-visible message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DataMessage {
    /// Milliseconds since the epoch; doubles as the message id.
    pub timestamp: u64,
    pub body: Option<String>,
    pub attachments: Vec<AttachmentPointer>,
    pub end_session: bool,
}

impl DataMessage {
    pub fn new(timestamp: u64, body: impl Into<String>) -> Self {
        Self {
            timestamp,
            body: Some(body.into()),
            ..Self::default()
        }
    }

    /// A message that terminates every session with the recipient once sent.
    pub fn end_session(timestamp: u64) -> Self {
        Self {
            timestamp,
            end_session: true,
            ..Self::default()
        }
    }

    pub fn with_attachment(mut self, attachment: AttachmentPointer) -> Self {
        self.attachments.push(attachment);
        self
    }

    fn to_proto(&self) -> DataMessageStructure {
        DataMessageStructure {
            body: self.body.clone(),
            attachments: self
                .attachments
                .iter()
                .map(AttachmentPointer::to_proto)
                .collect(),
            flags: self.end_session.then_some(END_SESSION_FLAG),
            timestamp: Some(self.timestamp),
        }
    }

    fn from_proto(proto: DataMessageStructure) -> Self {
        Self {
            timestamp: proto.timestamp.unwrap_or_default(),
            body: proto.body,
            attachments: proto
                .attachments
                .into_iter()
                .map(AttachmentPointer::from_proto)
                .collect(),
            end_session: proto.flags.unwrap_or_default() & END_SESSION_FLAG != 0,
        }
    }
}

/// What one of our own devices sent, mirrored to our other devices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentTranscript {
    /// `None` for a group send.
    pub destination: Option<String>,
    pub timestamp: u64,
    pub message: DataMessage,
}

/// The decrypted payload of an envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Content {
    Data(DataMessage),
    Sync(SentTranscript),
}

impl Content {
    pub fn serialize(&self) -> Vec<u8> {
        let proto = match self {
            Content::Data(message) => ContentStructure {
                data_message: Some(message.to_proto()),
                sync_message: None,
            },
            Content::Sync(transcript) => ContentStructure {
                data_message: None,
                sync_message: Some(SyncMessageStructure {
                    sent: Some(SentStructure {
                        destination: transcript.destination.clone(),
                        timestamp: Some(transcript.timestamp),
                        message: Some(transcript.message.to_proto()),
                    }),
                }),
            },
        };
        proto.encode_to_vec()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let proto = ContentStructure::decode(bytes)
            .map_err(|err| Error::InvalidMessage(err.to_string()))?;

        if let Some(message) = proto.data_message {
            return Ok(Content::Data(DataMessage::from_proto(message)));
        }

        let sent = proto
            .sync_message
            .and_then(|sync| sync.sent)
            .ok_or_else(|| Error::InvalidMessage("Empty content".to_string()))?;

        Ok(Content::Sync(SentTranscript {
            destination: sent.destination,
            timestamp: sent.timestamp.unwrap_or_default(),
            message: sent
                .message
                .map(DataMessage::from_proto)
                .unwrap_or_default(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_message_content() {
        let attachment = AttachmentPointer {
            id: 42,
            content_type: "image/png".to_string(),
            key: vec![7u8; 64],
            size: Some(1024),
            relay: None,
        };
        let content = Content::Data(DataMessage::new(1000, "hi").with_attachment(attachment));

        let restored = Content::deserialize(&content.serialize()).unwrap();
        assert_eq!(restored, content);
    }

    #[test]
    fn test_end_session_flag() {
        let content = Content::Data(DataMessage::end_session(5));
        let Content::Data(restored) = Content::deserialize(&content.serialize()).unwrap() else {
            panic!("expected a data message");
        };
        assert!(restored.end_session);
        assert_eq!(restored.body, None);
    }

    #[test]
    fn test_sync_transcript() {
        let content = Content::Sync(SentTranscript {
            destination: Some("+14155550102".to_string()),
            timestamp: 77,
            message: DataMessage::new(77, "copied"),
        });
        assert_eq!(Content::deserialize(&content.serialize()).unwrap(), content);
    }

    #[test]
    fn test_empty_content_is_rejected() {
        let empty = ContentStructure::default().encode_to_vec();
        assert!(matches!(
            Content::deserialize(&empty),
            Err(Error::InvalidMessage(_))
        ));
    }
}
