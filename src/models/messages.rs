use crate::models::CollabError;
use crate::websocket::codec::{Decoder, Encoder};

pub const MSG_SYNC: u64 = 0;
pub const MSG_AWARENESS: u64 = 1;
pub const MSG_QUERY_AWARENESS: u64 = 3;

pub const SYNC_STEP1: u64 = 0;
pub const SYNC_STEP2: u64 = 1;
pub const SYNC_UPDATE: u64 = 2;

/// Payload of a `MSG_SYNC` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
    /// The sender's state vector; the receiver answers with what the sender is missing.
    Step1(Vec<u8>),
    /// The answer to a `Step1`.
    Step2(Vec<u8>),
    /// An incremental document update.
    Update(Vec<u8>),
}

/// A single binary frame exchanged on a collaboration connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollabMessage {
    Sync(SyncMessage),
    Awareness(Vec<u8>),
    QueryAwareness,
}

impl CollabMessage {
    pub fn decode(frame: &[u8]) -> Result<Self, CollabError> {
        let mut dec = Decoder::new(frame);
        let tag = dec.read_var_uint()?;
        match tag {
            MSG_SYNC => {
                let sync_tag = dec.read_var_uint()?;
                let payload = dec.read_var_buf()?.to_vec();
                match sync_tag {
                    SYNC_STEP1 => Ok(CollabMessage::Sync(SyncMessage::Step1(payload))),
                    SYNC_STEP2 => Ok(CollabMessage::Sync(SyncMessage::Step2(payload))),
                    SYNC_UPDATE => Ok(CollabMessage::Sync(SyncMessage::Update(payload))),
                    other => Err(CollabError::Protocol(format!("unknown sync message type {}", other))),
                }
            }
            MSG_AWARENESS => Ok(CollabMessage::Awareness(dec.read_var_buf()?.to_vec())),
            MSG_QUERY_AWARENESS => Ok(CollabMessage::QueryAwareness),
            other => Err(CollabError::Protocol(format!("unknown message type {}", other))),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        match self {
            CollabMessage::Sync(sync) => {
                enc.write_var_uint(MSG_SYNC);
                let (tag, payload) = match sync {
                    SyncMessage::Step1(sv) => (SYNC_STEP1, sv),
                    SyncMessage::Step2(update) => (SYNC_STEP2, update),
                    SyncMessage::Update(update) => (SYNC_UPDATE, update),
                };
                enc.write_var_uint(tag);
                enc.write_var_buf(payload);
            }
            CollabMessage::Awareness(update) => {
                enc.write_var_uint(MSG_AWARENESS);
                enc.write_var_buf(update);
            }
            CollabMessage::QueryAwareness => {
                enc.write_var_uint(MSG_QUERY_AWARENESS);
            }
        }
        enc.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_hand_built_sync_step1() {
        // tag 0 (sync), sub-tag 0 (step1), 3 byte state vector
        let frame = [0x00, 0x00, 0x03, 0x0a, 0x0b, 0x0c];
        let msg = CollabMessage::decode(&frame).unwrap();
        assert_eq!(msg, CollabMessage::Sync(SyncMessage::Step1(vec![0x0a, 0x0b, 0x0c])));
    }

    #[test]
    fn update_frame_layout() {
        let frame = CollabMessage::Sync(SyncMessage::Update(vec![1, 2])).encode();
        assert_eq!(frame, vec![0x00, 0x02, 0x02, 1, 2]);
    }

    #[test]
    fn awareness_frame_starts_with_tag_one() {
        let frame = CollabMessage::Awareness(vec![9]).encode();
        assert_eq!(frame, vec![0x01, 0x01, 9]);
        assert_eq!(CollabMessage::decode(&frame).unwrap(), CollabMessage::Awareness(vec![9]));
    }

    #[test]
    fn unknown_tags_are_protocol_errors() {
        assert!(matches!(CollabMessage::decode(&[0x07]), Err(CollabError::Protocol(_))));
        assert!(matches!(CollabMessage::decode(&[0x00, 0x05, 0x00]), Err(CollabError::Protocol(_))));
        assert!(matches!(CollabMessage::decode(&[]), Err(CollabError::Protocol(_))));
    }
}
