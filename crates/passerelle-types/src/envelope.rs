//! Raw remote-network frames as delivered by the transport, after the
//! cryptographic envelope has been removed.
//!
//! The frame is a closed set of variants so the router can classify with
//! one exhaustive match instead of open-ended type inspection.

use serde::{Deserialize, Serialize};

use crate::group::GroupDelta;
use crate::ids::{ChatId, GroupId, UserId};

/// All decrypted frames received from the remote network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RemoteFrame {
    /// A content envelope: new message, reaction, deletion, or a pure
    /// group-metadata change.  Which one is decided by classification
    /// precedence, not by the transport.
    Content(ContentEnvelope),

    /// An edit of a previously sent message.
    Edit(EditEnvelope),

    /// A typing indicator.
    Typing(TypingEnvelope),

    /// A read or delivery receipt.
    Receipt(ReceiptEnvelope),

    /// An account-level sync message from another device of the local
    /// account.
    Sync(SyncEnvelope),
}

/// The main content envelope.  At most one of the marker fields is
/// normally present, but remote clients are not obligated to be tidy;
/// classification precedence resolves ambiguous combinations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentEnvelope {
    pub sender: Option<UserId>,
    /// Author-origin send timestamp in milliseconds.  Together with the
    /// sender this derives the message identifier.
    pub timestamp_ms: u64,
    pub chat: Option<ChatId>,

    /// Explicit deletion marker.  Highest classification precedence.
    pub deletion: Option<TargetRef>,
    /// Reaction marker; `remove` distinguishes add from remove.
    pub reaction: Option<ReactionMarker>,

    pub body: Option<String>,
    pub attachments: Vec<AttachmentRef>,
    pub embed: Option<EmbeddedPayload>,

    /// Embedded group context: which group this content belongs to, at
    /// which revision, optionally carrying the change itself.
    pub group_context: Option<GroupContext>,

    /// "Required feature version" escalation.  Counts as message content.
    pub required_version: Option<u32>,

    /// Set when this envelope only updates the disappearing-message
    /// timer.  Counts as message content.
    pub expiration_timer_update: bool,
    /// Disappearing-message timer in seconds, when present.
    pub expiration_timer: Option<u32>,
}

/// Reference to a previously sent message, by the pair that derives its
/// identifier.  `author` falls back to the envelope sender when absent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetRef {
    pub author: Option<UserId>,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionMarker {
    pub emoji: String,
    pub remove: bool,
    pub target: TargetRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub id: String,
    pub content_type: Option<String>,
    pub file_name: Option<String>,
    pub size: Option<u64>,
}

/// Structured non-text payloads embedded in a content envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EmbeddedPayload {
    Contact { name: String, number: Option<String> },
    Poll { question: String, options: Vec<String> },
    Payment { note: Option<String> },
}

/// Group context attached to a content envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupContext {
    pub group_id: GroupId,
    /// The group revision this envelope was composed against.
    pub revision: u32,
    /// The change itself, when this envelope carries one.
    pub change: Option<GroupDelta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditEnvelope {
    pub sender: UserId,
    pub timestamp_ms: u64,
    pub chat: ChatId,
    /// The original message being edited.
    pub target: TargetRef,
    /// Replacement content.
    pub content: Box<ContentEnvelope>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TypingAction {
    Started,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingEnvelope {
    pub sender: UserId,
    pub timestamp_ms: u64,
    pub chat: ChatId,
    pub action: TypingAction,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReceiptKind {
    Read,
    Delivery,
}

/// A receipt referencing one or more prior messages by origin timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptEnvelope {
    pub sender: UserId,
    pub timestamp_ms: u64,
    pub kind: ReceiptKind,
    /// Author of the referenced messages; the local account when absent.
    pub target_author: Option<UserId>,
    pub target_timestamps: Vec<u64>,
}

/// Account-level sync messages from the local account's other devices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEnvelope {
    pub timestamp_ms: u64,
    pub payload: SyncPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncPayload {
    /// The contact list was pushed; the receiver should refresh ghosts.
    Contacts { count: u32 },
    /// Another device asks for a chat to be re-synchronized wholesale.
    ChatResync { chat: ChatId },
    /// Another device deleted a chat.
    ChatDelete { chat: ChatId },
    /// Another device marked a chat read up to a timestamp.
    ReadMark { chat: ChatId, up_to_ms: u64 },
}

impl RemoteFrame {
    /// Serialize to binary (bincode).
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn frame_round_trip() {
        let frame = RemoteFrame::Content(ContentEnvelope {
            sender: Some(UserId(Uuid::from_u128(1))),
            timestamp_ms: 1_700_000_000_000,
            chat: Some(ChatId::Group(GroupId("g".into()))),
            body: Some("bonjour".into()),
            ..Default::default()
        });

        let bytes = frame.to_bytes().unwrap();
        let restored = RemoteFrame::from_bytes(&bytes).unwrap();

        if let (RemoteFrame::Content(orig), RemoteFrame::Content(rest)) = (&frame, &restored) {
            assert_eq!(orig.sender, rest.sender);
            assert_eq!(orig.timestamp_ms, rest.timestamp_ms);
            assert_eq!(orig.body, rest.body);
        } else {
            panic!("Frame variant mismatch");
        }
    }
}
