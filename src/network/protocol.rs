//! Protocol Messages
//!
//! Wire format for relay traffic. Every datagram is one frame:
//! a type tag, the sender's user id and a byte or string payload.
//! Frames are bincode-encoded; JSON is available for debugging.
//!
//! In memory, messages are the closed [`RelayMessage`] enum with typed
//! payloads. [`Envelope`] pairs a message with the id of the user it is
//! about (the original sender, also when forwarded by the host).

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::lobby::user::{Emote, UserId, UserStatus};

// =============================================================================
// TYPE TAG
// =============================================================================

/// Message type tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MsgType {
    /// Client -> host, asks for approval.
    NewPlayer = 0,
    /// Host -> client, approval outcome.
    PlayerApprovalState = 1,
    /// Display name.
    PlayerName = 2,
    /// Emote.
    Emote = 3,
    /// User status.
    ReadyState = 4,
    /// Client -> host, about to leave.
    PlayerDisconnect = 5,
    /// Host -> clients.
    StartCountdown = 6,
    /// Host -> clients.
    CancelCountdown = 7,
    /// Host -> clients.
    ConfirmInGame = 8,
    /// Host -> clients.
    EndInGame = 9,
}

impl MsgType {
    /// Parse a tag byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(MsgType::NewPlayer),
            1 => Some(MsgType::PlayerApprovalState),
            2 => Some(MsgType::PlayerName),
            3 => Some(MsgType::Emote),
            4 => Some(MsgType::ReadyState),
            5 => Some(MsgType::PlayerDisconnect),
            6 => Some(MsgType::StartCountdown),
            7 => Some(MsgType::CancelCountdown),
            8 => Some(MsgType::ConfirmInGame),
            9 => Some(MsgType::EndInGame),
            _ => None,
        }
    }

    /// Types only the host may originate. Clients sending these are
    /// misbehaving.
    pub fn is_host_only(self) -> bool {
        matches!(
            self,
            MsgType::PlayerApprovalState
                | MsgType::StartCountdown
                | MsgType::CancelCountdown
                | MsgType::ConfirmInGame
                | MsgType::EndInGame
        )
    }
}

// =============================================================================
// APPROVAL
// =============================================================================

/// Outcome of the host's admission check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Approval {
    /// Admitted.
    Ok = 0,
    /// The round has already started.
    GameAlreadyStarted = 1,
    /// No room left.
    LobbyFull = 2,
    /// The lobby directory does not know this user.
    UnknownUser = 3,
}

impl Approval {
    /// Parse a wire byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Approval::Ok),
            1 => Some(Approval::GameAlreadyStarted),
            2 => Some(Approval::LobbyFull),
            3 => Some(Approval::UnknownUser),
            _ => None,
        }
    }

    /// Whether the connection is admitted.
    pub fn is_ok(self) -> bool {
        self == Approval::Ok
    }

    /// Text for a rejection popup.
    pub fn rejection_text(self) -> Option<&'static str> {
        match self {
            Approval::Ok => None,
            Approval::GameAlreadyStarted => Some("Rejected: Game has already started."),
            Approval::LobbyFull => Some("Rejected: Lobby is full."),
            Approval::UnknownUser => Some("Rejected: Not a member of this lobby."),
        }
    }
}

// =============================================================================
// MESSAGES
// =============================================================================

/// Relay message with typed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    /// Ask the host for approval.
    NewPlayer,
    /// Approval outcome.
    PlayerApprovalState(Approval),
    /// Display name.
    PlayerName(String),
    /// Emote.
    Emote(Emote),
    /// User status.
    ReadyState(UserStatus),
    /// Sender is leaving; host closes the link.
    PlayerDisconnect,
    /// Countdown started.
    StartCountdown,
    /// Countdown cancelled.
    CancelCountdown,
    /// Game started.
    ConfirmInGame,
    /// Game ended.
    EndInGame,
}

impl RelayMessage {
    /// Type tag for this message.
    pub fn msg_type(&self) -> MsgType {
        match self {
            RelayMessage::NewPlayer => MsgType::NewPlayer,
            RelayMessage::PlayerApprovalState(_) => MsgType::PlayerApprovalState,
            RelayMessage::PlayerName(_) => MsgType::PlayerName,
            RelayMessage::Emote(_) => MsgType::Emote,
            RelayMessage::ReadyState(_) => MsgType::ReadyState,
            RelayMessage::PlayerDisconnect => MsgType::PlayerDisconnect,
            RelayMessage::StartCountdown => MsgType::StartCountdown,
            RelayMessage::CancelCountdown => MsgType::CancelCountdown,
            RelayMessage::ConfirmInGame => MsgType::ConfirmInGame,
            RelayMessage::EndInGame => MsgType::EndInGame,
        }
    }
}

/// A message and the user it concerns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Original sender.
    pub sender: UserId,
    /// Message.
    pub message: RelayMessage,
}

impl Envelope {
    /// Pair a message with its sender.
    pub fn new(sender: UserId, message: RelayMessage) -> Self {
        Self { sender, message }
    }

    /// Type tag of the contained message.
    pub fn msg_type(&self) -> MsgType {
        self.message.msg_type()
    }
}

// =============================================================================
// WIRE FRAME
// =============================================================================

/// Untyped payload as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// No payload.
    None,
    /// Single byte.
    Byte(u8),
    /// UTF-8 string.
    Text(String),
}

/// On-the-wire frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// `MsgType` byte.
    pub msg_type: u8,
    /// Sender id.
    pub sender: String,
    /// Payload.
    pub payload: Payload,
}

/// Codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Binary (de)serialization failed.
    #[error("binary codec error: {0}")]
    Binary(#[from] bincode::Error),
    /// JSON (de)serialization failed.
    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),
    /// Unknown type tag.
    #[error("unknown message type {0}")]
    UnknownType(u8),
    /// Payload kind or value does not fit the type.
    #[error("invalid payload for {0:?}")]
    InvalidPayload(MsgType),
}

impl From<&Envelope> for Frame {
    fn from(env: &Envelope) -> Self {
        let payload = match &env.message {
            RelayMessage::NewPlayer | RelayMessage::PlayerDisconnect => Payload::None,
            RelayMessage::PlayerApprovalState(a) => Payload::Byte(*a as u8),
            RelayMessage::PlayerName(name) => Payload::Text(name.clone()),
            RelayMessage::Emote(e) => Payload::Byte(*e as u8),
            RelayMessage::ReadyState(s) => Payload::Byte(s.as_byte()),
            // Countdown payloads are unused.
            RelayMessage::StartCountdown
            | RelayMessage::CancelCountdown
            | RelayMessage::ConfirmInGame
            | RelayMessage::EndInGame => Payload::Byte(0),
        };
        Frame {
            msg_type: env.msg_type() as u8,
            sender: env.sender.as_str().to_string(),
            payload,
        }
    }
}

impl TryFrom<Frame> for Envelope {
    type Error = CodecError;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        let msg_type = MsgType::from_byte(frame.msg_type)
            .ok_or(CodecError::UnknownType(frame.msg_type))?;
        let bad = || CodecError::InvalidPayload(msg_type);

        let message = match (msg_type, frame.payload) {
            (MsgType::NewPlayer, _) => RelayMessage::NewPlayer,
            (MsgType::PlayerDisconnect, _) => RelayMessage::PlayerDisconnect,
            (MsgType::PlayerApprovalState, Payload::Byte(b)) => {
                RelayMessage::PlayerApprovalState(Approval::from_byte(b).ok_or_else(bad)?)
            }
            (MsgType::PlayerName, Payload::Text(name)) => RelayMessage::PlayerName(name),
            (MsgType::Emote, Payload::Byte(b)) => {
                RelayMessage::Emote(Emote::from_byte(b).ok_or_else(bad)?)
            }
            (MsgType::ReadyState, Payload::Byte(b)) => {
                RelayMessage::ReadyState(UserStatus::from_byte(b).ok_or_else(bad)?)
            }
            (MsgType::StartCountdown, _) => RelayMessage::StartCountdown,
            (MsgType::CancelCountdown, _) => RelayMessage::CancelCountdown,
            (MsgType::ConfirmInGame, _) => RelayMessage::ConfirmInGame,
            (MsgType::EndInGame, _) => RelayMessage::EndInGame,
            _ => return Err(bad()),
        };

        Ok(Envelope {
            sender: UserId::new(frame.sender),
            message,
        })
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl Envelope {
    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        Ok(bincode::serialize(&Frame::from(self))?)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        let frame: Frame = bincode::deserialize(data)?;
        Envelope::try_from(frame)
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(&Frame::from(self))?)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, CodecError> {
        let frame: Frame = serde_json::from_str(s)?;
        Envelope::try_from(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(message: RelayMessage) -> Envelope {
        Envelope::new(UserId::new("user-1"), message)
    }

    #[test]
    fn test_binary_roundtrip_name() {
        let msg = env(RelayMessage::PlayerName("Alice".into()));
        let bytes = msg.to_bytes().unwrap();
        let parsed = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_byte_payloads_use_wire_values() {
        let frame = Frame::from(&env(RelayMessage::ReadyState(UserStatus::Ready)));
        assert_eq!(frame.msg_type, 4);
        assert_eq!(frame.payload, Payload::Byte(4));

        let frame = Frame::from(&env(RelayMessage::PlayerApprovalState(Approval::GameAlreadyStarted)));
        assert_eq!(frame.msg_type, 1);
        assert_eq!(frame.payload, Payload::Byte(1));

        let frame = Frame::from(&env(RelayMessage::StartCountdown));
        assert_eq!(frame.payload, Payload::Byte(0));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let frame = Frame {
            msg_type: 42,
            sender: "x".into(),
            payload: Payload::None,
        };
        assert!(matches!(Envelope::try_from(frame), Err(CodecError::UnknownType(42))));
    }

    #[test]
    fn test_wrong_payload_kind_rejected() {
        let frame = Frame {
            msg_type: MsgType::PlayerName as u8,
            sender: "x".into(),
            payload: Payload::Byte(3),
        };
        assert!(matches!(
            Envelope::try_from(frame),
            Err(CodecError::InvalidPayload(MsgType::PlayerName))
        ));
    }

    #[test]
    fn test_invalid_status_byte_rejected() {
        let frame = Frame {
            msg_type: MsgType::ReadyState as u8,
            sender: "x".into(),
            payload: Payload::Byte(3),
        };
        assert!(Envelope::try_from(frame).is_err());
    }

    #[test]
    fn test_garbage_bytes_rejected() {
        assert!(Envelope::from_bytes(&[0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn test_json_form() {
        let msg = env(RelayMessage::Emote(Emote::Tongue));
        let json = msg.to_json().unwrap();
        assert!(json.contains("user-1"));
        assert_eq!(Envelope::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_host_only_types() {
        assert!(MsgType::StartCountdown.is_host_only());
        assert!(MsgType::PlayerApprovalState.is_host_only());
        assert!(!MsgType::ReadyState.is_host_only());
        assert!(!MsgType::NewPlayer.is_host_only());
    }

    #[test]
    fn test_rejection_text() {
        assert_eq!(Approval::Ok.rejection_text(), None);
        assert_eq!(
            Approval::GameAlreadyStarted.rejection_text(),
            Some("Rejected: Game has already started.")
        );
    }
}
