//! Core types shared by the codec, the reply parsers and the engine.

use crate::error::{Error, ErrorKind};
use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Wire framing variant spoken by the controller firmware.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Dialect {
    /// Plain G-code, one `ok` per block, no line numbers.
    Simple,
    /// Line numbers and checksums, `rs`/`resend` recovery.
    #[default]
    Fived,
    /// Fived framing with `Resend:` and `T:` style replies.
    Tonokip,
}

impl Dialect {
    /// Whether blocks carry `N<line>` numbers and a checksum.
    pub fn is_numbered(self) -> bool {
        !matches!(self, Dialect::Simple)
    }
}

impl FromStr for Dialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simple" => Ok(Dialect::Simple),
            "fived" | "5d" => Ok(Dialect::Fived),
            "tonokip" => Ok(Dialect::Tonokip),
            _ => Err(Error::UnsupportedProtocol(s.into())),
        }
    }
}

impl TryFrom<String> for Dialect {
    type Error = Error;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

impl From<Dialect> for String {
    fn from(dialect: Dialect) -> String {
        dialect.to_string()
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Dialect::Simple => f.write_str("simple"),
            Dialect::Fived => f.write_str("fived"),
            Dialect::Tonokip => f.write_str("tonokip"),
        }
    }
}

/// What a sampled value in a reply measures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    NozzleTemp,
    BedTemp,
    XPos,
    YPos,
    ZPos,
    EPos,
}

/// Semantic content of one received reply line.
#[derive(Clone, Debug, PartialEq)]
pub enum ReplyEvent {
    /// The controller accepted a block.
    Ack,
    /// A value reported alongside an acknowledgement.
    Value { kind: ValueKind, value: f32 },
    /// The controller wants everything from `line` onwards again.
    Resend { line: u64 },
    /// The controller booted, its line numbering starts over.
    Restart,
    /// The reply could not be used; `kind` says why.
    Error { kind: ErrorKind },
}

/// Direction of raw traffic surfaced through [`Event::Traffic`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Send,
    Recv,
}

/// Notifications from the engine to its owner.
///
/// Events are queued while an entry point runs and drained with
/// [`Device::poll_event`](crate::Device::poll_event) afterwards, so handling
/// one never re-enters the engine mid-update.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// An `ok` was received.
    Ack,
    /// A sampled value was reported by the controller.
    Value { kind: ValueKind, value: f32 },
    /// The engine has room for more commands.
    MoreNeeded,
    /// Start (`true`) or stop (`false`) polling the port for writability.
    WantWritable(bool),
    /// A non-fatal problem, with the offending reply text where there is one.
    Error { kind: ErrorKind, reply: String },
    /// Raw bytes sent or received, when traffic logging is enabled.
    Traffic { direction: Direction, data: Vec<u8> },
}
