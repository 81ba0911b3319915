use std::io;

/// Problems reported to the owner through [`Event::Error`](crate::Event::Error).
///
/// None of these stop the engine; they describe a reply or block the engine
/// had to give up on.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ErrorKind {
    BlockTooLarge,
    UnknownReply,
    UncachedResend,
    HardwareFault,
    UnsentResend,
    MalformedResendRequest,
}

impl ::std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        match self {
            ErrorKind::BlockTooLarge => write!(f, "block does not fit the send buffer"),
            ErrorKind::UnknownReply => write!(f, "unknown reply from controller"),
            ErrorKind::UncachedResend => write!(f, "resend requested for a line no longer cached"),
            ErrorKind::HardwareFault => write!(f, "controller reported a hardware fault"),
            ErrorKind::UnsentResend => write!(f, "resend requested for a line never sent"),
            ErrorKind::MalformedResendRequest => write!(f, "malformed resend request"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("block of {size} bytes exceeds the {limit} byte limit")]
    BlockTooLarge { size: usize, limit: usize },
    #[error("unsupported protocol dialect '{0}'")]
    UnsupportedProtocol(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("device is not connected")]
    NotConnected,
    #[error("write to device failed: {0}")]
    WriteFailed(#[source] io::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// The reported kind matching this error, if it has one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::BlockTooLarge { .. } => Some(ErrorKind::BlockTooLarge),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
