//! Sans-IO pieces of the command transport.
//!
//! Nothing in this module touches a port. The block codec, the reply parsers
//! and the queues work on byte slices and owned values only, so they can be
//! tested and reused without a controller attached.
//!
//! # Architecture
//!
//! - [`protocol`]: framing of outgoing blocks and splitting of incoming lines
//! - [`reply`]: turning one reply line into [`ReplyEvent`]s per [`Dialect`]
//! - [`queue`]: priority queues, the sent-block history and resend recovery
//!
//! [`Device`](crate::Device) ties them to a [`Port`](crate::Port).
//!
//! # Example
//!
//! ```
//! use printlink::sansio::{format_block, parse_reply, Dialect, ReplyEvent, ValueKind};
//! use printlink::sansio::protocol::checksum;
//!
//! let block = format_block(Dialect::Fived, "G28", 3).unwrap();
//! let sum = checksum(b"N3 G28");
//! assert_eq!(block, format!("N3 G28*{}\n", sum).into_bytes());
//!
//! let events = parse_reply(Dialect::Fived, "ok T:201.3");
//! assert_eq!(
//!     events,
//!     vec![
//!         ReplyEvent::Ack,
//!         ReplyEvent::Value { kind: ValueKind::NozzleTemp, value: 201.3 },
//!     ]
//! );
//! ```

pub mod protocol;
pub mod queue;
pub mod reply;
pub mod types;

pub use self::protocol::{checksum, format_block};
pub use self::queue::{Block, Paused, Priority, Queues};
pub use self::reply::parse_reply;
pub use self::types::{Dialect, Direction, Event, ReplyEvent, ValueKind};
