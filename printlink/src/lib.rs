//! Reliable G-code transport to 3D-printer controllers.
//!
//! A [`Device`] sits between a host application and the serial link of one
//! controller. Commands are queued by [`Priority`], framed for the
//! controller's [`Dialect`] and paced by its acknowledgements. Sent blocks
//! are cached so a resend request can be answered, and a controller restart
//! resets line numbering on both ends.
//!
//! The engine never blocks (apart from [`Device::flush`]) and never calls
//! back into the owner. The owner drives it from its event loop:
//!
//! ```no_run
//! use printlink::{Config, Device, Event, Priority};
//! use std::os::unix::net::UnixStream;
//!
//! # fn main() -> printlink::Result<()> {
//! let stream = UnixStream::connect("/run/printer.sock")?;
//! stream.set_nonblocking(true)?;
//!
//! let mut device = Device::new(Config::default())?;
//! device.attach(stream);
//!
//! loop {
//!     // Poll the socket; readable and writable are the poll results.
//!     # let (readable, writable) = (true, device.wants_writable());
//!     if readable {
//!         device.on_readable()?;
//!     }
//!     if writable {
//!         device.on_writable()?;
//!     }
//!     while let Some(event) = device.poll_event() {
//!         match event {
//!             Event::MoreNeeded => device.enqueue(Priority::Normal, "M105"),
//!             Event::Error { kind, reply } => eprintln!("{}: {}", kind, reply),
//!             _ => {}
//!         }
//!     }
//! }
//! # }
//! ```

mod config;
mod device;
mod error;
mod port;
pub mod sansio;


pub use crate::config::Config;
pub use crate::device::{Device, SendState, LINE_RESET_COMMAND};
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::port::Port;
pub use crate::sansio::{Dialect, Direction, Event, Paused, Priority, ValueKind};
