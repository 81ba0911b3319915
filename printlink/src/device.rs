//! The transport engine for one controller connection.
//!
//! A [`Device`] owns the command queues, the line counter and the buffers of
//! one connection. It does no waiting of its own: the embedding event loop
//! calls [`Device::on_readable`] and [`Device::on_writable`] when the port is
//! ready, and drains [`Device::poll_event`] afterwards.
//!
//! # Example
//!
//! ```no_run
//! use printlink::{Config, Device, Dialect, Event, Priority};
//!
//! # fn main() -> printlink::Result<()> {
//! let port = std::fs::OpenOptions::new()
//!     .read(true)
//!     .write(true)
//!     .open("/dev/ttyACM0")?;
//!
//! let mut device = Device::new(Config::new(Dialect::Fived, 4))?;
//! device.attach(port);
//! device.enqueue(Priority::Normal, "G28 ; home all axes");
//!
//! // In the event loop:
//! device.on_writable()?;
//! device.on_readable()?;
//! while let Some(event) = device.poll_event() {
//!     match event {
//!         Event::Value { kind, value } => println!("{:?} = {}", kind, value),
//!         Event::Error { kind, reply } => eprintln!("{}: {}", kind, reply),
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use crate::config::Config;
use crate::error::{Error, ErrorKind, Result};
use crate::port::Port;
use crate::sansio::protocol::{first_invalid_byte, format_block, split_line, SEND_BUFFER_SIZE};
use crate::sansio::queue::{Block, Paused, Priority, Queues};
use crate::sansio::reply::parse_reply;
use crate::sansio::types::{Dialect, Direction, Event, ReplyEvent};
use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read, Write};
use tracing::{debug, trace, warn};

/// Command telling the controller to restart its line numbering.
pub const LINE_RESET_COMMAND: &str = "M110";

/// Whether a block is partially written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendState {
    Idle,
    SendingBlock,
}

/// The block currently in the send buffer.
#[derive(Debug)]
struct InFlight {
    priority: Priority,
    block: Block,
    /// Line number it was formatted with.
    line: u64,
    /// Line numbering was reset while it was being written.
    stale: bool,
}

pub struct Device {
    config: Config,
    port: Option<Box<dyn Port>>,
    queues: Queues,
    paused: Paused,
    /// Line number the next unnumbered block gets.
    lineno: u64,
    /// Blocks we may still send without waiting for an ack.
    init_send_count: usize,
    /// An ack or resend arrived since the last block was formatted.
    send_next: bool,
    recv_buf: Vec<u8>,
    recv_fill: usize,
    send_buf: Vec<u8>,
    bytes_sent: usize,
    in_flight: Option<InFlight>,
    wants_writable: bool,
    events: VecDeque<Event>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Device")
            .field("config", &self.config)
            .field("connected", &self.port.is_some())
            .field("queues", &self.queues)
            .field("paused", &self.paused)
            .field("lineno", &self.lineno)
            .field("init_send_count", &self.init_send_count)
            .field("send_next", &self.send_next)
            .field("recv_fill", &self.recv_fill)
            .field("in_flight", &self.in_flight)
            .field("bytes_sent", &self.bytes_sent)
            .finish()
    }
}

impl Device {
    /// Create an unconnected engine.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        debug!(
            dialect = %config.dialect,
            pipeline_depth = config.pipeline_depth,
            history_capacity = config.history_capacity(),
            "creating device"
        );
        Ok(Device {
            queues: Queues::new(config.history_capacity()),
            paused: Paused::empty(),
            lineno: 0,
            init_send_count: config.pipeline_depth,
            send_next: false,
            recv_buf: vec![0; config.recv_buffer_size],
            recv_fill: 0,
            send_buf: Vec::with_capacity(SEND_BUFFER_SIZE),
            bytes_sent: 0,
            in_flight: None,
            wants_writable: false,
            events: VecDeque::new(),
            port: None,
            config,
        })
    }

    /// Start talking through `port`. Any previous port is dropped.
    pub fn attach<P: Port + 'static>(&mut self, port: P) {
        self.port = Some(Box::new(port));
        if self.has_pending_bytes() {
            self.want_writable(true);
        }
    }

    /// Stop talking through the current port and hand it back.
    ///
    /// Queues are left alone, so a reconnect can carry on.
    pub fn detach(&mut self) -> Option<Box<dyn Port>> {
        self.want_writable(false);
        self.port.take()
    }

    /// Detach the port and [`reset`](Self::reset) the engine.
    pub fn close(&mut self) -> Option<Box<dyn Port>> {
        let port = self.detach();
        self.reset();
        port
    }

    /// Whether a port is attached.
    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    /// The configuration the engine was created with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The framing spoken to the controller.
    pub fn dialect(&self) -> Dialect {
        self.config.dialect
    }

    /// Queue `text` for transmission.
    ///
    /// A `;` comment and trailing whitespace are removed first; nothing is
    /// queued if that leaves an empty command.
    pub fn enqueue(&mut self, priority: Priority, text: &str) {
        self.enqueue_internal(priority, text, None);
    }

    fn enqueue_internal(&mut self, priority: Priority, text: &str, line: Option<u64>) {
        if self.queues.enqueue(priority, text, line) {
            debug!(
                ?priority,
                text = text.lines().next().unwrap_or_default(),
                buffered = self.queues.buffered_lines(),
                "enqueue"
            );
            self.want_writable(true);
        }
    }

    /// Next event for the owner, if any.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Read once from the port and handle every complete reply.
    pub fn on_readable(&mut self) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        if self.recv_fill >= self.recv_buf.len() {
            let size = self.recv_buf.len() * 2;
            self.recv_buf.resize(size, 0);
        }

        let n = loop {
            match port.read(&mut self.recv_buf[self.recv_fill..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        };

        self.accept(n);
        Ok(())
    }

    /// Feed bytes that were read from the controller by the caller.
    pub fn handle_input(&mut self, data: &[u8]) {
        let needed = self.recv_fill + data.len();
        if needed > self.recv_buf.len() {
            let mut size = self.recv_buf.len();
            while size < needed {
                size *= 2;
            }
            self.recv_buf.resize(size, 0);
        }
        self.recv_buf[self.recv_fill..needed].copy_from_slice(data);
        self.accept(data.len());
    }

    /// Take `n` freshly received bytes at the fill cursor into account.
    fn accept(&mut self, n: usize) {
        let start = self.recv_fill;
        let mut end = start + n;

        if let Some(bad) = first_invalid_byte(&self.recv_buf[start..end]) {
            warn!(
                offset = start + bad,
                byte = self.recv_buf[start + bad],
                received = %String::from_utf8_lossy(&self.recv_buf[..start + bad]),
                "invalid byte in receive buffer, truncating"
            );
            end = start + bad;
        }
        self.recv_fill = end;

        if self.recv_fill >= 2 && self.recv_buf[0] == 0x01 {
            warn!(
                first = self.recv_buf[0],
                second = self.recv_buf[1],
                "dropping leading control characters"
            );
            self.recv_buf.copy_within(2..self.recv_fill, 0);
            self.recv_fill -= 2;
        }

        while let Some(span) = split_line(&self.recv_buf[..self.recv_fill]) {
            let reply = String::from_utf8_lossy(&self.recv_buf[..span.reply]).into_owned();
            if self.config.log_traffic {
                self.events.push_back(Event::Traffic {
                    direction: Direction::Recv,
                    data: self.recv_buf[..span.consumed].to_vec(),
                });
            }
            self.recv_buf.copy_within(span.consumed..self.recv_fill, 0);
            self.recv_fill -= span.consumed;

            // An empty reply is the LF of a CRLF split across reads.
            if !reply.is_empty() {
                self.handle_reply(&reply);
            }
        }
    }

    fn handle_reply(&mut self, reply: &str) {
        trace!(reply, "received");
        for event in parse_reply(self.config.dialect, reply) {
            match event {
                ReplyEvent::Ack => {
                    self.events.push_back(Event::Ack);
                    self.handle_ok();
                }
                ReplyEvent::Value { kind, value } => {
                    self.events.push_back(Event::Value { kind, value });
                }
                ReplyEvent::Resend { line } => self.handle_resend(line, reply),
                ReplyEvent::Restart => self.handle_restart(),
                ReplyEvent::Error { kind } => self.emit_error(kind, reply),
            }
        }
    }

    fn handle_ok(&mut self) {
        let buffered = self.queues.buffered_lines();

        self.init_send_count = self.init_send_count.saturating_sub(1);
        self.send_next = true;

        if buffered < self.config.pipeline_depth {
            debug!(buffered, depth = self.config.pipeline_depth, "request more");
            self.events.push_back(Event::MoreNeeded);
        }
        self.want_writable(true);
    }

    fn handle_resend(&mut self, target: u64, reply: &str) {
        if self.config.dialect == Dialect::Fived && !self.check_resend(target, reply) {
            return;
        }
        self.resend(target, reply);
    }

    /// Fived sanity checks ahead of recovery. Returns `false` once the
    /// request has been dealt with.
    fn check_resend(&mut self, target: u64, reply: &str) -> bool {
        let cached = self.queues.history_len() + self.queues.len(Priority::Resend);

        if cached <= 1 {
            // Most likely we reconnected to a controller that had trouble
            // mid-stream. It will keep asking for this line until its
            // numbering is reset to it.
            warn!(line = target, "resetting confused firmware with synthetic resend");
            self.enqueue_internal(Priority::High, LINE_RESET_COMMAND, Some(target));
            self.resend(0, reply);
            self.emit_error(ErrorKind::UnsentResend, reply);
            return false;
        }

        if target >= self.lineno {
            debug!(line = target, lineno = self.lineno, "resend of a line never sent");
            self.emit_error(ErrorKind::UnsentResend, reply);
            return false;
        }

        true
    }

    /// Requeue everything from `target` on for transmission.
    fn resend(&mut self, target: u64, reply: &str) {
        let moved = self.queues.recover(target);
        if moved == 0 {
            warn!(
                line = target,
                cached = self.queues.history_len(),
                "resend request for unknown (too old) line"
            );
            self.emit_error(ErrorKind::UncachedResend, reply);
        } else {
            debug!(line = target, moved, "resend queued");
        }

        self.send_next = true;
        self.want_writable(true);
    }

    // A controller that was reset greets us with "start" on the first block
    // it sees, and some firmware repeats it mid-stream. Each one means the
    // numbering has to be reset again.
    fn handle_restart(&mut self) {
        debug!(lineno = self.lineno, "controller restarted");
        self.reset_lineno();
    }

    fn reset_lineno(&mut self) {
        if let Some(in_flight) = self.in_flight.as_mut() {
            in_flight.stale = true;
        }
        self.lineno = 0;
        self.queues.reset_sequencing();
        self.enqueue_internal(Priority::High, LINE_RESET_COMMAND, None);
        self.init_send_count = self.config.pipeline_depth - 1;
    }

    fn emit_error(&mut self, kind: ErrorKind, reply: &str) {
        debug!(%kind, reply, "reporting error");
        self.events.push_back(Event::Error {
            kind,
            reply: reply.into(),
        });
    }

    fn want_writable(&mut self, want: bool) {
        if self.wants_writable != want {
            self.wants_writable = want;
            self.events.push_back(Event::WantWritable(want));
        }
    }

    /// Send as much of the next block as the port takes.
    pub fn on_writable(&mut self) -> Result<()> {
        if self.port.is_none() {
            return Err(Error::NotConnected);
        }
        if self.prepare_next(false) {
            self.write_pending()?;
        }
        Ok(())
    }

    /// Make sure a formatted block sits in the send buffer.
    ///
    /// Returns `false` if there is nothing to send right now. Unless
    /// `ignore_budget` is set, that includes having used up the admission
    /// budget with no ack or resend since the last block.
    fn prepare_next(&mut self, ignore_budget: bool) -> bool {
        loop {
            if self.in_flight.is_some() {
                return true;
            }

            if !ignore_budget && self.init_send_count == 0 && !self.send_next {
                debug!(
                    depth = self.config.pipeline_depth,
                    resend = self.queues.len(Priority::Resend),
                    "writable, but waiting for an ack"
                );
                self.want_writable(false);
                return false;
            }

            let (priority, block) = match self.queues.dequeue_highest_ready(self.paused) {
                Some(next) => next,
                None => {
                    self.want_writable(false);
                    return false;
                }
            };

            let line = block.line().unwrap_or(self.lineno);
            match format_block(self.config.dialect, block.text(), line) {
                Ok(bytes) => {
                    self.send_buf = bytes;
                    self.bytes_sent = 0;
                    self.send_next = false;
                    self.in_flight = Some(InFlight {
                        priority,
                        block,
                        line,
                        stale: false,
                    });
                    return true;
                }
                Err(e) => {
                    warn!(error = %e, ?priority, "dropping block");
                    let kind = e.kind().unwrap_or(ErrorKind::BlockTooLarge);
                    self.emit_error(kind, block.text());
                }
            }
        }
    }

    /// One write of the unsent rest of the send buffer.
    ///
    /// Returns the number of bytes the port took.
    fn write_pending(&mut self) -> Result<usize> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        let n = loop {
            match port.write(&self.send_buf[self.bytes_sent..]) {
                Ok(0) => {
                    return Err(Error::WriteFailed(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "device accepted no bytes",
                    )))
                }
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(0),
                Err(e) => return Err(Error::WriteFailed(e)),
            }
        };

        if self.config.log_traffic {
            self.events.push_back(Event::Traffic {
                direction: Direction::Send,
                data: self.send_buf[self.bytes_sent..self.bytes_sent + n].to_vec(),
            });
        }
        self.bytes_sent += n;

        if self.bytes_sent == self.send_buf.len() {
            match self.in_flight.take() {
                Some(InFlight { priority, line, stale: true, .. }) => {
                    // Its number means nothing after the reset.
                    debug!(line, ?priority, "block sent across a line number reset, not cached");
                }
                Some(InFlight { priority, block, line, .. }) => {
                    let committed = self.queues.commit_sent(block, &mut self.lineno);
                    debug_assert_eq!(committed, line);
                    trace!(line, ?priority, "block sent");
                }
                None => {}
            }
            self.send_buf.clear();
            self.bytes_sent = 0;
        }

        Ok(n)
    }

    /// Block until every queued command is written.
    ///
    /// The port is switched to blocking mode for the duration and restored
    /// afterwards, also on failure. The admission budget is ignored. Paused
    /// priorities stay queued.
    pub fn flush(&mut self) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;
        let nonblocking = port.is_nonblocking()?;
        port.set_nonblocking(false)?;

        let result = self.drain();

        let restored = match self.port.as_mut() {
            Some(port) => port.set_nonblocking(nonblocking),
            None => Ok(()),
        };
        result.and(restored)
    }

    fn drain(&mut self) -> Result<()> {
        while self.prepare_next(true) {
            if self.write_pending()? == 0 {
                return Err(io::Error::from(io::ErrorKind::WouldBlock).into());
            }
        }
        Ok(())
    }

    /// Exclude `priority` from transmission, or let it go again.
    pub fn set_paused(&mut self, priority: Priority, paused: bool) {
        self.paused.set(priority.flag(), paused);
        if !paused {
            self.events.push_back(Event::MoreNeeded);
            self.want_writable(true);
        }
    }

    /// Whether `priority` is currently excluded from transmission.
    pub fn is_paused(&self, priority: Priority) -> bool {
        self.paused.contains(priority.flag())
    }

    /// Force the pipeline to move again.
    ///
    /// Ack-based admission can wedge on flaky firmware that drops an `ok`;
    /// this hands out a fresh budget regardless.
    pub fn kick(&mut self) {
        debug!(init_send_count = self.init_send_count, "kick");
        self.send_next = true;
        self.init_send_count = self.config.pipeline_depth - 1;
        self.want_writable(true);
    }

    /// Drop every queued and cached block and restart line numbering.
    ///
    /// A line number reset command is queued for the controller. A block
    /// already partially written is still completed, but not cached.
    pub fn reset(&mut self) {
        debug!("resetting device queues");
        self.queues.clear();
        self.reset_lineno();
        self.recv_fill = 0;
    }

    /// Commands waiting for transmission.
    pub fn buffered_line_count(&self) -> usize {
        self.queues.buffered_lines()
    }

    /// Whether anything, queued or partially written, is left to send.
    pub fn has_pending_bytes(&self) -> bool {
        self.in_flight.is_some() || self.queues.buffered_lines() > 0
    }

    /// Whether the owner should enqueue more commands.
    pub fn write_more(&self) -> bool {
        self.queues.buffered_lines() < self.config.pipeline_depth
    }

    /// Line number the next new command will be sent with.
    pub fn current_line_number(&self) -> u64 {
        self.lineno
    }

    /// Blocks waiting in the `priority` queue.
    pub fn queue_len(&self, priority: Priority) -> usize {
        self.queues.len(priority)
    }

    /// The queues and history, for inspection.
    pub fn queues(&self) -> &Queues {
        &self.queues
    }

    /// Whether the owner was last told to poll the port for writability.
    pub fn wants_writable(&self) -> bool {
        self.wants_writable
    }

    /// Whether a block is partially written.
    pub fn send_state(&self) -> SendState {
        if self.in_flight.is_some() {
            SendState::SendingBlock
        } else {
            SendState::Idle
        }
    }

    /// Remaining admission budget.
    pub fn send_budget(&self) -> usize {
        self.init_send_count
    }
}
