//! Pure framing functions.
//!
//! This module renders blocks into wire bytes and splits received bytes into
//! reply lines. All functions operate on byte buffers and never perform I/O.

use super::types::Dialect;
use crate::error::{Error, Result};

/// Largest `N<line> <payload>` rendering a controller accepts.
pub const BLOCK_SIZE: usize = 256;

/// Terminator appended to Simple blocks and ending every reply.
pub const BLOCK_TERMINATOR: &[u8] = b"\r\n";

/// Capacity of the engine's send buffer.
pub const SEND_BUFFER_SIZE: usize = BLOCK_SIZE + BLOCK_TERMINATOR.len();

/// Result of scanning a receive buffer for one reply line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSpan {
    /// Length of the reply text, without terminator bytes.
    pub reply: usize,
    /// Length of the reply plus the terminator run following it.
    pub consumed: usize,
}

/// XOR-fold of `bytes`, as a signed byte.
///
/// # Example
///
/// ```
/// use printlink::sansio::protocol::checksum;
///
/// assert_eq!(checksum(b"N0 G28"), 0x4e ^ 0x30 ^ 0x20 ^ 0x47 ^ 0x32 ^ 0x38);
/// ```
pub fn checksum(bytes: &[u8]) -> i8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b) as i8
}

/// Render `payload` for `dialect`.
///
/// `line` is only used by the numbered dialects. Fails with
/// [`Error::BlockTooLarge`] if the rendering does not fit the send buffer.
///
/// # Example
///
/// ```
/// use printlink::sansio::protocol::format_block;
/// use printlink::Dialect;
///
/// let bytes = format_block(Dialect::Simple, "G28", 0).unwrap();
/// assert_eq!(bytes, b"G28\r\n");
/// ```
pub fn format_block(dialect: Dialect, payload: &str, line: u64) -> Result<Vec<u8>> {
    if dialect.is_numbered() {
        format_numbered(payload, line)
    } else {
        format_simple(payload)
    }
}

fn format_simple(payload: &str) -> Result<Vec<u8>> {
    let size = payload.len() + BLOCK_TERMINATOR.len();
    if size > SEND_BUFFER_SIZE {
        return Err(Error::BlockTooLarge {
            size,
            limit: SEND_BUFFER_SIZE,
        });
    }
    let mut bytes = Vec::with_capacity(size);
    bytes.extend_from_slice(payload.as_bytes());
    bytes.extend_from_slice(BLOCK_TERMINATOR);
    Ok(bytes)
}

fn format_numbered(payload: &str, line: u64) -> Result<Vec<u8>> {
    let numbered = format!("N{} {}", line, payload);
    if numbered.len() > BLOCK_SIZE {
        return Err(Error::BlockTooLarge {
            size: numbered.len(),
            limit: BLOCK_SIZE,
        });
    }
    let sum = checksum(numbered.as_bytes());
    let framed = format!("{}*{}\n", numbered, sum);
    if framed.len() > SEND_BUFFER_SIZE {
        return Err(Error::BlockTooLarge {
            size: framed.len(),
            limit: SEND_BUFFER_SIZE,
        });
    }
    Ok(framed.into_bytes())
}

fn is_terminator(b: u8) -> bool {
    b == b'\r' || b == b'\n'
}

/// Find the first complete reply in `buf`.
///
/// A reply is any run of non-terminator bytes followed by at least one CR or
/// LF. Returns `None` while no terminator has been received. An empty
/// `reply` means the buffer started with stray terminator bytes.
pub fn split_line(buf: &[u8]) -> Option<LineSpan> {
    let reply = buf.iter().position(|&b| is_terminator(b))?;
    let terms = buf[reply..].iter().take_while(|&&b| is_terminator(b)).count();
    Some(LineSpan {
        reply,
        consumed: reply + terms,
    })
}

/// Index of the first byte that may not appear in a reply, if any.
///
/// Controllers speak 7-bit ASCII; a NUL or a high byte means line noise.
pub fn first_invalid_byte(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == 0 || !b.is_ascii())
}

/// Strip a `;` comment and trailing whitespace from a command.
///
/// Returns `None` if nothing is left to send.
pub fn trim_command(text: &str) -> Option<&str> {
    let code = match text.find(';') {
        Some(pos) => &text[..pos],
        None => text,
    };
    let code = code.trim_end();
    if code.is_empty() {
        None
    } else {
        Some(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold(s: &str) -> i8 {
        let mut c = 0u8;
        for b in s.bytes() {
            c ^= b;
        }
        c as i8
    }

    #[test]
    fn test_simple_block() {
        assert_eq!(format_block(Dialect::Simple, "M105", 7).unwrap(), b"M105\r\n");
    }

    #[test]
    fn test_numbered_block_shape() {
        let bytes = format_block(Dialect::Fived, "G1 X10", 0).unwrap();
        let expected = format!("N0 G1 X10*{}\n", fold("N0 G1 X10"));
        assert_eq!(bytes, expected.into_bytes());

        let tonokip = format_block(Dialect::Tonokip, "G1 X10", 0).unwrap();
        assert_eq!(tonokip, format_block(Dialect::Fived, "G1 X10", 0).unwrap());
    }

    #[test]
    fn test_checksum_covers_line_number() {
        for (line, payload) in [(0u64, "G28"), (17, "M104 S200"), (123456, "G1 X1.5 Y-3 E0.2")] {
            let bytes = format_block(Dialect::Fived, payload, line).unwrap();
            let text = String::from_utf8(bytes).unwrap();
            let (body, trailer) = text.trim_end_matches('\n').rsplit_once('*').unwrap();
            assert_eq!(body, format!("N{} {}", line, payload));
            assert_eq!(trailer.parse::<i8>().unwrap(), fold(body));
        }
    }

    #[test]
    fn test_block_too_large() {
        let payload = "G".repeat(BLOCK_SIZE);
        match format_block(Dialect::Fived, &payload, 1) {
            Err(Error::BlockTooLarge { limit, .. }) => assert_eq!(limit, BLOCK_SIZE),
            other => panic!("expected BlockTooLarge, got {:?}", other),
        }

        let payload = "G".repeat(SEND_BUFFER_SIZE - 1);
        assert!(format_block(Dialect::Simple, &payload, 0).is_err());
        let payload = "G".repeat(SEND_BUFFER_SIZE - 2);
        assert_eq!(format_block(Dialect::Simple, &payload, 0).unwrap().len(), SEND_BUFFER_SIZE);
    }

    #[test]
    fn test_numbered_block_limit_includes_trailer() {
        for len in BLOCK_SIZE - 10..=BLOCK_SIZE {
            let payload = "G".repeat(len - 3);
            let numbered = format!("N1 {}", payload);
            let framed_len = numbered.len() + 2 + fold(&numbered).to_string().len();
            let result = format_block(Dialect::Fived, &payload, 1);
            assert_eq!(result.is_ok(), framed_len <= SEND_BUFFER_SIZE, "length {}", len);
        }
    }

    #[test]
    fn test_split_line() {
        assert_eq!(split_line(b"ok"), None);
        assert_eq!(
            split_line(b"ok\r\nrs 3\r\n"),
            Some(LineSpan {
                reply: 2,
                consumed: 4
            })
        );
        assert_eq!(
            split_line(b"\nok\r\n"),
            Some(LineSpan {
                reply: 0,
                consumed: 1
            })
        );
        assert_eq!(
            split_line(b"start\n\r\n\r"),
            Some(LineSpan {
                reply: 5,
                consumed: 9
            })
        );
    }

    #[test]
    fn test_first_invalid_byte() {
        assert_eq!(first_invalid_byte(b"ok T:20\r\n"), None);
        assert_eq!(first_invalid_byte(b"ok\0junk"), Some(2));
        assert_eq!(first_invalid_byte(&[b'o', b'k', 0xff]), Some(2));
    }

    #[test]
    fn test_trim_command() {
        assert_eq!(trim_command("G1 X10 ; move"), Some("G1 X10"));
        assert_eq!(trim_command("G1 X10"), Some("G1 X10"));
        assert_eq!(trim_command("G28\r\n"), Some("G28"));
        assert_eq!(trim_command("; just a comment"), None);
        assert_eq!(trim_command("   \t\n"), None);
        assert_eq!(trim_command(""), None);
        assert_eq!(trim_command(trim_command("M104 S200  ;heat\n").unwrap()), Some("M104 S200"));
    }
}
