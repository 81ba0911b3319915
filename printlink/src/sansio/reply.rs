//! Reply classification for each dialect.
//!
//! Every function here looks at one reply line (terminator already removed)
//! and returns what it means. Deciding what to do about a resend request is
//! left to the engine, which knows what has been sent.

use super::types::{Dialect, ReplyEvent, ValueKind};
use crate::error::ErrorKind;

/// Classify one reply line according to `dialect`.
///
/// # Example
///
/// ```
/// use printlink::sansio::reply::parse_reply;
/// use printlink::sansio::{ReplyEvent, ValueKind};
/// use printlink::Dialect;
///
/// let events = parse_reply(Dialect::Fived, "ok T:201.5");
/// assert_eq!(events[0], ReplyEvent::Ack);
/// assert_eq!(
///     events[1],
///     ReplyEvent::Value { kind: ValueKind::NozzleTemp, value: 201.5 }
/// );
/// ```
pub fn parse_reply(dialect: Dialect, reply: &str) -> Vec<ReplyEvent> {
    match dialect {
        Dialect::Simple => parse_simple(reply),
        Dialect::Fived => parse_fived(reply),
        Dialect::Tonokip => parse_tonokip(reply),
    }
}

fn unknown() -> ReplyEvent {
    ReplyEvent::Error {
        kind: ErrorKind::UnknownReply,
    }
}

fn malformed_resend() -> ReplyEvent {
    ReplyEvent::Error {
        kind: ErrorKind::MalformedResendRequest,
    }
}

fn has_prefix(reply: &str, prefix: &str) -> bool {
    reply.len() >= prefix.len()
        && reply.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

fn parse_simple(reply: &str) -> Vec<ReplyEvent> {
    if has_prefix(reply, "ok") {
        vec![ReplyEvent::Ack]
    } else {
        vec![unknown()]
    }
}

fn parse_fived(reply: &str) -> Vec<ReplyEvent> {
    if has_prefix(reply, "ok") {
        let mut events = vec![ReplyEvent::Ack];
        parse_values(&reply[2..], &mut events);
        events
    } else if has_prefix(reply, "rs") || has_prefix(reply, "resend") {
        vec![parse_resend_line(&reply[2..])]
    } else if reply.starts_with("!!") {
        vec![ReplyEvent::Error {
            kind: ErrorKind::HardwareFault,
        }]
    } else if has_prefix(reply, "start") {
        vec![ReplyEvent::Restart]
    } else {
        vec![unknown()]
    }
}

fn parse_tonokip(reply: &str) -> Vec<ReplyEvent> {
    if has_prefix(reply, "ok") {
        vec![ReplyEvent::Ack]
    } else if has_prefix(reply, "Resend:") {
        vec![parse_resend_line(&reply[7..])]
    } else if has_prefix(reply, "T:") {
        // Both readings are reported as bed temperature.
        let rest = &reply[2..];
        let (bed, used) = match parse_float(rest) {
            Some(parsed) => parsed,
            None => return vec![unknown()],
        };
        let mut events = vec![ReplyEvent::Value {
            kind: ValueKind::BedTemp,
            value: bed,
        }];
        let tail = &rest[used..];
        let tail = match tail.as_bytes().first() {
            Some(b) if b.is_ascii_whitespace() => &tail[1..],
            _ => tail,
        };
        if has_prefix(tail, "B:") {
            if let Some((value, _)) = parse_float(&tail[2..]) {
                events.push(ReplyEvent::Value {
                    kind: ValueKind::BedTemp,
                    value,
                });
            }
        }
        events
    } else {
        vec![unknown()]
    }
}

fn value_kind(letter: u8) -> Option<ValueKind> {
    match letter {
        b'T' => Some(ValueKind::NozzleTemp),
        b'B' => Some(ValueKind::BedTemp),
        b'X' => Some(ValueKind::XPos),
        b'Y' => Some(ValueKind::YPos),
        b'Z' => Some(ValueKind::ZPos),
        b'E' => Some(ValueKind::EPos),
        _ => None,
    }
}

/// Scan `letter[:]float` pairs following an `ok`.
fn parse_values(rest: &str, events: &mut Vec<ReplyEvent>) {
    let bytes = rest.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i].to_ascii_uppercase();
        if !c.is_ascii_alphabetic() || c == b'C' {
            i += 1;
            continue;
        }
        let kind = match value_kind(c) {
            Some(kind) => kind,
            None => {
                events.push(unknown());
                i += 1;
                continue;
            }
        };
        let mut start = i + 1;
        if bytes.get(start) == Some(&b':') {
            start += 1;
        }
        match parse_float(&rest[start..]) {
            Some((value, used)) => {
                events.push(ReplyEvent::Value { kind, value });
                i = start + used;
            }
            None => {
                events.push(unknown());
                i += 1;
            }
        }
    }
}

/// Parse a leading float, skipping leading blanks.
///
/// Returns the value and the number of bytes consumed, blanks included.
fn parse_float(s: &str) -> Option<(f32, usize)> {
    let bytes = s.as_bytes();
    let mut i = bytes.iter().take_while(|b| **b == b' ' || **b == b'\t').count();
    let start = i;
    if matches!(bytes.get(i), Some(b'+') | Some(b'-')) {
        i += 1;
    }
    let int_digits = bytes[i..].iter().take_while(|b| b.is_ascii_digit()).count();
    i += int_digits;
    let mut frac_digits = 0;
    if bytes.get(i) == Some(&b'.') {
        frac_digits = bytes[i + 1..].iter().take_while(|b| b.is_ascii_digit()).count();
        if int_digits + frac_digits > 0 {
            i += 1 + frac_digits;
        }
    }
    if int_digits + frac_digits == 0 {
        return None;
    }
    if matches!(bytes.get(i), Some(b'e') | Some(b'E')) {
        let mut j = i + 1;
        if matches!(bytes.get(j), Some(b'+') | Some(b'-')) {
            j += 1;
        }
        let exp_digits = bytes[j.min(bytes.len())..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count();
        if exp_digits > 0 {
            i = j + exp_digits;
        }
    }
    s[start..i].parse::<f32>().ok().map(|v| (v, i))
}

/// Extract the line number of a resend request.
fn parse_resend_line(rest: &str) -> ReplyEvent {
    let bytes = rest.as_bytes();
    let start = match bytes.iter().position(|b| b.is_ascii_digit()) {
        Some(start) => start,
        None => return malformed_resend(),
    };
    if start > 0 && bytes[start - 1] == b'-' {
        return malformed_resend();
    }
    let digits = bytes[start..].iter().take_while(|b| b.is_ascii_digit()).count();
    match rest[start..start + digits].parse::<u64>() {
        Ok(line) => ReplyEvent::Resend { line },
        Err(_) => malformed_resend(),
    }
}
