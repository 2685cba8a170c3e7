//! Change-log record model and textual codec (spec §3 "Change-log record",
//! §4.3 opcode catalogue).
//!
//! Each record is `version: TIMESTAMP|OPNAME(args)[:payload]`. Argument
//! values use a restricted `%XX` escape for the two characters that would
//! otherwise be ambiguous in the comma/paren-delimited grammar (`,` `)` `%`
//! and any byte outside printable ASCII), grounded in the `GETNAME`/`GETPATH`
//! escaping macros of `src/master/restore.cc`.

use std::fmt::Write as _;

use crate::error::Status;

/// One parsed or to-be-formatted argument value. Kept as a small closed set
/// rather than raw strings so callers build records out of typed values
/// instead of stringly-typed ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    U32(u32),
    U64(u64),
    I64(i64),
    Str(String),
}

impl Arg {
    fn format_into(&self, out: &mut String) {
        match self {
            Arg::U32(v) => {
                let _ = write!(out, "{v}");
            }
            Arg::U64(v) => {
                let _ = write!(out, "{v}");
            }
            Arg::I64(v) => {
                let _ = write!(out, "{v}");
            }
            Arg::Str(s) => escape_into(s, out),
        }
    }

    /// Reads a `u32`, whether the argument was built typed (`Arg::U32`) or
    /// came back out of [`Record::parse`] as a plain digit string — every
    /// record round-tripped through text loses its original `Arg` variant,
    /// since the grammar itself is untyped (spec §3 "Change-log record").
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Arg::U32(v) => Some(*v),
            Arg::U64(v) => u32::try_from(*v).ok(),
            Arg::I64(v) => u32::try_from(*v).ok(),
            Arg::Str(s) => s.parse().ok(),
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Arg::U64(v) => Some(*v),
            Arg::U32(v) => Some(*v as u64),
            Arg::I64(v) => u64::try_from(*v).ok(),
            Arg::Str(s) => s.parse().ok(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Arg::I64(v) => Some(*v),
            Arg::U32(v) => Some(*v as i64),
            Arg::U64(v) => i64::try_from(*v).ok(),
            Arg::Str(s) => s.parse().ok(),
        }
    }

    /// Reads the argument as text. Typed numeric args format the same way
    /// [`Arg::format_into`] would, so this is stable across the
    /// construct-then-parse round trip too.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Characters that must be `%XX`-escaped inside an argument: the grammar's
/// own delimiters plus the escape character itself.
fn needs_escape(c: char) -> bool {
    matches!(c, ',' | '(' | ')' | '%' | ':') || (c as u32) < 0x20
}

fn escape_into(s: &str, out: &mut String) {
    for b in s.bytes() {
        let c = b as char;
        if needs_escape(c) {
            let _ = write!(out, "%{b:02X}");
        } else {
            out.push(c);
        }
    }
}

fn unescape(s: &str) -> Result<String, Status> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len() {
                return Err(Status::Invalid);
            }
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).map_err(|_| Status::Invalid)?;
            let val = u8::from_str_radix(hex, 16).map_err(|_| Status::Invalid)?;
            out.push(val);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| Status::Invalid)
}

/// A parsed change-log record: `version: timestamp|OPNAME(args)[:payload]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub version: u64,
    pub timestamp: i64,
    pub opcode: String,
    pub args: Vec<Arg>,
    pub payload: Vec<Arg>,
}

impl Record {
    pub fn new(version: u64, timestamp: i64, opcode: impl Into<String>, args: Vec<Arg>) -> Self {
        Self { version, timestamp, opcode: opcode.into(), args, payload: Vec::new() }
    }

    pub fn with_payload(mut self, payload: Vec<Arg>) -> Self {
        self.payload = payload;
        self
    }

    /// Renders the canonical textual form used in changelog files, without
    /// a trailing newline.
    pub fn format(&self) -> String {
        let mut out = String::new();
        let _ = write!(out, "{}: {}|{}(", self.version, self.timestamp, self.opcode);
        for (i, a) in self.args.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            a.format_into(&mut out);
        }
        out.push(')');
        if !self.payload.is_empty() {
            out.push(':');
            for (i, a) in self.payload.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                a.format_into(&mut out);
            }
        }
        out
    }

    /// Parses one changelog line. Strict: any malformation yields
    /// `Err(Status::Invalid)`, matching `restore_line`'s `-1` return.
    pub fn parse(line: &str) -> Result<Self, Status> {
        let (version_str, rest) = line.split_once(':').ok_or(Status::Invalid)?;
        let version: u64 = version_str.trim().parse().map_err(|_| Status::Invalid)?;
        let rest = rest.trim_start();

        let (ts_str, rest) = rest.split_once('|').ok_or(Status::Invalid)?;
        let timestamp: i64 = ts_str.trim().parse().map_err(|_| Status::Invalid)?;

        let open = rest.find('(').ok_or(Status::Invalid)?;
        let opcode = rest[..open].to_owned();
        if opcode.is_empty() || !opcode.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(Status::Invalid);
        }
        let rest = &rest[open + 1..];
        let close = rest.find(')').ok_or(Status::Invalid)?;
        let args_str = &rest[..close];
        let args = parse_arg_list(args_str)?;

        let after = &rest[close + 1..];
        let payload = if let Some(payload_str) = after.strip_prefix(':') {
            parse_arg_list(payload_str)?
        } else if after.is_empty() {
            Vec::new()
        } else {
            return Err(Status::Invalid);
        };

        Ok(Record { version, timestamp, opcode, args, payload })
    }
}

fn parse_arg_list(s: &str) -> Result<Vec<Arg>, Status> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    s.split(',').map(|field| unescape(field).map(Arg::Str)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_and_reparse_round_trip() {
        let rec = Record::new(
            2,
            1_700_000_000,
            "CREATE",
            vec![Arg::U32(1), Arg::Str("a,b".to_owned()), Arg::U32(0o644)],
        )
        .with_payload(vec![Arg::U32(2)]);

        let text = rec.format();
        assert!(text.starts_with("2: 1700000000|CREATE("));
        let parsed = Record::parse(&text).unwrap();
        assert_eq!(parsed.version, 2);
        assert_eq!(parsed.timestamp, 1_700_000_000);
        assert_eq!(parsed.opcode, "CREATE");
        assert_eq!(parsed.args[1].as_str(), Some("a,b"));
        assert_eq!(parsed.payload[0].as_str(), Some("2"));
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!(Record::parse("not-a-record").unwrap_err(), Status::Invalid);
        assert_eq!(Record::parse("1: 100|lowercase()").unwrap_err(), Status::Invalid);
        assert_eq!(Record::parse("1: 100|CREATE(").unwrap_err(), Status::Invalid);
    }

    #[test]
    fn escapes_delimiter_characters() {
        let mut out = String::new();
        escape_into("a,b)c%d", &mut out);
        assert_eq!(out, "a%2Cb%29c%25d");
        assert_eq!(unescape(&out).unwrap(), "a,b)c%d");
    }
}
