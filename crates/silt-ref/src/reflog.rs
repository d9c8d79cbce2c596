//! The reflog record codec.
//!
//! One record per line:
//! `<40hex> SP <40hex> SP <name SP <email>> SP <seconds> SP <±HHMM> [TAB <message>] LF`
//!
//! The two OIDs and their separators put the identity at byte offset 82; a
//! well-formed line is at least 83 bytes before the optional message.

use bstr::{BStr, BString, ByteSlice, ByteVec};
use silt_hash::ObjectId;
use silt_utils::date::Signature;

use crate::error::RefError;

/// Minimum length of a well-formed record, before the optional message.
const MIN_RECORD_LEN: usize = 83;

bitflags::bitflags! {
    /// Flags controlling reflog expiry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExpireFlags: u32 {
        /// Report what would be pruned without rewriting anything.
        const DRY_RUN = 0x01;
        /// After expiry, move a non-symbolic ref to the last kept new-value.
        const UPDATE_REF = 0x02;
        /// Rewrite each surviving entry's old-value to chain from the
        /// previous survivor.
        const REWRITE = 0x04;
    }
}

/// A single reflog entry recording one value change of a ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflogEntry {
    pub old_oid: ObjectId,
    pub new_oid: ObjectId,
    pub identity: Signature,
    pub message: BString,
}

impl ReflogEntry {
    /// Build an entry, folding the message for single-line storage.
    pub fn new(
        old_oid: ObjectId,
        new_oid: ObjectId,
        identity: Signature,
        message: Option<&str>,
    ) -> Self {
        Self {
            old_oid,
            new_oid,
            identity,
            message: fold_message(message.unwrap_or("").as_bytes()),
        }
    }

    /// Parse a record from a single line (no trailing newline required).
    pub fn parse(line: &BStr) -> Result<Self, RefError> {
        let line = line.as_bytes();
        let line = match line.last() {
            Some(b'\n') => &line[..line.len() - 1],
            _ => line,
        };

        if line.len() < MIN_RECORD_LEN {
            return Err(RefError::Reflog(format!(
                "record too short: {} bytes",
                line.len()
            )));
        }
        if line[40] != b' ' || line[81] != b' ' {
            return Err(RefError::Reflog("bad separator position".into()));
        }

        let old_oid = ObjectId::from_hex(&line[..40])?;
        let new_oid = ObjectId::from_hex(&line[41..81])?;

        let rest = &line[82..];
        // Identity runs up to and including '>', then ` <seconds> <±HHMM>`.
        let gt = rest
            .find_byte(b'>')
            .ok_or_else(|| RefError::Reflog("missing '>' in identity".into()))?;
        let after = &rest[gt + 1..];
        if after.first() != Some(&b' ') {
            return Err(RefError::Reflog("missing space after identity".into()));
        }

        let secs_start = 1;
        let secs_end = secs_start
            + after[secs_start..]
                .iter()
                .take_while(|b| b.is_ascii_digit())
                .count();
        if secs_end == secs_start {
            return Err(RefError::Reflog("missing timestamp".into()));
        }

        let zone = &after[secs_end..];
        if zone.len() < 6
            || zone[0] != b' '
            || !(zone[1] == b'+' || zone[1] == b'-')
            || !zone[2..6].iter().all(|b| b.is_ascii_digit())
        {
            return Err(RefError::Reflog("bad timezone field".into()));
        }

        let identity_end = gt + 1 + secs_end + 6;
        let identity = Signature::parse(rest[..identity_end].as_bstr())
            .map_err(|e| RefError::Reflog(format!("bad identity: {}", e)))?;

        let message = match rest.get(identity_end) {
            None => BString::from(""),
            Some(b'\t') => BString::from(&rest[identity_end + 1..]),
            Some(_) => return Err(RefError::Reflog("garbage after timezone".into())),
        };

        Ok(Self {
            old_oid,
            new_oid,
            identity,
            message,
        })
    }

    /// Serialize to the line form, without the trailing newline.
    pub fn to_bytes(&self) -> BString {
        let mut out = BString::new(Vec::with_capacity(128));
        out.push_str(self.old_oid.to_hex().as_bytes());
        out.push(b' ');
        out.push_str(self.new_oid.to_hex().as_bytes());
        out.push(b' ');
        out.push_str(self.identity.to_bytes());
        if !self.message.is_empty() {
            out.push(b'\t');
            out.push_str(&self.message);
        }
        out
    }
}

/// Fold a free-form message for one-line storage: every run of whitespace
/// (newlines included) collapses to a single space, and leading/trailing
/// whitespace is dropped.
pub fn fold_message(msg: &[u8]) -> BString {
    let mut out = BString::new(Vec::with_capacity(msg.len()));
    let mut was_space = true; // swallow leading whitespace
    for &c in msg {
        if c.is_ascii_whitespace() {
            if !was_space {
                out.push(b' ');
            }
            was_space = true;
        } else {
            out.push(c);
            was_space = false;
        }
    }
    if out.last() == Some(&b' ') {
        let new_len = out.len() - 1;
        out.truncate(new_len);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use silt_utils::date::SiltDate;

    fn sig() -> Signature {
        Signature {
            name: BString::from("Test User"),
            email: BString::from("test@example.com"),
            date: SiltDate::new(1234567890, 0),
        }
    }

    fn entry(old: &str, new: &str, msg: &str) -> ReflogEntry {
        ReflogEntry::new(
            ObjectId::from_hex(old).unwrap(),
            ObjectId::from_hex(new).unwrap(),
            sig(),
            Some(msg),
        )
    }

    #[test]
    fn roundtrip() {
        let e = entry(
            "0000000000000000000000000000000000000000",
            "da39a3ee5e6b4b0d3255bfef95601890afd80709",
            "commit (initial): first commit",
        );
        let bytes = e.to_bytes();
        let parsed = ReflogEntry::parse(bytes.as_bstr()).unwrap();
        assert_eq!(parsed, e);
    }

    #[test]
    fn encode_of_decode_is_identity() {
        let line = b"0000000000000000000000000000000000000000 da39a3ee5e6b4b0d3255bfef95601890afd80709 Test User <test@example.com> 1234567890 +0000\tcommit (initial): first commit";
        let parsed = ReflogEntry::parse(line.as_bstr()).unwrap();
        assert_eq!(parsed.to_bytes(), line.as_bstr());
    }

    #[test]
    fn parse_wire_format() {
        let line = b"0000000000000000000000000000000000000000 da39a3ee5e6b4b0d3255bfef95601890afd80709 Test User <test@example.com> 1234567890 -0500\tcheckout: moving to main";
        let e = ReflogEntry::parse(line.as_bstr()).unwrap();
        assert!(e.old_oid.is_null());
        assert_eq!(e.identity.name, BString::from("Test User"));
        assert_eq!(e.identity.date.timestamp, 1234567890);
        assert_eq!(e.identity.date.tz_offset, -300);
        assert_eq!(e.message, BString::from("checkout: moving to main"));
    }

    #[test]
    fn parse_without_message() {
        let line = b"0000000000000000000000000000000000000000 da39a3ee5e6b4b0d3255bfef95601890afd80709 T U <t@e.com> 1234567890 +0000";
        let e = ReflogEntry::parse(line.as_bstr()).unwrap();
        assert!(e.message.is_empty());
    }

    #[test]
    fn parse_trailing_newline_tolerated() {
        let line = b"0000000000000000000000000000000000000000 da39a3ee5e6b4b0d3255bfef95601890afd80709 T U <t@e.com> 1234567890 +0000\tmsg\n";
        let e = ReflogEntry::parse(line.as_bstr()).unwrap();
        assert_eq!(e.message, BString::from("msg"));
    }

    #[test]
    fn rejects_short_line() {
        assert!(ReflogEntry::parse(b"too short".as_bstr()).is_err());
    }

    #[test]
    fn rejects_bad_separators() {
        let mut line = b"0000000000000000000000000000000000000000 da39a3ee5e6b4b0d3255bfef95601890afd80709 T U <t@e.com> 1234567890 +0000".to_vec();
        line[40] = b'x';
        assert!(ReflogEntry::parse(line.as_bstr()).is_err());
    }

    #[test]
    fn rejects_bad_zone() {
        let line = b"0000000000000000000000000000000000000000 da39a3ee5e6b4b0d3255bfef95601890afd80709 T U <t@e.com> 1234567890 0000";
        assert!(ReflogEntry::parse(line.as_bstr()).is_err());
    }

    #[test]
    fn message_folding() {
        assert_eq!(
            fold_message(b"  multi\nline\n\tmessage  "),
            BString::from("multi line message")
        );
        assert_eq!(fold_message(b"clean"), BString::from("clean"));
        assert_eq!(fold_message(b"   "), BString::from(""));
        assert_eq!(
            fold_message(b"a  b\r\n\r\nc"),
            BString::from("a b c")
        );
    }

    #[test]
    fn folded_message_in_entry() {
        let e = ReflogEntry::new(
            ObjectId::NULL,
            ObjectId::from_hex("da39a3ee5e6b4b0d3255bfef95601890afd80709").unwrap(),
            sig(),
            Some("line one\nline two\n"),
        );
        assert_eq!(e.message, BString::from("line one line two"));
    }
}
