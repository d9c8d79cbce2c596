//! Configuration file parsing for the silt version control system.
//!
//! Handles the INI-like config format: `[section]` / `[section "subsection"]`
//! headers, `key = value` entries, `#`/`;` comments, quoted values with
//! backslash escapes, and valueless boolean keys. Read-only — silt edits
//! configuration through dedicated tooling, not this crate.

use std::path::Path;

use bstr::{BStr, BString, ByteSlice};

/// Errors that can occur during config operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("parse error in {file}:{line}: {message}")]
    Parse {
        file: String,
        line: usize,
        message: String,
    },

    #[error("invalid boolean value for {key}: {value}")]
    InvalidBool { key: String, value: String },

    #[error("invalid integer value for {key}: {value}")]
    InvalidInt { key: String, value: String },

    #[error("missing value for key {0}")]
    MissingValue(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One configuration entry. The key is stored in the canonical
/// `section.subsection.name` form with section and name lowercased and the
/// subsection case preserved.
#[derive(Debug, Clone)]
pub struct ConfigEntry {
    pub key: String,
    /// `None` for a valueless boolean key (`[foo] bar`).
    pub value: Option<BString>,
}

/// A parsed configuration file: an ordered multi-map of entries.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    entries: Vec<ConfigEntry>,
}

impl ConfigFile {
    /// Load and parse a config file. A missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read(path) {
            Ok(data) => Self::parse(&data, &path.display().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Parse config bytes. `filename` is used in error messages only.
    pub fn parse(input: &[u8], filename: &str) -> Result<Self, ConfigError> {
        let mut entries = Vec::new();
        let mut section: Option<String> = None;

        for (lineno, line) in input.lines().enumerate() {
            let lineno = lineno + 1;
            let line = line.trim();
            if line.is_empty() || line[0] == b'#' || line[0] == b';' {
                continue;
            }

            if line[0] == b'[' {
                section = Some(parse_section_header(line, filename, lineno)?);
                continue;
            }

            let section = section.as_deref().ok_or_else(|| ConfigError::Parse {
                file: filename.into(),
                line: lineno,
                message: "key without a section".into(),
            })?;

            let (name, value) = parse_entry(line, filename, lineno)?;
            entries.push(ConfigEntry {
                key: format!("{}.{}", section, name),
                value,
            });
        }

        Ok(Self { entries })
    }

    /// Last-one-wins lookup. Returns `Some(None)` for a valueless key.
    pub fn get(&self, key: &str) -> Option<Option<&BStr>> {
        let key = canonicalize_key(key);
        self.entries
            .iter()
            .rev()
            .find(|e| e.key == key)
            .map(|e| e.value.as_ref().map(|v| v.as_bstr()))
    }

    /// All values for a multi-valued key, in file order.
    pub fn get_all(&self, key: &str) -> Vec<Option<&BStr>> {
        let key = canonicalize_key(key);
        self.entries
            .iter()
            .filter(|e| e.key == key)
            .map(|e| e.value.as_ref().map(|v| v.as_bstr()))
            .collect()
    }

    /// Get a string value.
    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key) {
            Some(Some(v)) => Some(v.to_str_lossy().into_owned()),
            _ => None,
        }
    }

    /// Get a boolean. A valueless key means true; `yes/on/true/1` are true,
    /// `no/off/false/0` and the empty string are false.
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(None) => Ok(Some(true)),
            Some(Some(v)) => {
                let lower = v.to_ascii_lowercase();
                match lower.as_slice() {
                    b"yes" | b"on" | b"true" | b"1" => Ok(Some(true)),
                    b"no" | b"off" | b"false" | b"0" | b"" => Ok(Some(false)),
                    _ => Err(ConfigError::InvalidBool {
                        key: key.into(),
                        value: v.to_str_lossy().into_owned(),
                    }),
                }
            }
        }
    }

    /// Get an integer, honoring `k`/`m`/`g` suffixes.
    pub fn get_int(&self, key: &str) -> Result<Option<i64>, ConfigError> {
        let value = match self.get(key) {
            None => return Ok(None),
            Some(None) => return Err(ConfigError::MissingValue(key.into())),
            Some(Some(v)) => v,
        };
        let s = value.to_str_lossy();
        let s = s.trim();
        let (digits, mult) = match s.as_bytes().last() {
            Some(b'k') | Some(b'K') => (&s[..s.len() - 1], 1024),
            Some(b'm') | Some(b'M') => (&s[..s.len() - 1], 1024 * 1024),
            Some(b'g') | Some(b'G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
            _ => (s, 1),
        };
        digits
            .parse::<i64>()
            .map(|n| Some(n * mult))
            .map_err(|_| ConfigError::InvalidInt {
                key: key.into(),
                value: s.into(),
            })
    }

    /// All entries, in file order.
    pub fn entries(&self) -> &[ConfigEntry] {
        &self.entries
    }
}

/// Lowercase the section and variable name, preserving any subsection.
fn canonicalize_key(key: &str) -> String {
    let Some(first) = key.find('.') else {
        return key.to_ascii_lowercase();
    };
    let Some(last) = key.rfind('.') else {
        return key.to_ascii_lowercase();
    };
    if first == last {
        return key.to_ascii_lowercase();
    }
    format!(
        "{}.{}.{}",
        key[..first].to_ascii_lowercase(),
        &key[first + 1..last],
        key[last + 1..].to_ascii_lowercase()
    )
}

/// Parse `[section]` or `[section "subsection"]`.
fn parse_section_header(
    line: &[u8],
    filename: &str,
    lineno: usize,
) -> Result<String, ConfigError> {
    let err = |message: &str| ConfigError::Parse {
        file: filename.into(),
        line: lineno,
        message: message.into(),
    };

    let close = line
        .find_byte(b']')
        .ok_or_else(|| err("unterminated section header"))?;
    let inner = line[1..close].trim();

    if let Some(quote) = inner.find_byte(b'"') {
        let name = inner[..quote].trim();
        let rest = &inner[quote + 1..];
        let end_quote = rest
            .find_byte(b'"')
            .ok_or_else(|| err("unterminated subsection"))?;
        let subsection = &rest[..end_quote];
        let mut sub = String::new();
        let mut escaped = false;
        for &b in subsection {
            if escaped {
                sub.push(b as char);
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else {
                sub.push(b as char);
            }
        }
        Ok(format!(
            "{}.{}",
            name.to_str_lossy().to_ascii_lowercase(),
            sub
        ))
    } else {
        Ok(inner.to_str_lossy().to_ascii_lowercase())
    }
}

/// Parse `name = value` (or a bare `name`). Strips inline comments outside
/// quotes and handles `\"`, `\\`, `\n`, `\t` escapes inside values.
fn parse_entry(
    line: &[u8],
    filename: &str,
    lineno: usize,
) -> Result<(String, Option<BString>), ConfigError> {
    let err = |message: &str| ConfigError::Parse {
        file: filename.into(),
        line: lineno,
        message: message.into(),
    };

    let (name, raw_value) = match line.find_byte(b'=') {
        Some(eq) => (line[..eq].trim(), Some(line[eq + 1..].trim_start())),
        None => (line.trim(), None),
    };

    if name.is_empty()
        || !name
            .iter()
            .all(|&b| b.is_ascii_alphanumeric() || b == b'-')
        || !name[0].is_ascii_alphabetic()
    {
        return Err(err("invalid variable name"));
    }

    let value = match raw_value {
        None => None,
        Some(raw) => {
            let mut out = BString::new(Vec::new());
            let mut in_quotes = false;
            let mut escaped = false;
            for &b in raw {
                if escaped {
                    match b {
                        b'n' => out.push(b'\n'),
                        b't' => out.push(b'\t'),
                        _ => out.push(b),
                    }
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    in_quotes = !in_quotes;
                } else if (b == b'#' || b == b';') && !in_quotes {
                    break;
                } else {
                    out.push(b);
                }
            }
            if in_quotes {
                return Err(err("unterminated quoted value"));
            }
            if escaped {
                return Err(err("dangling backslash"));
            }
            // Whitespace before an inline comment is not part of the value.
            let trimmed = out.trim_end().len();
            out.truncate(trimmed);
            Some(out)
        }
    };

    Ok((String::from_utf8_lossy(name).to_ascii_lowercase(), value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> ConfigFile {
        ConfigFile::parse(s.as_bytes(), "test").unwrap()
    }

    #[test]
    fn basic_section_and_value() {
        let cfg = parse("[core]\n\tlogAllRefUpdates = true\n");
        assert_eq!(cfg.get_string("core.logallrefupdates").unwrap(), "true");
        // Key lookup is case-insensitive on section and name.
        assert_eq!(cfg.get_string("Core.LogAllRefUpdates").unwrap(), "true");
    }

    #[test]
    fn subsection_preserves_case() {
        let cfg = parse("[remote \"Origin\"]\n\turl = x\n");
        assert!(cfg.get("remote.Origin.url").is_some());
        assert!(cfg.get("remote.origin.url").is_none());
    }

    #[test]
    fn last_value_wins() {
        let cfg = parse("[a]\nb = 1\nb = 2\n");
        assert_eq!(cfg.get_string("a.b").unwrap(), "2");
        assert_eq!(cfg.get_all("a.b").len(), 2);
    }

    #[test]
    fn valueless_key_is_true() {
        let cfg = parse("[core]\nbare\n");
        assert_eq!(cfg.get_bool("core.bare").unwrap(), Some(true));
    }

    #[test]
    fn bool_values() {
        let cfg = parse("[a]\nx = yes\ny = off\nz = nonsense\n");
        assert_eq!(cfg.get_bool("a.x").unwrap(), Some(true));
        assert_eq!(cfg.get_bool("a.y").unwrap(), Some(false));
        assert!(cfg.get_bool("a.z").is_err());
        assert_eq!(cfg.get_bool("a.missing").unwrap(), None);
    }

    #[test]
    fn int_with_suffix() {
        let cfg = parse("[pack]\nwindow = 16\nlimit = 2k\n");
        assert_eq!(cfg.get_int("pack.window").unwrap(), Some(16));
        assert_eq!(cfg.get_int("pack.limit").unwrap(), Some(2048));
    }

    #[test]
    fn comments_stripped() {
        let cfg = parse("[a] # section comment\nb = value ; trailing\n");
        assert_eq!(cfg.get_string("a.b").unwrap(), "value");
    }

    #[test]
    fn quoted_value_keeps_comment_chars() {
        let cfg = parse("[a]\nb = \"value ; not a comment\"\n");
        assert_eq!(cfg.get_string("a.b").unwrap(), "value ; not a comment");
    }

    #[test]
    fn escapes_in_value() {
        let cfg = parse("[a]\nb = one\\ttwo\n");
        assert_eq!(cfg.get_string("a.b").unwrap(), "one\ttwo");
    }

    #[test]
    fn key_without_section_rejected() {
        assert!(ConfigFile::parse(b"orphan = 1\n", "test").is_err());
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ConfigFile::load(&dir.path().join("no-such-file")).unwrap();
        assert!(cfg.entries().is_empty());
    }

    #[test]
    fn multi_valued_hiderefs() {
        let cfg = parse("[transfer]\nhiderefs = refs/pull\nhiderefs = !refs/pull/ok\n");
        let all = cfg.get_all("transfer.hiderefs");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].unwrap().to_str_lossy(), "refs/pull");
    }
}
