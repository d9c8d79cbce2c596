use std::fmt;

use bstr::{BStr, BString, ByteSlice};

use crate::error::RefError;

bitflags::bitflags! {
    /// Flags for [`check_refname_format`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CheckFlags: u32 {
        /// Accept a refname with a single path component (e.g. `HEAD`).
        const ALLOW_ONELEVEL = 0x01;
        /// Accept one `*` as a full refname component (refspec patterns).
        const REFSPEC_PATTERN = 0x02;
    }
}

/// How to handle each byte in a refname:
/// 0: acceptable; 1: end-of-component; 2: `.`, look back for `..`;
/// 3: `{`, look back for `@{`; 4: bad (control characters, SP, DEL,
/// `~ ^ : ? [ \ *`).
const REFNAME_DISPOSITION: [u8; 256] = {
    let mut t = [0u8; 256];
    let mut i = 0usize;
    while i < 0x20 {
        t[i] = 4; // ASCII control characters (NUL included)
        i += 1;
    }
    t[0x7f] = 4; // DEL
    t[b' ' as usize] = 4;
    t[b'~' as usize] = 4;
    t[b'^' as usize] = 4;
    t[b':' as usize] = 4;
    t[b'?' as usize] = 4;
    t[b'[' as usize] = 4;
    t[b'\\' as usize] = 4;
    t[b'*' as usize] = 4;
    t[b'.' as usize] = 2;
    t[b'{' as usize] = 3;
    t[b'/' as usize] = 1;
    t
};

const LOCK_SUFFIX: &[u8] = b".lock";

/// Try to read one refname component from the front of `refname`.
/// Returns the length of the component, or None if it is not legal:
/// empty, begins with `.`, contains `..` or `@{` or a bad character,
/// or ends with `.lock`.
fn check_refname_component(refname: &[u8]) -> Option<usize> {
    let mut last = 0u8;
    let mut len = 0usize;

    for &ch in refname {
        match REFNAME_DISPOSITION[ch as usize] {
            0 => {}
            1 => break,
            2 => {
                if last == b'.' {
                    return None; // contains ".."
                }
            }
            3 => {
                if last == b'@' {
                    return None; // contains "@{"
                }
            }
            _ => return None,
        }
        last = ch;
        len += 1;
    }

    if len == 0 {
        return None;
    }
    if refname[0] == b'.' {
        return None;
    }
    if len >= LOCK_SUFFIX.len() && &refname[len - LOCK_SUFFIX.len()..len] == LOCK_SUFFIX {
        return None;
    }
    Some(len)
}

/// Check a refname against the format rules in one left-to-right pass.
///
/// A refname is legal if every slash-separated component is legal, it does
/// not end with `.`, it is not the single character `@`, and it has at least
/// two components unless `ALLOW_ONELEVEL` is given. With `REFSPEC_PATTERN`,
/// one `*` is accepted as a full component.
pub fn check_refname_format(refname: &BStr, flags: CheckFlags) -> bool {
    let mut flags = flags;
    let refname = refname.as_bytes();

    if refname == b"@" {
        return false;
    }

    let mut rest = refname;
    let mut component_count = 0usize;
    let mut last_component_len;

    loop {
        let component_len = match check_refname_component(rest) {
            Some(len) => len,
            None => {
                // Accept one wildcard as a full refname component.
                if flags.contains(CheckFlags::REFSPEC_PATTERN)
                    && rest.first() == Some(&b'*')
                    && matches!(rest.get(1), None | Some(b'/'))
                {
                    flags.remove(CheckFlags::REFSPEC_PATTERN);
                    1
                } else {
                    return false;
                }
            }
        };
        component_count += 1;
        last_component_len = component_len;
        if component_len == rest.len() {
            break;
        }
        rest = &rest[component_len + 1..];
    }

    if rest[last_component_len - 1] == b'.' {
        return false; // ends with '.'
    }
    if !flags.contains(CheckFlags::ALLOW_ONELEVEL) && component_count < 2 {
        return false;
    }
    true
}

/// Is `refname` safe to pass to the storage layer even if it fails the
/// format rules?
///
/// A name under `refs/` is safe if its `..` components never climb above
/// `refs/`. A name outside `refs/` is safe only in the pseudoref form:
/// uppercase letters, digits, `_` and `-`.
pub fn refname_is_safe(refname: &BStr) -> bool {
    let refname = refname.as_bytes();
    if let Some(rest) = refname.strip_prefix(b"refs/") {
        let mut depth = 0i32;
        for component in rest.split_str(b"/") {
            match component {
                b"" | b"." => {}
                b".." => {
                    depth -= 1;
                    if depth < 0 {
                        return false;
                    }
                }
                _ => depth += 1,
            }
        }
        return true;
    }
    !refname.is_empty()
        && refname
            .iter()
            .all(|&b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
}

/// The routing class of a refname, derived from the name alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    /// Lives in the selected backend, under `refs/…`.
    Normal,
    /// Scoped to one working tree; always stored by the files backend.
    PerWorktree,
    /// Uppercase transient state (`FETCH_HEAD`, `MERGE_HEAD`, …); stored as
    /// a plain file in the repository root.
    Pseudoref,
}

impl RefKind {
    /// Classify a refname. Callers route updates on this: non-normal refs
    /// are serviced by the files backend even when another backend is
    /// selected.
    pub fn of(refname: &BStr) -> Self {
        let refname = refname.as_bytes();
        if refname == b"HEAD" || refname.starts_with(b"refs/bisect/") {
            return RefKind::PerWorktree;
        }
        if !refname.is_empty()
            && refname
                .iter()
                .all(|&b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
        {
            return RefKind::Pseudoref;
        }
        RefKind::Normal
    }
}

/// A reference name.
///
/// Construction through [`RefName::new`] enforces the format rules
/// (one-level names like `HEAD` are accepted). Names read back from trusted
/// storage use the crate-internal unchecked constructor.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RefName(BString);

impl RefName {
    /// Create and validate a ref name.
    pub fn new(name: impl Into<BString>) -> Result<Self, RefError> {
        let name = name.into();
        if !check_refname_format(name.as_bstr(), CheckFlags::ALLOW_ONELEVEL) {
            return Err(RefError::BadName(name.to_string()));
        }
        Ok(Self(name))
    }

    /// The routing class of this name.
    pub fn kind(&self) -> RefKind {
        RefKind::of(self.0.as_bstr())
    }

    /// Is this under `refs/heads/`?
    pub fn is_branch(&self) -> bool {
        self.0.starts_with(b"refs/heads/")
    }

    /// Is this under `refs/tags/`?
    pub fn is_tag(&self) -> bool {
        self.0.starts_with(b"refs/tags/")
    }

    /// Is this under `refs/remotes/`?
    pub fn is_remote(&self) -> bool {
        self.0.starts_with(b"refs/remotes/")
    }

    /// Drop the standard `refs/{heads,tags,remotes}/` prefix for display.
    pub fn prettify(&self) -> &BStr {
        let s = self.0.as_bstr();
        for prefix in [b"refs/heads/".as_ref(), b"refs/tags/", b"refs/remotes/"] {
            if let Some(rest) = s.strip_prefix(prefix) {
                return rest.as_bstr();
            }
        }
        s
    }

    /// The raw bytes of this name.
    pub fn as_bstr(&self) -> &BStr {
        self.0.as_bstr()
    }

    /// As a string slice; legal refnames are always ASCII.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("<invalid-utf8>")
    }

    /// The inner byte string.
    pub fn into_inner(self) -> BString {
        self.0
    }
}

impl AsRef<BStr> for RefName {
    fn as_ref(&self) -> &BStr {
        self.0.as_bstr()
    }
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
