//! Symbolic-reference resolution.
//!
//! Follows `ref: <target>` chains through a single-hop reader, bounded at
//! [`MAX_SYMREF_DEPTH`] hops. Cycles hit the same bound and fail identically.

use bstr::{BStr, BString, ByteSlice};
use silt_hash::ObjectId;

use crate::backend::RawRef;
use crate::error::RefError;
use crate::name::{check_refname_format, refname_is_safe, CheckFlags};

/// Maximum number of symbolic hops a resolution may take.
pub const MAX_SYMREF_DEPTH: usize = 5;

bitflags::bitflags! {
    /// Caller-supplied flags for resolution.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ResolveFlags: u32 {
        /// A missing leaf is a hard failure, not a zero OID.
        const READING = 0x01;
        /// Stop after the first hop, returning the symbolic target with a
        /// zeroed OID.
        const NO_RECURSE = 0x02;
        /// A syntactically invalid starting name may still resolve if it is
        /// safe.
        const ALLOW_BAD_NAME = 0x04;
    }
}

bitflags::bitflags! {
    /// Flags reported back to resolution and iteration callers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RefFlags: u32 {
        /// The returned name is an unfollowed symbolic target.
        const ISSYMREF = 0x01;
        /// The value was unparseable, a symbolic target was invalid, or a
        /// leaf held the null OID.
        const ISBROKEN = 0x02;
        /// The name failed validation but was accepted leniently.
        const BAD_NAME = 0x04;
    }
}

/// The outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRef {
    /// The leaf refname (or the unfollowed target under `NO_RECURSE`).
    pub name: BString,
    /// The leaf OID; zero when the leaf is missing or unfollowed.
    pub oid: ObjectId,
    pub flags: RefFlags,
}

/// Resolve `name` through `read`, a single-hop reader in the shape of
/// [`crate::backend::RefBackend::read_raw_ref`].
///
/// Flag bits accumulate across hops; `ISSYMREF` is set only when a symbolic
/// target is returned unresolved.
pub fn resolve_raw<F>(
    mut read: F,
    name: &BStr,
    rflags: ResolveFlags,
) -> Result<ResolvedRef, RefError>
where
    F: FnMut(&BStr) -> Result<Option<RawRef>, RefError>,
{
    let mut flags = RefFlags::empty();
    let mut bad_name = false;

    if !check_refname_format(name, CheckFlags::ALLOW_ONELEVEL) {
        flags |= RefFlags::BAD_NAME;
        if !rflags.contains(ResolveFlags::ALLOW_BAD_NAME) || !refname_is_safe(name) {
            return Err(RefError::BadName(name.to_str_lossy().into_owned()));
        }
        // The ref may be missing rather than broken; defer ISBROKEN until we
        // know it exists.
        bad_name = true;
    }

    let mut refname = BString::from(name.as_bytes());

    for _ in 0..=MAX_SYMREF_DEPTH {
        let raw = match read(refname.as_bstr()) {
            Ok(raw) => raw,
            Err(RefError::Broken(_)) if !rflags.contains(ResolveFlags::READING) => {
                flags |= RefFlags::ISBROKEN;
                return Ok(ResolvedRef {
                    name: refname,
                    oid: ObjectId::NULL,
                    flags,
                });
            }
            Err(e) => return Err(e),
        };

        match raw {
            None => {
                if bad_name {
                    flags |= RefFlags::ISBROKEN;
                }
                if rflags.contains(ResolveFlags::READING) {
                    return Err(RefError::NotFound(refname.to_string()));
                }
                return Ok(ResolvedRef {
                    name: refname,
                    oid: ObjectId::NULL,
                    flags,
                });
            }
            Some(RawRef::Object(oid)) => {
                if bad_name {
                    flags |= RefFlags::ISBROKEN;
                    return Ok(ResolvedRef {
                        name: refname,
                        oid: ObjectId::NULL,
                        flags,
                    });
                }
                if oid.is_null() {
                    flags |= RefFlags::ISBROKEN;
                }
                return Ok(ResolvedRef {
                    name: refname,
                    oid,
                    flags,
                });
            }
            Some(RawRef::Symbolic(target)) => {
                if rflags.contains(ResolveFlags::NO_RECURSE) {
                    flags |= RefFlags::ISSYMREF;
                    return Ok(ResolvedRef {
                        name: target,
                        oid: ObjectId::NULL,
                        flags,
                    });
                }
                if !check_refname_format(target.as_bstr(), CheckFlags::ALLOW_ONELEVEL) {
                    flags |= RefFlags::ISBROKEN | RefFlags::BAD_NAME;
                    if rflags.contains(ResolveFlags::READING)
                        || !refname_is_safe(target.as_bstr())
                    {
                        return Err(RefError::Broken(format!(
                            "invalid symref target '{}' in {}",
                            target.to_str_lossy(),
                            refname.to_str_lossy()
                        )));
                    }
                    bad_name = true;
                }
                refname = target;
            }
        }
    }

    Err(RefError::TooDeep(name.to_str_lossy().into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const OID: &str = "1111111111111111111111111111111111111111";

    fn store(entries: &[(&str, RawRef)]) -> HashMap<BString, RawRef> {
        entries
            .iter()
            .map(|(k, v)| (BString::from(*k), v.clone()))
            .collect()
    }

    fn read_from(
        map: &HashMap<BString, RawRef>,
    ) -> impl FnMut(&BStr) -> Result<Option<RawRef>, RefError> + '_ {
        move |name: &BStr| Ok(map.get(name.as_bytes()).cloned())
    }

    fn oid() -> ObjectId {
        ObjectId::from_hex(OID).unwrap()
    }

    #[test]
    fn direct_ref() {
        let map = store(&[("refs/heads/main", RawRef::Object(oid()))]);
        let r = resolve_raw(
            read_from(&map),
            b"refs/heads/main".into(),
            ResolveFlags::READING,
        )
        .unwrap();
        assert_eq!(r.name, "refs/heads/main");
        assert_eq!(r.oid, oid());
        assert_eq!(r.flags, RefFlags::empty());
    }

    #[test]
    fn follows_symref_chain() {
        let map = store(&[
            ("HEAD", RawRef::Symbolic(BString::from("refs/heads/main"))),
            ("refs/heads/main", RawRef::Object(oid())),
        ]);
        let r = resolve_raw(read_from(&map), b"HEAD".into(), ResolveFlags::empty()).unwrap();
        assert_eq!(r.name, "refs/heads/main");
        assert_eq!(r.oid, oid());
        assert_eq!(r.flags, RefFlags::empty());
    }

    #[test]
    fn no_recurse_stops_at_first_hop() {
        let map = store(&[
            ("HEAD", RawRef::Symbolic(BString::from("refs/heads/main"))),
            ("refs/heads/main", RawRef::Object(oid())),
        ]);
        let r = resolve_raw(read_from(&map), b"HEAD".into(), ResolveFlags::NO_RECURSE).unwrap();
        assert_eq!(r.name, "refs/heads/main");
        assert!(r.oid.is_null());
        assert_eq!(r.flags, RefFlags::ISSYMREF);
    }

    #[test]
    fn missing_leaf_reading_fails() {
        let map = store(&[]);
        let err = resolve_raw(
            read_from(&map),
            b"refs/heads/gone".into(),
            ResolveFlags::READING,
        )
        .unwrap_err();
        assert!(matches!(err, RefError::NotFound(_)));
    }

    #[test]
    fn missing_leaf_without_reading_returns_zero() {
        let map = store(&[("HEAD", RawRef::Symbolic(BString::from("refs/heads/unborn")))]);
        let r = resolve_raw(read_from(&map), b"HEAD".into(), ResolveFlags::empty()).unwrap();
        assert_eq!(r.name, "refs/heads/unborn");
        assert!(r.oid.is_null());
        assert_eq!(r.flags, RefFlags::empty());
    }

    #[test]
    fn five_hops_resolve_six_fail() {
        // a5 -> a4 -> ... -> a0 (direct): five symbolic hops.
        let mut entries = vec![("refs/x/a0", RawRef::Object(oid()))];
        let names = ["refs/x/a0", "refs/x/a1", "refs/x/a2", "refs/x/a3", "refs/x/a4", "refs/x/a5", "refs/x/a6"];
        for i in 1..=6 {
            entries.push((names[i], RawRef::Symbolic(BString::from(names[i - 1]))));
        }
        let map = store(&entries);

        let r = resolve_raw(read_from(&map), b"refs/x/a5".into(), ResolveFlags::empty()).unwrap();
        assert_eq!(r.oid, oid());

        let err =
            resolve_raw(read_from(&map), b"refs/x/a6".into(), ResolveFlags::empty()).unwrap_err();
        assert!(matches!(err, RefError::TooDeep(_)));
    }

    #[test]
    fn cycle_reports_too_deep() {
        let map = store(&[
            ("refs/x/a", RawRef::Symbolic(BString::from("refs/x/b"))),
            ("refs/x/b", RawRef::Symbolic(BString::from("refs/x/a"))),
        ]);
        let err =
            resolve_raw(read_from(&map), b"refs/x/a".into(), ResolveFlags::empty()).unwrap_err();
        assert!(matches!(err, RefError::TooDeep(_)));
    }

    #[test]
    fn null_oid_leaf_is_broken() {
        let map = store(&[("refs/heads/z", RawRef::Object(ObjectId::NULL))]);
        let r = resolve_raw(
            read_from(&map),
            b"refs/heads/z".into(),
            ResolveFlags::empty(),
        )
        .unwrap();
        assert!(r.flags.contains(RefFlags::ISBROKEN));
    }

    #[test]
    fn invalid_target_fails_in_reading_mode() {
        let map = store(&[(
            "refs/heads/bad",
            RawRef::Symbolic(BString::from("not a valid name")),
        )]);
        let err = resolve_raw(
            read_from(&map),
            b"refs/heads/bad".into(),
            ResolveFlags::READING,
        )
        .unwrap_err();
        assert!(matches!(err, RefError::Broken(_)));
    }

    #[test]
    fn bad_starting_name_needs_allowance() {
        let map = store(&[("FETCH_HEAD", RawRef::Object(oid()))]);
        assert!(resolve_raw(read_from(&map), b"FETCH_HEAD".into(), ResolveFlags::empty()).is_ok());

        let err = resolve_raw(
            read_from(&map),
            b"bad..name".into(),
            ResolveFlags::empty(),
        )
        .unwrap_err();
        assert!(matches!(err, RefError::BadName(_)));
    }

    #[test]
    fn bad_but_safe_name_resolves_leniently() {
        let map = store(&[("refs/foo/../bar", RawRef::Object(oid()))]);
        let r = resolve_raw(
            read_from(&map),
            b"refs/foo/../bar".into(),
            ResolveFlags::ALLOW_BAD_NAME,
        )
        .unwrap();
        // Present but bad-named: reported broken with a zeroed OID.
        assert!(r.flags.contains(RefFlags::BAD_NAME));
        assert!(r.flags.contains(RefFlags::ISBROKEN));
        assert!(r.oid.is_null());
    }
}
