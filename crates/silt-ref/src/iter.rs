//! The iteration facade: prefix walks, name abbreviation, glob filtering,
//! hidden refs, and reflog time travel.

use bstr::{BStr, BString, ByteSlice, ByteVec};
use silt_hash::ObjectId;
use silt_utils::glob::{glob_match, has_glob_specials};

use crate::backend::{EachRefFn, IterFlags, RefBackend};
use crate::error::RefError;
use crate::name::RefKind;
use crate::resolve::{RefFlags, ResolveFlags};
use crate::store::RefStore;

/// The fixed lookup rules for short ref names, in precedence order. `{}`
/// is the short name.
const REF_REV_PARSE_RULES: [&str; 6] = [
    "{}",
    "refs/{}",
    "refs/tags/{}",
    "refs/heads/{}",
    "refs/remotes/{}",
    "refs/remotes/{}/HEAD",
];

fn apply_rule(rule: &str, short: &BStr) -> BString {
    let mut out = BString::from("");
    let mut parts = rule.split("{}");
    out.push_str(parts.next().unwrap_or(""));
    out.push_str(short.as_bytes());
    out.push_str(parts.next().unwrap_or(""));
    out
}

/// Strip a rule from a full name, recovering the short form if the rule
/// shape matches.
fn unapply_rule<'a>(rule: &str, full: &'a BStr) -> Option<&'a BStr> {
    let mut parts = rule.split("{}");
    let prefix = parts.next().unwrap_or("");
    let suffix = parts.next().unwrap_or("");
    let rest = full.as_bytes().strip_prefix(prefix.as_bytes())?;
    let short = rest.strip_suffix(suffix.as_bytes())?;
    if short.is_empty() {
        return None;
    }
    Some(short.as_bstr())
}

impl RefStore {
    /// Walk refs under `base` in ascending name order, trimming `trim`
    /// leading bytes before invoking `f`. A non-zero return from `f` stops
    /// the walk and becomes the result.
    pub fn for_each_ref_full(
        &self,
        base: &BStr,
        trim: usize,
        flags: IterFlags,
        f: &mut EachRefFn<'_>,
    ) -> Result<i32, RefError> {
        if !self.split() {
            return self.backend().for_each_ref(base, trim, flags, f);
        }

        // With a split store the per-worktree subtree lives in the files
        // backend; merge it into the walk in name order.
        let base_owned = BString::from(if base.is_empty() {
            b"refs/".as_ref()
        } else {
            base.as_bytes()
        });
        let mut merged: Vec<(BString, ObjectId, RefFlags)> = Vec::new();

        {
            let mut push = |name: &BStr, oid: &ObjectId, rf: RefFlags| {
                merged.push((BString::from(name.as_bytes()), *oid, rf));
                0
            };
            self.backend()
                .for_each_ref(base_owned.as_bstr(), 0, flags, &mut push)?;
        }

        let worktree_base: Option<BString> = {
            let bisect = b"refs/bisect/";
            if bisect.starts_with(base_owned.as_bytes()) {
                Some(BString::from(bisect.as_ref()))
            } else if base_owned.starts_with(bisect) {
                Some(base_owned.clone())
            } else {
                None
            }
        };
        if let Some(wt_base) = worktree_base {
            let mut push = |name: &BStr, oid: &ObjectId, rf: RefFlags| {
                merged.push((BString::from(name.as_bytes()), *oid, rf));
                0
            };
            self.files_backend()
                .for_each_ref(wt_base.as_bstr(), 0, flags, &mut push)?;
        }

        merged.sort_by(|a, b| a.0.cmp(&b.0));
        merged.dedup_by(|a, b| a.0 == b.0);

        for (name, oid, rf) in merged {
            let shown = name[trim.min(name.len())..].as_bstr();
            let ret = f(shown, &oid, rf);
            if ret != 0 {
                return Ok(ret);
            }
        }
        Ok(0)
    }

    /// Walk every ref under `refs/`.
    pub fn for_each_ref(&self, f: &mut EachRefFn<'_>) -> Result<i32, RefError> {
        self.for_each_ref_full(b"refs/".as_bstr(), 0, IterFlags::empty(), f)
    }

    /// Walk refs under a prefix, trimming the prefix before the callback.
    pub fn for_each_ref_in(&self, prefix: &BStr, f: &mut EachRefFn<'_>) -> Result<i32, RefError> {
        self.for_each_ref_full(prefix, prefix.len(), IterFlags::empty(), f)
    }

    pub fn for_each_tag_ref(&self, f: &mut EachRefFn<'_>) -> Result<i32, RefError> {
        self.for_each_ref_in(b"refs/tags/".as_bstr(), f)
    }

    pub fn for_each_branch_ref(&self, f: &mut EachRefFn<'_>) -> Result<i32, RefError> {
        self.for_each_ref_in(b"refs/heads/".as_bstr(), f)
    }

    pub fn for_each_remote_ref(&self, f: &mut EachRefFn<'_>) -> Result<i32, RefError> {
        self.for_each_ref_in(b"refs/remotes/".as_bstr(), f)
    }

    /// Walk `refs/replace/`, trimming the prefix.
    pub fn for_each_replace_ref(&self, f: &mut EachRefFn<'_>) -> Result<i32, RefError> {
        self.for_each_ref_in(b"refs/replace/".as_bstr(), f)
    }

    /// Walk every ref including broken ones.
    pub fn for_each_rawref(&self, f: &mut EachRefFn<'_>) -> Result<i32, RefError> {
        self.for_each_ref_full(b"refs/".as_bstr(), 0, IterFlags::INCLUDE_BROKEN, f)
    }

    /// Walk the active namespace's refs (`refs/namespaces/<ns>/refs/`),
    /// names reported in full.
    pub fn for_each_namespaced_ref(&self, f: &mut EachRefFn<'_>) -> Result<i32, RefError> {
        let base = match &self.namespace {
            Some(ns) => BString::from(format!("refs/namespaces/{}/refs/", ns)),
            None => BString::from("refs/"),
        };
        self.for_each_ref_full(base.as_bstr(), 0, IterFlags::empty(), f)
    }

    /// Invoke `f` on HEAD when it resolves.
    pub fn head_ref(&self, f: &mut EachRefFn<'_>) -> Result<i32, RefError> {
        match self.resolve(b"HEAD".as_bstr(), ResolveFlags::READING) {
            Ok(res) => Ok(f(b"HEAD".as_bstr(), &res.oid, res.flags)),
            Err(RefError::NotFound(_)) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Resolve the active namespace's HEAD.
    pub fn head_ref_namespaced(&self, f: &mut EachRefFn<'_>) -> Result<i32, RefError> {
        let name = match &self.namespace {
            Some(ns) => BString::from(format!("refs/namespaces/{}/HEAD", ns)),
            None => BString::from("HEAD"),
        };
        match self.resolve(name.as_bstr(), ResolveFlags::READING) {
            Ok(res) => Ok(f(name.as_bstr(), &res.oid, res.flags)),
            Err(RefError::NotFound(_)) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Walk refs matching a glob pattern, optionally anchored at `prefix`.
    /// A pattern without glob specials gets an implied `/*` appended.
    pub fn for_each_glob_ref_in(
        &self,
        pattern: &BStr,
        prefix: Option<&BStr>,
        f: &mut EachRefFn<'_>,
    ) -> Result<i32, RefError> {
        let mut real_pattern = BString::from("");
        match prefix {
            None if !pattern.starts_with(b"refs/") => real_pattern.push_str("refs/"),
            None => {}
            Some(p) => real_pattern.push_str(p.as_bytes()),
        }
        real_pattern.push_str(pattern.as_bytes());

        if !has_glob_specials(pattern) {
            // Append an implied '/' '*' if not present.
            if real_pattern.last() != Some(&b'/') {
                real_pattern.push(b'/');
            }
            real_pattern.push(b'*');
        }

        self.for_each_ref(&mut |name: &BStr, oid: &ObjectId, rf: RefFlags| {
            if glob_match(real_pattern.as_bstr(), name) {
                f(name, oid, rf)
            } else {
                0
            }
        })
    }

    pub fn for_each_glob_ref(
        &self,
        pattern: &BStr,
        f: &mut EachRefFn<'_>,
    ) -> Result<i32, RefError> {
        self.for_each_glob_ref_in(pattern, None, f)
    }

    // Short-name handling.

    /// Find what a short name means: try each lookup rule in order and
    /// return the first ref that resolves. With ambiguity warnings enabled,
    /// later matches are reported but the first still wins.
    pub fn dwim_ref(
        &self,
        short: &BStr,
    ) -> Result<Option<crate::resolve::ResolvedRef>, RefError> {
        let mut found: Option<crate::resolve::ResolvedRef> = None;
        for rule in REF_REV_PARSE_RULES {
            let full = apply_rule(rule, short);
            match self.resolve(full.as_bstr(), ResolveFlags::READING) {
                Ok(res) => {
                    if let Some(first) = &found {
                        tracing::warn!(
                            "refname '{}' is ambiguous: using '{}', ignoring '{}'",
                            short.to_str_lossy(),
                            first.name.to_str_lossy(),
                            full.to_str_lossy()
                        );
                        continue;
                    }
                    found = Some(res);
                    if !self.warn_ambiguous_refs {
                        break;
                    }
                }
                Err(RefError::Broken(_)) if full.find_byte(b'/').is_some() => {
                    tracing::warn!("ignoring broken ref {}", full.to_str_lossy());
                }
                Err(_) => {}
            }
        }
        Ok(found)
    }

    /// Like [`RefStore::dwim_ref`], but the match must also have a reflog.
    pub fn dwim_log(&self, short: &BStr) -> Result<Option<BString>, RefError> {
        for rule in REF_REV_PARSE_RULES {
            let full = apply_rule(rule, short);
            let Ok(res) = self.resolve(full.as_bstr(), ResolveFlags::READING) else {
                continue;
            };
            if self.reflog_exists(full.as_bstr())? {
                return Ok(Some(full));
            }
            if res.name != full && self.reflog_exists(res.name.as_bstr())? {
                return Ok(Some(res.name));
            }
        }
        Ok(None)
    }

    /// The shortest abbreviation of `name` that still resolves back to it
    /// unambiguously. In strict mode every other rule must fail to resolve
    /// the candidate; otherwise only rules of higher precedence are
    /// checked.
    pub fn shorten_unambiguous_ref(&self, name: &BStr, strict: bool) -> BString {
        let nr_rules = REF_REV_PARSE_RULES.len();
        // Skip rule 0; it always matches.
        for i in (1..nr_rules).rev() {
            let Some(short) = unapply_rule(REF_REV_PARSE_RULES[i], name) else {
                continue;
            };
            let rules_to_fail = if strict { nr_rules } else { i };

            let ambiguous = (0..rules_to_fail).any(|j| {
                if j == i {
                    return false;
                }
                let candidate = apply_rule(REF_REV_PARSE_RULES[j], short);
                self.ref_exists(candidate.as_bstr()).unwrap_or(false)
            });
            if !ambiguous {
                return BString::from(short.as_bytes());
            }
        }
        BString::from(name.as_bytes())
    }

    // Hidden refs.

    /// Accumulate a `hiderefs` configuration entry. `var` must be
    /// `transfer.hiderefs` or `<section>.hiderefs`.
    pub fn parse_hide_refs_config(
        &mut self,
        var: &str,
        value: &str,
        section: &str,
    ) -> Result<(), RefError> {
        if var != "transfer.hiderefs" && var != format!("{}.hiderefs", section) {
            return Ok(());
        }
        let mut pattern = BString::from(value);
        while pattern.last() == Some(&b'/') {
            let new_len = pattern.len() - 1;
            pattern.truncate(new_len);
        }
        if pattern.is_empty() {
            return Err(RefError::Generic(format!("missing value for '{}'", var)));
        }
        self.hide_patterns.push(pattern);
        Ok(())
    }

    /// Is a ref hidden from transfer? `refname` is the possibly
    /// namespace-stripped name; `full_refname` the on-storage name matched
    /// by `^`-anchored patterns. Later patterns override earlier ones; a
    /// leading `!` negates.
    pub fn ref_is_hidden(&self, refname: &BStr, full_refname: &BStr) -> bool {
        for pattern in self.hide_patterns.iter().rev() {
            let mut pattern = pattern.as_bstr();
            let mut hide = true;
            if let Some(rest) = pattern.strip_prefix(b"!") {
                hide = false;
                pattern = rest.as_bstr();
            }
            let subject = match pattern.strip_prefix(b"^") {
                Some(rest) => {
                    pattern = rest.as_bstr();
                    full_refname
                }
                None => refname,
            };
            if subject == pattern
                || (subject.starts_with(pattern.as_bytes())
                    && subject.get(pattern.len()) == Some(&b'/'))
            {
                return hide;
            }
        }
        false
    }

    // Reflog time travel.

    /// The value a ref had `n` writes ago (`@{n}`): 0 is the current value.
    pub fn ref_at_index(&self, name: &BStr, n: usize) -> Result<Option<ObjectId>, RefError> {
        let mut seen = 0usize;
        let mut result = None;
        self.for_each_reflog_ent_reverse(name, &mut |entry| {
            if seen == n {
                result = Some(entry.new_oid);
                return 1;
            }
            seen += 1;
            0
        })?;
        Ok(result)
    }

    /// The value a ref had at a point in time (`@{<date>}`): the newest
    /// entry no newer than `timestamp`. Falls back to the oldest entry's
    /// old value, with a warning, when the log does not reach back that
    /// far.
    pub fn ref_at_time(&self, name: &BStr, timestamp: i64) -> Result<Option<ObjectId>, RefError> {
        let mut result: Option<ObjectId> = None;
        let mut newer_old: Option<ObjectId> = None;
        self.for_each_reflog_ent_reverse(name, &mut |entry| {
            if entry.identity.date.timestamp <= timestamp {
                if let Some(expected) = newer_old {
                    if expected != entry.new_oid {
                        tracing::warn!(
                            "log for ref {} has gap after {}",
                            name.to_str_lossy(),
                            entry.identity.date.timestamp
                        );
                    }
                }
                result = Some(entry.new_oid);
                return 1;
            }
            newer_old = Some(entry.old_oid);
            0
        })?;

        if result.is_none() {
            // The log does not reach back to `timestamp`; use the state
            // before the oldest entry.
            let mut oldest: Option<crate::reflog::ReflogEntry> = None;
            self.for_each_reflog_ent(name, &mut |entry| {
                oldest = Some(entry.clone());
                1
            })?;
            if let Some(entry) = oldest {
                tracing::warn!(
                    "log for ref {} only goes back to {}",
                    name.to_str_lossy(),
                    entry.identity.date.timestamp
                );
                result = Some(if entry.old_oid.is_null() {
                    entry.new_oid
                } else {
                    entry.old_oid
                });
            }
        }
        Ok(result)
    }

    // Diagnostics.

    /// Refs whose symbolic target does not exist. Each one is also
    /// reported on the warning stream.
    pub fn dangling_symrefs(&self) -> Result<Vec<BString>, RefError> {
        let mut names: Vec<BString> = Vec::new();
        self.for_each_rawref(&mut |name: &BStr, _oid: &ObjectId, _rf: RefFlags| {
            names.push(BString::from(name.as_bytes()));
            0
        })?;

        let mut dangling = Vec::new();
        for name in names {
            if RefKind::of(name.as_bstr()) != RefKind::Normal {
                continue;
            }
            let Ok(Some(crate::backend::RawRef::Symbolic(_))) = self.read_raw(name.as_bstr())
            else {
                continue;
            };
            if let Err(RefError::NotFound(_)) =
                self.resolve(name.as_bstr(), ResolveFlags::READING)
            {
                tracing::warn!("{} becomes dangling", name.to_str_lossy());
                dangling.push(name);
            }
        }
        Ok(dangling)
    }
}
