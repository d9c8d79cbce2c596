//! Transaction scenarios: create, CAS update, delete, conflicts, and the
//! symref dereference pass — run against both backends.

use bstr::{BString, ByteSlice};
use silt_hash::ObjectId;
use silt_ref::{RawRef, RefError, RefStore, ResolveFlags, UpdateFlags};
use silt_utils::date::{Signature, SiltDate};

const BACKENDS: [&str; 2] = ["files", "redb"];

fn test_identity() -> Signature {
    Signature {
        name: BString::from("Test User"),
        email: BString::from("test@example.com"),
        date: SiltDate::new(1234567890, 0),
    }
}

fn store_with(backend: &str) -> (tempfile::TempDir, RefStore) {
    let dir = tempfile::tempdir().unwrap();
    let mut store = RefStore::open_with_backend(dir.path(), backend).unwrap();
    store.init_db().unwrap();
    store.set_identity(test_identity());
    (dir, store)
}

fn oid(c: char) -> ObjectId {
    ObjectId::from_hex(c.to_string().repeat(40)).unwrap()
}

#[test]
fn create_then_read() {
    for backend in BACKENDS {
        let (_dir, store) = store_with(backend);
        let value = ObjectId::from_hex("1111111111111111111111111111111111111111").unwrap();

        let mut tx = store.begin_transaction();
        tx.create("refs/heads/main", value, UpdateFlags::empty(), Some("created"))
            .unwrap();
        let outcome = store.commit(&mut tx).unwrap();
        assert!(outcome.warnings.is_empty());

        let res = store
            .resolve(b"refs/heads/main".as_bstr(), ResolveFlags::READING)
            .unwrap();
        assert_eq!(res.name, "refs/heads/main");
        assert_eq!(res.oid, value);
        assert!(res.flags.is_empty());
    }
}

#[test]
fn cas_failure_leaves_ref_unchanged() {
    for backend in BACKENDS {
        let (_dir, store) = store_with(backend);
        store
            .update_ref("setup", "refs/heads/r", Some(oid('a')), None, UpdateFlags::empty())
            .unwrap();

        let err = store
            .update_ref(
                "should fail",
                "refs/heads/r",
                Some(oid('b')),
                Some(oid('c')),
                UpdateFlags::empty(),
            )
            .unwrap_err();
        assert!(matches!(err, RefError::CasMismatch { .. }), "{backend}: {err}");
        assert_eq!(
            store.read_ref(b"refs/heads/r".as_bstr()).unwrap(),
            Some(oid('a'))
        );
    }
}

#[test]
fn create_on_existing_ref_fails() {
    for backend in BACKENDS {
        let (_dir, store) = store_with(backend);
        store
            .update_ref("setup", "refs/heads/r", Some(oid('a')), None, UpdateFlags::empty())
            .unwrap();

        let mut tx = store.begin_transaction();
        tx.create("refs/heads/r", oid('b'), UpdateFlags::empty(), None)
            .unwrap();
        let err = store.commit(&mut tx).unwrap_err();
        assert!(matches!(err, RefError::AlreadyExists { .. }));
        assert_eq!(
            store.read_ref(b"refs/heads/r".as_bstr()).unwrap(),
            Some(oid('a'))
        );
    }
}

#[test]
fn delete_with_wrong_old_fails() {
    for backend in BACKENDS {
        let (_dir, store) = store_with(backend);
        store
            .update_ref("setup", "refs/heads/r", Some(oid('a')), None, UpdateFlags::empty())
            .unwrap();

        let err = store
            .delete_ref("refs/heads/r", Some(oid('b')), UpdateFlags::empty())
            .unwrap_err();
        assert!(matches!(err, RefError::CasMismatch { .. }));
        assert_eq!(
            store.read_ref(b"refs/heads/r".as_bstr()).unwrap(),
            Some(oid('a'))
        );

        store
            .delete_ref("refs/heads/r", Some(oid('a')), UpdateFlags::empty())
            .unwrap();
        assert_eq!(store.read_ref(b"refs/heads/r".as_bstr()).unwrap(), None);
    }
}

#[test]
fn duplicate_name_in_transaction_fails_before_storage() {
    for backend in BACKENDS {
        let (_dir, store) = store_with(backend);

        let mut tx = store.begin_transaction();
        tx.create("refs/heads/other", oid('a'), UpdateFlags::empty(), None)
            .unwrap();
        tx.create("refs/heads/dup", oid('b'), UpdateFlags::empty(), None)
            .unwrap();
        tx.update(
            "refs/heads/dup",
            Some(oid('c')),
            None,
            UpdateFlags::empty(),
            None,
        )
        .unwrap();

        let err = store.commit(&mut tx).unwrap_err();
        assert!(matches!(err, RefError::Generic(_)));
        // Nothing was written, including the non-duplicated name.
        assert_eq!(store.read_ref(b"refs/heads/other".as_bstr()).unwrap(), None);
    }
}

#[test]
fn verify_only_update() {
    for backend in BACKENDS {
        let (_dir, store) = store_with(backend);
        store
            .update_ref("setup", "refs/heads/r", Some(oid('a')), None, UpdateFlags::empty())
            .unwrap();

        let mut tx = store.begin_transaction();
        tx.verify("refs/heads/r", oid('a'), UpdateFlags::empty())
            .unwrap();
        store.commit(&mut tx).unwrap();

        let mut tx = store.begin_transaction();
        tx.verify("refs/heads/r", oid('b'), UpdateFlags::empty())
            .unwrap();
        assert!(store.commit(&mut tx).is_err());

        // The null OID verifies absence.
        let mut tx = store.begin_transaction();
        tx.verify("refs/heads/absent", ObjectId::NULL, UpdateFlags::empty())
            .unwrap();
        store.commit(&mut tx).unwrap();
    }
}

#[test]
fn directory_file_conflicts() {
    for backend in BACKENDS {
        let (_dir, store) = store_with(backend);
        store
            .update_ref("setup", "refs/foo", Some(oid('a')), None, UpdateFlags::empty())
            .unwrap();

        let mut tx = store.begin_transaction();
        tx.create("refs/foo/bar", oid('b'), UpdateFlags::empty(), None)
            .unwrap();
        let err = store.commit(&mut tx).unwrap_err();
        assert!(matches!(err, RefError::NameConflict { .. }), "{backend}: {err}");

        let (_dir2, store2) = store_with(backend);
        store2
            .update_ref("setup", "refs/foo/bar", Some(oid('a')), None, UpdateFlags::empty())
            .unwrap();
        let mut tx = store2.begin_transaction();
        tx.create("refs/foo", oid('b'), UpdateFlags::empty(), None)
            .unwrap();
        let err = store2.commit(&mut tx).unwrap_err();
        assert!(matches!(err, RefError::NameConflict { .. }), "{backend}: {err}");
    }
}

#[test]
fn update_through_symref_moves_the_leaf() {
    for backend in BACKENDS {
        let (_dir, store) = store_with(backend);
        store
            .update_ref("setup", "refs/heads/main", Some(oid('a')), None, UpdateFlags::empty())
            .unwrap();
        store
            .create_symref(b"HEAD".as_bstr(), b"refs/heads/main".as_bstr(), None)
            .unwrap();

        store
            .update_ref(
                "commit: move",
                "HEAD",
                Some(oid('b')),
                Some(oid('a')),
                UpdateFlags::empty(),
            )
            .unwrap();

        // The leaf moved; HEAD is still symbolic.
        assert_eq!(
            store.read_ref(b"refs/heads/main".as_bstr()).unwrap(),
            Some(oid('b'))
        );
        assert!(matches!(
            store
                .resolve(b"HEAD".as_bstr(), ResolveFlags::NO_RECURSE)
                .unwrap(),
            res if res.name == "refs/heads/main"
        ));

        // Both HEAD and the leaf logged the transition.
        for name in ["HEAD", "refs/heads/main"] {
            let mut seen = Vec::new();
            store
                .for_each_reflog_ent(name.as_bytes().as_bstr(), &mut |entry| {
                    seen.push((entry.old_oid, entry.new_oid));
                    0
                })
                .unwrap();
            assert!(
                seen.contains(&(oid('a'), oid('b'))),
                "{backend}: {name} log missing transition"
            );
        }
    }
}

#[test]
fn noderef_update_detaches_symref() {
    for backend in BACKENDS {
        let (_dir, store) = store_with(backend);
        store
            .update_ref("setup", "refs/heads/main", Some(oid('a')), None, UpdateFlags::empty())
            .unwrap();
        store
            .create_symref(b"HEAD".as_bstr(), b"refs/heads/main".as_bstr(), None)
            .unwrap();

        store
            .update_ref(
                "checkout: detach",
                "HEAD",
                Some(oid('b')),
                None,
                UpdateFlags::NODEREF,
            )
            .unwrap();

        // HEAD itself now holds the OID; the branch is untouched.
        assert!(matches!(
            store.resolve(b"HEAD".as_bstr(), ResolveFlags::READING).unwrap(),
            res if res.name == "HEAD" && res.oid == oid('b')
        ));
        assert_eq!(
            store.read_ref(b"refs/heads/main".as_bstr()).unwrap(),
            Some(oid('a'))
        );
    }
}

#[test]
fn deleting_through_symref_deletes_the_leaf() {
    for backend in BACKENDS {
        let (_dir, store) = store_with(backend);
        store
            .update_ref("setup", "refs/heads/main", Some(oid('a')), None, UpdateFlags::empty())
            .unwrap();
        store
            .create_symref(b"HEAD".as_bstr(), b"refs/heads/main".as_bstr(), None)
            .unwrap();

        store
            .delete_ref("HEAD", Some(oid('a')), UpdateFlags::empty())
            .unwrap();

        assert_eq!(store.read_ref(b"refs/heads/main".as_bstr()).unwrap(), None);
        // HEAD survives as a dangling symref.
        assert!(matches!(
            store.read_raw_public(b"HEAD".as_bstr()),
            Some(RawRef::Symbolic(target)) if target == "refs/heads/main"
        ));
    }
}

// `read_raw` is crate-private; go through resolve with NO_RECURSE instead.
trait ReadRawPublic {
    fn read_raw_public(&self, name: &bstr::BStr) -> Option<RawRef>;
}

impl ReadRawPublic for RefStore {
    fn read_raw_public(&self, name: &bstr::BStr) -> Option<RawRef> {
        match self.resolve(name, ResolveFlags::NO_RECURSE) {
            Ok(res) if res.flags.contains(silt_ref::RefFlags::ISSYMREF) => {
                Some(RawRef::Symbolic(res.name))
            }
            Ok(res) if res.oid.is_null() => None,
            Ok(res) => Some(RawRef::Object(res.oid)),
            Err(_) => None,
        }
    }
}

#[test]
fn initial_commit_populates_fresh_store() {
    for backend in BACKENDS {
        let (_dir, store) = store_with(backend);

        let mut tx = store.begin_transaction();
        tx.create("refs/heads/main", oid('a'), UpdateFlags::empty(), None)
            .unwrap();
        tx.create("refs/tags/v1", oid('b'), UpdateFlags::empty(), None)
            .unwrap();
        store.initial_commit(&mut tx).unwrap();

        assert_eq!(
            store.read_ref(b"refs/heads/main".as_bstr()).unwrap(),
            Some(oid('a'))
        );
        assert_eq!(
            store.read_ref(b"refs/tags/v1".as_bstr()).unwrap(),
            Some(oid('b'))
        );
    }
}

#[test]
#[should_panic(expected = "BUG: commit called for transaction that is not open")]
fn double_commit_is_a_bug() {
    let (_dir, store) = store_with("files");
    let mut tx = store.begin_transaction();
    tx.create("refs/heads/main", oid('a'), UpdateFlags::empty(), None)
        .unwrap();
    store.commit(&mut tx).unwrap();
    let _ = store.commit(&mut tx);
}

#[test]
fn dropping_uncommitted_transaction_changes_nothing() {
    for backend in BACKENDS {
        let (_dir, store) = store_with(backend);
        {
            let mut tx = store.begin_transaction();
            tx.create("refs/heads/main", oid('a'), UpdateFlags::empty(), None)
                .unwrap();
            // Dropped without commit.
        }
        assert_eq!(store.read_ref(b"refs/heads/main".as_bstr()).unwrap(), None);
    }
}

#[test]
fn multi_ref_transaction_commits_together() {
    for backend in BACKENDS {
        let (_dir, store) = store_with(backend);

        let mut tx = store.begin_transaction();
        tx.create("refs/heads/a", oid('a'), UpdateFlags::empty(), None)
            .unwrap();
        tx.create("refs/heads/b", oid('b'), UpdateFlags::empty(), None)
            .unwrap();
        tx.create("refs/tags/v1", oid('c'), UpdateFlags::empty(), None)
            .unwrap();
        store.commit(&mut tx).unwrap();

        for (name, value) in [
            ("refs/heads/a", oid('a')),
            ("refs/heads/b", oid('b')),
            ("refs/tags/v1", oid('c')),
        ] {
            assert_eq!(
                store.read_ref(name.as_bytes().as_bstr()).unwrap(),
                Some(value),
                "{backend}: {name}"
            );
        }
    }
}
