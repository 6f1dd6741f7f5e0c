//! Unit tests for the file-backed naming directory.

use fork_session::directory::NamingDirectory;
use fork_session::ForkError;

fn scratch() -> (tempfile::TempDir, NamingDirectory) {
    let dir = tempfile::tempdir().expect("tempdir");
    let directory = NamingDirectory::open(dir.path()).expect("open scratch directory");
    (dir, directory)
}

// ── bind / lookup ───────────────────────────────────────────────────────────

/// A bound name resolves to its endpoint and records the binding process.
#[test]
fn bind_then_lookup_returns_entry() {
    let (_dir, directory) = scratch();

    directory
        .bind("abc_client", "fork-abc_client.sock")
        .expect("bind must succeed");
    let entry = directory.lookup("abc_client").expect("lookup must succeed");

    assert_eq!(entry.name, "abc_client");
    assert_eq!(entry.endpoint, "fork-abc_client.sock");
    assert_eq!(entry.pid, std::process::id());
}

/// Binding a name twice fails with `NameConflict` and keeps the first entry.
#[test]
fn binding_twice_is_a_conflict() {
    let (_dir, directory) = scratch();

    directory.bind("dup", "first").expect("first bind");
    let err = directory.bind("dup", "second").expect_err("second bind must fail");

    assert!(
        matches!(err, ForkError::NameConflict(_)),
        "expected NameConflict, got {err:?}"
    );
    assert_eq!(directory.lookup("dup").expect("lookup").endpoint, "first");
}

/// Looking up a name nobody bound fails with `NotFound`.
#[test]
fn lookup_of_unbound_name_is_not_found() {
    let (_dir, directory) = scratch();

    let err = directory.lookup("missing").expect_err("lookup must fail");
    assert!(
        matches!(err, ForkError::NotFound(_)),
        "expected NotFound, got {err:?}"
    );
}

/// Names that could escape the directory are refused.
#[test]
fn path_like_names_are_rejected() {
    let (_dir, directory) = scratch();

    for name in ["", "../evil", "a/b", ".hidden"] {
        let err = directory.bind(name, "x").expect_err("bind must fail");
        assert!(
            matches!(err, ForkError::Directory(_)),
            "'{name}' should be rejected, got {err:?}"
        );
    }
}

// ── unbind ──────────────────────────────────────────────────────────────────

/// Unbinding removes the name; unbinding again is a no-op.
#[test]
fn unbind_is_idempotent() {
    let (_dir, directory) = scratch();

    directory.bind("gone", "x").expect("bind");
    directory.unbind("gone").expect("first unbind");
    directory.unbind("gone").expect("second unbind must be a no-op");
    directory
        .unbind("never-bound")
        .expect("unbinding an absent name must be a no-op");

    assert!(matches!(
        directory.lookup("gone"),
        Err(ForkError::NotFound(_))
    ));
}

/// A name can be bound again after it was released.
#[test]
fn name_is_reusable_after_unbind() {
    let (_dir, directory) = scratch();

    directory.bind("again", "one").expect("bind");
    directory.unbind("again").expect("unbind");
    directory.bind("again", "two").expect("rebind");

    assert_eq!(directory.lookup("again").expect("lookup").endpoint, "two");
}

/// An entry written by another process is left alone.
#[test]
fn foreign_entries_are_not_unbound() {
    let (dir, directory) = scratch();

    let foreign = serde_json::json!({
        "name": "theirs",
        "endpoint": "fork-theirs.sock",
        "pid": std::process::id().wrapping_add(1),
        "bound_at": "2024-01-01T00:00:00Z",
    });
    std::fs::write(
        dir.path().join("theirs.json"),
        serde_json::to_vec(&foreign).expect("encode"),
    )
    .expect("write foreign entry");

    let err = directory.unbind("theirs").expect_err("foreign unbind must fail");
    assert!(matches!(err, ForkError::Directory(_)), "got {err:?}");
    assert!(directory.lookup("theirs").is_ok(), "entry must survive");
}

// ── shared access ───────────────────────────────────────────────────────────

/// A second handle on the same root sees entries bound through the first,
/// which is how the worker process finds its controller.
#[test]
fn second_handle_sees_bound_names() {
    let (dir, directory) = scratch();
    let other = NamingDirectory::open(dir.path()).expect("second handle");

    directory.bind("shared_client", "endpoint").expect("bind");
    assert_eq!(
        other.lookup("shared_client").expect("lookup").endpoint,
        "endpoint"
    );
}

/// `entries` lists bound names in order and ignores unrelated files.
#[test]
fn entries_are_sorted_and_filtered() {
    let (dir, directory) = scratch();

    directory.bind("b_server", "2").expect("bind b");
    directory.bind("a_client", "1").expect("bind a");
    std::fs::write(dir.path().join("notes.txt"), "ignore me").expect("write");

    let names: Vec<_> = directory
        .entries()
        .expect("entries")
        .into_iter()
        .map(|entry| entry.name)
        .collect();
    assert_eq!(names, vec!["a_client", "b_server"]);
}

/// Opening a path that is not a directory fails.
#[test]
fn open_requires_existing_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = NamingDirectory::open(dir.path().join("missing")).expect_err("must fail");
    assert!(matches!(err, ForkError::Directory(_)), "got {err:?}");
}

/// A privately created directory disappears with its owner.
#[test]
fn created_directory_is_removed_on_drop() {
    let directory = NamingDirectory::create().expect("create");
    let root = directory.root().to_path_buf();
    assert!(root.is_dir());

    drop(directory);
    assert!(!root.exists(), "owned directory must be removed on drop");
}

/// `create_at` builds missing parents and leaves the directory behind.
#[test]
fn create_at_keeps_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().join("nested").join("names");

    let directory = NamingDirectory::create_at(&root).expect("create_at");
    directory.bind("x", "y").expect("bind");
    drop(directory);

    assert!(root.join("x.json").is_file());
}
