use std::fs;
use std::path::Path;

use mailvault_remote::{DirStore, RemoteStore};
use tempfile::TempDir;

fn store(root: &TempDir) -> DirStore {
    DirStore::create(root.path().join("remote")).expect("store")
}

fn seed(dir: &TempDir, rel: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("parent");
    }
    fs::write(&path, content).expect("seed file");
    path
}

fn remote_file(store: &DirStore, rel: &str) -> std::path::PathBuf {
    store.root().join(rel)
}

#[test]
fn copy_to_creates_nested_remote_path() {
    let tmp = TempDir::new().expect("tmp");
    let store = store(&tmp);
    let local = seed(&tmp, "local/mail.eml", "body");

    store.copy_to(&local, "2024/folder/message.eml").expect("copy_to");
    let uploaded = remote_file(&store, "2024/folder/message.eml");
    assert_eq!(fs::read_to_string(uploaded).expect("read"), "body");
}

#[test]
fn fetch_is_false_for_absent_object() {
    let tmp = TempDir::new().expect("tmp");
    let store = store(&tmp);
    let dest = tmp.path().join("out/mail.eml");

    assert!(!store.fetch("missing/message.eml", &dest).expect("fetch"));
    assert!(!dest.exists());

    let local = seed(&tmp, "local/mail.eml", "hello");
    store.copy_to(&local, "a/message.eml").expect("copy_to");
    assert!(store.fetch("a/message.eml", &dest).expect("fetch"));
    assert_eq!(fs::read_to_string(&dest).expect("read"), "hello");
}

#[test]
fn move_to_replaces_destination() {
    let tmp = TempDir::new().expect("tmp");
    let store = store(&tmp);
    let local = seed(&tmp, "l/a.txt", "new");
    store.copy_to(&local, "stage/a.tmp").expect("copy_to");
    let old = seed(&tmp, "l/old.txt", "old");
    store.copy_to(&old, "final/a.txt").expect("copy_to old");

    store.move_to("stage/a.tmp", "final/a.txt").expect("move_to");
    assert!(!remote_file(&store, "stage/a.tmp").exists(), "source must be gone");
    assert_eq!(
        fs::read_to_string(remote_file(&store, "final/a.txt")).expect("read"),
        "new"
    );
}

#[test]
fn cat_returns_bytes_or_none() {
    let tmp = TempDir::new().expect("tmp");
    let store = store(&tmp);
    assert!(store.cat("nope.csv").expect("cat").is_none());

    let local = seed(&tmp, "l/m.csv", "x,y\n");
    store.copy_to(&local, "m.csv").expect("copy_to");
    assert_eq!(store.cat("m.csv").expect("cat"), Some(b"x,y\n".to_vec()));
}

#[test]
fn delete_is_idempotent() {
    let tmp = TempDir::new().expect("tmp");
    let store = store(&tmp);
    let local = seed(&tmp, "l/x", "x");
    store.copy_to(&local, "x").expect("copy_to");

    store.delete("x").expect("delete");
    assert!(!store.exists("x").expect("exists"));
    store.delete("x").expect("second delete is fine");
}

#[test]
fn list_and_hashsum_respect_the_glob() {
    let tmp = TempDir::new().expect("tmp");
    let store = store(&tmp);
    for (rel, content) in [
        ("2023/a/message.eml", "one"),
        ("2023/a/metadata.json", "{}"),
        ("2024/b/message.eml", "two"),
        ("manifest.csv", "h,p\n"),
    ] {
        let local = seed(&tmp, &format!("l/{}", rel.replace('/', "_")), content);
        store.copy_to(&local, rel).expect("copy_to");
    }

    let mails = store.list("**/message.eml").expect("list");
    assert_eq!(mails, vec!["2023/a/message.eml".to_owned(), "2024/b/message.eml".to_owned()]);

    let sums = store.hashsum("**/message.eml").expect("hashsum").expect("supported");
    assert_eq!(sums.len(), 2);
    assert!(sums.contains_key("2023/a/message.eml"));
    // sha256 of "one"
    assert_eq!(
        sums["2023/a/message.eml"],
        "7692c3ad3540bb803c020b3aee66cd8887123234ea0c6e7143c0add73ff431ed"
    );
}

#[test]
fn fetch_tree_honors_exclude_and_reports_missing_prefix() {
    let tmp = TempDir::new().expect("tmp");
    let store = store(&tmp);
    for rel in [
        "2020/a/message.eml",
        "2020/a/metadata.json",
        "2020/_archives/messages_2020.tar.zst",
    ] {
        let local = seed(&tmp, &format!("l/{}", rel.replace('/', "_")), rel);
        store.copy_to(&local, rel).expect("copy_to");
    }

    let dest = tmp.path().join("pulled");
    assert!(store.fetch_tree("2020", &dest, Some("_archives/**")).expect("fetch_tree"));
    assert!(dest.join("a/message.eml").is_file());
    assert!(dest.join("a/metadata.json").is_file());
    assert!(
        !dest.join("_archives").exists(),
        "excluded subtree must not be downloaded"
    );

    let nowhere = tmp.path().join("nowhere");
    assert!(!store.fetch_tree("1999", &nowhere, None).expect("fetch_tree missing"));
}

#[test]
fn push_tree_keeps_only_included_paths() {
    let tmp = TempDir::new().expect("tmp");
    let store = store(&tmp);
    let tree = tmp.path().join("merged");
    for rel in ["a/message.eml", "a/metadata.json", "b/metadata.json"] {
        let path = tree.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("dirs");
        fs::write(&path, rel).expect("write");
    }

    store.push_tree(&tree, "2020", Some("**/metadata.json")).expect("push_tree");
    assert!(remote_file(&store, "2020/a/metadata.json").is_file());
    assert!(remote_file(&store, "2020/b/metadata.json").is_file());
    assert!(
        !remote_file(&store, "2020/a/message.eml").exists(),
        "non-matching files must not be pushed"
    );
}

#[test]
fn push_tree_of_missing_source_is_an_error() {
    let tmp = TempDir::new().expect("tmp");
    let store = store(&tmp);
    let err = store.push_tree(Path::new("/definitely/not/here"), "x", None).unwrap_err();
    assert!(matches!(err, mailvault_remote::RemoteError::Io { .. }), "got: {err}");
}
