//! Directory creation, cascading renames, conflict names and walks.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use common::{DOMAIN, IndexKind, TestTenant, all_tenants, mkdir, root, upload};
use parking_lot::Mutex;
use tenantfs_vfs::{DirDoc, DocPatch, ErrorKind, StorageLayout, Vfs, VfsError, WalkEntry};

#[tokio::test]
async fn test_mkdir_and_collisions() {
    for (label, tenant) in all_tenants().await {
        let vfs = &tenant.vfs;
        let root = root(vfs).await;

        let docs = mkdir(vfs, &root, "docs").await;
        assert_eq!(docs.fullpath, "/docs", "{label}");

        let err = vfs
            .create_dir(DirDoc::new("docs", root.id.clone()).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists, "{label}");

        let nested = vfs.mkdir_all("/docs/a/b/c").await.unwrap();
        assert_eq!(nested.fullpath, "/docs/a/b/c", "{label}");
        let again = vfs.mkdir_all("/docs/a/b/c").await.unwrap();
        assert_eq!(again.id, nested.id, "{label}");

        let err = vfs.mkdir("/missing/child", Vec::new()).await.unwrap_err();
        assert!(err.is_not_found(), "{label}");

        upload(vfs, &docs, "file", b"x").await;
        let err = vfs.mkdir_all("/docs/file/below").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotADirectory, "{label}");
    }
}

#[tokio::test]
async fn test_invalid_names() {
    let tenant = TestTenant::new(IndexKind::Memory, StorageLayout::Local).await;
    let root = root(&tenant.vfs).await;
    for bad in ["", ".", "..", "a/b", "nul\0byte"] {
        let err = DirDoc::new(bad, root.id.clone()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidName, "{bad:?}");
    }
    let long = "x".repeat(256);
    assert_eq!(DirDoc::new(long, root.id.clone()).unwrap_err().kind(), ErrorKind::InvalidName);
    let err = tenant.vfs.mkdir("relative", Vec::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NonAbsolutePath);
}

#[tokio::test]
async fn test_cascading_rename() {
    for (label, tenant) in all_tenants().await {
        let vfs = &tenant.vfs;
        let root = root(vfs).await;
        let top = mkdir(vfs, &root, "update").await;
        let child1 = mkdir(vfs, &top, "dirchild1").await;
        let child2 = mkdir(vfs, &top, "dirchild2").await;
        let child3 = mkdir(vfs, &top, "dirchild3").await;
        let sub = mkdir(vfs, &child3, "sub").await;
        let deep = upload(vfs, &sub, "deep.txt", b"deep").await;
        upload(vfs, &child3, "file3", b"three").await;

        let patch = DocPatch::new().with_name("crazy").with_dir_id(child2.id.clone());
        let moved = vfs.modify_dir_metadata(&child3, patch).await.unwrap();
        assert_eq!(moved.fullpath, "/update/dirchild2/crazy", "{label}");

        assert!(vfs.dir_by_path("/update/dirchild3").await.unwrap_err().is_not_found());
        let file3 = vfs.file_by_path("/update/dirchild2/crazy/file3").await.unwrap();
        assert_eq!(file3.dir_id, moved.id, "{label}");
        let sub = vfs.dir_by_path("/update/dirchild2/crazy/sub").await.unwrap();
        assert_eq!(sub.dir_id, moved.id, "{label}");
        let deep_moved = vfs.file_by_id(&deep.id).await.unwrap();
        assert_eq!(deep_moved.fullpath, "/update/dirchild2/crazy/sub/deep.txt", "{label}");
        assert_eq!(common::read_all(vfs, &deep_moved).await, b"deep", "{label}");

        // A directory cannot move below itself.
        let child2 = vfs.dir_by_id(&child2.id).await.unwrap();
        let patch = DocPatch::new().with_dir_id(sub.id.clone());
        let err = vfs.modify_dir_metadata(&child2, patch).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ForbiddenMove, "{label}");

        let patch = DocPatch::new().with_name("dirchild2");
        let err = vfs.modify_dir_metadata(&child1, patch).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists, "{label}");

        let err = vfs
            .modify_dir_metadata(&root, DocPatch::new().with_name("x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ForbiddenMove, "{label}");
    }
}

#[tokio::test]
async fn test_stale_revision_conflicts() {
    let tenant = TestTenant::new(IndexKind::Sqlite, StorageLayout::ObjectV1).await;
    let vfs = &tenant.vfs;
    let root = root(vfs).await;
    let dir = mkdir(vfs, &root, "dir").await;
    vfs.modify_dir_metadata(&dir, DocPatch::new().with_tags(vec!["a".into()]))
        .await
        .unwrap();
    let err = vfs
        .modify_dir_metadata(&dir, DocPatch::new().with_name("renamed"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(vfs.dir_by_path("/dir").await.is_ok());
}

#[tokio::test]
async fn test_file_rename_updates_mime() {
    let tenant = TestTenant::new(IndexKind::Memory, StorageLayout::ObjectV2).await;
    let vfs = &tenant.vfs;
    let root = root(vfs).await;
    let file = upload(vfs, &root, "notes.txt", b"hello").await;
    assert_eq!(file.mime, "text/plain");

    let renamed = vfs
        .modify_file_metadata(&file, DocPatch::new().with_name("picture.png"))
        .await
        .unwrap();
    assert_eq!(renamed.fullpath, "/picture.png");
    assert_eq!(renamed.mime, "image/png");
    assert_eq!(renamed.class, "image");
    assert_eq!(common::read_all(vfs, &renamed).await, b"hello");
}

#[tokio::test]
async fn test_conflict_names() {
    let tenant = TestTenant::new(IndexKind::Memory, StorageLayout::Local).await;
    let vfs = &tenant.vfs;
    let root = root(vfs).await;

    mkdir(vfs, &root, "existing").await;
    assert_eq!(vfs.conflict_name(&root.id, "existing", false).await.unwrap(), "existing (2)");
    mkdir(vfs, &root, "existing (2)").await;
    assert_eq!(vfs.conflict_name(&root.id, "existing", false).await.unwrap(), "existing (3)");

    mkdir(vfs, &root, "existing (3)").await;
    assert_eq!(
        vfs.conflict_name(&root.id, "existing (3)", false).await.unwrap(),
        "existing (4)"
    );

    mkdir(vfs, &root, "existing (copy)").await;
    assert_eq!(
        vfs.conflict_name(&root.id, "existing (copy)", false).await.unwrap(),
        "existing (copy) (2)"
    );

    upload(vfs, &root, "photo.jpg", b"jpg").await;
    assert_eq!(vfs.conflict_name(&root.id, "photo.jpg", true).await.unwrap(), "photo (2).jpg");
}

#[tokio::test]
async fn test_conflict_name_with_huge_counter() {
    let tenant = TestTenant::new(IndexKind::Sqlite, StorageLayout::ObjectV1).await;
    let vfs = &tenant.vfs;
    let root = root(vfs).await;
    let name = format!("x ({}).txt", u64::MAX);
    let file = upload(vfs, &root, &name, b"x").await;

    let expected = format!("x ({}) (2).txt", u64::MAX);
    assert_eq!(vfs.conflict_name(&root.id, &name, true).await.unwrap(), expected);
    let copy = vfs.copy_file(&file, None).await.unwrap();
    assert_eq!(copy.name, expected);

    let near = format!("y ({})", u64::MAX - 1);
    mkdir(vfs, &root, &near).await;
    assert_eq!(
        vfs.conflict_name(&root.id, &near, false).await.unwrap(),
        format!("y ({})", u64::MAX)
    );
}

#[tokio::test]
async fn test_normalization_variants() {
    for (label, tenant) in all_tenants().await {
        let vfs = &tenant.vfs;
        let root = root(vfs).await;

        let nfc = "caf\u{e9}.txt";
        let nfd = "cafe\u{301}.txt";
        let a = upload(vfs, &root, nfc, b"nfc").await;
        let b = upload(vfs, &root, nfd, b"nfd").await;
        assert_ne!(a.id, b.id, "{label}");
        assert_eq!(vfs.file_by_path(&format!("/{nfc}")).await.unwrap().id, a.id);
        assert_eq!(vfs.file_by_path(&format!("/{nfd}")).await.unwrap().id, b.id);

        // Lookup falls back to NFD-equivalent spellings.
        let dir = mkdir(vfs, &root, "na\u{ef}ve").await;
        let found = vfs.dir_by_path("/nai\u{308}ve").await.unwrap();
        assert_eq!(found.id, dir.id, "{label}");

        // Renaming between spellings of the same name.
        let nfd_name = "nai\u{308}ve";
        let renamed = vfs
            .modify_dir_metadata(&dir, DocPatch::new().with_name(nfd_name))
            .await
            .unwrap();
        assert_eq!(renamed.name, nfd_name, "{label}");
        let back = vfs
            .modify_dir_metadata(&renamed, DocPatch::new().with_name("na\u{ef}ve"))
            .await
            .unwrap();
        assert_eq!(back.fullpath, "/na\u{ef}ve", "{label}");
    }
}

/// /walk/{dirchild1/{food,bard}, dirchild2/{foof,barf}, dirchild3, filechild1}
async fn walk_tree(vfs: &Vfs) -> DirDoc {
    let root = root(vfs).await;
    let walk = mkdir(vfs, &root, "walk").await;
    let d1 = mkdir(vfs, &walk, "dirchild1").await;
    mkdir(vfs, &d1, "food").await;
    mkdir(vfs, &d1, "bard").await;
    let d2 = mkdir(vfs, &walk, "dirchild2").await;
    upload(vfs, &d2, "foof", b"foof").await;
    upload(vfs, &d2, "barf", b"barf").await;
    mkdir(vfs, &walk, "dirchild3").await;
    upload(vfs, &walk, "filechild1", b"1").await;
    walk
}

const WALK_ORDER: [&str; 9] = [
    "/walk",
    "/walk/dirchild1",
    "/walk/dirchild1/bard",
    "/walk/dirchild1/food",
    "/walk/dirchild2",
    "/walk/dirchild2/barf",
    "/walk/dirchild2/foof",
    "/walk/dirchild3",
    "/walk/filechild1",
];

#[tokio::test]
async fn test_walk_pre_order() {
    for (label, tenant) in all_tenants().await {
        let vfs = &tenant.vfs;
        walk_tree(vfs).await;

        let mut seen = Vec::new();
        vfs.walk("/walk", |path, entry| {
            match entry {
                WalkEntry::Dir(d) => assert_eq!(d.fullpath, path),
                WalkEntry::File(f) => assert_eq!(f.fullpath, path),
                WalkEntry::Error(e) => return Err(e),
            }
            seen.push(path.to_string());
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(seen, WALK_ORDER, "{label}");
    }
}

#[tokio::test]
async fn test_walk_stops_on_visitor_error() {
    let tenant = TestTenant::new(IndexKind::Sqlite, StorageLayout::Local).await;
    let vfs = &tenant.vfs;
    walk_tree(vfs).await;

    let mut seen = Vec::new();
    let err = vfs
        .walk("/walk", |path, _| {
            seen.push(path.to_string());
            if path == "/walk/dirchild2" {
                return Err(VfsError::other("stop"));
            }
            Ok(())
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Other);
    assert_eq!(seen.last().map(String::as_str), Some("/walk/dirchild2"));
    assert_eq!(seen.len(), 5);

    // An unresolvable root is reported to the visitor, which may ignore it.
    let mut errors = 0;
    vfs.walk("/nope", |path, entry| {
        assert_eq!(path, "/nope");
        assert!(matches!(entry, WalkEntry::Error(ref e) if e.is_not_found()));
        errors += 1;
        Ok(())
    })
    .await
    .unwrap();
    assert_eq!(errors, 1);
}

#[tokio::test]
async fn test_walk_already_locked_does_not_deadlock() {
    let tenant = TestTenant::new(IndexKind::Memory, StorageLayout::ObjectV3).await;
    let vfs = &tenant.vfs;
    let walk = walk_tree(vfs).await;

    let guard = vfs.locker().write(DOMAIN).await.unwrap();
    let mut count = 0;
    tokio::time::timeout(
        Duration::from_secs(5),
        vfs.walk_already_locked(&walk, |_, _| {
            count += 1;
            Ok(())
        }),
    )
    .await
    .expect("walk_already_locked must not take the tree lock")
    .unwrap();
    drop(guard);
    assert_eq!(count, WALK_ORDER.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_walk_sees_consistent_tree_during_rename() {
    let tenant = TestTenant::new(IndexKind::Sqlite, StorageLayout::ObjectV2).await;
    let vfs = tenant.vfs.clone();
    walk_tree(&vfs).await;

    let started = Arc::new(AtomicBool::new(false));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let walker = {
        let vfs = vfs.clone();
        let started = started.clone();
        let seen = seen.clone();
        tokio::spawn(async move {
            vfs.walk("/walk", |path, _| {
                started.store(true, Ordering::SeqCst);
                seen.lock().push(path.to_string());
                std::thread::sleep(Duration::from_millis(10));
                Ok(())
            })
            .await
        })
    };

    while !started.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    let d1 = vfs.dir_by_path("/walk/dirchild1").await.unwrap();
    let renamed = vfs
        .modify_dir_metadata(&d1, DocPatch::new().with_name("renamed"))
        .await
        .unwrap();
    walker.await.unwrap().unwrap();

    // The rename waited for the walk, which saw only the old tree.
    assert_eq!(*seen.lock(), WALK_ORDER);
    assert_eq!(renamed.fullpath, "/walk/renamed");
    assert!(vfs.dir_by_path("/walk/renamed/food").await.is_ok());
}
