use super::*;
use std::collections::BTreeSet;
use std::io::{Read, Write};
use tempfile::TempDir;

fn open_atlas() -> (TempDir, Config, Atlas) {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::new(dir.path()).unwrap();
    let atlas = Atlas::open(&config).unwrap();
    (dir, config, atlas)
}

fn put(atlas: &Atlas, path: &str, data: &[u8]) -> WriteReceipt {
    let mut writer = atlas.write(path).unwrap();
    writer.write_all(data).unwrap();
    writer.commit().unwrap().into_receipt()
}

fn read_all(atlas: &Atlas, path: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    atlas.read(path).unwrap().read_to_end(&mut buf).unwrap();
    buf
}

fn set(items: Vec<String>) -> BTreeSet<String> {
    items.into_iter().collect()
}

fn names(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_open_provisions_layout() {
    let (_dir, config, _atlas) = open_atlas();

    assert!(config.content_root().is_dir());
    assert!(config.tag_root().is_dir());
    assert!(config.staging_root().is_dir());
}

#[test]
fn test_open_is_repeatable() {
    let (_dir, config, atlas) = open_atlas();
    put(&atlas, "keep.txt", b"kept");
    drop(atlas);

    let reopened = Atlas::open(&config).unwrap();
    assert_eq!(read_all(&reopened, "keep.txt"), b"kept");
}

#[test]
fn test_second_open_is_busy_and_spares_inflight_writes() {
    let (_dir, config, atlas) = open_atlas();

    let mut writer = atlas.write("a.txt").unwrap();
    writer.write_all(b"in flight").unwrap();

    assert!(matches!(Atlas::open(&config), Err(AtlasError::Busy(_))));

    writer.commit().unwrap();
    assert_eq!(read_all(&atlas, "a.txt"), b"in flight");

    drop(atlas);
    assert!(Atlas::open(&config).is_ok());
}

#[test]
fn test_write_then_read_then_list() {
    let (_dir, _config, atlas) = open_atlas();

    put(&atlas, "file.txt", b"hi");
    assert_eq!(read_all(&atlas, "file.txt"), b"hi");
    assert_eq!(atlas.list("/").unwrap(), vec!["file.txt".to_string()]);

    put(&atlas, "file2.txt", b"");
    assert_eq!(set(atlas.list("/").unwrap()), names(&["file.txt", "file2.txt"]));

    put(&atlas, "folder/file.txt", b"x");
    assert_eq!(
        set(atlas.tree("/").unwrap()),
        names(&["file.txt", "file2.txt", "folder/file.txt"])
    );
}

#[test]
fn test_empty_content() {
    let (_dir, _config, atlas) = open_atlas();

    let receipt = put(&atlas, "empty.bin", b"");
    assert_eq!(receipt.size, 0);
    assert_eq!(receipt.hash, crate::hash::hash_bytes(b""));
    assert!(read_all(&atlas, "empty.bin").is_empty());
    assert_eq!(atlas.stat("empty.bin").unwrap(), ResourceStatus::File { size: 0 });
}

#[test]
fn test_binary_data() {
    let (_dir, _config, atlas) = open_atlas();
    let binary_data: Vec<u8> = (0..=255).collect();

    let receipt = put(&atlas, "binary.dat", &binary_data);

    assert_eq!(receipt.size, 256);
    assert_eq!(receipt.hash, crate::hash::hash_bytes(&binary_data));
    assert_eq!(read_all(&atlas, "binary.dat"), binary_data);
}

#[test]
fn test_write_is_full_replace() {
    let (_dir, _config, atlas) = open_atlas();

    put(&atlas, "doc.txt", b"a much longer first version");
    put(&atlas, "doc.txt", b"short");

    assert_eq!(read_all(&atlas, "doc.txt"), b"short");
}

#[test]
fn test_write_replaces_directory() {
    let (_dir, _config, atlas) = open_atlas();
    put(&atlas, "thing/inner/a.txt", b"a");
    put(&atlas, "thing/b.txt", b"b");

    put(&atlas, "thing", b"now a file");

    assert!(atlas.stat("thing").unwrap().is_file());
    assert_eq!(read_all(&atlas, "thing"), b"now a file");
    assert_eq!(set(atlas.tree("/").unwrap()), names(&["thing"]));
}

#[test]
fn test_receipt_uses_normalized_path() {
    let (_dir, _config, atlas) = open_atlas();

    let receipt = put(&atlas, "./a//b/../c.txt", b"data");
    assert_eq!(receipt.path, "a/c.txt");
    assert!(atlas.exists("a/c.txt"));
}

#[test]
fn test_uncommitted_write_leaves_target_untouched() {
    let (_dir, config, atlas) = open_atlas();
    put(&atlas, "stable.txt", b"old");

    {
        let mut writer = atlas.write("stable.txt").unwrap();
        writer.write_all(b"never committed").unwrap();
        assert_eq!(writer.bytes_written(), 15);
        // staged bytes are invisible to readers
        assert_eq!(read_all(&atlas, "stable.txt"), b"old");
    }

    assert_eq!(read_all(&atlas, "stable.txt"), b"old");
    assert_eq!(fs::read_dir(config.staging_root()).unwrap().count(), 0);

    let mut writer = atlas.write("fresh.txt").unwrap();
    writer.write_all(b"abandoned").unwrap();
    drop(writer);
    assert!(!atlas.exists("fresh.txt"));
}

#[test]
fn test_staged_files_not_listed() {
    let (_dir, _config, atlas) = open_atlas();
    put(&atlas, "a.txt", b"a");

    let mut writer = atlas.write("b.txt").unwrap();
    writer.write_all(b"in flight").unwrap();

    assert_eq!(set(atlas.tree("/").unwrap()), names(&["a.txt"]));
    writer.commit().unwrap();
    assert_eq!(set(atlas.tree("/").unwrap()), names(&["a.txt", "b.txt"]));
}

#[test]
fn test_write_to_root_rejected() {
    let (_dir, _config, atlas) = open_atlas();

    for root in ["", "/", ".", "a/.."] {
        assert!(
            matches!(atlas.write(root), Err(AtlasError::UploadToRoot)),
            "write to {:?} should be rejected",
            root
        );
        assert!(matches!(atlas.delete(root), Err(AtlasError::UploadToRoot)));
    }
}

#[test]
fn test_escape_rejected_without_side_effects() {
    let (dir, config, atlas) = open_atlas();

    let result = atlas.write("../escape.txt");
    assert!(matches!(result, Err(AtlasError::PathEscape(_))));

    assert!(!config.atlas_root().join("escape.txt").exists());
    assert!(!dir.path().join("escape.txt").exists());
    assert!(atlas.tree("/").unwrap().is_empty());
}

#[test]
fn test_escape_rejected_for_every_operation() {
    let (_dir, _config, atlas) = open_atlas();

    for bad in ["../x", "a/../../x", "/etc/passwd"] {
        assert!(!atlas.exists(bad));
        assert!(matches!(atlas.stat(bad), Err(AtlasError::PathEscape(_))));
        assert!(matches!(atlas.list(bad), Err(AtlasError::PathEscape(_))));
        assert!(matches!(atlas.tree(bad), Err(AtlasError::PathEscape(_))));
        assert!(matches!(atlas.read(bad), Err(AtlasError::PathEscape(_))));
        assert!(matches!(atlas.write(bad), Err(AtlasError::PathEscape(_))));
        assert!(matches!(atlas.delete(bad), Err(AtlasError::PathEscape(_))));
    }
}

#[test]
fn test_read_errors() {
    let (_dir, _config, atlas) = open_atlas();
    put(&atlas, "dir/file.txt", b"x");

    assert!(matches!(
        atlas.read("missing.txt"),
        Err(AtlasError::ResourceNotFound(_))
    ));
    assert!(matches!(atlas.read("dir"), Err(AtlasError::NotAFile(_))));
    assert!(matches!(
        atlas.read("dir/file.txt/below"),
        Err(AtlasError::ResourceNotFound(_))
    ));
}

#[test]
fn test_list_and_tree_errors() {
    let (_dir, _config, atlas) = open_atlas();
    put(&atlas, "file.txt", b"x");

    assert!(matches!(atlas.list("file.txt"), Err(AtlasError::NotAFolder(_))));
    assert!(matches!(atlas.tree("file.txt"), Err(AtlasError::NotAFolder(_))));
    assert!(matches!(atlas.list("nope"), Err(AtlasError::ResourceNotFound(_))));
    assert!(matches!(atlas.tree("nope"), Err(AtlasError::ResourceNotFound(_))));
}

#[test]
fn test_list_is_not_recursive() {
    let (_dir, _config, atlas) = open_atlas();
    put(&atlas, "top.txt", b"");
    put(&atlas, "dir/nested.txt", b"");
    put(&atlas, "dir/deeper/leaf.txt", b"");

    assert_eq!(set(atlas.list("/").unwrap()), names(&["top.txt", "dir"]));
    assert_eq!(set(atlas.list("dir").unwrap()), names(&["nested.txt", "deeper"]));
}

#[test]
fn test_tree_relative_to_query_and_files_only() {
    let (_dir, _config, atlas) = open_atlas();
    put(&atlas, "a.txt", b"");
    put(&atlas, "dir/b.txt", b"");
    put(&atlas, "dir/sub/c.txt", b"");
    fs::create_dir_all(atlas.content_root().join("dir/empty")).unwrap();

    assert_eq!(
        set(atlas.tree("/").unwrap()),
        names(&["a.txt", "dir/b.txt", "dir/sub/c.txt"])
    );
    assert_eq!(set(atlas.tree("dir").unwrap()), names(&["b.txt", "sub/c.txt"]));
    assert!(atlas.tree("dir/empty").unwrap().is_empty());
}

#[test]
fn test_delete_file() {
    let (_dir, _config, atlas) = open_atlas();
    put(&atlas, "gone.txt", b"bye");

    atlas.delete("gone.txt").unwrap();

    assert!(!atlas.exists("gone.txt"));
    assert!(matches!(
        atlas.read("gone.txt"),
        Err(AtlasError::ResourceNotFound(_))
    ));
}

#[test]
fn test_delete_directory_recursively() {
    let (_dir, _config, atlas) = open_atlas();
    put(&atlas, "dir/a.txt", b"a");
    put(&atlas, "dir/sub/b.txt", b"b");
    put(&atlas, "other.txt", b"o");

    atlas.delete("dir").unwrap();

    assert!(!atlas.exists("dir"));
    assert_eq!(set(atlas.tree("/").unwrap()), names(&["other.txt"]));
}

#[test]
fn test_delete_missing() {
    let (_dir, _config, atlas) = open_atlas();

    let err = atlas.delete("missing.txt").unwrap_err();
    assert!(err.is_not_found());
    assert!(err.to_string().contains("Resource does not exist"));
}

#[test]
fn test_stat_reports_kind_and_size() {
    let (_dir, _config, atlas) = open_atlas();
    put(&atlas, "dir/file.txt", b"12345");

    assert_eq!(atlas.stat("dir").unwrap(), ResourceStatus::Directory);
    assert_eq!(
        atlas.stat("dir/file.txt").unwrap(),
        ResourceStatus::File { size: 5 }
    );
    assert_eq!(atlas.stat("dir/none").unwrap(), ResourceStatus::Absent);
    assert_eq!(atlas.stat("/").unwrap(), ResourceStatus::Directory);
}

#[test]
fn test_resolved_path_is_a_snapshot() {
    let (_dir, _config, atlas) = open_atlas();
    put(&atlas, "snap.txt", b"x");

    let resolved = atlas.resolve("snap.txt").unwrap();
    atlas.delete("snap.txt").unwrap();

    // status reflects resolution time; the read itself notices the removal
    assert!(resolved.status().is_file());
    assert!(matches!(
        atlas.read_resolved(&resolved),
        Err(AtlasError::ResourceNotFound(_))
    ));
}

#[test]
fn test_tagged_paths_are_read_only() {
    let (_dir, config, atlas) = open_atlas();
    let tag_dir = config.tag_root().join("v1");
    fs::create_dir_all(tag_dir.join("docs")).unwrap();
    fs::write(tag_dir.join("docs/readme.md"), b"tagged").unwrap();

    let resolved = atlas.resolve_tagged("v1", "docs/readme.md").unwrap();
    let mut buf = String::new();
    atlas
        .read_resolved(&resolved)
        .unwrap()
        .read_to_string(&mut buf)
        .unwrap();
    assert_eq!(buf, "tagged");

    let root = atlas.resolve_tagged("v1", "/").unwrap();
    assert_eq!(set(atlas.tree_resolved(&root).unwrap()), names(&["docs/readme.md"]));

    assert!(matches!(
        atlas.resolve_tagged("bad/tag", "x"),
        Err(AtlasError::InvalidTag(_))
    ));
}

#[test]
fn test_concurrent_writers_single_winner() {
    let (_dir, _config, atlas) = open_atlas();
    let payloads: Vec<Vec<u8>> = (0..8u8).map(|i| vec![b'a' + i; 64 * 1024]).collect();

    std::thread::scope(|s| {
        for payload in &payloads {
            let atlas = &atlas;
            s.spawn(move || {
                let mut writer = atlas.write("shared.bin").unwrap();
                for chunk in payload.chunks(4096) {
                    writer.write_all(chunk).unwrap();
                }
                writer.commit().unwrap();
            });
        }
    });

    let content = read_all(&atlas, "shared.bin");
    assert!(payloads.iter().any(|p| *p == content));
}

#[test]
fn test_readers_never_see_torn_writes() {
    let (_dir, _config, atlas) = open_atlas();
    let old = vec![b'o'; 256 * 1024];
    let new = vec![b'n'; 256 * 1024];
    put(&atlas, "big.bin", &old);

    std::thread::scope(|s| {
        s.spawn(|| {
            for _ in 0..5 {
                put(&atlas, "big.bin", &new);
                put(&atlas, "big.bin", &old);
            }
        });
        s.spawn(|| {
            for _ in 0..50 {
                let content = read_all(&atlas, "big.bin");
                assert!(content == old || content == new, "observed a torn write");
            }
        });
    });
}

#[test]
fn test_path_lock_held_until_committed_dropped() {
    let (_dir, _config, atlas) = open_atlas();

    let writer = atlas.write("locked.txt").unwrap();
    assert!(atlas.locks.is_held("locked.txt"));

    let committed = writer.commit().unwrap();
    assert!(atlas.locks.is_held("locked.txt"));

    let receipt = committed.into_receipt();
    assert_eq!(receipt.path, "locked.txt");
    assert!(!atlas.locks.is_held("locked.txt"));
}
