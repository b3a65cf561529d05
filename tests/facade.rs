//! Facade operations: copy/move, directories, metadata, streams, walk.

mod common;

use std::io::{Read, Seek, SeekFrom, Write};

use arcfs::{Error, FileKind};
use common::{path_in, test_fs};

#[test]
fn copy_between_archive_formats() {
    let (dir, fs) = test_fs();
    let src = path_in(&dir, "src.zip/doc.txt");
    let dst = path_in(&dir, "dst.tar.gz/doc.txt");

    fs.write(&src, b"portable").unwrap();
    fs.copy(&src, &dst).unwrap();

    assert_eq!(fs.read(&dst).unwrap(), b"portable");
    assert_eq!(fs.read(&src).unwrap(), b"portable");
}

#[test]
fn copy_preserves_mtime_into_tar() {
    let (dir, fs) = test_fs();
    let src = path_in(&dir, "stamp.zip/f.txt");
    let dst = path_in(&dir, "stamp.tar/f.txt");

    fs.write(&src, b"x").unwrap();
    let src_info = fs.info(&src).unwrap();

    fs.copy(&src, &dst).unwrap();
    let dst_info = fs.info(&dst).unwrap();

    // TAR keeps whole seconds; ZIP already rounded to 2s on write.
    assert!(dst_info.modified.as_secs().abs_diff(src_info.modified.as_secs()) <= 2);
}

#[test]
fn rename_moves_across_archives() {
    let (dir, fs) = test_fs();
    let src = path_in(&dir, "from.zip/item.bin");
    let dst = path_in(&dir, "to.zip/item.bin");

    fs.write(&src, b"moving").unwrap();
    fs.rename(&src, &dst).unwrap();

    assert_eq!(fs.read(&dst).unwrap(), b"moving");
    assert!(!fs.exists(&src));
    assert!(fs.exists(&path_in(&dir, "from.zip")));
}

#[test]
fn copy_archive_file_raw() {
    let (dir, fs) = test_fs();
    let archive = path_in(&dir, "orig.zip");
    fs.write(&format!("{}/a.txt", archive), b"inside").unwrap();

    // Copying the archive path itself moves the raw container bytes.
    let clone = path_in(&dir, "clone.zip");
    fs.copy(&archive, &clone).unwrap();

    assert_eq!(fs.read(&format!("{}/a.txt", clone)).unwrap(), b"inside");
    assert_eq!(
        common::disk_bytes(&dir, "orig.zip"),
        common::disk_bytes(&dir, "clone.zip")
    );
}

#[test]
fn mkdir_with_parents_is_idempotent() {
    let (dir, fs) = test_fs();
    let nested = path_in(&dir, "m.zip/a/b/c");

    fs.mkdir(&nested, true).unwrap();
    let listing = fs.list_dir(&path_in(&dir, "m.zip/a/b")).unwrap();

    fs.mkdir(&nested, true).unwrap(); // second call must not error
    assert_eq!(fs.list_dir(&path_in(&dir, "m.zip/a/b")).unwrap(), listing);
    assert_eq!(fs.info(&nested).unwrap().kind, FileKind::Dir);
}

#[test]
fn mkdir_without_parents_requires_parent() {
    let (dir, fs) = test_fs();
    let archive = path_in(&dir, "p.zip");
    fs.write(&format!("{}/seed.txt", archive), b"s").unwrap();

    let err = fs.mkdir(&format!("{}/no/such", archive), false).unwrap_err();
    assert!(err.is_not_found());

    fs.mkdir(&format!("{}/ok", archive), false).unwrap();
    let err = fs.mkdir(&format!("{}/ok", archive), false).unwrap_err();
    assert!(matches!(err, Error::AlreadyExists { .. }));
}

#[test]
fn rmdir_refuses_non_empty_unless_recursive() {
    let (dir, fs) = test_fs();
    let archive = path_in(&dir, "r.zip");
    fs.write(&format!("{}/d/inner.txt", archive), b"x").unwrap();

    let err = fs.rmdir(&format!("{}/d", archive), false).unwrap_err();
    assert!(matches!(err, Error::DirectoryNotEmpty { .. }));

    fs.rmdir(&format!("{}/d", archive), true).unwrap();
    assert!(!fs.exists(&format!("{}/d", archive)));
    assert!(!fs.exists(&format!("{}/d/inner.txt", archive)));
}

#[test]
fn remove_refuses_directories() {
    let (dir, fs) = test_fs();
    let archive = path_in(&dir, "rd.zip");
    fs.write(&format!("{}/sub/f.txt", archive), b"x").unwrap();

    let err = fs.remove(&format!("{}/sub", archive)).unwrap_err();
    assert!(matches!(err, Error::IsADirectory { .. }));
}

#[test]
fn info_reports_entry_metadata() {
    let (dir, fs) = test_fs();
    let path = path_in(&dir, "meta.zip/payload.bin");
    fs.write(&path, vec![0u8; 1234]).unwrap();

    let info = fs.info(&path).unwrap();
    assert_eq!(info.size, 1234);
    assert_eq!(info.kind, FileKind::File);
    assert!(info.modified.as_secs() > 0);

    // Implicit directory info.
    fs.write(&path_in(&dir, "meta.zip/dir/leaf.txt"), b"x").unwrap();
    let dir_info = fs.info(&path_in(&dir, "meta.zip/dir")).unwrap();
    assert_eq!(dir_info.kind, FileKind::Dir);
    assert_eq!(dir_info.size, 0);
}

#[test]
fn info_on_archive_path_is_the_physical_file() {
    let (dir, fs) = test_fs();
    let archive = path_in(&dir, "phys.zip");
    fs.write(&format!("{}/a.txt", archive), b"x").unwrap();

    let info = fs.info(&archive).unwrap();
    assert_eq!(info.kind, FileKind::File);
    assert_eq!(info.size, common::disk_bytes(&dir, "phys.zip").len() as u64);
}

#[test]
fn exists_never_errors() {
    let (dir, fs) = test_fs();
    assert!(!fs.exists(&path_in(&dir, "nope.zip/a.txt")));
    assert!(!fs.exists("relative/../traversal"));
    assert!(!fs.exists(""));
    assert!(!fs.exists("with\0nul"));
}

#[test]
fn append_through_archive_boundary() {
    let (dir, fs) = test_fs();
    let path = path_in(&dir, "log.zip/app.log");

    fs.append(&path, b"line 1\n").unwrap(); // creates
    fs.append(&path, b"line 2\n").unwrap(); // read-modify-write

    assert_eq!(fs.read(&path).unwrap(), b"line 1\nline 2\n");
}

#[test]
fn streamed_read_with_seek() {
    let (dir, fs) = test_fs();
    let path = path_in(&dir, "s.zip/stream.bin");
    fs.write(&path, b"0123456789").unwrap();

    let mut reader = fs.open_read(&path).unwrap();
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"0123");

    // Backward seek re-opens the entry under the hood.
    reader.seek(SeekFrom::Start(1)).unwrap();
    reader.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"1234");

    reader.seek(SeekFrom::End(-3)).unwrap();
    assert_eq!(reader.read_all().unwrap(), b"789");
}

#[test]
fn streamed_write_commits_on_close() {
    let (dir, fs) = test_fs();
    let path = path_in(&dir, "w.zip/out.bin");

    let mut writer = fs.open_write(&path).unwrap();
    writer.write_all(b"chunk-a;").unwrap();
    writer.write_all(b"chunk-b").unwrap();
    writer.close().unwrap();

    assert_eq!(fs.read(&path).unwrap(), b"chunk-a;chunk-b");
}

#[test]
fn walk_physical_tree_lists_archives_as_files() {
    let (dir, fs) = test_fs();
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    std::fs::write(dir.path().join("plain.txt"), b"p").unwrap();
    fs.write(&path_in(&dir, "packed.zip/in.txt"), b"i").unwrap();

    let root = dir.path().display().to_string();
    let steps: Vec<_> = fs.walk(&root).collect::<arcfs::Result<_>>().unwrap();

    assert_eq!(steps[0].dir, root);
    assert_eq!(steps[0].subdirs, vec!["sub"]);
    assert!(steps[0].files.contains(&"packed.zip".to_string()));
    assert!(steps[0].files.contains(&"plain.txt".to_string()));
    // The empty subdir is visited too.
    assert_eq!(steps.len(), 2);
}

#[test]
fn walk_descends_archive_directories() {
    let (dir, fs) = test_fs();
    let archive = path_in(&dir, "tree.zip");
    let session = fs.batch_session();
    session.write(&format!("{}/a/one.txt", archive), b"1").unwrap();
    session.write(&format!("{}/a/two.txt", archive), b"2").unwrap();
    session.write(&format!("{}/top.txt", archive), b"t").unwrap();
    session.commit().unwrap();

    let steps: Vec<_> = fs.walk(&archive).collect::<arcfs::Result<_>>().unwrap();
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].dir, archive);
    assert_eq!(steps[0].subdirs, vec!["a"]);
    assert_eq!(steps[0].files, vec!["top.txt"]);
    assert_eq!(steps[1].dir, format!("{}/a", archive));
    assert_eq!(steps[1].files, vec!["one.txt", "two.txt"]);
}

#[test]
fn create_archive_empty_then_populate() {
    let (dir, fs) = test_fs();
    let archive = path_in(&dir, "fresh.tar");

    fs.create_archive(&archive, None).unwrap();
    assert!(fs.exists(&archive));
    assert!(fs.list_dir(&archive).unwrap().is_empty());

    let err = fs.create_archive(&archive, None).unwrap_err();
    assert!(matches!(err, Error::AlreadyExists { .. }));

    fs.write(&format!("{}/later.txt", archive), b"l").unwrap();
    assert_eq!(fs.list_dir(&archive).unwrap(), vec!["later.txt"]);
}

#[test]
fn create_archive_with_format_override() {
    let (dir, fs) = test_fs();
    let archive = path_in(&dir, "container.dat");

    fs.create_archive(&archive, Some("zip")).unwrap();
    // Empty ZIP: end-of-central-directory record only.
    let raw = common::disk_bytes(&dir, "container.dat");
    assert_eq!(&raw[..4], &[0x50, 0x4B, 0x05, 0x06]);

    let err = fs
        .create_archive(&path_in(&dir, "x.dat"), Some("rar"))
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedFormat { .. }));
}

#[test]
fn traversal_paths_rejected() {
    let (_dir, fs) = test_fs();
    let err = fs.read("a/../b.zip/c.txt").unwrap_err();
    assert!(matches!(err, Error::InvalidPath(_)));
}

#[test]
fn physical_files_pass_through() {
    let (dir, fs) = test_fs();
    let plain = path_in(&dir, "notes/plain.txt");

    fs.write(&plain, b"no archives involved").unwrap();
    assert_eq!(fs.read(&plain).unwrap(), b"no archives involved");
    assert_eq!(fs.info(&plain).unwrap().kind, FileKind::File);

    fs.remove(&plain).unwrap();
    assert!(!fs.exists(&plain));
}
