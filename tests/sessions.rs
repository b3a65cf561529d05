//! Session semantics: batched rebuilds, read-your-writes, tombstones,
//! discard on drop.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arcfs::handler::zip::ZipHandler;
use arcfs::handler::{ArchiveHandler, Capabilities, SourceFn};
use arcfs::{Entry, EntryStore};
use common::{path_in, test_fs};

/// Wraps the ZIP handler, counting serialize calls.
struct CountingHandler {
    inner: ZipHandler,
    serializes: Arc<AtomicUsize>,
}

impl ArchiveHandler for CountingHandler {
    fn format_name(&self) -> &'static str {
        "zip"
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn load(&self, source: &SourceFn<'_>) -> arcfs::Result<EntryStore> {
        self.inner.load(source)
    }

    fn open_entry(
        &self,
        source: &SourceFn<'_>,
        entry: &Entry,
    ) -> arcfs::Result<Box<dyn std::io::Read>> {
        self.inner.open_entry(source, entry)
    }

    fn serialize(
        &self,
        source: Option<&SourceFn<'_>>,
        store: &EntryStore,
        sink: &mut dyn std::io::Write,
    ) -> arcfs::Result<()> {
        self.serializes.fetch_add(1, Ordering::SeqCst);
        self.inner.serialize(source, store, sink)
    }
}

#[test]
fn batch_session_rebuilds_once() {
    let (dir, mut fs) = test_fs();
    let serializes = Arc::new(AtomicUsize::new(0));

    let counter = serializes.clone();
    fs.register_handler(
        ".zip",
        vec![],
        Arc::new(move |name, config| {
            Box::new(CountingHandler {
                inner: ZipHandler::new(name, config),
                serializes: counter.clone(),
            })
        }),
    );

    let archive = path_in(&dir, "b.zip");
    let session = fs.batch_session();
    for i in 0..5 {
        session
            .write(&format!("{}/file{}.txt", archive, i), b"data")
            .unwrap();
    }
    session.commit().unwrap();

    assert_eq!(serializes.load(Ordering::SeqCst), 1);
    assert_eq!(fs.list_dir(&archive).unwrap().len(), 5);
}

#[test]
fn session_reads_observe_staged_writes() {
    let (dir, fs) = test_fs();
    let path = path_in(&dir, "ryw.zip/notes.txt");

    let session = fs.batch_session();
    session.write(&path, b"staged").unwrap();

    assert!(session.exists(&path));
    assert_eq!(session.read(&path).unwrap(), b"staged");
    assert_eq!(session.read_to_string(&path).unwrap(), "staged");

    // Not on disk until commit.
    assert!(!dir.path().join("ryw.zip").exists());
    session.commit().unwrap();
    assert_eq!(fs.read(&path).unwrap(), b"staged");
}

#[test]
fn tombstones_invisible_before_commit() {
    let (dir, fs) = test_fs();
    let archive = path_in(&dir, "t.zip");
    fs.write(&format!("{}/keep.txt", archive), b"k").unwrap();
    fs.write(&format!("{}/gone.txt", archive), b"g").unwrap();

    let session = fs.batch_session();
    session.remove(&format!("{}/gone.txt", archive)).unwrap();

    assert!(!session.exists(&format!("{}/gone.txt", archive)));
    assert_eq!(session.list_dir(&archive).unwrap(), vec!["keep.txt"]);
    assert!(session
        .read(&format!("{}/gone.txt", archive))
        .unwrap_err()
        .is_not_found());

    session.commit().unwrap();
    assert_eq!(fs.list_dir(&archive).unwrap(), vec!["keep.txt"]);
}

#[test]
fn dropped_session_discards_changes() {
    let (dir, fs) = test_fs();
    let archive = path_in(&dir, "drop.zip");
    fs.write(&format!("{}/original.txt", archive), b"original")
        .unwrap();
    let before = common::disk_bytes(&dir, "drop.zip");

    {
        let session = fs.batch_session();
        session
            .write(&format!("{}/abandoned.txt", archive), b"x")
            .unwrap();
        session
            .remove(&format!("{}/original.txt", archive))
            .unwrap();
        // Dropped without commit.
    }

    assert_eq!(common::disk_bytes(&dir, "drop.zip"), before);
    assert_eq!(fs.list_dir(&archive).unwrap(), vec!["original.txt"]);
}

#[test]
fn explicit_discard_drops_changes() {
    let (dir, fs) = test_fs();
    let archive = path_in(&dir, "disc.zip");

    let session = fs.batch_session();
    session.write(&format!("{}/a.txt", archive), b"a").unwrap();
    session.discard();

    assert!(!dir.path().join("disc.zip").exists());
}

#[test]
fn writer_fails_after_session_ends() {
    let (dir, fs) = test_fs();
    let path = path_in(&dir, "late.zip/f.txt");

    let session = fs.batch_session();
    let mut writer = session.open_write(&path).unwrap();
    std::io::Write::write_all(&mut writer, b"too late").unwrap();
    drop(session);

    let err = writer.close().unwrap_err();
    assert!(matches!(err, arcfs::Error::State(_)));
    assert!(!dir.path().join("late.zip").exists());
}

#[test]
fn session_writer_stages_on_close() {
    let (dir, fs) = test_fs();
    let path = path_in(&dir, "sw.zip/streamed.bin");

    let session = fs.batch_session();
    let mut writer = session.open_write(&path).unwrap();
    for chunk in [b"abc" as &[u8], b"def", b"ghi"] {
        std::io::Write::write_all(&mut writer, chunk).unwrap();
    }
    writer.close().unwrap();

    assert_eq!(session.read(&path).unwrap(), b"abcdefghi");
    session.commit().unwrap();
    assert_eq!(fs.read(&path).unwrap(), b"abcdefghi");
}

#[test]
fn repeated_operations_reuse_cached_handles() {
    let (dir, mut fs) = test_fs();
    let loads = Arc::new(AtomicUsize::new(0));

    struct LoadCounting {
        inner: ZipHandler,
        loads: Arc<AtomicUsize>,
    }
    impl ArchiveHandler for LoadCounting {
        fn format_name(&self) -> &'static str {
            "zip"
        }
        fn capabilities(&self) -> Capabilities {
            self.inner.capabilities()
        }
        fn load(&self, source: &SourceFn<'_>) -> arcfs::Result<EntryStore> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.inner.load(source)
        }
        fn open_entry(
            &self,
            source: &SourceFn<'_>,
            entry: &Entry,
        ) -> arcfs::Result<Box<dyn std::io::Read>> {
            self.inner.open_entry(source, entry)
        }
        fn serialize(
            &self,
            source: Option<&SourceFn<'_>>,
            store: &EntryStore,
            sink: &mut dyn std::io::Write,
        ) -> arcfs::Result<()> {
            self.inner.serialize(source, store, sink)
        }
    }

    let counter = loads.clone();
    fs.register_handler(
        ".zip",
        vec![],
        Arc::new(move |name, config| {
            Box::new(LoadCounting {
                inner: ZipHandler::new(name, config),
                loads: counter.clone(),
            })
        }),
    );

    let archive = path_in(&dir, "cache.zip");
    fs.write(&format!("{}/seed.txt", archive), b"s").unwrap();
    loads.store(0, Ordering::SeqCst);

    let session = fs.batch_session();
    for i in 0..10 {
        session
            .write(&format!("{}/f{}.txt", archive, i), b"x")
            .unwrap();
        session.read(&format!("{}/seed.txt", archive)).unwrap();
    }
    session.commit().unwrap();

    // One load when the session first opened the archive, regardless of
    // how many operations followed.
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}
