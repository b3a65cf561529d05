//! Single-entry handler for bare compression streams.
//!
//! A `.gz`/`.bz2`/`.xz` file is presented as an archive containing exactly
//! one entry, named after the outer file with the codec extension stripped
//! (`note.txt.gz` holds `note.txt`). The codec itself is applied by the
//! chain layer before this handler runs, so the backing stream seen here is
//! already plain bytes and the container structure is trivial: the whole
//! stream is the entry.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::handler::{ArchiveHandler, Capabilities, SourceFn};
use crate::spool::copy_chunked;
use crate::store::{ContentSource, Entry, EntryKind, EntryStore};
use crate::{Config, EntryPath, Error, Result, Timestamp};

/// Fallback entry name when stripping the codec extension leaves nothing.
const FALLBACK_NAME: &str = "data";

/// Handler presenting a bare compression stream as a one-entry archive.
pub struct SingleHandler {
    archive: String,
    inner_name: String,
    config: Config,
}

impl SingleHandler {
    /// Creates a handler for `archive`, deriving the synthetic entry name
    /// by stripping `extension` (e.g. `".gz"`) from the file name.
    pub fn new(archive: &str, extension: &str, config: &Config) -> Self {
        let lower = archive.to_ascii_lowercase();
        let inner_name = if lower.len() > extension.len() && lower.ends_with(extension) {
            archive[..archive.len() - extension.len()].to_string()
        } else {
            String::new()
        };
        let inner_name = if inner_name.is_empty() {
            FALLBACK_NAME.to_string()
        } else {
            inner_name
        };
        Self {
            archive: archive.to_string(),
            inner_name,
            config: config.clone(),
        }
    }

    /// The synthetic entry name this handler exposes.
    pub fn inner_name(&self) -> &str {
        &self.inner_name
    }
}

impl ArchiveHandler for SingleHandler {
    fn format_name(&self) -> &'static str {
        "codec-single"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            random_read: false,
            append_in_place: false,
        }
    }

    fn sole_entry(&self) -> Option<&str> {
        Some(&self.inner_name)
    }

    fn load(&self, source: &SourceFn<'_>) -> Result<EntryStore> {
        let mut r = source()?;
        let len = r.seek(SeekFrom::End(0))?;

        let path = EntryPath::new(&self.inner_name).map_err(|e| {
            Error::format(
                &self.archive,
                format!("cannot derive entry name from archive name: {}", e),
            )
        })?;

        Ok(EntryStore::from_loaded(vec![Entry {
            path,
            kind: EntryKind::File,
            size: len,
            modified: Timestamp::now(),
            mode: None,
            source: ContentSource::Original {
                offset: 0,
                compressed_size: len,
                method: 0,
                crc: None,
            },
        }]))
    }

    fn open_entry(&self, source: &SourceFn<'_>, entry: &Entry) -> Result<Box<dyn Read>> {
        let ContentSource::Original {
            offset,
            compressed_size,
            ..
        } = entry.source
        else {
            return Err(Error::State(format!(
                "codec-single open_entry on non-original entry '{}'",
                entry.path
            )));
        };
        let mut r = source()?;
        r.seek(SeekFrom::Start(offset))?;
        Ok(Box::new(r.take(compressed_size)))
    }

    fn serialize(
        &self,
        source: Option<&SourceFn<'_>>,
        store: &EntryStore,
        sink: &mut dyn Write,
    ) -> Result<()> {
        let files: Vec<&Entry> = store.iter_live().filter(|e| e.kind.is_file()).collect();
        match files.as_slice() {
            [] => Ok(()),
            [entry] => {
                let mut reader = crate::handler::entry_reader(self, source, entry)?;
                copy_chunked(&mut *reader, sink, self.config.gzip_buffer_size)?;
                sink.flush()?;
                Ok(())
            }
            _ => Err(Error::format(
                &self.archive,
                "a compressed stream holds a single entry; cannot store multiple files",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spool::Spool;

    fn source_of(bytes: Vec<u8>) -> impl Fn() -> Result<Box<dyn crate::spool::ReadSeek>> {
        let spool = Spool::from_bytes(bytes);
        move || spool.reader()
    }

    #[test]
    fn test_inner_name_strips_extension() {
        let config = Config::default();
        assert_eq!(
            SingleHandler::new("note.txt.gz", ".gz", &config).inner_name(),
            "note.txt"
        );
        assert_eq!(
            SingleHandler::new("archive.bz2", ".bz2", &config).inner_name(),
            "archive"
        );
        // Case-insensitive match, original casing preserved
        assert_eq!(
            SingleHandler::new("NOTES.GZ", ".gz", &config).inner_name(),
            "NOTES"
        );
        // Nothing left after stripping
        assert_eq!(
            SingleHandler::new(".gz", ".gz", &config).inner_name(),
            FALLBACK_NAME
        );
    }

    #[test]
    fn test_load_single_entry() {
        let handler = SingleHandler::new("note.txt.gz", ".gz", &Config::default());
        let store = handler.load(&source_of(b"plain bytes".to_vec())).unwrap();
        assert_eq!(store.len(), 1);
        let entry = store.get("note.txt").unwrap();
        assert!(entry.kind.is_file());
        assert_eq!(entry.size, 11);
    }

    #[test]
    fn test_open_entry_reads_whole_stream() {
        let handler = SingleHandler::new("note.txt.gz", ".gz", &Config::default());
        let source = source_of(b"plain bytes".to_vec());
        let store = handler.load(&source).unwrap();
        let entry = store.get("note.txt").unwrap();
        let mut out = Vec::new();
        handler
            .open_entry(&source, entry)
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, b"plain bytes");
    }

    #[test]
    fn test_serialize_single_entry() {
        let handler = SingleHandler::new("note.txt.gz", ".gz", &Config::default());
        let mut store = EntryStore::new();
        store
            .put(Entry::overlay_file(
                EntryPath::new("note.txt").unwrap(),
                Spool::from_bytes(b"new contents".to_vec()),
                Timestamp::from_unix(0),
            ))
            .unwrap();

        let mut out = Vec::new();
        handler.serialize(None, &store, &mut out).unwrap();
        assert_eq!(out, b"new contents");
    }

    #[test]
    fn test_serialize_empty_store() {
        let handler = SingleHandler::new("x.gz", ".gz", &Config::default());
        let mut out = Vec::new();
        handler.serialize(None, &EntryStore::new(), &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_serialize_rejects_multiple_files() {
        let handler = SingleHandler::new("x.gz", ".gz", &Config::default());
        let mut store = EntryStore::new();
        for name in ["a", "b"] {
            store
                .put(Entry::overlay_file(
                    EntryPath::new(name).unwrap(),
                    Spool::from_bytes(b"x".to_vec()),
                    Timestamp::from_unix(0),
                ))
                .unwrap();
        }
        let err = handler.serialize(None, &store, &mut Vec::new()).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_capabilities() {
        let handler = SingleHandler::new("x.gz", ".gz", &Config::default());
        assert!(!handler.capabilities().random_read);
    }
}
