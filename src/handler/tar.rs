//! TAR format handler.
//!
//! TAR has no index: load performs a full sequential scan of 512-byte
//! header blocks, recording payload offsets so later entry opens are a
//! bounded seek-and-read. Rebuild re-emits headers and payloads in entry
//! order and terminates with two zero blocks.
//!
//! Names longer than the 100-byte header field are written as GNU `L`
//! long-name records; both `L`/`K` records and the ustar prefix field are
//! honored on read. Symlinks (`2`) are carried as opaque entries and never
//! followed.

use std::io::{Read, Seek, SeekFrom, Write};

use tracing::debug;

use crate::handler::{ArchiveHandler, Capabilities, SourceFn};
use crate::spool::copy_chunked;
use crate::store::{ContentSource, Entry, EntryKind, EntryStore};
use crate::{Config, EntryPath, Error, Result, Timestamp};

const BLOCK: u64 = 512;

/// Largest value an 11-digit octal size field can carry (8 GiB).
const MAX_OCTAL: u64 = 0o77777777777;

/// Name used by GNU long-name/long-link pseudo entries.
const LONG_NAME_MARKER: &[u8] = b"././@LongLink";

/// Handler for the TAR container format.
pub struct TarHandler {
    archive: String,
    config: Config,
}

impl TarHandler {
    /// Creates a handler for the named archive.
    pub fn new(archive: &str, config: &Config) -> Self {
        Self {
            archive: archive.to_string(),
            config: config.clone(),
        }
    }

    fn format_err(&self, reason: impl Into<String>) -> Error {
        Error::format(&self.archive, reason)
    }

    fn parse_octal(&self, field: &[u8], what: &str) -> Result<u64> {
        let mut value = 0u64;
        let mut seen = false;
        for &b in field {
            match b {
                b'0'..=b'7' => {
                    value = value
                        .checked_mul(8)
                        .and_then(|v| v.checked_add((b - b'0') as u64))
                        .ok_or_else(|| self.format_err(format!("{} field overflows", what)))?;
                    seen = true;
                }
                b' ' if !seen => continue,
                b'\0' | b' ' => break,
                _ => {
                    return Err(self.format_err(format!("invalid octal digit in {} field", what)));
                }
            }
        }
        Ok(value)
    }

    fn verify_checksum(&self, header: &[u8; BLOCK as usize], offset: u64) -> Result<()> {
        let stored = self.parse_octal(&header[148..156], "checksum")?;
        let mut sum = 0u64;
        for (i, &b) in header.iter().enumerate() {
            sum += if (148..156).contains(&i) { 0x20 } else { b as u64 };
        }
        if sum != stored {
            return Err(self.format_err(format!(
                "header checksum mismatch at offset {:#x}",
                offset
            )));
        }
        Ok(())
    }
}

fn trimmed_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

impl ArchiveHandler for TarHandler {
    fn format_name(&self) -> &'static str {
        "tar"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            // Offset-indexed once the initial scan has run.
            random_read: true,
            append_in_place: false,
        }
    }

    fn load(&self, source: &SourceFn<'_>) -> Result<EntryStore> {
        let mut r = source()?;
        let mut entries = Vec::new();
        let mut pos = 0u64;
        let mut pending_name: Option<String> = None;
        let mut pending_link: Option<String> = None;
        let mut header = [0u8; BLOCK as usize];

        loop {
            match r.read_exact(&mut header) {
                Ok(()) => {}
                // A missing terminator at a block boundary ends the archive.
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let header_offset = pos;
            pos += BLOCK;

            if header.iter().all(|&b| b == 0) {
                break;
            }
            self.verify_checksum(&header, header_offset)?;

            let size = self.parse_octal(&header[124..136], "size")?;
            let padded = size.div_ceil(BLOCK) * BLOCK;
            let typeflag = header[156];

            match typeflag {
                b'L' | b'K' => {
                    // Far above any real path; rejects hostile headers
                    // before the payload allocation.
                    if size > 65_536 {
                        return Err(self.format_err("long-name record too large"));
                    }
                    let mut buf = vec![0u8; size as usize];
                    r.read_exact(&mut buf)?;
                    let text = trimmed_str(&buf);
                    if typeflag == b'L' {
                        pending_name = Some(text);
                    } else {
                        pending_link = Some(text);
                    }
                    r.seek(SeekFrom::Current((padded - size) as i64))?;
                    pos += padded;
                    continue;
                }
                // pax extended headers carry metadata we do not model.
                b'x' | b'g' => {
                    r.seek(SeekFrom::Current(padded as i64))?;
                    pos += padded;
                    continue;
                }
                _ => {}
            }

            let raw_name = match pending_name.take() {
                Some(long) => long,
                None => {
                    let name = trimmed_str(&header[0..100]);
                    let prefix = trimmed_str(&header[345..500]);
                    if prefix.is_empty() {
                        name
                    } else {
                        format!("{}/{}", prefix, name)
                    }
                }
            };
            let linkname = pending_link
                .take()
                .unwrap_or_else(|| trimmed_str(&header[157..257]));

            let kind = match typeflag {
                b'5' => EntryKind::Dir,
                _ if raw_name.ends_with('/') => EntryKind::Dir,
                b'2' => EntryKind::Symlink { target: linkname },
                b'0' | 0 | b'7' => EntryKind::File,
                // Hard links, devices, fifos: skipped, payload and all.
                _ => {
                    r.seek(SeekFrom::Current(padded as i64))?;
                    pos += padded;
                    continue;
                }
            };

            let path = EntryPath::new(raw_name.trim_end_matches('/')).map_err(|e| {
                self.format_err(format!("unsafe entry name '{}': {}", raw_name, e))
            })?;
            let mode = Some(self.parse_octal(&header[100..108], "mode")? as u32 & 0o7777);
            let mtime = self.parse_octal(&header[136..148], "mtime")?;
            let logical_size = if kind.is_file() { size } else { 0 };

            entries.push(Entry {
                path,
                kind,
                size: logical_size,
                modified: Timestamp::from_unix(mtime),
                mode,
                source: ContentSource::Original {
                    offset: pos,
                    compressed_size: size,
                    method: 0,
                    crc: None,
                },
            });

            r.seek(SeekFrom::Current(padded as i64))?;
            pos += padded;
        }

        debug!(archive = %self.archive, entries = entries.len(), "scanned tar archive");
        Ok(EntryStore::from_loaded(entries))
    }

    fn open_entry(&self, source: &SourceFn<'_>, entry: &Entry) -> Result<Box<dyn Read>> {
        let ContentSource::Original {
            offset,
            compressed_size,
            ..
        } = entry.source
        else {
            return Err(Error::State(format!(
                "tar open_entry on non-original entry '{}'",
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
        let mut count = 0usize;
        for entry in store.iter_live() {
            self.write_record(sink, source, entry)?;
            count += 1;
        }
        // Two zero blocks terminate the archive.
        sink.write_all(&[0u8; 2 * BLOCK as usize])?;
        sink.flush()?;
        debug!(archive = %self.archive, entries = count, "serialized tar archive");
        Ok(())
    }
}

impl TarHandler {
    fn write_record(
        &self,
        sink: &mut dyn Write,
        source: Option<&SourceFn<'_>>,
        entry: &Entry,
    ) -> Result<()> {
        let mut name = entry.path.as_str().to_string();
        let (typeflag, linkname) = match &entry.kind {
            EntryKind::Dir => {
                name.push('/');
                (b'5', String::new())
            }
            EntryKind::Symlink { target } => (b'2', target.clone()),
            EntryKind::File => (b'0', String::new()),
        };

        if name.len() > 100 {
            self.write_long_record(sink, b'L', name.as_bytes())?;
        }
        if linkname.len() > 100 {
            self.write_long_record(sink, b'K', linkname.as_bytes())?;
        }

        let size = if entry.kind.is_file() { entry.size } else { 0 };
        if size > MAX_OCTAL {
            return Err(self.format_err(format!(
                "entry '{}' exceeds the 8 GiB TAR size limit",
                entry.path
            )));
        }

        let default_mode = if entry.kind.is_dir() { 0o755 } else { 0o644 };
        self.write_header(
            sink,
            truncated(name.as_bytes(), 100),
            entry.mode.unwrap_or(default_mode),
            size,
            entry.modified.as_secs().min(MAX_OCTAL),
            typeflag,
            truncated(linkname.as_bytes(), 100),
        )?;

        if entry.kind.is_file() {
            let mut reader = crate::handler::entry_reader(self, source, entry)?;
            let written = copy_chunked(&mut *reader, sink, self.config.tar_buffer_size)?;
            if written != size {
                return Err(self.format_err(format!(
                    "entry '{}' produced {} bytes, expected {}",
                    entry.path, written, size
                )));
            }
            let padding = (size.div_ceil(BLOCK) * BLOCK - size) as usize;
            sink.write_all(&vec![0u8; padding])?;
        }
        Ok(())
    }

    fn write_long_record(&self, sink: &mut dyn Write, typeflag: u8, text: &[u8]) -> Result<()> {
        let size = text.len() as u64 + 1; // trailing NUL
        self.write_header(sink, LONG_NAME_MARKER, 0o644, size, 0, typeflag, b"")?;
        sink.write_all(text)?;
        let padding = (size.div_ceil(BLOCK) * BLOCK - size) as usize + 1;
        sink.write_all(&vec![0u8; padding])?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn write_header(
        &self,
        sink: &mut dyn Write,
        name: &[u8],
        mode: u32,
        size: u64,
        mtime: u64,
        typeflag: u8,
        linkname: &[u8],
    ) -> Result<()> {
        let mut block = [0u8; BLOCK as usize];
        block[..name.len()].copy_from_slice(name);
        write_octal(&mut block[100..108], mode as u64);
        write_octal(&mut block[108..116], 0); // uid
        write_octal(&mut block[116..124], 0); // gid
        write_octal(&mut block[124..136], size);
        write_octal(&mut block[136..148], mtime);
        block[156] = typeflag;
        block[157..157 + linkname.len()].copy_from_slice(linkname);
        block[257..263].copy_from_slice(b"ustar\0");
        block[263..265].copy_from_slice(b"00");

        // Checksum is computed with its own field as spaces.
        block[148..156].fill(0x20);
        let sum: u64 = block.iter().map(|&b| b as u64).sum();
        let chk = format!("{:06o}\0 ", sum);
        block[148..156].copy_from_slice(chk.as_bytes());

        sink.write_all(&block)?;
        Ok(())
    }
}

fn truncated(bytes: &[u8], limit: usize) -> &[u8] {
    &bytes[..bytes.len().min(limit)]
}

fn write_octal(field: &mut [u8], value: u64) {
    // Field is digits followed by a NUL, e.g. "%07o\0" for 8-byte fields.
    let digits = field.len() - 1;
    let text = format!("{:0width$o}", value, width = digits);
    field[..digits].copy_from_slice(text.as_bytes());
    field[digits] = 0;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spool::Spool;

    fn handler() -> TarHandler {
        TarHandler::new("test.tar", &Config::default())
    }

    fn source_of(bytes: Vec<u8>) -> impl Fn() -> Result<Box<dyn crate::spool::ReadSeek>> {
        let spool = Spool::from_bytes(bytes);
        move || spool.reader()
    }

    fn staged_file(name: &str, data: &[u8]) -> Entry {
        Entry::overlay_file(
            EntryPath::new(name).unwrap(),
            Spool::from_bytes(data.to_vec()),
            Timestamp::from_unix(1_500_000_000),
        )
    }

    fn read_entry(handler: &TarHandler, bytes: &[u8], name: &str) -> Vec<u8> {
        let source = source_of(bytes.to_vec());
        let store = handler.load(&source).unwrap();
        let entry = store.get(name).unwrap();
        let mut out = Vec::new();
        handler
            .open_entry(&source, entry)
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_empty_archive_is_two_zero_blocks() {
        let handler = handler();
        let mut bytes = Vec::new();
        handler
            .serialize(None, &EntryStore::new(), &mut bytes)
            .unwrap();
        assert_eq!(bytes.len(), 1024);
        assert!(bytes.iter().all(|&b| b == 0));

        let store = handler.load(&source_of(bytes)).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_roundtrip_files() {
        let handler = handler();
        let mut store = EntryStore::new();
        store.put(staged_file("hello.txt", b"hello tar")).unwrap();
        store.put(staged_file("dir/data.bin", &[9u8; 700])).unwrap();

        let mut bytes = Vec::new();
        handler.serialize(None, &store, &mut bytes).unwrap();
        assert_eq!(bytes.len() % 512, 0);

        let loaded = handler.load(&source_of(bytes.clone())).unwrap();
        let names: Vec<_> = loaded.iter_live().map(|e| e.path.as_str()).collect();
        assert_eq!(names, vec!["hello.txt", "dir/data.bin"]);

        assert_eq!(read_entry(&handler, &bytes, "hello.txt"), b"hello tar");
        assert_eq!(read_entry(&handler, &bytes, "dir/data.bin"), vec![9u8; 700]);
    }

    #[test]
    fn test_mtime_preserved_to_the_second() {
        let handler = handler();
        let mut store = EntryStore::new();
        store.put(staged_file("t", b"x")).unwrap();

        let mut bytes = Vec::new();
        handler.serialize(None, &store, &mut bytes).unwrap();
        let loaded = handler.load(&source_of(bytes)).unwrap();
        assert_eq!(loaded.get("t").unwrap().modified.as_secs(), 1_500_000_000);
    }

    #[test]
    fn test_directory_roundtrip() {
        let handler = handler();
        let mut store = EntryStore::new();
        store
            .put(Entry::dir(
                EntryPath::new("subdir").unwrap(),
                Timestamp::from_unix(1_500_000_000),
            ))
            .unwrap();

        let mut bytes = Vec::new();
        handler.serialize(None, &store, &mut bytes).unwrap();
        let loaded = handler.load(&source_of(bytes)).unwrap();
        let entry = loaded.get("subdir").unwrap();
        assert!(entry.kind.is_dir());
        assert_eq!(entry.size, 0);
    }

    #[test]
    fn test_symlink_passthrough() {
        let handler = handler();
        let mut store = EntryStore::new();
        store
            .put(Entry {
                path: EntryPath::new("link").unwrap(),
                kind: EntryKind::Symlink {
                    target: "../outside".into(),
                },
                size: 0,
                modified: Timestamp::from_unix(1_500_000_000),
                mode: Some(0o777),
                source: ContentSource::Overlay(Spool::empty()),
            })
            .unwrap();

        let mut bytes = Vec::new();
        handler.serialize(None, &store, &mut bytes).unwrap();
        let loaded = handler.load(&source_of(bytes)).unwrap();
        match &loaded.get("link").unwrap().kind {
            EntryKind::Symlink { target } => assert_eq!(target, "../outside"),
            other => panic!("expected symlink, got {:?}", other),
        }
    }

    #[test]
    fn test_long_name_roundtrip() {
        let handler = handler();
        let long_name = format!("{}/{}", "d".repeat(80), "f".repeat(80));
        let mut store = EntryStore::new();
        store.put(staged_file(&long_name, b"deep")).unwrap();

        let mut bytes = Vec::new();
        handler.serialize(None, &store, &mut bytes).unwrap();
        let loaded = handler.load(&source_of(bytes.clone())).unwrap();
        assert!(loaded.get(&long_name).is_some());
        assert_eq!(read_entry(&handler, &bytes, &long_name), b"deep");
    }

    #[test]
    fn test_reserialize_from_original_sources() {
        let handler = handler();
        let mut store = EntryStore::new();
        store.put(staged_file("a.txt", b"first")).unwrap();
        let mut first = Vec::new();
        handler.serialize(None, &store, &mut first).unwrap();

        let source = source_of(first);
        let loaded = handler.load(&source).unwrap();
        let mut second = Vec::new();
        handler
            .serialize(Some(&source), &loaded, &mut second)
            .unwrap();
        assert_eq!(read_entry(&handler, &second, "a.txt"), b"first");
    }

    #[test]
    fn test_checksum_corruption_detected() {
        let handler = handler();
        let mut store = EntryStore::new();
        store.put(staged_file("x", b"payload")).unwrap();
        let mut bytes = Vec::new();
        handler.serialize(None, &store, &mut bytes).unwrap();

        bytes[0] ^= 0xFF; // corrupt the name field of the first header
        let err = handler.load(&source_of(bytes)).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_traversal_name_rejected() {
        let handler = handler();
        // Hand-build a header whose name escapes the archive root.
        let mut store = EntryStore::new();
        store.put(staged_file("placeholder", b"x")).unwrap();
        let mut bytes = Vec::new();
        handler.serialize(None, &store, &mut bytes).unwrap();
        bytes[..14].copy_from_slice(b"../escape\0\0\0\0\0");
        // Fix the checksum so only the name is invalid.
        let mut block = [0u8; 512];
        block.copy_from_slice(&bytes[..512]);
        block[148..156].fill(0x20);
        let sum: u64 = block.iter().map(|&b| b as u64).sum();
        let chk = format!("{:06o}\0 ", sum);
        bytes[148..156].copy_from_slice(chk.as_bytes());

        let err = handler.load(&source_of(bytes)).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_capabilities() {
        let caps = handler().capabilities();
        assert!(caps.random_read);
        assert!(!caps.append_in_place);
    }
}
