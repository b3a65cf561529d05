//! ZIP format handler.
//!
//! Reads the central directory (located via the end-of-central-directory
//! record at the tail of the file) and serves members by re-parsing their
//! local headers. Rebuild writes local headers followed by a fresh central
//! directory; member data is re-compressed with deflate. Modification times
//! use DOS format and therefore 2-second resolution.
//!
//! ZIP64 is out of scope: archives or members at the 4 GiB / 65535-entry
//! limits are rejected with a format error rather than written corrupt.

use std::io::{self, Read, Seek, SeekFrom, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use tracing::debug;

use crate::handler::{ArchiveHandler, Capabilities, CountingWriter, SourceFn};
use crate::spool::{copy_chunked, SpoolWriter};
use crate::store::{ContentSource, Entry, EntryKind, EntryStore};
use crate::{Config, EntryPath, Error, Result, Timestamp};

const LOCAL_SIG: u32 = 0x0403_4b50;
const CENTRAL_SIG: u32 = 0x0201_4b50;
const EOCD_SIG: u32 = 0x0605_4b50;

const LOCAL_HEADER_LEN: usize = 30;
const CENTRAL_HEADER_LEN: usize = 46;
const EOCD_LEN: usize = 22;
/// EOCD length plus the maximum trailing comment.
const EOCD_SEARCH_WINDOW: u64 = (EOCD_LEN + u16::MAX as usize) as u64;

const METHOD_STORE: u16 = 0;
const METHOD_DEFLATE: u16 = 8;

/// General-purpose flag bit 11: names are UTF-8.
const FLAG_UTF8: u16 = 0x0800;
/// General-purpose flag bit 0: member is encrypted.
const FLAG_ENCRYPTED: u16 = 0x0001;

/// Version-made-by: host 3 (Unix), appnote version 3.0.
const VERSION_MADE_BY: u16 = (3 << 8) | 30;
const VERSION_NEEDED: u16 = 20;

/// DOS directory attribute bit in external attributes.
const DOS_DIR_ATTR: u32 = 0x10;

/// Unix file-type bits for symlinks, stored in the high half of external
/// attributes.
const UNIX_SYMLINK_TYPE: u32 = 0o120000;

/// Handler for the ZIP container format.
pub struct ZipHandler {
    archive: String,
    config: Config,
}

impl ZipHandler {
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

    /// Locates and parses the end-of-central-directory record.
    fn read_eocd(&self, r: &mut dyn Read, file_len: u64, tail_start: u64) -> Result<Eocd> {
        let tail_len = (file_len - tail_start) as usize;
        let mut tail = vec![0u8; tail_len];
        r.read_exact(&mut tail)?;

        let mut pos = tail_len.checked_sub(EOCD_LEN);
        while let Some(i) = pos {
            if u32_at(&tail, i) == EOCD_SIG {
                let entries_total = u16_at(&tail, i + 10);
                let cd_size = u32_at(&tail, i + 12);
                let cd_offset = u32_at(&tail, i + 16);
                if entries_total == u16::MAX || cd_size == u32::MAX || cd_offset == u32::MAX {
                    return Err(self.format_err("ZIP64 archives are not supported"));
                }
                return Ok(Eocd {
                    entries_total,
                    cd_offset: cd_offset as u64,
                });
            }
            pos = i.checked_sub(1);
        }
        Err(self.format_err("end of central directory record not found"))
    }

    fn parse_central_entry(&self, r: &mut dyn Read) -> Result<Entry> {
        let mut header = [0u8; CENTRAL_HEADER_LEN];
        r.read_exact(&mut header)
            .map_err(|_| self.format_err("truncated central directory"))?;
        if u32_at(&header, 0) != CENTRAL_SIG {
            return Err(self.format_err("bad central directory signature"));
        }

        let version_made_by = u16_at(&header, 4);
        let flags = u16_at(&header, 8);
        let method = u16_at(&header, 10);
        let mod_time = u16_at(&header, 12);
        let mod_date = u16_at(&header, 14);
        let crc = u32_at(&header, 16);
        let compressed_size = u32_at(&header, 20) as u64;
        let uncompressed_size = u32_at(&header, 24) as u64;
        let name_len = u16_at(&header, 28) as usize;
        let extra_len = u16_at(&header, 30) as u64;
        let comment_len = u16_at(&header, 32) as u64;
        let external_attrs = u32_at(&header, 38);
        let local_offset = u32_at(&header, 42) as u64;

        if flags & FLAG_ENCRYPTED != 0 {
            return Err(self.format_err("encrypted entries are not supported"));
        }

        let mut name_bytes = vec![0u8; name_len];
        r.read_exact(&mut name_bytes)
            .map_err(|_| self.format_err("truncated central directory entry name"))?;
        skip(r, extra_len + comment_len)?;

        let raw_name = String::from_utf8_lossy(&name_bytes).into_owned();
        let is_dir = raw_name.ends_with('/')
            || (external_attrs & DOS_DIR_ATTR != 0 && uncompressed_size == 0);
        let trimmed = raw_name.trim_end_matches('/');
        let path = EntryPath::new(trimmed)
            .map_err(|e| self.format_err(format!("unsafe entry name '{}': {}", raw_name, e)))?;

        let mode = if version_made_by >> 8 == 3 {
            Some((external_attrs >> 16) & 0o7777)
        } else {
            None
        };

        Ok(Entry {
            path,
            kind: if is_dir { EntryKind::Dir } else { EntryKind::File },
            size: uncompressed_size,
            modified: Timestamp::from_dos(mod_date, mod_time),
            mode,
            source: ContentSource::Original {
                offset: local_offset,
                compressed_size,
                method,
                crc: Some(crc),
            },
        })
    }

    /// Compresses one member's plain bytes, returning the prepared data and
    /// its crc/size triple.
    fn prepare_member(&self, plain: &mut dyn Read) -> Result<PreparedMember> {
        let mut spool_writer = SpoolWriter::new(&self.config);
        let mut hasher = crc32fast::Hasher::new();
        let mut uncompressed_size = 0u64;
        {
            let mut encoder = DeflateEncoder::new(&mut spool_writer, Compression::default());
            let mut buf = vec![0u8; self.config.zip_buffer_size];
            loop {
                let n = plain.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                encoder.write_all(&buf[..n])?;
                uncompressed_size += n as u64;
            }
            encoder.finish()?;
        }
        let deflated = spool_writer.finish()?;

        // Tiny or incompressible members are stored raw.
        if uncompressed_size == 0 {
            return Ok(PreparedMember {
                data: crate::spool::Spool::empty(),
                method: METHOD_STORE,
                crc: hasher.finalize(),
                uncompressed_size,
            });
        }
        Ok(PreparedMember {
            data: deflated,
            method: METHOD_DEFLATE,
            crc: hasher.finalize(),
            uncompressed_size,
        })
    }
}

struct Eocd {
    entries_total: u16,
    cd_offset: u64,
}

struct PreparedMember {
    data: crate::spool::Spool,
    method: u16,
    crc: u32,
    uncompressed_size: u64,
}

struct CentralRecord {
    name: Vec<u8>,
    method: u16,
    mod_time: u16,
    mod_date: u16,
    crc: u32,
    compressed_size: u32,
    uncompressed_size: u32,
    external_attrs: u32,
    local_offset: u32,
}

impl ArchiveHandler for ZipHandler {
    fn format_name(&self) -> &'static str {
        "zip"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            random_read: true,
            append_in_place: false,
        }
    }

    fn load(&self, source: &SourceFn<'_>) -> Result<EntryStore> {
        let mut r = source()?;
        let file_len = r.seek(SeekFrom::End(0))?;
        if file_len < EOCD_LEN as u64 {
            return Err(self.format_err("file too short to be a ZIP archive"));
        }

        let tail_start = file_len.saturating_sub(EOCD_SEARCH_WINDOW);
        r.seek(SeekFrom::Start(tail_start))?;
        let eocd = self.read_eocd(&mut r, file_len, tail_start)?;

        r.seek(SeekFrom::Start(eocd.cd_offset))?;
        let mut entries = Vec::with_capacity(eocd.entries_total as usize);
        for _ in 0..eocd.entries_total {
            entries.push(self.parse_central_entry(&mut r)?);
        }
        debug!(archive = %self.archive, entries = entries.len(), "loaded zip central directory");
        Ok(EntryStore::from_loaded(entries))
    }

    fn open_entry(&self, source: &SourceFn<'_>, entry: &Entry) -> Result<Box<dyn Read>> {
        let ContentSource::Original {
            offset,
            compressed_size,
            method,
            crc,
        } = entry.source
        else {
            return Err(Error::State(format!(
                "zip open_entry on non-original entry '{}'",
                entry.path
            )));
        };

        let mut r = source()?;
        r.seek(SeekFrom::Start(offset))?;
        let mut header = [0u8; LOCAL_HEADER_LEN];
        r.read_exact(&mut header)
            .map_err(|_| self.format_err(format!("truncated local header for '{}'", entry.path)))?;
        if u32_at(&header, 0) != LOCAL_SIG {
            return Err(self.format_err(format!("bad local header signature for '{}'", entry.path)));
        }
        let name_len = u16_at(&header, 26) as u64;
        let extra_len = u16_at(&header, 28) as u64;
        r.seek(SeekFrom::Current((name_len + extra_len) as i64))?;

        let limited = r.take(compressed_size);
        let plain: Box<dyn Read> = match method {
            METHOD_STORE => Box::new(limited),
            METHOD_DEFLATE => Box::new(DeflateDecoder::new(limited)),
            other => {
                return Err(self.format_err(format!(
                    "unsupported compression method {} for '{}'",
                    other, entry.path
                )));
            }
        };

        match crc {
            Some(expected) => Ok(Box::new(CrcVerifyingReader::new(
                plain,
                expected,
                entry.path.as_str(),
            ))),
            None => Ok(plain),
        }
    }

    fn serialize(
        &self,
        source: Option<&SourceFn<'_>>,
        store: &EntryStore,
        sink: &mut dyn Write,
    ) -> Result<()> {
        let mut out = CountingWriter::new(sink);
        let mut central = Vec::new();

        for entry in store.iter_live() {
            let record = self.write_member(&mut out, source, entry)?;
            central.push(record);
        }
        if central.len() > u16::MAX as usize {
            return Err(self.format_err("too many entries for a ZIP archive"));
        }

        let cd_start = out.written();
        if cd_start > u32::MAX as u64 {
            return Err(self.format_err("central directory offset exceeds 4 GiB"));
        }
        for record in &central {
            write_central_header(&mut out, record)?;
        }
        let cd_size = out.written() - cd_start;

        let mut eocd = Vec::with_capacity(EOCD_LEN);
        eocd.extend_from_slice(&EOCD_SIG.to_le_bytes());
        eocd.extend_from_slice(&[0, 0, 0, 0]); // disk numbers
        eocd.extend_from_slice(&(central.len() as u16).to_le_bytes());
        eocd.extend_from_slice(&(central.len() as u16).to_le_bytes());
        eocd.extend_from_slice(&(cd_size as u32).to_le_bytes());
        eocd.extend_from_slice(&(cd_start as u32).to_le_bytes());
        eocd.extend_from_slice(&[0, 0]); // comment length
        out.write_all(&eocd)?;
        out.flush()?;

        debug!(archive = %self.archive, entries = central.len(), "serialized zip archive");
        Ok(())
    }
}

impl ZipHandler {
    fn write_member(
        &self,
        out: &mut CountingWriter<'_>,
        source: Option<&SourceFn<'_>>,
        entry: &Entry,
    ) -> Result<CentralRecord> {
        let local_offset = out.written();
        if local_offset > u32::MAX as u64 {
            return Err(self.format_err("archive exceeds 4 GiB"));
        }

        let mut name = entry.path.as_str().as_bytes().to_vec();
        let (prepared, external_attrs) = match &entry.kind {
            EntryKind::Dir => {
                name.push(b'/');
                let mode = entry.mode.unwrap_or(0o755);
                (
                    PreparedMember {
                        data: crate::spool::Spool::empty(),
                        method: METHOD_STORE,
                        crc: 0,
                        uncompressed_size: 0,
                    },
                    DOS_DIR_ATTR | (mode << 16),
                )
            }
            EntryKind::Symlink { target } => {
                // ZIP has no native link kind in this subset; store the
                // target as member data with the Unix symlink type bits.
                let mut reader: &[u8] = target.as_bytes();
                let prepared = self.prepare_member(&mut reader)?;
                let mode = UNIX_SYMLINK_TYPE | entry.mode.unwrap_or(0o777);
                (prepared, mode << 16)
            }
            EntryKind::File => {
                let mut reader = crate::handler::entry_reader(self, source, entry)?;
                let prepared = self.prepare_member(&mut *reader)?;
                let mode = entry.mode.unwrap_or(0o644);
                (prepared, mode << 16)
            }
        };

        if name.len() > u16::MAX as usize {
            return Err(self.format_err(format!("entry name too long: '{}'", entry.path)));
        }
        if prepared.uncompressed_size > u32::MAX as u64 || prepared.data.len() > u32::MAX as u64 {
            return Err(self.format_err(format!(
                "entry '{}' exceeds the 4 GiB ZIP limit",
                entry.path
            )));
        }

        let (mod_date, mod_time) = entry.modified.to_dos();
        let record = CentralRecord {
            name,
            method: prepared.method,
            mod_time,
            mod_date,
            crc: prepared.crc,
            compressed_size: prepared.data.len() as u32,
            uncompressed_size: prepared.uncompressed_size as u32,
            external_attrs,
            local_offset: local_offset as u32,
        };

        let mut header = Vec::with_capacity(LOCAL_HEADER_LEN);
        header.extend_from_slice(&LOCAL_SIG.to_le_bytes());
        header.extend_from_slice(&VERSION_NEEDED.to_le_bytes());
        header.extend_from_slice(&FLAG_UTF8.to_le_bytes());
        header.extend_from_slice(&record.method.to_le_bytes());
        header.extend_from_slice(&record.mod_time.to_le_bytes());
        header.extend_from_slice(&record.mod_date.to_le_bytes());
        header.extend_from_slice(&record.crc.to_le_bytes());
        header.extend_from_slice(&record.compressed_size.to_le_bytes());
        header.extend_from_slice(&record.uncompressed_size.to_le_bytes());
        header.extend_from_slice(&(record.name.len() as u16).to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes()); // extra length
        out.write_all(&header)?;
        out.write_all(&record.name)?;
        copy_chunked(
            &mut *prepared.data.reader()?,
            out,
            self.config.zip_buffer_size,
        )?;

        Ok(record)
    }
}

fn write_central_header(out: &mut CountingWriter<'_>, record: &CentralRecord) -> Result<()> {
    let mut header = Vec::with_capacity(CENTRAL_HEADER_LEN);
    header.extend_from_slice(&CENTRAL_SIG.to_le_bytes());
    header.extend_from_slice(&VERSION_MADE_BY.to_le_bytes());
    header.extend_from_slice(&VERSION_NEEDED.to_le_bytes());
    header.extend_from_slice(&FLAG_UTF8.to_le_bytes());
    header.extend_from_slice(&record.method.to_le_bytes());
    header.extend_from_slice(&record.mod_time.to_le_bytes());
    header.extend_from_slice(&record.mod_date.to_le_bytes());
    header.extend_from_slice(&record.crc.to_le_bytes());
    header.extend_from_slice(&record.compressed_size.to_le_bytes());
    header.extend_from_slice(&record.uncompressed_size.to_le_bytes());
    header.extend_from_slice(&(record.name.len() as u16).to_le_bytes());
    header.extend_from_slice(&0u16.to_le_bytes()); // extra length
    header.extend_from_slice(&0u16.to_le_bytes()); // comment length
    header.extend_from_slice(&0u16.to_le_bytes()); // disk number start
    header.extend_from_slice(&0u16.to_le_bytes()); // internal attributes
    header.extend_from_slice(&record.external_attrs.to_le_bytes());
    header.extend_from_slice(&record.local_offset.to_le_bytes());
    out.write_all(&header)?;
    out.write_all(&record.name)?;
    Ok(())
}

/// Verifies the stored CRC-32 once the member has been read to its end.
struct CrcVerifyingReader {
    inner: Box<dyn Read>,
    hasher: crc32fast::Hasher,
    expected: u32,
    entry: String,
    verified: bool,
}

impl CrcVerifyingReader {
    fn new(inner: Box<dyn Read>, expected: u32, entry: &str) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
            expected,
            entry: entry.to_string(),
            verified: false,
        }
    }
}

impl Read for CrcVerifyingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.hasher.update(&buf[..n]);
        } else if !self.verified {
            self.verified = true;
            let actual = self.hasher.clone().finalize();
            if actual != self.expected {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "CRC mismatch for entry '{}': expected {:#010x}, got {:#010x}",
                        self.entry, self.expected, actual
                    ),
                ));
            }
        }
        Ok(n)
    }
}

fn u16_at(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn u32_at(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn skip(r: &mut dyn Read, mut n: u64) -> Result<()> {
    let mut buf = [0u8; 512];
    while n > 0 {
        let take = n.min(buf.len() as u64) as usize;
        r.read_exact(&mut buf[..take])?;
        n -= take as u64;
    }
    Ok(())
}
