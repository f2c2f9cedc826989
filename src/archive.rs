//! ZIP container access for EPUB packages.
//!
//! The reader keeps the whole archive in memory and exposes entries in
//! physical (central-directory) order, which the container checks depend
//! on: the `mimetype` entry must be the first physical entry, stored
//! uncompressed, with no extra field on its local header.
//!
//! The writer holds the mirror-image invariant by construction: whenever an
//! entry named `mimetype` is present among the inputs, in any order and
//! with any flags, the output places it at index 0, stored, with an empty
//! extra field. Output is published atomically (temp file + rename) so a
//! failed write never leaves a partial archive behind.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::{EpubError, ZipError};

const EOCD_SIG: u32 = 0x0605_4b50;
const CENTRAL_SIG: u32 = 0x0201_4b50;
const LOCAL_SIG: u32 = 0x0403_4b50;

const EOCD_LEN: usize = 22;
const CENTRAL_FIXED_LEN: usize = 46;
const LOCAL_FIXED_LEN: usize = 30;

/// Compression method: stored (no compression).
pub const METHOD_STORED: u16 = 0;
/// Compression method: raw deflate.
pub const METHOD_DEFLATE: u16 = 8;

// Fixed DOS timestamp for written entries (1980-01-01); repair output stays
// byte-deterministic apart from content changes.
const DOS_TIME: u16 = 0;
const DOS_DATE: u16 = 0x0021;

/// Metadata for one archive entry, in physical order.
#[derive(Clone, Debug)]
pub struct Entry {
    /// Slash-separated, case-sensitive entry name.
    pub name: String,
    /// Raw compression method from the central directory.
    pub method: u16,
    /// Extra-field length recorded on the entry's local header.
    pub local_extra_len: u16,
    crc32: u32,
    compressed_size: u32,
    uncompressed_size: u32,
    local_offset: u32,
}

impl Entry {
    /// Whether this entry is a directory marker (`name/` with no bytes).
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/') && self.uncompressed_size == 0
    }
}

/// Read-only snapshot of one EPUB container.
pub struct Archive {
    data: Vec<u8>,
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl Archive {
    /// Open an archive from a file path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EpubError> {
        let data = fs::read(path)?;
        Ok(Self::from_bytes(data)?)
    }

    /// Open an archive from raw bytes (e.g. a browser upload).
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, ZipError> {
        let entries = parse_central_directory(&data)?;
        let mut index = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            // First occurrence wins for duplicate names.
            index.entry(entry.name.clone()).or_insert(i);
        }
        Ok(Self { data, entries, index })
    }

    /// All entries in physical order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Entry names in physical order.
    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Lookup entry metadata by exact name.
    pub fn entry(&self, name: &str) -> Option<&Entry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    /// Whether an entry with this exact name exists.
    pub fn has(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Decompress and return an entry's bytes, verifying the stored CRC.
    pub fn read(&self, name: &str) -> Result<Vec<u8>, ZipError> {
        let entry = self
            .entry(name)
            .ok_or_else(|| ZipError::EntryNotFound(name.to_string()))?;
        let raw = self.compressed_slice(entry)?;
        let bytes = match entry.method {
            METHOD_STORED => raw.to_vec(),
            METHOD_DEFLATE => miniz_oxide::inflate::decompress_to_vec(raw).map_err(|_| {
                ZipError::BadDeflate {
                    name: entry.name.clone(),
                }
            })?,
            method => {
                return Err(ZipError::UnsupportedMethod {
                    name: entry.name.clone(),
                    method,
                })
            }
        };
        if bytes.len() as u64 != u64::from(entry.uncompressed_size)
            || crc32fast::hash(&bytes) != entry.crc32
        {
            return Err(ZipError::CrcMismatch {
                name: entry.name.clone(),
            });
        }
        Ok(bytes)
    }

    fn compressed_slice(&self, entry: &Entry) -> Result<&[u8], ZipError> {
        let off = entry.local_offset as usize;
        let fixed = self
            .data
            .get(off..off + LOCAL_FIXED_LEN)
            .ok_or(ZipError::Truncated("local header"))?;
        if read_u32(fixed, 0) != LOCAL_SIG {
            return Err(ZipError::BadSignature("local header"));
        }
        let name_len = read_u16(fixed, 26) as usize;
        let extra_len = read_u16(fixed, 28) as usize;
        let start = off + LOCAL_FIXED_LEN + name_len + extra_len;
        let end = start + entry.compressed_size as usize;
        self.data.get(start..end).ok_or(ZipError::Truncated("entry data"))
    }
}

fn parse_central_directory(data: &[u8]) -> Result<Vec<Entry>, ZipError> {
    let eocd = find_eocd(data)?;
    let record = &data[eocd..eocd + EOCD_LEN];
    let entry_count = read_u16(record, 10) as usize;
    let central_offset = read_u32(record, 16) as usize;

    let mut entries = Vec::with_capacity(entry_count);
    let mut pos = central_offset;
    for _ in 0..entry_count {
        let fixed = data
            .get(pos..pos + CENTRAL_FIXED_LEN)
            .ok_or(ZipError::Truncated("central directory"))?;
        if read_u32(fixed, 0) != CENTRAL_SIG {
            return Err(ZipError::BadSignature("central directory"));
        }
        let name_len = read_u16(fixed, 28) as usize;
        let extra_len = read_u16(fixed, 30) as usize;
        let comment_len = read_u16(fixed, 32) as usize;
        let name_bytes = data
            .get(pos + CENTRAL_FIXED_LEN..pos + CENTRAL_FIXED_LEN + name_len)
            .ok_or(ZipError::Truncated("entry name"))?;
        let name = String::from_utf8_lossy(name_bytes).into_owned();

        let local_offset = read_u32(fixed, 42);
        let local_extra_len = local_extra_field_len(data, local_offset as usize)?;

        entries.push(Entry {
            name,
            method: read_u16(fixed, 10),
            local_extra_len,
            crc32: read_u32(fixed, 16),
            compressed_size: read_u32(fixed, 20),
            uncompressed_size: read_u32(fixed, 24),
            local_offset,
        });
        pos += CENTRAL_FIXED_LEN + name_len + extra_len + comment_len;
    }
    Ok(entries)
}

fn local_extra_field_len(data: &[u8], offset: usize) -> Result<u16, ZipError> {
    let fixed = data
        .get(offset..offset + LOCAL_FIXED_LEN)
        .ok_or(ZipError::Truncated("local header"))?;
    if read_u32(fixed, 0) != LOCAL_SIG {
        return Err(ZipError::BadSignature("local header"));
    }
    Ok(read_u16(fixed, 28))
}

fn find_eocd(data: &[u8]) -> Result<usize, ZipError> {
    if data.len() < EOCD_LEN {
        return Err(ZipError::NotAnArchive);
    }
    // The record sits at the very end unless a comment follows; scan back
    // over the maximum comment length.
    let floor = data.len().saturating_sub(EOCD_LEN + u16::MAX as usize);
    let mut pos = data.len() - EOCD_LEN;
    loop {
        if read_u32(data, pos) == EOCD_SIG {
            return Ok(pos);
        }
        if pos == floor {
            return Err(ZipError::NotAnArchive);
        }
        pos -= 1;
    }
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// One entry to be written to a new archive.
#[derive(Clone, Debug)]
pub struct WriteEntry {
    /// Slash-separated entry name.
    pub name: String,
    /// Uncompressed bytes.
    pub data: Vec<u8>,
    /// Force stored (uncompressed) output for this entry.
    pub stored: bool,
}

/// Serialize an ordered entry set to archive bytes.
///
/// Holds the mimetype invariant regardless of input: if any entry is named
/// `mimetype` it is emitted first, stored, with an empty extra field. No
/// entry ever gets an extra field from this writer.
pub fn build_archive(entries: &[WriteEntry]) -> Result<Vec<u8>, ZipError> {
    // Stable reorder: mimetype (if any) to the front, everything else kept
    // in input order.
    let mut order: Vec<&WriteEntry> = Vec::with_capacity(entries.len());
    if let Some(mt) = entries.iter().find(|e| e.name == "mimetype") {
        order.push(mt);
    }
    order.extend(entries.iter().filter(|e| e.name != "mimetype"));

    let mut out = Vec::new();
    let mut central = Vec::new();

    for entry in &order {
        if entry.data.len() > u32::MAX as usize {
            return Err(ZipError::TooLarge(entry.name.clone()));
        }
        let crc = crc32fast::hash(&entry.data);
        let force_stored = entry.stored || entry.name == "mimetype";
        let (method, payload) = if force_stored {
            (METHOD_STORED, entry.data.clone())
        } else {
            let deflated = miniz_oxide::deflate::compress_to_vec(&entry.data, 6);
            if deflated.len() < entry.data.len() {
                (METHOD_DEFLATE, deflated)
            } else {
                (METHOD_STORED, entry.data.clone())
            }
        };

        let local_offset = out.len() as u32;
        let name = entry.name.as_bytes();

        // Local header: no flags, no extra field.
        out.extend_from_slice(&LOCAL_SIG.to_le_bytes());
        out.extend_from_slice(&20u16.to_le_bytes()); // version needed
        out.extend_from_slice(&0u16.to_le_bytes()); // flags
        out.extend_from_slice(&method.to_le_bytes());
        out.extend_from_slice(&DOS_TIME.to_le_bytes());
        out.extend_from_slice(&DOS_DATE.to_le_bytes());
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&(entry.data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // extra field length
        out.extend_from_slice(name);
        out.extend_from_slice(&payload);

        // Matching central-directory record.
        central.extend_from_slice(&CENTRAL_SIG.to_le_bytes());
        central.extend_from_slice(&20u16.to_le_bytes()); // version made by
        central.extend_from_slice(&20u16.to_le_bytes()); // version needed
        central.extend_from_slice(&0u16.to_le_bytes()); // flags
        central.extend_from_slice(&method.to_le_bytes());
        central.extend_from_slice(&DOS_TIME.to_le_bytes());
        central.extend_from_slice(&DOS_DATE.to_le_bytes());
        central.extend_from_slice(&crc.to_le_bytes());
        central.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        central.extend_from_slice(&(entry.data.len() as u32).to_le_bytes());
        central.extend_from_slice(&(name.len() as u16).to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes()); // extra length
        central.extend_from_slice(&0u16.to_le_bytes()); // comment length
        central.extend_from_slice(&0u16.to_le_bytes()); // disk number
        central.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
        central.extend_from_slice(&0u32.to_le_bytes()); // external attrs
        central.extend_from_slice(&local_offset.to_le_bytes());
        central.extend_from_slice(name);
    }

    let central_offset = out.len() as u32;
    let central_size = central.len() as u32;
    let count = order.len() as u16;
    out.extend_from_slice(&central);

    out.extend_from_slice(&EOCD_SIG.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // this disk
    out.extend_from_slice(&0u16.to_le_bytes()); // central dir disk
    out.extend_from_slice(&count.to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());
    out.extend_from_slice(&central_size.to_le_bytes());
    out.extend_from_slice(&central_offset.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // comment length

    Ok(out)
}

/// Write an ordered entry set to `dest` with write-then-publish discipline.
pub fn write_archive(dest: impl AsRef<Path>, entries: &[WriteEntry]) -> Result<(), EpubError> {
    let dest = dest.as_ref();
    let bytes = build_archive(entries)?;
    let dir = dest.parent().filter(|p| !p.as_os_str().is_empty());
    let mut tmp = match dir {
        Some(dir) => tempfile::NamedTempFile::new_in(dir)?,
        None => tempfile::NamedTempFile::new_in(".")?,
    };
    tmp.write_all(&bytes)?;
    tmp.flush()?;
    tmp.persist(dest).map_err(|e| EpubError::Io(e.error))?;
    Ok(())
}
