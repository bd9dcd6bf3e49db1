use crate::core::{Error, Result};
use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use flate2::bufread::GzDecoder;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

pub const MOON_MAGIC: [u8; 4] = *b"MOON";
pub const MOON_VERSION: u8 = 1;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ARCHIVE: &str = "archive";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub data: Vec<u8>,
}

/// Wraps `reader` in a gzip decoder when the stream starts with the gzip
/// magic, so `.mf` and `.mf.gz` archives read the same way.
pub fn decompressed<'a, R: BufRead + 'a>(mut reader: R) -> Result<Box<dyn Read + 'a>> {
    if reader.fill_buf()?.starts_with(&GZIP_MAGIC) {
        tracing::debug!("archive is gzip-compressed");
        return Ok(Box::new(BufReader::new(GzDecoder::new(reader))));
    }
    Ok(Box::new(reader))
}

/// Streams entries out of a `MOON` archive: a 4-byte magic and a version
/// byte, then `(u32 name length, name, u64 content length, content)` records
/// back to back, all big-endian.
pub struct MoonReader<R: Read> {
    reader: R,
}

impl<R: Read> MoonReader<R> {
    pub fn new(mut reader: R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic[..2] == GZIP_MAGIC {
            return Err(Error::asset(ARCHIVE, "gzip stream was not decompressed"));
        }
        if magic != MOON_MAGIC {
            return Err(Error::asset(ARCHIVE, format!("bad magic {:02x?}", magic)));
        }
        let version = reader.read_u8()?;
        if version != MOON_VERSION {
            return Err(Error::asset(ARCHIVE, format!("unsupported version {}", version)));
        }
        Ok(Self { reader })
    }

    /// Reads exactly `len` bytes without trusting `len` for the allocation.
    fn read_field(&mut self, len: u64, what: &str) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        (&mut self.reader).take(len).read_to_end(&mut buf)?;
        if buf.len() as u64 != len {
            return Err(Error::asset(
                ARCHIVE,
                format!("{} truncated at {} of {} bytes", what, buf.len(), len),
            ));
        }
        Ok(buf)
    }

    /// Length prefix of the next record, or `None` at a clean end of input.
    fn read_name_len(&mut self) -> Result<Option<u32>> {
        let mut buf = [0u8; 4];
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..])? {
                0 if filled == 0 => return Ok(None),
                0 => return Err(Error::asset(ARCHIVE, "truncated entry header")),
                n => filled += n,
            }
        }
        Ok(Some(u32::from_be_bytes(buf)))
    }

    pub fn next_entry(&mut self) -> Result<Option<ArchiveEntry>> {
        let Some(name_len) = self.read_name_len()? else {
            return Ok(None);
        };
        let name = self.read_field(u64::from(name_len), "entry name")?;
        let name = String::from_utf8(name)
            .map_err(|_| Error::asset(ARCHIVE, "entry name is not valid UTF-8"))?;

        let content_len = BigEndian::read_u64(&self.read_field(8, "content length")?);
        let data = self.read_field(content_len, &format!("entry {}", name))?;
        Ok(Some(ArchiveEntry { name, data }))
    }
}

impl MoonReader<Box<dyn Read>> {
    /// Opens a plain or gzip-compressed archive file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(decompressed(BufReader::new(File::open(path)?))?)
    }
}

impl<R: Read> Iterator for MoonReader<R> {
    type Item = Result<ArchiveEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

pub struct MoonWriter<W: Write> {
    writer: W,
}

impl<W: Write> MoonWriter<W> {
    pub fn new(mut writer: W) -> Result<Self> {
        writer.write_all(&MOON_MAGIC)?;
        writer.write_u8(MOON_VERSION)?;
        Ok(Self { writer })
    }

    pub fn add(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let name_len = u32::try_from(name.len())
            .map_err(|_| Error::asset(ARCHIVE, format!("entry name too long: {}", name.len())))?;
        self.writer.write_u32::<BigEndian>(name_len)?;
        self.writer.write_all(name.as_bytes())?;
        self.writer.write_u64::<BigEndian>(data.len() as u64)?;
        self.writer.write_all(data)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Relative path an entry may be extracted to. Absolute names and parent
/// components are refused.
fn entry_path(name: &str) -> Result<PathBuf> {
    let path = Path::new(name);
    let safe = !name.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !safe {
        return Err(Error::asset(ARCHIVE, format!("refusing entry path {:?}", name)));
    }
    Ok(path.to_path_buf())
}

/// Directory an archive unpacks to: its path without the archive extension,
/// and without a trailing `.gz` first (`tiny.mf.gz` becomes `tiny`).
pub fn unpack_dir(archive: &Path) -> PathBuf {
    let mut dir = archive.to_path_buf();
    if dir.extension().is_some_and(|ext| ext == "gz") {
        dir.set_extension("");
    }
    dir.with_extension("")
}

/// Extracts every entry of the archive at `archive` below `dest`.
pub fn unpack(archive: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let archive = archive.as_ref();
    let dest = dest.as_ref();
    let reader = MoonReader::open(archive)?;
    fs::create_dir_all(dest)?;

    let mut written = Vec::new();
    for entry in reader {
        let entry = entry?;
        let path = dest.join(entry_path(&entry.name)?);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = BufWriter::new(File::create(&path)?);
        out.write_all(&entry.data)?;
        out.flush()?;
        tracing::debug!("unpacked {} ({} bytes)", entry.name, entry.data.len());
        written.push(path);
    }
    tracing::info!("unpacked {} files from {}", written.len(), archive.display());
    Ok(written)
}
