use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{ensure, Context, Result};
use bytes::Bytes;

/// Append-only file. With `use_direct_io` the writer bypasses its own
/// buffer and pushes every append straight to the OS.
pub struct SeqWriteFile {
    file: File,
    unbuffered: bool,
}

impl SeqWriteFile {
    pub fn create(path: impl AsRef<Path>, use_direct_io: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path.as_ref())
            .with_context(|| format!("fail to create {}", path.as_ref().display()))?;
        Ok(Self {
            file,
            unbuffered: use_direct_io,
        })
    }

    pub fn unbuffered(&self) -> bool {
        self.unbuffered
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.file.write_all(data)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// Buffered little-endian writer over a [`SeqWriteFile`].
pub struct FileWriter {
    file: SeqWriteFile,
    buf: Vec<u8>,
    buf_cap: usize,
    written: u64,
}

impl FileWriter {
    pub fn new(file: SeqWriteFile, buf_cap: usize) -> Self {
        Self {
            file,
            buf: Vec::with_capacity(buf_cap.min(1 << 20)),
            buf_cap: buf_cap.max(1),
            written: 0,
        }
    }

    /// Total bytes appended so far, flushed or not.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn append_u8(&mut self, v: u8) -> Result<()> {
        self.append_slice(&[v])
    }

    pub fn append_u32(&mut self, v: u32) -> Result<()> {
        self.append_slice(&v.to_le_bytes())
    }

    pub fn append_u64(&mut self, v: u64) -> Result<()> {
        self.append_slice(&v.to_le_bytes())
    }

    pub fn append_slice(&mut self, data: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(data);
        self.written += data.len() as u64;
        if self.buf.len() >= self.buf_cap || self.file.unbuffered() {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            self.file.write(&self.buf)?;
            self.buf.clear();
        }
        Ok(())
    }

    /// Flushes the buffer and makes the file durable. Called once before
    /// the file is handed to readers.
    pub fn finish(&mut self) -> Result<()> {
        self.flush()?;
        self.file.sync()?;
        Ok(())
    }
}

/// Read-only file addressed by absolute offsets (pread).
pub struct ReadFile {
    file: File,
    size: u64,
}

impl ReadFile {
    pub fn open(path: impl AsRef<Path>, _use_direct_io: bool) -> Result<Self> {
        let file = File::options()
            .read(true)
            .open(path.as_ref())
            .with_context(|| format!("fail to open {}", path.as_ref().display()))?;
        let size = file.metadata()?.len();
        Ok(Self { file, size })
    }

    pub fn read(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Buffered little-endian reader over a [`ReadFile`], positioned by
/// [`FileReader::seek`].
pub struct FileReader<'a> {
    file: &'a ReadFile,
    buf: Vec<u8>,
    buf_offset: u64,
    pos: u64,
    buf_cap: usize,
}

impl<'a> FileReader<'a> {
    pub fn new(file: &'a ReadFile, buf_cap: usize, offset: u64) -> Self {
        Self {
            file,
            buf: Vec::new(),
            buf_offset: 0,
            pos: offset,
            buf_cap: buf_cap.max(64),
        }
    }

    pub fn seek(&mut self, offset: u64) {
        self.pos = offset;
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    fn view(&mut self, len: usize) -> Result<&[u8]> {
        let in_window = self.pos >= self.buf_offset
            && self.pos + len as u64 <= self.buf_offset + self.buf.len() as u64;
        if !in_window {
            ensure!(
                self.pos + len as u64 <= self.file.size(),
                "read past end of file (pos {}, len {}, size {})",
                self.pos,
                len,
                self.file.size()
            );
            let want = (self.file.size() - self.pos).min(self.buf_cap.max(len) as u64) as usize;
            self.buf.resize(want, 0);
            self.file.read(&mut self.buf, self.pos)?;
            self.buf_offset = self.pos;
        }
        let start = (self.pos - self.buf_offset) as usize;
        Ok(&self.buf[start..start + len])
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let v = self.view(1)?[0];
        self.pos += 1;
        Ok(v)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let v = u32::from_le_bytes(self.view(4)?.try_into().unwrap());
        self.pos += 4;
        Ok(v)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let v = u64::from_le_bytes(self.view(8)?.try_into().unwrap());
        self.pos += 8;
        Ok(v)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        let v = Bytes::copy_from_slice(self.view(len)?);
        self.pos += len as u64;
        Ok(v)
    }
}

/// Hands out SST file paths from a monotonically increasing id.
pub struct FileNameGenerator {
    dir: PathBuf,
    next_id: AtomicU64,
}

impl FileNameGenerator {
    pub fn new(dir: impl Into<PathBuf>, next_id: u64) -> Self {
        Self {
            dir: dir.into(),
            next_id: AtomicU64::new(next_id),
        }
    }

    pub fn generate(&self) -> (PathBuf, u64) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        (self.dir.join(format!("{:05}.sst", id)), id)
    }

    /// The id the next call to [`generate`] would use; persisted in the
    /// metadata file.
    pub fn next_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_writer_reader_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        let mut writer = FileWriter::new(SeqWriteFile::create(&path, false).unwrap(), 16);
        writer.append_u64(7).unwrap();
        writer.append_u32(42).unwrap();
        writer.append_slice(b"payload").unwrap();
        writer.append_u8(9).unwrap();
        writer.finish().unwrap();

        let file = ReadFile::open(&path, false).unwrap();
        assert_eq!(file.size(), 8 + 4 + 7 + 1);
        let mut reader = FileReader::new(&file, 8, 0);
        assert_eq!(reader.read_u64().unwrap(), 7);
        assert_eq!(reader.read_u32().unwrap(), 42);
        assert_eq!(&reader.read_bytes(7).unwrap()[..], b"payload");
        assert_eq!(reader.read_u8().unwrap(), 9);
        assert!(reader.read_u8().is_err());
    }

    #[test]
    fn test_reader_seek() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        let mut writer = FileWriter::new(SeqWriteFile::create(&path, false).unwrap(), 1 << 10);
        for i in 0..100u64 {
            writer.append_u64(i).unwrap();
        }
        writer.finish().unwrap();

        let file = ReadFile::open(&path, false).unwrap();
        let mut reader = FileReader::new(&file, 32, 0);
        reader.seek(8 * 77);
        assert_eq!(reader.read_u64().unwrap(), 77);
        reader.seek(0);
        assert_eq!(reader.read_u64().unwrap(), 0);
    }

    #[test]
    fn test_file_name_generator() {
        let gen = FileNameGenerator::new("/tmp/db", 3);
        let (path, id) = gen.generate();
        assert_eq!(id, 3);
        assert!(path.ends_with("00003.sst"));
        assert_eq!(gen.next_id(), 4);
    }
}
