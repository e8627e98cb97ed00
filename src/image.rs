//! Random-access byte I/O over the backing image file.

use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Buffer size used when zero-filling the image.
const ZERO_CHUNK: usize = 4096;

/// Access mode of an opened image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    ReadWrite,
}

/// A backing file treated as a flat byte array.
///
/// The handle is owned by the value and closed on drop, with a final flush.
/// Read-only mode is advisory: `write` and `resize` check it and fail.
pub struct Image {
    file: File,
    mode: Mode,
}

impl Image {
    /// Opens the image at `path`.
    ///
    /// In [Mode::Read] the file must already exist; in [Mode::ReadWrite] it
    /// is created when missing.
    pub fn open(path: &Path, mode: Mode) -> Result<Self> {
        let file = match mode {
            Mode::Read => OpenOptions::new().read(true).open(path).map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    Error::DoesNotExist(path.display().to_string())
                } else {
                    Error::Open(e)
                }
            })?,
            Mode::ReadWrite => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(path)
                .map_err(Error::Open)?,
        };
        Ok(Self { file, mode })
    }

    /// Reads up to `len` bytes starting at `offset`.
    /// The returned buffer is truncated to the bytes actually read.
    pub fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(Error::Read)?;
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = self.file.read(&mut buf[filled..]).map_err(Error::Read)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }

    /// Writes all of `bytes` starting at `offset`.
    pub fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(Error::Write)?;
        self.file.write_all(bytes).map_err(Error::Write)?;
        Ok(())
    }

    /// Truncates or extends the file to `new_size` and zero-fills the entire
    /// new length. Post-condition: every byte of the file is zero.
    pub fn resize(&mut self, new_size: u64) -> Result<()> {
        self.ensure_writable()?;
        self.file.set_len(new_size).map_err(Error::Resize)?;
        self.file.seek(SeekFrom::Start(0)).map_err(Error::Write)?;
        let zeroes = [0u8; ZERO_CHUNK];
        let mut remaining = new_size;
        while remaining > 0 {
            let chunk = remaining.min(ZERO_CHUNK as u64) as usize;
            self.file.write_all(&zeroes[..chunk]).map_err(Error::Write)?;
            remaining -= chunk as u64;
        }
        self.flush()
    }

    /// Returns the current length of the backing file.
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata().map_err(Error::Read)?.len())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush().map_err(Error::Write)?;
        self.file.sync_all().map_err(Error::Write)
    }

    fn ensure_writable(&self) -> Result<()> {
        match self.mode {
            Mode::Read => Err(Error::ReadOnly),
            Mode::ReadWrite => Ok(()),
        }
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        if self.mode == Mode::ReadWrite {
            let _ = self.flush();
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("file does not exist: {0}")]
    DoesNotExist(String),
    #[error("could not open file: {0}")]
    Open(#[source] io::Error),
    #[error("file opened read-only")]
    ReadOnly,
    #[error("file read failed: {0}")]
    Read(#[source] io::Error),
    #[error("file write failed: {0}")]
    Write(#[source] io::Error),
    #[error("file resize failed: {0}")]
    Resize(#[source] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("imgfs-image-{}-{name}", std::process::id()));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn read_write_round_trip() {
        let path = temp_path("rw");
        let mut image = Image::open(&path, Mode::ReadWrite).unwrap();
        image.write_at(10, b"hello").unwrap();
        assert_eq!(image.read_at(10, 5).unwrap(), b"hello");
        // Short read at the end of the file truncates the buffer.
        assert_eq!(image.read_at(12, 64).unwrap(), b"llo");
        drop(image);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn read_mode_requires_existing_file() {
        let path = temp_path("missing");
        assert!(matches!(
            Image::open(&path, Mode::Read),
            Err(Error::DoesNotExist(_))
        ));
    }

    #[test]
    fn read_mode_rejects_writes() {
        let path = temp_path("ro");
        drop(Image::open(&path, Mode::ReadWrite).unwrap());
        let mut image = Image::open(&path, Mode::Read).unwrap();
        assert!(matches!(image.write_at(0, b"x"), Err(Error::ReadOnly)));
        assert!(matches!(image.resize(16), Err(Error::ReadOnly)));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn resize_zero_fills_everything() {
        let path = temp_path("resize");
        let mut image = Image::open(&path, Mode::ReadWrite).unwrap();
        image.write_at(0, &[0xAAu8; 32]).unwrap();
        image.resize(64).unwrap();
        assert_eq!(image.len().unwrap(), 64);
        assert_eq!(image.read_at(0, 64).unwrap(), vec![0u8; 64]);
        drop(image);
        let _ = std::fs::remove_file(&path);
    }
}
