// Byte-addressable block sources
// Every read carries its own offset so traversals sharing a source never
// disturb each other's position.

use crate::error::{FatError, FatResult};
use std::fs::File;
use std::path::{Path, PathBuf};

/// A randomly seekable, read-only byte source (image file, device, memory)
pub trait BlockSource {
    /// Read up to `buf.len()` bytes at `offset`, returning how many were read.
    /// Fewer bytes than requested means the source ended.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> FatResult<usize>;

    /// Total size in bytes, if known
    fn size_hint(&self) -> Option<u64>;

    /// Fill `buf` completely or fail with `ShortRead`
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> FatResult<()> {
        let actual = self.read_at(offset, buf)?;
        if actual < buf.len() {
            return Err(FatError::ShortRead {
                offset,
                expected: buf.len(),
                actual,
            });
        }
        Ok(())
    }

    /// Allocate and fill a buffer of `len` bytes at `offset`
    fn read_vec_at(&self, offset: u64, len: usize) -> FatResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact_at(offset, &mut buf)?;
        Ok(buf)
    }
}

impl<T: BlockSource + ?Sized> BlockSource for &T {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> FatResult<usize> {
        (**self).read_at(offset, buf)
    }

    fn size_hint(&self) -> Option<u64> {
        (**self).size_hint()
    }
}

impl BlockSource for [u8] {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> FatResult<usize> {
        let start = match usize::try_from(offset) {
            Ok(start) if start < self.len() => start,
            _ => return Ok(0),
        };
        let available = &self[start..];
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        Ok(count)
    }

    fn size_hint(&self) -> Option<u64> {
        Some(self.len() as u64)
    }
}

impl BlockSource for Vec<u8> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> FatResult<usize> {
        self.as_slice().read_at(offset, buf)
    }

    fn size_hint(&self) -> Option<u64> {
        Some(self.len() as u64)
    }
}

/// Image file or raw device opened read-only, read with positioned I/O
#[derive(Debug)]
pub struct FileBlockSource {
    file: File,
    path: PathBuf,
    size: Option<u64>,
}

impl FileBlockSource {
    /// Open an image or device for reading
    pub fn open(path: impl AsRef<Path>) -> FatResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        // Block devices report a zero length through metadata
        let size = file.metadata().ok().map(|m| m.len()).filter(|&len| len > 0);
        Ok(Self { file, path, size })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn positioned_read(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        use std::os::unix::fs::FileExt;
        self.file.read_at(buf, offset)
    }

    #[cfg(windows)]
    fn positioned_read(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        use std::os::windows::fs::FileExt;
        self.file.seek_read(buf, offset)
    }
}

impl BlockSource for FileBlockSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> FatResult<usize> {
        let mut filled = 0;
        // A positioned read may return early; keep going until EOF
        while filled < buf.len() {
            match self.positioned_read(&mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(FatError::IoError(e)),
            }
        }
        Ok(filled)
    }

    fn size_hint(&self) -> Option<u64> {
        self.size
    }
}
