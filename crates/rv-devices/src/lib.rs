//! RAM plus the three bus devices (CLINT, PLIC, UART, virtio-blk) and the
//! bus that unifies them (§3, §4.6).

#![forbid(unsafe_code)]

pub mod bus;
pub mod clint;
pub mod plic;
pub mod ram;
pub mod uart;
pub mod virtio;

pub use bus::Bus;
pub use clint::Clint;
pub use plic::Plic;
pub use ram::Ram;
pub use uart::Uart;
pub use virtio::{BlockImage, MemoryBlockImage, VirtioBlk};

use std::fs::File;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlockImageError {
    #[error("failed to open block image {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("block image {path} is {size} bytes, not a multiple of the {block_size}-byte sector size")]
    Misaligned { path: String, size: u64, block_size: u64 },
    #[error("i/o error on block image {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A block image backed by a real host file, read/written sector-by-sector
/// with `pread`/`pwrite`-style positional I/O so no single seek cursor is
/// shared across requests.
pub struct FileBlockImage {
    file: File,
    path: String,
    capacity_sectors: u64,
}

impl FileBlockImage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BlockImageError> {
        let path_str = path.as_ref().display().to_string();
        let file = File::options()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| BlockImageError::Open {
                path: path_str.clone(),
                source,
            })?;
        let size = file
            .metadata()
            .map_err(|source| BlockImageError::Open {
                path: path_str.clone(),
                source,
            })?
            .len();
        if size % virtio::BLOCK_SIZE != 0 {
            return Err(BlockImageError::Misaligned {
                path: path_str,
                size,
                block_size: virtio::BLOCK_SIZE,
            });
        }
        Ok(FileBlockImage {
            file,
            path: path_str,
            capacity_sectors: size / virtio::BLOCK_SIZE,
        })
    }
}

#[cfg(unix)]
impl BlockImage for FileBlockImage {
    fn capacity_sectors(&self) -> u64 {
        self.capacity_sectors
    }

    fn read_sector(&mut self, sector: u64, buf: &mut [u8]) {
        use std::os::unix::fs::FileExt;
        if let Err(source) = self.file.read_exact_at(buf, sector * virtio::BLOCK_SIZE) {
            panic!("{}", BlockImageError::Io { path: self.path.clone(), source });
        }
    }

    fn write_sector(&mut self, sector: u64, buf: &[u8]) {
        use std::os::unix::fs::FileExt;
        if let Err(source) = self.file.write_all_at(buf, sector * virtio::BLOCK_SIZE) {
            panic!("{}", BlockImageError::Io { path: self.path.clone(), source });
        }
    }

    fn flush(&mut self) {
        let _ = self.file.sync_data();
    }
}
