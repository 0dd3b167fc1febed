//! Access to the backing block device.
//!
//! The device only transfers whole sectors; this module turns arbitrary
//! byte-range reads and writes into sector-aligned transfers through a
//! scratch buffer.

use libc::ioctl;
use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Error;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

/// ioctl macro: Command.
macro_rules! ioc {
    ($a:expr, $b:expr, $c:expr, $d:expr) => {
        (($a) << 30) | (($b) << 8) | ($c) | (($d) << 16)
    };
}

/// ioctl macro: Read command.
macro_rules! ior {
    ($a:expr, $b:expr, $c:ty) => {
        ioc!(2, $a, $b, std::mem::size_of::<$c>() as u64)
    };
}

/// ioctl command: Get size of the device in bytes.
const BLKGETSIZE64: u64 = ior!(0x12, 114, u64);
/// ioctl command: Get the logical sector size in bytes.
const BLKSSZGET: u64 = 0x1268;

/// The sector size assumed for file-backed devices.
const DEFAULT_SECTOR_SIZE: u64 = 512;

/// An open backing device with its probed geometry.
pub struct Device {
    /// The device file.
    file: File,
    /// The size of the device in bytes.
    size: u64,
    /// The device's native I/O unit in bytes.
    sector_size: u64,
}

impl Device {
    /// Opens the device at the given path read-write.
    ///
    /// Block devices are probed with ioctls; a regular file stands in for a
    /// device with its length and a 512-byte sector.
    pub fn open(path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        let file_type = metadata.file_type();
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let (size, sector_size) = if file_type.is_block_device() || file_type.is_char_device() {
            let mut size: u64 = 0;
            let ret = unsafe { ioctl(file.as_raw_fd(), BLKGETSIZE64 as _, &mut size) };
            if ret < 0 {
                return Err(Error::last_os_error());
            }

            let mut sector: libc::c_int = 0;
            let ret = unsafe { ioctl(file.as_raw_fd(), BLKSSZGET as _, &mut sector) };
            if ret < 0 {
                return Err(Error::last_os_error());
            }

            (size, sector as u64)
        } else if file_type.is_file() {
            (metadata.len(), DEFAULT_SECTOR_SIZE)
        } else {
            return Err(Error::new(
                io::ErrorKind::InvalidInput,
                "not a block device or regular file",
            ));
        };

        Ok(Self {
            file,
            size,
            sector_size,
        })
    }

    /// The size of the device in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The device's native I/O unit in bytes.
    pub fn sector_size(&self) -> u64 {
        self.sector_size
    }

    /// Reads `buf.len()` bytes at the given byte offset.
    ///
    /// The window does not need to be aligned: the spanned sectors are read
    /// whole and the requested bytes copied out.
    pub fn read(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let down = self.align_down(offset);
        let mut scratch = self.scratch(offset, buf.len() as u64);
        self.transfer_in(down, &mut scratch)?;

        let start = (offset - down) as usize;
        buf.copy_from_slice(&scratch[start..start + buf.len()]);
        Ok(())
    }

    /// Writes `buf` at the given byte offset.
    ///
    /// The spanned sectors are read first and written back with the window
    /// spliced in, so bytes around the window are preserved.
    pub fn write(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let down = self.align_down(offset);
        let mut scratch = self.scratch(offset, buf.len() as u64);
        self.transfer_in(down, &mut scratch)?;

        let start = (offset - down) as usize;
        scratch[start..start + buf.len()].copy_from_slice(buf);
        self.transfer_out(down, &scratch)
    }

    fn align_down(&self, offset: u64) -> u64 {
        offset / self.sector_size * self.sector_size
    }

    /// A zeroed buffer covering every sector the window touches.
    fn scratch(&self, offset: u64, len: u64) -> Vec<u8> {
        let down = self.align_down(offset);
        let up = (offset + len).div_ceil(self.sector_size) * self.sector_size;
        vec![0; (up - down) as usize]
    }

    /// Reads whole sectors into `scratch`, one driver transfer each.
    fn transfer_in(&mut self, down: u64, scratch: &mut [u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(down))?;
        for sector in scratch.chunks_exact_mut(self.sector_size as usize) {
            self.file.read_exact(sector)?;
        }
        Ok(())
    }

    /// Writes whole sectors from `scratch`, one driver transfer each.
    fn transfer_out(&mut self, down: u64, scratch: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(down))?;
        for sector in scratch.chunks_exact(self.sector_size as usize) {
            self.file.write_all(sector)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::NamedTempFile;

    fn scratch_device(size: u64) -> (NamedTempFile, Device) {
        let file = NamedTempFile::new().unwrap();
        file.as_file().set_len(size).unwrap();
        let dev = Device::open(file.path()).unwrap();
        (file, dev)
    }

    #[test]
    fn probes_file_geometry() {
        let (_file, dev) = scratch_device(4096);
        assert_eq!(dev.size(), 4096);
        assert_eq!(dev.sector_size(), 512);
    }

    #[test]
    fn unaligned_roundtrip() {
        let (_file, mut dev) = scratch_device(4096);
        let payload: Vec<u8> = (0..700u32).map(|i| i as u8).collect();
        dev.write(123, &payload).unwrap();

        let mut back = vec![0; payload.len()];
        dev.read(123, &mut back).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn write_preserves_surrounding_bytes() {
        let (_file, mut dev) = scratch_device(4096);
        dev.write(0, &[0xaa; 2048]).unwrap();
        dev.write(1000, &[0x55; 100]).unwrap();

        let mut back = vec![0; 2048];
        dev.read(0, &mut back).unwrap();
        assert!(back[..1000].iter().all(|&b| b == 0xaa));
        assert!(back[1000..1100].iter().all(|&b| b == 0x55));
        assert!(back[1100..].iter().all(|&b| b == 0xaa));
    }

    #[test]
    fn sector_aligned_window() {
        let (_file, mut dev) = scratch_device(4096);
        dev.write(512, &[7; 512]).unwrap();

        let mut back = [0; 512];
        dev.read(512, &mut back).unwrap();
        assert_eq!(back, [7; 512]);
        // The neighbouring sectors stay untouched.
        dev.read(0, &mut back).unwrap();
        assert_eq!(back, [0; 512]);
    }
}
