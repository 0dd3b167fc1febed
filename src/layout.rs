//! On-disk records and the fixed region layout.
//!
//! The image starts with a superblock, followed by one inode-bitmap block,
//! one data-bitmap block, the inode table and the data region. All records
//! are written as their raw in-memory bytes, so every multi-byte field is
//! 32 bits wide and the structures contain no padding.

use std::mem::size_of;
use std::slice;

#[cfg(target_endian = "big")]
compile_error!("on-disk records are raw struct bytes and assume a little-endian host");

/// The filesystem's signature.
pub const MAGIC: u32 = 0xef53;
/// The inode number of the root directory.
pub const ROOT_INO: u32 = 0;
/// The size of a dentry name field, terminator included.
pub const NAME_LEN: usize = 128;
/// Number of direct data-block slots per inode.
pub const DIRECT_BLOCKS: usize = 1024;
/// Marks an unused data-block slot.
pub const NO_BLOCK: u32 = u32::MAX;

/// Size of the superblock region in blocks.
pub const SUPER_BLKS: u32 = 1;
/// Size of the inode bitmap in blocks.
pub const INO_MAP_BLKS: u32 = 1;
/// Size of the data bitmap in blocks.
pub const DAT_MAP_BLKS: u32 = 1;
/// Size of the inode table in blocks.
pub const INODE_BLKS: u32 = 29;
/// First block of the data region.
pub const DATA_START_BLK: u32 = 32;

/// The type of a file, as stored in inode and dentry records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum FileKind {
    /// Regular file.
    Regular = 0,
    /// Directory.
    Directory = 1,
    /// Symbolic link (reserved, never created).
    Symlink = 2,
}

impl FileKind {
    /// Decodes the on-disk representation.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Regular),
            1 => Some(Self::Directory),
            2 => Some(Self::Symlink),
            _ => None,
        }
    }
}

/// The superblock as stored at byte 0 of the device.
///
/// Only written at unmount; a missing or mismatching `magic` on mount means
/// the device has to be formatted first.
#[repr(C)]
pub struct RawSuperblock {
    /// Filesystem signature; `MAGIC` once formatted.
    pub magic: u32,
    /// Superblock region offset in bytes.
    pub sb_offset: u32,
    /// Superblock region size in blocks.
    pub sb_blks: u32,
    /// Inode bitmap offset in bytes.
    pub ino_map_offset: u32,
    /// Inode bitmap size in blocks.
    pub ino_map_blks: u32,
    /// Data bitmap offset in bytes.
    pub dat_map_offset: u32,
    /// Data bitmap size in blocks.
    pub dat_map_blks: u32,
    /// Inode table offset in bytes.
    pub inode_offset: u32,
    /// Inode table size in blocks.
    pub inode_blks: u32,
    /// Data region offset in bytes.
    pub data_offset: u32,
    /// Data region size in blocks.
    pub data_blks: u32,
    /// Highest number of inodes the table can hold.
    pub ino_max: u32,
    /// Highest supported file size in bytes.
    pub file_max: u32,
    /// Inode number of the root directory.
    pub root_ino: u32,
}

/// An inode record in the inode table.
///
/// The record is larger than a logical block, so records are packed
/// back-to-back rather than grouped per block.
#[repr(C)]
pub struct RawInode {
    /// The inode number.
    pub ino: u32,
    /// File size in bytes.
    pub size: u32,
    /// Number of child dentries (directories only).
    pub dir_cnt: u32,
    /// Raw `FileKind`.
    pub ftype: u32,
    /// Data block numbers; `NO_BLOCK` marks an unused slot.
    pub data: [u32; DIRECT_BLOCKS],
}

/// A directory entry record inside a directory's data blocks.
#[repr(C)]
pub struct RawDentry {
    /// NUL-padded name.
    pub name: [u8; NAME_LEN],
    /// The inode number the entry points at.
    pub ino: u32,
    /// Raw `FileKind`.
    pub ftype: u32,
}

/// Reinterprets a record as its raw bytes.
pub fn reinterpret<T>(val: &T) -> &[u8] {
    unsafe { slice::from_raw_parts(val as *const T as *const u8, size_of::<T>()) }
}

/// Reinterprets a record as writable raw bytes.
pub fn reinterpret_mut<T>(val: &mut T) -> &mut [u8] {
    unsafe { slice::from_raw_parts_mut(val as *mut T as *mut u8, size_of::<T>()) }
}

/// The region layout and limits of a mounted filesystem.
pub struct Superblock {
    /// Logical block size in bytes, twice the device's sector size.
    pub block_size: u64,
    /// Device size in bytes.
    pub disk_size: u64,
    /// Superblock region offset in bytes.
    pub sb_offset: u64,
    /// Superblock region size in blocks.
    pub sb_blks: u32,
    /// Inode bitmap offset in bytes.
    pub ino_map_offset: u64,
    /// Inode bitmap size in blocks.
    pub ino_map_blks: u32,
    /// Data bitmap offset in bytes.
    pub dat_map_offset: u64,
    /// Data bitmap size in blocks.
    pub dat_map_blks: u32,
    /// Inode table offset in bytes.
    pub inode_offset: u64,
    /// Inode table size in blocks.
    pub inode_blks: u32,
    /// Data region offset in bytes.
    pub data_offset: u64,
    /// Data region size in blocks.
    pub data_blks: u32,
    /// Highest number of inodes the table can hold.
    pub ino_max: u32,
    /// Highest supported file size in bytes.
    pub file_max: u64,
    /// Inode number of the root directory.
    pub root_ino: u32,
}

impl Superblock {
    /// Lays out a fresh filesystem for a device of the given size.
    pub fn compute(disk_size: u64, block_size: u64) -> Self {
        let inode_size = size_of::<RawInode>() as u64;
        Self {
            block_size,
            disk_size,
            sb_offset: 0,
            sb_blks: SUPER_BLKS,
            ino_map_offset: block_size,
            ino_map_blks: INO_MAP_BLKS,
            dat_map_offset: 2 * block_size,
            dat_map_blks: DAT_MAP_BLKS,
            inode_offset: 3 * block_size,
            inode_blks: INODE_BLKS,
            data_offset: u64::from(DATA_START_BLK) * block_size,
            data_blks: (disk_size / block_size - u64::from(DATA_START_BLK)) as u32,
            ino_max: ((u64::from(INODE_BLKS) * block_size) / inode_size) as u32,
            file_max: DIRECT_BLOCKS as u64 * block_size,
            root_ino: ROOT_INO,
        }
    }

    /// Restores the layout read from an existing superblock.
    pub fn from_raw(raw: &RawSuperblock, disk_size: u64, block_size: u64) -> Self {
        Self {
            block_size,
            disk_size,
            sb_offset: u64::from(raw.sb_offset),
            sb_blks: raw.sb_blks,
            ino_map_offset: u64::from(raw.ino_map_offset),
            ino_map_blks: raw.ino_map_blks,
            dat_map_offset: u64::from(raw.dat_map_offset),
            dat_map_blks: raw.dat_map_blks,
            inode_offset: u64::from(raw.inode_offset),
            inode_blks: raw.inode_blks,
            data_offset: u64::from(raw.data_offset),
            data_blks: raw.data_blks,
            ino_max: raw.ino_max,
            file_max: u64::from(raw.file_max),
            root_ino: raw.root_ino,
        }
    }

    /// The on-disk form of the superblock.
    pub fn to_raw(&self) -> RawSuperblock {
        RawSuperblock {
            magic: MAGIC,
            sb_offset: self.sb_offset as u32,
            sb_blks: self.sb_blks,
            ino_map_offset: self.ino_map_offset as u32,
            ino_map_blks: self.ino_map_blks,
            dat_map_offset: self.dat_map_offset as u32,
            dat_map_blks: self.dat_map_blks,
            inode_offset: self.inode_offset as u32,
            inode_blks: self.inode_blks,
            data_offset: self.data_offset as u32,
            data_blks: self.data_blks,
            ino_max: self.ino_max,
            file_max: self.file_max as u32,
            root_ino: self.root_ino,
        }
    }

    /// Byte offset of an inode record in the inode table.
    pub fn inode_disk_offset(&self, ino: u32) -> u64 {
        self.inode_offset + u64::from(ino) * size_of::<RawInode>() as u64
    }

    /// Byte offset of a data block.
    pub fn data_disk_offset(&self, blk: u32) -> u64 {
        self.data_offset + u64::from(blk) * self.block_size
    }

    /// Number of dentry records per data block.
    pub fn dentries_per_block(&self) -> u32 {
        (self.block_size / size_of::<RawDentry>() as u64) as u32
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn record_sizes() {
        assert_eq!(size_of::<RawSuperblock>(), 56);
        assert_eq!(size_of::<RawInode>(), 16 + 4 * DIRECT_BLOCKS);
        assert_eq!(size_of::<RawDentry>(), NAME_LEN + 8);
    }

    #[test]
    fn layout_4mib() {
        let sb = Superblock::compute(4 * 1024 * 1024, 1024);
        assert_eq!(sb.ino_map_offset, 1024);
        assert_eq!(sb.dat_map_offset, 2048);
        assert_eq!(sb.inode_offset, 3072);
        assert_eq!(sb.data_offset, 32 * 1024);
        assert_eq!(sb.data_blks, 4064);
        assert_eq!(sb.ino_max, 7);
        assert_eq!(sb.file_max, 1024 * 1024);
        assert_eq!(sb.dentries_per_block(), 7);
    }

    #[test]
    fn inode_packing() {
        let sb = Superblock::compute(4 * 1024 * 1024, 1024);
        assert_eq!(sb.inode_disk_offset(0), 3072);
        assert_eq!(sb.inode_disk_offset(1), 3072 + 4112);
        // The last inode still fits in front of the data region.
        let end = sb.inode_disk_offset(sb.ino_max - 1) + size_of::<RawInode>() as u64;
        assert!(end <= sb.data_offset);
    }
}
