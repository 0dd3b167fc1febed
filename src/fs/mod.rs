//! The filesystem core: mount lifecycle, object graph and disk sync.
//!
//! A mounted filesystem owns the device, the in-memory superblock and
//! bitmaps, and the dentry/inode arenas. Disk is only read through
//! hydration and only written by `sync` and the unmount flush; while
//! mounted, the in-memory tree is the single source of truth.

mod node;
mod path;

pub use node::Dentry;
pub use node::Inode;
pub use path::Lookup;
pub use path::file_name;

use crate::bitmap::Bitmap;
use crate::device::Device;
use crate::error::Error;
use crate::error::Result;
use crate::layout::DATA_START_BLK;
use crate::layout::DIRECT_BLOCKS;
use crate::layout::FileKind;
use crate::layout::MAGIC;
use crate::layout::NAME_LEN;
use crate::layout::NO_BLOCK;
use crate::layout::RawDentry;
use crate::layout::RawInode;
use crate::layout::RawSuperblock;
use crate::layout::Superblock;
use crate::layout::reinterpret;
use crate::layout::reinterpret_mut;
use log::debug;
use log::error;
use log::info;
use std::io;
use std::mem;
use std::mem::size_of;
use std::time::SystemTime;

/// Permission bits reported for every entry.
const DEFAULT_PERM: u32 = 0o777;

/// File attributes reported to the host.
pub struct Attr {
    /// The inode number.
    pub ino: u32,
    /// The file type.
    pub ftype: FileKind,
    /// File type and permission bits.
    pub mode: u32,
    /// File size in bytes.
    pub size: u64,
    /// Number of links; 2 for the root, 1 otherwise.
    pub nlink: u32,
    /// Owner, taken from the serving process.
    pub uid: u32,
    /// Group, taken from the serving process.
    pub gid: u32,
    /// Last access time.
    pub atime: SystemTime,
    /// Last modification time.
    pub mtime: SystemTime,
    /// The logical block size.
    pub blksize: u32,
    /// Block budget of the entry.
    pub blocks: u64,
}

/// One `readdir` entry.
pub struct DirEntry {
    /// The entry's name.
    pub name: String,
    /// The inode number the entry points at.
    pub ino: u32,
    /// The entry's file type.
    pub ftype: FileKind,
}

/// A mounted filesystem.
pub struct Fs {
    dev: Device,
    sb: Superblock,
    ino_bitmap: Bitmap,
    data_bitmap: Bitmap,
    inodes: Vec<Inode>,
    dentries: Vec<Dentry>,
    root: usize,
}

impl Fs {
    /// Mounts the filesystem on the given device, formatting it first if no
    /// superblock is present.
    pub fn mount(mut dev: Device) -> Result<Self> {
        let block_size = 2 * dev.sector_size();
        let disk_size = dev.size();
        if disk_size / block_size <= u64::from(DATA_START_BLK) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "device too small for the fixed layout",
            )));
        }

        let mut raw: RawSuperblock = unsafe { mem::zeroed() };
        dev.read(0, reinterpret_mut(&mut raw))?;

        let fs = if raw.magic != MAGIC {
            Self::format(dev, disk_size, block_size)?
        } else {
            Self::load(dev, &raw, disk_size, block_size)?
        };
        debug!("inode bitmap: {:02x?}", &fs.ino_bitmap.as_bytes()[..32]);
        debug!("data bitmap: {:02x?}", &fs.data_bitmap.as_bytes()[..32]);
        info!(
            "mounted: {} blocks of {} bytes, {} inodes max",
            disk_size / block_size,
            block_size,
            fs.sb.ino_max
        );
        Ok(fs)
    }

    /// First mount: writes cleared bitmaps and an empty root directory.
    fn format(mut dev: Device, disk_size: u64, block_size: u64) -> Result<Self> {
        info!("no filesystem signature, formatting the device");
        let sb = Superblock::compute(disk_size, block_size);
        let ino_bitmap = Bitmap::new((u64::from(sb.ino_map_blks) * block_size) as usize);
        let data_bitmap = Bitmap::new((u64::from(sb.dat_map_blks) * block_size) as usize);
        dev.write(sb.ino_map_offset, ino_bitmap.as_bytes())?;
        dev.write(sb.dat_map_offset, data_bitmap.as_bytes())?;

        let mut fs = Self {
            dev,
            sb,
            ino_bitmap,
            data_bitmap,
            inodes: Vec::new(),
            dentries: Vec::new(),
            root: 0,
        };
        let root = fs.add_dentry(Dentry::new("/".to_owned(), FileKind::Directory, None));
        fs.root = root;
        let inode = fs.alloc_inode(root)?;
        fs.sync(inode)?;
        Ok(fs)
    }

    /// Remount: restores the layout and bitmaps, hydrates the root.
    fn load(mut dev: Device, raw: &RawSuperblock, disk_size: u64, block_size: u64) -> Result<Self> {
        let sb = Superblock::from_raw(raw, disk_size, block_size);
        let mut ino_bytes = vec![0; (u64::from(sb.ino_map_blks) * block_size) as usize];
        dev.read(sb.ino_map_offset, &mut ino_bytes)?;
        let mut dat_bytes = vec![0; (u64::from(sb.dat_map_blks) * block_size) as usize];
        dev.read(sb.dat_map_offset, &mut dat_bytes)?;

        let root_ino = sb.root_ino;
        let mut fs = Self {
            dev,
            sb,
            ino_bitmap: Bitmap::from_bytes(ino_bytes),
            data_bitmap: Bitmap::from_bytes(dat_bytes),
            inodes: Vec::new(),
            dentries: Vec::new(),
            root: 0,
        };
        let root = fs.add_dentry(Dentry::new("/".to_owned(), FileKind::Directory, None));
        fs.dentries[root].ino = root_ino;
        fs.root = root;
        fs.hydrate(root)?;
        Ok(fs)
    }

    /// Unmounts: flushes the tree, both bitmaps and the superblock, then
    /// closes the device.
    pub fn unmount(mut self) -> Result<()> {
        if let Some(inode) = self.dentries[self.root].inode {
            self.sync(inode)?;
        }
        self.dev
            .write(self.sb.ino_map_offset, self.ino_bitmap.as_bytes())?;
        self.dev
            .write(self.sb.dat_map_offset, self.data_bitmap.as_bytes())?;
        let raw = self.sb.to_raw();
        self.dev.write(0, reinterpret(&raw))?;
        info!("unmounted");
        Ok(())
    }

    /// Returns the attributes of the entry at the given path.
    pub fn getattr(&mut self, path: &str) -> Result<Attr> {
        let lookup = self.lookup(path)?;
        if !lookup.found {
            return Err(Error::NotFound);
        }
        let inode = self.hydrate(lookup.dentry)?;
        let node = &self.inodes[inode];
        let (mode, size) = match node.ftype {
            FileKind::Directory => (
                libc::S_IFDIR | DEFAULT_PERM,
                u64::from(node.dir_cnt) * size_of::<RawDentry>() as u64,
            ),
            _ => (libc::S_IFREG | DEFAULT_PERM, u64::from(node.size)),
        };

        let now = SystemTime::now();
        let mut attr = Attr {
            ino: node.ino,
            ftype: node.ftype,
            mode,
            size,
            nlink: 1,
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            atime: now,
            mtime: now,
            blksize: self.sb.block_size as u32,
            blocks: DIRECT_BLOCKS as u64,
        };
        if lookup.is_root {
            attr.nlink = 2;
            attr.blocks = self.sb.disk_size / self.sb.block_size;
        }
        Ok(attr)
    }

    /// Returns the directory entry at index `offset`, or `None` once the
    /// directory is exhausted. Entries come in child-list order.
    pub fn readdir(&mut self, path: &str, offset: u64) -> Result<Option<DirEntry>> {
        let lookup = self.lookup(path)?;
        if !lookup.found {
            debug!("readdir: {path}: not found");
            return Err(Error::NotFound);
        }
        let inode = self.hydrate(lookup.dentry)?;

        let mut next = self.inodes[inode].children;
        let mut index = 0;
        while let Some(dentry) = next {
            if index == offset {
                let dentry = &self.dentries[dentry];
                return Ok(Some(DirEntry {
                    name: dentry.name.clone(),
                    ino: dentry.ino,
                    ftype: dentry.ftype,
                }));
            }
            index += 1;
            next = self.dentries[dentry].next;
        }
        Ok(None)
    }

    /// Creates a directory at the given absolute path.
    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        self.create(path, FileKind::Directory)
    }

    /// Creates an empty regular file at the given absolute path.
    pub fn mknod(&mut self, path: &str) -> Result<()> {
        self.create(path, FileKind::Regular)
    }

    /// Timestamp updates are accepted and ignored.
    pub fn utimens(&mut self, _path: &str) -> Result<()> {
        Ok(())
    }

    /// Sets the size of a regular file.
    ///
    /// Only the size field changes. TODO release data blocks beyond the new
    /// size once file content writes are implemented.
    pub fn truncate(&mut self, path: &str, size: u64) -> Result<()> {
        let lookup = self.lookup(path)?;
        if !lookup.found {
            return Err(Error::NotFound);
        }
        let inode = self.hydrate(lookup.dentry)?;
        if self.inodes[inode].ftype == FileKind::Directory {
            return Err(Error::IsADirectory);
        }
        if size > self.sb.file_max {
            return Err(Error::NoSpace);
        }
        self.inodes[inode].size = size as u32;
        self.sync(inode)
    }

    /// Reports whether the path resolves; permission classes are not
    /// checked.
    pub fn access(&mut self, path: &str) -> Result<()> {
        let lookup = self.lookup(path)?;
        if lookup.found { Ok(()) } else { Err(Error::NotFound) }
    }

    /// Creates a new leaf entry of the given type.
    fn create(&mut self, path: &str, ftype: FileKind) -> Result<()> {
        let lookup = self.lookup(path)?;
        if lookup.found {
            return Err(Error::Exists);
        }
        let parent = lookup.dentry;
        let parent_inode = self.hydrate(parent)?;
        if self.inodes[parent_inode].ftype == FileKind::Regular {
            return Err(Error::NotADirectory);
        }
        if !lookup.leaf_miss {
            return Err(Error::NotFound);
        }

        let name = file_name(path).to_owned();
        let child = self.add_dentry(Dentry::new(name, ftype, Some(parent)));
        let inode = self.alloc_inode(child)?;
        self.alloc_dentry(parent_inode, child)?;

        self.sync(inode)?;
        self.sync(parent_inode)?;
        Ok(())
    }

    /// Pushes a dentry into the arena and returns its handle.
    fn add_dentry(&mut self, dentry: Dentry) -> usize {
        let id = self.dentries.len();
        self.dentries.push(dentry);
        id
    }

    /// Allocates a fresh inode and cross-links it with the given dentry.
    fn alloc_inode(&mut self, dentry: usize) -> Result<usize> {
        let ino = self
            .ino_bitmap
            .allocate(self.sb.ino_max)
            .ok_or(Error::NoSpace)?;
        debug!("allocate inode {ino}");

        let id = self.inodes.len();
        self.inodes
            .push(Inode::new(ino, self.dentries[dentry].ftype, dentry));
        self.dentries[dentry].ino = ino;
        self.dentries[dentry].inode = Some(id);
        Ok(id)
    }

    /// Inserts a new child dentry into a directory, growing the directory's
    /// data blocks as needed. Returns the new child count.
    fn alloc_dentry(&mut self, inode: usize, child: usize) -> Result<u32> {
        let dpb = self.sb.dentries_per_block();
        let dir_cnt = self.inodes[inode].dir_cnt;
        if dir_cnt >= DIRECT_BLOCKS as u32 * dpb {
            return Err(Error::NoSpace);
        }

        // The new entry starts a fresh block.
        if dir_cnt % dpb == 0 {
            let blk = self
                .data_bitmap
                .allocate(self.sb.data_blks)
                .ok_or(Error::NoSpace)?;
            debug!("allocate data block {blk}");
            let slot = dir_cnt / dpb;
            self.inodes[inode].data[slot as usize] = blk;
            self.inodes[inode]
                .bufs
                .insert(slot, vec![0; self.sb.block_size as usize]);
        }

        self.link_child(inode, child);
        self.inodes[inode].size += size_of::<RawDentry>() as u32;
        self.inodes[inode].dir_cnt += 1;
        Ok(self.inodes[inode].dir_cnt)
    }

    /// Head-inserts a dentry into a directory's child list.
    ///
    /// Hydration uses this directly: the on-disk `dir_cnt`, `size` and
    /// `data[]` already account for entries read back from disk.
    fn link_child(&mut self, inode: usize, child: usize) {
        self.dentries[child].next = self.inodes[inode].children;
        self.inodes[inode].children = Some(child);
    }

    /// Returns the dentry's inode, reading it from disk on first access.
    /// Hydrated inodes stay valid for the whole mount.
    fn hydrate(&mut self, dentry: usize) -> Result<usize> {
        if let Some(inode) = self.dentries[dentry].inode {
            return Ok(inode);
        }

        let ino = self.dentries[dentry].ino;
        let mut raw: RawInode = unsafe { mem::zeroed() };
        self.dev
            .read(self.sb.inode_disk_offset(ino), reinterpret_mut(&mut raw))?;
        let ftype = FileKind::from_raw(raw.ftype).ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("inode {ino}: invalid file type"),
            ))
        })?;

        let id = self.inodes.len();
        let mut inode = Inode::new(raw.ino, ftype, dentry);
        inode.size = raw.size;
        *inode.data = raw.data;
        self.inodes.push(inode);
        self.dentries[dentry].inode = Some(id);

        match ftype {
            FileKind::Directory => {
                self.inodes[id].dir_cnt = raw.dir_cnt;
                self.hydrate_children(dentry, id, raw.dir_cnt)?;
            }
            FileKind::Regular => {
                let live = self.inodes[id].live_blocks();
                for slot in 0..live {
                    let blk = self.inodes[id].data[slot];
                    let mut buf = vec![0; self.sb.block_size as usize];
                    self.dev.read(self.sb.data_disk_offset(blk), &mut buf)?;
                    self.inodes[id].bufs.insert(slot as u32, buf);
                }
            }
            FileKind::Symlink => {}
        }
        Ok(id)
    }

    /// Reads a directory's dentries back from its data blocks and links
    /// them, without growing the directory's accounting.
    fn hydrate_children(&mut self, dentry: usize, inode: usize, dir_cnt: u32) -> Result<()> {
        let dpb = self.sb.dentries_per_block();
        for index in 0..dir_cnt {
            let blk = self.inodes[inode].data[(index / dpb) as usize];
            if blk == NO_BLOCK {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "directory data block missing",
                )));
            }
            let off = self.sb.data_disk_offset(blk)
                + u64::from(index % dpb) * size_of::<RawDentry>() as u64;
            let mut raw: RawDentry = unsafe { mem::zeroed() };
            self.dev.read(off, reinterpret_mut(&mut raw))?;

            let ftype = FileKind::from_raw(raw.ftype).ok_or_else(|| {
                Error::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "dentry with invalid file type",
                ))
            })?;
            let child = self.add_dentry(Dentry {
                name: name_from_raw(&raw.name),
                ino: raw.ino,
                ftype,
                parent: Some(dentry),
                next: None,
                inode: None,
            });
            self.link_child(inode, child);
        }
        Ok(())
    }

    /// Writes an inode and everything below it back to disk.
    fn sync(&mut self, inode: usize) -> Result<()> {
        let (ino, ftype, off, raw) = {
            let node = &self.inodes[inode];
            let mut raw: RawInode = unsafe { mem::zeroed() };
            raw.ino = node.ino;
            raw.size = node.size;
            raw.dir_cnt = node.dir_cnt;
            raw.ftype = self.dentries[node.dentry].ftype as u32;
            raw.data = *node.data;
            (node.ino, node.ftype, self.sb.inode_disk_offset(node.ino), raw)
        };
        self.dev.write(off, reinterpret(&raw))?;

        match ftype {
            FileKind::Directory => {
                let dpb = self.sb.dentries_per_block();
                let mut next = self.inodes[inode].children;
                let mut walked: u32 = 0;
                while let Some(dentry) = next {
                    let slot = (walked / dpb) as usize;
                    if slot >= DIRECT_BLOCKS {
                        error!("inode {ino}: too many dentry blocks");
                        return Err(corrupt("too many dentry blocks"));
                    }
                    let blk = self.inodes[inode].data[slot];
                    if blk == NO_BLOCK {
                        error!("inode {ino}: dentry slot {slot} has no data block");
                        return Err(corrupt("missing dentry block"));
                    }
                    let off = self.sb.data_disk_offset(blk)
                        + u64::from(walked % dpb) * size_of::<RawDentry>() as u64;
                    let raw = raw_dentry(&self.dentries[dentry]);
                    self.dev.write(off, reinterpret(&raw))?;

                    if let Some(child) = self.dentries[dentry].inode {
                        self.sync(child)?;
                    }
                    next = self.dentries[dentry].next;
                    walked += 1;
                }

                let dir_cnt = self.inodes[inode].dir_cnt;
                if walked != dir_cnt {
                    error!("inode {ino}: dentry count mismatch: expected {dir_cnt}, got {walked}");
                    return Err(corrupt("dentry count mismatch"));
                }
            }
            FileKind::Regular => {
                let live = self.inodes[inode].live_blocks();
                for slot in 0..live {
                    let blk = self.inodes[inode].data[slot];
                    let off = self.sb.data_disk_offset(blk);
                    let Some(buf) = self.inodes[inode].bufs.get(&(slot as u32)) else {
                        error!("inode {ino}: data slot {slot} has no buffer");
                        return Err(corrupt("missing block buffer"));
                    };
                    self.dev.write(off, buf)?;
                }
            }
            FileKind::Symlink => {}
        }
        Ok(())
    }
}

/// An on-disk inconsistency surfaced as an I/O failure.
fn corrupt(msg: &'static str) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::InvalidData, msg))
}

/// Decodes a NUL-padded on-disk name.
fn name_from_raw(raw: &[u8; NAME_LEN]) -> String {
    let len = raw.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
    String::from_utf8_lossy(&raw[..len]).into_owned()
}

/// Encodes a dentry into its on-disk record.
fn raw_dentry(dentry: &Dentry) -> RawDentry {
    let mut raw: RawDentry = unsafe { mem::zeroed() };
    let name = dentry.name.as_bytes();
    let len = name.len().min(NAME_LEN);
    raw.name[..len].copy_from_slice(&name[..len]);
    raw.ino = dentry.ino;
    raw.ftype = dentry.ftype as u32;
    raw
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::NamedTempFile;

    const DISK_SIZE: u64 = 4 * 1024 * 1024;

    fn scratch() -> (NamedTempFile, Fs) {
        let file = NamedTempFile::new().unwrap();
        file.as_file().set_len(DISK_SIZE).unwrap();
        let fs = remount(&file);
        (file, fs)
    }

    fn remount(file: &NamedTempFile) -> Fs {
        Fs::mount(Device::open(file.path()).unwrap()).unwrap()
    }

    fn root_inode(fs: &Fs) -> &Inode {
        &fs.inodes[fs.dentries[fs.root].inode.unwrap()]
    }

    /// Collects the names a full `readdir` of the path emits.
    fn names(fs: &mut Fs, path: &str) -> Vec<String> {
        let mut names = Vec::new();
        while let Some(entry) = fs.readdir(path, names.len() as u64).unwrap() {
            names.push(entry.name);
        }
        names
    }

    #[test]
    fn format_creates_empty_root() {
        let (file, fs) = scratch();
        let root = root_inode(&fs);
        assert_eq!(root.ino, 0);
        assert_eq!(root.ftype, FileKind::Directory);
        assert_eq!(root.dir_cnt, 0);
        assert_eq!(root.size, 0);
        assert!(root.data.iter().all(|&blk| blk == NO_BLOCK));

        assert_eq!(fs.ino_bitmap.as_bytes()[0], 0x01);
        assert!(fs.ino_bitmap.as_bytes()[1..].iter().all(|&b| b == 0));
        assert!(fs.data_bitmap.as_bytes().iter().all(|&b| b == 0));

        fs.unmount().unwrap();
        let image = std::fs::read(file.path()).unwrap();
        assert_eq!(&image[0..4], &MAGIC.to_le_bytes());
    }

    #[test]
    fn mkdir_allocates_inode_and_block() {
        let (file, fs) = scratch();
        fs.unmount().unwrap();

        let mut fs = remount(&file);
        fs.mkdir("/a").unwrap();
        let root = root_inode(&fs);
        assert_eq!(root.dir_cnt, 1);
        assert_eq!(root.data[0], 0);
        let child = root.children.unwrap();
        assert_eq!(fs.dentries[child].name, "a");
        assert_eq!(fs.dentries[child].ino, 1);
        assert_eq!(fs.dentries[child].ftype, FileKind::Directory);

        assert_eq!(fs.ino_bitmap.as_bytes()[0], 0x03);
        assert_eq!(fs.data_bitmap.as_bytes()[0], 0x01);
    }

    #[test]
    fn mknod_in_subdirectory() {
        let (file, mut fs) = scratch();
        fs.mkdir("/a").unwrap();
        fs.unmount().unwrap();

        let mut fs = remount(&file);
        fs.mknod("/a/b").unwrap();
        assert_eq!(root_inode(&fs).dir_cnt, 1);

        let lookup = fs.lookup("/a").unwrap();
        assert!(lookup.found);
        let a = &fs.inodes[fs.dentries[lookup.dentry].inode.unwrap()];
        assert_eq!(a.dir_cnt, 1);
        let b = a.children.unwrap();
        assert_eq!(fs.dentries[b].name, "b");
        assert_eq!(fs.dentries[b].ino, 2);
        assert_eq!(fs.dentries[b].ftype, FileKind::Regular);

        assert_eq!(fs.ino_bitmap.as_bytes()[0], 0x07);
        assert_eq!(fs.data_bitmap.as_bytes()[0], 0x03);
    }

    #[test]
    fn readdir_emits_each_child_once() {
        let (_file, mut fs) = scratch();
        fs.mkdir("/a").unwrap();
        fs.mknod("/a/b").unwrap();
        assert_eq!(names(&mut fs, "/"), ["a"]);
        assert_eq!(names(&mut fs, "/a"), ["b"]);
    }

    #[test]
    fn getattr_reports_type_and_budget() {
        let (_file, mut fs) = scratch();
        fs.mkdir("/a").unwrap();
        fs.mknod("/a/b").unwrap();

        let attr = fs.getattr("/a/b").unwrap();
        assert_eq!(attr.mode, libc::S_IFREG | 0o777);
        assert_eq!(attr.size, 0);
        assert_eq!(attr.blksize, 1024);
        assert_eq!(attr.blocks, 1024);
        assert_eq!(attr.nlink, 1);

        let root = fs.getattr("/").unwrap();
        assert_eq!(root.mode, libc::S_IFDIR | 0o777);
        assert_eq!(root.nlink, 2);
        assert_eq!(root.blocks, DISK_SIZE / 1024);
        assert_eq!(root.size, size_of::<RawDentry>() as u64);
    }

    #[test]
    fn mkdir_of_existing_mutates_nothing() {
        let (_file, mut fs) = scratch();
        fs.mkdir("/a").unwrap();
        let ino_before = fs.ino_bitmap.as_bytes()[0];
        let dat_before = fs.data_bitmap.as_bytes()[0];

        assert!(matches!(fs.mkdir("/a"), Err(Error::Exists)));
        assert!(matches!(fs.mknod("/a"), Err(Error::Exists)));
        assert_eq!(root_inode(&fs).dir_cnt, 1);
        assert_eq!(fs.ino_bitmap.as_bytes()[0], ino_before);
        assert_eq!(fs.data_bitmap.as_bytes()[0], dat_before);
    }

    #[test]
    fn create_under_invalid_parent() {
        let (_file, mut fs) = scratch();
        // Missing intermediate component.
        assert!(matches!(fs.mkdir("/x/y"), Err(Error::NotFound)));
        // A regular file as parent.
        fs.mknod("/f").unwrap();
        assert!(matches!(fs.mkdir("/f/z"), Err(Error::NotADirectory)));
        assert!(matches!(fs.mknod("/f/z/w"), Err(Error::NotADirectory)));
    }

    #[test]
    fn lookup_requires_exact_names() {
        let (_file, mut fs) = scratch();
        fs.mkdir("/ab").unwrap();
        assert!(matches!(fs.getattr("/a"), Err(Error::NotFound)));
        assert!(matches!(fs.getattr("/abc"), Err(Error::NotFound)));
        assert!(fs.getattr("/ab").is_ok());
    }

    #[test]
    fn remount_preserves_the_namespace() {
        let (file, mut fs) = scratch();
        fs.mkdir("/a").unwrap();
        fs.mkdir("/b").unwrap();
        fs.mknod("/c").unwrap();
        fs.mknod("/a/inner").unwrap();
        let mut before = names(&mut fs, "/");
        fs.unmount().unwrap();

        let mut fs = remount(&file);
        let mut after = names(&mut fs, "/");
        before.sort();
        after.sort();
        assert_eq!(before, after);
        assert_eq!(names(&mut fs, "/a"), ["inner"]);
        assert_eq!(fs.getattr("/c").unwrap().mode, libc::S_IFREG | 0o777);
    }

    #[test]
    fn truncate_updates_size_only() {
        let (_file, mut fs) = scratch();
        fs.mkdir("/d").unwrap();
        fs.mknod("/f").unwrap();

        fs.truncate("/f", 4096).unwrap();
        assert_eq!(fs.getattr("/f").unwrap().size, 4096);
        assert!(matches!(fs.truncate("/d", 0), Err(Error::IsADirectory)));
        assert!(matches!(fs.truncate("/missing", 0), Err(Error::NotFound)));
        let too_big = fs.sb.file_max + 1;
        assert!(matches!(fs.truncate("/f", too_big), Err(Error::NoSpace)));
    }

    #[test]
    fn inode_table_exhaustion() {
        let (_file, mut fs) = scratch();
        // The root holds inode 0; the table fits ino_max records in total.
        for i in 1..fs.sb.ino_max {
            fs.mkdir(&format!("/d{i}")).unwrap();
        }
        assert!(matches!(fs.mkdir("/overflow"), Err(Error::NoSpace)));
    }

    #[test]
    fn access_checks_existence() {
        let (_file, mut fs) = scratch();
        fs.mknod("/f").unwrap();
        assert!(fs.access("/f").is_ok());
        assert!(fs.access("/").is_ok());
        assert!(matches!(fs.access("/g"), Err(Error::NotFound)));
    }

    #[test]
    fn utimens_is_a_no_op() {
        let (_file, mut fs) = scratch();
        fs.mknod("/f").unwrap();
        fs.utimens("/f").unwrap();
    }

    #[test]
    fn directory_accounting_stays_consistent() {
        let (file, mut fs) = scratch();
        for i in 1..fs.sb.ino_max {
            fs.mknod(&format!("/f{i}")).unwrap();
        }
        let root = root_inode(&fs);
        assert_eq!(root.dir_cnt, fs.sb.ino_max - 1);
        assert_eq!(
            u64::from(root.size),
            u64::from(root.dir_cnt) * size_of::<RawDentry>() as u64
        );
        fs.unmount().unwrap();

        let mut fs = remount(&file);
        assert_eq!(names(&mut fs, "/").len(), (fs.sb.ino_max - 1) as usize);
    }

    #[test]
    fn directory_grows_into_a_second_block() {
        // The inode table is too small to reach 8 children through mkdir,
        // so exercise the insert protocol directly.
        let (_file, mut fs) = scratch();
        let root_id = fs.dentries[fs.root].inode.unwrap();
        let dpb = fs.sb.dentries_per_block();
        for i in 0..=dpb {
            let child = fs.add_dentry(Dentry::new(
                format!("e{i}"),
                FileKind::Regular,
                Some(fs.root),
            ));
            fs.alloc_dentry(root_id, child).unwrap();
        }

        let root = &fs.inodes[root_id];
        assert_eq!(root.dir_cnt, dpb + 1);
        assert_ne!(root.data[0], NO_BLOCK);
        assert_ne!(root.data[1], NO_BLOCK);
        assert_eq!(root.data[2], NO_BLOCK);
        assert_eq!(fs.data_bitmap.as_bytes()[0], 0x03);
    }
}
