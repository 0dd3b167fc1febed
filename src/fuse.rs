//! FUSE host adapter.
//!
//! The kernel addresses entries by inode number while the core operations
//! are path-based, so the session keeps a table of every inode number it has
//! handed out and the path it stands for. FUSE inode numbers are the core's
//! shifted by one, as the kernel reserves 1 for the root.

use crate::fs::Attr;
use crate::fs::Fs;
use crate::layout::FileKind;
use crate::layout::NAME_LEN;
use fuser::FileAttr;
use fuser::FileType;
use fuser::Filesystem;
use fuser::KernelConfig;
use fuser::ReplyAttr;
use fuser::ReplyData;
use fuser::ReplyDirectory;
use fuser::ReplyEmpty;
use fuser::ReplyEntry;
use fuser::ReplyOpen;
use fuser::ReplyWrite;
use fuser::Request;
use fuser::TimeOrNow;
use libc::c_int;
use log::error;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::time::Duration;
use std::time::SystemTime;

/// Kernel cache validity for replied entries and attributes.
const TTL: Duration = Duration::from_secs(1);

/// A FUSE session serving one mounted filesystem.
pub struct FuseFs {
    /// The mounted core; taken on `destroy`.
    fs: Option<Fs>,
    /// Paths by FUSE inode number.
    paths: HashMap<u64, String>,
}

impl FuseFs {
    /// Wraps an already mounted filesystem.
    pub fn new(fs: Fs) -> Self {
        let mut paths = HashMap::new();
        paths.insert(fuser::FUSE_ROOT_ID, "/".to_owned());
        Self {
            fs: Some(fs),
            paths,
        }
    }

    /// The path a previously replied inode number stands for.
    fn path_of(&self, ino: u64) -> Result<String, c_int> {
        self.paths.get(&ino).cloned().ok_or(libc::ENOENT)
    }

    /// The path of a child entry inside a known directory.
    fn child_path(&self, parent: u64, name: &OsStr) -> Result<String, c_int> {
        let name = name.to_str().ok_or(libc::EINVAL)?;
        if name.len() >= NAME_LEN {
            return Err(libc::ENAMETOOLONG);
        }
        let parent = self.paths.get(&parent).ok_or(libc::ENOENT)?;
        if parent == "/" {
            Ok(format!("/{name}"))
        } else {
            Ok(format!("{parent}/{name}"))
        }
    }

    /// Creates a leaf of the given type and replies with its entry.
    fn create_entry(&mut self, parent: u64, name: &OsStr, ftype: FileKind, reply: ReplyEntry) {
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        let Some(fs) = self.fs.as_mut() else {
            return reply.error(libc::EIO);
        };
        let created = match ftype {
            FileKind::Directory => fs.mkdir(&path),
            _ => fs.mknod(&path),
        };
        match created.and_then(|_| fs.getattr(&path)) {
            Ok(attr) => {
                let attr = file_attr(&attr);
                self.paths.insert(attr.ino, path);
                reply.entry(&TTL, &attr, 0);
            }
            Err(err) => reply.error(err.errno()),
        }
    }
}

/// Converts core attributes into the host's record.
fn file_attr(attr: &Attr) -> FileAttr {
    FileAttr {
        ino: u64::from(attr.ino) + 1,
        size: attr.size,
        blocks: attr.blocks,
        atime: attr.atime,
        mtime: attr.mtime,
        ctime: attr.mtime,
        crtime: attr.mtime,
        kind: file_type(attr.ftype),
        perm: (attr.mode & 0o7777) as u16,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: attr.blksize,
        flags: 0,
    }
}

fn file_type(ftype: FileKind) -> FileType {
    match ftype {
        FileKind::Regular => FileType::RegularFile,
        FileKind::Directory => FileType::Directory,
        FileKind::Symlink => FileType::Symlink,
    }
}

impl Filesystem for FuseFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        Ok(())
    }

    fn destroy(&mut self) {
        if let Some(fs) = self.fs.take() {
            if let Err(err) = fs.unmount() {
                error!("unmount failed: {err}");
            }
        }
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        let Some(fs) = self.fs.as_mut() else {
            return reply.error(libc::EIO);
        };
        match fs.getattr(&path) {
            Ok(attr) => {
                let attr = file_attr(&attr);
                self.paths.insert(attr.ino, path);
                reply.entry(&TTL, &attr, 0);
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let path = match self.path_of(ino) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        let Some(fs) = self.fs.as_mut() else {
            return reply.error(libc::EIO);
        };
        match fs.getattr(&path) {
            Ok(attr) => reply.attr(&TTL, &file_attr(&attr)),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let path = match self.path_of(ino) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        let Some(fs) = self.fs.as_mut() else {
            return reply.error(libc::EIO);
        };
        if let Some(size) = size {
            if let Err(err) = fs.truncate(&path, size) {
                return reply.error(err.errno());
            }
        }
        // Timestamp updates are accepted and ignored.
        if let Err(err) = fs.utimens(&path) {
            return reply.error(err.errno());
        }
        match fs.getattr(&path) {
            Ok(attr) => reply.attr(&TTL, &file_attr(&attr)),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        self.create_entry(parent, name, FileKind::Regular, reply);
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        self.create_entry(parent, name, FileKind::Directory, reply);
    }

    fn open(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
        reply.opened(0, 0);
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _offset: i64,
        _size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        // File content is not stored yet; reads see an empty file.
        reply.data(&[]);
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        // File content is not stored yet; claim the write so `touch`-style
        // workflows keep going.
        reply.written(data.len() as u32);
    }

    fn opendir(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
        reply.opened(0, 0);
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let path = match self.path_of(ino) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        let Some(fs) = self.fs.as_mut() else {
            return reply.error(libc::EIO);
        };
        let mut index = offset.max(0) as u64;
        loop {
            match fs.readdir(&path, index) {
                Ok(Some(entry)) => {
                    let full = reply.add(
                        u64::from(entry.ino) + 1,
                        (index + 1) as i64,
                        file_type(entry.ftype),
                        &entry.name,
                    );
                    if full {
                        break;
                    }
                    index += 1;
                }
                Ok(None) => break,
                Err(err) => return reply.error(err.errno()),
            }
        }
        reply.ok();
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, _mask: i32, reply: ReplyEmpty) {
        let path = match self.path_of(ino) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        let Some(fs) = self.fs.as_mut() else {
            return reply.error(libc::EIO);
        };
        match fs.access(&path) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.errno()),
        }
    }
}
