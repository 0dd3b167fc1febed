//! Errors reported by filesystem operations.

use libc::c_int;
use std::fmt;
use std::io;

/// The failure categories an operation can report; the host boundary maps
/// them onto negative POSIX error numbers.
#[derive(Debug)]
pub enum Error {
    /// The path does not resolve to an existing entry.
    NotFound,
    /// The name already exists in the target directory.
    Exists,
    /// A path component that has to be a directory is a regular file.
    NotADirectory,
    /// The operation does not apply to a directory.
    IsADirectory,
    /// A bitmap is exhausted or a per-file limit was exceeded.
    NoSpace,
    /// Device failure, or an on-disk inconsistency was detected.
    Io(io::Error),
    /// Reserved; permission checks are not implemented.
    AccessDenied,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The errno reported to the filesystem host.
    pub fn errno(&self) -> c_int {
        match self {
            Error::NotFound => libc::ENOENT,
            Error::Exists => libc::EEXIST,
            Error::NotADirectory => libc::ENXIO,
            Error::IsADirectory => libc::EISDIR,
            Error::NoSpace => libc::ENOSPC,
            Error::Io(_) => libc::EIO,
            Error::AccessDenied => libc::EACCES,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound => write!(fmt, "no such file or directory"),
            Error::Exists => write!(fmt, "file exists"),
            Error::NotADirectory => write!(fmt, "not a directory"),
            Error::IsADirectory => write!(fmt, "is a directory"),
            Error::NoSpace => write!(fmt, "no space left on device"),
            Error::Io(err) => write!(fmt, "i/o error: {err}"),
            Error::AccessDenied => write!(fmt, "permission denied"),
        }
    }
}

impl std::error::Error for Error {}
