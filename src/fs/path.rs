//! Absolute path resolution over the dentry tree.

use super::Fs;
use crate::error::Result;
use crate::layout::FileKind;
use log::debug;

/// The outcome of resolving a path.
pub struct Lookup {
    /// The dentry the walk stopped at; its inode is hydrated.
    pub dentry: usize,
    /// The full path resolved to `dentry`.
    pub found: bool,
    /// The path is the root itself.
    pub is_root: bool,
    /// Only the final component was missing; `dentry` is its would-be parent.
    pub leaf_miss: bool,
}

/// Returns the final component of an absolute path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').find(|s| !s.is_empty()).unwrap_or("")
}

impl Fs {
    /// Resolves an absolute path to a dentry.
    ///
    /// On a miss the returned dentry is the last one the walk could step
    /// into; create operations use `leaf_miss` to tell a missing leaf (the
    /// parent exists, inserting is fine) from a missing intermediate
    /// component (ENOENT).
    pub fn lookup(&mut self, path: &str) -> Result<Lookup> {
        let names: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let total_lvl = names.len();
        if total_lvl == 0 {
            self.hydrate(self.root)?;
            return Ok(Lookup {
                dentry: self.root,
                found: true,
                is_root: true,
                leaf_miss: false,
            });
        }

        let mut cursor = self.root;
        for (i, name) in names.iter().enumerate() {
            let lvl = i + 1;
            let inode = self.hydrate(cursor)?;
            if self.inodes[inode].ftype == FileKind::Regular {
                // A regular file cannot be stepped into.
                debug!("lookup: {path}: not a directory");
                return Ok(Lookup {
                    dentry: cursor,
                    found: false,
                    is_root: false,
                    leaf_miss: false,
                });
            }

            match self.find_child(inode, name) {
                Some(child) => {
                    if lvl == total_lvl {
                        self.hydrate(child)?;
                        return Ok(Lookup {
                            dentry: child,
                            found: true,
                            is_root: false,
                            leaf_miss: false,
                        });
                    }
                    cursor = child;
                }
                None => {
                    debug!("lookup: {path}: no entry named {name}");
                    return Ok(Lookup {
                        dentry: cursor,
                        found: false,
                        is_root: false,
                        leaf_miss: lvl == total_lvl,
                    });
                }
            }
        }
        unreachable!("the final component always returns out of the walk")
    }

    /// Scans a directory's child list for an exact name match.
    fn find_child(&self, inode: usize, name: &str) -> Option<usize> {
        let mut next = self.inodes[inode].children;
        while let Some(dentry) = next {
            if self.dentries[dentry].name == name {
                return Some(dentry);
            }
            next = self.dentries[dentry].next;
        }
        None
    }
}
