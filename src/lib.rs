//! A small user-space filesystem backed by a fixed-size block device.
//!
//! The on-disk image is a superblock, one inode-bitmap block, one data-bitmap
//! block, a fixed inode table and a data region. While mounted, the namespace
//! lives in a lazily hydrated inode/dentry tree which is flushed back to the
//! device at unmount.

pub mod bitmap;
pub mod device;
pub mod error;
pub mod fs;
pub mod fuse;
pub mod layout;
