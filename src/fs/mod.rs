mod bitmap;
mod block_cache;
mod block_dev;
mod directory;
mod error;
mod fdt;
mod inode;
mod layout;
mod sfs;
mod vfs;

extern crate log;

/// Default block size of 1024 bytes
pub const BLOCK_SIZE: usize = 1024;
/// 为了避免在块缓存上浪费过多内存, 我们希望内存中同时只能驻留有限个磁盘块的缓冲区
pub const BLOCK_CACHE_SIZE: usize = 16;
/// Magic signature for sanity check
pub const SFS_MAGIC: &[u8; 10] = b"0xACBD0005";
/// Default capacity of the inode table
pub const INODE_COUNT: usize = 160;
/// Default length of the data region in blocks
pub const DATA_BLOCKS: usize = 1500;
/// Default capacity of the file descriptor table
pub const FDT_SIZE: usize = 320;
/// The number of direct pointers in an inode
pub const INODE_DIRECT_COUNT: usize = 12;
/// 磁盘上一个 inode 的大小
pub const DISK_INODE_SIZE: usize = 64;
/// 目录项的大小
pub const DIRENT_SIZE: usize = 32;
/// The max length of a file name (one byte is kept for the NUL terminator)
pub const NAME_LENGTH_LIMIT: usize = DIRENT_SIZE - 4 - 1;
/// The root directory always lives in inode 0
pub const ROOT_INODE: u32 = 0;
/// 块内指针 (u32) 的未分配标记
pub const UNASSIGNED: u32 = u32::MAX;

pub use bitmap::FreeBitmap;
pub use block_cache::{BlockCache, BlockCacheManager};
pub use block_dev::BlockDevice;
pub use directory::Directory;
pub use error::{FsError, Result};
pub use fdt::{FileDescriptor, FileDescriptorTable};
pub use inode::{Inode, InodeSlot, InodeTable};
pub use layout::*;
pub use sfs::SimpleFileSystem;
