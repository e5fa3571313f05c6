//! sfs: a simple file system on a fixed-size simulated block device.
//!
//! 磁盘布局: 超级块, inode 表, 数据块区域 (根目录的目录项也放在这里), 数据块位图.
//! [`fs::SimpleFileSystem`] 是唯一的入口, 由 `mount` 构造并持有全部内存中的表.

pub mod config;
pub mod device;
pub mod fs;

#[cfg(test)]
mod test;
