//! 宿主机上的块设备
//!
//! [`BlockFile`] 将 Linux 上的一个文件包装成一块磁盘 (磁盘镜像), [`RamDisk`] 则把
//! 整块磁盘放在内存中, 用于测试.

use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::Path,
};

use log::info;
use spin::Mutex;

use crate::fs::BlockDevice;

// 注意 File 本身仅通过 read/write 接口是不能实现随机读写的,
// 在访问一个特定的块的时候, 我们必须先 seek 到这个块的开头位置
pub struct BlockFile {
    file: Mutex<File>,
    block_size: usize,
    total_blocks: usize,
}

impl BlockFile {
    /// 新建 (或截断) 磁盘镜像, 大小为 block_size * total_blocks, 内容全为 0
    pub fn create(path: impl AsRef<Path>, block_size: usize, total_blocks: usize) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        file.set_len((block_size * total_blocks) as u64)?;
        info!(
            "create disk image {} ({} x {}B)",
            path.as_ref().display(),
            total_blocks,
            block_size
        );
        Ok(Self {
            file: Mutex::new(file),
            block_size,
            total_blocks,
        })
    }

    /// 打开已有的磁盘镜像, 镜像比声明的容量小时失败
    pub fn open_existing(
        path: impl AsRef<Path>,
        block_size: usize,
        total_blocks: usize,
    ) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;
        let len = file.metadata()?.len();
        if len < (block_size * total_blocks) as u64 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "disk image {} holds {} bytes, expected {}",
                    path.as_ref().display(),
                    len,
                    block_size * total_blocks
                ),
            ));
        }
        Ok(Self {
            file: Mutex::new(file),
            block_size,
            total_blocks,
        })
    }

    fn check(&self, block_id: usize, len: usize) -> io::Result<()> {
        if block_id >= self.total_blocks || len != self.block_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("block {} ({} bytes) is out of range", block_id, len),
            ));
        }
        Ok(())
    }
}

impl BlockDevice for BlockFile {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn total_blocks(&self) -> usize {
        self.total_blocks
    }

    /// 从文件读取一个块
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> io::Result<()> {
        self.check(block_id, buf.len())?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start((block_id * self.block_size) as u64))?;
        file.read_exact(buf)
    }

    /// 写一个块到文件
    fn write_block(&self, block_id: usize, buf: &[u8]) -> io::Result<()> {
        self.check(block_id, buf.len())?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start((block_id * self.block_size) as u64))?;
        file.write_all(buf)
    }
}

/// 内存中的磁盘
pub struct RamDisk {
    data: Mutex<Vec<u8>>,
    block_size: usize,
    total_blocks: usize,
}

impl RamDisk {
    pub fn new(block_size: usize, total_blocks: usize) -> Self {
        Self {
            data: Mutex::new(vec![0; block_size * total_blocks]),
            block_size,
            total_blocks,
        }
    }

    fn range(&self, block_id: usize, len: usize) -> io::Result<std::ops::Range<usize>> {
        if block_id >= self.total_blocks || len != self.block_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("block {} ({} bytes) is out of range", block_id, len),
            ));
        }
        let start = block_id * self.block_size;
        Ok(start..start + len)
    }
}

impl BlockDevice for RamDisk {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn total_blocks(&self) -> usize {
        self.total_blocks
    }

    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> io::Result<()> {
        let range = self.range(block_id, buf.len())?;
        buf.copy_from_slice(&self.data.lock()[range]);
        Ok(())
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> io::Result<()> {
        let range = self.range(block_id, buf.len())?;
        self.data.lock()[range].copy_from_slice(buf);
        Ok(())
    }
}
