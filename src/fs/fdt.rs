//! 文件描述符表: 只存在于内存中, 每次挂载时重建为空表.
//!
//! 同一个 inode 可以被多个描述符同时打开, 它们的偏移量相互独立, 也没有任何互斥.

use super::{FsError, Result};

/// 一个打开的文件: inode 编号 + 当前读写偏移
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileDescriptor {
    pub inode: u32,
    pub offset: usize,
}

pub struct FileDescriptorTable {
    entries: Vec<Option<FileDescriptor>>,
}

impl FileDescriptorTable {
    pub fn format(capacity: usize) -> Self {
        Self {
            entries: vec![None; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn allocate_free(&self) -> Option<usize> {
        self.entries.iter().position(Option::is_none)
    }

    pub fn bind(&mut self, index: usize, inode: u32, initial_offset: usize) {
        self.entries[index] = Some(FileDescriptor {
            inode,
            offset: initial_offset,
        });
    }

    pub fn get(&self, index: usize) -> Result<FileDescriptor> {
        self.entries
            .get(index)
            .copied()
            .flatten()
            .ok_or(FsError::InvalidHandle(index))
    }

    fn get_mut(&mut self, index: usize) -> Result<&mut FileDescriptor> {
        self.entries
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or(FsError::InvalidHandle(index))
    }

    /// 不检查新偏移是否超出文件大小
    pub fn seek(&mut self, index: usize, new_offset: usize) -> Result<()> {
        self.get_mut(index)?.offset = new_offset;
        Ok(())
    }

    pub fn advance(&mut self, index: usize, by: usize) -> Result<()> {
        self.get_mut(index)?.offset += by;
        Ok(())
    }

    pub fn close(&mut self, index: usize) -> Result<()> {
        match self.entries.get_mut(index) {
            Some(entry) if entry.is_some() => {
                *entry = None;
                Ok(())
            }
            _ => Err(FsError::InvalidHandle(index)),
        }
    }

    /// 关闭所有指向 inode 的描述符, 返回关闭的个数
    pub fn close_inode(&mut self, inode: u32) -> usize {
        let mut closed = 0;
        for entry in self.entries.iter_mut() {
            if entry.is_some_and(|fd| fd.inode == inode) {
                *entry = None;
                closed += 1;
            }
        }
        closed
    }

    pub fn open_count(&self) -> usize {
        self.entries.iter().flatten().count()
    }
}
