//! 根目录 (扁平命名空间)
//!
//! 目录项存放在 inode 0 所拥有的数据块中, 每个块放 `block_size / DIRENT_SIZE` 项.
//! 第 i 个槽位位于根目录的第 `i * DIRENT_SIZE` 字节处, 因此内存中的目录表总是可以
//! 由根 inode 的指针按顺序拼接得到.
//!
//! 删除文件时只清空槽位, 目录表不会收缩, 空出来的槽位会被之后的创建复用.

use std::collections::HashSet;

use log::{debug, error, warn};

use super::{
    BlockCacheManager, DirEntry, FreeBitmap, FsError, Geometry, InodeTable, Result, DIRENT_SIZE,
    ROOT_INODE,
};

pub struct Directory {
    entries: Vec<Option<DirEntry>>,
    per_block: usize,
    /// list_next 的游标, 每次挂载时归零
    cursor: usize,
}

impl Directory {
    /// 所有槽位都未使用. 目录块在第一次写入目录项时才分配
    pub fn format(geometry: &Geometry) -> Self {
        Self {
            entries: vec![None; geometry.dir_capacity()],
            per_block: geometry.dirents_per_block(),
            cursor: 0,
        }
    }

    /// 依次读出根 inode 指向的每个块, 把目录项连续地填入内存中的目录表
    pub fn load(
        geometry: &Geometry,
        inodes: &mut InodeTable,
        bitmap: &mut FreeBitmap,
        cache: &mut BlockCacheManager,
    ) -> Result<Self> {
        let mut dir = Self::format(geometry);
        for pointer in 0..geometry.dir_blocks() {
            let offset = pointer * geometry.block_size;
            let block_id = match inodes.resolve_block_for_offset(ROOT_INODE, offset, false, bitmap, cache) {
                Ok(block_id) => block_id,
                Err(FsError::BlockNotAllocated { .. }) => break,
                Err(e) => return Err(e),
            };
            let first = pointer * dir.per_block;
            let last = (first + dir.per_block).min(dir.entries.len());
            let slots = &mut dir.entries[first..last];
            cache.read(block_id as usize, |data| {
                for (slot, raw) in slots.iter_mut().zip(data.chunks_exact(DIRENT_SIZE)) {
                    *slot = DirEntry::decode(raw);
                }
            })?;
        }
        let mut seen = HashSet::new();
        for entry in dir.iter() {
            let inode = entry.inode_id();
            if inode == ROOT_INODE || inodes.get(inode).is_none() || !seen.insert(inode) {
                error!("dirent {} refers to unusable inode {}", entry.name(), inode);
                return Err(FsError::CorruptFilesystem);
            }
        }
        let live = dir.len() as u32;
        if let Some(root) = inodes.get(ROOT_INODE) {
            if root.size != live * DIRENT_SIZE as u32 {
                warn!(
                    "root directory size {} does not match {} live entries",
                    root.size, live
                );
            }
        }
        Ok(dir)
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// 正在使用的目录项数
    pub fn len(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn find_by_name(&self, name: &str) -> Option<u32> {
        self.find_slot(name)
            .and_then(|slot| self.entries[slot].as_ref())
            .map(DirEntry::inode_id)
    }

    pub fn find_slot(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.as_ref().is_some_and(|e| e.name() == name))
    }

    pub fn find_free_slot(&self) -> Option<usize> {
        self.entries.iter().position(Option::is_none)
    }

    /// 只修改内存中的槽位, 磁盘上的写入由 [`Directory::materialize`] 完成
    pub fn bind(&mut self, slot: usize, name: &str, inode: u32) {
        debug_assert!(self.entries[slot].is_none());
        self.entries[slot] = Some(DirEntry::new(name, inode));
    }

    /// 把目录项写到它所在的目录块 (必要时为根 inode 分配该块), 并把根目录的大小增加一项
    pub fn materialize(
        &self,
        slot: usize,
        name: &str,
        inode: u32,
        inodes: &mut InodeTable,
        bitmap: &mut FreeBitmap,
        cache: &mut BlockCacheManager,
    ) -> Result<()> {
        let block_id =
            inodes.resolve_block_for_offset(ROOT_INODE, slot * DIRENT_SIZE, true, bitmap, cache)?;
        let offset = (slot % self.per_block) * DIRENT_SIZE;
        let entry = DirEntry::new(name, inode);
        cache.modify(block_id as usize, |data| {
            entry.encode(&mut data[offset..offset + DIRENT_SIZE])
        })?;
        inodes.get_mut(ROOT_INODE)?.size += DIRENT_SIZE as u32;
        inodes.persist(ROOT_INODE, cache)?;
        debug!("dirent {} -> ({}, inode {}) in block {}", slot, name, inode, block_id);
        Ok(())
    }

    /// 清空内存中的目录项, 返回它所在的槽位
    pub fn unbind(&mut self, name: &str) -> Option<usize> {
        let slot = self.find_slot(name)?;
        self.entries[slot] = None;
        Some(slot)
    }

    /// 清除磁盘上 slot 对应的目录项. block_id 必须是该槽位所在的目录块
    pub fn scrub_slot(
        &self,
        block_id: u32,
        slot: usize,
        cache: &mut BlockCacheManager,
    ) -> Result<()> {
        let offset = (slot % self.per_block) * DIRENT_SIZE;
        cache.modify(block_id as usize, |data| {
            DirEntry::scrub(&mut data[offset..offset + DIRENT_SIZE])
        })
    }

    /// 槽位在根目录中的字节偏移
    pub fn slot_offset(&self, slot: usize) -> usize {
        slot * DIRENT_SIZE
    }

    /// 返回下一个文件名; 到达末尾时返回 None 并把游标归零
    pub fn next_name(&mut self) -> Option<String> {
        while self.cursor < self.entries.len() {
            let slot = self.cursor;
            self.cursor += 1;
            if let Some(entry) = &self.entries[slot] {
                return Some(entry.name().to_owned());
            }
        }
        self.cursor = 0;
        None
    }

    /// 按槽位顺序遍历正在使用的目录项
    pub fn iter(&self) -> impl Iterator<Item = &DirEntry> {
        self.entries.iter().flatten()
    }
}
