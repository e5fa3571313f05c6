//! Inode 表
//!
//! 所有 inode 都常驻内存, 每次修改之后只把被修改的 inode 所在的那个块写回.
//! inode 0 固定为根目录, 它拥有的数据块中存放着目录项.
//!
//! 一个 inode 最多可以引用 [`INODE_DIRECT_COUNT`] 个直接块, 以及一个间接块中的
//! `block_size / 4` 个数据块. 文件偏移 `offset` 所在的块由
//! [`InodeTable::resolve_block_for_offset`] 确定, 写操作会按需分配块.

use std::collections::HashSet;

use log::{debug, error, trace};

use super::{
    clear_indirect, decode_ptr, encode_ptr, read_indirect, write_indirect, BlockCacheManager,
    DiskInode, DiskInodeType, FreeBitmap, FsError, Geometry, Result, DISK_INODE_SIZE,
    INODE_DIRECT_COUNT, ROOT_INODE,
};

/// 内存中一个正在使用的 inode
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inode {
    pub kind: DiskInodeType,
    pub link_cnt: u32,
    /// 文件大小 (字节)
    pub size: u32,
    pub direct: [Option<u32>; INODE_DIRECT_COUNT],
    pub indirect: Option<u32>,
}

impl Inode {
    pub fn new(kind: DiskInodeType) -> Self {
        Self {
            kind,
            link_cnt: 1,
            size: 0,
            direct: [None; INODE_DIRECT_COUNT],
            indirect: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == DiskInodeType::Directory
    }
}

/// link_cnt 为 0 的 inode 就是空闲的, 它不持有任何块
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InodeSlot {
    Free,
    InUse(Inode),
}

impl InodeSlot {
    fn to_disk(&self) -> DiskInode {
        match self {
            InodeSlot::Free => DiskInode::free(),
            InodeSlot::InUse(inode) => DiskInode {
                mode: match inode.kind {
                    DiskInodeType::File => DiskInode::MODE_FILE,
                    DiskInodeType::Directory => DiskInode::MODE_DIR,
                },
                link_cnt: inode.link_cnt,
                size: inode.size,
                direct: inode.direct.map(encode_ptr),
                indirect: encode_ptr(inode.indirect),
            },
        }
    }

    fn from_disk(disk: &DiskInode) -> Self {
        if disk.link_cnt == 0 {
            return InodeSlot::Free;
        }
        let kind = if disk.mode == DiskInode::MODE_DIR {
            DiskInodeType::Directory
        } else {
            DiskInodeType::File
        };
        InodeSlot::InUse(Inode {
            kind,
            link_cnt: disk.link_cnt,
            size: disk.size,
            direct: disk.direct.map(decode_ptr),
            indirect: decode_ptr(disk.indirect),
        })
    }
}

pub struct InodeTable {
    geometry: Geometry,
    slots: Vec<InodeSlot>,
}

/// 从位图分配一个数据块并清零
fn alloc_block(bitmap: &mut FreeBitmap, cache: &mut BlockCacheManager) -> Result<u32> {
    let block_id = bitmap.allocate(cache)?.ok_or(FsError::DeviceFull)?;
    cache.zero(block_id as usize)?;
    Ok(block_id)
}

/// 清零一个数据块并归还给位图
fn free_block(block_id: u32, bitmap: &mut FreeBitmap, cache: &mut BlockCacheManager) -> Result<()> {
    cache.zero(block_id as usize)?;
    bitmap.release(block_id, cache)
}

/// 通过 inode 编号返回 block_id 和块内偏移
fn disk_inode_pos(geometry: &Geometry, index: u32) -> (usize, usize) {
    let per_block = geometry.inodes_per_block();
    let index = index as usize;
    (
        geometry.inode_start() + index / per_block,
        (index % per_block) * DISK_INODE_SIZE,
    )
}

fn persist_slot(
    geometry: &Geometry,
    index: u32,
    slot: &InodeSlot,
    cache: &mut BlockCacheManager,
) -> Result<()> {
    let (block_id, offset) = disk_inode_pos(geometry, index);
    let disk = slot.to_disk();
    cache.modify(block_id, |data| {
        disk.encode(&mut data[offset..offset + DISK_INODE_SIZE])
    })
}

fn in_use_mut(slots: &mut [InodeSlot], index: u32) -> Result<&mut Inode> {
    match slots.get_mut(index as usize) {
        Some(InodeSlot::InUse(inode)) => Ok(inode),
        _ => Err(FsError::FileNotFound(format!("#{}", index))),
    }
}

impl InodeTable {
    /// 根目录初始化为正在使用的空目录, 其余 inode 全部空闲, 写回整个 inode 区域
    pub fn format(geometry: &Geometry, cache: &mut BlockCacheManager) -> Result<Self> {
        let mut slots = vec![InodeSlot::Free; geometry.inode_count];
        slots[ROOT_INODE as usize] = InodeSlot::InUse(Inode::new(DiskInodeType::Directory));
        let table = Self {
            geometry: *geometry,
            slots,
        };
        for block in 0..geometry.inode_blocks() {
            cache.zero(geometry.inode_start() + block)?;
        }
        for index in 0..geometry.inode_count as u32 {
            table.persist(index, cache)?;
        }
        Ok(table)
    }

    /// 把磁盘上的 inode 区域整体读入内存
    pub fn load(geometry: &Geometry, cache: &mut BlockCacheManager) -> Result<Self> {
        let mut slots = Vec::with_capacity(geometry.inode_count);
        for index in 0..geometry.inode_count as u32 {
            let (block_id, offset) = disk_inode_pos(geometry, index);
            let disk = cache.read(block_id, |data| {
                DiskInode::decode(&data[offset..offset + DISK_INODE_SIZE])
            })?;
            slots.push(InodeSlot::from_disk(&disk));
        }
        match &slots[ROOT_INODE as usize] {
            InodeSlot::InUse(root) if root.is_dir() => {}
            _ => return Err(FsError::CorruptFilesystem),
        }
        Ok(Self {
            geometry: *geometry,
            slots,
        })
    }

    /// 检查从磁盘读入的块指针. 每个指针 (包括间接块及其中的表项) 都必须落在数据区域内,
    /// 在位图中标记为已使用, 并且只被引用一次; 否则镜像已损坏
    pub fn verify(&self, bitmap: &FreeBitmap, cache: &mut BlockCacheManager) -> Result<()> {
        let geometry = self.geometry;
        let mut seen = HashSet::new();
        let mut check = |index: u32, block_id: u32| -> Result<()> {
            if geometry.data_index(block_id).is_none()
                || !bitmap.is_used(block_id)
                || !seen.insert(block_id)
            {
                error!("inode {} references invalid data block {}", index, block_id);
                return Err(FsError::CorruptFilesystem);
            }
            Ok(())
        };

        for (index, slot) in self.slots.iter().enumerate() {
            let InodeSlot::InUse(inode) = slot else {
                continue;
            };
            let index = index as u32;
            for block_id in inode.direct.iter().flatten() {
                check(index, *block_id)?;
            }
            if let Some(table) = inode.indirect {
                check(index, table)?;
                let count = geometry.indirect_count();
                let blocks: Vec<u32> = cache.read(table as usize, |data| {
                    (0..count).filter_map(|i| read_indirect(data, i)).collect()
                })?;
                for block_id in blocks {
                    check(index, block_id)?;
                }
            }
        }
        Ok(())
    }

    pub fn persist(&self, index: u32, cache: &mut BlockCacheManager) -> Result<()> {
        persist_slot(&self.geometry, index, &self.slots[index as usize], cache)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, index: u32) -> Option<&Inode> {
        match self.slots.get(index as usize) {
            Some(InodeSlot::InUse(inode)) => Some(inode),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, index: u32) -> Result<&mut Inode> {
        in_use_mut(&mut self.slots, index)
    }

    pub fn slot(&self, index: u32) -> Option<&InodeSlot> {
        self.slots.get(index as usize)
    }

    /// 第一个空闲的 inode
    pub fn allocate_free(&self) -> Option<u32> {
        self.slots
            .iter()
            .position(|slot| *slot == InodeSlot::Free)
            .map(|index| index as u32)
    }

    /// 将一个空闲 inode 初始化为空文件
    pub fn activate(&mut self, index: u32, cache: &mut BlockCacheManager) -> Result<()> {
        let slot = &mut self.slots[index as usize];
        assert_eq!(*slot, InodeSlot::Free, "inode {} is already in use", index);
        *slot = InodeSlot::InUse(Inode::new(DiskInodeType::File));
        debug!("activate inode {}", index);
        self.persist(index, cache)
    }

    /// 文件偏移 -> 数据块编号.
    ///
    /// `offset / block_size` 小于直接指针数时使用直接指针, 否则使用间接块中的第
    /// `offset / block_size - INODE_DIRECT_COUNT` 项. 指针未分配时, `create` 为真则分配
    /// (必要时先分配间接块本身), 否则返回 [`FsError::BlockNotAllocated`].
    pub fn resolve_block_for_offset(
        &mut self,
        index: u32,
        offset: usize,
        create: bool,
        bitmap: &mut FreeBitmap,
        cache: &mut BlockCacheManager,
    ) -> Result<u32> {
        let geometry = self.geometry;
        let pointer = offset / geometry.block_size;
        if pointer >= geometry.max_pointers() {
            return Err(FsError::FileTooLarge {
                offset,
                max: geometry.max_file_size(),
            });
        }
        let not_allocated = FsError::BlockNotAllocated {
            inode: index,
            pointer,
        };
        let inode = in_use_mut(&mut self.slots, index)?;

        if pointer < INODE_DIRECT_COUNT {
            if let Some(block_id) = inode.direct[pointer] {
                return Ok(block_id);
            }
            if !create {
                return Err(not_allocated);
            }
            let block_id = alloc_block(bitmap, cache)?;
            inode.direct[pointer] = Some(block_id);
            trace!("inode {} direct[{}] -> {}", index, pointer, block_id);
            self.persist(index, cache)?;
            return Ok(block_id);
        }

        let slot = pointer - INODE_DIRECT_COUNT;
        let table = match inode.indirect {
            Some(table) => table,
            None if !create => return Err(not_allocated),
            None => {
                let table = alloc_block(bitmap, cache)?;
                cache.modify(table as usize, clear_indirect)?;
                inode.indirect = Some(table);
                trace!("inode {} indirect table -> {}", index, table);
                self.persist(index, cache)?;
                table
            }
        };
        if let Some(block_id) = cache.read(table as usize, |data| read_indirect(data, slot))? {
            return Ok(block_id);
        }
        if !create {
            return Err(not_allocated);
        }
        let block_id = alloc_block(bitmap, cache)?;
        cache.modify(table as usize, |data| {
            write_indirect(data, slot, Some(block_id))
        })?;
        trace!("inode {} indirect[{}] -> {}", index, slot, block_id);
        Ok(block_id)
    }

    /// 按指针顺序列出 inode 引用的所有数据块 (不含间接块本身)
    pub fn data_blocks(&self, index: u32, cache: &mut BlockCacheManager) -> Result<Vec<u32>> {
        let Some(inode) = self.get(index) else {
            return Err(FsError::FileNotFound(format!("#{}", index)));
        };
        let mut blocks: Vec<u32> = inode.direct.iter().flatten().copied().collect();
        if let Some(table) = inode.indirect {
            let count = self.geometry.indirect_count();
            cache.read(table as usize, |data| {
                blocks.extend((0..count).filter_map(|i| read_indirect(data, i)))
            })?;
        }
        Ok(blocks)
    }

    /// 回收 inode: 清零并释放所有直接块, 间接块所指的块以及间接块本身,
    /// 最后把 inode 恢复为空闲状态并写回
    pub fn release(
        &mut self,
        index: u32,
        bitmap: &mut FreeBitmap,
        cache: &mut BlockCacheManager,
    ) -> Result<()> {
        assert_ne!(index, ROOT_INODE, "the root directory cannot be released");
        let inode = in_use_mut(&mut self.slots, index)?.clone();

        for block_id in inode.direct.iter().flatten() {
            free_block(*block_id, bitmap, cache)?;
        }
        if let Some(table) = inode.indirect {
            let count = self.geometry.indirect_count();
            let blocks: Vec<u32> = cache.read(table as usize, |data| {
                (0..count).filter_map(|i| read_indirect(data, i)).collect()
            })?;
            for block_id in blocks {
                free_block(block_id, bitmap, cache)?;
            }
            free_block(table, bitmap, cache)?;
        }

        self.slots[index as usize] = InodeSlot::Free;
        debug!("release inode {}", index);
        self.persist(index, cache)
    }
}
