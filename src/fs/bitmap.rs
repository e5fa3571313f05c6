//! 数据块位图
//!
//! 位图区域由若干个块组成, 每个 bit 都代表数据区域中一个块的分配状态,
//! 0 意味着未分配, 而 1 则意味着已经分配出去.
//!
//! 位图在内存中保存一份完整的拷贝 (以 u64 为一组), 分配和回收都先修改内存中的拷贝,
//! 然后只把被修改的那个 u64 所在的位图块写回.

use log::debug;

use super::{BlockCacheManager, Geometry, Result};

pub struct FreeBitmap {
    /// 位图所在区域的起始块编号
    start_block_id: usize,
    /// 位图区域占用的磁盘块数
    blocks_count: usize,
    /// 数据区域起始块编号, bit i 对应块 data_start + i
    data_start: usize,
    /// 数据块的数量, 超出部分的 bit 永远不会被分配
    len: usize,
    /// 每个位图块中的 u64 组数
    groups_per_block: usize,
    bits: Vec<u64>,
}

impl FreeBitmap {
    /// 所有数据块都未分配的位图, 尚未写入磁盘
    pub fn new(geometry: &Geometry) -> Self {
        let groups_per_block = geometry.block_size / 8;
        Self {
            start_block_id: geometry.bitmap_start(),
            blocks_count: geometry.bitmap_blocks(),
            data_start: geometry.data_start(),
            len: geometry.data_blocks,
            groups_per_block,
            bits: vec![0; geometry.bitmap_blocks() * groups_per_block],
        }
    }

    /// 将数据区域中的每个块都标记为空闲, 并写回整个位图区域
    pub fn init(&mut self, cache: &mut BlockCacheManager) -> Result<()> {
        self.bits.iter_mut().for_each(|g| *g = 0);
        for block in 0..self.blocks_count {
            cache.zero(self.start_block_id + block)?;
        }
        Ok(())
    }

    /// 从磁盘上读出整个位图
    pub fn load(geometry: &Geometry, cache: &mut BlockCacheManager) -> Result<Self> {
        let mut bitmap = Self::new(geometry);
        let groups_per_block = bitmap.groups_per_block;
        for block in 0..bitmap.blocks_count {
            let groups = &mut bitmap.bits[block * groups_per_block..(block + 1) * groups_per_block];
            cache.read(bitmap.start_block_id + block, |data| {
                for (group, raw) in groups.iter_mut().zip(data.chunks_exact(8)) {
                    let mut word = [0u8; 8];
                    word.copy_from_slice(raw);
                    *group = u64::from_le_bytes(word);
                }
            })?;
        }
        Ok(bitmap)
    }

    /// 将第 group 组写回它所在的位图块
    fn persist_group(&self, group: usize, cache: &mut BlockCacheManager) -> Result<()> {
        let block = self.start_block_id + group / self.groups_per_block;
        let offset = (group % self.groups_per_block) * 8;
        let word = self.bits[group].to_le_bytes();
        cache.modify(block, |data| data[offset..offset + 8].copy_from_slice(&word))
    }

    /// 首次适配: 找到最低的一个 0 bit 并置 1, 返回对应数据块在设备上的编号.
    ///
    /// 如果所有数据块均已经被分配出去了, 则返回 None.
    pub fn allocate(&mut self, cache: &mut BlockCacheManager) -> Result<Option<u32>> {
        let found = self
            .bits
            .iter()
            .enumerate()
            .find(|(_, group)| **group != u64::MAX)
            .map(|(pos, group)| (pos, group.trailing_ones() as usize));
        let Some((group, inner)) = found else {
            return Ok(None);
        };
        let bit = group * 64 + inner;
        if bit >= self.len {
            return Ok(None);
        }
        self.bits[group] |= 1u64 << inner;
        self.persist_group(group, cache)?;
        let block_id = (self.data_start + bit) as u32;
        debug!("allocate data block {}", block_id);
        Ok(Some(block_id))
    }

    /// 回收一个数据块. 调用者必须刚刚清除了指向它的指针
    pub fn release(&mut self, block_id: u32, cache: &mut BlockCacheManager) -> Result<()> {
        let bit = self.bit_of(block_id);
        let (group, inner) = (bit / 64, bit % 64);
        assert!(
            self.bits[group] & (1u64 << inner) != 0,
            "release of free data block {}",
            block_id
        );
        self.bits[group] &= !(1u64 << inner);
        debug!("release data block {}", block_id);
        self.persist_group(group, cache)
    }

    fn bit_of(&self, block_id: u32) -> usize {
        let block_id = block_id as usize;
        assert!(
            block_id >= self.data_start && block_id < self.data_start + self.len,
            "block {} is outside the data region",
            block_id
        );
        block_id - self.data_start
    }

    pub fn is_used(&self, block_id: u32) -> bool {
        let bit = self.bit_of(block_id);
        self.bits[bit / 64] & (1u64 << (bit % 64)) != 0
    }

    /// 仍可分配的数据块数量
    pub fn free_count(&self) -> usize {
        let used: usize = self.bits.iter().map(|g| g.count_ones() as usize).sum();
        self.len - used
    }
}
