//! 块缓存层: 在内存中缓存磁盘块的数据, 避免频繁读写磁盘
//!
//! 先通过 read_block 将一个块上的数据从磁盘读到内存中的一个缓冲区 [`BlockCache`] 中,
//! 后续对这个数据块的访问都在内存中完成. 如果缓冲区中的内容被修改了,
//! 那么还需要通过 write_block 将缓冲区中的内容写回到磁盘块中.
//!
//! 缓冲区由 [`BlockCacheManager`] 统一管理. 与全局管理器不同, 这里的管理器由
//! 文件系统实例持有, 并且每个对外操作结束时都会调用 [`BlockCacheManager::sync_all`],
//! 因此被修改过的块就是这次操作的 "脏区域", 不会跨调用缓存未写回的数据.

use std::{collections::VecDeque, sync::Arc};

use log::trace;

use super::{BlockDevice, Result};

/// Cached block inside memory
pub struct BlockCache {
    /// 位于内存中的缓冲区, 大小恰好为一个块
    cache: Vec<u8>,
    /// 这个块缓存来自于磁盘中的块的编号
    block_id: usize,
    /// 这个块从磁盘载入内存缓存之后, 有没有被修改过
    modified: bool,
}

impl BlockCache {
    /// 创建一个 BlockCache: 这将触发一次 read_block
    fn load(block_id: usize, block_device: &dyn BlockDevice) -> Result<Self> {
        let mut cache = vec![0u8; block_device.block_size()];
        block_device.read_block(block_id, &mut cache)?;
        Ok(Self {
            cache,
            block_id,
            modified: false,
        })
    }

    /// A block whose old contents do not matter; it starts zeroed and dirty.
    fn zeroed(block_id: usize, block_size: usize) -> Self {
        Self {
            cache: vec![0u8; block_size],
            block_id,
            modified: true,
        }
    }

    pub fn block_id(&self) -> usize {
        self.block_id
    }

    pub fn data(&self) -> &[u8] {
        &self.cache
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.modified = true;
        &mut self.cache
    }

    fn sync(&mut self, block_device: &dyn BlockDevice) -> Result<()> {
        if self.modified {
            trace!("write back block {}", self.block_id);
            block_device.write_block(self.block_id, &self.cache)?;
            self.modified = false;
        }
        Ok(())
    }
}

pub struct BlockCacheManager {
    block_device: Arc<dyn BlockDevice>,
    queue: VecDeque<BlockCache>,
    capacity: usize,
}

impl BlockCacheManager {
    pub fn new(block_device: Arc<dyn BlockDevice>, capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            block_device,
            queue: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn block_device(&self) -> &Arc<dyn BlockDevice> {
        &self.block_device
    }

    pub fn block_size(&self) -> usize {
        self.block_device.block_size()
    }

    fn position(&self, block_id: usize) -> Option<usize> {
        self.queue.iter().position(|c| c.block_id == block_id)
    }

    /// 队列已满时换出最早进入的块. 写回成功之后才出队, 写回失败时它仍留在缓存中
    fn make_room(&mut self) -> Result<()> {
        if self.queue.len() == self.capacity {
            if let Some(victim) = self.queue.front_mut() {
                victim.sync(self.block_device.as_ref())?;
            }
            self.queue.pop_front();
        }
        Ok(())
    }

    fn get(&mut self, block_id: usize) -> Result<&mut BlockCache> {
        let idx = match self.position(block_id) {
            Some(idx) => idx,
            None => {
                self.make_room()?;
                let cache = BlockCache::load(block_id, self.block_device.as_ref())?;
                self.queue.push_back(cache);
                self.queue.len() - 1
            }
        };
        Ok(&mut self.queue[idx])
    }

    /// 以只读方式访问一个块
    pub fn read<V>(&mut self, block_id: usize, f: impl FnOnce(&[u8]) -> V) -> Result<V> {
        Ok(f(self.get(block_id)?.data()))
    }

    /// 修改一个块, 该块会在下一次 sync 时写回
    pub fn modify<V>(&mut self, block_id: usize, f: impl FnOnce(&mut [u8]) -> V) -> Result<V> {
        Ok(f(self.get(block_id)?.data_mut()))
    }

    /// 将一个块清零, 不需要先从磁盘读取
    pub fn zero(&mut self, block_id: usize) -> Result<()> {
        match self.position(block_id) {
            Some(idx) => self.queue[idx].data_mut().fill(0),
            None => {
                self.make_room()?;
                let bs = self.block_size();
                self.queue.push_back(BlockCache::zeroed(block_id, bs));
            }
        }
        Ok(())
    }

    /// 把所有被修改过的块写回磁盘
    pub fn sync_all(&mut self) -> Result<()> {
        let device = Arc::clone(&self.block_device);
        for cache in self.queue.iter_mut() {
            cache.sync(device.as_ref())?;
        }
        Ok(())
    }
}
