//! 块设备仅支持以块为单位进行随机读写, 需要由具体的块设备驱动来实现.
//! 块缓存层会调用这些方法, 进行块缓存的管理.
//! 泛用性: 可以访问实现了 BlockDevice Trait 的块设备驱动程序.

use std::{any::Any, io};

// 块设备接口层
// 定义设备驱动需要实现的块读写接口 BlockDevice trait
//
// 所有地址都是从 0 开始的块编号, 块大小在设备的整个生命周期内固定不变.

pub trait BlockDevice: Send + Sync + Any {
    /// 每个块的字节数
    fn block_size(&self) -> usize;

    /// 设备上的总块数
    fn total_blocks(&self) -> usize;

    // read_block 将编号为 block_id 的块从磁盘读入内存中的缓冲区 buf
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> io::Result<()>;

    // write_block 将内存中的缓冲区 buf 中的数据写入磁盘编号为 block_id 的块
    fn write_block(&self, block_id: usize, buf: &[u8]) -> io::Result<()>;

    /// Reads `count` consecutive blocks starting at `start` into `buf`.
    fn read_blocks(&self, start: usize, count: usize, buf: &mut [u8]) -> io::Result<()> {
        let bs = self.block_size();
        assert!(buf.len() >= count * bs, "buffer smaller than the block span");
        for (i, chunk) in buf.chunks_mut(bs).take(count).enumerate() {
            self.read_block(start + i, chunk)?;
        }
        Ok(())
    }

    /// Writes `count` consecutive blocks starting at `start` from `buf`.
    fn write_blocks(&self, start: usize, count: usize, buf: &[u8]) -> io::Result<()> {
        let bs = self.block_size();
        assert!(buf.len() >= count * bs, "buffer smaller than the block span");
        for (i, chunk) in buf.chunks(bs).take(count).enumerate() {
            self.write_block(start + i, chunk)?;
        }
        Ok(())
    }
}
