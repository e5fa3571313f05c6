//! 磁盘数据结构层: [`Geometry`], [`SuperBlock`], [`DiskInode`], [`DirEntry`]
//!
//! 在 fs 磁盘布局中, 按照块编号从小到大顺序地分成若干个连续区域:
//!
//! - 最开始的区域的长度为一个块, 其内容是超级块 ([`SuperBlock`])
//!   超级块内以魔数的形式提供了文件系统合法性检查功能, 同时还可以定位其他连续区域的位置
//!
//! - 第二个区域是索引节点区域, 每个块存储了若干个 64 字节的索引节点
//!
//! - 第三个区域是数据块区域. 目录项并没有单独的区域, 它们存放在根目录 (inode 0)
//!   所拥有的数据块中, 超级块只记录目录最多可以占用的块数
//!
//! - 最后的区域是数据块位图, 一个 bit 对应数据区域中的一个块
//!
//! 所有多字节字段都以小端序存放.

use std::fmt::{Debug, Formatter};

use super::{
    BLOCK_SIZE, DATA_BLOCKS, DIRENT_SIZE, DISK_INODE_SIZE, FDT_SIZE, INODE_COUNT,
    INODE_DIRECT_COUNT, NAME_LENGTH_LIMIT, ROOT_INODE, SFS_MAGIC, UNASSIGNED,
};

fn get_u32(buf: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// 块指针在磁盘上以 u32 存放, [`UNASSIGNED`] 表示未分配
pub fn decode_ptr(raw: u32) -> Option<u32> {
    (raw != UNASSIGNED).then_some(raw)
}

pub fn encode_ptr(ptr: Option<u32>) -> u32 {
    ptr.unwrap_or(UNASSIGNED)
}

/// Sizes chosen at format time. Every region offset is derived from these.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub block_size: usize,
    pub inode_count: usize,
    pub data_blocks: usize,
    pub open_files: usize,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
            inode_count: INODE_COUNT,
            data_blocks: DATA_BLOCKS,
            open_files: FDT_SIZE,
        }
    }
}

impl Geometry {
    pub fn inodes_per_block(&self) -> usize {
        self.block_size / DISK_INODE_SIZE
    }

    pub fn inode_start(&self) -> usize {
        1
    }

    pub fn inode_blocks(&self) -> usize {
        (self.inode_count + self.inodes_per_block() - 1) / self.inodes_per_block()
    }

    pub fn data_start(&self) -> usize {
        self.inode_start() + self.inode_blocks()
    }

    pub fn bitmap_start(&self) -> usize {
        self.data_start() + self.data_blocks
    }

    pub fn bitmap_blocks(&self) -> usize {
        let bits = self.block_size * 8;
        (self.data_blocks + bits - 1) / bits
    }

    pub fn total_blocks(&self) -> usize {
        self.bitmap_start() + self.bitmap_blocks()
    }

    pub fn dirents_per_block(&self) -> usize {
        self.block_size / DIRENT_SIZE
    }

    /// 每个非根文件都需要一个 inode, 因此目录项不会多于 inode_count - 1.
    ///
    /// 目录槽位与空闲 inode 一一对应: 在一个一致的文件系统上 inode 总是先于目录用尽,
    /// 创建文件时报告的是 `InodeTableFull`. 只有目录表与 inode 表不一致时 (例如
    /// 目录项指向了空闲 inode) 才会出现 `DirectoryFull`.
    pub fn dir_capacity(&self) -> usize {
        self.inode_count.saturating_sub(1)
    }

    pub fn dir_blocks(&self) -> usize {
        (self.dir_capacity() + self.dirents_per_block() - 1) / self.dirents_per_block()
    }

    /// 一个间接块中能放下的指针数
    pub fn indirect_count(&self) -> usize {
        self.block_size / 4
    }

    pub fn max_pointers(&self) -> usize {
        INODE_DIRECT_COUNT + self.indirect_count()
    }

    pub fn max_file_size(&self) -> usize {
        self.max_pointers() * self.block_size
    }

    /// 数据区域中的块编号 -> 位图中的 bit 编号
    pub fn data_index(&self, block_id: u32) -> Option<usize> {
        let block_id = block_id as usize;
        (block_id >= self.data_start() && block_id < self.bitmap_start())
            .then(|| block_id - self.data_start())
    }

    pub fn is_valid(&self) -> bool {
        self.block_size >= 64
            && self.block_size % 64 == 0
            && self.inode_count >= 1
            && self.data_blocks >= 1
            && self.open_files >= 1
            && self.dir_blocks() <= self.max_pointers()
            && self.max_file_size() <= u32::MAX as usize
            && self.total_blocks() <= u32::MAX as usize
    }
}

/// SuperBlock 是一个磁盘上数据结构, 它就存放在磁盘上编号为 0 的块的起始处
#[derive(Clone, PartialEq, Eq)]
pub struct SuperBlock {
    magic: [u8; 10], // 用于文件系统合法性验证的魔数
    pub block_size: u32,
    pub total_blocks: u32,
    pub inode_start: u32,
    pub inode_blocks: u32,
    pub root_inode: u32,
    pub dir_blocks: u32,
    pub data_start: u32,
    pub data_blocks: u32,
    pub bitmap_start: u32,
    pub bitmap_blocks: u32,
    pub inode_count: u32,
}

impl Debug for SuperBlock {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuperBlock")
            .field("magic", &String::from_utf8_lossy(&self.magic))
            .field("block_size", &self.block_size)
            .field("total_blocks", &self.total_blocks)
            .field("inode_start", &self.inode_start)
            .field("inode_blocks", &self.inode_blocks)
            .field("root_inode", &self.root_inode)
            .field("dir_blocks", &self.dir_blocks)
            .field("data_start", &self.data_start)
            .field("data_blocks", &self.data_blocks)
            .field("bitmap_start", &self.bitmap_start)
            .field("bitmap_blocks", &self.bitmap_blocks)
            .field("inode_count", &self.inode_count)
            .finish()
    }
}

impl SuperBlock {
    /// 序列化后的字节数: magic(10) + pad(2) + 11 * u32
    pub const DISK_SIZE: usize = 12 + 11 * 4;

    /// 创建 fs 的时候根据几何参数计算每个区域的位置
    pub fn new(geometry: &Geometry) -> Self {
        Self {
            magic: *SFS_MAGIC,
            block_size: geometry.block_size as u32,
            total_blocks: geometry.total_blocks() as u32,
            inode_start: geometry.inode_start() as u32,
            inode_blocks: geometry.inode_blocks() as u32,
            root_inode: ROOT_INODE,
            dir_blocks: geometry.dir_blocks() as u32,
            data_start: geometry.data_start() as u32,
            data_blocks: geometry.data_blocks as u32,
            bitmap_start: geometry.bitmap_start() as u32,
            bitmap_blocks: geometry.bitmap_blocks() as u32,
            inode_count: geometry.inode_count as u32,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == *SFS_MAGIC
    }

    /// 由超级块还原几何参数; 描述的布局与推导结果不一致时返回 None
    pub fn geometry(&self, open_files: usize) -> Option<Geometry> {
        let geometry = Geometry {
            block_size: self.block_size as usize,
            inode_count: self.inode_count as usize,
            data_blocks: self.data_blocks as usize,
            open_files,
        };
        (geometry.is_valid() && Self::new(&geometry) == *self).then_some(geometry)
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf[..Self::DISK_SIZE].fill(0);
        buf[..10].copy_from_slice(&self.magic);
        let fields = [
            self.block_size,
            self.total_blocks,
            self.inode_start,
            self.inode_blocks,
            self.root_inode,
            self.dir_blocks,
            self.data_start,
            self.data_blocks,
            self.bitmap_start,
            self.bitmap_blocks,
            self.inode_count,
        ];
        for (i, value) in fields.into_iter().enumerate() {
            put_u32(buf, 12 + i * 4, value);
        }
    }

    pub fn decode(buf: &[u8]) -> Self {
        let mut magic = [0u8; 10];
        magic.copy_from_slice(&buf[..10]);
        let field = |i: usize| get_u32(buf, 12 + i * 4);
        Self {
            magic,
            block_size: field(0),
            total_blocks: field(1),
            inode_start: field(2),
            inode_blocks: field(3),
            root_inode: field(4),
            dir_blocks: field(5),
            data_start: field(6),
            data_blocks: field(7),
            bitmap_start: field(8),
            bitmap_blocks: field(9),
            inode_count: field(10),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DiskInodeType {
    File,
    Directory,
}

/// 磁盘上的 inode 记录, 共 64 字节:
/// mode, link_cnt, size, 12 个直接指针, 1 个间接指针
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct DiskInode {
    /// 0 表示未使用, 1 为普通文件, 2 为目录
    pub mode: u32,
    /// 为 0 时该 inode 空闲
    pub link_cnt: u32,
    pub size: u32,
    pub direct: [u32; INODE_DIRECT_COUNT],
    pub indirect: u32,
}

impl DiskInode {
    pub const MODE_FREE: u32 = 0;
    pub const MODE_FILE: u32 = 1;
    pub const MODE_DIR: u32 = 2;

    pub fn free() -> Self {
        Self {
            mode: Self::MODE_FREE,
            link_cnt: 0,
            size: 0,
            direct: [UNASSIGNED; INODE_DIRECT_COUNT],
            indirect: UNASSIGNED,
        }
    }

    pub fn encode(&self, buf: &mut [u8]) {
        put_u32(buf, 0, self.mode);
        put_u32(buf, 4, self.link_cnt);
        put_u32(buf, 8, self.size);
        for (i, ptr) in self.direct.iter().enumerate() {
            put_u32(buf, 12 + i * 4, *ptr);
        }
        put_u32(buf, 12 + INODE_DIRECT_COUNT * 4, self.indirect);
    }

    pub fn decode(buf: &[u8]) -> Self {
        let mut direct = [UNASSIGNED; INODE_DIRECT_COUNT];
        for (i, ptr) in direct.iter_mut().enumerate() {
            *ptr = get_u32(buf, 12 + i * 4);
        }
        Self {
            mode: get_u32(buf, 0),
            link_cnt: get_u32(buf, 4),
            size: get_u32(buf, 8),
            direct,
            indirect: get_u32(buf, 12 + INODE_DIRECT_COUNT * 4),
        }
    }
}

/// 间接块: 一组小端序 u32 块编号
pub fn read_indirect(block: &[u8], index: usize) -> Option<u32> {
    decode_ptr(get_u32(block, index * 4))
}

pub fn write_indirect(block: &mut [u8], index: usize, ptr: Option<u32>) {
    put_u32(block, index * 4, encode_ptr(ptr));
}

/// 新分配的间接块中所有指针都是未分配
pub fn clear_indirect(block: &mut [u8]) {
    for chunk in block.chunks_exact_mut(4) {
        chunk.copy_from_slice(&UNASSIGNED.to_le_bytes());
    }
}

/// 目录项: 28 字节的文件名 (以 0 结尾) + 4 字节 inode 编号
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DirEntry {
    name: String,
    inode_id: u32,
}

impl DirEntry {
    const UNUSED_INODE: i32 = -1;

    pub fn new(name: &str, inode_id: u32) -> Self {
        debug_assert!(name.len() <= NAME_LENGTH_LIMIT);
        Self {
            name: name.to_owned(),
            inode_id,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inode_id(&self) -> u32 {
        self.inode_id
    }

    pub fn encode(&self, buf: &mut [u8]) {
        let bytes = self.name.as_bytes();
        buf[..NAME_LENGTH_LIMIT + 1].fill(0);
        buf[..bytes.len()].copy_from_slice(bytes);
        buf[NAME_LENGTH_LIMIT + 1..DIRENT_SIZE].copy_from_slice(&(self.inode_id as i32).to_le_bytes());
    }

    /// 空名字或负的 inode 编号都表示空闲槽位, 全零的新块因此读出来全是空闲项
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let inode = get_u32(buf, NAME_LENGTH_LIMIT + 1) as i32;
        let len = buf[..NAME_LENGTH_LIMIT + 1]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_LENGTH_LIMIT);
        if len == 0 || inode < 0 {
            return None;
        }
        let name = std::str::from_utf8(&buf[..len]).ok()?;
        Some(Self::new(name, inode as u32))
    }

    /// 清除一个磁盘上的目录项: 名字清零, inode 置为 -1
    pub fn scrub(buf: &mut [u8]) {
        buf[..NAME_LENGTH_LIMIT + 1].fill(0);
        buf[NAME_LENGTH_LIMIT + 1..DIRENT_SIZE].copy_from_slice(&Self::UNUSED_INODE.to_le_bytes());
    }
}
