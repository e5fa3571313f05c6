//! 各区域及磁盘数据结构的整合, 实现 fs 的整体磁盘布局
//!
//! [`SimpleFileSystem`] 持有块设备 (经由块缓存), 超级块, 数据块位图, inode 表,
//! 目录表和文件描述符表. 它由 [`SimpleFileSystem::mount`] 构造, 所有文件操作
//! (见 vfs.rs) 都通过它进行, 不存在任何全局状态.
//!
//! Blocks: Super Block(0) -> Inode Blocks -> Data Blocks -> Data Bit Map Blocks

use std::{io, sync::Arc};

use log::{debug, error, info};

use super::{
    BlockCacheManager, BlockDevice, Directory, FileDescriptorTable, FreeBitmap, FsError,
    Geometry, Inode, InodeTable, Result, SuperBlock, BLOCK_CACHE_SIZE,
};

pub struct SimpleFileSystem {
    pub(super) geometry: Geometry,
    pub(super) super_block: SuperBlock,
    pub(super) cache: BlockCacheManager,
    pub(super) bitmap: FreeBitmap,
    pub(super) inodes: InodeTable,
    pub(super) directory: Directory,
    pub(super) fdt: FileDescriptorTable,
}

fn invalid_input(msg: String) -> FsError {
    FsError::Io(io::Error::new(io::ErrorKind::InvalidInput, msg))
}

impl SimpleFileSystem {
    /// `fresh` 为真时在设备上创建新的文件系统, 否则读取并校验已有的文件系统.
    ///
    /// 加载已有文件系统时几何参数来自超级块, 只有 `open_files` 取自 `geometry`.
    pub fn mount(block_device: Arc<dyn BlockDevice>, geometry: Geometry, fresh: bool) -> Result<Self> {
        if fresh {
            Self::format(block_device, geometry)
        } else {
            Self::load(block_device, geometry.open_files)
        }
    }

    /// 在块设备上创建并初始化一个文件系统
    pub fn format(block_device: Arc<dyn BlockDevice>, geometry: Geometry) -> Result<Self> {
        if !geometry.is_valid() {
            return Err(invalid_input(format!("unusable geometry {:?}", geometry)));
        }
        if block_device.block_size() != geometry.block_size
            || block_device.total_blocks() < geometry.total_blocks()
        {
            return Err(invalid_input(format!(
                "device of {} x {}B blocks cannot hold {} x {}B blocks",
                block_device.total_blocks(),
                block_device.block_size(),
                geometry.total_blocks(),
                geometry.block_size
            )));
        }

        let mut cache = BlockCacheManager::new(block_device, BLOCK_CACHE_SIZE);

        let super_block = SuperBlock::new(&geometry);
        cache.zero(0)?;
        cache.modify(0, |data| super_block.encode(data))?;

        let inodes = InodeTable::format(&geometry, &mut cache)?;
        let mut bitmap = FreeBitmap::new(&geometry);
        bitmap.init(&mut cache)?;
        let directory = Directory::format(&geometry);
        let fdt = FileDescriptorTable::format(geometry.open_files);
        cache.sync_all()?;

        info!("format sfs: {:?}", super_block);
        Ok(Self {
            geometry,
            super_block,
            cache,
            bitmap,
            inodes,
            directory,
            fdt,
        })
    }

    /// 从一个已写入了 sfs 镜像的块设备上打开 fs. 魔数不匹配时返回
    /// [`FsError::CorruptFilesystem`], 调用者不应再继续使用这个设备
    pub fn load(block_device: Arc<dyn BlockDevice>, open_files: usize) -> Result<Self> {
        let mut cache = BlockCacheManager::new(block_device, BLOCK_CACHE_SIZE);
        let super_block = cache.read(0, |data| {
            (data.len() >= SuperBlock::DISK_SIZE).then(|| SuperBlock::decode(data))
        })?;
        let Some(super_block) = super_block.filter(SuperBlock::is_valid) else {
            error!("Invalid File Format -- Cannot Open the file system.");
            return Err(FsError::CorruptFilesystem);
        };
        let geometry = super_block
            .geometry(open_files)
            .filter(|g| {
                let device = cache.block_device();
                g.block_size == device.block_size() && g.total_blocks() <= device.total_blocks()
            })
            .ok_or_else(|| {
                error!("superblock layout does not fit the device: {:?}", super_block);
                FsError::CorruptFilesystem
            })?;

        let mut inodes = InodeTable::load(&geometry, &mut cache)?;
        let mut bitmap = FreeBitmap::load(&geometry, &mut cache)?;
        inodes.verify(&bitmap, &mut cache)?;
        let directory = Directory::load(&geometry, &mut inodes, &mut bitmap, &mut cache)?;
        let fdt = FileDescriptorTable::format(open_files);

        info!(
            "load sfs: {} files, {} free data blocks",
            directory.len(),
            bitmap.free_count()
        );
        Ok(Self {
            geometry,
            super_block,
            cache,
            bitmap,
            inodes,
            directory,
            fdt,
        })
    }

    /// 运行一个操作, 无论成功与否都把它修改过的块写回设备
    pub(super) fn synced<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let result = f(self);
        let synced = self.cache.sync_all();
        if let Err(e) = &synced {
            debug!("write back failed: {}", e);
        }
        let value = result?;
        synced?;
        Ok(value)
    }

    pub fn super_block(&self) -> &SuperBlock {
        &self.super_block
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn block_device(&self) -> &Arc<dyn BlockDevice> {
        self.cache.block_device()
    }

    /// 仍可分配的数据块数量
    pub fn free_blocks(&self) -> usize {
        self.bitmap.free_count()
    }

    pub fn is_block_used(&self, block_id: u32) -> bool {
        self.geometry.data_index(block_id).is_some() && self.bitmap.is_used(block_id)
    }

    pub fn inode(&self, index: u32) -> Option<&Inode> {
        self.inodes.get(index)
    }

    pub fn inode_of(&self, name: &str) -> Option<u32> {
        self.directory.find_by_name(name)
    }

    /// inode 引用的数据块, 按指针顺序
    pub fn inode_blocks(&mut self, index: u32) -> Result<Vec<u32>> {
        self.inodes.data_blocks(index, &mut self.cache)
    }

    pub fn open_handles(&self) -> usize {
        self.fdt.open_count()
    }
}
