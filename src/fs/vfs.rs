//! 暴露给文件系统使用者的文件操作: 打开/关闭, 按偏移读写, 删除, 列目录, 查询大小.
//!
//! 读写都作用在字节区间 `[offset, offset + len)` 上, 这个区间可以跨越多个块:
//! 每次解析出当前偏移所在的块, 拷贝块内的那一段, 然后从下一个块的开头继续.

use log::debug;

use super::{
    FileDescriptor, FsError, Result, SimpleFileSystem, DIRENT_SIZE, NAME_LENGTH_LIMIT, ROOT_INODE,
};

/// 文件名不能为空, 不能超过 [`NAME_LENGTH_LIMIT`] 字节, 也不能包含 NUL 或 '/'
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > NAME_LENGTH_LIMIT || name.contains(['\0', '/']) {
        return Err(FsError::InvalidFileName(name.to_owned()));
    }
    Ok(())
}

impl SimpleFileSystem {
    /// 打开一个文件, 文件不存在时创建它. 新描述符的偏移为文件当前大小 (追加位置)
    pub fn open(&mut self, name: &str) -> Result<usize> {
        validate_name(name)?;
        self.synced(|fs| {
            // 先占住描述符, 避免创建了文件却无法返回句柄
            let fd = fs.fdt.allocate_free().ok_or(FsError::DescriptorTableFull)?;
            let inode = match fs.directory.find_by_name(name) {
                Some(inode) => inode,
                None => fs.create(name)?,
            };
            let size = fs.inodes.get(inode).map_or(0, |i| i.size as usize);
            fs.fdt.bind(fd, inode, size);
            debug!("open {} (inode {}) as fd {} at {}", name, inode, fd, size);
            Ok(fd)
        })
    }

    fn create(&mut self, name: &str) -> Result<u32> {
        let inode = self.inodes.allocate_free().ok_or(FsError::InodeTableFull)?;
        let slot = self
            .directory
            .find_free_slot()
            .ok_or(FsError::DirectoryFull)?;
        self.directory.materialize(
            slot,
            name,
            inode,
            &mut self.inodes,
            &mut self.bitmap,
            &mut self.cache,
        )?;
        self.inodes.activate(inode, &mut self.cache)?;
        self.directory.bind(slot, name, inode);
        debug!("create {} in slot {} with inode {}", name, slot, inode);
        Ok(inode)
    }

    pub fn close(&mut self, fd: usize) -> Result<()> {
        self.fdt.close(fd)
    }

    /// 不检查偏移是否超出文件大小; 之后在空洞处读会失败
    pub fn seek(&mut self, fd: usize, offset: usize) -> Result<()> {
        self.fdt.seek(fd, offset)
    }

    /// 从描述符的当前偏移写入 `buf`, 按需分配块. 返回写入的字节数
    pub fn write(&mut self, fd: usize, buf: &[u8]) -> Result<usize> {
        self.synced(|fs| {
            let FileDescriptor { inode, offset } = fs.fdt.get(fd)?;
            if buf.is_empty() {
                return Ok(0);
            }
            let max = fs.geometry.max_file_size();
            let end = offset
                .checked_add(buf.len())
                .filter(|&end| end <= max)
                .ok_or(FsError::FileTooLarge {
                    offset: offset.saturating_add(buf.len()),
                    max,
                })?;
            let new_size =
                u32::try_from(end).map_err(|_| FsError::FileTooLarge { offset: end, max })?;

            let block_size = fs.geometry.block_size;
            let mut pos = offset;
            let mut done = 0;
            while done < buf.len() {
                let block_id = fs.inodes.resolve_block_for_offset(
                    inode,
                    pos,
                    true,
                    &mut fs.bitmap,
                    &mut fs.cache,
                )?;
                let start = pos % block_size;
                let len = (buf.len() - done).min(block_size - start);
                let src = &buf[done..done + len];
                fs.cache
                    .modify(block_id as usize, |data| data[start..start + len].copy_from_slice(src))?;
                done += len;
                pos += len;
            }

            let node = fs.inodes.get_mut(inode)?;
            node.size = node.size.max(new_size);
            fs.inodes.persist(inode, &mut fs.cache)?;
            fs.fdt.advance(fd, done)?;
            Ok(done)
        })
    }

    /// 从描述符的当前偏移读到 `buf` 中, 最多读到文件末尾. 返回读到的字节数
    pub fn read(&mut self, fd: usize, buf: &mut [u8]) -> Result<usize> {
        self.synced(|fs| {
            let FileDescriptor { inode, offset } = fs.fdt.get(fd)?;
            let size = fs.inodes.get(inode).map_or(0, |i| i.size as usize);
            if offset >= size || buf.is_empty() {
                return Ok(0);
            }
            let end = offset.saturating_add(buf.len()).min(size);

            let block_size = fs.geometry.block_size;
            let mut pos = offset;
            let mut done = 0;
            while pos < end {
                let block_id = fs
                    .inodes
                    .resolve_block_for_offset(inode, pos, false, &mut fs.bitmap, &mut fs.cache)
                    .map_err(|e| match e {
                        FsError::BlockNotAllocated { .. } => FsError::ReadBeyondAllocated { offset: pos },
                        e => e,
                    })?;
                let start = pos % block_size;
                let len = (end - pos).min(block_size - start);
                let dst = &mut buf[done..done + len];
                fs.cache
                    .read(block_id as usize, |data| dst.copy_from_slice(&data[start..start + len]))?;
                done += len;
                pos += len;
            }

            fs.fdt.advance(fd, done)?;
            Ok(done)
        })
    }

    /// 删除文件: 释放它的所有块和 inode, 清除目录项, 并关闭指向它的描述符
    pub fn remove(&mut self, name: &str) -> Result<()> {
        self.synced(|fs| {
            let not_found = || FsError::FileNotFound(name.to_owned());
            let slot = fs.directory.find_slot(name).ok_or_else(not_found)?;
            let inode = fs.directory.find_by_name(name).ok_or_else(not_found)?;
            let block_id = fs.inodes.resolve_block_for_offset(
                ROOT_INODE,
                fs.directory.slot_offset(slot),
                false,
                &mut fs.bitmap,
                &mut fs.cache,
            )?;

            fs.directory.unbind(name);
            fs.directory.scrub_slot(block_id, slot, &mut fs.cache)?;
            let root = fs.inodes.get_mut(ROOT_INODE)?;
            root.size = root.size.saturating_sub(DIRENT_SIZE as u32);
            fs.inodes.persist(ROOT_INODE, &mut fs.cache)?;

            fs.inodes.release(inode, &mut fs.bitmap, &mut fs.cache)?;
            let closed = fs.fdt.close_inode(inode);
            debug!("remove {} (inode {}), closed {} handle(s)", name, inode, closed);
            Ok(())
        })
    }

    /// 目录中的下一个文件名. 到达末尾时返回 None, 下一次调用重新从头开始
    pub fn list_next(&mut self) -> Option<String> {
        self.directory.next_name()
    }

    /// 按槽位顺序列出所有文件名
    pub fn ls(&self) -> Vec<String> {
        self.directory
            .iter()
            .map(|entry| entry.name().to_owned())
            .collect()
    }

    /// 文件大小. 路径可以带一个前导 '/'
    pub fn file_size(&self, path: &str) -> Result<usize> {
        let name = path.strip_prefix('/').unwrap_or(path);
        self.directory
            .find_by_name(name)
            .and_then(|inode| self.inodes.get(inode))
            .map(|inode| inode.size as usize)
            .ok_or_else(|| FsError::FileNotFound(path.to_owned()))
    }
}
