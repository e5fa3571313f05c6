use std::io;

use thiserror::Error;

/// Errors reported by the storage engine.
#[derive(Error, Debug)]
pub enum FsError {
    #[error("invalid file format: superblock signature or layout does not match")]
    CorruptFilesystem,
    #[error("no free inode left in the inode table")]
    InodeTableFull,
    #[error("no free slot left in the directory")]
    DirectoryFull,
    #[error("no free data block left on the device")]
    DeviceFull,
    #[error("block pointer {pointer} of inode {inode} is not allocated")]
    BlockNotAllocated { inode: u32, pointer: usize },
    #[error("read at offset {offset} reaches an unallocated block")]
    ReadBeyondAllocated { offset: usize },
    #[error("file descriptor {0} is not open")]
    InvalidHandle(usize),
    #[error("file `{0}` not found")]
    FileNotFound(String),
    #[error("no free entry left in the file descriptor table")]
    DescriptorTableFull,
    #[error("offset {offset} exceeds the maximum file size of {max} bytes")]
    FileTooLarge { offset: usize, max: usize },
    #[error("invalid file name `{0}`")]
    InvalidFileName(String),
    #[error("block device error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = core::result::Result<T, FsError>;
