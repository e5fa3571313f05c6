use std::sync::Arc;

use crate::device::{BlockFile, RamDisk};
use crate::fs::{
    BlockDevice, DirEntry, DiskInode, FsError, Geometry, SimpleFileSystem, BLOCK_SIZE,
    DIRENT_SIZE, DISK_INODE_SIZE, INODE_DIRECT_COUNT,
};

fn ram_sfs(geometry: Geometry) -> (Arc<RamDisk>, SimpleFileSystem) {
    let disk = Arc::new(RamDisk::new(geometry.block_size, geometry.total_blocks()));
    let sfs = SimpleFileSystem::mount(disk.clone(), geometry, true).unwrap();
    (disk, sfs)
}

fn small_geometry() -> Geometry {
    Geometry {
        block_size: 128,
        inode_count: 8,
        data_blocks: 48,
        open_files: 8,
    }
}

fn random_digits(len: usize) -> Vec<u8> {
    (0..len).map(|_| b'0' + rand::random::<u8>() % 10).collect()
}

#[test]
fn quick_brown_fox() {
    let (_, mut sfs) = ram_sfs(Geometry::default());
    let fd = sfs.open("test.txt").unwrap();
    let mut data = b"The quick brown fox jumps over the lazy dog".to_vec();
    data.extend_from_slice(&[0, 0]);
    assert_eq!(data.len(), 45);

    assert_eq!(sfs.write(fd, &data).unwrap(), 45);
    sfs.seek(fd, 0).unwrap();
    let mut out = [0u8; 45];
    assert_eq!(sfs.read(fd, &mut out).unwrap(), 45);
    assert_eq!(&out[..], &data[..]);
    assert_eq!(sfs.file_size("test.txt").unwrap(), 45);
    assert_eq!(sfs.file_size("/test.txt").unwrap(), 45);
}

#[test]
fn fresh_mount_is_empty() {
    let (_, mut sfs) = ram_sfs(Geometry::default());
    assert_eq!(sfs.list_next(), None);
    let fd = sfs.open("empty").unwrap();
    assert_eq!(sfs.file_size("empty").unwrap(), 0);
    let mut buf = [0u8; 16];
    assert_eq!(sfs.read(fd, &mut buf).unwrap(), 0);
    assert!(matches!(sfs.file_size("missing"), Err(FsError::FileNotFound(_))));
}

#[test]
fn reopening_reuses_the_inode_and_appends() {
    let (_, mut sfs) = ram_sfs(Geometry::default());
    let a = sfs.open("log").unwrap();
    sfs.write(a, b"hello ").unwrap();
    let inode = sfs.inode_of("log").unwrap();
    let root_size = sfs.inode(0).unwrap().size;

    let b = sfs.open("log").unwrap();
    assert_ne!(a, b);
    assert_eq!(sfs.inode_of("log"), Some(inode));
    assert_eq!(sfs.inode(0).unwrap().size, root_size);
    assert_eq!(sfs.ls(), vec!["log".to_owned()]);

    // 新描述符位于文件末尾
    sfs.write(b, b"world").unwrap();
    sfs.seek(b, 0).unwrap();
    let mut out = [0u8; 11];
    sfs.read(b, &mut out).unwrap();
    assert_eq!(&out, b"hello world");
}

#[test]
fn directory_keeps_insertion_order_after_remove() {
    let (_, mut sfs) = ram_sfs(Geometry::default());
    for name in ["A", "B", "C"] {
        let fd = sfs.open(name).unwrap();
        sfs.close(fd).unwrap();
    }
    assert_eq!(sfs.inode(0).unwrap().size as usize, 3 * DIRENT_SIZE);
    sfs.remove("B").unwrap();
    assert_eq!(sfs.inode(0).unwrap().size as usize, 2 * DIRENT_SIZE);

    let mut names = Vec::new();
    while let Some(name) = sfs.list_next() {
        names.push(name);
    }
    assert_eq!(names, ["A", "C"]);

    // 空出来的槽位被复用
    sfs.open("D").unwrap();
    assert_eq!(sfs.ls(), ["A", "D", "C"]);
}

#[test]
fn block_boundaries() {
    let (_, mut sfs) = ram_sfs(Geometry::default());
    let exact = sfs.open("exact").unwrap();
    sfs.write(exact, &vec![1u8; BLOCK_SIZE]).unwrap();
    let inode = sfs.inode_of("exact").unwrap();
    assert_eq!(sfs.inode_blocks(inode).unwrap().len(), 1);

    let spill = sfs.open("spill").unwrap();
    sfs.write(spill, &vec![2u8; BLOCK_SIZE + 1]).unwrap();
    let inode = sfs.inode_of("spill").unwrap();
    assert_eq!(sfs.inode_blocks(inode).unwrap().len(), 2);
}

#[test]
fn unaligned_overwrite_in_the_middle() {
    let (_, mut sfs) = ram_sfs(small_geometry());
    let fd = sfs.open("f").unwrap();
    sfs.write(fd, &[b'a'; 300]).unwrap();
    sfs.seek(fd, 120).unwrap();
    sfs.write(fd, &[b'b'; 20]).unwrap();
    assert_eq!(sfs.file_size("f").unwrap(), 300);

    sfs.seek(fd, 0).unwrap();
    let mut out = vec![0u8; 300];
    assert_eq!(sfs.read(fd, &mut out).unwrap(), 300);
    assert!(out[..120].iter().all(|&b| b == b'a'));
    assert!(out[120..140].iter().all(|&b| b == b'b'));
    assert!(out[140..].iter().all(|&b| b == b'a'));
}

#[test]
fn large_files_spill_into_the_indirect_block() {
    let geometry = Geometry {
        block_size: 256,
        inode_count: 16,
        data_blocks: 256,
        open_files: 4,
    };
    let (_, mut sfs) = ram_sfs(geometry);
    let fd = sfs.open("big").unwrap();

    for len in [
        4 * geometry.block_size,
        INODE_DIRECT_COUNT * geometry.block_size,
        (INODE_DIRECT_COUNT + 1) * geometry.block_size + geometry.block_size / 7,
        geometry.max_file_size(),
    ] {
        let data = random_digits(len);
        sfs.seek(fd, 0).unwrap();
        assert_eq!(sfs.write(fd, &data).unwrap(), len);

        // 用一个小缓冲区分多次读回
        sfs.seek(fd, 0).unwrap();
        let mut read_back = Vec::new();
        let mut chunk = [0u8; 127];
        loop {
            let n = sfs.read(fd, &mut chunk).unwrap();
            if n == 0 {
                break;
            }
            read_back.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(read_back, data);
    }

    let inode = sfs.inode_of("big").unwrap();
    assert!(sfs.inode(inode).unwrap().indirect.is_some());
    assert_eq!(
        sfs.inode_blocks(inode).unwrap().len(),
        geometry.max_pointers()
    );

    sfs.seek(fd, geometry.max_file_size()).unwrap();
    assert!(matches!(
        sfs.write(fd, b"x"),
        Err(FsError::FileTooLarge { .. })
    ));
}

#[test]
fn removed_blocks_are_reusable() {
    let (_, mut sfs) = ram_sfs(small_geometry());
    let free_at_start = sfs.free_blocks();

    let fd = sfs.open("hog").unwrap();
    // 目录块已经分配, 剩下的块全部写满
    let capacity = sfs.free_blocks() * small_geometry().block_size;
    let max = small_geometry().max_file_size();
    let len = capacity.min(max);
    sfs.write(fd, &random_digits(len)).unwrap();
    assert!(sfs.free_blocks() < free_at_start);

    sfs.remove("hog").unwrap();
    assert_eq!(sfs.free_blocks(), free_at_start - 1);
    // 旧描述符随文件一起关闭
    assert!(matches!(sfs.write(fd, b"x"), Err(FsError::InvalidHandle(_))));

    let a = sfs.open("a").unwrap();
    sfs.write(a, &random_digits(len / 2)).unwrap();
    let b = sfs.open("b").unwrap();
    sfs.write(b, &random_digits(len - len / 2)).unwrap();
}

#[test]
fn device_full_is_reported() {
    let (_, mut sfs) = ram_sfs(small_geometry());
    let mut last = Ok(0);
    for i in 0..small_geometry().inode_count - 1 {
        let fd = sfs.open(&format!("f{}", i)).unwrap();
        last = sfs.write(fd, &vec![0u8; small_geometry().max_file_size()]);
        if last.is_err() {
            break;
        }
    }
    assert!(matches!(last, Err(FsError::DeviceFull)));
    assert_eq!(sfs.free_blocks(), 0);
}

#[test]
fn table_limits() {
    let (_, mut sfs) = ram_sfs(small_geometry());
    // inode 0 是根目录
    for i in 0..small_geometry().inode_count - 1 {
        sfs.open(&format!("f{}", i)).unwrap();
    }
    assert!(matches!(sfs.open("one-more"), Err(FsError::InodeTableFull)));
    // inode 用尽时目录也正好满了
    assert_eq!(sfs.ls().len(), small_geometry().dir_capacity());
    assert!(matches!(sfs.open(""), Err(FsError::InvalidFileName(_))));

    let (_, mut sfs) = ram_sfs(small_geometry());
    for _ in 0..small_geometry().open_files {
        sfs.open("same").unwrap();
    }
    assert!(matches!(sfs.open("same"), Err(FsError::DescriptorTableFull)));
    // 描述符表满时不会留下创建了一半的文件
    assert!(matches!(sfs.open("fresh"), Err(FsError::DescriptorTableFull)));
    assert_eq!(sfs.inode_of("fresh"), None);
    assert_eq!(sfs.ls(), ["same"]);
    assert!(sfs.inode(2).is_none());
    assert_eq!(sfs.inode(0).unwrap().size as usize, DIRENT_SIZE);
    sfs.close(3).unwrap();
    assert!(matches!(sfs.close(3), Err(FsError::InvalidHandle(3))));
    assert_eq!(sfs.open("same").unwrap(), 3);
}

#[test]
fn running_out_of_blocks_leaves_files_consistent() {
    let geometry = small_geometry();
    let (_, mut sfs) = ram_sfs(geometry);
    let fds: Vec<usize> = (0..4).map(|i| sfs.open(&format!("f{}", i)).unwrap()).collect();
    // 4 个目录项正好占满第一个目录块
    assert_eq!(sfs.inode_blocks(0).unwrap().len(), 1);
    sfs.write(fds[1], b"abc").unwrap();
    sfs.write(fds[0], &vec![0u8; geometry.max_file_size()]).unwrap();
    assert_eq!(sfs.free_blocks(), 1);

    // 写到一半时设备满了: 已分配的块保留, 文件大小不变
    let rest = geometry.max_file_size() - 3;
    assert!(matches!(
        sfs.write(fds[1], &vec![1u8; rest]),
        Err(FsError::DeviceFull)
    ));
    assert_eq!(sfs.free_blocks(), 0);
    assert_eq!(sfs.file_size("f1").unwrap(), 3);
    let f1 = sfs.inode_of("f1").unwrap();
    assert_eq!(sfs.inode_blocks(f1).unwrap().len(), 2);
    sfs.seek(fds[1], 0).unwrap();
    let mut out = [0u8; 8];
    assert_eq!(sfs.read(fds[1], &mut out).unwrap(), 3);
    assert_eq!(&out[..3], b"abc");

    // 第 5 个目录项需要新的目录块
    let root_size = sfs.inode(0).unwrap().size;
    assert!(matches!(sfs.open("f4"), Err(FsError::DeviceFull)));
    assert_eq!(sfs.inode_of("f4"), None);
    assert_eq!(sfs.inode(0).unwrap().size, root_size);
    assert!(sfs.inode(5).is_none());
    assert_eq!(sfs.open_handles(), 4);

    sfs.remove("f0").unwrap();
    sfs.open("f4").unwrap();
    assert_eq!(sfs.ls(), ["f4", "f1", "f2", "f3"]);
}

#[test]
fn offsets_near_usize_max_are_rejected() {
    let (_, mut sfs) = ram_sfs(small_geometry());
    let fd = sfs.open("p").unwrap();
    sfs.write(fd, b"data").unwrap();

    sfs.seek(fd, usize::MAX).unwrap();
    assert!(matches!(
        sfs.write(fd, b"x"),
        Err(FsError::FileTooLarge { offset: usize::MAX, .. })
    ));
    let mut buf = [0u8; 4];
    assert_eq!(sfs.read(fd, &mut buf).unwrap(), 0);

    sfs.seek(fd, usize::MAX - 1).unwrap();
    assert!(matches!(
        sfs.write(fd, b"xyz"),
        Err(FsError::FileTooLarge { .. })
    ));
    assert_eq!(sfs.read(fd, &mut buf).unwrap(), 0);
    assert_eq!(sfs.file_size("p").unwrap(), 4);
}

/// 写入一个文件后卸载, 返回磁盘, 文件的 inode 和根目录的第一个块
fn image_with_one_file(geometry: Geometry) -> (Arc<RamDisk>, u32, u32) {
    let (disk, mut sfs) = ram_sfs(geometry);
    let fd = sfs.open("v").unwrap();
    sfs.write(fd, b"abc").unwrap();
    let inode = sfs.inode_of("v").unwrap();
    let dir_block = sfs.inode_blocks(0).unwrap()[0];
    (disk, inode, dir_block)
}

#[test]
fn stray_block_pointer_is_corrupt() {
    let geometry = small_geometry();
    let (disk, inode, _) = image_with_one_file(geometry);

    // 把第一个直接指针改成超级块
    let per_block = geometry.inodes_per_block();
    let block_id = geometry.inode_start() + inode as usize / per_block;
    let offset = (inode as usize % per_block) * DISK_INODE_SIZE;
    let mut raw = vec![0u8; geometry.block_size];
    disk.read_block(block_id, &mut raw).unwrap();
    let mut node = DiskInode::decode(&raw[offset..offset + DISK_INODE_SIZE]);
    node.direct[0] = 0;
    node.encode(&mut raw[offset..offset + DISK_INODE_SIZE]);
    disk.write_block(block_id, &raw).unwrap();

    assert!(matches!(
        SimpleFileSystem::mount(disk, geometry, false),
        Err(FsError::CorruptFilesystem)
    ));
}

#[test]
fn dirent_to_a_free_inode_is_corrupt() {
    let geometry = small_geometry();
    let (disk, _, dir_block) = image_with_one_file(geometry);

    let mut raw = vec![0u8; geometry.block_size];
    disk.read_block(dir_block as usize, &mut raw).unwrap();
    DirEntry::new("v", 5).encode(&mut raw[..DIRENT_SIZE]);
    disk.write_block(dir_block as usize, &raw).unwrap();

    assert!(matches!(
        SimpleFileSystem::mount(disk, geometry, false),
        Err(FsError::CorruptFilesystem)
    ));
}

#[test]
fn holes_cannot_be_read() {
    let (_, mut sfs) = ram_sfs(small_geometry());
    let fd = sfs.open("sparse").unwrap();
    let bs = small_geometry().block_size;
    sfs.seek(fd, 3 * bs).unwrap();
    sfs.write(fd, b"tail").unwrap();
    assert_eq!(sfs.file_size("sparse").unwrap(), 3 * bs + 4);

    sfs.seek(fd, 0).unwrap();
    let mut buf = [0u8; 8];
    assert!(matches!(
        sfs.read(fd, &mut buf),
        Err(FsError::ReadBeyondAllocated { offset: 0 })
    ));
    sfs.seek(fd, 3 * bs).unwrap();
    assert_eq!(sfs.read(fd, &mut buf).unwrap(), 4);
    assert_eq!(&buf[..4], b"tail");
}

#[test]
fn state_survives_remount() {
    let (disk, mut sfs) = ram_sfs(small_geometry());
    for name in ["one", "two", "three"] {
        let fd = sfs.open(name).unwrap();
        sfs.write(fd, name.repeat(100).as_bytes()).unwrap();
    }
    sfs.remove("two").unwrap();
    let free = sfs.free_blocks();
    drop(sfs);

    let mut sfs = SimpleFileSystem::mount(disk, small_geometry(), false).unwrap();
    assert_eq!(sfs.ls(), ["one", "three"]);
    assert_eq!(sfs.free_blocks(), free);
    assert_eq!(sfs.file_size("three").unwrap(), 500);
    // 挂载后描述符表为空
    assert_eq!(sfs.open_handles(), 0);

    let fd = sfs.open("three").unwrap();
    sfs.seek(fd, 0).unwrap();
    let mut out = vec![0u8; 500];
    sfs.read(fd, &mut out).unwrap();
    assert_eq!(out, "three".repeat(100).as_bytes());
}

#[test]
fn bad_magic_is_corrupt() {
    let geometry = small_geometry();
    let disk = Arc::new(RamDisk::new(geometry.block_size, geometry.total_blocks()));
    disk.write_block(0, &vec![0xEEu8; geometry.block_size]).unwrap();
    assert!(matches!(
        SimpleFileSystem::mount(disk, geometry, false),
        Err(FsError::CorruptFilesystem)
    ));
}

#[test]
fn every_used_block_is_reachable() {
    let (_, mut sfs) = ram_sfs(small_geometry());
    let bs = small_geometry().block_size;
    for (i, name) in ["x", "y", "z"].into_iter().enumerate() {
        let fd = sfs.open(name).unwrap();
        sfs.write(fd, &random_digits((i + 1) * bs * 5 + 3)).unwrap();
    }
    sfs.remove("y").unwrap();

    let mut reachable = Vec::new();
    for inode in [0, sfs.inode_of("x").unwrap(), sfs.inode_of("z").unwrap()] {
        reachable.extend(sfs.inode_blocks(inode).unwrap());
        reachable.extend(sfs.inode(inode).unwrap().indirect);
    }
    let mut sorted = reachable.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), reachable.len(), "a block is shared");

    let used = small_geometry().data_blocks - sfs.free_blocks();
    assert_eq!(used, reachable.len());
    assert!(reachable.iter().all(|&b| sfs.is_block_used(b)));
}

#[test]
fn efs_on_a_disk_image() -> std::io::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("fs.img");
    let geometry = Geometry::default();

    let block_file = Arc::new(BlockFile::create(&path, geometry.block_size, geometry.total_blocks())?);
    let mut sfs = SimpleFileSystem::mount(block_file, geometry, true).unwrap();
    let greet = "Hello, world!";
    let fd = sfs.open("filea").unwrap();
    sfs.write(fd, greet.as_bytes()).unwrap();
    sfs.open("fileb").unwrap();
    drop(sfs);

    let block_file = Arc::new(BlockFile::open_existing(
        &path,
        geometry.block_size,
        geometry.total_blocks(),
    )?);
    let mut sfs = SimpleFileSystem::mount(block_file, geometry, false).unwrap();
    assert_eq!(sfs.ls(), ["filea", "fileb"]);
    let fd = sfs.open("filea").unwrap();
    sfs.seek(fd, 0).unwrap();
    let mut buffer = [0u8; 233];
    let len = sfs.read(fd, &mut buffer).unwrap();
    assert_eq!(greet, core::str::from_utf8(&buffer[..len]).unwrap());
    Ok(())
}
