use std::{
    error::Error,
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    process,
    sync::Arc,
};

use clap::{Parser, Subcommand};
use log::error;

use sfs::{
    config::{load_config, SfsConfig},
    device::BlockFile,
    fs::{FsError, SimpleFileSystem},
};

#[derive(Parser)]
#[command(name = "sfs", version, about = "Simple file system disk image tool")]
struct Cli {
    /// Disk image path (overrides the config file)
    #[arg(long, short)]
    image: Option<PathBuf>,

    /// INI configuration file
    #[arg(long, short)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a fresh, empty file system image
    Mkfs,
    /// Print the superblock and usage
    Info,
    /// List files in the root directory
    Ls,
    /// Copy a host file into the image
    Put {
        host: PathBuf,
        /// Name inside the image (defaults to the host file name)
        name: Option<String>,
    },
    /// Print a file to stdout
    Cat { name: String },
    /// Remove a file
    Rm { name: String },
    /// Print the size of a file in bytes
    Size { name: String },
}

type CliResult<T> = Result<T, Box<dyn Error>>;

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!("{}", e);
        if matches!(e.downcast_ref::<FsError>(), Some(FsError::CorruptFilesystem)) {
            eprintln!("Invalid File Format -- Cannot Open the file system.");
        } else {
            eprintln!("sfs: {}", e);
        }
        process::exit(1);
    }
}

fn run(cli: Cli) -> CliResult<()> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => SfsConfig::default(),
    };
    if let Some(image) = &cli.image {
        config.image = image.display().to_string();
    }

    let mut sfs = if matches!(cli.command, Command::Mkfs) {
        format_image(&config)?
    } else {
        mount_existing(&config)?
    };
    match cli.command {
        Command::Mkfs => println!("{:#?}", sfs.super_block()),
        Command::Info => {
            println!("{:#?}", sfs.super_block());
            println!(
                "free data blocks: {} / {}",
                sfs.free_blocks(),
                sfs.geometry().data_blocks
            );
            println!("files: {}", sfs.ls().len());
        }
        Command::Ls => {
            while let Some(name) = sfs.list_next() {
                println!("{:>10}  {}", sfs.file_size(&name)?, name);
            }
        }
        Command::Put { host, name } => {
            let name = match name {
                Some(name) => name,
                None => host_file_name(&host)?,
            };
            let mut data = Vec::new();
            File::open(&host)?.read_to_end(&mut data)?;
            if sfs.inode_of(&name).is_some() {
                sfs.remove(&name)?;
            }
            let fd = sfs.open(&name)?;
            let written = sfs.write(fd, &data)?;
            sfs.close(fd)?;
            println!("{}: {} bytes", name, written);
        }
        Command::Cat { name } => {
            let size = sfs.file_size(&name)?;
            let fd = sfs.open(&name)?;
            sfs.seek(fd, 0)?;
            let mut data = vec![0u8; size];
            let read = sfs.read(fd, &mut data)?;
            sfs.close(fd)?;
            io::stdout().write_all(&data[..read])?;
        }
        Command::Rm { name } => sfs.remove(&name)?,
        Command::Size { name } => println!("{}", sfs.file_size(&name)?),
    }
    Ok(())
}

fn format_image(config: &SfsConfig) -> CliResult<SimpleFileSystem> {
    let geometry = config.geometry;
    let device = BlockFile::create(&config.image, geometry.block_size, geometry.total_blocks())?;
    Ok(SimpleFileSystem::mount(Arc::new(device), geometry, true)?)
}

/// 打开已有镜像: 块大小取自配置, 块数由镜像长度推出, 其余参数以超级块为准
fn mount_existing(config: &SfsConfig) -> CliResult<SimpleFileSystem> {
    let block_size = config.geometry.block_size;
    let len = fs::metadata(&config.image)?.len() as usize;
    let device = BlockFile::open_existing(&config.image, block_size, len / block_size)?;
    Ok(SimpleFileSystem::mount(
        Arc::new(device),
        config.geometry,
        false,
    )?)
}

fn host_file_name(host: &Path) -> CliResult<String> {
    host.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_owned)
        .ok_or_else(|| format!("cannot derive a file name from {}", host.display()).into())
}
