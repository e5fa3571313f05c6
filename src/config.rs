//! Configuration loader for the `sfs` tool.
//!
//! The INI file has two sections:
//!
//! ```ini
//! [filesystem]
//! block_size = 1024
//! inode_count = 160
//! data_blocks = 1500
//! open_files = 320
//!
//! [storage]
//! image = sfs_disk.img
//! ```
//!
//! Every key is optional; missing keys keep the built-in defaults. The geometry only
//! matters when a fresh image is formatted, an existing image describes itself.

use configparser::ini::Ini;
use thiserror::Error;

use crate::fs::Geometry;

/// Disk image used when neither the config nor the command line names one.
pub const DEFAULT_IMAGE: &str = "sfs_disk.img";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not load {path}: {reason}")]
    Load { path: String, reason: String },
    #[error("invalid value for {section}.{key}: {reason}")]
    Invalid {
        section: &'static str,
        key: &'static str,
        reason: String,
    },
    #[error("geometry {0:?} cannot be laid out on disk")]
    Geometry(Geometry),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SfsConfig {
    pub geometry: Geometry,
    /// Path of the disk image.
    pub image: String,
}

impl Default for SfsConfig {
    fn default() -> Self {
        Self {
            geometry: Geometry::default(),
            image: DEFAULT_IMAGE.to_owned(),
        }
    }
}

/// Loads the configuration from an INI file on disk.
pub fn load_config(path: &str) -> Result<SfsConfig, ConfigError> {
    let mut ini = Ini::new();
    ini.load(path).map_err(|reason| ConfigError::Load {
        path: path.to_owned(),
        reason,
    })?;
    from_ini(&ini)
}

/// Parses the configuration from INI text.
pub fn parse_config(text: &str) -> Result<SfsConfig, ConfigError> {
    let mut ini = Ini::new();
    ini.read(text.to_owned()).map_err(|reason| ConfigError::Load {
        path: "<inline>".to_owned(),
        reason,
    })?;
    from_ini(&ini)
}

fn from_ini(ini: &Ini) -> Result<SfsConfig, ConfigError> {
    let defaults = SfsConfig::default();
    let number = |key: &'static str, default: usize| -> Result<usize, ConfigError> {
        let value = ini
            .getuint("filesystem", key)
            .map_err(|reason| ConfigError::Invalid {
                section: "filesystem",
                key,
                reason,
            })?;
        Ok(value.map_or(default, |v| v as usize))
    };

    let geometry = Geometry {
        block_size: number("block_size", defaults.geometry.block_size)?,
        inode_count: number("inode_count", defaults.geometry.inode_count)?,
        data_blocks: number("data_blocks", defaults.geometry.data_blocks)?,
        open_files: number("open_files", defaults.geometry.open_files)?,
    };
    if !geometry.is_valid() {
        return Err(ConfigError::Geometry(geometry));
    }

    let image = ini
        .get("storage", "image")
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .unwrap_or(defaults.image);

    Ok(SfsConfig { geometry, image })
}
