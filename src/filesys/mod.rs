use clap::ArgEnum;
use serde::Serialize;

mod detect;

pub mod e2fs;
pub use detect::detect_fs;


/// Supported file system types.
#[derive(Copy, Clone, Debug, ArgEnum, Serialize)]
pub enum FsType {
    Ext2,
    Ext3,
}
