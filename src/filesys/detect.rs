use anyhow::anyhow;
use bincode::{Options, DefaultOptions};
use crate::io::IoChannel;
use super::FsType;
use super::e2fs;


/// Attempts to detect the file system.
pub fn detect_fs(io: &mut dyn IoChannel) -> anyhow::Result<FsType>
{
    if let Some(v) = detect_e2fs(io)? { return Ok(v); }

    Err(anyhow!("unknown file system"))
}


/// Attempts to detect an ext2/ext3 file system, classified by the
/// has-journal feature.
fn detect_e2fs(io: &mut dyn IoChannel) -> anyhow::Result<Option<FsType>>
{
    let bincode_opt = DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes();

    let orig_bs = io.block_size();
    io.set_block_size(1024);
    let mut raw = vec![0u8; 1024];
    let res = io.read_block(e2fs::SB_OFFSET / 1024, 1, &mut raw);
    io.set_block_size(orig_bs);
    res?;

    let sb: e2fs::SuperBlock = bincode_opt.deserialize(&raw)?;

    if sb.s_magic != e2fs::EXT2_SUPER_MAGIC {
        return Ok(None);
    }

    let state = e2fs::State(sb.s_state);
    if sb.s_state == 0 || state.has_unknown() {
        return Ok(None);
    }

    if sb.s_errors == 0 || sb.s_errors > 3 {
        return Ok(None);
    }

    if sb.s_rev_level > 1 {
        return Ok(None);
    }

    if e2fs::CompatFeatures(sb.s_feature_compat).has_has_journal() {
        Ok(Some(FsType::Ext3))
    } else {
        Ok(Some(FsType::Ext2))
    }
}
