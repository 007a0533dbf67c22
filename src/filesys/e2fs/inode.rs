use bincode::{DefaultOptions, Options};
use serde::{Deserialize, Serialize};

use crate::alloc_inode_size;
use crate::error::CheckError;

use super::Fs;


// Source: https://elixir.bootlin.com/linux/latest/source/fs/ext4/ext4.h

pub const GOOD_OLD_INODE_SIZE: u16 = 128;
const N_BLOCKS: usize = 15;

/// Number of direct block pointers in `i_block`.
const DIRECT_BLOCKS: u64 = 12;
const IND_BLOCK: usize = 12;
const DIND_BLOCK: usize = 13;
const TIND_BLOCK: usize = 14;


/// Ext2/3 inode.
/// Source: https://elixir.bootlin.com/linux/latest/source/fs/ext4/ext4.h
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Inode {
    pub i_mode: u16,              // File mode
    pub i_uid: u16,               // Low 16 bits of Owner Uid
    pub i_size_lo: u32,           // Size in bytes
    pub i_atime: u32,             // Access time
    pub i_ctime: u32,             // Inode Change time
    pub i_mtime: u32,             // Modification time
    pub i_dtime: u32,             // Deletion Time
    pub i_gid: u16,               // Low 16 bits of Group Id
    pub i_links_count: u16,       // Links count
    pub i_blocks_lo: u32,         // Blocks count
    pub i_flags: u32,             // File flags
    pub osd1: u32,                // OS dependent 1
    pub i_block: [u32; N_BLOCKS], // Pointers to blocks
    pub i_generation: u32,        // File version (for NFS)
    pub i_file_acl_lo: u32,       // File ACL
    pub i_size_high: u32,
    pub i_obso_faddr: u32,        // Obsoleted fragment address
    pub osd2: [u8; 12],           // OS dependent 2
    pub i_extra_isize: u16,
    pub i_checksum_hi: u16,       // crc32c(uuid+inum+inode) BE
    pub i_ctime_extra: u32,       // extra Change time      (nsec << 2 | epoch)
    pub i_mtime_extra: u32,       // extra Modification time(nsec << 2 | epoch)
    pub i_atime_extra: u32,       // extra Access time      (nsec << 2 | epoch)
    pub i_crtime: u32,            // File Creation time
    pub i_crtime_extra: u32,      // extra FileCreationtime (nsec << 2 | epoch)
    pub i_version_hi: u32,        // high 32 bits for 64-bit version
    pub i_projid: u32,            // Project ID
}


pub const INODE_STRUCT_SIZE: usize = 160;


/// Inode mode (i_mode), file-type nibble.
pub struct IMode(pub u16);

impl IMode {
    pub fn is_fifo(&self)      -> bool { self.0 & 0xf000 == 0x1000 }
    pub fn is_character(&self) -> bool { self.0 & 0xf000 == 0x2000 }
    pub fn is_directory(&self) -> bool { self.0 & 0xf000 == 0x4000 }
    pub fn is_block(&self)     -> bool { self.0 & 0xf000 == 0x6000 }
    pub fn is_regular(&self)   -> bool { self.0 & 0xf000 == 0x8000 }
    pub fn is_symlink(&self)   -> bool { self.0 & 0xf000 == 0xa000 }
    pub fn is_socket(&self)    -> bool { self.0 & 0xf000 == 0xc000 }
}


/// Fetches an inode, based on the number of the inode.
pub fn fetch_inode(fs: &mut Fs, inum: u32) -> Result<Inode, CheckError>
{
    if inum == 0 || inum > fs.sb.s_inodes_count {
        return Err(CheckError::BadInode);
    }

    let bg_num = ((inum - 1) / fs.sb.s_inodes_per_group) as u64;
    let idx = ((inum - 1) % fs.sb.s_inodes_per_group) as u64;

    let desc = fs.fetch_bg_descriptor(bg_num)?;
    let itable_block = desc.bg_inode_table_lo as u64;

    // FIXME: This could fail if the inode is smaller than INODE_STRUCT_SIZE
    // and it is located at the end of the disk. The read operation would
    // then attempt to reach beyond the end of the disk.
    let len = fs.sb.s_inodes_per_group as usize * alloc_inode_size!(fs.inode_size);
    let itable = fs.read_raw(itable_block, len)?;

    let bincode_opt = DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes();

    let inode: Inode = bincode_opt.deserialize(&itable[(idx * fs.inode_size) as usize..])?;

    Ok(inode)
}


/// Maps a logical block of a file to its physical block, walking the direct
/// and indirect block pointers. Returns 0 for holes and for logical blocks
/// beyond what the block map can address.
pub fn bmap(fs: &mut Fs, inode: &Inode, block: u64) -> Result<u64, CheckError>
{
    let ppb = fs.block_size / 4;

    if block < DIRECT_BLOCKS {
        return Ok(inode.i_block[block as usize] as u64);
    }
    let mut b = block - DIRECT_BLOCKS;

    if b < ppb {
        return read_block_ptr(fs, inode.i_block[IND_BLOCK] as u64, b);
    }
    b -= ppb;

    if b < ppb * ppb {
        let ind = read_block_ptr(fs, inode.i_block[DIND_BLOCK] as u64, b / ppb)?;
        return read_block_ptr(fs, ind, b % ppb);
    }
    b -= ppb * ppb;

    if b < ppb * ppb * ppb {
        let dind = read_block_ptr(fs, inode.i_block[TIND_BLOCK] as u64, b / (ppb * ppb))?;
        let ind = read_block_ptr(fs, dind, (b / ppb) % ppb)?;
        return read_block_ptr(fs, ind, b % ppb);
    }

    Ok(0)
}


/// Reads one entry of an indirect block. A zero indirect block is a hole.
fn read_block_ptr(fs: &mut Fs, ind_block: u64, idx: u64) -> Result<u64, CheckError>
{
    if ind_block == 0 {
        return Ok(0);
    }

    let mut buf = vec![0u8; fs.block_size as usize];
    fs.io.read_block(ind_block, 1, &mut buf)?;

    let off = idx as usize * 4;
    let ptr = u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);

    Ok(ptr as u64)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::testimg;

    #[test]
    fn fetch_the_journal_inode()
    {
        let (mut ctx, _, _) = testimg::mk_ctx(testimg::base_image(), &[], false);

        let inode = fetch_inode(&mut ctx.fs, testimg::JOURNAL_INO).unwrap();

        assert!(IMode(inode.i_mode).is_regular());
        assert_eq!(inode.i_links_count, 1);
        assert_eq!(inode.i_size_lo as u64, testimg::JOURNAL_BLOCKS * 1024);
    }

    #[test]
    fn fetch_inode_zero_is_rejected()
    {
        let (mut ctx, _, _) = testimg::mk_ctx(testimg::base_image(), &[], false);

        assert!(matches!(
            fetch_inode(&mut ctx.fs, 0),
            Err(CheckError::BadInode)
        ));
        assert!(matches!(
            fetch_inode(&mut ctx.fs, 999),
            Err(CheckError::BadInode)
        ));
    }

    #[test]
    fn bmap_direct_blocks()
    {
        let (mut ctx, _, _) = testimg::mk_ctx(testimg::base_image(), &[], false);
        let inode = fetch_inode(&mut ctx.fs, testimg::JOURNAL_INO).unwrap();

        assert_eq!(bmap(&mut ctx.fs, &inode, 0).unwrap(), testimg::JOURNAL_FIRST_PHYS);
        assert_eq!(bmap(&mut ctx.fs, &inode, 5).unwrap(), testimg::JOURNAL_FIRST_PHYS + 5);
        assert_eq!(bmap(&mut ctx.fs, &inode, 11).unwrap(), testimg::JOURNAL_FIRST_PHYS + 11);
    }

    #[test]
    fn bmap_single_indirect()
    {
        let (mut ctx, _, _) = testimg::mk_ctx(testimg::base_image(), &[], false);
        let inode = fetch_inode(&mut ctx.fs, testimg::JOURNAL_INO).unwrap();

        assert_eq!(bmap(&mut ctx.fs, &inode, 12).unwrap(), testimg::JOURNAL_FIRST_PHYS + 12);
        assert_eq!(bmap(&mut ctx.fs, &inode, 267).unwrap(), testimg::JOURNAL_FIRST_PHYS + 267);
    }

    #[test]
    fn bmap_double_indirect()
    {
        let (mut ctx, _, _) = testimg::mk_ctx(testimg::base_image(), &[], false);
        let inode = fetch_inode(&mut ctx.fs, testimg::JOURNAL_INO).unwrap();

        assert_eq!(bmap(&mut ctx.fs, &inode, 268).unwrap(), testimg::JOURNAL_FIRST_PHYS + 268);
        assert_eq!(bmap(&mut ctx.fs, &inode, 700).unwrap(), testimg::JOURNAL_FIRST_PHYS + 700);
        assert_eq!(bmap(&mut ctx.fs, &inode, 1023).unwrap(), testimg::JOURNAL_FIRST_PHYS + 1023);
    }

    #[test]
    fn bmap_hole_is_zero()
    {
        let (mut ctx, _, _) = testimg::mk_ctx(testimg::base_image(), &[], false);

        let mut inode = fetch_inode(&mut ctx.fs, testimg::JOURNAL_INO).unwrap();
        inode.i_block[3] = 0;
        inode.i_block[IND_BLOCK] = 0;

        assert_eq!(bmap(&mut ctx.fs, &inode, 3).unwrap(), 0);
        assert_eq!(bmap(&mut ctx.fs, &inode, 20).unwrap(), 0);
    }
}
