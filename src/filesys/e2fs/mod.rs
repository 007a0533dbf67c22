#![allow(dead_code)]
use bincode::{DefaultOptions, Options};
use serde::{Deserialize, Serialize};

use crate::array::Array;
use crate::buffer::BufferStats;
use crate::error::CheckError;
use crate::io::IoChannel;

pub mod inode;
#[macro_use]
mod macros;

use inode::GOOD_OLD_INODE_SIZE;


pub const EXT2_SUPER_MAGIC: u16 = 0xef53;

/// Byte offset of the superblock within the image.
pub const SB_OFFSET: u64 = 1024;

/// First non-reserved inode on revision-0 file systems.
pub const GOOD_OLD_FIRST_INO: u32 = 11;

// s_state flags.
pub const STATE_VALID_FS: u16 = 0x1;
pub const STATE_ERROR_FS: u16 = 0x2;

// The feature bits the journal logic flips directly.
pub const FEATURE_COMPAT_HAS_JOURNAL: u32 = 0x0004;
pub const FEATURE_INCOMPAT_RECOVER: u32 = 0x0004;
pub const FEATURE_INCOMPAT_JOURNAL_DEV: u32 = 0x0008;


/// The Ext2/3/4 Superblock structure.
/// Source: https://elixir.bootlin.com/linux/latest/source/fs/ext4/ext4.h
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SuperBlock {
    pub s_inodes_count: u32,         // Inodes count
    pub s_blocks_count_lo: u32,      // Blocks count
    pub s_r_blocks_count_lo: u32,    // Reserved blocks count
    pub s_free_blocks_count_lo: u32, // Free blocks count
    pub s_free_inodes_count: u32,    // Free inodes count
    pub s_first_data_block: u32,     // First Data Block
    pub s_log_block_size: u32,       // Block size
    pub s_log_cluster_size: u32,     // Allocation cluster size
    pub s_blocks_per_group: u32,     // # Blocks per group
    pub s_clusters_per_group: u32,   // # Clusters per group
    pub s_inodes_per_group: u32,     // # Inodes per group
    pub s_mtime: u32,                // Mount time
    pub s_wtime: u32,                // Write time
    pub s_mnt_count: u16,            // Mount count
    pub s_max_mnt_count: u16,        // Maximal mount count
    pub s_magic: u16,                // Magic signature
    pub s_state: u16,                // File system state
    pub s_errors: u16,               // Behaviour when detecting errors
    pub s_minor_rev_level: u16,      // minor revision level
    pub s_lastcheck: u32,            // time of last check
    pub s_checkinterval: u32,        // max. time between checks
    pub s_creator_os: u32,           // OS
    pub s_rev_level: u32,            // Revision level
    pub s_def_resuid: u16,           // Default uid for reserved blocks
    pub s_def_resgid: u16,           // Default gid for reserved blocks
    // --- EXT4_DYNAMIC_REV ---
    pub s_first_ino: u32,         // First non-reserved inode
    pub s_inode_size: u16,        // size of inode structure
    pub s_block_group_nr: u16,    // block group # of this superblock
    pub s_feature_compat: u32,    // compatible feature set
    pub s_feature_incompat: u32,  // incompatible feature set
    pub s_feature_ro_compat: u32, // readonly-compatible feature set
    pub s_uuid: [u8; 16],         // 128-bit uuid for volume
    /// Type char[16].
    pub s_volume_name: [u8; 16], // volume name
    /// Type __nonstring char[64].
    pub s_last_mounted: Array<u8, 64>, // directory where last mounted
    pub s_algorithm_usage_bitmap: u32, // For compression
    // --- EXT4_FEATURE_COMPAT_DIR_PREALLOC ---
    pub s_prealloc_blocks: u8,     // Nr of blocks to try to preallocat
    pub s_prealloc_dir_blocks: u8, // Nr to preallocate for dirs
    /// Named `s_padding1` in Ext2.
    pub s_reserved_gdt_blocks: u16, // Per group desc for online growth
    // --- End of Ext2 superblock ---
    // --- EXT4_FEATURE_COMPAT_HAS_JOURNAL ---
    pub s_journal_uuid: [u8; 16], // uuid of journal superblock
    pub s_journal_inum: u32,      // inode number of journal file
    pub s_journal_dev: u32,       // device number of journal file
    pub s_last_orphan: u32,       // start of list of inodes to delete
    pub s_hash_seed: [u32; 4],    // HTREE hash seed
    pub s_def_hash_version: u8,   // Default hash version to use
    /// Named `s_reserved_char_pad` in Ext3.
    pub s_jnl_backup_type: u8,
    /// Named `s_reserved_word_pad` in Ext3.
    pub s_desc_size: u16, // size of group descriptor
    pub s_default_mount_opts: u32,
    pub s_first_meta_bg: u32, // First metablock block group
    // --- End of Ext3 superblock ---
    pub s_mkfs_time: u32,        // When the filesystem was created
    pub s_jnl_blocks: [u32; 17], // Backup of the journal inode
    // --- EXT4_FEATURE_COMPAT_64BIT ---
    pub s_blocks_count_hi: u32,         // Blocks count
    pub s_r_blocks_count_hi: u32,       // Reserved blocks count
    pub s_free_blocks_count_hi: u32,    // Free blocks count
    pub s_min_extra_isize: u16,         // All inodes have at least # bytes
    pub s_want_extra_isize: u16,        // New inodes should reserve # bytes
    pub s_flags: u32,                   // Miscellaneous flags
    pub s_raid_stride: u16,             // RAID stride
    pub s_mmp_update_interval: u16,     // # seconds to wait in MMP checking
    pub s_mmp_block: u64,               // Block for multi-mount protection
    pub s_raid_stripe_width: u32,       // blocks on all data disks (
    pub s_log_groups_per_flex: u8,      // FLEX_BG group size
    pub s_checksum_type: u8,            // metadata checksum algorithm used
    pub s_encryption_level: u8,         // versioning level for encryption
    pub s_reserved_pad: u8,             // Padding to next 32bits
    pub s_kbytes_written: u64,          // nr of lifetime kilobytes written
    pub s_snapshot_inum: u32,           // Inode number of active snapshot
    pub s_snapshot_id: u32,             // sequential ID of active snapshot
    pub s_snapshot_r_blocks_count: u64, // reserved blocks for active snapshot's future use
    pub s_snapshot_list: u32,           // inode number of the head of the on-disk snapshot list
    pub s_error_count: u32,             // number of fs errors
    pub s_first_error_time: u32,        // first time an error happened
    pub s_first_error_ino: u32,         // inode involved in first error
    pub s_first_error_block: u64,       // block involved of first error
    /// Type __nonstring __u8[32].
    pub s_first_error_func: [u8; 32], // function where the error happened
    pub s_first_error_line: u32,        // line number where error happened
    pub s_last_error_time: u32,         // most recent time of an error
    pub s_last_error_ino: u32,          // inode involved in last error
    pub s_last_error_line: u32,         // line number where error happened
    pub s_last_error_block: u64,        // block involved of last error
    /// Type __nonstring __u8[32].
    pub s_last_error_func: [u8; 32], // function where the error happened
    pub s_mount_opts: Array<u8, 64>,
    pub s_usr_quota_inum: u32,       // inode for tracking user quota
    pub s_grp_quota_inum: u32,       // inode for tracking group quota
    pub s_overhead_clusters: u32,    // overhead blocks/clusters in fs
    pub s_backup_bgs: [u32; 2],      // groups with sparse_super2 SBs
    pub s_encrypt_algos: [u8; 4],    // Encryption algorithms in use
    pub s_encrypt_pw_salt: [u8; 16], // Salt used for string2key algorithm
    pub s_lpf_ino: u32,              // Location of the lost+found inode
    pub s_prj_quota_inum: u32,       // inode for tracking project quota
    pub s_checksum_seed: u32,        // crc32c(uuid) if csum_seed set
    pub s_wtime_hi: u8,
    pub s_mtime_hi: u8,
    pub s_mkfs_time_hi: u8,
    pub s_lastcheck_hi: u8,
    pub s_first_error_time_hi: u8,
    pub s_last_error_time_hi: u8,
    pub s_first_error_errcode: u8,
    pub s_last_error_errcode: u8,
    pub s_encoding: u16,            // Filename charset encoding
    pub s_encoding_flags: u16,      // Filename charset encoding flags
    pub s_orphan_file_inum: u32,    // Inode for tracking orphan inodes
    pub s_reserved: Array<u32, 94>, // Padding to the end of the block
    pub s_checksum: u32,            // crc32c(superblock)
}


/// The Ext2/3 group descriptor structure.
/// Source: https://elixir.bootlin.com/linux/latest/source/fs/ext4/ext4.h
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupDescriptor {
    pub bg_block_bitmap_lo: u32,      // Blocks bitmap block
    pub bg_inode_bitmap_lo: u32,      // Inodes bitmap block
    pub bg_inode_table_lo: u32,       // Inodes table block
    pub bg_free_blocks_count_lo: u16, // Free blocks count
    pub bg_free_inodes_count_lo: u16, // Free inodes count
    pub bg_used_dirs_count_lo: u16,   // Directories count
    pub bg_flags: u16,                // EXT4_BG_flags (INODE_UNINIT, etc)
    pub bg_exclude_bitmap_lo: u32,    // Exclude bitmap for snapshots
    pub bg_block_bitmap_csum_lo: u16, // crc32c(s_uuid+grp_num+bbitmap) LE
    pub bg_inode_bitmap_csum_lo: u16, // crc32c(s_uuid+grp_num+ibitmap) LE
    pub bg_itable_unused_lo: u16,     // Unused inodes count
    pub bg_checksum: u16,             // crc16(sb_uuid+group+desc)
    // --- End of Ext2/3 descriptor ---
    pub bg_block_bitmap_hi: u32,      // Blocks bitmap block MSB
    pub bg_inode_bitmap_hi: u32,      // Inodes bitmap block MSB
    pub bg_inode_table_hi: u32,       // Inodes table block MSB
    pub bg_free_blocks_count_hi: u16, // Free blocks count MSB
    pub bg_free_inodes_count_hi: u16, // Free inodes count MSB
    pub bg_used_dirs_count_hi: u16,   // Directories count MSB
    pub bg_itable_unused_hi: u16,     // Unused inodes count MSB
    pub bg_exclude_bitmap_hi: u32,    // Exclude bitmap block MSB
    pub bg_block_bitmap_csum_hi: u16, // crc32c(s_uuid+grp_num+bbitmap) BE
    pub bg_inode_bitmap_csum_hi: u16, // crc32c(s_uuid+grp_num+ibitmap) BE
    pub bg_reserved: u32,
}


pub const GROUP_DESC_STRUCT_SIZE: usize = 64;


/// State of the file system (s_state).
#[derive(Copy, Clone)]
pub struct State(pub u16);

impl State {
    pub fn has_valid(&self)  -> bool { self.0 & 0x1 != 0 }
    pub fn has_error(&self)  -> bool { self.0 & 0x2 != 0 }
    pub fn has_orphan(&self) -> bool { self.0 & 0x4 != 0 }

    pub fn get_unknown(&self) -> u16
    {
        (self.0 >> 3) << 3
    }

    pub fn has_unknown(&self) -> bool
    {
        self.get_unknown() != 0
    }
}


/// Compatible features (s_feature_compat), ext3-era set.
#[derive(Copy, Clone)]
pub struct CompatFeatures(pub u32);

impl CompatFeatures {
    pub fn has_dir_prealloc(&self)  -> bool { self.0 & 0x0001 != 0 }
    pub fn has_imagic_inodes(&self) -> bool { self.0 & 0x0002 != 0 }
    pub fn has_has_journal(&self)   -> bool { self.0 & 0x0004 != 0 }
    pub fn has_ext_attr(&self)      -> bool { self.0 & 0x0008 != 0 }
    pub fn has_resize_inode(&self)  -> bool { self.0 & 0x0010 != 0 }
    pub fn has_dir_index(&self)     -> bool { self.0 & 0x0020 != 0 }

    pub fn get_unknown(&self) -> u32
    {
        (self.0 >> 6) << 6
    }

    pub fn has_unknown(&self) -> bool
    {
        self.get_unknown() != 0
    }
}


/// Incompatible features (s_feature_incompat), ext3-era set.
#[derive(Copy, Clone)]
pub struct IncompatFeatures(pub u32);

impl IncompatFeatures {
    pub fn has_compression(&self) -> bool { self.0 & 0x00001 != 0 }
    pub fn has_filetype(&self)    -> bool { self.0 & 0x00002 != 0 }
    pub fn has_recover(&self)     -> bool { self.0 & 0x00004 != 0 }
    pub fn has_journal_dev(&self) -> bool { self.0 & 0x00008 != 0 }
    pub fn has_meta_bg(&self)     -> bool { self.0 & 0x00010 != 0 }

    pub fn get_unknown(&self) -> u32
    {
        (self.0 >> 5) << 5
    }

    pub fn has_unknown(&self) -> bool
    {
        self.get_unknown() != 0
    }
}


/// Read-only compatible features (s_feature_ro_compat), ext3-era set.
#[derive(Copy, Clone)]
pub struct RoCompatFeatures(pub u32);

impl RoCompatFeatures {
    pub fn has_sparse_super(&self) -> bool { self.0 & 0x00001 != 0 }
    pub fn has_large_file(&self)   -> bool { self.0 & 0x00002 != 0 }
    pub fn has_btree_dir(&self)    -> bool { self.0 & 0x00004 != 0 }

    pub fn get_unknown(&self) -> u32
    {
        (self.0 >> 3) << 3
    }

    pub fn has_unknown(&self) -> bool
    {
        self.get_unknown() != 0
    }
}


/// Filesystem parameters.
/// Holds the superblock, the raw group descriptor table, the I/O channel
/// everything is read and written through, and the values computed from
/// the superblock that are needed across procedures.
pub struct Fs {
    pub io: Box<dyn IoChannel>,
    pub sb: SuperBlock,
    pub desc_table: Vec<u8>,
    // -- computed values --
    pub block_size: u64,
    pub bg_count: u64,
    pub desc_size: u64,
    pub inode_size: u64,
    pub super_dirty: bool,
    pub stats: BufferStats,
}

impl std::fmt::Debug for Fs {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
    {
        f.debug_struct("Fs")
            .field("block_size", &self.block_size)
            .field("bg_count", &self.bg_count)
            .field("desc_size", &self.desc_size)
            .field("inode_size", &self.inode_size)
            .field("super_dirty", &self.super_dirty)
            .field("stats", &self.stats)
            .finish()
    }
}

struct FsMeta {
    sb: SuperBlock,
    desc_table: Vec<u8>,
    block_size: u64,
    bg_count: u64,
    desc_size: u64,
    inode_size: u64,
}

impl Fs {
    /// Opens the file system: reads and validates the superblock, switches
    /// the channel to the real block size and loads the group descriptor
    /// table.
    pub fn open(mut io: Box<dyn IoChannel>) -> Result<Self, CheckError>
    {
        let meta = load_meta(io.as_mut())?;

        Ok(Self {
            io,
            sb: meta.sb,
            desc_table: meta.desc_table,
            block_size: meta.block_size,
            bg_count: meta.bg_count,
            desc_size: meta.desc_size,
            inode_size: meta.inode_size,
            super_dirty: false,
            stats: BufferStats::default(),
        })
    }

    /// Writes the superblock back if it was marked dirty.
    pub fn flush(&mut self) -> Result<(), CheckError>
    {
        if !self.super_dirty {
            return Ok(());
        }

        let bincode_opt = DefaultOptions::new()
            .with_fixint_encoding()
            .allow_trailing_bytes();

        let raw = bincode_opt.serialize(&self.sb)?;

        // The superblock lives at a fixed 1024-byte offset regardless of
        // the block size.
        let real_bs = self.io.block_size();
        self.io.set_block_size(1024);
        let res = self.io.write_block(SB_OFFSET / 1024, 1, &raw);
        self.io.set_block_size(real_bs);
        res?;

        self.super_dirty = false;
        Ok(())
    }

    /// Closes and reopens the cached file system state on the same channel:
    /// flushes a dirty superblock, then re-reads the superblock and the
    /// descriptor table from disk. Used after journal recovery has changed
    /// the file system underneath.
    pub fn reopen(&mut self) -> Result<(), CheckError>
    {
        self.flush()?;

        let meta = load_meta(self.io.as_mut())?;
        self.sb = meta.sb;
        self.desc_table = meta.desc_table;
        self.block_size = meta.block_size;
        self.bg_count = meta.bg_count;
        self.desc_size = meta.desc_size;
        self.inode_size = meta.inode_size;

        Ok(())
    }

    pub fn mark_super_dirty(&mut self)
    {
        self.super_dirty = true;
    }

    /// The first non-reserved inode number.
    pub fn first_ino(&self) -> u32
    {
        if self.sb.s_rev_level == 0 {
            GOOD_OLD_FIRST_INO
        } else {
            self.sb.s_first_ino
        }
    }

    /// Fetches a block group descriptor, based on the number of the block
    /// group. Descriptors are read from the first block group; the standard
    /// layout (not META_BG) is assumed.
    pub fn fetch_bg_descriptor(&self, bg_num: u64) -> Result<GroupDescriptor, CheckError>
    {
        let bincode_opt = DefaultOptions::new()
            .with_fixint_encoding()
            .allow_trailing_bytes();

        let desc: GroupDescriptor = bincode_opt.deserialize(
            &self.desc_table[(bg_num * self.desc_size) as usize..]
        )?;

        Ok(desc)
    }

    /// Reads `len` raw bytes starting at the beginning of `start_block`.
    pub(crate) fn read_raw(&mut self, start_block: u64, len: usize) -> Result<Vec<u8>, CheckError>
    {
        read_raw(self.io.as_mut(), start_block, len)
    }
}


/// Returns the block number of the 1st group descriptor table.
fn first_gdt_block(block_size: u64) -> u64
{
    // NOTE: s_first_data_block > 1 is not accounted for.
    if block_size == 1024 {
        2
    } else {
        1
    }
}


fn read_raw(io: &mut dyn IoChannel, start_block: u64, len: usize) -> Result<Vec<u8>, CheckError>
{
    let block_size = io.block_size() as usize;
    let count = (len + block_size - 1) / block_size;

    let mut buf = vec![0u8; count * block_size];
    io.read_block(start_block, count, &mut buf)?;
    buf.truncate(len);

    Ok(buf)
}


fn load_meta(io: &mut dyn IoChannel) -> Result<FsMeta, CheckError>
{
    let bincode_opt = DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes();

    // The superblock is always read at a 1024-byte granularity; the block
    // size is not known before it is parsed.
    io.set_block_size(1024);
    let mut raw = vec![0u8; 1024];
    io.read_block(SB_OFFSET / 1024, 1, &mut raw)?;
    let sb: SuperBlock = bincode_opt.deserialize(&raw)?;

    if sb.s_magic != EXT2_SUPER_MAGIC {
        return Err(CheckError::CorruptSuperblock);
    }
    if sb.s_blocks_per_group == 0 || sb.s_inodes_per_group == 0 {
        return Err(CheckError::CorruptSuperblock);
    }

    let block_size = bs!(sb.s_log_block_size);
    io.set_block_size(block_size);

    // Computing values that will be needed across multiple procedures.

    let blocks_count = sb.s_blocks_count_lo as u64;
    let mut bg_count = (blocks_count - sb.s_first_data_block as u64) / sb.s_blocks_per_group as u64;
    if (blocks_count - sb.s_first_data_block as u64) % sb.s_blocks_per_group as u64 != 0 {
        bg_count += 1;
    }
    let desc_size = if sb.s_desc_size == 0 {
        32
    } else {
        sb.s_desc_size as u64
    };
    let inode_size = if sb.s_rev_level == 0 {
        GOOD_OLD_INODE_SIZE as u64
    } else {
        sb.s_inode_size as u64
    };

    // Reading the group descriptor table from the disk.
    // FIXME: This could fail if the descriptor is smaller than
    // GROUP_DESC_STRUCT_SIZE and it is located at the end of the disk. The
    // read operation would then attempt to reach beyond the end of the disk.
    let len = bg_count as usize * alloc_desc_size!(desc_size);
    let desc_table = read_raw(io, first_gdt_block(block_size), len)?;

    Ok(FsMeta {
        sb,
        desc_table,
        block_size,
        bg_count,
        desc_size,
        inode_size,
    })
}


// Debug implementations.


impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
    {
        let mut flags: Vec<&str> = Vec::new();

        if self.has_valid() {
            flags.push("valid");
        }
        if self.has_error() {
            flags.push("error");
        }
        if self.has_orphan() {
            flags.push("orphan");
        }

        f.debug_struct("State")
            .field("valid", &flags)
            .field("invalid", &self.get_unknown())
            .finish()
    }
}


impl std::fmt::Debug for CompatFeatures {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
    {
        let mut flags: Vec<&str> = Vec::new();

        if self.has_dir_prealloc() {
            flags.push("dir_prealloc");
        }
        if self.has_imagic_inodes() {
            flags.push("imagic_inodes");
        }
        if self.has_has_journal() {
            flags.push("has_journal");
        }
        if self.has_ext_attr() {
            flags.push("ext_attr");
        }
        if self.has_resize_inode() {
            flags.push("resize_inode");
        }
        if self.has_dir_index() {
            flags.push("dir_index");
        }

        f.debug_struct("CompatFeatures")
            .field("valid", &flags)
            .field("invalid", &self.get_unknown())
            .finish()
    }
}


impl std::fmt::Debug for IncompatFeatures {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
    {
        let mut flags: Vec<&str> = Vec::new();

        if self.has_compression() {
            flags.push("compression");
        }
        if self.has_filetype() {
            flags.push("filetype");
        }
        if self.has_recover() {
            flags.push("recover");
        }
        if self.has_journal_dev() {
            flags.push("journal_dev");
        }
        if self.has_meta_bg() {
            flags.push("meta_bg");
        }

        f.debug_struct("IncompatFeatures")
            .field("valid", &flags)
            .field("invalid", &self.get_unknown())
            .finish()
    }
}


impl std::fmt::Debug for RoCompatFeatures {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
    {
        let mut flags: Vec<&str> = Vec::new();

        if self.has_sparse_super() {
            flags.push("sparse_super");
        }
        if self.has_large_file() {
            flags.push("large_file");
        }
        if self.has_btree_dir() {
            flags.push("btree_dir");
        }

        f.debug_struct("RoCompatFeatures")
            .field("valid", &flags)
            .field("invalid", &self.get_unknown())
            .finish()
    }
}


// Tests.


#[cfg(test)]
mod tests {
    use super::*;

    mod superblock {
        use super::*;
        use bincode::{DefaultOptions, Options};

        #[test]
        fn serialized_size_is_one_block()
        {
            let bincode_opt = DefaultOptions::new()
                .with_fixint_encoding()
                .allow_trailing_bytes();

            let raw = bincode_opt.serialize(&SuperBlock::default()).unwrap();
            assert_eq!(raw.len(), 1024);
        }

        #[test]
        fn journal_fields_land_at_their_offsets()
        {
            let bincode_opt = DefaultOptions::new()
                .with_fixint_encoding()
                .allow_trailing_bytes();

            let mut sb = SuperBlock::default();
            sb.s_journal_uuid = [0xaa; 16];
            sb.s_journal_inum = 8;
            sb.s_journal_dev = 0x0103;

            let raw = bincode_opt.serialize(&sb).unwrap();

            // Offsets from the ext2 layout: s_journal_uuid at 0xd0,
            // s_journal_inum at 0xe0, s_journal_dev at 0xe4.
            assert_eq!(&raw[0xd0..0xe0], &[0xaa; 16]);
            assert_eq!(&raw[0xe0..0xe4], &8u32.to_le_bytes());
            assert_eq!(&raw[0xe4..0xe8], &0x0103u32.to_le_bytes());
        }
    }

    mod fs {
        use super::*;
        use crate::testimg;

        #[test]
        fn open_computes_the_geometry()
        {
            let (ctx, _, _) = testimg::mk_ctx(testimg::base_image(), &[], false);

            assert_eq!(ctx.fs.block_size, 1024);
            assert_eq!(ctx.fs.bg_count, 1);
            assert_eq!(ctx.fs.inode_size, 256);
            assert_eq!(ctx.fs.first_ino(), 11);
            assert_eq!(ctx.fs.io.block_size(), 1024);
        }

        #[test]
        fn descriptor_names_the_inode_table()
        {
            let (ctx, _, _) = testimg::mk_ctx(testimg::base_image(), &[], false);

            let desc = ctx.fs.fetch_bg_descriptor(0).unwrap();
            assert_eq!(desc.bg_inode_table_lo as u64, testimg::ITABLE_BLOCK);
        }

        #[test]
        fn flush_writes_only_when_dirty()
        {
            let (mut ctx, shared, _) = testimg::mk_ctx(testimg::base_image(), &[], false);

            ctx.fs.sb.s_journal_inum = 42;
            ctx.fs.flush().unwrap();

            // Not marked dirty: nothing on disk changed.
            assert_eq!(shared.borrow()[1024 + 0xe0], 8);

            ctx.fs.mark_super_dirty();
            ctx.fs.flush().unwrap();
            assert_eq!(shared.borrow()[1024 + 0xe0], 42);
            assert!(!ctx.fs.super_dirty);
        }

        #[test]
        fn reopen_rereads_the_superblock()
        {
            let (mut ctx, shared, _) = testimg::mk_ctx(testimg::base_image(), &[], false);

            // Change the on-disk inode number behind the cached state.
            shared.borrow_mut()[1024 + 0xe0] = 9;
            assert_eq!(ctx.fs.sb.s_journal_inum, 8);

            ctx.fs.reopen().unwrap();
            assert_eq!(ctx.fs.sb.s_journal_inum, 9);
        }
    }

    mod features {
        use super::*;

        #[test]
        fn known_bits_are_not_unknown()
        {
            let compat = CompatFeatures(0x0004 | 0x0020);
            assert!(compat.has_has_journal());
            assert!(!compat.has_unknown());

            let incompat = IncompatFeatures(0x0002 | 0x0004);
            assert!(incompat.has_recover());
            assert!(!incompat.has_unknown());
        }

        #[test]
        fn unknown_bits_are_reported()
        {
            let compat = CompatFeatures(0x0400);
            assert!(compat.has_unknown());
            assert_eq!(compat.get_unknown(), 0x0400);

            let ro = RoCompatFeatures(0x0010 | 0x0001);
            assert!(ro.has_unknown());
            assert_eq!(ro.get_unknown(), 0x0010);
        }

        #[test]
        fn state_flags()
        {
            let state = State(0x1);
            assert!(state.has_valid());
            assert!(!state.has_unknown());

            let state = State(0x8);
            assert!(state.has_unknown());
        }
    }
}
