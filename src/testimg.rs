//! In-memory ext3 image fixtures shared by the module tests.
//!
//! The layout is one block group with 1024-byte blocks: superblock at
//! block 1, descriptor table at block 2, inode table at block 5, and a
//! 1024-block journal file on inode 8 whose data sits contiguously from
//! block 200 (direct blocks, one single-indirect and one double-indirect
//! level deep).

use std::cell::RefCell;
use std::rc::Rc;

use bincode::{DefaultOptions, Options};

use crate::filesys::e2fs::inode::Inode;
use crate::filesys::e2fs::{Fs, GroupDescriptor, SuperBlock, FEATURE_COMPAT_HAS_JOURNAL};
use crate::io::MemChannel;
use crate::journal::sb::{
    self,
    JournalSuperblock,
    COMMIT_BLOCK,
    DESCRIPTOR_BLOCK,
    JOURNAL_MAGIC,
    REVOKE_BLOCK,
    SUPERBLOCK_V2,
    TAG_FLAG_LAST,
    TAG_FLAG_SAME_UUID,
};
use crate::logger::Logger;
use crate::problem::{ProblemCode, ScriptedReporter};
use crate::Context;


pub const BLOCK_SIZE: u64 = 1024;
pub const BLOCKS_COUNT: u64 = 1300;
pub const ITABLE_BLOCK: u64 = 5;
pub const JOURNAL_INO: u32 = 8;
pub const JOURNAL_FIRST_PHYS: u64 = 200;
pub const JOURNAL_BLOCKS: u64 = 1024;

const GDT_BLOCK: u64 = 2;
const SIND_BLOCK: u64 = 150;
const DIND_BLOCK: u64 = 151;
const INODE_SIZE: u64 = 256;


/// A clean ext3 superblock matching the fixture geometry.
pub fn base_sb() -> SuperBlock
{
    let mut sb = SuperBlock::default();
    sb.s_inodes_count = 16;
    sb.s_blocks_count_lo = BLOCKS_COUNT as u32;
    sb.s_first_data_block = 1;
    sb.s_log_block_size = 0;
    sb.s_blocks_per_group = 8192;
    sb.s_clusters_per_group = 8192;
    sb.s_inodes_per_group = 16;
    sb.s_magic = 0xef53;
    sb.s_state = 0x1;
    sb.s_errors = 1;
    sb.s_rev_level = 1;
    sb.s_first_ino = 11;
    sb.s_inode_size = INODE_SIZE as u16;
    sb.s_feature_compat = FEATURE_COMPAT_HAS_JOURNAL;
    sb.s_feature_incompat = 0x0002;
    sb.s_feature_ro_compat = 0x0001;
    sb.s_journal_inum = JOURNAL_INO;
    sb
}

/// The journal file's inode.
pub fn journal_inode() -> Inode
{
    let mut inode = Inode::default();
    inode.i_mode = 0x81a4;
    inode.i_links_count = 1;
    inode.i_size_lo = (JOURNAL_BLOCKS * BLOCK_SIZE) as u32;
    inode.i_blocks_lo = (JOURNAL_BLOCKS * 2) as u32;

    for i in 0..12 {
        inode.i_block[i] = (JOURNAL_FIRST_PHYS + i as u64) as u32;
    }
    inode.i_block[12] = SIND_BLOCK as u32;
    inode.i_block[13] = DIND_BLOCK as u32;

    inode
}

/// A valid journal superblock: V2, empty log.
pub fn default_jsb() -> JournalSuperblock
{
    let mut jsb = JournalSuperblock::default();
    jsb.s_header.h_magic = JOURNAL_MAGIC;
    jsb.s_header.h_blocktype = SUPERBLOCK_V2;
    jsb.s_blocksize = BLOCK_SIZE as u32;
    jsb.s_maxlen = JOURNAL_BLOCKS as u32;
    jsb.s_first = 1;
    jsb.s_sequence = 1;
    jsb.s_start = 0;
    jsb
}


pub fn write_sb(img: &mut [u8], sb: &SuperBlock)
{
    let bincode_opt = DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes();

    let raw = bincode_opt.serialize(sb).unwrap();
    img[1024..1024 + raw.len()].copy_from_slice(&raw);
}

pub fn write_inode(img: &mut [u8], ino: u32, inode: &Inode)
{
    let bincode_opt = DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes();

    let raw = bincode_opt.serialize(inode).unwrap();
    let off = (ITABLE_BLOCK * BLOCK_SIZE + (ino as u64 - 1) * INODE_SIZE) as usize;
    img[off..off + raw.len()].copy_from_slice(&raw);
}

pub fn write_journal_sb(img: &mut [u8], jsb: &JournalSuperblock)
{
    let off = (JOURNAL_FIRST_PHYS * BLOCK_SIZE) as usize;
    img[off..off + BLOCK_SIZE as usize].fill(0);
    sb::encode_into(jsb, &mut img[off..off + BLOCK_SIZE as usize]).unwrap();
}

/// Reads the journal superblock back out of the image.
pub fn read_journal_sb(shared: &Rc<RefCell<Vec<u8>>>) -> JournalSuperblock
{
    let img = shared.borrow();
    let off = (JOURNAL_FIRST_PHYS * BLOCK_SIZE) as usize;
    sb::decode(&img[off..off + BLOCK_SIZE as usize]).unwrap()
}

/// Places a block at a logical offset within the journal file.
pub fn put_journal_block(img: &mut [u8], logical: u64, block: &[u8])
{
    assert_eq!(block.len(), BLOCK_SIZE as usize);

    let off = ((JOURNAL_FIRST_PHYS + logical) * BLOCK_SIZE) as usize;
    img[off..off + block.len()].copy_from_slice(block);
}


/// Builds a complete image around the given superblock.
pub fn build_image(sb: &SuperBlock) -> Vec<u8>
{
    let mut img = vec![0u8; (BLOCKS_COUNT * BLOCK_SIZE) as usize];

    write_sb(&mut img, sb);

    let bincode_opt = DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes();

    let mut desc = GroupDescriptor::default();
    desc.bg_block_bitmap_lo = 3;
    desc.bg_inode_bitmap_lo = 4;
    desc.bg_inode_table_lo = ITABLE_BLOCK as u32;
    let raw = bincode_opt.serialize(&desc).unwrap();
    let off = (GDT_BLOCK * BLOCK_SIZE) as usize;
    img[off..off + raw.len()].copy_from_slice(&raw);

    write_inode(&mut img, JOURNAL_INO, &journal_inode());

    // Indirect mapping: the journal file is contiguous on disk, so each
    // entry is just first-physical plus the logical offset.
    let ppb = (BLOCK_SIZE / 4) as u64;

    for k in 0..ppb {
        let logical = 12 + k;
        put_le32(&mut img, SIND_BLOCK, k, (JOURNAL_FIRST_PHYS + logical) as u32);
    }

    for j in 0..3u64 {
        put_le32(&mut img, DIND_BLOCK, j, (SIND_BLOCK + 1 + j) as u32);
        for k in 0..ppb {
            let logical = 12 + ppb + j * ppb + k;
            put_le32(
                &mut img,
                SIND_BLOCK + 1 + j,
                k,
                (JOURNAL_FIRST_PHYS + logical) as u32,
            );
        }
    }

    write_journal_sb(&mut img, &default_jsb());

    img
}

fn put_le32(img: &mut [u8], block: u64, idx: u64, value: u32)
{
    let off = (block * BLOCK_SIZE + idx * 4) as usize;
    img[off..off + 4].copy_from_slice(&value.to_le_bytes());
}

/// The standard fixture: a clean ext3 image with an empty journal.
pub fn base_image() -> Vec<u8>
{
    build_image(&base_sb())
}


// Journal log blocks.


fn header_block(blocktype: u32, sequence: u32) -> Vec<u8>
{
    let mut block = vec![0u8; BLOCK_SIZE as usize];
    block[0..4].copy_from_slice(&JOURNAL_MAGIC.to_be_bytes());
    block[4..8].copy_from_slice(&blocktype.to_be_bytes());
    block[8..12].copy_from_slice(&sequence.to_be_bytes());
    block
}

/// A descriptor block; each tag is `(home block, extra flags)`. The first
/// tag carries the (zero) UUID, the rest are marked same-UUID, the final
/// one closes the block.
pub fn desc_block(sequence: u32, tags: &[(u32, u32)]) -> Vec<u8>
{
    let mut block = header_block(DESCRIPTOR_BLOCK, sequence);
    let mut off = 12;

    for (i, (blocknr, extra)) in tags.iter().enumerate() {
        let mut flags = *extra;
        if i > 0 {
            flags |= TAG_FLAG_SAME_UUID;
        }
        if i == tags.len() - 1 {
            flags |= TAG_FLAG_LAST;
        }

        block[off..off + 4].copy_from_slice(&blocknr.to_be_bytes());
        block[off + 4..off + 8].copy_from_slice(&flags.to_be_bytes());
        off += 8;
        if i == 0 {
            off += 16;
        }
    }

    block
}

pub fn commit_block(sequence: u32) -> Vec<u8>
{
    header_block(COMMIT_BLOCK, sequence)
}

/// A revoke block listing the given home blocks.
pub fn revoke_block(sequence: u32, blocks: &[u32]) -> Vec<u8>
{
    let mut block = header_block(REVOKE_BLOCK, sequence);
    let count = 16 + 4 * blocks.len() as u32;
    block[12..16].copy_from_slice(&count.to_be_bytes());

    let mut off = 16;
    for b in blocks {
        block[off..off + 4].copy_from_slice(&b.to_be_bytes());
        off += 4;
    }

    block
}

pub fn data_block(fill: u8) -> Vec<u8>
{
    vec![fill; BLOCK_SIZE as usize]
}


/// Opens the image and wires up a context with a scripted reporter.
/// Returns the context, a handle on the image bytes and a handle on the
/// list of problems that were asked.
pub fn mk_ctx(
    img: Vec<u8>,
    answers: &[bool],
    readonly: bool,
) -> (Context, Rc<RefCell<Vec<u8>>>, Rc<RefCell<Vec<ProblemCode>>>)
{
    let (chan, shared) = MemChannel::new(img, BLOCK_SIZE);
    let fs = Fs::open(Box::new(chan)).unwrap();
    let (reporter, asked) = ScriptedReporter::new(answers);

    let ctx = Context {
        device_name: "test-image".into(),
        readonly,
        logger: Logger::new(0, None),
        reporter: Box::new(reporter),
        fs,
    };

    (ctx, shared, asked)
}
