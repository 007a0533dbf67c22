#![allow(dead_code)]
use bincode::{DefaultOptions, Options};
use serde::{Deserialize, Serialize};

use crate::array::Array;


/// Magic number at the start of every journal block.
pub const JOURNAL_MAGIC: u32 = 0xc03b_3998;

// Block types (h_blocktype).
pub const SUPERBLOCK_V1: u32 = 1;
pub const SUPERBLOCK_V2: u32 = 2;
pub const DESCRIPTOR_BLOCK: u32 = 3;
pub const COMMIT_BLOCK: u32 = 4;
pub const REVOKE_BLOCK: u32 = 5;

// Per-tag flags in a descriptor block.
pub const TAG_FLAG_ESCAPE: u32 = 1;
pub const TAG_FLAG_SAME_UUID: u32 = 2;
pub const TAG_FLAG_DELETED: u32 = 4;
pub const TAG_FLAG_LAST: u32 = 8;

/// Size of an on-disk block tag. The first tag of every descriptor block is
/// followed by a 16-byte UUID; later tags carry `TAG_FLAG_SAME_UUID` instead.
pub const TAG_SIZE: usize = 8;
pub const TAG_UUID_SIZE: usize = 16;

/// Minimum legal journal length, in blocks.
pub const MIN_JOURNAL_BLOCKS: u64 = 1024;

/// Size of the common header at the start of every journal block.
pub const JOURNAL_HEADER_SIZE: usize = 12;

/// Serialized size of the journal superblock.
pub const JOURNAL_SUPERBLOCK_SIZE: usize = 1024;


/// Common header of every journal block. Big-endian on disk.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JournalHeader {
    pub h_magic: u32,
    pub h_blocktype: u32,
    pub h_sequence: u32,
}


/// The journal superblock. All integer fields are big-endian on disk.
/// The V1 layout ends after `s_errno`; a V1 journal carries whatever bytes
/// happen to be on disk in the remaining fields, and they must be ignored.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JournalSuperblock {
    pub s_header: JournalHeader,
    // Static information describing the journal.
    pub s_blocksize: u32, // journal device block size
    pub s_maxlen: u32,    // total blocks in journal file
    pub s_first: u32,     // first block of log information
    // Dynamic information describing the current state of the log.
    pub s_sequence: u32,  // first commit ID expected in log
    pub s_start: u32,     // block number of start of log; 0 = empty
    pub s_errno: i32,     // error value set by a journal abort
    // --- V2 only ---
    pub s_feature_compat: u32,    // compatible feature set
    pub s_feature_incompat: u32,  // incompatible feature set
    pub s_feature_ro_compat: u32, // readonly-compatible feature set
    pub s_uuid: [u8; 16],         // 128-bit uuid for journal
    pub s_nr_users: u32,          // nr of file systems sharing the log
    pub s_dynsuper: u32,          // block number of dynamic superblock copy
    pub s_max_transaction: u32,   // limit of journal blocks per transaction
    pub s_max_trans_data: u32,    // limit of data blocks per transaction
    pub s_padding: Array<u32, 44>,
    pub s_users: Array<u8, 768>,  // ids of all file systems sharing the log
}


/// Journal incompatible features (s_feature_incompat).
#[derive(Copy, Clone)]
pub struct JIncompatFeatures(pub u32);

impl JIncompatFeatures {
    pub fn has_revoke(&self) -> bool { self.0 & 0x00001 != 0 }

    pub fn get_unknown(&self) -> u32
    {
        self.0 & !0x00001
    }

    pub fn has_unknown(&self) -> bool
    {
        self.get_unknown() != 0
    }
}


/// Journal read-only compatible features (s_feature_ro_compat).
/// No bits are known yet.
#[derive(Copy, Clone)]
pub struct JRoCompatFeatures(pub u32);

impl JRoCompatFeatures {
    pub fn get_unknown(&self) -> u32
    {
        self.0
    }

    pub fn has_unknown(&self) -> bool
    {
        self.get_unknown() != 0
    }
}


/// Parses a journal superblock out of the leading bytes of a block.
pub fn decode(bytes: &[u8]) -> bincode::Result<JournalSuperblock>
{
    let bincode_opt = DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_big_endian();

    bincode_opt.deserialize(bytes)
}

/// Emits a journal superblock into the leading bytes of a block, leaving
/// anything past `JOURNAL_SUPERBLOCK_SIZE` untouched.
pub fn encode_into(jsb: &JournalSuperblock, out: &mut [u8]) -> bincode::Result<()>
{
    let bincode_opt = DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_big_endian();

    let raw = bincode_opt.serialize(jsb)?;
    out[..raw.len()].copy_from_slice(&raw);

    Ok(())
}


// Tests.


#[cfg(test)]
mod tests {
    use super::*;

    fn be32_at(buf: &[u8], off: usize) -> u32
    {
        u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
    }

    fn sample() -> JournalSuperblock
    {
        let mut jsb = JournalSuperblock::default();
        jsb.s_header.h_magic = JOURNAL_MAGIC;
        jsb.s_header.h_blocktype = SUPERBLOCK_V2;
        jsb.s_blocksize = 1024;
        jsb.s_maxlen = 2048;
        jsb.s_first = 1;
        jsb.s_sequence = 7;
        jsb.s_start = 42;
        jsb.s_feature_incompat = 0x1;
        jsb.s_uuid = [0x5a; 16];
        jsb.s_nr_users = 1;
        jsb

    }

    mod codec {
        use super::*;

        #[test]
        fn serialized_size()
        {
            let mut out = vec![0xffu8; 2048];
            encode_into(&sample(), &mut out).unwrap();

            // Exactly the superblock region is written.
            assert_eq!(out[JOURNAL_SUPERBLOCK_SIZE], 0xff);
            assert_ne!(out[0], 0xff);
        }

        #[test]
        fn fields_land_at_their_wire_offsets()
        {
            let mut out = vec![0u8; JOURNAL_SUPERBLOCK_SIZE];
            encode_into(&sample(), &mut out).unwrap();

            assert_eq!(be32_at(&out, 0), JOURNAL_MAGIC);
            assert_eq!(be32_at(&out, 4), SUPERBLOCK_V2);
            assert_eq!(be32_at(&out, 12), 1024); // block size
            assert_eq!(be32_at(&out, 16), 2048); // maxlen
            assert_eq!(be32_at(&out, 20), 1);    // first
            assert_eq!(be32_at(&out, 24), 7);    // sequence
            assert_eq!(be32_at(&out, 28), 42);   // start
            assert_eq!(be32_at(&out, 40), 0x1);  // incompat features
            assert_eq!(&out[48..64], &[0x5a; 16]); // uuid
        }

        #[test]
        fn decode_reads_big_endian()
        {
            let mut raw = vec![0u8; JOURNAL_SUPERBLOCK_SIZE];
            raw[0..4].copy_from_slice(&JOURNAL_MAGIC.to_be_bytes());
            raw[4..8].copy_from_slice(&SUPERBLOCK_V1.to_be_bytes());
            raw[12..16].copy_from_slice(&4096u32.to_be_bytes());
            raw[16..20].copy_from_slice(&1024u32.to_be_bytes());
            raw[24..28].copy_from_slice(&9u32.to_be_bytes());
            raw[28..32].copy_from_slice(&3u32.to_be_bytes());

            let jsb = decode(&raw).unwrap();

            assert_eq!(jsb.s_header.h_magic, JOURNAL_MAGIC);
            assert_eq!(jsb.s_header.h_blocktype, SUPERBLOCK_V1);
            assert_eq!(jsb.s_blocksize, 4096);
            assert_eq!(jsb.s_maxlen, 1024);
            assert_eq!(jsb.s_sequence, 9);
            assert_eq!(jsb.s_start, 3);
        }

        #[test]
        fn roundtrip_preserves_every_field()
        {
            let jsb = sample();

            let mut out = vec![0u8; JOURNAL_SUPERBLOCK_SIZE];
            encode_into(&jsb, &mut out).unwrap();
            let back = decode(&out).unwrap();

            assert_eq!(jsb, back);

            // And encoding the parsed copy again is byte-identical.
            let mut out2 = vec![0u8; JOURNAL_SUPERBLOCK_SIZE];
            encode_into(&back, &mut out2).unwrap();
            assert_eq!(out, out2);
        }
    }

    mod features {
        use super::*;

        #[test]
        fn revoke_is_known()
        {
            let incompat = JIncompatFeatures(0x1);
            assert!(incompat.has_revoke());
            assert!(!incompat.has_unknown());
        }

        #[test]
        fn anything_else_is_unknown()
        {
            let incompat = JIncompatFeatures(0x2 | 0x1);
            assert!(incompat.has_unknown());
            assert_eq!(incompat.get_unknown(), 0x2);

            let ro = JRoCompatFeatures(0x1);
            assert!(ro.has_unknown());
        }
    }
}
