use std::collections::HashMap;

use crate::error::CheckError;

use super::Journal;


/// Initial bucket count for the revoke table.
pub const REVOKE_DEFAULT_HASH: usize = 1024;


/// Blocks whose journal records must be ignored during replay because a
/// later transaction invalidated them. Maps a block number to the sequence
/// number of the revoking transaction; the newest revoke wins.
#[derive(Debug)]
pub struct RevokeTable {
    records: HashMap<u64, u32>,
}

impl RevokeTable {
    pub fn new(hash_size: usize) -> Self
    {
        Self {
            records: HashMap::with_capacity(hash_size),
        }
    }

    pub fn insert(&mut self, block: u64, sequence: u32)
    {
        let entry = self.records.entry(block).or_insert(sequence);
        if *entry < sequence {
            *entry = sequence;
        }
    }

    /// Whether replaying `block` from the transaction `sequence` must be
    /// skipped: a revoke recorded at `sequence` or later cancels it.
    pub fn test_revoke(&self, block: u64, sequence: u32) -> bool
    {
        matches!(self.records.get(&block), Some(rec) if *rec >= sequence)
    }

    pub fn len(&self) -> usize
    {
        self.records.len()
    }
}


/// Attaches a fresh revoke table to the journal.
pub fn journal_init_revoke(journal: &mut Journal, hash_size: usize) -> Result<(), CheckError>
{
    journal.revoke = Some(RevokeTable::new(hash_size));
    Ok(())
}
