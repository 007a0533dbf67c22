use crate::buffer::{self, IoMode};
use crate::error::CheckError;
use crate::filesys::e2fs::inode::bmap;
use crate::Context;

use super::Journal;
use super::sb::{
    COMMIT_BLOCK,
    DESCRIPTOR_BLOCK,
    JOURNAL_HEADER_SIZE,
    JOURNAL_MAGIC,
    REVOKE_BLOCK,
    TAG_FLAG_ESCAPE,
    TAG_FLAG_LAST,
    TAG_FLAG_SAME_UUID,
    TAG_SIZE,
    TAG_UUID_SIZE,
};


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Pass {
    Scan,
    Revoke,
    Replay,
}

#[derive(Debug, Default)]
struct RecoveryInfo {
    start_transaction: u32,
    /// First sequence number for which no commit record was found.
    end_transaction: u32,
    nr_replays: u32,
    nr_revokes: u32,
    nr_revoke_hits: u32,
}


/// Replays every fully-committed transaction left in the log onto the file
/// system, honoring the revoke table attached to the journal.
///
/// Three passes over the same log range: find where the committed
/// transactions end, collect the revoke records for that range, then write
/// every surviving tagged block through the buffer layer.
pub fn journal_recover(ctx: &mut Context, journal: &mut Journal) -> Result<(), CheckError>
{
    // An empty log needs no recovery, but the next transaction still has
    // to follow the last committed one.
    if journal.jsb.s_start == 0 {
        ctx.logger.log(2, &format!(
            "no recovery required, last transaction {}",
            journal.jsb.s_sequence,
        ));
        journal.transaction_sequence = journal.jsb.s_sequence.wrapping_add(1);
        return Ok(());
    }

    let mut info = RecoveryInfo::default();
    do_one_pass(ctx, journal, &mut info, Pass::Scan)?;
    do_one_pass(ctx, journal, &mut info, Pass::Revoke)?;
    do_one_pass(ctx, journal, &mut info, Pass::Replay)?;

    ctx.logger.log(1, &format!(
        "journal recovery: {} blocks replayed, {} revoke records ({} hits), next transaction {}",
        info.nr_replays, info.nr_revokes, info.nr_revoke_hits, info.end_transaction,
    ));

    // Restart the log at the first uncommitted transaction, which makes
    // every commit record still in the log stale.
    journal.transaction_sequence = info.end_transaction;

    Ok(())
}


fn be32(buf: &[u8], off: usize) -> u32
{
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

/// Wraps a log block offset around the end of the log area.
fn wrap(journal: &Journal, block: &mut u32)
{
    if *block >= journal.last {
        *block -= journal.last - journal.first;
    }
}

/// Reads one journal block, addressed by its logical offset within the log.
fn jread(ctx: &mut Context, journal: &Journal, offset: u32) -> Result<Vec<u8>, CheckError>
{
    if offset as u64 >= journal.max_blocks {
        ctx.logger.log(0, &format!(
            "error: {}: journal block {} is out of range",
            ctx.device_name, offset,
        ));
        return Err(CheckError::CorruptSuperblock);
    }

    let phys = bmap(&mut ctx.fs, &journal.inode.raw, offset as u64)?;
    if phys == 0 {
        ctx.logger.log(0, &format!(
            "error: {}: journal block {} maps to a hole",
            ctx.device_name, offset,
        ));
        return Err(CheckError::BadInode);
    }

    let mut bh = buffer::getblk(ctx, phys);
    buffer::wait_on_buffer(ctx, &mut bh);
    if !buffer::buffer_uptodate(&bh) {
        let err = bh.take_err().unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "short journal read")
        });
        buffer::brelse(ctx, bh);
        return Err(err.into());
    }

    let data = bh.data().to_vec();
    buffer::brelse(ctx, bh);
    Ok(data)
}

/// Counts the data blocks a descriptor block covers.
fn count_tags(buf: &[u8]) -> u32
{
    let mut nr = 0;
    let mut off = JOURNAL_HEADER_SIZE;

    while off + TAG_SIZE <= buf.len() {
        let flags = be32(buf, off + 4);

        nr += 1;
        off += TAG_SIZE;
        if flags & TAG_FLAG_SAME_UUID == 0 {
            off += TAG_UUID_SIZE;
        }
        if flags & TAG_FLAG_LAST != 0 {
            break;
        }
    }

    nr
}

fn do_one_pass(
    ctx: &mut Context,
    journal: &mut Journal,
    info: &mut RecoveryInfo,
    pass: Pass,
) -> Result<(), CheckError>
{
    let first_commit_id = journal.jsb.s_sequence;
    let mut next_commit_id = first_commit_id;
    let mut next_log_block = journal.jsb.s_start;

    if pass == Pass::Scan {
        info.start_transaction = first_commit_id;
    }

    loop {
        // Outside the scan, the committed range is already known.
        if pass != Pass::Scan && next_commit_id >= info.end_transaction {
            break;
        }

        let buf = match jread(ctx, journal, next_log_block) {
            Ok(buf) => buf,
            // During the scan, a block that cannot be read just ends the
            // log; the later passes must not run into it at all.
            Err(_) if pass == Pass::Scan => break,
            Err(err) => return Err(err),
        };

        next_log_block += 1;
        wrap(journal, &mut next_log_block);

        if be32(&buf, 0) != JOURNAL_MAGIC {
            break;
        }
        let blocktype = be32(&buf, 4);
        let sequence = be32(&buf, 8);
        if sequence != next_commit_id {
            break;
        }

        match blocktype {
            DESCRIPTOR_BLOCK => {
                if pass == Pass::Replay {
                    next_log_block =
                        replay_descriptor(ctx, journal, info, &buf, sequence, next_log_block)?;
                } else {
                    for _ in 0..count_tags(&buf) {
                        next_log_block += 1;
                        wrap(journal, &mut next_log_block);
                    }
                }
            }
            COMMIT_BLOCK => {
                next_commit_id += 1;
            }
            REVOKE_BLOCK => {
                if pass == Pass::Revoke {
                    scan_revoke_records(journal, info, &buf, sequence);
                }
            }
            _ => break,
        }
    }

    if pass == Pass::Scan {
        info.end_transaction = next_commit_id;
        ctx.logger.log(2, &format!(
            "journal scan: transactions {} to {}",
            info.start_transaction, info.end_transaction,
        ));
    } else if pass == Pass::Replay && next_commit_id != info.end_transaction {
        ctx.logger.log(0, &format!(
            "error: {}: recovery pass ended at transaction {}, expected {}",
            ctx.device_name, next_commit_id, info.end_transaction,
        ));
        return Err(CheckError::CorruptSuperblock);
    }

    Ok(())
}

/// Walks the tags of one descriptor block and writes the data blocks that
/// follow it onto their home locations, unless a revoke cancels them.
/// Returns the log offset of the first block after the transaction's data.
fn replay_descriptor(
    ctx: &mut Context,
    journal: &mut Journal,
    info: &mut RecoveryInfo,
    desc: &[u8],
    sequence: u32,
    mut next_log_block: u32,
) -> Result<u32, CheckError>
{
    let mut off = JOURNAL_HEADER_SIZE;

    while off + TAG_SIZE <= desc.len() {
        let blocknr = be32(desc, off);
        let flags = be32(desc, off + 4);

        off += TAG_SIZE;
        if flags & TAG_FLAG_SAME_UUID == 0 {
            off += TAG_UUID_SIZE;
        }

        let data = jread(ctx, journal, next_log_block)?;
        next_log_block += 1;
        wrap(journal, &mut next_log_block);

        let revoked = journal
            .revoke
            .as_ref()
            .map(|table| table.test_revoke(blocknr as u64, sequence))
            .unwrap_or(false);

        if revoked {
            info.nr_revoke_hits += 1;
            ctx.logger.log(3, &format!("skipping revoked block {}", blocknr));
        } else {
            let mut bh = buffer::getblk(ctx, blocknr as u64);
            bh.data_mut().copy_from_slice(&data);
            if flags & TAG_FLAG_ESCAPE != 0 {
                // The block started with the journal magic; it was blanked
                // when the block was journalled and comes back here.
                bh.data_mut()[..4].copy_from_slice(&JOURNAL_MAGIC.to_be_bytes());
            }

            buffer::mark_buffer_dirty(&mut bh);
            buffer::rw_block(ctx, IoMode::Write, &mut [&mut bh]);
            let err = bh.take_err();
            buffer::brelse(ctx, bh);
            if let Some(err) = err {
                return Err(err.into());
            }

            info.nr_replays += 1;
        }

        if flags & TAG_FLAG_LAST != 0 {
            break;
        }
    }

    Ok(next_log_block)
}

/// Records every block number listed in a revoke block.
fn scan_revoke_records(journal: &mut Journal, info: &mut RecoveryInfo, buf: &[u8], sequence: u32)
{
    // The revoke header is the common header followed by the number of
    // bytes used in this block, including the header itself.
    let count = (be32(buf, JOURNAL_HEADER_SIZE) as usize).min(buf.len());
    let mut off = JOURNAL_HEADER_SIZE + 4;

    if let Some(table) = journal.revoke.as_mut() {
        while off + 4 <= count {
            table.insert(be32(buf, off) as u64, sequence);
            info.nr_revokes += 1;
            off += 4;
        }
    }
}
