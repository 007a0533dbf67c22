use uuid::Uuid;

use crate::buffer::{self, BufferHead, IoMode};
use crate::error::CheckError;
use crate::filesys::e2fs::{
    FEATURE_COMPAT_HAS_JOURNAL,
    FEATURE_INCOMPAT_RECOVER,
    STATE_VALID_FS,
};
use crate::filesys::e2fs::inode::{self, IMode, Inode};
use crate::problem::{ProblemCode, ProblemContext};
use crate::Context;

pub mod recover;
pub mod revoke;
pub mod sb;

use revoke::RevokeTable;
use sb::JournalSuperblock;


/// The journal file of the file system under check: the inode number, the
/// raw inode record, and through it the logical-to-physical block mapping.
#[derive(Debug)]
pub struct JournalInode {
    pub ino: u32,
    pub raw: Inode,
}


/// The in-memory journal handle.
///
/// Holds the live-log window parsed from the on-disk journal superblock and
/// an owning handle on the superblock's buffer; the buffer is written back
/// exactly once, when the journal is released.
#[derive(Debug)]
pub struct Journal {
    pub inode: JournalInode,
    pub block_size: u64,
    /// Journal length in blocks, capped by the on-disk `s_maxlen`.
    pub max_blocks: u64,
    /// 1 or 2, after a successful load.
    pub format_version: u32,
    pub tail_sequence: u32,
    pub transaction_sequence: u32,
    pub first: u32,
    pub tail: u32,
    pub last: u32,
    pub sb_buffer: BufferHead,
    pub jsb: JournalSuperblock,
    pub revoke: Option<RevokeTable>,
}


/// Resolves the journal inode into a journal handle: validates the inode,
/// maps its first block and allocates the superblock buffer. No I/O on the
/// journal itself happens yet.
fn journal_init_inode(ctx: &mut Context, journal_inum: u32) -> Result<Journal, CheckError>
{
    ctx.logger.log(2, &format!("using journal inode {}", journal_inum));

    let raw = inode::fetch_inode(&mut ctx.fs, journal_inum)?;

    let block_size = ctx.fs.block_size;
    let max_blocks = raw.i_size_lo as u64 / block_size;

    if raw.i_links_count == 0
        || !IMode(raw.i_mode).is_regular()
        || max_blocks < sb::MIN_JOURNAL_BLOCKS
    {
        return Err(CheckError::BadInode);
    }

    let start = inode::bmap(&mut ctx.fs, &raw, 0)?;
    if start == 0 {
        return Err(CheckError::BadInode);
    }

    let sb_buffer = buffer::getblk(ctx, start);

    Ok(Journal {
        inode: JournalInode {
            ino: journal_inum,
            raw,
        },
        block_size,
        max_blocks,
        format_version: 0,
        tail_sequence: 0,
        transaction_sequence: 0,
        first: 0,
        tail: 0,
        last: 0,
        sb_buffer,
        jsb: JournalSuperblock::default(),
        revoke: None,
    })
}

/// Reconciles the external-journal fields of the file system superblock
/// with the has-journal feature, then resolves the journal inode.
/// External journals are unsupported; each stale field is offered for
/// clearing, and a decline surfaces as an unsupported-feature error.
pub(crate) fn get_journal(ctx: &mut Context) -> Result<Journal, CheckError>
{
    let mut pctx = ProblemContext::default();

    if ctx.fs.sb.s_feature_compat & FEATURE_COMPAT_HAS_JOURNAL != 0 {
        if ctx.fs.sb.s_journal_dev != 0 {
            pctx.num = ctx.fs.sb.s_journal_dev as u64;
            if !ctx.reporter.ask(ProblemCode::JournalUnsuppDev, &pctx) {
                return Err(CheckError::Unsupported);
            }
            ctx.fs.sb.s_journal_dev = 0;
            ctx.fs.sb.s_state &= !STATE_VALID_FS;
            ctx.fs.mark_super_dirty();
        }
        if ctx.fs.sb.s_journal_uuid != [0u8; 16] {
            pctx.str = Some(Uuid::from_bytes(ctx.fs.sb.s_journal_uuid).to_string());
            if !ctx.reporter.ask(ProblemCode::JournalUnsuppUuid, &pctx) {
                return Err(CheckError::Unsupported);
            }
            ctx.fs.sb.s_journal_uuid = [0u8; 16];
            ctx.fs.sb.s_state &= !STATE_VALID_FS;
            ctx.fs.mark_super_dirty();
        }
        if ctx.fs.sb.s_journal_inum == 0 {
            return Err(CheckError::BadInode);
        }
    }

    if ctx.fs.sb.s_journal_dev != 0 {
        pctx.num = ctx.fs.sb.s_journal_dev as u64;
        if !ctx.reporter.ask(ProblemCode::JournalBadDev, &pctx) {
            return Err(CheckError::Unsupported);
        }
        ctx.fs.sb.s_journal_dev = 0;
        ctx.fs.sb.s_state &= !STATE_VALID_FS;
        ctx.fs.mark_super_dirty();
    }
    if ctx.fs.sb.s_journal_uuid != [0u8; 16] {
        pctx.str = Some(Uuid::from_bytes(ctx.fs.sb.s_journal_uuid).to_string());
        if !ctx.reporter.ask(ProblemCode::JournalBadUuid, &pctx) {
            return Err(CheckError::Unsupported);
        }
        ctx.fs.sb.s_journal_uuid = [0u8; 16];
        ctx.fs.sb.s_state &= !STATE_VALID_FS;
        ctx.fs.mark_super_dirty();
    }

    journal_init_inode(ctx, ctx.fs.sb.s_journal_inum)
}

/// Reads and validates the on-disk journal superblock, and populates the
/// live-log window of the handle.
pub(crate) fn journal_load(ctx: &mut Context, journal: &mut Journal) -> Result<(), CheckError>
{
    buffer::rw_block(ctx, IoMode::Read, &mut [&mut journal.sb_buffer]);
    if let Some(err) = journal.sb_buffer.take_err() {
        ctx.logger.log(0, &format!(
            "error: {}: while reading journal superblock",
            ctx.device_name,
        ));
        return Err(err.into());
    }

    journal.jsb = sb::decode(journal.sb_buffer.data())?;
    let jsb = &journal.jsb;

    // Without even the magic number, the inode number almost certainly
    // names the wrong object.
    if jsb.s_header.h_magic != sb::JOURNAL_MAGIC {
        return Err(CheckError::BadInode);
    }

    journal.format_version = match jsb.s_header.h_blocktype {
        sb::SUPERBLOCK_V1 => 1,
        sb::SUPERBLOCK_V2 => 2,
        // A magic number with an unknown major type is likely a newer
        // format; leave it alone.
        _ => {
            ctx.logger.log(0, &format!(
                "{}: journal has unrecognised format",
                ctx.device_name,
            ));
            return Err(CheckError::Unsupported);
        }
    };

    // The feature sets only exist in the V2 layout.
    if journal.format_version >= 2 {
        if sb::JIncompatFeatures(jsb.s_feature_incompat).has_unknown() {
            ctx.logger.log(0, &format!(
                "{}: journal has incompatible features",
                ctx.device_name,
            ));
            return Err(CheckError::Unsupported);
        }
        if sb::JRoCompatFeatures(jsb.s_feature_ro_compat).has_unknown() {
            ctx.logger.log(0, &format!(
                "{}: journal has readonly-incompatible features",
                ctx.device_name,
            ));
            return Err(CheckError::ReadOnlyUnsupported);
        }
    }

    // From here on, everything that fails is worth attempting to recover
    // from interactively.
    if jsb.s_blocksize as u64 != journal.block_size {
        ctx.logger.log(0, &format!(
            "{}: no valid journal superblock found",
            ctx.device_name,
        ));
        return Err(CheckError::CorruptSuperblock);
    }

    if (jsb.s_maxlen as u64) < journal.max_blocks {
        journal.max_blocks = jsb.s_maxlen as u64;
    } else if (jsb.s_maxlen as u64) > journal.max_blocks {
        ctx.logger.log(0, &format!("{}: journal too short", ctx.device_name));
        return Err(CheckError::CorruptSuperblock);
    }

    journal.tail_sequence = jsb.s_sequence;
    journal.transaction_sequence = journal.tail_sequence;
    journal.tail = jsb.s_start;
    journal.first = jsb.s_first;
    journal.last = journal.max_blocks as u32;

    Ok(())
}

/// Rewrites a corrupted journal superblock in place and pushes it to disk.
fn reset_journal_super(ctx: &mut Context, journal: &mut Journal) -> Result<(), CheckError>
{
    let jsb = &mut journal.jsb;

    // Leave a valid existing V1 signature alone; anything unrecognisable
    // is overwritten with a fresh V2 signature.
    if jsb.s_header.h_magic != sb::JOURNAL_MAGIC
        || jsb.s_header.h_blocktype != sb::SUPERBLOCK_V1
    {
        jsb.s_header.h_magic = sb::JOURNAL_MAGIC;
        jsb.s_header.h_blocktype = sb::SUPERBLOCK_V2;
    }

    // Everything beyond the header starts over from zero.
    let header = jsb.s_header;
    *jsb = JournalSuperblock::default();
    jsb.s_header = header;

    jsb.s_blocksize = ctx.fs.block_size as u32;
    jsb.s_maxlen = journal.max_blocks as u32;
    jsb.s_first = 1;
    jsb.s_sequence = 1;

    // In theory the rest of the journal should be re-zeroed as well; the
    // fresh sequence number combined with the empty start makes stale
    // records unrecognisable in practice.

    for b in journal.sb_buffer.data_mut()[sb::JOURNAL_HEADER_SIZE..].iter_mut() {
        *b = 0;
    }
    sb::encode_into(&journal.jsb, journal.sb_buffer.data_mut())?;

    buffer::mark_buffer_dirty(&mut journal.sb_buffer);
    buffer::rw_block(ctx, IoMode::Write, &mut [&mut journal.sb_buffer]);
    if let Some(err) = journal.sb_buffer.take_err() {
        return Err(err.into());
    }

    Ok(())
}

/// Clears the needs-recovery flag; a recovery that failed (or never ran to
/// completion) additionally clears the valid-fs state so a full check
/// follows.
fn clear_recover(ctx: &mut Context, error: bool)
{
    ctx.fs.sb.s_feature_incompat &= !FEATURE_INCOMPAT_RECOVER;

    if error {
        ctx.fs.sb.s_state &= !STATE_VALID_FS;
    }
    ctx.fs.mark_super_dirty();
}

/// The bad-inode repair path: offers to delete the journal, or, with no
/// journal to delete, to clear a stray needs-recovery flag.
fn fix_bad_inode(ctx: &mut Context, pctx: &ProblemContext) -> Result<(), CheckError>
{
    let has_journal = ctx.fs.sb.s_feature_compat & FEATURE_COMPAT_HAS_JOURNAL != 0;
    let recover = ctx.fs.sb.s_feature_incompat & FEATURE_INCOMPAT_RECOVER != 0;

    if has_journal || ctx.fs.sb.s_journal_inum != 0 {
        if ctx.reporter.ask(ProblemCode::JournalBadInode, pctx) {
            if has_journal && ctx.fs.sb.s_journal_inum != 0 {
                ctx.logger.log(0,
                    "*** journal has been deleted - file system is now ext2 only ***");
            }
            ctx.fs.sb.s_feature_compat &= !FEATURE_COMPAT_HAS_JOURNAL;
            ctx.fs.sb.s_journal_inum = 0;
            clear_recover(ctx, true);
            return Ok(());
        }
        return Err(CheckError::BadInode);
    } else if recover {
        if ctx.reporter.ask(ProblemCode::JournalRecoverSet, pctx) {
            clear_recover(ctx, true);
            return Ok(());
        }
        return Err(CheckError::Unsupported);
    }

    Ok(())
}

/// An unrecognised journal format: first choice is to abort; declining
/// falls through to deleting the journal via the bad-inode path.
fn fix_unsupported_super(ctx: &mut Context, pctx: &ProblemContext) -> Result<(), CheckError>
{
    if ctx.fs.sb.s_feature_compat & FEATURE_COMPAT_HAS_JOURNAL != 0
        && ctx.reporter.ask(ProblemCode::JournalUnsuppSuper, pctx)
    {
        return Err(CheckError::CorruptSuperblock);
    }

    if fix_bad_inode(ctx, pctx).is_err() {
        return Err(CheckError::Unsupported);
    }

    Ok(())
}

/// A structurally-corrupt journal superblock: offers to rewrite it from
/// scratch, which also puts the log back at sequence 1 with no pending
/// recovery.
fn fix_corrupt_super(
    ctx: &mut Context,
    journal: &mut Journal,
    pctx: &mut ProblemContext,
) -> Result<(), CheckError>
{
    let recover = ctx.fs.sb.s_feature_incompat & FEATURE_INCOMPAT_RECOVER != 0;
    pctx.ino = journal.inode.ino;

    if ctx.fs.sb.s_feature_compat & FEATURE_COMPAT_HAS_JOURNAL != 0 {
        if ctx.reporter.ask(ProblemCode::JournalBadSuper, pctx) {
            reset_journal_super(ctx, journal)?;
            journal.transaction_sequence = 1;
            clear_recover(ctx, recover);
            return Ok(());
        }
        return Err(CheckError::CorruptSuperblock);
    } else if fix_bad_inode(ctx, pctx).is_err() {
        return Err(CheckError::CorruptSuperblock);
    }

    Ok(())
}

/// Releases the journal handle. On a writable image the committed sequence
/// number goes back into the superblock first, and a requested reset zeroes
/// the start offset, which marks the log as empty; the buffer write-back
/// happens on release.
fn journal_release(ctx: &mut Context, mut journal: Journal, reset: bool)
{
    if !ctx.readonly {
        journal.jsb.s_sequence = journal.transaction_sequence;
        if reset {
            journal.jsb.s_start = 0;
        }
        if sb::encode_into(&journal.jsb, journal.sb_buffer.data_mut()).is_ok() {
            buffer::mark_buffer_dirty(&mut journal.sb_buffer);
        }
    }

    buffer::brelse(ctx, journal.sb_buffer);
}

/// Frees a journal handle without touching the superblock on disk.
pub(crate) fn drop_journal(ctx: &mut Context, journal: Journal)
{
    buffer::brelse(ctx, journal.sb_buffer);
}

/// Makes the superblock fields regarding the journal mutually consistent.
///
/// On success either every advertisement agrees and a journal is available
/// for recovery, or the journal has been administratively removed and all
/// of them are clear, with the valid-fs state cleared where a full check
/// must follow.
pub fn check_journal(ctx: &mut Context) -> Result<(), CheckError>
{
    let sb = &ctx.fs.sb;
    let recover = sb.s_feature_incompat & FEATURE_INCOMPAT_RECOVER != 0;
    let has_journal = sb.s_feature_compat & FEATURE_COMPAT_HAS_JOURNAL != 0;

    // If we don't have any journal features, don't do anything more.
    if !has_journal
        && !recover
        && sb.s_journal_inum == 0
        && sb.s_journal_dev == 0
        && sb.s_journal_uuid == [0u8; 16]
    {
        return Ok(());
    }

    let mut pctx = ProblemContext::default();
    pctx.ino = ctx.fs.sb.s_journal_inum;

    let mut journal = match get_journal(ctx) {
        Ok(journal) => journal,
        Err(CheckError::BadInode) => return fix_bad_inode(ctx, &pctx),
        Err(err) => return Err(err),
    };

    match journal_load(ctx, &mut journal) {
        Ok(()) => (),
        Err(CheckError::CorruptSuperblock) => {
            let res = fix_corrupt_super(ctx, &mut journal, &mut pctx);
            drop_journal(ctx, journal);
            return res;
        }
        Err(CheckError::BadInode) => {
            drop_journal(ctx, journal);
            return fix_bad_inode(ctx, &pctx);
        }
        Err(CheckError::Unsupported) => {
            drop_journal(ctx, journal);
            return fix_unsupported_super(ctx, &pctx);
        }
        Err(err) => {
            drop_journal(ctx, journal);
            return Err(err);
        }
    }

    // Make the flags consistent: we will not leave with needs-recovery set
    // but has-journal clear. The loop can only repeat while the user keeps
    // reversing their answers.
    let mut reset = false;

    loop {
        if ctx.fs.sb.s_feature_compat & FEATURE_COMPAT_HAS_JOURNAL != 0 {
            break;
        }

        let recover = ctx.fs.sb.s_feature_incompat & FEATURE_INCOMPAT_RECOVER != 0;
        pctx.str = Some("inode".into());

        if ctx.reporter.ask(ProblemCode::JournalHasJournal, &pctx) {
            if recover && !ctx.reporter.ask(ProblemCode::JournalRecoverSet, &pctx) {
                continue;
            }

            // Releasing a journal stored on a reserved inode needs a full
            // check afterwards.
            let force_fsck = recover
                || ctx.fs.sb.s_journal_inum < ctx.fs.first_ino();

            // Clear all of the journal fields.
            ctx.fs.sb.s_journal_inum = 0;
            ctx.fs.sb.s_journal_dev = 0;
            ctx.fs.sb.s_journal_uuid = [0u8; 16];
            clear_recover(ctx, force_fsck);
        } else if !ctx.readonly {
            ctx.fs.sb.s_feature_compat |= FEATURE_COMPAT_HAS_JOURNAL;
            ctx.fs.mark_super_dirty();
        }
        break;
    }

    if ctx.fs.sb.s_feature_compat & FEATURE_COMPAT_HAS_JOURNAL != 0
        && ctx.fs.sb.s_feature_incompat & FEATURE_INCOMPAT_RECOVER == 0
        && journal.jsb.s_start != 0
    {
        if ctx.reporter.ask(ProblemCode::JournalResetJournal, &pctx) {
            reset = true;
            ctx.fs.sb.s_state &= !STATE_VALID_FS;
            ctx.fs.mark_super_dirty();
        }
        // Declining leaves the journal alone. The log looks like it has
        // data and a mounting kernel may decide to replay it, but
        // accidentally replaying over valid data would be far worse than
        // skipping a questionable recovery.
    }

    journal_release(ctx, journal, reset);
    Ok(())
}

/// Loads the journal, replays it, and releases it with the empty-log
/// marker.
fn recover_journal(ctx: &mut Context) -> Result<(), CheckError>
{
    let mut journal = get_journal(ctx)?;

    if let Err(err) = journal_load(ctx, &mut journal) {
        drop_journal(ctx, journal);
        return Err(err);
    }
    if let Err(err) = revoke::journal_init_revoke(&mut journal, revoke::REVOKE_DEFAULT_HASH) {
        drop_journal(ctx, journal);
        return Err(err);
    }

    let result = recover::journal_recover(ctx, &mut journal);
    journal_release(ctx, journal, true);
    result
}

/// Runs journal recovery and reloads the file system state from disk, so
/// everything cached reflects the replayed contents.
pub fn run_journal(ctx: &mut Context) -> Result<(), CheckError>
{
    ctx.logger.log(0, &format!("{}: recovering journal", ctx.device_name));

    if ctx.readonly {
        ctx.logger.log(0, &format!(
            "{}: won't do journal recovery while read-only",
            ctx.device_name,
        ));
        return Err(CheckError::ReadOnly);
    }

    let recover_result = recover_journal(ctx);

    // The replay changed the file system under the cached state; reload it
    // before anything else looks at it. A reopen failure is fatal to the
    // whole run.
    ctx.fs.reopen()?;

    clear_recover(ctx, recover_result.is_err());
    recover_result
}


// Tests.
