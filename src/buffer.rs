use std::io;

use crate::Context;

/// Direction of a block transfer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IoMode {
    Read,
    Write,
}


/// A handle on one block of the image.
///
/// The handle owns a block-sized byte region and remembers whether the
/// contents reflect the disk (`uptodate`) and whether they must be written
/// back before the handle is freed (`dirty`). A failed transfer is recorded
/// on the handle instead of aborting, so a batch of transfers can proceed
/// independently; callers inspect the error afterwards.
#[derive(Debug)]
pub struct BufferHead {
    block: u64,
    data: Vec<u8>,
    uptodate: bool,
    dirty: bool,
    err: Option<io::Error>,
}

impl BufferHead {
    fn new(block: u64, size: usize) -> Self
    {
        Self {
            block,
            data: vec![0u8; size],
            uptodate: false,
            dirty: false,
            err: None,
        }
    }

    pub fn data(&self) -> &[u8]
    {
        &self.data
    }

    /// Writing through this does not mark the buffer dirty; that is the
    /// caller's move, via `mark_buffer_dirty`.
    pub fn data_mut(&mut self) -> &mut [u8]
    {
        &mut self.data
    }

    /// Takes the error recorded by the last failed transfer, if any.
    pub fn take_err(&mut self) -> Option<io::Error>
    {
        self.err.take()
    }
}


/// Diagnostic counters for the buffer layer. Owned by the file system
/// handle, so nothing here is process-wide.
#[derive(Copy, Clone, Debug, Default)]
pub struct BufferStats {
    /// Buffers handed out and not yet released.
    pub live: u64,
    /// Physical block reads.
    pub reads: u64,
    /// Physical block writes.
    pub writes: u64,
}


/// Allocates a fresh handle for `block`. No I/O happens here; the contents
/// are populated by the first read, or by the caller writing through.
pub fn getblk(ctx: &mut Context, block: u64) -> BufferHead
{
    let size = ctx.fs.block_size as usize;

    ctx.fs.stats.live += 1;
    ctx.logger.log(4, &format!(
        "getblk for block {} ({} bytes) ({} live)",
        block, size, ctx.fs.stats.live,
    ));

    BufferHead::new(block, size)
}

/// Transfers each buffer that actually needs the requested direction:
/// a read is skipped on an uptodate buffer, a write on a clean one.
/// Failures are recorded per buffer and do not stop the rest of the batch.
pub fn rw_block(ctx: &mut Context, mode: IoMode, buffers: &mut [&mut BufferHead])
{
    for bh in buffers.iter_mut() {
        if mode == IoMode::Read && !bh.uptodate {
            ctx.logger.log(3, &format!("reading block {}", bh.block));
            match ctx.fs.io.read_block(bh.block, 1, &mut bh.data) {
                Ok(()) => {
                    bh.uptodate = true;
                    ctx.fs.stats.reads += 1;
                }
                Err(err) => {
                    ctx.logger.log(0, &format!(
                        "error: {}: while reading block {}: {}",
                        ctx.device_name, bh.block, err,
                    ));
                    bh.err = Some(err);
                    continue;
                }
            }
        } else if mode == IoMode::Write && bh.dirty {
            ctx.logger.log(3, &format!("writing block {}", bh.block));
            match ctx.fs.io.write_block(bh.block, 1, &bh.data) {
                Ok(()) => {
                    bh.dirty = false;
                    bh.uptodate = true;
                    ctx.fs.stats.writes += 1;
                }
                Err(err) => {
                    ctx.logger.log(0, &format!(
                        "error: {}: while writing block {}: {}",
                        ctx.device_name, bh.block, err,
                    ));
                    bh.err = Some(err);
                    continue;
                }
            }
        } else {
            ctx.logger.log(3, &format!(
                "no-op {} for block {}",
                if mode == IoMode::Read { "read" } else { "write" },
                bh.block,
            ));
        }
    }
}

pub fn mark_buffer_dirty(bh: &mut BufferHead)
{
    bh.dirty = true;
}

pub fn buffer_uptodate(bh: &BufferHead) -> bool
{
    bh.uptodate
}

/// Issues a synchronous read unless the contents already reflect the disk.
pub fn wait_on_buffer(ctx: &mut Context, bh: &mut BufferHead)
{
    if !bh.uptodate {
        rw_block(ctx, IoMode::Read, &mut [bh]);
    }
}

/// Writes the buffer back if it is dirty, then frees it. A write-back
/// failure is logged; the checker cannot sensibly recover from it here.
pub fn brelse(ctx: &mut Context, mut bh: BufferHead)
{
    if bh.dirty {
        rw_block(ctx, IoMode::Write, &mut [&mut bh]);
        if bh.take_err().is_some() {
            ctx.logger.log(0, &format!(
                "error: {}: while releasing block {}",
                ctx.device_name, bh.block,
            ));
        }
    }

    ctx.fs.stats.live -= 1;
    ctx.logger.log(4, &format!(
        "freeing block {} ({} live)",
        bh.block, ctx.fs.stats.live,
    ));
}
