use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// A block-granular I/O channel over the file system image.
///
/// This is the only way the checker touches the drive. The channel carries
/// its own notion of the block size; the superblock is always read at a
/// 1024-byte granularity before the real block size is known, after which
/// the caller switches the channel over with `set_block_size`.
pub trait IoChannel {
    fn block_size(&self) -> u64;

    fn set_block_size(&mut self, block_size: u64);

    /// Reads `count` consecutive blocks starting at `block` into `buf`.
    fn read_block(&mut self, block: u64, count: usize, buf: &mut [u8]) -> io::Result<()>;

    /// Writes `count` consecutive blocks starting at `block` from `buf`.
    fn write_block(&mut self, block: u64, count: usize, buf: &[u8]) -> io::Result<()>;
}


/// An `IoChannel` over a regular file or block device.
#[derive(Debug)]
pub struct FileChannel {
    file: File,
    block_size: u64,
}

impl FileChannel {
    pub fn new(file: File, block_size: u64) -> Self
    {
        assert!(block_size > 0);

        Self {
            file,
            block_size,
        }
    }
}

impl IoChannel for FileChannel {
    fn block_size(&self) -> u64
    {
        self.block_size
    }

    fn set_block_size(&mut self, block_size: u64)
    {
        assert!(block_size > 0);
        self.block_size = block_size;
    }

    fn read_block(&mut self, block: u64, count: usize, buf: &mut [u8]) -> io::Result<()>
    {
        let len = count * self.block_size as usize;
        assert!(buf.len() >= len);

        self.file.seek(SeekFrom::Start(block * self.block_size))?;
        self.file.read_exact(&mut buf[..len])
    }

    fn write_block(&mut self, block: u64, count: usize, buf: &[u8]) -> io::Result<()>
    {
        let len = count * self.block_size as usize;
        assert!(buf.len() >= len);

        self.file.seek(SeekFrom::Start(block * self.block_size))?;
        self.file.write_all(&buf[..len])
    }
}


/// An `IoChannel` over an in-memory image, for tests. The backing storage
/// is shared so a test can inspect the image after handing the channel to
/// the file system.
#[cfg(test)]
#[derive(Debug)]
pub struct MemChannel {
    data: std::rc::Rc<std::cell::RefCell<Vec<u8>>>,
    block_size: u64,
}

#[cfg(test)]
impl MemChannel {
    pub fn new(data: Vec<u8>, block_size: u64) -> (Self, std::rc::Rc<std::cell::RefCell<Vec<u8>>>)
    {
        assert!(block_size > 0);

        let shared = std::rc::Rc::new(std::cell::RefCell::new(data));
        let chan = Self {
            data: shared.clone(),
            block_size,
        };

        (chan, shared)
    }
}

#[cfg(test)]
impl IoChannel for MemChannel {
    fn block_size(&self) -> u64
    {
        self.block_size
    }

    fn set_block_size(&mut self, block_size: u64)
    {
        assert!(block_size > 0);
        self.block_size = block_size;
    }

    fn read_block(&mut self, block: u64, count: usize, buf: &mut [u8]) -> io::Result<()>
    {
        let len = count * self.block_size as usize;
        let start = (block * self.block_size) as usize;
        let data = self.data.borrow();

        if start + len > data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read beyond the end of the image",
            ));
        }

        buf[..len].copy_from_slice(&data[start..start + len]);
        Ok(())
    }

    fn write_block(&mut self, block: u64, count: usize, buf: &[u8]) -> io::Result<()>
    {
        let len = count * self.block_size as usize;
        let start = (block * self.block_size) as usize;
        let mut data = self.data.borrow_mut();

        if start + len > data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "write beyond the end of the image",
            ));
        }

        data[start..start + len].copy_from_slice(&buf[..len]);
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::{IoChannel, MemChannel};

    #[test]
    fn mem_read_write_roundtrip()
    {
        let (mut chan, shared) = MemChannel::new(vec![0u8; 4096], 1024);

        chan.write_block(2, 1, &[0xaa; 1024]).unwrap();

        let mut buf = [0u8; 1024];
        chan.read_block(2, 1, &mut buf).unwrap();
        assert_eq!(buf, [0xaa; 1024]);

        chan.read_block(1, 1, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 1024]);

        assert_eq!(shared.borrow()[2048], 0xaa);
    }

    #[test]
    fn mem_read_out_of_range()
    {
        let (mut chan, _shared) = MemChannel::new(vec![0u8; 4096], 1024);

        let mut buf = [0u8; 1024];
        assert!(chan.read_block(4, 1, &mut buf).is_err());
    }

    #[test]
    fn mem_block_size_change()
    {
        let (mut chan, _shared) = MemChannel::new(vec![0u8; 4096], 1024);
        chan.set_block_size(2048);

        let mut buf = [0u8; 2048];
        chan.read_block(1, 1, &mut buf).unwrap();
        assert_eq!(chan.block_size(), 2048);
    }
}
