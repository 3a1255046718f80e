//! Stream manager for files in the tagged-block format
//!
//! [`BlockFile`] wraps one seekable binary stream and offers typed reads and
//! writes of whole blocks, header-only reads and payload skipping. Key
//! validation is opt-in per call: the `*_any_*` variants parse whatever block
//! comes next, the keyed variants raise a mismatch error carrying both keys
//! and a caller-supplied description.
//!
//! On a key mismatch the offending block has already been consumed from the
//! stream; callers must not assume they can retry.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, Write};
use std::path::Path;

use crate::blocks::{Block, BlockInfo, FileBlock, MagicKey, Scalar};
use crate::error::{PhotlibError, Result};

/// I/O manager for a stream of tagged blocks.
pub struct BlockFile<S> {
    stream: S,
}

impl BlockFile<File> {
    /// Opens an existing file for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path).map_err(|source| PhotlibError::Open {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        Ok(BlockFile::new(file))
    }

    /// Creates (or truncates) a file for writing.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|source| PhotlibError::Open {
                path: path.as_ref().to_path_buf(),
                source,
            })?;
        Ok(BlockFile::new(file))
    }

    /// Opens a file for appending more blocks at its end.
    pub fn append<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| PhotlibError::Open {
                path: path.as_ref().to_path_buf(),
                source,
            })?;
        Ok(BlockFile::new(file))
    }
}

impl<S> BlockFile<S> {
    /// Wraps an already-open stream positioned where the caller wants it.
    pub fn new(stream: S) -> Self {
        BlockFile { stream }
    }

    /// Releases the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: Seek> BlockFile<S> {
    /// The current position in the stream, in bytes from its start.
    pub fn current_offset(&mut self) -> Result<u64> {
        Ok(self.stream.stream_position()?)
    }
}

impl<S: Read + Seek> BlockFile<S> {
    /// Reads the next block as type `B`, without any key expectation.
    pub fn read_any_block<B: Block>(&mut self, what: &str) -> Result<B> {
        B::read_from(&mut self.stream).map_err(|e| e.while_reading(what))
    }

    /// Reads the next block as type `B` and checks its key.
    pub fn read_block<B: Block>(&mut self, expected: MagicKey, what: &str) -> Result<B> {
        let block = self.read_any_block::<B>(what)?;
        self.check_key(block.key(), expected, what)?;
        Ok(block)
    }

    /// Reads the next block header, leaving the stream at the first payload
    /// byte.
    pub fn read_any_block_header(&mut self, what: &str) -> Result<BlockInfo> {
        BlockInfo::read_from(&mut self.stream).map_err(|e| e.while_reading(what))
    }

    /// Reads the next block header and checks its key.
    pub fn read_block_header(&mut self, expected: MagicKey, what: &str) -> Result<BlockInfo> {
        let info = self.read_any_block_header(what)?;
        self.check_key(info.key, expected, what)?;
        Ok(info)
    }

    /// Completes an already-parsed header into a full block by reading its
    /// payload and padding from the current position.
    pub fn read_payload(&mut self, info: BlockInfo, what: &str) -> Result<FileBlock> {
        FileBlock::read_payload_from(info, &mut self.stream).map_err(|e| e.while_reading(what))
    }

    /// Skips the next block entirely, returning its header.
    pub fn skip_any_block(&mut self, what: &str) -> Result<BlockInfo> {
        let info = self.read_any_block_header(what)?;
        self.skip_payload(&info, what)?;
        Ok(info)
    }

    /// Skips the next block, checking its key first.
    pub fn skip_block(&mut self, expected: MagicKey, what: &str) -> Result<BlockInfo> {
        let info = self.read_block_header(expected, what)?;
        self.skip_payload(&info, what)?;
        Ok(info)
    }

    /// Advances past the aligned payload described by `info`.
    pub fn skip_payload(&mut self, info: &BlockInfo, what: &str) -> Result<()> {
        info.skip_payload(&mut self.stream)
            .map_err(|e| e.while_reading(what))
    }

    fn check_key(&self, found: MagicKey, expected: MagicKey, what: &str) -> Result<()> {
        if found == expected {
            Ok(())
        } else {
            Err(PhotlibError::KeyMismatch {
                expected,
                found,
                what: what.to_string(),
            })
        }
    }
}

impl<S: Write + Seek> BlockFile<S> {
    /// Writes one block at the current position.
    pub fn write_block<B: Block>(&mut self, block: &B) -> Result<()> {
        let what = block.key().to_string();
        block
            .write_to(&mut self.stream)
            .map_err(|e| e.while_writing(&what))
    }

    /// Writes a header and then a payload taken from the caller's buffer.
    ///
    /// This avoids duplicating a payload that already exists in memory; the
    /// values are encoded straight into the stream, followed by the padding
    /// the header calls for. The header size must match the buffer.
    pub fn write_block_and_payload<T: Scalar>(
        &mut self,
        info: &BlockInfo,
        values: &[T],
    ) -> Result<()> {
        let what = info.key.to_string();
        let available = values.len() as u64 * T::STORED_SIZE;
        if info.size != available {
            return Err(PhotlibError::SizeMismatch {
                what: format!("'{what}' payload buffer"),
                expected: info.size,
                actual: available,
            });
        }
        self.write_payload_impl(info, values)
            .map_err(|e| e.while_writing(&what))
    }

    fn write_payload_impl<T: Scalar>(&mut self, info: &BlockInfo, values: &[T]) -> Result<()> {
        info.write_to(&mut self.stream)?;
        for value in values {
            value.write_to(&mut self.stream)?;
        }
        let pad = [0u8; crate::blocks::WORD_SIZE as usize];
        self.stream
            .write_all(&pad[..info.padding_size() as usize])?;
        Ok(())
    }

    /// Flushes any buffered output to the underlying device.
    pub fn flush(&mut self) -> Result<()> {
        self.stream.flush()?;
        Ok(())
    }
}
