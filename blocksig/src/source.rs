//! This module provides the producing stage, splitting a source into fixed-size blocks.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::num::NonZeroUsize;
use std::path::Path;

use bytes::Bytes;

use crate::slot::{ForceStop, Slot};
use crate::sync::Progress;
use crate::Error;

/// A source of fixed-size blocks.
///
/// All blocks have the configured size except possibly the last one, which holds the remaining bytes.
/// Block `k` (0-based) is always routed to slot `k mod N`, where `N` is the number of slots.
#[derive(Debug)]
pub struct BlockSource<R> {
    reader: R,
    /// Name used to identify the source in error messages.
    name: String,
    /// Declared length of the source; nothing is read past it.
    len: u64,
    block_size: NonZeroUsize,
}

impl BlockSource<File> {
    /// Open the file at `path` for reading.
    ///
    /// Fails with [`Error::EmptySource`] when the file is empty.
    pub fn open(path: impl AsRef<Path>, block_size: NonZeroUsize) -> Result<Self, Error> {
        let path = path.as_ref();

        let file = File::open(path).map_err(|err| Error::open(path.display(), err))?;
        let len = file.metadata().map_err(|err| Error::open(path.display(), err))?.len();

        Ok(Self::new(file, len, block_size)?.with_name(path.display()))
    }
}

impl<R: Read> BlockSource<R> {
    /// Wrap `reader`, expected to yield exactly `len` bytes.
    ///
    /// Fails with [`Error::EmptySource`] when `len` is zero.
    pub fn new(reader: R, len: u64, block_size: NonZeroUsize) -> Result<Self, Error> {
        if len == 0 {
            return Err(Error::EmptySource);
        }

        Ok(Self {
            reader,
            name: String::from("<source>"),
            len,
            block_size,
        })
    }

    /// Build a new `BlockSource` identified by `name` in error messages.
    #[inline]
    pub fn with_name(self, name: impl fmt::Display) -> Self {
        Self {
            name: name.to_string(),
            ..self
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Always `false`, empty sources are rejected on creation.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn block_size(&self) -> NonZeroUsize {
        self.block_size
    }

    /// Number of blocks this source splits into.
    pub fn block_count(&self) -> u64 {
        self.len.div_ceil(self.block_size.get() as u64)
    }

    /// Read the whole source, handing block `k` to `slots[k % slots.len()]`.
    ///
    /// Once the last block has been handed off, end-of-data is signaled and every slot is closed.
    /// When `stop` is raised, this method returns early without an error and without closing the slots.
    pub fn produce(&mut self, slots: &[Slot<Bytes>], stop: &ForceStop, progress: &Progress) -> Result<(), Error> {
        assert!(!slots.is_empty());

        tracing::debug!(
            "Reading `{}` ({} bytes) by blocks of {} bytes into {} slots...",
            self.name,
            self.len,
            self.block_size,
            slots.len()
        );

        let mut offset = 0;

        for id in (0..slots.len()).cycle() {
            if offset == self.len {
                break;
            }

            if stop.is_raised() {
                tracing::debug!("Source `{}` stopped by force at offset {offset}.", self.name);
                return Ok(());
            }

            let block = self.read_block(offset)?;
            offset += block.len() as u64;

            tracing::trace!("Handing block of {} bytes to slot {id}.", block.len());

            if slots[id].put(block).is_err() {
                return Ok(());
            }

            progress.produced();
        }

        if progress.finish_production() {
            tracing::debug!("All {} bytes of `{}` read, closing source slots.", self.len, self.name);
        }

        slots.iter().for_each(Slot::close);

        Ok(())
    }

    /// Read the block starting at `offset`, retrying short reads until it is full or the stream ends.
    fn read_block(&mut self, offset: u64) -> Result<Bytes, Error> {
        let expected = self.len.saturating_sub(offset).min(self.block_size.get() as u64) as usize;

        let mut block = vec![0; expected];
        let mut filled = 0;

        while filled < expected {
            match self.reader.read(&mut block[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(Error::read(&self.name, err)),
            }
        }

        if filled < expected {
            return Err(Error::TruncatedRead {
                offset,
                expected,
                actual: filled,
            });
        }

        Ok(block.into())
    }
}
