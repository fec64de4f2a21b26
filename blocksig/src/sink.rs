//! This module provides the consuming stage, writing digests in block order.

use std::io::Write;

use bytes::Bytes;

use crate::slot::{ForceStop, Slot};
use crate::sync::Progress;
use crate::Error;

/// Writes one `"<number> - <HEX DIGEST>"` line per block, numbered from 1.
#[derive(Debug)]
pub struct ResultSink<W> {
    writer: W,
    records: u64,
}

impl<W: Write> ResultSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, records: 0 }
    }

    /// Number of records written so far.
    #[inline]
    pub fn records(&self) -> u64 {
        self.records
    }

    #[inline]
    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Take digests from `slots` in round-robin order starting at slot 0, until one of them reports no more data.
    ///
    /// The writer is flushed once every digest has been written. Returns the number of records written.
    pub fn drain(&mut self, slots: &[Slot<Bytes>], stop: &ForceStop, progress: &Progress) -> Result<u64, Error> {
        for id in (0..slots.len()).cycle() {
            if stop.is_raised() {
                return Ok(self.records);
            }

            let Some(digest) = slots[id].get() else {
                break;
            };

            progress.emitted();

            self.write(&digest)?;
        }

        if !stop.is_raised() {
            self.writer.flush().map_err(Error::write)?;

            tracing::debug!("All {} results written.", self.records);
        }

        Ok(self.records)
    }

    fn write(&mut self, digest: &[u8]) -> Result<(), Error> {
        let number = self.records + 1;

        writeln!(self.writer, "{number} - {}", hex::encode_upper(digest)).map_err(Error::write)?;

        self.records = number;

        Ok(())
    }
}
