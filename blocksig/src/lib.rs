//! A simple crate computing block signatures of a file.
//!
//! A file is split into fixed-size blocks, every block is digested in parallel by a pool of worker threads, and
//! digests are written out in the original block order, one `"<block number> - <HEX DIGEST>"` line per block.
//!
//! The interesting part is the synchronization between the stages of the pipeline rather than the digest itself,
//! which is pluggable through the [`Digester`] trait. Stages only communicate through single-value blocking
//! [`Slot`](slot::Slot)s built upon `Mutex`/`Condvar` pairs, `atomic` counters and flags:
//!
//! ```text
//!     BlockSource --> source slot 0 --> worker 0 --> result slot 0 --> ResultSink
//!                 \-> source slot 1 --> worker 1 --> result slot 1 -/
//!                 \-> ...                                          -/
//!                 \-> source slot N-1 -> worker N-1 -> result slot N-1 -/
//! ```
//!
//! As a **strong guarantee**:
//! - at most one block per worker is in flight at any time, bounding memory use to `O(N)` blocks;
//! - digests are emitted in block order, whatever the order workers complete in;
//! - any failing stage stops the whole run by force and no thread remains blocked.
//!
//! See the [`sync`] module for termination and cancellation details.

mod error;
pub use error::*;

mod digest;
pub use digest::{DigestError, Digester, Sha256Digester};

mod pool;
pub mod sink;
pub mod slot;
pub mod source;
pub mod sync;

pub use sink::ResultSink;
pub use source::BlockSource;
pub use sync::{Summary, Synchronizer};
