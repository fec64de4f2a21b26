//! This module provides the pool of digesting workers.

use std::io;
use std::thread;

use bytes::Bytes;

use crate::digest::Digester;
use crate::slot::{ForceStop, Slot};
use crate::sync::{Progress, Run};
use crate::{Error, Stage};

/// A fixed pool of workers, each one permanently bound to a single pair of source and result slots.
///
/// Worker `i` only ever takes blocks from source slot `i` and puts digests into result slot `i`:
/// there is no work stealing, which keeps the original block order recoverable by walking the result slots
/// in the same cycle as the source.
#[derive(Debug)]
pub(crate) struct Pool<'scope> {
    /// The pool of workers.
    workers: Vec<Worker<'scope>>,
}

impl<'scope> Pool<'scope> {
    /// Start one worker per slot of `run`, within `scope`.
    ///
    /// On error, workers already started are left running; failing the run stops them.
    pub(crate) fn start<'env, D: Digester>(
        scope: &'scope thread::Scope<'scope, 'env>,
        run: &'scope Run,
        digester: &'scope D,
    ) -> io::Result<Self> {
        let workers = (0..run.source_slots.len())
            .map(|id| Worker::new(id, scope, run, digester))
            .collect::<io::Result<_>>()?;

        Ok(Self { workers })
    }

    /// Wait for every worker to complete.
    pub(crate) fn join(self) {
        for worker in self.workers {
            tracing::trace!("Joining worker {}...", worker.id);

            // a panicked worker has already failed the run
            let _ = worker.handle.join();
        }
    }
}

#[derive(Debug)]
struct Worker<'scope> {
    id: usize,
    handle: thread::ScopedJoinHandle<'scope, ()>,
}

impl<'scope> Worker<'scope> {
    fn new<'env, D: Digester>(
        id: usize,
        scope: &'scope thread::Scope<'scope, 'env>,
        run: &'scope Run,
        digester: &'scope D,
    ) -> io::Result<Worker<'scope>> {
        tracing::debug!("Starting worker {id}...");

        let lane = Lane {
            id,
            lanes: run.source_slots.len(),
            input: &run.source_slots[id],
            output: &run.result_slots[id],
        };

        let handle = thread::Builder::new().name(format!("worker-{id}")).spawn_scoped(scope, move || {
            run.guard(Stage::Worker(id), || lane.work(digester, &run.stop, &run.progress));
        })?;

        Ok(Worker { id, handle })
    }
}

/// The pair of slots a worker is bound to.
#[derive(Debug)]
struct Lane<'a> {
    id: usize,
    /// Total number of lanes, ie. the distance between two blocks of a lane.
    lanes: usize,
    input: &'a Slot<Bytes>,
    output: &'a Slot<Bytes>,
}

impl Lane<'_> {
    /// Digest blocks until the input slot is closed and drained, then close the output slot.
    fn work<D: Digester>(&self, digester: &D, stop: &ForceStop, progress: &Progress) -> Result<(), Error> {
        // 1-based number of the next block this lane receives
        let mut block_number = self.id as u64 + 1;

        while !stop.is_raised() {
            let Some(block) = self.input.get() else {
                break;
            };

            progress.consumed();

            let digest = digester.digest(&block).map_err(|err| Error::Transform {
                block: block_number,
                reason: err.to_string(),
            })?;

            tracing::trace!("Worker {} digested block #{block_number}.", self.id);

            if self.output.put(digest).is_err() {
                return Ok(());
            }

            block_number += self.lanes as u64;
        }

        tracing::debug!("All blocks exhausted, shutting down worker {}.", self.id);

        self.output.close();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;
    use crate::digest::{DigestError, Sha256Digester};

    struct Failing;

    impl Digester for Failing {
        fn digest(&self, _: &[u8]) -> Result<Bytes, DigestError> {
            Err("unsupported block".into())
        }
    }

    #[test]
    fn test_lane_digests_in_order_and_closes() {
        let stop = ForceStop::new();
        let progress = Progress::default();
        let input = Slot::new(stop.clone());
        let output = Slot::new(stop.clone());
        let lane = Lane {
            id: 0,
            lanes: 1,
            input: &input,
            output: &output,
        };

        std::thread::scope(|s| {
            s.spawn(|| {
                for block in ["a", "b", "c"] {
                    input.put(Bytes::from_static(block.as_bytes())).unwrap();
                }
                input.close();
            });

            let worker = s.spawn(|| lane.work(&Sha256Digester, &stop, &progress));

            for block in ["a", "b", "c"] {
                assert_eq!(output.get().unwrap(), Sha256Digester.digest(block.as_bytes()).unwrap());
            }
            assert_eq!(output.get(), None);

            worker.join().unwrap().unwrap();
        });

        assert_eq!(progress.consumed_count(), 3);
    }

    #[test]
    fn test_lane_numbers_failing_block() {
        let stop = ForceStop::new();
        let progress = Progress::default();
        let input = Slot::new(stop.clone());
        let output = Slot::new(stop.clone());
        let lane = Lane {
            id: 2,
            lanes: 4,
            input: &input,
            output: &output,
        };

        input.put(Bytes::from_static(b"block")).unwrap();

        match lane.work(&Failing, &stop, &progress) {
            Err(Error::Transform { block: 3, reason }) => assert_eq!(reason, "unsupported block"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!output.is_occupied());
    }

    #[test]
    fn test_pool_runs_one_worker_per_slot() {
        let run = Run::new(NonZeroUsize::new(3).unwrap());

        std::thread::scope(|s| {
            let pool = Pool::start(s, &run, &Sha256Digester).unwrap();
            assert_eq!(pool.workers.len(), 3);

            for (i, slot) in run.source_slots.iter().enumerate() {
                slot.put(Bytes::from(vec![i as u8; 8])).unwrap();
                slot.close();
            }

            for (i, slot) in run.result_slots.iter().enumerate() {
                assert_eq!(slot.get().unwrap(), Sha256Digester.digest(&[i as u8; 8]).unwrap());
                assert_eq!(slot.get(), None);
            }

            pool.join();
        });

        assert_eq!(run.progress.consumed_count(), 3);
    }
}
