//! This module provides the single-item hand-off buffer shared between pipeline stages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// A cooperative cancellation token shared by every stage of a run.
///
/// Raising it is sticky: once stopped, a token never goes back to running.
/// Raising the token alone does not wake blocked threads, slots must also be woken with [`Slot::wake_all()`].
#[derive(Debug, Clone, Default)]
pub struct ForceStop(Arc<AtomicBool>);

impl ForceStop {
    /// Create a new token in the running state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the token, returning `true` if this call was the one to raise it.
    #[inline]
    pub fn raise(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    #[inline]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Returned by [`Slot::put()`] when the value was dropped because the run is being force-stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stopped;

#[derive(Debug)]
struct SlotState<T> {
    value: Option<T>,
    closed: bool,
}

/// A blocking hand-off buffer with a capacity of exactly one value.
///
/// # Put
/// [`Slot::put()`] waits while a value is resident, so a producer can never race ahead of its consumer
/// by more than one value.
///
/// # Get
/// [`Slot::get()`] waits while the slot is empty, unless the slot has been closed or the run force-stopped,
/// in which case it returns `None` as the "no more data" sentinel.
///
/// # Example
/// ```
/// # use blocksig::slot::{ForceStop, Slot};
/// let slot = Slot::new(ForceStop::new());
///
/// std::thread::scope(|s| {
///     s.spawn(|| {
///         for i in 0..3 {
///             slot.put(i).unwrap();
///         }
///         slot.close();
///     });
///
///     let values: Vec<_> = std::iter::from_fn(|| slot.get()).collect();
///     assert_eq!(values, [0, 1, 2]);
/// });
/// ```
#[derive(Debug)]
pub struct Slot<T> {
    state: Mutex<SlotState<T>>,
    changed: Condvar,
    stop: ForceStop,
}

impl<T> Slot<T> {
    pub fn new(stop: ForceStop) -> Self {
        Self {
            state: Mutex::new(SlotState { value: None, closed: false }),
            changed: Condvar::new(),
            stop,
        }
    }

    /// Build `len` empty slots sharing the same `stop` token.
    pub fn array(len: usize, stop: &ForceStop) -> Vec<Slot<T>> {
        (0..len).map(|_| Slot::new(stop.clone())).collect()
    }

    /// Store `value`, waiting for the slot to be emptied first.
    ///
    /// Putting into a closed slot is a logic error; the value is still stored and will be handed out.
    pub fn put(&self, value: T) -> Result<(), Stopped> {
        let mut state = self.lock();

        while state.value.is_some() && !self.stop.is_raised() {
            state = self.changed.wait(state).unwrap_or_else(PoisonError::into_inner);
        }

        if self.stop.is_raised() {
            return Err(Stopped);
        }

        debug_assert!(!state.closed, "put into a closed slot");

        state.value = Some(value);
        self.changed.notify_one();

        Ok(())
    }

    /// Take the resident value, waiting for one to be put.
    ///
    /// Returns `None` once the slot is both empty and closed, or as soon as the run is force-stopped.
    pub fn get(&self) -> Option<T> {
        let mut state = self.lock();

        while state.value.is_none() && !state.closed && !self.stop.is_raised() {
            state = self.changed.wait(state).unwrap_or_else(PoisonError::into_inner);
        }

        if self.stop.is_raised() {
            return None;
        }

        let value = state.value.take();

        if value.is_some() {
            self.changed.notify_one();
        }

        value
    }

    /// Mark the slot as finished: no value will ever be put again.
    ///
    /// A value already resident is still handed out by the next [`Slot::get()`].
    pub fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_all();
    }

    /// Wake every thread blocked on this slot so it can recheck its exit conditions.
    pub fn wake_all(&self) {
        // taking the lock orders this wake after any waiter's check of the stop token
        let _state = self.lock();
        self.changed.notify_all();
    }

    /// Whether a value is currently resident.
    pub fn is_occupied(&self) -> bool {
        self.lock().value.is_some()
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        // no code panics while holding the lock, so the state is consistent even when poisoned
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_put_then_get() {
        let slot = Slot::new(ForceStop::new());

        slot.put("block").unwrap();
        assert!(slot.is_occupied());
        assert_eq!(slot.get(), Some("block"));
        assert!(!slot.is_occupied());
    }

    #[test]
    fn test_get_waits_for_put() {
        let slot = Slot::new(ForceStop::new());

        std::thread::scope(|s| {
            let consumer = s.spawn(|| slot.get());

            std::thread::sleep(Duration::from_millis(20));
            slot.put(7).unwrap();

            assert_eq!(consumer.join().unwrap(), Some(7));
        });
    }

    #[test]
    fn test_put_waits_while_occupied() {
        let slot = Slot::new(ForceStop::new());
        let (sender, receiver) = mpsc::channel();

        slot.put(1).unwrap();

        std::thread::scope(|s| {
            s.spawn(|| {
                slot.put(2).unwrap();
                sender.send(()).unwrap();
            });

            // second put cannot complete before the first value is taken
            assert!(receiver.recv_timeout(Duration::from_millis(50)).is_err());
            assert_eq!(slot.get(), Some(1));
            receiver.recv_timeout(TIMEOUT).unwrap();
            assert_eq!(slot.get(), Some(2));
        });
    }

    #[test]
    fn test_close_still_delivers_resident_value() {
        let slot = Slot::new(ForceStop::new());

        slot.put(42).unwrap();
        slot.close();

        assert_eq!(slot.get(), Some(42));
        assert_eq!(slot.get(), None);
        assert_eq!(slot.get(), None);
    }

    #[test]
    fn test_close_releases_blocked_get() {
        let slot = Slot::<u8>::new(ForceStop::new());

        std::thread::scope(|s| {
            let consumer = s.spawn(|| slot.get());

            std::thread::sleep(Duration::from_millis(20));
            slot.close();

            assert_eq!(consumer.join().unwrap(), None);
        });
    }

    #[test]
    fn test_force_stop_releases_blocked_threads() {
        let stop = ForceStop::new();
        let empty = Slot::<u8>::new(stop.clone());
        let full = Slot::new(stop.clone());
        let (sender, receiver) = mpsc::channel();

        full.put(1).unwrap();

        let get_sender = sender.clone();

        std::thread::scope(|s| {
            s.spawn(|| {
                get_sender.send(("get", empty.get().is_none())).unwrap();
            });
            s.spawn(|| {
                sender.send(("put", full.put(2) == Err(Stopped))).unwrap();
            });

            std::thread::sleep(Duration::from_millis(20));
            assert!(stop.raise());
            empty.wake_all();
            full.wake_all();

            for _ in 0..2 {
                let (op, released) = receiver.recv_timeout(TIMEOUT).unwrap();
                assert!(released, "{op} was not short-circuited");
            }
        });
    }

    #[test]
    fn test_stopped_slot_short_circuits() {
        let stop = ForceStop::new();
        let slot = Slot::new(stop.clone());

        slot.put(1).unwrap();
        stop.raise();

        // payload state is left untouched
        assert_eq!(slot.get(), None);
        assert_eq!(slot.put(2), Err(Stopped));
        assert!(slot.is_occupied());
        assert!(!stop.raise());
    }
}
