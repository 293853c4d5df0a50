//! Deferred destruction.
//!
//! Destroying a resource while a submitted frame may still reference it is a
//! GPU use-after-free. Every destroy is therefore wrapped in a teardown
//! closure stamped with the frame it was enqueued at, and runs only once the
//! frame that could last have referenced it is provably complete: the ring
//! depth of the immediate commands is the horizon.

use std::collections::VecDeque;

use crate::{alloc::Allocator, device::Device};

type Teardown = Box<dyn FnOnce(&Device, &Allocator)>;

pub(crate) struct DeferredDeleter {
    queue: VecDeque<(u64, Teardown)>,
    horizon: u64,
}

impl DeferredDeleter {
    pub fn new(horizon: u64) -> Self {
        Self {
            queue: VecDeque::new(),
            horizon,
        }
    }

    /// Enqueues a teardown closure. The closure must be safe to run after the
    /// pools have already forgotten the handle it came from.
    pub fn defer(&mut self, frame: u64, teardown: impl FnOnce(&Device, &Allocator) + 'static) {
        self.queue.push_back((frame, Box::new(teardown)));
    }

    /// Runs every closure whose frame lies at least one ring depth in the
    /// past. FIFO order.
    pub fn drain(&mut self, device: &Device, allocator: &Allocator, current_frame: u64) {
        while let Some((frame, _)) = self.queue.front() {
            if frame + self.horizon > current_frame {
                break;
            }
            if let Some((_, teardown)) = self.queue.pop_front() {
                teardown(device, allocator);
            }
        }
    }

    /// Runs everything immediately. Only valid after a device idle.
    pub fn drain_all(&mut self, device: &Device, allocator: &Allocator) {
        while let Some((_, teardown)) = self.queue.pop_front() {
            teardown(device, allocator);
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// How many queued entries are due at `current_frame`.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn due_count(&self, current_frame: u64) -> usize {
        self.queue
            .iter()
            .take_while(|(frame, _)| frame + self.horizon <= current_frame)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> impl FnOnce(&Device, &Allocator) {
        |_, _| {}
    }

    #[test]
    fn entries_become_due_one_horizon_later() {
        let mut deleter = DeferredDeleter::new(3);
        deleter.defer(0, noop());
        deleter.defer(1, noop());
        deleter.defer(5, noop());
        assert_eq!(deleter.len(), 3);
        assert_eq!(deleter.due_count(0), 0);
        assert_eq!(deleter.due_count(2), 0);
        assert_eq!(deleter.due_count(3), 1);
        assert_eq!(deleter.due_count(4), 2);
        assert_eq!(deleter.due_count(8), 3);
    }
}
