//! Packet & Factory
//!
//! Shared payload handles recycled through a fixed-capacity pool. A
//! `Factory` preallocates its slots once; `acquire` blocks when every slot
//! is outstanding, which is the pipeline's only form of backpressure.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type UniquenessCallback = Box<dyn Fn() + Send + Sync>;

struct Shared<T> {
    /// Logical reference count, independent of the `Arc` count so the
    /// 2 -> 1 transition (last holder outside the pool dropped) is
    /// observable.
    refs: AtomicUsize,
    data: Mutex<T>,
    on_unique: Mutex<Option<UniquenessCallback>>,
}

/// Shared handle to a pooled payload.
///
/// Cloning increments the reference count, dropping decrements it. When the
/// count transitions to 1 (only the pool still holds the slot) the
/// uniqueness callback runs, which is how `Factory` learns a slot is free
/// again.
pub struct Packet<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Packet<T> {
    pub fn new(data: T) -> Self {
        Self {
            shared: Arc::new(Shared {
                refs: AtomicUsize::new(1),
                data: Mutex::new(data),
                on_unique: Mutex::new(None),
            }),
        }
    }

    /// Locks the payload for reading or writing.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.shared.data.lock()
    }

    /// Replaces the payload, returning the previous value.
    pub fn replace(&self, data: T) -> T {
        std::mem::replace(&mut *self.shared.data.lock(), data)
    }

    pub fn set_on_unique(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.shared.on_unique.lock() = Some(Box::new(callback));
    }

    /// Current reference count, pool handle included.
    pub fn use_count(&self) -> usize {
        self.shared.refs.load(Ordering::Acquire)
    }
}

impl<T> Clone for Packet<T> {
    fn clone(&self) -> Self {
        self.shared.refs.fetch_add(1, Ordering::AcqRel);
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Drop for Packet<T> {
    fn drop(&mut self) {
        let previous = self.shared.refs.fetch_sub(1, Ordering::AcqRel);
        if previous == 2 {
            if let Some(callback) = self.shared.on_unique.lock().as_ref() {
                callback();
            }
        }
    }
}

struct FreeList {
    slots: Mutex<VecDeque<usize>>,
    available: Condvar,
}

/// Bounded pool of reusable packets.
///
/// At most `n` packets are outstanding at any time; `acquire` blocks rather
/// than allocates. Slots are returned automatically when the last consumer
/// drops its handle.
pub struct Factory<T> {
    objects: Vec<Packet<T>>,
    free: Arc<FreeList>,
}

impl<T: Default + Send + 'static> Factory<T> {
    pub fn new(n: usize) -> Self {
        let free = Arc::new(FreeList {
            slots: Mutex::new((0..n).collect()),
            available: Condvar::new(),
        });

        let objects = (0..n)
            .map(|id| {
                let packet = Packet::new(T::default());
                let free = Arc::clone(&free);
                packet.set_on_unique(move || {
                    free.slots.lock().push_back(id);
                    free.available.notify_one();
                });
                packet
            })
            .collect();

        Self { objects, free }
    }

    /// Takes a free slot, blocking until one is recycled. The returned
    /// packet has a use count of 2: the caller and the pool.
    pub fn acquire(&self) -> Packet<T> {
        let mut slots = self.free.slots.lock();
        while slots.is_empty() {
            self.free.available.wait(&mut slots);
        }
        let id = slots.pop_front().expect("non-empty free list");
        self.objects[id].clone()
    }

    pub fn size(&self) -> usize {
        self.objects.len()
    }

    /// True when every slot is back in the pool.
    pub fn full(&self) -> bool {
        self.free.slots.lock().len() == self.objects.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_clone_and_drop_refcount() {
        let p = Packet::new(7u32);
        assert_eq!(p.use_count(), 1);
        let q = p.clone();
        assert_eq!(p.use_count(), 2);
        *q.lock() = 9;
        drop(q);
        assert_eq!(p.use_count(), 1);
        assert_eq!(*p.lock(), 9);
    }

    #[test]
    fn test_uniqueness_callback_fires_on_last_external_drop() {
        let fired = Arc::new(AtomicBool::new(false));
        let p = Packet::new(0u32);
        {
            let fired = Arc::clone(&fired);
            p.set_on_unique(move || fired.store(true, Ordering::SeqCst));
        }

        let q = p.clone();
        let r = q.clone();
        drop(q);
        assert!(!fired.load(Ordering::SeqCst));
        drop(r);
        // p itself is the sole remaining holder, as the pool would be.
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_factory_recycles_slots() {
        let factory = Factory::<Vec<u8>>::new(2);
        assert!(factory.full());

        let a = factory.acquire();
        let b = factory.acquire();
        assert!(!factory.full());
        a.lock().extend_from_slice(&[1, 2, 3]);

        drop(a);
        drop(b);
        assert!(factory.full());
        assert_eq!(factory.size(), 2);
    }

    #[test]
    fn test_factory_never_double_lends_a_slot() {
        let factory = Factory::<u32>::new(1);
        let held = factory.acquire();
        *held.lock() = 42;

        let factory = Arc::new(factory);
        let worker = {
            let factory = Arc::clone(&factory);
            thread::spawn(move || *factory.acquire().lock())
        };

        // The worker must block until the first handle is released.
        thread::sleep(Duration::from_millis(50));
        assert!(!worker.is_finished());

        drop(held);
        assert_eq!(worker.join().unwrap(), 42);
    }

    #[test]
    fn test_acquired_packet_has_two_references() {
        let factory = Factory::<u32>::new(1);
        let p = factory.acquire();
        assert_eq!(p.use_count(), 2);
    }
}
