use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::ptr;
use std::sync::{Arc, Mutex, TryLockError, Weak};

use bytes::BytesMut;
use tracing::trace;

/// Initial capacity of a pooled read buffer, same as the read window.
const POOLED_BUFFER_CAPACITY: usize = 8 * 1024;

/// A type that can live in a [`Pool`].
pub trait Poolable {
    /// Constructs a fresh instance, used to fill the pool and on the overflow path.
    fn create() -> Self;

    /// Returns the instance to a neutral state before it is handed out again.
    fn reset(&mut self);
}

impl Poolable for BytesMut {
    fn create() -> Self {
        BytesMut::with_capacity(POOLED_BUFFER_CAPACITY)
    }

    fn reset(&mut self) {
        self.clear();
    }
}

/// Where an acquired instance came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Recycled from the free list
    Pool,
    /// Constructed directly because the free list was empty or busy
    Allocated,
}

/// A bounded free list of reusable instances.
///
/// The free list never holds more than `capacity` instances. Both [`Pool::acquire`] and
/// [`Pool::release`] only ever `try_lock` the free list: losing the race is handled like an empty
/// (acquire) or full (release) list, so callers on different workers never wait on each other.
#[derive(Debug)]
pub struct Pool<T> {
    capacity: usize,
    free: Mutex<Vec<T>>,
}

impl<T: Poolable> Pool<T> {
    /// Creates a pool whose free list is filled with `capacity` fresh instances.
    pub fn new(capacity: usize) -> Self {
        let free = (0..capacity).map(|_| T::create()).collect();
        Self { capacity, free: Mutex::new(free) }
    }

    /// Creates a pool with an empty free list that fills up as instances are released.
    pub fn empty(capacity: usize) -> Self {
        Self { capacity, free: Mutex::new(Vec::with_capacity(capacity)) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of instances currently waiting in the free list.
    pub fn available(&self) -> usize {
        match self.free.lock() {
            Ok(free) => free.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Checks an instance out, recycling one from the free list when possible.
    ///
    /// The returned guard puts the instance back when dropped.
    pub fn acquire(self: &Arc<Self>) -> Pooled<T> {
        let recycled = match self.free.try_lock() {
            Ok(mut free) => free.pop(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().pop(),
            Err(TryLockError::WouldBlock) => None,
        };

        let (value, origin) = match recycled {
            Some(mut value) => {
                value.reset();
                (value, Origin::Pool)
            }
            None => {
                trace!("pool exhausted, allocating directly");
                (T::create(), Origin::Allocated)
            }
        };

        Pooled { value: ManuallyDrop::new(value), origin, pool: Arc::downgrade(self) }
    }

    /// Offers an instance back to the pool.
    ///
    /// Returns `false` when the instance was dropped instead because the free list is full.
    pub fn release(&self, mut value: T) -> bool {
        value.reset();
        let mut free = match self.free.try_lock() {
            Ok(free) => free,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return false,
        };

        if free.len() < self.capacity {
            free.push(value);
            true
        } else {
            false
        }
    }
}

/// An instance checked out of a [`Pool`].
#[derive(Debug)]
pub struct Pooled<T: Poolable> {
    value: ManuallyDrop<T>,
    origin: Origin,
    pool: Weak<Pool<T>>,
}

impl<T: Poolable> Pooled<T> {
    /// Wraps an instance that belongs to no pool; dropping the guard drops the instance.
    pub fn unpooled(value: T) -> Self {
        Self { value: ManuallyDrop::new(value), origin: Origin::Allocated, pool: Weak::new() }
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Detaches the instance: it will not go back to the pool.
    pub fn into_inner(self) -> T {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so both fields are moved out exactly once.
        let (value, pool) = unsafe { (ManuallyDrop::take(&mut this.value), ptr::read(&this.pool)) };
        drop(pool);
        value
    }
}

impl<T: Poolable> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Poolable> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: Poolable> Drop for Pooled<T> {
    fn drop(&mut self) {
        // SAFETY: `value` is not touched again after drop, and `into_inner` skips this drop.
        let value = unsafe { ManuallyDrop::take(&mut self.value) };
        if let Some(pool) = self.pool.upgrade() {
            pool.release(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[derive(Debug, Default)]
    struct Envelope {
        payload: Vec<u8>,
    }

    impl Poolable for Envelope {
        fn create() -> Self {
            Envelope::default()
        }

        fn reset(&mut self) {
            self.payload.clear();
        }
    }

    #[test]
    fn overflow_allocates_directly() {
        let capacity = 8;
        let pool = Arc::new(Pool::<Envelope>::new(capacity));

        let acquired: Vec<_> = (0..capacity + 5).map(|_| pool.acquire()).collect();

        let pooled = acquired.iter().filter(|item| item.origin() == Origin::Pool).count();
        let allocated = acquired.iter().filter(|item| item.origin() == Origin::Allocated).count();
        assert_eq!(pooled, capacity);
        assert_eq!(allocated, 5);
        assert_eq!(pool.available(), 0);

        // releasing everything never grows the free list past its capacity
        drop(acquired);
        assert_eq!(pool.available(), capacity);
    }

    #[test]
    fn released_instances_are_reset() {
        let pool = Arc::new(Pool::<Envelope>::empty(1));

        let mut first = pool.acquire();
        assert_eq!(first.origin(), Origin::Allocated);
        first.payload.extend_from_slice(b"stale");
        drop(first);

        let second = pool.acquire();
        assert_eq!(second.origin(), Origin::Pool);
        assert!(second.payload.is_empty());
    }

    #[test]
    fn release_respects_capacity() {
        let pool = Pool::<Envelope>::empty(2);
        assert!(pool.release(Envelope::create()));
        assert!(pool.release(Envelope::create()));
        assert!(!pool.release(Envelope::create()));
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn into_inner_detaches() {
        let pool = Arc::new(Pool::<BytesMut>::new(1));
        let buffer = pool.acquire().into_inner();
        assert!(buffer.capacity() >= POOLED_BUFFER_CAPACITY);
        drop(buffer);
        assert_eq!(pool.available(), 0);
        assert_eq!(Arc::weak_count(&pool), 0);
    }

    #[test]
    fn unpooled_drops_without_a_pool() {
        let mut item = Pooled::unpooled(Envelope::create());
        item.payload.push(1);
        assert_eq!(item.origin(), Origin::Allocated);
        assert_eq!(item.into_inner().payload, vec![1]);
    }

    #[test]
    fn outlives_pool() {
        let pool = Arc::new(Pool::<Envelope>::new(1));
        let item = pool.acquire();
        drop(pool);
        drop(item);
    }

    #[test]
    fn concurrent_acquire_release() {
        let capacity = 4;
        let pool = Arc::new(Pool::<BytesMut>::new(capacity));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let mut buffer = pool.acquire();
                        assert!(buffer.is_empty());
                        buffer.extend_from_slice(b"data");
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(pool.available() <= capacity);
    }
}
