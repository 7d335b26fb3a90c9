use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::BytesMut;
use once_cell::sync::Lazy;
use tracing::{debug, error};

use crate::pool::{Pool, Pooled};

/// How many read buffers the process-wide pool keeps for reuse.
const READ_BUFFER_POOL_CAPACITY: usize = 32;

static READ_BUFFER_POOL: Lazy<Arc<Pool<BytesMut>>> = Lazy::new(|| Arc::new(Pool::empty(READ_BUFFER_POOL_CAPACITY)));

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// The pool connection read buffers come from unless another one is given.
pub fn read_buffer_pool() -> &'static Arc<Pool<BytesMut>> {
    &READ_BUFFER_POOL
}

/// Process-unique identity of a connection, used to name what a suspended computation waits on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A live connection shared between an incoming message and any decode in flight.
///
/// The connection owns the IO object and a read buffer holding bytes already pulled off the wire
/// but not yet consumed. It is always handled through an `Arc`: whoever drops the last reference
/// closes it, dropping the IO object and returning the read buffer to its pool.
///
/// After a framing violation the stream position can no longer be trusted and the connection is
/// marked unusable; owners must not start another message on it.
pub struct Connection<IO> {
    id: ConnectionId,
    reusable: AtomicBool,
    inner: Mutex<ConnectionInner<IO>>,
}

pub(crate) struct ConnectionInner<IO> {
    pub(crate) io: IO,
    pub(crate) read_buf: Pooled<BytesMut>,
    pub(crate) eof: bool,
}

impl<IO> Connection<IO> {
    /// Wraps `io` with an empty read buffer from the shared pool.
    pub fn new(io: IO) -> Arc<Self> {
        Self::with_pool(io, read_buffer_pool(), &[])
    }

    /// Wraps `io`, seeding the read buffer with bytes a header parser already read past the head.
    pub fn with_prefetched(io: IO, prefetched: &[u8]) -> Arc<Self> {
        Self::with_pool(io, read_buffer_pool(), prefetched)
    }

    pub fn with_pool(io: IO, pool: &Arc<Pool<BytesMut>>, prefetched: &[u8]) -> Arc<Self> {
        let mut read_buf = pool.acquire();
        read_buf.extend_from_slice(prefetched);

        let id = ConnectionId::next();
        debug!(connection = %id, prefetched = prefetched.len(), "connection opened");

        Arc::new(Self { id, reusable: AtomicBool::new(true), inner: Mutex::new(ConnectionInner { io, read_buf, eof: false }) })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Whether the connection is still positioned on a message boundary it can trust.
    pub fn is_reusable(&self) -> bool {
        self.reusable.load(Ordering::Acquire)
    }

    /// Marks the connection as unusable for further messages.
    pub fn mark_unusable(&self, reason: &str) {
        if self.reusable.swap(false, Ordering::AcqRel) {
            error!(connection = %self.id, reason, "connection can no longer be reused");
        }
    }

    /// Bytes pulled off the wire but not consumed by any body yet.
    pub fn buffered(&self) -> usize {
        self.lock().read_buf.len()
    }

    /// Whether the peer has signalled end of data.
    pub fn is_eof(&self) -> bool {
        self.lock().eof
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ConnectionInner<IO>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<IO> Drop for Connection<IO> {
    fn drop(&mut self) {
        debug!(connection = %self.id, reusable = self.is_reusable(), "connection closed");
    }
}

impl<IO> fmt::Debug for Connection<IO> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("id", &self.id).field("reusable", &self.is_reusable()).finish_non_exhaustive()
    }
}
