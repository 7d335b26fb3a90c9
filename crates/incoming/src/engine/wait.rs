use std::fmt;

use crate::connection::ConnectionId;

/// Which readiness a suspended computation waits for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Direction {
    Readable,
    Writable,
}

/// The resource a suspended computation waits on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ResourceId {
    /// A live connection the body is read from
    Connection(ConnectionId),
    /// The caller-provided sink a body is streamed into
    Sink,
}

/// What a suspended computation is parked on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct WaitCondition {
    resource: ResourceId,
    direction: Direction,
}

impl WaitCondition {
    pub fn new(resource: ResourceId, direction: Direction) -> Self {
        Self { resource, direction }
    }

    /// Waiting for bytes to arrive on a connection.
    pub fn readable(connection: ConnectionId) -> Self {
        Self::new(ResourceId::Connection(connection), Direction::Readable)
    }

    /// Waiting for the sink to accept more bytes.
    pub fn sink_writable() -> Self {
        Self::new(ResourceId::Sink, Direction::Writable)
    }

    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }
}

impl fmt::Display for WaitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = match self.direction {
            Direction::Readable => "readable",
            Direction::Writable => "writable",
        };
        match self.resource {
            ResourceId::Connection(id) => write!(f, "{id} {direction}"),
            ResourceId::Sink => write!(f, "sink {direction}"),
        }
    }
}
