//! The capability set a concrete transport lends to a connection.

use bytes::Bytes;

use crate::messages::Packet;

/// What the connection needs from its transport: a way to push packets
/// and raw buffers toward the peer, and the I/O counters the liveness
/// and flow-control logic read.
///
/// Implementations serialise the packet with whatever chunk codec they
/// own.  Calls to `write` for one connection are already serialised by
/// the connection's encoder lock.
pub trait Transport: Send + Sync {
    fn write(&self, packet: &Packet);

    fn write_raw(&self, data: Bytes);

    /// Total bytes read from the peer so far.
    fn read_bytes(&self) -> u64;

    /// Total bytes written to the peer so far.
    fn written_bytes(&self) -> u64;

    /// Messages queued for write but not yet on the wire.
    fn pending_messages(&self) -> u64;

    fn is_connected(&self) -> bool;
}
