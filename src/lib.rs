//! The per-connection core of an RTMP server.
//!
//! This crate models a single live client session after the byte-level
//! handshake has completed: the protocol state machine, the logical
//! channels multiplexed over the one transport, the NetStream registry,
//! the RPC ledger with pending-call correlation, the ping/pong liveness
//! subsystem and the admission-controlled dispatch pipeline that feeds a
//! shared worker pool.
//!
//! The crate does not own any I/O.  The chunk-level byte codec, the
//! handshake, the application scopes and the concrete transport are all
//! external collaborators injected through the traits in [`transport`],
//! [`scope`] and [`runtime`].  Everything the connection sends is an
//! already-decoded [`messages::Packet`]; everything it receives arrives
//! through [`connection::RtmpConnection::handle_message_received`].

pub mod connection;
pub mod messages;
pub mod runtime;
pub mod scope;
pub mod service;
pub mod sync;
pub mod time;
pub mod transport;
