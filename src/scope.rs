//! Application-container seams.
//!
//! A connection belongs to at most one [`Scope`] after a successful
//! connect.  The scope decides admission, supplies the prototypes for
//! NetStream implementations and exposes the stream service used to
//! tear streams down on close.  All business logic stays behind these
//! traits; the connection only mediates.

use std::sync::{Arc, Weak};

use rml_amf0::Amf0Value;

use crate::connection::{ConnectionError, RtmpConnection};

/// The externally assigned client identity.
pub trait Client: Send + Sync {
    fn id(&self) -> String;

    /// Called once when the connection closes.
    fn unregister(&self, connection: &Arc<RtmpConnection>);
}

/// Everything a freshly created stream needs to know about its place in
/// the world.  Replaces the original's chain of property setters.
pub struct StreamBinding {
    pub stream_id: u32,
    /// Randomly generated stream name, unique per stream.
    pub name: String,
    /// Client buffer duration remembered before the stream existed.
    pub buffer_duration_ms: Option<u32>,
    pub connection: Weak<RtmpConnection>,
    pub scope: Arc<dyn Scope>,
}

/// A NetStream owned by a connection.  The concrete media behaviour
/// (publishing, playlist subscription, ...) lives with the
/// implementation.
pub trait ClientStream: Send + Sync {
    fn stream_id(&self) -> u32;

    fn name(&self) -> String;

    fn close(&self);
}

/// Produces stream instances from the container's configured
/// prototypes.
pub trait StreamFactory: Send + Sync {
    fn broadcast_stream(&self, binding: StreamBinding) -> Arc<dyn ClientStream>;

    fn single_item_subscriber_stream(&self, binding: StreamBinding) -> Arc<dyn ClientStream>;

    fn playlist_subscriber_stream(&self, binding: StreamBinding) -> Arc<dyn ClientStream>;
}

/// Deletion hook used while closing a connection.
pub trait StreamService: Send + Sync {
    fn delete_stream(&self, connection: &Arc<RtmpConnection>, stream_id: u32);
}

/// An application scope.
pub trait Scope: Send + Sync {
    fn name(&self) -> String;

    /// Admits or rejects the connection.  `Ok(false)` is a plain
    /// failure; `Err` with a `ClientRejected` kind carries the
    /// application's reason and is surfaced to the caller.
    fn connect(
        &self,
        connection: &Arc<RtmpConnection>,
        params: &[Amf0Value],
    ) -> Result<bool, ConnectionError>;

    /// Detaches the connection; called once from the close path.
    fn disconnect(&self, connection: &Arc<RtmpConnection>);

    fn stream_factory(&self) -> Arc<dyn StreamFactory>;

    fn stream_service(&self) -> Option<Arc<dyn StreamService>>;
}
