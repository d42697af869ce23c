//! Logical channels multiplexed over the single transport.
//!
//! Channels 2 and 3 are reserved by convention for protocol control and
//! command messages.  Channels from 4 up carry stream data, three per
//! stream.  A channel is created lazily on first use and lives until
//! the connection closes it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use log::debug;

use super::streams::stream_id_for_channel;
use super::RtmpConnection;
use crate::messages::{Header, Packet, RtmpMessage};
use crate::service::{ServiceCall, Status};
use crate::sync::lock;

/// One outbound logical channel of a connection.
pub struct Channel {
    connection: Weak<RtmpConnection>,
    id: u32,
}

impl Channel {
    fn new(connection: Weak<RtmpConnection>, id: u32) -> Channel {
        Channel { connection, id }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Writes a message on this channel.  The header stream id is
    /// derived from the channel id; writes after close are dropped.
    pub fn write(&self, message: RtmpMessage) {
        match self.connection.upgrade() {
            Some(connection) => {
                let header = Header::new(self.id, stream_id_for_channel(self.id));
                connection.write_packet(Packet::new(header, message));
            }
            None => debug!("Channel {} has no connection, dropping message", self.id),
        }
    }

    /// Sends a status notification as an `onStatus` invoke with the
    /// conventional transaction id 1.
    pub fn send_status(&self, status: Status) {
        let call = ServiceCall::new("onStatus", vec![status.to_amf0()]);
        self.write(RtmpMessage::Invoke {
            transaction_id: 1,
            call,
        });
    }
}

/// The three channels an output stream writes to.
pub struct OutputStream {
    data: Arc<Channel>,
    video: Arc<Channel>,
    audio: Arc<Channel>,
}

impl OutputStream {
    pub(crate) fn new(data: Arc<Channel>, video: Arc<Channel>, audio: Arc<Channel>) -> OutputStream {
        OutputStream { data, video, audio }
    }

    pub fn data(&self) -> &Arc<Channel> {
        &self.data
    }

    pub fn video(&self) -> &Arc<Channel> {
        &self.video
    }

    pub fn audio(&self) -> &Arc<Channel> {
        &self.audio
    }
}

/// Channel table of one connection.  Get-or-insert is atomic under the
/// table lock, so concurrent first use of an id yields one instance.
pub(crate) struct ChannelTable {
    channels: Mutex<HashMap<u32, Arc<Channel>>>,
}

impl ChannelTable {
    pub fn new() -> ChannelTable {
        ChannelTable {
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_or_insert(&self, connection: &Arc<RtmpConnection>, channel_id: u32) -> Arc<Channel> {
        lock(&self.channels)
            .entry(channel_id)
            .or_insert_with(|| Arc::new(Channel::new(Arc::downgrade(connection), channel_id)))
            .clone()
    }

    pub fn remove(&self, channel_id: u32) -> Option<Arc<Channel>> {
        lock(&self.channels).remove(&channel_id)
    }

    pub fn contains(&self, channel_id: u32) -> bool {
        lock(&self.channels).contains_key(&channel_id)
    }

    /// Smallest channel id at or above the stream range that is not in
    /// use.
    pub fn next_available(&self) -> u32 {
        let channels = lock(&self.channels);
        let mut channel_id = 4;
        while channels.contains_key(&channel_id) {
            channel_id += 1;
        }
        channel_id
    }

    pub fn clear(&self) {
        lock(&self.channels).clear();
    }
}
