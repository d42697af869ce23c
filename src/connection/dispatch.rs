//! Inbound packet classification and dispatch.
//!
//! Control messages are handled synchronously on the transport thread
//! so they keep their relative order; everything else is submitted to
//! the shared worker pool.  Under queue pressure audio frames are the
//! first casualty: they can be dropped without corrupting playback,
//! unlike video or command messages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use failure::Error;
use log::{debug, error, info, trace, warn};

use super::{MessageHandler, RtmpConnection, CONTROL_CHANNEL};
use crate::messages::{MessageType, Packet, RtmpMessage};
use crate::sync::lock;

/// One inbound packet travelling through the worker pool.
pub(crate) struct ReceivedMessageTask {
    session_id: String,
    packet: Packet,
    handler: Arc<dyn MessageHandler>,
    connection: Arc<RtmpConnection>,
}

impl ReceivedMessageTask {
    fn new(
        packet: Packet,
        handler: Arc<dyn MessageHandler>,
        connection: Arc<RtmpConnection>,
    ) -> ReceivedMessageTask {
        ReceivedMessageTask {
            session_id: connection.session_id().to_string(),
            packet,
            handler,
            connection,
        }
    }

    /// Runs the handler under the deadlock guard.  The guard cannot
    /// interrupt a stuck worker; it flags the overrun and the task is
    /// left to finish on its own.
    fn run(self) -> Result<(), Error> {
        let ReceivedMessageTask {
            session_id,
            packet,
            handler,
            connection,
        } = self;
        let timeout_ms = connection.max_handling_timeout_ms.load(Ordering::SeqCst);
        let done = Arc::new(AtomicBool::new(false));
        let guard = connection.deadlock_guard.as_ref().map(|scheduler| {
            let done = done.clone();
            let message_type = packet.message_type();
            scheduler.schedule_once(
                Duration::from_millis(timeout_ms),
                Box::new(move || {
                    if !done.load(Ordering::SeqCst) {
                        warn!(
                            "Message processing exceeded {} ms on session=[{}], msgType=[{:?}], abandoning task",
                            timeout_ms, session_id, message_type
                        );
                    }
                }),
            )
        });
        let result = handler.message_received(&connection, packet);
        done.store(true, Ordering::SeqCst);
        if let Some(guard) = guard {
            guard.cancel();
        }
        result
    }
}

impl RtmpConnection {
    /// Entry point for every decoded inbound packet.
    ///
    /// Control types are forwarded to the handler on the calling
    /// thread; handler faults are logged and never propagate.  All
    /// other types are queued on the worker pool, subject to the
    /// audio-drop admission check.
    pub fn handle_message_received(self: &Arc<Self>, packet: Packet) {
        trace!("handle_message_received - {}", self.session_id());
        self.message_received();
        let message_type = packet.message_type();
        let handler = match lock(&self.handler).clone() {
            Some(handler) => handler,
            None => {
                warn!(
                    "No handler is set on {} state: {:?}",
                    self.session_id(),
                    self.state().phase()
                );
                return;
            }
        };
        if message_type.is_control() {
            if let Err(e) = handler.message_received(self, packet) {
                error!(
                    "Error processing received message on {}: {}",
                    self.session_id(),
                    e
                );
            }
            return;
        }

        let packet_number = self.packet_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let threshold = self.audio_drop_queue_threshold.load(Ordering::SeqCst);
        if threshold > 0 && self.current_queue_size.load(Ordering::SeqCst) >= threshold {
            if message_type == MessageType::AudioData {
                // a burst after network congestion; audio is the only
                // type that can be discarded safely
                info!(
                    "Queue threshold reached. Discarding packet: session=[{}], msgType=[{:?}], packetNum=[{}]",
                    self.session_id(),
                    message_type,
                    packet_number
                );
                self.message_dropped();
                return;
            }
        }

        let task = ReceivedMessageTask::new(packet, handler, self.clone());
        self.current_queue_size.fetch_add(1, Ordering::SeqCst);
        let connection = self.clone();
        let started_at = self.clock.now_millis();
        let submission = self.executor.execute(Box::new(move || {
            let result = task.run();
            let processing_time = connection.clock.now_millis().saturating_sub(started_at);
            match result {
                Ok(()) => debug!(
                    "onSuccess - session: {}, msgType: {:?}, processingTime: {}, packetNum: {}",
                    connection.session_id(),
                    message_type,
                    processing_time,
                    packet_number
                ),
                Err(e) => warn!(
                    "onFailure - session: {}, msgType: {:?}, processingTime: {}, packetNum: {}, error: {}",
                    connection.session_id(),
                    message_type,
                    processing_time,
                    packet_number,
                    e
                ),
            }
            connection.current_queue_size.fetch_sub(1, Ordering::SeqCst);
        }));
        if let Err(e) = submission {
            self.current_queue_size.fetch_sub(1, Ordering::SeqCst);
            info!(
                "Rejected message on session=[{}], msgType=[{:?}]: {}",
                self.session_id(),
                message_type,
                e
            );
        }
    }

    /// Counts an inbound message and advertises our read byte count
    /// when the interval has been crossed.
    pub fn message_received(self: &Arc<Self>) {
        trace!("message_received");
        self.read_messages.fetch_add(1, Ordering::SeqCst);
        self.update_bytes_read();
    }

    fn update_bytes_read(self: &Arc<Self>) {
        let bytes_read = self.transport.read_bytes();
        if bytes_read >= self.next_bytes_read.load(Ordering::SeqCst) {
            let sequence_number = (bytes_read % i32::MAX as u64) as u32;
            self.get_channel(CONTROL_CHANNEL)
                .write(RtmpMessage::BytesRead { sequence_number });
            self.next_bytes_read
                .fetch_add(self.bytes_read_interval.load(Ordering::SeqCst), Ordering::SeqCst);
        }
    }
}
