//! Handshake-wait and keep-alive: the two scheduled tasks that decide
//! whether a client is still there.
//!
//! The keep-alive pings on a fixed rate, measures the round trip from
//! the echoed low-32-bit timestamp, and declares the connection
//! inactive when neither pongs nor data have arrived for longer than
//! the inactivity budget.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use log::{debug, trace, warn};

use super::{RtmpConnection, RtmpPhase, CONTROL_CHANNEL};
use crate::messages::{PingEvent, RtmpMessage};
use crate::sync::lock;
use crate::time::low32;

/// Task that keeps the connection alive and disconnects dead clients.
/// Carries its own byte-count snapshot so several connections can share
/// one scheduler.
pub(crate) struct KeepAliveTask {
    connection: Weak<RtmpConnection>,
    last_bytes_read: AtomicU64,
    last_bytes_read_time: AtomicU64,
}

impl KeepAliveTask {
    fn new(connection: Weak<RtmpConnection>) -> KeepAliveTask {
        KeepAliveTask {
            connection,
            last_bytes_read: AtomicU64::new(0),
            last_bytes_read_time: AtomicU64::new(0),
        }
    }

    pub(crate) fn run(&self) {
        let connection = match self.connection.upgrade() {
            Some(connection) => connection,
            None => return,
        };
        // no pinging until the connect workflow has finished
        if connection.state.phase() != RtmpPhase::Connected {
            return;
        }
        // skip a round instead of piling onto a stuck worker
        if connection
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        trace!("Running keep-alive for {}", connection.session_id());
        if connection.transport.is_connected() {
            let now = connection.clock.now_millis();
            let current_read_bytes = connection.transport.read_bytes();
            let previous_read_bytes = self.last_bytes_read.load(Ordering::SeqCst);
            trace!(
                "Time now: {} current read count: {} last read count: {}",
                now,
                current_read_bytes,
                previous_read_bytes
            );
            if current_read_bytes > previous_read_bytes {
                trace!("Client is still alive, no ping needed");
                if self
                    .last_bytes_read
                    .compare_exchange(
                        previous_read_bytes,
                        current_read_bytes,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    )
                    .is_ok()
                {
                    self.last_bytes_read_time.store(now, Ordering::SeqCst);
                }
                if connection.is_idle() {
                    connection.on_inactive();
                }
            } else {
                let last_ping_time = connection.last_ping_sent.load(Ordering::SeqCst);
                let last_pong_time = connection.last_pong_received.load(Ordering::SeqCst);
                let max_inactivity = connection.max_inactivity_ms.load(Ordering::SeqCst) as i64;
                let since_last_data =
                    now as i64 - self.last_bytes_read_time.load(Ordering::SeqCst) as i64;
                if last_pong_time > 0
                    && (last_ping_time as i64 - last_pong_time as i64) > max_inactivity
                    && since_last_data > max_inactivity
                {
                    warn!(
                        "Closing connection - inactivity timeout: session=[{}], lastPongReceived=[{} ms ago], lastPingSent=[{} ms ago], lastDataRx=[{} ms ago]",
                        connection.session_id(),
                        last_ping_time as i64 - last_pong_time as i64,
                        now as i64 - last_ping_time as i64,
                        since_last_data
                    );
                    connection.on_inactive();
                } else {
                    // trigger the client into sending something
                    connection.ping();
                }
            }
        } else {
            debug!(
                "No longer connected, clean up connection. Connection state: {:?}",
                connection.state.phase()
            );
            connection.on_inactive();
        }
        connection.running.store(false, Ordering::SeqCst);
    }
}

/// Task that disconnects clients that never complete a valid handshake.
pub(crate) struct WaitForHandshakeTask {
    connection: Weak<RtmpConnection>,
}

impl WaitForHandshakeTask {
    pub(crate) fn run(&self) {
        if let Some(connection) = self.connection.upgrade() {
            if connection.state.phase() != RtmpPhase::Connected {
                warn!(
                    "Closing {}, due to long handshake. State: {:?}",
                    connection.session_id(),
                    connection.state.phase()
                );
                connection.on_inactive();
            }
        }
    }
}

impl RtmpConnection {
    /// Starts the handshake timer; the connection is torn down if it
    /// has not reached the connected phase when the timer fires.
    pub fn start_wait_for_handshake(self: &Arc<Self>) {
        debug!("start_wait_for_handshake - {}", self.session_id());
        let task = WaitForHandshakeTask {
            connection: Arc::downgrade(self),
        };
        let delay = Duration::from_millis(self.max_handshake_timeout_ms.load(Ordering::SeqCst));
        let handle = self
            .scheduler
            .schedule_once(delay, Box::new(move || task.run()));
        *lock(&self.wait_for_handshake_task) = Some(handle);
    }

    pub(crate) fn stop_wait_for_handshake(&self) {
        if let Some(task) = lock(&self.wait_for_handshake_task).take() {
            if task.cancel() {
                debug!("waitForHandshake was cancelled for {}", self.session_id());
            }
        }
    }

    /// Starts the ping / pong round-trip measurement on the shared
    /// scheduler.  A ping interval of 0 disables it.
    pub(crate) fn start_round_trip_measurement(self: &Arc<Self>) {
        let ping_interval = self.ping_interval_ms.load(Ordering::SeqCst);
        if ping_interval == 0 {
            return;
        }
        debug!("start_round_trip_measurement - {}", self.session_id());
        let task = Arc::new(KeepAliveTask::new(Arc::downgrade(self)));
        let handle = self.scheduler.schedule_at_fixed_rate(
            Duration::from_millis(ping_interval),
            Box::new(move || task.run()),
        );
        *lock(&self.keep_alive_task) = Some(handle);
        debug!("Keep alive scheduled for: {}", self.session_id());
    }

    pub(crate) fn stop_round_trip_measurement(&self) {
        if let Some(task) = lock(&self.keep_alive_task).take() {
            if task.cancel() {
                debug!("Keep alive was cancelled for {}", self.session_id());
            }
        }
    }

    /// Sends a liveness probe carrying the low 32 bits of the current
    /// time for the peer to echo.
    pub fn ping(self: &Arc<Self>) {
        let new_ping_time = self.clock.now_millis();
        debug!(
            "Send Ping: session=[{}], currentTime=[{}], lastPingTime=[{}]",
            self.session_id(),
            new_ping_time,
            self.last_ping_sent.load(Ordering::SeqCst)
        );
        // seed the pong timestamp on the very first ping so the first
        // interval is well-defined
        if self.last_ping_sent.load(Ordering::SeqCst) == 0 {
            self.last_pong_received.store(new_ping_time, Ordering::SeqCst);
        }
        self.last_ping_sent.store(new_ping_time, Ordering::SeqCst);
        self.write_ping(PingEvent::ping_request(low32(new_ping_time)));
    }

    /// Writes an explicit ping event on the control channel.
    pub fn write_ping(self: &Arc<Self>, ping: PingEvent) {
        self.get_channel(CONTROL_CHANNEL).write(RtmpMessage::Ping(ping));
    }

    /// Marks that a pong was received.  The round trip time is only
    /// derived from a pong matching the last ping we sent.
    pub fn ping_received(&self, pong: &PingEvent) {
        let now = self.clock.now_millis();
        let previous_ping_value = low32(self.last_ping_sent.load(Ordering::SeqCst));
        debug!(
            "Pong Rx: session=[{}] at {} with value {}, previous sent value {}",
            self.session_id(),
            now,
            pong.value2,
            previous_ping_value
        );
        if pong.value2 == previous_ping_value {
            let round_trip = low32(now).wrapping_sub(pong.value2);
            self.last_ping_rtt.store(i64::from(round_trip), Ordering::SeqCst);
            debug!(
                "Ping response session=[{}], RTT=[{} ms]",
                self.session_id(),
                round_trip
            );
        } else if self.transport.pending_messages() > 4 {
            // stale pong with a backlog; worth a congestion note
            let ping_rtt = low32(now).wrapping_sub(pong.value2);
            debug!(
                "Pong delayed: session=[{}], ping response took [{} ms] to arrive. Connection may be congested, or loopback",
                self.session_id(),
                ping_rtt
            );
        }
        self.last_pong_received.store(now, Ordering::SeqCst);
    }

    /// Whether the client has exceeded the maximum idle period: a pong
    /// has been seen, but the last ping has gone unanswered for longer
    /// than the inactivity budget.
    pub fn is_idle(&self) -> bool {
        let last_ping_time = self.last_ping_sent.load(Ordering::SeqCst);
        let last_pong_time = self.last_pong_received.load(Ordering::SeqCst);
        let max_inactivity = self.max_inactivity_ms.load(Ordering::SeqCst) as i64;
        let idle = last_pong_time > 0
            && (last_ping_time as i64 - last_pong_time as i64) > max_inactivity;
        trace!(
            "Connection {} {} idle",
            self.session_id(),
            if idle { "is" } else { "is not" }
        );
        idle
    }

    /// Round trip time of the last matched ping / pong pair, or -1
    /// before the first match.
    pub fn last_ping_time(&self) -> i64 {
        self.last_ping_rtt.load(Ordering::SeqCst)
    }

    /// Difference between when the last ping was sent and the last pong
    /// was received.
    pub fn last_ping_sent_and_last_pong_received_interval(&self) -> i64 {
        self.last_ping_sent.load(Ordering::SeqCst) as i64
            - self.last_pong_received.load(Ordering::SeqCst) as i64
    }

    /// Reacts to a dead or timed-out client.  Runs the injected hook
    /// when one is set, otherwise closes the connection.
    pub(crate) fn on_inactive(self: &Arc<Self>) {
        let hook = lock(&self.inactive_hook).clone();
        match hook {
            Some(hook) => hook(),
            None => {
                warn!(
                    "Inactive connection {} with no inactivity hook, closing",
                    self.session_id()
                );
                self.close();
            }
        }
    }
}
