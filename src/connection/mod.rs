//! The per-connection core: one [`RtmpConnection`] per live client
//! session.
//!
//! The connection owns the protocol state, the channel table, the
//! NetStream registry, the RPC ledger and the liveness timers for its
//! own lifetime, and is driven concurrently by the transport reader
//! thread, the shared worker pool and the shared scheduler.  All
//! mutable state is therefore behind atomics or short mutex sections.

mod channel;
mod dispatch;
mod errors;
mod liveness;
mod state;
mod streams;


pub use self::channel::{Channel, OutputStream};
pub use self::errors::{ConnectionError, ConnectionErrorKind};
pub use self::state::{AmfEncoding, RtmpPhase, RtmpState};
pub use self::streams::{first_channel_for_stream, stream_id_for_channel};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use failure::Error;
use log::{debug, info, trace, warn};
use rml_amf0::Amf0Value;
use uuid::Uuid;

use self::channel::ChannelTable;
use self::streams::StreamRegistry;
use crate::messages::{BandwidthLimitType, Packet, RtmpMessage, SharedObjectEvent, SharedObjectMessage};
use crate::runtime::{MessageExecutor, Scheduler, TaskHandle};
use crate::scope::{Client, ClientStream, Scope, StreamBinding, StreamFactory};
use crate::service::{CallResultCallback, DeferredResult, PendingServiceCall, ServiceCall, Status};
use crate::sync::{lock, FairSemaphore};
use crate::time::Clock;
use crate::transport::Transport;

/// Channel conventionally carrying protocol control messages.
pub const CONTROL_CHANNEL: u32 = 2;

/// Channel conventionally carrying command (invoke/notify) messages.
pub const COMMAND_CHANNEL: u32 = 3;

/// Synchronous entry point for every inbound packet.  Implementations
/// may fail; the connection logs the fault and keeps the session alive.
pub trait MessageHandler: Send + Sync {
    fn message_received(&self, connection: &Arc<RtmpConnection>, packet: Packet)
        -> Result<(), Error>;
}

/// Events other parts of the server dispatch onto a connection.
pub enum ConnectionEvent {
    /// An outgoing invoke towards the client, optionally observing the
    /// result.
    ClientInvoke {
        method: String,
        args: Vec<Amf0Value>,
        callback: Option<CallResultCallback>,
    },

    /// An outgoing notify towards the client.
    ClientNotify {
        method: String,
        args: Vec<Amf0Value>,
    },

    /// A shared-object sync; delivered through the shared-object
    /// service, not through this dispatcher.
    SharedObjectSync { message: SharedObjectMessage },
}

impl ConnectionEvent {
    fn kind(&self) -> &'static str {
        match *self {
            ConnectionEvent::ClientInvoke { .. } => "CLIENT_INVOKE",
            ConnectionEvent::ClientNotify { .. } => "CLIENT_NOTIFY",
            ConnectionEvent::SharedObjectSync { .. } => "SHARED_OBJECT_SYNC",
        }
    }
}

/// Tunable knobs of a connection, applied at construction and
/// adjustable afterwards through the corresponding setters.
#[derive(Clone)]
pub struct ConnectionSettings {
    /// Interval between keep-alive pings; 0 disables the keep-alive.
    pub ping_interval_ms: u64,
    /// Silence span after which a client is considered dead.
    pub max_inactivity_ms: u64,
    /// Maximum time to wait for a valid handshake.
    pub max_handshake_timeout_ms: u64,
    /// Maximum wall time a single inbound message may spend in a
    /// worker before the deadlock guard flags it.
    pub max_handling_timeout_ms: u64,
    /// How often the peer is told how many bytes we have read.
    pub bytes_read_interval: u64,
    /// Worker queue depth that triggers audio packet dropping; 0
    /// disables dropping.
    pub audio_drop_queue_threshold: usize,
    /// Enforcement advertised with client bandwidth messages.
    pub limit_type: BandwidthLimitType,
}

impl Default for ConnectionSettings {
    fn default() -> ConnectionSettings {
        ConnectionSettings {
            ping_interval_ms: 5000,
            max_inactivity_ms: 60000,
            max_handshake_timeout_ms: 5000,
            max_handling_timeout_ms: 500,
            bytes_read_interval: 1024 * 1024,
            audio_drop_queue_threshold: 0,
            limit_type: BandwidthLimitType::Hard,
        }
    }
}

/// The shared services a connection runs on.  The scheduler and the
/// executor are owned by the server and shared between connections.
#[derive(Clone)]
pub struct ConnectionRuntime {
    pub transport: Arc<dyn Transport>,
    pub scheduler: Arc<dyn Scheduler>,
    pub executor: Arc<dyn MessageExecutor>,
    /// Separate scheduler watching for stuck message handlers; `None`
    /// disables the watchdog.
    pub deadlock_guard: Option<Arc<dyn Scheduler>>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Default)]
struct ConnectionProperties {
    host: String,
    path: String,
    params: HashMap<String, Amf0Value>,
}

/// A single live RTMP client session after the handshake.
pub struct RtmpConnection {
    session_id: String,
    remote_address: String,
    state: RtmpState,
    properties: Mutex<ConnectionProperties>,
    scope: Mutex<Option<Arc<dyn Scope>>>,
    client: Mutex<Option<Arc<dyn Client>>>,
    handler: Mutex<Option<Arc<dyn MessageHandler>>>,
    inactive_hook: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,

    transport: Arc<dyn Transport>,
    scheduler: Arc<dyn Scheduler>,
    executor: Arc<dyn MessageExecutor>,
    deadlock_guard: Option<Arc<dyn Scheduler>>,
    clock: Arc<dyn Clock>,

    channels: ChannelTable,
    streams: StreamRegistry,

    transaction_id: AtomicU32,
    pending_calls: Mutex<HashMap<u32, PendingServiceCall>>,
    deferred_results: Mutex<Vec<Arc<DeferredResult>>>,

    last_ping_rtt: AtomicI64,
    last_ping_sent: AtomicU64,
    last_pong_received: AtomicU64,
    ping_interval_ms: AtomicU64,
    max_inactivity_ms: AtomicU64,
    max_handshake_timeout_ms: AtomicU64,
    max_handling_timeout_ms: AtomicU64,

    bytes_read_interval: AtomicU64,
    next_bytes_read: AtomicU64,
    client_bytes_read: AtomicU64,

    pending_videos: Mutex<HashMap<u32, Arc<AtomicI64>>>,
    limit_type: AtomicU8,

    read_messages: AtomicU64,
    written_messages: AtomicU64,
    dropped_messages: AtomicU64,

    timer: AtomicU32,
    closing: AtomicBool,
    running: AtomicBool,
    packet_sequence: AtomicU64,
    audio_drop_queue_threshold: AtomicUsize,
    current_queue_size: AtomicUsize,

    decoder_lock: FairSemaphore,
    encoder_lock: FairSemaphore,

    wait_for_handshake_task: Mutex<Option<Box<dyn TaskHandle>>>,
    keep_alive_task: Mutex<Option<Box<dyn TaskHandle>>>,
}

impl RtmpConnection {
    /// Creates an anonymous connection without a scope.  The scope is
    /// bound later by [`RtmpConnection::connect`].
    pub fn new(
        remote_address: &str,
        settings: ConnectionSettings,
        runtime: ConnectionRuntime,
    ) -> Arc<RtmpConnection> {
        Arc::new(RtmpConnection {
            session_id: Uuid::new_v4().to_string(),
            remote_address: remote_address.to_string(),
            state: RtmpState::new(),
            properties: Mutex::new(ConnectionProperties::default()),
            scope: Mutex::new(None),
            client: Mutex::new(None),
            handler: Mutex::new(None),
            inactive_hook: Mutex::new(None),

            transport: runtime.transport,
            scheduler: runtime.scheduler,
            executor: runtime.executor,
            deadlock_guard: runtime.deadlock_guard,
            clock: runtime.clock,

            channels: ChannelTable::new(),
            streams: StreamRegistry::new(),

            transaction_id: AtomicU32::new(1),
            pending_calls: Mutex::new(HashMap::new()),
            deferred_results: Mutex::new(Vec::new()),

            last_ping_rtt: AtomicI64::new(-1),
            last_ping_sent: AtomicU64::new(0),
            last_pong_received: AtomicU64::new(0),
            ping_interval_ms: AtomicU64::new(settings.ping_interval_ms),
            max_inactivity_ms: AtomicU64::new(settings.max_inactivity_ms),
            max_handshake_timeout_ms: AtomicU64::new(settings.max_handshake_timeout_ms),
            max_handling_timeout_ms: AtomicU64::new(settings.max_handling_timeout_ms),

            bytes_read_interval: AtomicU64::new(settings.bytes_read_interval),
            next_bytes_read: AtomicU64::new(settings.bytes_read_interval),
            client_bytes_read: AtomicU64::new(0),

            pending_videos: Mutex::new(HashMap::new()),
            limit_type: AtomicU8::new(settings.limit_type.limit_id()),

            read_messages: AtomicU64::new(0),
            written_messages: AtomicU64::new(0),
            dropped_messages: AtomicU64::new(0),

            timer: AtomicU32::new(0),
            closing: AtomicBool::new(false),
            running: AtomicBool::new(false),
            packet_sequence: AtomicU64::new(0),
            audio_drop_queue_threshold: AtomicUsize::new(settings.audio_drop_queue_threshold),
            current_queue_size: AtomicUsize::new(0),

            decoder_lock: FairSemaphore::new(1),
            encoder_lock: FairSemaphore::new(1),

            wait_for_handshake_task: Mutex::new(None),
            keep_alive_task: Mutex::new(None),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    pub fn state(&self) -> &RtmpState {
        &self.state
    }

    pub fn encoding(&self) -> AmfEncoding {
        self.state.encoding()
    }

    pub fn is_disconnected(&self) -> bool {
        self.state.phase() == RtmpPhase::Disconnected
    }

    pub fn set_handler(&self, handler: Arc<dyn MessageHandler>) {
        *lock(&self.handler) = Some(handler);
    }

    pub fn set_client(&self, client: Arc<dyn Client>) {
        *lock(&self.client) = Some(client);
    }

    pub fn client(&self) -> Option<Arc<dyn Client>> {
        lock(&self.client).clone()
    }

    pub fn client_id(&self) -> Option<String> {
        lock(&self.client).as_ref().map(|client| client.id())
    }

    pub fn scope(&self) -> Option<Arc<dyn Scope>> {
        lock(&self.scope).clone()
    }

    /// Replaces the default inactivity reaction (close the connection)
    /// with a caller-supplied hook.
    pub fn set_inactive_hook(&self, hook: Box<dyn Fn() + Send + Sync>) {
        *lock(&self.inactive_hook) = Some(Arc::from(hook));
    }

    pub fn decoder_lock(&self) -> &FairSemaphore {
        &self.decoder_lock
    }

    pub fn encoder_lock(&self) -> &FairSemaphore {
        &self.encoder_lock
    }

    /// Returns a usable timestamp for written packets.  Strictly
    /// monotone across callers.
    pub fn get_timer(&self) -> u32 {
        self.timer.fetch_add(1, Ordering::SeqCst) + 1
    }

    // -- tunables ---------------------------------------------------------

    /// Interval in ms used to ping clients; 0 disables ghost detection.
    pub fn set_ping_interval(&self, ping_interval_ms: u64) {
        self.ping_interval_ms.store(ping_interval_ms, Ordering::SeqCst);
    }

    pub fn set_max_inactivity(&self, max_inactivity_ms: u64) {
        self.max_inactivity_ms.store(max_inactivity_ms, Ordering::SeqCst);
    }

    pub fn set_max_handshake_timeout(&self, max_handshake_timeout_ms: u64) {
        self.max_handshake_timeout_ms
            .store(max_handshake_timeout_ms, Ordering::SeqCst);
    }

    pub fn set_max_handling_timeout(&self, max_handling_timeout_ms: u64) {
        self.max_handling_timeout_ms
            .store(max_handling_timeout_ms, Ordering::SeqCst);
    }

    /// Worker queue depth that triggers audio packet dropping; 0
    /// disables it.
    pub fn set_audio_drop_queue_threshold(&self, threshold: usize) {
        self.audio_drop_queue_threshold.store(threshold, Ordering::SeqCst);
    }

    pub fn set_bandwidth_limit_type(&self, limit_type: BandwidthLimitType) {
        self.limit_type.store(limit_type.limit_id(), Ordering::SeqCst);
    }

    pub fn bandwidth_limit_type(&self) -> BandwidthLimitType {
        match self.limit_type.load(Ordering::SeqCst) {
            1 => BandwidthLimitType::Soft,
            2 => BandwidthLimitType::Dynamic,
            _ => BandwidthLimitType::Hard,
        }
    }

    // -- lifecycle --------------------------------------------------------

    /// Opens the connection and starts waiting for a valid handshake.
    pub fn open(self: &Arc<Self>) {
        trace!("open - {}", self.session_id);
        self.start_wait_for_handshake();
    }

    /// Records connection metadata sent by the client with its connect
    /// command.  Advertising `objectEncoding` 3 switches the session to
    /// AMF3.
    pub fn setup(&self, host: &str, path: &str, params: HashMap<String, Amf0Value>) {
        let mut properties = lock(&self.properties);
        properties.host = host.to_string();
        properties.path = path.to_string();
        properties.params = params;
        if let Some(Amf0Value::Number(encoding)) = properties.params.get("objectEncoding") {
            if *encoding == 3.0 {
                debug!("Setting object encoding to AMF3");
                self.state.set_encoding(AmfEncoding::Amf3);
            }
        }
    }

    pub fn host(&self) -> String {
        lock(&self.properties).host.clone()
    }

    pub fn path(&self) -> String {
        lock(&self.properties).path.clone()
    }

    pub fn parameters(&self) -> HashMap<String, Amf0Value> {
        lock(&self.properties).params.clone()
    }

    /// Binds the connection to a scope.  On success the handshake wait
    /// is cancelled and the keep-alive starts; an application rejection
    /// is surfaced to the caller after the handshake wait is cancelled.
    pub fn connect(
        self: &Arc<Self>,
        scope: Arc<dyn Scope>,
        params: Vec<Amf0Value>,
    ) -> Result<bool, ConnectionError> {
        debug!("Connect scope: {}", scope.name());
        if self.closing.load(Ordering::SeqCst) {
            return Err(ConnectionError::connection_closed());
        }
        match scope.connect(self, &params) {
            Ok(true) => {
                *lock(&self.scope) = Some(scope);
                self.stop_wait_for_handshake();
                // the handshake has completed; start the ping / pong
                // keep-alive
                self.start_round_trip_measurement();
                Ok(true)
            }
            Ok(false) => {
                debug!("Connect failed");
                Ok(false)
            }
            Err(e) => {
                info!("Client rejected, reason: {}", e);
                self.stop_wait_for_handshake();
                Err(e)
            }
        }
    }

    /// Closes the connection exactly once: cancels the scheduled tasks,
    /// fails the surviving pending calls, tears the streams down, and
    /// clears every map so in-flight workers find nothing to act on.
    pub fn close(self: &Arc<Self>) {
        if self
            .closing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Already closing..");
            return;
        }
        debug!("close: {}", self.session_id);
        self.stop_wait_for_handshake();
        self.stop_round_trip_measurement();
        match self.state.phase() {
            RtmpPhase::Disconnected => {
                debug!("Already disconnected");
                return;
            }
            phase => {
                debug!("State: {:?}", phase);
                self.state.set_phase(RtmpPhase::Disconnecting);
            }
        }
        self.send_pending_service_calls_close_error();
        let scope = lock(&self.scope).clone();
        if let Some(ref scope) = scope {
            match scope.stream_service() {
                Some(service) => {
                    for stream in self.streams.live_streams() {
                        debug!("Closing stream: {}", stream.stream_id());
                        service.delete_stream(self, stream.stream_id());
                        self.streams.decrement_used();
                    }
                }
                None => debug!("Stream service was not found for scope: {}", scope.name()),
            }
        }
        // detach the scope and unregister the client
        if let Some(scope) = lock(&self.scope).take() {
            scope.disconnect(self);
        }
        if let Some(client) = lock(&self.client).take() {
            client.unregister(self);
        }
        self.channels.clear();
        self.streams.clear();
        lock(&self.pending_calls).clear();
        lock(&self.deferred_results).clear();
        lock(&self.pending_videos).clear();
        // no codec operation may start after this point
        self.decoder_lock.drain();
        self.encoder_lock.drain();
        self.state.set_phase(RtmpPhase::Disconnected);
    }

    // -- channels ---------------------------------------------------------

    /// Returns the channel for the id, creating it on first use.
    pub fn get_channel(self: &Arc<Self>, channel_id: u32) -> Arc<Channel> {
        self.channels.get_or_insert(self, channel_id)
    }

    pub fn close_channel(&self, channel_id: u32) {
        let channel = self.channels.remove(channel_id);
        debug!(
            "Closing / removing channel: {:?}",
            channel.map(|c| c.id())
        );
    }

    pub fn is_channel_used(&self, channel_id: u32) -> bool {
        self.channels.contains(channel_id)
    }

    pub fn next_available_channel_id(&self) -> u32 {
        self.channels.next_available()
    }

    /// Creates the channel triple an output stream writes to: data,
    /// video and audio, in consecutive slots.
    pub fn create_output_stream(self: &Arc<Self>, stream_id: u32) -> OutputStream {
        let mut channel_id = first_channel_for_stream(stream_id);
        debug!("Channel id range start: {}", channel_id);
        let data = self.get_channel(channel_id);
        channel_id += 1;
        let video = self.get_channel(channel_id);
        channel_id += 1;
        let audio = self.get_channel(channel_id);
        OutputStream::new(data, video, audio)
    }

    // -- streams ----------------------------------------------------------

    /// Reserves the lowest free stream id.
    pub fn reserve_stream_id(&self) -> u32 {
        self.streams.reserve_stream_id()
    }

    /// Reserves the requested stream id, falling back to the lowest
    /// free one when it is taken.
    pub fn reserve_requested_stream_id(&self, stream_id: u32) -> u32 {
        self.streams.reserve_requested_stream_id(stream_id)
    }

    pub fn is_valid_stream_id(&self, stream_id: u32) -> bool {
        self.streams.is_valid_stream_id(stream_id)
    }

    pub fn new_broadcast_stream(self: &Arc<Self>, stream_id: u32) -> Option<Arc<dyn ClientStream>> {
        self.new_stream(stream_id, |factory, binding| factory.broadcast_stream(binding))
    }

    pub fn new_single_item_subscriber_stream(
        self: &Arc<Self>,
        stream_id: u32,
    ) -> Option<Arc<dyn ClientStream>> {
        self.new_stream(stream_id, |factory, binding| {
            factory.single_item_subscriber_stream(binding)
        })
    }

    pub fn new_playlist_subscriber_stream(
        self: &Arc<Self>,
        stream_id: u32,
    ) -> Option<Arc<dyn ClientStream>> {
        self.new_stream(stream_id, |factory, binding| {
            factory.playlist_subscriber_stream(binding)
        })
    }

    fn new_stream<F>(self: &Arc<Self>, stream_id: u32, create: F) -> Option<Arc<dyn ClientStream>>
    where
        F: FnOnce(&Arc<dyn StreamFactory>, StreamBinding) -> Arc<dyn ClientStream>,
    {
        if !self.streams.is_valid_stream_id(stream_id) {
            return None;
        }
        let scope = lock(&self.scope).clone()?;
        let factory = scope.stream_factory();
        let binding = StreamBinding {
            stream_id,
            name: self.create_stream_name(),
            buffer_duration_ms: self.streams.buffer_duration(stream_id),
            connection: Arc::downgrade(self),
            scope: scope.clone(),
        };
        let stream = create(&factory, binding);
        self.streams.register_stream(stream.clone());
        self.streams.increment_used();
        Some(stream)
    }

    fn create_stream_name(&self) -> String {
        Uuid::new_v4().to_string()
    }

    /// Registers a stream created outside the reserve flow, reserving
    /// its id if it is still free.
    pub fn add_client_stream(&self, stream: Arc<dyn ClientStream>) {
        if self.streams.reserve_exact(stream.stream_id()) {
            self.streams.register_stream(stream);
            self.streams.increment_used();
        }
    }

    pub fn remove_client_stream(&self, stream_id: u32) {
        self.unreserve_stream_id(stream_id);
    }

    pub fn get_stream_by_id(&self, stream_id: u32) -> Option<Arc<dyn ClientStream>> {
        self.streams.stream_by_id(stream_id)
    }

    pub fn get_stream_id_for_channel(&self, channel_id: u32) -> u32 {
        stream_id_for_channel(channel_id)
    }

    pub fn get_stream_by_channel_id(&self, channel_id: u32) -> Option<Arc<dyn ClientStream>> {
        self.streams.stream_by_channel_id(channel_id)
    }

    /// Removes a stream, its buffer hint and its pending-video counter.
    /// The id stays reserved.
    pub fn delete_stream_by_id(&self, stream_id: u32) {
        if self.streams.remove_stream(stream_id) {
            lock(&self.pending_videos).remove(&stream_id);
        }
    }

    pub fn unreserve_stream_id(&self, stream_id: u32) {
        self.delete_stream_by_id(stream_id);
        self.streams.unreserve(stream_id);
    }

    pub fn remember_stream_buffer_duration(&self, stream_id: u32, buffer_duration_ms: u32) {
        self.streams
            .remember_buffer_duration(stream_id, buffer_duration_ms);
    }

    pub fn used_stream_count(&self) -> i64 {
        self.streams.used_stream_count()
    }

    // -- RPC --------------------------------------------------------------

    /// Generates the next transaction id for remote calls.
    pub fn next_transaction_id(&self) -> u32 {
        self.transaction_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn register_pending_call(&self, transaction_id: u32, call: PendingServiceCall) {
        lock(&self.pending_calls).insert(transaction_id, call);
    }

    /// Non-destructive view of a pending call's service call.
    pub fn get_pending_call(&self, transaction_id: u32) -> Option<ServiceCall> {
        lock(&self.pending_calls)
            .get(&transaction_id)
            .map(|pending| pending.call().clone())
    }

    /// Retrieves and removes the pending call for the transaction id.
    pub fn retrieve_pending_call(&self, transaction_id: u32) -> Option<PendingServiceCall> {
        lock(&self.pending_calls).remove(&transaction_id)
    }

    /// Sends an invoke on the given channel.  The call is registered as
    /// pending under a fresh transaction id before the message is
    /// written so a fast reply always finds it.
    pub fn invoke_call(self: &Arc<Self>, call: PendingServiceCall, channel_id: u32) {
        let transaction_id = self.next_transaction_id();
        let message = RtmpMessage::Invoke {
            transaction_id,
            call: call.call().clone(),
        };
        self.register_pending_call(transaction_id, call);
        self.get_channel(channel_id).write(message);
    }

    /// Invokes a method on the client over the command channel.
    pub fn invoke_method(
        self: &Arc<Self>,
        method: &str,
        args: Vec<Amf0Value>,
        callback: Option<CallResultCallback>,
    ) {
        let mut call = PendingServiceCall::new(ServiceCall::new(method, args));
        if let Some(callback) = callback {
            call.register_callback(callback);
        }
        self.invoke_call(call, COMMAND_CHANNEL);
    }

    /// Sends a notify (an invoke without result correlation) on the
    /// given channel.
    pub fn notify_call(self: &Arc<Self>, call: ServiceCall, channel_id: u32) {
        self.get_channel(channel_id).write(RtmpMessage::Notify { call });
    }

    pub fn notify_method(self: &Arc<Self>, method: &str, args: Vec<Amf0Value>) {
        self.notify_call(ServiceCall::new(method, args), COMMAND_CHANNEL);
    }

    pub fn status(self: &Arc<Self>, status: Status) {
        self.status_on_channel(status, COMMAND_CHANNEL);
    }

    pub fn status_on_channel(self: &Arc<Self>, status: Status, channel_id: u32) {
        self.get_channel(channel_id).send_status(status);
    }

    pub fn register_deferred_result(&self, result: Arc<DeferredResult>) {
        lock(&self.deferred_results).push(result);
    }

    pub fn unregister_deferred_result(&self, result: &DeferredResult) {
        lock(&self.deferred_results).retain(|registered| registered.id() != result.id());
    }

    pub fn deferred_result_count(&self) -> usize {
        lock(&self.deferred_results).len()
    }

    /// Fails every surviving pending call with a not-connected status.
    /// Each registered callback observes the failed call exactly once.
    pub fn send_pending_service_calls_close_error(&self) {
        let pending: Vec<PendingServiceCall> = {
            let mut calls = lock(&self.pending_calls);
            if calls.is_empty() {
                return;
            }
            debug!("Connection calls pending: {}", calls.len());
            calls.drain().map(|(_, call)| call).collect()
        };
        for call in pending {
            call.fail_not_connected();
        }
    }

    /// Dispatches a connection-level event: outgoing invokes and
    /// notifies are sent, anything else is logged and ignored.
    pub fn dispatch_event(self: &Arc<Self>, event: ConnectionEvent) {
        debug!("Event notify: {}", event.kind());
        match event {
            ConnectionEvent::ClientInvoke {
                method,
                args,
                callback,
            } => self.invoke_method(&method, args, callback),
            ConnectionEvent::ClientNotify { method, args } => self.notify_method(&method, args),
            other => warn!("Unhandled event: {}", other.kind()),
        }
    }

    // -- outbound data ----------------------------------------------------

    /// Advertises bandwidth to the peer: how fast we want data and how
    /// fast we shall send it.
    pub fn set_bandwidth(self: &Arc<Self>, mbits: u32) {
        let channel = self.get_channel(CONTROL_CHANNEL);
        channel.write(RtmpMessage::ServerBandwidth { window_size: mbits });
        channel.write(RtmpMessage::ClientBandwidth {
            window_size: mbits,
            limit_type: self.bandwidth_limit_type(),
        });
    }

    /// Writes a packet through the transport.  Concurrent writers are
    /// serialised by the encoder lock; once the lock has been drained
    /// by close the packet is counted as dropped.
    pub fn write_packet(&self, packet: Packet) {
        match self.encoder_lock.acquire() {
            Ok(permit) => {
                self.writing_message(&packet);
                self.transport.write(&packet);
                drop(permit);
                self.message_sent(&packet);
            }
            Err(_) => {
                debug!(
                    "Encoder lock closed on {}, dropping outbound packet",
                    self.session_id
                );
                self.message_dropped();
            }
        }
    }

    /// Writes an already framed buffer through the transport.
    pub fn write_raw(&self, data: Bytes) {
        match self.encoder_lock.acquire() {
            Ok(_permit) => self.transport.write_raw(data),
            Err(_) => {
                debug!(
                    "Encoder lock closed on {}, dropping raw buffer",
                    self.session_id
                );
                self.message_dropped();
            }
        }
    }

    /// Builds and sends a shared-object sync message on the command
    /// channel, using the flex framing when the session negotiated
    /// AMF3.
    pub fn send_shared_object_message(
        self: &Arc<Self>,
        name: &str,
        version: u32,
        persistent: bool,
        events: Vec<SharedObjectEvent>,
    ) {
        let mut message = if self.state.encoding() == AmfEncoding::Amf3 {
            SharedObjectMessage::new_flex(name, version, persistent)
        } else {
            SharedObjectMessage::new(name, version, persistent)
        };
        message.add_events(events);
        let channel = self.get_channel(COMMAND_CHANNEL);
        trace!("Send to channel: {}", channel.id());
        channel.write(RtmpMessage::SharedObject(message));
    }

    // -- accounting -------------------------------------------------------

    /// Pre-write hook: a video frame going out is pending until the
    /// transport reports it sent.
    pub(crate) fn writing_message(&self, packet: &Packet) {
        if let RtmpMessage::VideoData { .. } = packet.message {
            let stream_id = packet.header.stream_id;
            let counter = lock(&self.pending_videos)
                .entry(stream_id)
                .or_insert_with(|| Arc::new(AtomicI64::new(0)))
                .clone();
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Post-write hook.
    pub(crate) fn message_sent(&self, packet: &Packet) {
        if let RtmpMessage::VideoData { .. } = packet.message {
            let stream_id = packet.header.stream_id;
            let counter = lock(&self.pending_videos).get(&stream_id).cloned();
            if let Some(counter) = counter {
                counter.fetch_sub(1, Ordering::SeqCst);
            }
        }
        self.written_messages.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn message_dropped(&self) {
        self.dropped_messages.fetch_add(1, Ordering::SeqCst);
    }

    /// Video frames written for the stream but not yet on the wire.
    pub fn pending_video_messages(&self, stream_id: u32) -> i64 {
        let counter = lock(&self.pending_videos).get(&stream_id).cloned();
        match counter {
            Some(counter) => counter.load(Ordering::SeqCst).max(0),
            None => 0,
        }
    }

    /// Records how many bytes the peer reported to have received.
    pub fn received_bytes_read(&self, bytes: u32) {
        debug!(
            "Client received {} bytes, written {} bytes, {} messages pending",
            bytes,
            self.transport.written_bytes(),
            self.transport.pending_messages()
        );
        self.client_bytes_read.fetch_add(u64::from(bytes), Ordering::SeqCst);
    }

    pub fn client_bytes_read(&self) -> u64 {
        self.client_bytes_read.load(Ordering::SeqCst)
    }

    pub fn read_messages(&self) -> u64 {
        self.read_messages.load(Ordering::SeqCst)
    }

    pub fn written_messages(&self) -> u64 {
        self.written_messages.load(Ordering::SeqCst)
    }

    pub fn dropped_messages(&self) -> u64 {
        self.dropped_messages.load(Ordering::SeqCst)
    }

    pub fn current_queue_size(&self) -> usize {
        self.current_queue_size.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for RtmpConnection {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RtmpConnection")
            .field("session_id", &self.session_id)
            .field("remote_address", &self.remote_address)
            .field("phase", &self.state.phase())
            .field("encoding", &self.state.encoding())
            .finish()
    }
}
