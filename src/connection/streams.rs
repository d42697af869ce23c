//! NetStream identifier allocation and registration.
//!
//! Stream ids are 1-based on the wire and 0-based in every internal
//! map.  Reservation and registration are separate steps: a client
//! first reserves an id (createStream), then a stream implementation is
//! bound to it.  Each stream owns three consecutive channels starting
//! at `4 + (stream_id - 1) * 5`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use crate::scope::ClientStream;
use crate::sync::lock;

const FIRST_STREAM_CHANNEL: u32 = 4;
const CHANNELS_PER_STREAM: u32 = 5;

/// Stream id owning a channel, or 0 for the protocol channels below 4.
pub fn stream_id_for_channel(channel_id: u32) -> u32 {
    if channel_id < FIRST_STREAM_CHANNEL {
        return 0;
    }
    ((channel_id - FIRST_STREAM_CHANNEL) / CHANNELS_PER_STREAM) + 1
}

/// First of the three channels (data, video, audio) carrying the given
/// stream.
pub fn first_channel_for_stream(stream_id: u32) -> u32 {
    FIRST_STREAM_CHANNEL + (stream_id - 1) * CHANNELS_PER_STREAM
}

/// A growable bitset over reserved stream indices.  Connections rarely
/// use more than a handful of streams, so a word vector is plenty.
struct StreamIdSet {
    words: Vec<u64>,
}

impl StreamIdSet {
    fn new() -> StreamIdSet {
        StreamIdSet { words: Vec::new() }
    }

    fn get(&self, index: usize) -> bool {
        match self.words.get(index / 64) {
            Some(word) => word & (1 << (index % 64)) != 0,
            None => false,
        }
    }

    fn set(&mut self, index: usize) {
        let word = index / 64;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (index % 64);
    }

    fn clear(&mut self, index: usize) {
        if let Some(word) = self.words.get_mut(index / 64) {
            *word &= !(1 << (index % 64));
        }
    }

    fn first_clear(&self) -> usize {
        for (word_index, word) in self.words.iter().enumerate() {
            if *word != u64::MAX {
                return word_index * 64 + word.trailing_ones() as usize;
            }
        }
        self.words.len() * 64
    }
}

/// Allocation, reservation and lookup of the NetStreams owned by one
/// connection.
pub(crate) struct StreamRegistry {
    reserved: Mutex<StreamIdSet>,
    streams: Mutex<HashMap<usize, Arc<dyn ClientStream>>>,
    stream_buffers: Mutex<HashMap<usize, u32>>,
    used_streams: AtomicI64,
}

impl StreamRegistry {
    pub fn new() -> StreamRegistry {
        StreamRegistry {
            reserved: Mutex::new(StreamIdSet::new()),
            streams: Mutex::new(HashMap::new()),
            stream_buffers: Mutex::new(HashMap::new()),
            used_streams: AtomicI64::new(0),
        }
    }

    /// Reserves the lowest free id and returns it (1-based).
    pub fn reserve_stream_id(&self) -> u32 {
        let mut reserved = lock(&self.reserved);
        let index = reserved.first_clear();
        reserved.set(index);
        index as u32 + 1
    }

    /// Reserves the requested id when free, otherwise falls back to the
    /// lowest free id.
    pub fn reserve_requested_stream_id(&self, stream_id: u32) -> u32 {
        if stream_id == 0 {
            return self.reserve_stream_id();
        }
        {
            let mut reserved = lock(&self.reserved);
            let index = (stream_id - 1) as usize;
            if !reserved.get(index) {
                reserved.set(index);
                return stream_id;
            }
        }
        self.reserve_stream_id()
    }

    /// A stream id is valid for creation when it is positive, has been
    /// reserved and carries no registered stream yet.
    pub fn is_valid_stream_id(&self, stream_id: u32) -> bool {
        if stream_id == 0 {
            return false;
        }
        let index = (stream_id - 1) as usize;
        if !lock(&self.reserved).get(index) {
            return false;
        }
        !lock(&self.streams).contains_key(&index)
    }

    pub fn is_reserved(&self, stream_id: u32) -> bool {
        stream_id > 0 && lock(&self.reserved).get((stream_id - 1) as usize)
    }

    /// Marks an externally created stream id as reserved.  Returns
    /// false when the id was already taken.
    pub fn reserve_exact(&self, stream_id: u32) -> bool {
        let index = (stream_id - 1) as usize;
        let mut reserved = lock(&self.reserved);
        if reserved.get(index) {
            return false;
        }
        reserved.set(index);
        true
    }

    pub fn register_stream(&self, stream: Arc<dyn ClientStream>) {
        let index = (stream.stream_id() - 1) as usize;
        lock(&self.streams).insert(index, stream);
    }

    pub fn stream_by_id(&self, stream_id: u32) -> Option<Arc<dyn ClientStream>> {
        if stream_id == 0 {
            return None;
        }
        lock(&self.streams).get(&((stream_id - 1) as usize)).cloned()
    }

    pub fn stream_by_channel_id(&self, channel_id: u32) -> Option<Arc<dyn ClientStream>> {
        if channel_id < FIRST_STREAM_CHANNEL {
            return None;
        }
        self.stream_by_id(stream_id_for_channel(channel_id))
    }

    pub fn live_streams(&self) -> Vec<Arc<dyn ClientStream>> {
        lock(&self.streams).values().cloned().collect()
    }

    /// Removes the stream and its buffer hint.  The reservation stays;
    /// the same id may be re-registered until it is unreserved.
    pub fn remove_stream(&self, stream_id: u32) -> bool {
        if stream_id == 0 {
            return false;
        }
        let index = (stream_id - 1) as usize;
        if lock(&self.streams).remove(&index).is_none() {
            return false;
        }
        lock(&self.stream_buffers).remove(&index);
        self.used_streams.fetch_sub(1, Ordering::SeqCst);
        true
    }

    pub fn unreserve(&self, stream_id: u32) {
        if stream_id > 0 {
            lock(&self.reserved).clear((stream_id - 1) as usize);
        }
    }

    pub fn remember_buffer_duration(&self, stream_id: u32, buffer_duration_ms: u32) {
        if stream_id > 0 {
            lock(&self.stream_buffers).insert((stream_id - 1) as usize, buffer_duration_ms);
        }
    }

    pub fn buffer_duration(&self, stream_id: u32) -> Option<u32> {
        if stream_id == 0 {
            return None;
        }
        lock(&self.stream_buffers)
            .get(&((stream_id - 1) as usize))
            .copied()
    }

    pub fn increment_used(&self) {
        self.used_streams.fetch_add(1, Ordering::SeqCst);
    }

    pub fn decrement_used(&self) {
        self.used_streams.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn used_stream_count(&self) -> i64 {
        self.used_streams.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        lock(&self.streams).clear();
        lock(&self.stream_buffers).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeStream {
        stream_id: u32,
    }

    impl ClientStream for FakeStream {
        fn stream_id(&self) -> u32 {
            self.stream_id
        }

        fn name(&self) -> String {
            format!("fake-{}", self.stream_id)
        }

        fn close(&self) {}
    }

    #[test]
    fn fresh_registry_hands_out_sequential_ids() {
        let registry = StreamRegistry::new();
        assert_eq!(registry.reserve_stream_id(), 1);
        assert_eq!(registry.reserve_stream_id(), 2);
        assert_eq!(registry.reserve_stream_id(), 3);
    }

    #[test]
    fn requested_id_reservation_falls_back_to_lowest_free() {
        let registry = StreamRegistry::new();
        assert_eq!(registry.reserve_requested_stream_id(3), 3);
        assert_eq!(registry.reserve_stream_id(), 1);
        assert_eq!(registry.reserve_stream_id(), 2);
        assert_eq!(registry.reserve_requested_stream_id(3), 4);
        assert_eq!(registry.reserve_stream_id(), 5);
    }

    #[test]
    fn validity_requires_reservation_without_registration() {
        let registry = StreamRegistry::new();
        assert!(!registry.is_valid_stream_id(0));
        assert!(!registry.is_valid_stream_id(1), "unreserved id is invalid");

        let id = registry.reserve_stream_id();
        assert!(registry.is_valid_stream_id(id));

        registry.register_stream(Arc::new(FakeStream { stream_id: id }));
        assert!(
            !registry.is_valid_stream_id(id),
            "registered id can not be reused"
        );
    }

    #[test]
    fn channel_mapping_round_trips_for_all_three_slots() {
        for stream_id in 1..20 {
            let base = first_channel_for_stream(stream_id);
            for offset in 0..3 {
                assert_eq!(stream_id_for_channel(base + offset), stream_id);
            }
        }
        for channel_id in 0..4 {
            assert_eq!(stream_id_for_channel(channel_id), 0);
        }
    }

    #[test]
    fn removal_keeps_the_reservation() {
        let registry = StreamRegistry::new();
        let id = registry.reserve_stream_id();
        registry.register_stream(Arc::new(FakeStream { stream_id: id }));
        registry.increment_used();

        assert!(registry.remove_stream(id));
        assert_eq!(registry.used_stream_count(), 0);
        assert!(registry.is_reserved(id));
        assert!(registry.stream_by_id(id).is_none());

        registry.unreserve(id);
        assert!(!registry.is_reserved(id));
        assert_eq!(registry.reserve_stream_id(), id, "freed id is reused");
    }

    #[test]
    fn removing_a_missing_stream_is_a_no_op() {
        let registry = StreamRegistry::new();
        assert!(!registry.remove_stream(7));
        assert_eq!(registry.used_stream_count(), 0);
    }

    #[test]
    fn buffer_duration_is_remembered_per_stream() {
        let registry = StreamRegistry::new();
        registry.remember_buffer_duration(2, 750);
        assert_eq!(registry.buffer_duration(2), Some(750));
        assert_eq!(registry.buffer_duration(1), None);
    }

    #[test]
    fn bitset_grows_past_one_word() {
        let registry = StreamRegistry::new();
        for expected in 1..=70 {
            assert_eq!(registry.reserve_stream_id(), expected);
        }
    }
}
