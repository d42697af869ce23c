use std::sync::atomic::{AtomicU8, Ordering};

use log::trace;

/// Lifecycle phase of a connection.
#[derive(Eq, PartialEq, Debug, Copy, Clone)]
pub enum RtmpPhase {
    Uninitialized,
    Handshake,
    HandshakeOk,
    Connect,
    Connected,
    Disconnecting,
    Disconnected,
}

impl RtmpPhase {
    fn as_u8(self) -> u8 {
        match self {
            RtmpPhase::Uninitialized => 0,
            RtmpPhase::Handshake => 1,
            RtmpPhase::HandshakeOk => 2,
            RtmpPhase::Connect => 3,
            RtmpPhase::Connected => 4,
            RtmpPhase::Disconnecting => 5,
            RtmpPhase::Disconnected => 6,
        }
    }

    fn from_u8(value: u8) -> RtmpPhase {
        match value {
            0 => RtmpPhase::Uninitialized,
            1 => RtmpPhase::Handshake,
            2 => RtmpPhase::HandshakeOk,
            3 => RtmpPhase::Connect,
            4 => RtmpPhase::Connected,
            5 => RtmpPhase::Disconnecting,
            _ => RtmpPhase::Disconnected,
        }
    }
}

/// AMF serialization variant negotiated at connect time.
#[derive(Eq, PartialEq, Debug, Copy, Clone)]
pub enum AmfEncoding {
    Amf0,
    Amf3,
}

/// Protocol state shared across the transport thread, the worker pool
/// and the scheduler.  Phase transitions are advisory except for the
/// terminal one: once `Disconnected`, the phase never changes again.
pub struct RtmpState {
    phase: AtomicU8,
    encoding: AtomicU8,
}

impl RtmpState {
    pub fn new() -> RtmpState {
        RtmpState {
            phase: AtomicU8::new(RtmpPhase::Uninitialized.as_u8()),
            encoding: AtomicU8::new(0),
        }
    }

    pub fn phase(&self) -> RtmpPhase {
        RtmpPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn set_phase(&self, phase: RtmpPhase) {
        trace!("set_phase: {:?}", phase);
        // terminal state; late transitions from stray tasks are ignored
        if self.phase() == RtmpPhase::Disconnected {
            trace!("Phase is already disconnected, ignoring transition");
            return;
        }
        self.phase.store(phase.as_u8(), Ordering::SeqCst);
    }

    pub fn encoding(&self) -> AmfEncoding {
        if self.encoding.load(Ordering::SeqCst) == 3 {
            AmfEncoding::Amf3
        } else {
            AmfEncoding::Amf0
        }
    }

    pub fn set_encoding(&self, encoding: AmfEncoding) {
        let value = match encoding {
            AmfEncoding::Amf0 => 0,
            AmfEncoding::Amf3 => 3,
        };
        self.encoding.store(value, Ordering::SeqCst);
    }
}

impl Default for RtmpState {
    fn default() -> RtmpState {
        RtmpState::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_starts_uninitialized_with_amf0() {
        let state = RtmpState::new();
        assert_eq!(state.phase(), RtmpPhase::Uninitialized);
        assert_eq!(state.encoding(), AmfEncoding::Amf0);
    }

    #[test]
    fn disconnected_is_terminal() {
        let state = RtmpState::new();
        state.set_phase(RtmpPhase::Connected);
        state.set_phase(RtmpPhase::Disconnected);
        state.set_phase(RtmpPhase::Connected);
        assert_eq!(state.phase(), RtmpPhase::Disconnected);
    }

    #[test]
    fn encoding_can_be_switched_to_amf3() {
        let state = RtmpState::new();
        state.set_encoding(AmfEncoding::Amf3);
        assert_eq!(state.encoding(), AmfEncoding::Amf3);
    }
}
