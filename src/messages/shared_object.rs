use rml_amf0::Amf0Value;

/// Shared-object event kinds, mirroring the wire protocol's sync event
/// table.  `Server*` events travel client to server, `Client*` events
/// server to client.
#[derive(Eq, PartialEq, Debug, Copy, Clone)]
pub enum SharedObjectEventType {
    ServerConnect,
    ServerDisconnect,
    ServerSetAttribute,
    ServerSendMessage,
    ServerDeleteAttribute,
    ClientStatus,
    ClientClearData,
    ClientUpdateData,
    ClientUpdateAttribute,
    ClientSendMessage,
    ClientDeleteData,
    ClientInitialData,
}

/// One event inside a shared-object sync message.  `key` and `value`
/// are present for attribute updates and absent for connection-level
/// events.
#[derive(PartialEq, Debug, Clone)]
pub struct SharedObjectEvent {
    pub event_type: SharedObjectEventType,
    pub key: Option<String>,
    pub value: Option<Amf0Value>,
}

impl SharedObjectEvent {
    pub fn new(
        event_type: SharedObjectEventType,
        key: Option<String>,
        value: Option<Amf0Value>,
    ) -> SharedObjectEvent {
        SharedObjectEvent {
            event_type,
            key,
            value,
        }
    }

    pub fn set_attribute(key: String, value: Amf0Value) -> SharedObjectEvent {
        SharedObjectEvent {
            event_type: SharedObjectEventType::ClientUpdateData,
            key: Some(key),
            value: Some(value),
        }
    }
}

/// A shared-object sync message.  The `flex` variant differs only in
/// its wire framing and is selected when the connection negotiated AMF3
/// encoding.
#[derive(PartialEq, Debug, Clone)]
pub struct SharedObjectMessage {
    pub name: String,
    pub version: u32,
    pub persistent: bool,
    pub flex: bool,
    pub events: Vec<SharedObjectEvent>,
}

impl SharedObjectMessage {
    pub fn new(name: &str, version: u32, persistent: bool) -> SharedObjectMessage {
        SharedObjectMessage {
            name: name.to_string(),
            version,
            persistent,
            flex: false,
            events: Vec::new(),
        }
    }

    pub fn new_flex(name: &str, version: u32, persistent: bool) -> SharedObjectMessage {
        SharedObjectMessage {
            flex: true,
            ..SharedObjectMessage::new(name, version, persistent)
        }
    }

    pub fn add_event(&mut self, event: SharedObjectEvent) {
        self.events.push(event);
    }

    pub fn add_events<I>(&mut self, events: I)
    where
        I: IntoIterator<Item = SharedObjectEvent>,
    {
        self.events.extend(events);
    }
}
