use std::collections::HashMap;

use rml_amf0::Amf0Value;

/// Well-known status codes sent to clients.
pub mod codes {
    pub const NC_CONNECT_SUCCESS: &str = "NetConnection.Connect.Success";
    pub const NC_CONNECT_REJECTED: &str = "NetConnection.Connect.Rejected";
    pub const NC_CONNECT_CLOSED: &str = "NetConnection.Connect.Closed";
    pub const NC_CONNECT_FAILED: &str = "NetConnection.Connect.Failed";
    pub const NS_PLAY_START: &str = "NetStream.Play.Start";
    pub const NS_PLAY_STOP: &str = "NetStream.Play.Stop";
    pub const NS_PUBLISH_START: &str = "NetStream.Publish.Start";
}

#[derive(Eq, PartialEq, Debug, Copy, Clone)]
pub enum StatusLevel {
    Status,
    Error,
    Warning,
}

impl StatusLevel {
    pub fn as_str(&self) -> &'static str {
        match *self {
            StatusLevel::Status => "status",
            StatusLevel::Error => "error",
            StatusLevel::Warning => "warning",
        }
    }
}

/// A status object delivered to the peer through an `onStatus` invoke.
#[derive(PartialEq, Debug, Clone)]
pub struct Status {
    pub level: StatusLevel,
    pub code: String,
    pub description: String,
    pub details: Option<String>,
}

impl Status {
    pub fn status(code: &str, description: &str) -> Status {
        Status {
            level: StatusLevel::Status,
            code: code.to_string(),
            description: description.to_string(),
            details: None,
        }
    }

    pub fn error(code: &str, description: &str) -> Status {
        Status {
            level: StatusLevel::Error,
            code: code.to_string(),
            description: description.to_string(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: &str) -> Status {
        self.details = Some(details.to_string());
        self
    }

    /// The AMF object shape Flash clients expect for a status argument.
    pub fn to_amf0(&self) -> Amf0Value {
        let mut properties = HashMap::new();
        properties.insert(
            "level".to_string(),
            Amf0Value::Utf8String(self.level.as_str().to_string()),
        );
        properties.insert("code".to_string(), Amf0Value::Utf8String(self.code.clone()));
        properties.insert(
            "description".to_string(),
            Amf0Value::Utf8String(self.description.clone()),
        );
        if let Some(ref details) = self.details {
            properties.insert(
                "details".to_string(),
                Amf0Value::Utf8String(details.clone()),
            );
        }
        Amf0Value::Object(properties)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_converts_to_amf_object() {
        let status = Status::status(codes::NS_PLAY_START, "Started playing").with_details("movie");
        let properties = match status.to_amf0() {
            Amf0Value::Object(properties) => properties,
            other => panic!("Expected an AMF object, got {:?}", other),
        };

        assert_eq!(
            properties.get("level"),
            Some(&Amf0Value::Utf8String("status".to_string()))
        );
        assert_eq!(
            properties.get("code"),
            Some(&Amf0Value::Utf8String(codes::NS_PLAY_START.to_string()))
        );
        assert_eq!(
            properties.get("description"),
            Some(&Amf0Value::Utf8String("Started playing".to_string()))
        );
        assert_eq!(
            properties.get("details"),
            Some(&Amf0Value::Utf8String("movie".to_string()))
        );
    }
}
