use crate::types::{SERVER_STATUS_READY, ServerMessage};

/// What an inbound text frame means to the connection machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Pong,
    ServerStatus { ready: bool, status: String },
    Notification(String),
    /// Unparseable or legacy payload
    Unrecognized,
}

/// Classifies a raw text frame. Never fails; anything unknown is `Unrecognized`.
pub fn classify(text: &str) -> Inbound {
    let message = match serde_json::from_str::<ServerMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!("Unrecognized server message: {} - Raw: {}", e, text);
            return Inbound::Unrecognized;
        }
    };

    match message {
        ServerMessage::Pong { .. } => Inbound::Pong,
        ServerMessage::ServerStatus { status } => Inbound::ServerStatus {
            ready: status == SERVER_STATUS_READY,
            status,
        },
        ServerMessage::Notification { message, data } => {
            let text = message.or_else(|| {
                data.map(|data| match data {
                    serde_json::Value::String(text) => text,
                    other => other.to_string(),
                })
            });
            match text {
                Some(text) => Inbound::Notification(text),
                None => {
                    tracing::warn!("NOTIFICATION without message or data");
                    Inbound::Unrecognized
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_known_messages() {
        assert_eq!(classify(r#"{"type":"PONG","timestamp":1}"#), Inbound::Pong);
        assert_eq!(
            classify(r#"{"type":"SERVER_STATUS","status":"READY"}"#),
            Inbound::ServerStatus {
                ready: true,
                status: "READY".into()
            }
        );
        assert_eq!(
            classify(r#"{"type":"SERVER_STATUS","status":"DEGRADED"}"#),
            Inbound::ServerStatus {
                ready: false,
                status: "DEGRADED".into()
            }
        );
    }

    #[test]
    fn test_notification_prefers_message_over_data() {
        assert_eq!(
            classify(r#"{"type":"NOTIFICATION","message":"hello","data":"ignored"}"#),
            Inbound::Notification("hello".into())
        );
        assert_eq!(
            classify(r#"{"type":"NOTIFICATION","data":"from data"}"#),
            Inbound::Notification("from data".into())
        );
        assert_eq!(
            classify(r#"{"type":"NOTIFICATION","data":{"appointment":7}}"#),
            Inbound::Notification(r#"{"appointment":7}"#.into())
        );
    }

    #[test]
    fn test_garbage_is_unrecognized() {
        assert_eq!(classify("not json"), Inbound::Unrecognized);
        assert_eq!(classify(r#"{"type":"LEGACY"}"#), Inbound::Unrecognized);
        assert_eq!(classify(r#"{"no_type":true}"#), Inbound::Unrecognized);
        assert_eq!(classify(r#"{"type":"NOTIFICATION"}"#), Inbound::Unrecognized);
        assert_eq!(classify(""), Inbound::Unrecognized);
    }
}
