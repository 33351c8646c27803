//! Events reported to the host

use serde::{Deserialize, Serialize};

/// Player event, serialized with an `"event"` tag
///
/// ```json
/// {"event":"initialized","duration":10000,"width":1920,"height":1080}
/// {"event":"bufferingUpdate","values":[[0,2500]]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum PlayerEvent {
    /// Sent once when duration and size are known
    #[serde(rename = "initialized")]
    Initialized { duration: i64, width: u32, height: u32 },
    #[serde(rename = "bufferingStart")]
    BufferingStart,
    #[serde(rename = "bufferingEnd")]
    BufferingEnd,
    /// Buffered ranges as `[start_ms, end_ms]` pairs
    #[serde(rename = "bufferingUpdate")]
    BufferingUpdate { values: Vec<[i64; 2]> },
    #[serde(rename = "VideoError")]
    VideoError { message: String },
}

impl PlayerEvent {
    pub fn to_json(&self) -> String {
        // Serializing a plain enum of numbers and strings cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Callback receiving every event the player emits
pub type EventSink = Box<dyn FnMut(PlayerEvent) + Send>;

/// Sink that logs events and otherwise drops them
pub fn logging_sink() -> EventSink {
    Box::new(|event| tracing::info!(event = %event.to_json(), "Player event"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_json_shape() {
        let initialized = PlayerEvent::Initialized {
            duration: 10_000,
            width: 1080,
            height: 1920,
        };
        assert_eq!(
            serde_json::to_value(&initialized).unwrap(),
            json!({"event": "initialized", "duration": 10000, "width": 1080, "height": 1920})
        );
        assert_eq!(
            serde_json::to_value(PlayerEvent::BufferingStart).unwrap(),
            json!({"event": "bufferingStart"})
        );
        assert_eq!(
            serde_json::to_value(PlayerEvent::BufferingUpdate { values: vec![[0, 2500]] }).unwrap(),
            json!({"event": "bufferingUpdate", "values": [[0, 2500]]})
        );
        assert_eq!(
            serde_json::to_value(PlayerEvent::VideoError {
                message: "Video cannot be slow-forwarded".into()
            })
            .unwrap(),
            json!({"event": "VideoError", "message": "Video cannot be slow-forwarded"})
        );
    }

    #[test]
    fn test_event_round_trips_from_json() {
        let event: PlayerEvent = serde_json::from_str(r#"{"event":"bufferingEnd"}"#).unwrap();
        assert_eq!(event, PlayerEvent::BufferingEnd);
    }
}
