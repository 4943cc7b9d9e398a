use serde::Serialize;

use crate::types::{SessionSummary, TopicUpdate};

#[derive(Serialize)]
struct UpdateLine<'a> {
    timestamp: String,
    topic: &'a str,
    content: &'a str,
}

/// Render one update as a JSON line, stamped with the current time.
pub fn update_line(update: &TopicUpdate) -> Option<String> {
    let line = UpdateLine {
        timestamp: chrono::Utc::now().to_rfc3339(),
        topic: &update.topic,
        content: &update.content,
    };
    serde_json::to_string(&line).ok()
}

/// Emit a topic update as a single JSON line to stdout.
pub fn report_update(update: &TopicUpdate) {
    if let Some(json) = update_line(update) {
        println!("{json}");
    }
}

/// Emit the session summary as pretty-printed JSON to stdout.
pub fn report_summary(summary: &SessionSummary) {
    if let Ok(json) = serde_json::to_string_pretty(summary) {
        println!("{json}");
    }
}

/// Emit an arbitrary JSON document pretty-printed to stdout.
pub fn report_document(document: &serde_json::Value) {
    if let Ok(json) = serde_json::to_string_pretty(document) {
        println!("{json}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_line_escapes_control_bytes() {
        let line = update_line(&TopicUpdate::new("OV1", "a\x01b|c=1;")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["topic"], "OV1");
        assert_eq!(parsed["content"], "a\x01b|c=1;");
        assert!(line.contains("\\u0001"));
        assert!(parsed["timestamp"].as_str().is_some());
    }
}
