//! Wire format of the odds feed.
//!
//! Inbound payloads are frames joined by [`MSG_END`]. The first character of a
//! frame is its type tag. Load and delta frames carry a path record (fields
//! joined by [`FLD_END`]) terminated by [`REC_END`], followed by the content.

use thiserror::Error;
use tracing::debug;

use crate::types::{FeedEvent, TopicUpdate};

/// Separates frames within one inbound payload.
pub const MSG_END: char = '\x08';
/// Separates records within a frame.
pub const REC_END: char = '\x01';
/// Separates fields within the path record.
pub const FLD_END: char = '\x02';
pub const HANDSHAKE: char = '\x03';
/// "No encoding" marker.
pub const NOENC: char = '\x00';

pub const TOPIC_LOAD: char = '\x14';
pub const DELTA: char = '\x15';
pub const SUBSCRIBE: char = '\x16';
/// Client ping tag. Recognised, never sent.
pub const CLIENT_PING: char = '\x19';
pub const TOPIC_STATUS: char = '\x23';
/// Tag of the status frame the server sends once it accepts subscriptions.
pub const READY: char = '1';

/// A load/delta frame that could not be split into a path record and content.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed {kind} frame: no record delimiter in {len} chars")]
pub struct MalformedFrame {
    pub kind: &'static str,
    pub len: usize,
}

/// A frame whose bytes are not valid UTF-8.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("frame of {len} bytes is not valid UTF-8 after byte {valid_up_to}")]
pub struct InvalidEncoding {
    pub valid_up_to: usize,
    pub len: usize,
}

/// Split on every occurrence of `delimiter`, keeping empty pieces at the edges
/// and between consecutive delimiters.
pub fn split_fields(input: &str, delimiter: char) -> Vec<&str> {
    input.split(delimiter).collect()
}

/// Split a raw inbound payload into candidate frames, in arrival order.
///
/// Works on bytes so that a frame with invalid UTF-8 can be rejected on its
/// own without touching its neighbours.
pub fn split_frames(payload: &[u8]) -> Vec<&[u8]> {
    payload.split(|&b| b == MSG_END as u8).collect()
}

/// Validate one frame as UTF-8.
pub fn frame_text(frame: &[u8]) -> Result<&str, InvalidEncoding> {
    std::str::from_utf8(frame).map_err(|e| InvalidEncoding {
        valid_up_to: e.valid_up_to(),
        len: frame.len(),
    })
}

/// Decode one frame.
///
/// Returns `Ok(None)` for empty frames and for tags this client does not
/// handle. A load/delta frame without a record delimiter is an error; the
/// caller drops it and moves on to the next frame.
pub fn decode_message(frame: &str) -> Result<Option<FeedEvent>, MalformedFrame> {
    let Some(tag) = frame.chars().next() else {
        return Ok(None);
    };

    match tag {
        READY => Ok(Some(FeedEvent::SubscribeNow)),
        TOPIC_LOAD | DELTA => decode_update(tag, frame).map(Some),
        _ => {
            debug!("Ignoring frame with tag {:#04x}", tag as u32);
            Ok(None)
        }
    }
}

fn decode_update(tag: char, frame: &str) -> Result<FeedEvent, MalformedFrame> {
    let Some((path, content)) = frame.split_once(REC_END) else {
        return Err(MalformedFrame {
            kind: if tag == TOPIC_LOAD { "load" } else { "delta" },
            len: frame.chars().count(),
        });
    };

    // The path always yields at least one field, so `last` cannot miss.
    let identifier = split_fields(path, FLD_END).last().copied().unwrap_or(path);
    let topic = strip_first_char(identifier);

    Ok(FeedEvent::TopicUpdate(TopicUpdate::new(topic, content)))
}

/// Drop the one-character category prefix of a topic identifier.
fn strip_first_char(identifier: &str) -> &str {
    let mut chars = identifier.chars();
    chars.next();
    chars.as_str()
}

/// Identity message sent right after the socket opens.
pub fn identity_message(token: &str) -> String {
    format!("{TOPIC_STATUS}{HANDSHAKE}P{REC_END}__time,S_{NOENC}{token}")
}

/// Subscription request for a single topic.
pub fn subscription_message(topic: &str) -> String {
    format!("{SUBSCRIBE}{NOENC}{topic}{REC_END}")
}
