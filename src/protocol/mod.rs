//! Mixer control protocol
//!
//! The upstream mixer engine speaks a small textual dialect: `get`, `set` and
//! `subscribe` commands addressed by `/`-delimited paths, answered by
//! path-tagged JSON frames. Every message in both directions ends with a NUL.

pub mod codec;
pub mod messages;

pub use codec::{Command, CodecError, Frame, FrameDecoder, DEFAULT_BUFFER_CAPACITY};
pub use messages::{ClientMessage, InputChange, ServerMessage};

/// Suffix the upstream appends to a subscribed path when it reports a value
pub const VALUE_SUFFIX: &str = "/value";

/// Join path segments into a protocol path (`["devices", "1"]` -> `/devices/1`)
pub fn join_path<I, S>(segments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut path = String::new();
    for segment in segments {
        path.push('/');
        path.push_str(segment.as_ref());
    }
    path
}

/// Path on which updates for a subscription to `path` arrive
pub fn response_path(path: &str) -> String {
    format!("{}{}", path, VALUE_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_path() {
        assert_eq!(join_path(["devices"]), "/devices");
        assert_eq!(
            join_path(["devices", "1", "inputs", "3", "Mute"]),
            "/devices/1/inputs/3/Mute"
        );
    }

    #[test]
    fn test_response_path() {
        assert_eq!(
            response_path("/devices/1/inputs/3/Mute"),
            "/devices/1/inputs/3/Mute/value"
        );
    }
}
