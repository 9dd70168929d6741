//! Error-message hygiene and retry limits.

/// Claims stop once an event has been attempted this many times.
pub const MAX_RETRY_COUNT: i32 = 50;

/// Upper bound on a stored error message, in characters.
pub const ERROR_MESSAGE_MAX_LEN: usize = 1000;

/// Upper bound on a stored event key, in characters.
pub const EVENT_KEY_MAX_LEN: usize = 500;

/// Upper bound on a topic or group name, in characters.
pub const TOPIC_MAX_LEN: usize = 100;

/// Truncates `message` to [`ERROR_MESSAGE_MAX_LEN`] characters and replaces every
/// single quote with `-` so the text can never close a quoted SQL literal.
pub fn sanitize_error_message(message: &str) -> String {
    message
        .chars()
        .take(ERROR_MESSAGE_MAX_LEN)
        .map(|c| if c == '\'' { '-' } else { c })
        .collect()
}
