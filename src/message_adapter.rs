//! Parses broker payloads on the two known topics into typed commands (C8).
//!
//! Parsing is pure and synchronous; the MQTT event-loop task calls these
//! functions and forwards the result onto the ControllerCore's command
//! channel. No controller state is touched here.

use crate::controller::Command;
use crate::error::ParseError;

pub const BPM_TOPIC: &str = "bhaptics/bpm";
pub const RUN_TOPIC: &str = "bhaptics/run";

const STOP_WORDS: [&str; 5] = ["0", "false", "off", "stop", "no"];
const MIN_EPOCH_MS: i64 = 100_000_000_000;

/// Parse a payload received on [`BPM_TOPIC`].
pub fn parse_bpm_payload(payload: &str) -> Result<Command, ParseError> {
    let trimmed = payload.trim();
    trimmed
        .parse::<i64>()
        .ok()
        .filter(|value| *value > 0)
        .map(Command::SetBpm)
        .ok_or_else(|| ParseError::InvalidBpm(payload.to_string()))
}

/// Parse a payload received on [`RUN_TOPIC`]: either a stop word or an
/// epoch-ms start target.
pub fn parse_run_payload(payload: &str) -> Result<Command, ParseError> {
    let trimmed = payload.trim();
    if STOP_WORDS
        .iter()
        .any(|word| word.eq_ignore_ascii_case(trimmed))
    {
        return Ok(Command::Stop);
    }

    let value: i64 = trimmed
        .parse()
        .map_err(|_| ParseError::InvalidRunPayload(payload.to_string()))?;

    if value < MIN_EPOCH_MS {
        return Err(ParseError::InvalidStartTimestamp(payload.to_string()));
    }

    Ok(Command::ScheduleStart(value))
}

/// Route a received `(topic, payload)` pair to the matching parser. Unknown
/// topics and parse failures are returned as `Ok(None)`/`Err` respectively
/// for the caller to log and drop.
pub fn parse_message(topic: &str, payload: &str) -> Result<Option<Command>, ParseError> {
    match topic {
        BPM_TOPIC => parse_bpm_payload(payload).map(Some),
        RUN_TOPIC => parse_run_payload(payload).map(Some),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positive_bpm() {
        assert!(matches!(parse_bpm_payload("128"), Ok(Command::SetBpm(128))));
    }

    #[test]
    fn rejects_non_positive_or_non_numeric_bpm() {
        assert!(parse_bpm_payload("0").is_err());
        assert!(parse_bpm_payload("-5").is_err());
        assert!(parse_bpm_payload("fast").is_err());
    }

    #[test]
    fn stop_words_are_case_insensitive() {
        for word in ["0", "False", "OFF", "Stop", "NO"] {
            assert!(matches!(parse_run_payload(word), Ok(Command::Stop)));
        }
    }

    #[test]
    fn large_integer_is_a_scheduled_start() {
        assert!(matches!(
            parse_run_payload("100000000123"),
            Ok(Command::ScheduleStart(100_000_000_123))
        ));
    }

    #[test]
    fn small_integer_is_an_invalid_start_timestamp() {
        assert_eq!(
            parse_run_payload("12345"),
            Err(ParseError::InvalidStartTimestamp("12345".to_string()))
        );
    }

    #[test]
    fn garbage_run_payload_is_rejected() {
        assert!(parse_run_payload("not-a-number").is_err());
    }

    #[test]
    fn unknown_topic_is_dropped_without_error() {
        assert!(matches!(parse_message("bhaptics/other", "1"), Ok(None)));
    }

    #[test]
    fn known_topics_delegate_to_their_parser() {
        assert!(matches!(
            parse_message(BPM_TOPIC, "100"),
            Ok(Some(Command::SetBpm(100)))
        ));
        assert!(matches!(
            parse_message(RUN_TOPIC, "0"),
            Ok(Some(Command::Stop))
        ));
    }
}
