//! Device line protocol.
//!
//! The kiln board prints status lines such as `T1=102345 T2=101980 R=1`.
//! Only the leading `NAME=INTEGER ` token of a line is significant; anything
//! that does not start with one is ignored.

use std::collections::BTreeMap;

/// Last integer value received for each register name (`R`, `T1`..`T3`, ...).
pub type RawRegister = BTreeMap<String, i64>;

/// Register holding the relay state as reported by the board.
pub const RELAY_REGISTER: &str = "R";

/// Written on port open to flush whatever partial command the board holds.
pub const BUFFER_CLEAR: &[u8] = b"\r\n\r\n";

/// Relay actuation commands understood by the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayCommand {
    On,
    Off,
}

impl RelayCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayCommand::On => "ON",
            RelayCommand::Off => "OFF",
        }
    }

    /// Wire form, CRLF terminated.
    pub fn encode(&self) -> Vec<u8> {
        format!("{}\r\n", self.as_str()).into_bytes()
    }
}

/// Parse the leading `NAME=INTEGER ` token of an already-trimmed line.
///
/// The name is one or more ASCII uppercase letters or digits, the value one
/// or more ASCII digits, and the value must be followed by whitespace.
pub fn parse_register(line: &str) -> Option<(&str, i64)> {
    let (name, rest) = line.split_once('=')?;
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()) {
        return None;
    }
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let (value, tail) = rest.split_at(digits);
    if !tail.chars().next().is_some_and(char::is_whitespace) {
        return None;
    }
    let value = value.parse::<i64>().ok()?;
    Some((name, value))
}

/// Registers starting with `T` carry raw sensor codes.
pub fn is_temperature_register(name: &str) -> bool {
    name.starts_with('T')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_leading_token() {
        assert_eq!(parse_register("T1=102345 T2=99"), Some(("T1", 102345)));
        assert_eq!(parse_register("R=1 "), Some(("R", 1)));
        assert_eq!(parse_register("ABC9=0\tmore"), Some(("ABC9", 0)));
    }

    #[test]
    fn test_requires_trailing_whitespace() {
        // Trimmed single-token lines carry no trailing space and are ignored.
        assert_eq!(parse_register("T1=2345"), None);
        assert_eq!(parse_register("T1=2345x "), None);
    }

    #[test]
    fn test_rejects_malformed_lines() {
        assert_eq!(parse_register(""), None);
        assert_eq!(parse_register("=12 "), None);
        assert_eq!(parse_register("t1=12 "), None);
        assert_eq!(parse_register("T-1=12 "), None);
        assert_eq!(parse_register("T1=-12 "), None);
        assert_eq!(parse_register("T1= 12 "), None);
        assert_eq!(parse_register("booting kiln firmware v2"), None);
        assert_eq!(parse_register("T1=99999999999999999999999 "), None);
    }

    #[test]
    fn test_relay_command_encoding() {
        assert_eq!(RelayCommand::On.encode(), b"ON\r\n".to_vec());
        assert_eq!(RelayCommand::Off.encode(), b"OFF\r\n".to_vec());
    }

    #[test]
    fn test_temperature_register() {
        assert!(is_temperature_register("T1"));
        assert!(is_temperature_register("T9"));
        assert!(!is_temperature_register("R"));
    }
}
