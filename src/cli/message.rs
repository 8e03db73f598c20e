//! Inbound CLI line parsing: `OK:`/`ERR:`/`EVENT:` responses, with the
//! Record Separator (`\x1E`) splitting multi-line payload bodies.

use super::command::CliParseError;

/// ASCII Record Separator, used to join multi-line payload bodies onto
/// one wire line (spec.md §4.5).
pub const RECORD_SEPARATOR: char = '\u{1E}';

/// A parsed inbound line: either a response to a prior request, or an
/// unsolicited event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Ok { body: Vec<String> },
    Err { message: String },
    Event { name: String, body: Vec<String> },
}

impl Inbound {
    /// Parse one line (already trimmed of its trailing `\n`).
    pub fn parse(line: &str) -> Result<Self, CliParseError> {
        if let Some(rest) = line.strip_prefix("OK:") {
            return Ok(Inbound::Ok {
                body: split_record_separator(rest),
            });
        }
        if let Some(rest) = line.strip_prefix("ERR:") {
            return Ok(Inbound::Err {
                message: rest.to_string(),
            });
        }
        if let Some(rest) = line.strip_prefix("EVENT:") {
            let mut parts = rest.splitn(2, ' ');
            let name = parts
                .next()
                .ok_or_else(|| CliParseError::UnexpectedResponse(line.to_string()))?
                .to_string();
            let body = split_record_separator(parts.next().unwrap_or(""));
            return Ok(Inbound::Event { name, body });
        }
        Err(CliParseError::UnexpectedResponse(line.to_string()))
    }
}

fn split_record_separator(s: &str) -> Vec<String> {
    if s.is_empty() {
        return Vec::new();
    }
    s.split(RECORD_SEPARATOR).map(str::to_string).collect()
}

/// Join multiple payload lines with the Record Separator, for encoding
/// an outbound `OK:`/`EVENT:` line (server side).
pub fn join_record_separator(lines: &[String]) -> String {
    lines.join(&RECORD_SEPARATOR.to_string())
}
