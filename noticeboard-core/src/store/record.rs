/*
    record.rs - On-disk record format

    A record is a block of `Key: Value` header lines, exactly one blank
    line, then the content:

        Date: 2024-05-01T12:00:00Z
        Type: message
        Fingerprint: 1a2b3c4d
        Signature: 5f0c...

        hello world

    Headers are written in this order and casing. On read, keys are
    matched case-insensitively and the header block ends at the first
    empty line, so anything in the content (including lines that look like
    headers) is never taken for metadata.
*/

use super::errors::{RecordError, ValidationError};
use crate::keys::Fingerprint;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Timestamp layout; zero padded and fixed width so string order is time order
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// File name layout; one record per second
pub const IDENTIFIER_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Extension of record files
pub const RECORD_EXTENSION: &str = "txt";

const HEADER_DATE: &str = "date";
const HEADER_TYPE: &str = "type";
const HEADER_FINGERPRINT: &str = "fingerprint";
const HEADER_SIGNATURE: &str = "signature";

/// Kind of board entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Message,
    System,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Message => "message",
            MessageType::System => "system",
            MessageType::Error => "error",
        }
    }
}

impl FromStr for MessageType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" => Ok(MessageType::Message),
            "system" => Ok(MessageType::System),
            "error" => Ok(MessageType::Error),
            other => Err(ValidationError::InvalidType(other.to_string())),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render a timestamp the way the `Date` header stores it
pub fn format_date(at: &DateTime<Utc>) -> String {
    at.format(DATE_FORMAT).to_string()
}

/// File name of the record created at `at`
pub fn identifier_for(at: &DateTime<Utc>) -> String {
    format!("{}.{}", at.format(IDENTIFIER_FORMAT), RECORD_EXTENSION)
}

/// One signed board entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// File name the record is stored under
    #[serde(rename = "id")]
    pub identifier: String,
    pub date: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub fingerprint: Fingerprint,
    pub signature: String,
    pub content: String,
}

impl Record {
    /// Serialize to the on-disk text form
    pub fn render(&self) -> String {
        format!(
            "Date: {}\nType: {}\nFingerprint: {}\nSignature: {}\n\n{}",
            self.date, self.kind, self.fingerprint, self.signature, self.content
        )
    }

    /// Parse the on-disk text form
    pub fn parse(identifier: impl Into<String>, text: &str) -> Result<Self, RecordError> {
        let (headers, content) = split_headers(text)?;

        let date = take(&headers, HEADER_DATE)?;
        if !is_iso8601(date) {
            return Err(RecordError::InvalidValue {
                header: HEADER_DATE,
                value: date.to_string(),
            });
        }

        let kind_raw = take(&headers, HEADER_TYPE)?;
        let kind = kind_raw.parse().map_err(|_| RecordError::InvalidValue {
            header: HEADER_TYPE,
            value: kind_raw.to_string(),
        })?;

        let fingerprint_raw = take(&headers, HEADER_FINGERPRINT)?;
        let fingerprint = fingerprint_raw.parse().map_err(|_| RecordError::InvalidValue {
            header: HEADER_FINGERPRINT,
            value: fingerprint_raw.to_string(),
        })?;

        let signature = take(&headers, HEADER_SIGNATURE)?;
        if signature.is_empty()
            || signature.len() % 2 != 0
            || !signature.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(RecordError::InvalidValue {
                header: HEADER_SIGNATURE,
                value: signature.to_string(),
            });
        }

        Ok(Record {
            identifier: identifier.into(),
            date: date.to_string(),
            kind,
            fingerprint,
            signature: signature.to_string(),
            content: content.trim().to_string(),
        })
    }
}

/// Split into lowercase-keyed headers and the text after the blank line
fn split_headers(text: &str) -> Result<(HashMap<String, &str>, &str), RecordError> {
    let mut headers = HashMap::new();
    let mut rest = text;
    let mut line_no = 0;

    loop {
        let Some(newline) = rest.find('\n') else {
            // Ran out of lines while still inside the header block
            return Err(RecordError::MissingSeparator);
        };
        let line = rest[..newline].strip_suffix('\r').unwrap_or(&rest[..newline]);
        rest = &rest[newline + 1..];
        line_no += 1;

        if line.is_empty() {
            return Ok((headers, rest));
        }

        let (key, value) = line
            .split_once(':')
            .ok_or(RecordError::MalformedHeader { line: line_no })?;
        let key = key.trim().to_lowercase();
        if key.is_empty() {
            return Err(RecordError::EmptyKey { line: line_no });
        }
        if headers.contains_key(&key) {
            return Err(RecordError::DuplicateHeader(key));
        }
        headers.insert(key, value.trim());
    }
}

/// Accepts our own `Z` form plus offset-less ISO-8601 with optional fractions
fn is_iso8601(value: &str) -> bool {
    DateTime::parse_from_rfc3339(value).is_ok()
        || NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
}

fn take<'a>(headers: &HashMap<String, &'a str>, key: &'static str) -> Result<&'a str, RecordError> {
    headers
        .get(key)
        .copied()
        .ok_or(RecordError::MissingHeader(key))
}
