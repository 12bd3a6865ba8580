//! Join codes: short, shareable, fixed-width names for session ids.
//!
//! A code is the session id written in base 36 (`0-9A-Z`), left-padded to
//! [`JOIN_CODE_LEN`] characters. Ids that do not fit are refused rather than
//! truncated, so two sessions can never share a code.

use crate::error::ValidationError;
use crate::game::SessionId;
use std::fmt;

pub const JOIN_CODE_LEN: usize = 6;
pub const JOIN_CODE_ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

const RADIX: u64 = JOIN_CODE_ALPHABET.len() as u64;

/// Largest session id that has a join code (36^6 - 1)
pub const MAX_ENCODABLE_ID: SessionId = RADIX.pow(JOIN_CODE_LEN as u32) - 1;

/// Query parameter carrying a code in challenge links
const CODE_PARAM: &str = "code";
/// Query parameter used by older links that carried the raw id
const LEGACY_ID_PARAM: &str = "gameId";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JoinCode(String);

impl JoinCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Session id this code names
    pub fn session_id(&self) -> SessionId {
        // Validated on construction, so every byte is in the alphabet
        self.0.bytes().fold(0, |acc, b| acc * RADIX + digit_value(b).unwrap_or(0))
    }
}

impl fmt::Display for JoinCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl std::str::FromStr for JoinCode {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        parse(value)
    }
}

fn digit_value(byte: u8) -> Option<u64> {
    match byte {
        b'0'..=b'9' => Some(u64::from(byte - b'0')),
        b'A'..=b'Z' => Some(u64::from(byte - b'A') + 10),
        _ => None,
    }
}

/// Encode a session id, failing for ids outside `0..=MAX_ENCODABLE_ID`
pub fn encode(id: SessionId) -> Result<JoinCode, ValidationError> {
    if id > MAX_ENCODABLE_ID {
        return Err(ValidationError::CodeUnrepresentable(id));
    }

    let mut digits = [b'0'; JOIN_CODE_LEN];
    let mut rest = id;
    for slot in digits.iter_mut().rev() {
        *slot = JOIN_CODE_ALPHABET[(rest % RADIX) as usize];
        rest /= RADIX;
    }

    Ok(JoinCode(digits.iter().map(|&b| b as char).collect()))
}

/// Parse a code typed or pasted by a user. Lowercase is accepted.
pub fn parse(value: &str) -> Result<JoinCode, ValidationError> {
    let normalized = value.trim().to_ascii_uppercase();
    if normalized.len() != JOIN_CODE_LEN {
        return Err(ValidationError::InvalidJoinCode(format!(
            "join code must be {JOIN_CODE_LEN} chars, got {}",
            normalized.len()
        )));
    }
    if let Some((index, ch)) = normalized
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii() || digit_value(*ch as u8).is_none())
    {
        return Err(ValidationError::InvalidJoinCode(format!(
            "invalid character '{ch}' at position {index}"
        )));
    }
    Ok(JoinCode(normalized))
}

/// Decode a code straight to its session id
pub fn decode(value: &str) -> Result<SessionId, ValidationError> {
    parse(value).map(|code| code.session_id())
}

/// Shareable link for a session: `<base>?code=<CODE>`
pub fn challenge_link(base_url: &str, id: SessionId) -> Result<String, ValidationError> {
    let code = encode(id)?;
    let separator = if base_url.contains('?') { '&' } else { '?' };
    Ok(format!("{base_url}{separator}{CODE_PARAM}={code}"))
}

/// Resolve whatever the opponent shared: a bare code, a challenge link, or a
/// legacy link carrying `gameId=<n>`.
///
/// Legacy links also carry a `code` parameter that is not a join code, so
/// whenever `gameId` is present it alone decides the session.
pub fn parse_challenge(input: &str) -> Result<SessionId, ValidationError> {
    let input = input.trim();
    let Some((_, query)) = input.split_once('?') else {
        return decode(input);
    };

    let query = query.split('#').next().unwrap_or_default();
    let mut code = None;
    let mut legacy = None;
    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        match key {
            CODE_PARAM if code.is_none() => code = Some(value),
            LEGACY_ID_PARAM if legacy.is_none() => legacy = Some(value),
            _ => {}
        }
    }

    match (legacy, code) {
        (Some(raw), _) => raw.parse::<SessionId>().map_err(|_| {
            ValidationError::InvalidJoinCode(format!("{LEGACY_ID_PARAM} is not a number: {raw}"))
        }),
        (None, Some(code)) => decode(code),
        (None, None) => Err(ValidationError::InvalidJoinCode(format!(
            "link has no {CODE_PARAM} parameter"
        ))),
    }
}
