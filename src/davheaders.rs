//! Typed versions of the WebDAV request headers.

use headers::{self, Header, HeaderName, HeaderValue};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref DEPTH: HeaderName = HeaderName::from_static("depth");
    static ref DESTINATION: HeaderName = HeaderName::from_static("destination");
    static ref OVERWRITE: HeaderName = HeaderName::from_static("overwrite");
    static ref TIMEOUT: HeaderName = HeaderName::from_static("timeout");
    static ref LOCK_TOKEN: HeaderName = HeaderName::from_static("lock-token");
    static ref IF: HeaderName = HeaderName::from_static("if");
    static ref SECONDS_RE: Regex = Regex::new(r"^Second-(\d+)$").unwrap();
}

/// `Depth:` header (RFC 4918 10.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Depth {
    Zero,
    One,
    Infinity,
}

impl Header for Depth {
    fn name() -> &'static HeaderName {
        &DEPTH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        match value.to_str().map_err(|_| headers::Error::invalid())? {
            "0" => Ok(Depth::Zero),
            "1" => Ok(Depth::One),
            "infinity" | "Infinity" => Ok(Depth::Infinity),
            _ => Err(headers::Error::invalid()),
        }
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let s = match self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "infinity",
        };
        values.extend(std::iter::once(HeaderValue::from_static(s)));
    }
}

/// `Destination:` header; the raw value, a (possibly absolute) URI.
#[derive(Debug, Clone)]
pub(crate) struct Destination(pub String);

impl Header for Destination {
    fn name() -> &'static HeaderName {
        &DESTINATION
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        let s = value.to_str().map_err(|_| headers::Error::invalid())?;
        Ok(Destination(s.to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        if let Ok(v) = HeaderValue::from_str(&self.0) {
            values.extend(std::iter::once(v));
        }
    }
}

/// `Overwrite:` header. Absence means `T`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Overwrite(pub bool);

impl Header for Overwrite {
    fn name() -> &'static HeaderName {
        &OVERWRITE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        match value.as_bytes() {
            b"T" => Ok(Overwrite(true)),
            b"F" => Ok(Overwrite(false)),
            _ => Err(headers::Error::invalid()),
        }
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let s = if self.0 { "T" } else { "F" };
        values.extend(std::iter::once(HeaderValue::from_static(s)));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DavTimeout {
    Infinite,
    Seconds(u64),
}

/// `Timeout:` header, a comma separated wish-list. Only the first value
/// we understand is used.
#[derive(Debug, Clone)]
pub(crate) struct Timeout(pub Vec<DavTimeout>);

impl Timeout {
    /// Requested timeout in seconds, 0 meaning infinite.
    pub fn seconds(&self) -> u64 {
        match self.0.first() {
            Some(DavTimeout::Seconds(n)) => *n,
            Some(DavTimeout::Infinite) | None => 0,
        }
    }
}

impl Header for Timeout {
    fn name() -> &'static HeaderName {
        &TIMEOUT
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        let s = value.to_str().map_err(|_| headers::Error::invalid())?;
        let mut v = Vec::new();
        for word in s.split(',').map(|w| w.trim()) {
            if word == "Infinite" {
                v.push(DavTimeout::Infinite);
            } else if let Some(caps) = SECONDS_RE.captures(word) {
                if let Ok(n) = caps[1].parse::<u64>() {
                    v.push(DavTimeout::Seconds(n));
                }
            }
            // not understood: skipped.
        }
        Ok(Timeout(v))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let words: Vec<String> = self
            .0
            .iter()
            .map(|t| match t {
                DavTimeout::Infinite => "Infinite".to_string(),
                DavTimeout::Seconds(n) => format!("Second-{n}"),
            })
            .collect();
        if let Ok(v) = HeaderValue::from_str(&words.join(", ")) {
            values.extend(std::iter::once(v));
        }
    }
}

/// `Lock-Token:` header, raw value including the angle brackets.
#[derive(Debug, Clone)]
pub(crate) struct LockToken(pub String);

impl LockToken {
    /// The token with surrounding `<` `>` removed; None if malformed.
    pub fn token(&self) -> Option<&str> {
        self.0
            .strip_prefix('<')
            .and_then(|s| s.strip_suffix('>'))
            .filter(|s| !s.is_empty())
    }
}

impl Header for LockToken {
    fn name() -> &'static HeaderName {
        &LOCK_TOKEN
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        let s = value.to_str().map_err(|_| headers::Error::invalid())?;
        Ok(LockToken(s.trim().to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        if let Ok(v) = HeaderValue::from_str(&self.0) {
            values.extend(std::iter::once(v));
        }
    }
}

/// Raw `If:` header; the evaluator in `conditional` runs its own scanner
/// over the value.
#[derive(Debug, Clone)]
pub(crate) struct If(pub String);

impl Header for If {
    fn name() -> &'static HeaderName {
        &IF
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        let s = value.to_str().map_err(|_| headers::Error::invalid())?;
        Ok(If(s.to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        if let Ok(v) = HeaderValue::from_str(&self.0) {
            values.extend(std::iter::once(v));
        }
    }
}
