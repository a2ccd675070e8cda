use std::fmt;

use thiserror::Error;
use url::Url;

/// A normalized short-link alias: trimmed, ASCII lower-cased and restricted
/// to letters, digits and hyphens.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Alias(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AliasValidationError {
    #[error("Please enter an alias")]
    Empty,
    #[error("Alias can only contain letters, numbers, and hyphens (found {invalid_chars:?})")]
    InvalidCharacters { invalid_chars: String },
}

impl Alias {
    /// Normalizes and validates a user-supplied alias.
    ///
    /// # Errors
    /// Will return [`Err`] if the trimmed alias is empty or contains anything
    /// other than ASCII letters, digits and `-`.
    pub fn new(raw: &str) -> Result<Self, AliasValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AliasValidationError::Empty);
        }

        // NOTE: validate before lower-casing; some non-ASCII characters
        // (e.g. the Kelvin sign) lower-case into ASCII letters
        let mut invalid_chars = String::new();
        for c in trimmed.chars() {
            if !is_alias_char(c) && !invalid_chars.contains(c) {
                invalid_chars.push(c);
            }
        }
        if !invalid_chars.is_empty() {
            return Err(AliasValidationError::InvalidCharacters { invalid_chars });
        }

        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

const fn is_alias_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-'
}

/// An absolute `http`/`https` URL, kept exactly as the user submitted it
/// (minus surrounding whitespace).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetUrl(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrlValidationError {
    #[error("Please enter a URL")]
    Empty,
    #[error("Invalid URL. Please include http:// or https:// ({0})")]
    Malformed(#[from] url::ParseError),
    #[error("Invalid URL protocol {scheme:?}. Please include http:// or https://")]
    UnsupportedScheme { scheme: String },
    #[error("Invalid URL. It must not contain tabs, line breaks or other control characters")]
    ControlCharacters,
}

impl TargetUrl {
    /// # Errors
    /// Will return [`Err`] if the URL is empty, contains control characters,
    /// does not parse as an absolute URL, or uses a scheme other than `http`/`https`.
    pub fn new(raw: &str) -> Result<Self, UrlValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(UrlValidationError::Empty);
        }
        // NOTE: the URL parser silently strips tabs and newlines, but the raw
        // string is what ends up in the `Location` header
        if trimmed.chars().any(char::is_control) {
            return Err(UrlValidationError::ControlCharacters);
        }

        let parsed = Url::parse(trimmed)?;
        match parsed.scheme() {
            "http" | "https" => Ok(Self(trimmed.to_owned())),
            scheme => Err(UrlValidationError::UnsupportedScheme {
                scheme: scheme.to_owned(),
            }),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for TargetUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
