//! Element locators
//!
//! Scenarios name elements with CSS selectors plus two text extensions:
//!
//! - `text=Book Appointment` matches the innermost element whose text contains
//!   the phrase.
//! - `button:has-text("Save")` matches elements that satisfy the CSS part and
//!   contain the phrase anywhere in their text.
//!
//! Text matching is case-insensitive and whitespace-normalised.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    /// CSS part evaluated with `querySelectorAll`.
    pub css: String,
    /// Required text content, if any.
    pub text: Option<String>,
    /// Keep only the innermost matching elements.
    pub leaf: bool,
    /// The locator as written in the scenario.
    pub source: String,
}

const HAS_TEXT: &str = ":has-text(";

impl Locator {
    pub fn parse(raw: &str) -> HarnessResult<Self> {
        let source = raw.trim();
        if source.is_empty() {
            return Err(invalid(raw, "empty locator"));
        }

        if let Some(text) = source.strip_prefix("text=") {
            let text = unquote(text.trim());
            if text.is_empty() {
                return Err(invalid(raw, "text locator needs a phrase"));
            }
            return Ok(Self {
                css: "*".to_string(),
                text: Some(text.to_string()),
                leaf: true,
                source: source.to_string(),
            });
        }

        if let Some(start) = source.find(HAS_TEXT) {
            let rest = &source[start + HAS_TEXT.len()..];
            let quote = rest
                .chars()
                .next()
                .filter(|c| *c == '"' || *c == '\'')
                .ok_or_else(|| invalid(raw, ":has-text expects a quoted phrase"))?;
            let body = &rest[1..];
            let close = body
                .find(quote)
                .ok_or_else(|| invalid(raw, "unterminated :has-text phrase"))?;
            let text = &body[..close];
            let tail = body[close + 1..]
                .strip_prefix(')')
                .ok_or_else(|| invalid(raw, "missing ')' after :has-text phrase"))?;
            if !tail.trim().is_empty() {
                return Err(invalid(raw, ":has-text must end the locator"));
            }

            let mut css = source[..start].trim().to_string();
            if css.is_empty() {
                css = "*".to_string();
            }
            return Ok(Self {
                css,
                text: Some(text.to_string()),
                leaf: false,
                source: source.to_string(),
            });
        }

        Ok(Self {
            css: source.to_string(),
            text: None,
            leaf: false,
            source: source.to_string(),
        })
    }

    /// Parse a list of alternatives, keeping their order.
    pub fn parse_all<S: AsRef<str>>(raw: &[S]) -> HarnessResult<Vec<Self>> {
        raw.iter().map(|s| Self::parse(s.as_ref())).collect()
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn unquote(text: &str) -> &str {
    for q in ['"', '\''] {
        if let Some(inner) = text.strip_prefix(q).and_then(|t| t.strip_suffix(q)) {
            return inner;
        }
    }
    text
}

fn invalid(raw: &str, reason: &str) -> HarnessError {
    HarnessError::Catalog {
        origin: format!("locator '{raw}'"),
        reason: reason.to_string(),
    }
}
