//! Input validation for public forms and admin edits

use std::fmt;

use serde::Serialize;

/// A syntactically plausible, normalized email address
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct EmailAddress(String);

impl EmailAddress {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let email = raw.trim().to_lowercase();
        if email.len() < 3 || email.len() > 254 {
            return Err(ValidationError::InvalidEmail);
        }
        if email.chars().any(char::is_whitespace) {
            return Err(ValidationError::InvalidEmail);
        }

        let (local, domain) = email
            .split_once('@')
            .ok_or(ValidationError::InvalidEmail)?;
        if local.is_empty() || domain.contains('@') {
            return Err(ValidationError::InvalidEmail);
        }
        let dot_ok = domain
            .split('.')
            .filter(|label| !label.is_empty())
            .count()
            >= 2;
        if !dot_ok || domain.starts_with('.') || domain.ends_with('.') {
            return Err(ValidationError::InvalidEmail);
        }

        Ok(Self(email))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for EmailAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

const FORBIDDEN_NAME_CHARS: [char; 8] = ['<', '>', '"', '{', '}', '/', '\\', '`'];
const MAX_NAME_CHARS: usize = 100;

/// A person's display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PersonName(String);

impl PersonName {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(ValidationError::Required("name"));
        }
        if name.chars().count() > MAX_NAME_CHARS {
            return Err(ValidationError::TooLong("name", MAX_NAME_CHARS));
        }
        if name.chars().any(|c| FORBIDDEN_NAME_CHARS.contains(&c) || c.is_control()) {
            return Err(ValidationError::InvalidCharacters("name"));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

const MIN_MESSAGE_CHARS: usize = 10;
const MAX_MESSAGE_CHARS: usize = 5000;

/// Validate a contact form message body
pub fn parse_message(raw: &str) -> Result<String, ValidationError> {
    let message = raw.trim();
    let len = message.chars().count();
    if len == 0 {
        return Err(ValidationError::Required("message"));
    }
    if len < MIN_MESSAGE_CHARS {
        return Err(ValidationError::TooShort("message", MIN_MESSAGE_CHARS));
    }
    if len > MAX_MESSAGE_CHARS {
        return Err(ValidationError::TooLong("message", MAX_MESSAGE_CHARS));
    }
    Ok(message.to_string())
}

/// Validate an optional phone number; blank input counts as absent
pub fn parse_phone(raw: Option<&str>) -> Result<Option<String>, ValidationError> {
    let Some(phone) = raw.map(str::trim).filter(|p| !p.is_empty()) else {
        return Ok(None);
    };
    if phone.len() > 30 {
        return Err(ValidationError::TooLong("phone", 30));
    }
    let allowed = |c: char| c.is_ascii_digit() || "+-() .".contains(c);
    if !phone.chars().all(allowed) || !phone.chars().any(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidCharacters("phone"));
    }
    Ok(Some(phone.to_string()))
}

/// Trim an optional free-text field, mapping blanks to `None`
pub fn optional_text(raw: Option<String>, field: &'static str, max: usize) -> Result<Option<String>, ValidationError> {
    match raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) {
        Some(text) if text.chars().count() > max => Err(ValidationError::TooLong(field, max)),
        other => Ok(other),
    }
}

/// Validate a URL-safe slug: lowercase letters, digits and single dashes
pub fn parse_slug(raw: &str) -> Result<String, ValidationError> {
    let slug = raw.trim();
    if slug.is_empty() {
        return Err(ValidationError::Required("slug"));
    }
    let valid = slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && !slug.contains("--");
    if !valid {
        return Err(ValidationError::InvalidCharacters("slug"));
    }
    Ok(slug.to_string())
}

/// Validation errors, surfaced to clients as 400
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid email address")]
    InvalidEmail,

    #[error("{0} is required")]
    Required(&'static str),

    #[error("{0} must be at least {1} characters")]
    TooShort(&'static str, usize),

    #[error("{0} must be at most {1} characters")]
    TooLong(&'static str, usize),

    #[error("{0} contains invalid characters")]
    InvalidCharacters(&'static str),

    #[error("{0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_normalized() {
        let email = EmailAddress::parse("  Jane.Doe@Example.COM ").unwrap();
        assert_eq!(email.as_str(), "jane.doe@example.com");
    }

    #[test]
    fn bad_emails_are_rejected() {
        for raw in [
            "",
            "plainaddress",
            "@example.com",
            "jane@",
            "jane@localhost",
            "jane@@example.com",
            "jane doe@example.com",
            "jane@example.",
            "jane@.example.com",
        ] {
            assert_eq!(
                EmailAddress::parse(raw),
                Err(ValidationError::InvalidEmail),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn names() {
        assert_eq!(PersonName::parse("  Ana María ").unwrap().as_str(), "Ana María");
        assert_eq!(PersonName::parse("   "), Err(ValidationError::Required("name")));
        assert_eq!(
            PersonName::parse("<script>"),
            Err(ValidationError::InvalidCharacters("name"))
        );
        let long = "a".repeat(101);
        assert_eq!(PersonName::parse(&long), Err(ValidationError::TooLong("name", 100)));
    }

    #[test]
    fn messages() {
        assert_eq!(parse_message("too short"), Err(ValidationError::TooShort("message", 10)));
        assert_eq!(parse_message("  I would like to book a session.  ").unwrap(), "I would like to book a session.");
        assert_eq!(parse_message(""), Err(ValidationError::Required("message")));
    }

    #[test]
    fn phones() {
        assert_eq!(parse_phone(None), Ok(None));
        assert_eq!(parse_phone(Some("  ")), Ok(None));
        assert_eq!(parse_phone(Some("+1 (555) 010-9999")), Ok(Some("+1 (555) 010-9999".into())));
        assert_eq!(parse_phone(Some("call me")), Err(ValidationError::InvalidCharacters("phone")));
        assert_eq!(parse_phone(Some("---")), Err(ValidationError::InvalidCharacters("phone")));
    }

    #[test]
    fn slugs() {
        assert_eq!(parse_slug("welcome-email").unwrap(), "welcome-email");
        assert!(parse_slug("Welcome").is_err());
        assert!(parse_slug("-x").is_err());
        assert!(parse_slug("a--b").is_err());
        assert!(parse_slug("").is_err());
    }

    #[test]
    fn optional_text_blank_is_none() {
        assert_eq!(optional_text(Some("   ".into()), "notes", 10), Ok(None));
        assert_eq!(optional_text(Some(" hi ".into()), "notes", 10), Ok(Some("hi".into())));
        assert!(optional_text(Some("x".repeat(11)), "notes", 10).is_err());
    }
}
