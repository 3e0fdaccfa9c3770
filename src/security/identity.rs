//! Caller identity carried in a request header.
//!
//! # Design Decisions
//! - `Identity` can only be built through the predicate, so holding one
//!   proves the value is non-empty and contains '@'
//! - The predicate is deliberately shallow; real authorization plugs in
//!   behind `EmailPolicy`

use std::fmt;

/// Minimal well-formedness check for a header-carried email.
pub fn is_email_allowed(email: &str) -> bool {
    !email.is_empty() && email.contains('@')
}

/// Decides whether a syntactically present email may proceed.
///
/// Implementations can consult a directory, a database or a domain list.
/// They are called on the request path and must not block.
pub trait EmailPolicy: Send + Sync + fmt::Debug {
    /// Returns true if the email is allowed through.
    fn is_allowed(&self, email: &str) -> bool;
}

/// Accepts any email that passes [`is_email_allowed`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PlausibleEmail;

impl EmailPolicy for PlausibleEmail {
    fn is_allowed(&self, email: &str) -> bool {
        is_email_allowed(email)
    }
}

/// A validated caller email, attached to request extensions once accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    /// Wrap `raw` if it passes the predicate.
    pub fn parse(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        is_email_allowed(&raw).then_some(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicate() {
        assert!(is_email_allowed("user@example.com"));
        assert!(is_email_allowed("@"));
        assert!(!is_email_allowed(""));
        assert!(!is_email_allowed("not-an-email"));
    }

    #[test]
    fn test_identity_parse() {
        let id = Identity::parse("user@example.com").unwrap();
        assert_eq!(id.as_str(), "user@example.com");
        assert_eq!(id.to_string(), "user@example.com");

        assert!(Identity::parse("").is_none());
        assert!(Identity::parse("nobody").is_none());
    }

    #[test]
    fn test_plausible_policy_matches_predicate() {
        let policy = PlausibleEmail;
        assert!(policy.is_allowed("a@b"));
        assert!(!policy.is_allowed("ab"));
    }
}
