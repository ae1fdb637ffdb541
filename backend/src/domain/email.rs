//! Email address parsing and normalisation.
//!
//! The send path accepts senders as either `local@host` or
//! `Name <local@host>`; suppression bookkeeping always works on the
//! lowercased, trimmed form of an address.

use crate::domain::{Error, ErrorCode};

/// Parsed sender with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderAddress {
    display_name: Option<String>,
    address: String,
}

impl SenderAddress {
    /// Parse `local@host` or `Name <local@host>`; outer quotes are stripped
    /// from the display name.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(invalid_address(raw, "from address is required"));
        }

        let (display_name, address) = match (raw.rfind('<'), raw.ends_with('>')) {
            (Some(open), true) => {
                let name = raw[..open].trim().trim_matches('"').trim();
                let addr = raw[open + 1..raw.len() - 1].trim();
                let name = (!name.is_empty()).then(|| name.to_owned());
                (name, addr.to_owned())
            }
            _ => (None, raw.to_owned()),
        };

        if !is_plausible_address(&address) {
            return Err(invalid_address(&address, "from address is not a valid email"));
        }

        Ok(Self {
            display_name,
            address,
        })
    }

    /// Optional display name, outer quotes removed.
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Bare `local@host` address.
    pub fn address(&self) -> &str {
        self.address.as_str()
    }

    /// Lowercased right-hand side of the address.
    pub fn domain(&self) -> String {
        self.address
            .rsplit_once('@')
            .map(|(_, host)| host.to_ascii_lowercase())
            .unwrap_or_default()
    }

    /// `"Name" <addr>` when a display name is present, the bare address
    /// otherwise. This is the form stamped into the SMTP `From` header.
    pub fn header_value(&self) -> String {
        match &self.display_name {
            Some(name) => format!("\"{name}\" <{}>", self.address),
            None => self.address.clone(),
        }
    }
}

/// Canonical form used for suppression rows and checks.
pub fn normalize_address(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// Validate one recipient address, returning the trimmed form.
pub fn validate_recipient(raw: &str) -> Result<String, Error> {
    let trimmed = raw.trim();
    if !is_plausible_address(trimmed) {
        return Err(invalid_address(trimmed, "recipient is not a valid email"));
    }
    Ok(trimmed.to_owned())
}

fn is_plausible_address(addr: &str) -> bool {
    match addr.split_once('@') {
        Some((local, host)) => {
            !local.is_empty()
                && !host.is_empty()
                && host.contains('.')
                && !addr.contains(char::is_whitespace)
                && !host.contains('@')
        }
        None => false,
    }
}

fn invalid_address(value: &str, message: &str) -> Error {
    Error::new(ErrorCode::InvalidRequest, message)
        .with_details(serde_json::json!({ "value": value }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("alice@example.com", None, "alice@example.com")]
    #[case("Alice <alice@example.com>", Some("Alice"), "alice@example.com")]
    #[case("\"Alice A.\" <alice@example.com>", Some("Alice A."), "alice@example.com")]
    #[case("  alice@Example.COM  ", None, "alice@Example.COM")]
    fn parses_sender_forms(
        #[case] raw: &str,
        #[case] name: Option<&str>,
        #[case] addr: &str,
    ) {
        let sender = SenderAddress::parse(raw).expect("valid sender");
        assert_eq!(sender.display_name(), name);
        assert_eq!(sender.address(), addr);
    }

    #[test]
    fn domain_is_lowercased() {
        let sender = SenderAddress::parse("alice@Example.COM").expect("valid");
        assert_eq!(sender.domain(), "example.com");
    }

    #[rstest]
    #[case("")]
    #[case("not-an-email")]
    #[case("a@")]
    #[case("@b.com")]
    #[case("a b@c.com")]
    #[case("Alice <not-an-email>")]
    fn rejects_bad_senders(#[case] raw: &str) {
        assert!(SenderAddress::parse(raw).is_err(), "should reject {raw:?}");
    }

    #[test]
    fn header_value_quotes_display_name() {
        let sender = SenderAddress::parse("Alice <alice@example.com>").expect("valid");
        assert_eq!(sender.header_value(), "\"Alice\" <alice@example.com>");

        let bare = SenderAddress::parse("alice@example.com").expect("valid");
        assert_eq!(bare.header_value(), "alice@example.com");
    }

    #[rstest]
    #[case("  Bob@X.COM ", "bob@x.com")]
    #[case("bob@x.com", "bob@x.com")]
    fn normalisation_lowers_and_trims(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_address(raw), expected);
    }

    #[test]
    fn recipient_validation_keeps_submitted_casing() {
        assert_eq!(
            validate_recipient(" Bob@X.com ").expect("valid"),
            "Bob@X.com"
        );
        assert!(validate_recipient("nope").is_err());
    }
}
