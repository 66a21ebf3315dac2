//! Session cookie parsing.
//!
//! The login step hands over a single string holding several cookies:
//!
//! ```text
//! USER=alice; AUTH=0123abcd; TUNNEL=/ssl-tunnel-connect.sslvpn; IP=10.0.0.5; MTU=1400
//! ```
//!
//! Entries are separated by `;` plus optional whitespace. The first `=` of an
//! entry splits name from value; the value may be empty or contain `=`.

use std::collections::BTreeMap;

use crate::error::InvalidCookieError;

/// Username attribute.
pub const USER: &str = "USER";
/// Authentication token attribute.
pub const AUTH: &str = "AUTH";
/// Tunnel request path attribute.
pub const TUNNEL: &str = "TUNNEL";
/// Tunnel address attribute.
pub const IP: &str = "IP";
/// Tunnel MTU attribute.
pub const MTU: &str = "MTU";

/// Named attributes carried by the session cookie.
///
/// Keys are case-sensitive. The first value seen for a key wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionAttributes {
    attrs: BTreeMap<String, String>,
}

impl SessionAttributes {
    /// Create an empty attribute set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw cookie string.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCookieError` for the first entry without `=`; nothing
    /// parsed before it is returned.
    ///
    /// # Example
    ///
    /// ```
    /// use gpst::SessionAttributes;
    ///
    /// let attrs = SessionAttributes::parse("USER=alice; AUTH=tok=123").unwrap();
    /// assert_eq!(attrs.get("USER"), Some("alice"));
    /// assert_eq!(attrs.get("AUTH"), Some("tok=123"));
    /// ```
    pub fn parse(raw: &str) -> Result<Self, InvalidCookieError> {
        let mut attrs = Self::new();
        let mut rest = raw;
        while !rest.is_empty() {
            let (entry, next) = match rest.split_once(';') {
                Some((entry, next)) => (entry, Some(next)),
                None => (rest, None),
            };
            let (key, value) = entry
                .split_once('=')
                .ok_or_else(|| InvalidCookieError { entry: entry.to_string() })?;
            attrs.insert_if_absent(key, value);

            rest = match next {
                Some(next) => next.trim_start(),
                None => "",
            };
        }
        Ok(attrs)
    }

    /// Parse `raw` and add its entries to this set, keeping existing values.
    ///
    /// On error the set is left untouched.
    pub fn merge_cookie(&mut self, raw: &str) -> Result<(), InvalidCookieError> {
        let parsed = Self::parse(raw)?;
        for (key, value) in parsed.attrs {
            self.attrs.entry(key).or_insert(value);
        }
        Ok(())
    }

    /// Insert `key` unless it is already present. Returns whether it was added.
    pub fn insert_if_absent(&mut self, key: &str, value: &str) -> bool {
        if self.attrs.contains_key(key) {
            return false;
        }
        self.attrs.insert(key.to_string(), value.to_string());
        true
    }

    /// Look up an attribute.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    /// Whether the set holds `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.attrs.contains_key(key)
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    /// Whether no attribute is present.
    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// Iterate over `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
