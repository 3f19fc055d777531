//! Case-insensitive HTTP header multi-map with redacted `Display`.

use std::collections::HashMap;
use std::fmt;

const REDACTED_FIELDS: &[&str] = &["authorization", "proxy-authorization", "cookie", "set-cookie"];

/// Case-insensitive multi-map of header name to value.
///
/// Appending to an existing field concatenates with `,`, except for
/// `Set-Cookie`, which is last-writer-wins per RFC 7230 §3.2.2.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderDict {
    // Keyed by lowercase name; value preserves the first-seen casing.
    entries: HashMap<String, (String, String)>,
}

impl HeaderDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut dict = Self::new();
        for (k, v) in pairs {
            dict.insert(k.into(), v.into());
        }
        dict
    }

    /// Sets `name` to `value`, joining with a comma unless `name` is
    /// `Set-Cookie`, in which case the new value replaces the old one.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        let key = name.to_ascii_lowercase();
        if key == "set-cookie" {
            self.entries.insert(key, (name, value));
            return;
        }
        self.entries
            .entry(key)
            .and_modify(|(_, existing)| {
                existing.push(',');
                existing.push_str(&value);
            })
            .or_insert((name, value));
    }

    /// Overwrites `name`, discarding any prior value regardless of field.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let key = name.to_ascii_lowercase();
        self.entries.insert(key, (name, value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.entries
            .remove(&name.to_ascii_lowercase())
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.values().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn extend(&mut self, other: &HeaderDict) {
        for (k, v) in other.iter() {
            self.insert(k, v);
        }
    }

    pub fn to_reqwest_headers(&self) -> reqwest::header::HeaderMap {
        let mut map = reqwest::header::HeaderMap::new();
        for (name, value) in self.iter() {
            if let (Ok(name), Ok(value)) = (
                reqwest::header::HeaderName::from_bytes(name.as_bytes()),
                reqwest::header::HeaderValue::from_str(value),
            ) {
                map.append(name, value);
            }
        }
        map
    }
}

impl From<reqwest::header::HeaderMap> for HeaderDict {
    fn from(map: reqwest::header::HeaderMap) -> Self {
        let mut dict = HeaderDict::new();
        for (name, value) in map.iter() {
            if let Ok(value) = value.to_str() {
                dict.insert(name.as_str(), value);
            }
        }
        dict
    }
}

impl fmt::Display for HeaderDict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, (name, value)) in &self.entries {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            if REDACTED_FIELDS.contains(&key.as_str()) {
                write!(f, "{name}: *****")?;
            } else {
                write!(f, "{name}: {value}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_headers_join_with_comma() {
        let mut h = HeaderDict::new();
        h.insert("X-Foo", "v1");
        h.insert("x-foo", "v2");
        assert_eq!(h.get("X-FOO"), Some("v1,v2"));
    }

    #[test]
    fn set_cookie_is_last_writer_wins() {
        let mut h = HeaderDict::new();
        h.insert("Set-Cookie", "a=1");
        h.insert("set-cookie", "b=2");
        assert_eq!(h.get("Set-Cookie"), Some("b=2"));
    }

    #[test]
    fn display_redacts_sensitive_fields() {
        let mut h = HeaderDict::new();
        h.insert("Authorization", "Bearer secret-token");
        h.insert("Cookie", "session=abc");
        h.insert("X-Request-Id", "123");
        let rendered = h.to_string();
        assert!(!rendered.contains("secret-token"));
        assert!(!rendered.contains("session=abc"));
        assert!(rendered.contains("123"));
    }
}
