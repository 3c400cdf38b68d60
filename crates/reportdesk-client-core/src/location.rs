//! The address a one-time login link lands on.
//!
//! The verification link carries a `token` query parameter. After the token
//! is exchanged (or rejected) it must disappear from the visible address via
//! a history replace, so reloading or resharing the address cannot replay it.

use url::Url;

pub const TOKEN_PARAM: &str = "token";

/// Externally visible location state (a browser's address bar, a deep link
/// handed to a desktop app, ...).
pub trait AddressBar: Send {
    fn current(&self) -> String;
    /// Replaces the current history entry without navigating.
    fn replace(&mut self, address: &str);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryAddressBar {
    current: String,
    replacements: usize,
}

impl MemoryAddressBar {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            current: address.into(),
            replacements: 0,
        }
    }

    #[must_use]
    pub fn replacements(&self) -> usize {
        self.replacements
    }
}

impl AddressBar for MemoryAddressBar {
    fn current(&self) -> String {
        self.current.clone()
    }

    fn replace(&mut self, address: &str) {
        self.current = address.to_string();
        self.replacements += 1;
    }
}

/// Extracts a non-empty `token` parameter from an absolute address.
#[must_use]
pub fn one_time_token(address: &str) -> Option<String> {
    let url = Url::parse(address.trim()).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == TOKEN_PARAM)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Returns `address` without any `token` parameter; other parameters and
/// the fragment are preserved. Input without a token comes back unchanged.
#[must_use]
pub fn strip_one_time_token(address: &str) -> String {
    let Ok(mut url) = Url::parse(address.trim()) else {
        return address.to_string();
    };
    if !url.query_pairs().any(|(key, _)| key == TOKEN_PARAM) {
        return address.to_string();
    }
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != TOKEN_PARAM)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    url.to_string()
}

/// Scrubs the token from `bar`, touching history only when needed.
pub fn scrub_one_time_token(bar: &mut dyn AddressBar) {
    let current = bar.current();
    let scrubbed = strip_one_time_token(&current);
    if scrubbed != current {
        bar.replace(&scrubbed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_read_from_query() {
        assert_eq!(
            one_time_token("https://app.example.com/login?token=abc123&lang=tr"),
            Some("abc123".to_string())
        );
        assert_eq!(one_time_token("https://app.example.com/login?token="), None);
        assert_eq!(one_time_token("https://app.example.com/"), None);
        assert_eq!(one_time_token("not a url"), None);
    }

    #[test]
    fn strip_keeps_other_params_and_fragment() {
        assert_eq!(
            strip_one_time_token("https://app.example.com/login?lang=tr&token=abc#top"),
            "https://app.example.com/login?lang=tr#top"
        );
        assert_eq!(
            strip_one_time_token("https://app.example.com/login?token=abc"),
            "https://app.example.com/login"
        );
    }

    #[test]
    fn scrub_only_replaces_when_token_present() {
        let mut bar = MemoryAddressBar::new("https://app.example.com/");
        scrub_one_time_token(&mut bar);
        assert_eq!(bar.replacements(), 0);

        let mut bar = MemoryAddressBar::new("https://app.example.com/?token=abc");
        scrub_one_time_token(&mut bar);
        assert_eq!(bar.replacements(), 1);
        assert_eq!(one_time_token(&bar.current()), None);
    }
}
