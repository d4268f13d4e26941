//! Referrer spam filtering
//!
//! A hit whose referrer host is on the denylist, or is a subdomain of a host
//! on it, never reaches storage.

use std::collections::HashSet;

/// Hosts known to send fake referrers.
const BUILTIN_HOSTS: &[&str] = &[
    "abcdefghijklmnopqrstuvwxyz.xyz",
    "best-seo-offer.com",
    "buttons-for-website.com",
    "darodar.com",
    "econom.co",
    "free-social-buttons.com",
    "get-free-traffic-now.com",
    "ilovevitaly.com",
    "priceg.com",
    "semalt.com",
    "simple-share-buttons.com",
    "success-seo.com",
    "traffic2money.com",
];

/// Predicate consulted for every referrer host during persist.
pub trait SpamFilter: Send + Sync {
    fn is_spam_host(&self, host: &str) -> bool;
}

/// Exact and subdomain matching against a fixed host list
#[derive(Debug, Clone)]
pub struct RefspamList {
    hosts: HashSet<String>,
    /// Same hosts with a leading '.', for suffix matching
    suffixes: Vec<String>,
}

impl RefspamList {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let hosts: HashSet<String> = hosts
            .into_iter()
            .map(|h| h.into().trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        let suffixes = hosts.iter().map(|h| format!(".{}", h)).collect();
        Self { hosts, suffixes }
    }

    /// Built-in list plus any extra hosts from config
    pub fn with_builtin<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            BUILTIN_HOSTS
                .iter()
                .map(|h| h.to_string())
                .chain(extra.into_iter().map(Into::into)),
        )
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

impl Default for RefspamList {
    fn default() -> Self {
        Self::with_builtin(std::iter::empty::<String>())
    }
}

impl SpamFilter for RefspamList {
    fn is_spam_host(&self, host: &str) -> bool {
        if host.is_empty() {
            return false;
        }
        let host = host.to_ascii_lowercase();
        if self.hosts.contains(&host) {
            return true;
        }
        self.suffixes.iter().any(|s| host.ends_with(s.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_and_subdomain_match() {
        let list = RefspamList::new(["spam.example"]);
        assert!(list.is_spam_host("spam.example"));
        assert!(list.is_spam_host("www.spam.example"));
        assert!(list.is_spam_host("WWW.SPAM.EXAMPLE"));
    }

    #[test]
    fn test_no_partial_label_match() {
        let list = RefspamList::new(["spam.example"]);
        // Shares a suffix but not on a label boundary
        assert!(!list.is_spam_host("notspam.example"));
        assert!(!list.is_spam_host("example"));
        assert!(!list.is_spam_host(""));
    }

    #[test]
    fn test_builtin_with_extra() {
        let list = RefspamList::with_builtin(["extra.test"]);
        assert!(list.is_spam_host("semalt.com"));
        assert!(list.is_spam_host("a.extra.test"));
        assert_eq!(list.len(), BUILTIN_HOSTS.len() + 1);
    }
}
