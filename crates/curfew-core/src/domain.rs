use curfew_storage::CanonicalDomain;
use url::Url;

/// Hostname labels that identify each tracked domain
const ALIASES: [(&str, CanonicalDomain); 5] = [
    ("twitter", CanonicalDomain::X),
    ("x", CanonicalDomain::X),
    ("reddit", CanonicalDomain::Reddit),
    ("youtube", CanonicalDomain::YouTube),
    ("instagram", CanonicalDomain::Instagram),
];

/// Map a hostname to its tracked domain.
///
/// Matching is on whole dot-separated labels, so `old.reddit.com` matches
/// while `myreddit.com` does not.
#[must_use]
pub fn canonicalize(hostname: &str) -> Option<CanonicalDomain> {
    let hostname = hostname.to_ascii_lowercase();
    let labels: Vec<&str> = hostname.split('.').collect();
    ALIASES
        .iter()
        .find(|(alias, _)| labels.contains(alias))
        .map(|(_, domain)| *domain)
}

/// Map a page URL to its tracked domain; unparseable URLs are not tracked
#[must_use]
pub fn canonicalize_url(url: &str) -> Option<CanonicalDomain> {
    let parsed = Url::parse(url).ok()?;
    canonicalize(parsed.host_str()?)
}

#[must_use]
pub fn is_tracked_url(url: &str) -> bool {
    canonicalize_url(url).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_fold_into_one_domain() {
        assert_eq!(canonicalize("twitter.com"), Some(CanonicalDomain::X));
        assert_eq!(canonicalize("x.com"), Some(CanonicalDomain::X));
        assert_eq!(canonicalize("mobile.twitter.com"), Some(CanonicalDomain::X));
    }

    #[test]
    fn test_subdomains_are_tracked() {
        assert_eq!(canonicalize("old.reddit.com"), Some(CanonicalDomain::Reddit));
        assert_eq!(canonicalize("m.youtube.com"), Some(CanonicalDomain::YouTube));
        assert_eq!(canonicalize("www.instagram.com"), Some(CanonicalDomain::Instagram));
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        assert_eq!(canonicalize("WWW.YouTube.COM"), Some(CanonicalDomain::YouTube));
    }

    #[test]
    fn test_substrings_do_not_match() {
        assert_eq!(canonicalize("myreddit.com"), None);
        assert_eq!(canonicalize("youtubers.net"), None);
        assert_eq!(canonicalize("xkcd.com"), None);
        assert_eq!(canonicalize("example.com"), None);
        assert_eq!(canonicalize(""), None);
    }

    #[test]
    fn test_canonicalize_url() {
        assert_eq!(
            canonicalize_url("https://www.reddit.com/r/rust/"),
            Some(CanonicalDomain::Reddit)
        );
        assert_eq!(
            canonicalize_url("https://twitter.com/home?lang=en"),
            Some(CanonicalDomain::X)
        );
        assert!(is_tracked_url("https://www.youtube.com/watch?v=abc"));
    }

    #[test]
    fn test_malformed_urls_are_not_tracked() {
        assert_eq!(canonicalize_url("not a url"), None);
        assert_eq!(canonicalize_url("chrome://newtab/"), None);
        assert_eq!(canonicalize_url("about:blank"), None);
        assert!(!is_tracked_url(""));
    }
}
