//! Site allow-list for submitted URLs.
//!
//! Each named site owns a few start-anchored patterns over lowercase host
//! literals. Matching is deliberately literal: `https://YouTube.com/...` does
//! not match `YouTube`. The `Unlisted` policy only asks for a whitespace-free
//! `http(s)` URL.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

pub const UNLISTED_NAME: &str = "Unlisted";
const LEGACY_UNLISTED_NAME: &str = "Allow Unlisted";

const GENERIC_URL_PATTERN: &str = r"^https?://\S+$";

const SITE_PATTERNS: &[(Site, &[&str])] = &[
    (Site::Bluesky, &[r"^https?://(?:www\.)?bsky\.app/.*"]),
    (Site::Facebook, &[r"^https?://(?:www\.)?facebook\.com/.*"]),
    (Site::Instagram, &[r"^https?://(?:www\.)?instagram\.com/.*"]),
    (Site::TikTok, &[r"^https?://(?:www\.)?tiktok\.com/.*"]),
    (
        Site::YouTube,
        &[
            r"^https?://(?:www\.)?youtube\.com/.*",
            r"^https?://youtu\.be/.*",
            r"^https?://(?:www\.)?music\.youtube\.com/.*",
        ],
    ),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Site {
    Bluesky,
    Facebook,
    Instagram,
    TikTok,
    YouTube,
}

impl Site {
    pub const ALL: [Site; 5] = [
        Site::Bluesky,
        Site::Facebook,
        Site::Instagram,
        Site::TikTok,
        Site::YouTube,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Site::Bluesky => "Bluesky",
            Site::Facebook => "Facebook",
            Site::Instagram => "Instagram",
            Site::TikTok => "TikTok",
            Site::YouTube => "YouTube",
        }
    }

    /// Case-sensitive lookup by display name.
    pub fn from_name(name: &str) -> Option<Self> {
        Site::ALL.into_iter().find(|s| s.name() == name)
    }

    pub fn matches(&self, url: &str) -> bool {
        compiled_patterns()
            .get(self)
            .is_some_and(|patterns| patterns.iter().any(|re| re.is_match(url)))
    }
}

/// The single active URL policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SitePolicy {
    Site(Site),
    Unlisted,
}

impl Default for SitePolicy {
    fn default() -> Self {
        SitePolicy::Site(Site::YouTube)
    }
}

impl SitePolicy {
    pub fn name(&self) -> &'static str {
        match self {
            SitePolicy::Site(site) => site.name(),
            SitePolicy::Unlisted => UNLISTED_NAME,
        }
    }

    /// Accepts site names, `Unlisted`, and the older `Allow Unlisted` label.
    pub fn from_name(name: &str) -> Option<Self> {
        if name == UNLISTED_NAME || name == LEGACY_UNLISTED_NAME {
            return Some(SitePolicy::Unlisted);
        }
        Site::from_name(name).map(SitePolicy::Site)
    }

    pub fn validate(&self, url: &str) -> bool {
        match self {
            SitePolicy::Site(site) => site.matches(url),
            SitePolicy::Unlisted => generic_url_regex().is_match(url),
        }
    }
}

impl std::fmt::Display for SitePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Named sites, sorted. `Unlisted` is not part of the list.
pub fn list_sites() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = Site::ALL.iter().map(Site::name).collect();
    names.sort_unstable();
    names
}

/// Validates `url` against the policy called `site`. Unknown names never pass.
pub fn validate(site: &str, url: &str) -> bool {
    SitePolicy::from_name(site).is_some_and(|policy| policy.validate(url))
}

fn generic_url_regex() -> &'static Regex {
    static GENERIC_RE: OnceLock<Regex> = OnceLock::new();
    GENERIC_RE.get_or_init(|| Regex::new(GENERIC_URL_PATTERN).unwrap())
}

fn compiled_patterns() -> &'static HashMap<Site, Vec<Regex>> {
    static SITE_RES: OnceLock<HashMap<Site, Vec<Regex>>> = OnceLock::new();
    SITE_RES.get_or_init(|| {
        SITE_PATTERNS
            .iter()
            .map(|(site, patterns)| {
                let compiled = patterns.iter().map(|p| Regex::new(p).unwrap()).collect();
                (*site, compiled)
            })
            .collect()
    })
}
