//! Extraction hints for the registration portal families we know about.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;
use url::Url;

/// Words that say whether a section still has room.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusKeywords {
    #[serde(default)]
    pub available: Vec<String>,
    #[serde(default)]
    pub full: Vec<String>,
}

impl StatusKeywords {
    fn new(available: &[&str], full: &[&str]) -> Self {
        Self {
            available: available.iter().map(|s| s.to_string()).collect(),
            full: full.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Adds the other set's words to each category, skipping repeats.
    pub fn union(&mut self, other: &StatusKeywords) {
        fn extend(into: &mut Vec<String>, from: &[String]) {
            for word in from {
                if !into.iter().any(|w| w.eq_ignore_ascii_case(word)) {
                    into.push(word.clone());
                }
            }
        }

        extend(&mut self.available, &other.available);
        extend(&mut self.full, &other.full);
    }
}

/// Selectors, patterns and vocabulary for one portal family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalProfile {
    pub name: String,
    pub url_patterns: Vec<String>,
    pub course_selectors: Vec<String>,
    pub load_more_selectors: Vec<String>,
    pub status_keywords: StatusKeywords,
    pub course_code_pattern: String,
    pub section_pattern: String,
}

/// Per-institution changes layered over a family profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileOverride {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub course_selectors: Option<Vec<String>>,
    #[serde(default)]
    pub load_more_selectors: Option<Vec<String>>,
    #[serde(default)]
    pub status_keywords: Option<StatusKeywords>,
    #[serde(default)]
    pub course_code_pattern: Option<String>,
    #[serde(default)]
    pub section_pattern: Option<String>,
}

impl ProfileOverride {
    /// Replaces the fields that are set; keywords are unioned per category.
    pub fn apply(&self, profile: &mut PortalProfile) {
        if let Some(name) = &self.name {
            profile.name = name.clone();
        }
        if let Some(selectors) = &self.course_selectors {
            profile.course_selectors = selectors.clone();
        }
        if let Some(selectors) = &self.load_more_selectors {
            profile.load_more_selectors = selectors.clone();
        }
        if let Some(keywords) = &self.status_keywords {
            profile.status_keywords.union(keywords);
        }
        if let Some(pattern) = &self.course_code_pattern {
            profile.course_code_pattern = pattern.clone();
        }
        if let Some(pattern) = &self.section_pattern {
            profile.section_pattern = pattern.clone();
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_load_more_selectors() -> Vec<String> {
    strings(&[
        "a[rel=\"next\"]",
        "[class*=\"load\"]",
        "[class*=\"more\"]",
        "[id*=\"load\"]",
        "[id*=\"more\"]",
        "[class*=\"next\"]",
        "[id*=\"next\"]",
        "[class*=\"page\"]",
        "[id*=\"page\"]",
    ])
}

/// Converts a `*` wildcard URL pattern into an anchored, case-insensitive regex.
fn glob_to_regex(glob: &str) -> Regex {
    let body = glob
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");

    RegexBuilder::new(&format!("^{body}$"))
        .case_insensitive(true)
        .build()
        .unwrap()
}

struct Family {
    profile: PortalProfile,
    patterns: Vec<Regex>,
}

impl Family {
    fn new(profile: PortalProfile) -> Self {
        let patterns = profile.url_patterns.iter().map(|p| glob_to_regex(p)).collect();
        Self { profile, patterns }
    }

    fn matches(&self, url: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(url))
    }
}

// Checked in order; the first family whose pattern matches wins.
static FAMILIES: LazyLock<Vec<Family>> = LazyLock::new(|| {
    vec![
        Family::new(PortalProfile {
            name: "Banner Self-Service".to_string(),
            url_patterns: strings(&[
                "*://*/ssb/*",
                "*://*/StudentRegistrationSsb/*",
                "*://*/banner/*",
                "*ssb*",
                "*banner*",
            ]),
            course_selectors: strings(&[
                "table[summary*=\"course\"] tr",
                ".pagebodydiv table tr",
                "table.datadisplaytable tr",
            ]),
            load_more_selectors: default_load_more_selectors(),
            status_keywords: StatusKeywords::new(
                &["open", "available", "seats available"],
                &["full", "closed", "waitlist", "wait list"],
            ),
            course_code_pattern: r"([A-Z]{2,4}\s*\d{3,4}[A-Z]?)".to_string(),
            section_pattern: r"(?i)(?:section|sec)[\s:]*([A-Z0-9]{1,3})".to_string(),
        }),
        Family::new(PortalProfile {
            name: "PeopleSoft".to_string(),
            url_patterns: strings(&[
                "*://*/psp/*",
                "*://*/peoplesoft/*",
                "*://*/ps/*",
                "*peoplesoft*",
            ]),
            course_selectors: strings(&[
                ".PSLEVEL1GRIDNBO tr",
                ".PSGROUPBOXNBO table tr",
                "table[id*=\"CLASS\"] tr",
            ]),
            load_more_selectors: default_load_more_selectors(),
            status_keywords: StatusKeywords::new(
                &["open", "available"],
                &["closed", "full", "wait list"],
            ),
            course_code_pattern: r"([A-Z]{2,4}\d{3,4}[A-Z]?)".to_string(),
            section_pattern: r"([A-Z0-9]{1,3})".to_string(),
        }),
        Family::new(PortalProfile {
            name: "Blackboard WebAdvisor".to_string(),
            url_patterns: strings(&["*://*/webadvisor/*", "*webadvisor*"]),
            course_selectors: strings(&["table.dataDisplayTable tr", ".complexTable tr"]),
            load_more_selectors: default_load_more_selectors(),
            status_keywords: StatusKeywords::new(
                &["available", "open"],
                &["full", "closed", "not available"],
            ),
            course_code_pattern: r"([A-Z]{2,4}\s*\d{3,4})".to_string(),
            section_pattern: r"(?i)section[\s:]*([A-Z0-9]{1,3})".to_string(),
        }),
    ]
});

static GENERIC: LazyLock<PortalProfile> = LazyLock::new(|| PortalProfile {
    name: "Generic System".to_string(),
    url_patterns: strings(&["*://*/*"]),
    course_selectors: strings(&[
        "tr[class*=\"course\"]",
        "div[class*=\"course\"]",
        "tr[class*=\"class\"]",
        "div[class*=\"class\"]",
        ".course-row",
        ".class-row",
    ]),
    load_more_selectors: default_load_more_selectors(),
    status_keywords: StatusKeywords::new(
        &["open", "available", "seats available", "not full"],
        &["full", "closed", "waitlist", "wait list", "no seats"],
    ),
    course_code_pattern: r"([A-Z]{2,4}\s*\d{3,4}[A-Z]?)".to_string(),
    section_pattern: r"(?i)(?:section|sec)[\s:]*([A-Z0-9]{1,3})".to_string(),
});

fn builtin_overrides() -> HashMap<String, ProfileOverride> {
    HashMap::from([
        (
            "university.edu".to_string(),
            ProfileOverride {
                course_code_pattern: Some(r"([A-Z]{3}\s*\d{3})".to_string()),
                section_pattern: Some(r"([0-9]{2})".to_string()),
                status_keywords: Some(StatusKeywords::new(&["seats open"], &["course full"])),
                ..ProfileOverride::default()
            },
        ),
        (
            "state.edu".to_string(),
            ProfileOverride {
                course_code_pattern: Some(r"([A-Z]{4}\d{4})".to_string()),
                section_pattern: Some(r"([A-Z])".to_string()),
                ..ProfileOverride::default()
            },
        ),
    ])
}

/// Picks the profile for a page URL.
///
/// Holds the exact-domain override table; resolution itself is pure.
#[derive(Debug, Clone)]
pub struct ProfileResolver {
    overrides: HashMap<String, ProfileOverride>,
}

impl ProfileResolver {
    /// A resolver with the built-in institution overrides plus `extra`.
    ///
    /// Entries in `extra` replace built-in entries for the same domain.
    pub fn with_overrides(extra: HashMap<String, ProfileOverride>) -> Self {
        let mut overrides = builtin_overrides();
        for (domain, entry) in extra {
            overrides.insert(domain.to_lowercase(), entry);
        }
        Self { overrides }
    }

    /// Returns the family profile for `page_url` with any domain override merged in.
    pub fn resolve(&self, page_url: &str) -> PortalProfile {
        let mut profile = family_profile(page_url).clone();

        let domain = Url::parse(page_url.trim())
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase));
        if let Some(entry) = domain.and_then(|d| self.overrides.get(&d)) {
            entry.apply(&mut profile);
        }

        profile
    }
}

impl Default for ProfileResolver {
    fn default() -> Self {
        Self::with_overrides(HashMap::new())
    }
}

/// The family a URL belongs to, without institution overrides.
pub fn family_profile(page_url: &str) -> &'static PortalProfile {
    let url = page_url.trim();
    FAMILIES
        .iter()
        .find(|family| family.matches(url))
        .map(|family| &family.profile)
        .unwrap_or(&GENERIC)
}
