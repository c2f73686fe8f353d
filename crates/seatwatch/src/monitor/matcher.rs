//! Locating a section's enrollment figures on a page.
//!
//! Four strategies are tried in order and the first that produces a
//! reading wins: the innermost DOM container holding the course, fixed
//! text templates around the course id, a line-by-line scan, and finally
//! the portal's open/full vocabulary when no numbers are printed at all.

use super::portal::{PortalProfile, StatusKeywords};
use super::types::{CourseTarget, EnrollmentReading};
use crate::page::{DomView, ElementId, Viewport};
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::debug;

/// `N1(N2)` or `N1/N2`.
static PAIR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,4})\s*\(\s*(\d{1,4})\s*\)|(\d{1,4})\s*/\s*(\d{1,4})").unwrap()
});
/// Any `CODE.SECTION` token; used to end a search window at the next course.
static COURSE_TOKEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b([A-Z]{2,6}\d{3,4}[A-Z]?)\.(\d+)\b").unwrap());
static PAGINATION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:page|pg)\.?\s*$").unwrap());

const GENERIC_CONTAINERS: &[&str] = &["tr", "td", "li", "div", "span"];

/// How far past an anchor a pair may start, in bytes.
const ADJACENT_WINDOW: usize = 24;
const SECTION_WINDOW: usize = 80;
const WIDE_WINDOW: usize = 120;

/// Which elements the container scan may look at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchScope {
    Document,
    /// Only elements at least partly inside the viewport.
    Visible(Viewport),
}

/// A guarded enrollment pair and where it sits in the text.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Pair {
    first: u32,
    second: u32,
    start: usize,
    end: usize,
}

struct Template {
    anchor: Regex,
    window: usize,
    /// Only whitespace may separate the anchor from the pair.
    adjacent: bool,
}

/// Regexes built for one course.
struct CoursePatterns {
    id: Regex,
    templates: Vec<Template>,
}

impl CoursePatterns {
    fn new(target: &CourseTarget) -> Result<Self, regex::Error> {
        let code = regex::escape(&target.code);
        let section = regex::escape(&target.section);
        let build = |pattern: String| RegexBuilder::new(&pattern).case_insensitive(true).build();

        let id = build(format!(r"\b{code}\.{section}\b"))?;
        let templates = vec![
            Template {
                anchor: id.clone(),
                window: ADJACENT_WINDOW,
                adjacent: true,
            },
            Template {
                anchor: build(format!(
                    r"\b{code}\b(?:\s*(?:section|sect|sec)\.?\s*[:#]?\s*|\s*[.\-:]\s*|\s+){section}\b"
                ))?,
                window: SECTION_WINDOW,
                adjacent: false,
            },
            Template {
                anchor: id.clone(),
                window: WIDE_WINDOW,
                adjacent: false,
            },
        ];

        Ok(Self { id, templates })
    }
}

/// Runs the matching strategies for `target` against a page.
///
/// # Arguments
/// * `dom` - The page to read
/// * `target` - The course section to look for
/// * `profile` - Selectors and vocabulary for the page's portal
/// * `scope` - Restricts the container scan; text scans always see the whole page
///
/// # Returns
/// A found reading from the first strategy that succeeds, or a not-found reading.
pub fn match_page(
    dom: &dyn DomView,
    target: &CourseTarget,
    profile: &PortalProfile,
    scope: MatchScope,
) -> EnrollmentReading {
    let course = target.full_id();
    let patterns = match CoursePatterns::new(target) {
        Ok(patterns) => patterns,
        Err(e) => {
            return EnrollmentReading::not_found(format!(
                "Course {} could not be matched: {}",
                course, e
            ))
        }
    };

    let containers = containers_with_id(dom, profile, scope, &patterns.id);
    let page_text = dom.page_text();

    let reading = container_scan(&containers, &patterns.id)
        .or_else(|| template_scan(&page_text, &patterns.templates))
        .or_else(|| line_scan(&page_text, &patterns.id))
        .or_else(|| {
            keyword_fallback(&containers, &page_text, &patterns.id, &profile.status_keywords)
        });

    match reading {
        Some(reading) => {
            debug!(
                course = %course,
                method = %reading.method,
                "Matched '{}'",
                reading.match_text
            );
            reading
        }
        None => EnrollmentReading::not_found(format!("Course {} not found on page", course)),
    }
}

/// Finds the first isolated pair starting at or after `from` and ending by `until`.
fn find_pair(text: &str, from: usize, until: usize) -> Option<Pair> {
    let mut offset = from;
    while offset < until {
        let caps = PAIR_REGEX.captures_at(text, offset)?;
        let whole = caps.get(0)?;
        if whole.end() > until {
            return None;
        }

        if is_isolated(text, whole.start(), whole.end()) {
            let (first, second) = match (caps.get(1), caps.get(2)) {
                (Some(first), Some(second)) => (first, second),
                _ => (caps.get(3)?, caps.get(4)?),
            };
            return Some(Pair {
                first: first.as_str().parse().ok()?,
                second: second.as_str().parse().ok()?,
                start: whole.start(),
                end: whole.end(),
            });
        }

        // Starts are ASCII digits, so +1 stays on a char boundary.
        offset = whole.start() + 1;
    }

    None
}

/// Rejects pairs that are part of dates, fractions, longer numbers or page counters.
fn is_isolated(text: &str, start: usize, end: usize) -> bool {
    let mut before = text[..start].chars().rev();
    let mut after = text[end..].chars();

    let touches = |adjacent: Option<char>, beyond: Option<char>| match adjacent {
        Some(c) if c.is_ascii_digit() || c == '/' => true,
        Some('.') => beyond.is_some_and(|c| c.is_ascii_digit()),
        _ => false,
    };
    if touches(before.next(), before.next()) || touches(after.next(), after.next()) {
        return false;
    }

    let mut tail = start.saturating_sub(12);
    while !text.is_char_boundary(tail) {
        tail -= 1;
    }
    !PAGINATION_REGEX.is_match(&text[tail..start])
}

/// End of a search window: `limit` bytes after `from`, or the next course token.
fn window_end(text: &str, from: usize, limit: usize) -> usize {
    let mut end = (from + limit).min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }

    match COURSE_TOKEN_REGEX.find(&text[from..end]) {
        Some(next) => from + next.start(),
        None => end,
    }
}

/// Texts of candidate containers that mention the course, innermost first.
fn containers_with_id(
    dom: &dyn DomView,
    profile: &PortalProfile,
    scope: MatchScope,
    id: &Regex,
) -> Vec<String> {
    let mut seen: HashSet<ElementId> = HashSet::new();
    let mut texts = Vec::new();

    let selectors = profile
        .course_selectors
        .iter()
        .map(String::as_str)
        .chain(GENERIC_CONTAINERS.iter().copied());
    for selector in selectors {
        for element in dom.query_all(selector) {
            if !seen.insert(element) {
                continue;
            }
            if let MatchScope::Visible(viewport) = scope {
                if !viewport.shows(&dom.visible_rect(element)) {
                    continue;
                }
            }

            let text = dom.text_of(element);
            if id.is_match(&text) {
                texts.push(text);
            }
        }
    }

    texts.sort_by_key(|text| text.len());
    texts
}

fn container_scan(containers: &[String], id: &Regex) -> Option<EnrollmentReading> {
    containers.iter().find_map(|text| {
        id.find_iter(text).find_map(|anchor| {
            let until = window_end(text, anchor.end(), WIDE_WINDOW);
            let pair = find_pair(text, anchor.end(), until)?;
            Some(EnrollmentReading::from_pair(
                pair.first,
                pair.second,
                "container_scan",
                &text[anchor.start()..pair.end],
            ))
        })
    })
}

fn template_scan(text: &str, templates: &[Template]) -> Option<EnrollmentReading> {
    for (index, template) in templates.iter().enumerate() {
        for anchor in template.anchor.find_iter(text) {
            let until = window_end(text, anchor.end(), template.window);
            let Some(pair) = find_pair(text, anchor.end(), until) else {
                continue;
            };
            if template.adjacent && !text[anchor.end()..pair.start].trim().is_empty() {
                continue;
            }

            return Some(EnrollmentReading::from_pair(
                pair.first,
                pair.second,
                &format!("text_pattern_{}", index + 1),
                &text[anchor.start()..pair.end],
            ));
        }
    }

    None
}

/// Looks for a pair on each line holding the course, between its neighbouring course tokens.
fn line_scan(text: &str, id: &Regex) -> Option<EnrollmentReading> {
    text.lines().find_map(|line| {
        let anchor = id.find(line)?;
        let tokens: Vec<_> = COURSE_TOKEN_REGEX.find_iter(line).collect();
        let start = tokens
            .iter()
            .filter(|t| t.end() <= anchor.start())
            .map(|t| t.end())
            .last()
            .unwrap_or(0);
        let end = tokens
            .iter()
            .find(|t| t.start() >= anchor.end())
            .map_or(line.len(), |t| t.start());

        let pair = find_pair(line, start, end)?;
        Some(EnrollmentReading::from_pair(
            pair.first,
            pair.second,
            "line_scan",
            &line[start..end],
        ))
    })
}

fn keyword_fallback(
    containers: &[String],
    page_text: &str,
    id: &Regex,
    keywords: &StatusKeywords,
) -> Option<EnrollmentReading> {
    let lines = page_text.lines().filter(|line| id.is_match(line));

    containers
        .iter()
        .map(String::as_str)
        .chain(lines)
        .find_map(|text| {
            let region = keyword_region(text, id)?;
            let open = keyword_signal(region, keywords)?;
            Some(EnrollmentReading::from_keyword(open, "keyword_fallback", region))
        })
}

/// The part of `text` that speaks about the course.
///
/// A text that mentions no other course is taken whole; otherwise only the
/// window after the course id is used.
fn keyword_region<'t>(text: &'t str, id: &Regex) -> Option<&'t str> {
    let anchor = id.find(text)?;
    if COURSE_TOKEN_REGEX.find_iter(text).count() <= 1 {
        return Some(text);
    }
    Some(&text[anchor.start()..window_end(text, anchor.end(), WIDE_WINDOW)])
}

/// `Some(false)` for a full keyword, `Some(true)` for an available one.
///
/// Full wins, except where the full word is part of an available phrase
/// such as "not full".
fn keyword_signal(text: &str, keywords: &StatusKeywords) -> Option<bool> {
    let spans = |words: &[String]| -> Vec<(usize, usize)> {
        words
            .iter()
            .filter_map(|word| {
                RegexBuilder::new(&format!(r"\b{}\b", regex::escape(word.trim())))
                    .case_insensitive(true)
                    .build()
                    .ok()
            })
            .flat_map(|re| re.find_iter(text).map(|m| (m.start(), m.end())).collect::<Vec<_>>())
            .collect()
    };

    let available = spans(&keywords.available);
    let full = spans(&keywords.full);

    let full_hit = full.iter().any(|&(start, end)| {
        !available
            .iter()
            .any(|&(a_start, a_end)| a_start <= start && end <= a_end)
    });

    if full_hit {
        Some(false)
    } else if !available.is_empty() {
        Some(true)
    } else {
        None
    }
}

/// A course row found while browsing the page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredCourse {
    pub code: String,
    pub section: String,
    pub full_text: String,
}

/// Lists the course sections offered in the page's tables.
///
/// Rows with a `CODE.SECTION` token are read directly; other rows fall back
/// to the profile's code and section patterns.
pub fn discover_courses(dom: &dyn DomView, profile: &PortalProfile) -> Vec<DiscoveredCourse> {
    let compile = |pattern: &str| match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            debug!("Ignoring profile pattern '{}': {}", pattern, e);
            None
        }
    };
    let code_pattern = compile(&profile.course_code_pattern);
    let section_pattern = compile(&profile.section_pattern);

    let mut seen = HashSet::new();
    let mut courses = Vec::new();

    for row in dom.query_all("table tr") {
        let text = dom.text_of(row);
        if !text.contains('\t') {
            continue;
        }

        let found = COURSE_TOKEN_REGEX
            .captures(&text)
            .map(|caps| (caps[1].to_string(), caps[2].to_string()))
            .or_else(|| {
                let code = code_pattern.as_ref()?.captures(&text)?.get(1)?;
                let rest = &text[code.end()..];
                let section = section_pattern.as_ref()?.captures(rest)?.get(1)?;
                Some((code.as_str().to_string(), section.as_str().to_string()))
            });

        if let Some((code, section)) = found {
            let target = CourseTarget::new(code.split_whitespace().collect::<String>(), section);
            if seen.insert(target.full_id()) {
                courses.push(DiscoveredCourse {
                    code: target.code,
                    section: target.section,
                    full_text: text.replace('\t', " "),
                });
            }
        }
    }

    courses
}
