/// Types for watched courses, readings and the activity log
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::VecDeque;
use std::fmt;
use std::sync::LazyLock;

use super::error::MonitorError;

/// Accepts `CSE498R.11`, `EEE111.4`, `act201.1`.
static COURSE_INPUT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z]+\d+[A-Za-z]?)\.(\d+)$").unwrap());

/// A course section to look for on the portal page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CourseTarget {
    pub code: String,
    pub section: String,
}

impl CourseTarget {
    pub fn new(code: impl Into<String>, section: impl Into<String>) -> Self {
        Self {
            code: code.into().trim().to_uppercase(),
            section: section.into().trim().to_uppercase(),
        }
    }

    /// Parses user input such as `CSE498R.11` into a target.
    ///
    /// # Returns
    /// * `Err(MonitorError::MalformedInput)` - If the input is not `CODE.SECTION`
    pub fn parse(input: &str) -> Result<Self, MonitorError> {
        let input = input.trim();
        let caps = COURSE_INPUT_REGEX
            .captures(input)
            .ok_or_else(|| MonitorError::MalformedInput {
                input: input.to_string(),
            })?;

        Ok(Self::new(&caps[1], &caps[2]))
    }

    /// Checks a target that arrived as separate fields.
    pub fn validate(&self) -> Result<(), MonitorError> {
        Self::parse(&self.full_id()).map(|_| ())
    }

    /// `{code}.{section}`, the identifier as printed on the portal.
    pub fn full_id(&self) -> String {
        format!("{}.{}", self.code, self.section)
    }
}

impl fmt::Display for CourseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.code, self.section)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CourseStatus {
    Checking,
    Available,
    Full,
    Error,
}

impl fmt::Display for CourseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CourseStatus::Checking => "Checking",
            CourseStatus::Available => "Available",
            CourseStatus::Full => "Full",
            CourseStatus::Error => "Error",
        };
        f.write_str(s)
    }
}

/// Number of open seats, or `Unknown` when the page only said "open".
///
/// Serialized as a plain number or the string `"Unknown"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeatCount {
    Known(u32),
    #[default]
    Unknown,
}

impl SeatCount {
    /// True only for a known count above zero.
    pub fn is_positive(&self) -> bool {
        matches!(self, SeatCount::Known(n) if *n > 0)
    }
}

impl fmt::Display for SeatCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeatCount::Known(n) => write!(f, "{n}"),
            SeatCount::Unknown => f.write_str("Unknown"),
        }
    }
}

impl Serialize for SeatCount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SeatCount::Known(n) => serializer.serialize_u32(*n),
            SeatCount::Unknown => serializer.serialize_str("Unknown"),
        }
    }
}

impl<'de> Deserialize<'de> for SeatCount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Count(u32),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Count(n) => Ok(SeatCount::Known(n)),
            Raw::Text(s) if s.eq_ignore_ascii_case("unknown") => Ok(SeatCount::Unknown),
            Raw::Text(s) => s
                .trim()
                .parse()
                .map(SeatCount::Known)
                .map_err(|_| serde::de::Error::custom(format!("invalid seat count: {s}"))),
        }
    }
}

/// A watched course section and its last reconciled state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseWatch {
    pub full_course_id: String,
    pub code: String,
    pub section: String,
    pub status: CourseStatus,
    pub available: SeatCount,
    pub enrolled: Option<u32>,
    pub capacity: Option<u32>,
    pub last_checked: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl CourseWatch {
    /// A freshly added watch that has not been checked yet.
    pub fn new(target: &CourseTarget) -> Self {
        Self {
            full_course_id: target.full_id(),
            code: target.code.clone(),
            section: target.section.clone(),
            status: CourseStatus::Checking,
            available: SeatCount::Known(0),
            enrolled: None,
            capacity: None,
            last_checked: None,
            error_message: None,
        }
    }
}

/// Result of one extraction attempt against the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentReading {
    pub found: bool,
    pub enrolled: Option<u32>,
    pub capacity: Option<u32>,
    pub available: SeatCount,
    /// Status signal from keywords when no numbers were on the page.
    pub open: Option<bool>,
    pub method: String,
    pub match_text: String,
    pub message: Option<String>,
}

impl EnrollmentReading {
    /// Builds a reading from two captured numbers.
    ///
    /// Portals print either `enrolled(capacity)` or `capacity(enrolled)`,
    /// so the larger number is always taken as the capacity.
    pub fn from_pair(first: u32, second: u32, method: &str, match_text: &str) -> Self {
        let (enrolled, capacity) = if first >= second {
            (second, first)
        } else {
            (first, second)
        };

        Self {
            found: true,
            enrolled: Some(enrolled),
            capacity: Some(capacity),
            available: SeatCount::Known(capacity.saturating_sub(enrolled)),
            open: None,
            method: method.to_string(),
            match_text: match_text.trim().to_string(),
            message: None,
        }
    }

    /// A reading that only knows whether the section is open.
    pub fn from_keyword(open: bool, method: &str, match_text: &str) -> Self {
        Self {
            found: true,
            enrolled: None,
            capacity: None,
            available: SeatCount::Unknown,
            open: Some(open),
            method: method.to_string(),
            match_text: match_text.trim().to_string(),
            message: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            found: false,
            enrolled: None,
            capacity: None,
            available: SeatCount::Known(0),
            open: None,
            method: "none".to_string(),
            match_text: String::new(),
            message: Some(message.into()),
        }
    }
}

/// One line of the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub timestamp: DateTime<Utc>,
    pub course_id: String,
    pub status: CourseStatus,
    pub available: SeatCount,
    pub enrolled: Option<u32>,
    pub capacity: Option<u32>,
    pub message: String,
}

/// Bounded activity log, newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityLog {
    entries: VecDeque<ActivityRecord>,
    capacity: usize,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Rebuilds a log from stored records, keeping the newest `capacity`.
    pub fn from_records(records: Vec<ActivityRecord>, capacity: usize) -> Self {
        let mut log = Self::new(capacity);
        log.entries.extend(records);
        log.entries.truncate(log.capacity);
        log
    }

    /// Adds a record at the front and evicts the oldest beyond the bound.
    pub fn push(&mut self, record: ActivityRecord) {
        self.entries.push_front(record);
        self.entries.truncate(self.capacity);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActivityRecord> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<ActivityRecord> {
        self.entries.iter().cloned().collect()
    }
}

/// Persisted monitoring configuration and watch list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringState {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub portal_url: String,
    pub watch_set: Vec<CourseTarget>,
}

impl Default for MonitoringState {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_seconds: 60,
            portal_url: String::new(),
            watch_set: Vec::new(),
        }
    }
}
