use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::{Error, RuntimeError};

/// Parse a duration in either humantime notation ("15m", "3 days") or the
/// PostgreSQL interval output notation ("00:15:00", "2 mons").
pub fn parse_interval(interval_str: &str) -> Result<Duration, Error> {
    static MONTH_RE: OnceLock<Regex> = OnceLock::new();
    static CLOCK_RE: OnceLock<Regex> = OnceLock::new();

    let month_re = MONTH_RE.get_or_init(|| Regex::new("mon(s|th|ths)?").unwrap());
    let clock_re = CLOCK_RE.get_or_init(|| Regex::new(r"(\d{2}):(\d{2}):(\d{2})").unwrap());

    let mut result_str = interval_str.trim().to_string();

    if let Some(cap) = clock_re.captures(&result_str) {
        let expanded = format!("{} hours {} minutes {} seconds", &cap[1], &cap[2], &cap[3]);
        result_str = clock_re.replace(&result_str, expanded).to_string();
    }

    result_str = month_re.replace(&result_str, "month").to_string();

    humantime::parse_duration(&result_str).map_err(|e| {
        Error::Runtime(RuntimeError::from_msg(format!(
            "Could not parse '{interval_str}' as interval: {e}"
        )))
    })
}

/// A duration that remembers how it was written.
///
/// Definitions are round-tripped and their text ends up verbatim in generated
/// SQL (`interval '1d'`), so the original notation is kept next to the parsed
/// value. Two intervals are equal when their durations are equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Interval {
    text: String,
    duration: Duration,
}

impl Interval {
    pub fn parse(text: &str) -> Result<Interval, Error> {
        let duration = parse_interval(text)?;

        Ok(Interval {
            text: text.to_string(),
            duration,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn seconds(&self) -> u64 {
        self.duration.as_secs()
    }
}

impl PartialEq for Interval {
    fn eq(&self, other: &Self) -> bool {
        self.duration == other.duration
    }
}

impl Eq for Interval {}

impl Hash for Interval {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.duration.hash(state);
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

impl FromStr for Interval {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interval::parse(s)
    }
}

impl TryFrom<String> for Interval {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Interval::parse(&value)
    }
}

impl From<Interval> for String {
    fn from(value: Interval) -> Self {
        value.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_interval() {
        let dur = parse_interval("00:01:00").unwrap();

        let expected_dur = Duration::new(60, 0);

        assert_eq!(dur, expected_dur);

        let dur = parse_interval("2 months 29 days").unwrap();

        let expected_dur = Duration::new(7765632, 0);

        assert_eq!(dur, expected_dur);

        let dur = parse_interval("2 mons 29 days 00:01:00").unwrap();

        let expected_dur = Duration::new(7765692, 0);

        assert_eq!(dur, expected_dur);
    }

    #[test]
    fn interval_keeps_text() {
        let interval: Interval = "3 days".parse().unwrap();

        assert_eq!(interval.as_str(), "3 days");
        assert_eq!(interval.seconds(), 3 * 86400);
        assert_eq!(interval.to_string(), "3 days");
    }

    #[test]
    fn intervals_compare_by_duration() {
        let a = Interval::parse("1d").unwrap();
        let b = Interval::parse("24h").unwrap();
        let c = Interval::parse("86400s").unwrap();

        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_ne!(a, Interval::parse("1w").unwrap());
    }

    #[test]
    fn invalid_interval() {
        assert!(Interval::parse("a while").is_err());
    }
}
