//! Date Resolver
//!
//! Turns date literals in conditions into instants:
//!
//! - **Relative**: `-7d`, `+30d` (days from now), `now`, `today`,
//!   `yesterday`, `tomorrow` (the last three at 00:00 in the engine timezone)
//! - **Absolute**: ISO-8601 with or without time and offset. Values without
//!   an offset are read in the engine timezone.
//!
//! A resolver captures "now" once, so every token in a query resolves against
//! the same instant.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

const NAIVE_DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

fn relative_days_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([+-])(\d+)d$").ok()).as_ref()
}

/// Parse a timezone setting: `UTC`, `Z`, `+HH:MM` or `-HH:MM`
pub fn parse_offset(s: &str) -> Option<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("utc") || s == "Z" {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':')?;
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Resolves date tokens against a fixed instant
#[derive(Debug, Clone, Copy)]
pub struct DateResolver {
    now: DateTime<FixedOffset>,
    offset: FixedOffset,
}

impl DateResolver {
    pub fn new(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            now: now.with_timezone(&offset),
            offset,
        }
    }

    /// Resolver pinned to the current wall-clock time
    pub fn now(offset: FixedOffset) -> Self {
        Self::new(Utc::now(), offset)
    }

    pub fn current(&self) -> DateTime<FixedOffset> {
        self.now
    }

    /// Resolve a literal from a query. `None` if it is not a date token.
    pub fn resolve(&self, token: &str) -> Option<DateTime<FixedOffset>> {
        self.resolve_relative(token).or_else(|| self.parse_iso(token))
    }

    /// Whether a literal is a relative token or ISO date
    pub fn is_date_token(&self, token: &str) -> bool {
        self.resolve(token).is_some()
    }

    /// Read an instant from a record value: an ISO string or epoch milliseconds
    pub fn instant_of(&self, value: &Value) -> Option<DateTime<FixedOffset>> {
        match value {
            Value::String(s) => self.parse_iso(s),
            Value::Number(n) => {
                let millis = n.as_i64()?;
                Utc.timestamp_millis_opt(millis)
                    .single()
                    .map(|dt| dt.with_timezone(&self.offset))
            }
            _ => None,
        }
    }

    fn resolve_relative(&self, token: &str) -> Option<DateTime<FixedOffset>> {
        let token = token.trim().to_ascii_lowercase();
        match token.as_str() {
            "now" => return Some(self.now),
            "today" => return self.start_of_day(0),
            "yesterday" => return self.start_of_day(-1),
            "tomorrow" => return self.start_of_day(1),
            _ => {}
        }

        let captures = relative_days_regex()?.captures(&token)?;
        let days: i64 = captures[2].parse().ok()?;
        let days = if &captures[1] == "-" { -days } else { days };
        self.now.checked_add_signed(Duration::try_days(days)?)
    }

    fn start_of_day(&self, day_offset: i64) -> Option<DateTime<FixedOffset>> {
        let date = self
            .now
            .date_naive()
            .checked_add_signed(Duration::try_days(day_offset)?)?;
        self.offset
            .from_local_datetime(&date.and_hms_opt(0, 0, 0)?)
            .single()
    }

    fn parse_iso(&self, s: &str) -> Option<DateTime<FixedOffset>> {
        let s = s.trim();
        // Cheap reject: every accepted form starts with a four digit year
        if s.len() < 10 || !s.as_bytes()[..4].iter().all(u8::is_ascii_digit) {
            return None;
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt);
        }
        for format in NAIVE_DATETIME_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                return self.offset.from_local_datetime(&naive).single();
            }
        }
        let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
        self.offset
            .from_local_datetime(&date.and_hms_opt(0, 0, 0)?)
            .single()
    }
}
