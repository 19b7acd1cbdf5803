//! Birthday / anniversary values.

use std::fmt;

use chrono::{Datelike, DateTime, FixedOffset, NaiveDate, SecondsFormat, Timelike};
use serde::{Deserialize, Serialize};

/// A date-like value as vCard allows it for `BDAY` and `ANNIVERSARY`.
///
/// `Partial` (year omitted) and `Text` only exist in vCard 4.0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Date {
  Full(NaiveDate),
  Timestamp(DateTime<FixedOffset>),
  Partial { month: u32, day: u32 },
  Text(String),
}

impl Date {
  /// Build a year-less date, rejecting impossible month/day pairs.
  pub fn partial(month: u32, day: u32) -> Option<Self> {
    // 2000 is a leap year, so --02-29 is accepted.
    NaiveDate::from_ymd_opt(2000, month, day)?;
    Some(Self::Partial { month, day })
  }

  /// Whether this value can only be written as vCard 4.0.
  pub fn requires_v4(&self) -> bool {
    matches!(self, Self::Partial { .. } | Self::Text(_))
  }

  /// Month and day, for every form but free text.
  pub fn month_day(&self) -> Option<(u32, u32)> {
    match self {
      Self::Full(d) => Some((d.month(), d.day())),
      Self::Timestamp(ts) => Some((ts.month(), ts.day())),
      Self::Partial { month, day } => Some((*month, *day)),
      Self::Text(_) => None,
    }
  }

  /// Parse the human-facing form produced by [`Date::to_template_string`]:
  /// `YYYY-MM-DD`, `--MM-DD`, an RFC 3339 timestamp in whole seconds or
  /// `text= ...`.
  pub fn parse_template(s: &str) -> Option<Self> {
    let s = s.trim();
    if let Some(text) = s.strip_prefix("text=") {
      let text = text.trim();
      return (!text.is_empty()).then(|| Self::Text(text.to_string()));
    }
    if let Some(rest) = s.strip_prefix("--") {
      let (month, day) = rest.split_once('-')?;
      return Self::partial(month.parse().ok()?, day.parse().ok()?);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
      return Some(Self::Full(d));
    }
    // vCard timestamps carry whole seconds; a fraction could not be written.
    DateTime::parse_from_rfc3339(s)
      .ok()
      .filter(|ts| ts.nanosecond() == 0)
      .map(Self::Timestamp)
  }

  /// Human-facing form used in templates.
  pub fn to_template_string(&self) -> String {
    match self {
      Self::Text(t) => format!("text= {t}"),
      other => other.to_string(),
    }
  }
}

impl fmt::Display for Date {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Full(d) => write!(f, "{}", d.format("%Y-%m-%d")),
      Self::Timestamp(ts) => {
        f.write_str(&ts.to_rfc3339_opts(SecondsFormat::Secs, true))
      }
      Self::Partial { month, day } => write!(f, "--{month:02}-{day:02}"),
      Self::Text(t) => f.write_str(t),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn template_forms_parse() {
    assert_eq!(
      Date::parse_template("1990-03-15"),
      Some(Date::Full(NaiveDate::from_ymd_opt(1990, 3, 15).unwrap()))
    );
    assert_eq!(
      Date::parse_template("--02-29"),
      Some(Date::Partial { month: 2, day: 29 })
    );
    assert_eq!(
      Date::parse_template("text= circa 1800"),
      Some(Date::Text("circa 1800".to_string()))
    );
    let Some(Date::Timestamp(ts)) =
      Date::parse_template("1990-03-15T10:30:00+02:00")
    else {
      panic!("expected timestamp")
    };
    assert_eq!(ts.offset().local_minus_utc(), 7200);
  }

  #[test]
  fn impossible_partial_rejected() {
    assert_eq!(Date::parse_template("--02-30"), None);
    assert_eq!(Date::parse_template("--13-01"), None);
  }

  #[test]
  fn garbage_rejected() {
    assert_eq!(Date::parse_template("next tuesday"), None);
    assert_eq!(Date::parse_template("text="), None);
  }

  #[test]
  fn fractional_seconds_rejected() {
    assert_eq!(Date::parse_template("1990-03-15T10:30:00.5Z"), None);
    assert!(Date::parse_template("1990-03-15T10:30:00.000Z").is_some());
  }

  #[test]
  fn template_string_round_trips() {
    for s in ["1990-03-15", "--03-15", "text= circa 1800", "2001-02-03T04:05:06Z"] {
      let d = Date::parse_template(s).unwrap();
      assert_eq!(d.to_template_string(), s);
    }
  }

  #[test]
  fn month_day_ignores_year_and_zone() {
    for s in ["1990-03-15", "--03-15", "1990-03-15T23:30:00-05:00"] {
      assert_eq!(Date::parse_template(s).unwrap().month_day(), Some((3, 15)), "{s}");
    }
    assert_eq!(Date::Text("spring".into()).month_day(), None);
  }

  #[test]
  fn only_partial_and_text_need_v4() {
    assert!(Date::Partial { month: 1, day: 2 }.requires_v4());
    assert!(Date::Text("x".into()).requires_v4());
    let full = Date::Full(NaiveDate::from_ymd_opt(2000, 1, 2).unwrap());
    assert!(!full.requires_v4());
  }
}
