use chrono::{Duration, NaiveDate, Weekday};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DateError {
    #[error("week {week} is out of range for {year} (expected 1-53)")]
    InvalidWeek { year: i32, week: u32 },
    #[error("year {0} is out of range")]
    InvalidYear(i32),
    #[error("start date {since} is after end date {until}")]
    InvertedRange { since: NaiveDate, until: NaiveDate },
    #[error("both --from-date and --to-date are required for a date range")]
    IncompleteRange,
    #[error("unknown date preset `{0}`")]
    UnknownPreset(String),
}

/// Relative windows understood by the insights endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DatePreset {
    #[serde(rename = "today")]
    Today,
    #[serde(rename = "yesterday")]
    Yesterday,
    #[serde(rename = "last_7d")]
    Last7d,
    #[serde(rename = "last_14d")]
    Last14d,
    #[serde(rename = "last_30d")]
    Last30d,
    #[serde(rename = "last_90d")]
    Last90d,
    #[serde(rename = "this_month")]
    ThisMonth,
    #[serde(rename = "last_month")]
    LastMonth,
    #[serde(rename = "lifetime")]
    Lifetime,
    #[serde(rename = "maximum")]
    Maximum,
}

impl DatePreset {
    const ALL: [DatePreset; 10] = [
        Self::Today,
        Self::Yesterday,
        Self::Last7d,
        Self::Last14d,
        Self::Last30d,
        Self::Last90d,
        Self::ThisMonth,
        Self::LastMonth,
        Self::Lifetime,
        Self::Maximum,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Yesterday => "yesterday",
            Self::Last7d => "last_7d",
            Self::Last14d => "last_14d",
            Self::Last30d => "last_30d",
            Self::Last90d => "last_90d",
            Self::ThisMonth => "this_month",
            Self::LastMonth => "last_month",
            Self::Lifetime => "lifetime",
            Self::Maximum => "maximum",
        }
    }
}

impl fmt::Display for DatePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatePreset {
    type Err = DateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| DateError::UnknownPreset(s.to_string()))
    }
}

/// The reporting period requested from the insights endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimeWindow {
    Preset { preset: DatePreset },
    Range { since: NaiveDate, until: NaiveDate },
    IsoWeek { year: i32, week: u32 },
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self::Preset {
            preset: DatePreset::Last30d,
        }
    }
}

impl TimeWindow {
    pub fn range(since: NaiveDate, until: NaiveDate) -> Result<Self, DateError> {
        if since > until {
            return Err(DateError::InvertedRange { since, until });
        }
        Ok(Self::Range { since, until })
    }

    pub fn iso_week(year: i32, week: u32) -> Result<Self, DateError> {
        iso_week_range(year, week)?;
        Ok(Self::IsoWeek { year, week })
    }

    /// Picks a window from command-line parts: an ISO week wins over an
    /// explicit range, which wins over a preset. A week without a year uses
    /// the ISO year of `today`.
    pub fn from_parts(
        preset: Option<DatePreset>,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        year: Option<i32>,
        week: Option<u32>,
        today: NaiveDate,
    ) -> Result<Self, DateError> {
        use chrono::Datelike;

        if let Some(week) = week {
            return Self::iso_week(year.unwrap_or_else(|| today.iso_week().year()), week);
        }
        match (from, to) {
            (Some(since), Some(until)) => Self::range(since, until),
            (None, None) => Ok(preset
                .map(|preset| Self::Preset { preset })
                .unwrap_or_default()),
            _ => Err(DateError::IncompleteRange),
        }
    }

    /// Concrete first and last day, when the window has them.
    pub fn bounds(&self) -> Option<(NaiveDate, NaiveDate)> {
        match self {
            Self::Preset { .. } => None,
            Self::Range { since, until } => Some((*since, *until)),
            Self::IsoWeek { year, week } => iso_week_range(*year, *week).ok(),
        }
    }

    /// Writes `date_preset` or `time_range` into request params.
    pub fn apply(&self, params: &mut Map<String, Value>) {
        match (self, self.bounds()) {
            (Self::Preset { preset }, _) => {
                params.insert("date_preset".into(), Value::String(preset.as_str().into()));
            }
            (_, Some((since, until))) => {
                params.insert(
                    "time_range".into(),
                    json!({
                        "since": since.format("%Y-%m-%d").to_string(),
                        "until": until.format("%Y-%m-%d").to_string(),
                    }),
                );
            }
            (_, None) => {}
        }
    }

    /// Date used to partition output: the window start, or the run date for
    /// relative presets.
    pub fn partition_date(&self, today: NaiveDate) -> NaiveDate {
        self.bounds().map(|(since, _)| since).unwrap_or(today)
    }
}

/// Monday-to-Sunday bounds of ISO week `week` of `year`. Week 1 is the week
/// containing January 4th. Week 53 of a 52-week year lands on week 1 of the
/// following year.
pub fn iso_week_range(year: i32, week: u32) -> Result<(NaiveDate, NaiveDate), DateError> {
    if !(1..=53).contains(&week) {
        return Err(DateError::InvalidWeek { year, week });
    }

    let first_monday =
        NaiveDate::from_isoywd_opt(year, 1, Weekday::Mon).ok_or(DateError::InvalidYear(year))?;
    let since = first_monday
        .checked_add_signed(Duration::weeks(i64::from(week - 1)))
        .ok_or(DateError::InvalidYear(year))?;
    let until = since
        .checked_add_signed(Duration::days(6))
        .ok_or(DateError::InvalidYear(year))?;
    Ok((since, until))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn first_week_of_2024() {
        assert_eq!(
            iso_week_range(2024, 1).unwrap(),
            (date("2024-01-01"), date("2024-01-07"))
        );
    }

    #[test]
    fn first_week_can_start_in_previous_year() {
        // Jan 4th 2026 is a Sunday, so week 1 starts on Dec 29th 2025.
        assert_eq!(
            iso_week_range(2026, 1).unwrap(),
            (date("2025-12-29"), date("2026-01-04"))
        );
    }

    #[test]
    fn every_week_spans_monday_to_sunday() {
        for year in 1990..2040 {
            for week in 1..=53 {
                let (since, until) = iso_week_range(year, week).unwrap();
                assert_eq!(until, since + Duration::days(6), "{year}-W{week}");
                assert_eq!(since.weekday(), Weekday::Mon, "{year}-W{week}");
            }
        }
    }

    #[test]
    fn week_53_exists_in_long_years() {
        let (since, until) = iso_week_range(2020, 53).unwrap();
        assert_eq!(since, date("2020-12-28"));
        assert_eq!(until, date("2021-01-03"));
    }

    #[test]
    fn rejects_weeks_out_of_range() {
        assert_eq!(
            iso_week_range(2024, 0),
            Err(DateError::InvalidWeek { year: 2024, week: 0 })
        );
        assert!(iso_week_range(2024, 54).is_err());
    }

    #[test]
    fn weeks_past_the_calendar_end_are_errors() {
        let last_year = NaiveDate::MAX.year();
        assert_eq!(
            iso_week_range(last_year, 53),
            Err(DateError::InvalidYear(last_year))
        );
        assert_eq!(iso_week_range(i32::MAX, 1), Err(DateError::InvalidYear(i32::MAX)));
    }

    #[test]
    fn range_must_not_be_inverted() {
        assert!(TimeWindow::range(date("2024-02-01"), date("2024-01-01")).is_err());
        assert!(TimeWindow::range(date("2024-01-01"), date("2024-01-01")).is_ok());
    }

    #[test]
    fn applies_preset_and_time_range() {
        let mut params = Map::new();
        TimeWindow::default().apply(&mut params);
        assert_eq!(params["date_preset"], "last_30d");

        let mut params = Map::new();
        TimeWindow::iso_week(2024, 1).unwrap().apply(&mut params);
        assert_eq!(
            params["time_range"],
            json!({"since": "2024-01-01", "until": "2024-01-07"})
        );
        assert!(!params.contains_key("date_preset"));
    }

    #[test]
    fn from_parts_precedence() {
        let today = date("2024-03-15");

        let week = TimeWindow::from_parts(
            Some(DatePreset::Last7d),
            Some(date("2024-01-01")),
            Some(date("2024-01-31")),
            None,
            Some(2),
            today,
        )
        .unwrap();
        assert_eq!(week, TimeWindow::IsoWeek { year: 2024, week: 2 });

        let range = TimeWindow::from_parts(
            Some(DatePreset::Last7d),
            Some(date("2024-01-01")),
            Some(date("2024-01-31")),
            None,
            None,
            today,
        )
        .unwrap();
        assert_eq!(range.bounds(), Some((date("2024-01-01"), date("2024-01-31"))));

        let preset =
            TimeWindow::from_parts(Some(DatePreset::Last7d), None, None, None, None, today).unwrap();
        assert_eq!(
            preset,
            TimeWindow::Preset {
                preset: DatePreset::Last7d
            }
        );

        assert_eq!(
            TimeWindow::from_parts(None, Some(today), None, None, None, today),
            Err(DateError::IncompleteRange)
        );
    }

    #[test]
    fn parses_presets() {
        assert_eq!("last_7d".parse::<DatePreset>().unwrap(), DatePreset::Last7d);
        assert!("last_week".parse::<DatePreset>().is_err());
    }

    #[test]
    fn partition_date_prefers_window_start() {
        let today = date("2024-03-15");
        assert_eq!(TimeWindow::default().partition_date(today), today);
        assert_eq!(
            TimeWindow::iso_week(2024, 2).unwrap().partition_date(today),
            date("2024-01-08")
        );
    }
}
