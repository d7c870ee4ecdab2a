// 📅 Period Keys - (year, month) identity of a reporting month
//
// Report headers arrive as Spanish month abbreviations ("Ago-2025", "ene 24"),
// day-first text dates ("31/08/2025"), ISO dates or native spreadsheet dates.
// All of them collapse to a PeriodKey.

use crate::text::fold;
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// PERIOD KEY
// ============================================================================

/// Reporting month. Orders chronologically; text form is `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeriodKey {
    pub year: i32,
    pub month: u32,
}

impl PeriodKey {
    /// Build a key, rejecting months outside 1..=12
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) {
            Some(PeriodKey { year, month })
        } else {
            None
        }
    }

    pub fn from_date(date: NaiveDate) -> Self {
        PeriodKey {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            PeriodKey {
                year: self.year + 1,
                month: 1,
            }
        } else {
            PeriodKey {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    pub fn last_day(&self) -> Option<NaiveDate> {
        self.next().first_day().and_then(|d| d.pred_opt())
    }

    /// Every month from `start` to `end`, both inclusive
    pub fn range(start: PeriodKey, end: PeriodKey) -> PeriodRange {
        PeriodRange {
            next: Some(start),
            end,
        }
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for PeriodKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| format!("expected YYYY-MM, got {:?}", s))?;

        if year.len() != 4 {
            return Err(format!("expected 4-digit year in {:?}", s));
        }

        let year: i32 = year.parse().map_err(|_| format!("bad year in {:?}", s))?;
        let month: u32 = month.parse().map_err(|_| format!("bad month in {:?}", s))?;

        PeriodKey::new(year, month).ok_or_else(|| format!("month out of range in {:?}", s))
    }
}

impl Serialize for PeriodKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PeriodKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Inclusive month iterator returned by `PeriodKey::range`
pub struct PeriodRange {
    next: Option<PeriodKey>,
    end: PeriodKey,
}

impl Iterator for PeriodRange {
    type Item = PeriodKey;

    fn next(&mut self) -> Option<PeriodKey> {
        let current = self.next?;
        if current > self.end {
            self.next = None;
            return None;
        }
        self.next = Some(current.next());
        Some(current)
    }
}

// ============================================================================
// MONTH NAMES (es-MX)
// ============================================================================

/// Folded Spanish month names and abbreviations. Lookups fold first, so
/// "AGO", "Ago" and "agó" all hit the same entry.
static SPANISH_MONTHS: &[(&str, u32)] = &[
    ("ene", 1),
    ("enero", 1),
    ("feb", 2),
    ("febrero", 2),
    ("mar", 3),
    ("marzo", 3),
    ("abr", 4),
    ("abril", 4),
    ("may", 5),
    ("mayo", 5),
    ("jun", 6),
    ("junio", 6),
    ("jul", 7),
    ("julio", 7),
    ("ago", 8),
    ("agosto", 8),
    ("sep", 9),
    ("sept", 9),
    ("set", 9),
    ("septiembre", 9),
    ("setiembre", 9),
    ("oct", 10),
    ("octubre", 10),
    ("nov", 11),
    ("noviembre", 11),
    ("dic", 12),
    ("diciembre", 12),
];

/// Month number for a Spanish month name or abbreviation
pub fn spanish_month(name: &str) -> Option<u32> {
    let folded = fold(name);
    let folded = folded.trim_end_matches('.');
    SPANISH_MONTHS
        .iter()
        .find(|(label, _)| *label == folded)
        .map(|(_, month)| *month)
}

// ============================================================================
// HEADER PARSING
// ============================================================================

fn parse_year(token: &str) -> Option<i32> {
    if !token.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    match token.len() {
        2 => token.parse::<i32>().ok().map(|yy| 2000 + yy),
        4 => token.parse::<i32>().ok().filter(|y| (1900..=2100).contains(y)),
        _ => None,
    }
}

fn is_numeric(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_digit())
}

/// Parse a period header written as text.
///
/// Accepted shapes:
/// - `Ago-2025`, `ago 25`, `AGO/2025`, `Sept.2024`, `2025-Ago`
/// - `31/08/2025` (day first), `2025-08-31`, `2025-08-31 00:00:00`
/// - `2025-08`, `08/2025`
pub fn parse_period_header(raw: &str) -> Option<PeriodKey> {
    let folded = fold(raw);
    if folded.is_empty() {
        return None;
    }

    // Drop a trailing time component ("2025-08-31 00:00:00")
    let date_part = match folded.split_once(' ') {
        Some((head, tail)) if tail.contains(':') => head.to_string(),
        _ => folded,
    };

    let tokens: Vec<&str> = date_part
        .split(|c: char| c == '-' || c == '/' || c == ' ' || c == '.')
        .filter(|t| !t.is_empty())
        .collect();

    match tokens.as_slice() {
        [a, b] if !is_numeric(a) => {
            let month = spanish_month(a)?;
            PeriodKey::new(parse_year(b)?, month)
        }
        [a, b] if !is_numeric(b) => {
            let month = spanish_month(b)?;
            PeriodKey::new(parse_year(a)?, month)
        }
        [a, b] if a.len() == 4 => PeriodKey::new(parse_year(a)?, b.parse().ok()?),
        [a, b] if b.len() == 4 => PeriodKey::new(parse_year(b)?, a.parse().ok()?),
        [a, b, c] if is_numeric(a) && is_numeric(b) && is_numeric(c) => {
            let date = if a.len() == 4 {
                NaiveDate::from_ymd_opt(parse_year(a)?, b.parse().ok()?, c.parse().ok()?)
            } else {
                NaiveDate::from_ymd_opt(parse_year(c)?, b.parse().ok()?, a.parse().ok()?)
            }?;
            Some(PeriodKey::from_date(date))
        }
        [a, b, c] if is_numeric(a) && !is_numeric(b) => {
            // "31 ago 2025"
            let month = spanish_month(b)?;
            let _day: u32 = a.parse().ok()?;
            PeriodKey::new(parse_year(c)?, month)
        }
        _ => None,
    }
}

/// Serial for 9999-12-31, the last date a spreadsheet can display
const MAX_EXCEL_SERIAL: f64 = 2_958_465.0;

/// Convert a spreadsheet serial date (1900 date system) to a calendar date
pub fn from_excel_serial(serial: f64) -> Option<NaiveDate> {
    if !(1.0..=MAX_EXCEL_SERIAL).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(Duration::try_days(serial.floor() as i64)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(year: i32, month: u32) -> PeriodKey {
        PeriodKey::new(year, month).unwrap()
    }

    #[test]
    fn test_period_key_display_and_parse() {
        assert_eq!(key(2024, 7).to_string(), "2024-07");
        assert_eq!("2024-07".parse::<PeriodKey>().unwrap(), key(2024, 7));
        assert!("2024-13".parse::<PeriodKey>().is_err());
        assert!("24-07".parse::<PeriodKey>().is_err());
    }

    #[test]
    fn test_period_key_orders_chronologically() {
        assert!(key(2024, 12) < key(2025, 1));
        assert!(key(2025, 2) > key(2025, 1));
    }

    #[test]
    fn test_range_crosses_year_boundary() {
        let months: Vec<PeriodKey> = PeriodKey::range(key(2024, 11), key(2025, 2)).collect();
        assert_eq!(months, vec![key(2024, 11), key(2024, 12), key(2025, 1), key(2025, 2)]);
    }

    #[test]
    fn test_empty_range_when_start_after_end() {
        assert_eq!(PeriodKey::range(key(2025, 3), key(2025, 1)).count(), 0);
    }

    #[test]
    fn test_last_day_of_february() {
        assert_eq!(key(2024, 2).last_day(), NaiveDate::from_ymd_opt(2024, 2, 29));
    }

    #[test]
    fn test_spanish_abbreviations() {
        assert_eq!(parse_period_header("Ago-2025"), Some(key(2025, 8)));
        assert_eq!(parse_period_header("Ene-2024"), Some(key(2024, 1)));
        assert_eq!(parse_period_header("dic 19"), Some(key(2019, 12)));
        assert_eq!(parse_period_header("SEPT.2023"), Some(key(2023, 9)));
        assert_eq!(parse_period_header("Set/2023"), Some(key(2023, 9)));
    }

    #[test]
    fn test_accented_and_unaccented_map_identically() {
        assert_eq!(parse_period_header("Agó-2025"), parse_period_header("Ago-2025"));
        assert_eq!(spanish_month("Febrero"), Some(2));
        assert_eq!(spanish_month("FÉB"), Some(2));
    }

    #[test]
    fn test_text_dates_are_day_first() {
        assert_eq!(parse_period_header("31/08/2025"), Some(key(2025, 8)));
        assert_eq!(parse_period_header("01/02/2024"), Some(key(2024, 2)));
        assert_eq!(parse_period_header("2025-08-31"), Some(key(2025, 8)));
        assert_eq!(parse_period_header("2025-08-31 00:00:00"), Some(key(2025, 8)));
    }

    #[test]
    fn test_non_period_headers() {
        assert_eq!(parse_period_header("Concepto"), None);
        assert_eq!(parse_period_header(""), None);
        assert_eq!(parse_period_header("Foo-2025"), None);
        assert_eq!(parse_period_header("Ago-202"), None);
    }

    #[test]
    fn test_excel_serial_dates() {
        // 45535 = 2024-08-31
        assert_eq!(from_excel_serial(45535.0), NaiveDate::from_ymd_opt(2024, 8, 31));
        assert_eq!(from_excel_serial(0.0), None);
    }

    #[test]
    fn test_out_of_range_serials_are_not_dates() {
        assert_eq!(from_excel_serial(2_958_465.0), NaiveDate::from_ymd_opt(9999, 12, 31));
        assert_eq!(from_excel_serial(2_958_466.0), None);
        assert_eq!(from_excel_serial(1e15), None);
        assert_eq!(from_excel_serial(f64::INFINITY), None);
    }
}
