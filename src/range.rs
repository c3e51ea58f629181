use std::sync::LazyLock;

use chrono::{Datelike, Days, NaiveDate};
use regex::Regex;

use crate::date_util::{last_day_of_month, parse_date, quarter_of};
use crate::error::{Error, Result};

static RE_QUARTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-[Qq]([1-4])$").expect("valid quarter regex"));
static RE_MONTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-(\d{2})$").expect("valid month regex"));
static RE_ROLLING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)[dD]$").expect("valid rolling regex"));

/// A named reporting window, resolved against a reference day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Range {
    Year(i32),
    Quarter(i32, u8),
    Month(i32, u8),
    /// Last N days including today.
    Rolling(u32),
    YearToDate,
    QuarterToDate,
    MonthToDate,
    Between(NaiveDate, NaiveDate),
}

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

impl Range {
    /// Parse a range string.
    ///
    /// Supported formats:
    /// - `2025`: year
    /// - `2025-Q1`: quarter
    /// - `2025-01`: month
    /// - `30d`: rolling last N days
    /// - `ytd`, `qtd`, `mtd`: current year, quarter or month to date
    /// - `2025-01-06..2025-02-14`: explicit inclusive dates
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        match s.to_lowercase().as_str() {
            "ytd" => return Ok(Range::YearToDate),
            "qtd" => return Ok(Range::QuarterToDate),
            "mtd" => return Ok(Range::MonthToDate),
            _ => {}
        }

        if let Some((from, to)) = s.split_once("..") {
            let start = parse_explicit(from)?;
            let end = parse_explicit(to)?;
            if start > end {
                return Err(Error::RangeParse(format!("range starts after it ends: {s}")));
            }
            return Ok(Range::Between(start, end));
        }

        if let Some(caps) = RE_ROLLING.captures(s) {
            let n: u32 = caps[1]
                .parse()
                .map_err(|_| Error::RangeParse(format!("invalid day count: {s}")))?;
            if n == 0 {
                return Err(Error::RangeParse("rolling range needs at least one day".into()));
            }
            return Ok(Range::Rolling(n));
        }

        if s.len() == 4 {
            if let Ok(year) = s.parse::<i32>() {
                return Ok(Range::Year(year));
            }
        }

        if let Some(caps) = RE_QUARTER.captures(s) {
            let (year, q) = (parse_year(&caps[1])?, caps[2].parse::<u8>());
            if let Ok(q) = q {
                return Ok(Range::Quarter(year, q));
            }
        }

        if let Some(caps) = RE_MONTH.captures(s) {
            let year = parse_year(&caps[1])?;
            if let Ok(month) = caps[2].parse::<u8>() {
                if (1..=12).contains(&month) {
                    return Ok(Range::Month(year, month));
                }
            }
        }

        Err(Error::RangeParse(format!("unrecognized range: {s}")))
    }

    /// Canonical string form. To-date and rolling ranges are relative.
    pub fn to_key(&self) -> String {
        match self {
            Range::Year(y) => format!("{y}"),
            Range::Quarter(y, q) => format!("{y}-Q{q}"),
            Range::Month(y, m) => format!("{y}-{m:02}"),
            Range::Rolling(n) => format!("{n}d"),
            Range::YearToDate => "ytd".to_string(),
            Range::QuarterToDate => "qtd".to_string(),
            Range::MonthToDate => "mtd".to_string(),
            Range::Between(a, b) => format!("{a}..{b}"),
        }
    }

    /// Resolve to concrete dates as of `today`.
    pub fn resolve(&self, today: NaiveDate) -> Result<DateRange> {
        let invalid = || Error::RangeParse(format!("date out of range: {}", self.to_key()));
        let ymd = |y: i32, m: u32, d: u32| NaiveDate::from_ymd_opt(y, m, d).ok_or_else(invalid);
        let (start, end) = match *self {
            Range::Year(y) => (ymd(y, 1, 1)?, ymd(y, 12, 31)?),
            Range::Quarter(y, q) => {
                let first_month = (u32::from(q) - 1) * 3 + 1;
                (
                    ymd(y, first_month, 1)?,
                    last_day_of_month(y, first_month + 2).ok_or_else(invalid)?,
                )
            }
            Range::Month(y, m) => (
                ymd(y, u32::from(m), 1)?,
                last_day_of_month(y, u32::from(m)).ok_or_else(invalid)?,
            ),
            Range::Rolling(n) => (
                today
                    .checked_sub_days(Days::new(u64::from(n.saturating_sub(1))))
                    .ok_or_else(invalid)?,
                today,
            ),
            Range::YearToDate => (ymd(today.year(), 1, 1)?, today),
            Range::QuarterToDate => {
                let first_month = (u32::from(quarter_of(today)) - 1) * 3 + 1;
                (ymd(today.year(), first_month, 1)?, today)
            }
            Range::MonthToDate => (ymd(today.year(), today.month(), 1)?, today),
            Range::Between(a, b) => (a, b),
        };
        Ok(DateRange { start, end })
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_key())
    }
}

/// Parse and resolve in one step.
pub fn parse_range(s: &str, today: NaiveDate) -> Result<DateRange> {
    Range::parse(s)?.resolve(today)
}

fn parse_explicit(s: &str) -> Result<NaiveDate> {
    let s = s.trim();
    if s.len() != 10 {
        return Err(Error::RangeParse(format!("expected YYYY-MM-DD, got: {s}")));
    }
    parse_date(s).ok_or_else(|| Error::RangeParse(format!("invalid date: {s}")))
}

fn parse_year(s: &str) -> Result<i32> {
    s.parse()
        .map_err(|_| Error::RangeParse(format!("invalid year: {s}")))
}
