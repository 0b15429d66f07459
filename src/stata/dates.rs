//! Stata日付書式の変換
//!
//! Stataの日付は1960-01-01を基準とした経過量として格納され、
//! 単位は表示書式（`%td`, `%tc`など）で決まります。

use chrono::{Duration, NaiveDate, NaiveDateTime};

/// 日付書式の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DateKind {
    /// `%tc`, `%tC`: ミリ秒
    Clock,
    /// `%td`, `%d`: 日
    Day,
    /// `%tw`: 週（1年52週）
    Week,
    /// `%tm`: 月
    Month,
    /// `%tq`: 四半期
    Quarter,
    /// `%th`: 半期
    HalfYear,
    /// `%ty`: 年（西暦そのもの）
    Year,
}

impl DateKind {
    /// 表示書式から日付の種類を判定（日付書式でなければ`None`）
    pub fn from_format(format: &str) -> Option<Self> {
        let body = format.strip_prefix('%')?;
        let body = body.strip_prefix('-').unwrap_or(body);

        if body.starts_with("tc") || body.starts_with("tC") {
            Some(DateKind::Clock)
        } else if body.starts_with("td") || body.starts_with('d') {
            Some(DateKind::Day)
        } else if body.starts_with("tw") {
            Some(DateKind::Week)
        } else if body.starts_with("tm") {
            Some(DateKind::Month)
        } else if body.starts_with("tq") {
            Some(DateKind::Quarter)
        } else if body.starts_with("th") {
            Some(DateKind::HalfYear)
        } else if body.starts_with("ty") {
            Some(DateKind::Year)
        } else {
            None
        }
    }

    /// 格納値を日時に変換（表現できない値は`None`）
    pub fn to_datetime(self, value: f64) -> Option<NaiveDateTime> {
        if !value.is_finite() {
            return None;
        }
        let epoch = NaiveDate::from_ymd_opt(1960, 1, 1)?.and_hms_opt(0, 0, 0)?;
        let units = value.floor() as i64;

        match self {
            DateKind::Clock => {
                epoch.checked_add_signed(Duration::try_milliseconds(value.round() as i64)?)
            }
            DateKind::Day => epoch.checked_add_signed(Duration::try_days(units)?),
            DateKind::Week => {
                let year = year_start(1960 + units.div_euclid(52))?;
                year.checked_add_signed(Duration::try_weeks(units.rem_euclid(52))?)
            }
            DateKind::Month => month_start(1960 + units.div_euclid(12), units.rem_euclid(12) + 1),
            DateKind::Quarter => {
                month_start(1960 + units.div_euclid(4), units.rem_euclid(4) * 3 + 1)
            }
            DateKind::HalfYear => {
                month_start(1960 + units.div_euclid(2), units.rem_euclid(2) * 6 + 1)
            }
            DateKind::Year => year_start(units),
        }
    }
}

fn year_start(year: i64) -> Option<NaiveDateTime> {
    month_start(year, 1)
}

fn month_start(year: i64, month: i64) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(i32::try_from(year).ok()?, u32::try_from(month).ok()?, 1)?
        .and_hms_opt(0, 0, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd_hms(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_from_format() {
        assert_eq!(DateKind::from_format("%td"), Some(DateKind::Day));
        assert_eq!(DateKind::from_format("%tdCCYY-NN-DD"), Some(DateKind::Day));
        assert_eq!(DateKind::from_format("%d"), Some(DateKind::Day));
        assert_eq!(DateKind::from_format("%-tc"), Some(DateKind::Clock));
        assert_eq!(DateKind::from_format("%tC"), Some(DateKind::Clock));
        assert_eq!(DateKind::from_format("%tq"), Some(DateKind::Quarter));
        assert_eq!(DateKind::from_format("%9.0g"), None);
        assert_eq!(DateKind::from_format("%-12s"), None);
        assert_eq!(DateKind::from_format(""), None);
    }

    #[test]
    fn test_daily_dates() {
        assert_eq!(DateKind::Day.to_datetime(0.0), Some(ymd_hms(1960, 1, 1, 0, 0, 0)));
        assert_eq!(
            DateKind::Day.to_datetime(23_390.0),
            Some(ymd_hms(2024, 1, 15, 0, 0, 0))
        );
        assert_eq!(
            DateKind::Day.to_datetime(-1.0),
            Some(ymd_hms(1959, 12, 31, 0, 0, 0))
        );
    }

    #[test]
    fn test_clock_dates() {
        let ms = 23_390.0 * 86_400_000.0 + 12.0 * 3_600_000.0;
        assert_eq!(
            DateKind::Clock.to_datetime(ms),
            Some(ymd_hms(2024, 1, 15, 12, 0, 0))
        );
    }

    #[test]
    fn test_period_dates() {
        // 2024m3 = (2024 - 1960) * 12 + 2
        assert_eq!(
            DateKind::Month.to_datetime(770.0),
            Some(ymd_hms(2024, 3, 1, 0, 0, 0))
        );
        // 2024q2
        assert_eq!(
            DateKind::Quarter.to_datetime(257.0),
            Some(ymd_hms(2024, 4, 1, 0, 0, 0))
        );
        // 2024h2
        assert_eq!(
            DateKind::HalfYear.to_datetime(129.0),
            Some(ymd_hms(2024, 7, 1, 0, 0, 0))
        );
        // 1960w3
        assert_eq!(
            DateKind::Week.to_datetime(2.0),
            Some(ymd_hms(1960, 1, 15, 0, 0, 0))
        );
        // 1959m12
        assert_eq!(
            DateKind::Month.to_datetime(-1.0),
            Some(ymd_hms(1959, 12, 1, 0, 0, 0))
        );
        assert_eq!(
            DateKind::Year.to_datetime(2024.0),
            Some(ymd_hms(2024, 1, 1, 0, 0, 0))
        );
    }

    #[test]
    fn test_out_of_range() {
        assert_eq!(DateKind::Day.to_datetime(f64::NAN), None);
        assert_eq!(DateKind::Year.to_datetime(1.0e12), None);
        assert_eq!(DateKind::Day.to_datetime(1.0e300), None);
    }
}
