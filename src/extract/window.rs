use chrono::{Datelike, Duration, NaiveDate};

/// The calendar month an extraction run is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    /// 1..=12
    pub month: u32,
    pub year: i32,
}

impl TimeWindow {
    /// The calendar month immediately preceding `today`. January rolls back
    /// to December of the previous year.
    pub fn previous_month(today: NaiveDate) -> Self {
        if today.month() > 1 {
            TimeWindow {
                month: today.month() - 1,
                year: today.year(),
            }
        } else {
            TimeWindow {
                month: 12,
                year: today.year() - 1,
            }
        }
    }

    /// First day of the window month.
    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .expect("month is validated to 1..=12 at construction")
    }

    /// Inclusive `_table_suffix` bounds as `YYYYMMDD` strings.
    ///
    /// The upper bound is the first day plus one day, so the window spans at
    /// most two daily suffixes.
    /// TODO: widen the upper bound to a full month once the downstream models
    /// can absorb a backfill of the missing days.
    pub fn suffix_bounds(&self) -> (String, String) {
        let lower = self.first_day();
        let upper = lower + Duration::days(1);
        (
            lower.format("%Y%m%d").to_string(),
            upper.format("%Y%m%d").to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn previous_month_mid_year() {
        let w = TimeWindow::previous_month(date(2024, 7, 15));
        assert_eq!(w, TimeWindow { month: 6, year: 2024 });
    }

    #[test]
    fn previous_month_february() {
        let w = TimeWindow::previous_month(date(2025, 2, 1));
        assert_eq!(w, TimeWindow { month: 1, year: 2025 });
    }

    #[test]
    fn january_rolls_back_a_year() {
        let w = TimeWindow::previous_month(date(2025, 1, 31));
        assert_eq!(w, TimeWindow { month: 12, year: 2024 });
    }

    #[test]
    fn june_2024_bounds() {
        // Pins the one-day span of the suffix window.
        let (lower, upper) = TimeWindow { month: 6, year: 2024 }.suffix_bounds();
        assert_eq!(lower, "20240601");
        assert_eq!(upper, "20240602");
    }

    #[test]
    fn december_bounds_stay_in_month() {
        let (lower, upper) = TimeWindow { month: 12, year: 2024 }.suffix_bounds();
        assert_eq!(lower, "20241201");
        assert_eq!(upper, "20241202");
    }
}
