use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveTime, TimeZone, Utc};

pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl TimeSource for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Month token used as the key of every monthly map, e.g. `5_2022`.
pub fn month_key(date: NaiveDate) -> String {
    format!("{}_{}", date.month(), date.year())
}

pub fn day_start(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

pub fn shift_months(date: NaiveDate, delta: i32) -> NaiveDate {
    let months = Months::new(delta.unsigned_abs());
    if delta >= 0 {
        date.checked_add_months(months).unwrap_or(NaiveDate::MAX)
    } else {
        date.checked_sub_months(months).unwrap_or(NaiveDate::MIN)
    }
}

pub fn first_day_of_next_month(now: DateTime<Utc>) -> NaiveDate {
    shift_months(first_of_month(now.date_naive()), 1)
}

pub fn days_in_month(date: NaiveDate) -> f64 {
    let start = first_of_month(date);
    (shift_months(start, 1) - start).num_days() as f64
}

pub fn days_in_current_month(now: DateTime<Utc>) -> f64 {
    days_in_month(now.date_naive())
}

pub fn days_in_next_month(now: DateTime<Utc>) -> f64 {
    days_in_month(first_day_of_next_month(now))
}

pub fn months_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> i32 {
    (later.year() - earlier.year()) * 12 + later.month() as i32 - earlier.month() as i32
}

pub fn applicable_months(now: DateTime<Utc>, count: u32) -> Vec<String> {
    let current = first_of_month(now.date_naive());
    let count = i32::try_from(count).unwrap_or(i32::MAX);
    (0..count)
        .map(|offset| month_key(shift_months(current, -offset)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0)
            .single()
            .expect("valid fixed timestamp")
    }

    #[test]
    fn month_key_is_not_zero_padded() {
        let date = NaiveDate::from_ymd_opt(2022, 5, 5).expect("date");
        assert_eq!(month_key(date), "5_2022");
        let date = NaiveDate::from_ymd_opt(2021, 12, 31).expect("date");
        assert_eq!(month_key(date), "12_2021");
    }

    #[test]
    fn next_month_rolls_over_year_end() {
        assert_eq!(
            first_day_of_next_month(ts(2021, 12, 15, 9)),
            NaiveDate::from_ymd_opt(2022, 1, 1).expect("date")
        );
    }

    #[test]
    fn days_in_month_handles_leap_years() {
        assert_eq!(days_in_current_month(ts(2024, 2, 10, 0)), 29.0);
        assert_eq!(days_in_current_month(ts(2023, 2, 10, 0)), 28.0);
        assert_eq!(days_in_next_month(ts(2023, 1, 31, 23)), 28.0);
        assert_eq!(days_in_next_month(ts(2022, 5, 5, 4)), 30.0);
    }

    #[test]
    fn applicable_months_lists_newest_first() {
        assert_eq!(
            applicable_months(ts(2022, 2, 3, 0), 3),
            vec!["2_2022", "1_2022", "12_2021"]
        );
        assert!(applicable_months(ts(2022, 2, 3, 0), 0).is_empty());
    }

    #[test]
    fn months_between_ignores_day_of_month() {
        assert_eq!(months_between(ts(2022, 1, 31, 0), ts(2022, 5, 1, 0)), 4);
        assert_eq!(months_between(ts(2021, 11, 1, 0), ts(2022, 2, 28, 0)), 3);
        assert_eq!(months_between(ts(2022, 5, 1, 0), ts(2022, 5, 30, 0)), 0);
    }

    #[test]
    fn fixed_clock_is_frozen() {
        let clock = FixedClock(ts(2022, 5, 5, 4));
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now(), ts(2022, 5, 5, 4));
    }
}
