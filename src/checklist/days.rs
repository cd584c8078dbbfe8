use chrono::NaiveDate;

/// Inclusive trip length in days: 2025-07-10 through 2025-07-12 is 3 days.
/// Dates are plain calendar dates, so there are no timezone or DST
/// artifacts to compensate for.
pub fn calculate_trip_days(start: NaiveDate, end: NaiveDate) -> i64 {
    (end - start).num_days() + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn same_day_counts_as_one() {
        let d = date("2025-07-10");
        assert_eq!(calculate_trip_days(d, d), 1);
    }

    #[test]
    fn two_nights_is_three_days() {
        assert_eq!(
            calculate_trip_days(date("2025-07-10"), date("2025-07-12")),
            3
        );
    }

    #[test]
    fn spans_month_boundary() {
        assert_eq!(
            calculate_trip_days(date("2025-01-30"), date("2025-02-02")),
            4
        );
    }

    #[test]
    fn reversed_range_goes_negative() {
        assert_eq!(
            calculate_trip_days(date("2025-07-12"), date("2025-07-10")),
            -1
        );
    }
}
