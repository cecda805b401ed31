use chrono::{DateTime, TimeZone, Utc};
use inlet_types::partition::{Granularity, PartitionPlan};
use proptest::prelude::*;

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn granularity_strategy() -> impl Strategy<Value = Granularity> {
    prop_oneof![
        Just(Granularity::Hourly),
        Just(Granularity::Daily),
        Just(Granularity::Weekly),
        Just(Granularity::Monthly),
    ]
}

proptest! {
    #[test]
    fn ranges_are_contiguous_and_ordered(
        granularity in granularity_strategy(),
        span_hours in 1_i64..2000,
        allow_partial in any::<bool>(),
    ) {
        let start = base();
        let end = start + chrono::TimeDelta::hours(span_hours);
        let ranges = PartitionPlan::Single(granularity).ranges(start, end, allow_partial);

        for window in ranges.windows(2) {
            prop_assert_eq!(window[0].end_millis, window[1].start_millis);
        }
        for range in &ranges {
            prop_assert!(range.start_millis < range.end_millis);
        }
    }

    #[test]
    fn ranges_stay_within_bounds(
        granularity in granularity_strategy(),
        span_hours in 1_i64..2000,
        allow_partial in any::<bool>(),
    ) {
        let start = base();
        let end = start + chrono::TimeDelta::hours(span_hours);
        let ranges = PartitionPlan::Single(granularity).ranges(start, end, allow_partial);

        if let (Some(first), Some(last)) = (ranges.first(), ranges.last()) {
            prop_assert_eq!(first.start_millis, start.timestamp_millis());
            prop_assert!(last.end_millis <= end.timestamp_millis());
        }
    }

    #[test]
    fn partial_mode_covers_the_full_range(
        granularity in granularity_strategy(),
        span_hours in 1_i64..2000,
    ) {
        let start = base();
        let end = start + chrono::TimeDelta::hours(span_hours);
        let ranges = PartitionPlan::Single(granularity).ranges(start, end, true);

        prop_assert!(!ranges.is_empty());
        prop_assert_eq!(ranges.last().unwrap().end_millis, end.timestamp_millis());
    }
}
