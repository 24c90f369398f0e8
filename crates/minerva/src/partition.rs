//! Mapping of timestamps to the partitions of trend store tables.
//!
//! Partition boundaries are aligned on local wall clock time in the
//! timezone of the instance, counting from a reference midnight near the
//! Unix epoch.
use chrono::{
    DateTime, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeDelta, TimeZone,
    Utc,
};
use chrono_tz::Tz;

use super::error::{ConfigurationError, Error, InputError};
use super::granularity::{shard_size, Granularity};

fn epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1970, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap()
}

/// Attach `timezone` to a wall clock time.
///
/// A time that occurs twice resolves to the standard time occurrence; a time
/// that is skipped by a DST transition is read with the offset in effect
/// just before the transition.
fn localize(timezone: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    match timezone.from_local_datetime(&naive) {
        LocalResult::Single(timestamp) => timestamp,
        LocalResult::Ambiguous(_, standard) => standard,
        LocalResult::None => {
            let offset_before = timezone
                .offset_from_utc_datetime(&(naive - TimeDelta::days(1)))
                .fix();

            let utc = naive - TimeDelta::seconds(i64::from(offset_before.local_minus_utc()));

            timezone.from_utc_datetime(&utc)
        }
    }
}

/// Reference point from which partitions are counted.
///
/// Timezones with a positive UTC offset at the epoch count from the
/// following midnight, keeping the offset of the epoch. Existing partition
/// indexes depend on this, so it must not change.
fn reference_timestamp(timezone: &Tz) -> Result<DateTime<FixedOffset>, Error> {
    let localized_epoch = localize(timezone, epoch());
    let offset = localized_epoch.offset().fix();

    let reference = if offset.local_minus_utc() > 0 {
        localized_epoch.naive_local() + TimeDelta::days(1)
    } else {
        localized_epoch.naive_local()
    };

    let midnight = reference.date().and_time(NaiveTime::MIN);

    offset
        .from_local_datetime(&midnight)
        .single()
        .ok_or_else(|| {
            ConfigurationError::from_msg(format!(
                "Could not determine partition reference timestamp for timezone '{timezone}'"
            ))
            .into()
        })
}

/// Start of the partition of `partition_size` seconds that contains
/// `timestamp`, in `timezone`.
pub fn partition_timestamp<T: TimeZone>(
    timezone: &Tz,
    partition_size: u64,
    timestamp: &DateTime<T>,
) -> Result<DateTime<Tz>, Error> {
    if partition_size == 0 {
        return Err(InputError::from_msg("Partition size must be greater than 0".to_string()).into());
    }

    let partition_size = i64::try_from(partition_size).map_err(|_| {
        InputError::from_msg(format!("Partition size {partition_size} is out of range"))
    })?;

    let localized_timestamp = timestamp.with_timezone(timezone);

    let reference = reference_timestamp(timezone)?;

    // Correct for DST: count wall clock seconds, not elapsed seconds
    let utc_offset_delta = i64::from(localized_timestamp.offset().fix().local_minus_utc())
        - i64::from(reference.offset().local_minus_utc());

    let timestamp_offset =
        localized_timestamp.timestamp() - reference.timestamp() + utc_offset_delta;

    let partition_index = timestamp_offset.div_euclid(partition_size);

    let partition_start =
        reference.naive_local() + TimeDelta::seconds(partition_index * partition_size);

    Ok(localize_with_offset(
        timezone,
        partition_start,
        localized_timestamp.offset().fix(),
    ))
}

/// Like `localize`, but a time that occurs twice resolves to the occurrence
/// with `offset`, or else the earlier one.
fn localize_with_offset(timezone: &Tz, naive: NaiveDateTime, offset: FixedOffset) -> DateTime<Tz> {
    match timezone.from_local_datetime(&naive) {
        LocalResult::Ambiguous(earliest, latest) => {
            if latest.offset().fix() == offset {
                latest
            } else {
                earliest
            }
        }
        _ => localize(timezone, naive),
    }
}

/// Half-open UTC interval `[start, end)` covered by shard `shard_index` of a
/// trend store with the specified granularity.
pub fn shard_interval(
    granularity: &Granularity,
    shard_index: i64,
) -> Result<(DateTime<Utc>, DateTime<Utc>), Error> {
    let shard_size = i64::try_from(shard_size(granularity)?).map_err(|_| {
        ConfigurationError::from_msg(format!("Shard size out of range for '{granularity}'"))
    })?;

    let start = shard_index
        .checked_mul(shard_size)
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .ok_or_else(|| InputError::from_msg(format!("Shard index {shard_index} is out of range")))?;

    let end = start + TimeDelta::seconds(shard_size);

    Ok((start, end))
}

/// Partition timestamps for every `partition_size` step from `start` up to
/// and including `end`.
pub fn partitions_for_period<T: TimeZone>(
    timezone: &Tz,
    partition_size: u64,
    start: &DateTime<T>,
    end: &DateTime<T>,
) -> Result<Vec<DateTime<Tz>>, Error> {
    let step = TimeDelta::seconds(i64::try_from(partition_size).map_err(|_| {
        InputError::from_msg(format!("Partition size {partition_size} is out of range"))
    })?);

    let mut partitions = Vec::new();
    let mut timestamp = start.with_timezone(&Utc);
    let end = end.with_timezone(&Utc);

    while timestamp <= end {
        partitions.push(partition_timestamp(timezone, partition_size, &timestamp)?);

        timestamp += step;
    }

    Ok(partitions)
}

/// Parse a timestamp that must carry an explicit UTC offset.
pub fn parse_timestamp(value: &str) -> Result<DateTime<FixedOffset>, Error> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Ok(timestamp);
    }

    if let Ok(timestamp) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%:z") {
        return Ok(timestamp);
    }

    let naive_formats = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

    if naive_formats
        .iter()
        .any(|format| NaiveDateTime::parse_from_str(value, format).is_ok())
    {
        return Err(InputError::from_msg(format!(
            "Timestamp '{value}' has no timezone information"
        ))
        .into());
    }

    Err(InputError::from_msg(format!("Could not parse timestamp '{value}'")).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(value: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(value).unwrap()
    }

    #[test]
    fn quarter_hour_partitions_in_utc() {
        let result = partition_timestamp(&Tz::UTC, 900, &ts("2024-03-10T10:37:12Z")).unwrap();

        assert_eq!(result, ts("2024-03-10T10:30:00Z"));
    }

    #[test]
    fn day_partitions_in_positive_offset_timezone() {
        let tz = chrono_tz::Europe::Amsterdam;

        let result = partition_timestamp(&tz, 86400, &ts("2024-06-15T13:00:00+02:00")).unwrap();

        assert_eq!(result, ts("2024-06-15T00:00:00+02:00"));
        assert_eq!(result.offset().fix().local_minus_utc(), 7200);
    }

    #[test]
    fn day_partitions_in_negative_offset_timezone() {
        let tz = chrono_tz::America::New_York;

        let result = partition_timestamp(&tz, 86400, &ts("2024-07-04T15:00:00-04:00")).unwrap();

        assert_eq!(result, ts("2024-07-04T00:00:00-04:00"));
    }

    #[test]
    fn day_partition_on_dst_transitions() {
        let tz = chrono_tz::Europe::Amsterdam;

        // Autumn: 25 hour day
        let result = partition_timestamp(&tz, 86400, &ts("2024-10-27T23:30:00+01:00")).unwrap();

        assert_eq!(result, ts("2024-10-27T00:00:00+02:00"));

        // Spring: 23 hour day
        let result = partition_timestamp(&tz, 86400, &ts("2024-03-31T12:00:00+02:00")).unwrap();

        assert_eq!(result, ts("2024-03-31T00:00:00+01:00"));
    }

    #[test]
    fn sub_day_partitions_in_dst_fold() {
        let tz = chrono_tz::Europe::Amsterdam;

        // 02:00-03:00 local occurs twice on 2024-10-27
        let first = partition_timestamp(&tz, 3600, &ts("2024-10-27T02:30:00+02:00")).unwrap();

        assert_eq!(first, ts("2024-10-27T02:00:00+02:00"));

        let second = partition_timestamp(&tz, 3600, &ts("2024-10-27T02:30:00+01:00")).unwrap();

        assert_eq!(second, ts("2024-10-27T02:00:00+01:00"));

        for size in [900, 3600] {
            for value in [
                "2024-10-27T02:00:00+02:00",
                "2024-10-27T02:30:00+02:00",
                "2024-10-27T02:59:59+02:00",
                "2024-10-27T02:00:00+01:00",
                "2024-10-27T02:45:00+01:00",
            ] {
                let timestamp = ts(value);
                let start = partition_timestamp(&tz, size, &timestamp).unwrap();

                assert!(start <= timestamp, "{start} > {timestamp}");
                assert!(timestamp < start + TimeDelta::seconds(size as i64));
                assert_eq!(partition_timestamp(&tz, size, &start).unwrap(), start);
            }
        }
    }

    #[test]
    fn timestamps_before_reference() {
        let result = partition_timestamp(&Tz::UTC, 86400, &ts("1969-12-31T23:00:00Z")).unwrap();

        assert_eq!(result, ts("1969-12-31T00:00:00Z"));
    }

    #[test]
    fn partition_contains_timestamp() {
        let tz = chrono_tz::Europe::Amsterdam;
        let sizes = [900, 3600, 86400];
        let timestamps = [
            "2024-01-01T00:00:00+01:00",
            "2024-01-15T07:44:59+01:00",
            "2024-06-30T23:59:59+02:00",
            "2023-11-11T11:11:11+01:00",
        ];

        for size in sizes {
            for value in timestamps {
                let timestamp = ts(value);
                let start = partition_timestamp(&tz, size, &timestamp).unwrap();

                assert!(start <= timestamp, "{start} > {timestamp}");
                assert!(timestamp < start + TimeDelta::seconds(size as i64));

                let again = partition_timestamp(&tz, size, &start).unwrap();

                assert_eq!(again, start);
            }
        }
    }

    #[test]
    fn zero_partition_size() {
        let result = partition_timestamp(&Tz::UTC, 0, &ts("2024-01-01T00:00:00Z"));

        assert!(matches!(result, Err(Error::Input(_))));
    }

    #[test]
    fn contiguous_shards() {
        for granularity in ["5m", "15m", "30m", "1h", "12h", "1d", "1w", "1month"] {
            let granularity = Granularity::parse(granularity).unwrap();
            let size = shard_size(&granularity).unwrap() as i64;

            for index in [-1, 0, 1, 19000] {
                let (start, end) = shard_interval(&granularity, index).unwrap();
                let (next_start, next_end) = shard_interval(&granularity, index + 1).unwrap();

                assert_eq!(end, next_start);
                assert_eq!((end - start).num_seconds(), size);
                assert_eq!((next_end - start).num_seconds(), 2 * size);
            }
        }
    }

    #[test]
    fn shard_of_unknown_granularity() {
        let granularity = Granularity::parse("7m").unwrap();

        assert!(shard_interval(&granularity, 1).is_err());
    }

    #[test]
    fn period_partitions() {
        let partitions = partitions_for_period(
            &Tz::UTC,
            86400,
            &ts("2024-01-01T12:00:00Z"),
            &ts("2024-01-03T12:00:00Z"),
        )
        .unwrap();

        assert_eq!(
            partitions,
            vec![
                ts("2024-01-01T00:00:00Z"),
                ts("2024-01-02T00:00:00Z"),
                ts("2024-01-03T00:00:00Z"),
            ]
        );
    }

    #[test]
    fn timestamp_without_timezone() {
        let result = parse_timestamp("2024-01-01T00:00:00");

        assert!(matches!(result, Err(Error::Input(_))));

        let result = parse_timestamp("2024-01-01 00:00:00");

        assert!(matches!(result, Err(Error::Input(_))));
    }

    #[test]
    fn timestamp_with_timezone() {
        assert_eq!(
            parse_timestamp("2024-01-01T00:00:00+01:00").unwrap(),
            ts("2023-12-31T23:00:00Z")
        );
        assert_eq!(
            parse_timestamp("2024-01-01 00:00:00+01:00").unwrap(),
            ts("2023-12-31T23:00:00Z")
        );
    }
}
