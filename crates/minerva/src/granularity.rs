use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use super::error::{ConfigurationError, Error};
use super::interval::{parse_interval, Interval};

/// Trend store granularities are intervals in the usual notation ("15m", "1d").
pub type Granularity = Interval;

fn duration_of(interval_str: &str) -> Duration {
    // Only called with the literals in the tables below
    parse_interval(interval_str).unwrap()
}

fn suffix_mapping() -> &'static HashMap<Duration, &'static str> {
    static GRANULARITY_SUFFIX_MAPPING: OnceLock<HashMap<Duration, &'static str>> =
        OnceLock::new();

    GRANULARITY_SUFFIX_MAPPING.get_or_init(|| {
        ["5m", "15m", "30m", "1h", "12h", "1d", "1w", "1month"]
            .into_iter()
            .map(|suffix| (duration_of(suffix), suffix))
            .collect()
    })
}

/// Canonical short notation of a standard granularity, as used in part names
/// and generated SQL.
pub fn granularity_to_suffix(granularity: &Granularity) -> Result<&'static str, Error> {
    suffix_mapping()
        .get(&granularity.duration())
        .copied()
        .ok_or_else(|| {
            ConfigurationError::from_msg(format!("No predefined granularity '{granularity}'"))
                .into()
        })
}

/// Partition size of a trend store with the specified granularity.
pub fn partition_size_for(granularity: &Granularity) -> Result<Interval, Error> {
    static PARTITION_SIZE_MAPPING: OnceLock<HashMap<Duration, &'static str>> = OnceLock::new();

    let partition_size_mapping = PARTITION_SIZE_MAPPING.get_or_init(|| {
        [
            ("15m", "1d"),
            ("30m", "2d"),
            ("1h", "4d"),
            ("1d", "3month"),
            ("1w", "1y"),
            ("1month", "5y"),
        ]
        .into_iter()
        .map(|(granularity, partition_size)| (duration_of(granularity), partition_size))
        .collect()
    });

    let partition_size = partition_size_mapping
        .get(&granularity.duration())
        .ok_or_else(|| {
            ConfigurationError::from_msg(format!(
                "No partition size defined for granularity '{granularity}'"
            ))
        })?;

    Interval::parse(partition_size)
}

/// Size in seconds of the shards used for ad-hoc aggregate queries.
pub fn shard_size(granularity: &Granularity) -> Result<u64, Error> {
    static SHARD_SIZES: OnceLock<HashMap<Duration, u64>> = OnceLock::new();

    let shard_sizes = SHARD_SIZES.get_or_init(|| {
        [
            ("5m", 3 * 3600),
            ("15m", 6 * 3600),
            ("30m", 6 * 3600),
            ("1h", 24 * 3600),
            ("12h", 24 * 3600 * 7),
            ("1d", 24 * 3600 * 7),
            ("1w", 24 * 3600 * 7 * 4),
            ("1month", 24 * 3600 * 7 * 24),
        ]
        .into_iter()
        .map(|(granularity, size)| (duration_of(granularity), size))
        .collect()
    });

    shard_sizes
        .get(&granularity.duration())
        .copied()
        .ok_or_else(|| {
            ConfigurationError::from_msg(format!(
                "No shard size defined for granularity '{granularity}'"
            ))
            .into()
        })
}

fn is_calendar_based(granularity: &Granularity) -> bool {
    granularity.duration() == duration_of("1month")
}

/// Number of `source` ticks that fit in one `target` bucket.
///
/// Returns `None` when the buckets do not line up, or when the target is
/// month based and the count depends on the month.
pub fn ticks_per(source: &Granularity, target: &Granularity) -> Option<u64> {
    if is_calendar_based(target) || source.seconds() == 0 {
        return None;
    }

    if target.seconds() % source.seconds() == 0 {
        Some(target.seconds() / source.seconds())
    } else {
        None
    }
}

/// Check that `target` is a valid time aggregation target for `source`.
pub fn check_time_aggregation(source: &Granularity, target: &Granularity) -> Result<(), Error> {
    if target.duration() <= source.duration() {
        return Err(ConfigurationError::from_msg(format!(
            "Target granularity '{target}' is not coarser than source granularity '{source}'"
        ))
        .into());
    }

    if !is_calendar_based(target) && ticks_per(source, target).is_none() {
        return Err(ConfigurationError::from_msg(format!(
            "Target granularity '{target}' is not a multiple of source granularity '{source}'"
        ))
        .into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn granularity(s: &str) -> Granularity {
        Interval::parse(s).unwrap()
    }

    #[test]
    fn suffix_of_equivalent_notations() {
        assert_eq!(granularity_to_suffix(&granularity("00:15:00")).unwrap(), "15m");
        assert_eq!(granularity_to_suffix(&granularity("1 day")).unwrap(), "1d");
        assert_eq!(granularity_to_suffix(&granularity("1 mon")).unwrap(), "1month");
    }

    #[test]
    fn partition_sizes() {
        assert_eq!(partition_size_for(&granularity("15m")).unwrap().as_str(), "1d");
        assert_eq!(partition_size_for(&granularity("1d")).unwrap().as_str(), "3month");
        assert_eq!(partition_size_for(&granularity("1w")).unwrap().as_str(), "1y");
    }

    #[test]
    fn unknown_partition_size() {
        let result = partition_size_for(&granularity("7m"));

        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn ticks() {
        assert_eq!(ticks_per(&granularity("15m"), &granularity("1d")), Some(96));
        assert_eq!(ticks_per(&granularity("15m"), &granularity("1h")), Some(4));
        assert_eq!(ticks_per(&granularity("1d"), &granularity("1w")), Some(7));
        assert_eq!(ticks_per(&granularity("1d"), &granularity("1month")), None);
        assert_eq!(ticks_per(&granularity("1h"), &granularity("15m")), None);
    }

    #[test]
    fn time_aggregation_check() {
        assert!(check_time_aggregation(&granularity("15m"), &granularity("1d")).is_ok());
        assert!(check_time_aggregation(&granularity("1d"), &granularity("1month")).is_ok());
        assert!(check_time_aggregation(&granularity("1d"), &granularity("15m")).is_err());
        assert!(check_time_aggregation(&granularity("1h"), &granularity("1h")).is_err());
    }
}
