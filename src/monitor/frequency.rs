use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::feed::Feed;

/// How often a registered feed is checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Frequency {
    /// Never checked automatically; only [`update`](super::FeedMonitor::update) fetches it.
    None,
    Low,
    High,
    /// Starts at the default check interval, then follows the feed's own
    /// publishing cadence.
    #[default]
    Auto,
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Frequency::None => "none",
            Frequency::Low => "low",
            Frequency::High => "high",
            Frequency::Auto => "auto",
        })
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Frequency::None),
            "low" => Ok(Frequency::Low),
            "high" => Ok(Frequency::High),
            "auto" => Ok(Frequency::Auto),
            other => Err(format!("unknown frequency '{other}'")),
        }
    }
}

/// Median gap between consecutive item publish times, bounded to
/// `[fastest, slowest]`. Falls back to `default` when fewer than two items
/// carry distinct dates.
pub(super) fn adaptive_interval(
    feed: &Feed,
    default: Duration,
    fastest: Duration,
    slowest: Duration,
) -> Duration {
    let mut times: Vec<_> = feed.items.iter().filter_map(|i| i.publish_time).collect();
    times.sort_unstable_by(|a, b| b.cmp(a));

    let mut gaps: Vec<Duration> = times
        .windows(2)
        .filter_map(|pair| (pair[0] - pair[1]).to_std().ok())
        .filter(|gap| !gap.is_zero())
        .collect();

    if gaps.is_empty() {
        return default;
    }
    gaps.sort_unstable();
    gaps[gaps.len() / 2].max(fastest).min(slowest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedItem;
    use chrono::{TimeZone, Utc};
    use url::Url;

    const MINUTE: Duration = Duration::from_secs(60);

    fn feed_with_hours(hours: &[i64]) -> Feed {
        let mut feed = Feed::new(Url::parse("https://example.com/rss").unwrap());
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        feed.items = hours
            .iter()
            .map(|h| FeedItem {
                publish_time: Some(base + chrono::Duration::hours(*h)),
                ..FeedItem::default()
            })
            .collect();
        feed
    }

    fn interval(feed: &Feed) -> Duration {
        adaptive_interval(feed, 60 * MINUTE, 15 * MINUTE, 360 * MINUTE)
    }

    #[test]
    fn test_median_gap() {
        // gaps: 1h, 2h, 2h, 10h -> median 2h
        let feed = feed_with_hours(&[0, 1, 3, 5, 15]);
        assert_eq!(interval(&feed), 120 * MINUTE);
    }

    #[test]
    fn test_clamped_to_bounds() {
        let daily = feed_with_hours(&[0, 24, 48]);
        assert_eq!(interval(&daily), 360 * MINUTE);

        let mut busy = feed_with_hours(&[]);
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        busy.items = (0..5)
            .map(|m| FeedItem {
                publish_time: Some(base + chrono::Duration::minutes(m)),
                ..FeedItem::default()
            })
            .collect();
        assert_eq!(interval(&busy), 15 * MINUTE);
    }

    #[test]
    fn test_too_few_dates_uses_default() {
        assert_eq!(interval(&feed_with_hours(&[])), 60 * MINUTE);
        assert_eq!(interval(&feed_with_hours(&[4])), 60 * MINUTE);
        assert_eq!(interval(&feed_with_hours(&[4, 4])), 60 * MINUTE);
    }

    #[test]
    fn test_parse_frequency() {
        assert_eq!("High".parse::<Frequency>().unwrap(), Frequency::High);
        assert_eq!(" none ".parse::<Frequency>().unwrap(), Frequency::None);
        assert!("hourly".parse::<Frequency>().is_err());
        assert_eq!(Frequency::default().to_string(), "auto");
    }
}
