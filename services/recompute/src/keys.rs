//! Blob key layout for the recomputation engine.
//!
//! All keys live in one flat namespace:
//!
//! ```text
//! show-daily/{show}/{show}-{YYYY-MM-DD}.tsv            raw downloads (upstream)
//! summaries/show/{show}/{show}-{period}.summary.json   daily/monthly/overall summaries
//! audiences/show/{show}/{show}-{YYYY-MM-DD}.all.audience.txt    daily audience ids
//! audiences/show/{show}/{show}-{YYYY-MM}.{part|all}.audience.txt  monthly audience ids
//! audience-summaries/show/{show}/{show}-{YYYY-MM}.{part|all}.audience-summary.json
//! ```
//!
//! Builders and parsers are centralized here so the date-bearing segment is
//! sliced in exactly one place.

use crate::summary::AudiencePart;
use uuid::Uuid;

/// Canonical hyphenated UUID length, the prefix of every key's file segment.
const UUID_LEN: usize = 36;

/// Raw daily downloads file for one (show, date).
pub fn show_daily_key(show: &Uuid, date: &str) -> String {
    format!("show-daily/{show}/{show}-{date}.tsv")
}

/// Prefix matching every raw daily file of the show in the month.
pub fn show_daily_month_prefix(show: &Uuid, month: &str) -> String {
    format!("show-daily/{show}/{show}-{month}")
}

/// Summary blob for any period (date, month, or `overall`).
pub fn summary_key(show: &Uuid, period: &str) -> String {
    format!("summaries/show/{show}/{show}-{period}.summary.json")
}

/// Daily audience file written by the daily computer.
pub fn audience_daily_key(show: &Uuid, date: &str) -> String {
    format!("audiences/show/{show}/{show}-{date}.all.audience.txt")
}

/// Prefix matching the month's daily audience files.
///
/// The trailing hyphen keeps the monthly output (`{show}-{YYYY-MM}.{part}…`)
/// out of its own input listing.
pub fn audience_month_prefix(show: &Uuid, month: &str) -> String {
    format!("audiences/show/{show}/{show}-{month}-")
}

/// Monthly audience file for the given shard (`all` when unsharded).
pub fn audience_month_key(show: &Uuid, month: &str, part: Option<AudiencePart>) -> String {
    format!(
        "audiences/show/{show}/{show}-{month}.{}.audience.txt",
        part_label(part)
    )
}

/// Monthly audience summary for the given shard.
pub fn audience_summary_key(show: &Uuid, month: &str, part: Option<AudiencePart>) -> String {
    format!(
        "audience-summaries/show/{show}/{show}-{month}.{}.audience-summary.json",
        part_label(part)
    )
}

fn part_label(part: Option<AudiencePart>) -> String {
    match part {
        Some(part) => part.to_string(),
        None => "all".to_string(),
    }
}

/// Extract the `YYYY-MM-DD` segment from a key whose file name starts with
/// `{uuid}-{date}`, such as raw daily files and daily audience files.
pub fn date_from_key(key: &str) -> Option<&str> {
    let file = key.rsplit('/').next()?;
    let date = file.get(UUID_LEN + 1..UUID_LEN + 1 + 10)?;
    let well_formed = date.bytes().enumerate().all(|(index, byte)| match index {
        4 | 7 => byte == b'-',
        _ => byte.is_ascii_digit(),
    });
    well_formed.then_some(date)
}

/// Day-of-month of a date-bearing key, for start-day window filtering.
pub fn day_of_month_from_key(key: &str) -> Option<u32> {
    date_from_key(key)?[8..10].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn show() -> Uuid {
        Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap()
    }

    #[test]
    fn test_key_layout() {
        let show = show();
        assert_eq!(
            show_daily_key(&show, "2024-03-05"),
            "show-daily/550e8400-e29b-41d4-a716-446655440000/550e8400-e29b-41d4-a716-446655440000-2024-03-05.tsv"
        );
        assert_eq!(
            summary_key(&show, "2024-03"),
            "summaries/show/550e8400-e29b-41d4-a716-446655440000/550e8400-e29b-41d4-a716-446655440000-2024-03.summary.json"
        );
        assert_eq!(
            audience_daily_key(&show, "2024-03-05"),
            "audiences/show/550e8400-e29b-41d4-a716-446655440000/550e8400-e29b-41d4-a716-446655440000-2024-03-05.all.audience.txt"
        );
    }

    #[test]
    fn test_month_prefix_excludes_monthly_output() {
        let show = show();
        let prefix = audience_month_prefix(&show, "2024-03");
        assert!(audience_daily_key(&show, "2024-03-05").starts_with(&prefix));
        assert!(!audience_month_key(&show, "2024-03", None).starts_with(&prefix));
    }

    #[test]
    fn test_part_labels() {
        let show = show();
        let part = AudiencePart {
            part_num: 2,
            num_parts: 4,
        };
        assert!(audience_month_key(&show, "2024-03", Some(part)).ends_with(".2of4.audience.txt"));
        assert!(audience_summary_key(&show, "2024-03", None)
            .ends_with(".all.audience-summary.json"));
    }

    #[test]
    fn test_date_from_key() {
        let show = show();
        let key = show_daily_key(&show, "2024-03-05");
        assert_eq!(date_from_key(&key), Some("2024-03-05"));
        assert_eq!(day_of_month_from_key(&key), Some(5));

        let audience = audience_daily_key(&show, "2024-03-31");
        assert_eq!(date_from_key(&audience), Some("2024-03-31"));
        assert_eq!(day_of_month_from_key(&audience), Some(31));

        assert_eq!(date_from_key("summaries/show/short"), None);
        assert_eq!(
            date_from_key(&format!("show-daily/{show}/{show}-garbage.tsv")),
            None
        );
    }
}
