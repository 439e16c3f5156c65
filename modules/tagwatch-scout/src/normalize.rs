//! Turn rendered post-age tokens into absolute instants and attach the
//! target's tag and calendar partition.

use chrono::{DateTime, Datelike, NaiveDate, TimeDelta, Utc};
use tracing::warn;

use tagwatch_common::{NormalizedPost, Partition, RawPost, Target};

/// Separator between the author handle and the post-age token.
const TIME_SEPARATOR: char = '·';

/// Segment after the last `·` in a rendered author block, trimmed.
///
/// `"Alice\n@alice\n·\n3h"` gives `"3h"`; a block without a separator is
/// returned whole.
pub fn time_token(author: &str) -> &str {
    author
        .rsplit(TIME_SEPARATOR)
        .next()
        .unwrap_or(author)
        .trim()
}

/// Resolve a post-age token against the instant it was captured.
///
/// Relative tokens (`3h`, `45m`, `10s`) count back from `captured_at`.
/// `Jan 4` is taken in the capture year and `Jan 4, 2023` in its own year,
/// both at midnight UTC. Anything else gives `None`.
pub fn normalize_time(token: &str, captured_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let token = token.trim();

    if let Some(delta) = relative_delta(token) {
        return captured_at.checked_sub_signed(delta);
    }

    let with_year = format!("{} {}", captured_at.year(), token);
    let date = NaiveDate::parse_from_str(&with_year, "%Y %b %d")
        .or_else(|_| NaiveDate::parse_from_str(token, "%b %d, %Y"))
        .ok()?;

    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

/// True for `<digits>h|m|s` tokens.
pub fn is_relative_token(token: &str) -> bool {
    relative_delta(token.trim()).is_some()
}

fn relative_delta(token: &str) -> Option<TimeDelta> {
    let unit = token.chars().last()?;
    let amount = &token[..token.len() - unit.len_utf8()];
    if amount.is_empty() || !amount.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: i64 = amount.parse().ok()?;

    match unit {
        'h' => TimeDelta::try_hours(amount),
        'm' => TimeDelta::try_minutes(amount),
        's' => TimeDelta::try_seconds(amount),
        _ => None,
    }
}

/// Keep ASCII letters, digits and the Thai block; drop everything else.
pub fn sanitize_tag(tag: &str) -> String {
    tag.chars()
        .filter(|c| c.is_ascii_alphanumeric() || ('\u{0E01}'..='\u{0E59}').contains(c))
        .collect()
}

pub fn normalize_post(raw: RawPost, target: &Target) -> NormalizedPost {
    let token = time_token(&raw.author).to_string();
    let post_time_raw = normalize_time(&token, raw.captured_at);
    if post_time_raw.is_none() {
        warn!(target = %target, token = %token, "Unparseable post time");
    }
    let partition = post_time_raw.map(Partition::of);

    NormalizedPost {
        author: raw.author,
        text: raw.text,
        captured_at: raw.captured_at,
        category: target.category.clone(),
        tag: sanitize_tag(&target.tag),
        time_token: token,
        post_time_raw,
        year: partition.map(|p| p.year),
        month: partition.map(|p| p.month),
        day: partition.map(|p| p.day),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn captured() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn relative_tokens_count_back_from_capture() {
        let t = captured();
        assert_eq!(normalize_time("3h", t), Some(t - TimeDelta::hours(3)));
        assert_eq!(normalize_time("45m", t), Some(t - TimeDelta::minutes(45)));
        assert_eq!(normalize_time("10s", t), Some(t - TimeDelta::seconds(10)));
        assert_eq!(normalize_time(" 0h ", t), Some(t));
    }

    #[test]
    fn month_day_uses_capture_year_at_midnight() {
        assert_eq!(
            normalize_time("Jan 4", captured()),
            Some(Utc.with_ymd_and_hms(2024, 1, 4, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn explicit_year_is_kept() {
        assert_eq!(
            normalize_time("Dec 31, 2022", captured()),
            Some(Utc.with_ymd_and_hms(2022, 12, 31, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn unparseable_tokens_give_none() {
        let t = captured();
        for token in ["", "h", "-3h", "3d", "yesterday", "Feb 30", "3.5h", "@alice"] {
            assert_eq!(normalize_time(token, t), None, "token {token:?}");
        }
    }

    #[test]
    fn time_token_takes_last_segment() {
        assert_eq!(time_token("Alice\n@alice\n·\n3h"), "3h");
        assert_eq!(time_token("Bob @bob · Jan 4"), "Jan 4");
        assert_eq!(time_token("no separator"), "no separator");
    }

    #[test]
    fn sanitize_keeps_ascii_and_thai() {
        assert_eq!(sanitize_tag("#ธรรมศาสตร์ช้างเผือก"), "ธรรมศาสตร์ช้างเผือก");
        assert_eq!(sanitize_tag("#TU_89!"), "TU89");
        assert_eq!(sanitize_tag("#日本"), "");
    }

    #[test]
    fn normalize_post_fills_partition() {
        let target = Target::search("uni", "#TU").unwrap();
        let raw = RawPost {
            author: "Alice @alice · 3h".into(),
            text: "hello".into(),
            captured_at: Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap(),
        };

        let post = normalize_post(raw, &target);
        assert_eq!(post.tag, "TU");
        assert_eq!(post.category, "uni");
        assert_eq!(post.time_token, "3h");
        assert_eq!((post.year, post.month, post.day), (Some(2023), Some(12), Some(31)));
    }

    #[test]
    fn unparseable_time_leaves_partition_empty() {
        let target = Target::search("uni", "#TU").unwrap();
        let raw = RawPost {
            author: "Alice @alice".into(),
            text: "hello".into(),
            captured_at: captured(),
        };

        let post = normalize_post(raw, &target);
        assert_eq!(post.post_time_raw, None);
        assert_eq!(post.year, None);
    }
}
