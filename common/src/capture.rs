use chrono::{DateTime, NaiveDateTime, TimeZone};
use std::fmt::Display;

const FILE_PREFIX: &str = "motion_";
const FILE_TS_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Local file name for a capture, sortable by time.
/// e.g. "motion_2024-01-15_14-30-25.jpg"
pub fn capture_file_name<Tz>(ts: &DateTime<Tz>, ext: &str) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    format!("{FILE_PREFIX}{}.{ext}", ts.format(FILE_TS_FORMAT))
}

/// Object key for a capture in the bucket, partitioned by day.
/// e.g. "captures/2024/01/15/motion_14-30-25.jpg"
pub fn capture_object_key<Tz>(prefix: &str, ts: &DateTime<Tz>, ext: &str) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    format!(
        "{prefix}{day}/{FILE_PREFIX}{time}.{ext}",
        day = ts.format("%Y/%m/%d"),
        time = ts.format("%H-%M-%S"),
    )
}

/// Recover the capture time from a local capture file name.
///
/// Accepts the collision suffix written when two captures share a second
/// ("motion_2024-01-15_14-30-25_1.jpg").
pub fn parse_capture_file_name(name: &str) -> Option<NaiveDateTime> {
    let stem = name.strip_prefix(FILE_PREFIX)?;
    let stem = stem.rsplit_once('.').map_or(stem, |(s, _)| s);
    // "YYYY-MM-DD_HH-MM-SS" is 19 characters.
    let ts = stem.get(..19)?;
    let rest = &stem[19..];
    if !(rest.is_empty() || rest.strip_prefix('_').is_some_and(|n| n.parse::<u32>().is_ok())) {
        return None;
    }
    NaiveDateTime::parse_from_str(ts, FILE_TS_FORMAT).ok()
}

/// MIME type for a capture extension.
pub fn content_type(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 25).unwrap()
    }

    #[test]
    fn file_name_format() {
        assert_eq!(
            capture_file_name(&sample_ts(), "jpg"),
            "motion_2024-01-15_14-30-25.jpg"
        );
    }

    #[test]
    fn object_key_format() {
        assert_eq!(
            capture_object_key("captures/", &sample_ts(), "jpg"),
            "captures/2024/01/15/motion_14-30-25.jpg"
        );
    }

    #[test]
    fn file_names_sort_chronologically() {
        let earlier = capture_file_name(&sample_ts(), "jpg");
        let later = capture_file_name(
            &Utc.with_ymd_and_hms(2024, 2, 1, 3, 0, 0).unwrap(),
            "jpg",
        );
        assert!(earlier < later);
    }

    #[test]
    fn parse_roundtrips_with_suffix() {
        let expected = sample_ts().naive_utc();
        assert_eq!(
            parse_capture_file_name("motion_2024-01-15_14-30-25.jpg"),
            Some(expected)
        );
        assert_eq!(
            parse_capture_file_name("motion_2024-01-15_14-30-25_2.png"),
            Some(expected)
        );
    }

    #[test]
    fn parse_rejects_foreign_files() {
        assert_eq!(parse_capture_file_name("notes.txt"), None);
        assert_eq!(parse_capture_file_name("motion_garbage.jpg"), None);
        assert_eq!(parse_capture_file_name("motion_2024-01-15_14-30-25_x.jpg"), None);
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type("jpg"), "image/jpeg");
        assert_eq!(content_type("PNG"), "image/png");
    }
}
