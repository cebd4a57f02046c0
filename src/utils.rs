/// Utility functions for timestamp formatting
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;

/// Format a timestamp for human-readable logging
///
/// Converts an OffsetDateTime to DD.MM.YYYY - HH:MM:SS format
/// Falls back to default string representation if formatting fails.
pub fn format_datetime(dt: &OffsetDateTime) -> String {
    let format = format_description!("[day].[month].[year] - [hour]:[minute]:[second]");
    dt.format(&format).unwrap_or_else(|_| dt.to_string())
}

/// Compact capture stamp for file names, e.g. `20251016_084000`
pub fn file_stamp(dt: &OffsetDateTime) -> String {
    let format = format_description!("[year][month][day]_[hour][minute][second]");
    dt.format(&format).unwrap_or_else(|_| dt.unix_timestamp().to_string())
}

/// RFC 3339 timestamp for exported rows
pub fn format_rfc3339(dt: &OffsetDateTime) -> String {
    dt.format(&Rfc3339).unwrap_or_else(|_| dt.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn formats_log_and_file_stamps() {
        let dt = datetime!(2025-03-07 09:05:01 UTC);
        assert_eq!(format_datetime(&dt), "07.03.2025 - 09:05:01");
        assert_eq!(file_stamp(&dt), "20250307_090501");
        assert_eq!(format_rfc3339(&dt), "2025-03-07T09:05:01Z");
    }
}
