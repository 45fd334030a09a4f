use chrono::{DateTime, NaiveDate, Utc};

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// UTC timestamp in the basic format, e.g. "20240601T093000Z".
pub fn format_utc(dt: DateTime<Utc>) -> String {
    dt.format("%Y%m%dT%H%M%SZ").to_string()
}

pub fn escape_text(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace(';', "\\;")
        .replace(',', "\\,")
        .replace('\n', "\\n")
}

/// Fold long lines at 75 octets (RFC 5545 requirement).
pub fn fold_line(s: &str) -> String {
    if s.len() <= 75 {
        return s.to_string();
    }
    let mut result = String::new();
    let mut pos = 0;
    while pos < s.len() {
        let mut end = (pos + 75).min(s.len());
        // Don't split in the middle of a multi-byte UTF-8 character
        while end < s.len() && !s.is_char_boundary(end) {
            end -= 1;
        }
        if pos > 0 {
            result.push_str("\r\n ");
        }
        result.push_str(&s[pos..end]);
        pos = end;
    }
    result
}
