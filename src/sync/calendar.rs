use chrono::{DateTime, Duration, NaiveDate, Utc};
use reqwest::Url;

use super::ical::*;
use crate::core::error::ValidationError;
use crate::core::task::Task;

pub const EVENT_DESCRIPTION: &str = "Task from Second Brain App";
const GOOGLE_TEMPLATE_URL: &str = "https://calendar.google.com/calendar/render";

/// All-day span for a dated task: the due date to the following day.
fn all_day_span(task: &Task) -> Result<(NaiveDate, NaiveDate), ValidationError> {
    let start = task.due().ok_or(ValidationError::MissingDueDate)?;
    let end = start
        .checked_add_signed(Duration::days(1))
        .ok_or(ValidationError::MissingDueDate)?;
    Ok((start, end))
}

/// A VCALENDAR document holding one all-day VEVENT for the task's due date.
pub fn task_to_vcalendar(task: &Task, stamp: DateTime<Utc>) -> Result<String, ValidationError> {
    let (start, end) = all_day_span(task)?;

    let lines = [
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        "PRODID:-//Second Brain App//Tasks//EN".to_string(),
        "BEGIN:VEVENT".to_string(),
        format!("UID:{}@secondbrain.app", task.id),
        format!("DTSTAMP:{}", format_utc(stamp)),
        format!("DTSTART;VALUE=DATE:{}", format_date(start)),
        format!("DTEND;VALUE=DATE:{}", format_date(end)),
        fold_line(&format!("SUMMARY:{}", escape_text(&task.title))),
        format!("DESCRIPTION:{}", EVENT_DESCRIPTION),
        "END:VEVENT".to_string(),
        "END:VCALENDAR".to_string(),
    ];

    Ok(lines.join("\r\n") + "\r\n")
}

/// Link that opens a prefilled all-day event in Google Calendar.
pub fn google_calendar_url(task: &Task) -> Result<String, ValidationError> {
    let (start, end) = all_day_span(task)?;
    let dates = format!("{}/{}", format_date(start), format_date(end));
    let mut url = Url::parse(GOOGLE_TEMPLATE_URL).map_err(|_| ValidationError::MissingDueDate)?;
    url.query_pairs_mut()
        .append_pair("action", "TEMPLATE")
        .append_pair("text", &task.title)
        .append_pair("dates", &dates)
        .append_pair("details", EVENT_DESCRIPTION);
    Ok(url.into())
}

/// "Pay Rent!" -> "pay_rent__task.ics"
pub fn ics_file_name(task: &Task) -> String {
    let stem: String = task
        .title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("{}_task.ics", stem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entity::Entity;
    use crate::core::task::{Category, TaskDraft};
    use chrono::TimeZone;
    use uuid::Uuid;

    /// "KEY;PARAM=VAL:value" -> ("KEY", "value")
    fn parse_line(line: &str) -> Option<(&str, &str)> {
        let (key_part, value) = line.split_once(':')?;
        let key = key_part.split(';').next().unwrap_or(key_part);
        Some((key, value))
    }

    fn dated(title: &str, due: &str) -> Task {
        let mut task = Task::from_draft(
            Uuid::new_v4(),
            Uuid::new_v4(),
            &TaskDraft::new(title, Category::Work),
            Utc::now(),
        );
        task.due_date = Some(due.to_string());
        task
    }

    #[test]
    fn vcalendar_has_all_day_range() {
        let task = dated("Dentist, 9am", "2024-06-30");
        let stamp = Utc.with_ymd_and_hms(2024, 6, 1, 9, 30, 0).unwrap();
        let ics = task_to_vcalendar(&task, stamp).unwrap();

        assert!(ics.ends_with("END:VCALENDAR\r\n"));
        let fields: Vec<(&str, &str)> = ics.lines().filter_map(parse_line).collect();
        let get = |key: &str| fields.iter().find(|(k, _)| *k == key).map(|(_, v)| *v);

        assert_eq!(get("UID"), Some(format!("{}@secondbrain.app", task.id).as_str()));
        assert_eq!(get("DTSTAMP"), Some("20240601T093000Z"));
        assert_eq!(get("DTSTART"), Some("20240630"));
        assert_eq!(get("DTEND"), Some("20240701"));
        assert_eq!(get("SUMMARY"), Some("Dentist\\, 9am"));
        assert_eq!(get("DESCRIPTION"), Some(EVENT_DESCRIPTION));
        assert!(ics.contains("DTSTART;VALUE=DATE:20240630\r\n"));
    }

    #[test]
    fn undated_task_cannot_be_exported() {
        let mut task = dated("Someday", "2024-06-01");
        task.due_date = None;
        assert_eq!(
            task_to_vcalendar(&task, Utc::now()),
            Err(ValidationError::MissingDueDate)
        );
        assert_eq!(google_calendar_url(&task), Err(ValidationError::MissingDueDate));
    }

    #[test]
    fn google_url_carries_title_and_dates() {
        let task = dated("Team lunch & demo", "2024-12-31");
        let url = Url::parse(&google_calendar_url(&task).unwrap()).unwrap();
        assert_eq!(url.host_str(), Some("calendar.google.com"));
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("action".into(), "TEMPLATE".into())));
        assert!(pairs.contains(&("text".into(), "Team lunch & demo".into())));
        assert!(pairs.contains(&("dates".into(), "20241231/20250101".into())));
        assert!(pairs.contains(&("details".into(), EVENT_DESCRIPTION.into())));
    }

    #[test]
    fn file_name_is_sanitized() {
        assert_eq!(ics_file_name(&dated("Pay Rent!", "2024-06-01")), "pay_rent__task.ics");
    }
}
