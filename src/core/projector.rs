use std::collections::BTreeMap;

use chrono::{Datelike, Months, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use super::task::Task;

/// Dashboard grouping of tasks relative to a reference day.
///
/// The three lists partition the input: every task lands in exactly one,
/// and each list keeps the input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TodayBuckets {
    pub today: Vec<Task>,
    pub undated: Vec<Task>,
    pub other: Vec<Task>,
}

impl TodayBuckets {
    pub fn len(&self) -> usize {
        self.today.len() + self.undated.len() + self.other.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn bucket_by_today(tasks: &[Task], reference: NaiveDate) -> TodayBuckets {
    let mut buckets = TodayBuckets::default();
    for task in tasks {
        match due_or_warn(task) {
            Some(due) if due == reference => buckets.today.push(task.clone()),
            Some(_) => buckets.other.push(task.clone()),
            None => buckets.undated.push(task.clone()),
        }
    }
    buckets
}

/// Tasks due in the given month, keyed by day of month. Days without tasks are absent.
pub fn bucket_by_month(tasks: &[Task], year: i32, month: u32) -> BTreeMap<u32, Vec<Task>> {
    let mut days: BTreeMap<u32, Vec<Task>> = BTreeMap::new();
    for task in tasks {
        if let Some(due) = due_or_warn(task) {
            if due.year() == year && due.month() == month {
                days.entry(due.day()).or_default().push(task.clone());
            }
        }
    }
    days
}

fn due_or_warn(task: &Task) -> Option<NaiveDate> {
    if task.has_malformed_due_date() {
        log::warn!(
            "Task {} has unreadable due date {:?}, treating as undated",
            task.id,
            task.due_date
        );
        return None;
    }
    task.due()
}

/// First column of the calendar grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeekStart {
    #[default]
    Sunday,
    Monday,
}

impl WeekStart {
    pub fn weekday(&self) -> Weekday {
        match self {
            Self::Sunday => Weekday::Sun,
            Self::Monday => Weekday::Mon,
        }
    }

    /// Column headers in display order.
    pub fn day_labels(&self) -> [&'static str; 7] {
        match self {
            Self::Sunday => ["Su", "Mo", "Tu", "We", "Th", "Fr", "Sa"],
            Self::Monday => ["Mo", "Tu", "We", "Th", "Fr", "Sa", "Su"],
        }
    }
}

/// Shape of one month on a seven-column grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthGrid {
    pub first: NaiveDate,
    pub week_start: WeekStart,
    /// Blank cells before day 1.
    pub leading_blanks: u32,
    pub days_in_month: u32,
}

impl MonthGrid {
    /// `None` when `month` is not 1..=12 or the year is out of range.
    pub fn new(year: i32, month: u32, week_start: WeekStart) -> Option<Self> {
        let first = NaiveDate::from_ymd_opt(year, month, 1)?;
        Some(Self::from_first(first, week_start))
    }

    pub fn containing(date: NaiveDate, week_start: WeekStart) -> Self {
        Self::from_first(date.with_day(1).unwrap_or(date), week_start)
    }

    fn from_first(first: NaiveDate, week_start: WeekStart) -> Self {
        let leading_blanks = (first.weekday().num_days_from_monday() + 7
            - week_start.weekday().num_days_from_monday())
            % 7;
        let days_in_month = first
            .checked_add_months(Months::new(1))
            .map(|next| (next - first).num_days() as u32)
            .unwrap_or(31);
        Self {
            first,
            week_start,
            leading_blanks,
            days_in_month,
        }
    }

    pub fn year(&self) -> i32 {
        self.first.year()
    }

    pub fn month(&self) -> u32 {
        self.first.month()
    }

    /// Leading blanks as `None`, then every day of the month.
    pub fn cells(&self) -> Vec<Option<u32>> {
        (0..self.leading_blanks)
            .map(|_| None)
            .chain((1..=self.days_in_month).map(Some))
            .collect()
    }

    pub fn prev(&self) -> Self {
        let first = self
            .first
            .checked_sub_months(Months::new(1))
            .unwrap_or(self.first);
        Self::from_first(first, self.week_start)
    }

    pub fn next(&self) -> Self {
        let first = self
            .first
            .checked_add_months(Months::new(1))
            .unwrap_or(self.first);
        Self::from_first(first, self.week_start)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year() && date.month() == self.month()
    }
}
