use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::NaiveDate;

use second_brain::core::note::Note;
use second_brain::core::projector::{MonthGrid, TodayBuckets};
use second_brain::core::task::{Category, Task};

const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";
const BOLD: &str = "\x1b[1m";

pub fn category_label(category: Category) -> &'static str {
    match category {
        Category::Work => "Work",
        Category::Home => "Home",
        Category::Health => "Health",
        Category::Learning => "Learning",
        Category::Finance => "Finance",
        Category::Social => "Social",
        Category::Ideas => "Ideas",
    }
}

/// ANSI foreground for the category badge.
pub fn category_color(category: Category) -> &'static str {
    match category {
        Category::Work => "\x1b[34m",
        Category::Home => "\x1b[32m",
        Category::Health => "\x1b[31m",
        Category::Learning => "\x1b[35m",
        Category::Finance => "\x1b[33m",
        Category::Social => "\x1b[36m",
        Category::Ideas => "\x1b[93m",
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

pub fn task_line(task: &Task) -> String {
    let check = if task.is_done { "[x]" } else { "[ ]" };
    let mut line = format!(
        "{} {} {}{:<8}{} {}",
        short_id(&task.id),
        check,
        category_color(task.category),
        category_label(task.category),
        RESET,
        task.title
    );
    match (task.due(), task.due_date.as_deref()) {
        (Some(due), _) => {
            let _ = write!(line, " {}(due {}){}", DIM, due.format("%b %-d"), RESET);
        }
        (None, Some(raw)) if !raw.trim().is_empty() => {
            let _ = write!(line, " {}(due ?){}", DIM, RESET);
        }
        _ => {}
    }
    line
}

pub fn note_line(note: &Note) -> String {
    let star = if note.is_favorite { "*" } else { " " };
    format!(
        "{} {} {} {}(edited {}){}",
        short_id(&note.id),
        star,
        note.title,
        DIM,
        note.updated_at.format("%Y-%m-%d %H:%M"),
        RESET
    )
}

pub fn render_today(buckets: &TodayBuckets, today: NaiveDate) -> String {
    let mut out = String::new();
    let sections = [
        (format!("Today, {}", today.format("%A %B %-d")), &buckets.today),
        ("No date".to_string(), &buckets.undated),
        ("Upcoming and past".to_string(), &buckets.other),
    ];
    for (heading, tasks) in sections {
        let _ = writeln!(out, "{}{}{} ({})", BOLD, heading, RESET, tasks.len());
        if tasks.is_empty() {
            let _ = writeln!(out, "  {}nothing here{}", DIM, RESET);
        }
        for task in tasks {
            let _ = writeln!(out, "  {}", task_line(task));
        }
        out.push('\n');
    }
    out
}

/// Month grid with a task count under each busy day, then the tasks by day.
pub fn render_month(grid: &MonthGrid, days: &BTreeMap<u32, Vec<Task>>, today: NaiveDate) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}{}{}", BOLD, grid.first.format("%B %Y"), RESET);
    let _ = writeln!(out, "{}", grid.week_start.day_labels().map(|d| format!("{:>4}", d)).join(""));

    for week in grid.cells().chunks(7) {
        let mut row = String::new();
        for cell in week {
            match cell {
                None => row.push_str("    "),
                Some(day) => {
                    let is_today = grid.contains(today) && *day == chrono::Datelike::day(&today);
                    let marker = if days.contains_key(day) { "•" } else { " " };
                    if is_today {
                        let _ = write!(row, "{}{:>3}{}{}", BOLD, day, RESET, marker);
                    } else {
                        let _ = write!(row, "{:>3}{}", day, marker);
                    }
                }
            }
        }
        let _ = writeln!(out, "{}", row.trim_end());
    }

    for (day, tasks) in days {
        let _ = writeln!(out, "\n{}{} {}{}", BOLD, grid.first.format("%b"), day, RESET);
        for task in tasks {
            let _ = writeln!(out, "  {}", task_line(task));
        }
    }
    out
}
