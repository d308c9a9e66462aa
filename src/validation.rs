use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// One day in minutes, the hard cap for a user's total logged time per date.
pub const DAY_MINUTES: u32 = 1440;

pub const MAX_DESCRIPTION_CHARS: usize = 500;
pub const MAX_NAME_CHARS: usize = 200;

/// Field-level and form-level messages collected while checking a submission.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationErrors {
    pub errors: BTreeMap<String, Vec<String>>,
    pub non_field_errors: Vec<String>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_field(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn add(&mut self, message: impl Into<String>) {
        self.non_field_errors.push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.non_field_errors.is_empty()
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut lines = Vec::new();
        for (field, messages) in &self.errors {
            for message in messages {
                lines.push(format!("{field}: {message}"));
            }
        }
        lines.extend(self.non_field_errors.iter().cloned());
        write!(f, "{}", lines.join("\n"))
    }
}

/// The effective reporting window for the charts view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Resolves the reporting window from the user's record bounds and an
/// optionally submitted `start`/`end` pair.
///
/// With no records, any submitted range is an error and the resolved window
/// is empty. With records, a submitted range must satisfy `start <= end` and
/// lie within the bounds, otherwise the error names the valid bounds.
pub fn resolve_date_range(
    bounds: Option<(NaiveDate, NaiveDate)>,
    submitted: Option<(NaiveDate, NaiveDate)>,
) -> Result<Option<DateRange>, ValidationErrors> {
    let Some((min_date, max_date)) = bounds else {
        if submitted.is_some() {
            let mut errors = ValidationErrors::new();
            errors.add("You don't have any records yet.");
            return Err(errors);
        }
        return Ok(None);
    };

    let Some((start, end)) = submitted else {
        return Ok(Some(DateRange {
            start: min_date,
            end: max_date,
        }));
    };

    let mut errors = ValidationErrors::new();
    if start > end {
        errors.add("The selected start date is after the end date.");
    } else if start < min_date || end > max_date {
        errors.add(format!(
            "Your records are between {min_date} and {max_date}."
        ));
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(Some(DateRange { start, end }))
}

/// All calendar dates from `start` to `end` inclusive, ascending.
pub fn dates_between(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut current = start;
    while current <= end {
        dates.push(current);
        current += Duration::days(1);
    }
    dates
}

/// A candidate time-log submission, after the presentation layer has parsed
/// the raw form fields.
#[derive(Debug, Clone)]
pub struct TimeLogInput {
    pub subject_id: String,
    pub tag_ids: Vec<String>,
    pub hours: u32,
    pub minutes: u32,
    pub date: NaiveDate,
    pub description: String,
}

/// Validates a time-log submission and returns the computed duration in
/// minutes.
///
/// `subject_ids` and `tag_ids` are the submitting user's own entities;
/// anything outside them is rejected as an invalid choice. `previous_total`
/// is the sum of the user's already-logged minutes on the same date (with the
/// record being edited excluded by the caller), which enforces the 24-hour
/// daily budget.
pub fn validate_timelog(
    input: &TimeLogInput,
    subject_ids: &[String],
    tag_ids: &[String],
    previous_total: u32,
    today: NaiveDate,
) -> Result<u32, ValidationErrors> {
    let mut errors = ValidationErrors::new();

    if !subject_ids.iter().any(|id| *id == input.subject_id) {
        errors.add_field("subject", "Select a valid subject.");
    }
    for tag_id in &input.tag_ids {
        if !tag_ids.iter().any(|id| id == tag_id) {
            errors.add_field("tags", format!("{tag_id} is not one of your tags."));
        }
    }

    if input.hours > 24 {
        errors.add_field("hours", "Hours must be between 0 and 24.");
    }
    if input.minutes > 59 {
        errors.add_field("minutes", "Minutes must be between 0 and 59.");
    }
    if input.date > today {
        errors.add_field("date", "The date cannot be in the future.");
    }
    if input.description.chars().count() > MAX_DESCRIPTION_CHARS {
        errors.add_field(
            "description",
            format!("The description cannot exceed {MAX_DESCRIPTION_CHARS} characters."),
        );
    }

    let mut duration = 0;
    if input.hours <= 24 && input.minutes <= 59 && input.date <= today {
        duration = input.hours * 60 + input.minutes;
        if duration == 0 {
            errors.add("The hour and minute fields cannot both be zero.");
        } else if duration > DAY_MINUTES {
            errors.add("One day is only 24 hours.");
        } else if previous_total + duration > DAY_MINUTES {
            let remaining = DAY_MINUTES.saturating_sub(previous_total);
            if remaining > 0 {
                errors.add(format!(
                    "Your remaining time for {} is {} hours and {} minutes.",
                    input.date,
                    remaining / 60,
                    remaining % 60
                ));
            } else {
                errors.add(format!("There is no time left for {}.", input.date));
            }
        }
    }

    if errors.is_empty() {
        Ok(duration)
    } else {
        Err(errors)
    }
}

/// Checks a candidate subject or tag name against the user's existing names
/// of the same kind and returns the normalized (lower-cased) form.
///
/// `existing` holds the stored names, already lower-cased; when editing, the
/// caller excludes the entity being renamed.
pub fn validate_name(name: &str, existing: &[String]) -> Result<String, ValidationErrors> {
    let mut errors = ValidationErrors::new();
    let normalized = name.to_lowercase();

    if normalized.trim().is_empty() {
        errors.add_field("name", "The name cannot be empty.");
    } else if normalized.chars().count() > MAX_NAME_CHARS {
        errors.add_field(
            "name",
            format!("The name cannot exceed {MAX_NAME_CHARS} characters."),
        );
    } else if existing.iter().any(|n| *n == normalized) {
        errors.add(format!("{normalized} already exists."));
    }

    if errors.is_empty() {
        Ok(normalized)
    } else {
        Err(errors)
    }
}
