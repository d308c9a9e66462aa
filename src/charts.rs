use std::collections::HashSet;

use chrono::NaiveDate;

use crate::models::{ChartData, Dataset, DatasetColor, Subject, Tag, TimeLog};

const PALETTE: [&str; 10] = [
    "rgb(54,162,235)",
    "rgb(255,99,132)",
    "rgb(255,206,86)",
    "rgb(75,192,192)",
    "rgb(153,102,255)",
    "rgb(255,159,64)",
    "rgb(46,204,113)",
    "rgb(231,76,60)",
    "rgb(52,73,94)",
    "rgb(241,148,138)",
];

/// Deterministic dataset color, cycling over a fixed palette.
pub fn color_for(index: usize) -> String {
    PALETTE[index % PALETTE.len()].to_string()
}

/// Minutes to hours with one decimal place, rounding half away from zero.
pub fn minutes_to_hours(minutes: u32) -> f64 {
    (minutes as f64 / 60.0 * 10.0).round() / 10.0
}

/// Builds the stacked date-based series: one dataset per subject, one data
/// point per date in `dates`.
///
/// `timelogs` must already be restricted to the reporting window; `subjects`
/// sets the dataset order. Dates no log falls on are skipped without a
/// per-subject scan.
pub fn date_based_chart(
    subjects: &[Subject],
    timelogs: &[TimeLog],
    dates: &[NaiveDate],
) -> ChartData {
    let logged_dates: HashSet<NaiveDate> = timelogs.iter().map(|log| log.date).collect();

    let datasets = subjects
        .iter()
        .enumerate()
        .map(|(index, subject)| {
            let data = dates
                .iter()
                .map(|date| {
                    if !logged_dates.contains(date) {
                        return 0.0;
                    }
                    let spent: u32 = timelogs
                        .iter()
                        .filter(|log| log.subject_id == subject.id && log.date == *date)
                        .map(|log| log.duration)
                        .sum();
                    minutes_to_hours(spent)
                })
                .collect();

            Dataset {
                label: Some(subject.name.clone()),
                data,
                background_color: DatasetColor::Single(color_for(index)),
            }
        })
        .collect();

    ChartData {
        labels: dates.iter().map(|date| date.to_string()).collect(),
        datasets,
    }
}

/// Builds the share-of-total series grouped by subject, sorted descending by
/// total hours with labels and data co-sorted.
pub fn subject_based_chart(subjects: &[Subject], timelogs: &[TimeLog]) -> ChartData {
    let totals = subjects
        .iter()
        .map(|subject| {
            let spent: u32 = timelogs
                .iter()
                .filter(|log| log.subject_id == subject.id)
                .map(|log| log.duration)
                .sum();
            (subject.name.clone(), minutes_to_hours(spent))
        })
        .collect();

    share_chart(totals)
}

/// Builds the share-of-total series grouped by tag. A log contributes its
/// full duration to every tag attached to it, so the totals across tags can
/// exceed the sum of the underlying logs.
pub fn tag_based_chart(tags: &[Tag], timelogs: &[TimeLog]) -> ChartData {
    let totals = tags
        .iter()
        .map(|tag| {
            let spent: u32 = timelogs
                .iter()
                .filter(|log| log.tag_ids.contains(&tag.id))
                .map(|log| log.duration)
                .sum();
            (tag.name.clone(), minutes_to_hours(spent))
        })
        .collect();

    share_chart(totals)
}

fn share_chart(mut totals: Vec<(String, f64)>) -> ChartData {
    // Stable sort keeps the incoming order for equal totals.
    totals.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let colors = (0..totals.len()).map(color_for).collect();
    let (labels, data) = totals.into_iter().unzip();

    ChartData {
        labels,
        datasets: vec![Dataset {
            label: None,
            data,
            background_color: DatasetColor::PerValue(colors),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::dates_between;
    use chrono::{Duration, Utc};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn subject(name: &str) -> Subject {
        Subject::new("user-1".to_string(), name.to_string(), String::new())
    }

    fn tag(name: &str) -> Tag {
        Tag::new("user-1".to_string(), name.to_string())
    }

    fn timelog(subject: &Subject, date: NaiveDate, duration: u32) -> TimeLog {
        TimeLog::new(
            "user-1".to_string(),
            subject.id.clone(),
            Vec::new(),
            date,
            duration,
            String::new(),
        )
    }

    #[test]
    fn minutes_round_to_one_decimal_half_away_from_zero() {
        assert_eq!(minutes_to_hours(90), 1.5);
        assert_eq!(minutes_to_hours(100), 1.7);
        assert_eq!(minutes_to_hours(50), 0.8);
        assert_eq!(minutes_to_hours(45), 0.8);
        assert_eq!(minutes_to_hours(121), 2.0);
        assert_eq!(minutes_to_hours(0), 0.0);
    }

    #[test]
    fn colors_are_deterministic_and_cycle() {
        assert_eq!(color_for(0), color_for(0));
        assert_eq!(color_for(3), color_for(13));
        assert_ne!(color_for(0), color_for(1));
    }

    #[test]
    fn date_based_chart_sums_per_subject_and_date() {
        let subject_a = subject("subject a");
        let subject_b = subject("subject b");
        let timelogs = vec![
            timelog(&subject_a, date(2024, 1, 1), 120),
            timelog(&subject_b, date(2024, 1, 1), 60),
            timelog(&subject_a, date(2024, 1, 2), 240),
            timelog(&subject_b, date(2024, 1, 2), 120),
        ];
        let dates = dates_between(date(2024, 1, 1), date(2024, 1, 2));

        let chart = date_based_chart(&[subject_a, subject_b], &timelogs, &dates);

        assert_eq!(chart.labels, vec!["2024-01-01", "2024-01-02"]);
        assert_eq!(chart.datasets.len(), 2);
        assert_eq!(chart.datasets[0].label.as_deref(), Some("subject a"));
        assert_eq!(chart.datasets[0].data, vec![2.0, 4.0]);
        assert_eq!(chart.datasets[1].label.as_deref(), Some("subject b"));
        assert_eq!(chart.datasets[1].data, vec![1.0, 2.0]);
    }

    #[test]
    fn date_based_chart_zero_fills_dates_without_logs() {
        let subject_a = subject("subject a");
        let timelogs = vec![
            timelog(&subject_a, date(2024, 1, 1), 60),
            timelog(&subject_a, date(2024, 1, 3), 30),
        ];
        let dates = dates_between(date(2024, 1, 1), date(2024, 1, 3));

        let chart = date_based_chart(std::slice::from_ref(&subject_a), &timelogs, &dates);

        assert_eq!(chart.datasets[0].data, vec![1.0, 0.0, 0.5]);
    }

    #[test]
    fn subject_chart_sorts_descending_by_total_hours() {
        let subject_a = subject("subject a");
        let subject_b = subject("subject b");
        let timelogs = vec![
            timelog(&subject_a, date(2024, 1, 1), 120),
            timelog(&subject_b, date(2024, 1, 1), 60),
            timelog(&subject_a, date(2024, 1, 2), 240),
            timelog(&subject_b, date(2024, 1, 2), 120),
        ];

        // subject b listed first; the sort must move subject a ahead of it.
        let chart = subject_based_chart(&[subject_b, subject_a], &timelogs);

        assert_eq!(chart.labels, vec!["subject a", "subject b"]);
        assert_eq!(chart.datasets.len(), 1);
        assert_eq!(chart.datasets[0].data, vec![6.0, 3.0]);
    }

    #[test]
    fn subject_chart_keeps_order_on_ties() {
        let mut first = subject("first");
        let mut second = subject("second");
        first.last_modified = Utc::now() - Duration::hours(1);
        second.last_modified = Utc::now();
        let timelogs = vec![
            timelog(&first, date(2024, 1, 1), 60),
            timelog(&second, date(2024, 1, 1), 60),
        ];

        let chart = subject_based_chart(&[first, second], &timelogs);

        assert_eq!(chart.labels, vec!["first", "second"]);
    }

    #[test]
    fn tag_chart_counts_full_duration_for_every_attached_tag() {
        let tag_x = tag("x");
        let tag_y = tag("y");
        let subject_a = subject("subject a");
        let mut log = timelog(&subject_a, date(2024, 1, 1), 120);
        log.tag_ids = vec![tag_x.id.clone(), tag_y.id.clone()];

        let chart = tag_based_chart(&[tag_x, tag_y], &[log]);

        // 120 minutes tagged twice: both tags report 2.0 hours, so the sum
        // across tags exceeds the underlying log total.
        assert_eq!(chart.datasets[0].data, vec![2.0, 2.0]);
        let total: f64 = chart.datasets[0].data.iter().sum();
        assert!(total > 2.0);
    }

    #[test]
    fn share_chart_colors_match_value_count() {
        let subject_a = subject("subject a");
        let subject_b = subject("subject b");
        let timelogs = vec![timelog(&subject_a, date(2024, 1, 1), 60)];

        let chart = subject_based_chart(&[subject_a, subject_b], &timelogs);

        match &chart.datasets[0].background_color {
            DatasetColor::PerValue(colors) => assert_eq!(colors.len(), 2),
            DatasetColor::Single(_) => panic!("share charts color per value"),
        }
    }

    #[test]
    fn empty_range_yields_empty_labels_and_zero_totals() {
        let subject_a = subject("subject a");
        let chart = date_based_chart(std::slice::from_ref(&subject_a), &[], &[]);
        assert!(chart.labels.is_empty());
        assert_eq!(chart.datasets[0].data, Vec::<f64>::new());

        let share = subject_based_chart(std::slice::from_ref(&subject_a), &[]);
        assert_eq!(share.datasets[0].data, vec![0.0]);
    }
}
