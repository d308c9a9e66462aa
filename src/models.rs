use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub last_modified: DateTime<Utc>,
}

impl Subject {
    pub fn new(user_id: String, name: String, description: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            name,
            description,
            last_modified: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub last_modified: DateTime<Utc>,
}

impl Tag {
    pub fn new(user_id: String, name: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            name,
            last_modified: Utc::now(),
        }
    }
}

/// A single recorded duration of time spent on a subject on a specific date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeLog {
    pub id: String,
    pub user_id: String,
    pub subject_id: String,
    #[serde(default)]
    pub tag_ids: Vec<String>,
    pub date: NaiveDate,
    /// Duration in minutes, between 1 and 1440.
    pub duration: u32,
    #[serde(default)]
    pub description: String,
    pub last_modified: DateTime<Utc>,
}

impl TimeLog {
    pub fn new(
        user_id: String,
        subject_id: String,
        tag_ids: Vec<String>,
        date: NaiveDate,
        duration: u32,
        description: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            subject_id,
            tag_ids,
            date,
            duration,
            description,
            last_modified: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubjectPayload {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TagPayload {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TimeLogPayload {
    pub subject_id: String,
    #[serde(default)]
    pub tag_ids: Vec<String>,
    pub hours: u32,
    pub minutes: u32,
    /// Defaults to today when omitted.
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub description: String,
}

/// A time log joined with its subject and tag names for display.
#[derive(Debug, Serialize, Deserialize)]
pub struct TimeLogView {
    pub id: String,
    pub date: NaiveDate,
    pub subject: String,
    pub tags: Vec<String>,
    pub duration: u32,
    pub description: String,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubjectListResponse {
    pub subjects: Vec<Subject>,
    pub page: usize,
    pub total_pages: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TagListResponse {
    pub tags: Vec<Tag>,
    pub page: usize,
    pub total_pages: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TimeLogListResponse {
    pub timelogs: Vec<TimeLogView>,
    pub page: usize,
    pub total_pages: usize,
}

/// Chart-ready series in the shape the charting frontend consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub datasets: Vec<Dataset>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub data: Vec<f64>,
    #[serde(rename = "backgroundColor")]
    pub background_color: DatasetColor,
}

/// One color for a whole dataset (stacked charts) or one per slice
/// (share-of-total charts).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DatasetColor {
    Single(String),
    PerValue(Vec<String>),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HomeResponse {
    pub min_date: Option<NaiveDate>,
    pub max_date: Option<NaiveDate>,
    pub date_based: ChartData,
    pub subject_based: ChartData,
    pub tag_based: ChartData,
    pub timelogs: Vec<TimeLogView>,
}
