use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::{ApiError, Result};
use crate::models::{Subject, Tag, TimeLog};
use crate::validation::{
    validate_name, validate_timelog, TimeLogInput, ValidationErrors, MAX_DESCRIPTION_CHARS,
};

const SUBJECTS_FILE: &str = "subjects.json";
const TAGS_FILE: &str = "tags.json";
const TIMELOGS_FILE: &str = "timelogs.json";

pub const PER_PAGE: usize = 10;

/// Persistent store for the users' subjects, tags and time logs.
///
/// Collections live behind `RwLock`s and are rewritten to JSON files on every
/// mutation. Validation that depends on existing records (name uniqueness,
/// the daily budget) runs under the same write guard as the insert, so
/// concurrent submissions cannot slip past the checks.
pub struct TrackerStorage {
    data_dir: PathBuf,
    subjects: RwLock<Vec<Subject>>,
    tags: RwLock<Vec<Tag>>,
    timelogs: RwLock<Vec<TimeLog>>,
}

impl TrackerStorage {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("creating data directory {}", data_dir.display()))?;

        Ok(Self {
            subjects: RwLock::new(load_collection(&data_dir.join(SUBJECTS_FILE))?),
            tags: RwLock::new(load_collection(&data_dir.join(TAGS_FILE))?),
            timelogs: RwLock::new(load_collection(&data_dir.join(TIMELOGS_FILE))?),
            data_dir,
        })
    }

    // Subjects

    pub async fn create_subject(
        &self,
        user_id: &str,
        name: &str,
        description: &str,
    ) -> Result<Subject> {
        let mut subjects = self.subjects.write().await;

        let existing: Vec<String> = subjects
            .iter()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.name.clone())
            .collect();
        let name = validate_name(name, &existing)?;
        check_description(description)?;

        let subject = Subject::new(user_id.to_string(), name, description.to_string());
        subjects.push(subject.clone());
        self.save(SUBJECTS_FILE, &subjects)?;
        Ok(subject)
    }

    pub async fn update_subject(
        &self,
        user_id: &str,
        id: &str,
        name: &str,
        description: &str,
    ) -> Result<Subject> {
        let mut subjects = self.subjects.write().await;

        let position = subjects
            .iter()
            .position(|s| s.user_id == user_id && s.id == id)
            .ok_or(ApiError::NotFound("subject"))?;
        // The subject being renamed is excluded from the duplicate scan.
        let existing: Vec<String> = subjects
            .iter()
            .filter(|s| s.user_id == user_id && s.id != id)
            .map(|s| s.name.clone())
            .collect();
        let name = validate_name(name, &existing)?;
        check_description(description)?;

        let subject = &mut subjects[position];
        subject.name = name;
        subject.description = description.to_string();
        subject.last_modified = Utc::now();
        let subject = subject.clone();

        self.save(SUBJECTS_FILE, &subjects)?;
        Ok(subject)
    }

    /// Deletes a subject and every time log recorded against it.
    pub async fn delete_subject(&self, user_id: &str, id: &str) -> Result<Subject> {
        let mut subjects = self.subjects.write().await;
        let mut timelogs = self.timelogs.write().await;

        let position = subjects
            .iter()
            .position(|s| s.user_id == user_id && s.id == id)
            .ok_or(ApiError::NotFound("subject"))?;
        let subject = subjects.remove(position);
        timelogs.retain(|log| !(log.user_id == user_id && log.subject_id == subject.id));

        self.save(SUBJECTS_FILE, &subjects)?;
        self.save(TIMELOGS_FILE, &timelogs)?;
        Ok(subject)
    }

    pub async fn subjects_for_user(&self, user_id: &str) -> Result<Vec<Subject>> {
        let subjects = self.subjects.read().await;
        let mut owned: Vec<Subject> = subjects
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(owned)
    }

    pub async fn get_subject(&self, user_id: &str, id: &str) -> Result<Subject> {
        let subjects = self.subjects.read().await;
        subjects
            .iter()
            .find(|s| s.user_id == user_id && s.id == id)
            .cloned()
            .ok_or(ApiError::NotFound("subject"))
    }

    // Tags

    pub async fn create_tag(&self, user_id: &str, name: &str) -> Result<Tag> {
        let mut tags = self.tags.write().await;

        let existing: Vec<String> = tags
            .iter()
            .filter(|t| t.user_id == user_id)
            .map(|t| t.name.clone())
            .collect();
        let name = validate_name(name, &existing)?;

        let tag = Tag::new(user_id.to_string(), name);
        tags.push(tag.clone());
        self.save(TAGS_FILE, &tags)?;
        Ok(tag)
    }

    pub async fn update_tag(&self, user_id: &str, id: &str, name: &str) -> Result<Tag> {
        let mut tags = self.tags.write().await;

        let position = tags
            .iter()
            .position(|t| t.user_id == user_id && t.id == id)
            .ok_or(ApiError::NotFound("tag"))?;
        let existing: Vec<String> = tags
            .iter()
            .filter(|t| t.user_id == user_id && t.id != id)
            .map(|t| t.name.clone())
            .collect();
        let name = validate_name(name, &existing)?;

        let tag = &mut tags[position];
        tag.name = name;
        tag.last_modified = Utc::now();
        let tag = tag.clone();

        self.save(TAGS_FILE, &tags)?;
        Ok(tag)
    }

    /// Deletes a tag and detaches it from every time log; the logs survive.
    pub async fn delete_tag(&self, user_id: &str, id: &str) -> Result<Tag> {
        let mut tags = self.tags.write().await;
        let mut timelogs = self.timelogs.write().await;

        let position = tags
            .iter()
            .position(|t| t.user_id == user_id && t.id == id)
            .ok_or(ApiError::NotFound("tag"))?;
        let tag = tags.remove(position);
        for log in timelogs.iter_mut().filter(|log| log.user_id == user_id) {
            log.tag_ids.retain(|tag_id| *tag_id != tag.id);
        }

        self.save(TAGS_FILE, &tags)?;
        self.save(TIMELOGS_FILE, &timelogs)?;
        Ok(tag)
    }

    pub async fn tags_for_user(&self, user_id: &str) -> Result<Vec<Tag>> {
        let tags = self.tags.read().await;
        let mut owned: Vec<Tag> = tags
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(owned)
    }

    pub async fn get_tag(&self, user_id: &str, id: &str) -> Result<Tag> {
        let tags = self.tags.read().await;
        tags.iter()
            .find(|t| t.user_id == user_id && t.id == id)
            .cloned()
            .ok_or(ApiError::NotFound("tag"))
    }

    // Time logs

    pub async fn create_timelog(&self, user_id: &str, input: TimeLogInput) -> Result<TimeLog> {
        let subjects = self.subjects.read().await;
        let tags = self.tags.read().await;
        let mut timelogs = self.timelogs.write().await;

        let subject_ids: Vec<String> = subjects
            .iter()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.id.clone())
            .collect();
        let tag_ids: Vec<String> = tags
            .iter()
            .filter(|t| t.user_id == user_id)
            .map(|t| t.id.clone())
            .collect();
        let previous_total: u32 = timelogs
            .iter()
            .filter(|log| log.user_id == user_id && log.date == input.date)
            .map(|log| log.duration)
            .sum();

        let duration = validate_timelog(
            &input,
            &subject_ids,
            &tag_ids,
            previous_total,
            Utc::now().date_naive(),
        )?;

        let log = TimeLog::new(
            user_id.to_string(),
            input.subject_id,
            input.tag_ids,
            input.date,
            duration,
            input.description,
        );
        timelogs.push(log.clone());
        self.save(TIMELOGS_FILE, &timelogs)?;
        Ok(log)
    }

    pub async fn update_timelog(
        &self,
        user_id: &str,
        id: &str,
        input: TimeLogInput,
    ) -> Result<TimeLog> {
        let subjects = self.subjects.read().await;
        let tags = self.tags.read().await;
        let mut timelogs = self.timelogs.write().await;

        let position = timelogs
            .iter()
            .position(|log| log.user_id == user_id && log.id == id)
            .ok_or(ApiError::NotFound("time log"))?;

        let subject_ids: Vec<String> = subjects
            .iter()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.id.clone())
            .collect();
        let tag_ids: Vec<String> = tags
            .iter()
            .filter(|t| t.user_id == user_id)
            .map(|t| t.id.clone())
            .collect();
        // The log being edited does not count against its own day.
        let previous_total: u32 = timelogs
            .iter()
            .filter(|log| log.user_id == user_id && log.date == input.date && log.id != id)
            .map(|log| log.duration)
            .sum();

        let duration = validate_timelog(
            &input,
            &subject_ids,
            &tag_ids,
            previous_total,
            Utc::now().date_naive(),
        )?;

        let log = &mut timelogs[position];
        log.subject_id = input.subject_id;
        log.tag_ids = input.tag_ids;
        log.date = input.date;
        log.duration = duration;
        log.description = input.description;
        log.last_modified = Utc::now();
        let log = log.clone();

        self.save(TIMELOGS_FILE, &timelogs)?;
        Ok(log)
    }

    pub async fn delete_timelog(&self, user_id: &str, id: &str) -> Result<TimeLog> {
        let mut timelogs = self.timelogs.write().await;
        let position = timelogs
            .iter()
            .position(|log| log.user_id == user_id && log.id == id)
            .ok_or(ApiError::NotFound("time log"))?;
        let log = timelogs.remove(position);
        self.save(TIMELOGS_FILE, &timelogs)?;
        Ok(log)
    }

    pub async fn timelogs_for_user(&self, user_id: &str) -> Result<Vec<TimeLog>> {
        let timelogs = self.timelogs.read().await;
        let mut owned: Vec<TimeLog> = timelogs
            .iter()
            .filter(|log| log.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(owned)
    }

    pub async fn get_timelog(&self, user_id: &str, id: &str) -> Result<TimeLog> {
        let timelogs = self.timelogs.read().await;
        timelogs
            .iter()
            .find(|log| log.user_id == user_id && log.id == id)
            .cloned()
            .ok_or(ApiError::NotFound("time log"))
    }

    pub async fn timelogs_in_range(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<TimeLog>> {
        let timelogs = self.timelogs.read().await;
        Ok(timelogs
            .iter()
            .filter(|log| log.user_id == user_id && log.date >= start && log.date <= end)
            .cloned()
            .collect())
    }

    /// The user's earliest and latest log dates, `None` with no records.
    pub async fn date_bounds(&self, user_id: &str) -> Result<Option<(NaiveDate, NaiveDate)>> {
        let timelogs = self.timelogs.read().await;
        let mut bounds = None;
        for log in timelogs.iter().filter(|log| log.user_id == user_id) {
            bounds = match bounds {
                None => Some((log.date, log.date)),
                Some((min, max)) => Some((min.min(log.date), max.max(log.date))),
            };
        }
        Ok(bounds)
    }

    /// Removes everything the user owns; part of the account-deletion cascade.
    pub async fn delete_user_data(&self, user_id: &str) -> Result<()> {
        let mut subjects = self.subjects.write().await;
        let mut tags = self.tags.write().await;
        let mut timelogs = self.timelogs.write().await;

        subjects.retain(|s| s.user_id != user_id);
        tags.retain(|t| t.user_id != user_id);
        timelogs.retain(|log| log.user_id != user_id);

        self.save(SUBJECTS_FILE, &subjects)?;
        self.save(TAGS_FILE, &tags)?;
        self.save(TIMELOGS_FILE, &timelogs)?;
        Ok(())
    }

    fn save<T: Serialize>(&self, file: &str, items: &[T]) -> Result<()> {
        save_collection(&self.data_dir.join(file), items)
    }
}

pub(crate) fn load_collection<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let items =
        serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
    Ok(items)
}

pub(crate) fn save_collection<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    let json = serde_json::to_string_pretty(items).context("serializing collection")?;
    fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn check_description(description: &str) -> Result<()> {
    if description.chars().count() > MAX_DESCRIPTION_CHARS {
        let mut errors = ValidationErrors::new();
        errors.add_field(
            "description",
            format!("The description cannot exceed {MAX_DESCRIPTION_CHARS} characters."),
        );
        return Err(errors.into());
    }
    Ok(())
}

/// Clamps `page` to the valid range and returns the page slice with the
/// resolved page number and page count.
pub fn paginate<T: Clone>(items: &[T], page: Option<usize>) -> (Vec<T>, usize, usize) {
    let total_pages = items.len().div_ceil(PER_PAGE).max(1);
    let page = page.unwrap_or(1).clamp(1, total_pages);
    let slice = items
        .iter()
        .skip((page - 1) * PER_PAGE)
        .take(PER_PAGE)
        .cloned()
        .collect();
    (slice, page, total_pages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    fn storage() -> (tempfile::TempDir, TrackerStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = TrackerStorage::new(dir.path()).unwrap();
        (dir, storage)
    }

    fn log_input(subject_id: &str, hours: u32, minutes: u32, date: NaiveDate) -> TimeLogInput {
        TimeLogInput {
            subject_id: subject_id.to_string(),
            tag_ids: Vec::new(),
            hours,
            minutes,
            date,
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn subject_names_are_stored_lowercased_and_unique_per_user() {
        let (_dir, storage) = storage();
        let subject = storage
            .create_subject("user-1", "Reading", "")
            .await
            .unwrap();
        assert_eq!(subject.name, "reading");

        let err = storage
            .create_subject("user-1", "READING", "")
            .await
            .unwrap_err();
        match err {
            ApiError::Validation(errors) => {
                assert_eq!(errors.non_field_errors, vec!["reading already exists."]);
            }
            other => panic!("expected validation error, got {other:?}"),
        }

        // The same name is fine for another user.
        storage
            .create_subject("user-2", "Reading", "")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn renaming_a_subject_to_its_own_name_is_allowed() {
        let (_dir, storage) = storage();
        let subject = storage
            .create_subject("user-1", "reading", "")
            .await
            .unwrap();
        let updated = storage
            .update_subject("user-1", &subject.id, "Reading", "books")
            .await
            .unwrap();
        assert_eq!(updated.name, "reading");
        assert_eq!(updated.description, "books");
    }

    #[tokio::test]
    async fn deleting_a_subject_cascades_to_its_timelogs() {
        let (_dir, storage) = storage();
        let keep = storage.create_subject("user-1", "keep", "").await.unwrap();
        let gone = storage.create_subject("user-1", "gone", "").await.unwrap();
        storage
            .create_timelog("user-1", log_input(&keep.id, 1, 0, today()))
            .await
            .unwrap();
        storage
            .create_timelog("user-1", log_input(&gone.id, 2, 0, today()))
            .await
            .unwrap();

        storage.delete_subject("user-1", &gone.id).await.unwrap();

        let remaining = storage.timelogs_for_user("user-1").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].subject_id, keep.id);
    }

    #[tokio::test]
    async fn deleting_a_tag_detaches_it_but_keeps_the_log() {
        let (_dir, storage) = storage();
        let subject = storage
            .create_subject("user-1", "reading", "")
            .await
            .unwrap();
        let tag = storage.create_tag("user-1", "evening").await.unwrap();
        let mut input = log_input(&subject.id, 1, 0, today());
        input.tag_ids = vec![tag.id.clone()];
        let log = storage.create_timelog("user-1", input).await.unwrap();
        assert_eq!(log.tag_ids, vec![tag.id.clone()]);

        storage.delete_tag("user-1", &tag.id).await.unwrap();

        let log = storage.get_timelog("user-1", &log.id).await.unwrap();
        assert!(log.tag_ids.is_empty());
    }

    #[tokio::test]
    async fn daily_budget_is_enforced_across_submissions() {
        let (_dir, storage) = storage();
        let subject = storage
            .create_subject("user-1", "reading", "")
            .await
            .unwrap();
        storage
            .create_timelog("user-1", log_input(&subject.id, 12, 0, today()))
            .await
            .unwrap();

        let err = storage
            .create_timelog("user-1", log_input(&subject.id, 12, 1, today()))
            .await
            .unwrap_err();
        match err {
            ApiError::Validation(errors) => {
                assert_eq!(errors.non_field_errors.len(), 1);
                assert!(errors.non_field_errors[0].contains("12 hours and 0 minutes"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }

        // Exactly filling the day is still allowed.
        storage
            .create_timelog("user-1", log_input(&subject.id, 12, 0, today()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn editing_a_log_excludes_it_from_its_own_budget() {
        let (_dir, storage) = storage();
        let subject = storage
            .create_subject("user-1", "reading", "")
            .await
            .unwrap();
        let log = storage
            .create_timelog("user-1", log_input(&subject.id, 23, 0, today()))
            .await
            .unwrap();

        // Growing the same log to 24 hours fits because its old duration no
        // longer counts against the day.
        let updated = storage
            .update_timelog("user-1", &log.id, log_input(&subject.id, 24, 0, today()))
            .await
            .unwrap();
        assert_eq!(updated.duration, 1440);
    }

    #[tokio::test]
    async fn foreign_subject_is_rejected() {
        let (_dir, storage) = storage();
        let other = storage
            .create_subject("user-2", "theirs", "")
            .await
            .unwrap();
        let err = storage
            .create_timelog("user-1", log_input(&other.id, 1, 0, today()))
            .await
            .unwrap_err();
        match err {
            ApiError::Validation(errors) => assert!(errors.errors.contains_key("subject")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn listings_are_most_recently_modified_first() {
        let (_dir, storage) = storage();
        let first = storage.create_subject("user-1", "first", "").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = storage
            .create_subject("user-1", "second", "")
            .await
            .unwrap();

        let listed = storage.subjects_for_user("user-1").await.unwrap();
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);

        // Touching the older subject moves it back to the front.
        tokio::time::sleep(Duration::from_millis(5)).await;
        storage
            .update_subject("user-1", &first.id, "first", "touched")
            .await
            .unwrap();
        let listed = storage.subjects_for_user("user-1").await.unwrap();
        assert_eq!(listed[0].id, first.id);
    }

    #[tokio::test]
    async fn date_bounds_track_min_and_max() {
        let (_dir, storage) = storage();
        assert_eq!(storage.date_bounds("user-1").await.unwrap(), None);

        let subject = storage
            .create_subject("user-1", "reading", "")
            .await
            .unwrap();
        let earlier = today() - chrono::Duration::days(3);
        storage
            .create_timelog("user-1", log_input(&subject.id, 1, 0, earlier))
            .await
            .unwrap();
        storage
            .create_timelog("user-1", log_input(&subject.id, 1, 0, today()))
            .await
            .unwrap();

        assert_eq!(
            storage.date_bounds("user-1").await.unwrap(),
            Some((earlier, today()))
        );
    }

    #[tokio::test]
    async fn collections_survive_a_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let subject_id = {
            let storage = TrackerStorage::new(dir.path()).unwrap();
            let subject = storage
                .create_subject("user-1", "reading", "")
                .await
                .unwrap();
            storage
                .create_timelog("user-1", log_input(&subject.id, 1, 30, today()))
                .await
                .unwrap();
            subject.id
        };

        let storage = TrackerStorage::new(dir.path()).unwrap();
        let subjects = storage.subjects_for_user("user-1").await.unwrap();
        assert_eq!(subjects.len(), 1);
        assert_eq!(subjects[0].id, subject_id);
        let logs = storage.timelogs_for_user("user-1").await.unwrap();
        assert_eq!(logs[0].duration, 90);
    }

    #[tokio::test]
    async fn delete_user_data_removes_everything_owned() {
        let (_dir, storage) = storage();
        let subject = storage.create_subject("user-1", "mine", "").await.unwrap();
        storage.create_tag("user-1", "mine").await.unwrap();
        storage
            .create_timelog("user-1", log_input(&subject.id, 1, 0, today()))
            .await
            .unwrap();
        let theirs = storage
            .create_subject("user-2", "theirs", "")
            .await
            .unwrap();

        storage.delete_user_data("user-1").await.unwrap();

        assert!(storage
            .subjects_for_user("user-1")
            .await
            .unwrap()
            .is_empty());
        assert!(storage.tags_for_user("user-1").await.unwrap().is_empty());
        assert!(storage
            .timelogs_for_user("user-1")
            .await
            .unwrap()
            .is_empty());
        // Other users are untouched.
        assert_eq!(
            storage.subjects_for_user("user-2").await.unwrap()[0].id,
            theirs.id
        );
    }

    #[test]
    fn pagination_clamps_and_slices() {
        let items: Vec<u32> = (0..25).collect();
        let (page_items, page, total_pages) = paginate(&items, None);
        assert_eq!((page, total_pages), (1, 3));
        assert_eq!(page_items, (0..10).collect::<Vec<u32>>());

        let (page_items, page, _) = paginate(&items, Some(3));
        assert_eq!(page, 3);
        assert_eq!(page_items, (20..25).collect::<Vec<u32>>());

        let (_, page, _) = paginate(&items, Some(99));
        assert_eq!(page, 3);

        let (page_items, page, total_pages) = paginate(&Vec::<u32>::new(), Some(2));
        assert!(page_items.is_empty());
        assert_eq!((page, total_pages), (1, 1));
    }
}
