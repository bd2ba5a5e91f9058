//! Result persistence gateway.
//!
//! A [`ResultStore`] keeps two records per assessment: the session snapshot
//! and a result record holding the assessment status plus the final or
//! partial verdict. [`FileStore`] writes JSON files under the configured
//! store directory; [`MemoryStore`] keeps everything in memory and counts
//! writes for tests.
//!
//! Layout of a file store rooted at `.lexi`:
//!
//! ```text
//! .lexi/
//!   sessions/<assessment_id>.json
//!   results/<assessment_id>.json
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lexi_report::AssessmentResult;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{LexiError, Result};
use crate::session_state::SessionState;

/// Maximum length of an assessment identifier.
pub const MAX_ASSESSMENT_ID_LEN: usize = 128;

/// Returns `true` if `id` is a usable assessment identifier.
///
/// Identifiers are 1-128 ASCII letters, digits, `-` or `_`, which keeps them
/// safe to use as file names.
///
/// # Examples
///
/// ```
/// use lexi_orchestrator::store::is_valid_assessment_id;
///
/// assert!(is_valid_assessment_id("asm_42-b"));
/// assert!(!is_valid_assessment_id("../etc/passwd"));
/// assert!(!is_valid_assessment_id(""));
/// ```
#[must_use]
pub fn is_valid_assessment_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ASSESSMENT_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

// ============================================================================
// Records
// ============================================================================

/// Lifecycle status of an assessment in the record store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentStatus {
    /// Created, never connected.
    #[default]
    Pending,
    /// A session is (or was last) running.
    InProgress,
    /// Ran to its normal end.
    Completed,
    /// Ended early; any stored verdict is provisional.
    Interrupted,
}

impl std::fmt::Display for AssessmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// The result record kept per assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Assessment this record belongs to.
    pub assessment_id: String,
    /// Current status.
    pub status: AssessmentStatus,
    /// Latest verdict, final or partial.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AssessmentResult>,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
}

impl ResultRecord {
    fn new(assessment_id: &str) -> Self {
        Self {
            assessment_id: assessment_id.to_string(),
            status: AssessmentStatus::Pending,
            result: None,
            updated_at: Utc::now(),
        }
    }
}

// ============================================================================
// Store Trait
// ============================================================================

/// Durable storage for session snapshots and result records.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Loads the snapshot of an assessment, if one was saved.
    async fn load_session(&self, assessment_id: &str) -> Result<Option<SessionState>>;

    /// Creates or replaces the snapshot of `state.assessment_id`.
    async fn save_session(&self, state: &SessionState) -> Result<()>;

    /// Loads the result record of an assessment, if any.
    async fn load_record(&self, assessment_id: &str) -> Result<Option<ResultRecord>>;

    /// Stores a verdict and sets the status to `Completed` or `Interrupted`
    /// according to `result.completed`.
    async fn save_result(&self, result: &AssessmentResult) -> Result<()>;

    /// Updates the status, creating the record if needed.
    async fn set_status(&self, assessment_id: &str, status: AssessmentStatus) -> Result<()>;
}

fn status_for(result: &AssessmentResult) -> AssessmentStatus {
    if result.completed {
        AssessmentStatus::Completed
    } else {
        AssessmentStatus::Interrupted
    }
}

// ============================================================================
// FileStore
// ============================================================================

/// JSON files under a root directory, written atomically.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Creates a store rooted at `root`. Directories are created on first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, dir: &str, assessment_id: &str) -> Result<PathBuf> {
        if !is_valid_assessment_id(assessment_id) {
            return Err(LexiError::store(
                self.root.join(dir),
                format!("invalid assessment id '{assessment_id}'"),
            ));
        }
        Ok(self.root.join(dir).join(format!("{assessment_id}.json")))
    }

    fn session_path(&self, assessment_id: &str) -> Result<PathBuf> {
        self.path("sessions", assessment_id)
    }

    fn record_path(&self, assessment_id: &str) -> Result<PathBuf> {
        self.path("results", assessment_id)
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        let contents = match fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(LexiError::store(path, e.to_string())),
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| LexiError::store(path, format!("corrupted record: {e}")))
    }

    async fn write_json<T: Serialize + Sync>(path: &Path, value: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| LexiError::store(parent, e.to_string()))?;
        }

        let json = serde_json::to_string_pretty(value)?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, json.as_bytes())
            .await
            .map_err(|e| LexiError::store(&temp_path, e.to_string()))?;
        fs::rename(&temp_path, path)
            .await
            .map_err(|e| LexiError::store(path, e.to_string()))?;

        debug!(path = %path.display(), "Wrote record");
        Ok(())
    }

    async fn update_record<F>(&self, assessment_id: &str, update: F) -> Result<()>
    where
        F: FnOnce(&mut ResultRecord) + Send,
    {
        let path = self.record_path(assessment_id)?;
        let mut record = Self::read_json::<ResultRecord>(&path)
            .await?
            .unwrap_or_else(|| ResultRecord::new(assessment_id));
        update(&mut record);
        record.updated_at = Utc::now();
        Self::write_json(&path, &record).await
    }
}

#[async_trait]
impl ResultStore for FileStore {
    async fn load_session(&self, assessment_id: &str) -> Result<Option<SessionState>> {
        Self::read_json(&self.session_path(assessment_id)?).await
    }

    async fn save_session(&self, state: &SessionState) -> Result<()> {
        Self::write_json(&self.session_path(&state.assessment_id)?, state).await
    }

    async fn load_record(&self, assessment_id: &str) -> Result<Option<ResultRecord>> {
        Self::read_json(&self.record_path(assessment_id)?).await
    }

    async fn save_result(&self, result: &AssessmentResult) -> Result<()> {
        let status = status_for(result);
        let result = result.clone();
        self.update_record(&result.assessment_id.clone(), move |record| {
            record.status = status;
            record.result = Some(result);
        })
        .await
    }

    async fn set_status(&self, assessment_id: &str, status: AssessmentStatus) -> Result<()> {
        self.update_record(assessment_id, |record| record.status = status)
            .await
    }
}

// ============================================================================
// MemoryStore
// ============================================================================

/// In-memory store that counts writes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<String, SessionState>>,
    records: Mutex<HashMap<String, ResultRecord>>,
    session_writes: AtomicUsize,
    result_writes: AtomicUsize,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `save_session` calls so far.
    #[must_use]
    pub fn session_writes(&self) -> usize {
        self.session_writes.load(Ordering::SeqCst)
    }

    /// Number of `save_result` calls so far.
    #[must_use]
    pub fn result_writes(&self) -> usize {
        self.result_writes.load(Ordering::SeqCst)
    }

    /// Stored verdict of an assessment, if any.
    pub async fn result(&self, assessment_id: &str) -> Option<AssessmentResult> {
        self.records
            .lock()
            .await
            .get(assessment_id)
            .and_then(|record| record.result.clone())
    }

    /// Stored status of an assessment, if any.
    pub async fn status(&self, assessment_id: &str) -> Option<AssessmentStatus> {
        self.records
            .lock()
            .await
            .get(assessment_id)
            .map(|record| record.status)
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn load_session(&self, assessment_id: &str) -> Result<Option<SessionState>> {
        Ok(self.sessions.lock().await.get(assessment_id).cloned())
    }

    async fn save_session(&self, state: &SessionState) -> Result<()> {
        self.session_writes.fetch_add(1, Ordering::SeqCst);
        self.sessions
            .lock()
            .await
            .insert(state.assessment_id.clone(), state.clone());
        Ok(())
    }

    async fn load_record(&self, assessment_id: &str) -> Result<Option<ResultRecord>> {
        Ok(self.records.lock().await.get(assessment_id).cloned())
    }

    async fn save_result(&self, result: &AssessmentResult) -> Result<()> {
        self.result_writes.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.lock().await;
        let record = records
            .entry(result.assessment_id.clone())
            .or_insert_with(|| ResultRecord::new(&result.assessment_id));
        record.status = status_for(result);
        record.result = Some(result.clone());
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn set_status(&self, assessment_id: &str, status: AssessmentStatus) -> Result<()> {
        let mut records = self.records.lock().await;
        let record = records
            .entry(assessment_id.to_string())
            .or_insert_with(|| ResultRecord::new(assessment_id));
        record.status = status;
        record.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use lexi_report::{aggregate, ExerciseScores};

    use super::*;
    use crate::difficulty::Difficulty;

    fn temp_root(name: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!("lexi_store_{name}_{}", std::process::id()));
        std::fs::remove_dir_all(&root).ok();
        root
    }

    fn partial_result(id: &str) -> AssessmentResult {
        AssessmentResult::new(
            id,
            "Spanish",
            false,
            aggregate(&[ExerciseScores::speaking(90.0, 92.0)]),
        )
    }

    #[test]
    fn test_assessment_id_validation() {
        assert!(is_valid_assessment_id("abc"));
        assert!(is_valid_assessment_id("A-1_b"));
        assert!(!is_valid_assessment_id("a/b"));
        assert!(!is_valid_assessment_id("a b"));
        assert!(!is_valid_assessment_id(".."));
        assert!(!is_valid_assessment_id(&"x".repeat(MAX_ASSESSMENT_ID_LEN + 1)));
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&AssessmentStatus::InProgress).unwrap(),
            r#""in_progress""#
        );
        assert_eq!(AssessmentStatus::Interrupted.to_string(), "interrupted");
    }

    #[tokio::test]
    async fn test_file_store_session_round_trip() {
        let root = temp_root("session");
        let store = FileStore::new(&root);
        let state = SessionState::new("asm_1", "Spanish", Difficulty::new(3), Utc::now());

        assert!(store.load_session("asm_1").await.unwrap().is_none());
        store.save_session(&state).await.unwrap();

        let loaded = store.load_session("asm_1").await.unwrap().unwrap();
        assert_eq!(loaded, state);
        assert!(root.join("sessions/asm_1.json").exists());
        assert!(!root.join("sessions/asm_1.json.tmp").exists());

        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn test_file_store_status_then_result() {
        let root = temp_root("result");
        let store = FileStore::new(&root);

        store
            .set_status("asm_2", AssessmentStatus::InProgress)
            .await
            .unwrap();
        let record = store.load_record("asm_2").await.unwrap().unwrap();
        assert_eq!(record.status, AssessmentStatus::InProgress);
        assert!(record.result.is_none());

        store.save_result(&partial_result("asm_2")).await.unwrap();
        let record = store.load_record("asm_2").await.unwrap().unwrap();
        assert_eq!(record.status, AssessmentStatus::Interrupted);
        assert!(!record.result.unwrap().completed);

        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn test_file_store_rejects_unsafe_ids() {
        let store = FileStore::new(temp_root("unsafe"));
        let err = store.load_session("../../etc/passwd").await.unwrap_err();
        assert!(matches!(err, LexiError::StoreFailure { .. }));
    }

    #[tokio::test]
    async fn test_file_store_reports_corrupted_records() {
        let root = temp_root("corrupt");
        std::fs::create_dir_all(root.join("sessions")).unwrap();
        std::fs::write(root.join("sessions/asm_3.json"), "{ nope").unwrap();

        let store = FileStore::new(&root);
        let err = store.load_session("asm_3").await.unwrap_err();
        assert!(err.to_string().contains("corrupted record"));

        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn test_memory_store_counts_writes() {
        let store = MemoryStore::new();
        let state = SessionState::new("asm_4", "French", Difficulty::new(3), Utc::now());

        store.save_session(&state).await.unwrap();
        store.save_session(&state).await.unwrap();
        store.save_result(&partial_result("asm_4")).await.unwrap();

        assert_eq!(store.session_writes(), 2);
        assert_eq!(store.result_writes(), 1);
        assert_eq!(
            store.status("asm_4").await,
            Some(AssessmentStatus::Interrupted)
        );
        assert!(store.result("asm_4").await.is_some());
    }
}
