use crate::models::{Question, QuestionDraft, Subject};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Persistence for subjects and questions.
#[async_trait]
pub trait QuestionStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn version(&self) -> Result<String, StoreError>;

    async fn list_subjects(&self) -> Result<Vec<Subject>, StoreError>;
    async fn get_subject(&self, id: i64) -> Result<Subject, StoreError>;
    /// Names are unique; a duplicate is a [`StoreError::Conflict`].
    async fn create_subject(&self, name: &str) -> Result<Subject, StoreError>;
    async fn rename_subject(&self, id: i64, name: &str) -> Result<Subject, StoreError>;
    /// Also removes every question of the subject.
    async fn delete_subject(&self, id: i64) -> Result<(), StoreError>;

    async fn list_questions(&self, subject_id: i64) -> Result<Vec<Question>, StoreError>;
    async fn get_question(&self, id: i64) -> Result<Question, StoreError>;
    async fn create_question(&self, draft: QuestionDraft) -> Result<Question, StoreError>;
    async fn update_question(&self, question: Question) -> Result<Question, StoreError>;
    async fn delete_question(&self, id: i64) -> Result<(), StoreError>;

    /// Writes one batch of drafts and returns how many rows were created.
    async fn insert_batch(&self, drafts: &[QuestionDraft]) -> Result<usize, StoreError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistentSnapshot {
    subjects: BTreeMap<i64, Subject>,
    questions: BTreeMap<i64, Question>,
    next_subject_id: i64,
    next_question_id: i64,
}

/// Store kept in process memory, optionally mirrored to a JSON file after
/// every write. Ids grow monotonically, so map order is creation order.
pub struct InMemoryStore {
    subjects: RwLock<BTreeMap<i64, Subject>>,
    questions: RwLock<BTreeMap<i64, Question>>,
    next_subject_id: AtomicI64,
    next_question_id: AtomicI64,
    snapshot_path: Option<PathBuf>,
    // Serializes snapshot+write so a slower, older write never lands last.
    persist_lock: Mutex<()>,
}

impl InMemoryStore {
    pub fn new(snapshot_path: Option<&str>) -> Self {
        let snapshot = snapshot_path.and_then(|path| {
            let raw = std::fs::read_to_string(path).ok()?;
            match serde_json::from_str::<PersistentSnapshot>(&raw) {
                Ok(s) => Some(s),
                Err(err) => {
                    warn!("failed to read local snapshot {}: {}", path, err);
                    None
                }
            }
        });
        let snapshot = snapshot.unwrap_or_default();

        let next_subject_id = snapshot
            .next_subject_id
            .max(snapshot.subjects.keys().max().copied().unwrap_or(0) + 1);
        let next_question_id = snapshot
            .next_question_id
            .max(snapshot.questions.keys().max().copied().unwrap_or(0) + 1);

        Self {
            subjects: RwLock::new(snapshot.subjects),
            questions: RwLock::new(snapshot.questions),
            next_subject_id: AtomicI64::new(next_subject_id),
            next_question_id: AtomicI64::new(next_question_id),
            snapshot_path: snapshot_path.map(PathBuf::from),
            persist_lock: Mutex::new(()),
        }
    }

    fn next_subject_id(&self) -> i64 {
        self.next_subject_id.fetch_add(1, Ordering::SeqCst)
    }

    fn next_question_id(&self) -> i64 {
        self.next_question_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn snapshot(&self) -> PersistentSnapshot {
        PersistentSnapshot {
            subjects: self.subjects.read().await.clone(),
            questions: self.questions.read().await.clone(),
            next_subject_id: self.next_subject_id.load(Ordering::SeqCst),
            next_question_id: self.next_question_id.load(Ordering::SeqCst),
        }
    }

    async fn write_snapshot(&self, path: &Path) -> Result<(), StoreError> {
        let snapshot = self.snapshot().await;
        let serialized =
            serde_json::to_vec_pretty(&snapshot).map_err(|e| StoreError::Serialization(e.to_string()))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        // Write beside the target and rename over it so a crash never leaves torn JSON.
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, serialized)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    /// Snapshot failures are logged, not returned: the in-memory write already happened.
    async fn persist(&self, op: &str) {
        let Some(path) = self.snapshot_path.as_deref() else {
            return;
        };
        let _guard = self.persist_lock.lock().await;
        if let Err(err) = self.write_snapshot(path).await {
            warn!("failed to persist local state after {}: {}", op, err);
        }
    }
}

fn same_name(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

#[async_trait]
impl QuestionStore for InMemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn version(&self) -> Result<String, StoreError> {
        Ok(format!("in-memory {}", env!("CARGO_PKG_VERSION")))
    }

    async fn list_subjects(&self) -> Result<Vec<Subject>, StoreError> {
        Ok(self.subjects.read().await.values().cloned().collect())
    }

    async fn get_subject(&self, id: i64) -> Result<Subject, StoreError> {
        self.subjects
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("subject"))
    }

    async fn create_subject(&self, name: &str) -> Result<Subject, StoreError> {
        let subject = {
            let mut subjects = self.subjects.write().await;
            if subjects.values().any(|s| same_name(&s.name, name)) {
                return Err(StoreError::Conflict("Subject with this name already exists.".into()));
            }
            let subject = Subject {
                id: self.next_subject_id(),
                name: name.to_string(),
            };
            subjects.insert(subject.id, subject.clone());
            subject
        };
        self.persist("create_subject").await;
        Ok(subject)
    }

    async fn rename_subject(&self, id: i64, name: &str) -> Result<Subject, StoreError> {
        let subject = {
            let mut subjects = self.subjects.write().await;
            if subjects.values().any(|s| s.id != id && same_name(&s.name, name)) {
                return Err(StoreError::Conflict("Subject with this name already exists.".into()));
            }
            let subject = subjects.get_mut(&id).ok_or(StoreError::NotFound("subject"))?;
            subject.name = name.to_string();
            subject.clone()
        };
        self.persist("rename_subject").await;
        Ok(subject)
    }

    async fn delete_subject(&self, id: i64) -> Result<(), StoreError> {
        {
            let mut subjects = self.subjects.write().await;
            let mut questions = self.questions.write().await;
            subjects.remove(&id).ok_or(StoreError::NotFound("subject"))?;
            questions.retain(|_, q| q.subject_id != id);
        }
        self.persist("delete_subject").await;
        Ok(())
    }

    async fn list_questions(&self, subject_id: i64) -> Result<Vec<Question>, StoreError> {
        Ok(self
            .questions
            .read()
            .await
            .values()
            .filter(|q| q.subject_id == subject_id)
            .cloned()
            .collect())
    }

    async fn get_question(&self, id: i64) -> Result<Question, StoreError> {
        self.questions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("question"))
    }

    async fn create_question(&self, draft: QuestionDraft) -> Result<Question, StoreError> {
        let question = {
            let subjects = self.subjects.read().await;
            if !subjects.contains_key(&draft.subject_id) {
                return Err(StoreError::NotFound("subject"));
            }
            let question = Question::from_draft(self.next_question_id(), draft);
            self.questions.write().await.insert(question.id, question.clone());
            question
        };
        self.persist("create_question").await;
        Ok(question)
    }

    async fn update_question(&self, question: Question) -> Result<Question, StoreError> {
        {
            let mut questions = self.questions.write().await;
            let slot = questions
                .get_mut(&question.id)
                .ok_or(StoreError::NotFound("question"))?;
            *slot = question.clone();
        }
        self.persist("update_question").await;
        Ok(question)
    }

    async fn delete_question(&self, id: i64) -> Result<(), StoreError> {
        self.questions
            .write()
            .await
            .remove(&id)
            .ok_or(StoreError::NotFound("question"))?;
        self.persist("delete_question").await;
        Ok(())
    }

    async fn insert_batch(&self, drafts: &[QuestionDraft]) -> Result<usize, StoreError> {
        {
            let subjects = self.subjects.read().await;
            if drafts.iter().any(|d| !subjects.contains_key(&d.subject_id)) {
                return Err(StoreError::NotFound("subject"));
            }
            let mut questions = self.questions.write().await;
            for draft in drafts {
                let question = Question::from_draft(self.next_question_id(), draft.clone());
                questions.insert(question.id, question);
            }
        }
        self.persist("insert_batch").await;
        Ok(drafts.len())
    }
}
