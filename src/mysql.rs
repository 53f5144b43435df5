use crate::models::{Question, QuestionDraft, Slot, Subject};
use crate::store::{QuestionStore, StoreError};
use async_trait::async_trait;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::{FromRow, MySql, QueryBuilder};

const QUESTION_COLUMNS: &str =
    "id, subject_id, text, choice_a, choice_b, choice_c, choice_d, correct, comment";

#[derive(Debug, FromRow)]
struct SubjectRow {
    id: i64,
    name: String,
}

impl From<SubjectRow> for Subject {
    fn from(row: SubjectRow) -> Self {
        Subject {
            id: row.id,
            name: row.name,
        }
    }
}

#[derive(Debug, FromRow)]
struct QuestionRow {
    id: i64,
    subject_id: i64,
    text: String,
    choice_a: String,
    choice_b: String,
    choice_c: Option<String>,
    choice_d: Option<String>,
    correct: String,
    comment: Option<String>,
}

impl TryFrom<QuestionRow> for Question {
    type Error = StoreError;

    fn try_from(row: QuestionRow) -> Result<Self, Self::Error> {
        let correct = Slot::parse(&row.correct).ok_or_else(|| {
            StoreError::Serialization(format!("question {} has invalid correct slot {:?}", row.id, row.correct))
        })?;
        Ok(Question {
            id: row.id,
            subject_id: row.subject_id,
            text: row.text,
            choice_a: row.choice_a,
            choice_b: row.choice_b,
            choice_c: row.choice_c,
            choice_d: row.choice_d,
            correct,
            comment: row.comment,
        })
    }
}

fn map_sqlx(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound("row"),
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict("Subject with this name already exists.".into())
        }
        other => StoreError::Backend(other.to_string()),
    }
}

fn to_id(raw: u64) -> Result<i64, StoreError> {
    i64::try_from(raw).map_err(|_| StoreError::Serialization("insert id overflow".into()))
}

/// MySQL-backed store. Schema lives in `migrations/`.
#[derive(Clone)]
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let pool = MySqlPoolOptions::new().max_connections(5).connect(url).await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

#[async_trait]
impl QuestionStore for MySqlStore {
    fn backend(&self) -> &'static str {
        "mysql"
    }

    async fn version(&self) -> Result<String, StoreError> {
        sqlx::query_scalar::<_, String>("SELECT VERSION()")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)
    }

    async fn list_subjects(&self) -> Result<Vec<Subject>, StoreError> {
        let rows = sqlx::query_as::<_, SubjectRow>("SELECT id, name FROM subjects ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(rows.into_iter().map(Subject::from).collect())
    }

    async fn get_subject(&self, id: i64) -> Result<Subject, StoreError> {
        sqlx::query_as::<_, SubjectRow>("SELECT id, name FROM subjects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?
            .map(Subject::from)
            .ok_or(StoreError::NotFound("subject"))
    }

    async fn create_subject(&self, name: &str) -> Result<Subject, StoreError> {
        let result = sqlx::query("INSERT INTO subjects (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(Subject {
            id: to_id(result.last_insert_id())?,
            name: name.to_string(),
        })
    }

    async fn rename_subject(&self, id: i64, name: &str) -> Result<Subject, StoreError> {
        self.get_subject(id).await?;
        sqlx::query("UPDATE subjects SET name = ? WHERE id = ?")
            .bind(name)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(Subject {
            id,
            name: name.to_string(),
        })
    }

    async fn delete_subject(&self, id: i64) -> Result<(), StoreError> {
        // questions go with it through ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM subjects WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("subject"));
        }
        Ok(())
    }

    async fn list_questions(&self, subject_id: i64) -> Result<Vec<Question>, StoreError> {
        let sql = format!("SELECT {QUESTION_COLUMNS} FROM questions WHERE subject_id = ? ORDER BY created_at, id");
        sqlx::query_as::<_, QuestionRow>(&sql)
            .bind(subject_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?
            .into_iter()
            .map(Question::try_from)
            .collect()
    }

    async fn get_question(&self, id: i64) -> Result<Question, StoreError> {
        let sql = format!("SELECT {QUESTION_COLUMNS} FROM questions WHERE id = ?");
        sqlx::query_as::<_, QuestionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?
            .ok_or(StoreError::NotFound("question"))
            .and_then(Question::try_from)
    }

    async fn create_question(&self, draft: QuestionDraft) -> Result<Question, StoreError> {
        self.get_subject(draft.subject_id).await?;
        let result = sqlx::query(
            "INSERT INTO questions (subject_id, text, choice_a, choice_b, choice_c, choice_d, correct, comment) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(draft.subject_id)
        .bind(&draft.text)
        .bind(&draft.choice_a)
        .bind(&draft.choice_b)
        .bind(&draft.choice_c)
        .bind(&draft.choice_d)
        .bind(draft.correct.as_str())
        .bind(&draft.comment)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(Question::from_draft(to_id(result.last_insert_id())?, draft))
    }

    async fn update_question(&self, question: Question) -> Result<Question, StoreError> {
        self.get_question(question.id).await?;
        sqlx::query(
            "UPDATE questions SET text = ?, choice_a = ?, choice_b = ?, choice_c = ?, choice_d = ?, \
             correct = ?, comment = ? WHERE id = ?",
        )
        .bind(&question.text)
        .bind(&question.choice_a)
        .bind(&question.choice_b)
        .bind(&question.choice_c)
        .bind(&question.choice_d)
        .bind(question.correct.as_str())
        .bind(&question.comment)
        .bind(question.id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(question)
    }

    async fn delete_question(&self, id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM questions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("question"));
        }
        Ok(())
    }

    async fn insert_batch(&self, drafts: &[QuestionDraft]) -> Result<usize, StoreError> {
        if drafts.is_empty() {
            return Ok(0);
        }
        let mut qb: QueryBuilder<MySql> = QueryBuilder::new(
            "INSERT INTO questions (subject_id, text, choice_a, choice_b, choice_c, choice_d, correct, comment) ",
        );
        qb.push_values(drafts.iter(), |mut row, d| {
            row.push_bind(d.subject_id)
                .push_bind(d.text.clone())
                .push_bind(d.choice_a.clone())
                .push_bind(d.choice_b.clone())
                .push_bind(d.choice_c.clone())
                .push_bind(d.choice_d.clone())
                .push_bind(d.correct.as_str())
                .push_bind(d.comment.clone());
        });
        let result = qb.build().execute(&self.pool).await.map_err(map_sqlx)?;
        Ok(result.rows_affected() as usize)
    }
}
