//! Quiz sessions: deck construction, the pick/advance state machine and scoring.
//!
//! A session lives with one learner and is never stored server-side. Build
//! one from a question pool, feed it picks, advance to the end, and the final
//! [`QuizSummary`] is what the results view shows.

use crate::models::{Question, Slot};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuizError {
    #[error("This subject has no questions yet.")]
    EmptyPool,
    #[error("option {index} does not exist; the question has {available} options")]
    InvalidOption { index: usize, available: usize },
    #[error("quiz session is already finished")]
    Finished,
    #[error("question {position} is malformed: {reason}")]
    MalformedDeck { position: usize, reason: String },
}

/// Requested deck size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawQuizSize", into = "RawQuizSize")]
pub enum QuizSize {
    Twenty,
    Thirty,
    Forty,
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawQuizSize {
    Count(u32),
    Word(String),
}

impl TryFrom<RawQuizSize> for QuizSize {
    type Error = String;

    fn try_from(raw: RawQuizSize) -> Result<Self, Self::Error> {
        let word = match raw {
            RawQuizSize::Count(n) => n.to_string(),
            RawQuizSize::Word(w) => w.trim().to_ascii_lowercase(),
        };
        match word.as_str() {
            "20" | "twenty" => Ok(QuizSize::Twenty),
            "30" | "thirty" => Ok(QuizSize::Thirty),
            "40" | "forty" => Ok(QuizSize::Forty),
            "all" => Ok(QuizSize::All),
            other => Err(format!("unsupported quiz size {other:?}; expected 20, 30, 40 or \"all\"")),
        }
    }
}

impl From<QuizSize> for RawQuizSize {
    fn from(size: QuizSize) -> Self {
        match size {
            QuizSize::Twenty => RawQuizSize::Count(20),
            QuizSize::Thirty => RawQuizSize::Count(30),
            QuizSize::Forty => RawQuizSize::Count(40),
            QuizSize::All => RawQuizSize::Word("all".into()),
        }
    }
}

impl QuizSize {
    /// How many questions to draw from a pool of `pool_len`. Never more than the pool.
    pub fn draw_count(self, pool_len: usize) -> usize {
        match self {
            QuizSize::Twenty => pool_len.min(20),
            QuizSize::Thirty => pool_len.min(30),
            QuizSize::Forty => pool_len.min(40),
            QuizSize::All => pool_len,
        }
    }
}

/// Whether correctness is shown right after each pick or only at the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevealPolicy {
    Immediate,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedOption {
    pub slot: Slot,
    pub text: String,
    pub correct: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedQuestion {
    pub question_id: i64,
    pub text: String,
    pub options: Vec<PreparedOption>,
    #[serde(default)]
    pub picked_index: Option<usize>,
    #[serde(default)]
    pub comment: Option<String>,
}

impl PreparedQuestion {
    /// Collects the non-empty slots of `question` and shuffles them.
    pub fn from_question<R: Rng + ?Sized>(question: &Question, rng: &mut R) -> Self {
        let mut options: Vec<PreparedOption> = Slot::ALL
            .iter()
            .filter_map(|&slot| {
                question.choice(slot).map(|text| PreparedOption {
                    slot,
                    text: text.to_string(),
                    correct: slot == question.correct,
                })
            })
            .collect();
        options.shuffle(rng);
        Self {
            question_id: question.id,
            text: question.text.clone(),
            options,
            picked_index: None,
            comment: question.comment.clone(),
        }
    }

    pub fn correct_index(&self) -> Option<usize> {
        self.options.iter().position(|o| o.correct)
    }

    /// Unanswered questions are never correct.
    pub fn answered_correctly(&self) -> bool {
        self.picked_index
            .and_then(|i| self.options.get(i))
            .map(|o| o.correct)
            .unwrap_or(false)
    }

    fn check(&self, position: usize) -> Result<(), QuizError> {
        let correct = self.options.iter().filter(|o| o.correct).count();
        if correct != 1 {
            return Err(QuizError::MalformedDeck {
                position,
                reason: format!("expected exactly one correct option, found {correct}"),
            });
        }
        if let Some(i) = self.picked_index {
            if i >= self.options.len() {
                return Err(QuizError::MalformedDeck {
                    position,
                    reason: format!("picked option {i} is out of range"),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SessionState {
    InProgress { position: usize },
    Finished,
}

/// Correctness feedback handed back after a pick under the immediate policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub correct: bool,
    pub correct_index: usize,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickOutcome {
    /// The pick was stored. Feedback is present only under [`RevealPolicy::Immediate`].
    Recorded(Option<Feedback>),
    /// Immediate policy: the question was already answered, nothing changed.
    Locked,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    Next { position: usize },
    Finished(QuizSummary),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryOption {
    pub slot: Slot,
    pub text: String,
    pub was_correct: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryItem {
    pub question_id: i64,
    pub question_text: String,
    pub options: Vec<SummaryOption>,
    pub picked_index: Option<usize>,
    pub answered_correctly: bool,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSummary {
    pub score: usize,
    pub total: usize,
    pub percent: f64,
    pub reveal_policy: RevealPolicy,
    pub items: Vec<SummaryItem>,
}

fn summarize(reveal: RevealPolicy, deck: &[PreparedQuestion]) -> QuizSummary {
    let items: Vec<SummaryItem> = deck
        .iter()
        .map(|q| SummaryItem {
            question_id: q.question_id,
            question_text: q.text.clone(),
            options: q
                .options
                .iter()
                .map(|o| SummaryOption {
                    slot: o.slot,
                    text: o.text.clone(),
                    was_correct: o.correct,
                })
                .collect(),
            picked_index: q.picked_index,
            answered_correctly: q.answered_correctly(),
            comment: q.comment.clone(),
        })
        .collect();
    let score = items.iter().filter(|i| i.answered_correctly).count();
    let total = items.len();
    let percent = if total == 0 {
        0.0
    } else {
        score as f64 * 100.0 / total as f64
    };
    QuizSummary {
        score,
        total,
        percent,
        reveal_policy: reveal,
        items,
    }
}

/// Scores a client-held deck. Each entry must carry exactly one correct
/// option and an in-range pick (if any).
pub fn score_deck(reveal: RevealPolicy, deck: &[PreparedQuestion]) -> Result<QuizSummary, QuizError> {
    for (position, q) in deck.iter().enumerate() {
        q.check(position)?;
    }
    Ok(summarize(reveal, deck))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSession {
    subject_id: i64,
    size: QuizSize,
    reveal: RevealPolicy,
    deck: Vec<PreparedQuestion>,
    state: SessionState,
}

impl QuizSession {
    pub fn build(pool: &[Question], size: QuizSize, reveal: RevealPolicy) -> Result<Self, QuizError> {
        Self::build_with_rng(pool, size, reveal, &mut rand::thread_rng())
    }

    /// Draws without replacement, shuffles each question's options, then
    /// shuffles the deck order.
    pub fn build_with_rng<R: Rng + ?Sized>(
        pool: &[Question],
        size: QuizSize,
        reveal: RevealPolicy,
        rng: &mut R,
    ) -> Result<Self, QuizError> {
        let mut usable: Vec<&Question> = pool.iter().filter(|q| q.choice(q.correct).is_some()).collect();
        if usable.len() < pool.len() {
            warn!(
                skipped = pool.len() - usable.len(),
                "questions whose correct slot is empty were left out of the deck"
            );
        }
        let subject_id = match usable.first() {
            Some(q) => q.subject_id,
            None => return Err(QuizError::EmptyPool),
        };

        let count = size.draw_count(usable.len());
        usable.shuffle(rng);
        usable.truncate(count);

        let mut deck: Vec<PreparedQuestion> = usable
            .into_iter()
            .map(|q| PreparedQuestion::from_question(q, rng))
            .collect();
        deck.shuffle(rng);

        debug!(subject_id, drawn = deck.len(), "quiz session built");
        Ok(Self {
            subject_id,
            size,
            reveal,
            deck,
            state: SessionState::InProgress { position: 0 },
        })
    }

    pub fn subject_id(&self) -> i64 {
        self.subject_id
    }

    pub fn size(&self) -> QuizSize {
        self.size
    }

    pub fn reveal(&self) -> RevealPolicy {
        self.reveal
    }

    pub fn deck(&self) -> &[PreparedQuestion] {
        &self.deck
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == SessionState::Finished
    }

    pub fn position(&self) -> Option<usize> {
        match self.state {
            SessionState::InProgress { position } => Some(position),
            SessionState::Finished => None,
        }
    }

    pub fn current(&self) -> Option<&PreparedQuestion> {
        self.position().and_then(|p| self.deck.get(p))
    }

    pub fn pick(&mut self, option_index: usize) -> Result<PickOutcome, QuizError> {
        let position = self.position().ok_or(QuizError::Finished)?;
        let reveal = self.reveal;
        let Some(question) = self.deck.get_mut(position) else {
            return Err(QuizError::Finished);
        };
        // The first answer is final under immediate reveal, whatever comes next.
        if reveal == RevealPolicy::Immediate && question.picked_index.is_some() {
            return Ok(PickOutcome::Locked);
        }
        if option_index >= question.options.len() {
            return Err(QuizError::InvalidOption {
                index: option_index,
                available: question.options.len(),
            });
        }
        question.picked_index = Some(option_index);

        let feedback = match reveal {
            RevealPolicy::Immediate => Some(Feedback {
                correct: question.answered_correctly(),
                correct_index: question.correct_index().unwrap_or(0),
                comment: question.comment.clone(),
            }),
            RevealPolicy::End => None,
        };
        Ok(PickOutcome::Recorded(feedback))
    }

    /// Moves to the next question, or finishes on the last one.
    pub fn advance(&mut self) -> Result<Advance, QuizError> {
        let position = self.position().ok_or(QuizError::Finished)?;
        if position + 1 < self.deck.len() {
            self.state = SessionState::InProgress { position: position + 1 };
            Ok(Advance::Next { position: position + 1 })
        } else {
            self.state = SessionState::Finished;
            Ok(Advance::Finished(summarize(self.reveal, &self.deck)))
        }
    }

    /// Correct answers so far.
    pub fn score(&self) -> usize {
        self.deck.iter().filter(|q| q.answered_correctly()).count()
    }

    /// The result, once finished.
    pub fn summary(&self) -> Option<QuizSummary> {
        self.is_finished().then(|| summarize(self.reveal, &self.deck))
    }

    /// Abandons the session. Nothing is recorded anywhere.
    pub fn cancel(self) {
        debug!(subject_id = self.subject_id, "quiz session cancelled");
    }
}
