use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the four fixed answer positions of a question.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Slot {
    A,
    B,
    C,
    D,
}

impl Slot {
    pub const ALL: [Slot; 4] = [Slot::A, Slot::B, Slot::C, Slot::D];

    pub fn as_str(self) -> &'static str {
        match self {
            Slot::A => "A",
            Slot::B => "B",
            Slot::C => "C",
            Slot::D => "D",
        }
    }

    pub fn from_index(i: usize) -> Option<Slot> {
        Self::ALL.get(i).copied()
    }

    pub fn parse(raw: &str) -> Option<Slot> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "A" => Some(Slot::A),
            "B" => Some(Slot::B),
            "C" => Some(Slot::C),
            "D" => Some(Slot::D),
            _ => None,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subject {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: i64,
    pub subject_id: i64,
    pub text: String,
    pub choice_a: String,
    pub choice_b: String,
    pub choice_c: Option<String>,
    pub choice_d: Option<String>,
    pub correct: Slot,
    pub comment: Option<String>,
}

impl Question {
    pub fn choice(&self, slot: Slot) -> Option<&str> {
        match slot {
            Slot::A => Some(self.choice_a.as_str()),
            Slot::B => Some(self.choice_b.as_str()),
            Slot::C => self.choice_c.as_deref(),
            Slot::D => self.choice_d.as_deref(),
        }
        .filter(|s| !s.trim().is_empty())
    }

    pub fn from_draft(id: i64, draft: QuestionDraft) -> Self {
        Self {
            id,
            subject_id: draft.subject_id,
            text: draft.text,
            choice_a: draft.choice_a,
            choice_b: draft.choice_b,
            choice_c: draft.choice_c,
            choice_d: draft.choice_d,
            correct: draft.correct,
            comment: draft.comment,
        }
    }
}

/// Creation payload for a question, produced by the import normalizer or
/// the admin form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDraft {
    pub subject_id: i64,
    pub text: String,
    pub choice_a: String,
    pub choice_b: String,
    pub choice_c: Option<String>,
    pub choice_d: Option<String>,
    pub correct: Slot,
    pub comment: Option<String>,
}

impl QuestionDraft {
    /// Trims every field and turns blank optional fields into `None`.
    pub fn normalized(self) -> Self {
        Self {
            subject_id: self.subject_id,
            text: self.text.trim().to_string(),
            choice_a: self.choice_a.trim().to_string(),
            choice_b: self.choice_b.trim().to_string(),
            choice_c: blank_to_none(self.choice_c),
            choice_d: blank_to_none(self.choice_d),
            correct: self.correct,
            comment: blank_to_none(self.comment),
        }
    }

    fn choice(&self, slot: Slot) -> Option<&str> {
        match slot {
            Slot::A => Some(self.choice_a.as_str()),
            Slot::B => Some(self.choice_b.as_str()),
            Slot::C => self.choice_c.as_deref(),
            Slot::D => self.choice_d.as_deref(),
        }
        .filter(|s| !s.trim().is_empty())
    }
}

/// Partial update for an existing question. The owning subject is fixed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionPatch {
    pub text: Option<String>,
    pub choice_a: Option<String>,
    pub choice_b: Option<String>,
    pub choice_c: Option<String>,
    pub choice_d: Option<String>,
    pub correct: Option<String>,
    pub comment: Option<String>,
}

impl QuestionPatch {
    /// Applies the patch on top of `current` and validates the result.
    pub fn apply(&self, current: &Question) -> Result<Question, Vec<ValidationIssue>> {
        let correct = match &self.correct {
            Some(raw) => Slot::parse(raw).ok_or_else(|| {
                vec![ValidationIssue {
                    field: "correct".into(),
                    issue: "must be one of A, B, C, D".into(),
                }]
            })?,
            None => current.correct,
        };
        // An empty string clears an optional field.
        let draft = QuestionDraft {
            subject_id: current.subject_id,
            text: self.text.clone().unwrap_or_else(|| current.text.clone()),
            choice_a: self.choice_a.clone().unwrap_or_else(|| current.choice_a.clone()),
            choice_b: self.choice_b.clone().unwrap_or_else(|| current.choice_b.clone()),
            choice_c: self.choice_c.clone().or_else(|| current.choice_c.clone()),
            choice_d: self.choice_d.clone().or_else(|| current.choice_d.clone()),
            correct,
            comment: self.comment.clone().or_else(|| current.comment.clone()),
        }
        .normalized();
        validate_draft(&draft)?;
        Ok(Question::from_draft(current.id, draft))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub issue: String,
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn validate_draft(draft: &QuestionDraft) -> Result<(), Vec<ValidationIssue>> {
    let mut issues = Vec::new();
    if draft.text.trim().is_empty() {
        issues.push(ValidationIssue {
            field: "text".into(),
            issue: "must not be empty".into(),
        });
    }
    if draft.choice_a.trim().is_empty() {
        issues.push(ValidationIssue {
            field: "choiceA".into(),
            issue: "must not be empty".into(),
        });
    }
    if draft.choice_b.trim().is_empty() {
        issues.push(ValidationIssue {
            field: "choiceB".into(),
            issue: "must not be empty".into(),
        });
    }
    if draft.choice(draft.correct).is_none() {
        issues.push(ValidationIssue {
            field: "correct".into(),
            issue: format!("slot {} has no option text", draft.correct),
        });
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

pub fn validate_subject_name(raw: &str) -> Result<String, ValidationIssue> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ValidationIssue {
            field: "name".into(),
            issue: "must not be empty".into(),
        });
    }
    if name.chars().count() > 200 {
        return Err(ValidationIssue {
            field: "name".into(),
            issue: "must be at most 200 characters".into(),
        });
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_draft() -> QuestionDraft {
        QuestionDraft {
            subject_id: 1,
            text: "If 2x + 3 = 11, what is x?".into(),
            choice_a: "4".into(),
            choice_b: "3".into(),
            choice_c: Some("5".into()),
            choice_d: None,
            correct: Slot::A,
            comment: Some("Subtract 3 then divide by 2.".into()),
        }
    }

    #[test]
    fn slot_parse_is_case_insensitive() {
        assert_eq!(Slot::parse(" c "), Some(Slot::C));
        assert_eq!(Slot::parse("E"), None);
        assert_eq!(Slot::from_index(3), Some(Slot::D));
        assert_eq!(Slot::from_index(4), None);
    }

    #[test]
    fn draft_validates() {
        assert!(validate_draft(&sample_draft()).is_ok());
    }

    #[test]
    fn correct_slot_must_have_text() {
        let mut draft = sample_draft();
        draft.correct = Slot::D;
        let issues = validate_draft(&draft).unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "correct");
    }

    #[test]
    fn blank_mandatory_fields_are_reported() {
        let mut draft = sample_draft();
        draft.text = "  ".into();
        draft.choice_b = String::new();
        let issues = validate_draft(&draft).unwrap_err();
        let fields: Vec<_> = issues.iter().map(|i| i.field.as_str()).collect();
        assert_eq!(fields, vec!["text", "choiceB"]);
    }

    #[test]
    fn patch_clears_optional_with_empty_string() {
        let q = Question::from_draft(7, sample_draft());
        let patch = QuestionPatch {
            choice_c: Some(String::new()),
            comment: Some("  ".into()),
            ..Default::default()
        };
        let updated = patch.apply(&q).unwrap();
        assert_eq!(updated.id, 7);
        assert_eq!(updated.choice_c, None);
        assert_eq!(updated.comment, None);
        assert_eq!(updated.choice_a, "4");
    }

    #[test]
    fn patch_rejects_correct_pointing_at_cleared_slot() {
        let q = Question::from_draft(7, sample_draft());
        let patch = QuestionPatch {
            choice_c: Some(String::new()),
            correct: Some("c".into()),
            ..Default::default()
        };
        assert!(patch.apply(&q).is_err());
    }

    #[test]
    fn question_serializes_camel_case() {
        let q = Question::from_draft(1, sample_draft());
        let v = serde_json::to_value(&q).unwrap();
        assert_eq!(v["choiceA"], "4");
        assert_eq!(v["correct"], "A");
        assert!(v["choiceD"].is_null());
    }

    #[test]
    fn subject_name_is_trimmed() {
        assert_eq!(validate_subject_name("  Algebra ").unwrap(), "Algebra");
        assert!(validate_subject_name("   ").is_err());
    }
}
