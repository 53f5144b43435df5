//! Demo content for a fresh install: three subjects with five questions each.
//!
//! Safe to run on every start. A subject that already has questions is left
//! alone, so admin edits survive restarts.

use crate::models::{QuestionDraft, Slot, Subject};
use crate::store::{QuestionStore, StoreError};
use tracing::info;

struct DemoQuestion {
    text: &'static str,
    choices: [&'static str; 4],
    correct: Slot,
    comment: &'static str,
}

const fn q(text: &'static str, choices: [&'static str; 4], correct: Slot, comment: &'static str) -> DemoQuestion {
    DemoQuestion {
        text,
        choices,
        correct,
        comment,
    }
}

// An empty choice means the slot is unused.
const DEMO: &[(&str, &[DemoQuestion])] = &[
    (
        "Algebra",
        &[
            q("If 2x + 3 = 11, what is x?", ["4", "3", "5", ""], Slot::A, "Subtract 3 then divide by 2."),
            q("Solve for y: 4y − 6 = 2", ["1", "2", "-1", "4"], Slot::B, "Add 6, divide by 4."),
            q(
                "What is (x+y)^2?",
                ["x^2 + 2xy + y^2", "x^2 - 2xy + y^2", "x^2 + y^2", "2xy"],
                Slot::A,
                "Binomial expansion.",
            ),
            q("Simplify: 3(a + b) - 2a", ["a + 3b", "5a + 3b", "3a + b", "a + b"], Slot::A, "Distribute and combine like terms."),
            q("If x=2, evaluate x^3 - 2x", ["4", "6", "8", "2"], Slot::B, "Compute 8 - 4."),
        ],
    ),
    (
        "Geometry",
        &[
            q("A triangle's angles sum to?", ["90°", "180°", "270°", "360°"], Slot::B, "Euclidean triangle sum."),
            q("Area of a circle with radius r?", ["πr^2", "2πr", "πd", "r^2/2"], Slot::A, "Standard formula."),
            q("A square has side s. Perimeter?", ["2s", "s^2", "4s", "8s"], Slot::C, "Perimeter = 4s."),
            q("Right triangle 3-4-5. Hypotenuse?", ["4", "5", "3", "6"], Slot::B, "Pythagorean triple."),
            q("Regular hexagon interior angle?", ["120°", "135°", "150°", "140°"], Slot::A, "(n-2)×180 / n."),
        ],
    ),
    (
        "Physics",
        &[
            q(
                "Acceleration due to gravity on Earth?",
                ["9.8 m/s^2", "9.8 N", "8.9 m/s^2", "10 m/s"],
                Slot::A,
                "≈9.8 m/s².",
            ),
            q("SI unit of force?", ["Joule", "Newton", "Pascal", "Watt"], Slot::B, "F = m·a in Newtons."),
            q(
                "Speed of light c ≈ ?",
                ["3×10^8 m/s", "3×10^6 m/s", "1.5×10^8 m/s", "3×10^10 m/s"],
                Slot::A,
                "≈3e8 m/s.",
            ),
            q("Which is a vector?", ["Speed", "Velocity", "Distance", "Time"], Slot::B, "Velocity has direction."),
            q(
                "Work equals?",
                ["Force × Distance", "Mass × Acceleration", "Power × Time", "Energy × Time"],
                Slot::A,
                "W = F·d.",
            ),
        ],
    ),
];

fn optional(choice: &str) -> Option<String> {
    (!choice.is_empty()).then(|| choice.to_string())
}

impl DemoQuestion {
    fn draft(&self, subject_id: i64) -> QuestionDraft {
        let [a, b, c, d] = self.choices;
        QuestionDraft {
            subject_id,
            text: self.text.to_string(),
            choice_a: a.to_string(),
            choice_b: b.to_string(),
            choice_c: optional(c),
            choice_d: optional(d),
            correct: self.correct,
            comment: optional(self.comment),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub subjects_created: usize,
    pub questions_created: usize,
}

async fn find_or_create(store: &dyn QuestionStore, name: &str) -> Result<(Subject, bool), StoreError> {
    let existing = store
        .list_subjects()
        .await?
        .into_iter()
        .find(|s| s.name.eq_ignore_ascii_case(name));
    match existing {
        Some(subject) => Ok((subject, false)),
        None => Ok((store.create_subject(name).await?, true)),
    }
}

/// Ensures every demo subject exists and fills the ones that have no questions.
pub async fn seed_demo(store: &dyn QuestionStore) -> Result<SeedReport, StoreError> {
    let mut report = SeedReport::default();
    for (name, questions) in DEMO {
        let (subject, created) = find_or_create(store, name).await?;
        if created {
            report.subjects_created += 1;
        }
        if !store.list_questions(subject.id).await?.is_empty() {
            continue;
        }
        let drafts: Vec<QuestionDraft> = questions.iter().map(|q| q.draft(subject.id)).collect();
        report.questions_created += store.insert_batch(&drafts).await?;
    }
    info!(
        subjects = report.subjects_created,
        questions = report.questions_created,
        "demo content seeded"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::validate_draft;
    use crate::store::InMemoryStore;

    #[test]
    fn demo_questions_are_valid() {
        for (_, questions) in DEMO {
            assert_eq!(questions.len(), 5);
            for q in questions.iter() {
                assert_eq!(validate_draft(&q.draft(1)), Ok(()));
            }
        }
    }

    #[tokio::test]
    async fn seeding_twice_changes_nothing() {
        let store = InMemoryStore::new(None);
        let first = seed_demo(&store).await.unwrap();
        assert_eq!(
            first,
            SeedReport {
                subjects_created: 3,
                questions_created: 15
            }
        );

        let again = seed_demo(&store).await.unwrap();
        assert_eq!(again, SeedReport::default());

        let subjects = store.list_subjects().await.unwrap();
        let names: Vec<&str> = subjects.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Algebra", "Geometry", "Physics"]);
        for s in &subjects {
            assert_eq!(store.list_questions(s.id).await.unwrap().len(), 5);
        }

        let geometry = store.list_questions(subjects[1].id).await.unwrap();
        let perimeter = geometry.iter().find(|q| q.text.contains("Perimeter")).unwrap();
        assert_eq!(perimeter.correct, Slot::C);
        assert_eq!(perimeter.choice(Slot::C), Some("4s"));
    }

    #[tokio::test]
    async fn existing_subject_with_questions_is_kept() {
        let store = InMemoryStore::new(None);
        let algebra = store.create_subject("algebra").await.unwrap();
        store
            .create_question(QuestionDraft {
                subject_id: algebra.id,
                text: "Custom".into(),
                choice_a: "yes".into(),
                choice_b: "no".into(),
                choice_c: None,
                choice_d: None,
                correct: Slot::A,
                comment: None,
            })
            .await
            .unwrap();

        let report = seed_demo(&store).await.unwrap();
        assert_eq!(report.subjects_created, 2);
        assert_eq!(report.questions_created, 10);
        assert_eq!(store.list_subjects().await.unwrap().len(), 3);
        let kept = store.list_questions(algebra.id).await.unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].text, "Custom");
    }
}
