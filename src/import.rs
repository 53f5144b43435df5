//! Spreadsheet import: turns a grid of cells into validated question drafts.
//!
//! Column order is fixed: question, correct answer, option, option, option,
//! comment. The correct answer always lands in slot A; the remaining options
//! fill B, C and D in the order given, with blanks skipped and duplicates
//! (ignoring case and whitespace) collapsed onto their first occurrence.
//! A bad row becomes a problem message and never aborts the batch.

use crate::models::{QuestionDraft, Slot};
use crate::store::{QuestionStore, StoreError};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Cursor;
use thiserror::Error;
use tracing::{info, warn};

/// Rows per bulk write.
pub const IMPORT_CHUNK: usize = 500;

const MAX_OPTIONS: usize = 4;
const NO_VALID_ROWS: &str = "No valid rows found. Check column mapping.";

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("no sheets found in the workbook")]
    NoSheet,
    #[error("sheet appears to be empty")]
    EmptySheet,
    #[error("subject {0} does not exist")]
    UnknownSubject(i64),
    #[error("cannot read file: {0}")]
    Unreadable(String),
    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),
    #[error("store failed after {committed} questions were saved: {source}")]
    Store {
        committed: usize,
        #[source]
        source: StoreError,
    },
}

/// One raw spreadsheet row with its 1-based position in the source sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRow {
    pub number: usize,
    pub cells: Vec<String>,
}

impl ImportRow {
    /// Numbers a bare grid from row 1.
    pub fn from_grid(grid: Vec<Vec<String>>) -> Vec<ImportRow> {
        grid.into_iter()
            .enumerate()
            .map(|(i, cells)| ImportRow { number: i + 1, cells })
            .collect()
    }

    fn cell(&self, i: usize) -> &str {
        self.cells.get(i).map(|c| c.trim()).unwrap_or("")
    }

    fn is_blank(&self) -> bool {
        self.cells.iter().all(|c| c.trim().is_empty())
    }

    fn looks_like_header(&self) -> bool {
        self.cell(0).to_lowercase().contains("question") || self.cell(1).to_lowercase().contains("correct")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Normalized {
    pub drafts: Vec<QuestionDraft>,
    pub problems: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub created_count: usize,
    pub problems: Vec<String>,
}

enum RowOutcome {
    Blank,
    Accepted(QuestionDraft),
    Rejected(String),
}

/// Collapses internal whitespace and case so "  Paris " and "paris" collide.
fn option_key(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn normalize_row(row: &ImportRow, subject_id: i64) -> RowOutcome {
    if row.is_blank() {
        return RowOutcome::Blank;
    }
    let n = row.number;
    let text = row.cell(0);
    let correct = row.cell(1);
    let distractors = [row.cell(2), row.cell(3), row.cell(4)];
    let comment = row.cell(5);

    if text.is_empty() {
        return RowOutcome::Rejected(format!("Row {n}: Missing question text in column A."));
    }
    if correct.is_empty() {
        return RowOutcome::Rejected(format!("Row {n}: Missing correct answer in column B."));
    }
    if distractors.iter().all(|d| d.is_empty()) {
        return RowOutcome::Rejected(format!("Row {n}: Missing answer option in columns C-E."));
    }

    let mut seen = HashSet::new();
    let mut options: Vec<String> = Vec::with_capacity(MAX_OPTIONS);
    for candidate in std::iter::once(correct).chain(distractors) {
        if candidate.is_empty() || options.len() == MAX_OPTIONS {
            continue;
        }
        if seen.insert(option_key(candidate)) {
            options.push(candidate.to_string());
        }
    }
    if options.len() < 2 {
        return RowOutcome::Rejected(format!(
            "Row {n}: Needs at least two distinct options; every option repeats the correct answer."
        ));
    }

    let mut slots = options.into_iter();
    let choice_a = slots.next().unwrap_or_default();
    let choice_b = slots.next().unwrap_or_default();
    RowOutcome::Accepted(QuestionDraft {
        subject_id,
        text: text.to_string(),
        choice_a,
        choice_b,
        choice_c: slots.next(),
        choice_d: slots.next(),
        correct: Slot::A,
        comment: (!comment.is_empty()).then(|| comment.to_string()),
    })
}

/// Validates every row, keeping the good ones and describing the bad ones.
///
/// Fails only when there are no rows at all.
pub fn normalize(rows: &[ImportRow], subject_id: i64) -> Result<Normalized, ImportError> {
    let Some(first) = rows.first() else {
        return Err(ImportError::EmptySheet);
    };
    let skip = usize::from(first.looks_like_header());

    let mut out = Normalized::default();
    for row in &rows[skip..] {
        match normalize_row(row, subject_id) {
            RowOutcome::Blank => {}
            RowOutcome::Accepted(draft) => out.drafts.push(draft),
            RowOutcome::Rejected(problem) => out.problems.push(problem),
        }
    }
    Ok(out)
}

/// Normalizes `rows` for `subject_id` and writes the accepted drafts in
/// chunks of [`IMPORT_CHUNK`].
///
/// Chunks are not wrapped in one transaction: if a later chunk fails the
/// earlier ones stay committed, and the error reports how many were saved.
pub async fn run_import(
    store: &dyn QuestionStore,
    subject_id: i64,
    rows: &[ImportRow],
) -> Result<ImportReport, ImportError> {
    match store.get_subject(subject_id).await {
        Ok(_) => {}
        Err(StoreError::NotFound(_)) => return Err(ImportError::UnknownSubject(subject_id)),
        Err(source) => return Err(ImportError::Store { committed: 0, source }),
    }

    let Normalized { drafts, mut problems } = normalize(rows, subject_id)?;
    if drafts.is_empty() {
        if problems.is_empty() {
            problems.push(NO_VALID_ROWS.to_string());
        }
        info!(subject_id, problems = problems.len(), "import produced no questions");
        return Ok(ImportReport { created_count: 0, problems });
    }

    let mut committed = 0;
    for chunk in drafts.chunks(IMPORT_CHUNK) {
        match store.insert_batch(chunk).await {
            Ok(n) => committed += n,
            Err(source) => {
                warn!(subject_id, committed, "import chunk failed");
                return Err(ImportError::Store { committed, source });
            }
        }
    }

    info!(subject_id, created = committed, problems = problems.len(), "import finished");
    Ok(ImportReport {
        created_count: committed,
        problems,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadKind {
    Workbook,
    Csv,
}

fn detect_kind(file_name: &str, bytes: &[u8]) -> Result<UploadKind, ImportError> {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Ok(UploadKind::Workbook),
        "csv" | "txt" => Ok(UploadKind::Csv),
        // zip container (xlsx/ods) or OLE2 (xls)
        _ if bytes.starts_with(b"PK\x03\x04") || bytes.starts_with(&[0xD0, 0xCF, 0x11, 0xE0]) => {
            Ok(UploadKind::Workbook)
        }
        "" => Ok(UploadKind::Csv),
        other => Err(ImportError::UnsupportedFormat(other.to_string())),
    }
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        // Whole numbers come back from Excel as floats; keep "4" rather than "4.0".
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        other => other.to_string(),
    }
}

/// Reads the first sheet of an xlsx/xls/ods workbook.
pub fn read_workbook(bytes: Vec<u8>) -> Result<Vec<ImportRow>, ImportError> {
    let mut workbook =
        open_workbook_auto_from_rs(Cursor::new(bytes)).map_err(|e| ImportError::Unreadable(e.to_string()))?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or(ImportError::NoSheet)?;
    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| ImportError::Unreadable(e.to_string()))?;

    // The range begins at the first used cell; pad so column A stays column A.
    let (first_row, first_col) = range.start().unwrap_or((0, 0));
    let rows = range
        .rows()
        .enumerate()
        .map(|(i, cells)| {
            let mut out = vec![String::new(); first_col as usize];
            out.extend(cells.iter().map(cell_text));
            ImportRow {
                number: first_row as usize + i + 1,
                cells: out,
            }
        })
        .collect();
    Ok(rows)
}

/// Reads a headerless, ragged CSV file.
pub fn read_csv(bytes: &[u8]) -> Result<Vec<ImportRow>, ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);
    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|e| ImportError::Unreadable(e.to_string()))?;
        let number = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(i + 1);
        rows.push(ImportRow {
            number,
            cells: record.iter().map(str::to_string).collect(),
        });
    }
    Ok(rows)
}

/// Picks a reader by file name (falling back to content sniffing).
pub fn read_upload(file_name: &str, bytes: Vec<u8>) -> Result<Vec<ImportRow>, ImportError> {
    if bytes.is_empty() {
        return Err(ImportError::EmptySheet);
    }
    match detect_kind(file_name, &bytes)? {
        UploadKind::Workbook => read_workbook(bytes),
        UploadKind::Csv => read_csv(&bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    fn rows(grid: &[&[&str]]) -> Vec<ImportRow> {
        ImportRow::from_grid(grid.iter().map(|r| row(r)).collect())
    }

    #[test]
    fn basic_row_puts_correct_in_slot_a() {
        let out = normalize(&rows(&[&["2+2=?", "4", "3", "5", "", ""]]), 9).unwrap();
        assert!(out.problems.is_empty());
        assert_eq!(
            out.drafts,
            vec![QuestionDraft {
                subject_id: 9,
                text: "2+2=?".into(),
                choice_a: "4".into(),
                choice_b: "3".into(),
                choice_c: Some("5".into()),
                choice_d: None,
                correct: Slot::A,
                comment: None,
            }]
        );
    }

    #[test]
    fn missing_question_text_is_one_problem() {
        let out = normalize(&rows(&[&["", "4", "3", "", "", ""]]), 1).unwrap();
        assert!(out.drafts.is_empty());
        assert_eq!(out.problems.len(), 1);
        assert!(out.problems[0].starts_with("Row 1:"));
        assert!(out.problems[0].contains("question text"));
    }

    #[test]
    fn missing_fields_name_row_and_field() {
        let out = normalize(
            &rows(&[
                &["Question", "Correct", "Option", "Option", "Option", "Comment"],
                &["Q1", "", "x"],
                &["Q2", "y"],
                &["Q3", "a", "b"],
            ]),
            1,
        )
        .unwrap();
        assert_eq!(out.drafts.len(), 1);
        assert_eq!(
            out.problems,
            vec![
                "Row 2: Missing correct answer in column B.".to_string(),
                "Row 3: Missing answer option in columns C-E.".to_string(),
            ]
        );
    }

    #[test]
    fn blank_rows_are_skipped_silently() {
        let out = normalize(&rows(&[&["Q", "a", "b"], &["", " ", ""], &[]]), 1).unwrap();
        assert_eq!(out.drafts.len(), 1);
        assert!(out.problems.is_empty());
    }

    #[test]
    fn header_detected_by_second_cell() {
        let out = normalize(&rows(&[&["Prompt", "Correct answer", "Opt"], &["Q", "a", "b"]]), 1).unwrap();
        assert_eq!(out.drafts.len(), 1);
        assert!(out.problems.is_empty());
    }

    #[test]
    fn first_row_kept_when_not_a_header() {
        let out = normalize(&rows(&[&["Capital of France?", "Paris", "Rome"]]), 1).unwrap();
        assert_eq!(out.drafts.len(), 1);
    }

    #[test]
    fn duplicates_collapse_and_blanks_are_skipped() {
        let out = normalize(
            &rows(&[&["Capital?", "Paris", " paris ", "", "Rome", "Seat of government"]]),
            1,
        )
        .unwrap();
        let d = &out.drafts[0];
        assert_eq!(d.choice_a, "Paris");
        assert_eq!(d.choice_b, "Rome");
        assert_eq!(d.choice_c, None);
        assert_eq!(d.comment.as_deref(), Some("Seat of government"));
    }

    #[test]
    fn all_options_duplicate_correct_is_rejected() {
        let out = normalize(&rows(&[&["Q", "Yes", "YES", "  yes"]]), 1).unwrap();
        assert!(out.drafts.is_empty());
        assert_eq!(out.problems.len(), 1);
        assert!(out.problems[0].contains("two distinct"));
    }

    #[test]
    fn four_options_fill_every_slot() {
        let out = normalize(&rows(&[&["Q", "a", "b", "c", "d"]]), 1).unwrap();
        let d = &out.drafts[0];
        assert_eq!(
            (d.choice_a.as_str(), d.choice_b.as_str(), d.choice_c.as_deref(), d.choice_d.as_deref()),
            ("a", "b", Some("c"), Some("d"))
        );
    }

    #[test]
    fn empty_input_is_a_wholesale_error() {
        assert!(matches!(normalize(&[], 1), Err(ImportError::EmptySheet)));
    }

    #[test]
    fn csv_reader_keeps_ragged_rows() {
        let parsed = read_csv(b"question,correct,option\n\"Largest planet?\",Jupiter,Mars\n").unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].number, 2);
        assert_eq!(parsed[1].cells, row(&["Largest planet?", "Jupiter", "Mars"]));
    }

    #[test]
    fn upload_kind_detection() {
        assert_eq!(detect_kind("q.XLSX", b"").unwrap(), UploadKind::Workbook);
        assert_eq!(detect_kind("q.csv", b"a,b").unwrap(), UploadKind::Csv);
        assert_eq!(detect_kind("blob", b"PK\x03\x04rest").unwrap(), UploadKind::Workbook);
        assert!(matches!(detect_kind("q.pdf", b"%PDF"), Err(ImportError::UnsupportedFormat(_))));
    }

    fn workbook_bytes(fill: impl FnOnce(&mut rust_xlsxwriter::Worksheet)) -> Vec<u8> {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        fill(workbook.add_worksheet());
        let other = workbook.add_worksheet();
        other.set_name("Notes").unwrap();
        other.write_string(0, 0, "not questions").unwrap();
        workbook.save_to_buffer().unwrap()
    }

    #[test]
    fn xlsx_upload_reads_first_sheet() {
        let bytes = workbook_bytes(|ws| {
            for (col, title) in ["Question", "Correct", "Option 1", "Option 2"].iter().enumerate() {
                ws.write_string(0, col as u16, *title).unwrap();
            }
            ws.write_string(1, 0, "2+2=?").unwrap();
            ws.write_number(1, 1, 4).unwrap();
            ws.write_number(1, 2, 3).unwrap();
            ws.write_number(1, 3, 5).unwrap();
            // row 3 left blank
            ws.write_string(3, 0, "Largest planet?").unwrap();
            ws.write_string(3, 1, "Jupiter").unwrap();
            ws.write_string(3, 2, "Mars").unwrap();
        });

        let parsed = read_upload("questions.xlsx", bytes).unwrap();
        let numbers: Vec<usize> = parsed.iter().map(|r| r.number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
        assert_eq!(parsed[1].cells, row(&["2+2=?", "4", "3", "5"]));

        let out = normalize(&parsed, 1).unwrap();
        assert!(out.problems.is_empty());
        assert_eq!(out.drafts.len(), 2);
        assert_eq!(out.drafts[0].choice_a, "4");
        assert_eq!(out.drafts[0].choice_b, "3");
        assert_eq!(out.drafts[0].choice_c.as_deref(), Some("5"));
        assert_eq!(out.drafts[1].choice_c, None);
    }

    #[test]
    fn xlsx_offset_range_keeps_columns_and_row_numbers() {
        // Nothing in column A or the first two rows.
        let bytes = workbook_bytes(|ws| {
            ws.write_string(2, 1, "orphan answer").unwrap();
            ws.write_string(2, 2, "option").unwrap();
        });
        let parsed = read_upload("offset.xlsx", bytes).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].number, 3);
        assert_eq!(parsed[0].cells, row(&["", "orphan answer", "option"]));

        let out = normalize(&parsed, 1).unwrap();
        assert_eq!(out.problems, vec!["Row 3: Missing question text in column A.".to_string()]);
    }

    #[test]
    fn float_cells_render_as_integers() {
        assert_eq!(cell_text(&Data::Float(4.0)), "4");
        assert_eq!(cell_text(&Data::Float(2.5)), "2.5");
        assert_eq!(cell_text(&Data::Empty), "");
    }

    #[tokio::test]
    async fn run_import_writes_in_chunks() {
        let store = InMemoryStore::new(None);
        let subject = store.create_subject("Algebra").await.unwrap();
        let grid: Vec<Vec<String>> = (0..1203)
            .map(|i| row(&[format!("Q{i}").as_str(), "right", "wrong"]))
            .collect();
        let report = run_import(&store, subject.id, &ImportRow::from_grid(grid)).await.unwrap();
        assert_eq!(report.created_count, 1203);
        assert!(report.problems.is_empty());
        assert_eq!(store.list_questions(subject.id).await.unwrap().len(), 1203);
    }

    /// Delegates to an in-memory store but fails every bulk write after the first.
    struct FailsAfterFirstBatch {
        inner: InMemoryStore,
        batches: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl QuestionStore for FailsAfterFirstBatch {
        fn backend(&self) -> &'static str {
            "flaky"
        }
        async fn version(&self) -> Result<String, StoreError> {
            self.inner.version().await
        }
        async fn list_subjects(&self) -> Result<Vec<crate::models::Subject>, StoreError> {
            self.inner.list_subjects().await
        }
        async fn get_subject(&self, id: i64) -> Result<crate::models::Subject, StoreError> {
            self.inner.get_subject(id).await
        }
        async fn create_subject(&self, name: &str) -> Result<crate::models::Subject, StoreError> {
            self.inner.create_subject(name).await
        }
        async fn rename_subject(&self, id: i64, name: &str) -> Result<crate::models::Subject, StoreError> {
            self.inner.rename_subject(id, name).await
        }
        async fn delete_subject(&self, id: i64) -> Result<(), StoreError> {
            self.inner.delete_subject(id).await
        }
        async fn list_questions(&self, subject_id: i64) -> Result<Vec<crate::models::Question>, StoreError> {
            self.inner.list_questions(subject_id).await
        }
        async fn get_question(&self, id: i64) -> Result<crate::models::Question, StoreError> {
            self.inner.get_question(id).await
        }
        async fn create_question(&self, draft: QuestionDraft) -> Result<crate::models::Question, StoreError> {
            self.inner.create_question(draft).await
        }
        async fn update_question(&self, question: crate::models::Question) -> Result<crate::models::Question, StoreError> {
            self.inner.update_question(question).await
        }
        async fn delete_question(&self, id: i64) -> Result<(), StoreError> {
            self.inner.delete_question(id).await
        }
        async fn insert_batch(&self, drafts: &[QuestionDraft]) -> Result<usize, StoreError> {
            let n = self.batches.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n >= 1 {
                return Err(StoreError::Backend("connection reset".into()));
            }
            self.inner.insert_batch(drafts).await
        }
    }

    #[tokio::test]
    async fn failed_chunk_keeps_earlier_chunks_and_reports_them() {
        let store = FailsAfterFirstBatch {
            inner: InMemoryStore::new(None),
            batches: std::sync::atomic::AtomicUsize::new(0),
        };
        let subject = store.create_subject("Chemistry").await.unwrap();
        let grid: Vec<Vec<String>> = (0..1200)
            .map(|i| row(&[format!("Q{i}").as_str(), "right", "wrong"]))
            .collect();

        let err = run_import(&store, subject.id, &ImportRow::from_grid(grid)).await.unwrap_err();
        match err {
            ImportError::Store { committed, .. } => assert_eq!(committed, IMPORT_CHUNK),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(store.list_questions(subject.id).await.unwrap().len(), 500);
    }

    #[tokio::test]
    async fn run_import_rejects_unknown_subject() {
        let store = InMemoryStore::new(None);
        let err = run_import(&store, 42, &rows(&[&["Q", "a", "b"]])).await.unwrap_err();
        assert!(matches!(err, ImportError::UnknownSubject(42)));
    }

    #[tokio::test]
    async fn run_import_reports_when_nothing_matched() {
        let store = InMemoryStore::new(None);
        let subject = store.create_subject("Physics").await.unwrap();
        let report = run_import(&store, subject.id, &rows(&[&["Question", "Correct"], &["", ""]]))
            .await
            .unwrap();
        assert_eq!(report.created_count, 0);
        assert_eq!(report.problems, vec![NO_VALID_ROWS.to_string()]);
    }
}
