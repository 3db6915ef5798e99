use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exam {
    pub id: Uuid,
    pub title: String,
    pub duration_minutes: i32,
    /// Percentage needed to pass.
    pub passing_score: Decimal,
    pub questions: JsonValue,
    pub created_at: DateTime<Utc>,
}

impl Exam {
    /// Questions that fail to parse are skipped with a warning.
    pub fn parsed_questions(&self) -> Vec<ExamQuestion> {
        let Some(items) = self.questions.as_array() else {
            return Vec::new();
        };
        items
            .iter()
            .enumerate()
            .filter_map(|(idx, raw)| match serde_json::from_value::<ExamQuestion>(raw.clone()) {
                Ok(mut q) => {
                    if q.id <= 0 {
                        q.id = idx as i32 + 1;
                    }
                    Some(q)
                }
                Err(e) => {
                    tracing::warn!(exam_id = %self.id, index = idx, "Skipping malformed question: {}", e);
                    None
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamQuestion {
    #[serde(default)]
    pub id: i32,
    pub question: String,
    #[serde(default = "default_points")]
    pub points: i32,
    #[serde(flatten)]
    pub kind: QuestionKind,
}

fn default_points() -> i32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionKind {
    MultipleChoice {
        options: Vec<String>,
        correct_option: usize,
    },
    ShortAnswer {
        #[serde(default)]
        expected_keywords: Vec<String>,
    },
    Code {
        language: String,
    },
}

#[derive(Debug, Clone)]
pub struct NewExam {
    pub title: String,
    pub duration_minutes: i32,
    pub passing_score: Decimal,
    pub questions: JsonValue,
}
