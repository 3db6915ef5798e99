use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use crate::error::{Error, Result};
use crate::models::assignment::{AnswerSheet, AssignmentStatus};
use crate::models::exam::{Exam, QuestionKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub score: Decimal,
    pub max_score: Decimal,
    pub percentage: Decimal,
    pub passed: bool,
    /// Some answers could not be auto-graded.
    pub needs_review: bool,
}

impl Evaluation {
    pub fn status(&self) -> AssignmentStatus {
        if self.needs_review {
            AssignmentStatus::Completed
        } else if self.passed {
            AssignmentStatus::Passed
        } else {
            AssignmentStatus::Failed
        }
    }
}

/// Turns an answer map into a score. Called exactly once per submission.
#[async_trait]
pub trait Scorer: Send + Sync {
    async fn evaluate(&self, exam: &Exam, answers: &AnswerSheet) -> Result<Evaluation>;
}

/// Auto-grades multiple choice questions; anything else is left for review.
#[derive(Debug, Clone, Default)]
pub struct GradingScorer;

impl GradingScorer {
    pub fn grade(exam: &Exam, answers: &AnswerSheet) -> Evaluation {
        let mut earned: i32 = 0;
        let mut total: i32 = 0;
        let mut needs_review = false;

        for q in exam.parsed_questions() {
            total += q.points;
            let given = answers.get(&q.id).cloned().unwrap_or(JsonValue::Null);
            match q.kind {
                QuestionKind::MultipleChoice { options, correct_option } => {
                    let selected = given
                        .as_u64()
                        .or_else(|| given.get("selected").and_then(|v| v.as_u64()))
                        .map(|v| v as usize);
                    if selected == Some(correct_option) && correct_option < options.len() {
                        earned += q.points;
                    }
                }
                QuestionKind::ShortAnswer { .. } | QuestionKind::Code { .. } => {
                    if !given.is_null() {
                        needs_review = true;
                    }
                }
            }
        }

        let score = Decimal::from(earned);
        let max_score = Decimal::from(total);
        let percentage = if total > 0 {
            (score / max_score * Decimal::ONE_HUNDRED).round_dp(2)
        } else {
            Decimal::ZERO
        };
        Evaluation {
            score,
            max_score,
            percentage,
            passed: percentage >= exam.passing_score,
            needs_review,
        }
    }
}

#[async_trait]
impl Scorer for GradingScorer {
    async fn evaluate(&self, exam: &Exam, answers: &AnswerSheet) -> Result<Evaluation> {
        Ok(Self::grade(exam, answers))
    }
}

/// Delegates scoring to an external evaluation service.
#[derive(Clone)]
pub struct HttpScorer {
    client: Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct RemoteEvaluation {
    score: f64,
    max_score: f64,
    passed: Option<bool>,
}

impl HttpScorer {
    pub fn new(client: Client, endpoint: String) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl Scorer for HttpScorer {
    async fn evaluate(&self, exam: &Exam, answers: &AnswerSheet) -> Result<Evaluation> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "exam_id": exam.id,
                "questions": exam.questions,
                "answers": answers,
            }))
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Upstream(format!(
                "Scoring service returned {}: {}",
                status, body
            )));
        }
        let remote: RemoteEvaluation = resp.json().await?;
        let to_dec = |v: f64| Decimal::from_f64(v).unwrap_or(Decimal::ZERO);
        let score = to_dec(remote.score);
        let max_score = to_dec(remote.max_score);
        let percentage = if max_score > Decimal::ZERO {
            (score / max_score * Decimal::ONE_HUNDRED).round_dp(2)
        } else {
            Decimal::ZERO
        };
        Ok(Evaluation {
            score,
            max_score,
            percentage,
            passed: remote.passed.unwrap_or(false),
            needs_review: remote.passed.is_none(),
        })
    }
}
