//! Executor output: `GeneratedFile`, `FileSet`, `Artifact`, `FailureReport`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFile {
    pub path: String,
    pub content: String,
}

/// The files produced by one `CodeWriter::write` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSet {
    pub step_id: String,
    pub files: Vec<GeneratedFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub step_id: String,
    pub error: String,
    /// Total write attempts, including the first.
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedStep {
    pub step_id: String,
    /// The failed (or skipped) dependency that blocked this step.
    pub blocked_by: String,
}

/// Why an artifact is partial.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub failed: Vec<StepFailure>,
    pub skipped: Vec<SkippedStep>,
    pub cancelled: bool,
    pub veto: Option<String>,
}

impl FailureReport {
    pub fn is_empty(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty() && !self.cancelled && self.veto.is_none()
    }

    /// One line per failed or skipped step, then cancellation.
    pub fn describe(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .failed
            .iter()
            .map(|f| format!("step {} failed after {} attempt(s): {}", f.step_id, f.attempts, f.error))
            .collect();
        out.extend(
            self.skipped
                .iter()
                .map(|s| format!("step {} skipped because {} did not complete", s.step_id, s.blocked_by)),
        );
        if self.cancelled {
            out.push("execution was cancelled before every step finished".to_string());
        }
        out
    }
}

/// The code produced for one execution plan. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub plan_id: String,
    /// One file set per completed step, in plan order.
    pub files: Vec<FileSet>,
    pub partial: bool,
    pub failure_report: Option<FailureReport>,
}

impl Artifact {
    pub fn file_count(&self) -> usize {
        self.files.iter().map(|set| set.files.len()).sum()
    }

    pub fn completed_steps(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|set| set.step_id.as_str())
    }

    pub fn vetoed(&self) -> bool {
        self.failure_report
            .as_ref()
            .is_some_and(|report| report.veto.is_some())
    }

    /// Inline rendering for critic prompts. Content beyond `max_chars` per
    /// file is elided.
    pub fn render(&self, max_chars: usize) -> String {
        let mut out = String::new();
        for set in &self.files {
            for file in &set.files {
                out.push_str(&format!("--- {} (step {})\n", file.path, set.step_id));
                if file.content.chars().count() > max_chars {
                    let head: String = file.content.chars().take(max_chars).collect();
                    out.push_str(&head);
                    out.push_str("\n[... truncated]\n");
                } else {
                    out.push_str(&file.content);
                    out.push('\n');
                }
            }
        }
        if let Some(report) = &self.failure_report {
            if let Some(veto) = &report.veto {
                out.push_str(&format!("Execution vetoed: {veto}\n"));
            }
            for failure in &report.failed {
                out.push_str(&format!(
                    "Step {} failed after {} attempt(s): {}\n",
                    failure.step_id, failure.attempts, failure.error
                ));
            }
            for skipped in &report.skipped {
                out.push_str(&format!(
                    "Step {} skipped (blocked by {})\n",
                    skipped.step_id, skipped.blocked_by
                ));
            }
            if report.cancelled {
                out.push_str("Execution was cancelled before completion\n");
            }
        }
        out
    }
}
