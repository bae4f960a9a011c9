//! Pipeline states, outcomes and run reports

use serde::Serialize;
use uuid::Uuid;

use super::error::PipelineError;

/// Prefix of the line appended when an ID is found
pub const ID_LINE_PREFIX: &str = "ID detectado: ";

/// Where a capture run currently is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Capturing,
    Decoding,
    Staging,
    Recognizing,
    Extracting,
    Done,
    Failed(PipelineError),
}

impl PipelineState {
    /// Whether a run is in progress
    pub fn is_running(&self) -> bool {
        !matches!(
            self,
            PipelineState::Idle | PipelineState::Done | PipelineState::Failed(_)
        )
    }
}

/// Terminal result of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Done { text: String, id: Option<String> },
    Failed(PipelineError),
}

impl PipelineOutcome {
    /// Text for the output surface
    pub fn render(&self) -> String {
        match self {
            PipelineOutcome::Done { text, id: Some(id) } => {
                format!("{}\n\n{}{}", text, ID_LINE_PREFIX, id)
            }
            PipelineOutcome::Done { text, id: None } => text.clone(),
            PipelineOutcome::Failed(error) => error.user_message().to_string(),
        }
    }

    /// The terminal state this outcome corresponds to
    pub fn terminal_state(&self) -> PipelineState {
        match self {
            PipelineOutcome::Done { .. } => PipelineState::Done,
            PipelineOutcome::Failed(error) => PipelineState::Failed(error.clone()),
        }
    }
}

/// Summary of one run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub elapsed_ms: u64,
    pub status: RunStatus,
    /// Rendered output (result text or user-facing error message)
    pub output: String,
    pub id: Option<String>,
    pub error: Option<PipelineError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Done,
    Failed,
}

impl RunReport {
    pub fn new(run_id: Uuid, elapsed_ms: u64, outcome: &PipelineOutcome) -> Self {
        let output = outcome.render();
        match outcome {
            PipelineOutcome::Done { id, .. } => Self {
                run_id,
                elapsed_ms,
                status: RunStatus::Done,
                output,
                id: id.clone(),
                error: None,
            },
            PipelineOutcome::Failed(error) => Self {
                run_id,
                elapsed_ms,
                status: RunStatus::Failed,
                output,
                id: None,
                error: Some(error.clone()),
            },
        }
    }
}

/// Notifications emitted while a run progresses
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    StateChanged(PipelineState),
    Finished(RunReport),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_appends_id() {
        let outcome = PipelineOutcome::Done {
            text: "Nombre: Juan\nCedula 1234567890 Fin".to_string(),
            id: Some("1234567890".to_string()),
        };
        assert_eq!(
            outcome.render(),
            "Nombre: Juan\nCedula 1234567890 Fin\n\nID detectado: 1234567890"
        );
    }

    #[test]
    fn test_render_without_id_is_unchanged() {
        let outcome = PipelineOutcome::Done {
            text: "sin documento".to_string(),
            id: None,
        };
        assert_eq!(outcome.render(), "sin documento");
    }

    #[test]
    fn test_render_failure_uses_user_message() {
        let outcome = PipelineOutcome::Failed(PipelineError::OcrInit("x".into()));
        assert_eq!(outcome.render(), "Error iniciando OCR");
        assert_eq!(
            outcome.terminal_state(),
            PipelineState::Failed(PipelineError::OcrInit("x".into()))
        );
    }

    #[test]
    fn test_running_states() {
        assert!(!PipelineState::Idle.is_running());
        assert!(PipelineState::Capturing.is_running());
        assert!(PipelineState::Extracting.is_running());
        assert!(!PipelineState::Done.is_running());
        assert!(!PipelineState::Failed(PipelineError::Busy).is_running());
    }

    #[test]
    fn test_report_json() {
        let outcome = PipelineOutcome::Done {
            text: "Cedula 12345678".to_string(),
            id: Some("12345678".to_string()),
        };
        let report = RunReport::new(Uuid::nil(), 42, &outcome);
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["status"], "done");
        assert_eq!(json["id"], "12345678");
        assert_eq!(json["elapsed_ms"], 42);
        assert!(json["error"].is_null());
    }
}
