//! Job State Machine
//!
//! Training:  Initializing → Loading → Preprocessing → WindowBuilding →
//!            Training(1..N) → ThresholdCalibration → Persisting → Completed
//! Inference: Initializing → Loading → Preprocessing → WindowBuilding →
//!            Scoring → Completed
//!
//! `Failed` is reachable from every non-terminal stage. `Completed` and
//! `Failed` are absorbing. There is no retry edge.

use serde::Serialize;

use super::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum JobStage {
    Initializing,
    Loading,
    Preprocessing,
    WindowBuilding,
    Training { epoch: usize, total: usize },
    ThresholdCalibration,
    Scoring,
    Persisting,
    Completed,
    Failed,
}

impl JobStage {
    pub fn name(&self) -> &'static str {
        match self {
            JobStage::Initializing => "initializing",
            JobStage::Loading => "loading",
            JobStage::Preprocessing => "preprocessing",
            JobStage::WindowBuilding => "window_building",
            JobStage::Training { .. } => "training",
            JobStage::ThresholdCalibration => "threshold_calibration",
            JobStage::Scoring => "scoring",
            JobStage::Persisting => "persisting",
            JobStage::Completed => "completed",
            JobStage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStage::Completed | JobStage::Failed)
    }
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStage::Training { epoch, total } => write!(f, "training({}/{})", epoch, total),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Training,
    Inference,
    ReadingInference,
}

impl JobKind {
    /// Stage order, ignoring the per-epoch payload of `Training`
    fn sequence(&self) -> &'static [&'static str] {
        match self {
            JobKind::Training => &[
                "initializing",
                "loading",
                "preprocessing",
                "window_building",
                "training",
                "threshold_calibration",
                "persisting",
                "completed",
            ],
            JobKind::Inference => &[
                "initializing",
                "loading",
                "preprocessing",
                "window_building",
                "scoring",
                "completed",
            ],
            JobKind::ReadingInference => &[
                "initializing",
                "preprocessing",
                "window_building",
                "scoring",
                "completed",
            ],
        }
    }

    fn position(&self, stage: &JobStage) -> Option<usize> {
        self.sequence().iter().position(|s| *s == stage.name())
    }
}

/// Tracks one job through its stages
#[derive(Debug, Clone)]
pub struct JobTracker {
    kind: JobKind,
    stage: JobStage,
    job_id: String,
}

impl JobTracker {
    pub fn new(kind: JobKind) -> Self {
        Self {
            kind,
            stage: JobStage::Initializing,
            job_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn stage(&self) -> JobStage {
        self.stage
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    fn is_legal(&self, next: &JobStage) -> bool {
        if self.stage.is_terminal() {
            return false;
        }
        if *next == JobStage::Failed {
            return true;
        }

        // Epoch steps stay inside the training stage
        if let (JobStage::Training { epoch, total }, JobStage::Training { epoch: e2, total: t2 }) =
            (self.stage, *next)
        {
            return total == t2 && e2 == epoch + 1 && e2 <= t2;
        }
        if let JobStage::Training { epoch, total } = *next {
            if epoch != 1 || total == 0 {
                return false;
            }
        }

        match (self.kind.position(&self.stage), self.kind.position(next)) {
            (Some(from), Some(to)) => to == from + 1,
            _ => false,
        }
    }

    /// Move to `next`, returning the progress percentage for the new stage
    pub fn advance(&mut self, next: JobStage) -> PipelineResult<u8> {
        if !self.is_legal(&next) {
            return Err(PipelineError::IllegalTransition {
                from: self.stage.to_string(),
                to: next.to_string(),
            });
        }
        log::debug!("Job {} [{:?}]: {} -> {}", self.job_id, self.kind, self.stage, next);
        self.stage = next;
        Ok(self.progress())
    }

    /// Enter `Failed` unless already terminal
    pub fn fail(&mut self) {
        if !self.stage.is_terminal() {
            log::debug!("Job {} failed during {}", self.job_id, self.stage);
            self.stage = JobStage::Failed;
        }
    }

    /// Progress percentage of the current stage
    pub fn progress(&self) -> u8 {
        match (self.kind, self.stage) {
            (_, JobStage::Completed) => 100,
            (_, JobStage::Failed) => 100,
            (JobKind::Training, JobStage::Initializing) => 5,
            (JobKind::Training, JobStage::Loading) => 10,
            (JobKind::Training, JobStage::Preprocessing) => 20,
            (JobKind::Training, JobStage::WindowBuilding) => 30,
            (JobKind::Training, JobStage::Training { epoch, total }) => {
                let total = total.max(1);
                (35 + (45 * epoch.min(total)) / total) as u8
            }
            (JobKind::Training, JobStage::ThresholdCalibration) => 85,
            (JobKind::Training, JobStage::Persisting) => 90,
            (_, JobStage::Initializing) => 5,
            (_, JobStage::Loading) => 20,
            (_, JobStage::Preprocessing) => 40,
            (_, JobStage::WindowBuilding) => 55,
            (_, JobStage::Scoring) => 70,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_to_training(tracker: &mut JobTracker) {
        tracker.advance(JobStage::Loading).unwrap();
        tracker.advance(JobStage::Preprocessing).unwrap();
        tracker.advance(JobStage::WindowBuilding).unwrap();
    }

    #[test]
    fn test_training_happy_path() {
        let mut t = JobTracker::new(JobKind::Training);
        run_to_training(&mut t);
        assert_eq!(t.advance(JobStage::Training { epoch: 1, total: 3 }).unwrap(), 50);
        t.advance(JobStage::Training { epoch: 2, total: 3 }).unwrap();
        assert_eq!(t.advance(JobStage::Training { epoch: 3, total: 3 }).unwrap(), 80);
        t.advance(JobStage::ThresholdCalibration).unwrap();
        t.advance(JobStage::Persisting).unwrap();
        assert_eq!(t.advance(JobStage::Completed).unwrap(), 100);
        assert!(t.stage().is_terminal());
    }

    #[test]
    fn test_early_stop_leaves_training_early() {
        let mut t = JobTracker::new(JobKind::Training);
        run_to_training(&mut t);
        t.advance(JobStage::Training { epoch: 1, total: 5 }).unwrap();
        t.advance(JobStage::Training { epoch: 2, total: 5 }).unwrap();
        assert!(t.advance(JobStage::ThresholdCalibration).is_ok());
    }

    #[test]
    fn test_skipping_stages_rejected() {
        let mut t = JobTracker::new(JobKind::Training);
        let err = t.advance(JobStage::WindowBuilding).unwrap_err();
        assert!(matches!(err, PipelineError::IllegalTransition { .. }));

        run_to_training(&mut t);
        assert!(t.advance(JobStage::Training { epoch: 2, total: 3 }).is_err());
        t.advance(JobStage::Training { epoch: 1, total: 3 }).unwrap();
        assert!(t.advance(JobStage::Training { epoch: 3, total: 3 }).is_err());
    }

    #[test]
    fn test_failed_is_absorbing() {
        let mut t = JobTracker::new(JobKind::Training);
        t.advance(JobStage::Loading).unwrap();
        t.advance(JobStage::Failed).unwrap();
        assert!(t.advance(JobStage::Preprocessing).is_err());
        assert!(t.advance(JobStage::Failed).is_err());
        t.fail();
        assert_eq!(t.stage(), JobStage::Failed);
    }

    #[test]
    fn test_completed_cannot_fail() {
        let mut t = JobTracker::new(JobKind::ReadingInference);
        t.advance(JobStage::Preprocessing).unwrap();
        t.advance(JobStage::WindowBuilding).unwrap();
        t.advance(JobStage::Scoring).unwrap();
        t.advance(JobStage::Completed).unwrap();
        t.fail();
        assert_eq!(t.stage(), JobStage::Completed);
    }

    #[test]
    fn test_inference_has_no_training_stage() {
        let mut t = JobTracker::new(JobKind::Inference);
        run_to_training(&mut t);
        assert!(t.advance(JobStage::Training { epoch: 1, total: 1 }).is_err());
        assert_eq!(t.advance(JobStage::Scoring).unwrap(), 70);
    }
}
