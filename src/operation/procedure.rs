//! Guided multi-capture scanning procedure.
//!
//! Each step captures one frame, reconstructs it with the session's default
//! reconstructor and asks the [`ProcedurePolicy`] whether to keep it and
//! whether the scan is finished. On completion the accepted frames become a
//! one-scan [`Model`] registered in the session.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::SessionError;
use crate::model::{InterchangeMesh, Model, Scan, ScanFrame, Transform};
use crate::registry::Handle;
use crate::session::ScannerSession;

use super::{Advance, Operation, OperationState, StepCursor};

const DEFAULT_TARGET_FRAMES: usize = 10;

/// Client-supplied procedure settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanningProcedureSettings {
    pub with_texture: bool,
    /// Frames to accept before finishing
    pub target_frames: usize,
    /// Capture attempts before giving up; defaults to twice the target
    pub max_attempts: Option<usize>,
    /// Frames with fewer triangles are rejected
    pub min_triangles: usize,
}

impl Default for ScanningProcedureSettings {
    fn default() -> Self {
        Self {
            with_texture: false,
            target_frames: DEFAULT_TARGET_FRAMES,
            max_attempts: None,
            min_triangles: 1,
        }
    }
}

/// Verdict on one captured frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameAssessment {
    pub accepted: bool,
    /// Progress towards the target in `[0, 1]`
    pub coverage: f64,
    pub finished: bool,
}

/// Decides which frames to keep and when the procedure ends.
pub trait ProcedurePolicy: Send + Sync {
    /// `attempt` is the 0-based step index; `accepted_so_far` excludes this frame.
    fn assess(&self, attempt: usize, accepted_so_far: usize, mesh: &InterchangeMesh)
        -> FrameAssessment;
}

/// Accept frames with enough triangles until a target count is reached.
#[derive(Debug, Clone)]
pub struct FrameTargetPolicy {
    target_frames: usize,
    max_attempts: usize,
    min_triangles: usize,
}

impl FrameTargetPolicy {
    pub fn from_settings(settings: &ScanningProcedureSettings) -> Self {
        let target_frames = settings.target_frames.max(1);
        Self {
            target_frames,
            max_attempts: settings
                .max_attempts
                .unwrap_or_else(|| target_frames.saturating_mul(2))
                .max(1),
            min_triangles: settings.min_triangles,
        }
    }
}

impl ProcedurePolicy for FrameTargetPolicy {
    fn assess(
        &self,
        attempt: usize,
        accepted_so_far: usize,
        mesh: &InterchangeMesh,
    ) -> FrameAssessment {
        let accepted = mesh.triangle_count() >= self.min_triangles;
        let total = accepted_so_far + usize::from(accepted);
        FrameAssessment {
            accepted,
            coverage: (total as f64 / self.target_frames as f64).min(1.0),
            finished: total >= self.target_frames || attempt + 1 >= self.max_attempts,
        }
    }
}

/// Status yielded after each capture.
#[derive(Debug, Clone, Serialize)]
pub struct ScanningProcedureStatus {
    pub step: usize,
    pub accepted: bool,
    pub frames_accepted: usize,
    pub triangle_count: usize,
    pub coverage: f64,
    /// Set once the captured scan is registered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_handle: Option<Handle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Step-driven scanning procedure bound to a session.
pub struct ScanningProcedure {
    session: Arc<ScannerSession>,
    settings: ScanningProcedureSettings,
    policy: Box<dyn ProcedurePolicy>,
    frames: Vec<ScanFrame>,
    cursor: StepCursor,
}

impl ScanningProcedure {
    pub fn new(session: Arc<ScannerSession>, settings: ScanningProcedureSettings) -> Self {
        let policy = Box::new(FrameTargetPolicy::from_settings(&settings));
        let timeout = session.operation_timeout();
        Self {
            session,
            settings,
            policy,
            frames: Vec::new(),
            cursor: StepCursor::new(timeout),
        }
    }

    /// Replace the default frame-target policy.
    pub fn with_policy(mut self, policy: impl ProcedurePolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn settings(&self) -> &ScanningProcedureSettings {
        &self.settings
    }

    async fn capture_and_reconstruct(&self) -> Result<(InterchangeMesh, Transform), SessionError> {
        let frame = self.session.capture_frame(self.settings.with_texture).await?;
        let mesh = self.session.reconstruct(&frame).await?;
        Ok((mesh, frame.pose))
    }
}

#[async_trait]
impl Operation for ScanningProcedure {
    type Status = ScanningProcedureStatus;

    async fn advance(&mut self) -> Result<Advance<ScanningProcedureStatus>, SessionError> {
        let step = self.cursor.enter()?;

        let (mesh, pose) = match self.capture_and_reconstruct().await {
            Ok(captured) => captured,
            Err(e) => {
                error!("Scanning procedure step {} failed: {}", step, e);
                self.cursor.finish(OperationState::Failed);
                return Err(e);
            }
        };

        let assessment = self.policy.assess(step, self.frames.len(), &mesh);
        let triangle_count = mesh.triangle_count();
        if assessment.accepted {
            self.frames.push(ScanFrame {
                mesh,
                transform: pose,
            });
        } else {
            debug!(
                "Scanning procedure step {} rejected frame with {} triangles",
                step, triangle_count
            );
        }
        self.cursor.complete_step();

        let mut status = ScanningProcedureStatus {
            step,
            accepted: assessment.accepted,
            frames_accepted: self.frames.len(),
            triangle_count,
            coverage: assessment.coverage,
            model_handle: None,
            error: None,
        };

        if !assessment.finished {
            return Ok(Advance {
                status,
                done: false,
            });
        }

        if self.frames.is_empty() {
            warn!("Scanning procedure finished without accepting any frame");
            status.error = Some("no frames accepted".to_string());
            self.cursor.finish(OperationState::Failed);
        } else {
            let model = Model {
                scans: vec![Scan {
                    transform: Transform::identity(),
                    frames: std::mem::take(&mut self.frames),
                }],
                composite: None,
            };
            let handle = self.session.add_model(model).await;
            info!(
                "Scanning procedure complete after {} step(s), model handle: {}",
                self.cursor.steps_taken(),
                handle
            );
            status.model_handle = Some(handle);
            self.cursor.finish(OperationState::Completed);
        }

        Ok(Advance { status, done: true })
    }

    fn cancel(&mut self) -> bool {
        let cancelled = self.cursor.cancel();
        if cancelled {
            info!(
                "Scanning procedure cancelled, discarding {} frame(s)",
                self.frames.len()
            );
            self.frames.clear();
        }
        cancelled
    }

    fn state(&self) -> OperationState {
        self.cursor.state()
    }
}
