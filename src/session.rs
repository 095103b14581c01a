//! Scanner session: the façade remote callers talk to.
//!
//! The session composes:
//! - the handle registry ([`SessionState`] behind one mutex)
//! - deferred-capture artifact caching
//! - model load/save through the project store
//! - factories for long-running operations
//!
//! # Locking
//!
//! A single coarse lock guards the handle counter and both handle tables.
//! Critical sections only touch the maps; device calls, reconstruction and
//! persistence happen outside the lock, which is re-taken to publish results.
//!
//! Device-touching calls assume at most one capture in flight per device;
//! the transport is responsible for serialising them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::capture::{ArtifactKind, DeferredCapture};
use crate::engine::{
    AlgorithmDescriptor, AlgorithmEngine, CaptureDevice, ExchangeMesh, MeshCodec, ProjectStore,
    RawFrame, Reconstructor, PROJECT_FILE_EXTENSION,
};
use crate::error::SessionError;
use crate::model::{InterchangeMesh, Model, ModelSession};
use crate::operation::{
    DeferredCapturePrepare, RunAlgorithms, ScanningProcedure, ScanningProcedureSettings,
};
use crate::registry::{Handle, SessionState};

// =============================================================================
// Project Names
// =============================================================================

/// Check a project name against `^[A-Za-z0-9_-]+$`.
///
/// Names become directory and file names under the save path, so anything
/// that could traverse or escape the directory is rejected.
pub fn validate_project_name(name: &str) -> Result<(), SessionError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(SessionError::InvalidName(name.to_string()))
    }
}

/// Path of the project file for `name` under `save_path`.
pub fn project_file_path(save_path: &Path, name: &str) -> PathBuf {
    save_path
        .join(name)
        .join(format!("{}.{}", name, PROJECT_FILE_EXTENSION))
}

// =============================================================================
// Engines / Teardown Report
// =============================================================================

/// External engines the session delegates to.
#[derive(Clone)]
pub struct SessionEngines {
    pub codec: Arc<dyn MeshCodec>,
    pub store: Arc<dyn ProjectStore>,
    pub algorithms: Arc<dyn AlgorithmEngine>,
}

/// A per-model failure suppressed during [`ScannerSession::free_all`].
#[derive(Debug, Clone)]
pub struct TeardownFailure {
    pub handle: Handle,
    pub error: SessionError,
}

/// Outcome of a best-effort session teardown.
#[derive(Debug, Clone, Default)]
pub struct TeardownReport {
    /// Number of deferred captures dropped
    pub cleared_captures: usize,
    /// Models freed without error
    pub freed_models: Vec<Handle>,
    /// Models whose free reported an error (logged, not propagated)
    pub failures: Vec<TeardownFailure>,
}

/// Point-in-time counts for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub device: Option<String>,
    pub save_path: Option<PathBuf>,
    pub models: Vec<Handle>,
    pub deferred_captures: Vec<Handle>,
    pub last_handle: Handle,
}

// =============================================================================
// ScannerSession
// =============================================================================

/// Session state and operations for one scanner.
pub struct ScannerSession {
    device: Option<Arc<dyn CaptureDevice>>,

    /// Reconstruction context for immediate captures
    reconstructor: Option<Box<dyn Reconstructor>>,

    engines: SessionEngines,

    save_path: RwLock<Option<PathBuf>>,

    state: Mutex<SessionState>,

    operation_timeout: Option<Duration>,
}

impl ScannerSession {
    /// Create a session. `device` may be `None`, in which case every
    /// device-touching call fails with [`SessionError::NoDevice`].
    pub fn new(
        device: Option<Arc<dyn CaptureDevice>>,
        engines: SessionEngines,
    ) -> Result<Self, SessionError> {
        let reconstructor = match &device {
            Some(device) => Some(device.create_reconstructor().map_err(|e| {
                SessionError::reconstruction("error creating frame processor", e)
            })?),
            None => None,
        };

        match &device {
            Some(device) => info!("Scanner session created for {}", device.name()),
            None => warn!("Scanner session created without a device"),
        }

        Ok(Self {
            device,
            reconstructor,
            engines,
            save_path: RwLock::new(None),
            state: Mutex::new(SessionState::new()),
            operation_timeout: None,
        })
    }

    /// Bound the wall-clock time of every operation this session creates.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout
    }

    pub fn has_device(&self) -> bool {
        self.device.is_some()
    }

    pub fn codec(&self) -> &dyn MeshCodec {
        self.engines.codec.as_ref()
    }

    pub fn algorithm_engine(&self) -> Arc<dyn AlgorithmEngine> {
        Arc::clone(&self.engines.algorithms)
    }

    fn device(&self) -> Result<&Arc<dyn CaptureDevice>, SessionError> {
        self.device.as_ref().ok_or_else(|| {
            error!("Attempt to use scanner when no scanner is available");
            SessionError::NoDevice
        })
    }

    // =========================================================================
    // Save Path
    // =========================================================================

    pub async fn save_path(&self) -> Option<PathBuf> {
        self.save_path.read().await.clone()
    }

    /// Set or clear the directory projects are saved to and loaded from.
    pub async fn set_save_path(&self, path: Option<PathBuf>) -> Result<(), SessionError> {
        let Some(path) = path else {
            *self.save_path.write().await = None;
            info!("Project save path cleared");
            return Ok(());
        };

        let is_dir = tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            error!("Project save path is not a directory: {}", path.display());
            return Err(SessionError::InvalidSavePath(path));
        }

        info!("Project save path set to {}", path.display());
        *self.save_path.write().await = Some(path);
        Ok(())
    }

    async fn require_save_path(&self, op: &str) -> Result<PathBuf, SessionError> {
        self.save_path().await.ok_or_else(|| {
            error!("{} called but project save path not specified", op);
            SessionError::NoSavePath
        })
    }

    // =========================================================================
    // Capture
    // =========================================================================

    /// Grab one raw frame from the device.
    pub(crate) async fn capture_frame(&self, with_texture: bool) -> Result<RawFrame, SessionError> {
        self.device()?
            .capture(with_texture)
            .await
            .map_err(|e| SessionError::device("error capturing from scanner", e))
    }

    /// Reconstruct with the session's default reconstruction context.
    pub(crate) async fn reconstruct(&self, frame: &RawFrame) -> Result<InterchangeMesh, SessionError> {
        let reconstructor = self.reconstructor.as_ref().ok_or(SessionError::NoDevice)?;
        reconstructor
            .reconstruct(frame)
            .await
            .map_err(|e| SessionError::reconstruction("error reconstructing mesh", e))
    }

    /// Capture and reconstruct immediately.
    pub async fn capture(&self, with_texture: bool) -> Result<ExchangeMesh, SessionError> {
        self.device()?;
        info!("Begin scanner capture");
        let frame = self.capture_frame(with_texture).await?;
        let mesh = self.reconstruct(&frame).await?;
        let mesh = self.engines.codec.to_exchange_format(&mesh);
        info!("Scanner capture complete");
        Ok(mesh)
    }

    /// Capture (untextured) and return the mesh as binary STL.
    pub async fn capture_stl(&self) -> Result<Bytes, SessionError> {
        self.device()?;
        info!("Begin scanner capture");
        let frame = self.capture_frame(false).await?;
        let mesh = self.reconstruct(&frame).await?;
        let stl = self.engines.codec.to_stl_bytes(&mesh);
        info!("Scanner capture complete");
        Ok(stl)
    }

    /// Capture a frame and park it under a new handle without reconstructing.
    pub async fn capture_deferred(&self, with_texture: bool) -> Result<Handle, SessionError> {
        self.device()?;
        info!("Begin scanner capture");
        let frame = self.capture_frame(with_texture).await?;

        let handle = {
            let mut state = self.state.lock().await;
            let handle = state.handles.allocate();
            state.captures.insert(handle, DeferredCapture::new(frame));
            handle
        };

        info!(
            "Deferred scanner capture complete, stored deferred capture with handle: {}",
            handle
        );
        Ok(handle)
    }

    // =========================================================================
    // Deferred Capture Cache
    // =========================================================================

    /// Look up a deferred capture, returning its cached artifact or its frame.
    async fn deferred_lookup<T>(
        &self,
        handle: Handle,
        cached: impl FnOnce(&DeferredCapture) -> Option<T>,
    ) -> Result<Result<T, Arc<RawFrame>>, SessionError> {
        let state = self.state.lock().await;
        let capture = state.captures.lookup(handle).map_err(|e| {
            error!("Attempt to use invalid deferred capture handle: {}", handle);
            e
        })?;
        Ok(match cached(capture) {
            Some(hit) => Ok(hit),
            None => Err(capture.frame()),
        })
    }

    /// Reconstruct a deferred frame with a fresh reconstruction context.
    async fn reconstruct_deferred(&self, frame: &RawFrame) -> Result<InterchangeMesh, SessionError> {
        let reconstructor = self
            .device()?
            .create_reconstructor()
            .map_err(|e| SessionError::reconstruction("error creating frame processor", e))?;
        reconstructor
            .reconstruct(frame)
            .await
            .map_err(|e| SessionError::reconstruction("error reconstructing mesh", e))
    }

    /// Exchange mesh for a deferred capture, reconstructing on first request.
    pub async fn get_deferred_capture_mesh(
        &self,
        handle: Handle,
    ) -> Result<Arc<ExchangeMesh>, SessionError> {
        let frame = match self.deferred_lookup(handle, |c| c.cached_mesh()).await? {
            Ok(mesh) => {
                info!("Deferred capture mesh returned from cached value");
                return Ok(mesh);
            }
            Err(frame) => frame,
        };

        let mesh = self.reconstruct_deferred(&frame).await?;
        let mesh = Arc::new(self.engines.codec.to_exchange_format(&mesh));
        info!("Deferred capture to mesh complete");

        self.publish(handle, ArtifactKind::Mesh, |c| c.store_mesh(Arc::clone(&mesh)))
            .await;
        Ok(mesh)
    }

    /// STL bytes for a deferred capture, reconstructing on first request.
    pub async fn get_deferred_capture_stl(&self, handle: Handle) -> Result<Bytes, SessionError> {
        let frame = match self.deferred_lookup(handle, |c| c.cached_stl()).await? {
            Ok(stl) => {
                info!("Deferred capture stl mesh returned from cached value");
                return Ok(stl);
            }
            Err(frame) => frame,
        };

        let mesh = self.reconstruct_deferred(&frame).await?;
        let stl = self.engines.codec.to_stl_bytes(&mesh);
        info!("Deferred capture to stl bytes complete");

        self.publish(handle, ArtifactKind::Stl, |c| c.store_stl(stl.clone()))
            .await;
        Ok(stl)
    }

    /// Store a computed artifact if the capture is still registered.
    async fn publish(
        &self,
        handle: Handle,
        kind: ArtifactKind,
        store: impl FnOnce(&mut DeferredCapture),
    ) {
        let mut state = self.state.lock().await;
        match state.captures.lookup_mut(handle) {
            Ok(capture) => store(capture),
            Err(_) => debug!(
                "Deferred capture {} freed during reconstruction, {} not cached",
                handle, kind
            ),
        }
    }

    /// Drop deferred captures. Unknown handles are ignored.
    pub async fn deferred_capture_free(&self, handles: &[Handle]) {
        let mut state = self.state.lock().await;
        for &handle in handles {
            if state.captures.remove(handle).is_some() {
                debug!("Freed deferred capture: {}", handle);
            }
        }
    }

    pub async fn deferred_capture_handles(&self) -> Vec<Handle> {
        self.state.lock().await.captures.handles()
    }

    /// Whether an artifact of `kind` is cached for `handle`.
    pub async fn is_deferred_capture_prepared(
        &self,
        handle: Handle,
        kind: ArtifactKind,
    ) -> Result<bool, SessionError> {
        let state = self.state.lock().await;
        Ok(state.captures.lookup(handle)?.is_prepared(kind))
    }

    async fn validate_deferred_handles(&self, handles: &[Handle]) -> Result<(), SessionError> {
        let state = self.state.lock().await;
        for &handle in handles {
            state.captures.lookup(handle).map_err(|e| {
                error!("Attempt to use invalid deferred capture handle: {}", handle);
                e
            })?;
        }
        Ok(())
    }

    /// Batch-reconstruct exchange meshes for the given captures.
    pub async fn deferred_capture_prepare(
        self: &Arc<Self>,
        handles: Vec<Handle>,
    ) -> Result<DeferredCapturePrepare, SessionError> {
        self.validate_deferred_handles(&handles).await?;
        Ok(DeferredCapturePrepare::new(
            Arc::clone(self),
            handles,
            true,
            false,
        ))
    }

    /// Batch-reconstruct STL bytes for the given captures.
    pub async fn deferred_capture_prepare_stl(
        self: &Arc<Self>,
        handles: Vec<Handle>,
    ) -> Result<DeferredCapturePrepare, SessionError> {
        self.validate_deferred_handles(&handles).await?;
        Ok(DeferredCapturePrepare::new(
            Arc::clone(self),
            handles,
            false,
            true,
        ))
    }

    // =========================================================================
    // Scanning Procedure
    // =========================================================================

    /// Create a guided scanning procedure. No frame is captured until the
    /// first advance.
    pub fn run_scanning_procedure(
        self: &Arc<Self>,
        settings: ScanningProcedureSettings,
    ) -> Result<ScanningProcedure, SessionError> {
        self.device()?;
        let procedure = ScanningProcedure::new(Arc::clone(self), settings);
        info!("Scanning procedure created, advance to begin");
        Ok(procedure)
    }

    // =========================================================================
    // Models
    // =========================================================================

    /// Register a model and return its handle.
    pub async fn add_model(&self, model: Model) -> Handle {
        let mut state = self.state.lock().await;
        let handle = state.handles.allocate();
        state.models.insert(handle, Arc::new(ModelSession::new(model)));
        info!("Created model handle: {}", handle);
        handle
    }

    pub async fn model(&self, handle: Handle) -> Result<Arc<ModelSession>, SessionError> {
        let state = self.state.lock().await;
        state.models.lookup(handle).cloned().map_err(|e| {
            error!("Attempt to get invalid model: {}", handle);
            e
        })
    }

    pub async fn model_handles(&self) -> Vec<Handle> {
        self.state.lock().await.models.handles()
    }

    /// Unregister a model and release its engine resources.
    ///
    /// Release is best-effort: once the handle is erased a release failure
    /// is logged and the call still succeeds.
    pub async fn model_free(&self, handle: Handle) -> Result<(), SessionError> {
        match self.free_model(handle).await {
            Err(error @ SessionError::InvalidHandle { .. }) => Err(error),
            Err(error) => {
                warn!("Release failed for freed model {}: {}", handle, error);
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    /// Erase `handle`, then release the model, reporting release failures.
    async fn free_model(&self, handle: Handle) -> Result<(), SessionError> {
        let model = {
            let mut state = self.state.lock().await;
            state.models.erase(handle).map_err(|e| {
                error!("Attempt to free invalid model: {}", handle);
                e
            })?
        };

        let model = model.read().await;
        self.engines
            .algorithms
            .release_model(&model)
            .await
            .map_err(|e| SessionError::algorithm(format!("error releasing model {}", handle), e))?;

        info!("Freed model: {}", handle);
        Ok(())
    }

    /// Load every entry of project `name` into a new model.
    pub async fn model_load(&self, name: &str) -> Result<Handle, SessionError> {
        let save_path = self.require_save_path("model_load").await?;
        validate_project_name(name).map_err(|e| {
            error!("Invalid project name specified: {}", name);
            e
        })?;

        let file_path = project_file_path(&save_path, name);
        info!("Begin load model from file {}", file_path.display());

        let store = &self.engines.store;
        let project = store
            .open_project(&file_path)
            .await
            .map_err(|e| SessionError::persistence("could not open project", e))?;
        let entries = store
            .list_entries(&project)
            .await
            .map_err(|e| SessionError::persistence("could not get entry info", e))?;
        let model = store
            .load(&project, &entries)
            .await
            .map_err(|e| SessionError::persistence("error loading model", e))?;

        let handle = self.add_model(model).await;
        info!(
            "Loaded model: {} from file {}",
            handle,
            file_path.display()
        );
        Ok(handle)
    }

    /// Save a model as a brand-new project `name`.
    ///
    /// Refuses to touch an existing project directory; every save gets a
    /// fresh project id.
    pub async fn model_save(&self, handle: Handle, name: &str) -> Result<(), SessionError> {
        let save_path = self.require_save_path("model_save").await?;
        validate_project_name(name).map_err(|e| {
            error!("Invalid project name specified: {}", name);
            e
        })?;

        let project_dir = save_path.join(name);
        if tokio::fs::try_exists(&project_dir).await.unwrap_or(true) {
            error!("Project directory already exists: {}", project_dir.display());
            return Err(SessionError::AlreadyExists(project_dir));
        }

        let model = self.model(handle).await?;

        tokio::fs::create_dir(&project_dir)
            .await
            .map_err(|e| SessionError::io("could not create project directory", e))?;
        let file_path = project_file_path(&save_path, name);
        info!(
            "Begin save model: {} to file {}",
            handle,
            file_path.display()
        );

        if let Err(e) = self.write_project(&file_path, &model).await {
            if let Err(remove_error) = tokio::fs::remove_dir_all(&project_dir).await {
                error!(
                    "Could not remove project directory {}: {}",
                    project_dir.display(),
                    remove_error
                );
            }
            return Err(e);
        }

        info!("Saved model: {} to file {}", handle, file_path.display());
        Ok(())
    }

    async fn write_project(
        &self,
        file_path: &Path,
        model: &ModelSession,
    ) -> Result<(), SessionError> {
        let store = &self.engines.store;
        let project = store
            .create_project(file_path, Uuid::new_v4())
            .await
            .map_err(|e| SessionError::persistence("error creating project saver", e))?;
        let model = model.read().await;
        store
            .save(&project, &model)
            .await
            .map_err(|e| SessionError::persistence("error saving model", e))
    }

    // =========================================================================
    // Algorithms
    // =========================================================================

    /// Default parameters for `algorithm` against a model.
    pub async fn initialize_algorithm(
        &self,
        model_handle: Handle,
        algorithm: &str,
    ) -> Result<serde_json::Value, SessionError> {
        let model = self.model(model_handle).await?;
        let model = model.read().await;
        self.engines
            .algorithms
            .initialize(algorithm, &model)
            .map_err(|e| SessionError::algorithm("error initializing algorithm", e))
    }

    /// Create a batch run of `algorithms` against a model.
    pub async fn run_algorithms(
        &self,
        model_handle: Handle,
        algorithms: Vec<AlgorithmDescriptor>,
    ) -> Result<RunAlgorithms, SessionError> {
        let model = self.model(model_handle).await?;
        let run = RunAlgorithms::new(
            self.algorithm_engine(),
            model_handle,
            model,
            algorithms,
            self.operation_timeout,
        );
        info!("RunAlgorithms operation created, advance to begin");
        Ok(run)
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Drop every deferred capture and free every model, best-effort.
    ///
    /// Per-model failures are logged and collected in the report; they never
    /// stop the loop.
    pub async fn free_all(&self) -> TeardownReport {
        let (model_handles, cleared_captures) = {
            let mut state = self.state.lock().await;
            let cleared = state.captures.len();
            state.captures.clear();
            (state.models.handles(), cleared)
        };

        let mut report = TeardownReport {
            cleared_captures,
            ..Default::default()
        };

        for handle in model_handles {
            match self.free_model(handle).await {
                Ok(()) => report.freed_models.push(handle),
                Err(error) => {
                    error!("Error freeing model handle {}: {}", handle, error);
                    report.failures.push(TeardownFailure { handle, error });
                }
            }
        }

        report
    }

    pub async fn summary(&self) -> SessionSummary {
        let save_path = self.save_path().await;
        let state = self.state.lock().await;
        SessionSummary {
            device: self.device.as_ref().map(|d| d.name().to_string()),
            save_path,
            models: state.models.handles(),
            deferred_captures: state.captures.handles(),
            last_handle: state.handles.last(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
