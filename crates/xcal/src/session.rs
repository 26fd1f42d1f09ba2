//! End-to-end calibration session: open both cameras, capture confirmed
//! views, solve and store.

use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use xcal_capture::{
    AccumulatorParams, CaptureError, CaptureScheduler, ControlReceiver, CorrespondenceAccumulator,
    FinishReason, SchedulerParams,
};
use xcal_core::{load_json, CorrespondenceSet, ImageSize, JsonIoError, TargetGeometry};
use xcal_detect::{CircleGridDetector, CircleGridParams};
use xcal_device::{open_device, DeviceAdapter, DeviceConfig, OpenError};
use xcal_solve::{
    store, CalibrationResult, ExtrinsicSolver, SolveError, SolveReport, SolverParams, StoreError,
};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Everything a calibration run needs, as read from a JSON file.
///
/// Camera A is the event camera (`cameraMatrix1` in the output file),
/// camera B the fixed-rate depth camera.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub camera_a: DeviceConfig,
    pub camera_b: DeviceConfig,
    pub target: TargetGeometry,
    #[serde(default)]
    pub detector: CircleGridParams,
    #[serde(default)]
    pub accumulator: AccumulatorParams,
    #[serde(default)]
    pub scheduler: SchedulerParams,
    #[serde(default)]
    pub solver: SolverParams,
    pub output_path: PathBuf,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read session config: {0}")]
    Read(#[from] JsonIoError),
    #[error("invalid session config: {0}")]
    Invalid(String),
}

impl SessionConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Self = load_json(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera_a.id == self.camera_b.id {
            return Err(ConfigError::Invalid(format!(
                "both cameras are named `{}`",
                self.camera_a.id
            )));
        }
        if self.accumulator.target_views < self.solver.min_views {
            return Err(ConfigError::Invalid(format!(
                "target_views ({}) is below the solver's min_views ({})",
                self.accumulator.target_views, self.solver.min_views
            )));
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("output_path is empty".into()));
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Open(#[from] OpenError),
    #[error("camera resolutions differ: A is {a}, B is {b}")]
    ResolutionMismatch { a: ImageSize, b: ImageSize },
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("session aborted after {views} views")]
    Aborted { views: usize },
    /// The collected views are handed back so the solve can be retried.
    #[error("solve failed: {source}")]
    Solve {
        #[source]
        source: SolveError,
        correspondences: Box<CorrespondenceSet>,
    },
    /// The result is handed back so it can be written elsewhere.
    #[error("failed to store calibration: {source}")]
    Store {
        #[source]
        source: StoreError,
        result: Box<CalibrationResult>,
    },
}

#[derive(Debug)]
pub struct SessionOutcome {
    pub result: CalibrationResult,
    pub report: SolveReport,
    pub finish: FinishReason,
    pub output_path: PathBuf,
}

/// Open both cameras, refusing pairs with different resolutions.
pub fn open_cameras(
    config: &SessionConfig,
) -> Result<(Box<dyn DeviceAdapter + Send>, Box<dyn DeviceAdapter + Send>), SessionError> {
    let mut a = open_device(&config.camera_a)?;
    let mut b = match open_device(&config.camera_b) {
        Ok(b) => b,
        Err(e) => {
            a.close();
            return Err(e.into());
        }
    };
    if a.resolution() != b.resolution() {
        let (ra, rb) = (a.resolution(), b.resolution());
        a.close();
        b.close();
        return Err(SessionError::ResolutionMismatch { a: ra, b: rb });
    }
    Ok((a, b))
}

/// Run a full session. `control` carries the operator's confirmations.
#[cfg_attr(feature = "tracing", instrument(level = "info", skip_all))]
pub fn run_session(
    config: &SessionConfig,
    control: ControlReceiver,
) -> Result<SessionOutcome, SessionError> {
    config.validate()?;
    let (camera_a, camera_b) = open_cameras(config)?;
    let intrinsics_a = camera_a.intrinsics().clone();
    let intrinsics_b = camera_b.intrinsics().clone();
    let image_size = camera_a.resolution();

    let mut scheduler = CaptureScheduler::new(
        camera_a,
        camera_b,
        CircleGridDetector::new(config.detector.clone()),
        config.target,
        CorrespondenceAccumulator::new(config.accumulator.clone()),
        control,
        config.scheduler.clone(),
    );
    let finish = scheduler.run()?;
    let accumulator = scheduler.into_accumulator();
    if finish == FinishReason::Stopped {
        return Err(SessionError::Aborted {
            views: accumulator.count(),
        });
    }
    if finish != FinishReason::Complete {
        warn!(
            "capture ended early ({finish}) with {}/{} views",
            accumulator.count(),
            accumulator.target_views()
        );
    }

    let correspondences = accumulator.snapshot();
    let solver = ExtrinsicSolver::new(config.solver.clone());
    let (result, report) = match solver.solve_detailed(
        &correspondences,
        &intrinsics_a,
        &intrinsics_b,
        image_size,
    ) {
        Ok(solved) => solved,
        Err(source) => {
            return Err(SessionError::Solve {
                source,
                correspondences: Box::new(correspondences),
            })
        }
    };

    if let Err(source) = store::save(&result, &config.output_path) {
        return Err(SessionError::Store {
            source,
            result: Box::new(result),
        });
    }
    info!(
        "calibration written to {} (rms {:.4} px)",
        config.output_path.display(),
        result.rms_error
    );
    Ok(SessionOutcome {
        result,
        report,
        finish,
        output_path: config.output_path.clone(),
    })
}
