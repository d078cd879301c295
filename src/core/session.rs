//! Interactive analysis session
//!
//! Holds the state a map front-end accumulates (selected year, current AOI,
//! comparison points) and drives point capture through an explicit state
//! machine: `Idle -> AwaitingPointClick -> Idle`.

use crate::config::PipelineConfig;
use crate::core::pipeline::{AnalysisReport, MonthlyNdviPipeline};
use crate::io::backend::ImageryBackend;
use crate::types::{AreaOfInterest, ComparisonPoint, GeoPoint, NdviError, NdviResult};

/// Point-capture state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    AwaitingPointClick,
}

/// Discrete commands issued by the front-end
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    SelectYear(i32),
    DrawAoi(AreaOfInterest),
    BeginAddPoint,
    MapClick(GeoPoint),
    CancelPointCapture,
}

/// Outcome of a command
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    YearSelected(i32),
    AoiReplaced,
    AwaitingPoint,
    PointAdded(ComparisonPoint),
    ClickIgnored,
    CaptureCancelled,
}

/// Per-user analysis state; no process-wide globals
#[derive(Debug, Clone)]
pub struct AnalysisSession {
    supported_years: Vec<i32>,
    year: i32,
    aoi: Option<AreaOfInterest>,
    points: Vec<ComparisonPoint>,
    next_point: usize,
    state: CaptureState,
}

impl AnalysisSession {
    /// New session with the latest supported year selected
    pub fn new(config: &PipelineConfig) -> NdviResult<Self> {
        let year = config.supported_years.iter().copied().max().ok_or_else(|| {
            NdviError::UserInput("At least one supported year is required".to_string())
        })?;

        Ok(Self {
            supported_years: config.supported_years.clone(),
            year,
            aoi: None,
            points: Vec::new(),
            next_point: 1,
            state: CaptureState::Idle,
        })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn aoi(&self) -> Option<&AreaOfInterest> {
        self.aoi.as_ref()
    }

    pub fn points(&self) -> &[ComparisonPoint] {
        &self.points
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn apply(&mut self, command: SessionCommand) -> NdviResult<SessionEvent> {
        match command {
            SessionCommand::SelectYear(year) => self.select_year(year),
            SessionCommand::DrawAoi(aoi) => Ok(self.draw_aoi(aoi)),
            SessionCommand::BeginAddPoint => Ok(self.begin_add_point()),
            SessionCommand::MapClick(location) => Ok(self.map_click(location)),
            SessionCommand::CancelPointCapture => Ok(self.cancel_point_capture()),
        }
    }

    /// Change the analysis year; an unsupported year leaves the selection as is
    pub fn select_year(&mut self, year: i32) -> NdviResult<SessionEvent> {
        if !self.supported_years.contains(&year) {
            return Err(NdviError::UserInput(format!(
                "Year {} is not supported (choose one of {:?})",
                year, self.supported_years
            )));
        }
        log::info!("Analysis year set to {}", year);
        self.year = year;
        Ok(SessionEvent::YearSelected(year))
    }

    /// Replace the current AOI
    pub fn draw_aoi(&mut self, aoi: AreaOfInterest) -> SessionEvent {
        log::info!("AOI set: {:?}", aoi.bounding_box());
        self.aoi = Some(aoi);
        SessionEvent::AoiReplaced
    }

    /// Arm point capture; repeated requests do not stack
    pub fn begin_add_point(&mut self) -> SessionEvent {
        if self.state == CaptureState::AwaitingPointClick {
            log::debug!("Already waiting for a point click");
        }
        self.state = CaptureState::AwaitingPointClick;
        SessionEvent::AwaitingPoint
    }

    /// Record a map click as `Point N` when capture is armed
    pub fn map_click(&mut self, location: GeoPoint) -> SessionEvent {
        match self.state {
            CaptureState::Idle => {
                log::debug!("Map click at ({}, {}) ignored while idle", location.lon, location.lat);
                SessionEvent::ClickIgnored
            }
            CaptureState::AwaitingPointClick => {
                let point = ComparisonPoint {
                    name: format!("Point {}", self.next_point),
                    location,
                };
                self.next_point += 1;
                self.state = CaptureState::Idle;
                log::info!("Added {} at ({:.5}, {:.5})", point.name, location.lon, location.lat);
                self.points.push(point.clone());
                SessionEvent::PointAdded(point)
            }
        }
    }

    pub fn cancel_point_capture(&mut self) -> SessionEvent {
        self.state = CaptureState::Idle;
        SessionEvent::CaptureCancelled
    }

    /// Run the pipeline for the current year, AOI and points.
    ///
    /// Requires an AOI. Failures leave the session state untouched.
    pub fn run_analysis<B: ImageryBackend + ?Sized>(
        &self,
        pipeline: &MonthlyNdviPipeline,
        backend: &B,
    ) -> NdviResult<AnalysisReport> {
        let aoi = self.aoi.as_ref().ok_or_else(|| {
            NdviError::UserInput("Draw an area of interest before running the analysis".to_string())
        })?;

        log::info!(
            "Running analysis for {} with {} comparison points",
            self.year,
            self.points.len()
        );
        pipeline.run(backend, self.year, aoi, &self.points).map_err(|e| {
            log::error!("Analysis for {} failed: {}", self.year, e);
            e
        })
    }
}
