//! Stroke broadcast engine — live segments, two-step clear, debounced snapshot.
//!
//! DESIGN
//! ======
//! Like the text engine this is a sans-IO state machine over a [`Surface`].
//! Pointer input arrives in surface pixels; every move renders a smoothed
//! segment locally and hands back a [`StrokeSegment`] in normalized
//! coordinates for the driver to broadcast. Peers denormalize against their
//! own surface size, so replay is resolution-independent.
//!
//! Pointer-up schedules a snapshot export after the debounce window. The
//! export itself runs here (it is CPU work on the surface); persisting it is
//! the driver's job.
//!
//! ERROR HANDLING
//! ==============
//! Remote segments that fail validation are rejected with
//! [`StrokeError::InvalidSegment`]; the driver logs and drops them. Snapshot
//! export failures are logged here and produce no snapshot.

use std::time::Duration;

use frames::ErrorCode;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::raster::{smooth_path, Brush, Color, Point, RasterError, Size, Surface};

/// Broadcast event carrying one [`StrokeSegment`].
pub const DRAW_EVENT: &str = "draw";
/// Broadcast event telling peers to wipe their raster.
pub const CLEAR_EVENT: &str = "clear";

pub const PALETTE: [&str; 6] = ["#f43f5e", "#ec4899", "#8b5cf6", "#3b82f6", "#10b981", "#ffffff"];
pub const WIDTHS: [f64; 4] = [2.0, 6.0, 12.0, 24.0];
pub const DEFAULT_COLOR: &str = PALETTE[0];
pub const DEFAULT_WIDTH: f64 = 6.0;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StrokeError {
    #[error("invalid stroke segment: {0}")]
    InvalidSegment(String),

    #[error("invalid brush: {0}")]
    InvalidBrush(String),

    #[error(transparent)]
    Raster(#[from] RasterError),
}

impl ErrorCode for StrokeError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidSegment(_) => "E_STROKE_SEGMENT",
            Self::InvalidBrush(_) => "E_STROKE_BRUSH",
            Self::Raster(e) => e.error_code(),
        }
    }
}

// =============================================================================
// SEGMENT
// =============================================================================

/// One line segment on the wire. Coordinates are fractions of the sender's
/// surface; the width stays in pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeSegment {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub color: String,
    #[serde(rename = "width", alias = "strokeWidth")]
    pub stroke_width: f64,
}

fn normalize(value: f64, extent: u32) -> f64 {
    (value / f64::from(extent)).clamp(0.0, 1.0)
}

impl StrokeSegment {
    /// Normalize a pixel-space segment against `size`. `None` for an unsized
    /// surface.
    #[must_use]
    pub fn from_pixels(from: Point, to: Point, size: Size, brush: &Brush) -> Option<Self> {
        if size.is_empty() {
            return None;
        }
        Some(Self {
            x1: normalize(from.x, size.width),
            y1: normalize(from.y, size.height),
            x2: normalize(to.x, size.width),
            y2: normalize(to.y, size.height),
            color: brush.color.clone(),
            stroke_width: brush.width,
        })
    }

    /// Pixel-space endpoints on a surface of `size`.
    #[must_use]
    pub fn endpoints(&self, size: Size) -> (Point, Point) {
        let w = f64::from(size.width);
        let h = f64::from(size.height);
        (Point::new(self.x1 * w, self.y1 * h), Point::new(self.x2 * w, self.y2 * h))
    }

    #[must_use]
    pub fn brush(&self) -> Brush {
        Brush { color: self.color.clone(), width: self.stroke_width }
    }

    /// Check coordinates are finite and inside `[0, 1]`, and the width is a
    /// positive number.
    ///
    /// # Errors
    ///
    /// Returns [`StrokeError::InvalidSegment`] naming the first bad field.
    pub fn validate(&self) -> Result<(), StrokeError> {
        for (name, value) in [("x1", self.x1), ("y1", self.y1), ("x2", self.x2), ("y2", self.y2)] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(StrokeError::InvalidSegment(format!("{name} out of range: {value}")));
            }
        }
        if !self.stroke_width.is_finite() || self.stroke_width <= 0.0 {
            return Err(StrokeError::InvalidSegment(format!("width: {}", self.stroke_width)));
        }
        Ok(())
    }
}

// =============================================================================
// OUTCOMES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    /// First press. A second press before `until` clears.
    Armed { until: Instant },
    /// Second press inside the window. The driver clears the persisted
    /// snapshot and broadcasts [`CLEAR_EVENT`].
    Cleared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeOutcome {
    /// Existing raster kept (top-left anchored).
    Preserved,
    /// First sizing; the driver fetches the latest snapshot and calls
    /// [`StrokeEngine::restore_snapshot`].
    NeedsSnapshot,
}

// =============================================================================
// ENGINE
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct StrokeTimings {
    pub snapshot_debounce: Duration,
    pub clear_confirm: Duration,
}

pub struct StrokeEngine<S: Surface> {
    surface: S,
    brush: Brush,
    pen_enabled: bool,
    last_point: Option<Point>,
    timings: StrokeTimings,
    snapshot_due: Option<Instant>,
    clear_armed_until: Option<Instant>,
}

impl<S: Surface> StrokeEngine<S> {
    pub fn new(surface: S, timings: StrokeTimings) -> Self {
        Self {
            surface,
            brush: Brush { color: DEFAULT_COLOR.into(), width: DEFAULT_WIDTH },
            pen_enabled: true,
            last_point: None,
            timings,
            snapshot_due: None,
            clear_armed_until: None,
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn brush(&self) -> &Brush {
        &self.brush
    }

    pub fn is_drawing(&self) -> bool {
        self.last_point.is_some()
    }

    pub fn pen_enabled(&self) -> bool {
        self.pen_enabled
    }

    pub fn clear_armed(&self, now: Instant) -> bool {
        self.clear_armed_until.is_some_and(|until| now < until)
    }

    pub fn has_pending_snapshot(&self) -> bool {
        self.snapshot_due.is_some()
    }

    /// Earliest of the snapshot deadline and the clear window expiry.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.snapshot_due, self.clear_armed_until) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // -------------------------------------------------------------------------
    // Brush
    // -------------------------------------------------------------------------

    /// # Errors
    ///
    /// Returns [`StrokeError::InvalidBrush`] for an unparseable color or a
    /// non-positive width.
    pub fn set_brush(&mut self, color: &str, width: f64) -> Result<(), StrokeError> {
        Color::parse_hex(color).map_err(|e| StrokeError::InvalidBrush(e.to_string()))?;
        if !width.is_finite() || width <= 0.0 {
            return Err(StrokeError::InvalidBrush(format!("width: {width}")));
        }
        self.brush = Brush { color: color.to_owned(), width };
        Ok(())
    }

    /// Disabling the pen also ends a stroke in progress.
    pub fn set_pen_enabled(&mut self, enabled: bool) {
        self.pen_enabled = enabled;
        if !enabled {
            self.last_point = None;
        }
    }

    // -------------------------------------------------------------------------
    // Local pointer lifecycle
    // -------------------------------------------------------------------------

    /// Pointer down. Returns `true` when a stroke actually started.
    pub fn start_stroke(&mut self, at: Point) -> bool {
        if !self.pen_enabled || self.surface.size().is_empty() {
            return false;
        }
        self.last_point = Some(at);
        true
    }

    /// Pointer move. Renders locally, then returns the segment to broadcast.
    pub fn continue_stroke(&mut self, to: Point) -> Option<StrokeSegment> {
        let from = self.last_point?;
        if let Err(e) = self.surface.stroke_path(&smooth_path(from, to), &self.brush) {
            warn!(error = %e, "local stroke render failed");
        }
        self.last_point = Some(to);
        StrokeSegment::from_pixels(from, to, self.surface.size(), &self.brush)
    }

    /// Pointer up. Returns `true` when a stroke was in progress; the snapshot
    /// deadline then moves to `now + snapshot_debounce`.
    pub fn end_stroke(&mut self, now: Instant) -> bool {
        if self.last_point.take().is_none() {
            return false;
        }
        self.snapshot_due = Some(now + self.timings.snapshot_debounce);
        true
    }

    // -------------------------------------------------------------------------
    // Remote events
    // -------------------------------------------------------------------------

    /// Rasterize a peer's segment against the local surface size.
    ///
    /// # Errors
    ///
    /// Returns [`StrokeError`] for an invalid segment or an unpaintable color.
    pub fn on_remote_stroke(&mut self, segment: &StrokeSegment) -> Result<(), StrokeError> {
        segment.validate()?;
        let (from, to) = segment.endpoints(self.surface.size());
        self.surface.stroke_path(&smooth_path(from, to), &segment.brush())?;
        Ok(())
    }

    /// A peer cleared. Wipes the local raster only.
    pub fn on_remote_clear(&mut self) {
        debug!("remote clear");
        self.surface.clear();
        self.snapshot_due = None;
    }

    // -------------------------------------------------------------------------
    // Clear
    // -------------------------------------------------------------------------

    pub fn request_clear(&mut self, now: Instant) -> ClearOutcome {
        if self.clear_armed(now) {
            self.clear_armed_until = None;
            self.surface.clear();
            self.snapshot_due = None;
            return ClearOutcome::Cleared;
        }
        let until = now + self.timings.clear_confirm;
        self.clear_armed_until = Some(until);
        ClearOutcome::Armed { until }
    }

    /// Disarm an expired clear window. Returns `true` when it expired at this
    /// call.
    pub fn expire_clear(&mut self, now: Instant) -> bool {
        match self.clear_armed_until {
            Some(until) if now >= until => {
                self.clear_armed_until = None;
                true
            }
            _ => false,
        }
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    /// Export the raster once the snapshot deadline has passed.
    pub fn poll_snapshot(&mut self, now: Instant) -> Option<String> {
        match self.snapshot_due {
            Some(due) if now >= due => self.flush_snapshot(),
            _ => None,
        }
    }

    /// Export a pending snapshot immediately.
    pub fn flush_snapshot(&mut self) -> Option<String> {
        self.snapshot_due.take()?;
        match self.surface.export_snapshot() {
            Ok(uri) => Some(uri),
            Err(e) => {
                warn!(error = %e, "snapshot export failed");
                None
            }
        }
    }

    /// Paint a stored snapshot beneath the current raster.
    ///
    /// # Errors
    ///
    /// Returns [`StrokeError::Raster`] when the data URI does not decode.
    pub fn restore_snapshot(&mut self, data_uri: &str) -> Result<(), StrokeError> {
        self.surface.restore_snapshot(data_uri)?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Resize
    // -------------------------------------------------------------------------

    pub fn resize(&mut self, size: Size) -> ResizeOutcome {
        let first = self.surface.size().is_empty();
        self.surface.resize(size);
        if first && !size.is_empty() {
            ResizeOutcome::NeedsSnapshot
        } else {
            ResizeOutcome::Preserved
        }
    }
}

#[cfg(test)]
#[path = "stroke_test.rs"]
mod tests;
