use super::*;
use crate::raster::PixelCanvas;
use serde_json::json;

const RED: [u8; 4] = [0xf4, 0x3f, 0x5e, 255];

fn timings() -> StrokeTimings {
    StrokeTimings { snapshot_debounce: Duration::from_secs(2), clear_confirm: Duration::from_secs(3) }
}

fn engine(width: u32, height: u32) -> StrokeEngine<PixelCanvas> {
    StrokeEngine::new(PixelCanvas::with_size(Size::new(width, height)), timings())
}

// =============================================================================
// Segment
// =============================================================================

#[test]
fn segment_wire_format_uses_width() {
    let segment = StrokeSegment { x1: 0.1, y1: 0.1, x2: 0.2, y2: 0.2, color: "#f43f5e".into(), stroke_width: 6.0 };
    let value = serde_json::to_value(&segment).unwrap();
    assert_eq!(value, json!({ "x1": 0.1, "y1": 0.1, "x2": 0.2, "y2": 0.2, "color": "#f43f5e", "width": 6.0 }));
}

#[test]
fn segment_accepts_stroke_width_alias() {
    let segment: StrokeSegment = serde_json::from_value(
        json!({ "x1": 0.0, "y1": 0.0, "x2": 1.0, "y2": 1.0, "color": "#ffffff", "strokeWidth": 12 }),
    )
    .unwrap();
    assert_eq!(segment.stroke_width, 12.0);
}

#[test]
fn from_pixels_clamps_into_unit_square() {
    let brush = Brush { color: "#ffffff".into(), width: 2.0 };
    let segment =
        StrokeSegment::from_pixels(Point::new(-10.0, 50.0), Point::new(250.0, 100.0), Size::new(200, 100), &brush)
            .unwrap();
    assert_eq!((segment.x1, segment.y1, segment.x2, segment.y2), (0.0, 0.5, 1.0, 1.0));
    assert!(segment.validate().is_ok());
}

#[test]
fn from_pixels_needs_a_sized_surface() {
    let brush = Brush { color: "#ffffff".into(), width: 2.0 };
    assert!(StrokeSegment::from_pixels(Point::new(1.0, 1.0), Point::new(2.0, 2.0), Size::default(), &brush).is_none());
}

#[test]
fn normalization_round_trips_across_sizes() {
    let brush = Brush { color: "#ffffff".into(), width: 2.0 };
    let a = Size::new(400, 300);
    let b = Size::new(1000, 500);
    let segment = StrokeSegment::from_pixels(Point::new(40.0, 30.0), Point::new(300.0, 150.0), a, &brush).unwrap();

    let (from, to) = segment.endpoints(b);
    assert!((from.x - 100.0).abs() < 1e-9 && (from.y - 50.0).abs() < 1e-9);
    assert!((to.x - 750.0).abs() < 1e-9 && (to.y - 250.0).abs() < 1e-9);
}

#[test]
fn validate_rejects_out_of_range_values() {
    let base = StrokeSegment { x1: 0.5, y1: 0.5, x2: 0.5, y2: 0.5, color: "#ffffff".into(), stroke_width: 2.0 };
    assert!(base.validate().is_ok());

    let bad = [
        StrokeSegment { x1: 1.5, ..base.clone() },
        StrokeSegment { y2: -0.1, ..base.clone() },
        StrokeSegment { x2: f64::NAN, ..base.clone() },
        StrokeSegment { stroke_width: 0.0, ..base.clone() },
    ];
    for segment in bad {
        let err = segment.validate().unwrap_err();
        assert_eq!(err.error_code(), "E_STROKE_SEGMENT");
    }
}

// =============================================================================
// Pointer lifecycle
// =============================================================================

#[test]
fn continue_renders_locally_and_returns_segment() {
    let mut engine = engine(100, 100);
    assert!(engine.start_stroke(Point::new(10.0, 10.0)));
    assert!(engine.is_drawing());

    let segment = engine.continue_stroke(Point::new(20.0, 20.0)).unwrap();
    assert_eq!((segment.x1, segment.y1, segment.x2, segment.y2), (0.1, 0.1, 0.2, 0.2));
    assert_eq!(segment.color, DEFAULT_COLOR);
    assert_eq!(segment.stroke_width, DEFAULT_WIDTH);
    assert_eq!(engine.surface().pixel(15, 15), Some(RED));

    // Next segment starts where the previous one ended.
    let next = engine.continue_stroke(Point::new(30.0, 20.0)).unwrap();
    assert_eq!((next.x1, next.y1), (0.2, 0.2));
}

#[test]
fn continue_without_start_does_nothing() {
    let mut engine = engine(50, 50);
    assert!(engine.continue_stroke(Point::new(10.0, 10.0)).is_none());
    assert!(engine.surface().is_blank());
}

#[test]
fn pen_lock_blocks_new_strokes() {
    let mut engine = engine(50, 50);
    engine.set_pen_enabled(false);
    assert!(!engine.start_stroke(Point::new(1.0, 1.0)));
    assert!(engine.continue_stroke(Point::new(10.0, 10.0)).is_none());

    engine.set_pen_enabled(true);
    assert!(engine.start_stroke(Point::new(1.0, 1.0)));
}

#[test]
fn unsized_surface_refuses_strokes() {
    let mut engine = StrokeEngine::new(PixelCanvas::new(), timings());
    assert!(!engine.start_stroke(Point::new(0.0, 0.0)));
}

#[test]
fn end_stroke_debounces_snapshot() {
    let mut engine = engine(40, 40);
    let t0 = Instant::now();
    engine.start_stroke(Point::new(5.0, 5.0));
    engine.continue_stroke(Point::new(30.0, 30.0));
    assert!(engine.end_stroke(t0));
    assert!(!engine.is_drawing());
    assert!(!engine.end_stroke(t0));
    assert_eq!(engine.next_deadline(), Some(t0 + Duration::from_secs(2)));

    // A second stroke pushes the export out.
    let t1 = t0 + Duration::from_secs(1);
    engine.start_stroke(Point::new(5.0, 30.0));
    engine.continue_stroke(Point::new(30.0, 5.0));
    engine.end_stroke(t1);
    assert!(engine.poll_snapshot(t0 + Duration::from_secs(2)).is_none());

    let uri = engine.poll_snapshot(t1 + Duration::from_secs(2)).unwrap();
    assert!(uri.starts_with("data:image/jpeg;base64,"));
    assert!(!engine.has_pending_snapshot());
    assert!(engine.poll_snapshot(t1 + Duration::from_secs(10)).is_none());
}

#[test]
fn flush_snapshot_only_when_pending() {
    let mut engine = engine(10, 10);
    assert!(engine.flush_snapshot().is_none());
    engine.start_stroke(Point::new(1.0, 1.0));
    engine.end_stroke(Instant::now());
    assert!(engine.flush_snapshot().is_some());
}

#[test]
fn set_brush_validates() {
    let mut engine = engine(10, 10);
    engine.set_brush("#3b82f6", 24.0).unwrap();
    assert_eq!(engine.brush().color, "#3b82f6");
    assert!(matches!(engine.set_brush("blue", 2.0), Err(StrokeError::InvalidBrush(_))));
    assert!(matches!(engine.set_brush("#ffffff", -1.0), Err(StrokeError::InvalidBrush(_))));
    assert_eq!(engine.brush().width, 24.0);
}

// =============================================================================
// Remote events
// =============================================================================

#[test]
fn remote_stroke_renders_proportionally_on_a_different_size() {
    let mut sender = engine(400, 300);
    sender.start_stroke(Point::new(40.0, 30.0));
    let segment = sender.continue_stroke(Point::new(80.0, 60.0)).unwrap();

    let mut receiver = engine(1000, 500);
    receiver.on_remote_stroke(&segment).unwrap();
    // Midpoint (0.15, 0.15) of the receiver's surface.
    assert_eq!(receiver.surface().pixel(150, 75), Some(RED));
    assert_eq!(receiver.surface().pixel(900, 400), Some([0, 0, 0, 0]));
}

#[test]
fn remote_stroke_rejects_invalid_segment() {
    let mut engine = engine(10, 10);
    let segment = StrokeSegment { x1: 2.0, y1: 0.0, x2: 0.0, y2: 0.0, color: "#ffffff".into(), stroke_width: 2.0 };
    assert!(matches!(engine.on_remote_stroke(&segment), Err(StrokeError::InvalidSegment(_))));
    assert!(engine.surface().is_blank());

    let segment = StrokeSegment { color: "nope".into(), x1: 0.5, ..segment };
    assert!(matches!(engine.on_remote_stroke(&segment), Err(StrokeError::Raster(_))));
}

#[test]
fn remote_clear_wipes_and_cancels_snapshot() {
    let mut engine = engine(20, 20);
    engine.start_stroke(Point::new(5.0, 5.0));
    engine.continue_stroke(Point::new(15.0, 15.0));
    engine.end_stroke(Instant::now());

    engine.on_remote_clear();
    assert!(engine.surface().is_blank());
    assert!(!engine.has_pending_snapshot());
}

// =============================================================================
// Two-step clear
// =============================================================================

fn painted() -> StrokeEngine<PixelCanvas> {
    let mut engine = engine(20, 20);
    engine.start_stroke(Point::new(5.0, 5.0));
    engine.continue_stroke(Point::new(15.0, 15.0));
    engine
}

#[test]
fn single_press_never_clears() {
    let mut engine = painted();
    let t0 = Instant::now();
    assert_eq!(engine.request_clear(t0), ClearOutcome::Armed { until: t0 + Duration::from_secs(3) });
    assert!(engine.clear_armed(t0));
    assert!(!engine.surface().is_blank());
}

#[test]
fn second_press_inside_window_clears() {
    let mut engine = painted();
    let t0 = Instant::now();
    engine.request_clear(t0);
    assert_eq!(engine.request_clear(t0 + Duration::from_millis(2999)), ClearOutcome::Cleared);
    assert!(engine.surface().is_blank());
    assert!(!engine.clear_armed(t0));
}

#[test]
fn press_after_expiry_rearms() {
    let mut engine = painted();
    let t0 = Instant::now();
    engine.request_clear(t0);

    let t4 = t0 + Duration::from_secs(4);
    assert!(engine.expire_clear(t4));
    assert!(!engine.expire_clear(t4));
    assert_eq!(engine.request_clear(t4), ClearOutcome::Armed { until: t4 + Duration::from_secs(3) });
    assert!(!engine.surface().is_blank());
}

#[test]
fn press_after_expiry_without_poll_still_rearms() {
    let mut engine = painted();
    let t0 = Instant::now();
    engine.request_clear(t0);
    let late = t0 + Duration::from_secs(3);
    assert!(matches!(engine.request_clear(late), ClearOutcome::Armed { .. }));
    assert!(!engine.surface().is_blank());
}

// =============================================================================
// Resize
// =============================================================================

#[test]
fn first_sizing_asks_for_snapshot() {
    let mut engine = StrokeEngine::new(PixelCanvas::new(), timings());
    assert_eq!(engine.resize(Size::new(50, 50)), ResizeOutcome::NeedsSnapshot);
    assert_eq!(engine.resize(Size::new(60, 40)), ResizeOutcome::Preserved);
}

#[test]
fn resize_preserves_raster() {
    let mut engine = painted();
    engine.resize(Size::new(40, 40));
    assert_eq!(engine.surface().pixel(10, 10), Some(RED));
}

#[test]
fn restore_snapshot_paints_stored_raster() {
    let mut source = painted();
    source.end_stroke(Instant::now());
    let uri = source.flush_snapshot().unwrap();

    let mut fresh = StrokeEngine::new(PixelCanvas::new(), timings());
    fresh.resize(Size::new(20, 20));
    fresh.restore_snapshot(&uri).unwrap();
    assert!(!fresh.surface().is_blank());

    assert!(matches!(fresh.restore_snapshot("not a uri"), Err(StrokeError::Raster(_))));
}
