//! Contract signature capture.
//!
//! The pad records that something was drawn, nothing more: strokes are not
//! analysed and never bound to the contract cryptographically.

use crate::errors::{AppError, FieldError};
use crate::session::SessionState;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backing resolution of the signature canvas.
pub const CANVAS_WIDTH: f64 = 600.0;
pub const CANVAS_HEIGHT: f64 = 140.0;

/// Distance from the bottom edge still counted as "scrolled to the end".
pub const SCROLL_TOLERANCE_PX: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// The canvas element's on-screen box (`getBoundingClientRect`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClientRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TouchPoint {
    pub client_x: f64,
    pub client_y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PointerInput {
    Mouse { client_x: f64, client_y: f64 },
    Touch { touches: Vec<TouchPoint> },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Segment {
    pub from: Point,
    pub to: Point,
}

#[derive(Debug, Clone)]
pub struct SignaturePad {
    width: f64,
    height: f64,
    segments: Vec<Segment>,
    last_point: Option<Point>,
    has_signed: bool,
}

impl Default for SignaturePad {
    fn default() -> Self {
        Self::new(CANVAS_WIDTH, CANVAS_HEIGHT)
    }
}

impl SignaturePad {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            segments: Vec::new(),
            last_point: None,
            has_signed: false,
        }
    }

    /// Maps a client-space position into canvas pixels, undoing CSS scaling.
    /// Touch input uses the first active touch.
    pub fn to_canvas(&self, input: &PointerInput, rect: &ClientRect) -> Option<Point> {
        if rect.width <= 0.0 || rect.height <= 0.0 {
            return None;
        }
        let (client_x, client_y) = match input {
            PointerInput::Mouse { client_x, client_y } => (*client_x, *client_y),
            PointerInput::Touch { touches } => {
                let first = touches.first()?;
                (first.client_x, first.client_y)
            }
        };
        let scale_x = self.width / rect.width;
        let scale_y = self.height / rect.height;
        Some(Point {
            x: (client_x - rect.left) * scale_x,
            y: (client_y - rect.top) * scale_y,
        })
    }

    pub fn begin(&mut self, input: &PointerInput, rect: &ClientRect) {
        self.last_point = self.to_canvas(input, rect);
    }

    /// Extends the current stroke. Ignored when no stroke is in progress.
    pub fn move_to(&mut self, input: &PointerInput, rect: &ClientRect) {
        let (Some(from), Some(to)) = (self.last_point, self.to_canvas(input, rect)) else {
            return;
        };
        self.segments.push(Segment { from, to });
        self.last_point = Some(to);
        self.has_signed = true;
    }

    pub fn end(&mut self) {
        self.last_point = None;
    }

    /// Replays a whole stroke: first input starts it, the rest extend it.
    pub fn draw_stroke(&mut self, rect: &ClientRect, inputs: &[PointerInput]) {
        let Some((first, rest)) = inputs.split_first() else {
            return;
        };
        self.begin(first, rect);
        for input in rest {
            self.move_to(input, rect);
        }
        self.end();
    }

    pub fn clear(&mut self) {
        self.segments.clear();
        self.last_point = None;
        self.has_signed = false;
    }

    pub fn has_signed(&self) -> bool {
        self.has_signed
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

/// Latches once the contract text has been scrolled to its bottom edge.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScrollGate {
    reached: bool,
}

impl ScrollGate {
    pub fn on_scroll(&mut self, scroll_top: f64, client_height: f64, scroll_height: f64) -> bool {
        if scroll_top + client_height >= scroll_height - SCROLL_TOLERANCE_PX {
            self.reached = true;
        }
        self.reached
    }

    pub fn reached(&self) -> bool {
        self.reached
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SignatureStatus {
    pub scrolled: bool,
    pub signed: bool,
    pub agreed: bool,
    pub can_finalize: bool,
    pub signed_at: Option<i64>,
}

/// Contract step: scroll gate, pad and agreement checkbox together.
#[derive(Debug, Clone, Default)]
pub struct ContractSignature {
    pub pad: SignaturePad,
    pub scroll: ScrollGate,
    agreed: bool,
    signed_at: Option<i64>,
}

impl ContractSignature {
    pub fn set_agreed(&mut self, agreed: bool) {
        self.agreed = agreed;
    }

    pub fn can_finalize(&self) -> bool {
        self.scroll.reached() && self.pad.has_signed() && self.agreed
    }

    pub fn signed_at(&self) -> Option<i64> {
        self.signed_at
    }

    pub fn status(&self) -> SignatureStatus {
        SignatureStatus {
            scrolled: self.scroll.reached(),
            signed: self.pad.has_signed(),
            agreed: self.agreed,
            can_finalize: self.can_finalize(),
            signed_at: self.signed_at,
        }
    }

    /// Records `fr_signed_at`, then waits out the cosmetic processing delay.
    pub async fn finalize(
        &mut self,
        session: &SessionState,
        delay: Duration,
    ) -> Result<i64, AppError> {
        let mut missing = Vec::new();
        if !self.scroll.reached() {
            missing.push(FieldError::new("contract", "Leé el contrato hasta el final"));
        }
        if !self.pad.has_signed() {
            missing.push(FieldError::new("signature", "Firmá en el recuadro"));
        }
        if !self.agreed {
            missing.push(FieldError::new("agreed", "Aceptá los términos del contrato"));
        }
        if !missing.is_empty() {
            return Err(AppError::Validation(missing));
        }

        let now = Utc::now().timestamp_millis();
        session.set_signed_at(now);
        tokio::time::sleep(delay).await;
        self.signed_at = Some(now);
        tracing::info!("Contract signed at {}", now);
        Ok(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Rendered at half the backing resolution.
    const RECT: ClientRect = ClientRect {
        left: 10.0,
        top: 20.0,
        width: 300.0,
        height: 70.0,
    };

    fn mouse(x: f64, y: f64) -> PointerInput {
        PointerInput::Mouse {
            client_x: x,
            client_y: y,
        }
    }

    #[test]
    fn test_pointer_scaled_to_backing_resolution() {
        let pad = SignaturePad::default();
        assert_eq!(
            pad.to_canvas(&mouse(160.0, 55.0), &RECT),
            Some(Point { x: 300.0, y: 70.0 })
        );
    }

    #[test]
    fn test_touch_uses_first_touch() {
        let pad = SignaturePad::default();
        let touch = PointerInput::Touch {
            touches: vec![
                TouchPoint {
                    client_x: 10.0,
                    client_y: 20.0,
                },
                TouchPoint {
                    client_x: 100.0,
                    client_y: 50.0,
                },
            ],
        };
        assert_eq!(pad.to_canvas(&touch, &RECT), Some(Point { x: 0.0, y: 0.0 }));
        let empty = PointerInput::Touch { touches: vec![] };
        assert_eq!(pad.to_canvas(&empty, &RECT), None);
    }

    #[test]
    fn test_first_segment_marks_signed() {
        let mut pad = SignaturePad::default();
        pad.begin(&mouse(20.0, 30.0), &RECT);
        assert!(!pad.has_signed());
        pad.move_to(&mouse(21.0, 30.0), &RECT);
        assert!(pad.has_signed());
        assert_eq!(pad.segments().len(), 1);
    }

    #[test]
    fn test_move_without_begin_draws_nothing() {
        let mut pad = SignaturePad::default();
        pad.move_to(&mouse(21.0, 30.0), &RECT);
        assert!(!pad.has_signed());
    }

    #[test]
    fn test_clear_resets_until_next_segment() {
        let mut pad = SignaturePad::default();
        pad.draw_stroke(&RECT, &[mouse(20.0, 30.0), mouse(40.0, 35.0)]);
        assert!(pad.has_signed());
        pad.clear();
        assert!(!pad.has_signed());
        pad.draw_stroke(&RECT, &[mouse(20.0, 30.0)]);
        assert!(!pad.has_signed());
        pad.draw_stroke(&RECT, &[mouse(20.0, 30.0), mouse(25.0, 30.0)]);
        assert!(pad.has_signed());
    }

    #[test]
    fn test_scroll_gate_tolerance_and_latch() {
        let mut gate = ScrollGate::default();
        assert!(!gate.on_scroll(100.0, 200.0, 400.0));
        assert!(gate.on_scroll(180.0, 200.0, 400.0));
        assert!(gate.on_scroll(0.0, 200.0, 400.0));
    }

    #[tokio::test]
    async fn test_finalize_needs_signature_and_agreement_regardless_of_scroll() {
        let session = SessionState::in_memory();
        let mut contract = ContractSignature::default();
        contract.scroll.on_scroll(400.0, 200.0, 600.0);
        contract.set_agreed(true);
        assert!(contract.finalize(&session, Duration::ZERO).await.is_err());

        contract.pad.draw_stroke(&RECT, &[mouse(20.0, 30.0), mouse(40.0, 35.0)]);
        contract.set_agreed(false);
        assert!(!contract.can_finalize());
        assert!(session.signed_at().is_none());

        contract.set_agreed(true);
        let at = contract.finalize(&session, Duration::ZERO).await.unwrap();
        assert_eq!(session.signed_at(), Some(at));
        assert_eq!(contract.signed_at(), Some(at));
    }

    #[tokio::test]
    async fn test_finalize_reports_unread_contract() {
        let session = SessionState::in_memory();
        let mut contract = ContractSignature::default();
        contract.pad.draw_stroke(&RECT, &[mouse(20.0, 30.0), mouse(40.0, 35.0)]);
        contract.set_agreed(true);
        match contract.finalize(&session, Duration::ZERO).await {
            Err(AppError::Validation(fields)) => {
                assert_eq!(fields, vec![FieldError::new("contract", "Leé el contrato hasta el final")])
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }
}
