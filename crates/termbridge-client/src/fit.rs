//! Resize fitting
//!
//! Turns container geometry into a terminal size and decides whether the
//! server needs to hear about it. Only changes to the effective (clamped)
//! size are reported, so bursts of layout events collapse to at most one
//! `resize` each time the grid really changes.

use termbridge_types::TermSize;

/// Size of one character cell in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellMetrics {
    pub width: f64,
    pub height: f64,
}

/// How many whole cells fit in a container. Never less than 1x1.
pub fn fit_from_pixels(container_width: f64, container_height: f64, cell: CellMetrics) -> TermSize {
    let cells = |extent: f64, cell: f64| -> u16 {
        if cell <= 0.0 || !extent.is_finite() || extent <= 0.0 {
            return 1;
        }
        (extent / cell).floor().clamp(1.0, u16::MAX as f64) as u16
    };

    TermSize::new(
        cells(container_width, cell.width),
        cells(container_height, cell.height),
    )
}

#[derive(Debug, Clone)]
pub struct ResizeFitter {
    min_cols: u16,
    last: Option<TermSize>,
}

impl ResizeFitter {
    pub fn new(min_cols: u16) -> Self {
        Self {
            min_cols,
            last: None,
        }
    }

    /// Clamp a proposed size. Returns it only if the effective size changed.
    pub fn propose(&mut self, proposed: TermSize) -> Option<TermSize> {
        let effective = proposed.clamped(self.min_cols);
        if self.last == Some(effective) {
            return None;
        }
        self.last = Some(effective);
        Some(effective)
    }

    /// Last effective size, if any was proposed
    pub fn effective(&self) -> Option<TermSize> {
        self.last
    }
}
