//! Extents, tiles and pixel rectangles shared by the pipeline stages

use serde::{Deserialize, Serialize};

/// Full scrollable size of the page, in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentExtent {
    pub width: u32,
    pub height: u32,
}

impl DocumentExtent {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Currently visible window onto the document, in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewportExtent {
    pub width: u32,
    pub height: u32,
}

impl ViewportExtent {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether a document of `doc` size is fully visible without scrolling.
    pub fn contains(&self, doc: DocumentExtent) -> bool {
        doc.width <= self.width && doc.height <= self.height
    }
}

impl Default for ViewportExtent {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// A planned capture region in document coordinates.
///
/// Tiles are immutable once planned; `index` is the position in capture order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tile {
    pub index: usize,
    pub origin_x: u32,
    pub origin_y: u32,
    pub width: u32,
    pub height: u32,
}

impl Tile {
    pub fn right(&self) -> u32 {
        self.origin_x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.origin_y + self.height
    }

    pub fn rect(&self) -> Rect {
        Rect::new(
            self.origin_x as i64,
            self.origin_y as i64,
            self.right() as i64,
            self.bottom() as i64,
        )
    }
}

/// Half-open rectangle `[left, right) x [top, bottom)`.
///
/// Used both for document-space regions and for scaled pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub left: i64,
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
}

impl Rect {
    pub fn new(left: i64, top: i64, right: i64, bottom: i64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> u64 {
        (self.right - self.left).max(0) as u64
    }

    pub fn height(&self) -> u64 {
        (self.bottom - self.top).max(0) as u64
    }

    pub fn area(&self) -> u64 {
        self.width() * self.height()
    }

    pub fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }

    /// Overlapping region of two rectangles, `None` when they do not touch.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let r = Rect::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        );
        if r.is_empty() {
            None
        } else {
            Some(r)
        }
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.left >= self.left
            && other.top >= self.top
            && other.right <= self.right
            && other.bottom <= self.bottom
    }

    /// Map a document-space rectangle into pixel space at `scale`.
    ///
    /// Edges are rounded independently so rectangles sharing an edge in
    /// document space share it in pixel space too.
    pub fn scaled(&self, scale: f64) -> Rect {
        Rect::new(
            scale_edge(self.left, scale),
            scale_edge(self.top, scale),
            scale_edge(self.right, scale),
            scale_edge(self.bottom, scale),
        )
    }
}

pub(crate) fn scale_edge(v: i64, scale: f64) -> i64 {
    (v as f64 * scale).round() as i64
}
