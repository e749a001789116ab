//! Tile planner: turns extents into an ordered, gap-free capture plan

use crate::geometry::{DocumentExtent, Rect, Tile, ViewportExtent};

/// Plan the capture tiles for a document.
///
/// - When the document fits in the viewport, a single viewport-sized tile at
///   the origin is returned.
/// - Otherwise the document is covered by a grid: columns step by the
///   viewport width, rows step by the viewport height minus `overlap_px`
///   (at least one pixel). The last row and column are clipped to the
///   document edge.
///
/// Tiles come back in capture order: row-major, `y` ascending then `x`.
pub fn plan(doc: DocumentExtent, viewport: ViewportExtent, overlap_px: u32) -> Vec<Tile> {
    let vw = viewport.width.max(1);
    let vh = viewport.height.max(1);

    if ViewportExtent::new(vw, vh).contains(doc) {
        return vec![Tile {
            index: 0,
            origin_x: 0,
            origin_y: 0,
            width: vw,
            height: vh,
        }];
    }

    let step_y = vh.saturating_sub(overlap_px).max(1);
    let rows = axis_origins(doc.height, vh, step_y);
    let cols = axis_origins(doc.width, vw, vw);

    let mut tiles = Vec::with_capacity(rows.len() * cols.len());
    for &(y, h) in &rows {
        for &(x, w) in &cols {
            tiles.push(Tile {
                index: tiles.len(),
                origin_x: x,
                origin_y: y,
                width: w,
                height: h,
            });
        }
    }
    tiles
}

/// Origins and spans along one axis. A zero-length axis still gets one
/// viewport-sized span so the plan is never empty.
fn axis_origins(total: u32, span: u32, step: u32) -> Vec<(u32, u32)> {
    if total == 0 {
        return vec![(0, span)];
    }
    let mut out = Vec::new();
    let mut pos = 0u32;
    loop {
        let len = span.min(total - pos);
        out.push((pos, len));
        if pos + len >= total {
            break;
        }
        pos += step;
    }
    out
}

/// Rectangle covered by a plan, in document coordinates.
pub fn plan_bounds(tiles: &[Tile]) -> Rect {
    tiles.iter().fold(Rect::new(0, 0, 0, 0), |acc, t| {
        Rect::new(
            0,
            0,
            acc.right.max(t.right() as i64),
            acc.bottom.max(t.bottom() as i64),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(w: u32, h: u32) -> DocumentExtent {
        DocumentExtent::new(w, h)
    }

    fn vp(w: u32, h: u32) -> ViewportExtent {
        ViewportExtent::new(w, h)
    }

    #[test]
    fn small_document_gets_one_viewport_tile() {
        let tiles = plan(doc(300, 200), vp(1280, 720), 50);
        assert_eq!(tiles.len(), 1);
        assert_eq!(
            tiles[0],
            Tile { index: 0, origin_x: 0, origin_y: 0, width: 1280, height: 720 }
        );
    }

    #[test]
    fn tall_document_three_rows() {
        let tiles = plan(doc(1000, 2500), vp(1000, 1000), 0);
        let ys: Vec<u32> = tiles.iter().map(|t| t.origin_y).collect();
        assert_eq!(ys, vec![0, 1000, 2000]);
        assert_eq!(tiles[2].height, 500);
        assert!(tiles.iter().all(|t| t.width == 1000));
    }

    #[test]
    fn overlap_shortens_vertical_step() {
        let tiles = plan(doc(1000, 2500), vp(1000, 1000), 100);
        let ys: Vec<u32> = tiles.iter().map(|t| t.origin_y).collect();
        assert_eq!(ys, vec![0, 900, 1800]);
        assert_eq!(tiles[2].bottom(), 2500);
    }

    #[test]
    fn grid_is_row_major() {
        let tiles = plan(doc(2500, 1500), vp(1000, 1000), 0);
        let origins: Vec<(u32, u32)> = tiles.iter().map(|t| (t.origin_x, t.origin_y)).collect();
        assert_eq!(
            origins,
            vec![(0, 0), (1000, 0), (2000, 0), (0, 1000), (1000, 1000), (2000, 1000)]
        );
        assert_eq!(tiles[2].width, 500);
        assert_eq!(tiles[5].height, 500);
        assert!(tiles.iter().enumerate().all(|(i, t)| t.index == i));
    }

    #[test]
    fn narrow_document_clips_width() {
        let tiles = plan(doc(600, 2000), vp(1000, 800), 0);
        assert!(tiles.iter().all(|t| t.width == 600 && t.origin_x == 0));
        assert_eq!(plan_bounds(&tiles), Rect::new(0, 0, 600, 2000));
    }

    #[test]
    fn overlap_larger_than_viewport_still_progresses() {
        let tiles = plan(doc(100, 30), vp(100, 10), 50);
        assert_eq!(tiles.len(), 21);
        assert_eq!(tiles.last().unwrap().bottom(), 30);
    }

    #[test]
    fn zero_viewport_is_clamped() {
        let tiles = plan(doc(3, 3), vp(0, 0), 0);
        assert_eq!(tiles.len(), 9);
    }
}
