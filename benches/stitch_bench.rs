use criterion::{criterion_group, criterion_main, Criterion};
use pagestitch::compositor::composite;
use pagestitch::host::{CaptureDevice, PageHost, SyntheticPage};
use pagestitch::planner::{plan, plan_bounds};
use pagestitch::{CanvasLimits, CapturedTile, DocumentExtent, ImageFormat, ViewportExtent};

fn bench_plan(c: &mut Criterion) {
    let doc = DocumentExtent::new(1920, 60_000);
    let vp = ViewportExtent::new(1280, 720);
    c.bench_function("plan_tall_page", |b| {
        b.iter(|| plan(doc, vp, 64));
    });
}

/// Capture every tile of a synthetic page up front so the bench only
/// measures decoding and compositing.
fn captured_tiles(doc: DocumentExtent, vp: ViewportExtent) -> Vec<CapturedTile> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");
    let mut page = SyntheticPage::new(doc, vp);
    let mut device = page.clone();
    plan(doc, vp, 0)
        .into_iter()
        .map(|tile| {
            page.scroll_to(tile.origin_x, tile.origin_y).expect("scroll");
            let (scroll_x, scroll_y) = page.scroll_position().expect("position");
            let raster = rt
                .block_on(device.capture_visible_area(ImageFormat::Png, 100))
                .expect("capture");
            CapturedTile {
                tile,
                raster,
                captured_at: chrono::Utc::now(),
                scroll_x,
                scroll_y,
                scale: 1.0,
            }
        })
        .collect()
}

fn bench_composite(c: &mut Criterion) {
    let doc = DocumentExtent::new(800, 4000);
    let vp = ViewportExtent::new(800, 600);
    let tiles = captured_tiles(doc, vp);
    let extent = plan_bounds(&tiles.iter().map(|t| t.tile).collect::<Vec<_>>());

    c.bench_function("composite_800x4000", |b| {
        b.iter(|| composite(&tiles, extent, CanvasLimits::default(), [255, 255, 255, 255]).unwrap());
    });
}

criterion_group!(benches, bench_plan, bench_composite);
criterion_main!(benches);
