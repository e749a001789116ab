use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use pagestitch::host::{DirectorySink, SyntheticPage};
use pagestitch::{planner, CaptureConfig, DocumentExtent, FullPageCapture, ImageFormat, ViewportExtent};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pagestitch")]
#[command(about = "Full-page screenshot capture and stitching", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CaptureOpts {
    /// JSON capture configuration (missing fields use defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output format (png or jpeg)
    #[arg(long)]
    format: Option<ImageFormat>,

    /// JPEG quality, 1-100
    #[arg(long)]
    quality: Option<u8>,

    /// Vertical overlap between tile rows, in CSS px
    #[arg(long)]
    overlap: Option<u32>,

    /// Directory receiving the artifacts
    #[arg(short, long, default_value = "./screenshots")]
    out: PathBuf,
}

impl CaptureOpts {
    fn load_config(&self) -> anyhow::Result<CaptureConfig> {
        let mut cfg = match &self.config {
            Some(path) => CaptureConfig::from_file(path)?,
            None => CaptureConfig::default(),
        };
        if let Some(format) = self.format {
            cfg.format = format;
        }
        if let Some(quality) = self.quality {
            cfg.quality = quality;
        }
        if let Some(overlap) = self.overlap {
            cfg.overlap_px = overlap;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the tile plan for a document/viewport pair
    Plan {
        /// Document size, WIDTHxHEIGHT
        #[arg(long)]
        document: String,
        /// Viewport size, WIDTHxHEIGHT
        #[arg(long, default_value = "1280x720")]
        viewport: String,
        #[arg(long, default_value_t = 0)]
        overlap: u32,
    },

    /// Capture a synthetic page (no browser required)
    Demo {
        /// Document size, WIDTHxHEIGHT
        #[arg(long, default_value = "1280x4000")]
        document: String,
        /// Viewport size, WIDTHxHEIGHT
        #[arg(long, default_value = "1280x720")]
        viewport: String,
        /// Device pixel ratio of the synthetic screen
        #[arg(long, default_value_t = 1.0)]
        dpr: f32,
        /// Height of a sticky header, in CSS px
        #[arg(long, default_value_t = 0)]
        header: u32,
        /// Height of a sticky footer, in CSS px
        #[arg(long, default_value_t = 0)]
        footer: u32,
        #[command(flatten)]
        opts: CaptureOpts,
    },

    /// Capture a live URL in headless Chrome
    #[cfg(feature = "cdp")]
    Capture {
        url: String,
        /// Viewport size, WIDTHxHEIGHT
        #[arg(long, default_value = "1280x720")]
        viewport: String,
        #[command(flatten)]
        opts: CaptureOpts,
    },
}

fn parse_size(s: &str) -> anyhow::Result<(u32, u32)> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .with_context(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
    Ok((w.trim().parse()?, h.trim().parse()?))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Plan {
            document,
            viewport,
            overlap,
        } => print_plan(&document, &viewport, overlap),
        Commands::Demo {
            document,
            viewport,
            dpr,
            header,
            footer,
            opts,
        } => run_demo(&document, &viewport, dpr, (header, footer), opts).await,
        #[cfg(feature = "cdp")]
        Commands::Capture { url, viewport, opts } => run_cdp(&url, &viewport, opts).await,
    };

    if let Err(e) = outcome {
        // One notification per failed run.
        match e.downcast_ref::<pagestitch::Error>() {
            Some(err) => eprintln!("{}", err.user_message()),
            None => eprintln!("pagestitch: {:#}", e),
        }
        std::process::exit(1);
    }
}

fn print_plan(document: &str, viewport: &str, overlap: u32) -> anyhow::Result<()> {
    let (dw, dh) = parse_size(document)?;
    let (vw, vh) = parse_size(viewport)?;
    let tiles = planner::plan(DocumentExtent::new(dw, dh), ViewportExtent::new(vw, vh), overlap);
    println!("{}", serde_json::to_string_pretty(&tiles)?);
    Ok(())
}

async fn run_demo(
    document: &str,
    viewport: &str,
    dpr: f32,
    (header, footer): (u32, u32),
    opts: CaptureOpts,
) -> anyhow::Result<()> {
    let (dw, dh) = parse_size(document)?;
    let (vw, vh) = parse_size(viewport)?;
    let mut cfg = opts.load_config()?;
    cfg.fallback_viewport = ViewportExtent::new(vw, vh);

    let page = SyntheticPage::new(DocumentExtent::new(dw, dh), ViewportExtent::new(vw, vh))
        .with_device_pixel_ratio(dpr)
        .with_sticky_header(header)
        .with_sticky_footer(footer);
    let mut capture = FullPageCapture::new(page.clone(), page, cfg)?;
    let mut sink = DirectorySink::new(&opts.out);
    let report = capture.run(&mut sink).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    for path in sink.written() {
        println!("saved {}", path.display());
    }
    Ok(())
}

#[cfg(feature = "cdp")]
async fn run_cdp(url: &str, viewport: &str, opts: CaptureOpts) -> anyhow::Result<()> {
    let (vw, vh) = parse_size(viewport)?;
    let mut cfg = opts.load_config()?;
    cfg.fallback_viewport = ViewportExtent::new(vw, vh);

    let session = pagestitch::cdp::CdpSession::launch(ViewportExtent::new(vw, vh))?;
    session.open(url).await?;
    let device = session.device(std::time::Duration::from_millis(cfg.attempt_timeout_ms));
    let mut capture = FullPageCapture::new(session.host(), device, cfg)?;
    let mut sink = DirectorySink::new(&opts.out);
    let report = capture.run(&mut sink).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    for path in sink.written() {
        println!("saved {}", path.display());
    }
    Ok(())
}
