use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dualread_core::{
    DocumentId, DocumentPairing, NormRect, PageAnchor, ReaderConfig, ReaderSession,
    RenderOutcome, RenderPriority, Rotation, TextSpanIndex,
};
use dualread_render::{DocumentLoader, PdfiumLoader};
use serde::Serialize;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode, WriteLogger};
use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const RENDER_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Parser)]
#[command(name = "dualread")]
#[command(about = "Headless access to the dualread reader core")]
pub struct Cli {
    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Write logs to this file instead of stderr
    #[arg(long, value_name = "FILE", global = true)]
    log_file: Option<PathBuf>,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print page count and page sizes as JSON.
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Rasterize one page to a PNG.
    Render {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// 1-based page number
        #[arg(long)]
        page: u16,
        #[arg(long, default_value_t = 1.0)]
        zoom: f32,
        /// Clockwise rotation in degrees (0, 90, 180, 270)
        #[arg(long, default_value_t = 0)]
        rotation: i32,
        #[arg(long)]
        output: PathBuf,
    },
    /// Print the text inside a page-normalized rectangle.
    Text {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// 1-based page number
        #[arg(long)]
        page: u16,
        /// x0,y0,x1,y1 in [0, 1], origin top-left
        #[arg(long, value_parser = parse_rect)]
        rect: NormRect,
    },
    /// Print the secondary page a primary page maps to.
    Map {
        #[arg(long)]
        primary_pages: u16,
        #[arg(long)]
        secondary_pages: u16,
        /// 1-based primary page
        #[arg(long)]
        page: u16,
        /// Known correspondence as primary:secondary, 1-based
        #[arg(long, value_parser = parse_anchor)]
        anchor: Option<PageAnchor>,
    },
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    path: String,
    page_count: u16,
    pages: Vec<PageSizeOutput>,
}

#[derive(Debug, Serialize)]
struct PageSizeOutput {
    width: f32,
    height: f32,
}

#[derive(Debug, Serialize)]
struct MapOutput {
    primary_page: u16,
    secondary_page: Option<u16>,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_logging(cli.verbose, cli.log_file.as_deref())?;

    match cli.command {
        Commands::Info { file } => run_info(&file),
        Commands::Render { file, page, zoom, rotation, output } => {
            run_render(cli.config.as_deref(), &file, page, zoom, rotation, &output)
        }
        Commands::Text { file, page, rect } => run_text(&file, page, &rect),
        Commands::Map { primary_pages, secondary_pages, page, anchor } => {
            run_map(primary_pages, secondary_pages, page, anchor)
        }
    }
}

fn init_logging(verbose: u8, log_file: Option<&Path>) -> Result<()> {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            WriteLogger::init(level, Config::default(), file)?;
        }
        None => {
            TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto)?;
        }
    }
    Ok(())
}

fn run_info(file: &Path) -> Result<()> {
    ensure_pdf_exists(file)?;

    let source = PdfiumLoader.open(file).context("failed to open PDF")?;
    let pages = (0..source.page_count())
        .map(|page| {
            let size = source.page_size(page)?;
            Ok(PageSizeOutput { width: size.width, height: size.height })
        })
        .collect::<Result<Vec<_>>>()?;

    let payload = InfoOutput {
        path: file.display().to_string(),
        page_count: source.page_count(),
        pages,
    };
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn run_render(
    config: Option<&Path>,
    file: &Path,
    page: u16,
    zoom: f32,
    rotation: i32,
    output: &Path,
) -> Result<()> {
    ensure_pdf_exists(file)?;
    let page_index = page_index(page)?;
    let Some(rotation) = Rotation::from_degrees(rotation) else {
        bail!("--rotation must be a multiple of 90, got {rotation}");
    };

    let config = ReaderConfig::load(config).context("failed to load configuration")?;
    let mut session = ReaderSession::new(config, Arc::new(PdfiumLoader))
        .context("failed to start reader session")?;
    let document = DocumentId::from_path(file);
    session.open_document(&document, file).context("failed to open PDF")?;

    log::info!("rendering page {page} of {} at zoom {zoom}", file.display());
    let ticket = session.request_render(
        &document,
        page_index,
        zoom,
        rotation,
        RenderPriority::Visible,
        0,
    )?;
    let outcome = ticket.recv_timeout(RENDER_TIMEOUT).context("render timed out")?;
    let bitmap = match outcome {
        RenderOutcome::Ready { bitmap, .. } => bitmap,
        RenderOutcome::Placeholder { reason, .. } => {
            bail!("page {page} could not be rendered: {reason}")
        }
        RenderOutcome::Cancelled { .. } => bail!("render of page {page} was cancelled"),
    };

    let image =
        image::RgbaImage::from_raw(bitmap.width(), bitmap.height(), bitmap.pixels().to_vec())
            .context("bitmap does not match its dimensions")?;
    if let Some(parent) = output.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    image
        .save(output)
        .with_context(|| format!("failed to write image to {}", output.display()))?;
    println!("{}", output.display());

    session.shutdown();
    Ok(())
}

fn run_text(file: &Path, page: u16, rect: &NormRect) -> Result<()> {
    ensure_pdf_exists(file)?;
    let page_index = page_index(page)?;

    let source = PdfiumLoader.open(file).context("failed to open PDF")?;
    let page_count = source.page_count();
    if page_index >= page_count {
        bail!("page {page} out of range, document has {page_count} pages");
    }

    let text = TextSpanIndex::new(source)
        .selected_text(page_index, rect)
        .context("failed to extract text")?;
    println!("{text}");
    Ok(())
}

fn run_map(
    primary_pages: u16,
    secondary_pages: u16,
    page: u16,
    anchor: Option<PageAnchor>,
) -> Result<()> {
    let page_index = page_index(page)?;
    if page_index >= primary_pages {
        bail!("page {page} out of range, primary has {primary_pages} pages");
    }

    let mut pairing = DocumentPairing::new(
        DocumentId::new("primary"),
        primary_pages,
        DocumentId::new("secondary"),
        secondary_pages,
    );
    if let Some(anchor) = anchor {
        pairing.set_anchor(anchor);
    }

    let payload = MapOutput {
        primary_page: page,
        secondary_page: pairing.to_secondary(page_index).map(|mapped| mapped + 1),
    };
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn page_index(page: u16) -> Result<u16> {
    if page == 0 {
        bail!("--page is 1-based and must be >= 1");
    }
    Ok(page - 1)
}

fn ensure_pdf_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!("file does not exist: {}", path.display());
    }

    if !path.is_file() {
        bail!("path is not a file: {}", path.display());
    }

    Ok(())
}

fn parse_rect(value: &str) -> Result<NormRect, String> {
    let coords = value
        .split(',')
        .map(|part| part.trim().parse::<f32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid number in rectangle: {e}"))?;
    let [x0, y0, x1, y1] = coords.as_slice() else {
        return Err(format!("expected x0,y0,x1,y1, got {value:?}"));
    };
    if coords.iter().any(|c| !(0.0..=1.0).contains(c)) {
        return Err("rectangle coordinates must lie in [0, 1]".to_string());
    }
    Ok(NormRect::from_corners((*x0, *y0), (*x1, *y1)))
}

fn parse_anchor(value: &str) -> Result<PageAnchor, String> {
    let (primary, secondary) =
        value.split_once(':').ok_or_else(|| format!("expected primary:secondary, got {value:?}"))?;
    let parse = |part: &str| match part.trim().parse::<u16>() {
        Ok(page) if page >= 1 => Ok(page - 1),
        _ => Err(format!("invalid page {part:?} in anchor")),
    };
    Ok(PageAnchor { primary_page: parse(primary)?, secondary_page: parse(secondary)? })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rect_normalizes_corners() {
        let rect = parse_rect("0.5, 0.6,0.1,0.2").unwrap();
        assert_eq!(rect, NormRect { x0: 0.1, y0: 0.2, x1: 0.5, y1: 0.6 });
    }

    #[test]
    fn test_parse_rect_rejects_bad_input() {
        assert!(parse_rect("0.1,0.2,0.3").is_err());
        assert!(parse_rect("0.1,0.2,0.3,abc").is_err());
        assert!(parse_rect("0.1,0.2,0.3,1.5").is_err());
    }

    #[test]
    fn test_parse_anchor_is_one_based() {
        let anchor = parse_anchor("3:1").unwrap();
        assert_eq!(anchor, PageAnchor { primary_page: 2, secondary_page: 0 });
        assert!(parse_anchor("0:1").is_err());
        assert!(parse_anchor("3").is_err());
    }
}
