use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use snow_duplication::{
    DefaultSource, DuplicationSession, FrameStatus, bgra_len, open_default_source,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const FRAMES: usize = 120;

fn save_bgra_png(bgra: &[u8], width: u32, height: u32, path: &Path) -> Result<()> {
    let mut rgba = bgra[..bgra_len(width, height)?].to_vec();
    for pixel in rgba.chunks_exact_mut(4) {
        pixel.swap(0, 2);
    }
    image::save_buffer(path, &rgba, width, height, image::ColorType::Rgba8)
        .map_err(|e| anyhow::anyhow!("failed to write PNG to {}: {e}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let source = open_default_source().context("failed to open desktop duplication")?;
    let mut session = DuplicationSession::<DefaultSource>::builder()
        .capture_cursor(true)
        .default_timeout(Duration::from_millis(50))
        .build(source)
        .context("failed to create duplication session")?;

    let (width, height) = session.logical_size();
    let mut buffer = vec![0u8; bgra_len(width, height)?];
    let mut last = None;
    let mut updated = 0usize;

    let begin = Instant::now();
    for _ in 0..FRAMES {
        match session.get_frame(&mut buffer)? {
            FrameStatus::Updated(report) => {
                updated += 1;
                last = Some(report);
            }
            FrameStatus::NoNewFrame => {}
        }
    }
    let elapsed = begin.elapsed();
    info!(
        polls = FRAMES,
        updated,
        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
        "polling finished"
    );

    let Some(report) = last else {
        println!("No frame arrived; move the mouse or change the screen and retry.");
        return Ok(());
    };
    println!(
        "Last frame {}x{} via {:?} (cursor drawn: {})",
        report.width, report.height, report.plan, report.cursor_drawn
    );
    save_bgra_png(&buffer, report.width, report.height, Path::new("./duplication.png"))?;
    println!("Saved ./duplication.png");
    Ok(())
}
