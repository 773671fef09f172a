use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use image::Luma;
use qrcode::QrCode;
use qrcode::render::unicode;
use tracing::info;

use crate::config::QrConfig;

/// Show the picker link: always as raw text, plus a scannable code on the
/// terminal and/or as a PNG when configured.
pub fn present_link(link: &str, cfg: &QrConfig) -> Result<()> {
    println!("Open this link (or scan the code) to pick photos:\n{link}\n");
    if cfg.terminal {
        println!("{}", render_terminal(link)?);
    }
    if let Some(path) = &cfg.output_path {
        write_png(link, path)?;
        info!(path = %path.display(), "picker QR code written");
    }
    Ok(())
}

pub fn render_terminal(link: &str) -> Result<String> {
    let code = QrCode::new(link.as_bytes()).context("failed to generate QR code")?;
    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build())
}

pub fn write_png(link: &str, path: &Path) -> Result<()> {
    let code = QrCode::new(link.as_bytes()).context("failed to generate QR code")?;
    let image = code.render::<Luma<u8>>().min_dimensions(256, 256).build();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    image
        .save(path)
        .with_context(|| format!("failed to write QR code to {}", path.display()))?;
    Ok(())
}
