//! Decodes the local image set one file at a time, scaling each straight to
//! the display surface so only surface-sized frames stay resident.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use image::RgbaImage;
use image::metadata::Orientation;
use tracing::{debug, info, warn};

use crate::config::ScalingPolicy;
use crate::processing::compose::{Frame, pack_rgb, prepare_frame};

/// Surface geometry and fill every frame is prepared for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSpec {
    pub width: u32,
    pub height: u32,
    pub scaling: ScalingPolicy,
    pub background: [u8; 3],
}

impl FrameSpec {
    pub fn with_size(self, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..self
        }
    }

    /// A frame of pure background, used when a file stops decoding.
    pub fn blank(&self) -> Frame {
        let [r, g, b] = self.background;
        let width = self.width.max(1);
        let height = self.height.max(1);
        Frame {
            width,
            height,
            pixels: vec![pack_rgb(r, g, b); (width as usize) * (height as usize)],
        }
    }
}

pub struct LoadedFrame {
    pub path: PathBuf,
    pub frame: Frame,
}

/// Decode to RGBA8 and rotate/flip per the EXIF orientation tag, if any.
pub fn decode_oriented(path: &Path) -> image::ImageResult<RgbaImage> {
    let mut img = image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()?;
    if let Some(orientation) = read_orientation(path) {
        img.apply_orientation(orientation);
    }
    Ok(img.to_rgba8())
}

fn read_orientation(path: &Path) -> Option<Orientation> {
    let file = File::open(path).ok()?;
    let mut buf = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut buf).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let raw = field.value.get_uint(0)?;
    debug!(orientation = raw, path = %path.display(), "exif orientation");
    Orientation::from_exif(u8::try_from(raw).ok()?)
}

/// Decode `path` and scale it onto the surface; the full-size decode is
/// dropped before returning.
pub fn load_frame(path: &Path, spec: &FrameSpec) -> image::ImageResult<Frame> {
    let rgba = decode_oriented(path)?;
    Ok(prepare_frame(
        &rgba,
        spec.width,
        spec.height,
        spec.scaling,
        spec.background,
    ))
}

/// Load every path in order, skipping files that fail to decode.
pub fn load_frames(paths: &[PathBuf], spec: &FrameSpec) -> Vec<LoadedFrame> {
    let loaded: Vec<LoadedFrame> = paths
        .iter()
        .filter_map(|path| match load_frame(path, spec) {
            Ok(frame) => Some(LoadedFrame {
                path: path.clone(),
                frame,
            }),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping undecodable image");
                None
            }
        })
        .collect();
    info!(
        requested = paths.len(),
        decoded = loaded.len(),
        width = spec.width,
        height = spec.height,
        "slideshow frames prepared"
    );
    loaded
}
