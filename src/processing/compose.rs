//! CPU frame preparation and crossfade blending for the slideshow surface.
//! Pixels are packed `0RGB` in a `u32`, the layout softbuffer presents.

use image::RgbaImage;
use image::imageops::{self, FilterType};

use crate::config::ScalingPolicy;
use crate::processing::layout::{center_offset, fit_within};

/// An image already scaled to the display surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
}

#[inline]
pub fn pack_rgb(r: u8, g: u8, b: u8) -> u32 {
    (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
}

#[inline]
fn over_background(channel: u8, alpha: u8, bg: u8) -> u8 {
    let a = u32::from(alpha);
    ((u32::from(channel) * a + u32::from(bg) * (255 - a) + 127) / 255) as u8
}

/// Scale `img` onto a `width`×`height` surface under `scaling`.
pub fn prepare_frame(
    img: &RgbaImage,
    width: u32,
    height: u32,
    scaling: ScalingPolicy,
    background: [u8; 3],
) -> Frame {
    let width = width.max(1);
    let height = height.max(1);
    let (fit_w, fit_h) = match scaling {
        ScalingPolicy::Stretch => (width, height),
        ScalingPolicy::Letterbox => fit_within(width, height, img.width(), img.height()),
    };
    let (ox, oy) = center_offset(fit_w, fit_h, width, height);
    let resized = imageops::resize(img, fit_w, fit_h, FilterType::Triangle);

    let [br, bg, bb] = background;
    let mut pixels = vec![pack_rgb(br, bg, bb); (width as usize) * (height as usize)];
    for (x, y, px) in resized.enumerate_pixels() {
        let [r, g, b, a] = px.0;
        let idx = ((y + oy) as usize) * (width as usize) + (x + ox) as usize;
        pixels[idx] = pack_rgb(
            over_background(r, a, br),
            over_background(g, a, bg),
            over_background(b, a, bb),
        );
    }
    Frame {
        width,
        height,
        pixels,
    }
}

/// `dst = current * (1 - t) + next * t`, per channel, `t` clamped to `[0, 1]`.
///
/// All three buffers must have the same length.
pub fn blend_into(dst: &mut [u32], current: &[u32], next: &[u32], t: f32) {
    debug_assert_eq!(dst.len(), current.len());
    debug_assert_eq!(dst.len(), next.len());
    let w = (t.clamp(0.0, 1.0) * 256.0).round() as u32;
    let inv = 256 - w;
    for ((out, &a), &b) in dst.iter_mut().zip(current).zip(next) {
        let mix = |shift: u32| {
            let ca = (a >> shift) & 0xff;
            let cb = (b >> shift) & 0xff;
            ((ca * inv + cb * w + 128) >> 8) & 0xff
        };
        *out = (mix(16) << 16) | (mix(8) << 8) | mix(0);
    }
}
