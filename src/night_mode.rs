// SPDX-License-Identifier: GPL-3.0-only

//! Night-mode decision and CLAHE-style contrast enhancement (§4.2).
//!
//! No particular image library is prescribed here, so this implements a
//! tiled, clip-limited histogram equalization directly over
//! the frame's luma channel (an L*a*b lightness proxy), which is the
//! standard CLAHE construction: partition into tiles, build a per-tile
//! histogram, clip and redistribute counts above the limit, then
//! bilinearly interpolate between the four nearest tile mappings per
//! pixel to avoid tile-boundary seams.

use chrono::Timelike;

use crate::constants::{
    NIGHT_MODE_CLIP_LIMIT, NIGHT_MODE_END_HOUR, NIGHT_MODE_LUMINANCE_THRESHOLD,
    NIGHT_MODE_START_HOUR, NIGHT_MODE_TILE_SIZE,
};
use crate::frame::Frame;

/// True if local wall-clock hour or frame darkness calls for night mode
/// (§4.2, point 1).
pub fn is_night_mode(frame: &Frame, local_hour: u32) -> bool {
    let hour_based = local_hour >= NIGHT_MODE_START_HOUR || local_hour < NIGHT_MODE_END_HOUR;
    hour_based || frame.mean_luminance() < NIGHT_MODE_LUMINANCE_THRESHOLD
}

/// Current local wall-clock hour, 0..24.
pub fn current_local_hour() -> u32 {
    chrono::Local::now().hour()
}

/// Applies CLAHE-equivalent enhancement to the lightness channel and
/// returns a new frame with the same chroma but enhanced luma (§4.2,
/// point 2).
pub fn enhance_clahe(frame: &Frame) -> Frame {
    let rgb = frame.to_rgb_image();
    let (width, height) = (rgb.width(), rgb.height());

    let mut luma = vec![0u8; (width * height) as usize];
    for (i, px) in rgb.pixels().enumerate() {
        let (r, g, b) = (px[0] as u32, px[1] as u32, px[2] as u32);
        luma[i] = ((r * 299 + g * 587 + b * 114) / 1000) as u8;
    }

    let enhanced_luma = clahe(&luma, width, height, NIGHT_MODE_TILE_SIZE, NIGHT_MODE_CLIP_LIMIT);

    let mut out = rgb.clone();
    for (i, px) in out.pixels_mut().enumerate() {
        let old_l = luma[i] as f32;
        if old_l < 1.0 {
            continue;
        }
        let scale = enhanced_luma[i] as f32 / old_l;
        px[0] = (px[0] as f32 * scale).round().clamp(0.0, 255.0) as u8;
        px[1] = (px[1] as f32 * scale).round().clamp(0.0, 255.0) as u8;
        px[2] = (px[2] as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }

    Frame::from_rgb_image(&out, frame.captured_at)
}

/// Tiled, clip-limited histogram equalization over a single 8-bit channel.
fn clahe(channel: &[u8], width: u32, height: u32, tile_size: u32, clip_limit: f32) -> Vec<u8> {
    let tiles_x = width.div_ceil(tile_size).max(1);
    let tiles_y = height.div_ceil(tile_size).max(1);

    // Build a clipped-and-redistributed cumulative mapping per tile.
    let mut tile_maps: Vec<[u8; 256]> = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_size;
            let y0 = ty * tile_size;
            let x1 = (x0 + tile_size).min(width);
            let y1 = (y0 + tile_size).min(height);

            let mut hist = [0u32; 256];
            let mut count = 0u32;
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[channel[(y * width + x) as usize] as usize] += 1;
                    count += 1;
                }
            }
            tile_maps.push(build_clipped_cdf(&hist, count, clip_limit));
        }
    }

    // Bilinearly interpolate between the four nearest tile centers per pixel.
    let mut out = vec![0u8; channel.len()];
    for y in 0..height {
        for x in 0..width {
            let v = channel[(y * width + x) as usize];
            out[(y * width + x) as usize] =
                interpolate(&tile_maps, tiles_x, tiles_y, tile_size, x, y, v);
        }
    }
    out
}

fn build_clipped_cdf(hist: &[u32; 256], total: u32, clip_limit: f32) -> [u8; 256] {
    if total == 0 {
        let mut identity = [0u8; 256];
        for (i, slot) in identity.iter_mut().enumerate() {
            *slot = i as u8;
        }
        return identity;
    }

    let limit = ((clip_limit * total as f32 / 256.0).round() as u32).max(1);
    let mut clipped = *hist;
    let mut excess = 0u32;
    for bin in clipped.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }
    let redistribution = excess / 256;
    for bin in clipped.iter_mut() {
        *bin += redistribution;
    }

    let mut cdf = [0u32; 256];
    let mut running = 0u32;
    for (i, &count) in clipped.iter().enumerate() {
        running += count;
        cdf[i] = running;
    }
    let cdf_max = cdf[255].max(1);

    let mut out = [0u8; 256];
    for i in 0..256 {
        out[i] = ((cdf[i] as f32 / cdf_max as f32) * 255.0).round() as u8;
    }
    out
}

#[allow(clippy::too_many_arguments)]
fn interpolate(
    tile_maps: &[[u8; 256]],
    tiles_x: u32,
    tiles_y: u32,
    tile_size: u32,
    x: u32,
    y: u32,
    v: u8,
) -> u8 {
    let tile_size_f = tile_size as f32;
    // Position in tile-center units, shifted by half a tile.
    let fx = (x as f32 + 0.5) / tile_size_f - 0.5;
    let fy = (y as f32 + 0.5) / tile_size_f - 0.5;

    let tx0 = fx.floor().clamp(0.0, (tiles_x - 1) as f32) as u32;
    let ty0 = fy.floor().clamp(0.0, (tiles_y - 1) as f32) as u32;
    let tx1 = (tx0 + 1).min(tiles_x - 1);
    let ty1 = (ty0 + 1).min(tiles_y - 1);

    let wx = (fx - tx0 as f32).clamp(0.0, 1.0);
    let wy = (fy - ty0 as f32).clamp(0.0, 1.0);

    let at = |tx: u32, ty: u32| -> f32 { tile_maps[(ty * tiles_x + tx) as usize][v as usize] as f32 };

    let top = at(tx0, ty0) * (1.0 - wx) + at(tx1, ty0) * wx;
    let bottom = at(tx0, ty1) * (1.0 - wx) + at(tx1, ty1) * wx;
    (top * (1.0 - wy) + bottom * wy).round().clamp(0.0, 255.0) as u8
}
