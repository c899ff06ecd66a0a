//! Local contrast enhancement (CLAHE) on the lightness channel.
//!
//! The image is converted to CIE L*a*b*, contrast-limited adaptive histogram
//! equalization is applied to L* quantized to 8 bits, and the result is
//! converted back with a* and b* untouched. Alpha passes through unchanged.

use image::{DynamicImage, Rgba, RgbaImage};

use crate::error::StageError;
use crate::job::{JobOptions, StageConfig};
use crate::types::{PixelBuffer, StageKind, StageResult};

use super::{config_mismatch, StageAdapter};

const BINS: usize = 256;

/// D65 reference white.
const WHITE: [f32; 3] = [0.950_47, 1.0, 1.088_83];

const DELTA: f32 = 6.0 / 29.0;

/// In-process CLAHE. Stateless and reentrant.
pub struct ContrastEnhancer;

impl StageAdapter for ContrastEnhancer {
    fn kind(&self) -> StageKind {
        StageKind::EnhanceContrast
    }

    fn probe(&self, _options: &JobOptions) -> Result<(), StageError> {
        Ok(())
    }

    fn apply(&self, image: PixelBuffer, config: &StageConfig<'_>) -> StageResult {
        let StageConfig::EnhanceContrast {
            clip_limit,
            tile_size,
        } = *config
        else {
            return config_mismatch(StageKind::EnhanceContrast, config);
        };
        StageResult::Success(PixelBuffer::new(enhance(
            image.image(),
            clip_limit,
            tile_size,
        )))
    }
}

/// Apply CLAHE to the L* channel of `image`.
///
/// `tile_grid` is the number of tiles per side.
pub fn enhance(image: &DynamicImage, clip_limit: f32, tile_grid: u32) -> DynamicImage {
    let has_alpha = image.color().has_alpha();
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();

    let lab: Vec<[f32; 3]> = rgba
        .pixels()
        .map(|p| srgb_to_lab(p[0], p[1], p[2]))
        .collect();
    let lightness: Vec<u8> = lab
        .iter()
        .map(|l| (l[0] * 255.0 / 100.0).round().clamp(0.0, 255.0) as u8)
        .collect();

    let equalized = clahe(
        &lightness,
        width as usize,
        height as usize,
        clip_limit,
        tile_grid as usize,
    );

    let mut out = RgbaImage::new(width, height);
    for (i, (pixel, src)) in out.pixels_mut().zip(rgba.pixels()).enumerate() {
        let l = equalized[i] as f32 * 100.0 / 255.0;
        let [r, g, b] = lab_to_srgb(l, lab[i][1], lab[i][2]);
        *pixel = Rgba([r, g, b, src[3]]);
    }

    if has_alpha {
        DynamicImage::ImageRgba8(out)
    } else {
        DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(out).to_rgb8())
    }
}

/// Contrast-limited adaptive histogram equalization of an 8-bit plane.
fn clahe(src: &[u8], width: usize, height: usize, clip_limit: f32, grid: usize) -> Vec<u8> {
    if width == 0 || height == 0 {
        return src.to_vec();
    }

    let tile_w = width.div_ceil(grid.clamp(1, width));
    let tile_h = height.div_ceil(grid.clamp(1, height));
    let tiles_x = width.div_ceil(tile_w);
    let tiles_y = height.div_ceil(tile_h);

    let mut luts = Vec::with_capacity(tiles_x * tiles_y);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let (x0, x1) = (tx * tile_w, ((tx + 1) * tile_w).min(width));
            let (y0, y1) = (ty * tile_h, ((ty + 1) * tile_h).min(height));

            let mut hist = [0u32; BINS];
            for y in y0..y1 {
                for &v in &src[y * width + x0..y * width + x1] {
                    hist[v as usize] += 1;
                }
            }
            let area = ((x1 - x0) * (y1 - y0)) as u32;
            luts.push(tile_lut(&mut hist, area, clip_limit));
        }
    }

    let lut = |tx: usize, ty: usize, v: u8| luts[ty * tiles_x + tx][v as usize] as f32;

    let mut out = vec![0u8; src.len()];
    for y in 0..height {
        let (ty1, ty2, ya) = neighbours(y, tile_h, tiles_y);
        for x in 0..width {
            let (tx1, tx2, xa) = neighbours(x, tile_w, tiles_x);
            let v = src[y * width + x];

            let top = lut(tx1, ty1, v) * (1.0 - xa) + lut(tx2, ty1, v) * xa;
            let bottom = lut(tx1, ty2, v) * (1.0 - xa) + lut(tx2, ty2, v) * xa;
            let value = top * (1.0 - ya) + bottom * ya;
            out[y * width + x] = value.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// The two tiles whose centers bracket `pos`, and the weight of the second.
fn neighbours(pos: usize, tile: usize, tiles: usize) -> (usize, usize, f32) {
    let f = (pos as f32 + 0.5) / tile as f32 - 0.5;
    let lower = f.floor();
    let weight = f - lower;
    let first = (lower.max(0.0) as usize).min(tiles - 1);
    let second = ((lower + 1.0).max(0.0) as usize).min(tiles - 1);
    (first, second, weight)
}

/// Clip a tile histogram, redistribute the excess and build its mapping.
fn tile_lut(hist: &mut [u32; BINS], area: u32, clip_limit: f32) -> [u8; BINS] {
    let limit = ((clip_limit * area as f32 / BINS as f32) as u32).max(1);

    let mut clipped = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            clipped += *bin - limit;
            *bin = limit;
        }
    }

    let redistributed = clipped / BINS as u32;
    let residual = (clipped % BINS as u32) as usize;
    for bin in hist.iter_mut() {
        *bin += redistributed;
    }
    if residual > 0 {
        let step = (BINS / residual).max(1);
        for i in (0..BINS).step_by(step).take(residual) {
            hist[i] += 1;
        }
    }

    let scale = 255.0 / area.max(1) as f32;
    let mut lut = [0u8; BINS];
    let mut sum = 0u32;
    for (entry, &count) in lut.iter_mut().zip(hist.iter()) {
        sum += count;
        *entry = (sum as f32 * scale).round().min(255.0) as u8;
    }
    lut
}

fn srgb_to_linear(c: u8) -> f32 {
    let c = c as f32 / 255.0;
    if c <= 0.040_45 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(c: f32) -> u8 {
    let c = c.clamp(0.0, 1.0);
    let v = if c <= 0.003_130_8 {
        12.92 * c
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    };
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

fn lab_f(t: f32) -> f32 {
    if t > DELTA * DELTA * DELTA {
        t.cbrt()
    } else {
        t / (3.0 * DELTA * DELTA) + 4.0 / 29.0
    }
}

fn lab_f_inv(t: f32) -> f32 {
    if t > DELTA {
        t * t * t
    } else {
        3.0 * DELTA * DELTA * (t - 4.0 / 29.0)
    }
}

fn srgb_to_lab(r: u8, g: u8, b: u8) -> [f32; 3] {
    let (r, g, b) = (srgb_to_linear(r), srgb_to_linear(g), srgb_to_linear(b));

    let x = 0.412_456_4 * r + 0.357_576_1 * g + 0.180_437_5 * b;
    let y = 0.212_672_9 * r + 0.715_152_2 * g + 0.072_175 * b;
    let z = 0.019_333_9 * r + 0.119_192 * g + 0.950_304_1 * b;

    let fx = lab_f(x / WHITE[0]);
    let fy = lab_f(y / WHITE[1]);
    let fz = lab_f(z / WHITE[2]);

    [116.0 * fy - 16.0, 500.0 * (fx - fy), 200.0 * (fy - fz)]
}

fn lab_to_srgb(l: f32, a: f32, b: f32) -> [u8; 3] {
    let fy = (l + 16.0) / 116.0;
    let fx = fy + a / 500.0;
    let fz = fy - b / 200.0;

    let x = WHITE[0] * lab_f_inv(fx);
    let y = WHITE[1] * lab_f_inv(fy);
    let z = WHITE[2] * lab_f_inv(fz);

    let r = 3.240_454_2 * x - 1.537_138_5 * y - 0.498_531_4 * z;
    let g = -0.969_266 * x + 1.876_010_8 * y + 0.041_556 * z;
    let b = 0.055_643_4 * x - 0.204_025_9 * y + 1.057_225_2 * z;

    [linear_to_srgb(r), linear_to_srgb(g), linear_to_srgb(b)]
}
