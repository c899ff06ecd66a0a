//! Similarity alignment of face crops and feathered paste-back.

use image::{Rgb, RgbImage, RgbaImage};

/// `x' = a·x - b·y + tx`, `y' = b·x + a·y + ty` (rotation, uniform scale,
/// translation; no reflection).
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Least-squares fit mapping `src` points onto `dst` points.
    pub fn estimate(src: &[(f32, f32)], dst: &[(f32, f32)]) -> Option<Self> {
        if src.len() != dst.len() || src.is_empty() {
            return None;
        }
        let n = src.len() as f32;
        let centroid = |pts: &[(f32, f32)]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), p| (ax + p.0, ay + p.1));
            (sx / n, sy / n)
        };
        let (scx, scy) = centroid(src);
        let (dcx, dcy) = centroid(dst);

        let (mut var, mut dot, mut cross) = (0.0f32, 0.0f32, 0.0f32);
        for (s, d) in src.iter().zip(dst) {
            let (sx, sy) = (s.0 - scx, s.1 - scy);
            let (dx, dy) = (d.0 - dcx, d.1 - dcy);
            var += sx * sx + sy * sy;
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
        }
        if var <= f32::EPSILON {
            return None;
        }

        let (a, b) = (dot / var, cross / var);
        Some(Self {
            a,
            b,
            tx: dcx - (a * scx - b * scy),
            ty: dcy - (b * scx + a * scy),
        })
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    pub fn inverse(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det <= f32::EPSILON {
            return None;
        }
        let (a, b) = (self.a / det, -self.b / det);
        Some(Self {
            a,
            b,
            tx: -(a * self.tx - b * self.ty),
            ty: -(b * self.tx + a * self.ty),
        })
    }
}

/// Warp `source` into a `size`×`size` crop. `to_crop` maps source
/// coordinates into the crop; pixels outside the source replicate the border.
pub(crate) fn warp_crop(source: &RgbImage, to_crop: &Similarity, size: u32) -> Option<RgbImage> {
    let to_source = to_crop.inverse()?;
    Some(RgbImage::from_fn(size, size, |u, v| {
        let (x, y) = to_source.apply(u as f32, v as f32);
        let px = sample(source, x, y);
        Rgb([px[0] as u8, px[1] as u8, px[2] as u8])
    }))
}

/// Blend a restored crop back onto `base`.
///
/// `base` is the source scaled by `scale`; `to_crop` is the same source-space
/// transform used by [`warp_crop`]. The blend weight fades to zero over
/// `feather` crop pixels at the crop edge and is multiplied by `weight`.
pub(crate) fn paste_back(
    base: &mut RgbaImage,
    restored: &RgbImage,
    to_crop: &Similarity,
    scale: f32,
    weight: f32,
    feather: f32,
) {
    let Some(to_source) = to_crop.inverse() else {
        return;
    };
    let size = restored.width().min(restored.height()) as f32;
    let last = size - 1.0;

    // Bounding box of the crop in base coordinates.
    let corners = [(0.0, 0.0), (last, 0.0), (0.0, last), (last, last)]
        .map(|(u, v)| to_source.apply(u, v));
    let (min_x, max_x) = span(corners.iter().map(|c| c.0), scale, base.width());
    let (min_y, max_y) = span(corners.iter().map(|c| c.1), scale, base.height());

    for by in min_y..max_y {
        for bx in min_x..max_x {
            let sx = (bx as f32 + 0.5) / scale - 0.5;
            let sy = (by as f32 + 0.5) / scale - 0.5;
            let (u, v) = to_crop.apply(sx, sy);
            if !(0.0..=last).contains(&u) || !(0.0..=last).contains(&v) {
                continue;
            }
            let edge = u.min(v).min(last - u).min(last - v);
            let alpha = (edge / feather.max(1.0)).clamp(0.0, 1.0) * weight;
            if alpha <= 0.0 {
                continue;
            }
            let face = sample(restored, u, v);
            let pixel = base.get_pixel_mut(bx, by);
            for c in 0..3 {
                let mixed = face[c] * alpha + pixel[c] as f32 * (1.0 - alpha);
                pixel[c] = mixed.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

/// Pixel range covered by source coordinates `values` once scaled.
fn span(values: impl Iterator<Item = f32>, scale: f32, limit: u32) -> (u32, u32) {
    let (lo, hi) = values.fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let lo = ((lo * scale).floor().max(0.0) as u32).min(limit);
    let hi = ((hi * scale).ceil() as i64 + 1).clamp(0, limit as i64) as u32;
    (lo, hi)
}

/// Bilinear sample with clamped coordinates.
fn sample(image: &RgbImage, x: f32, y: f32) -> [f32; 3] {
    let max_x = (image.width() - 1) as f32;
    let max_y = (image.height() - 1) as f32;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);
    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);
    let (x0, y0) = (x0 as u32, y0 as u32);
    let x1 = (x0 + 1).min(max_x as u32);
    let y1 = (y0 + 1).min(max_y as u32);

    let (p00, p10) = (image.get_pixel(x0, y0), image.get_pixel(x1, y0));
    let (p01, p11) = (image.get_pixel(x0, y1), image.get_pixel(x1, y1));
    let mut out = [0.0; 3];
    for (c, value) in out.iter_mut().enumerate() {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        *value = (top * (1.0 - fy) + bottom * fy).round();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    const POINTS: [(f32, f32); 5] = [
        (10.0, 12.0),
        (30.0, 12.0),
        (20.0, 22.0),
        (13.0, 32.0),
        (27.0, 32.0),
    ];

    fn close(a: (f32, f32), b: (f32, f32)) -> bool {
        (a.0 - b.0).abs() < 1e-3 && (a.1 - b.1).abs() < 1e-3
    }

    #[test]
    fn test_estimate_recovers_rotation_scale_and_shift() {
        // 90° rotation, scale 2, shift (5, -3).
        let dst: Vec<_> = POINTS
            .iter()
            .map(|&(x, y)| (-2.0 * y + 5.0, 2.0 * x - 3.0))
            .collect();
        let t = Similarity::estimate(&POINTS, &dst).unwrap();
        for (s, d) in POINTS.iter().zip(&dst) {
            assert!(close(t.apply(s.0, s.1), *d));
        }
    }

    #[test]
    fn test_inverse_round_trips() {
        let t = Similarity {
            a: 1.5,
            b: -0.4,
            tx: 12.0,
            ty: -7.0,
        };
        let inv = t.inverse().unwrap();
        let (x, y) = t.apply(3.0, 4.0);
        assert!(close(inv.apply(x, y), (3.0, 4.0)));
    }

    #[test]
    fn test_degenerate_points_rejected() {
        let same = [(1.0, 1.0); 5];
        assert!(Similarity::estimate(&same, &POINTS).is_none());
        assert!(Similarity::estimate(&POINTS[..2], &POINTS).is_none());
    }

    #[test]
    fn test_identity_warp_copies_pixels() {
        let source = RgbImage::from_fn(8, 8, |x, y| Rgb([(x * 10) as u8, (y * 10) as u8, 0]));
        let identity = Similarity::estimate(&POINTS, &POINTS).unwrap();
        let crop = warp_crop(&source, &identity, 8).unwrap();
        assert_eq!(crop, source);
    }

    #[test]
    fn test_paste_back_covers_face_region_only() {
        let mut base = RgbaImage::from_pixel(64, 64, Rgba([0, 0, 0, 255]));
        let restored = RgbImage::from_pixel(16, 16, Rgb([255, 255, 255]));
        // Source (8..24, 8..24) maps onto the 16×16 crop.
        let to_crop = Similarity {
            a: 1.0,
            b: 0.0,
            tx: -8.0,
            ty: -8.0,
        };
        paste_back(&mut base, &restored, &to_crop, 2.0, 1.0, 2.0);

        assert_eq!(base.get_pixel(32, 32), &Rgba([255, 255, 255, 255]));
        assert_eq!(base.get_pixel(2, 2), &Rgba([0, 0, 0, 255]));
        assert_eq!(base.get_pixel(60, 60), &Rgba([0, 0, 0, 255]));
        // Feathered edge is partially blended.
        let edge = base.get_pixel(17, 32)[0];
        assert!(edge < 255, "edge not feathered: {edge}");
    }
}
