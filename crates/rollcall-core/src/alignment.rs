//! Face alignment via 4-DOF similarity transform.
//!
//! Aligns detected faces to a canonical 112×112 position using the five
//! InsightFace reference landmarks and least-squares estimation.

use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: usize = 112;

/// Estimate a 2×3 similarity transform (4-DOF: scale, rotation, translation)
/// from `src` landmarks to `dst` landmarks using least-squares.
///
/// Returns [a, -b, tx, b, a, ty] representing the matrix:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
fn estimate_similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [f32; 6] {
    // Build overdetermined system A * [a, b, tx, ty]^T = B
    // For each point pair (sx, sy) -> (dx, dy):
    //   sx * a - sy * b + tx = dx
    //   sy * a + sx * b + ty = dy
    let mut ata = [0.0f32; 16]; // 4x4, row-major
    let mut atb = [0.0f32; 4]; // 4x1

    for i in 0..5 {
        let (sx, sy) = src[i];
        let (dx, dy) = dst[i];

        // Row 1: [sx, -sy, 1, 0] * [a, b, tx, ty]^T = dx
        let r1 = [sx, -sy, 1.0, 0.0];
        // Row 2: [sy, sx, 0, 1] * [a, b, tx, ty]^T = dy
        let r2 = [sy, sx, 0.0, 1.0];

        for j in 0..4 {
            for k in 0..4 {
                ata[j * 4 + k] += r1[j] * r1[k] + r2[j] * r2[k];
            }
            atb[j] += r1[j] * dx + r2[j] * dy;
        }
    }

    // Solve 4x4 system via Gaussian elimination with partial pivoting
    let x = solve_4x4(&ata, &atb);
    let (a, b, tx, ty) = (x[0], x[1], x[2], x[3]);

    [a, -b, tx, b, a, ty]
}

/// Solve a 4×4 linear system via Gaussian elimination with partial pivoting.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(ata: &[f32; 16], atb: &[f32; 4]) -> [f32; 4] {
    // Augmented matrix [A | b] as 4x5
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        for j in 0..4 {
            m[i][j] = ata[i * 4 + j];
        }
        m[i][4] = atb[i];
    }

    // Forward elimination with partial pivoting
    for col in 0..4 {
        // Find pivot
        let mut max_row = col;
        let mut max_val = m[col][col].abs();
        for row in (col + 1)..4 {
            if m[row][col].abs() > max_val {
                max_val = m[row][col].abs();
                max_row = row;
            }
        }
        m.swap(col, max_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return [1.0, 0.0, 0.0, 0.0]; // fallback: identity-ish
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    // Back substitution
    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }

    x
}

/// Apply a 2×3 affine warp to an RGB image, producing a square crop.
///
/// Uses bilinear interpolation per channel. Out-of-bounds pixels are black.
fn warp_affine(src: &RgbImage, matrix: &[f32; 6], out_size: usize) -> RgbImage {
    let (a, _neg_b, tx) = (matrix[0], matrix[1], matrix[2]);
    let (b, _a2, ty) = (matrix[3], matrix[4], matrix[5]);
    let out_dim = out_size as u32;

    // Invert the 2x2 part: M = [[a, -b], [b, a]], det = a^2 + b^2
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return RgbImage::new(out_dim, out_dim);
    }
    let inv_det = 1.0 / det;
    let ia = a * inv_det;
    let ib = b * inv_det;

    let (src_w, src_h) = (src.width() as i32, src.height() as i32);
    let sample = |x: i32, y: i32| -> [f32; 3] {
        if x >= 0 && x < src_w && y >= 0 && y < src_h {
            let Rgb([r, g, b]) = *src.get_pixel(x as u32, y as u32);
            [r as f32, g as f32, b as f32]
        } else {
            [0.0; 3]
        }
    };

    RgbImage::from_fn(out_dim, out_dim, |ox, oy| {
        // Map output pixel back to source: src = M_inv * (dst - t)
        let dx = ox as f32 - tx;
        let dy = oy as f32 - ty;
        let sx = ia * dx + ib * dy;
        let sy = -ib * dx + ia * dy;

        let x0 = sx.floor() as i32;
        let y0 = sy.floor() as i32;
        let fx = sx - x0 as f32;
        let fy = sy - y0 as f32;

        let tl = sample(x0, y0);
        let tr = sample(x0 + 1, y0);
        let bl = sample(x0, y0 + 1);
        let br = sample(x0 + 1, y0 + 1);

        let mut px = [0u8; 3];
        for c in 0..3 {
            let val = tl[c] * (1.0 - fx) * (1.0 - fy)
                + tr[c] * fx * (1.0 - fy)
                + bl[c] * (1.0 - fx) * fy
                + br[c] * fx * fy;
            px[c] = val.round().clamp(0.0, 255.0) as u8;
        }
        Rgb(px)
    })
}

/// Align a detected face to a canonical 112×112 RGB crop.
///
/// Computes the similarity transform from the five detected landmarks to the
/// reference positions and warps the face region into the crop ArcFace expects.
pub fn align_face(frame: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let matrix = estimate_similarity_transform(landmarks, &REFERENCE_LANDMARKS_112);
    warp_affine(frame, &matrix, ALIGNED_SIZE)
}
