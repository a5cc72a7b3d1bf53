// SPDX-License-Identifier: MIT
// CPU scaler built on fast_image_resize (SIMD-accelerated).
// RGBA8 in → RGBA8 out, direct write into caller-provided dst buffer.
// Cutouts carry straight alpha, so the resize runs alpha-aware to keep
// transparent fringe pixels from bleeding dark halos into the edge.

use fast_image_resize as fir;
use fir::images::{TypedImage, TypedImageRef};
use fir::pixels::U8x4;
use fir::{ResizeOptions, Resizer};

use crate::presets::{ScalePlan, Size};

#[derive(Debug)]
pub enum ScaleError {
    BufferTooSmall,
    SourceSizeMismatch { expected: usize, actual: usize },
    EmptyPlan,
    Fir(fir::ResizeError),
    ImageBuf(fir::ImageBufferError),
}

impl From<fir::ResizeError> for ScaleError { fn from(e: fir::ResizeError) -> Self { Self::Fir(e) } }
impl From<fir::ImageBufferError> for ScaleError { fn from(e: fir::ImageBufferError) -> Self { Self::ImageBuf(e) } }

impl std::fmt::Display for ScaleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScaleError::BufferTooSmall => write!(f, "Output buffer too small"),
            ScaleError::SourceSizeMismatch { expected, actual } => {
                write!(f, "Source buffer holds {} bytes, expected {}", actual, expected)
            }
            ScaleError::EmptyPlan => write!(f, "Scale plan has an empty input or output"),
            ScaleError::Fir(e) => write!(f, "Fast image resize error: {}", e),
            ScaleError::ImageBuf(e) => write!(f, "Image buffer error: {}", e),
        }
    }
}

impl std::error::Error for ScaleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScaleError::Fir(e) => Some(e),
            ScaleError::ImageBuf(e) => Some(e),
            _ => None,
        }
    }
}

/// Main scaling entry point.
/// `src_rgba` must be tightly packed `src.w * src.h * 4` bytes.
/// `dst` must be at least `plan.out.w * plan.out.h * 4` bytes (RGBA).
pub fn scale_rgba_cpu(
    resizer: &mut Resizer,
    src_rgba: &[u8],
    src: Size,
    plan: &ScalePlan,
    dst: &mut [u8],
) -> Result<(), ScaleError> {
    if src.is_empty() || plan.out.is_empty() {
        return Err(ScaleError::EmptyPlan);
    }

    let src_len = (src.w as usize) * (src.h as usize) * 4;
    if src_rgba.len() != src_len {
        return Err(ScaleError::SourceSizeMismatch { expected: src_len, actual: src_rgba.len() });
    }

    let dst_len = (plan.out.w as usize) * (plan.out.h as usize) * 4;
    if dst.len() < dst_len {
        return Err(ScaleError::BufferTooSmall);
    }

    // Identity plans skip the resampler entirely.
    if plan.out == src {
        dst[..dst_len].copy_from_slice(src_rgba);
        return Ok(());
    }

    let src_view = TypedImageRef::<U8x4>::from_buffer(src.w, src.h, src_rgba)?;
    let mut dst_image = TypedImage::<U8x4>::from_buffer(plan.out.w, plan.out.h, &mut dst[..dst_len])?;

    let opts = ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Lanczos3))
        .use_alpha(true);

    resizer.resize_typed::<U8x4>(&src_view, &mut dst_image, &opts)?;
    Ok(())
}

/// Allocate an output buffer sized for `plan` and scale into it.
pub fn scale_rgba_to_vec(
    resizer: &mut Resizer,
    src_rgba: &[u8],
    src: Size,
    plan: &ScalePlan,
) -> Result<Vec<u8>, ScaleError> {
    let mut out = vec![0u8; (plan.out.w as usize) * (plan.out.h as usize) * 4];
    scale_rgba_cpu(resizer, src_rgba, src, plan, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets::{build_plan, ScaleTarget};

    fn solid(size: Size, px: [u8; 4]) -> Vec<u8> {
        px.iter().copied().cycle().take((size.w * size.h * 4) as usize).collect()
    }

    #[test]
    fn downscale_preserves_solid_colour() {
        let src = Size::new(64, 32);
        let plan = build_plan(src, ScaleTarget::Box(Size::new(16, 16)));
        assert_eq!(plan.out, Size::new(16, 8));

        let out = scale_rgba_to_vec(&mut Resizer::new(), &solid(src, [200, 10, 20, 255]), src, &plan)
            .expect("scale");
        assert_eq!(out.len(), 16 * 8 * 4);
        for px in out.chunks_exact(4) {
            for (got, want) in px.iter().zip([200u8, 10, 20, 255]) {
                assert!(got.abs_diff(want) <= 1, "pixel {:?}", px);
            }
        }
    }

    #[test]
    fn identity_plan_copies_input() {
        let src = Size::new(4, 4);
        let plan = build_plan(src, ScaleTarget::Box(Size::new(10, 10)));
        let data = solid(src, [1, 2, 3, 4]);
        let out = scale_rgba_to_vec(&mut Resizer::new(), &data, src, &plan).expect("scale");
        assert_eq!(out, data);
    }

    #[test]
    fn short_source_is_rejected() {
        let src = Size::new(4, 4);
        let plan = build_plan(src, ScaleTarget::Box(Size::new(2, 2)));
        let err = scale_rgba_to_vec(&mut Resizer::new(), &[0u8; 8], src, &plan).unwrap_err();
        assert!(matches!(err, ScaleError::SourceSizeMismatch { .. }));
    }

    #[test]
    fn small_destination_is_rejected() {
        let src = Size::new(8, 8);
        let plan = build_plan(src, ScaleTarget::Box(Size::new(4, 4)));
        let mut dst = vec![0u8; 4];
        let err = scale_rgba_cpu(&mut Resizer::new(), &solid(src, [0; 4]), src, &plan, &mut dst)
            .unwrap_err();
        assert!(matches!(err, ScaleError::BufferTooSmall));
    }
}
