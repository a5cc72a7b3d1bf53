//! # Compositor
//!
//! Places a background-removed subject onto a layout template and emits one
//! flattened JPEG. The geometry comes from [`booth_scale::presets::PhotoWindow`];
//! this module only executes it:
//!
//! 1. Fit the cutout inside the window box (never upscaled)
//! 2. Resize with the SIMD scaler
//! 3. Alpha-composite at the placement offset, clipping overflow
//! 4. Flatten against the configured background colour
//! 5. Encode at the configured quality
//!
//! The result is a pure function of the template pixels, the cutout pixels and the
//! configuration.

use std::{io::Cursor, sync::Arc};

use booth_scale::{
    cpu::scale_rgba_to_vec,
    presets::{PhotoWindow, Placement, ScalePlan, Size},
};
use fast_image_resize::Resizer;
use image::{RgbImage, RgbaImage, codecs::jpeg::JpegEncoder, imageops};
use tracing::debug;

use super::templates::LayoutTemplate;
use crate::{
    config::BoothConfig,
    error::{BoothError, BoothResult},
};

/// Encoded final image plus the geometry that produced it.
#[derive(Debug, Clone)]
pub struct ComposedImage {
    pub template_id: String,
    pub width: u32,
    pub height: u32,
    pub plan: ScalePlan,
    pub placement: Placement,
    /// JPEG bytes
    pub bytes: Vec<u8>,
}

/// Composites cutouts onto templates.
#[derive(Debug, Clone, Copy)]
pub struct Compositor {
    window: PhotoWindow,
    background: [u8; 3],
    jpeg_quality: u8,
}

impl Compositor {
    pub fn new(window: PhotoWindow, background: [u8; 3], jpeg_quality: u8) -> Self {
        Self {
            window,
            background,
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    pub fn from_config(config: &BoothConfig) -> Self {
        Self::new(config.window, config.background, config.jpeg_quality)
    }

    /// Decode `cutout`, composite it onto `template` and encode the result.
    pub fn compose(&self, template: &LayoutTemplate, cutout: &[u8]) -> BoothResult<ComposedImage> {
        let cutout = image::load_from_memory(cutout)
            .map_err(|e| BoothError::from(e).with_context("cutout image"))?
            .into_rgba8();

        let (flat, plan, placement) = self.compose_pixels(&template.background, &cutout)?;
        let bytes = self.encode(&flat)?;

        debug!(
            layout = %template.id,
            scaled_w = plan.out.w,
            scaled_h = plan.out.h,
            left = placement.left,
            top = placement.top,
            bytes = bytes.len(),
            "Composed final image"
        );

        Ok(ComposedImage {
            template_id: template.id.clone(),
            width: flat.width(),
            height: flat.height(),
            plan,
            placement,
            bytes,
        })
    }

    /// Run [`Compositor::compose`] on the blocking pool.
    pub async fn compose_blocking(
        self,
        template: Arc<LayoutTemplate>,
        cutout: Vec<u8>,
    ) -> BoothResult<ComposedImage> {
        tokio::task::spawn_blocking(move || self.compose(&template, &cutout))
            .await
            .map_err(|e| BoothError::external("tokio", e).with_operation("compose"))?
    }

    /// Composite decoded pixels. Output has the template's exact dimensions.
    pub fn compose_pixels(
        &self,
        template: &RgbaImage,
        cutout: &RgbaImage,
    ) -> BoothResult<(RgbImage, ScalePlan, Placement)> {
        let canvas_size = Size::new(template.width(), template.height());
        let subject = Size::new(cutout.width(), cutout.height());
        if canvas_size.is_empty() {
            return Err(BoothError::decode("template", "image has no pixels"));
        }
        if subject.is_empty() {
            return Err(BoothError::decode("cutout image", "image has no pixels"));
        }

        let layout = self.window.layout(canvas_size, subject);
        let scaled = if layout.plan.is_identity() {
            cutout.clone()
        } else {
            let pixels = scale_rgba_to_vec(&mut Resizer::new(), cutout.as_raw(), subject, &layout.plan)?;
            RgbaImage::from_raw(layout.plan.out.w, layout.plan.out.h, pixels).ok_or_else(|| {
                BoothError::decode("cutout image", "scaled buffer does not match plan")
            })?
        };

        let mut canvas = template.clone();
        imageops::overlay(
            &mut canvas,
            &scaled,
            i64::from(layout.placement.left),
            i64::from(layout.placement.top),
        );

        Ok((self.flatten(&canvas), layout.plan, layout.placement))
    }

    /// Blend every pixel over the opaque background colour.
    fn flatten(&self, canvas: &RgbaImage) -> RgbImage {
        let [br, bg, bb] = self.background.map(u32::from);
        RgbImage::from_fn(canvas.width(), canvas.height(), |x, y| {
            let [r, g, b, a] = canvas.get_pixel(x, y).0.map(u32::from);
            let blend = |c: u32, back: u32| ((c * a + back * (255 - a) + 127) / 255) as u8;
            image::Rgb([blend(r, br), blend(g, bg), blend(b, bb)])
        })
    }

    fn encode(&self, image: &RgbImage) -> BoothResult<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut out, self.jpeg_quality).encode_image(image)?;
        Ok(out.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, Rgba};

    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);
    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    fn compositor() -> Compositor {
        Compositor::new(PhotoWindow::default(), [255, 255, 255], 90)
    }

    #[test]
    fn small_cutout_keeps_its_size_and_is_centred() {
        let template = RgbaImage::from_pixel(1000, 1000, BLUE);
        let cutout = RgbaImage::from_pixel(100, 50, RED);

        let (flat, plan, placement) = compositor().compose_pixels(&template, &cutout).unwrap();
        assert_eq!(flat.dimensions(), (1000, 1000));
        assert_eq!(plan.out, Size::new(100, 50));
        assert_eq!((placement.left, placement.top), (450, 320));

        assert_eq!(*flat.get_pixel(450, 320), Rgb([255, 0, 0]));
        assert_eq!(*flat.get_pixel(549, 369), Rgb([255, 0, 0]));
        assert_eq!(*flat.get_pixel(449, 320), Rgb([0, 0, 255]));
        assert_eq!(*flat.get_pixel(550, 320), Rgb([0, 0, 255]));
        assert_eq!(*flat.get_pixel(450, 370), Rgb([0, 0, 255]));
    }

    #[test]
    fn transparent_cutout_regions_show_the_template() {
        let template = RgbaImage::from_pixel(200, 200, BLUE);
        let cutout = RgbaImage::from_pixel(20, 20, Rgba([255, 0, 0, 0]));

        let (flat, _, placement) = compositor().compose_pixels(&template, &cutout).unwrap();
        assert_eq!(*flat.get_pixel(placement.left, placement.top), Rgb([0, 0, 255]));
    }

    #[test]
    fn transparent_template_is_flattened_to_background() {
        let template = RgbaImage::from_pixel(50, 50, Rgba([0, 0, 0, 0]));
        let cutout = RgbaImage::from_pixel(1, 1, RED);
        let bg = Compositor::new(PhotoWindow::default(), [10, 20, 30], 90);

        let (flat, _, _) = bg.compose_pixels(&template, &cutout).unwrap();
        assert_eq!(*flat.get_pixel(0, 0), Rgb([10, 20, 30]));
    }

    #[test]
    fn overflow_is_clipped_to_template() {
        let template = RgbaImage::from_pixel(1000, 1000, BLUE);
        let cutout = RgbaImage::from_pixel(100, 5000, RED);

        let (flat, plan, placement) = compositor().compose_pixels(&template, &cutout).unwrap();
        assert_eq!(flat.dimensions(), (1000, 1000));
        assert!(placement.is_clipped(Size::new(1000, 1000)));
        assert!(plan.out.h <= 700);
    }

    #[test]
    fn encoded_output_matches_template_dimensions() {
        let template = LayoutTemplate::new("layout1", RgbaImage::from_pixel(120, 180, BLUE));
        let mut cutout_png = Cursor::new(Vec::new());
        RgbaImage::from_pixel(300, 200, RED)
            .write_to(&mut cutout_png, image::ImageFormat::Png)
            .unwrap();

        let composed = compositor().compose(&template, cutout_png.get_ref()).unwrap();
        let decoded = image::load_from_memory(&composed.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (120, 180));
        assert_eq!(image::guess_format(&composed.bytes).unwrap(), image::ImageFormat::Jpeg);
        assert!(composed.plan.out.w <= 84 && composed.plan.out.h <= 126);
    }

    #[test]
    fn undecodable_cutout_is_a_decode_error() {
        let template = LayoutTemplate::new("layout1", RgbaImage::from_pixel(10, 10, BLUE));
        let err = compositor().compose(&template, b"not an image").unwrap_err();
        assert_eq!(err.category(), "decode");
    }
}
