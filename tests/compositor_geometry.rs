//! Placement properties of the compositor across a spread of template and cutout
//! sizes.

use booth_scale::presets::PhotoWindow;
use image::{Rgba, RgbaImage};
use photobooth::compose::Compositor;

const TEMPLATES: [(u32, u32); 5] = [(400, 600), (600, 400), (1200, 1800), (333, 777), (50, 50)];
const CUTOUTS: [(u32, u32); 7] = [(10, 10), (100, 200), (280, 420), (2000, 3000), (3000, 500), (1, 900), (641, 641)];

fn compositor() -> Compositor {
    Compositor::new(PhotoWindow::default(), [255, 255, 255], 90)
}

#[test]
fn output_always_matches_the_template() {
    for (tw, th) in TEMPLATES {
        let template = RgbaImage::from_pixel(tw, th, Rgba([10, 20, 30, 255]));
        for (cw, ch) in CUTOUTS {
            let cutout = RgbaImage::from_pixel(cw, ch, Rgba([200, 0, 0, 255]));
            let (flat, _, _) = compositor().compose_pixels(&template, &cutout).unwrap();
            assert_eq!(flat.dimensions(), (tw, th), "template {tw}x{th}, cutout {cw}x{ch}");
        }
    }
}

#[test]
fn scaled_cutout_fits_the_box_and_is_never_upscaled() {
    for (tw, th) in TEMPLATES {
        let template = RgbaImage::new(tw, th);
        for (cw, ch) in CUTOUTS {
            let cutout = RgbaImage::new(cw, ch);
            let (_, plan, _) = compositor().compose_pixels(&template, &cutout).unwrap();

            let box_w = (tw as f64 * 0.7 + 1e-9).floor() as u32;
            let box_h = (th as f64 * 0.7 + 1e-9).floor() as u32;
            assert!(plan.out.w <= box_w.max(1) && plan.out.h <= box_h.max(1), "{plan:?} exceeds {box_w}x{box_h}");
            assert!(plan.out.w <= cw && plan.out.h <= ch, "{plan:?} upscaled {cw}x{ch}");
        }
    }
}

#[test]
fn small_cutouts_keep_their_size() {
    let template = RgbaImage::new(1200, 1800);
    let cutout = RgbaImage::new(100, 200);
    let (_, plan, placement) = compositor().compose_pixels(&template, &cutout).unwrap();

    assert_eq!((plan.out.w, plan.out.h), (100, 200));
    assert_eq!((placement.left, placement.top), (550, 576));
}

#[test]
fn cutout_is_horizontally_centred() {
    for (tw, th) in TEMPLATES {
        let template = RgbaImage::new(tw, th);
        for (cw, ch) in CUTOUTS {
            let cutout = RgbaImage::new(cw, ch);
            let (_, plan, placement) = compositor().compose_pixels(&template, &cutout).unwrap();

            let centre_twice = 2 * placement.left as i64 + plan.out.w as i64;
            assert!(
                (centre_twice - tw as i64).abs() <= 2,
                "left {} width {} on {tw}",
                placement.left,
                plan.out.w
            );
        }
    }
}

#[test]
fn top_edge_hangs_at_32_percent_of_the_height() {
    let template = RgbaImage::new(400, 600);
    let cutout = RgbaImage::new(50, 50);
    let (_, _, placement) = compositor().compose_pixels(&template, &cutout).unwrap();
    assert_eq!(placement.top, 192);
}
