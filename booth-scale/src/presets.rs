// SPDX-License-Identifier: MIT
//! # Scaling Plans and Photo-Window Placement
//!
//! This module computes where a subject cutout lands on a print layout. It is the
//! only place in the workspace that makes geometric decisions; the compositor in
//! the main crate just executes the plan it receives from here.
//!
//! ## Design Philosophy
//!
//! The geometry is split the same way the resize path is split:
//! 1. **ScaleTarget**: What box the subject must fit inside (absolute, or a fraction of a canvas)
//! 2. **ScalePlan**: The computed output size and scale factor for the resize step
//! 3. **PhotoWindow**: The layout preset (box fractions plus the vertical anchor) and
//!    the resulting [`Placement`] on the canvas
//!
//! ## Rules
//!
//! - Aspect ratio is always preserved: fit-inside, never crop, never distort
//! - No upscaling: subjects already inside the box keep their pixel size
//! - Box sides are `floor(frac * canvas side)`, clamped to at least 1px
//! - Horizontal placement is centred with floor rounding; vertical placement is a
//!   fixed fraction of the canvas height from the top

/// Represents a 2D size with width and height in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Size {
    pub w: u32,
    pub h: u32,
}

impl Size {
    pub fn new(w: u32, h: u32) -> Self {
        Self { w, h }
    }

    /// True when either side is zero.
    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }
}

/// Defines the box constraint for a fit-inside scale.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ScaleTarget {
    /// Fit inside an absolute bounding box.
    Box(Size),
    /// Fit inside a box derived from a canvas: `floor(w_frac * canvas.w)` by
    /// `floor(h_frac * canvas.h)`.
    CanvasFraction {
        canvas: Size,
        w_frac: f64,
        h_frac: f64,
    },
}

impl ScaleTarget {
    /// Resolve the target into the concrete bounding box it describes.
    pub fn bounds(self) -> Size {
        match self {
            ScaleTarget::Box(size) => Size {
                w: size.w.max(1),
                h: size.h.max(1),
            },
            ScaleTarget::CanvasFraction {
                canvas,
                w_frac,
                h_frac,
            } => Size {
                w: floor_frac(canvas.w, w_frac).max(1),
                h: floor_frac(canvas.h, h_frac).max(1),
            },
        }
    }
}

/// `floor(side * frac)`, absorbing float error on products that are exact in decimal.
fn floor_frac(side: u32, frac: f64) -> u32 {
    (side as f64 * frac + 1e-9).floor() as u32
}

/// Complete scaling plan computed from input parameters.
/// Contains all information needed to perform the actual resize.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScalePlan {
    /// Original input dimensions
    pub input: Size,
    /// Target constraint used for planning
    pub target: ScaleTarget,
    /// Resolved bounding box
    pub bounds: Size,
    /// Final computed output dimensions
    pub out: Size,
    /// Uniform scale factor applied to both axes (never above 1.0)
    pub factor: f64,
}

impl ScalePlan {
    /// True when the resize step can be skipped entirely.
    pub fn is_identity(&self) -> bool {
        self.out == self.input
    }
}

/// Compute a fit-inside scaling plan.
///
/// Empty inputs produce an empty plan with a zero factor; callers are expected to
/// reject them before resizing.
pub fn build_plan(input: Size, target: ScaleTarget) -> ScalePlan {
    let bounds = target.bounds();
    if input.is_empty() {
        return ScalePlan {
            input,
            target,
            bounds,
            out: Size { w: 0, h: 0 },
            factor: 0.0,
        };
    }

    let (w, h, factor) = fit_within(input, bounds);
    ScalePlan {
        input,
        target,
        bounds,
        out: Size { w, h },
        factor,
    }
}

/// Fit image within a bounding box while preserving aspect ratio.
/// Returns (width, height, factor) that fit entirely within the box.
///
/// Never upscales. Rounded sides are clamped back into the box so float error can
/// never push the result one pixel past it.
fn fit_within(input: Size, box_: Size) -> (u32, u32, f64) {
    let (w, h) = (input.w as f64, input.h as f64);
    let (bw, bh) = (box_.w as f64, box_.h as f64);
    let s = (bw / w).min(bh / h).min(1.0);
    (
        ((w * s).round() as u32).clamp(1, box_.w.max(1)),
        ((h * s).round() as u32).clamp(1, box_.h.max(1)),
        s,
    )
}

/// Where a scaled subject sits on the canvas.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Placement {
    /// Offset of the subject's left edge from the canvas' left edge
    pub left: u32,
    /// Offset of the subject's top edge from the canvas' top edge
    pub top: u32,
    /// Size of the scaled subject (before clipping)
    pub size: Size,
}

impl Placement {
    /// The part of the subject that survives clipping to the canvas.
    pub fn visible(&self, canvas: Size) -> Size {
        Size {
            w: self
                .size
                .w
                .min(canvas.w.saturating_sub(self.left)),
            h: self
                .size
                .h
                .min(canvas.h.saturating_sub(self.top)),
        }
    }

    /// True when some of the subject falls outside the canvas.
    pub fn is_clipped(&self, canvas: Size) -> bool {
        self.visible(canvas) != self.size
    }
}

/// Print-layout photo window: the box a subject is fitted into and the vertical
/// anchor it is hung from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhotoWindow {
    /// Box width as a fraction of the canvas width
    pub box_w_frac: f64,
    /// Box height as a fraction of the canvas height
    pub box_h_frac: f64,
    /// Top offset as a fraction of the canvas height
    pub top_frac: f64,
}

impl Default for PhotoWindow {
    /// The standard booth layout: a 70% by 70% box hung at 32% of the height.
    fn default() -> Self {
        Self {
            box_w_frac: 0.7,
            box_h_frac: 0.7,
            top_frac: 0.32,
        }
    }
}

/// Combined output of [`PhotoWindow::layout`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindowLayout {
    pub plan: ScalePlan,
    pub placement: Placement,
}

impl PhotoWindow {
    /// Check the fractions describe a usable window.
    pub fn validate(&self) -> Result<(), &'static str> {
        let in_unit = |f: f64| f.is_finite() && f > 0.0 && f <= 1.0;
        if !in_unit(self.box_w_frac) {
            return Err("box width fraction must be in (0, 1]");
        }
        if !in_unit(self.box_h_frac) {
            return Err("box height fraction must be in (0, 1]");
        }
        if !(self.top_frac.is_finite() && (0.0..1.0).contains(&self.top_frac)) {
            return Err("top fraction must be in [0, 1)");
        }
        Ok(())
    }

    /// The fit-inside target for a canvas of the given size.
    pub fn target(&self, canvas: Size) -> ScaleTarget {
        ScaleTarget::CanvasFraction {
            canvas,
            w_frac: self.box_w_frac,
            h_frac: self.box_h_frac,
        }
    }

    /// Place an already-scaled subject: centred horizontally, hung from `top_frac`.
    pub fn place(&self, canvas: Size, scaled: Size) -> Placement {
        Placement {
            left: canvas.w.saturating_sub(scaled.w) / 2,
            top: floor_frac(canvas.h, self.top_frac),
            size: scaled,
        }
    }

    /// Plan and place a subject on a canvas in one step.
    pub fn layout(&self, canvas: Size, subject: Size) -> WindowLayout {
        let plan = build_plan(subject, self.target(canvas));
        let placement = self.place(canvas, plan.out);
        WindowLayout { plan, placement }
    }
}
