//! Orientation correction for rotated video tracks
//!
//! Container formats store a display matrix describing how decoded frames must
//! be transformed to appear upright. Phones typically write a pure rotation with
//! no translation, which would move the frame out of the visible rectangle. The
//! helpers here synthesize the missing translation for quarter turns and expose
//! the resulting mapping to the presenter.

use super::FrameSize;

/// 2D affine transform mapping `(x, y)` to `(a*x + c*y + tx, b*x + d*y + ty)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl AffineTransform {
    pub const IDENTITY: AffineTransform = AffineTransform {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    /// Pure rotation, clockwise in screen space (y down)
    pub fn rotation(degrees: f64) -> Self {
        let (sin, cos) = match degrees.rem_euclid(360.0) {
            d if d == 0.0 => (0.0, 1.0),
            d if d == 90.0 => (1.0, 0.0),
            d if d == 180.0 => (0.0, -1.0),
            d if d == 270.0 => (-1.0, 0.0),
            d => d.to_radians().sin_cos(),
        };
        Self {
            a: cos,
            b: sin,
            c: -sin,
            d: cos,
            tx: 0.0,
            ty: 0.0,
        }
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.c * y + self.tx,
            self.b * x + self.d * y + self.ty,
        )
    }

    pub fn has_translation(&self) -> bool {
        self.tx != 0.0 || self.ty != 0.0
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    /// Inverse transform, or `None` for a degenerate matrix
    pub fn inverse(&self) -> Option<Self> {
        let det = self.determinant();
        if det.abs() < f64::EPSILON {
            return None;
        }
        let a = self.d / det;
        let b = -self.b / det;
        let c = -self.c / det;
        let d = self.a / det;
        Some(Self {
            a,
            b,
            c,
            d,
            tx: -(a * self.tx + c * self.ty),
            ty: -(b * self.tx + d * self.ty),
        })
    }
}

/// Rotation encoded in the transform, rounded to whole degrees in `[0, 360)`
pub fn rotation_degrees(transform: &AffineTransform) -> u32 {
    let degrees = transform.b.atan2(transform.a).to_degrees().round() as i64;
    degrees.rem_euclid(360) as u32
}

/// Fill in the translation of a translation-free quarter-turn transform
///
/// Transforms that already carry a translation, and rotations other than
/// 90° or 270°, are returned unchanged. This is a heuristic for the common
/// phone-camera case, not a general decomposition.
pub fn orientation_matrix(transform: AffineTransform, natural_size: FrameSize) -> AffineTransform {
    if transform.has_translation() {
        return transform;
    }

    let mut fixed = transform;
    match rotation_degrees(&transform) {
        90 => {
            fixed.tx = natural_size.height as f64;
            fixed.ty = 0.0;
        }
        270 => {
            fixed.tx = 0.0;
            fixed.ty = natural_size.width as f64;
        }
        _ => {}
    }
    fixed
}

/// Size of the upright render target (width and height swap on quarter turns)
pub fn render_size(transform: &AffineTransform, natural_size: FrameSize) -> FrameSize {
    match rotation_degrees(transform) {
        90 | 270 => FrameSize::new(natural_size.height, natural_size.width),
        _ => natural_size,
    }
}

/// Orientation metadata carried by every framebuffer of a session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameOrientation {
    /// Display transform after [`orientation_matrix`]
    pub transform: AffineTransform,
    /// Size of the decoded frame before rotation
    pub natural_size: FrameSize,
}

impl FrameOrientation {
    /// No rotation
    pub fn upright(natural_size: FrameSize) -> Self {
        Self {
            transform: AffineTransform::IDENTITY,
            natural_size,
        }
    }

    pub fn from_preferred(preferred: AffineTransform, natural_size: FrameSize) -> Self {
        Self {
            transform: orientation_matrix(preferred, natural_size),
            natural_size,
        }
    }

    pub fn rotation_degrees(&self) -> u32 {
        rotation_degrees(&self.transform)
    }

    pub fn render_size(&self) -> FrameSize {
        render_size(&self.transform, self.natural_size)
    }

    /// Rows of the 2x3 matrix mapping render-space UV to source UV
    ///
    /// The transform is shifted so the rotated frame sits at the origin, which
    /// also covers rotations the heuristic leaves untranslated.
    pub fn uv_transform(&self) -> [[f32; 3]; 2] {
        let identity = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let natural = self.natural_size;
        if natural.is_empty() {
            return identity;
        }

        let (w, h) = (natural.width as f64, natural.height as f64);
        let corners = [(0.0, 0.0), (w, 0.0), (0.0, h), (w, h)].map(|(x, y)| self.transform.apply(x, y));
        let min_x = corners.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
        let min_y = corners.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
        let max_x = corners.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
        let max_y = corners.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);

        let mut shifted = self.transform;
        shifted.tx -= min_x;
        shifted.ty -= min_y;
        let Some(inv) = shifted.inverse() else {
            return identity;
        };

        let (rw, rh) = (max_x - min_x, max_y - min_y);
        [
            [
                (inv.a * rw / w) as f32,
                (inv.c * rh / w) as f32,
                (inv.tx / w) as f32,
            ],
            [
                (inv.b * rw / h) as f32,
                (inv.d * rh / h) as f32,
                (inv.ty / h) as f32,
            ],
        ]
    }
}
