/// Axis-aligned bounding box in pixel space.
///
/// Stored in XYXY order: (x_min, y_min, x_max, y_max). Conversions from the
/// other two common layouts are provided:
/// - XYWH: Center X, Center Y, Width, Height
/// - TLWH: Top-Left X, Top-Left Y, Width, Height
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl BoundingBox {
    /// Create a box from XYXY corners.
    #[inline]
    pub fn from_xyxy(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// Create a box from XYWH format (center x, center y, width, height).
    #[inline]
    pub fn from_xywh(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self {
            x_min: cx - width / 2.0,
            y_min: cy - height / 2.0,
            x_max: cx + width / 2.0,
            y_max: cy + height / 2.0,
        }
    }

    /// Create a box from TLWH format (top-left x, top-left y, width, height).
    #[inline]
    pub fn from_tlwh(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x_min: x,
            y_min: y,
            x_max: x + width,
            y_max: y + height,
        }
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.x_max - self.x_min
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.y_max - self.y_min
    }

    /// Area of the box; zero for degenerate boxes.
    #[inline]
    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    #[inline]
    pub fn center(&self) -> (f32, f32) {
        (
            (self.x_min + self.x_max) / 2.0,
            (self.y_min + self.y_max) / 2.0,
        )
    }

    /// True when all corners are finite and the box has positive extent.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
            && self.x_min < self.x_max
            && self.y_min < self.y_max
    }

    /// Overlapping region of two boxes, `None` when they do not overlap.
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let inter = BoundingBox {
            x_min: self.x_min.max(other.x_min),
            y_min: self.y_min.max(other.y_min),
            x_max: self.x_max.min(other.x_max),
            y_max: self.y_max.min(other.y_max),
        };
        inter.is_valid().then_some(inter)
    }

    /// Clamp the box to an image of the given size.
    pub fn clip(&self, width: f32, height: f32) -> BoundingBox {
        BoundingBox {
            x_min: self.x_min.clamp(0.0, width),
            y_min: self.y_min.clamp(0.0, height),
            x_max: self.x_max.clamp(0.0, width),
            y_max: self.y_max.clamp(0.0, height),
        }
    }

    /// Mirror the box horizontally inside an image of the given width.
    #[inline]
    pub fn hflip(&self, image_width: f32) -> BoundingBox {
        BoundingBox {
            x_min: image_width - self.x_max,
            y_min: self.y_min,
            x_max: image_width - self.x_min,
            y_max: self.y_max,
        }
    }

    #[inline]
    pub fn scale(&self, sx: f32, sy: f32) -> BoundingBox {
        BoundingBox {
            x_min: self.x_min * sx,
            y_min: self.y_min * sy,
            x_max: self.x_max * sx,
            y_max: self.y_max * sy,
        }
    }

    #[inline]
    pub fn translate(&self, dx: f32, dy: f32) -> BoundingBox {
        BoundingBox {
            x_min: self.x_min + dx,
            y_min: self.y_min + dy,
            x_max: self.x_max + dx,
            y_max: self.y_max + dy,
        }
    }

    /// Convert to XYXY array: (x_min, y_min, x_max, y_max).
    #[inline]
    pub fn to_array(&self) -> [f32; 4] {
        [self.x_min, self.y_min, self.x_max, self.y_max]
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from(v: [f32; 4]) -> Self {
        Self::from_xyxy(v[0], v[1], v[2], v[3])
    }
}
