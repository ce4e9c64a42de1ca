//! Display geometry: fitting a remote framebuffer into a local container.
//!
//! The same [`Transform`] drives both directions. Forward, it positions the
//! scaled remote surface inside the container; inverse, it maps local pointer
//! coordinates back into remote pixels. It must be recomputed whenever either
//! side changes size.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True if either dimension is zero (nothing laid out yet).
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Uniform scale plus centering offset, in local pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub scale: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        scale: 1.0,
        offset_x: 0.0,
        offset_y: 0.0,
    };

    /// Largest uniform scale that keeps the whole remote surface visible,
    /// centered in the container. `None` when either size is empty.
    pub fn fit(container: Size, remote: Size) -> Option<Self> {
        if container.is_empty() || remote.is_empty() {
            return None;
        }

        let (cw, ch) = (container.width as f64, container.height as f64);
        let (rw, rh) = (remote.width as f64, remote.height as f64);

        let scale = (cw / rw).min(ch / rh);
        Some(Self {
            scale,
            offset_x: (cw - rw * scale) / 2.0,
            offset_y: (ch - rh * scale) / 2.0,
        })
    }

    /// Remote-space point to local container coordinates.
    pub fn to_local(&self, x: f64, y: f64) -> (f64, f64) {
        (x * self.scale + self.offset_x, y * self.scale + self.offset_y)
    }

    /// Local container coordinates to the nearest remote pixel.
    pub fn to_remote(&self, x: f64, y: f64) -> (i32, i32) {
        let rx = (x - self.offset_x) / self.scale;
        let ry = (y - self.offset_y) / self.scale;
        (rx.round() as i32, ry.round() as i32)
    }

    /// Size of the remote surface once scaled.
    pub fn scaled(&self, remote: Size) -> (f64, f64) {
        (
            remote.width as f64 * self.scale,
            remote.height as f64 * self.scale,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letterbox_wide_container() {
        let t = Transform::fit(Size::new(2000, 1000), Size::new(1000, 1000)).unwrap();
        assert_eq!(t.scale, 1.0);
        assert_eq!(t.offset_x, 500.0);
        assert_eq!(t.offset_y, 0.0);
    }

    #[test]
    fn downscale_tall_remote() {
        let t = Transform::fit(Size::new(800, 600), Size::new(1600, 2400)).unwrap();
        assert_eq!(t.scale, 0.25);
        assert_eq!(t.offset_x, 200.0);
        assert_eq!(t.offset_y, 0.0);
        assert_eq!(t.scaled(Size::new(1600, 2400)), (400.0, 600.0));
    }

    #[test]
    fn upscale_small_remote() {
        let t = Transform::fit(Size::new(1920, 1080), Size::new(640, 480)).unwrap();
        assert_eq!(t.scale, 2.25);
        assert_eq!(t.offset_y, 0.0);
        assert!((t.offset_x - 240.0).abs() < 1e-9);
    }

    #[test]
    fn empty_sizes_have_no_transform() {
        assert!(Transform::fit(Size::new(0, 100), Size::new(10, 10)).is_none());
        assert!(Transform::fit(Size::new(100, 100), Size::new(10, 0)).is_none());
    }

    #[test]
    fn pointer_maps_to_remote_pixels() {
        let t = Transform::fit(Size::new(2000, 1000), Size::new(1000, 1000)).unwrap();
        assert_eq!(t.to_remote(500.0, 0.0), (0, 0));
        assert_eq!(t.to_remote(1499.6, 999.4), (1000, 999));
        assert_eq!(t.to_remote(750.0, 250.0), (250, 250));
    }

    #[test]
    fn identity_passes_through() {
        assert_eq!(Transform::IDENTITY.to_remote(12.4, 7.6), (12, 8));
        assert_eq!(Transform::IDENTITY.to_local(3.0, 4.0), (3.0, 4.0));
    }
}
