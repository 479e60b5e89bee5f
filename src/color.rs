//! Color handling: RGB triples, HSV conversion for the wheel-driven grid
//! color, and the random background picker.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Wheel delta reported for one notch
pub const WHEEL_DELTA: i32 = 120;
/// Hue advance per wheel notch, in degrees
pub const HUE_STEP: f32 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const RED: Rgb = Rgb::new(255, 0, 0);
    pub const BLUE: Rgb = Rgb::new(0, 0, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Pack as `0x00BBGGRR`, the layout stored in shared memory
    pub const fn to_colorref(self) -> u32 {
        (self.r as u32) | ((self.g as u32) << 8) | ((self.b as u32) << 16)
    }

    pub const fn from_colorref(value: u32) -> Self {
        Self {
            r: (value & 0xFF) as u8,
            g: ((value >> 8) & 0xFF) as u8,
            b: ((value >> 16) & 0xFF) as u8,
        }
    }

    /// Pack as `0x00RRGGBB` for softbuffer surfaces
    pub const fn to_pixel(self) -> u32 {
        ((self.r as u32) << 16) | ((self.g as u32) << 8) | (self.b as u32)
    }
}

impl std::fmt::Display for Rgb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{};{};{}", self.r, self.g, self.b)
    }
}

/// Sector-based HSV to RGB conversion.
///
/// `hue` is in degrees `[0, 360)`, `saturation` and `value` in `[0, 1]`.
/// Channels are truncated after scaling to 255.
pub fn hsv_to_rgb(hue: f32, saturation: f32, value: f32) -> Rgb {
    let h = hue / 60.0;
    let sector = (h as i32).rem_euclid(6);
    let f = h - h.floor();
    let p = value * (1.0 - saturation);
    let q = value * (1.0 - f * saturation);
    let t = value * (1.0 - (1.0 - f) * saturation);

    let (r, g, b) = match sector {
        0 => (value, t, p),
        1 => (q, value, p),
        2 => (p, value, t),
        3 => (p, q, value),
        4 => (t, p, value),
        _ => (value, p, q),
    };

    Rgb::new(channel(r), channel(g), channel(b))
}

fn channel(x: f32) -> u8 {
    (x * 255.0).clamp(0.0, 255.0) as u8
}

/// Hue angle driven by the mouse wheel.
///
/// Every full notch (120 delta units) moves the hue by 5 degrees. Partial
/// deltas from smooth-scrolling devices carry over until they add up to a notch.
#[derive(Debug, Clone, Default)]
pub struct HueAccumulator {
    hue: f32,
    pending_delta: i32,
}

impl HueAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hue(&self) -> f32 {
        self.hue
    }

    /// Apply a wheel delta and return the new grid color
    pub fn advance(&mut self, delta: i32) -> Rgb {
        self.pending_delta += delta;
        let notches = self.pending_delta / WHEEL_DELTA;
        self.pending_delta %= WHEEL_DELTA;

        self.hue = (self.hue + notches as f32 * HUE_STEP).rem_euclid(360.0);
        self.color()
    }

    pub fn color(&self) -> Rgb {
        hsv_to_rgb(self.hue, 1.0, 1.0)
    }
}

/// Xorshift generator for background colors
#[derive(Debug, Clone)]
pub struct ColorRng {
    state: u64,
}

impl ColorRng {
    pub fn new(seed: u64) -> Self {
        // Xorshift has a fixed point at zero
        Self {
            state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
        }
    }

    /// Seed from the clock and the process id
    pub fn from_entropy() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        Self::new(nanos ^ ((std::process::id() as u64) << 32))
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Random background color, never pure red (the default grid color)
    pub fn background(&mut self) -> Rgb {
        loop {
            let bits = self.next_u64();
            let color = Rgb::new(bits as u8, (bits >> 8) as u8, (bits >> 16) as u8);
            if color != Rgb::RED {
                return color;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_hues() {
        assert_eq!(hsv_to_rgb(0.0, 1.0, 1.0), Rgb::new(255, 0, 0));
        assert_eq!(hsv_to_rgb(120.0, 1.0, 1.0), Rgb::new(0, 255, 0));
        assert_eq!(hsv_to_rgb(240.0, 1.0, 1.0), Rgb::new(0, 0, 255));
        assert_eq!(hsv_to_rgb(60.0, 1.0, 1.0), Rgb::new(255, 255, 0));
        assert_eq!(hsv_to_rgb(300.0, 1.0, 1.0), Rgb::new(255, 0, 255));
    }

    #[test]
    fn test_full_saturation_has_min_and_max_channel() {
        for step in 0..720 {
            let hue = step as f32 * 0.5;
            let c = hsv_to_rgb(hue, 1.0, 1.0);
            let channels = [c.r, c.g, c.b];
            assert!(channels.contains(&0), "hue {} gave {:?}", hue, c);
            assert!(channels.contains(&255), "hue {} gave {:?}", hue, c);
        }
    }

    #[test]
    fn test_zero_saturation_is_gray() {
        assert_eq!(hsv_to_rgb(200.0, 0.0, 1.0), Rgb::new(255, 255, 255));
        assert_eq!(hsv_to_rgb(200.0, 0.0, 0.0), Rgb::new(0, 0, 0));
    }

    #[test]
    fn test_hue_wraps_after_full_turn() {
        let mut acc = HueAccumulator::new();
        let start = acc.advance(3 * WHEEL_DELTA);
        let start_hue = acc.hue();

        // 72 notches * 5 degrees = 360
        for _ in 0..72 {
            acc.advance(WHEEL_DELTA);
        }
        assert_eq!(acc.hue(), start_hue);
        assert_eq!(acc.color(), start);
    }

    #[test]
    fn test_hue_wraps_backwards() {
        let mut acc = HueAccumulator::new();
        acc.advance(-WHEEL_DELTA);
        assert_eq!(acc.hue(), 355.0);
    }

    #[test]
    fn test_partial_deltas_accumulate() {
        let mut acc = HueAccumulator::new();
        acc.advance(60);
        assert_eq!(acc.hue(), 0.0);
        acc.advance(60);
        assert_eq!(acc.hue(), 5.0);
    }

    #[test]
    fn test_colorref_and_pixel_packing() {
        let c = Rgb::new(0x12, 0x34, 0x56);
        assert_eq!(c.to_colorref(), 0x0056_3412);
        assert_eq!(Rgb::from_colorref(c.to_colorref()), c);
        assert_eq!(c.to_pixel(), 0x0012_3456);
    }

    #[test]
    fn test_background_never_red() {
        let mut rng = ColorRng::new(42);
        for _ in 0..1000 {
            assert_ne!(rng.background(), Rgb::RED);
        }
    }
}
