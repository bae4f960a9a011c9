//! Frame data structures for the live camera preview

use std::time::Instant;

/// A preview frame produced by the bound camera
#[derive(Debug)]
pub struct CapturedFrame {
    /// Raw RGBA pixel data
    pub data: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Timestamp when frame was produced
    pub timestamp: Instant,
}

impl CapturedFrame {
    /// Create a new preview frame
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    /// Build a preview frame from a decoded image
    pub fn from_image(image: &image::DynamicImage) -> Self {
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        Self::new(rgba.into_raw(), width, height)
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Mean RGB intensity in 0..=255, ignoring alpha
    pub fn mean_brightness(&self) -> f32 {
        let pixels = self.data.len() / 4;
        if pixels == 0 {
            return 0.0;
        }
        let sum: u64 = self
            .data
            .chunks_exact(4)
            .map(|px| px[0] as u64 + px[1] as u64 + px[2] as u64)
            .sum();
        sum as f32 / (pixels * 3) as f32
    }
}
