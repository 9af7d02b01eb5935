//! Display channel: where frames come from.
//!
//! * `screendump`: libvirt graphics console sampled through `virsh screenshot`.
//! * `ppm`: decoder for the netpbm images the console hands back.

pub mod ppm;
pub mod screendump;

use std::fmt;
use std::time::Duration;

use crate::error::RecordError;
use crate::hypervisor::Domain;

/// Frame dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_even(&self) -> bool {
        self.width % 2 == 0 && self.height % 2 == 0
    }

    /// Round both sides up to the next even number.
    pub fn even_ceil(&self) -> Self {
        Self {
            width: (self.width + 1) & !1,
            height: (self.height + 1) & !1,
        }
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Packed pixel layouts the display can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Gray8 => 1,
        }
    }

    /// ffmpeg `-pix_fmt` name for rawvideo input.
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Gray8 => "gray",
        }
    }
}

/// One decoded image, stamped relative to the start of capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayFrame {
    pub geometry: Geometry,
    pub format: PixelFormat,
    pub data: Vec<u8>,
    pub pts: Duration,
}

impl DisplayFrame {
    /// Bytes in a tightly packed frame of this geometry and format.
    pub fn expected_len(geometry: Geometry, format: PixelFormat) -> usize {
        geometry.width as usize * geometry.height as usize * format.bytes_per_pixel()
    }
}

/// An attached display session. Not restartable: once `next_frame`
/// yields `None` the channel is spent.
#[allow(async_fn_in_trait)]
pub trait DisplayChannel {
    /// Wait for the next frame. `None` means the session ended cleanly
    /// (guest shut down, channel closed).
    async fn next_frame(&mut self) -> Result<Option<DisplayFrame>, RecordError>;
}

/// Opens display sessions for a domain.
#[allow(async_fn_in_trait)]
pub trait DisplayClient {
    type Channel: DisplayChannel;

    async fn attach(&self, domain: &Domain) -> Result<Self::Channel, RecordError>;
}
