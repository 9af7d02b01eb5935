//! Record a libvirt domain's SPICE display to an MP4 video.

pub mod child;
pub mod cli;
pub mod config;
pub mod constants;
pub mod display;
pub mod encoder;
pub mod error;
pub mod hypervisor;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod tty;
pub mod virsh;

pub use config::RecordConfig;
pub use error::{RecordError, Stage};
pub use pipeline::{Phase, Recorder, RecordingReport, StopReason};
