//! voicelink: client SDK core for a cloud voice-assistant device protocol.
//!
//! The core is three concurrency primitives the rest of a device client is
//! built around:
//!
//! Microphone → [`SharedBuffer`] → wake word / end point / uploader readers
//!
//! # Architecture
//!
//! Each component owns its state on a single coordination sequence and is
//! driven by messages:
//! - **Shared audio buffer**: one writer fans frames out to independent
//!   readers without ever blocking the producer
//! - **Focus manager**: priority arbitration of the audio channel with
//!   debounced promotion and release
//! - **Directive sequencer**: two-phase prefetch/handle dispatch of server
//!   directives with per-resource-class blocking
//! - **Detectors**: wake word and end-point engines reading the buffer
//!
//! [`VoiceClient`] wires them together from one [`SdkConfig`].

pub mod audio;
pub mod client;
pub mod config;
pub mod detector;
pub mod directive;
pub mod error;
pub mod focus;
pub mod telemetry;

pub use audio::{AudioFrame, Reader, SharedBuffer, Writer};
pub use client::VoiceClient;
pub use config::SdkConfig;
pub use directive::{Directive, DirectiveHandler, DirectiveSequencer};
pub use error::{BufferError, DirectiveError, Result, SdkError};
pub use focus::{FocusManager, FocusState};
