// SPDX-FileCopyrightText: © 2025 LingoKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! LingoKit Core - Runtime primitives and the media data model shared by the
//! translation pipeline crates.
//!
//! ## Core Modules
//!
//! - [`types`]: Frame-level data types (`MediaFrame`, codec configs, MIME registry)
//! - [`rtp`]: The RTP surface the surrounding worker talks to (packets, timelines, collector)
//! - [`pool`]: Two-tier buffer pool with aged heap chunks
//! - [`listeners`]: Reentrancy-safe multi-listener dispatch
//! - [`timer`]: Single-threaded media timer with weak callbacks
//! - [`error`]: Error types and handling

// Module declarations
pub mod error;
pub mod listeners;
pub mod pool;
pub mod rtp;
pub mod timer;
pub mod types;

// Convenience re-exports for commonly used types

// Error handling
pub use error::LingoKitError;

// Buffers
pub use pool::{Buffer, BufferPool};

// Dispatch + timing
pub use listeners::Listeners;
pub use timer::{MediaTimer, TimerCallback};

// RTP surface
pub use rtp::{
    ConsumerId, RtpPacket, RtpPacketsCollector, RtpPacketsTimeline, RtpTranslatedPacket,
};

// Frame model
pub use types::{AudioCodec, AudioFrameConfig, MediaFrame, MimeType, RtpTimestamp, VideoCodec, VideoFrameConfig};
