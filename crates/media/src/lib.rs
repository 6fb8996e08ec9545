// SPDX-FileCopyrightText: © 2025 LingoKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! LingoKit Media - codec depacketizing, WebM container handling and frame
//! serialization for the translation pipeline.
//!
//! ## Core Modules
//!
//! - [`depacketizer`]: RTP payload to [`lingokit_core::MediaFrame`] assembly (Opus, VPx)
//! - [`webm`]: live WebM muxer and the pull parser for translated fragments
//! - [`serializer`]: per-producer frame fan-out to container sinks
//! - [`writer_queue`]: background thread that decouples RTP ingress from muxing
//! - [`player`]: schedules translated fragments back out as timed RTP packets

pub mod depacketizer;
pub mod file_sink;
pub mod player;
pub mod serializer;
pub mod sink;
pub mod webm;
pub mod writer_queue;

pub use depacketizer::Depacketizer;
pub use file_sink::FileSink;
pub use player::{PlayerCallback, RtpPacketsPlayer};
pub use serializer::{MediaFrameSerializer, MediaSink};
pub use webm::deserializer::{DeserializedFrame, WebmDeserializer};
pub use webm::writer::WebmWriter;
pub use writer_queue::{FrameWriterQueue, QueuedMediaWriter};
