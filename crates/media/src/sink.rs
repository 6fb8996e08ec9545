// SPDX-FileCopyrightText: © 2025 LingoKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Receiving side of a serialized media stream.

use std::sync::Arc;

use lingokit_core::Buffer;

/// Consumer of container bytes produced for one sender.
///
/// `start_media_writing` precedes the first payload of a session and
/// `end_media_writing` follows the last one; both are keyed by the
/// producing serializer's id so one sink can serve several senders.
pub trait MediaSink: Send + Sync {
    fn start_media_writing(&self, _sender_id: u64) {}

    fn write_media_payload(&self, sender_id: u64, payload: Arc<Buffer>);

    fn end_media_writing(&self, _sender_id: u64) {}
}
