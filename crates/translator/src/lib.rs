// SPDX-FileCopyrightText: © 2025 LingoKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! LingoKit Translator - the per-producer control plane of the media
//! translation subsystem.
//!
//! For each audio producer the [`Translator`] assembles RTP into live
//! WebM fragments, streams them to a speech translation service over a
//! persistent connection, and plays translated fragments back to matched
//! consumers on a mapped SSRC while rejecting the original for them.
//!
//! ## Core Modules
//!
//! - [`language`]: language codes and voice tokens of the service control plane
//! - [`websocket`]: the asynchronous WebSocket client wrapper
//! - [`endpoint`]: connection state machines (WebSocket, file replay, stub)
//! - [`consumers`]: consumer-to-endpoint matching and timeline mapping
//! - [`source`]: the per-SSRC pipeline glue
//! - [`translator`]: producer-level lifecycle and the endpoint factory

pub mod consumers;
pub mod endpoint;
pub mod language;
pub mod source;
pub mod translator;
pub mod websocket;

pub use consumers::{ConsumersManager, ConsumerTranslator};
pub use endpoint::{
    EndpointSink, FileEndPoint, FileEndPointConfig, StubEndPoint, TranslatorEndPoint,
    TranslatorEndPointFactory, WebsocketEndPoint,
};
pub use language::{target_language_cmd, Language, Voice};
pub use source::TranslatorSource;
pub use translator::{EndpointProvider, Translator, TranslatorConfig};
pub use websocket::{
    WebsocketClient, WebsocketConfig, WebsocketFailure, WebsocketListener, WebsocketState,
};
