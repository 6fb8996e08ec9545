// SPDX-FileCopyrightText: © 2025 LingoKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! WebM container support: the live muxer feeding translation endpoints
//! and the pull parser for fragments coming back from the service.

pub mod deserializer;
pub mod writer;
