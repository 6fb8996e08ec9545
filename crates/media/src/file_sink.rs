// SPDX-FileCopyrightText: © 2025 LingoKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Debug sink writing a serialized stream to disk.
//!
//! Used by the translator when `LINGOKIT_MEDIA_DUMP_PATH` is set, so the
//! exact bytes sent to (or received from) the service can be replayed in
//! a media player.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use lingokit_core::error::Result;
use lingokit_core::Buffer;

use crate::sink::MediaSink;

pub struct FileSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileSink {
    pub fn create(path: &Path) -> Result<Arc<Self>> {
        let file = File::create(path)?;
        tracing::info!(path = %path.display(), "media dump sink opened");
        Ok(Arc::new(Self { path: path.to_path_buf(), file: Mutex::new(file) }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MediaSink for FileSink {
    fn write_media_payload(&self, _sender_id: u64, payload: Arc<Buffer>) {
        if let Ok(mut file) = self.file.lock() {
            if let Err(e) = file.write_all(payload.as_slice()) {
                tracing::warn!(path = %self.path.display(), error = %e, "media dump write failed");
            }
        }
    }

    fn end_media_writing(&self, _sender_id: u64) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}
