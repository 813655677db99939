//! `multipart/form-data` extraction for upload requests, on top of `multer`.
//!
//! The server buffers the whole body before routing, so the multipart stream
//! is a single chunk driven to completion on the calling thread.

use std::convert::Infallible;

use anyhow::{anyhow, Result};
use bytes::Bytes;
use futures::executor::block_on;
use futures::stream;

/// Extract the boundary from a `Content-Type` header value.
///
/// Returns `None` when the header is not `multipart/form-data` or carries no
/// boundary.
pub fn boundary(content_type: &str) -> Option<String> {
    multer::parse_boundary(content_type).ok()
}

/// Bytes of the first field named `name`. `Ok(None)` when the form has no
/// such field.
pub fn read_field(body: Bytes, boundary: &str, name: &str) -> Result<Option<Bytes>> {
    let chunks = stream::once(async move { Ok::<Bytes, Infallible>(body) });
    let mut multipart = multer::Multipart::new(chunks, boundary);

    block_on(async {
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| anyhow!("multipart error: {}", e))?
        {
            if field.name() == Some(name) {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| anyhow!("failed to read field '{}': {}", name, e))?;
                return Ok(Some(data));
            }
        }
        Ok(None)
    })
}
