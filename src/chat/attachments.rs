// Attachment pipeline: validate the selected image, upload it into the
// owner's namespace, and hand back the stable reference the message row will
// carry. Upload always completes before the message is appended; a failed
// upload aborts the send.

use log::{debug, warn};
use std::path::Path;
use uuid::Uuid;

use crate::error::{StoreError, ValidationError};
use crate::models::AttachmentRef;
use crate::store::ObjectStore;

/// A file selected in the composer: original name, declared content type, and
/// the raw bytes.
#[derive(Debug, Clone)]
pub struct AttachmentSource {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// The transient preview resource backing a selected-but-unsent attachment.
/// It must be released explicitly when the selection is replaced, submitted,
/// or the composer closes; dropping it unreleased is a leak and is logged as
/// one.
#[derive(Debug)]
pub struct PreviewHandle {
    label: String,
    released: bool,
}

impl PreviewHandle {
    pub fn new(label: &str) -> Self {
        debug!("preview created for {}", label);
        PreviewHandle {
            label: label.to_string(),
            released: false,
        }
    }

    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            debug!("preview released for {}", self.label);
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for PreviewHandle {
    fn drop(&mut self) {
        if !self.released {
            warn!("preview for {} dropped without release", self.label);
        }
    }
}

/// A validated selection held by the composer until send or replacement.
#[derive(Debug)]
pub struct PendingAttachment {
    pub source: AttachmentSource,
    pub preview: PreviewHandle,
}

impl PendingAttachment {
    pub fn new(source: AttachmentSource) -> Self {
        let preview = PreviewHandle::new(&source.file_name);
        PendingAttachment { source, preview }
    }
}

/// Reject anything that is not an image within the size ceiling. Runs before
/// any network call.
pub fn validate(source: &AttachmentSource, max_bytes: usize) -> Result<(), ValidationError> {
    let mime: mime::Mime = source
        .content_type
        .parse()
        .map_err(|_| ValidationError::NotAnImage(source.content_type.clone()))?;
    if mime.type_() != mime::IMAGE {
        return Err(ValidationError::NotAnImage(source.content_type.clone()));
    }
    if source.bytes.len() > max_bytes {
        return Err(ValidationError::TooLarge {
            size: source.bytes.len(),
            limit: max_bytes,
        });
    }
    Ok(())
}

/// Upload into the owner's namespace under a generated, collision-free key
/// and return the public reference.
pub async fn upload(
    objects: &dyn ObjectStore,
    owner_id: &str,
    source: &AttachmentSource,
) -> Result<AttachmentRef, StoreError> {
    let extension = Path::new(&source.file_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin");
    let key = format!("{}.{}", Uuid::new_v4(), extension);

    let url = objects
        .put(owner_id, &key, source.bytes.clone(), &source.content_type)
        .await?;

    debug!("uploaded {} as {}", source.file_name, url);
    Ok(AttachmentRef { url })
}
