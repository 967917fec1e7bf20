use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::core::participant::Participant;
use crate::core::store::{BlobBackend, TripStore};
use crate::error::Error;

/// Largest accepted photo upload.
pub const MAX_AVATAR_BYTES: usize = 5 * 1024 * 1024;

/// Placeholder size used when registering without a photo.
pub const REGISTRATION_AVATAR_SIZE: u32 = 128;

/// Placeholder size used when a list view backfills a missing photo.
pub const LIST_AVATAR_SIZE: u32 = 40;

/// Builds the generated-avatar URL for a participant name.
///
/// The same name always yields the same URL: the background color is derived
/// from the name instead of letting the avatar service pick one per request,
/// so concurrent backfills for one participant converge on identical writes.
pub fn placeholder_url(name: &str, size: u32) -> String {
    format!(
        "https://ui-avatars.com/api/?name={}&background={}&color=fff&size={}",
        urlencoding::encode(name),
        background_color(name),
        size
    )
}

/// Stable 24-bit hex color keyed by the name (FNV-1a).
fn background_color(name: &str) -> String {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in name.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    format!("{:06x}", hash & 0xff_ffff)
}

/// Object-storage path for an upload: millisecond timestamp plus a random
/// suffix, so simultaneous uploads cannot collide.
fn object_path(content_type: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(13)
        .map(char::from)
        .collect();

    let extension = match content_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        other => other.split('/').nth(1).unwrap_or("img"),
    };

    format!(
        "avatars/{}-{}.{}",
        Utc::now().timestamp_millis(),
        suffix.to_lowercase(),
        extension
    )
}

/// States of the photo upload sub-flow, shared by the registration form and
/// the avatar editor.
#[derive(PartialEq, Debug, Clone)]
pub enum UploadState {
    Idle,
    FileSelected { content_type: String, bytes: Vec<u8> },
    Uploading,
    Succeeded(String),
    Failed(String),
}

/// The upload sub-flow. An invalid selection never leaves `Idle` and never
/// touches the network.
pub struct AvatarUpload {
    state: UploadState,
}

impl AvatarUpload {
    pub fn new() -> Self {
        AvatarUpload {
            state: UploadState::Idle,
        }
    }

    pub fn state(&self) -> &UploadState {
        &self.state
    }

    /// Validate a selected file. On rejection the state stays `Idle` and the
    /// message is surfaced to the upload control.
    pub fn select_file(&mut self, content_type: &str, bytes: Vec<u8>) -> Result<(), String> {
        if !content_type.starts_with("image/") {
            self.state = UploadState::Idle;
            return Err("Please upload an image file".to_string());
        }

        if bytes.len() > MAX_AVATAR_BYTES {
            self.state = UploadState::Idle;
            return Err("Image size should be less than 5MB".to_string());
        }

        self.state = UploadState::FileSelected {
            content_type: content_type.to_string(),
            bytes,
        };
        Ok(())
    }

    /// Push the selected file to object storage and resolve its public URL.
    pub async fn upload(&mut self, blobs: &dyn BlobBackend) -> Result<String, Error> {
        let (content_type, bytes) = match std::mem::replace(&mut self.state, UploadState::Uploading)
        {
            UploadState::FileSelected { content_type, bytes } => (content_type, bytes),
            other => {
                self.state = other;
                return Err(Error::UploadRejected("No file selected".to_string()));
            }
        };

        let path = object_path(&content_type);
        match blobs.upload(&path, bytes, &content_type).await {
            Ok(()) => {
                let url = blobs.public_url(&path);
                self.state = UploadState::Succeeded(url.clone());
                Ok(url)
            }
            Err(e) => {
                log::error!("Error uploading avatar: {}", e);
                self.state = UploadState::Failed("Failed to upload avatar. Please try again.".to_string());
                Err(e)
            }
        }
    }
}

impl Default for AvatarUpload {
    fn default() -> Self {
        AvatarUpload::new()
    }
}

/// Fill display URLs for participants without a stored photo.
///
/// Returns the list ready to render plus the (id, url) pairs that still need
/// to be persisted. The computed URL is a pure function of the name, so the
/// backfill can be repeated or raced without diverging.
pub fn resolve_display_avatars(
    mut participants: Vec<Participant>,
) -> (Vec<Participant>, Vec<(String, String)>) {
    let mut pending = Vec::new();
    for participant in &mut participants {
        if participant.avatar_url.is_none() {
            let url = placeholder_url(&participant.full_name, LIST_AVATAR_SIZE);
            pending.push((participant.id.clone(), url.clone()));
            participant.avatar_url = Some(url);
        }
    }
    (participants, pending)
}

/// Persist backfilled URLs without holding up the render that noticed them.
pub fn spawn_backfill(store: TripStore, pending: Vec<(String, String)>) {
    if pending.is_empty() {
        return;
    }

    tokio::spawn(async move {
        for (id, url) in pending {
            if let Err(e) = store.update_participant_avatar(&id, &url).await {
                log::warn!("Failed to backfill avatar for participant {}: {}", id, e);
            }
        }
    });
}
