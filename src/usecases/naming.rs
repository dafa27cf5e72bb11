//! Media classification and deterministic, collision-free destination paths.
//!
//! Layout: `{chat_directory}/{kind}/{sanitized_name}`. An existing regular file
//! at the computed path, or a path another in-flight download has reserved,
//! pushes the name to `name (1).ext`, `name (2).ext`, ...

use crate::domain::{DownloadTarget, Media, MediaDescriptor, MediaKind, Message};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::warn;

/// Semantic kind of the message's attachment. `None` when there is nothing to download.
pub fn classify(message: &Message) -> Option<MediaKind> {
    match message.media.as_ref()? {
        Media::Photo { .. } => Some(MediaKind::Photo),
        Media::Document(doc) => Some(if doc.has_voice_flag() {
            MediaKind::Voice
        } else if doc.has_round_flag() {
            MediaKind::VideoNote
        } else if doc.has_audio_attribute() {
            MediaKind::Audio
        } else if doc.has_video_attribute() {
            MediaKind::Video
        } else {
            MediaKind::Document
        }),
        Media::Unsupported => None,
    }
}

/// Naming/filtering view of the message's attachment.
pub fn describe(message: &Message) -> Option<MediaDescriptor> {
    let kind = classify(message)?;
    match message.media.as_ref()? {
        Media::Photo { id, size } => Some(MediaDescriptor {
            kind,
            attachment_id: *id,
            mime_subtype: None,
            suggested_filename: None,
            size_bytes: *size,
        }),
        Media::Document(doc) => Some(MediaDescriptor {
            kind,
            attachment_id: doc.id,
            mime_subtype: doc.mime_subtype().map(str::to_string),
            suggested_filename: doc.file_name().map(str::to_string),
            size_bytes: doc.size,
        }),
        Media::Unsupported => None,
    }
}

/// Replace `< > : " / \ | ? *` with `_`, whatever the host OS.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            other => other,
        })
        .collect()
}

/// Unsanitized file name for the attachment.
///
/// Voice messages and video notes are named after their kind and capture time;
/// everything else keeps its declared name, or falls back to `{kind}_{attachment_id}`.
pub fn base_filename(descriptor: &MediaDescriptor, captured_at: DateTime<Utc>) -> String {
    let ext = descriptor
        .mime_subtype
        .as_deref()
        .map(|s| format!(".{}", s))
        .unwrap_or_default();
    match descriptor.kind {
        MediaKind::Voice | MediaKind::VideoNote => format!(
            "{}_{}{}",
            descriptor.kind,
            captured_at.format("%Y-%m-%dT%H:%M:%S"),
            ext
        ),
        _ => match &descriptor.suggested_filename {
            Some(name) => name.clone(),
            None => format!("{}_{}{}", descriptor.kind, descriptor.attachment_id, ext),
        },
    }
}

fn fallback_filename(descriptor: &MediaDescriptor) -> String {
    format!("{}_{}", descriptor.kind, descriptor.attachment_id)
}

/// Candidate path before any collision handling.
pub fn build_target(
    descriptor: &MediaDescriptor,
    captured_at: DateTime<Utc>,
    chat_directory: &Path,
) -> DownloadTarget {
    let mut name = sanitize_filename(&base_filename(descriptor, captured_at));
    if name.trim().is_empty() || name == "." || name == ".." {
        name = fallback_filename(descriptor);
    }
    DownloadTarget {
        absolute_path: chat_directory.join(descriptor.kind.as_str()).join(name),
        kind: descriptor.kind,
    }
}

/// `dir/name.ext` → `dir/name (n).ext`.
pub fn numbered_variant(path: &Path, n: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{} ({}).{}", stem, n, ext.to_string_lossy()),
        None => format!("{} ({})", stem, n),
    };
    path.with_file_name(name)
}

/// Upper bound on `name (n).ext` candidates tried for one download.
pub const MAX_NUMBERED_VARIANTS: u32 = 1000;

/// `dir/name.ext` → `dir/name (YYYYmmddTHHMMSS.nnnnnnnnn).ext`, using the current time.
fn stamped_variant(path: &Path, captured_at: DateTime<Utc>) -> PathBuf {
    let stamp = format!(
        "{}-{}",
        captured_at.format("%Y%m%dT%H%M%S"),
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    );
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{} ({}).{}", stem, stamp, ext.to_string_lossy()),
        None => format!("{} ({})", stem, stamp),
    };
    path.with_file_name(name)
}

/// Hands out destination paths so that no two in-flight downloads share one.
///
/// Existence check and reservation happen under the same lock.
#[derive(Debug, Default)]
pub struct TargetResolver {
    reserved: Mutex<HashSet<PathBuf>>,
}

impl TargetResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute and reserve a free destination for the attachment.
    ///
    /// Blocking: candidate paths are stat'ed with the std lock held. The guard never
    /// lives across an await, and the search stops after [`MAX_NUMBERED_VARIANTS`] names.
    pub fn reserve(
        &self,
        descriptor: &MediaDescriptor,
        captured_at: DateTime<Utc>,
        chat_directory: &Path,
    ) -> DownloadTarget {
        let mut target = build_target(descriptor, captured_at, chat_directory);
        let mut reserved = self.reserved.lock().unwrap_or_else(PoisonError::into_inner);
        let taken = |p: &Path| p.is_file() || reserved.contains(p);

        if taken(&target.absolute_path) {
            let base = target.absolute_path.clone();
            let mut n = 1;
            let mut candidate = numbered_variant(&base, n);
            while taken(&candidate) && n < MAX_NUMBERED_VARIANTS {
                n += 1;
                candidate = numbered_variant(&base, n);
            }
            if n == MAX_NUMBERED_VARIANTS && taken(&candidate) {
                warn!(path = %base.display(), "no free numbered name left; using a time-stamped one");
                candidate = stamped_variant(&base, captured_at);
            }
            target.absolute_path = candidate;
        }
        reserved.insert(target.absolute_path.clone());
        target
    }

    /// Drop a reservation once its transfer has ended (successfully or not).
    pub fn release(&self, path: &Path) {
        self.reserved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
    }
}
