use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::api::{CommentDraft, MediaKind, MediaUpload};
use crate::data::DirectoryService;

/// `@name` tokens count as mentions only at the start of the text or after
/// whitespace; an address in the middle of a word does not.
static MENTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\s)@(\w+)").expect("mention pattern"));

pub fn scan_mentions(text: &str) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for capture in MENTION_RE.captures_iter(text) {
        let name = capture[1].to_string();
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

/// Resolves mention tokens to profile ids, remembering every answer (hits
/// and misses) for the rest of the session so repeated tokens cost one
/// lookup.
pub struct MentionResolver {
    directory: Arc<dyn DirectoryService>,
    cache: Mutex<HashMap<String, Option<i64>>>,
}

impl MentionResolver {
    pub fn new(directory: Arc<dyn DirectoryService>) -> Self {
        Self {
            directory,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn resolve(&self, username: &str) -> Result<Option<i64>> {
        if let Some(cached) = self.cache.lock().get(username) {
            return Ok(*cached);
        }
        let id = self
            .directory
            .lookup_profile(username)
            .with_context(|| format!("resolve mention @{}", username))?
            .map(|profile| profile.id);
        self.cache.lock().insert(username.to_string(), id);
        Ok(id)
    }

    pub fn resolve_all(&self, text: &str) -> Result<Vec<i64>> {
        let mut ids = Vec::new();
        for username in scan_mentions(text) {
            if let Some(id) = self.resolve(&username)? {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}

/// Media already attached to the comment being edited; the user can keep
/// or mark each one for deletion.
#[derive(Debug, Clone)]
pub struct ExistingMedia {
    pub id: i64,
    pub marked_for_deletion: bool,
}

#[derive(Debug, Clone, Default)]
struct EditContext {
    comment_id: i64,
    existing: Vec<ExistingMedia>,
}

/// Draft state for a new comment, a reply, or an edit.
///
/// At most one pending attachment: picking an image, video or file clears
/// whatever was staged before.
#[derive(Debug, Clone, Default)]
pub struct Composer {
    text: String,
    attachment: Option<MediaUpload>,
    edit: Option<EditContext>,
}

impl Composer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_edit(comment_id: i64, existing_media_ids: &[i64]) -> Self {
        Self {
            text: String::new(),
            attachment: None,
            edit: Some(EditContext {
                comment_id,
                existing: existing_media_ids
                    .iter()
                    .map(|id| ExistingMedia {
                        id: *id,
                        marked_for_deletion: false,
                    })
                    .collect(),
            }),
        }
    }

    pub fn is_editing(&self) -> bool {
        self.edit.is_some()
    }

    pub fn edit_target(&self) -> Option<i64> {
        self.edit.as_ref().map(|edit| edit.comment_id)
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn attach(&mut self, kind: MediaKind, filename: impl Into<String>, bytes: Vec<u8>) {
        let filename = filename.into();
        let mime = crate::media::detect_mime(&filename, &bytes);
        self.attachment = Some(MediaUpload {
            kind,
            filename,
            mime,
            bytes,
        });
    }

    pub fn clear_attachment(&mut self) {
        self.attachment = None;
    }

    pub fn attachment(&self) -> Option<&MediaUpload> {
        self.attachment.as_ref()
    }

    pub fn mark_media_for_deletion(&mut self, media_id: i64) {
        if let Some(edit) = self.edit.as_mut() {
            for media in edit.existing.iter_mut() {
                if media.id == media_id {
                    media.marked_for_deletion = true;
                }
            }
        }
    }

    pub fn restore_media(&mut self, media_id: i64) {
        if let Some(edit) = self.edit.as_mut() {
            for media in edit.existing.iter_mut() {
                if media.id == media_id {
                    media.marked_for_deletion = false;
                }
            }
        }
    }

    fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }

    fn retains_existing_media(&self) -> bool {
        self.edit
            .as_ref()
            .map(|edit| edit.existing.iter().any(|media| !media.marked_for_deletion))
            .unwrap_or(false)
    }

    /// Submission gate. A draft needs a signed-in user, no submission in
    /// flight, and some surviving content: text, a new attachment, or (in
    /// edit mode) at least one retained existing media. An edit that
    /// deletes all media and provides nothing new would leave the comment
    /// empty and is blocked.
    pub fn can_submit(&self, authenticated: bool, submitting: bool) -> bool {
        if !authenticated || submitting {
            return false;
        }
        if self.has_text() || self.attachment.is_some() {
            return true;
        }
        self.retains_existing_media()
    }

    /// Draft text with the composition normalized to NFC so multi-codepoint
    /// emoji and accents survive the wire intact.
    pub fn normalized_content(&self) -> String {
        self.text.nfc().collect()
    }

    pub fn build_draft(&self, resolver: &MentionResolver) -> Result<CommentDraft> {
        let content = self.normalized_content();
        let mention_ids = resolver.resolve_all(&content)?;
        let remove_media_ids = self
            .edit
            .as_ref()
            .map(|edit| {
                edit.existing
                    .iter()
                    .filter(|media| media.marked_for_deletion)
                    .map(|media| media.id)
                    .collect()
            })
            .unwrap_or_default();
        Ok(CommentDraft {
            content,
            parent_id: None,
            media: self.attachment.clone(),
            mention_ids,
            remove_media_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Profile;
    use crate::data::MockDirectoryService;

    fn resolver_with(profiles: Vec<(&str, i64)>) -> (Arc<MockDirectoryService>, MentionResolver) {
        let directory = Arc::new(MockDirectoryService::new());
        directory.seed_profiles(
            profiles
                .into_iter()
                .map(|(username, id)| Profile {
                    id,
                    username: username.to_string(),
                    display_name: String::new(),
                    profile_picture: String::new(),
                    category: String::new(),
                })
                .collect(),
        );
        let resolver = MentionResolver::new(directory.clone());
        (directory, resolver)
    }

    #[test]
    fn mentions_respect_word_boundaries() {
        let text = "@ada hello\n@grace and mail me at not@amention";
        assert_eq!(scan_mentions(text), vec!["ada", "grace"]);
    }

    #[test]
    fn mentions_deduplicate() {
        assert_eq!(scan_mentions("@ada ping @ada again"), vec!["ada"]);
    }

    #[test]
    fn resolver_caches_hits_and_misses() {
        let (directory, resolver) = resolver_with(vec![("ada", 7)]);
        assert_eq!(resolver.resolve("ada").unwrap(), Some(7));
        assert_eq!(resolver.resolve("ada").unwrap(), Some(7));
        assert_eq!(resolver.resolve("ghost").unwrap(), None);
        assert_eq!(resolver.resolve("ghost").unwrap(), None);
        assert_eq!(directory.lookup_count(), 2);
    }

    #[test]
    fn blank_draft_cannot_submit() {
        let mut composer = Composer::new();
        composer.set_text("   ");
        assert!(!composer.can_submit(true, false));
    }

    #[test]
    fn text_or_media_allows_submit() {
        let mut composer = Composer::new();
        composer.set_text("hello");
        assert!(composer.can_submit(true, false));

        let mut composer = Composer::new();
        composer.attach(MediaKind::Image, "pic.png", vec![1, 2, 3]);
        assert!(composer.can_submit(true, false));
    }

    #[test]
    fn unauthenticated_or_submitting_blocks() {
        let mut composer = Composer::new();
        composer.set_text("hello");
        assert!(!composer.can_submit(false, false));
        assert!(!composer.can_submit(true, true));
    }

    #[test]
    fn edit_deleting_all_media_needs_replacement() {
        let mut composer = Composer::for_edit(3, &[10, 11]);
        composer.mark_media_for_deletion(10);
        composer.mark_media_for_deletion(11);
        assert!(!composer.can_submit(true, false));

        composer.set_text("still has words");
        assert!(composer.can_submit(true, false));
    }

    #[test]
    fn edit_retaining_media_submits_without_text() {
        let mut composer = Composer::for_edit(3, &[10, 11]);
        composer.mark_media_for_deletion(10);
        assert!(composer.can_submit(true, false));
    }

    #[test]
    fn attachment_slot_is_exclusive() {
        let mut composer = Composer::new();
        composer.attach(MediaKind::Image, "pic.png", vec![1]);
        composer.attach(MediaKind::Video, "clip.mp4", Vec::new());
        let attachment = composer.attachment().unwrap();
        assert_eq!(attachment.kind, MediaKind::Video);
        assert_eq!(attachment.mime, "video/mp4");
    }

    #[test]
    fn content_is_nfc_normalized() {
        let mut composer = Composer::new();
        composer.set_text("cafe\u{0301}");
        assert_eq!(composer.normalized_content(), "caf\u{e9}");
    }

    #[test]
    fn draft_carries_mentions_and_removals() {
        let (_, resolver) = resolver_with(vec![("ada", 7), ("grace", 9)]);
        let mut composer = Composer::for_edit(3, &[10]);
        composer.mark_media_for_deletion(10);
        composer.set_text("@ada meet @grace");
        let draft = composer.build_draft(&resolver).unwrap();
        assert_eq!(draft.mention_ids, vec![7, 9]);
        assert_eq!(draft.remove_media_ids, vec![10]);
    }
}
