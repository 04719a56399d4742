use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;

use crate::api::{Comment, CommentDraft};
use crate::data::CommentService;
use crate::rank::{self, Badges, RankPolicy, SortMode};
use crate::replies::ReplyLoader;
use crate::store::{CommentStore, ReplyTargetBus, SharedCommentStore};

/// Policy knobs the section carries around; mirrors `config::PolicyConfig`
/// without dragging the whole config in.
#[derive(Debug, Clone, Copy)]
pub struct SectionPolicy {
    pub rank: RankPolicy,
    pub comment_page_size: u32,
    pub reply_page_size: u32,
    pub reply_reload_delay: std::time::Duration,
    pub like_flash_ttl: std::time::Duration,
}

impl Default for SectionPolicy {
    fn default() -> Self {
        Self {
            rank: RankPolicy::default(),
            comment_page_size: 20,
            reply_page_size: 10,
            reply_reload_delay: std::time::Duration::from_millis(500),
            like_flash_ttl: std::time::Duration::from_millis(800),
        }
    }
}

impl SectionPolicy {
    pub fn from_config(cfg: &crate::config::Config) -> Self {
        Self {
            rank: RankPolicy {
                trending_min_likes: cfg.policy.trending_min_likes,
            },
            reply_page_size: cfg.policy.reply_page_size,
            reply_reload_delay: cfg.policy.reply_reload_delay,
            like_flash_ttl: cfg.policy.like_flash_ttl,
            ..Default::default()
        }
    }
}

/// Owner of one post's comment section. All mutations flow through here:
/// user action, then the HTTP call, then the server's answer merged into
/// the shared store. Nothing is retried; a failed call leaves the store as
/// it was and the error goes back to the caller.
pub struct CommentSection {
    post_id: i64,
    service: Arc<dyn CommentService>,
    store: SharedCommentStore,
    bus: ReplyTargetBus,
    policy: SectionPolicy,
    page: u32,
    has_more: bool,
}

impl CommentSection {
    pub fn new(post_id: i64, service: Arc<dyn CommentService>, policy: SectionPolicy) -> Self {
        Self {
            post_id,
            service,
            store: Arc::new(Mutex::new(CommentStore::new())),
            bus: ReplyTargetBus::new(),
            policy,
            page: 0,
            has_more: true,
        }
    }

    pub fn post_id(&self) -> i64 {
        self.post_id
    }

    pub fn store(&self) -> SharedCommentStore {
        self.store.clone()
    }

    pub fn bus(&self) -> &ReplyTargetBus {
        &self.bus
    }

    /// Loads the first page of top-level comments, replacing the store.
    pub fn load(&mut self, order: SortMode) -> Result<usize> {
        let fetched = self
            .service
            .list_comments(self.post_id, 1, self.policy.comment_page_size, order.as_str())
            .context("load comment section")?;
        let count = fetched.items.len();
        self.has_more = fetched
            .has_more
            .unwrap_or(count == self.policy.comment_page_size as usize);
        self.page = 1;
        self.store.lock().reset_thread(fetched.items);
        Ok(count)
    }

    /// Fetches the next page and appends it to the top-level view.
    pub fn load_more(&mut self, order: SortMode) -> Result<usize> {
        if !self.has_more {
            return Ok(0);
        }
        let next = self.page + 1;
        let fetched = self
            .service
            .list_comments(self.post_id, next, self.policy.comment_page_size, order.as_str())
            .context("load more comments")?;
        let count = fetched.items.len();
        self.has_more = fetched
            .has_more
            .unwrap_or(count == self.policy.comment_page_size as usize);
        self.page = next;
        let mut store = self.store.lock();
        for comment in fetched.items {
            store.push_top_level(comment);
        }
        Ok(count)
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Submits a new top-level comment and prepends the confirmed object.
    pub fn submit(&self, draft: &CommentDraft) -> Result<Comment> {
        let confirmed = self
            .service
            .create_comment(self.post_id, draft)
            .context("submit comment")?;
        self.store.lock().insert_top_level(confirmed.clone());
        Ok(confirmed)
    }

    /// Saves an edit and swaps in the server's version of the comment.
    pub fn submit_edit(&self, comment_id: i64, draft: &CommentDraft) -> Result<Comment> {
        let confirmed = self
            .service
            .update_comment(comment_id, draft)
            .context("save edit")?;
        self.store.lock().apply_update(confirmed.clone());
        Ok(confirmed)
    }

    /// Like with instant visual feedback: the flash flag flips right away
    /// and dies on its own; the count only moves when the server answers.
    pub fn like(&self, comment_id: i64) -> Result<()> {
        self.store
            .lock()
            .flash_like(comment_id, self.policy.like_flash_ttl);
        let outcome = self
            .service
            .like_comment(comment_id)
            .context("like comment")?;
        self.store.lock().apply_like(comment_id, &outcome);
        Ok(())
    }

    pub fn unlike(&self, comment_id: i64) -> Result<()> {
        let outcome = self
            .service
            .unlike_comment(comment_id)
            .context("unlike comment")?;
        self.store.lock().apply_like(comment_id, &outcome);
        Ok(())
    }

    pub fn set_pinned(&self, comment_id: i64, pinned: bool) -> Result<()> {
        let confirmed = self
            .service
            .pin_comment(comment_id, pinned)
            .context("pin comment")?;
        self.store.lock().apply_update(confirmed);
        Ok(())
    }

    pub fn delete(&self, comment_id: i64) -> Result<()> {
        self.service
            .delete_comment(comment_id)
            .context("delete comment")?;
        self.store.lock().remove(comment_id);
        Ok(())
    }

    pub fn report(&self, comment_id: i64, reason: &str) -> Result<()> {
        self.service
            .report_comment(comment_id, reason)
            .context("report comment")
    }

    /// Loader for one parent's replies, wired to this section's store.
    pub fn reply_loader(&self, parent_id: i64) -> ReplyLoader {
        ReplyLoader::new(
            parent_id,
            self.service.clone(),
            self.store.clone(),
            self.policy.reply_page_size,
            self.policy.reply_reload_delay,
        )
    }

    /// Asks whoever renders the reply form for `comment_id` to focus it.
    pub fn focus_reply_form(&self, comment_id: i64) {
        self.bus.publish(comment_id);
    }

    /// Current top-level snapshot in the given order.
    pub fn sorted(&self, mode: SortMode) -> Vec<Comment> {
        let snapshot = self.store.lock().top_level();
        rank::sort_comments(&snapshot, mode)
    }

    pub fn badges(&self) -> Badges {
        let snapshot = self.store.lock().top_level();
        rank::calculate_badges(&snapshot, self.policy.rank)
    }

    pub fn sweep_transient_state(&self) {
        self.store.lock().sweep_flashes();
    }
}
