use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::api::{Comment, LikeOutcome};

/// The thread page owns the store; loaders and composers share it.
pub type SharedCommentStore = std::sync::Arc<Mutex<CommentStore>>;

/// Normalized store for one post's comment forest.
///
/// Every comment lives exactly once in the entity map; the top-level list
/// and per-parent reply lists are orderings over ids. All surfaces (thread
/// view, reply loaders) read and write through the same map, so a comment
/// can never diverge between views.
#[derive(Debug, Default)]
pub struct CommentStore {
    entities: HashMap<i64, Comment>,
    top_level: Vec<i64>,
    children: HashMap<i64, Vec<i64>>,
    flashes: HashMap<i64, Instant>,
}

impl CommentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn get(&self, id: i64) -> Option<Comment> {
        self.entities.get(&id).cloned()
    }

    /// Top-level comments in display order.
    pub fn top_level(&self) -> Vec<Comment> {
        self.top_level
            .iter()
            .filter_map(|id| self.entities.get(id).cloned())
            .collect()
    }

    /// Materialized replies of a parent, in display order. Empty output
    /// does not mean no replies exist; the parent's `reply_count` decides
    /// that.
    pub fn replies_of(&self, parent_id: i64) -> Vec<Comment> {
        self.children
            .get(&parent_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.entities.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Replaces the thread with a fresh top-level page.
    pub fn reset_thread(&mut self, comments: Vec<Comment>) {
        self.entities.clear();
        self.top_level.clear();
        self.children.clear();
        for comment in comments {
            let id = comment.id;
            self.index(comment, None);
            self.top_level.push(id);
        }
    }

    /// New top-level comment from a confirmed submission; goes to the
    /// front of the list. Re-inserting a known id refreshes the entity
    /// without duplicating its row.
    pub fn insert_top_level(&mut self, comment: Comment) {
        let id = comment.id;
        let known = self.entities.contains_key(&id);
        self.index(comment, None);
        if !known {
            self.top_level.insert(0, id);
        }
    }

    /// Appends a top-level comment from a later page. Known ids refresh in
    /// place instead of moving.
    pub fn push_top_level(&mut self, comment: Comment) {
        let id = comment.id;
        let known = self.entities.contains_key(&id);
        self.index(comment, None);
        if !known {
            self.top_level.push(id);
        }
    }

    /// Attaches a confirmed reply under its parent and bumps the parent's
    /// `reply_count` by exactly one. Returns false, leaving the store
    /// untouched, when the parent is not materialized here.
    pub fn insert_reply(&mut self, parent_id: i64, reply: Comment) -> bool {
        self.attach_reply(parent_id, reply, false)
    }

    /// Same as `insert_reply` but places the reply at the front of the
    /// view, where an optimistic insert sits until the reconciling reload.
    pub fn insert_reply_front(&mut self, parent_id: i64, reply: Comment) -> bool {
        self.attach_reply(parent_id, reply, true)
    }

    fn attach_reply(&mut self, parent_id: i64, reply: Comment, front: bool) -> bool {
        if !self.entities.contains_key(&parent_id) {
            return false;
        }
        let id = reply.id;
        let known = self.entities.contains_key(&id);
        self.index(reply, Some(parent_id));
        let order = self.children.entry(parent_id).or_default();
        if !order.contains(&id) {
            if front {
                order.insert(0, id);
            } else {
                order.push(id);
            }
        }
        if !known {
            if let Some(parent) = self.entities.get_mut(&parent_id) {
                parent.reply_count += 1;
            }
        }
        true
    }

    /// Merges one server page of replies into the parent's view. Page 1
    /// (`reset`) replaces the order, later pages append; ids already
    /// present are skipped so an optimistic insert does not double up when
    /// the reconciling reload echoes it back.
    pub fn merge_reply_page(&mut self, parent_id: i64, page: Vec<Comment>, reset: bool) {
        if reset {
            let stale = self
                .children
                .insert(parent_id, Vec::new())
                .unwrap_or_default();
            let incoming: HashSet<i64> = page.iter().map(|c| c.id).collect();
            for id in stale {
                if !incoming.contains(&id) {
                    self.remove_subtree(id);
                }
            }
        }
        for reply in page {
            let id = reply.id;
            self.index(reply, Some(parent_id));
            let order = self.children.entry(parent_id).or_default();
            if !order.contains(&id) {
                order.push(id);
            }
        }
    }

    /// Replaces a node with the server's object, wherever it sits. Unknown
    /// ids are ignored.
    pub fn apply_update(&mut self, comment: Comment) {
        if !self.entities.contains_key(&comment.id) {
            return;
        }
        let parent = self.entities.get(&comment.id).and_then(|c| c.parent_comment);
        self.index(comment, parent);
    }

    /// Commits authoritative like numbers from a server response.
    pub fn apply_like(&mut self, id: i64, outcome: &LikeOutcome) {
        if let Some(comment) = self.entities.get_mut(&id) {
            comment.likes_count = outcome.likes_count;
            comment.has_liked = outcome.has_liked;
        }
    }

    /// Excises a node and its subtree from every view. Removing an absent
    /// id is a no-op, so a double delete cannot fail.
    pub fn remove(&mut self, id: i64) -> bool {
        let Some(removed) = self.entities.remove(&id) else {
            return false;
        };
        self.top_level.retain(|other| *other != id);
        if let Some(parent_id) = removed.parent_comment {
            if let Some(order) = self.children.get_mut(&parent_id) {
                order.retain(|other| *other != id);
            }
            if let Some(parent) = self.entities.get_mut(&parent_id) {
                parent.reply_count = (parent.reply_count - 1).max(0);
            }
        }
        self.flashes.remove(&id);
        if let Some(subtree) = self.children.remove(&id) {
            for child in subtree {
                self.remove_subtree(child);
            }
        }
        true
    }

    fn remove_subtree(&mut self, id: i64) {
        self.entities.remove(&id);
        self.flashes.remove(&id);
        if let Some(subtree) = self.children.remove(&id) {
            for child in subtree {
                self.remove_subtree(child);
            }
        }
    }

    /// UI-only like animation flag. Lives until its deadline regardless of
    /// whether the request behind it succeeds; counts never change here.
    pub fn flash_like(&mut self, id: i64, ttl: Duration) {
        self.flashes.insert(id, Instant::now() + ttl);
    }

    pub fn is_flashing(&self, id: i64) -> bool {
        self.flashes
            .get(&id)
            .map(|deadline| Instant::now() < *deadline)
            .unwrap_or(false)
    }

    pub fn sweep_flashes(&mut self) {
        let now = Instant::now();
        self.flashes.retain(|_, deadline| now < *deadline);
    }

    /// Indexes a comment, flattening any embedded `replies` cache into the
    /// children map so the entity map stays the single copy of each node.
    fn index(&mut self, mut comment: Comment, parent_id: Option<i64>) {
        let id = comment.id;
        if parent_id.is_some() {
            comment.parent_comment = parent_id;
        }
        let embedded = comment.replies.take();
        self.entities.insert(id, comment);
        if let Some(children) = embedded {
            for child in children {
                let child_id = child.id;
                self.index(child, Some(id));
                let order = self.children.entry(id).or_default();
                if !order.contains(&child_id) {
                    order.push(child_id);
                }
            }
        }
    }
}

/// Replaces the legacy window-global "scroll to reply form" callback: the
/// thread owner publishes the active reply target and any interested
/// surface subscribes.
#[derive(Default)]
pub struct ReplyTargetBus {
    subscribers: Mutex<Vec<Sender<i64>>>,
}

impl ReplyTargetBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<i64> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, comment_id: i64) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(comment_id).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Author;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    fn comment(id: i64, minutes: i64) -> Comment {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        Comment {
            id,
            content: format!("comment {}", id),
            created_at: base + ChronoDuration::minutes(minutes),
            is_pinned: false,
            likes_count: 0,
            has_liked: false,
            reply_count: 0,
            replies: None,
            parent_comment: None,
            user: Author {
                id: 1,
                username: "ada".into(),
                profile_picture: String::new(),
            },
            media: Vec::new(),
            is_owner: None,
            is_post_owner: None,
            user_can_pin: None,
            user_can_edit: None,
            user_can_delete: None,
        }
    }

    #[test]
    fn insert_top_level_prepends() {
        let mut store = CommentStore::new();
        store.insert_top_level(comment(1, 0));
        store.insert_top_level(comment(2, 1));
        let ids: Vec<i64> = store.top_level().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn reinsert_refreshes_without_duplicating() {
        let mut store = CommentStore::new();
        store.insert_top_level(comment(1, 0));
        let mut refreshed = comment(1, 0);
        refreshed.content = "edited".into();
        store.insert_top_level(refreshed);
        assert_eq!(store.top_level().len(), 1);
        assert_eq!(store.get(1).unwrap().content, "edited");
    }

    #[test]
    fn reply_appends_and_bumps_count() {
        let mut store = CommentStore::new();
        let mut parent = comment(5, 0);
        parent.reply_count = 2;
        parent.replies = Some(vec![comment(10, 1), comment(11, 2)]);
        store.insert_top_level(parent);

        assert!(store.insert_reply(5, comment(12, 3)));
        let parent = store.get(5).unwrap();
        assert_eq!(parent.reply_count, 3);
        let ids: Vec<i64> = store.replies_of(5).iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![10, 11, 12]);
    }

    #[test]
    fn reply_to_unknown_parent_is_noop() {
        let mut store = CommentStore::new();
        store.insert_top_level(comment(1, 0));
        assert!(!store.insert_reply(99, comment(2, 1)));
        assert_eq!(store.len(), 1);
        assert!(store.replies_of(99).is_empty());
    }

    #[test]
    fn remove_excises_subtree_and_tolerates_repeats() {
        let mut store = CommentStore::new();
        let mut parent = comment(1, 0);
        parent.replies = Some(vec![comment(2, 1)]);
        store.insert_top_level(parent);
        assert!(store.insert_reply(2, comment(3, 2)));

        assert!(store.remove(2));
        assert!(!store.contains(2));
        assert!(!store.contains(3));
        assert!(store.contains(1));
        assert_eq!(store.get(1).unwrap().reply_count, 0);
        assert!(!store.remove(2));
    }

    #[test]
    fn update_replaces_in_place() {
        let mut store = CommentStore::new();
        store.insert_top_level(comment(1, 0));
        let mut updated = comment(1, 0);
        updated.is_pinned = true;
        store.apply_update(updated);
        assert!(store.get(1).unwrap().is_pinned);

        store.apply_update(comment(42, 0));
        assert!(!store.contains(42));
    }

    #[test]
    fn like_counts_come_from_server() {
        let mut store = CommentStore::new();
        store.insert_top_level(comment(1, 0));
        store.apply_like(
            1,
            &LikeOutcome {
                likes_count: 7,
                has_liked: true,
            },
        );
        let comment = store.get(1).unwrap();
        assert_eq!(comment.likes_count, 7);
        assert!(comment.has_liked);
    }

    #[test]
    fn reply_page_merge_skips_known_ids() {
        let mut store = CommentStore::new();
        store.insert_top_level(comment(1, 0));
        assert!(store.insert_reply(1, comment(9, 5)));

        store.merge_reply_page(1, vec![comment(7, 1), comment(9, 5)], true);
        let ids: Vec<i64> = store.replies_of(1).iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![7, 9]);

        store.merge_reply_page(1, vec![comment(8, 2)], false);
        let ids: Vec<i64> = store.replies_of(1).iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![7, 9, 8]);
    }

    #[test]
    fn flash_is_transient() {
        let mut store = CommentStore::new();
        store.insert_top_level(comment(1, 0));
        store.flash_like(1, Duration::from_secs(60));
        assert!(store.is_flashing(1));
        store.flash_like(1, Duration::from_secs(0));
        store.sweep_flashes();
        assert!(!store.is_flashing(1));
        assert_eq!(store.get(1).unwrap().likes_count, 0);
    }

    #[test]
    fn bus_delivers_to_all_subscribers() {
        let bus = ReplyTargetBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.publish(17);
        assert_eq!(a.try_recv().unwrap(), 17);
        assert_eq!(b.try_recv().unwrap(), 17);
    }
}
