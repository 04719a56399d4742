use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::Mutex;

use mosaic_client::api::{Author, Comment, CommentDraft, LikeOutcome, Page};
use mosaic_client::data::CommentService;
use mosaic_client::rank::SortMode;
use mosaic_client::replies::ReplyEvent;
use mosaic_client::section::{CommentSection, SectionPolicy};

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn comment(id: i64, minutes: i64, likes: i64) -> Comment {
    Comment {
        id,
        content: format!("comment {}", id),
        created_at: base_time() + ChronoDuration::minutes(minutes),
        is_pinned: false,
        likes_count: likes,
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

/// Comment backend scripted for one post: a fixed top-level page plus
/// live per-parent reply lists in ascending creation order.
struct ScriptedService {
    top_level: Vec<Comment>,
    replies: Mutex<HashMap<i64, Vec<Comment>>>,
    next_id: AtomicI64,
    like_result: LikeOutcome,
}

impl ScriptedService {
    fn new(top_level: Vec<Comment>, next_id: i64) -> Self {
        Self {
            top_level,
            replies: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(next_id),
            like_result: LikeOutcome {
                likes_count: 4,
                has_liked: true,
            },
        }
    }

    fn seed_replies(&self, parent_id: i64, replies: Vec<Comment>) {
        self.replies.lock().insert(parent_id, replies);
    }
}

impl CommentService for ScriptedService {
    fn list_comments(
        &self,
        _post_id: i64,
        page: u32,
        per_page: u32,
        _order: &str,
    ) -> Result<Page<Comment>> {
        let items = if page <= 1 {
            self.top_level.clone()
        } else {
            Vec::new()
        };
        Ok(Page {
            items,
            page,
            per_page,
            has_more: Some(false),
        })
    }

    fn list_replies(&self, parent_id: i64, page: u32, per_page: u32) -> Result<Page<Comment>> {
        let replies = self.replies.lock();
        let all = replies.get(&parent_id).cloned().unwrap_or_default();
        let start = ((page.max(1) - 1) * per_page) as usize;
        let end = (start + per_page as usize).min(all.len());
        let items = if start < all.len() {
            all[start..end].to_vec()
        } else {
            Vec::new()
        };
        Ok(Page {
            items,
            page,
            per_page,
            has_more: Some(end < all.len()),
        })
    }

    fn create_comment(&self, _post_id: i64, draft: &CommentDraft) -> Result<Comment> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut created = comment(id, 90, 0);
        created.content = draft.content.clone();
        created.parent_comment = draft.parent_id;
        if let Some(parent_id) = draft.parent_id {
            self.replies
                .lock()
                .entry(parent_id)
                .or_default()
                .push(created.clone());
        }
        Ok(created)
    }

    fn update_comment(&self, comment_id: i64, draft: &CommentDraft) -> Result<Comment> {
        let mut updated = comment(comment_id, 0, 0);
        updated.content = draft.content.clone();
        Ok(updated)
    }

    fn delete_comment(&self, _comment_id: i64) -> Result<()> {
        Ok(())
    }

    fn like_comment(&self, _comment_id: i64) -> Result<LikeOutcome> {
        Ok(self.like_result.clone())
    }

    fn unlike_comment(&self, _comment_id: i64) -> Result<LikeOutcome> {
        Ok(LikeOutcome {
            likes_count: 0,
            has_liked: false,
        })
    }

    fn pin_comment(&self, comment_id: i64, pinned: bool) -> Result<Comment> {
        let mut pinned_comment = comment(comment_id, 0, 0);
        pinned_comment.is_pinned = pinned;
        Ok(pinned_comment)
    }

    fn report_comment(&self, _comment_id: i64, _reason: &str) -> Result<()> {
        Ok(())
    }
}

fn quick_policy() -> SectionPolicy {
    SectionPolicy {
        reply_reload_delay: Duration::from_millis(20),
        ..Default::default()
    }
}

#[test]
fn badges_and_sorting_over_a_loaded_section() {
    // Post with an old unliked comment and a newer one with three likes.
    let service = Arc::new(ScriptedService::new(
        vec![comment(1, 0, 0), comment(2, 10, 3)],
        100,
    ));
    let mut section = CommentSection::new(9, service, quick_policy());
    assert_eq!(section.load(SortMode::Newest).unwrap(), 2);

    let badges = section.badges();
    assert_eq!(badges.first_comment_id, Some(1));
    assert_eq!(badges.trending_comment_id, Some(2));

    let ids: Vec<i64> = section
        .sorted(SortMode::MostLiked)
        .iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(ids, vec![2, 1]);
}

#[test]
fn reply_submission_appends_under_parent() {
    let mut parent = comment(5, 0, 0);
    parent.reply_count = 2;
    parent.replies = Some(vec![comment(10, 1, 0), comment(11, 2, 0)]);
    let service = Arc::new(ScriptedService::new(vec![parent], 12));
    service.seed_replies(5, vec![comment(10, 1, 0), comment(11, 2, 0)]);

    let mut section = CommentSection::new(9, service, quick_policy());
    section.load(SortMode::Newest).unwrap();

    let loader = section.reply_loader(5);
    let confirmed = loader
        .submit(
            9,
            &CommentDraft {
                content: "new reply".into(),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(confirmed.id, 12);

    // Wait for the reconciling reload so the server's order wins.
    let events = loader.events();
    events
        .iter()
        .find(|event| matches!(event, ReplyEvent::Reconciled { .. }))
        .unwrap();

    let store = section.store();
    let store = store.lock();
    assert_eq!(store.get(5).unwrap().reply_count, 3);
    let ids: Vec<i64> = store.replies_of(5).iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![10, 11, 12]);
}

#[test]
fn like_counts_only_move_on_server_answer() {
    let service = Arc::new(ScriptedService::new(vec![comment(1, 0, 3)], 100));
    let mut section = CommentSection::new(9, service, quick_policy());
    section.load(SortMode::Newest).unwrap();

    section.like(1).unwrap();
    let snapshot = section.sorted(SortMode::Newest);
    assert_eq!(snapshot[0].likes_count, 4);
    assert!(snapshot[0].has_liked);
}

#[test]
fn delete_is_idempotent_from_the_callers_view() {
    let service = Arc::new(ScriptedService::new(
        vec![comment(1, 0, 0), comment(2, 1, 0)],
        100,
    ));
    let mut section = CommentSection::new(9, service, quick_policy());
    section.load(SortMode::Newest).unwrap();

    section.delete(2).unwrap();
    assert_eq!(section.sorted(SortMode::Newest).len(), 1);
    section.delete(2).unwrap();
    assert_eq!(section.sorted(SortMode::Newest).len(), 1);
}

#[test]
fn new_top_level_comment_is_prepended() {
    let service = Arc::new(ScriptedService::new(vec![comment(1, 0, 0)], 50));
    let mut section = CommentSection::new(9, service, quick_policy());
    section.load(SortMode::Newest).unwrap();

    let confirmed = section
        .submit(&CommentDraft {
            content: "hot take".into(),
            ..Default::default()
        })
        .unwrap();

    let store = section.store();
    let ids: Vec<i64> = store.lock().top_level().iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![confirmed.id, 1]);
}
