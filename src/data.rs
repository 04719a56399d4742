use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use parking_lot::Mutex;

use crate::api::{
    self, Comment, CommentDraft, CurrentUser, Group, LikeOutcome, LoginResponse, Page, Post,
    Profile,
};

pub trait CommentService: Send + Sync {
    fn list_comments(
        &self,
        post_id: i64,
        page: u32,
        per_page: u32,
        order: &str,
    ) -> Result<Page<Comment>>;
    fn list_replies(&self, parent_id: i64, page: u32, per_page: u32) -> Result<Page<Comment>>;
    fn create_comment(&self, post_id: i64, draft: &CommentDraft) -> Result<Comment>;
    fn update_comment(&self, comment_id: i64, draft: &CommentDraft) -> Result<Comment>;
    fn delete_comment(&self, comment_id: i64) -> Result<()>;
    fn like_comment(&self, comment_id: i64) -> Result<LikeOutcome>;
    fn unlike_comment(&self, comment_id: i64) -> Result<LikeOutcome>;
    fn pin_comment(&self, comment_id: i64, pinned: bool) -> Result<Comment>;
    fn report_comment(&self, comment_id: i64, reason: &str) -> Result<()>;
}

pub trait FeedService: Send + Sync {
    fn list_posts(&self, page: u32, per_page: u32, sort: &str) -> Result<Page<Post>>;
}

pub trait DirectoryService: Send + Sync {
    fn list_profiles(&self, category: &str) -> Result<Vec<Profile>>;
    fn lookup_profile(&self, username: &str) -> Result<Option<Profile>>;
    fn list_groups(&self) -> Result<Vec<Group>>;
    fn join_group(&self, group_id: i64) -> Result<Group>;
}

pub trait AccountService: Send + Sync {
    fn login(&self, username: &str, password: &str) -> Result<LoginResponse>;
    fn logout(&self) -> Result<()>;
    fn current_user(&self) -> Result<CurrentUser>;
    fn request_password_change(&self) -> Result<()>;
    fn verify_password_change(&self, code: &str) -> Result<()>;
    fn commit_password_change(&self, new_password: &str) -> Result<()>;
    fn request_deletion(&self) -> Result<()>;
    fn verify_deletion(&self, code: &str) -> Result<()>;
    fn commit_deletion(&self) -> Result<()>;
}

pub struct HttpCommentService {
    client: Arc<api::Client>,
}

impl HttpCommentService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl CommentService for HttpCommentService {
    fn list_comments(
        &self,
        post_id: i64,
        page: u32,
        per_page: u32,
        order: &str,
    ) -> Result<Page<Comment>> {
        self.client
            .list_comments(post_id, page, per_page, order)
            .context("fetch comments")
    }

    fn list_replies(&self, parent_id: i64, page: u32, per_page: u32) -> Result<Page<Comment>> {
        self.client
            .list_replies(parent_id, page, per_page)
            .context("fetch replies")
    }

    fn create_comment(&self, post_id: i64, draft: &CommentDraft) -> Result<Comment> {
        self.client
            .create_comment(post_id, draft)
            .context("create comment")
    }

    fn update_comment(&self, comment_id: i64, draft: &CommentDraft) -> Result<Comment> {
        self.client
            .update_comment(comment_id, draft)
            .context("update comment")
    }

    fn delete_comment(&self, comment_id: i64) -> Result<()> {
        self.client
            .delete_comment(comment_id)
            .context("delete comment")
    }

    fn like_comment(&self, comment_id: i64) -> Result<LikeOutcome> {
        self.client.like_comment(comment_id).context("like comment")
    }

    fn unlike_comment(&self, comment_id: i64) -> Result<LikeOutcome> {
        self.client
            .unlike_comment(comment_id)
            .context("unlike comment")
    }

    fn pin_comment(&self, comment_id: i64, pinned: bool) -> Result<Comment> {
        self.client
            .pin_comment(comment_id, pinned)
            .context("pin comment")
    }

    fn report_comment(&self, comment_id: i64, reason: &str) -> Result<()> {
        self.client
            .report_comment(comment_id, reason)
            .context("report comment")
    }
}

pub struct HttpFeedService {
    client: Arc<api::Client>,
}

impl HttpFeedService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl FeedService for HttpFeedService {
    fn list_posts(&self, page: u32, per_page: u32, sort: &str) -> Result<Page<Post>> {
        self.client
            .list_posts(page, per_page, sort)
            .context("fetch posts")
    }
}

pub struct HttpDirectoryService {
    client: Arc<api::Client>,
}

impl HttpDirectoryService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl DirectoryService for HttpDirectoryService {
    fn list_profiles(&self, category: &str) -> Result<Vec<Profile>> {
        self.client
            .list_profiles(category)
            .context("fetch profiles")
    }

    fn lookup_profile(&self, username: &str) -> Result<Option<Profile>> {
        self.client
            .lookup_profile(username)
            .context("lookup profile")
    }

    fn list_groups(&self) -> Result<Vec<Group>> {
        self.client.list_groups().context("fetch groups")
    }

    fn join_group(&self, group_id: i64) -> Result<Group> {
        self.client.join_group(group_id).context("join group")
    }
}

pub struct HttpAccountService {
    client: Arc<api::Client>,
}

impl HttpAccountService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl AccountService for HttpAccountService {
    fn login(&self, username: &str, password: &str) -> Result<LoginResponse> {
        self.client.login(username, password).context("login")
    }

    fn logout(&self) -> Result<()> {
        self.client.logout().context("logout")
    }

    fn current_user(&self) -> Result<CurrentUser> {
        self.client.current_user().context("fetch current user")
    }

    fn request_password_change(&self) -> Result<()> {
        self.client
            .request_password_change()
            .context("request password change")
    }

    fn verify_password_change(&self, code: &str) -> Result<()> {
        self.client
            .verify_password_change(code)
            .context("verify password change")
    }

    fn commit_password_change(&self, new_password: &str) -> Result<()> {
        self.client
            .commit_password_change(new_password)
            .context("commit password change")
    }

    fn request_deletion(&self) -> Result<()> {
        self.client.request_deletion().context("request deletion")
    }

    fn verify_deletion(&self, code: &str) -> Result<()> {
        self.client.verify_deletion(code).context("verify deletion")
    }

    fn commit_deletion(&self) -> Result<()> {
        self.client.commit_deletion().context("commit deletion")
    }
}

fn mock_author() -> api::Author {
    api::Author {
        id: 1,
        username: "mosaic".into(),
        profile_picture: String::new(),
    }
}

/// In-memory comment backend for tests and offline use. Replies are kept
/// per parent in ascending creation order, the way the server pages them.
#[derive(Default)]
pub struct MockCommentService {
    replies: Mutex<HashMap<i64, Vec<Comment>>>,
    next_id: AtomicI64,
}

impl MockCommentService {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1000),
        }
    }

    pub fn seed_replies(&self, parent_id: i64, replies: Vec<Comment>) {
        self.replies.lock().insert(parent_id, replies);
    }
}

impl CommentService for MockCommentService {
    fn list_comments(
        &self,
        _post_id: i64,
        page: u32,
        per_page: u32,
        _order: &str,
    ) -> Result<Page<Comment>> {
        Ok(Page {
            items: Vec::new(),
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
        let comment = Comment {
            id,
            content: draft.content.clone(),
            created_at: Utc::now(),
            is_pinned: false,
            likes_count: 0,
            has_liked: false,
            reply_count: 0,
            replies: None,
            parent_comment: draft.parent_id,
            user: mock_author(),
            media: Vec::new(),
            is_owner: Some(true),
            is_post_owner: None,
            user_can_pin: None,
            user_can_edit: Some(true),
            user_can_delete: Some(true),
        };
        if let Some(parent_id) = draft.parent_id {
            self.replies
                .lock()
                .entry(parent_id)
                .or_default()
                .push(comment.clone());
        }
        Ok(comment)
    }

    fn update_comment(&self, comment_id: i64, draft: &CommentDraft) -> Result<Comment> {
        Ok(Comment {
            id: comment_id,
            content: draft.content.clone(),
            created_at: Utc::now(),
            is_pinned: false,
            likes_count: 0,
            has_liked: false,
            reply_count: 0,
            replies: None,
            parent_comment: draft.parent_id,
            user: mock_author(),
            media: Vec::new(),
            is_owner: Some(true),
            is_post_owner: None,
            user_can_pin: None,
            user_can_edit: Some(true),
            user_can_delete: Some(true),
        })
    }

    fn delete_comment(&self, _comment_id: i64) -> Result<()> {
        Ok(())
    }

    fn like_comment(&self, _comment_id: i64) -> Result<LikeOutcome> {
        Ok(LikeOutcome {
            likes_count: 1,
            has_liked: true,
        })
    }

    fn unlike_comment(&self, _comment_id: i64) -> Result<LikeOutcome> {
        Ok(LikeOutcome {
            likes_count: 0,
            has_liked: false,
        })
    }

    fn pin_comment(&self, comment_id: i64, pinned: bool) -> Result<Comment> {
        Ok(Comment {
            id: comment_id,
            content: String::new(),
            created_at: Utc::now(),
            is_pinned: pinned,
            likes_count: 0,
            has_liked: false,
            reply_count: 0,
            replies: None,
            parent_comment: None,
            user: mock_author(),
            media: Vec::new(),
            is_owner: None,
            is_post_owner: Some(true),
            user_can_pin: Some(true),
            user_can_edit: None,
            user_can_delete: None,
        })
    }

    fn report_comment(&self, _comment_id: i64, _reason: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MockFeedService;

impl FeedService for MockFeedService {
    fn list_posts(&self, page: u32, per_page: u32, _sort: &str) -> Result<Page<Post>> {
        Ok(Page {
            items: vec![Post {
                id: 1,
                content: "Welcome to Mosaic".into(),
                created_at: Utc::now(),
                user: mock_author(),
                likes_count: 0,
                comment_count: 0,
                media: Vec::new(),
            }],
            page,
            per_page,
            has_more: Some(false),
        })
    }
}

#[derive(Default)]
pub struct MockDirectoryService {
    profiles: Mutex<Vec<Profile>>,
    groups: Mutex<Vec<Group>>,
    lookups: AtomicI64,
}

impl MockDirectoryService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_profiles(&self, profiles: Vec<Profile>) {
        *self.profiles.lock() = profiles;
    }

    pub fn seed_groups(&self, groups: Vec<Group>) {
        *self.groups.lock() = groups;
    }

    pub fn lookup_count(&self) -> i64 {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl DirectoryService for MockDirectoryService {
    fn list_profiles(&self, category: &str) -> Result<Vec<Profile>> {
        let profiles = self.profiles.lock();
        if category.is_empty() {
            return Ok(profiles.clone());
        }
        Ok(profiles
            .iter()
            .filter(|profile| profile.category == category)
            .cloned()
            .collect())
    }

    fn lookup_profile(&self, username: &str) -> Result<Option<Profile>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .profiles
            .lock()
            .iter()
            .find(|profile| profile.username == username)
            .cloned())
    }

    fn list_groups(&self) -> Result<Vec<Group>> {
        Ok(self.groups.lock().clone())
    }

    fn join_group(&self, group_id: i64) -> Result<Group> {
        let mut groups = self.groups.lock();
        let group = groups
            .iter_mut()
            .find(|group| group.id == group_id)
            .ok_or_else(|| anyhow!("group {} not found", group_id))?;
        group.is_member = true;
        group.member_count += 1;
        Ok(group.clone())
    }
}

#[derive(Default)]
pub struct MockAccountService;

impl AccountService for MockAccountService {
    fn login(&self, username: &str, _password: &str) -> Result<LoginResponse> {
        Ok(LoginResponse {
            token: "mock-token".into(),
            user: CurrentUser {
                id: 1,
                username: username.to_string(),
                email: format!("{}@example.com", username),
                profile_picture: String::new(),
            },
        })
    }

    fn logout(&self) -> Result<()> {
        Ok(())
    }

    fn current_user(&self) -> Result<CurrentUser> {
        Ok(CurrentUser {
            id: 1,
            username: "mosaic".into(),
            email: "mosaic@example.com".into(),
            profile_picture: String::new(),
        })
    }

    fn request_password_change(&self) -> Result<()> {
        Ok(())
    }

    fn verify_password_change(&self, _code: &str) -> Result<()> {
        Ok(())
    }

    fn commit_password_change(&self, _new_password: &str) -> Result<()> {
        Ok(())
    }

    fn request_deletion(&self) -> Result<()> {
        Ok(())
    }

    fn verify_deletion(&self, _code: &str) -> Result<()> {
        Ok(())
    }

    fn commit_deletion(&self) -> Result<()> {
        Ok(())
    }
}
