use serde::{Deserialize, Serialize};

use crate::api::Comment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    #[default]
    Newest,
    Oldest,
    MostLiked,
    MostReplied,
}

impl SortMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortMode::Newest => "newest",
            SortMode::Oldest => "oldest",
            SortMode::MostLiked => "most_liked",
            SortMode::MostReplied => "most_replied",
        }
    }
}

pub fn sort_mode_from_key(key: &str) -> SortMode {
    match key {
        "oldest" => SortMode::Oldest,
        "most_liked" => SortMode::MostLiked,
        "most_replied" => SortMode::MostReplied,
        _ => SortMode::Newest,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankPolicy {
    /// Minimum likes before a comment can carry the trending badge.
    pub trending_min_likes: i64,
}

impl Default for RankPolicy {
    fn default() -> Self {
        Self {
            trending_min_likes: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Badges {
    pub first_comment_id: Option<i64>,
    pub trending_comment_id: Option<i64>,
}

/// Single pass over a snapshot. First badge goes to the oldest comment;
/// trending to the highest liked one at or above the policy threshold,
/// ties broken by the more recent comment. Ties on identical values keep
/// the first-encountered element.
pub fn calculate_badges(comments: &[Comment], policy: RankPolicy) -> Badges {
    let mut first: Option<&Comment> = None;
    let mut trending: Option<&Comment> = None;

    for comment in comments {
        match first {
            Some(current) if comment.created_at >= current.created_at => {}
            _ => first = Some(comment),
        }
        if comment.likes_count < policy.trending_min_likes {
            continue;
        }
        match trending {
            Some(current)
                if comment.likes_count < current.likes_count
                    || (comment.likes_count == current.likes_count
                        && comment.created_at <= current.created_at) => {}
            _ => trending = Some(comment),
        }
    }

    Badges {
        first_comment_id: first.map(|c| c.id),
        trending_comment_id: trending.map(|c| c.id),
    }
}

/// Returns a fresh ordering without touching the input; callers memoize on
/// the input slice.
///
/// Pinned comments always lead, newest first, regardless of mode; the mode
/// only orders the unpinned partition.
pub fn sort_comments(comments: &[Comment], mode: SortMode) -> Vec<Comment> {
    let mut pinned: Vec<Comment> = Vec::new();
    let mut unpinned: Vec<Comment> = Vec::new();
    for comment in comments {
        if comment.is_pinned {
            pinned.push(comment.clone());
        } else {
            unpinned.push(comment.clone());
        }
    }

    pinned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    match mode {
        SortMode::Newest => unpinned.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        SortMode::Oldest => unpinned.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
        SortMode::MostLiked => unpinned.sort_by(|a, b| {
            b.likes_count
                .cmp(&a.likes_count)
                .then(b.created_at.cmp(&a.created_at))
        }),
        SortMode::MostReplied => unpinned.sort_by(|a, b| {
            b.reply_count
                .cmp(&a.reply_count)
                .then(b.created_at.cmp(&a.created_at))
        }),
    }

    pinned.extend(unpinned);
    pinned
}
