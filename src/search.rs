use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::data::{DirectoryService, FeedService};
use crate::storage;
use crate::api::{Group, Post, Profile};

/// How many posts one search sweep pulls before filtering locally.
const FEED_FETCH_LIMIT: u32 = 100;

#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    pub query: String,
    pub posts: Vec<Post>,
    pub profiles: Vec<Profile>,
    pub groups: Vec<Group>,
}

#[derive(Debug)]
pub enum SearchEvent {
    Completed { query: String },
    Failed { query: String, message: String },
}

/// Search overlay over the directory surfaces. Collections are fetched
/// whole and filtered in-process by case-insensitive substring.
///
/// Every keystroke supersedes the previous query: a bumped generation
/// counter makes stale responses drop on the floor instead of overwriting
/// newer results, and doubles as the debounce check while the query is
/// still being typed.
pub struct SearchOverlay {
    feed: Arc<dyn FeedService>,
    directory: Arc<dyn DirectoryService>,
    store: Arc<storage::Store>,
    debounce: Duration,
    recent_cap: usize,
    generation: Arc<AtomicU64>,
    results: Arc<Mutex<Option<SearchResults>>>,
    events_tx: Sender<SearchEvent>,
    events_rx: Receiver<SearchEvent>,
}

impl SearchOverlay {
    pub fn new(
        feed: Arc<dyn FeedService>,
        directory: Arc<dyn DirectoryService>,
        store: Arc<storage::Store>,
        debounce: Duration,
        recent_cap: usize,
    ) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            feed,
            directory,
            store,
            debounce,
            recent_cap,
            generation: Arc::new(AtomicU64::new(0)),
            results: Arc::new(Mutex::new(None)),
            events_tx,
            events_rx,
        }
    }

    pub fn events(&self) -> Receiver<SearchEvent> {
        self.events_rx.clone()
    }

    pub fn results(&self) -> Option<SearchResults> {
        self.results.lock().clone()
    }

    pub fn recent_searches(&self) -> Result<Vec<String>> {
        self.store.list_recent_searches()
    }

    /// Schedules a search for `query`, superseding any query still in its
    /// debounce window or in flight. Returns the generation assigned to
    /// this query.
    pub fn begin_query(&self, query: &str) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let query = query.trim().to_string();

        let feed = self.feed.clone();
        let directory = self.directory.clone();
        let store = self.store.clone();
        let current = self.generation.clone();
        let results = self.results.clone();
        let events_tx = self.events_tx.clone();
        let debounce = self.debounce;
        let recent_cap = self.recent_cap;

        thread::spawn(move || {
            thread::sleep(debounce);
            if current.load(Ordering::SeqCst) != generation {
                return;
            }
            if query.is_empty() {
                *results.lock() = None;
                let _ = events_tx.send(SearchEvent::Completed { query });
                return;
            }

            let outcome = sweep(feed.as_ref(), directory.as_ref(), &query);
            if current.load(Ordering::SeqCst) != generation {
                return;
            }
            match outcome {
                Ok(found) => {
                    *results.lock() = Some(found);
                    let _ = store.push_recent_search(&query, recent_cap);
                    let _ = events_tx.send(SearchEvent::Completed { query });
                }
                Err(err) => {
                    let _ = events_tx.send(SearchEvent::Failed {
                        query,
                        message: format!("{:#}", err),
                    });
                }
            }
        });

        generation
    }
}

fn sweep(
    feed: &dyn FeedService,
    directory: &dyn DirectoryService,
    query: &str,
) -> Result<SearchResults> {
    let posts = feed.list_posts(1, FEED_FETCH_LIMIT, "newest")?.items;
    let profiles = directory.list_profiles("")?;
    let groups = directory.list_groups()?;
    Ok(SearchResults {
        query: query.to_string(),
        posts: filter_posts(&posts, query),
        profiles: filter_profiles(&profiles, query),
        groups: filter_groups(&groups, query),
    })
}

pub fn matches_query(haystack: &str, query: &str) -> bool {
    haystack.to_lowercase().contains(&query.to_lowercase())
}

pub fn filter_posts(posts: &[Post], query: &str) -> Vec<Post> {
    posts
        .iter()
        .filter(|post| {
            matches_query(&post.content, query) || matches_query(&post.user.username, query)
        })
        .cloned()
        .collect()
}

pub fn filter_profiles(profiles: &[Profile], query: &str) -> Vec<Profile> {
    profiles
        .iter()
        .filter(|profile| {
            matches_query(&profile.username, query)
                || matches_query(&profile.display_name, query)
                || matches_query(&profile.category, query)
        })
        .cloned()
        .collect()
}

pub fn filter_groups(groups: &[Group], query: &str) -> Vec<Group> {
    groups
        .iter()
        .filter(|group| {
            matches_query(&group.name, query) || matches_query(&group.description, query)
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{MockDirectoryService, MockFeedService};
    use tempfile::tempdir;

    fn profile(id: i64, username: &str, category: &str) -> Profile {
        Profile {
            id,
            username: username.to_string(),
            display_name: format!("{} display", username),
            profile_picture: String::new(),
            category: category.to_string(),
        }
    }

    fn overlay(
        directory: Arc<MockDirectoryService>,
        debounce: Duration,
    ) -> (tempfile::TempDir, SearchOverlay) {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            storage::Store::open(storage::Options {
                path: Some(dir.path().join("state.db")),
            })
            .unwrap(),
        );
        let overlay = SearchOverlay::new(
            Arc::new(MockFeedService),
            directory,
            store,
            debounce,
            10,
        );
        (dir, overlay)
    }

    #[test]
    fn substring_match_is_case_insensitive() {
        let profiles = vec![profile(1, "Ada", "science"), profile(2, "grace", "navy")];
        let hits = filter_profiles(&profiles, "ADA");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 1);
        let hits = filter_profiles(&profiles, "nav");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 2);
    }

    #[test]
    fn completed_query_lands_in_results_and_history() {
        let directory = Arc::new(MockDirectoryService::new());
        directory.seed_profiles(vec![profile(1, "ada", "science")]);
        let (_dir, overlay) = overlay(directory, Duration::from_millis(1));

        overlay.begin_query("ada");
        let events = overlay.events();
        match events.recv_timeout(Duration::from_secs(2)).unwrap() {
            SearchEvent::Completed { query } => assert_eq!(query, "ada"),
            other => panic!("unexpected event: {:?}", other),
        }
        let results = overlay.results().unwrap();
        assert_eq!(results.profiles.len(), 1);
        assert_eq!(overlay.recent_searches().unwrap(), vec!["ada"]);
    }

    #[test]
    fn newer_query_supersedes_older() {
        let directory = Arc::new(MockDirectoryService::new());
        directory.seed_profiles(vec![profile(1, "alpha", ""), profile(2, "beta", "")]);
        let (_dir, overlay) = overlay(directory, Duration::from_millis(50));

        overlay.begin_query("alpha");
        overlay.begin_query("beta");

        let events = overlay.events();
        match events.recv_timeout(Duration::from_secs(2)).unwrap() {
            SearchEvent::Completed { query } => assert_eq!(query, "beta"),
            other => panic!("unexpected event: {:?}", other),
        }
        let results = overlay.results().unwrap();
        assert_eq!(results.query, "beta");
        // The superseded query never completed, so it never hit history.
        assert_eq!(overlay.recent_searches().unwrap(), vec!["beta"]);
    }

    #[test]
    fn empty_query_clears_results() {
        let directory = Arc::new(MockDirectoryService::new());
        directory.seed_profiles(vec![profile(1, "ada", "")]);
        let (_dir, overlay) = overlay(directory, Duration::from_millis(1));

        overlay.begin_query("ada");
        let events = overlay.events();
        events.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(overlay.results().is_some());

        overlay.begin_query("");
        events.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(overlay.results().is_none());
    }
}
