use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::api::{Comment, CommentDraft};
use crate::data::CommentService;
use crate::store::SharedCommentStore;

/// Completion notices from background work, polled by the owner the same
/// way it polls any other async response.
#[derive(Debug)]
pub enum ReplyEvent {
    Loaded {
        parent_id: i64,
        page: u32,
        count: usize,
        has_more: bool,
    },
    Reconciled {
        parent_id: i64,
        count: usize,
    },
    Failed {
        parent_id: i64,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { count: usize, has_more: bool },
    /// A load was already in flight; this call was a no-op.
    Suppressed,
}

/// Pages replies for one parent comment through the shared store.
///
/// Replies arrive oldest-first in pages of `page_size`. Page 1 resets the
/// parent's reply view, later pages extend it. Only one request may be in
/// flight at a time; extra calls are suppressed rather than queued.
pub struct ReplyLoader {
    parent_id: i64,
    service: Arc<dyn CommentService>,
    store: SharedCommentStore,
    page_size: u32,
    reload_delay: Duration,
    in_flight: Arc<AtomicBool>,
    state: Mutex<LoaderState>,
    events_tx: Sender<ReplyEvent>,
    events_rx: Receiver<ReplyEvent>,
}

#[derive(Debug, Default)]
struct LoaderState {
    loaded_pages: u32,
    has_more: bool,
}

impl ReplyLoader {
    pub fn new(
        parent_id: i64,
        service: Arc<dyn CommentService>,
        store: SharedCommentStore,
        page_size: u32,
        reload_delay: Duration,
    ) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            parent_id,
            service,
            store,
            page_size,
            reload_delay,
            in_flight: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(LoaderState {
                loaded_pages: 0,
                has_more: true,
            }),
            events_tx,
            events_rx,
        }
    }

    pub fn events(&self) -> Receiver<ReplyEvent> {
        self.events_rx.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn has_more(&self) -> bool {
        self.state.lock().has_more
    }

    pub fn loaded_pages(&self) -> u32 {
        self.state.lock().loaded_pages
    }

    /// Loads the next page after the last one seen.
    pub fn load_more(&self) -> Result<LoadOutcome> {
        let next = self.state.lock().loaded_pages + 1;
        self.load(next)
    }

    /// Fetches one page of replies. Page 1 replaces the local view; later
    /// pages append. Returns `Suppressed` without touching anything while
    /// another load is running.
    pub fn load(&self, page: u32) -> Result<LoadOutcome> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(LoadOutcome::Suppressed);
        }
        let result = self.load_locked(page);
        self.in_flight.store(false, Ordering::SeqCst);
        result.map(|(count, has_more)| LoadOutcome::Loaded { count, has_more })
    }

    fn load_locked(&self, page: u32) -> Result<(usize, bool)> {
        let fetched = self
            .service
            .list_replies(self.parent_id, page, self.page_size)
            .context("load replies")?;
        let count = fetched.items.len();
        let has_more = match fetched.has_more {
            Some(flag) => flag,
            None => count == self.page_size as usize,
        };

        self.store
            .lock()
            .merge_reply_page(self.parent_id, fetched.items, page <= 1);

        let mut state = self.state.lock();
        state.loaded_pages = if page <= 1 {
            1
        } else {
            state.loaded_pages.max(page)
        };
        state.has_more = has_more;

        let _ = self.events_tx.send(ReplyEvent::Loaded {
            parent_id: self.parent_id,
            page,
            count,
            has_more,
        });
        Ok((count, has_more))
    }

    /// Submits a reply, shows the confirmed comment at the front of the
    /// local view right away, then reloads page 1 after a short delay to
    /// pick up server-side ordering and moderation effects.
    pub fn submit(&self, post_id: i64, draft: &CommentDraft) -> Result<Comment> {
        let mut draft = draft.clone();
        draft.parent_id = Some(self.parent_id);
        let confirmed = self
            .service
            .create_comment(post_id, &draft)
            .context("submit reply")?;

        self.store
            .lock()
            .insert_reply_front(self.parent_id, confirmed.clone());

        self.schedule_reconcile();
        Ok(confirmed)
    }

    fn schedule_reconcile(&self) {
        let service = self.service.clone();
        let store = self.store.clone();
        let events_tx = self.events_tx.clone();
        let in_flight = self.in_flight.clone();
        let parent_id = self.parent_id;
        let page_size = self.page_size;
        let delay = self.reload_delay;

        thread::spawn(move || {
            thread::sleep(delay);
            if in_flight
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return;
            }
            let result = service.list_replies(parent_id, 1, page_size);
            let event = match result {
                Ok(fetched) => {
                    let count = fetched.items.len();
                    store.lock().merge_reply_page(parent_id, fetched.items, true);
                    ReplyEvent::Reconciled { parent_id, count }
                }
                Err(err) => ReplyEvent::Failed {
                    parent_id,
                    message: format!("{:#}", err),
                },
            };
            in_flight.store(false, Ordering::SeqCst);
            let _ = events_tx.send(event);
        });
    }
}
