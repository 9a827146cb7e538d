//! Deleting toots past a certain age.
//!
//! Walks the account's statuses backwards, one page at a time, until the
//! server returns an empty page. Pages are not assumed to be sorted by age,
//! so every page is visited even once old statuses start showing up.

use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::thread::sleep;
use std::time::{Duration, Instant};

use chrono::Utc;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tracing::{debug, info};

use crate::api::Api;
use crate::error::Result;
use crate::toot::{self, ListStatuses, Status};

const PAGE_SIZE: u32 = 40;

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ExpireReport {
    pub pages: usize,
    pub deleted: Vec<String>,
}

enum State {
    Fetching { max_id: String },
    Evaluating { page: VecDeque<Status>, next_max_id: String },
    Deleting { id: String, page: VecDeque<Status>, next_max_id: String },
    Done,
}

pub(crate) struct Expire {
    max_age: Duration,
    pacing: Option<DefaultDirectRateLimiter>,
    dry_run: bool,
}

impl Expire {
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            pacing: None,
            dry_run: false,
        }
    }

    /// Reports what would be deleted without deleting anything.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Spaces deletions out to at most `per_minute`.
    pub fn paced(mut self, per_minute: NonZeroU32) -> Self {
        self.pacing = Some(RateLimiter::direct(Quota::per_minute(per_minute)));
        self
    }

    fn is_expired(&self, status: &Status) -> bool {
        let Some(created_at) = status.created_at else {
            return false;
        };
        let age = Utc::now().signed_duration_since(created_at);
        age.to_std().is_ok_and(|age| age >= self.max_age)
    }

    /// Deletes every status of the authenticated account older than the
    /// maximum age. `on_delete` sees each id right after its deletion. The
    /// first failure stops the run.
    pub fn run<F>(&self, api: &Api, mut on_delete: F) -> Result<ExpireReport>
    where
        F: FnMut(&str),
    {
        let account_id = api.verify_credentials()?;
        let mut report = ExpireReport::default();
        let mut state = State::Fetching {
            max_id: String::new(),
        };
        loop {
            state = match state {
                State::Fetching { max_id } => {
                    let page = ListStatuses {
                        max_id,
                        limit: PAGE_SIZE,
                        ..Default::default()
                    }
                    .for_account(api, &account_id)?;
                    if page.is_empty() {
                        State::Done
                    } else {
                        report.pages += 1;
                        let next_max_id = page
                            .last()
                            .and_then(|s| s.id.clone())
                            .unwrap_or_default();
                        State::Evaluating {
                            page: page.into(),
                            next_max_id,
                        }
                    }
                }
                State::Evaluating {
                    mut page,
                    next_max_id,
                } => match page.pop_front() {
                    Some(status) if self.is_expired(&status) => match status.id {
                        Some(id) => State::Deleting {
                            id,
                            page,
                            next_max_id,
                        },
                        None => State::Evaluating { page, next_max_id },
                    },
                    Some(_) => State::Evaluating { page, next_max_id },
                    None if next_max_id.is_empty() => State::Done,
                    None => State::Fetching {
                        max_id: next_max_id,
                    },
                },
                State::Deleting {
                    id,
                    page,
                    next_max_id,
                } => {
                    if self.dry_run {
                        debug!(id = %id, "would delete");
                    } else {
                        if let Some(pacing) = &self.pacing {
                            wait_until(pacing);
                        }
                        toot::delete(api, &id)?;
                    }
                    on_delete(&id);
                    report.deleted.push(id);
                    State::Evaluating { page, next_max_id }
                }
                State::Done => break,
            };
        }
        debug!(pages = report.pages, "reached the end of the timeline");
        info!(
            app = api.app_name(),
            deleted = report.deleted.len(),
            "expired old statuses"
        );
        Ok(report)
    }
}

fn wait_until(lim: &DefaultDirectRateLimiter) {
    while let Err(e) = lim.check() {
        sleep(e.wait_time_from(Instant::now()));
    }
}
