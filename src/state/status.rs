/// Per-category fetch lifecycle with change listeners
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::types::{Category, FetchState};

/// Called after every transition, outside the registry lock
pub type ChangeListener = Arc<dyn Fn() -> Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryStatus {
    pub state: FetchState,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Point-in-time copy of the registry
#[derive(Debug, Clone, PartialEq)]
pub struct StatusView {
    pub categories: BTreeMap<Category, CategoryStatus>,
    pub last_error: Option<String>,
    pub waiting_for_login: bool,
    pub login_url: Option<String>,
}

impl StatusView {
    pub fn get(&self, category: Category) -> CategoryStatus {
        self.categories.get(&category).copied().unwrap_or(CategoryStatus {
            state: FetchState::Updated,
            last_updated: None,
        })
    }
}

struct StatusInner {
    categories: BTreeMap<Category, CategoryStatus>,
    last_error: Option<String>,
    waiting_for_login: bool,
    login_url: Option<String>,
}

pub struct StatusRegistry {
    inner: RwLock<StatusInner>,
    listeners: RwLock<Vec<ChangeListener>>,
}

impl Default for StatusRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusRegistry {
    /// Portfolio starts as `updating` because an initial refresh is queued at startup
    pub fn new() -> Self {
        let categories = Category::ALL
            .iter()
            .map(|c| {
                let state = if *c == Category::Portfolio {
                    FetchState::Updating
                } else {
                    FetchState::Updated
                };
                (
                    *c,
                    CategoryStatus {
                        state,
                        last_updated: None,
                    },
                )
            })
            .collect();

        StatusRegistry {
            inner: RwLock::new(StatusInner {
                categories,
                last_error: None,
                waiting_for_login: false,
                login_url: None,
            }),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn add_change_listener(&self, listener: ChangeListener) {
        self.listeners.write().push(listener);
    }

    pub fn set_updating(&self, category: Category, error: Option<&str>) {
        {
            let mut inner = self.inner.write();
            if let Some(entry) = inner.categories.get_mut(&category) {
                entry.state = FetchState::Updating;
            }
            if let Some(err) = error {
                inner.last_error = Some(err.to_string());
            }
        }
        debug!("{} -> updating", category);
        self.notify();
    }

    /// Finish a fetch. An error keeps the previous `last_updated` so consumers can
    /// tell last-known-good data from fresh data.
    pub fn set_updated(&self, category: Category, error: Option<&str>) {
        self.set_updated_at(category, error, Utc::now());
    }

    pub fn set_updated_at(&self, category: Category, error: Option<&str>, now: DateTime<Utc>) {
        {
            let mut inner = self.inner.write();
            match error {
                Some(err) => {
                    if let Some(entry) = inner.categories.get_mut(&category) {
                        entry.state = FetchState::Error;
                    }
                    inner.last_error = Some(err.to_string());
                }
                None => {
                    if let Some(entry) = inner.categories.get_mut(&category) {
                        entry.state = FetchState::Updated;
                        entry.last_updated = Some(now);
                    }
                    if category == Category::Portfolio {
                        inner.last_error = None;
                        inner.waiting_for_login = false;
                        inner.login_url = None;
                    }
                }
            }
        }
        match error {
            Some(err) => info!("{} -> error: {}", category, err),
            None => debug!("{} -> updated", category),
        }
        self.notify();
    }

    /// Flag an interactive login in progress; the URL is shown to the user
    pub fn set_waiting_for_login(&self, waiting: bool, login_url: Option<String>) {
        {
            let mut inner = self.inner.write();
            inner.waiting_for_login = waiting;
            inner.login_url = if waiting { login_url } else { None };
        }
        self.notify();
    }

    /// Re-publish the current state without changing it
    pub fn touch(&self) {
        self.notify();
    }

    pub fn is_any_running(&self) -> bool {
        self.inner
            .read()
            .categories
            .values()
            .any(|s| s.state == FetchState::Updating)
    }

    pub fn is_running(&self, category: Category) -> bool {
        self.get(category).state == FetchState::Updating
    }

    pub fn get(&self, category: Category) -> CategoryStatus {
        self.snapshot().get(category)
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.read().last_error.clone()
    }

    pub fn waiting_for_login(&self) -> bool {
        self.inner.read().waiting_for_login
    }

    pub fn snapshot(&self) -> StatusView {
        let inner = self.inner.read();
        StatusView {
            categories: inner.categories.clone(),
            last_error: inner.last_error.clone(),
            waiting_for_login: inner.waiting_for_login,
            login_url: inner.login_url.clone(),
        }
    }

    fn notify(&self) {
        let listeners: Vec<ChangeListener> = self.listeners.read().clone();
        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener())) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Status listener failed: {} ({})", e, e.error_code()),
                Err(_) => error!("Status listener panicked"),
            }
        }
    }
}
