/// Serialized status snapshot pushed to dashboard clients
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::state::StatusView;
use crate::time::{format_timestamp, is_market_open_at};
use crate::types::Category;

/// Wire shape of `GET /status` and of every SSE message.
///
/// Each category contributes `<category>_state` and `<category>_last_updated`
/// keys at the top level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub last_error: Option<String>,
    pub market_open: bool,
    pub session_validity: BTreeMap<String, bool>,
    pub waiting_for_login: bool,
    pub login_url: Option<String>,
    #[serde(flatten)]
    pub categories: BTreeMap<String, Option<String>>,
}

impl StatusSnapshot {
    pub fn capture(
        view: &StatusView,
        session_validity: BTreeMap<String, bool>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut categories = BTreeMap::new();
        for category in Category::ALL {
            let status = view.get(category);
            categories.insert(
                format!("{}_state", category.as_str()),
                Some(status.state.as_str().to_string()),
            );
            categories.insert(
                format!("{}_last_updated", category.as_str()),
                format_timestamp(status.last_updated),
            );
        }

        StatusSnapshot {
            last_error: view.last_error.clone(),
            market_open: is_market_open_at(now),
            session_validity,
            waiting_for_login: view.waiting_for_login,
            login_url: view.login_url.clone(),
            categories,
        }
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
