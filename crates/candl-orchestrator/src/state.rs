use std::fmt;
use std::str::FromStr;

use candl_core::Symbol;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::store::LocalStore;

pub(crate) const KEY_LAST_SYMBOL: &str = "last_symbol";
pub(crate) const KEY_THEME: &str = "theme";
pub(crate) const KEY_WATCHLIST: &str = "watchlist";
pub(crate) const KEY_TIPS_VISIBLE: &str = "tips_visible";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Theme::Dark => f.write_str("dark"),
            Theme::Light => f.write_str("light"),
        }
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dark" => Ok(Theme::Dark),
            "light" => Ok(Theme::Light),
            other => Err(format!("unknown theme: {}", other)),
        }
    }
}

/// Process-wide UI state. Owned by the coordinator and only changed through
/// its entry points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    pub last_symbol: Option<Symbol>,
    pub theme: Theme,
    pub watchlist: Vec<Symbol>,
    pub tips_visible: bool,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            last_symbol: None,
            theme: Theme::Dark,
            watchlist: Vec::new(),
            tips_visible: true,
        }
    }
}

impl AppState {
    /// Load from the store; each missing or unreadable key falls back to its default.
    pub async fn load(store: Option<&LocalStore>) -> Self {
        let mut state = Self::default();
        let Some(store) = store else {
            return state;
        };

        if let Some(sym) = read_key::<Symbol>(store, KEY_LAST_SYMBOL).await {
            state.last_symbol = Some(sym);
        }
        if let Some(theme) = read_key::<Theme>(store, KEY_THEME).await {
            state.theme = theme;
        }
        if let Some(list) = read_key::<Vec<Symbol>>(store, KEY_WATCHLIST).await {
            for sym in list {
                state.add_watch(sym);
            }
        }
        if let Some(visible) = read_key::<bool>(store, KEY_TIPS_VISIBLE).await {
            state.tips_visible = visible;
        }

        state
    }

    /// Append if absent. Returns whether the list changed.
    pub fn add_watch(&mut self, symbol: Symbol) -> bool {
        if self.watchlist.contains(&symbol) {
            return false;
        }
        self.watchlist.push(symbol);
        true
    }

    pub fn remove_watch(&mut self, symbol: &Symbol) -> bool {
        let before = self.watchlist.len();
        self.watchlist.retain(|s| s != symbol);
        self.watchlist.len() != before
    }
}

async fn read_key<T: DeserializeOwned>(store: &LocalStore, key: &str) -> Option<T> {
    match store.get_json::<T>(key).await {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Ignoring unreadable '{}' in local store: {}", key, e);
            None
        }
    }
}

/// Best-effort write of one state key; failures are logged.
pub(crate) async fn persist<T: Serialize + ?Sized>(store: Option<&LocalStore>, key: &str, value: &T) {
    if let Some(store) = store {
        if let Err(e) = store.put_json(key, value).await {
            tracing::warn!("Failed to persist '{}': {}", key, e);
        }
    }
}

/// Fire-and-forget variant for callers holding the session lock.
pub(crate) fn persist_in_background<T>(store: Option<&LocalStore>, key: &'static str, value: T)
where
    T: Serialize + Send + Sync + 'static,
{
    let Some(store) = store.cloned() else {
        return;
    };
    tokio::spawn(async move {
        persist(Some(&store), key, &value).await;
    });
}
