use crate::numbers::TicketSelection;
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
    },
};
use tracing::warn;

pub const SUBMITTED_NUMBERS_KEY: &str = "lotto_submitted_numbers";

/// Key-value storage that lives exactly as long as one client session.
pub trait SessionStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    fn set_item(&mut self, key: &str, value: String) -> Result<()>;

    /// Removing a missing key is not an error.
    fn remove_item(&mut self, key: &str) -> Result<()>;
}

#[derive(Clone, Default)]
pub struct InMemorySessionStorage {
    items: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> Arc<Mutex<HashMap<String, String>>> {
        self.items.clone()
    }
}

impl SessionStorage for InMemorySessionStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let guard = self
            .items
            .lock()
            .map_err(|_| eyre!("session storage poisoned"))?;
        Ok(guard.get(key).cloned())
    }

    fn set_item(&mut self, key: &str, value: String) -> Result<()> {
        let mut guard = self
            .items
            .lock()
            .map_err(|_| eyre!("session storage poisoned"))?;
        guard.insert(key.to_string(), value);
        Ok(())
    }

    fn remove_item(&mut self, key: &str) -> Result<()> {
        let mut guard = self
            .items
            .lock()
            .map_err(|_| eyre!("session storage poisoned"))?;
        guard.remove(key);
        Ok(())
    }
}

/// Remembers the last submitted ticket so it can be matched against the draw
/// that settles it. The ledger cannot answer "what did I last buy".
pub struct TicketCache<S> {
    storage: S,
}

impl<S: SessionStorage> TicketCache<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn save(&mut self, selection: &TicketSelection) -> Result<()> {
        let payload = serde_json::to_string(selection.numbers())
            .wrap_err("failed to serialize ticket")?;
        self.storage.set_item(SUBMITTED_NUMBERS_KEY, payload)
    }

    /// Stored ticket, or `None` when absent. A payload that no longer parses
    /// as a valid ticket is treated as absent.
    pub fn load(&self) -> Result<Option<TicketSelection>> {
        let Some(raw) = self.storage.get_item(SUBMITTED_NUMBERS_KEY)? else {
            return Ok(None);
        };
        let numbers: Vec<u32> = match serde_json::from_str(&raw) {
            Ok(numbers) => numbers,
            Err(err) => {
                warn!(?err, "ignoring unreadable cached ticket");
                return Ok(None);
            }
        };
        match TicketSelection::new(&numbers) {
            Ok(selection) => Ok(Some(selection)),
            Err(err) => {
                warn!(%err, ?numbers, "ignoring invalid cached ticket");
                Ok(None)
            }
        }
    }

    pub fn clear(&mut self) -> Result<()> {
        self.storage.remove_item(SUBMITTED_NUMBERS_KEY)
    }

    /// Clears the cache only if it still holds `resolved`. Returns whether an
    /// entry was removed. A ticket saved after `resolved` was loaded survives.
    pub fn clear_resolved(&mut self, resolved: &TicketSelection) -> Result<bool> {
        match self.load()? {
            Some(current) if current == *resolved => {
                self.clear()?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
