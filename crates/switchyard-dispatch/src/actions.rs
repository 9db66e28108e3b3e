//! Action table.
//!
//! Associates an integer discriminator (the "action" field of an inbound
//! message) with the callback that handles it.  Backed by [`DashMap`], so it
//! can be shared across connection tasks without a global lock.
//!
//! # Example
//!
//! ```rust
//! # use switchyard_dispatch::ActionTable;
//! let table = ActionTable::new();
//! table.add_action(1, || println!("ping")).unwrap();
//!
//! assert!(table.contains(1));
//! assert!(table.add_action(1, || {}).is_err());
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::{DispatchError, Result};

/// Discriminator carried by inbound messages.
pub type ActionKey = i64;

/// A registered callback.  Shared so that every dispatch gets its own handle.
pub type Action = Arc<dyn Fn() + Send + Sync + 'static>;

/// Concurrent action registry.
///
/// Cheaply cloneable (`Arc`-backed); clones share the same table.
#[derive(Clone, Default)]
pub struct ActionTable {
    inner: Arc<DashMap<ActionKey, Action>>,
}

impl ActionTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `action` under `key`.  Fails if the key is taken.
    pub fn add_action<F>(&self, key: ActionKey, action: F) -> Result<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.insert_new(key, Arc::new(action))
    }

    /// Register several actions at once.
    ///
    /// Every key is checked before anything is inserted, so a conflict with
    /// an existing key leaves the table unchanged.  If a concurrent writer
    /// claims one of the keys mid-batch, the actions this call already
    /// inserted are removed again before the error is returned; other
    /// threads may observe them briefly.
    pub fn add_actions(&self, actions: HashMap<ActionKey, Action>) -> Result<()> {
        if let Some(key) = actions.keys().find(|key| self.inner.contains_key(*key)) {
            return Err(DispatchError::ActionExists { key: *key });
        }

        let mut inserted: Vec<(ActionKey, Action)> = Vec::with_capacity(actions.len());
        for (key, action) in actions {
            if let Err(err) = self.insert_new(key, Arc::clone(&action)) {
                for (key, action) in inserted {
                    // Only undo entries that still hold the action we inserted.
                    self.inner
                        .remove_if(&key, |_, current| Arc::ptr_eq(current, &action));
                }
                tracing::warn!(action = key, "batch registration rolled back");
                return Err(err);
            }
            inserted.push((key, action));
        }
        Ok(())
    }

    /// Remove and return the action under `key`.
    pub fn remove_action(&self, key: ActionKey) -> Result<Action> {
        let (_, action) = self
            .inner
            .remove(&key)
            .ok_or(DispatchError::ActionNotFound { key })?;

        tracing::info!(action = key, "action removed");
        Ok(action)
    }

    /// Remove several actions, returned in the order of `keys`.
    ///
    /// Every key is checked first, so a key that is already missing removes
    /// nothing.  If a concurrent writer removes one of the keys mid-batch, the
    /// actions this call already removed are put back (unless the key was
    /// re-registered meanwhile) before the error is returned.
    pub fn remove_actions(&self, keys: &[ActionKey]) -> Result<Vec<Action>> {
        if let Some(key) = keys.iter().find(|key| !self.inner.contains_key(*key)) {
            return Err(DispatchError::ActionNotFound { key: *key });
        }

        let mut removed = Vec::with_capacity(keys.len());
        for &key in keys {
            match self.remove_action(key) {
                Ok(action) => removed.push((key, action)),
                Err(err) => {
                    for (key, action) in removed {
                        self.inner.entry(key).or_insert(action);
                    }
                    tracing::warn!(action = key, "batch removal rolled back");
                    return Err(err);
                }
            }
        }
        Ok(removed.into_iter().map(|(_, action)| action).collect())
    }

    /// Replace the action under an existing `key`.
    pub fn set_action<F>(&self, key: ActionKey, action: F) -> Result<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut entry = self
            .inner
            .get_mut(&key)
            .ok_or(DispatchError::ActionNotFound { key })?;
        *entry = Arc::new(action);

        tracing::debug!(action = key, "action replaced");
        Ok(())
    }

    /// Look up the action under `key`.
    pub fn get(&self, key: ActionKey) -> Result<Action> {
        self.inner
            .get(&key)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(DispatchError::ActionNotFound { key })
    }

    /// `true` if an action is registered under `key`.
    pub fn contains(&self, key: ActionKey) -> bool {
        self.inner.contains_key(&key)
    }

    /// Registered keys, sorted ascending.
    pub fn keys(&self) -> Vec<ActionKey> {
        let mut keys: Vec<_> = self.inner.iter().map(|e| *e.key()).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn insert_new(&self, key: ActionKey, action: Action) -> Result<()> {
        match self.inner.entry(key) {
            Entry::Occupied(_) => Err(DispatchError::ActionExists { key }),
            Entry::Vacant(slot) => {
                slot.insert(action);
                tracing::info!(action = key, "action registered");
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for ActionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionTable")
            .field("keys", &self.keys())
            .finish()
    }
}
