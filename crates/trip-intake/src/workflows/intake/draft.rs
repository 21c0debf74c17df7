use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::domain::{ApplicantId, TripId};

/// Raw field name -> value pairs submitted for one section.
pub type Answers = BTreeMap<String, String>;

/// Merged answers for one (trip, applicant) pair.
///
/// Keys only ever accumulate; the sole way to shrink a draft is to clear it from
/// the store once the application record is durable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Draft(BTreeMap<String, String>);

impl Draft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.0
    }
}

impl From<BTreeMap<String, String>> for Draft {
    fn from(value: BTreeMap<String, String>) -> Self {
        Self(value)
    }
}

impl FromIterator<(String, String)> for Draft {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Storage key scoping a draft to one applicant's session for one trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DraftKey {
    pub trip_id: TripId,
    pub applicant_id: ApplicantId,
}

impl DraftKey {
    pub fn new(trip_id: TripId, applicant_id: ApplicantId) -> Self {
        Self {
            trip_id,
            applicant_id,
        }
    }
}

impl fmt::Display for DraftKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tripApplication:{}:{}", self.trip_id, self.applicant_id)
    }
}

/// Durable per-session store for in-progress answers.
#[async_trait]
pub trait DraftStore: Send + Sync {
    async fn get(&self, key: &DraftKey) -> Result<Option<Draft>, DraftStoreError>;
    async fn set(&self, key: &DraftKey, draft: &Draft) -> Result<(), DraftStoreError>;
    async fn clear(&self, key: &DraftKey) -> Result<(), DraftStoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DraftStoreError {
    #[error("stored draft for {key} could not be read: {reason}")]
    Corrupt { key: String, reason: String },
    #[error("draft store unavailable: {0}")]
    Unavailable(String),
}

/// Process-local draft store holding serialized drafts, the way browser storage would.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDraftStore {
    entries: Arc<Mutex<HashMap<DraftKey, String>>>,
}

impl InMemoryDraftStore {
    /// Write a raw payload, bypassing serialization. Used to seed fixtures.
    pub fn put_raw(&self, key: DraftKey, payload: impl Into<String>) {
        self.entries
            .lock()
            .expect("draft store mutex poisoned")
            .insert(key, payload.into());
    }

    pub fn contains(&self, key: &DraftKey) -> bool {
        self.entries
            .lock()
            .expect("draft store mutex poisoned")
            .contains_key(key)
    }
}

#[async_trait]
impl DraftStore for InMemoryDraftStore {
    async fn get(&self, key: &DraftKey) -> Result<Option<Draft>, DraftStoreError> {
        let raw = {
            let guard = self.entries.lock().expect("draft store mutex poisoned");
            guard.get(key).cloned()
        };

        raw.map(|payload| {
            serde_json::from_str(&payload).map_err(|err| DraftStoreError::Corrupt {
                key: key.to_string(),
                reason: err.to_string(),
            })
        })
        .transpose()
    }

    async fn set(&self, key: &DraftKey, draft: &Draft) -> Result<(), DraftStoreError> {
        let payload = serde_json::to_string(draft)
            .map_err(|err| DraftStoreError::Unavailable(err.to_string()))?;
        self.entries
            .lock()
            .expect("draft store mutex poisoned")
            .insert(key.clone(), payload);
        Ok(())
    }

    async fn clear(&self, key: &DraftKey) -> Result<(), DraftStoreError> {
        self.entries
            .lock()
            .expect("draft store mutex poisoned")
            .remove(key);
        Ok(())
    }
}
