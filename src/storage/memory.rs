//! In-memory [`CounterStore`] with failure injection, for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use super::{CounterObject, CounterStore, StoreError, WriteCondition};

#[derive(Debug)]
struct Versioned {
    body: Vec<u8>,
    version: u64,
}

impl Versioned {
    fn etag(&self) -> String {
        format!("\"{}\"", self.version)
    }
}

#[derive(Debug, Default)]
struct State {
    objects: HashMap<(String, String), Versioned>,
    fail_reads: bool,
    fail_writes: bool,
    lose_write_acks: bool,
    hide_etags: bool,
    /// Body written by a simulated competitor right before each of the next
    /// `competing_writes.1` puts.
    competing_writes: Option<(Vec<u8>, u32)>,
    puts: usize,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(bucket: &str, key: &str, body: &[u8]) -> Self {
        let store = Self::new();
        store.insert(bucket, key, body);
        store
    }

    pub fn insert(&self, bucket: &str, key: &str, body: &[u8]) {
        let mut state = self.state.lock().unwrap();
        let id = (bucket.to_string(), key.to_string());
        let version = state.objects.get(&id).map_or(1, |o| o.version + 1);
        state.objects.insert(
            id,
            Versioned {
                body: body.to_vec(),
                version,
            },
        );
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.body.clone())
    }

    /// Make every read and existence check fail.
    pub fn fail_reads(&self) {
        self.state.lock().unwrap().fail_reads = true;
    }

    /// Make every write fail without touching the stored object.
    pub fn fail_writes(&self) {
        self.state.lock().unwrap().fail_writes = true;
    }

    /// Apply writes but report them as failed, as when the response is lost
    /// after the store committed.
    pub fn lose_write_acks(&self) {
        self.state.lock().unwrap().lose_write_acks = true;
    }

    /// Serve reads without an entity tag, like a store that does not version
    /// its objects.
    pub fn hide_etags(&self) {
        self.state.lock().unwrap().hide_etags = true;
    }

    pub fn heal(&self) {
        let mut state = self.state.lock().unwrap();
        state.fail_reads = false;
        state.fail_writes = false;
        state.lose_write_acks = false;
    }

    /// Have another writer store `body` right before each of the next `times`
    /// writes.
    pub fn race_next_writes(&self, body: &[u8], times: u32) {
        self.state.lock().unwrap().competing_writes = Some((body.to_vec(), times));
    }

    pub fn put_count(&self) -> usize {
        self.state.lock().unwrap().puts
    }
}

fn injected(operation: &'static str, bucket: &str, key: &str) -> StoreError {
    StoreError::request(operation, bucket, key, "injected failure")
}

#[async_trait::async_trait]
impl CounterStore for MemoryStore {
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(injected("ListObjectsV2", bucket, key));
        }
        Ok(state
            .objects
            .contains_key(&(bucket.to_string(), key.to_string())))
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<CounterObject, StoreError> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(injected("GetObject", bucket, key));
        }
        state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| CounterObject {
                body: o.body.clone(),
                etag: (!state.hide_etags).then(|| o.etag()),
            })
            .ok_or_else(|| StoreError::not_found(bucket, key))
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        condition: WriteCondition,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.puts += 1;
        if state.fail_writes {
            return Err(injected("PutObject", bucket, key));
        }

        let id = (bucket.to_string(), key.to_string());

        if let Some((competitor, remaining)) = state.competing_writes.take() {
            let version = state.objects.get(&id).map_or(1, |o| o.version + 1);
            state.objects.insert(
                id.clone(),
                Versioned {
                    body: competitor.clone(),
                    version,
                },
            );
            if remaining > 1 {
                state.competing_writes = Some((competitor, remaining - 1));
            }
        }

        let current = state.objects.get(&id);
        let accepted = match &condition {
            WriteCondition::Unconditional => true,
            WriteCondition::IfAbsent => current.is_none(),
            WriteCondition::IfMatch(etag) => current.is_some_and(|o| &o.etag() == etag),
        };
        if !accepted {
            return Err(StoreError::precondition_failed(bucket, key));
        }

        let version = current.map_or(1, |o| o.version + 1);
        state.objects.insert(id, Versioned { body, version });

        if state.lose_write_acks {
            return Err(injected("PutObject", bucket, key));
        }
        Ok(())
    }
}
