//! In-memory collaborators for tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use rocket::futures::stream::{self, BoxStream, StreamExt};
use rocket::serde::json::Value;

use super::{
    DocumentMetadata, DocumentStorage, MemberFilter, MembershipDirectory, Notifier, TemplateKind,
};
use crate::error::{Error, Result};
use crate::model::{common::voter::VoterSnapshot, db::document::DocumentRef, mongodb::Id};

/// A membership directory over a fixed set of members.
#[derive(Default)]
pub struct MemoryDirectory {
    members: HashMap<Id, VoterSnapshot>,
    /// Lookups of these members fail as if the directory were unreachable.
    failing: HashSet<Id>,
    /// Lookups of these members never complete.
    hanging: HashSet<Id>,
    /// Every lookup takes at least this long.
    delay: Option<Duration>,
}

impl MemoryDirectory {
    pub fn new(members: impl IntoIterator<Item = VoterSnapshot>) -> Self {
        Self {
            members: members.into_iter().map(|m| (m.id, m)).collect(),
            ..Default::default()
        }
    }

    pub fn failing_for(mut self, member: Id) -> Self {
        self.failing.insert(member);
        self
    }

    pub fn hanging_for(mut self, member: Id) -> Self {
        self.hanging.insert(member);
        self
    }

    pub fn delayed_by(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[rocket::async_trait]
impl MembershipDirectory for MemoryDirectory {
    async fn voter_snapshot(&self, voter: Id) -> Result<Option<VoterSnapshot>> {
        if let Some(delay) = self.delay {
            rocket::tokio::time::sleep(delay).await;
        }
        if self.failing.contains(&voter) {
            return Err(Error::Dependency("directory offline".to_string()));
        }
        if self.hanging.contains(&voter) {
            rocket::futures::future::pending::<()>().await;
        }
        Ok(self.members.get(&voter).cloned())
    }

    async fn verified_members(
        &self,
        filter: MemberFilter,
    ) -> Result<BoxStream<'static, Result<VoterSnapshot>>> {
        let members: Vec<_> = self
            .members
            .values()
            .filter(|m| m.verified && filter.matches(m))
            .cloned()
            .map(Ok)
            .collect();
        Ok(stream::iter(members).boxed())
    }
}

/// Document storage held in a map.
#[derive(Default)]
pub struct MemoryStorage {
    documents: Mutex<HashMap<Id, Vec<u8>>>,
    released: Mutex<Vec<Id>>,
    /// Stores fail once this many documents are held.
    capacity: Option<usize>,
    /// Every store takes at least this long.
    delay: Option<Duration>,
}

impl MemoryStorage {
    pub fn full_after(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Default::default()
        }
    }

    pub fn delayed_by(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn stored(&self) -> usize {
        self.documents.lock().unwrap().len()
    }

    pub fn released(&self) -> Vec<Id> {
        self.released.lock().unwrap().clone()
    }
}

#[rocket::async_trait]
impl DocumentStorage for MemoryStorage {
    async fn store(&self, bytes: Vec<u8>, metadata: DocumentMetadata) -> Result<DocumentRef> {
        if let Some(delay) = self.delay {
            rocket::tokio::time::sleep(delay).await;
        }
        let mut documents = self.documents.lock().unwrap();
        if self.capacity.map_or(false, |capacity| documents.len() >= capacity) {
            return Err(Error::Dependency("storage full".to_string()));
        }
        let handle = Id::new();
        documents.insert(handle, bytes);
        Ok(DocumentRef {
            handle,
            kind: metadata.kind,
            filename: metadata.filename,
            content_type: metadata.content_type,
        })
    }

    async fn release(&self, document: &DocumentRef) -> Result<()> {
        self.documents.lock().unwrap().remove(&document.handle);
        self.released.lock().unwrap().push(document.handle);
        Ok(())
    }

    async fn fetch(&self, document: &DocumentRef) -> Result<BoxStream<'static, Result<Vec<u8>>>> {
        let bytes = self
            .documents
            .lock()
            .unwrap()
            .get(&document.handle)
            .cloned()
            .ok_or_else(|| Error::not_found("Document", document.handle))?;
        Ok(stream::iter([Ok(bytes)]).boxed())
    }
}

/// A notifier that remembers what it was asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(Vec<Id>, TemplateKind, Value)>>,
    failing: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<(Vec<Id>, TemplateKind, Value)> {
        self.sent.lock().unwrap().clone()
    }
}

#[rocket::async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, recipients: Vec<Id>, kind: TemplateKind, context: Value) -> Result<()> {
        if self.failing {
            return Err(Error::Dependency("notifier offline".to_string()));
        }
        self.sent.lock().unwrap().push((recipients, kind, context));
        Ok(())
    }
}
