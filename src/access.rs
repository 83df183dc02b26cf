//! Collaborator contracts: who may charge at a venue, and who a subject is.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::engine::StoreError;
use crate::model::{StaffId, SubjectId, VenueId};

#[async_trait]
pub trait VenueAuthorizer: Send + Sync {
    /// Whether `staff` holds an operator assignment, an active shift, or an admin role for `venue`.
    async fn is_permitted(&self, staff: &str, venue: &str) -> Result<bool, StoreError>;
}

/// Display information about a subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectProfile {
    pub id: SubjectId,
    pub label: String,
}

#[async_trait]
pub trait SubjectDirectory: Send + Sync {
    async fn profile(&self, subject: &str) -> Result<Option<SubjectProfile>, StoreError>;
}

#[derive(Default)]
struct Relationships {
    operators: HashMap<VenueId, HashSet<StaffId>>,
    shifts: HashMap<VenueId, HashSet<StaffId>>,
    admins: HashSet<StaffId>,
}

/// In-memory staff relationships and subject profiles.
#[derive(Default)]
pub struct InMemoryDirectory {
    relationships: RwLock<Relationships>,
    subjects: RwLock<HashMap<SubjectId, SubjectProfile>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn assign_operator(&self, staff: impl Into<StaffId>, venue: impl Into<VenueId>) {
        let mut rel = self.relationships.write().await;
        rel.operators
            .entry(venue.into())
            .or_default()
            .insert(staff.into());
    }

    pub async fn start_shift(&self, staff: impl Into<StaffId>, venue: impl Into<VenueId>) {
        let mut rel = self.relationships.write().await;
        rel.shifts.entry(venue.into()).or_default().insert(staff.into());
    }

    pub async fn end_shift(&self, staff: &str, venue: &str) {
        let mut rel = self.relationships.write().await;
        if let Some(on_shift) = rel.shifts.get_mut(venue) {
            on_shift.remove(staff);
        }
    }

    pub async fn grant_admin(&self, staff: impl Into<StaffId>) {
        self.relationships.write().await.admins.insert(staff.into());
    }

    pub async fn register_subject(&self, id: impl Into<SubjectId>, label: impl Into<String>) {
        let id = id.into();
        let profile = SubjectProfile {
            id: id.clone(),
            label: label.into(),
        };
        self.subjects.write().await.insert(id, profile);
    }
}

#[async_trait]
impl VenueAuthorizer for InMemoryDirectory {
    async fn is_permitted(&self, staff: &str, venue: &str) -> Result<bool, StoreError> {
        let rel = self.relationships.read().await;
        let holds = |map: &HashMap<VenueId, HashSet<StaffId>>| {
            map.get(venue).is_some_and(|set| set.contains(staff))
        };
        Ok(rel.admins.contains(staff) || holds(&rel.operators) || holds(&rel.shifts))
    }
}

#[async_trait]
impl SubjectDirectory for InMemoryDirectory {
    async fn profile(&self, subject: &str) -> Result<Option<SubjectProfile>, StoreError> {
        Ok(self.subjects.read().await.get(subject).cloned())
    }
}
