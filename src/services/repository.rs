//! Entity repositories over the key-value store
//!
//! Each repository owns the keys of one entity and nothing else. All reads fall
//! back to seed data for keys that were never written.

use crate::domain::geo::distance_meters;
use crate::domain::records::{
    AttendanceLog, AttendanceState, CheckpointAuditEntry, CheckpointFailure, LeaveRequest,
    Notification, Tour, TrainingSession,
};
use crate::domain::seed;
use crate::domain::types::{Coordinate, Site};
use crate::io::store::{Collection, Document, KeyValueStore, StoreError};
use std::sync::Arc;

pub const ATTENDANCE_STATE_KEY: &str = "attendance_state";
pub const ATTENDANCE_HISTORY_KEY: &str = "attendance_history";
pub const TOURS_KEY: &str = "tours_data";
pub const TRAINING_SESSIONS_KEY: &str = "training_sessions";
pub const LEAVE_REQUESTS_KEY: &str = "leave_requests";
pub const NOTIFICATIONS_KEY: &str = "notifications";
pub const KNOWN_SITES_KEY: &str = "known_sites";
pub const CHECKPOINT_AUDIT_KEY: &str = "checkpoint_audit";
pub const CHECKPOINT_FAILURES_KEY: &str = "checkpoint_failures";

pub struct AttendanceRepository {
    state: Document<AttendanceState>,
    history: Collection<AttendanceLog>,
}

impl AttendanceRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            state: Document::new(store.clone(), ATTENDANCE_STATE_KEY),
            history: Collection::new(store, ATTENDANCE_HISTORY_KEY, Vec::new),
        }
    }

    pub fn state(&self) -> Result<AttendanceState, StoreError> {
        self.state.get()
    }

    pub fn save_state(&self, state: &AttendanceState) -> Result<(), StoreError> {
        self.state.put(state)
    }

    /// Newest first
    pub fn history(&self) -> Result<Vec<AttendanceLog>, StoreError> {
        self.history.get()
    }

    pub fn update_history<R>(
        &self,
        f: impl FnOnce(&mut Vec<AttendanceLog>) -> R,
    ) -> Result<R, StoreError> {
        self.history.update(f)
    }

    pub fn replace_history(&self, history: &[AttendanceLog]) -> Result<(), StoreError> {
        self.history.put(history)
    }
}

pub struct TourRepository {
    tours: Collection<Tour>,
}

impl TourRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { tours: Collection::new(store, TOURS_KEY, seed::tours) }
    }

    pub fn all(&self) -> Result<Vec<Tour>, StoreError> {
        self.tours.get()
    }

    pub fn find(&self, id: &str) -> Result<Option<Tour>, StoreError> {
        Ok(self.all()?.into_iter().find(|t| t.id == id))
    }

    /// New tours go to the front of the list
    pub fn insert(&self, tour: Tour) -> Result<(), StoreError> {
        self.tours.update(|tours| tours.insert(0, tour))
    }

    /// Replace the stored tour with the same id. `false` if it doesn't exist.
    pub fn replace(&self, tour: Tour) -> Result<bool, StoreError> {
        self.tours.update(|tours| match tours.iter_mut().find(|t| t.id == tour.id) {
            Some(slot) => {
                *slot = tour;
                true
            }
            None => false,
        })
    }
}

pub struct TrainingRepository {
    sessions: Collection<TrainingSession>,
}

impl TrainingRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { sessions: Collection::new(store, TRAINING_SESSIONS_KEY, seed::training_sessions) }
    }

    pub fn all(&self) -> Result<Vec<TrainingSession>, StoreError> {
        self.sessions.get()
    }

    pub fn find(&self, id: &str) -> Result<Option<TrainingSession>, StoreError> {
        Ok(self.all()?.into_iter().find(|s| s.id == id))
    }

    pub fn replace(&self, session: TrainingSession) -> Result<bool, StoreError> {
        self.sessions.update(|sessions| match sessions.iter_mut().find(|s| s.id == session.id) {
            Some(slot) => {
                *slot = session;
                true
            }
            None => false,
        })
    }
}

pub struct LeaveRepository {
    requests: Collection<LeaveRequest>,
}

impl LeaveRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { requests: Collection::new(store, LEAVE_REQUESTS_KEY, Vec::new) }
    }

    pub fn all(&self) -> Result<Vec<LeaveRequest>, StoreError> {
        self.requests.get()
    }

    pub fn insert(&self, request: LeaveRequest) -> Result<(), StoreError> {
        self.requests.update(|requests| requests.insert(0, request))
    }
}

pub struct NotificationRepository {
    notifications: Collection<Notification>,
}

impl NotificationRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { notifications: Collection::new(store, NOTIFICATIONS_KEY, seed::notifications) }
    }

    /// Newest first
    pub fn all(&self) -> Result<Vec<Notification>, StoreError> {
        self.notifications.get()
    }

    pub fn push(&self, notification: Notification) -> Result<(), StoreError> {
        self.notifications.update(|list| list.insert(0, notification))
    }

    /// `false` if no notification has that id
    pub fn mark_read(&self, id: &str) -> Result<bool, StoreError> {
        self.notifications.update(|list| match list.iter_mut().find(|n| n.id == id) {
            Some(n) => {
                n.read = true;
                true
            }
            None => false,
        })
    }

    /// Returns how many were unread
    pub fn mark_all_read(&self) -> Result<usize, StoreError> {
        self.notifications.update(|list| {
            let mut changed = 0;
            for n in list.iter_mut().filter(|n| !n.read) {
                n.read = true;
                changed += 1;
            }
            changed
        })
    }

    pub fn unread_count(&self) -> Result<usize, StoreError> {
        Ok(self.all()?.iter().filter(|n| !n.read).count())
    }
}

pub struct SiteRepository {
    sites: Collection<Site>,
}

impl SiteRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { sites: Collection::new(store, KNOWN_SITES_KEY, seed::sites) }
    }

    pub fn all(&self) -> Result<Vec<Site>, StoreError> {
        self.sites.get()
    }

    /// Newly defined sites go first
    pub fn add(&self, site: Site) -> Result<(), StoreError> {
        self.sites.update(|sites| sites.insert(0, site))
    }

    /// Closest known site to `coordinate` and its distance in meters
    pub fn nearest(&self, coordinate: Coordinate) -> Result<Option<(Site, f64)>, StoreError> {
        let nearest = self
            .all()?
            .into_iter()
            .filter(|site| !site.coordinate.is_unset())
            .map(|site| {
                let distance = distance_meters(coordinate, site.coordinate);
                (site, distance)
            })
            .min_by(|a, b| a.1.total_cmp(&b.1));
        Ok(nearest)
    }
}

/// Applied checkpoints and failed attempts, newest last
pub struct AuditRepository {
    entries: Collection<CheckpointAuditEntry>,
    failures: Collection<CheckpointFailure>,
}

impl AuditRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            entries: Collection::new(store.clone(), CHECKPOINT_AUDIT_KEY, Vec::new),
            failures: Collection::new(store, CHECKPOINT_FAILURES_KEY, Vec::new),
        }
    }

    pub fn record(&self, entry: CheckpointAuditEntry) -> Result<(), StoreError> {
        self.entries.update(|entries| entries.push(entry))
    }

    pub fn record_failure(&self, failure: CheckpointFailure) -> Result<(), StoreError> {
        self.failures.update(|failures| failures.push(failure))
    }

    pub fn entries(&self) -> Result<Vec<CheckpointAuditEntry>, StoreError> {
        self.entries.get()
    }

    pub fn failures(&self) -> Result<Vec<CheckpointFailure>, StoreError> {
        self.failures.get()
    }

    /// Checkpoints accepted outside their radius
    pub fn overrides(&self) -> Result<Vec<CheckpointAuditEntry>, StoreError> {
        Ok(self.entries()?.into_iter().filter(|e| e.forced_override).collect())
    }
}

/// All repositories over one store
pub struct Repositories {
    pub attendance: AttendanceRepository,
    pub tours: TourRepository,
    pub training: TrainingRepository,
    pub leave: LeaveRepository,
    pub notifications: NotificationRepository,
    pub sites: SiteRepository,
    pub audit: AuditRepository,
}

impl Repositories {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            attendance: AttendanceRepository::new(store.clone()),
            tours: TourRepository::new(store.clone()),
            training: TrainingRepository::new(store.clone()),
            leave: LeaveRepository::new(store.clone()),
            notifications: NotificationRepository::new(store.clone()),
            sites: SiteRepository::new(store.clone()),
            audit: AuditRepository::new(store),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::records::TourStatus;
    use crate::io::store::MemoryStore;

    fn repos() -> (Arc<MemoryStore>, Repositories) {
        let store = Arc::new(MemoryStore::new());
        let repos = Repositories::new(store.clone());
        (store, repos)
    }

    #[test]
    fn test_reads_fall_back_to_seed() {
        let (store, repos) = repos();
        assert_eq!(repos.tours.all().unwrap().len(), 2);
        assert_eq!(repos.sites.all().unwrap().len(), 3);
        assert!(repos.leave.all().unwrap().is_empty());
        assert_eq!(repos.notifications.unread_count().unwrap(), 1);
        // Reading never writes
        assert!(!store.contains(TOURS_KEY));
    }

    #[test]
    fn test_tour_insert_front_and_replace() {
        let (_store, repos) = repos();
        let mut tour = repos.tours.find("TR-002").unwrap().unwrap();
        tour.id = "TR-999999".to_string();
        repos.tours.insert(tour.clone()).unwrap();
        assert_eq!(repos.tours.all().unwrap()[0].id, "TR-999999");

        tour.status = TourStatus::Completed;
        assert!(repos.tours.replace(tour).unwrap());
        assert_eq!(repos.tours.find("TR-999999").unwrap().unwrap().status, TourStatus::Completed);

        let mut missing = repos.tours.find("TR-001").unwrap().unwrap();
        missing.id = "nope".to_string();
        assert!(!repos.tours.replace(missing).unwrap());
    }

    #[test]
    fn test_notifications_mark_read() {
        let (_store, repos) = repos();
        assert!(repos.notifications.mark_read("n1").unwrap());
        assert!(!repos.notifications.mark_read("missing").unwrap());
        assert_eq!(repos.notifications.unread_count().unwrap(), 0);
        assert_eq!(repos.notifications.mark_all_read().unwrap(), 0);
    }

    #[test]
    fn test_nearest_site() {
        let (_store, repos) = repos();
        let (site, distance) =
            repos.sites.nearest(Coordinate::new(37.7750, -122.4195)).unwrap().unwrap();
        assert_eq!(site.id, "S-001");
        assert!(distance < 20.0);
    }

    #[test]
    fn test_nearest_skips_unset_sites() {
        let (_store, repos) = repos();
        repos
            .sites
            .add(Site {
                id: "S-X".to_string(),
                name: "Nowhere".to_string(),
                category: "Other".to_string(),
                coordinate: Coordinate::UNSET,
            })
            .unwrap();
        let (site, _) = repos.sites.nearest(Coordinate::new(0.0001, 0.0001)).unwrap().unwrap();
        assert_ne!(site.id, "S-X");
    }
}
