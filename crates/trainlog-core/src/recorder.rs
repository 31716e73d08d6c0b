//! Translation of training events into denormalized log rows.
//!
//! An `EventRecorder` wraps the cache for one request. Each recorded event
//! resolves its entity, region, session, collection and user snapshot rows
//! through the cache, then counts a view on the matching log and
//! log_history rows.

use crate::bucket::Bucket;
use crate::cache::LogRecordCache;
use crate::error::{LogStoreError, Result};
use crate::record::{Fields, RecordKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

/// The training session an event happened in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRef {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub shortname: String,
}

/// Profile of the acting user at the time of the event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub region: Option<String>,
}

/// A structured event as supplied by the host application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingEvent {
    pub eventname: String,
    pub component: String,
    pub action: String,
    pub target: String,
    #[serde(default)]
    pub crud: String,
    pub contextinstanceid: i64,
    pub userid: i64,
    pub timecreated: DateTime<Utc>,
    /// Name of the organizational unit the event belongs to.
    #[serde(default)]
    pub entity: Option<String>,
    #[serde(default)]
    pub session: Option<SessionRef>,
    /// Name of the training collection, if any.
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub user: UserProfile,
}

/// Row ids touched by one recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedIds {
    pub entity: i64,
    pub region: Option<i64>,
    pub session: Option<i64>,
    pub collection: Option<i64>,
    pub user: i64,
    pub log: i64,
    pub log_history: i64,
}

/// Totals for one finished request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSummary {
    pub events: usize,
    pub cached_entries: usize,
}

/// Writes events through one request's cache.
pub struct EventRecorder {
    cache: LogRecordCache,
    events: usize,
}

impl EventRecorder {
    pub fn new(cache: LogRecordCache) -> Self {
        Self { cache, events: 0 }
    }

    pub fn cache(&self) -> &LogRecordCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut LogRecordCache {
        &mut self.cache
    }

    /// Store one event, reusing every row this request already knows.
    pub fn record(&mut self, event: &TrainingEvent) -> Result<RecordedIds> {
        if event.eventname.is_empty() {
            return Err(LogStoreError::contract(Bucket::Log, "event has no name"));
        }
        let entity_name = event
            .entity
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| LogStoreError::contract(Bucket::Entity, "event has no entity"))?;

        let entity = self
            .cache
            .get_or_create_record(Bucket::Entity, entity_name, named(entity_name))?;

        let region = match event.user.region.as_deref().filter(|r| !r.is_empty()) {
            Some(name) => Some(
                self.cache
                    .get_or_create_record(Bucket::Region, name, named(name))?,
            ),
            None => None,
        };

        let session = match &event.session {
            Some(session) => Some(self.cache.get_or_create_record(
                Bucket::Session,
                session.id.to_string(),
                fields([
                    ("sessionid", json!(session.id)),
                    ("name", json!(session.name)),
                    ("shortname", json!(session.shortname)),
                    ("entitylogid", json!(entity)),
                ]),
            )?),
            None => None,
        };

        let collection = match event.collection.as_deref().filter(|c| !c.is_empty()) {
            Some(name) => Some(
                self.cache
                    .get_or_create_record(Bucket::Collection, name, named(name))?,
            ),
            None => None,
        };

        let user_key = format!(
            "{}:{}:{}",
            event.userid,
            entity,
            region.map_or_else(|| "-".to_string(), |id| id.to_string())
        );
        let user = self.cache.get_or_create_record(
            Bucket::User,
            user_key,
            fields([
                ("userid", json!(event.userid)),
                ("entitylogid", json!(entity)),
                ("regionlogid", json!(region)),
            ]),
        )?;

        let log = self.cache.get_or_create_record(
            Bucket::Log,
            RecordKey::Fields,
            fields([
                ("eventname", json!(event.eventname)),
                ("component", json!(event.component)),
                ("action", json!(event.action)),
                ("target", json!(event.target)),
                ("crud", json!(event.crud)),
                ("contextinstanceid", json!(event.contextinstanceid)),
                ("userid", json!(event.userid)),
                ("entitylogid", json!(entity)),
                ("sessionlogid", json!(session)),
                ("collectionlogid", json!(collection)),
                ("numberview", json!(1)),
            ]),
        )?;

        let log_history = self.cache.get_or_create_record(
            Bucket::LogHistory,
            RecordKey::Fields,
            fields([
                ("logid", json!(log)),
                ("userlogid", json!(user)),
                ("numberview", json!(1)),
            ]),
        )?;

        self.events += 1;
        debug!(
            "Recorded {} for user {} at {} as log {}",
            event.eventname, event.userid, event.timecreated, log
        );

        Ok(RecordedIds {
            entity,
            region,
            session,
            collection,
            user,
            log,
            log_history,
        })
    }

    /// End the request; the cache is dropped here.
    pub fn finish(self) -> RequestSummary {
        RequestSummary {
            events: self.events,
            cached_entries: self.cache.get_log().total_entries(),
        }
    }
}

fn named(name: &str) -> Fields {
    fields([("name", json!(name))])
}

fn fields<const N: usize>(pairs: [(&str, Value); N]) -> Fields {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, PersistenceBackend};
    use std::sync::Arc;

    fn course_viewed(region: Option<&str>) -> TrainingEvent {
        TrainingEvent {
            eventname: "\\core\\event\\course_viewed".into(),
            component: "core".into(),
            action: "viewed".into(),
            target: "course".into(),
            crud: "r".into(),
            contextinstanceid: 12,
            userid: 2,
            timecreated: Utc::now(),
            entity: Some("New Entity 1".into()),
            session: Some(SessionRef {
                id: 5,
                name: "Session 1".into(),
                shortname: "S1".into(),
            }),
            collection: Some("Collection 1".into()),
            user: UserProfile {
                region: region.map(str::to_string),
            },
        }
    }

    #[test]
    fn test_repeated_event_counts_views_on_one_log_row() {
        let backend = Arc::new(MemoryBackend::new());
        let mut recorder = EventRecorder::new(LogRecordCache::new(backend.clone()));

        let first = recorder.record(&course_viewed(Some("Region 1"))).unwrap();
        let second = recorder.record(&course_viewed(Some("Region 2"))).unwrap();

        assert_eq!(first.log, second.log);
        let log = backend.fetch_by_id(Bucket::Log, first.log).unwrap().unwrap();
        assert_eq!(log.fields["numberview"], json!(2));

        assert_eq!(backend.row_count(Bucket::Log).unwrap(), 1);
        assert_eq!(backend.row_count(Bucket::Entity).unwrap(), 1);
        assert_eq!(backend.row_count(Bucket::Session).unwrap(), 1);
        assert_eq!(backend.row_count(Bucket::Collection).unwrap(), 1);
        assert_eq!(backend.row_count(Bucket::Region).unwrap(), 2);
        assert_eq!(backend.row_count(Bucket::User).unwrap(), 2);
        assert_eq!(backend.row_count(Bucket::LogHistory).unwrap(), 2);

        let summary = recorder.finish();
        assert_eq!(summary.events, 2);
        assert_eq!(summary.cached_entries, 10);
    }

    #[test]
    fn test_same_profile_counts_history_views() {
        let backend = Arc::new(MemoryBackend::new());
        let mut recorder = EventRecorder::new(LogRecordCache::new(backend.clone()));

        let first = recorder.record(&course_viewed(Some("Region 1"))).unwrap();
        let second = recorder.record(&course_viewed(Some("Region 1"))).unwrap();

        assert_eq!(first, second);
        let history = backend
            .fetch_by_id(Bucket::LogHistory, first.log_history)
            .unwrap()
            .unwrap();
        assert_eq!(history.fields["numberview"], json!(2));
        assert_eq!(backend.counters(Bucket::Region).inserts, 1);
    }

    #[test]
    fn test_event_without_optional_parts() {
        let backend = Arc::new(MemoryBackend::new());
        let mut recorder = EventRecorder::new(LogRecordCache::new(backend.clone()));

        let mut event = course_viewed(None);
        event.session = None;
        event.collection = None;

        let ids = recorder.record(&event).unwrap();
        assert_eq!(ids.region, None);
        assert_eq!(ids.session, None);
        assert_eq!(ids.collection, None);

        let log = backend.fetch_by_id(Bucket::Log, ids.log).unwrap().unwrap();
        assert_eq!(log.fields["sessionlogid"], Value::Null);
    }

    #[test]
    fn test_event_without_entity_is_rejected() {
        let backend = Arc::new(MemoryBackend::new());
        let mut recorder = EventRecorder::new(LogRecordCache::new(backend.clone()));

        let mut event = course_viewed(None);
        event.entity = None;

        assert!(recorder.record(&event).unwrap_err().is_contract_violation());
        assert_eq!(backend.total_counters().writes(), 0);
        assert_eq!(recorder.finish().events, 0);
    }

    #[test]
    fn test_event_deserializes_with_defaults() {
        let event: TrainingEvent = serde_json::from_value(json!({
            "eventname": "\\mod_page\\event\\course_module_viewed",
            "component": "mod_page",
            "action": "viewed",
            "target": "course_module",
            "contextinstanceid": 40,
            "userid": 9,
            "timecreated": "2026-03-01T09:30:00Z",
            "entity": "Acme"
        }))
        .unwrap();

        assert_eq!(event.crud, "");
        assert!(event.session.is_none());
        assert_eq!(event.user, UserProfile::default());
    }
}
