//! Session player for replaying recorded sessions from the event store.
//!
//! `SessionPlayer` loads the session metadata plus its `code` and `select`
//! children, decodes them into [`TimedEvent`]s and orders them by offset, with
//! ties broken by store arrival order. Playback honours recorded delays scaled
//! by a speed multiplier, or runs instantly.

use crate::session::SessionError;
use codecast_proto::{
    EventStore, Selection, SessionId, SessionMeta, Snapshot, StoreEntry, StorePath, TimedEvent,
};
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for session playback.
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Replay speed multiplier (1.0 = original speed, 2.0 = 2x faster).
    pub speed: f32,

    /// If true, skip all delays.
    pub instant: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            instant: false,
        }
    }
}

impl PlayerConfig {
    /// Plays events back-to-back without waiting.
    pub fn instant() -> Self {
        Self {
            instant: true,
            ..Default::default()
        }
    }

    /// Sets the speed multiplier.
    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed.max(0.1); // Minimum 0.1x speed
        self
    }

    fn delay(&self, delta_ms: u64) -> Option<Duration> {
        if self.instant || delta_ms == 0 {
            return None;
        }
        let scaled = (delta_ms as f32 / self.speed) as u64;
        (scaled > 0).then(|| Duration::from_millis(scaled))
    }
}

/// A decoded event with its store arrival sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackEvent {
    pub event: TimedEvent,
    pub seq: u64,
}

/// Editor state at a point in the recording.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackState {
    pub document: Snapshot,
    pub selection: Option<Selection>,
}

/// Plays back a recorded session.
#[derive(Debug)]
pub struct SessionPlayer {
    id: SessionId,
    meta: SessionMeta,
    events: Vec<PlaybackEvent>,
    skipped: usize,
    config: PlayerConfig,
}

impl SessionPlayer {
    /// Loads a session and its timed events from `store`.
    pub async fn load(store: &dyn EventStore, id: &SessionId) -> Result<Self, SessionError> {
        let node = store.get(&StorePath::session(id)).await?;
        let meta = SessionMeta::from_node(node.as_ref())?;

        let code = store.children(&StorePath::code_collection(id)).await?;
        let select = store.children(&StorePath::select_collection(id)).await?;

        let mut events = Vec::with_capacity(code.len() + select.len());
        let mut skipped = 0;
        for entry in code {
            match decode(&entry, |offset_ms, value| {
                Ok(TimedEvent::Code {
                    offset_ms,
                    snapshot: Snapshot::from_store_value(value)?,
                })
            }) {
                Some(event) => events.push(event),
                None => skipped += 1,
            }
        }
        for entry in select {
            match decode(&entry, |offset_ms, value| {
                Ok(TimedEvent::Selection {
                    offset_ms,
                    selection: Selection::from_store_value(value)?,
                })
            }) {
                Some(event) => events.push(event),
                None => skipped += 1,
            }
        }
        events.sort_by_key(|e| (e.event.offset_ms(), e.seq));

        debug!(session = %id, events = events.len(), skipped, "Loaded session for playback");
        Ok(Self {
            id: id.clone(),
            meta,
            events,
            skipped,
            config: PlayerConfig::default(),
        })
    }

    /// Sets the playback configuration.
    pub fn with_config(mut self, config: PlayerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn meta(&self) -> &SessionMeta {
        &self.meta
    }

    /// All events in playback order.
    pub fn events(&self) -> &[PlaybackEvent] {
        &self.events
    }

    /// Number of stored entries that could not be decoded.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Code strings of every code snapshot, in playback order.
    pub fn code_sequence(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match &e.event {
                TimedEvent::Code { snapshot, .. } => Some(snapshot.code.as_str()),
                TimedEvent::Selection { .. } => None,
            })
            .collect()
    }

    /// Editor state after applying every event at or before `offset_ms`.
    pub fn state_at(&self, offset_ms: u64) -> PlaybackState {
        let mut state = PlaybackState {
            document: self.meta.initial.clone().unwrap_or_default(),
            selection: None,
        };
        for e in self.events.iter().take_while(|e| e.event.offset_ms() <= offset_ms) {
            match &e.event {
                TimedEvent::Code { snapshot, .. } => state.document = snapshot.clone(),
                TimedEvent::Selection { selection, .. } => state.selection = Some(*selection),
            }
        }
        state
    }

    /// Delivers every event to `sink`, waiting out recorded delays.
    ///
    /// Returns the number of events played.
    pub async fn play<F>(&self, mut sink: F) -> usize
    where
        F: FnMut(&TimedEvent),
    {
        let mut last_offset_ms: u64 = 0;
        for e in &self.events {
            let offset_ms = e.event.offset_ms();
            if let Some(delay) = self.config.delay(offset_ms.saturating_sub(last_offset_ms)) {
                tokio::time::sleep(delay).await;
            }
            last_offset_ms = offset_ms;
            sink(&e.event);
        }
        self.events.len()
    }
}

fn decode<F>(entry: &StoreEntry, build: F) -> Option<PlaybackEvent>
where
    F: FnOnce(u64, &serde_json::Value) -> codecast_proto::Result<TimedEvent>,
{
    let Ok(offset_ms) = entry.key.parse::<u64>() else {
        warn!(key = %entry.key, "Skipping event with non-numeric offset");
        return None;
    };
    match build(offset_ms, &entry.value) {
        Ok(event) => Some(PlaybackEvent {
            event,
            seq: entry.seq,
        }),
        Err(e) => {
            warn!(offset_ms, error = %e, "Skipping undecodable event");
            None
        }
    }
}
