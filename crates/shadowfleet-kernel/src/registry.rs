//! Shadow registry — the bounded map from agent id to shadow.
//!
//! The registry is the only state shared across dispatch lanes. Shadows are
//! handed out as `Arc`s; each one serializes its own transitions.

use crate::error::{KernelError, KernelResult};
use crate::shadow::{AgentShadow, ShadowSnapshot};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use shadowfleet_types::agent::AgentId;
use shadowfleet_types::config::FleetConfig;
use shadowfleet_types::health::Necessity;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Thread-safe registry of shadows.
pub struct ShadowRegistry {
    shadows: DashMap<AgentId, Arc<AgentShadow>>,
    /// Tracked separately so the capacity check never walks every shard.
    count: AtomicUsize,
    config: FleetConfig,
}

impl ShadowRegistry {
    pub fn new(config: FleetConfig) -> Self {
        Self {
            shadows: DashMap::new(),
            count: AtomicUsize::new(0),
            config,
        }
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn get(&self, agent_id: &AgentId) -> Option<Arc<AgentShadow>> {
        self.shadows.get(agent_id).map(|s| Arc::clone(s.value()))
    }

    /// Return the shadow for `agent_id`, creating and starting one if needed.
    ///
    /// The boolean is `true` when the shadow was created by this call.
    pub fn get_or_create(
        &self,
        agent_id: &AgentId,
        necessity: Necessity,
        now: DateTime<Utc>,
    ) -> KernelResult<(Arc<AgentShadow>, bool)> {
        if let Some(existing) = self.get(agent_id) {
            return Ok((existing, false));
        }

        match self.shadows.entry(agent_id.clone()) {
            Entry::Occupied(entry) => Ok((Arc::clone(entry.get()), false)),
            Entry::Vacant(slot) => {
                let max = self.config.max_agents;
                if self.count.fetch_add(1, Ordering::SeqCst) >= max {
                    self.count.fetch_sub(1, Ordering::SeqCst);
                    return Err(KernelError::RegistryFull(max));
                }
                let shadow = match AgentShadow::new(agent_id.clone(), necessity, &self.config, now)
                    .and_then(|s| s.start(now).map(|_| s))
                {
                    Ok(shadow) => Arc::new(shadow),
                    Err(e) => {
                        self.count.fetch_sub(1, Ordering::SeqCst);
                        return Err(e);
                    }
                };
                slot.insert(Arc::clone(&shadow));
                debug!(agent = %agent_id, tracked = self.len(), "Shadow registered");
                Ok((shadow, true))
            }
        }
    }

    /// Remove a shadow. Only shadows in their terminal state may be evicted.
    pub fn evict(&self, agent_id: &AgentId) -> KernelResult<Arc<AgentShadow>> {
        match self.shadows.remove_if(agent_id, |_, shadow| shadow.is_terminal()) {
            Some((_, shadow)) => {
                self.count.fetch_sub(1, Ordering::SeqCst);
                info!(agent = %agent_id, "Shadow evicted");
                Ok(shadow)
            }
            None => match self.get(agent_id) {
                Some(shadow) => Err(KernelError::EvictionRefused {
                    agent: agent_id.clone(),
                    state: shadow.state(),
                }),
                None => Err(KernelError::UnknownAgent(agent_id.clone())),
            },
        }
    }

    /// Evict every terminated shadow that has been quiet for `retention`.
    pub fn evict_expired(&self, now: DateTime<Utc>, retention: Duration) -> Vec<AgentId> {
        let expired: Vec<AgentId> = self
            .shadows
            .iter()
            .filter(|entry| {
                let shadow = entry.value();
                if !shadow.is_terminal() {
                    return false;
                }
                let quiet_since = match shadow.terminated_at() {
                    Some(t) => t.max(shadow.last_seen()),
                    None => shadow.last_seen(),
                };
                (now - quiet_since)
                    .to_std()
                    .map(|age| age >= retention)
                    .unwrap_or(false)
            })
            .map(|entry| entry.key().clone())
            .collect();

        expired
            .into_iter()
            .filter(|id| self.evict(id).is_ok())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All shadows, in no particular order.
    pub fn list(&self) -> Vec<Arc<AgentShadow>> {
        self.shadows.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Snapshots of every shadow, sorted by agent id.
    pub fn snapshots(&self) -> Vec<ShadowSnapshot> {
        let mut snaps: Vec<ShadowSnapshot> = self.list().iter().map(|s| s.snapshot()).collect();
        snaps.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        snaps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use shadowfleet_types::agent::{ShadowEvent, ShadowState};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn registry(max_agents: usize) -> ShadowRegistry {
        ShadowRegistry::new(FleetConfig {
            max_agents,
            ..Default::default()
        })
    }

    #[test]
    fn test_get_or_create_starts_shadow_once() {
        let reg = registry(8);
        let id = AgentId::new("a1");
        let (first, created) = reg.get_or_create(&id, Necessity::Required, at(0)).unwrap();
        assert!(created);
        assert_eq!(first.state(), ShadowState::Onboarding);

        let (second, created) = reg.get_or_create(&id, Necessity::Optional, at(1)).unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.necessity(), Necessity::Required);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_capacity_is_enforced() {
        let reg = registry(2);
        reg.get_or_create(&"a".into(), Necessity::Required, at(0)).unwrap();
        reg.get_or_create(&"b".into(), Necessity::Required, at(0)).unwrap();
        let err = reg
            .get_or_create(&"c".into(), Necessity::Required, at(0))
            .unwrap_err();
        assert!(matches!(err, KernelError::RegistryFull(2)));
        assert_eq!(reg.len(), 2);
        // Existing agents are still reachable at capacity.
        assert!(reg.get_or_create(&"a".into(), Necessity::Required, at(1)).is_ok());
    }

    #[test]
    fn test_evict_requires_terminal_state() {
        let reg = registry(8);
        let id = AgentId::new("a1");
        let (shadow, _) = reg.get_or_create(&id, Necessity::Required, at(0)).unwrap();

        let err = reg.evict(&id).unwrap_err();
        assert!(matches!(
            err,
            KernelError::EvictionRefused {
                state: ShadowState::Onboarding,
                ..
            }
        ));

        shadow.fire(ShadowEvent::OffboardingNotice, at(1)).unwrap();
        assert!(reg.evict(&id).is_ok());
        assert!(reg.is_empty());
        assert!(matches!(
            reg.evict(&id).unwrap_err(),
            KernelError::UnknownAgent(_)
        ));
    }

    #[test]
    fn test_evict_expired_respects_retention() {
        let reg = registry(8);
        let (gone, _) = reg
            .get_or_create(&"gone".into(), Necessity::Required, at(0))
            .unwrap();
        let (fresh, _) = reg
            .get_or_create(&"fresh".into(), Necessity::Required, at(0))
            .unwrap();
        reg.get_or_create(&"alive".into(), Necessity::Required, at(0))
            .unwrap();
        gone.fire(ShadowEvent::OffboardingNotice, at(10)).unwrap();
        fresh.fire(ShadowEvent::OffboardingNotice, at(500)).unwrap();

        let evicted = reg.evict_expired(at(700), Duration::from_secs(600));
        assert_eq!(evicted, vec![AgentId::new("gone")]);
        assert_eq!(reg.len(), 2);
        assert!(reg.get(&"alive".into()).is_some());
    }

    #[test]
    fn test_snapshots_sorted() {
        let reg = registry(8);
        for id in ["c", "a", "b"] {
            reg.get_or_create(&id.into(), Necessity::Required, at(0))
                .unwrap();
        }
        let ids: Vec<_> = reg
            .snapshots()
            .into_iter()
            .map(|s| s.agent_id.to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
