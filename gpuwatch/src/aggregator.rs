//! Latest-snapshot store, the join point between pollers and the renderer
//!
//! Snapshots are stored as `Arc<HostSnapshot>` and replaced whole under a
//! single lock, so `read_all` hands out a shallow copy that is never torn.

use crate::models::{AggregateState, Host, HostSnapshot};
use crate::registry::HostRegistry;
use chrono::Local;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug)]
struct Slots {
    index: HashMap<Host, usize>,
    snapshots: Vec<Arc<HostSnapshot>>,
}

#[derive(Debug, Clone)]
pub struct Aggregator {
    slots: Arc<RwLock<Slots>>,
}

impl Aggregator {
    /// One CONNECTING entry per registered host
    pub fn new(registry: &HostRegistry) -> Self {
        let hosts = registry.list_hosts();
        let index = hosts
            .iter()
            .enumerate()
            .map(|(i, host)| (host.clone(), i))
            .collect();
        let snapshots = hosts
            .iter()
            .map(|host| Arc::new(HostSnapshot::connecting(host.clone())))
            .collect();

        Self {
            slots: Arc::new(RwLock::new(Slots { index, snapshots })),
        }
    }

    /// Replace the host's current snapshot. Returns false for unknown hosts.
    pub fn update(&self, snapshot: HostSnapshot) -> bool {
        let snapshot = Arc::new(snapshot);
        let mut slots = self.slots.write();
        match slots.index.get(&snapshot.host).copied() {
            Some(i) => {
                slots.snapshots[i] = snapshot;
                true
            }
            None => {
                warn!(host = %snapshot.host, "dropping snapshot for unregistered host");
                false
            }
        }
    }

    pub fn read_all(&self) -> AggregateState {
        let hosts = self.slots.read().snapshots.clone();
        AggregateState {
            hosts,
            read_at: Local::now(),
        }
    }

    pub fn get(&self, host: &str) -> Option<Arc<HostSnapshot>> {
        let slots = self.slots.read();
        slots.index.get(host).map(|&i| slots.snapshots[i].clone())
    }

    pub fn len(&self) -> usize {
        self.slots.read().snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GpuMetricRecord, HostStatus};

    fn registry() -> HostRegistry {
        HostRegistry::new(["server2", "server3", "server4"]).unwrap()
    }

    fn gpus(n: u32, util: u8) -> Vec<GpuMetricRecord> {
        (0..n)
            .map(|index| GpuMetricRecord {
                index,
                utilization: util,
                memory_used_mib: util as u64,
                memory_total_mib: 100,
                temperature_c: util as i32,
                name: None,
            })
            .collect()
    }

    #[test]
    fn test_starts_connecting_for_every_host() {
        let agg = Aggregator::new(&registry());
        let state = agg.read_all();
        assert_eq!(state.len(), 3);
        assert_eq!(state.count_with_status(HostStatus::Connecting), 3);
        let order: Vec<&str> = state.hosts.iter().map(|s| s.host.as_str()).collect();
        assert_eq!(order, ["server2", "server3", "server4"]);
    }

    #[test]
    fn test_update_replaces_only_that_host() {
        let agg = Aggregator::new(&registry());
        assert!(agg.update(HostSnapshot::ok("server3", gpus(2, 50))));
        assert!(agg.update(HostSnapshot::failed("server3", "Connection refused")));

        let state = agg.read_all();
        assert_eq!(state.len(), 3);
        assert_eq!(state.get("server3").unwrap().status, HostStatus::Failed);
        assert_eq!(state.get("server2").unwrap().status, HostStatus::Connecting);
    }

    #[test]
    fn test_unknown_host_rejected() {
        let agg = Aggregator::new(&registry());
        assert!(!agg.update(HostSnapshot::ok("intruder", vec![])));
        assert!(agg.get("intruder").is_none());
        assert_eq!(agg.len(), 3);
    }

    #[test]
    fn test_read_all_is_a_stable_copy() {
        let agg = Aggregator::new(&registry());
        agg.update(HostSnapshot::ok("server2", gpus(1, 10)));
        let before = agg.read_all();
        agg.update(HostSnapshot::ok("server2", gpus(4, 90)));
        assert_eq!(before.get("server2").unwrap().gpus.len(), 1);
        assert_eq!(agg.read_all().get("server2").unwrap().gpus.len(), 4);
    }

    #[test]
    fn test_concurrent_updates_never_tear() {
        let agg = Aggregator::new(&registry());
        let writers: Vec<_> = ["server2", "server3", "server4"]
            .into_iter()
            .map(|host| {
                let agg = agg.clone();
                std::thread::spawn(move || {
                    for round in 0..500u32 {
                        let util = (round % 100) as u8;
                        // Every GPU of one snapshot carries the same value
                        agg.update(HostSnapshot::ok(host, gpus(1 + round % 8, util)));
                    }
                })
            })
            .collect();

        for _ in 0..500 {
            let state = agg.read_all();
            assert_eq!(state.len(), 3);
            for snap in &state.hosts {
                if let Some(first) = snap.gpus.first() {
                    assert!(snap.gpus.iter().all(|g| g.utilization == first.utilization));
                    assert_eq!(snap.status, HostStatus::Ok);
                }
            }
        }

        for w in writers {
            w.join().unwrap();
        }
    }
}
