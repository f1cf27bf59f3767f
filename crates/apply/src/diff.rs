use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tessera_kubehub::ShardSpec;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary { pub adds: usize, pub updates: usize, pub removes: usize }

impl DiffSummary {
    pub fn is_empty(&self) -> bool { self.adds == 0 && self.updates == 0 && self.removes == 0 }
}

/// Structural change counts between two JSON documents.
pub fn diff_summary(target: &Json, base: &Json) -> DiffSummary {
    fn walk(a: &Json, b: &Json, s: &mut DiffSummary) {
        match (a, b) {
            (Json::Object(ao), Json::Object(bo)) => {
                for (k, av) in ao.iter() {
                    match bo.get(k) {
                        Some(bv) if av == bv => {}
                        Some(bv) => walk(av, bv, s),
                        None => s.adds += 1,
                    }
                }
                s.removes += bo.keys().filter(|k| !ao.contains_key(*k)).count();
            }
            (Json::Array(aa), Json::Array(bb)) => {
                for (x, y) in aa.iter().zip(bb.iter()) {
                    if x != y { walk(x, y, s); }
                }
                s.adds += aa.len().saturating_sub(bb.len());
                s.removes += bb.len().saturating_sub(aa.len());
            }
            (av, bv) => { if av != bv { s.updates += 1; } }
        }
    }
    let mut s = DiffSummary::default();
    walk(target, base, &mut s);
    s
}

/// Spec-level diff used when logging shard updates.
pub fn spec_diff(observed: &ShardSpec, desired: &ShardSpec) -> DiffSummary {
    let base = serde_json::to_value(observed).unwrap_or(Json::Null);
    let target = serde_json::to_value(desired).unwrap_or(Json::Null);
    diff_summary(&target, &base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_kubehub::{ClusterShards, IdentityItem};

    #[test]
    fn counts_adds_updates_removes() {
        let base = serde_json::json!({ "a": 1, "b": { "x": 1 }, "c": [1, 2, 3] });
        let target = serde_json::json!({ "a": 2, "b": { "x": 1, "y": 2 }, "c": [1, 9], "d": true });
        let s = diff_summary(&target, &base);
        assert_eq!(s, DiffSummary { adds: 2, updates: 2, removes: 1 });
    }

    #[test]
    fn spec_diff_sees_new_cluster_and_changed_locality() {
        let c = |n: &str, l: &str| ClusterShards {
            name: n.into(),
            locality: l.into(),
            identities: vec![IdentityItem { name: "id".into(), environment: "prod".into() }],
        };
        let observed = ShardSpec { clusters: vec![c("c1", "us-west-2")] };
        let desired = ShardSpec { clusters: vec![c("c1", "us-east-2"), c("c2", "us-east-2")] };
        let s = spec_diff(&observed, &desired);
        assert_eq!(s.adds, 1);
        assert_eq!(s.updates, 1);
        assert!(spec_diff(&desired, &desired).is_empty());
    }
}
