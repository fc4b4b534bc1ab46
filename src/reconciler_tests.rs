// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the reconciler: registry invariants, event handling, boot
//! healing, and the watcher lifecycle, all against in-memory fakes.

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use std::time::Duration;

    use hickory_proto::rr::{LowerName, Name, RecordType};
    use tokio::time::sleep;

    use super::super::{Agent, AgentConfig, NetworkRegistry};
    use crate::consul::KvStore;
    use crate::runtime::{
        ContainerEvent, ContainerFacts, ContainerRuntime, ContainerStatus, NetworkAttachment,
    };
    use crate::testutil::{MemoryKv, MockRuntime};
    use crate::zone::ZoneStore;

    const NODE: &str = "10.0.0.1-node-a";

    fn facts(id: &str, hostname: &str, attachments: &[(&str, [u8; 4])]) -> ContainerFacts {
        ContainerFacts {
            id: id.to_string(),
            hostname: hostname.to_string(),
            networks: attachments
                .iter()
                .map(|(network, ip)| NetworkAttachment {
                    network: network.to_string(),
                    ip: Ipv4Addr::from(*ip),
                })
                .collect(),
        }
    }

    fn build_agent(kv: &Arc<MemoryKv>, runtime: &Arc<MockRuntime>) -> Arc<Agent> {
        Arc::new(Agent::new(
            AgentConfig {
                node_id: NODE.to_string(),
                network_tld: "sensedns".to_string(),
                consul_wait: Duration::from_millis(50),
            },
            Arc::clone(kv) as Arc<dyn KvStore>,
            Arc::clone(runtime) as Arc<dyn ContainerRuntime>,
            Arc::new(ZoneStore::new()),
        ))
    }

    fn lname(name: &str) -> LowerName {
        LowerName::from(Name::from_utf8(name).unwrap())
    }

    async fn start(agent: &Arc<Agent>, id: &str) {
        agent
            .handle_event(ContainerEvent {
                id: id.to_string(),
                status: ContainerStatus::Start,
            })
            .await;
    }

    async fn die(agent: &Arc<Agent>, id: &str) {
        agent
            .handle_event(ContainerEvent {
                id: id.to_string(),
                status: ContainerStatus::Die,
            })
            .await;
    }

    async fn eventually<F: Fn() -> bool>(check: F) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        check()
    }

    // ========================================================================
    // NetworkRegistry invariants
    // ========================================================================

    #[test]
    fn registry_spawns_one_watcher_per_network() {
        let mut registry = NetworkRegistry::new();
        assert!(registry.track("prod", false));
        assert!(!registry.track("prod", false));
        assert_eq!(registry.count("prod"), 2);
        assert!(registry.watched("prod"));
    }

    #[test]
    fn registry_never_watches_local_only_networks() {
        let mut registry = NetworkRegistry::new();
        assert!(!registry.track("bridge", true));
        assert!(!registry.watched("bridge"));
        assert_eq!(registry.count("bridge"), 1);

        // No watcher will retire the entry, so release drops it directly.
        registry.release("bridge");
        assert_eq!(registry.count("bridge"), 0);
        assert!(registry.known_networks().is_empty());
    }

    #[test]
    fn registry_leaves_the_zero_count_entry_to_the_watcher() {
        let mut registry = NetworkRegistry::new();
        registry.track("prod", false);
        registry.release("prod");

        assert_eq!(registry.count("prod"), 0);
        assert!(registry.watched("prod"));
        assert!(registry.try_retire("prod"));
        assert!(!registry.watched("prod"));
    }

    #[test]
    fn registry_resolves_the_respawn_race() {
        let mut registry = NetworkRegistry::new();
        assert!(registry.track("prod", false));
        registry.release("prod");

        // The count bounced off zero while the watcher was still mid-poll:
        // no second watcher, and the old one must keep running.
        assert!(!registry.track("prod", false));
        assert!(!registry.try_retire("prod"));
        assert_eq!(registry.count("prod"), 1);
    }

    #[test]
    fn registry_spawns_again_after_retirement() {
        let mut registry = NetworkRegistry::new();
        assert!(registry.track("prod", false));
        registry.release("prod");
        assert!(registry.try_retire("prod"));
        assert!(registry.track("prod", false));
    }

    // ========================================================================
    // Event handling
    // ========================================================================

    #[tokio::test]
    async fn add_container_publishes_keys_and_inventory() {
        let kv = Arc::new(MemoryKv::new());
        let runtime = Arc::new(MockRuntime::new(NODE));
        runtime.set_driver("prod", "overlay");
        runtime.add_container(facts("c1", "web1", &[("prod", [10, 0, 0, 5])]), true);
        let agent = build_agent(&kv, &runtime);

        start(&agent, "c1").await;

        assert_eq!(
            kv.snapshot().get("sensedns/network/prod/web1/c1"),
            Some(&b"10.0.0.5".to_vec())
        );
        let inventory: Vec<String> = serde_json::from_slice(
            &kv.snapshot()[&format!("sensedns/inventory/{NODE}/c1")],
        )
        .unwrap();
        assert_eq!(inventory, vec!["sensedns/network/prod/web1/c1".to_string()]);

        let registry = agent.networks.lock().unwrap();
        assert_eq!(registry.count("prod"), 1);
        assert!(registry.watched("prod"));
    }

    #[tokio::test]
    async fn bridge_networks_are_published_but_not_watched() {
        let kv = Arc::new(MemoryKv::new());
        let runtime = Arc::new(MockRuntime::new(NODE));
        runtime.set_driver("bridge", "bridge");
        runtime.add_container(facts("c1", "web1", &[("bridge", [172, 17, 0, 2])]), true);
        let agent = build_agent(&kv, &runtime);

        start(&agent, "c1").await;

        assert!(kv.contains("sensedns/network/bridge/web1/c1"));
        assert!(!agent.networks.lock().unwrap().watched("bridge"));
    }

    #[tokio::test]
    async fn delete_undoes_exactly_what_add_wrote() {
        let kv = Arc::new(MemoryKv::new());
        let runtime = Arc::new(MockRuntime::new(NODE));
        runtime.set_driver("prod", "overlay");
        runtime.set_driver("metrics", "overlay");
        runtime.add_container(
            facts("c1", "web1", &[("prod", [10, 0, 0, 5]), ("metrics", [10, 1, 0, 5])]),
            true,
        );
        let agent = build_agent(&kv, &runtime);

        start(&agent, "c1").await;
        assert_eq!(kv.snapshot().len(), 3);

        die(&agent, "c1").await;
        assert!(kv.snapshot().is_empty());

        let registry = agent.networks.lock().unwrap();
        assert_eq!(registry.count("prod"), 0);
        assert_eq!(registry.count("metrics"), 0);
    }

    #[tokio::test]
    async fn refcounts_pair_adds_with_deletes() {
        let kv = Arc::new(MemoryKv::new());
        let runtime = Arc::new(MockRuntime::new(NODE));
        runtime.set_driver("prod", "overlay");
        runtime.add_container(facts("c1", "web1", &[("prod", [10, 0, 0, 5])]), true);
        runtime.add_container(facts("c2", "web2", &[("prod", [10, 0, 0, 6])]), true);
        let agent = build_agent(&kv, &runtime);

        start(&agent, "c1").await;
        start(&agent, "c2").await;
        assert_eq!(agent.networks.lock().unwrap().count("prod"), 2);

        die(&agent, "c1").await;
        assert_eq!(agent.networks.lock().unwrap().count("prod"), 1);

        die(&agent, "c2").await;
        assert_eq!(agent.networks.lock().unwrap().count("prod"), 0);
    }

    #[tokio::test]
    async fn delete_without_inventory_is_a_logged_noop() {
        let kv = Arc::new(MemoryKv::new());
        let runtime = Arc::new(MockRuntime::new(NODE));
        let agent = build_agent(&kv, &runtime);

        die(&agent, "ghost").await;
        assert!(kv.snapshot().is_empty());
    }

    // ========================================================================
    // Boot reconcile
    // ========================================================================

    #[tokio::test]
    async fn boot_heals_stale_inventory_and_publishes_live_containers() {
        let kv = Arc::new(MemoryKv::new());
        // A previous life of this node left c1 behind; only c2 is running.
        kv.seed("sensedns/network/prod/old1/c1", b"10.0.0.9");
        kv.seed(
            &format!("sensedns/inventory/{NODE}/c1"),
            br#"["sensedns/network/prod/old1/c1"]"#,
        );

        let runtime = Arc::new(MockRuntime::new(NODE));
        runtime.set_driver("web", "overlay");
        runtime.add_container(facts("c2", "web2", &[("web", [10, 0, 0, 6])]), true);
        let agent = build_agent(&kv, &runtime);

        agent.boot().await.unwrap();

        let state = kv.snapshot();
        assert!(!state.contains_key("sensedns/network/prod/old1/c1"));
        assert!(!state.contains_key(&format!("sensedns/inventory/{NODE}/c1")));
        assert!(state.contains_key("sensedns/network/web/web2/c2"));
        assert!(state.contains_key(&format!("sensedns/inventory/{NODE}/c2")));

        let registry = agent.networks.lock().unwrap();
        assert_eq!(registry.known_networks(), vec!["web".to_string()]);
        assert_eq!(registry.count("prod"), 0);
    }

    #[tokio::test]
    async fn boot_is_idempotent_for_live_containers() {
        let kv = Arc::new(MemoryKv::new());
        kv.seed("sensedns/network/prod/web1/c1", b"10.0.0.5");
        kv.seed(
            &format!("sensedns/inventory/{NODE}/c1"),
            br#"["sensedns/network/prod/web1/c1"]"#,
        );

        let runtime = Arc::new(MockRuntime::new(NODE));
        runtime.set_driver("prod", "overlay");
        runtime.add_container(facts("c1", "web1", &[("prod", [10, 0, 0, 5])]), true);
        let agent = build_agent(&kv, &runtime);

        agent.boot().await.unwrap();

        assert_eq!(
            kv.snapshot().get("sensedns/network/prod/web1/c1"),
            Some(&b"10.0.0.5".to_vec())
        );
        assert_eq!(agent.networks.lock().unwrap().count("prod"), 1);
    }

    // ========================================================================
    // Watcher lifecycle through the refcount
    // ========================================================================

    #[tokio::test]
    async fn watcher_mirrors_the_network_and_retires_at_zero() {
        let kv = Arc::new(MemoryKv::new());
        let runtime = Arc::new(MockRuntime::new(NODE));
        runtime.set_driver("prod", "overlay");
        runtime.add_container(facts("c1", "web1", &[("prod", [10, 0, 0, 5])]), true);
        let agent = build_agent(&kv, &runtime);

        start(&agent, "c1").await;

        let zones = Arc::clone(&agent.zones);
        assert!(
            eventually(|| {
                zones
                    .match_zone(&lname("web1.prod.sensedns."), RecordType::A)
                    .is_some()
            })
            .await,
            "watcher never installed the zone"
        );

        die(&agent, "c1").await;

        let zones = Arc::clone(&agent.zones);
        assert!(
            eventually(|| zones.is_empty()).await,
            "watcher never removed the zone"
        );
        assert!(
            eventually(|| !agent.networks.lock().unwrap().watched("prod")).await,
            "watcher never deregistered"
        );
    }
}
