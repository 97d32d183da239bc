//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 配置加载 -> 分发管线的 e2e 测试
//! - 同意 (consent) 流程测试

#[cfg(test)]
mod contract_tests {
    use contracts::{Operator, SdkSettings};

    #[test]
    fn test_operator_ids_stable() {
        // 配置文件依赖这些 id
        assert_eq!(Operator::NotDefined.id(), "notdefined");
        assert_eq!(Operator::IsEmpty.id(), "empty");
        assert_eq!(SdkSettings::default().core.max_queue_size, Some(100));
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{
        ConsentDecision, ConsentManager, DataObject, DecisionType, Destination, Dispatch,
        DispatchCompletion, DispatchScope, DispatchType, PathReference, SdkSettings,
        TrackStatus, TransformCompletion, Transformer,
    };
    use dispatcher::{DispatchManager, DispatchManagerBuilder, LogDestination, QueueMetrics};
    use tokio::sync::watch;
    use tokio::time::sleep;

    /// Destination that records every batch it receives
    struct RecordingDestination {
        id: String,
        batch_limit: usize,
        batches: Mutex<Vec<Vec<Dispatch>>>,
    }

    impl RecordingDestination {
        fn new(id: &str, batch_limit: usize) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                batch_limit,
                batches: Mutex::new(Vec::new()),
            })
        }

        fn batch_sizes(&self) -> Vec<usize> {
            self.batches.lock().unwrap().iter().map(Vec::len).collect()
        }

        fn delivered(&self) -> Vec<Dispatch> {
            self.batches.lock().unwrap().iter().flatten().cloned().collect()
        }
    }

    impl Destination for RecordingDestination {
        fn id(&self) -> &str {
            &self.id
        }

        fn batch_limit(&self) -> usize {
            self.batch_limit
        }

        fn dispatch(&self, dispatches: Vec<Dispatch>, on_complete: DispatchCompletion) {
            self.batches.lock().unwrap().push(dispatches.clone());
            tokio::spawn(async move {
                on_complete(dispatches);
            });
        }
    }

    /// Drops dispatches for one event name
    struct EventFilter(&'static str);

    impl Transformer for EventFilter {
        fn id(&self) -> &str {
            "event_filter"
        }

        fn apply_transformation(
            &self,
            _transformation_id: &str,
            dispatch: Dispatch,
            _scope: &DispatchScope,
            completion: TransformCompletion,
        ) {
            if dispatch.event_name() == Some(self.0) {
                completion(None);
            } else {
                completion(Some(dispatch));
            }
        }
    }

    struct FixedConsent {
        decision: Option<ConsentDecision>,
        applied: Mutex<Vec<Dispatch>>,
    }

    impl ConsentManager for FixedConsent {
        fn consent_decision(&self) -> Option<ConsentDecision> {
            self.decision.clone()
        }

        fn apply_consent(&self, dispatch: Dispatch) {
            self.applied.lock().unwrap().push(dispatch);
        }
    }

    const SETTINGS_TOML: &str = r#"
[core]
max_queue_size = 100
max_in_flight_per_destination = 20

[[transformations]]
id = "no_debug"
transformer_id = "event_filter"
scopes = ["after_collectors"]

[load_rules.purchase]
just = { variable = "tealium_event", operator = "equals", filter = "purchase" }

[load_rules.has_order]
just = { path = ["order"], variable = "id", operator = "defined" }

[destinations.collect]
rules = { all = [ { just = "purchase" }, { just = "has_order" } ] }
mappings = [
    { source = "order.id", destination = "transaction.id" },
    { destination = "channel", map_to = "mobile" },
]
"#;

    fn load(content: &str) -> watch::Sender<SdkSettings> {
        let settings = ConfigLoader::load_from_str(content, ConfigFormat::Toml).unwrap();
        watch::channel(settings).0
    }

    fn event(name: &str) -> Dispatch {
        Dispatch::new(name, DispatchType::Event, DataObject::new())
    }

    fn purchase(order_id: &str) -> Dispatch {
        Dispatch::new(
            "purchase",
            DispatchType::Event,
            DataObject::new().with("order", DataObject::new().with("id", order_id)),
        )
    }

    fn path(text: &str) -> PathReference {
        text.parse().unwrap()
    }

    async fn track_all(manager: &DispatchManager, dispatches: Vec<Dispatch>) {
        for dispatch in dispatches {
            manager.track(dispatch, None).await.unwrap();
        }
    }

    /// End-to-end test: settings file -> track -> queue -> destination batches
    #[tokio::test]
    async fn test_e2e_batches_follow_batch_limit() {
        let settings = load("");
        let collect = RecordingDestination::new("collect", 2);
        let manager = DispatchManagerBuilder::new(settings.subscribe())
            .with_destination(collect.clone())
            .build()
            .unwrap();

        let tracked: Vec<Dispatch> = (0..5).map(|i| event(&format!("e{i}"))).collect();
        track_all(&manager, tracked.clone()).await;
        assert_eq!(*manager.queue().queue_size_pending_dispatch("collect").borrow(), 5);

        manager.start_dispatch_loop();
        sleep(Duration::from_millis(100)).await;

        assert_eq!(collect.batch_sizes(), vec![2, 2, 1]);
        let delivered: Vec<String> = collect.delivered().iter().map(|d| d.id().to_string()).collect();
        let expected: Vec<String> = tracked.iter().map(|d| d.id().to_string()).collect();
        assert_eq!(delivered, expected);
        assert_eq!(*manager.queue().queue_size_pending_dispatch("collect").borrow(), 0);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_e2e_rules_mappings_and_transformations() {
        let settings = load(SETTINGS_TOML);
        let collect = RecordingDestination::new("collect", 10);
        let audit = RecordingDestination::new("audit", 10);
        let manager = DispatchManagerBuilder::new(settings.subscribe())
            .with_destination(collect.clone())
            .with_destination(audit.clone())
            .with_transformer(Arc::new(EventFilter("debug")))
            .build()
            .unwrap();
        manager.start_dispatch_loop();

        let dropped = manager.track(event("debug"), None).await.unwrap();
        assert_eq!(dropped.status, TrackStatus::Dropped);

        track_all(&manager, vec![purchase("A1"), event("view"), event("purchase")]).await;
        sleep(Duration::from_millis(100)).await;

        // audit has no settings: everything admitted, payloads untouched
        let audited = audit.delivered();
        assert_eq!(audited.len(), 3);
        assert_eq!(
            audited[0].payload().extract(&path("order.id")).map(ToString::to_string),
            Some("A1".to_string())
        );

        // collect: only the purchase with an order, remapped
        let collected = collect.delivered();
        assert_eq!(collected.len(), 1);
        let payload = collected[0].payload();
        assert_eq!(payload.len(), 2);
        assert_eq!(
            payload.extract(&path("transaction.id")).map(ToString::to_string),
            Some("A1".to_string())
        );
        assert_eq!(payload.get_str("channel"), Some("mobile"));

        let metrics = manager.metrics();
        let (_, collect_metrics) = metrics.iter().find(|(id, _)| id == "collect").unwrap();
        assert_eq!(collect_metrics.rejected_count, 2);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_e2e_batching_barrier_from_settings() {
        let settings = load(
            r#"
[barriers.BatchingBarrier]
scopes = ["collect"]
configuration = { batch_size = 3 }
"#,
        );
        let collect = RecordingDestination::new("collect", 10);
        let manager = DispatchManagerBuilder::new(settings.subscribe())
            .with_destination(collect.clone())
            .build()
            .unwrap();
        manager.start_dispatch_loop();

        track_all(&manager, vec![event("a"), event("b")]).await;
        sleep(Duration::from_millis(100)).await;
        assert!(collect.batch_sizes().is_empty());

        track_all(&manager, vec![event("c")]).await;
        sleep(Duration::from_millis(100)).await;
        assert_eq!(collect.batch_sizes(), vec![3]);

        // a live settings update lowers the threshold
        settings.send_modify(|s| {
            if let Some(barrier) = s.barriers.get_mut("BatchingBarrier") {
                barrier.configuration = DataObject::new().with("batch_size", 1);
            }
        });
        sleep(Duration::from_millis(50)).await;
        track_all(&manager, vec![event("d")]).await;
        sleep(Duration::from_millis(100)).await;
        assert_eq!(collect.batch_sizes(), vec![3, 1]);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_e2e_batching_barrier_holds_partial_remainder() {
        let settings = load(
            r#"
[barriers.BatchingBarrier]
scopes = ["collect"]
configuration = { batch_size = 3 }
"#,
        );
        let collect = RecordingDestination::new("collect", 3);
        let manager = DispatchManagerBuilder::new(settings.subscribe())
            .with_destination(collect.clone())
            .build()
            .unwrap();

        track_all(&manager, vec![event("a"), event("b"), event("c"), event("d")]).await;
        manager.start_dispatch_loop();
        sleep(Duration::from_millis(100)).await;

        // the full batch goes out, the single leftover waits for two more
        assert_eq!(collect.batch_sizes(), vec![3]);
        assert_eq!(*manager.queue().queue_size_pending_dispatch("collect").borrow(), 1);

        track_all(&manager, vec![event("e"), event("f")]).await;
        sleep(Duration::from_millis(100)).await;
        assert_eq!(collect.batch_sizes(), vec![3, 3]);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_e2e_consent_flow() {
        let settings = load(SETTINGS_TOML);
        let collect = RecordingDestination::new("collect", 10);
        let consent = Arc::new(FixedConsent {
            decision: Some(ConsentDecision::new(DecisionType::Explicit, ["tealium", "analytics"])),
            applied: Mutex::new(Vec::new()),
        });
        let manager = DispatchManagerBuilder::new(settings.subscribe())
            .with_destination(collect.clone())
            .with_transformer(Arc::new(EventFilter("debug")))
            .with_consent_manager(consent.clone())
            .build()
            .unwrap();
        manager.start_dispatch_loop();

        let accepted = manager.track(purchase("A1"), None).await.unwrap();
        assert_eq!(accepted.status, TrackStatus::Accepted);
        let dropped = manager.track(event("debug"), None).await.unwrap();
        assert_eq!(dropped.status, TrackStatus::Dropped);

        sleep(Duration::from_millis(50)).await;
        assert_eq!(consent.applied.lock().unwrap().len(), 1);
        // consent owns queueing once a decision exists
        assert!(collect.delivered().is_empty());

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_e2e_log_destination() {
        let settings = load("");
        let manager = DispatchManagerBuilder::new(settings.subscribe())
            .with_destination(Arc::new(LogDestination::new("log").with_batch_limit(4)))
            .build()
            .unwrap();
        manager.start_dispatch_loop();

        track_all(&manager, (0..6).map(|i| event(&format!("e{i}"))).collect()).await;
        sleep(Duration::from_millis(100)).await;

        let metrics = manager.metrics();
        let (_, log_metrics) = metrics.iter().find(|(id, _)| id == "log").unwrap();
        assert_eq!(log_metrics.delivered_count, 6);
        assert_eq!(log_metrics.in_flight, 0);
        assert_eq!(*manager.queue().queue_size_pending_dispatch("log").borrow(), 0);

        manager.shutdown().await;
        assert!(manager.track(event("late"), None).await.is_err());
    }
}
