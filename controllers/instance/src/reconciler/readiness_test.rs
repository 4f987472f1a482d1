//! Unit tests for the readiness watcher

#[cfg(test)]
mod tests {
    use crate::reconciler::{ReadinessWatcher, WorkloadKind};
    use crate::test_utils::*;
    use crds::{
        EnvironmentType, Instance, VirtualMachineInstance, VirtualMachineInstanceSpec,
    };
    use futures::StreamExt;
    use futures::channel::mpsc;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube_runtime::reflector::ObjectRef;
    use serde_json::json;
    use std::time::Duration;

    const POLL: Duration = Duration::from_millis(10);

    fn seed_vmi(cluster: &FakeCluster) {
        cluster.seed(&VirtualMachineInstance {
            metadata: ObjectMeta {
                name: Some(INSTANCE_NAME.to_string()),
                namespace: Some(INSTANCE_NAMESPACE.to_string()),
                ..Default::default()
            },
            spec: VirtualMachineInstanceSpec::default(),
            status: None,
        });
    }

    fn mark_vmi_ready(cluster: &FakeCluster) {
        cluster.set_status::<VirtualMachineInstance>(
            INSTANCE_NAMESPACE,
            INSTANCE_NAME,
            json!({
                "phase": "Running",
                "conditions": [{"type": "Ready", "status": "True"}]
            }),
        );
    }

    #[tokio::test]
    async fn test_signals_when_workload_becomes_ready() {
        let cluster = FakeCluster::new();
        seed_vmi(&cluster);
        let (tx, mut rx) = mpsc::unbounded();
        let watcher = ReadinessWatcher::with_timing(cluster.clone(), tx, POLL, Duration::from_secs(5));

        watcher.watch(INSTANCE_NAMESPACE, INSTANCE_NAME, WorkloadKind::VirtualMachineInstance);
        assert!(watcher.is_watching(INSTANCE_NAMESPACE, INSTANCE_NAME));
        tokio::time::sleep(POLL * 3).await;
        assert!(rx.try_next().is_err(), "no signal before the workload is ready");

        mark_vmi_ready(&cluster);
        let reference = tokio::time::timeout(Duration::from_secs(2), rx.next())
            .await
            .expect("signal before the deadline")
            .expect("channel open");

        assert_eq!(
            reference,
            ObjectRef::<Instance>::new(INSTANCE_NAME).within(INSTANCE_NAMESPACE)
        );
        tokio::time::sleep(POLL).await;
        assert!(!watcher.is_watching(INSTANCE_NAMESPACE, INSTANCE_NAME));
        // Readiness polling never writes
        assert_eq!(cluster.total_writes(), 0);
    }

    #[tokio::test]
    async fn test_deployment_readiness() {
        let cluster = FakeCluster::new();
        cluster.seed(&Deployment {
            metadata: ObjectMeta {
                name: Some(INSTANCE_NAME.to_string()),
                namespace: Some(INSTANCE_NAMESPACE.to_string()),
                ..Default::default()
            },
            ..Default::default()
        });
        cluster.set_status::<Deployment>(INSTANCE_NAMESPACE, INSTANCE_NAME, json!({"readyReplicas": 1}));
        let (tx, mut rx) = mpsc::unbounded();
        let watcher = ReadinessWatcher::with_timing(cluster, tx, POLL, Duration::from_secs(5));

        watcher.watch(INSTANCE_NAMESPACE, INSTANCE_NAME, WorkloadKind::Deployment);

        let signalled = tokio::time::timeout(Duration::from_secs(2), rx.next()).await;
        assert!(matches!(signalled, Ok(Some(_))));
    }

    #[tokio::test]
    async fn test_gives_up_after_timeout() {
        let cluster = FakeCluster::new();
        seed_vmi(&cluster);
        let (tx, mut rx) = mpsc::unbounded();
        let watcher = ReadinessWatcher::with_timing(cluster, tx, POLL, Duration::from_millis(50));

        watcher.watch(INSTANCE_NAMESPACE, INSTANCE_NAME, WorkloadKind::VirtualMachineInstance);
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(rx.try_next().is_err());
        assert!(!watcher.is_watching(INSTANCE_NAMESPACE, INSTANCE_NAME));
    }

    #[tokio::test]
    async fn test_missing_workload_is_polled_until_it_appears() {
        let cluster = FakeCluster::new();
        let (tx, mut rx) = mpsc::unbounded();
        let watcher = ReadinessWatcher::with_timing(cluster.clone(), tx, POLL, Duration::from_secs(5));

        watcher.watch(INSTANCE_NAMESPACE, INSTANCE_NAME, WorkloadKind::VirtualMachineInstance);
        tokio::time::sleep(POLL * 3).await;
        seed_vmi(&cluster);
        mark_vmi_ready(&cluster);

        let signalled = tokio::time::timeout(Duration::from_secs(2), rx.next()).await;
        assert!(matches!(signalled, Ok(Some(_))));
    }

    #[tokio::test]
    async fn test_cancel_stops_the_watch() {
        let cluster = FakeCluster::new();
        seed_vmi(&cluster);
        let (tx, mut rx) = mpsc::unbounded();
        let watcher = ReadinessWatcher::with_timing(cluster.clone(), tx, POLL, Duration::from_secs(5));

        watcher.watch(INSTANCE_NAMESPACE, INSTANCE_NAME, WorkloadKind::VirtualMachineInstance);
        watcher.cancel(INSTANCE_NAMESPACE, INSTANCE_NAME);
        assert!(!watcher.is_watching(INSTANCE_NAMESPACE, INSTANCE_NAME));

        mark_vmi_ready(&cluster);
        tokio::time::sleep(POLL * 5).await;
        assert!(rx.try_next().is_err());

        // Cancelling twice is harmless
        watcher.cancel(INSTANCE_NAMESPACE, INSTANCE_NAME);
    }

    #[tokio::test]
    async fn test_reconciler_watches_created_workloads() {
        let (tx, mut rx) = mpsc::unbounded();
        let h = TestHarness::new(
            &create_test_instance(true),
            &create_test_template(vec![create_test_environment(
                EnvironmentType::VirtualMachine,
                false,
            )]),
        );
        let watcher = ReadinessWatcher::with_timing(h.cluster.clone(), tx, POLL, Duration::from_secs(5));
        let reconciler = crate::reconciler::Reconciler::new(
            h.cluster.clone(),
            std::sync::Arc::new(h.events.clone()),
            test_config(),
        )
        .with_readiness(watcher.clone());

        reconciler.reconcile(INSTANCE_NAMESPACE, INSTANCE_NAME).await.unwrap();
        assert!(watcher.is_watching(INSTANCE_NAMESPACE, INSTANCE_NAME));

        mark_vmi_ready(&h.cluster);
        let signalled = tokio::time::timeout(Duration::from_secs(2), rx.next()).await;
        assert!(matches!(signalled, Ok(Some(_))));

        // Deleting the instance cancels any pending watch
        reconciler.reconcile(INSTANCE_NAMESPACE, INSTANCE_NAME).await.unwrap();
        h.cluster.remove::<Instance>(INSTANCE_NAMESPACE, INSTANCE_NAME);
        reconciler.reconcile(INSTANCE_NAMESPACE, INSTANCE_NAME).await.unwrap();
        assert!(!watcher.is_watching(INSTANCE_NAMESPACE, INSTANCE_NAME));
    }
}
