#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::{broadcast, mpsc};

    use fleet_core::{
        config::DispatcherConfig, AssignmentNotice, FailureReason, FleetError, FleetResult,
        LedgerGateway, NodeCapability, NodeRegistration, TaskKind, TaskRequirements, TaskSpec,
        TaskStatus,
    };
    use fleet_dispatcher::{
        AssignmentNotifier, ChannelAssignmentNotifier, DispatcherService, LocalLedgerGateway,
    };

    struct RefusingNotifier;

    #[async_trait]
    impl AssignmentNotifier for RefusingNotifier {
        async fn notify(&self, _notice: &AssignmentNotice) -> FleetResult<()> {
            Err(FleetError::Network("connection refused".to_string()))
        }

        fn name(&self) -> &str {
            "refusing"
        }
    }

    fn registration() -> NodeRegistration {
        NodeRegistration {
            address: "http://gpu-7:9090".to_string(),
            capability: NodeCapability {
                accelerator_type: "NVIDIA".to_string(),
                compute_power_units: 100,
                memory_bytes: 1 << 34,
                storage_bytes: 1 << 34,
                supported_frameworks: Default::default(),
            },
        }
    }

    fn spec() -> TaskSpec {
        TaskSpec {
            kind: TaskKind::Rendering,
            requirements: TaskRequirements {
                accelerator_type: "NVIDIA".to_string(),
                memory_bytes: 1 << 20,
                compute_power_units: 10,
                storage_bytes: 1 << 20,
            },
            input_ref: "scene.blend".to_string(),
            output_ref: "frames/".to_string(),
            model_ref: None,
            timeout_seconds: None,
        }
    }

    #[tokio::test]
    async fn test_assignment_is_relayed_to_node() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let service = DispatcherService::new(
            &DispatcherConfig::default(),
            Arc::new(ChannelAssignmentNotifier::new(tx)),
        );
        let (shutdown_tx, _) = broadcast::channel(1);
        service.start(&shutdown_tx).await.unwrap();

        service.register_node(registration()).await.unwrap();
        let task = service.submit_task(spec()).await.unwrap();
        assert_eq!(task.status, TaskStatus::Running);

        let notice = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notice.task_id, task.id);
        assert_eq!(notice.node_address, "http://gpu-7:9090");

        let _ = shutdown_tx.send(());
        service.stop().await;
    }

    #[tokio::test]
    async fn test_undeliverable_assignment_fails_task() {
        let service = DispatcherService::new(
            &DispatcherConfig::default(),
            Arc::new(RefusingNotifier),
        );
        let (shutdown_tx, _) = broadcast::channel(1);
        service.start(&shutdown_tx).await.unwrap();

        let node_id = service.register_node(registration()).await.unwrap();
        let task = service.submit_task(spec()).await.unwrap();

        let mut status = TaskStatus::Running;
        for _ in 0..50 {
            status = service.task(task.id).await.unwrap().status;
            if status == TaskStatus::Failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(status, TaskStatus::Failed);
        assert_eq!(
            service.task(task.id).await.unwrap().failure_reason,
            Some(FailureReason::NodeUnavailable)
        );
        assert!(service.node(node_id).await.unwrap().used.is_zero());

        let _ = shutdown_tx.send(());
        service.stop().await;
    }

    #[tokio::test]
    async fn test_local_gateway_round_trip() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let service = Arc::new(DispatcherService::new(
            &DispatcherConfig::default(),
            Arc::new(ChannelAssignmentNotifier::new(tx)),
        ));
        let gateway = LocalLedgerGateway::new(Arc::clone(&service));

        let node_id = gateway.register_node(registration()).await.unwrap();
        gateway.submit_heartbeat(node_id).await.unwrap();

        let task = service.submit_task(spec()).await.unwrap();
        let fetched = gateway.task_info(task.id).await.unwrap();
        assert_eq!(fetched.assigned_node, Some(node_id));

        gateway.report_completion(task.id).await.unwrap();
        assert_eq!(
            service.task(task.id).await.unwrap().status,
            TaskStatus::Completed
        );

        let stats = service.stats().await;
        assert_eq!(stats.nodes_active, 1);
        assert_eq!(stats.tasks.completed, 1);
    }
}
