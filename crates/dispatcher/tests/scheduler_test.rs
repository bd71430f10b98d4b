#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use tokio::sync::mpsc::UnboundedReceiver;

    use fleet_core::{
        EventSink, FailureReason, FleetError, NodeCapability, NodeId, NodeRegistration,
        ResourceVector, SchedulerEvent, TaskKind, TaskRequirements, TaskSpec, TaskStatus,
    };
    use fleet_dispatcher::{BestFitStrategy, NodeRegistry, TaskScheduler, TaskStore};

    struct Fixture {
        registry: Arc<NodeRegistry>,
        tasks: Arc<TaskStore>,
        scheduler: Arc<TaskScheduler>,
        events: UnboundedReceiver<SchedulerEvent>,
    }

    fn fixture() -> Fixture {
        let (sink, events) = EventSink::channel();
        let registry = Arc::new(NodeRegistry::new(sink.clone()));
        let tasks = Arc::new(TaskStore::new());
        let scheduler = Arc::new(TaskScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&tasks),
            Arc::new(BestFitStrategy::new()),
            sink,
        ));
        Fixture {
            registry,
            tasks,
            scheduler,
            events,
        }
    }

    fn registration(compute: u64) -> NodeRegistration {
        NodeRegistration {
            address: format!("http://gpu-{compute}:9090"),
            capability: NodeCapability {
                accelerator_type: "NVIDIA".to_string(),
                compute_power_units: compute,
                memory_bytes: 64 << 30,
                storage_bytes: 100 << 30,
                supported_frameworks: Default::default(),
            },
        }
    }

    fn spec(compute: u64) -> TaskSpec {
        TaskSpec {
            kind: TaskKind::Training,
            requirements: TaskRequirements {
                accelerator_type: "NVIDIA".to_string(),
                memory_bytes: 1 << 30,
                compute_power_units: compute,
                storage_bytes: 1 << 20,
            },
            input_ref: "s3://datasets/mnist".to_string(),
            output_ref: "s3://results/run-1".to_string(),
            model_ref: Some("s3://models/resnet".to_string()),
            timeout_seconds: None,
        }
    }

    fn drain(events: &mut UnboundedReceiver<SchedulerEvent>) -> Vec<SchedulerEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_best_fit_selects_smallest_sufficient_node() {
        let mut f = fixture();
        let _small = f.registry.register(registration(50)).await.unwrap();
        let medium = f.registry.register(registration(100)).await.unwrap();
        let _large = f.registry.register(registration(200)).await.unwrap();

        let task_id = f.scheduler.submit(spec(80)).await.unwrap();
        let task = f.scheduler.status(task_id).await.unwrap();

        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.assigned_node, Some(medium));

        let node = f.scheduler.node_info(medium).await.unwrap();
        assert_eq!(node.used.compute, 80);
        assert_eq!(node.running_tasks, vec![task_id]);

        let assigned = drain(&mut f.events).into_iter().find_map(|event| match event {
            SchedulerEvent::TaskAssigned {
                task_id: id,
                node_id,
                node_address,
                ..
            } => Some((id, node_id, node_address)),
            _ => None,
        });
        assert_eq!(
            assigned,
            Some((task_id, medium, "http://gpu-100:9090".to_string()))
        );
    }

    #[tokio::test]
    async fn test_zero_requirement_is_rejected_without_side_effects() {
        let f = fixture();
        let node = f.registry.register(registration(100)).await.unwrap();

        let result = f.scheduler.submit(spec(0)).await;
        assert!(matches!(result, Err(FleetError::Validation(_))));

        assert!(f.tasks.list().await.is_empty());
        let snapshot = f.registry.get(node).await.unwrap();
        assert_eq!(snapshot.used, ResourceVector::ZERO);
    }

    #[tokio::test]
    async fn test_no_suitable_node_fails_task_without_retry() {
        let mut f = fixture();
        f.registry.register(registration(50)).await.unwrap();

        let task_id = f.scheduler.submit(spec(80)).await.unwrap();
        let task = f.scheduler.status(task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.failure_reason, Some(FailureReason::NoSuitableNode));
        assert_eq!(task.assigned_node, None);

        let events = drain(&mut f.events);
        assert!(events.iter().any(|event| matches!(
            event,
            SchedulerEvent::TaskFailed {
                reason: FailureReason::NoSuitableNode,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_accelerator_type_must_match() {
        let f = fixture();
        f.registry.register(registration(100)).await.unwrap();

        let mut amd = spec(10);
        amd.requirements.accelerator_type = "AMD".to_string();
        let task_id = f.scheduler.submit(amd).await.unwrap();

        let task = f.scheduler.status(task_id).await.unwrap();
        assert_eq!(task.failure_reason, Some(FailureReason::NoSuitableNode));
    }

    #[tokio::test]
    async fn test_concurrent_submissions_never_overcommit() {
        let f = fixture();
        let node = f.registry.register(registration(100)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let scheduler = Arc::clone(&f.scheduler);
            handles.push(tokio::spawn(async move { scheduler.submit(spec(10)).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let counts = f.tasks.counts().await;
        assert_eq!(counts.running, 10);
        assert_eq!(counts.failed, 10);

        let snapshot = f.registry.get(node).await.unwrap();
        assert_eq!(snapshot.used.compute, 100);
        assert!(snapshot.used.fits_within(&snapshot.total));
    }

    #[tokio::test]
    async fn test_completion_releases_reservation_once() {
        let mut f = fixture();
        let node = f.registry.register(registration(100)).await.unwrap();
        let task_id = f.scheduler.submit(spec(60)).await.unwrap();

        f.scheduler.complete(task_id).await.unwrap();
        let task = f.scheduler.status(task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(f.registry.get(node).await.unwrap().used, ResourceVector::ZERO);

        drain(&mut f.events);
        f.scheduler.complete(task_id).await.unwrap();
        f.scheduler
            .fail(task_id, FailureReason::Timeout)
            .await
            .unwrap();
        assert_eq!(
            f.scheduler.status(task_id).await.unwrap().status,
            TaskStatus::Completed
        );
        assert!(drain(&mut f.events).is_empty());
    }

    #[tokio::test]
    async fn test_assigned_node_never_changes() {
        let f = fixture();
        let first = f.registry.register(registration(100)).await.unwrap();
        let second = f.registry.register(registration(100)).await.unwrap();

        let task_id = f.scheduler.submit(spec(10)).await.unwrap();
        assert_eq!(
            f.scheduler.status(task_id).await.unwrap().assigned_node,
            Some(first)
        );

        let result = f.scheduler.assign(task_id, second).await;
        assert!(matches!(result, Err(FleetError::InvalidTransition { .. })));
        assert!(matches!(
            f.scheduler.schedule(task_id).await,
            Err(FleetError::InvalidTransition { .. })
        ));
        assert_eq!(
            f.scheduler.status(task_id).await.unwrap().assigned_node,
            Some(first)
        );
        assert_eq!(
            f.registry.get(second).await.unwrap().used,
            ResourceVector::ZERO
        );
    }

    #[tokio::test]
    async fn test_maintenance_node_is_not_assigned() {
        let f = fixture();
        let node = f.registry.register(registration(100)).await.unwrap();
        f.registry
            .set_maintenance(node, true, Utc::now())
            .await
            .unwrap();

        let task_id = f.scheduler.submit(spec(10)).await.unwrap();
        assert_eq!(
            f.scheduler.status(task_id).await.unwrap().status,
            TaskStatus::Failed
        );

        let stats = f.scheduler.stats().await;
        assert_eq!(stats.nodes_maintenance, 1);
        assert_eq!(stats.tasks.failed, 1);
    }

    #[tokio::test]
    async fn test_assign_to_unknown_node() {
        let f = fixture();
        f.registry.register(registration(100)).await.unwrap();
        let task_id = f.scheduler.submit(spec(10)).await.unwrap();

        assert!(matches!(
            f.scheduler.assign(task_id, NodeId(99)).await,
            Err(FleetError::NodeNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_deregister_requires_no_running_tasks() {
        let f = fixture();
        let node = f.registry.register(registration(100)).await.unwrap();
        let task_id = f.scheduler.submit(spec(10)).await.unwrap();

        assert!(matches!(
            f.registry.deregister(node).await,
            Err(FleetError::Validation(_))
        ));

        f.scheduler
            .fail(task_id, FailureReason::BackendExecutionError)
            .await
            .unwrap();
        f.registry.deregister(node).await.unwrap();
        assert!(f.registry.is_empty().await);
    }
}
