#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use fleet_core::{
        config::StorageConfig, ExecutionBackend, ExecutionOutput, ExecutionRequest,
        FailureReason, FleetError, FleetResult, HealthThresholds, LedgerGateway, NodeId,
        NodeRegistration, ResourceVector, TaskId, TaskKind, TaskRecord, TaskRequirements,
        TaskStorage,
    };
    use fleet_node::{
        BackendRegistry, ExecutionState, ExecutorConfig, LocalTaskStorage, NoopBackend,
        ResourceManager, TaskAssignment, TaskExecutor,
    };

    const GIB: u64 = 1 << 30;

    #[derive(Default)]
    struct RecordingLedger {
        completions: Mutex<Vec<TaskId>>,
        failures: Mutex<Vec<(TaskId, FailureReason)>>,
        refuse_reports: bool,
    }

    impl RecordingLedger {
        fn completions(&self) -> Vec<TaskId> {
            self.completions.lock().unwrap().clone()
        }

        fn failures(&self) -> Vec<(TaskId, FailureReason)> {
            self.failures.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LedgerGateway for RecordingLedger {
        async fn register_node(&self, _registration: NodeRegistration) -> FleetResult<NodeId> {
            Ok(NodeId(1))
        }

        async fn submit_heartbeat(&self, _node_id: NodeId) -> FleetResult<()> {
            Ok(())
        }

        async fn report_completion(&self, task_id: TaskId) -> FleetResult<()> {
            self.completions.lock().unwrap().push(task_id);
            if self.refuse_reports {
                return Err(FleetError::Network("ledger offline".to_string()));
            }
            Ok(())
        }

        async fn report_failure(&self, task_id: TaskId, reason: FailureReason) -> FleetResult<()> {
            self.failures.lock().unwrap().push((task_id, reason));
            if self.refuse_reports {
                return Err(FleetError::Network("ledger offline".to_string()));
            }
            Ok(())
        }

        async fn task_info(&self, task_id: TaskId) -> FleetResult<TaskRecord> {
            Err(FleetError::task_not_found(task_id))
        }
    }

    struct SleepingBackend(Duration);

    #[async_trait]
    impl ExecutionBackend for SleepingBackend {
        fn name(&self) -> &str {
            "sleeping"
        }

        fn supports(&self, _kind: TaskKind) -> bool {
            true
        }

        async fn execute(&self, request: &ExecutionRequest) -> FleetResult<ExecutionOutput> {
            tokio::time::sleep(self.0).await;
            Ok(ExecutionOutput {
                output_location: request.output_ref.clone(),
                duration_ms: self.0.as_millis() as u64,
            })
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl ExecutionBackend for FailingBackend {
        fn name(&self) -> &str {
            "failing"
        }

        fn supports(&self, _kind: TaskKind) -> bool {
            true
        }

        async fn execute(&self, _request: &ExecutionRequest) -> FleetResult<ExecutionOutput> {
            Err(FleetError::backend("CUDA error: out of memory"))
        }
    }

    /// Storage whose area creation takes a while, to widen the admission window.
    #[derive(Default)]
    struct SlowAreaStorage {
        delay: Duration,
        deleted: Mutex<Vec<TaskId>>,
    }

    #[async_trait]
    impl TaskStorage for SlowAreaStorage {
        async fn create_area(&self, task_id: TaskId) -> FleetResult<PathBuf> {
            tokio::time::sleep(self.delay).await;
            Ok(PathBuf::from(format!("/tmp/areas/{task_id}")))
        }

        async fn write(&self, _task_id: TaskId, _name: &str, _data: &[u8]) -> FleetResult<()> {
            Ok(())
        }

        async fn read(&self, _task_id: TaskId, _name: &str) -> FleetResult<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn delete_area(&self, task_id: TaskId) -> FleetResult<()> {
            self.deleted.lock().unwrap().push(task_id);
            Ok(())
        }

        async fn usage_bytes(&self) -> FleetResult<u64> {
            Ok(0)
        }
    }

    struct Fixture {
        executor: TaskExecutor,
        ledger: Arc<RecordingLedger>,
        resources: Arc<ResourceManager>,
        dir: TempDir,
    }

    fn registry(backend: Arc<dyn ExecutionBackend>) -> BackendRegistry {
        let mut registry = BackendRegistry::new();
        registry.register(backend);
        registry
    }

    fn executor_config(max_concurrent_tasks: usize) -> ExecutorConfig {
        ExecutorConfig {
            max_concurrent_tasks,
            task_timeout: Duration::from_secs(60),
            report_timeout: Duration::from_secs(1),
            ..Default::default()
        }
    }

    fn fixture_on(
        storage: Arc<dyn TaskStorage>,
        dir: TempDir,
        backends: BackendRegistry,
        config: ExecutorConfig,
        ledger: RecordingLedger,
    ) -> Fixture {
        let resources = Arc::new(ResourceManager::new(
            100,
            16 * GIB,
            10 * GIB,
            HealthThresholds::default(),
            storage,
        ));
        let ledger = Arc::new(ledger);
        let executor = TaskExecutor::new(
            config,
            Arc::clone(&resources),
            Arc::new(backends),
            Arc::clone(&ledger) as Arc<dyn LedgerGateway>,
        );
        Fixture {
            executor,
            ledger,
            resources,
            dir,
        }
    }

    fn local_storage(dir: &TempDir) -> Arc<dyn TaskStorage> {
        Arc::new(LocalTaskStorage::new(&StorageConfig {
            data_dir: dir.path().join("data").to_string_lossy().into_owned(),
            temp_dir: dir.path().join("temp").to_string_lossy().into_owned(),
            max_storage_bytes: 10 * GIB,
        }))
    }

    fn fixture_with(
        backends: BackendRegistry,
        max_concurrent_tasks: usize,
        ledger: RecordingLedger,
    ) -> Fixture {
        let dir = TempDir::new().unwrap();
        let storage = local_storage(&dir);
        fixture_on(
            storage,
            dir,
            backends,
            executor_config(max_concurrent_tasks),
            ledger,
        )
    }

    fn fixture(backend: Arc<dyn ExecutionBackend>) -> Fixture {
        fixture_with(registry(backend), 4, RecordingLedger::default())
    }

    fn assignment(compute: u64, memory: u64, storage: u64) -> TaskAssignment {
        TaskAssignment {
            task_id: TaskId::new(),
            kind: TaskKind::Training,
            requirements: TaskRequirements {
                accelerator_type: "NVIDIA".to_string(),
                memory_bytes: memory,
                compute_power_units: compute,
                storage_bytes: storage,
            },
            input_ref: "s3://datasets/imagenet".to_string(),
            output_ref: "s3://checkpoints/run-1".to_string(),
            model_ref: Some("resnet50".to_string()),
            timeout_seconds: None,
        }
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached within 5s");
    }

    #[tokio::test]
    async fn test_task_completes_and_releases_everything() {
        let fx = fixture(Arc::new(NoopBackend));
        let task = assignment(40, 4 * GIB, GIB);

        fx.executor.submit(task.clone()).await.unwrap();
        wait_until(|| fx.ledger.completions().len() == 1).await;

        assert_eq!(fx.executor.state(task.task_id), Some(ExecutionState::Completed));
        assert_eq!(fx.ledger.completions(), vec![task.task_id]);
        assert!(fx.ledger.failures().is_empty());
        assert_eq!(fx.resources.used(), ResourceVector::ZERO);
        assert_eq!(fx.executor.active_count(), 0);

        let area = fx.dir.path().join("data/tasks").join(task.task_id.to_string());
        assert!(!area.exists());

        let record = fx.executor.record(task.task_id).unwrap();
        assert_eq!(record.output_location.as_deref(), Some("s3://checkpoints/run-1"));
        assert!(!record.holds_reservation());
    }

    #[tokio::test]
    async fn test_resources_are_held_while_running() {
        let fx = fixture(Arc::new(SleepingBackend(Duration::from_millis(300))));
        let task = assignment(40, 4 * GIB, GIB);

        fx.executor.submit(task.clone()).await.unwrap();
        assert_eq!(fx.resources.used(), ResourceVector::new(40, 4 * GIB, GIB));
        wait_until(|| fx.executor.state(task.task_id) == Some(ExecutionState::Running)).await;
        assert_eq!(fx.executor.active_count(), 1);

        wait_until(|| fx.ledger.completions().len() == 1).await;
        assert_eq!(fx.resources.used(), ResourceVector::ZERO);
    }

    #[tokio::test]
    async fn test_backend_failure_is_reported_once() {
        let fx = fixture(Arc::new(FailingBackend));
        let task = assignment(10, GIB, GIB);

        fx.executor.submit(task.clone()).await.unwrap();
        wait_until(|| !fx.ledger.failures().is_empty()).await;

        assert_eq!(
            fx.executor.state(task.task_id),
            Some(ExecutionState::Failed(FailureReason::BackendExecutionError))
        );
        assert_eq!(
            fx.ledger.failures(),
            vec![(task.task_id, FailureReason::BackendExecutionError)]
        );
        assert!(fx.ledger.completions().is_empty());
        assert_eq!(fx.resources.used(), ResourceVector::ZERO);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fx.ledger.failures().len(), 1);
    }

    #[tokio::test]
    async fn test_task_timeout() {
        let fx = fixture(Arc::new(SleepingBackend(Duration::from_secs(30))));
        let mut task = assignment(10, GIB, GIB);
        task.timeout_seconds = Some(1);

        fx.executor.submit(task.clone()).await.unwrap();
        wait_until(|| !fx.ledger.failures().is_empty()).await;

        assert_eq!(
            fx.executor.state(task.task_id),
            Some(ExecutionState::Failed(FailureReason::Timeout))
        );
        assert_eq!(fx.ledger.failures(), vec![(task.task_id, FailureReason::Timeout)]);
        assert_eq!(fx.resources.used(), ResourceVector::ZERO);
    }

    #[tokio::test]
    async fn test_storage_failure_rolls_back_gpu_reservation() {
        let fx = fixture(Arc::new(NoopBackend));
        let task = assignment(50, 8 * GIB, 11 * GIB);

        let result = fx.executor.submit(task.clone()).await;

        assert!(matches!(result, Err(FleetError::ResourceExhausted(_))));
        assert_eq!(
            fx.executor.state(task.task_id),
            Some(ExecutionState::Failed(FailureReason::ResourceExhausted))
        );
        assert_eq!(fx.resources.used(), ResourceVector::ZERO);
        assert_eq!(
            fx.ledger.failures(),
            vec![(task.task_id, FailureReason::ResourceExhausted)]
        );
    }

    #[tokio::test]
    async fn test_gpu_exhaustion_rejects_without_reserving() {
        let fx = fixture(Arc::new(SleepingBackend(Duration::from_millis(500))));
        let first = assignment(70, GIB, GIB);
        let second = assignment(40, GIB, GIB);

        fx.executor.submit(first).await.unwrap();
        let result = fx.executor.submit(second.clone()).await;

        assert!(matches!(result, Err(FleetError::ResourceExhausted(_))));
        assert_eq!(fx.resources.used(), ResourceVector::new(70, GIB, GIB));
        assert_eq!(
            fx.executor.state(second.task_id),
            Some(ExecutionState::Failed(FailureReason::ResourceExhausted))
        );
    }

    #[tokio::test]
    async fn test_concurrency_limit_rejects_extra_tasks() {
        let fx = fixture_with(
            registry(Arc::new(SleepingBackend(Duration::from_millis(500)))),
            1,
            RecordingLedger::default(),
        );
        let first = assignment(10, GIB, GIB);
        let second = assignment(10, GIB, GIB);

        fx.executor.submit(first.clone()).await.unwrap();
        let result = fx.executor.submit(second.clone()).await;

        assert!(matches!(result, Err(FleetError::ResourceExhausted(_))));
        assert_eq!(fx.resources.used(), ResourceVector::new(10, GIB, GIB));

        wait_until(|| fx.ledger.completions().len() == 1).await;
        // the permit is returned once the run task exits after reporting
        tokio::time::sleep(Duration::from_millis(50)).await;
        let third = assignment(10, GIB, GIB);
        fx.executor.submit(third).await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_task_id_is_rejected() {
        let fx = fixture(Arc::new(NoopBackend));
        let task = assignment(10, GIB, GIB);

        fx.executor.submit(task.clone()).await.unwrap();
        let result = fx.executor.submit(task).await;

        assert!(matches!(result, Err(FleetError::Validation(_))));
    }

    #[tokio::test]
    async fn test_missing_backend_fails_task() {
        let fx = fixture_with(BackendRegistry::new(), 4, RecordingLedger::default());
        let task = assignment(10, GIB, GIB);

        let result = fx.executor.submit(task.clone()).await;

        assert!(matches!(result, Err(FleetError::BackendExecution(_))));
        assert_eq!(
            fx.executor.state(task.task_id),
            Some(ExecutionState::Failed(FailureReason::BackendExecutionError))
        );
        assert_eq!(fx.resources.used(), ResourceVector::ZERO);
    }

    #[tokio::test]
    async fn test_ledger_failure_keeps_local_state() {
        let fx = fixture_with(
            registry(Arc::new(NoopBackend)),
            4,
            RecordingLedger {
                refuse_reports: true,
                ..Default::default()
            },
        );
        let task = assignment(10, GIB, GIB);

        fx.executor.submit(task.clone()).await.unwrap();
        wait_until(|| fx.ledger.completions().len() == 1).await;

        assert_eq!(fx.executor.state(task.task_id), Some(ExecutionState::Completed));
        assert_eq!(fx.resources.used(), ResourceVector::ZERO);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_running_task_within_deadline() {
        let fx = fixture(Arc::new(SleepingBackend(Duration::from_secs(30))));
        let task = assignment(60, 8 * GIB, 2 * GIB);

        fx.executor.submit(task.clone()).await.unwrap();
        wait_until(|| fx.executor.state(task.task_id) == Some(ExecutionState::Running)).await;

        let started = std::time::Instant::now();
        let report = fx.executor.shutdown(Duration::from_secs(2)).await;
        assert!(started.elapsed() < Duration::from_secs(2));

        assert_eq!(report.cancelled, vec![task.task_id]);
        assert!(report.abandoned.is_empty());
        assert_eq!(
            fx.executor.state(task.task_id),
            Some(ExecutionState::Failed(FailureReason::Shutdown))
        );
        assert_eq!(fx.ledger.failures(), vec![(task.task_id, FailureReason::Shutdown)]);
        assert_eq!(fx.resources.used(), ResourceVector::ZERO);
        assert!(!fx.executor.is_accepting());

        let late = assignment(10, GIB, GIB);
        let result = fx.executor.submit(late).await;
        assert!(matches!(result, Err(FleetError::ResourceExhausted(_))));
        assert_eq!(fx.resources.used(), ResourceVector::ZERO);
    }

    #[tokio::test]
    async fn test_unhealthy_accelerator_rejects_admission() {
        let fx = fixture(Arc::new(NoopBackend));
        let mut sample = fleet_core::GpuTelemetry::idle(16 * GIB);
        sample.utilization_percent = 99.0;
        fx.resources.apply_telemetry(sample);

        let task = assignment(10, GIB, GIB);
        let result = fx.executor.submit(task.clone()).await;

        assert!(matches!(result, Err(FleetError::ResourceExhausted(_))));
        assert_eq!(fx.resources.used(), ResourceVector::ZERO);
    }

    #[tokio::test]
    async fn test_shutdown_during_area_creation_releases_all_reservations() {
        let storage = Arc::new(SlowAreaStorage {
            delay: Duration::from_millis(500),
            ..Default::default()
        });
        let fx = fixture_on(
            Arc::clone(&storage) as Arc<dyn TaskStorage>,
            TempDir::new().unwrap(),
            registry(Arc::new(NoopBackend)),
            executor_config(4),
            RecordingLedger::default(),
        );
        let task = assignment(30, 2 * GIB, 300);

        let submitting = {
            let executor = fx.executor.clone();
            let task = task.clone();
            tokio::spawn(async move { executor.submit(task).await })
        };
        wait_until(|| fx.resources.used().storage == 300).await;
        assert_eq!(fx.resources.used(), ResourceVector::new(30, 2 * GIB, 300));

        let report = fx.executor.shutdown(Duration::from_millis(200)).await;

        assert!(report.cancelled.is_empty());
        assert_eq!(report.abandoned, vec![task.task_id]);
        assert_eq!(fx.resources.used(), ResourceVector::ZERO);
        assert_eq!(
            fx.executor.state(task.task_id),
            Some(ExecutionState::Failed(FailureReason::Shutdown))
        );

        let result = submitting.await.unwrap();
        assert!(matches!(result, Err(FleetError::ResourceExhausted(_))));
        assert_eq!(fx.resources.used(), ResourceVector::ZERO);
        assert_eq!(fx.resources.snapshot().inconsistencies, 0);
        assert!(storage.deleted.lock().unwrap().contains(&task.task_id));
        assert!(fx.ledger.failures().is_empty());
    }

    #[tokio::test]
    async fn test_oldest_finished_records_are_dropped() {
        let dir = TempDir::new().unwrap();
        let storage = local_storage(&dir);
        let fx = fixture_on(
            storage,
            dir,
            registry(Arc::new(NoopBackend)),
            ExecutorConfig {
                retained_records: 2,
                ..executor_config(4)
            },
            RecordingLedger::default(),
        );

        let mut submitted = Vec::new();
        for i in 0..4 {
            let task = assignment(10, GIB, 100);
            fx.executor.submit(task.clone()).await.unwrap();
            wait_until(|| fx.ledger.completions().len() == i + 1).await;
            submitted.push(task.task_id);
        }

        let records = fx.executor.records();
        assert_eq!(records.len(), 2);
        assert_eq!(fx.executor.state(submitted[0]), None);
        assert_eq!(fx.executor.state(submitted[1]), None);
        assert_eq!(fx.executor.state(submitted[3]), Some(ExecutionState::Completed));
        assert_eq!(fx.resources.used(), ResourceVector::ZERO);
    }
}
