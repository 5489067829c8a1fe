use async_trait::async_trait;
use mockall::{Sequence, mock};
use serde_json::{Value, json};
use service_host::error::{Error, Result};
use service_host::service::{
    HealthReport, ManagerSettings, Service, ServiceDescriptor, ServiceManager, ServiceOptions,
    ServiceRegistry, ServiceState,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

mock! {
    pub ServiceMock {}

    #[async_trait]
    impl Service for ServiceMock {
        async fn configure(&self, options: &ServiceOptions) -> Result<()>;
        async fn start(&self) -> Result<()>;
        async fn stop(&self) -> Result<()>;
        async fn health(&self) -> HealthReport;
        fn operations(&self) -> Vec<&'static str>;
        async fn call(&self, operation: &str, payload: Value) -> Result<Value>;
    }
}

// Helper function to build a manager around a single mocked service
async fn manager_with(mock: MockServiceMock) -> Result<ServiceManager> {
    let shared: Arc<dyn Service> = Arc::new(mock);
    let slot = Mutex::new(Some(shared));

    let mut registry = ServiceRegistry::new();
    registry.register(ServiceDescriptor::new("mocked", "Mocked service"), move |_| {
        slot.lock()
            .unwrap()
            .take()
            .expect("mocked service instantiated twice")
    })?;

    ServiceManager::build(
        &registry,
        &["mocked".to_string()],
        &BTreeMap::new(),
        ManagerSettings::default(),
    )
    .await
}

#[tokio::test]
async fn test_calls_follow_lifecycle_order() -> Result<()> {
    let mut mock = MockServiceMock::new();
    let mut seq = Sequence::new();

    mock.expect_configure()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(()));
    mock.expect_start()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|| Ok(()));
    mock.expect_stop()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|| Ok(()));
    mock.expect_operations().returning(Vec::new);

    let manager = manager_with(mock).await?;
    manager.start_all().await;
    manager.stop("mocked").await?;

    assert_eq!(manager.snapshot().state_of("mocked"), Some(ServiceState::Stopped));
    Ok(())
}

#[tokio::test]
async fn test_call_is_routed_with_payload() -> Result<()> {
    let mut mock = MockServiceMock::new();
    mock.expect_configure().returning(|_| Ok(()));
    mock.expect_start().returning(|| Ok(()));
    mock.expect_operations().returning(|| vec!["sum"]);
    mock.expect_call()
        .withf(|operation, payload| operation == "sum" && payload == &json!([1, 2]))
        .times(1)
        .returning(|_, _| Ok(json!(3)));

    let manager = manager_with(mock).await?;
    manager.start_all().await;

    let result = manager.dispatch("mocked", "sum", json!([1, 2])).await?;
    assert_eq!(result, json!(3));
    Ok(())
}

#[tokio::test]
async fn test_health_is_not_asked_unless_running() -> Result<()> {
    let mut mock = MockServiceMock::new();
    mock.expect_configure().returning(|_| Ok(()));
    mock.expect_start()
        .returning(|| Err(Error::Other("no route to host".to_string())));
    mock.expect_health().never();
    mock.expect_operations().returning(Vec::new);

    let manager = manager_with(mock).await?;
    manager.start_all().await;

    let health = manager.health("mocked").await?;
    assert_eq!(health.state, ServiceState::Error);
    assert!(health.health.detail.unwrap().contains("no route to host"));
    Ok(())
}
