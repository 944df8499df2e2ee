/// Integration tests for the model lifecycle
///
/// These tests drive the public service contract end to end:
/// - Training on synthetic rows and publishing versions
/// - Version ordering, pointer consistency and rollback
/// - Prediction with defaults, batch isolation and pinned versions

use lead_model_manager::{
    config::Config,
    error::AppError,
    events::ChannelEventSink,
    ml::{
        BaggedTreeClassifier, BatchPredictionItem, Classifier, FeatureMap, Hyperparameters,
        InMemoryDataSource, LeadScoringService, ModelArtifact, ModelMetrics, ModelType,
        NewVersion, RecommendedAction, TrainingDataset, TrainingResult, TrainingRow,
    },
    registry::ModelRegistry,
    state::InMemoryModelStore,
    tenant::TenantId,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

/// Linearly separable rows: a lead converts exactly when its source score is
/// above 50; converted leads also book more appointments.
fn separable_rows(n: usize, tenant: &str) -> Vec<TrainingRow> {
    (0..n)
        .map(|i| {
            let score = (i * 37 % 100) as f64;
            let converted = score > 50.0;
            let appointments = if converted { 2 + i % 3 } else { i % 2 };
            let columns: FeatureMap = serde_json::from_value(json!({
                "lead_source_score": score,
                "response_time_minutes": 30 + i % 90,
                "inbound_messages_count": i % 7,
                "outbound_messages_count": i % 5,
                "appointments_count": appointments,
                "market_activity_score": 40 + i % 20,
            }))
            .unwrap();
            TrainingRow::new(converted, columns).with_tenant(tenant)
        })
        .collect()
}

fn fast_config() -> Config {
    let mut config = Config::default();
    config.training.n_estimators = 25;
    config.training.importance_repeats = 2;
    config
}

async fn setup_service(rows: Vec<TrainingRow>) -> (LeadScoringService, InMemoryDataSource) {
    let source = InMemoryDataSource::new(rows);
    let service = LeadScoringService::new(
        fast_config(),
        Arc::new(InMemoryModelStore::new()),
        Arc::new(source.clone()),
        Arc::new(ChannelEventSink::new(64)),
    )
    .await
    .unwrap();
    (service, source)
}

fn small_artifact() -> (ModelArtifact, NewVersion) {
    let names = vec!["lead_source_score".to_string(), "appointments_count".to_string()];
    let dataset = TrainingDataset::from_rows(&separable_rows(60, "acme"), &names).unwrap();
    let mut classifier = BaggedTreeClassifier::new(Hyperparameters {
        n_estimators: 3,
        ..Hyperparameters::default()
    });
    classifier.train(&dataset).unwrap();

    let new_version = NewVersion {
        model_type: ModelType::BaggedTrees,
        metrics: ModelMetrics::default(),
        feature_names: names.clone(),
        training_data_size: dataset.n_samples(),
        test_size: 0,
        hyperparameters: classifier.hyperparameters().clone(),
    };
    (ModelArtifact::new(names, classifier), new_version)
}

#[tokio::test]
async fn test_versions_are_distinct_and_newest_first() {
    let registry = ModelRegistry::open(
        Arc::new(InMemoryModelStore::new()),
        Arc::new(ChannelEventSink::new(64)),
    )
    .await
    .unwrap();
    let tenant = TenantId::parse("acme").unwrap();
    let (artifact, new_version) = small_artifact();

    let mut saved = Vec::new();
    for _ in 0..10 {
        saved.push(registry.save(&tenant, &artifact, new_version.clone()).await.unwrap());
    }

    let unique: HashSet<_> = saved.iter().collect();
    assert_eq!(unique.len(), 10);

    let listed: Vec<_> = registry
        .list_versions(&tenant)
        .await
        .unwrap()
        .into_iter()
        .map(|summary| summary.version_id)
        .collect();
    saved.reverse();
    assert_eq!(listed, saved);
}

#[tokio::test]
async fn test_pointer_follows_successful_save() {
    let registry = ModelRegistry::open(
        Arc::new(InMemoryModelStore::new()),
        Arc::new(ChannelEventSink::new(64)),
    )
    .await
    .unwrap();
    let tenant = TenantId::parse("acme").unwrap();
    let (artifact, new_version) = small_artifact();

    for _ in 0..3 {
        let version = registry.save(&tenant, &artifact, new_version.clone()).await.unwrap();
        assert_eq!(registry.get_active_version(&tenant).await, Some(version.clone()));

        let loaded = registry.load(&tenant, None).await.unwrap();
        assert_eq!(loaded.feature_names, artifact.feature_names);
        assert_eq!(registry.load_metadata(&tenant, None).await.unwrap().version_id, version);
    }
}

#[tokio::test]
async fn test_rollback_is_non_destructive() {
    let (service, source) = setup_service(separable_rows(150, "acme")).await;

    let v_old = service.train(Some("acme")).await.version_id().cloned().unwrap();
    source.extend(separable_rows(50, "acme"));
    let v_new = service.train(Some("acme")).await.version_id().cloned().unwrap();

    let tenant = TenantId::parse("acme").unwrap();
    let registry = service.registry();
    let before = registry.load_metadata(&tenant, Some(v_new.as_str())).await.unwrap();

    let outcome = service.rollback(Some("acme"), v_old.as_str()).await.unwrap();
    assert_eq!(outcome.previous_version.as_ref(), Some(&v_new));

    assert!(registry.load(&tenant, Some(v_new.as_str())).await.is_ok());
    let after = registry.load_metadata(&tenant, Some(v_new.as_str())).await.unwrap();
    assert_eq!(before, after);
    assert_eq!(registry.get_active_version(&tenant).await, Some(v_old));
    assert_eq!(service.list_versions(Some("acme")).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_insufficient_data_leaves_pointer_unchanged() {
    let (service, source) = setup_service(separable_rows(150, "acme")).await;
    let trained = service.train(Some("acme")).await;
    assert!(trained.is_success());
    let active = service.get_model_info(Some("acme")).await.unwrap().unwrap().version_id;

    source.clear();
    source.extend(separable_rows(50, "acme"));
    let result = service.train(Some("acme")).await;

    match result {
        TrainingResult::InsufficientData { rows, required, .. } => {
            assert_eq!(rows, 50);
            assert_eq!(required, 100);
        }
        other => panic!("expected insufficient_data, got {:?}", other),
    }
    let info = service.get_model_info(Some("acme")).await.unwrap().unwrap();
    assert_eq!(info.version_id, active);
}

#[tokio::test]
async fn test_empty_features_use_defaults() {
    let (service, _) = setup_service(separable_rows(150, "default")).await;
    assert!(service.train(None).await.is_success());

    let result = service.predict(&FeatureMap::new(), None).await.unwrap();

    assert!((0.0..=1.0).contains(&result.conversion_probability));
    assert!(result.confidence >= 0.5);
    assert_eq!(
        result.recommended_action,
        RecommendedAction::from_scores(result.conversion_probability, result.confidence)
    );
}

#[tokio::test]
async fn test_batch_isolates_malformed_item() {
    let (service, _) = setup_service(separable_rows(150, "acme")).await;
    assert!(service.train(Some("acme")).await.is_success());

    let batch: Vec<FeatureMap> = vec![
        serde_json::from_value(json!({"lead_source_score": 90, "appointments_count": 3})).unwrap(),
        serde_json::from_value(json!({"lead_source_score": "very high"})).unwrap(),
        serde_json::from_value(json!({"lead_source_score": 5})).unwrap(),
    ];

    let results = service.predict_batch(&batch, Some("acme")).await.unwrap();

    assert_eq!(results.len(), 3);
    assert!(results[0].prediction().is_some());
    assert!(results[2].prediction().is_some());
    match &results[1] {
        BatchPredictionItem::Error(item) => assert_eq!(item.error_code, "VALIDATION_ERROR"),
        other => panic!("expected an embedded error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_separable_data_trains_accurate_model() {
    let (service, _) = setup_service(separable_rows(150, "acme")).await;

    let result = service.train(Some("acme")).await;

    let metrics = result.metrics().cloned().unwrap();
    assert!(metrics.precision > 0.8, "precision {}", metrics.precision);
    assert!(metrics.roc_auc > 0.8, "roc_auc {}", metrics.roc_auc);
    assert_eq!(metrics.confusion_matrix.total(), 30);

    let high = service
        .predict(
            &serde_json::from_value(json!({"lead_source_score": 95, "appointments_count": 3}))
                .unwrap(),
            Some("acme"),
        )
        .await
        .unwrap();
    assert_eq!(high.prediction, 1);
    assert!(!high.feature_contributions.is_empty());

    let importance = service.get_feature_importance(Some("acme")).await.unwrap();
    assert_eq!(importance.features[0].rank, 1);
    assert_eq!(importance.model_version, result.version_id().cloned().unwrap());
}

#[tokio::test]
async fn test_predict_before_training_is_not_found() {
    let (service, _) = setup_service(Vec::new()).await;

    let err = service.predict(&FeatureMap::new(), Some("acme")).await.unwrap_err();

    assert!(matches!(err, AppError::NotFound { ref tenant } if tenant == "acme"));
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_rollback_reported_by_model_info() {
    let (service, source) = setup_service(separable_rows(150, "acme")).await;

    let first = service.train(Some("acme")).await;
    source.extend(separable_rows(60, "acme"));
    let second = service.train(Some("acme")).await;
    let v1 = first.version_id().cloned().unwrap();
    assert_ne!(Some(&v1), second.version_id());

    service.rollback(Some("acme"), v1.as_str()).await.unwrap();
    let info = service.get_model_info(Some("acme")).await.unwrap().unwrap();

    assert_eq!(info.version_id, v1);
    assert!(info.is_rollback);
    assert_eq!(info.training_data_size, 150);
    assert_eq!(&info.metrics, first.metrics().unwrap());
}

#[tokio::test]
async fn test_rollback_to_unknown_version() {
    let (service, _) = setup_service(separable_rows(150, "acme")).await;
    service.train(Some("acme")).await;

    let err = service
        .rollback(Some("acme"), "19990101000000000000")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::VersionNotFound { .. }));
}

#[tokio::test]
async fn test_concurrent_saves_keep_every_version() {
    let registry = Arc::new(
        ModelRegistry::open(
            Arc::new(InMemoryModelStore::new()),
            Arc::new(ChannelEventSink::new(64)),
        )
        .await
        .unwrap(),
    );
    let (artifact, new_version) = small_artifact();
    let artifact = Arc::new(artifact);

    let mut handles = Vec::new();
    for i in 0..8 {
        let registry = registry.clone();
        let artifact = artifact.clone();
        let new_version = new_version.clone();
        let tenant = TenantId::parse(if i % 2 == 0 { "acme" } else { "globex" }).unwrap();
        handles.push(tokio::spawn(async move {
            let version = registry.save(&tenant, &artifact, new_version).await.unwrap();
            (tenant, version)
        }));
    }

    let mut saved = Vec::new();
    for handle in handles {
        saved.push(handle.await.unwrap());
    }

    for tenant in ["acme", "globex"] {
        let tenant = TenantId::parse(tenant).unwrap();
        let versions = registry.list_versions(&tenant).await.unwrap();
        assert_eq!(versions.len(), 4);
        assert_eq!(versions.iter().filter(|v| v.is_active).count(), 1);

        // last writer wins, but whichever won is one of the saved versions
        let active = registry.get_active_version(&tenant).await.unwrap();
        assert!(saved.iter().any(|(t, v)| t == &tenant && v == &active));
    }
    for (tenant, version) in &saved {
        assert!(registry.load(tenant, Some(version.as_str())).await.is_ok());
    }
}

#[tokio::test]
async fn test_tenants_do_not_share_models() {
    let mut rows = separable_rows(150, "acme");
    rows.extend(separable_rows(40, "globex"));
    let (service, _) = setup_service(rows).await;

    assert!(service.train(Some("acme")).await.is_success());
    assert_eq!(service.train(Some("globex")).await.status(), "insufficient_data");

    assert!(service.predict(&FeatureMap::new(), Some("acme")).await.is_ok());
    assert!(matches!(
        service.predict(&FeatureMap::new(), Some("globex")).await,
        Err(AppError::NotFound { .. })
    ));
}
