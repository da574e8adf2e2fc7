//! Values composition across every source kind

use std::path::Path;

use helmsync::fake::StaticValuesResolver;
use helmsync::models::{Values, ValuesReference, ValuesSourceKind};
use helmsync::values::compose;

fn reference(kind: ValuesSourceKind, name: &str) -> ValuesReference {
    ValuesReference {
        kind,
        name: name.to_string(),
        ..Default::default()
    }
}

fn yaml(s: &str) -> Values {
    Values::map_from_yaml_str(s).unwrap()
}

#[tokio::test]
async fn test_sources_then_inline_override() {
    let resolver = StaticValuesResolver::new()
        .with_config_map("apps", "a", "values.yaml", "x: a\n")
        .with_config_map("apps", "b", "values.yaml", "x: b\ny: b\n");
    let refs = [
        reference(ValuesSourceKind::ConfigMap, "a"),
        reference(ValuesSourceKind::ConfigMap, "b"),
    ];

    let values = compose(
        yaml("y: final\n"),
        &refs,
        "apps",
        Path::new("/charts/web"),
        &resolver,
    )
    .await
    .unwrap();

    assert_eq!(values, yaml("x: b\ny: final\n"));
}

#[tokio::test]
async fn test_nested_maps_merge_and_siblings_survive() {
    let resolver = StaticValuesResolver::new()
        .with_chart_file("values-prod.yaml", "a:\n  b: 1\n  c: 2\n")
        .with_url("https://config.example.com/web.yaml", "a:\n  b: 9\n");
    let refs = [
        reference(ValuesSourceKind::ChartFile, "values-prod.yaml"),
        reference(ValuesSourceKind::ExternalUrl, "https://config.example.com/web.yaml"),
    ];

    let values = compose(
        Values::empty_map(),
        &refs,
        "apps",
        Path::new("/charts/web"),
        &resolver,
    )
    .await
    .unwrap();

    assert_eq!(values, yaml("a:\n  b: 9\n  c: 2\n"));
}

#[tokio::test]
async fn test_scalar_source_replaces_map() {
    let resolver = StaticValuesResolver::new()
        .with_config_map("apps", "base", "values.yaml", "ingress:\n  enabled: true\n")
        .with_config_map("apps", "off", "values.yaml", "ingress: false\n");
    let refs = [
        reference(ValuesSourceKind::ConfigMap, "base"),
        reference(ValuesSourceKind::ConfigMap, "off"),
    ];

    let values = compose(
        Values::empty_map(),
        &refs,
        "apps",
        Path::new("/charts/web"),
        &resolver,
    )
    .await
    .unwrap();

    assert_eq!(values.lookup("ingress"), Some(&Values::Bool(false)));
}

#[tokio::test]
async fn test_target_path_and_custom_key_across_namespaces() {
    let resolver = StaticValuesResolver::new()
        .with_secret("shared", "db", "password", "s3cr3t")
        .with_config_map("apps", "web", "overrides.yaml", "replicas: 3\n");
    let refs = [
        ValuesReference {
            kind: ValuesSourceKind::Secret,
            name: "db".to_string(),
            namespace: Some("shared".to_string()),
            values_key: Some("password".to_string()),
            target_path: Some("database.auth.password".to_string()),
            optional: false,
        },
        ValuesReference {
            kind: ValuesSourceKind::ConfigMap,
            name: "web".to_string(),
            values_key: Some("overrides.yaml".to_string()),
            ..Default::default()
        },
    ];

    let values = compose(
        yaml("database:\n  host: db.shared\n"),
        &refs,
        "apps",
        Path::new("/charts/web"),
        &resolver,
    )
    .await
    .unwrap();

    assert_eq!(
        values,
        yaml("database:\n  host: db.shared\n  auth:\n    password: s3cr3t\nreplicas: 3\n")
    );
}

#[tokio::test]
async fn test_composed_document_serializes_back() {
    let resolver =
        StaticValuesResolver::new().with_config_map("apps", "a", "values.yaml", "list: [1, 2]\nname: web\n");
    let refs = [reference(ValuesSourceKind::ConfigMap, "a")];

    let values = compose(
        Values::empty_map(),
        &refs,
        "apps",
        Path::new("/charts/web"),
        &resolver,
    )
    .await
    .unwrap();

    let text = values.to_yaml_string().unwrap();
    assert_eq!(Values::map_from_yaml_str(&text).unwrap(), values);
}

#[tokio::test]
async fn test_required_missing_source_names_the_source() {
    let resolver = StaticValuesResolver::new();
    let refs = [reference(ValuesSourceKind::Secret, "absent")];

    let err = compose(
        Values::empty_map(),
        &refs,
        "apps",
        Path::new("/charts/web"),
        &resolver,
    )
    .await
    .unwrap_err();

    assert!(err.to_string().contains("absent"), "{}", err);
}

#[tokio::test]
async fn test_optional_source_is_skipped_only_when_absent() {
    let resolver = StaticValuesResolver::new()
        .with_config_map("apps", "base", "values.yaml", "replicas: 2\n")
        .with_unavailable("apps", "overrides");
    let mut absent = reference(ValuesSourceKind::Secret, "absent");
    absent.optional = true;
    let mut unreachable = reference(ValuesSourceKind::ConfigMap, "overrides");
    unreachable.optional = true;

    let values = compose(
        Values::empty_map(),
        &[reference(ValuesSourceKind::ConfigMap, "base"), absent.clone()],
        "apps",
        Path::new("/charts/web"),
        &resolver,
    )
    .await
    .unwrap();
    assert_eq!(values, yaml("replicas: 2\n"));

    let err = compose(
        Values::empty_map(),
        &[reference(ValuesSourceKind::ConfigMap, "base"), absent, unreachable],
        "apps",
        Path::new("/charts/web"),
        &resolver,
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("service unavailable"), "{}", err);
}
