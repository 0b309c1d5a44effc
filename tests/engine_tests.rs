//! Full passes through the bundle engine: validate, resolve, encode, sync

mod common;

use common::{
    bundle, canonical, cert_pem, config, MemorySourceStore, MemoryTargetStore, RecordingEvents,
};
use serde_json::json;
use std::sync::Arc;
use trust_bundle_controller::controller::clock::SystemClock;
use trust_bundle_controller::controller::package::DefaultPackage;
use trust_bundle_controller::controller::reconciler::events::{actions, reasons};
use trust_bundle_controller::prelude::*;

struct Harness {
    sources: Arc<MemorySourceStore>,
    targets: Arc<MemoryTargetStore>,
    events: Arc<RecordingEvents>,
    engine: BundleEngine,
}

fn harness(
    controller_config: &ControllerConfig,
    namespaces: &[&str],
    default_package: Option<Arc<DefaultPackage>>,
) -> Harness {
    let sources = Arc::new(MemorySourceStore::new());
    let targets = Arc::new(MemoryTargetStore::with_namespaces(namespaces));
    let events = Arc::new(RecordingEvents::new());
    let engine = BundleEngine::from_config(
        controller_config,
        Arc::clone(&sources) as Arc<dyn SourceStore>,
        Arc::clone(&targets) as Arc<dyn TargetStore>,
        Arc::clone(&events) as Arc<dyn EventPublisher>,
        default_package,
        Arc::new(SystemClock),
    );
    Harness {
        sources,
        targets,
        events,
        engine,
    }
}

fn bundle_json(name: &str, spec: &serde_json::Value) -> Bundle {
    bundle(name, &spec.to_string())
}

#[tokio::test]
async fn test_rotated_source_reaches_every_target() {
    let h = harness(&config(), &["ns-1", "ns-2"], None);
    let (a, b, c, d) = (cert_pem("a"), cert_pem("b"), cert_pem("c"), cert_pem("d"));
    h.sources
        .put(ObjectKind::ConfigMap, "ca-a", &[], &[("ca.crt", a.as_str())]);
    h.sources
        .put(ObjectKind::Secret, "ca-b", &[], &[("ca.crt", b.as_str())]);
    let bundle = bundle_json(
        "corp-roots",
        &json!({
            "sources": [
                {"configMap": {"name": "ca-a", "key": "ca.crt"}},
                {"secret": {"name": "ca-b", "key": "ca.crt"}},
                {"inLine": c},
            ],
            "target": {
                "configMap": {"key": "ca.crt"},
                "secret": {"key": "ca.crt"},
            },
        }),
    );

    let first = h.engine.run(&bundle).await.unwrap();
    assert_eq!(first.report.count(TargetAction::Created), 4);
    assert_eq!(
        first.resolved.data,
        canonical(&a) + &canonical(&b) + &canonical(&c)
    );

    h.sources
        .put(ObjectKind::Secret, "ca-b", &[], &[("ca.crt", d.as_str())]);
    let second = h.engine.run(&bundle).await.unwrap();

    assert_eq!(second.report.count(TargetAction::Updated), 4);
    assert_eq!(
        second.resolved.data,
        canonical(&a) + &canonical(&d) + &canonical(&c)
    );
    for namespace in ["ns-1", "ns-2"] {
        for kind in ObjectKind::ALL {
            let object = h.targets.object(kind, namespace, "corp-roots").unwrap();
            assert_eq!(object.data.get("ca.crt"), Some(&second.resolved.data));
        }
    }
}

#[tokio::test]
async fn test_synced_event_only_when_targets_change() {
    let h = harness(&config(), &["default"], None);
    let bundle = bundle_json(
        "corp-roots",
        &json!({
            "sources": [{"inLine": cert_pem("root")}],
            "target": {"configMap": {"key": "ca.crt"}},
        }),
    );

    h.engine.run(&bundle).await.unwrap();
    let unchanged = h.engine.run(&bundle).await.unwrap();

    assert!(!unchanged.report.changed());
    let synced = h.events.with_reason(reasons::SYNCED);
    assert_eq!(synced.len(), 1);
    assert!(!synced[0].warning);
    assert_eq!(
        synced[0].note.as_deref(),
        Some("Synced 1 certificate(s) to targets: created 1")
    );
}

#[tokio::test]
async fn test_secret_target_rejected_when_secrets_disabled() {
    let controller_config = ControllerConfig {
        secret_targets_enabled: false,
        ..config()
    };
    let h = harness(&controller_config, &["default"], None);
    let root = cert_pem("root");

    let with_secret = bundle_json(
        "corp-roots",
        &json!({
            "sources": [{"inLine": root}],
            "target": {"configMap": {"key": "ca.crt"}, "secret": {"key": "ca.crt"}},
        }),
    );
    let err = h.engine.run(&with_secret).await.unwrap_err();
    assert!(matches!(err, BundleError::SecretTargetsDisabled));
    assert!(err.is_terminal());
    assert_eq!(h.targets.writes(), 0);

    let config_map_only = bundle_json(
        "corp-roots",
        &json!({
            "sources": [{"inLine": root}],
            "target": {"configMap": {"key": "ca.crt"}},
        }),
    );
    let outcome = h.engine.run(&config_map_only).await.unwrap();
    assert_eq!(outcome.report.outcomes.len(), 1);
    assert!(h
        .targets
        .object(ObjectKind::Secret, "default", "corp-roots")
        .is_none());
}

#[tokio::test]
async fn test_invalid_spec_writes_nothing() {
    let h = harness(&config(), &["default"], None);

    let no_sources = bundle_json(
        "corp-roots",
        &json!({"sources": [], "target": {"configMap": {"key": "ca.crt"}}}),
    );
    let err = h.engine.run(&no_sources).await.unwrap_err();
    assert!(matches!(err, BundleError::InvalidSpec(_)), "got {err:?}");
    assert_eq!(err.reason(), "InvalidSpec");

    let colliding_keys = bundle_json(
        "corp-roots",
        &json!({
            "sources": [{"inLine": cert_pem("root")}],
            "target": {
                "configMap": {"key": "truststore.jks"},
                "additionalFormats": {"jks": {"key": "truststore.jks"}},
            },
        }),
    );
    let err = h.engine.run(&colliding_keys).await.unwrap_err();
    match err {
        BundleError::InvalidSpec(errors) => {
            assert!(errors.iter().any(|e| e.contains("collides")), "{errors:?}");
        }
        other => panic!("expected InvalidSpec, got {other:?}"),
    }

    assert_eq!(h.targets.writes(), 0);
}

#[tokio::test]
async fn test_missing_source_writes_nothing_until_it_appears() {
    let h = harness(&config(), &["default"], None);
    let bundle = bundle_json(
        "corp-roots",
        &json!({
            "sources": [{"configMap": {"name": "root-ca", "key": "ca.crt"}}],
            "target": {"configMap": {"key": "ca.crt"}},
        }),
    );

    let err = h.engine.run(&bundle).await.unwrap_err();
    assert!(matches!(err, BundleError::NotFound(_)), "got {err:?}");
    assert_eq!(h.targets.writes(), 0);

    let root = cert_pem("root");
    h.sources
        .put(ObjectKind::ConfigMap, "root-ca", &[], &[("ca.crt", root.as_str())]);
    let outcome = h.engine.run(&bundle).await.unwrap();
    assert_eq!(
        outcome.report.action_for("default", ObjectKind::ConfigMap),
        Some(TargetAction::Created)
    );
}

#[tokio::test]
async fn test_additional_formats_are_written_next_to_pem() {
    let h = harness(&config(), &["default"], None);
    let bundle = bundle_json(
        "corp-roots",
        &json!({
            "sources": [{"inLine": format!("{}{}", cert_pem("one"), cert_pem("two"))}],
            "target": {
                "configMap": {"key": "ca.crt"},
                "additionalFormats": {
                    "jks": {"key": "truststore.jks"},
                    "pkcs12": {"key": "truststore.p12"},
                },
            },
        }),
    );

    h.engine.run(&bundle).await.unwrap();

    let object = h
        .targets
        .object(ObjectKind::ConfigMap, "default", "corp-roots")
        .unwrap();
    assert!(object.data.contains_key("ca.crt"));

    let jks = object.binary_data.get("truststore.jks").unwrap();
    assert_eq!(&jks[..4], &[0xFE, 0xED, 0xFE, 0xED]);

    let p12 = object.binary_data.get("truststore.p12").unwrap();
    let keystore = p12_keystore::KeyStore::from_pkcs12(p12, "").unwrap();
    assert_eq!(keystore.entries().count(), 2);

    let unchanged = h.engine.run(&bundle).await.unwrap();
    assert!(!unchanged.report.changed());
}

#[tokio::test]
async fn test_default_package_identity_is_reported() {
    let package = DefaultPackage::from_json(
        json!({
            "name": "cert-manager-package-debian",
            "version": "20230311.0",
            "bundle": cert_pem("public"),
        })
        .to_string()
        .as_bytes(),
    )
    .unwrap();
    let h = harness(&config(), &["default"], Some(Arc::new(package)));
    let bundle = bundle_json(
        "corp-roots",
        &json!({
            "sources": [{"useDefaultCAs": true}],
            "target": {"configMap": {"key": "ca.crt"}},
        }),
    );

    let outcome = h.engine.run(&bundle).await.unwrap();

    assert_eq!(
        outcome.resolved.default_package.as_deref(),
        Some("cert-manager-package-debian:20230311.0")
    );
}

#[tokio::test]
async fn test_password_change_reencodes_truststores() {
    let h = harness(&config(), &["default"], None);
    let root = cert_pem("root");
    let with_password = |password: &str| {
        bundle_json(
            "corp-roots",
            &json!({
                "sources": [{"inLine": root}],
                "target": {
                    "configMap": {"key": "ca.crt"},
                    "additionalFormats": {
                        "pkcs12": {"key": "truststore.p12", "password": password},
                    },
                },
            }),
        )
    };

    let first = h.engine.run(&with_password("old")).await.unwrap();
    let second = h.engine.run(&with_password("new")).await.unwrap();

    assert_eq!(first.resolved.data, second.resolved.data);
    assert_ne!(first.resolved.hash, second.resolved.hash);
    assert_eq!(
        second.report.action_for("default", ObjectKind::ConfigMap),
        Some(TargetAction::Updated)
    );
    let object = h
        .targets
        .object(ObjectKind::ConfigMap, "default", "corp-roots")
        .unwrap();
    let p12 = object.binary_data.get("truststore.p12").unwrap();
    assert!(p12_keystore::KeyStore::from_pkcs12(p12, "new").is_ok());
    assert!(p12_keystore::KeyStore::from_pkcs12(p12, "old").is_err());

    let unchanged = h.engine.run(&with_password("new")).await.unwrap();
    assert!(!unchanged.report.changed());
}

#[tokio::test]
async fn test_failed_pass_publishes_warning() {
    let h = harness(&config(), &["default"], None);
    let bundle = bundle_json(
        "corp-roots",
        &json!({
            "sources": [{"secret": {"name": "missing", "key": "ca.crt"}}],
            "target": {"configMap": {"key": "ca.crt"}},
        }),
    );

    h.engine.run(&bundle).await.unwrap_err();

    let failures = h.events.with_reason(reasons::SYNC_FAILED);
    assert_eq!(failures.len(), 1);
    assert!(failures[0].warning);
    assert_eq!(failures[0].action, actions::RECONCILE);
    assert!(failures[0].note.as_deref().unwrap().starts_with("SourceNotFound: "));
    assert!(h.events.with_reason(reasons::SYNCED).is_empty());
}
