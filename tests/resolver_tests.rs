//! Source resolution against an in-memory trust namespace

mod common;

use chrono::{TimeZone, Utc};
use common::{canonical, cert_pem, cert_pem_valid, labels, MemorySourceStore, TRUST_NAMESPACE};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::sync::Arc;
use trust_bundle_controller::controller::clock::{Clock, FixedClock};
use trust_bundle_controller::controller::package::DefaultPackage;
use trust_bundle_controller::controller::reconciler::source::bundle_hash;
use trust_bundle_controller::controller::reconciler::SourceResolver;
use trust_bundle_controller::prelude::*;

fn spec(sources: Vec<BundleSource>) -> BundleSpec {
    BundleSpec {
        sources,
        target: BundleTarget {
            config_map: Some(KeyValueTarget {
                key: "ca.crt".to_string(),
                metadata: None,
            }),
            ..BundleTarget::default()
        },
    }
}

fn named(name: &str, key: &str) -> SourceObjectKeySelector {
    SourceObjectKeySelector {
        name: Some(name.to_string()),
        key: Some(key.to_string()),
        ..SourceObjectKeySelector::default()
    }
}

fn selected(match_labels: &[(&str, &str)]) -> SourceObjectKeySelector {
    SourceObjectKeySelector {
        selector: Some(LabelSelector {
            match_labels: Some(labels(match_labels)),
            match_expressions: None,
        }),
        ..SourceObjectKeySelector::default()
    }
}

fn resolver(store: &Arc<MemorySourceStore>) -> SourceResolver {
    SourceResolver::new(Arc::clone(store) as Arc<dyn SourceStore>, TRUST_NAMESPACE)
}

fn package(bundle: &str) -> Arc<DefaultPackage> {
    let doc = serde_json::json!({
        "name": "cert-manager-package-debian",
        "version": "20230311.0",
        "bundle": bundle,
    });
    Arc::new(DefaultPackage::from_json(doc.to_string().as_bytes()).unwrap())
}

#[tokio::test]
async fn test_sources_are_concatenated_in_declaration_order() {
    let (a, b, c) = (cert_pem("a"), cert_pem("b"), cert_pem("c"));
    let store = Arc::new(MemorySourceStore::new());
    store.put(ObjectKind::ConfigMap, "cm-b", &[], &[("ca.crt", b.as_str())]);
    store.put(ObjectKind::Secret, "secret-c", &[], &[("tls.crt", c.as_str())]);

    let resolved = resolver(&store)
        .resolve(&spec(vec![
            BundleSource::Secret(named("secret-c", "tls.crt")),
            BundleSource::InLine(a.clone()),
            BundleSource::ConfigMap(named("cm-b", "ca.crt")),
        ]))
        .await
        .unwrap();

    let expected = canonical(&c) + &canonical(&a) + &canonical(&b);
    assert_eq!(resolved.data, expected);
    assert_eq!(resolved.certificate_count, 3);
    assert_eq!(resolved.hash, bundle_hash(&expected));
    assert_eq!(resolved.default_package, None);
}

#[tokio::test]
async fn test_resolution_is_deterministic() {
    let store = Arc::new(MemorySourceStore::new());
    store.put(
        ObjectKind::ConfigMap,
        "one",
        &[("trust", "yes")],
        &[("ca.crt", cert_pem("one").as_str())],
    );
    store.put(
        ObjectKind::ConfigMap,
        "two",
        &[("trust", "yes")],
        &[("ca.crt", cert_pem("two").as_str())],
    );
    let bundle_spec = spec(vec![BundleSource::ConfigMap(SourceObjectKeySelector {
        key: Some("ca.crt".to_string()),
        ..selected(&[("trust", "yes")])
    })]);

    let first = resolver(&store).resolve(&bundle_spec).await.unwrap();
    let second = resolver(&store).resolve(&bundle_spec).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_missing_named_object_is_not_found() {
    let store = Arc::new(MemorySourceStore::new());

    let err = resolver(&store)
        .resolve(&spec(vec![BundleSource::ConfigMap(named("root-ca", "ca.crt"))]))
        .await
        .unwrap_err();

    assert!(matches!(err, BundleError::NotFound(_)), "got {err:?}");
    assert_eq!(
        err.to_string(),
        "not found: ConfigMap \"trust-system/root-ca\""
    );
    assert!(!err.is_terminal());
}

#[tokio::test]
async fn test_missing_key_is_not_found() {
    let store = Arc::new(MemorySourceStore::new());
    store.put(ObjectKind::Secret, "root-ca", &[], &[("other.crt", cert_pem("x").as_str())]);

    let err = resolver(&store)
        .resolve(&spec(vec![BundleSource::Secret(named("root-ca", "ca.crt"))]))
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "not found: key \"ca.crt\" in Secret \"trust-system/root-ca\""
    );
}

#[tokio::test]
async fn test_selected_objects_are_ordered_by_name() {
    let (first, second) = (cert_pem("first"), cert_pem("second"));
    let store = Arc::new(MemorySourceStore::new());
    store.put(ObjectKind::ConfigMap, "b-ca", &[("trust", "yes")], &[("ca.crt", second.as_str())]);
    store.put(ObjectKind::ConfigMap, "a-ca", &[("trust", "yes")], &[("ca.crt", first.as_str())]);
    store.put(
        ObjectKind::ConfigMap,
        "ignored",
        &[("trust", "no")],
        &[("ca.crt", cert_pem("x").as_str())],
    );

    let resolved = resolver(&store)
        .resolve(&spec(vec![BundleSource::ConfigMap(SourceObjectKeySelector {
            key: Some("ca.crt".to_string()),
            ..selected(&[("trust", "yes")])
        })]))
        .await
        .unwrap();

    assert_eq!(resolved.data, canonical(&first) + &canonical(&second));
}

#[tokio::test]
async fn test_selected_object_missing_plain_key_is_not_found() {
    let store = Arc::new(MemorySourceStore::new());
    store.put(
        ObjectKind::ConfigMap,
        "a-ca",
        &[("trust", "yes")],
        &[("ca.crt", cert_pem("a").as_str())],
    );
    store.put(
        ObjectKind::ConfigMap,
        "b-ca",
        &[("trust", "yes")],
        &[("root.pem", cert_pem("b").as_str())],
    );

    let err = resolver(&store)
        .resolve(&spec(vec![BundleSource::ConfigMap(SourceObjectKeySelector {
            key: Some("ca.crt".to_string()),
            ..selected(&[("trust", "yes")])
        })]))
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "not found: key \"ca.crt\" in ConfigMap \"trust-system/b-ca\""
    );
}

#[tokio::test]
async fn test_selector_matching_nothing_contributes_nothing() {
    let inline = cert_pem("inline");
    let store = Arc::new(MemorySourceStore::new());

    let resolved = resolver(&store)
        .resolve(&spec(vec![
            BundleSource::Secret(SourceObjectKeySelector {
                include_all_keys: true,
                ..selected(&[("team", "none")])
            }),
            BundleSource::InLine(inline.clone()),
        ]))
        .await
        .unwrap();

    assert_eq!(resolved.data, canonical(&inline));
}

#[tokio::test]
async fn test_include_all_keys_reads_keys_in_order() {
    let (a, z) = (cert_pem("a"), cert_pem("z"));
    let store = Arc::new(MemorySourceStore::new());
    store.put(ObjectKind::Secret, "cas", &[], &[("z.crt", z.as_str()), ("a.crt", a.as_str())]);

    let resolved = resolver(&store)
        .resolve(&spec(vec![BundleSource::Secret(SourceObjectKeySelector {
            name: Some("cas".to_string()),
            include_all_keys: true,
            ..SourceObjectKeySelector::default()
        })]))
        .await
        .unwrap();

    assert_eq!(resolved.data, canonical(&a) + &canonical(&z));
}

#[tokio::test]
async fn test_wildcard_key_selects_matching_keys_only() {
    let (inter, root) = (cert_pem("intermediate"), cert_pem("root"));
    let store = Arc::new(MemorySourceStore::new());
    store.put(
        ObjectKind::ConfigMap,
        "cas",
        &[],
        &[
            ("root.crt", root.as_str()),
            ("inter.crt", inter.as_str()),
            ("README", "not a certificate"),
        ],
    );

    let resolved = resolver(&store)
        .resolve(&spec(vec![BundleSource::ConfigMap(named("cas", "*.crt"))]))
        .await
        .unwrap();
    assert_eq!(resolved.data, canonical(&inter) + &canonical(&root));

    let err = resolver(&store)
        .resolve(&spec(vec![BundleSource::ConfigMap(named("cas", "*.pem"))]))
        .await
        .unwrap_err();
    assert!(matches!(err, BundleError::NotFound(_)), "got {err:?}");
}

#[tokio::test]
async fn test_default_package_is_used_and_recorded() {
    let (default_ca, own) = (cert_pem("public-root"), cert_pem("own"));
    let store = Arc::new(MemorySourceStore::new());

    let resolved = resolver(&store)
        .with_default_package(Some(package(&default_ca)))
        .resolve(&spec(vec![
            BundleSource::InLine(own.clone()),
            BundleSource::UseDefaultCAs(true),
        ]))
        .await
        .unwrap();

    assert_eq!(resolved.data, canonical(&own) + &canonical(&default_ca));
    assert_eq!(
        resolved.default_package.as_deref(),
        Some("cert-manager-package-debian:20230311.0")
    );
}

#[tokio::test]
async fn test_use_default_cas_false_contributes_nothing() {
    let own = cert_pem("own");
    let store = Arc::new(MemorySourceStore::new());

    let resolved = resolver(&store)
        .with_default_package(Some(package(&cert_pem("public-root"))))
        .resolve(&spec(vec![
            BundleSource::UseDefaultCAs(false),
            BundleSource::InLine(own.clone()),
        ]))
        .await
        .unwrap();

    assert_eq!(resolved.data, canonical(&own));
    assert_eq!(resolved.default_package, None);
}

#[tokio::test]
async fn test_default_package_requested_but_not_loaded() {
    let store = Arc::new(MemorySourceStore::new());

    let err = resolver(&store)
        .resolve(&spec(vec![BundleSource::UseDefaultCAs(true)]))
        .await
        .unwrap_err();

    assert!(matches!(err, BundleError::NoDefaultPackage));
    assert!(err.is_terminal());
}

#[tokio::test]
async fn test_expired_certificates_are_filtered_when_enabled() {
    let expired = cert_pem_valid("expired", 2015, 2020);
    let valid = cert_pem("valid");
    let store = Arc::new(MemorySourceStore::new());
    let now = Utc.with_ymd_and_hms(2030, 6, 1, 0, 0, 0).unwrap();
    let clock: Arc<dyn Clock> = Arc::new(FixedClock(now));
    let both = format!("{expired}\n{valid}");

    let kept = resolver(&store)
        .resolve(&spec(vec![BundleSource::InLine(both.clone())]))
        .await
        .unwrap();
    assert_eq!(kept.certificate_count, 2);

    let filtered = resolver(&store)
        .with_filter_expired(true)
        .with_clock(Arc::clone(&clock))
        .resolve(&spec(vec![BundleSource::InLine(both)]))
        .await
        .unwrap();
    assert_eq!(filtered.data, canonical(&valid));

    let err = resolver(&store)
        .with_filter_expired(true)
        .with_clock(clock)
        .resolve(&spec(vec![BundleSource::InLine(expired)]))
        .await
        .unwrap_err();
    assert!(matches!(err, BundleError::EmptyBundle(_)), "got {err:?}");
}

#[tokio::test]
async fn test_invalid_certificate_names_the_source() {
    let key_block = pem::encode(&pem::Pem::new("PRIVATE KEY", vec![1, 2, 3]));
    let store = Arc::new(MemorySourceStore::new());

    let err = resolver(&store)
        .resolve(&spec(vec![
            BundleSource::InLine(cert_pem("ok")),
            BundleSource::InLine(key_block),
        ]))
        .await
        .unwrap_err();

    assert!(matches!(err, BundleError::InvalidCertificate(_)), "got {err:?}");
    let message = err.to_string();
    assert!(message.contains("source 2 (inLine)"), "{message}");
    assert!(message.contains("PRIVATE KEY"), "{message}");
}

#[tokio::test]
async fn test_source_without_certificates_is_empty_bundle() {
    let store = Arc::new(MemorySourceStore::new());
    store.put(ObjectKind::ConfigMap, "notes", &[], &[("ca.crt", "no pem here")]);

    let err = resolver(&store)
        .resolve(&spec(vec![BundleSource::ConfigMap(named("notes", "ca.crt"))]))
        .await
        .unwrap_err();

    assert!(matches!(err, BundleError::EmptyBundle(_)), "got {err:?}");
    assert!(err.to_string().contains("source 1 (configMap \"notes\" key \"ca.crt\")"));
}
