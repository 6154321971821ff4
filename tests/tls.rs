//! Certificate selection against real PEM fixtures.

use ingress_control::model::{RoutingDeclaration, SslCert, TlsEntry};
use ingress_control::routing::tls::{select_certificate, tls_secret_for_host};
use ingress_control::store::{ClusterSnapshot, FileStore, SecretSpec};

mod common;

const FOO_PEM: &str = include_str!("fixtures/foo.com.pem");
const BAR_PEM: &str = include_str!("fixtures/wildcard.bar.com.pem");

fn secret(name: &str, pem: &str) -> SecretSpec {
    SecretSpec {
        namespace: "default".into(),
        name: name.into(),
        certificate: Some(pem.into()),
        certificate_file: None,
    }
}

fn store() -> FileStore {
    FileStore::from_snapshot(ClusterSnapshot {
        secrets: vec![secret("foo-tls", FOO_PEM), secret("bar-tls", BAR_PEM)],
        ..Default::default()
    })
}

fn with_tls(entries: &[(Option<&str>, &str)]) -> RoutingDeclaration {
    let mut decl = common::declaration("default", "web", "foo.com", "/", "svc-a", 80);
    decl.tls = entries
        .iter()
        .map(|(host, secret)| TlsEntry {
            hosts: host.iter().map(|h| h.to_string()).collect(),
            secret_name: Some(secret.to_string()),
        })
        .collect();
    decl
}

fn fallback() -> SslCert {
    SslCert {
        secret: "kube-system/default-cert".into(),
        hostnames: vec!["ingress.local".into()],
        not_after: i64::MAX,
        fingerprint: String::new(),
    }
}

#[test]
fn test_host_list_entry_wins() {
    let store = store();
    let decl = with_tls(&[(None, "foo-tls"), (Some("api.bar.com"), "bar-tls")]);

    assert_eq!(
        tls_secret_for_host("api.bar.com", &decl, &store).as_deref(),
        Some("bar-tls")
    );
    let cert = select_certificate("api.bar.com", &decl, &store, Some(&fallback())).unwrap();
    assert_eq!(cert.secret, "default/bar-tls");
}

#[test]
fn test_host_list_entry_with_mismatched_certificate_uses_default() {
    let store = store();
    let decl = with_tls(&[(Some("api.bar.com"), "foo-tls"), (None, "bar-tls")]);

    assert_eq!(
        tls_secret_for_host("api.bar.com", &decl, &store).as_deref(),
        Some("foo-tls")
    );
    let cert = select_certificate("api.bar.com", &decl, &store, Some(&fallback())).unwrap();
    assert_eq!(cert, fallback());
}

#[test]
fn test_certificate_names_scanned_without_host_list() {
    let store = store();
    let decl = with_tls(&[(None, "bar-tls"), (None, "foo-tls")]);

    assert_eq!(
        tls_secret_for_host("www.foo.com", &decl, &store).as_deref(),
        Some("foo-tls")
    );
    let cert = select_certificate("WWW.FOO.COM", &decl, &store, None).unwrap();
    assert_eq!(cert.secret, "default/foo-tls");

    let wildcard = select_certificate("shop.bar.com", &decl, &store, None).unwrap();
    assert_eq!(wildcard.secret, "default/bar-tls");
}

#[test]
fn test_unmatched_host_uses_default() {
    let store = store();
    let decl = with_tls(&[(None, "foo-tls"), (None, "bar-tls")]);

    assert_eq!(tls_secret_for_host("baz.com", &decl, &store), None);
    assert_eq!(
        select_certificate("baz.com", &decl, &store, Some(&fallback())),
        Some(fallback())
    );
    assert_eq!(select_certificate("baz.com", &decl, &store, None), None);
}

#[test]
fn test_missing_secret_uses_default() {
    let store = store();
    let decl = with_tls(&[(Some("foo.com"), "absent-tls")]);

    assert_eq!(
        tls_secret_for_host("foo.com", &decl, &store).as_deref(),
        Some("absent-tls")
    );
    assert_eq!(
        select_certificate("foo.com", &decl, &store, Some(&fallback())),
        Some(fallback())
    );
}
