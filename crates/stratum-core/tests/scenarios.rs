//! End-to-end pipeline scenarios over a temp-dir ledger.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use stratum_core::api::{self, ImageRef, LayerSource, ScanRequest};
use stratum_core::{
    run_once, vulndump, CancelToken, MetadataCache, ScanConfig, ScanError, Store, StoreOptions,
    UpdaterConfig, VULN_UPDATE_TIMESTAMP_KEY,
};
use stratum_domain::{Feature, FeatureVersion, Layer, Namespace, Severity, Vulnerability};

fn temp_store() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Store::open(dir.path().join("ledger.sqlite")).expect("open store");
    (dir, store)
}

fn tar_with(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, contents) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, contents.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap()
}

fn namespace(name: &str) -> Namespace {
    Namespace::new(name, "dpkg")
}

fn feature(ns: &str, name: &str, version: &str) -> FeatureVersion {
    FeatureVersion::new(Feature::new(namespace(ns), name), version)
}

fn layer(name: &str, parent: Option<&str>, ns: Option<&str>, features: Vec<FeatureVersion>) -> Layer {
    Layer {
        name: name.to_string(),
        engine_version: 1,
        parent: parent.map(|p| {
            Box::new(Layer {
                name: p.to_string(),
                ..Layer::default()
            })
        }),
        namespace: ns.map(namespace),
        features,
        ..Layer::default()
    }
}

/// Debian 7 single layer with one vulnerable package.
#[test]
fn scan_reports_affected_openssl_on_debian_7() {
    let (_dir, store) = temp_store();
    let cache = MetadataCache::new();

    let deb7 = namespace("debian:7");
    store
        .insert_vulnerabilities(&[Vulnerability {
            name: "CVE-OPENSSL-1-DEB7".to_string(),
            namespace: deb7.clone(),
            description: "A vulnerability affecting OpenSSL < 2.0 on Debian 7.0".to_string(),
            link: "http://google.com/#q=CVE-OPENSSL-1-DEB7".to_string(),
            severity: Severity::High,
            fixed_in: vec![feature("debian:7", "openssl", "2.0")],
            ..Vulnerability::default()
        }])
        .unwrap();

    let tarball = tar_with(&[
        ("etc/os-release", "ID=debian\nVERSION_ID=7\n"),
        (
            "var/lib/dpkg/status",
            "Package: openssl\nStatus: install ok installed\nVersion: 1.0\n",
        ),
    ]);
    let result = api::scan_image(
        &store,
        &ScanConfig::default(),
        ScanRequest {
            image: "registry.example/app:1".to_string(),
            digest: "sha256:layer-deb7".to_string(),
            layers: vec![LayerSource {
                name: "layer-deb7".to_string(),
                reader: &tarball[..],
            }],
            uncertified_rhel: false,
            cancel: CancelToken::new(),
        },
    )
    .unwrap();
    assert_eq!(result.digest, "sha256:layer-deb7");

    let scan = api::get_image_scan(
        &store,
        &cache,
        &ImageRef::by_name("registry.example/app:1").unwrap(),
        false,
    )
    .unwrap();
    assert_eq!(scan.features.len(), 1);
    let openssl = &scan.features[0];
    assert_eq!(openssl.feature.name, "openssl");
    assert_eq!(openssl.version, "1.0");
    assert_eq!(openssl.feature.namespace.name, "debian:7");
    assert_eq!(openssl.affected_by.len(), 1);
    let affected = &openssl.affected_by[0];
    assert_eq!(affected.name, "CVE-OPENSSL-1-DEB7");
    assert_eq!(affected.severity, Severity::High);
    assert_eq!(affected.fixed_by, "2.0");
    assert_eq!(scan.vulnerabilities.len(), 1);
}

/// A child layer with the parent's exact feature set inherits namespaces.
#[test]
fn child_without_changes_inherits_parent_namespaces() {
    let (_dir, store) = temp_store();

    let features = vec![
        feature("ns2:1", "f1", "1.0"),
        feature("ns2:1", "f2", "0.34"),
        feature("ns2:1", "f3", "0.56"),
    ];
    store
        .insert_layer(&layer("l3", None, Some("ns2:1"), features.clone()), "", "", &[])
        .unwrap();

    // L4a declares the same set, no namespace of its own.
    let mut bare = features.clone();
    for fv in &mut bare {
        fv.feature.namespace = Namespace::default();
    }
    store
        .insert_layer(&layer("l4a", Some("l3"), None, bare), "lin-4a", "", &[])
        .unwrap();

    let found = store
        .find_layer("l4a", "lin-4a", &StoreOptions::with_features())
        .unwrap();
    assert_eq!(found.features.len(), 3);
    for fv in &found.features {
        assert_eq!(fv.feature.namespace.name, "ns2:1");
    }
}

/// A child that upgrades selectively keeps old namespaces only for
/// unchanged installations.
#[test]
fn child_upgrade_mixes_namespaces_per_feature() {
    let (_dir, store) = temp_store();

    store
        .insert_layer(
            &layer(
                "l3",
                None,
                Some("ns2:1"),
                vec![
                    feature("ns2:1", "f1", "1.0"),
                    feature("ns2:1", "f2", "0.34"),
                    feature("ns2:1", "f3", "0.56"),
                ],
            ),
            "",
            "",
            &[],
        )
        .unwrap();

    // L4b: keeps f2, upgrades f3, adds f6, drops f1.
    store
        .insert_layer(
            &layer(
                "l4b",
                Some("l3"),
                Some("ns3:1"),
                vec![
                    feature("ns3:1", "f2", "0.34"),
                    feature("ns3:1", "f3", "0.57"),
                    feature("ns3:1", "f6", "0.666"),
                ],
            ),
            "lin-4b",
            "",
            &[],
        )
        .unwrap();

    let found = store
        .find_layer("l4b", "lin-4b", &StoreOptions::with_features())
        .unwrap();
    assert_eq!(found.features.len(), 3);
    let by_name = |name: &str| {
        found
            .features
            .iter()
            .find(|fv| fv.feature.name == name)
            .unwrap_or_else(|| panic!("missing {name}"))
    };
    assert_eq!(by_name("f2").feature.namespace.name, "ns2:1");
    assert_eq!(by_name("f3").feature.namespace.name, "ns3:1");
    assert_eq!(by_name("f3").version, "0.57");
    assert_eq!(by_name("f6").feature.namespace.name, "ns3:1");
    assert!(!found.features.iter().any(|fv| fv.feature.name == "f1"));
}

/// Engine-version gating: same engine is a no-op, newer overwrites.
#[test]
fn engine_version_gates_reanalysis() {
    let (_dir, store) = temp_store();

    let mut l = layer("gated", None, Some("ns:1"), vec![feature("ns:1", "f1", "1.0")]);
    l.engine_version = 3;
    store.insert_layer(&l, "", "", &[]).unwrap();

    let err = store.insert_layer(&l, "", "", &[]).unwrap_err();
    assert!(matches!(err, ScanError::NoNeedToInsert));
    assert!(err.is_benign());

    l.engine_version = 4;
    l.features = vec![feature("ns:1", "f2", "2.0")];
    store.insert_layer(&l, "", "", &[]).unwrap();

    let found = store.find_layer("gated", "", &StoreOptions::with_features()).unwrap();
    assert_eq!(found.engine_version, 4);
    assert_eq!(found.features.len(), 1);
    assert_eq!(found.features[0].feature.name, "f2");
}

/// Whiteout of a package's files excludes it from the assembled child set.
#[test]
fn whiteout_removes_parent_feature_from_assembly() {
    let (_dir, store) = temp_store();

    store
        .insert_layer(
            &layer(
                "base",
                None,
                Some("debian:10"),
                vec![
                    feature("debian:10", "openssl", "1.1"),
                    feature("debian:10", "bash", "5.0"),
                ],
            ),
            "",
            "",
            &[],
        )
        .unwrap();

    // The child's package database no longer lists openssl; the layer also
    // records the whiteout of its files.
    store
        .insert_layer(
            &layer(
                "purged",
                Some("base"),
                None,
                vec![feature("debian:10", "bash", "5.0")],
            ),
            "lin-purged",
            "",
            &["usr/lib/ssl".to_string(), "etc/ssl".to_string()],
        )
        .unwrap();

    let found = store
        .find_layer("purged", "lin-purged", &StoreOptions::with_features())
        .unwrap();
    let names: Vec<&str> = found.features.iter().map(|fv| fv.feature.name.as_str()).collect();
    assert_eq!(names, vec!["bash"]);
}

/// Same ledger state, same answer: assembly is pure over the chain.
#[test]
fn find_layer_is_deterministic() {
    let (_dir, store) = temp_store();
    store
        .insert_layer(
            &layer(
                "root",
                None,
                Some("ns:1"),
                vec![feature("ns:1", "a", "1"), feature("ns:1", "b", "2")],
            ),
            "",
            "",
            &[],
        )
        .unwrap();

    let first = store.find_layer("root", "", &StoreOptions::with_features()).unwrap();
    let second = store.find_layer("root", "", &StoreOptions::with_features()).unwrap();
    assert_eq!(first.features, second.features);
}

/// Parent must exist under the same lineage discriminator.
#[test]
fn missing_parent_is_rejected() {
    let (_dir, store) = temp_store();
    let child = layer("orphan", Some("ghost"), Some("ns:1"), vec![]);
    assert!(matches!(
        store.insert_layer(&child, "lin", "", &[]),
        Err(ScanError::ParentUnknown)
    ));
}

/// Updater conditional fetch: 200 applies, 304 leaves everything untouched.
#[test]
fn updater_applies_once_then_honors_not_modified() {
    let (_dir, store) = temp_store();
    let scratch = tempfile::tempdir().unwrap();

    // Build a full dump with until = T1.
    let dump_dir = tempfile::tempdir().unwrap();
    let dump_path = dump_dir.path().join("dump.zip");
    let manifest = vulndump::DumpManifest {
        since: "1970-01-01T00:00:00Z".to_string(),
        until: "2024-05-01T00:00:00Z".to_string(),
    };
    let os_vulns = vulndump::OsVulns {
        vulnerabilities: vec![Vulnerability {
            name: "CVE-1".to_string(),
            namespace: namespace("debian:10"),
            fixed_in: vec![feature("debian:10", "openssl", "2.0")],
            ..Vulnerability::default()
        }],
        deleted: Vec::new(),
    };
    vulndump::write_dump(&dump_path, &manifest, &os_vulns, &[], &[]).unwrap();
    let dump_bytes = std::fs::read(&dump_path).unwrap();

    // Canned two-request HTTP server: 200 with the dump, then 304. The
    // second request must carry If-Modified-Since.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = std::thread::spawn(move || {
        let mut saw_conditional = false;
        for (index, stream) in listener.incoming().take(2).enumerate() {
            let mut stream = stream.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let request_text = String::from_utf8_lossy(&request).to_ascii_lowercase();
            if index == 0 {
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/zip\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    dump_bytes.len()
                );
                stream.write_all(head.as_bytes()).unwrap();
                stream.write_all(&dump_bytes).unwrap();
            } else {
                saw_conditional = request_text.contains("if-modified-since:");
                stream
                    .write_all(b"HTTP/1.1 304 Not Modified\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                    .unwrap();
            }
        }
        saw_conditional
    });

    let mut config = UpdaterConfig::new(
        format!("http://127.0.0.1:{port}/diff-dump.zip"),
        Duration::from_secs(3600),
        scratch.path(),
    );
    config.timeout = Duration::from_secs(5);
    let cache = Arc::new(MetadataCache::new());

    run_once(&config, &store, Arc::clone(&cache)).unwrap();
    assert_eq!(
        store.get_key_value(VULN_UPDATE_TIMESTAMP_KEY).unwrap(),
        Some("2024-05-01T00:00:00Z".to_string())
    );
    assert_eq!(store.vulnerabilities_for_namespace("debian:10").unwrap().len(), 1);

    run_once(&config, &store, cache).unwrap();
    assert_eq!(
        store.get_key_value(VULN_UPDATE_TIMESTAMP_KEY).unwrap(),
        Some("2024-05-01T00:00:00Z".to_string())
    );
    assert_eq!(store.vulnerabilities_for_namespace("debian:10").unwrap().len(), 1);
    assert!(server.join().unwrap(), "second fetch must be conditional");
}

/// Red Hat release files map per the certification flag.
#[test]
fn rhel_release_maps_by_certification_flag() {
    let (_dir, store) = temp_store();
    let tarball = tar_with(&[(
        "etc/redhat-release",
        "Red Hat Enterprise Linux release 8.0 (Ootpa)\n",
    )]);

    // Uncertified: the generic pipeline runs with a centos namespace.
    api::scan_image(
        &store,
        &ScanConfig::default(),
        ScanRequest {
            image: "registry.example/rhel:8".to_string(),
            digest: "sha256:rhel8-uncert".to_string(),
            layers: vec![LayerSource {
                name: "rhel8-uncert".to_string(),
                reader: &tarball[..],
            }],
            uncertified_rhel: true,
            cancel: CancelToken::new(),
        },
    )
    .unwrap();
    let found = store
        .find_layer("rhel8-uncert", "", &StoreOptions::default())
        .unwrap();
    assert_eq!(found.namespace.unwrap().name, "centos:8");

    // Certified: the namespace stays rhel and a certified record appears.
    api::scan_image(
        &store,
        &ScanConfig::default(),
        ScanRequest {
            image: "registry.example/rhel:8-cert".to_string(),
            digest: "sha256:rhel8-cert".to_string(),
            layers: vec![LayerSource {
                name: "rhel8-cert".to_string(),
                reader: &tarball[..],
            }],
            uncertified_rhel: false,
            cancel: CancelToken::new(),
        },
    )
    .unwrap();
    let found = store
        .find_layer("rhel8-cert", "", &StoreOptions::default())
        .unwrap();
    assert_eq!(found.namespace.unwrap().name, "rhel:8");
    let chain = store.get_rhelv2_layer_chain("rhel8-cert").unwrap();
    assert_eq!(chain.len(), 1);
    assert_eq!(chain[0].dist, "rhel:8");
}

/// A canceled scan leaves no partially persisted layer behind.
#[test]
fn canceled_scan_persists_nothing() {
    let (_dir, store) = temp_store();
    let tarball = tar_with(&[("etc/os-release", "ID=debian\nVERSION_ID=10\n")]);

    let cancel = CancelToken::new();
    cancel.cancel();
    let err = api::scan_image(
        &store,
        &ScanConfig::default(),
        ScanRequest {
            image: "registry.example/app:2".to_string(),
            digest: "sha256:canceled".to_string(),
            layers: vec![LayerSource {
                name: "canceled-layer".to_string(),
                reader: &tarball[..],
            }],
            uncertified_rhel: false,
            cancel,
        },
    )
    .unwrap_err();
    assert!(matches!(err, ScanError::Canceled));
    assert!(matches!(
        store.find_layer("canceled-layer", "", &StoreOptions::default()),
        Err(ScanError::NotFound)
    ));
}

/// Unknown references are a clean not-found, not an internal error.
#[test]
fn unknown_image_reference_is_not_found() {
    let (_dir, store) = temp_store();
    let cache = MetadataCache::new();
    let err = api::get_image_scan(
        &store,
        &cache,
        &ImageRef::by_digest("sha256:nope").unwrap(),
        false,
    )
    .unwrap_err();
    assert!(matches!(err, ScanError::NotFound));
}
