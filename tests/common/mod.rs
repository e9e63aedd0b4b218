/// Common test utilities and helpers for pymirror tests
use serde_json::json;
use std::path::Path;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pymirror::Config;

/// One upstream package fixture, served as catalog entry + metadata
/// document + downloadable release files.
#[derive(Debug, Clone)]
pub struct PackageFixture {
    pub name: String,
    pub serial: i64,
    pub versions: Vec<String>,
    pub requires: Vec<String>,
    pub classifiers: Vec<String>,
    pub file_size: usize,
    /// Listed in the catalog but with no metadata endpoint, so its
    /// fetch 404s.
    pub metadata_missing: bool,
}

impl PackageFixture {
    pub fn new(name: &str, serial: i64, versions: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            serial,
            versions: versions.iter().map(|v| v.to_string()).collect(),
            requires: Vec::new(),
            classifiers: Vec::new(),
            file_size: 100,
            metadata_missing: false,
        }
    }

    pub fn missing_metadata(mut self) -> Self {
        self.metadata_missing = true;
        self
    }

    pub fn requires(mut self, spec: &str) -> Self {
        self.requires.push(spec.to_string());
        self
    }

    #[allow(dead_code)]
    pub fn classifier(mut self, classifier: &str) -> Self {
        self.classifiers.push(classifier.to_string());
        self
    }

    fn file_url(&self, base: &str, version: &str) -> String {
        format!(
            "{}/packages/{}/{}-{}.tar.gz",
            base, self.name, self.name, version
        )
    }

    fn metadata_document(&self, base: &str) -> serde_json::Value {
        let releases: serde_json::Map<String, serde_json::Value> = self
            .versions
            .iter()
            .map(|v| {
                (
                    v.clone(),
                    json!([{
                        "filename": format!("{}-{}.tar.gz", self.name, v),
                        "url": self.file_url(base, v),
                        "size": self.file_size,
                        "packagetype": "sdist",
                        "python_version": "source",
                        "requires_python": null,
                        "digests": {"sha256": "0".repeat(64)}
                    }]),
                )
            })
            .collect();

        json!({
            "info": {
                "name": self.name,
                "version": self.versions.last(),
                "summary": "fixture package",
                "home_page": null,
                "requires_python": null,
                "classifiers": self.classifiers,
                "requires_dist": if self.requires.is_empty() {
                    serde_json::Value::Null
                } else {
                    json!(self.requires)
                }
            },
            "last_serial": self.serial,
            "releases": releases
        })
    }
}

/// Mount a full fake upstream on the mock server: serial endpoint,
/// catalog listing, per-package metadata and the release files
/// themselves.
pub async fn mount_upstream(server: &MockServer, serial: i64, packages: &[PackageFixture]) {
    Mock::given(method("GET"))
        .and(path("/last-serial"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"last_serial": serial})))
        .mount(server)
        .await;

    let catalog: serde_json::Map<String, serde_json::Value> = packages
        .iter()
        .map(|p| (p.name.clone(), json!(p.serial)))
        .collect();
    Mock::given(method("GET"))
        .and(path("/packages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"packages": catalog})))
        .mount(server)
        .await;

    for package in packages {
        if package.metadata_missing {
            continue;
        }
        Mock::given(method("GET"))
            .and(path(format!("/pypi/{}/json", package.name)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(package.metadata_document(&server.uri())),
            )
            .mount(server)
            .await;

        for version in &package.versions {
            Mock::given(method("GET"))
                .and(path(format!(
                    "/packages/{}/{}-{}.tar.gz",
                    package.name, package.name, version
                )))
                .respond_with(
                    ResponseTemplate::new(200).set_body_bytes(vec![0u8; package.file_size]),
                )
                .mount(server)
                .await;
        }
    }
}

/// A config pointing at the mock upstream with a temp mirror root and
/// all static rule lists emptied, so only the fixture data drives
/// policy.
pub fn test_config(server: &MockServer, mirror_root: &Path) -> Config {
    let mut config = Config::default();
    config.mirror_root = mirror_root.display().to_string();
    config.index_url = server.uri();
    config.files_url = server.uri();
    config.rules.oversized.clear();
    config.rules.threats.clear();
    config.rules.low_value.clear();
    config.rules.frameworks.clear();
    config
}
