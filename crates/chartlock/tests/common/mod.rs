//! Shared fixtures for integration tests

#![allow(dead_code)]

use chartlock::getter::{FetchError, Getter};
use chartlock::provenance::digest;
use chartlock::repo::{RepoFile, RepositoryEntry};
use chartlock::Settings;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

pub const STABLE: &str = "https://charts.example.com/stable";
pub const INCUBATOR: &str = "https://incubator.example.com";

enum Response {
    Body(Vec<u8>),
    Status(u16),
}

/// In-memory getter that records every requested URL
#[derive(Default)]
pub struct MemoryGetter {
    responses: Mutex<HashMap<String, Response>>,
    requests: Mutex<Vec<String>>,
}

impl MemoryGetter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), Response::Body(body.into()));
    }

    pub fn fail(&self, url: &str, status: u16) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), Response::Status(status));
    }

    pub fn forget(&self, url: &str) {
        self.responses.lock().unwrap().remove(url);
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().unwrap().clear();
    }
}

impl Getter for MemoryGetter {
    fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.requests.lock().unwrap().push(url.to_string());
        match self.responses.lock().unwrap().get(url) {
            Some(Response::Body(body)) => Ok(body.clone()),
            Some(Response::Status(404)) | None => Err(FetchError::NotFound {
                url: url.to_string(),
            }),
            Some(Response::Status(status)) => Err(FetchError::HttpStatus {
                status: *status,
                url: url.to_string(),
            }),
        }
    }
}

/// Bytes standing in for a packaged chart
pub fn archive(name: &str, version: &str) -> Vec<u8> {
    format!("archive of {} {}", name, version).into_bytes()
}

/// Index document listing `(name, version)` pairs in the given order
///
/// Every entry gets a relative URL `<name>-<version>.tgz` and the digest of
/// [`archive`] for it.
pub fn index_yaml(entries: &[(&str, &str)]) -> String {
    let mut by_name: Vec<(&str, Vec<&str>)> = Vec::new();
    for (name, version) in entries {
        match by_name.iter_mut().find(|entry| entry.0 == *name) {
            Some((_, versions)) => versions.push(*version),
            None => by_name.push((*name, vec![*version])),
        }
    }

    let mut yaml = String::from("apiVersion: v1\nentries:\n");
    for (name, versions) in by_name {
        yaml.push_str(&format!("  {}:\n", name));
        for version in versions {
            yaml.push_str(&format!(
                "    - version: {}\n      urls: [{}-{}.tgz]\n      digest: {}\n",
                version,
                name,
                version,
                digest(&archive(name, version))
            ));
        }
    }
    yaml
}

/// Scratch home directory plus an empty chart directory
pub struct Fixture {
    pub temp: TempDir,
    pub settings: Settings,
    pub chart: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let settings = Settings::with_home(temp.path().join("home"));
        let chart = temp.path().join("mychart");
        fs::create_dir_all(&chart).unwrap();
        fs::write(chart.join("Chart.yaml"), "name: mychart\nversion: 1.0.0\n").unwrap();
        Self {
            temp,
            settings,
            chart,
        }
    }

    /// Add a repository to repositories.yaml
    pub fn add_repository(&self, name: &str, url: &str) {
        let mut repos = RepoFile::load_or_default(&self.settings.repository_config).unwrap();
        repos.add(RepositoryEntry::new(name, url));
        repos.to_file(&self.settings.repository_config).unwrap();
    }

    /// Cache file the synchronizer writes for `name`
    pub fn cache_file(&self, name: &str) -> PathBuf {
        self.settings.repository_cache.join(format!("{}-index.yaml", name))
    }

    /// Write a cached index directly, as if a sync had happened
    pub fn write_cache(&self, name: &str, yaml: &str) {
        let path = self.cache_file(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, yaml).unwrap();
    }

    pub fn write_requirements(&self, yaml: &str) {
        fs::write(self.chart.join("requirements.yaml"), yaml).unwrap();
    }

    pub fn lock_path(&self) -> PathBuf {
        self.chart.join("requirements.lock")
    }

    pub fn charts_dir(&self) -> PathBuf {
        self.chart.join("charts")
    }

    /// Sorted file names in charts/
    pub fn chart_files(&self) -> Vec<String> {
        let dir = self.charts_dir();
        if !dir.is_dir() {
            return Vec::new();
        }
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

/// Create a chart directory with a Chart.yaml and one template
pub fn write_local_chart(dir: &Path, name: &str, version: &str) {
    fs::create_dir_all(dir.join("templates")).unwrap();
    fs::write(
        dir.join("Chart.yaml"),
        format!("name: {}\nversion: {}\n", name, version),
    )
    .unwrap();
    fs::write(dir.join("templates/configmap.yaml"), "kind: ConfigMap\n").unwrap();
}
