#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use ed25519_dalek::SigningKey;
use globalconf_client::{
    ClientContext, ConfigurationClient, DocumentFetcher, FetchError,
};
use globalconf_directory::{
    AnchorSource, ConfigurationAnchor, ConfigurationLocation, DirectoryWriter, PrivateParameters,
    TrustedCertificate,
};
use globalconf_store::{ConfigurationStore, DownloadedFiles};
use globalconf_types::ContentId;
use rand::rngs::OsRng;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Fixed "now" used by every test clock.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 17, 12, 0, 0).unwrap()
}

/// One publishing instance: a signing key and the anchor that trusts it.
pub struct Publisher {
    pub instance: String,
    pub key: SigningKey,
}

impl Publisher {
    pub fn new(instance: &str) -> Self {
        Self {
            instance: instance.to_string(),
            key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn url(&self, n: usize) -> String {
        format!(
            "http://cs{n}.{}.example/internalconf",
            self.instance.to_lowercase()
        )
    }

    pub fn anchor(&self, locations: usize) -> ConfigurationAnchor {
        ConfigurationAnchor {
            instance_identifier: self.instance.clone(),
            generated_at: now() - Duration::days(1),
            sources: (0..locations)
                .map(|n| AnchorSource {
                    download_url: self.url(n).parse().unwrap(),
                })
                .collect(),
            certificates: vec![TrustedCertificate::new(
                format!("CN={} central server", self.instance),
                self.key.verifying_key(),
            )],
        }
    }

    /// A directory with shared parameters and, when given, private parameters.
    pub fn directory(
        &self,
        version: u32,
        expires_at: DateTime<Utc>,
        private: Option<&PrivateParameters>,
    ) -> Vec<u8> {
        let mut writer = DirectoryWriter::new();
        if let Some(params) = private {
            writer = writer.file(
                ContentId::PrivateParameters,
                &self.instance,
                version,
                expires_at,
                serde_json::to_vec(params).unwrap(),
            );
        }
        writer
            .file(
                ContentId::SharedParameters,
                &self.instance,
                version,
                expires_at,
                self.shared_content(version),
            )
            .sign(&self.key)
    }

    pub fn shared_content(&self, version: u32) -> Vec<u8> {
        format!("<shared instance=\"{}\" version=\"{version}\"/>", self.instance).into_bytes()
    }

    pub fn private_params(&self, extensions: &[&Publisher]) -> PrivateParameters {
        PrivateParameters {
            instance_identifier: self.instance.clone(),
            configuration_sources: extensions.iter().map(|p| p.anchor(1)).collect(),
        }
    }
}

/// In-memory fetcher serving fixed responses per URL.
#[derive(Clone, Default)]
pub struct StaticFetcher {
    routes: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl StaticFetcher {
    pub fn serve(&self, url: impl Into<String>, body: Vec<u8>) {
        self.routes.lock().unwrap().insert(url.into(), body);
    }

    pub fn unserve(&self, url: &str) {
        self.routes.lock().unwrap().remove(url);
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl DocumentFetcher for StaticFetcher {
    fn fetch(
        &self,
        location: &ConfigurationLocation,
    ) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send {
        self.requests.lock().unwrap().push(location.url.to_string());
        let result = match self.routes.lock().unwrap().get(location.url.as_str()) {
            Some(body) => Ok(body.clone()),
            None => Err(FetchError::Status {
                url: location.url.clone(),
                status: 404,
            }),
        };
        std::future::ready(result)
    }
}

/// A committing client over `root` with the fixed test clock.
pub fn client(
    fetcher: &StaticFetcher,
    anchor: ConfigurationAnchor,
    root: &Path,
) -> ConfigurationClient<StaticFetcher> {
    let store = ConfigurationStore::new(root);
    let downloaded = DownloadedFiles::load(store.index_path()).unwrap();
    ConfigurationClient::new(
        fetcher.clone(),
        store,
        ClientContext::new(anchor, downloaded),
    )
    .with_clock(Arc::new(now))
}

/// Every regular file under `root` with its contents, keyed by relative path.
pub fn snapshot(root: &Path) -> BTreeMap<String, Vec<u8>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<String, Vec<u8>>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let rel = path
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/");
                out.insert(rel, std::fs::read(&path).unwrap());
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}
