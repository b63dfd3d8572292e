use anyhow::Result;
use std::cell::{Cell as StdCell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::fetch::{HttpResponse, HttpSource};
use crate::publish::{ObjectMetadata, ObjectStore, PublishTarget, PutObject};

pub fn test_config(data_root: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::with_data_root(data_root);
    config.api_url = "https://api.example.test/v1/forecast".to_string();
    config.bucket = "weather-test".to_string();
    config.fetch_base_delay = Duration::from_millis(1);
    config.http_timeout = Duration::from_secs(1);
    config
}

pub fn open_meteo_body(times: &[&str], temps: &[Option<f64>], humidity: &[Option<f64>]) -> String {
    serde_json::json!({
        "latitude": 46.05,
        "longitude": 14.51,
        "hourly_units": { "time": "iso8601", "temperature_2m": "°C", "relativehumidity_2m": "%" },
        "hourly": {
            "time": times,
            "temperature_2m": temps,
            "relativehumidity_2m": humidity,
        }
    })
    .to_string()
}

/// Replays canned responses in order; `Err` entries simulate transport failures.
pub struct ScriptedSource {
    script: RefCell<VecDeque<Result<(u16, String), String>>>,
    calls: StdCell<usize>,
    urls: RefCell<Vec<String>>,
}

impl ScriptedSource {
    pub fn new(script: Vec<Result<(u16, String), String>>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            calls: StdCell::new(0),
            urls: RefCell::new(Vec::new()),
        }
    }

    pub fn failing(times: usize, message: &str) -> Self {
        Self::new((0..times).map(|_| Err(message.to_string())).collect())
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.borrow().clone()
    }
}

impl HttpSource for ScriptedSource {
    fn get(&self, url: &str, _query: &[(String, String)], _timeout: Duration) -> Result<HttpResponse> {
        self.calls.set(self.calls.get() + 1);
        self.urls.borrow_mut().push(url.to_string());
        match self.script.borrow_mut().pop_front() {
            Some(Ok((status, body))) => Ok(HttpResponse {
                status,
                body: body.into_bytes(),
            }),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => Err(anyhow::anyhow!("scripted source exhausted")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
    pub cache_control: String,
}

#[derive(Default)]
enum WriteMode {
    #[default]
    Store,
    Reject(String),
    Drop,
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RefCell<HashMap<(String, String), StoredObject>>,
    mode: WriteMode,
}

impl MemoryObjectStore {
    pub fn rejecting(message: &str) -> Self {
        Self {
            mode: WriteMode::Reject(message.to_string()),
            ..Self::default()
        }
    }

    /// Acknowledges uploads without keeping them.
    pub fn dropping_writes() -> Self {
        Self {
            mode: WriteMode::Drop,
            ..Self::default()
        }
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .borrow()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.borrow().len()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put_object(&self, request: PutObject) -> Result<()> {
        match &self.mode {
            WriteMode::Reject(message) => anyhow::bail!("{message}"),
            WriteMode::Drop => Ok(()),
            WriteMode::Store => {
                self.objects.borrow_mut().insert(
                    (request.bucket, request.key),
                    StoredObject {
                        body: request.body,
                        content_type: request.content_type,
                        cache_control: request.cache_control,
                    },
                );
                Ok(())
            }
        }
    }

    fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMetadata> {
        let object = self
            .object(bucket, key)
            .ok_or_else(|| anyhow::anyhow!("NotFound: s3://{bucket}/{key}"))?;
        Ok(ObjectMetadata {
            size: Some(object.body.len() as u64),
            content_type: Some(object.content_type),
            etag: Some(format!("\"{}\"", object.body.len())),
        })
    }
}

/// Serves public GETs out of a [`MemoryObjectStore`] for the published URL.
pub struct ObjectStoreReader<'a> {
    store: &'a MemoryObjectStore,
    target: PublishTarget,
}

impl<'a> ObjectStoreReader<'a> {
    pub fn new(store: &'a MemoryObjectStore, target: &PublishTarget) -> Self {
        Self {
            store,
            target: target.clone(),
        }
    }
}

impl HttpSource for ObjectStoreReader<'_> {
    fn get(&self, url: &str, _query: &[(String, String)], _timeout: Duration) -> Result<HttpResponse> {
        let published = self.target.public_url()?;
        let object = (url == published)
            .then(|| self.store.object(&self.target.bucket, &self.target.key))
            .flatten();
        Ok(match object {
            Some(object) => HttpResponse {
                status: 200,
                body: object.body,
            },
            None => HttpResponse {
                status: 404,
                body: b"NoSuchKey".to_vec(),
            },
        })
    }
}
