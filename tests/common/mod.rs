#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use vast_resolver::xml::{Element, parse_document};
use vast_resolver::{Beacon, Fetch, ResolveConfig, Result, VastError, VastSession};

pub const BASE: &str = "http://ads.test/";

pub fn url(fixture: &str) -> String {
    format!("{}{}", BASE, fixture)
}

/// Serves the files of `tests/fixtures` under `BASE` and records requests
#[derive(Clone, Default)]
pub struct MemoryFetcher {
    documents: Rc<HashMap<String, String>>,
    delays: Rc<HashMap<String, Duration>>,
    requests: Rc<RefCell<Vec<String>>>,
}

impl MemoryFetcher {
    pub fn with_fixtures() -> Self {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
        let mut documents = HashMap::new();
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            let name = path.file_name().unwrap().to_str().unwrap().to_string();
            documents.insert(url(&name), std::fs::read_to_string(&path).unwrap());
        }

        MemoryFetcher {
            documents: Rc::new(documents),
            ..Default::default()
        }
    }

    /// Hold back responses for `fixture` by `delay`
    pub fn delayed(mut self, fixture: &str, delay: Duration) -> Self {
        let mut delays = (*self.delays).clone();
        delays.insert(url(fixture), delay);
        self.delays = Rc::new(delays);
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }

    pub fn requested(&self, fixture: &str) -> usize {
        let target = url(fixture);
        self.requests.borrow().iter().filter(|u| **u == target).count()
    }
}

impl Fetch for MemoryFetcher {
    async fn fetch(&self, url: &str) -> Result<Element> {
        self.requests.borrow_mut().push(url.to_string());
        if let Some(delay) = self.delays.get(url) {
            tokio::time::sleep(*delay).await;
        }

        match self.documents.get(url) {
            Some(content) => parse_document(content),
            None => Err(VastError::FetchError {
                url: url.to_string(),
                reason: "HTTP status 404 Not Found".to_string(),
            }),
        }
    }
}

/// Collects every beacon instead of sending it
#[derive(Clone, Default)]
pub struct RecordingBeacon {
    sent: Rc<RefCell<Vec<String>>>,
}

impl RecordingBeacon {
    pub fn sent(&self) -> Vec<String> {
        self.sent.borrow().clone()
    }

    pub fn clear(&self) {
        self.sent.borrow_mut().clear();
    }

    /// Beacons whose URL starts with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.sent
            .borrow()
            .iter()
            .filter(|u| u.starts_with(prefix))
            .count()
    }

    /// Beacons whose URL, without query, equals `url`
    pub fn count_exact(&self, url: &str) -> usize {
        self.sent
            .borrow()
            .iter()
            .filter(|u| u.split('?').next() == Some(url))
            .count()
    }
}

impl Beacon for RecordingBeacon {
    fn send(&self, url: &str) {
        self.sent.borrow_mut().push(url.to_string());
    }
}

pub struct Harness {
    pub session: VastSession<MemoryFetcher>,
    pub fetcher: MemoryFetcher,
    pub beacon: RecordingBeacon,
}

pub fn harness(config: ResolveConfig) -> Harness {
    harness_with(MemoryFetcher::with_fixtures(), config)
}

pub fn harness_with(fetcher: MemoryFetcher, config: ResolveConfig) -> Harness {
    let beacon = RecordingBeacon::default();
    Harness {
        session: VastSession::new(fetcher.clone(), beacon.clone(), config),
        fetcher,
        beacon,
    }
}
