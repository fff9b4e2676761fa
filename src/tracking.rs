//! Tracking event registry, macro expansion and beacon dispatch.

use crate::xml::Element;
use log::debug;
use rand::{Rng, thread_rng};
use serde::{Deserialize, Serialize};

/// Key prefix for progress events, which are stored per offset
const PROGRESS_PREFIX: &str = "progress-";

/// One subscribed tracking URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingEvent {
    /// Registry key, e.g. `start` or `progress-00:00:05`
    pub event: String,

    /// The tracking URL, whitespace stripped
    pub url: String,

    /// Raw `offset` attribute for progress events
    pub offset: Option<String>,
}

/// Event key -> subscribed URLs, in the order the keys were first seen
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackingRegistry {
    events: Vec<(String, Vec<TrackingEvent>)>,
}

impl TrackingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract `<Tracking>` entries from `root`
    ///
    /// `root` is either the `<TrackingEvents>` element itself or an element
    /// containing exactly one of them; anything else yields an empty registry.
    pub fn from_element(root: &Element) -> Self {
        let mut registry = Self::new();

        let container = if root.name == "TrackingEvents" {
            root
        } else {
            let found = root.descendants("TrackingEvents");
            if found.len() != 1 {
                return registry;
            }
            found[0]
        };

        for track in container.descendants("Tracking") {
            let Some(name) = track.attr("event").filter(|e| !e.is_empty()) else {
                continue;
            };

            let (key, offset) = if name == "progress" {
                let offset = track.attr("offset").unwrap_or_default().to_string();
                (format!("{}{}", PROGRESS_PREFIX, offset), Some(offset))
            } else {
                (name.to_string(), None)
            };

            registry.add(TrackingEvent {
                event: key,
                url: track.compact_text(),
                offset,
            });
        }

        registry
    }

    /// Append an event under its own key
    pub fn add(&mut self, event: TrackingEvent) {
        match self.events.iter_mut().find(|(key, _)| *key == event.event) {
            Some((_, list)) => list.push(event),
            None => self.events.push((event.event.clone(), vec![event])),
        }
    }

    /// Register a click tracking URL; these live outside `<TrackingEvents>`
    pub fn add_click_tracking(&mut self, url: String) {
        self.add(TrackingEvent {
            event: "click".to_string(),
            url,
            offset: None,
        });
    }

    /// Concatenate every list of `other` onto ours, key by key.
    /// Duplicate URLs are kept: some ad servers deliberately repeat pixels.
    pub fn augment(&mut self, other: &TrackingRegistry) {
        for (_, list) in &other.events {
            for event in list {
                self.add(event.clone());
            }
        }
    }

    /// Events registered under exactly `key`
    pub fn events(&self, key: &str) -> &[TrackingEvent] {
        self.events
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, list)| list.as_slice())
            .unwrap_or(&[])
    }

    /// All events whose key is one of `types`; `progress` matches every
    /// `progress-<offset>` key
    pub fn events_of_types(&self, types: &[&str]) -> Vec<&TrackingEvent> {
        let include_progress = types.contains(&"progress");
        self.events
            .iter()
            .filter(|(key, _)| {
                types.contains(&key.as_str())
                    || (include_progress && key.starts_with(PROGRESS_PREFIX))
            })
            .flat_map(|(_, list)| list.iter())
            .collect()
    }

    /// URLs subscribed to `key`
    pub fn urls(&self, key: &str) -> Vec<String> {
        self.events(key).iter().map(|e| e.url.clone()).collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.events.iter().map(|(key, _)| key.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Percent-encode a macro value the way `encodeURIComponent` does
pub fn encode_macro_value(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Eight zero-padded random digits, as the VAST standard requires
pub fn cache_buster() -> String {
    format!("{:08}", thread_rng().gen_range(0..100_000_000u32))
}

/// Replace `[NAME]` placeholders with encoded values and a fresh `[CACHEBUSTING]`
pub fn expand_macros(url: &str, macros: &[(&str, &str)]) -> String {
    let mut expanded = url.to_string();
    for (name, value) in macros {
        expanded = expanded.replace(&format!("[{}]", name), &encode_macro_value(value));
    }
    expanded.replace("[CACHEBUSTING]", &cache_buster())
}

/// Fire-and-forget sender for tracking pixels
pub trait Beacon {
    fn send(&self, url: &str);
}

/// Sends beacons as background GET requests on the current tokio runtime
#[derive(Debug, Clone, Default)]
pub struct HttpBeacon {
    client: reqwest::Client,
}

impl HttpBeacon {
    pub fn new(client: reqwest::Client) -> Self {
        HttpBeacon { client }
    }
}

impl Beacon for HttpBeacon {
    fn send(&self, url: &str) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::warn!("No async runtime, dropping beacon {}", url);
            return;
        };

        let client = self.client.clone();
        let url = url.to_string();
        handle.spawn(async move {
            // Beacon failures are never reported to the caller
            if let Err(e) = client.get(&url).send().await {
                debug!("Beacon {} failed: {}", url, e);
            }
        });
    }
}
