//! The resolution session: loads VAST documents, follows wrapper chains and
//! dispatches tracking beacons.
//!
//! All state lives in one arena shared by the tasks of a session, so a
//! session must be driven from inside a `tokio::task::LocalSet`.

use crate::ad::{AdId, AdNode, AdStatus, WrapperTarget};
use crate::config::ResolveConfig;
use crate::creative::CreativeRef;
use crate::document::{AdDocument, Arena, DocId, Notify};
use crate::error::{Result, VastError, error_chain};
use crate::fetch::{Fetch, HttpFetcher};
use crate::timecode::format_timecode;
use crate::tracking::{Beacon, HttpBeacon, expand_macros};
use crate::xml::Element;
use log::{debug, error, warn};
use std::cell::{Ref, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};

type LocalFuture = Pin<Box<dyn Future<Output = ()>>>;

/// The wrapper chain leading to a document
#[derive(Clone)]
struct Chain {
    depth: usize,
    urls: Vec<String>,
    failures: Rc<RefCell<Vec<VastError>>>,
}

struct Inner<F> {
    arena: RefCell<Arena>,
    fetcher: F,
    beacon: Box<dyn Beacon>,
    config: ResolveConfig,
}

/// A resolution session over one fetcher and one beacon sender
pub struct VastSession<F: Fetch + 'static> {
    inner: Rc<Inner<F>>,
}

impl<F: Fetch + 'static> Clone for VastSession<F> {
    fn clone(&self) -> Self {
        VastSession {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl VastSession<HttpFetcher> {
    /// A session fetching over HTTP, with beacons sharing the fetcher's
    /// cookie store
    pub fn with_http(config: ResolveConfig) -> Result<Self> {
        let fetcher = HttpFetcher::new(&config)?;
        let beacon = HttpBeacon::new(fetcher.client().clone());
        Ok(VastSession::new(fetcher, beacon, config))
    }
}

impl<F: Fetch + 'static> VastSession<F> {
    pub fn new(fetcher: F, beacon: impl Beacon + 'static, config: ResolveConfig) -> Self {
        VastSession {
            inner: Rc::new(Inner {
                arena: RefCell::new(Arena::new()),
                fetcher,
                beacon: Box::new(beacon),
                config,
            }),
        }
    }

    pub fn config(&self) -> &ResolveConfig {
        &self.inner.config
    }

    /// Fetch `url` and resolve the ads it contains
    pub fn query(&self, url: &str) -> AdsQuery {
        self.start(Some(url.to_string()), None)
    }

    /// Resolve an already parsed `<VAST>` document
    pub fn resolve(&self, root: Element) -> AdsQuery {
        self.start(None, Some(root))
    }

    fn start(&self, url: Option<String>, root: Option<Element>) -> AdsQuery {
        let (sender, receiver) = oneshot::channel();
        let doc = self
            .inner
            .arena
            .borrow_mut()
            .new_document(url.clone(), None, Notify::Query(sender));

        let failures = Rc::new(RefCell::new(Vec::new()));
        let chain = Chain {
            depth: 0,
            urls: url.iter().cloned().collect(),
            failures: Rc::clone(&failures),
        };

        let inner = Rc::clone(&self.inner);
        let task = tokio::task::spawn_local(async move {
            let root = match (root, url) {
                (Some(root), _) => Some(root),
                (None, Some(url)) => match inner.fetcher.fetch(&url).await {
                    Ok(root) => Some(root),
                    Err(e) => {
                        inner.fail(doc, &chain, e);
                        None
                    }
                },
                (None, None) => None,
            };

            if let Some(root) = root {
                Rc::clone(&inner).load(doc, root, chain.clone()).await;
            }
            inner.settle(doc, &chain);
        });

        AdsQuery {
            document: doc,
            receiver: Some(receiver),
            available: None,
            task,
            failures,
        }
    }

    /// Borrow the whole arena for several queries at once
    pub fn arena(&self) -> Ref<'_, Arena> {
        self.inner.arena.borrow()
    }

    pub fn ad(&self, id: AdId) -> Ref<'_, AdNode> {
        Ref::map(self.inner.arena.borrow(), |arena| arena.ad(id))
    }

    pub fn document(&self, id: DocId) -> Ref<'_, AdDocument> {
        Ref::map(self.inner.arena.borrow(), |arena| arena.document(id))
    }

    pub fn best_ad(&self, doc: DocId, allow_pods: bool) -> Option<AdId> {
        self.arena().best_ad(doc, allow_pods)
    }

    pub fn ad_with_sequence(&self, doc: DocId, sequence: u32) -> Option<AdId> {
        self.arena().ad_with_sequence(doc, sequence)
    }

    pub fn next_ad(&self, id: AdId) -> Option<AdId> {
        self.arena().next_ad(id)
    }

    /// Report `event` on one creative of `ad`.
    ///
    /// Does nothing when nobody subscribed to the event. The first
    /// `creativeView` of an ad also sends the impressions of the ad and of
    /// every wrapper above it that has not sent its own yet.
    pub fn track(
        &self,
        ad: AdId,
        creative: CreativeRef,
        event: &str,
        position: Option<f64>,
        asset_uri: Option<&str>,
    ) {
        let urls = {
            let mut arena = self.inner.arena.borrow_mut();
            let mut urls = match arena.ad(ad).registry(creative) {
                Some(registry) => registry.urls(event),
                None => {
                    debug!("No {:?} creative on {}", creative, ad);
                    return;
                }
            };
            if urls.is_empty() {
                return;
            }

            if event == "creativeView" {
                let mut cursor = Some(ad);
                while let Some(id) = cursor {
                    let node = arena.ad_mut(id);
                    if !node.impression_sent {
                        node.impression_sent = true;
                        urls.extend(node.own_impression_urls().iter().cloned());
                    }
                    cursor = node.parent;
                }
            }
            urls
        };

        let playhead = position.map(format_timecode);
        let mut macros = Vec::new();
        if let Some(playhead) = playhead.as_deref() {
            macros.push(("CONTENTPLAYHEAD", playhead));
        }
        if let Some(asset_uri) = asset_uri {
            macros.push(("ASSETURI", asset_uri));
        }
        self.send_beacons(&urls, &macros);
    }

    pub(crate) fn send_beacons(&self, urls: &[String], macros: &[(&str, &str)]) {
        for url in urls {
            self.inner.beacon.send(&expand_macros(url, macros));
        }
    }
}

impl<F: Fetch + 'static> Inner<F> {
    /// Build every ad of `root` into `doc`, then wait for the wrapper
    /// branches started along the way
    fn load(self: Rc<Self>, doc: DocId, root: Element, chain: Chain) -> LocalFuture {
        Box::pin(async move {
            let mut branches = JoinSet::new();

            for element in root.descendants("Ad") {
                let added = self.arena.borrow_mut().add_ad(doc, element);
                let Some(id) = added else {
                    continue;
                };

                let (acceptable, target) = {
                    let arena = self.arena.borrow();
                    let node = arena.ad(id);
                    (node.is_acceptable(), node.wrapper_target().cloned())
                };

                if acceptable {
                    self.arena.borrow_mut().notify_available(doc);
                } else if let Some(target) = target {
                    if let Some(branch) = Rc::clone(&self).follow(doc, id, target, &chain) {
                        branches.spawn_local(branch);
                    }
                }
            }

            while let Some(joined) = branches.join_next().await {
                if let Err(e) = joined {
                    error!("Wrapper branch of {} aborted: {}", doc, e);
                }
            }
        })
    }

    /// Start resolving the target of wrapper `ad`; `None` when the chain
    /// must stop here
    fn follow(
        self: Rc<Self>,
        doc: DocId,
        ad: AdId,
        target: WrapperTarget,
        chain: &Chain,
    ) -> Option<LocalFuture> {
        let stop = |error: VastError| {
            self.arena.borrow_mut().ad_mut(ad).status = AdStatus::Failed;
            self.fail(doc, chain, error);
            None
        };

        let Some(url) = target.uri else {
            return stop(VastError::MissingField("VASTAdTagURI".to_string()));
        };
        if !self.config.allows_depth(chain.depth) {
            let limit = self.config.wrapper_abort_limit.unwrap_or_default();
            return stop(VastError::AbortLimit { limit });
        }
        if chain.urls.contains(&url) {
            return stop(VastError::WrapperLoop(url));
        }

        let allow_pods = target
            .allow_multiple_ads
            .unwrap_or(self.config.allow_multiple_ads);
        let mut nested_chain = chain.clone();
        nested_chain.depth += 1;
        nested_chain.urls.push(url.clone());
        let chain = chain.clone();

        Some(Box::pin(async move {
            debug!("Following wrapper {} to {}", ad, url);
            let root = match self.fetcher.fetch(&url).await {
                Ok(root) => root,
                Err(e) => {
                    self.arena.borrow_mut().ad_mut(ad).status = AdStatus::Failed;
                    self.fail(doc, &chain, e);
                    return;
                }
            };

            let nested = self.arena.borrow_mut().new_document(
                Some(url.clone()),
                Some(ad),
                Notify::Wrapper { ad, allow_pods },
            );
            Rc::clone(&self).load(nested, root, nested_chain).await;

            let nested_failed = {
                let mut arena = self.arena.borrow_mut();
                if arena.ad(ad).status() == AdStatus::Resolved {
                    return;
                }
                arena.ad_mut(ad).status = AdStatus::Failed;
                !arena.document(nested).failures().is_empty()
            };
            // deeper failures were reported where they happened
            if !nested_failed {
                self.fail(doc, &chain, VastError::EmptyWrapper(url));
            }
        }))
    }

    fn fail(&self, doc: DocId, chain: &Chain, error: VastError) {
        warn!("Resolution failure in {}: {}", doc, error_chain(&error));
        chain.failures.borrow_mut().push(error.clone());
        self.arena.borrow_mut().record_failure(doc, error);
    }

    /// Fail the query's notification if no acceptable ad ever arrived
    fn settle(&self, doc: DocId, chain: &Chain) {
        let mut arena = self.arena.borrow_mut();
        if arena.document(doc).has_notified() {
            return;
        }

        let mut failures = chain.failures.borrow_mut();
        if failures.is_empty() {
            failures.push(VastError::NoAds);
            arena.record_failure(doc, VastError::NoAds);
        }
        arena.abandon(doc, failures[0].clone());
    }
}

/// An in-flight resolution started by `VastSession::query` or
/// `VastSession::resolve`
#[derive(Debug)]
pub struct AdsQuery {
    document: DocId,
    receiver: Option<oneshot::Receiver<Result<DocId>>>,
    available: Option<Result<DocId>>,
    task: JoinHandle<()>,
    failures: Rc<RefCell<Vec<VastError>>>,
}

/// Outcome of a query once every wrapper branch has finished
#[derive(Debug)]
pub struct Settled {
    pub document: DocId,
    pub available: Result<DocId>,
    pub failures: Vec<VastError>,
}

impl AdsQuery {
    /// The top-level document, which fills in while the query runs
    pub fn document(&self) -> DocId {
        self.document
    }

    /// Wait until an acceptable ad exists.
    ///
    /// More ads may still arrive afterwards. Fails with the first recorded
    /// failure when the query finishes without any acceptable ad.
    pub async fn available(&mut self) -> Result<DocId> {
        if let Some(result) = &self.available {
            return result.clone();
        }

        let result = match self.receiver.take() {
            Some(receiver) => receiver.await.unwrap_or_else(|_| {
                Err(VastError::Other(
                    "resolution ended without a result".to_string(),
                ))
            }),
            None => Err(VastError::NoAds),
        };
        self.available = Some(result.clone());
        result
    }

    /// Wait for every wrapper branch to finish
    pub async fn settled(mut self) -> Settled {
        if let Err(e) = (&mut self.task).await {
            error!("Resolution task of {} failed: {}", self.document, e);
            self.failures
                .borrow_mut()
                .push(VastError::Other(format!("resolution task failed: {}", e)));
        }

        let available = self.available().await;
        let failures = self.failures.borrow().clone();
        Settled {
            document: self.document,
            available,
            failures,
        }
    }
}
