//! Resolved documents and the arena that owns every document and ad of a
//! session. Ads refer to each other by handle, never by reference.

use crate::ad::{AdId, AdNode, AdStatus};
use crate::error::{Result, VastError};
use crate::xml::Element;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::oneshot;

/// Handle of a resolved `<VAST>` document inside a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocId(pub(crate) usize);

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc#{}", self.0)
    }
}

/// Who is waiting for a document's first acceptable ad
#[derive(Debug)]
pub(crate) enum Notify {
    /// A top-level query
    Query(oneshot::Sender<Result<DocId>>),
    /// The wrapper ad whose target this document is
    Wrapper { ad: AdId, allow_pods: bool },
}

/// One resolved `<VAST>` response
#[derive(Debug)]
pub struct AdDocument {
    pub(crate) id: DocId,
    pub(crate) url: Option<String>,
    pub(crate) parent: Option<AdId>,
    pub(crate) ads: Vec<AdId>,
    pub(crate) notify: Option<Notify>,
    pub(crate) notified: bool,
    pub(crate) failures: Vec<VastError>,
}

impl AdDocument {
    pub fn id(&self) -> DocId {
        self.id
    }

    /// Where the document was fetched from; `None` for a document handed in
    /// directly
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// The wrapper ad this document is the target of
    pub fn parent(&self) -> Option<AdId> {
        self.parent
    }

    /// Ads with content, in document order
    pub fn ads(&self) -> &[AdId] {
        &self.ads
    }

    /// Whether the one-shot availability notification has fired
    pub fn has_notified(&self) -> bool {
        self.notified
    }

    /// Failures recorded while resolving this document's ads
    pub fn failures(&self) -> &[VastError] {
        &self.failures
    }
}

/// Storage for every document and ad of one session
#[derive(Debug, Default)]
pub struct Arena {
    documents: Vec<AdDocument>,
    ads: Vec<AdNode>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn new_document(
        &mut self,
        url: Option<String>,
        parent: Option<AdId>,
        notify: Notify,
    ) -> DocId {
        let id = DocId(self.documents.len());
        self.documents.push(AdDocument {
            id,
            url,
            parent,
            ads: Vec::new(),
            notify: Some(notify),
            notified: false,
            failures: Vec::new(),
        });
        id
    }

    /// Build an ad from `element` and store it in `doc`.
    ///
    /// Returns `None` for an ad with neither inline nor wrapper content;
    /// such ads are not stored.
    pub(crate) fn add_ad(&mut self, doc: DocId, element: &Element) -> Option<AdId> {
        let id = AdId(self.ads.len());
        let parent = self.documents[doc.0].parent.map(|p| &self.ads[p.0]);
        let node = AdNode::from_element(id, doc, element, parent);

        if !node.has_content() {
            return None;
        }

        self.ads.push(node);
        self.documents[doc.0].ads.push(id);
        Some(id)
    }

    pub fn document(&self, id: DocId) -> &AdDocument {
        &self.documents[id.0]
    }

    pub fn ad(&self, id: AdId) -> &AdNode {
        &self.ads[id.0]
    }

    pub(crate) fn ad_mut(&mut self, id: AdId) -> &mut AdNode {
        &mut self.ads[id.0]
    }

    pub(crate) fn record_failure(&mut self, doc: DocId, error: VastError) {
        self.documents[doc.0].failures.push(error);
    }

    /// Whether the ad standing for `id` has inline data
    pub fn is_playable(&self, id: AdId) -> bool {
        self.ad(self.ad(id).current).has_data()
    }

    /// The ad to play from `doc`.
    ///
    /// With `allow_pods` the first pod member is preferred; otherwise, or
    /// when it is not playable, the first playable ad without a sequence.
    /// The returned id is the resolved ad, not the wrapper leading to it.
    pub fn best_ad(&self, doc: DocId, allow_pods: bool) -> Option<AdId> {
        if allow_pods {
            if let Some(first) = self.ad_with_sequence(doc, 1) {
                if self.is_playable(first) {
                    return Some(self.ad(first).current);
                }
            }
        }

        self.document(doc)
            .ads
            .iter()
            .map(|&id| self.ad(id))
            .filter(|ad| !ad.has_sequence())
            .map(|ad| ad.current)
            .find(|&current| self.ad(current).has_data())
    }

    /// The first ad of `doc` with the given pod position
    pub fn ad_with_sequence(&self, doc: DocId, sequence: u32) -> Option<AdId> {
        self.document(doc)
            .ads
            .iter()
            .copied()
            .find(|&id| self.ad(id).is_number(sequence))
    }

    /// The ad that follows `id` in its pod.
    ///
    /// A resolved wrapper answers for the ad it points to. When the pod the
    /// ad sits in is exhausted, the pods of the wrappers above it continue.
    pub fn next_ad(&self, id: AdId) -> Option<AdId> {
        let ad = self.ad(id);
        if ad.pod != ad.document && ad.current != id {
            return self.next_ad(ad.current);
        }

        if let Some(next) = self.next_in_document(id) {
            return Some(next);
        }

        let mut cursor = ad.parent;
        while let Some(parent) = cursor {
            if let Some(next) = self.next_in_document(parent) {
                return Some(next);
            }
            cursor = self.ad(parent).parent;
        }
        None
    }

    fn next_in_document(&self, id: AdId) -> Option<AdId> {
        let ad = self.ad(id);
        let sequence = ad.sequence()?;
        self.ad_with_sequence(ad.document, sequence.checked_add(1)?)
            .map(|next| self.ad(next).current)
    }

    /// Fire `doc`'s availability notification if it has not fired yet.
    ///
    /// A wrapper waiting on `doc` only takes the notification once `doc`
    /// holds an ad it may play; it then points at that ad and, if that makes
    /// the wrapper acceptable, notifies its own document in turn.
    pub(crate) fn notify_available(&mut self, doc: DocId) {
        if let Some(Notify::Wrapper { allow_pods, .. }) = &self.documents[doc.0].notify {
            if self.best_ad(doc, *allow_pods).is_none() {
                return;
            }
        }

        let Some(notify) = self.documents[doc.0].notify.take() else {
            return;
        };
        self.documents[doc.0].notified = true;

        match notify {
            Notify::Query(sender) => {
                debug!("Ads available in {}", doc);
                // the query may have been dropped
                let _ = sender.send(Ok(doc));
            }
            Notify::Wrapper { ad, allow_pods } => {
                let Some(target) = self.best_ad(doc, allow_pods) else {
                    return;
                };
                debug!("Wrapper {} resolved to {} in {}", ad, target, doc);

                let wrapper = self.ad_mut(ad);
                wrapper.pod = doc;
                wrapper.current = target;
                wrapper.status = AdStatus::Resolved;

                if wrapper.is_acceptable() {
                    let parent_doc = wrapper.document;
                    self.notify_available(parent_doc);
                }
            }
        }
    }

    /// Give up on `doc`'s notification, failing a waiting query
    pub(crate) fn abandon(&mut self, doc: DocId, error: VastError) {
        if let Some(Notify::Query(sender)) = self.documents[doc.0].notify.take() {
            let _ = sender.send(Err(error));
        }
    }
}
