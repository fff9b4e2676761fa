//! A single `<Ad>` entry and how it is built from its element and the
//! wrapper ad that led to it.

use crate::creative::{Companion, Creative, CreativeKind, CreativeRef, Linear, NonLinear};
use crate::document::DocId;
use crate::tracking::TrackingRegistry;
use crate::xml::Element;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Children of `<InLine>`/`<Wrapper>` that are not collected as ad tags
const NON_PROPERTY_TAGS: [&str; 6] = [
    "Creatives",
    "InLine",
    "Wrapper",
    "Impression",
    "VASTAdTagURI",
    "Error",
];

/// Leading decimal digits of a pod position, ignoring anything after them
fn parse_sequence(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    let raw = raw.strip_prefix('+').unwrap_or(raw);
    let end = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    raw[..end].parse().ok()
}

/// Handle of an ad inside a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AdId(pub(crate) usize);

impl fmt::Display for AdId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ad#{}", self.0)
    }
}

/// The `required` attribute of `<CompanionAds>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompanionsRequired {
    All,
    Any,
    #[default]
    None,
}

impl FromStr for CompanionsRequired {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "all" => Ok(CompanionsRequired::All),
            "any" => Ok(CompanionsRequired::Any),
            "none" => Ok(CompanionsRequired::None),
            other => Err(format!("unknown companion requirement '{}'", other)),
        }
    }
}

/// Resolution state of an ad
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdStatus {
    /// Neither `<InLine>` nor `<Wrapper>`; never stored in a document
    Empty,
    /// Carries its own inline content
    Inline,
    /// A wrapper whose target has not produced an ad yet
    Wrapper,
    /// A wrapper whose target produced an ad
    Resolved,
    /// A wrapper whose target could not be fetched or yielded nothing
    Failed,
}

/// Where a wrapper points and whether it accepts a pod in return
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrapperTarget {
    pub uri: Option<String>,
    pub allow_multiple_ads: Option<bool>,
}

/// One `<Ad>` with everything it inherited from its wrapper chain
#[derive(Debug, Clone, Serialize)]
pub struct AdNode {
    pub(crate) id: AdId,
    pub(crate) document: DocId,
    pub(crate) pod: DocId,
    pub(crate) parent: Option<AdId>,
    pub(crate) current: AdId,
    pub(crate) status: AdStatus,
    pub(crate) impression_sent: bool,
    sequence: Option<u32>,
    impressions: Vec<String>,
    inherited_impressions: usize,
    properties: BTreeMap<String, String>,
    linear: Option<Linear>,
    companions: Vec<Companion>,
    non_linears: Vec<NonLinear>,
    non_linear_tracking: TrackingRegistry,
    companions_required: CompanionsRequired,
    wrapper: Option<WrapperTarget>,
}

impl AdNode {
    /// Build an ad from its `<Ad>` element.
    ///
    /// When `parent` is given its creatives, tags and impressions are copied
    /// first and this ad's own data is merged on top.
    pub fn from_element(
        id: AdId,
        document: DocId,
        element: &Element,
        parent: Option<&AdNode>,
    ) -> AdNode {
        let mut ad = AdNode {
            id,
            document,
            pod: document,
            parent: parent.map(|p| p.id),
            current: id,
            status: AdStatus::Empty,
            impression_sent: false,
            sequence: None,
            impressions: Vec::new(),
            inherited_impressions: 0,
            properties: BTreeMap::new(),
            linear: None,
            companions: Vec::new(),
            non_linears: Vec::new(),
            non_linear_tracking: TrackingRegistry::new(),
            companions_required: CompanionsRequired::default(),
            wrapper: None,
        };

        if let Some(parent) = parent {
            ad.inherit(parent);
        }

        if let Some(raw) = element.attr("sequence") {
            ad.sequence = parse_sequence(raw);
            if ad.sequence.is_none() {
                warn!("Ignoring sequence '{}' on {}", raw, id);
            }
        }

        let body = match element.descendant("InLine") {
            Some(inline) => {
                ad.status = AdStatus::Inline;
                inline
            }
            None => match element.descendant("Wrapper") {
                Some(wrapper) => {
                    ad.status = AdStatus::Wrapper;
                    ad.wrapper = Some(WrapperTarget {
                        uri: wrapper
                            .descendant("VASTAdTagURI")
                            .map(Element::compact_text)
                            .filter(|uri| !uri.is_empty()),
                        allow_multiple_ads: wrapper
                            .attr("allowMultipleAds")
                            .map(|v| v.trim() == "true"),
                    });
                    wrapper
                }
                None => {
                    debug!("Ad {} has neither InLine nor Wrapper", id);
                    return ad;
                }
            },
        };

        for prop in body.elements() {
            if !NON_PROPERTY_TAGS.contains(&prop.name.as_str()) {
                ad.properties.insert(prop.name.clone(), prop.trimmed_text());
            }
        }

        for impression in body.descendants("Impression") {
            let url = impression.compact_text();
            if !url.is_empty() {
                ad.impressions.push(url);
            }
        }

        if let Some(creatives) = body.descendant("Creatives") {
            for creative in creatives.descendants("Creative") {
                if let Some(content) = creative.first_element() {
                    ad.add_creative(content);
                }
            }
        }

        ad
    }

    /// Copy everything a wrapper contributes, by value
    fn inherit(&mut self, parent: &AdNode) {
        self.companions_required = parent.companions_required;
        self.linear = parent.linear.clone();
        self.companions = parent.companions.clone();
        self.non_linears = parent.non_linears.clone();
        self.non_linear_tracking = parent.non_linear_tracking.clone();
        self.properties = parent.properties.clone();
        self.impressions = parent.impressions.clone();
        self.inherited_impressions = self.impressions.len();
    }

    fn add_creative(&mut self, content: &Element) {
        let Some(kind) = CreativeKind::from_tag(&content.name) else {
            debug!("Skipping unsupported creative <{}> in {}", content.name, self.id);
            return;
        };

        match kind {
            CreativeKind::Linear => {
                let linear = Linear::from_element(content);
                match &mut self.linear {
                    Some(existing) => existing.augment(&linear),
                    None => self.linear = Some(linear),
                }
            }
            CreativeKind::Companion => {
                if let Some(required) = content.attr("required") {
                    match required.parse() {
                        Ok(required) => self.companions_required = required,
                        Err(e) => warn!("Ignoring CompanionAds attribute on {}: {}", self.id, e),
                    }
                }

                // Only entries present before this element are merge candidates
                let existing = self.companions.len();
                for item in content.descendants("Companion") {
                    let companion = Companion::from_element(item);
                    match self.companions[..existing]
                        .iter_mut()
                        .find(|c| c.base.matches(&companion.base))
                    {
                        Some(target) => target.augment(&companion),
                        None => self.companions.push(companion),
                    }
                }
            }
            CreativeKind::NonLinear => {
                self.non_linear_tracking
                    .augment(&TrackingRegistry::from_element(content));

                let existing = self.non_linears.len();
                for item in content.descendants("NonLinear") {
                    let (non_linear, clicks) = NonLinear::from_element(item);
                    for url in clicks {
                        self.non_linear_tracking.add_click_tracking(url);
                    }

                    match self.non_linears[..existing]
                        .iter_mut()
                        .find(|n| n.base.matches(&non_linear.base))
                    {
                        Some(target) => target.augment(&non_linear),
                        None => self.non_linears.push(non_linear),
                    }
                }
            }
        }
    }

    pub fn id(&self) -> AdId {
        self.id
    }

    pub fn document(&self) -> DocId {
        self.document
    }

    /// The document currently supplying this ad's pod
    pub fn pod(&self) -> DocId {
        self.pod
    }

    /// The wrapper ad this ad was resolved through, if any
    pub fn parent(&self) -> Option<AdId> {
        self.parent
    }

    /// The ad that stands for this one: itself, or the chosen target of a
    /// resolved wrapper
    pub fn current(&self) -> AdId {
        self.current
    }

    pub fn status(&self) -> AdStatus {
        self.status
    }

    pub fn sequence(&self) -> Option<u32> {
        self.sequence
    }

    pub fn has_sequence(&self) -> bool {
        self.sequence.is_some()
    }

    pub fn is_number(&self, sequence: u32) -> bool {
        self.sequence == Some(sequence)
    }

    /// True until the wrapper target resolves into inline content
    pub fn is_wrapper(&self) -> bool {
        matches!(self.status, AdStatus::Wrapper | AdStatus::Failed)
    }

    pub fn has_content(&self) -> bool {
        self.status != AdStatus::Empty
    }

    /// Whether this ad has inline data, either its own or through its target
    pub fn has_data(&self) -> bool {
        matches!(self.status, AdStatus::Inline | AdStatus::Resolved)
    }

    /// Has inline data and can open a pod: no sequence, or sequence 1
    pub fn is_acceptable(&self) -> bool {
        self.has_data() && self.sequence.is_none_or(|s| s == 1)
    }

    pub fn wrapper_target(&self) -> Option<&WrapperTarget> {
        self.wrapper.as_ref()
    }

    /// Every impression URL, inherited ones first
    pub fn impression_urls(&self) -> &[String] {
        &self.impressions
    }

    /// Impression URLs declared by this ad's own document
    pub fn own_impression_urls(&self) -> &[String] {
        &self.impressions[self.inherited_impressions..]
    }

    pub fn has_sent_impression(&self) -> bool {
        self.impression_sent
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Value of an ad tag such as `AdTitle`, merged down the wrapper chain
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    pub fn tag_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.tag(name).unwrap_or(default)
    }

    pub fn linear(&self) -> Option<&Linear> {
        self.linear.as_ref()
    }

    pub fn companions(&self) -> &[Companion] {
        &self.companions
    }

    /// The companion for the given location id
    pub fn companion(&self, id: &str) -> Option<&Companion> {
        self.companions
            .iter()
            .find(|c| c.base.attributes.get("id").is_some_and(|v| v == id))
    }

    pub fn companions_required(&self) -> CompanionsRequired {
        self.companions_required
    }

    pub fn non_linears(&self) -> &[NonLinear] {
        &self.non_linears
    }

    /// Tracking shared by every non-linear of this ad
    pub fn non_linear_tracking(&self) -> &TrackingRegistry {
        &self.non_linear_tracking
    }

    pub fn creative(&self, creative: CreativeRef) -> Option<&dyn Creative> {
        match creative {
            CreativeRef::Linear => self.linear.as_ref().map(|l| l as &dyn Creative),
            CreativeRef::Companion(i) => self.companions.get(i).map(|c| c as &dyn Creative),
            CreativeRef::NonLinear(i) => self.non_linears.get(i).map(|n| n as &dyn Creative),
        }
    }

    /// The registry `track` reads for the given creative
    pub fn registry(&self, creative: CreativeRef) -> Option<&TrackingRegistry> {
        match creative {
            CreativeRef::NonLinear(i) => {
                self.non_linears.get(i).map(|_| &self.non_linear_tracking)
            }
            other => self.creative(other)?.tracking(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse_document;

    fn build(xml: &str, parent: Option<&AdNode>) -> AdNode {
        let root = parse_document(xml).unwrap();
        AdNode::from_element(AdId(parent.map_or(0, |p| p.id.0 + 1)), DocId(0), &root, parent)
    }

    const WRAPPER: &str = r#"
        <Ad id="w">
          <Wrapper allowMultipleAds="true">
            <AdSystem>Wrapper System</AdSystem>
            <VASTAdTagURI>
              http://ads.test/inline.xml
            </VASTAdTagURI>
            <Impression>http://ads.test/wrapper/impression</Impression>
            <Creatives>
              <Creative>
                <Linear>
                  <TrackingEvents>
                    <Tracking event="start">http://ads.test/wrapper/start</Tracking>
                  </TrackingEvents>
                </Linear>
              </Creative>
              <Creative>
                <CompanionAds required="any">
                  <Companion id="merge"><CompanionClickThrough>http://wrapper</CompanionClickThrough></Companion>
                </CompanionAds>
              </Creative>
            </Creatives>
          </Wrapper>
        </Ad>"#;

    const INLINE: &str = r#"
        <Ad sequence="1">
          <InLine>
            <AdTitle>  Inline Title </AdTitle>
            <Error>http://ads.test/error</Error>
            <Impression>http://ads.test/impression</Impression>
            <Creatives>
              <Creative>
                <Linear>
                  <Duration>00:00:21</Duration>
                  <TrackingEvents>
                    <Tracking event="start">http://ads.test/start</Tracking>
                  </TrackingEvents>
                </Linear>
              </Creative>
              <Creative>
                <CompanionAds>
                  <Companion id="merge"><CompanionClickThrough>http://inline</CompanionClickThrough></Companion>
                  <Companion id="merge"><CompanionClickThrough>http://sibling</CompanionClickThrough></Companion>
                </CompanionAds>
              </Creative>
              <Creative>
                <NonLinearAds>
                  <TrackingEvents>
                    <Tracking event="creativeView">http://ads.test/nl</Tracking>
                  </TrackingEvents>
                  <NonLinear width="300" height="50"><NonLinearClickTracking>http://ads.test/nlclick</NonLinearClickTracking></NonLinear>
                  <NonLinear id="nlad"/>
                </NonLinearAds>
              </Creative>
            </Creatives>
          </InLine>
        </Ad>"#;

    #[test]
    fn reads_wrapper_target() {
        let wrapper = build(WRAPPER, None);
        assert_eq!(wrapper.status(), AdStatus::Wrapper);
        assert!(wrapper.is_wrapper());
        assert!(!wrapper.is_acceptable());

        let target = wrapper.wrapper_target().unwrap();
        assert_eq!(target.uri.as_deref(), Some("http://ads.test/inline.xml"));
        assert_eq!(target.allow_multiple_ads, Some(true));
        assert_eq!(wrapper.tag("AdSystem"), Some("Wrapper System"));
        assert_eq!(wrapper.companions_required(), CompanionsRequired::Any);
    }

    #[test]
    fn reads_inline_content() {
        let ad = build(INLINE, None);
        assert!(ad.is_acceptable());
        assert_eq!(ad.sequence(), Some(1));
        assert_eq!(ad.tag("AdTitle"), Some("Inline Title"));
        assert_eq!(ad.tag("Error"), None);
        assert_eq!(ad.tag_or("Advertiser", "unknown"), "unknown");
        assert_eq!(ad.impression_urls(), ["http://ads.test/impression"]);
        assert_eq!(ad.linear().and_then(|l| l.duration()), Some(21.0));
        assert_eq!(ad.non_linears().len(), 2);
        assert_eq!(ad.non_linear_tracking().urls("click"), vec!["http://ads.test/nlclick"]);
    }

    #[test]
    fn same_pass_siblings_are_not_merged() {
        let ad = build(INLINE, None);
        assert_eq!(ad.companions().len(), 2);
    }

    #[test]
    fn inherits_from_wrapper_by_value() {
        let wrapper = build(WRAPPER, None);
        let ad = build(INLINE, Some(&wrapper));

        assert_eq!(ad.parent(), Some(wrapper.id()));
        assert_eq!(ad.tag("AdSystem"), Some("Wrapper System"));
        assert_eq!(ad.companions_required(), CompanionsRequired::Any);
        assert_eq!(
            ad.impression_urls(),
            ["http://ads.test/wrapper/impression", "http://ads.test/impression"]
        );
        assert_eq!(ad.own_impression_urls(), ["http://ads.test/impression"]);

        let linear = ad.linear().unwrap();
        assert_eq!(
            linear.tracking.urls("start"),
            vec!["http://ads.test/wrapper/start", "http://ads.test/start"]
        );
        assert_eq!(wrapper.linear().unwrap().tracking.urls("start").len(), 1);

        // both inline companions merge into the inherited one
        assert_eq!(ad.companions().len(), 1);
        assert_eq!(ad.companion("merge").and_then(|c| c.click_through()), Some("http://sibling"));
        assert_eq!(wrapper.companions()[0].click_through(), Some("http://wrapper"));
    }

    #[test]
    fn registry_for_non_linears_is_shared() {
        let ad = build(INLINE, None);
        let first = ad.registry(CreativeRef::NonLinear(0)).unwrap();
        let second = ad.registry(CreativeRef::NonLinear(1)).unwrap();
        assert!(std::ptr::eq(first, second));
        assert!(ad.registry(CreativeRef::NonLinear(5)).is_none());
        assert!(ad.creative(CreativeRef::Linear).is_some());
    }

    #[test]
    fn empty_ad_has_no_content() {
        let ad = build("<Ad id=\"x\"><Other/></Ad>", None);
        assert!(!ad.has_content());
    }

    #[test]
    fn unreadable_sequence_is_ignored() {
        let ad = build("<Ad sequence=\"first\"><InLine/></Ad>", None);
        assert_eq!(ad.sequence(), None);
        assert!(ad.is_acceptable());

        assert_eq!(parse_sequence(" 2abc"), Some(2));
        assert_eq!(parse_sequence("+3"), Some(3));
        assert_eq!(parse_sequence("-1"), None);
        assert_eq!(parse_sequence("99999999999"), None);
    }
}
