//! Linear, Companion and NonLinear creatives and the rules for merging the
//! data a wrapper contributes with the data of the ad it points to.

use crate::timecode::{Offset, parse_timecode};
use crate::tracking::TrackingRegistry;
use crate::xml::Element;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Attributes whose values are timecodes and are reported in seconds
const TIMECODE_ATTRIBUTES: [&str; 4] = ["skipoffset", "duration", "offset", "minSuggestedDuration"];

/// Events a player reports at positions given by `Linear::tracking_points`
const LINEAR_TRACKING_POINTS: [&str; 7] = [
    "start",
    "firstQuartile",
    "midpoint",
    "thirdQuartile",
    "complete",
    "progress",
    "skip",
];

/// The closed set of creative element types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreativeKind {
    Linear,
    Companion,
    NonLinear,
}

impl CreativeKind {
    /// Map the content element of a `<Creative>` to its kind
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "Linear" => Some(CreativeKind::Linear),
            "CompanionAds" => Some(CreativeKind::Companion),
            "NonLinearAds" => Some(CreativeKind::NonLinear),
            _ => None,
        }
    }
}

/// Identifies one creative inside an ad
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreativeRef {
    Linear,
    Companion(usize),
    NonLinear(usize),
}

/// An attribute value; timecode attributes are converted to seconds
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AttrValue {
    Text(String),
    Seconds(f64),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            AttrValue::Seconds(_) => None,
        }
    }

    pub fn as_seconds(&self) -> Option<f64> {
        match self {
            AttrValue::Seconds(s) => Some(*s),
            AttrValue::Text(_) => None,
        }
    }
}

/// Behaviour shared by every creative type
pub trait Creative {
    fn kind(&self) -> CreativeKind;

    fn click_through(&self) -> Option<&str>;

    fn attributes(&self) -> &BTreeMap<String, String>;

    /// The creative's own registry. `None` for non-linears, whose tracking
    /// is held once per ad.
    fn tracking(&self) -> Option<&TrackingRegistry>;

    /// Value of the given attribute, with timecodes converted to seconds
    fn attribute(&self, name: &str) -> Option<AttrValue> {
        let raw = self.attributes().get(name)?;
        if TIMECODE_ATTRIBUTES.contains(&name) {
            if let Some(seconds) = parse_timecode(raw) {
                return Some(AttrValue::Seconds(seconds));
            }
        }
        Some(AttrValue::Text(raw.clone()))
    }

    /// Like `attribute` but for plain text values, with a fallback
    fn attribute_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.attributes()
            .get(name)
            .map(String::as_str)
            .unwrap_or(default)
    }
}

/// Overlay `source` attributes onto `target`
fn merge_attributes(target: &mut BTreeMap<String, String>, source: &BTreeMap<String, String>) {
    for (key, value) in source {
        target.insert(key.clone(), value.clone());
    }
}

/// Replace `target` with `source` when `source` is set
fn prefer(target: &mut Option<String>, source: &Option<String>) {
    if source.is_some() {
        target.clone_from(source);
    }
}

/// A `<MediaFile>`: its attribute bag and source URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFile {
    pub src: String,
    pub attributes: BTreeMap<String, String>,
}

impl MediaFile {
    pub fn from_element(element: &Element) -> Self {
        MediaFile {
            src: element.compact_text(),
            attributes: element.attr_map(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    fn number(&self, name: &str) -> Option<f64> {
        self.attr(name)?
            .trim()
            .parse()
            .ok()
            .filter(|v: &f64| v.is_finite())
    }

    pub fn width(&self) -> Option<f64> {
        self.number("width")
    }

    pub fn height(&self) -> Option<f64> {
        self.number("height")
    }

    /// `bitrate`, falling back to `maxBitrate`
    pub fn bitrate(&self) -> Option<f64> {
        self.number("bitrate").or_else(|| self.number("maxBitrate"))
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.attr("type")
    }
}

/// What the player can show, used by `Linear::best_media`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MediaTarget {
    pub width: f64,
    pub height: f64,
    pub bitrate: Option<f64>,
}

/// Where in playback a tracking point sits
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum PointOffset {
    Start,
    Percent(f64),
    End,
}

impl PointOffset {
    fn sort_key(&self) -> f64 {
        match *self {
            PointOffset::Start => 0.0,
            PointOffset::Percent(p) => p,
            PointOffset::End => 100.0,
        }
    }
}

impl fmt::Display for PointOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointOffset::Start => write!(f, "start"),
            PointOffset::Percent(p) => write!(f, "{}%", p),
            PointOffset::End => write!(f, "end"),
        }
    }
}

/// A position at which the player should call `track` with `event`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingPoint {
    pub event: String,
    pub offset: PointOffset,
}

/// A `<Linear>` creative
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Linear {
    pub attributes: BTreeMap<String, String>,
    pub click_through: Option<String>,
    pub duration: Option<f64>,
    pub media_files: Vec<MediaFile>,
    pub tracking: TrackingRegistry,
}

impl Linear {
    pub fn from_element(element: &Element) -> Self {
        let mut linear = Linear {
            attributes: element.attr_map(),
            tracking: TrackingRegistry::from_element(element),
            ..Default::default()
        };

        if let Some(clicks) = element.descendant("VideoClicks") {
            linear.click_through = clicks.descendant("ClickThrough").map(Element::compact_text);
            for tracking in clicks.descendants("ClickTracking") {
                linear.tracking.add_click_tracking(tracking.compact_text());
            }
        }

        if let Some(duration) = element.descendant("Duration") {
            linear.duration = match duration.compact_text().parse::<Offset>() {
                Ok(Offset::Seconds(s)) => Some(s),
                _ => None,
            };
        }

        if let Some(medias) = element.descendant("MediaFiles") {
            linear.media_files = medias
                .descendants("MediaFile")
                .into_iter()
                .map(MediaFile::from_element)
                .collect();
        }

        linear
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    pub fn all_medias(&self) -> &[MediaFile] {
        &self.media_files
    }

    /// Merge `other` into this creative, `other` taking precedence
    pub fn augment(&mut self, other: &Linear) {
        if other.duration.is_some() {
            self.duration = other.duration;
        }
        if !other.media_files.is_empty() {
            self.media_files = other.media_files.clone();
        }
        self.tracking.augment(&other.tracking);
        prefer(&mut self.click_through, &other.click_through);
        merge_attributes(&mut self.attributes, &other.attributes);
    }

    /// Pick the media file closest to the target resolution.
    ///
    /// Ties go to a file that declares a bitrate, then to the bitrate
    /// closest to the target's, then to the highest bitrate.
    pub fn best_media(&self, target: &MediaTarget) -> Option<&MediaFile> {
        let mut best: Option<(f64, &MediaFile)> = None;

        for media in &self.media_files {
            let distance = match (media.width(), media.height()) {
                (Some(w), Some(h)) => {
                    ((target.width - w).powi(2) + (target.height - h).powi(2)).sqrt()
                }
                _ => f64::INFINITY,
            };

            best = match best {
                None => Some((distance, media)),
                Some((d, _)) if distance < d => Some((distance, media)),
                Some((d, current))
                    if distance == d && wins_on_bitrate(media, current, target.bitrate) =>
                {
                    Some((distance, media))
                }
                keep => keep,
            };
        }

        best.map(|(_, media)| media)
    }

    /// Ordered positions at which the player should report progress events
    pub fn tracking_points(&self) -> Vec<TrackingPoint> {
        let mut points: Vec<TrackingPoint> = Vec::new();

        for event in self.tracking.events_of_types(&LINEAR_TRACKING_POINTS) {
            if points.iter().any(|p| p.event == event.event) {
                continue;
            }

            let offset = match event.event.as_str() {
                "start" => PointOffset::Start,
                "firstQuartile" => PointOffset::Percent(25.0),
                "midpoint" => PointOffset::Percent(50.0),
                "thirdQuartile" => PointOffset::Percent(75.0),
                "complete" => PointOffset::End,
                "skip" => {
                    let skip = self
                        .attributes
                        .get("skipoffset")
                        .and_then(|raw| raw.parse::<Offset>().ok())
                        .unwrap_or(Offset::Seconds(0.0));
                    match skip.as_percent(self.duration) {
                        Some(p) => PointOffset::Percent(p.round()),
                        None => continue,
                    }
                }
                _ => {
                    let percent = event
                        .offset
                        .as_deref()
                        .and_then(|raw| raw.parse::<Offset>().ok())
                        .and_then(|offset| offset.as_percent(self.duration));
                    match percent {
                        Some(p) => PointOffset::Percent(p.round()),
                        None => continue,
                    }
                }
            };

            points.push(TrackingPoint {
                event: event.event.clone(),
                offset,
            });
        }

        // stable: equal offsets keep registry order
        points.sort_by(|a, b| a.offset.sort_key().total_cmp(&b.offset.sort_key()));
        points
    }
}

fn wins_on_bitrate(candidate: &MediaFile, current: &MediaFile, target: Option<f64>) -> bool {
    match (candidate.bitrate(), current.bitrate()) {
        (Some(_), None) => true,
        (Some(c), Some(o)) => match target {
            Some(t) => (c - t).abs() < (o - t).abs(),
            None => c > o,
        },
        _ => false,
    }
}

impl Creative for Linear {
    fn kind(&self) -> CreativeKind {
        CreativeKind::Linear
    }

    fn click_through(&self) -> Option<&str> {
        self.click_through.as_deref()
    }

    fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    fn tracking(&self) -> Option<&TrackingRegistry> {
        Some(&self.tracking)
    }
}

/// Renderable resources of a companion or non-linear
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Resources {
    pub iframe: Option<String>,
    pub html: Option<String>,
    /// creativeType -> URL
    pub images: BTreeMap<String, String>,
}

impl Resources {
    fn from_element(element: &Element) -> Self {
        let mut resources = Resources {
            iframe: element.descendant("IFrameResource").map(Element::compact_text),
            html: element.descendant("HTMLResource").map(Element::compact_text),
            images: BTreeMap::new(),
        };

        for image in element.descendants("StaticResource") {
            if let Some(kind) = image.attr("creativeType") {
                resources.images.insert(kind.to_string(), image.compact_text());
            }
        }

        resources
    }

    fn augment(&mut self, other: &Resources) {
        prefer(&mut self.iframe, &other.iframe);
        prefer(&mut self.html, &other.html);
        for (kind, url) in &other.images {
            self.images.insert(kind.clone(), url.clone());
        }
    }
}

/// Data common to companions and non-linears
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct StaticCreative {
    pub attributes: BTreeMap<String, String>,
    pub click_through: Option<String>,
    pub resources: Resources,
}

impl StaticCreative {
    /// Read the static parts; returns the click tracking URLs alongside
    fn from_element(element: &Element, prefix: &str) -> (Self, Vec<String>) {
        let creative = StaticCreative {
            attributes: element.attr_map(),
            click_through: element
                .descendant(&format!("{}ClickThrough", prefix))
                .map(Element::compact_text),
            resources: Resources::from_element(element),
        };

        let clicks = element
            .descendants(&format!("{}ClickTracking", prefix))
            .into_iter()
            .map(Element::compact_text)
            .collect();

        (creative, clicks)
    }

    fn augment(&mut self, other: &StaticCreative) {
        prefer(&mut self.click_through, &other.click_through);
        self.resources.augment(&other.resources);
        merge_attributes(&mut self.attributes, &other.attributes);
    }

    /// Whether `other` describes the same slot.
    ///
    /// Every one of id, width and height set on both sides must agree, and
    /// either the id or the full size must be set on both.
    pub fn matches(&self, other: &StaticCreative) -> bool {
        let both = |name: &str| match (self.attributes.get(name), other.attributes.get(name)) {
            (Some(a), Some(b)) => Some(a == b),
            _ => None,
        };

        let id = both("id");
        let width = both("width");
        let height = both("height");

        if [id, width, height].contains(&Some(false)) {
            return false;
        }

        id.is_some() || (width.is_some() && height.is_some())
    }
}

/// A `<Companion>` banner
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Companion {
    pub base: StaticCreative,
    pub alt_text: Option<String>,
    pub tracking: TrackingRegistry,
}

impl Companion {
    pub fn from_element(element: &Element) -> Self {
        let (base, clicks) = StaticCreative::from_element(element, "Companion");
        let mut tracking = TrackingRegistry::from_element(element);
        for url in clicks {
            tracking.add_click_tracking(url);
        }

        Companion {
            base,
            alt_text: element.descendant("AltText").map(Element::trimmed_text),
            tracking,
        }
    }

    pub fn resources(&self) -> &Resources {
        &self.base.resources
    }

    pub fn alt_text(&self) -> Option<&str> {
        self.alt_text.as_deref()
    }

    pub fn augment(&mut self, other: &Companion) {
        self.base.augment(&other.base);
        prefer(&mut self.alt_text, &other.alt_text);
        self.tracking.augment(&other.tracking);
    }
}

impl Creative for Companion {
    fn kind(&self) -> CreativeKind {
        CreativeKind::Companion
    }

    fn click_through(&self) -> Option<&str> {
        self.base.click_through.as_deref()
    }

    fn attributes(&self) -> &BTreeMap<String, String> {
        &self.base.attributes
    }

    fn tracking(&self) -> Option<&TrackingRegistry> {
        Some(&self.tracking)
    }
}

/// A `<NonLinear>` overlay. Its tracking events belong to the enclosing ad.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct NonLinear {
    pub base: StaticCreative,
}

impl NonLinear {
    /// Build the creative; click tracking URLs are returned for the ad's
    /// shared non-linear registry
    pub fn from_element(element: &Element) -> (Self, Vec<String>) {
        let (base, clicks) = StaticCreative::from_element(element, "NonLinear");
        (NonLinear { base }, clicks)
    }

    pub fn resources(&self) -> &Resources {
        &self.base.resources
    }

    pub fn augment(&mut self, other: &NonLinear) {
        self.base.augment(&other.base);
    }
}

impl Creative for NonLinear {
    fn kind(&self) -> CreativeKind {
        CreativeKind::NonLinear
    }

    fn click_through(&self) -> Option<&str> {
        self.base.click_through.as_deref()
    }

    fn attributes(&self) -> &BTreeMap<String, String> {
        &self.base.attributes
    }

    fn tracking(&self) -> Option<&TrackingRegistry> {
        None
    }
}
