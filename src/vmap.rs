//! VMAP break schedules: where the breaks sit in the content and which VAST
//! response fills each of them.

use crate::error::{Result, VastError};
use crate::fetch::Fetch;
use crate::resolver::{AdsQuery, VastSession};
use crate::timecode::parse_timecode;
use crate::tracking::TrackingRegistry;
use crate::xml::Element;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a break plays relative to the content
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BreakPosition {
    Start,
    End,
    Seconds(f64),
    Percent(f64),
}

impl FromStr for BreakPosition {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "start" => return Ok(BreakPosition::Start),
            "end" => return Ok(BreakPosition::End),
            _ => {}
        }

        if let Some(pct) = s.strip_suffix('%') {
            return pct
                .trim()
                .parse()
                .map(BreakPosition::Percent)
                .map_err(|_| format!("invalid break percentage '{}'", s));
        }

        parse_timecode(s)
            .or_else(|| s.parse().ok())
            .map(BreakPosition::Seconds)
            .ok_or_else(|| format!("unsupported break position '{}'", s))
    }
}

impl fmt::Display for BreakPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakPosition::Start => write!(f, "start"),
            BreakPosition::End => write!(f, "end"),
            BreakPosition::Seconds(s) => write!(f, "{}", s),
            BreakPosition::Percent(p) => write!(f, "{}%", p),
        }
    }
}

/// What fills a break
#[derive(Debug, Clone, PartialEq)]
pub enum BreakSource {
    /// A `<VAST>` document embedded in the schedule
    Inline(Element),
    /// A URL returning a VAST document
    TagUri(String),
}

/// One `<vmap:AdBreak>`
#[derive(Debug)]
pub struct AdBreak {
    pub id: Option<String>,
    pub position: BreakPosition,
    pub source: BreakSource,
    pub tracking: TrackingRegistry,
    query: Option<AdsQuery>,
}

impl AdBreak {
    fn from_element(element: &Element) -> Result<Option<AdBreak>> {
        let offset = element
            .attr("timeOffset")
            .ok_or_else(|| VastError::MissingField("timeOffset".to_string()))?;
        if offset.trim_start().starts_with('#') {
            debug!("Skipping ordinal break position {}", offset);
            return Ok(None);
        }
        let position = offset.parse::<BreakPosition>().map_err(VastError::Other)?;

        let inline = element
            .descendant("VASTAdData")
            .or_else(|| element.descendant("VASTData"))
            .and_then(|data| data.descendant("VAST"));
        let source = match inline {
            Some(vast) => BreakSource::Inline(vast.clone()),
            None => match element.descendant("AdTagURI") {
                Some(uri) => BreakSource::TagUri(uri.compact_text()),
                None => return Err(VastError::MissingField("AdSource".to_string())),
            },
        };

        let tracking = element
            .child("TrackingEvents")
            .map(TrackingRegistry::from_element)
            .unwrap_or_default();

        Ok(Some(AdBreak {
            id: element.attr("breakId").map(str::to_string),
            position,
            source,
            tracking,
            query: None,
        }))
    }

    /// The resolution started by `BreakSchedule::resolve`, if any
    pub fn query(&mut self) -> Option<&mut AdsQuery> {
        self.query.as_mut()
    }
}

/// The breaks of a VMAP response, in document order
#[derive(Debug, Default)]
pub struct BreakSchedule {
    breaks: Vec<AdBreak>,
}

impl BreakSchedule {
    /// Read the breaks of a `<vmap:VMAP>` root. Breaks with ordinal
    /// positions or without a supported ad source are left out.
    pub fn from_element(root: &Element) -> Self {
        let mut breaks = Vec::new();
        for (index, element) in root.descendants("AdBreak").into_iter().enumerate() {
            match AdBreak::from_element(element) {
                Ok(Some(adbreak)) => breaks.push(adbreak),
                Ok(None) => {}
                Err(e) => warn!("Ignoring break #{}: {}", index, e),
            }
        }
        BreakSchedule { breaks }
    }

    /// Fetch and read a schedule
    pub async fn load<F: Fetch>(fetcher: &F, url: &str) -> Result<Self> {
        let root = fetcher.fetch(url).await?;
        Ok(Self::from_element(&root))
    }

    pub fn breaks(&self) -> &[AdBreak] {
        &self.breaks
    }

    pub fn len(&self) -> usize {
        self.breaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breaks.is_empty()
    }

    pub fn positions(&self) -> Vec<BreakPosition> {
        self.breaks.iter().map(|b| b.position).collect()
    }

    /// Start resolving the ads of every break that has not started yet
    pub fn resolve<F: Fetch + 'static>(&mut self, session: &VastSession<F>) {
        for adbreak in self.breaks.iter_mut().filter(|b| b.query.is_none()) {
            adbreak.query = Some(match &adbreak.source {
                BreakSource::Inline(vast) => session.resolve(vast.clone()),
                BreakSource::TagUri(url) => session.query(url),
            });
        }
    }

    /// Report that break `index` started; returns its resolution, if started
    pub fn on_break_start<F: Fetch + 'static>(
        &mut self,
        session: &VastSession<F>,
        index: usize,
    ) -> Option<&mut AdsQuery> {
        let adbreak = self.breaks.get_mut(index)?;
        session.send_beacons(&adbreak.tracking.urls("breakStart"), &[]);
        adbreak.query.as_mut()
    }

    /// Report that break `index` ended
    pub fn on_break_end<F: Fetch + 'static>(&self, session: &VastSession<F>, index: usize) {
        if let Some(adbreak) = self.breaks.get(index) {
            session.send_beacons(&adbreak.tracking.urls("breakEnd"), &[]);
        }
    }

    /// Take the resolution of each break, leaving the schedule unresolved
    pub fn take_queries(&mut self) -> Vec<Option<AdsQuery>> {
        self.breaks.iter_mut().map(|b| b.query.take()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse_document;

    const VMAP: &str = r##"<vmap:VMAP xmlns:vmap="http://www.iab.net/vmap-1.0" version="1.0">
        <vmap:AdBreak timeOffset="start" breakType="linear" breakId="pre">
          <vmap:AdSource id="pre-ad" allowMultipleAds="false" followRedirects="true">
            <vmap:AdTagURI templateType="vast3">
              <![CDATA[ http://ads.test/pre.xml ]]>
            </vmap:AdTagURI>
          </vmap:AdSource>
          <vmap:TrackingEvents>
            <vmap:Tracking event="breakStart">http://ads.test/break/start</vmap:Tracking>
            <vmap:Tracking event="breakEnd">http://ads.test/break/end</vmap:Tracking>
          </vmap:TrackingEvents>
        </vmap:AdBreak>
        <vmap:AdBreak timeOffset="#1" breakType="linear" breakId="ordinal">
          <vmap:AdSource><vmap:AdTagURI>http://ads.test/ordinal.xml</vmap:AdTagURI></vmap:AdSource>
        </vmap:AdBreak>
        <vmap:AdBreak timeOffset="00:10:00.500" breakType="linear" breakId="mid">
          <vmap:AdSource>
            <vmap:VASTAdData>
              <VAST version="3.0"><Ad><InLine><AdTitle>mid</AdTitle></InLine></Ad></VAST>
            </vmap:VASTAdData>
          </vmap:AdSource>
        </vmap:AdBreak>
        <vmap:AdBreak timeOffset="50%" breakType="linear">
          <vmap:AdSource/>
        </vmap:AdBreak>
        <vmap:AdBreak timeOffset="end" breakType="linear" breakId="post">
          <vmap:AdSource><vmap:AdTagURI>http://ads.test/post.xml</vmap:AdTagURI></vmap:AdSource>
        </vmap:AdBreak>
      </vmap:VMAP>"##;

    #[test]
    fn parses_break_positions() {
        assert_eq!("start".parse::<BreakPosition>(), Ok(BreakPosition::Start));
        assert_eq!("end".parse::<BreakPosition>(), Ok(BreakPosition::End));
        assert_eq!("25%".parse::<BreakPosition>(), Ok(BreakPosition::Percent(25.0)));
        assert_eq!("00:01:30".parse::<BreakPosition>(), Ok(BreakPosition::Seconds(90.0)));
        assert_eq!("12.5".parse::<BreakPosition>(), Ok(BreakPosition::Seconds(12.5)));
        assert!("#2".parse::<BreakPosition>().is_err());
    }

    #[test]
    fn reads_schedule() {
        let schedule = BreakSchedule::from_element(&parse_document(VMAP).unwrap());

        assert_eq!(
            schedule.positions(),
            vec![
                BreakPosition::Start,
                BreakPosition::Seconds(600.5),
                BreakPosition::End
            ]
        );

        let pre = &schedule.breaks()[0];
        assert_eq!(pre.id.as_deref(), Some("pre"));
        assert_eq!(pre.source, BreakSource::TagUri("http://ads.test/pre.xml".to_string()));
        assert_eq!(pre.tracking.urls("breakEnd"), vec!["http://ads.test/break/end"]);

        match &schedule.breaks()[1].source {
            BreakSource::Inline(vast) => {
                assert_eq!(vast.name, "VAST");
                assert_eq!(vast.descendants("Ad").len(), 1);
            }
            other => panic!("expected inline VAST, got {:?}", other),
        }
        assert!(schedule.breaks()[2].tracking.is_empty());
    }
}
