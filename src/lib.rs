pub mod ad;
pub mod config;
pub mod creative;
pub mod document;
pub mod error;
pub mod fetch;
pub mod resolver;
pub mod timecode;
pub mod tracking;
pub mod vmap;
pub mod xml;

pub use ad::{AdId, AdNode, AdStatus, CompanionsRequired};
pub use config::ResolveConfig;
pub use creative::{
    Companion, Creative, CreativeKind, CreativeRef, Linear, MediaFile, MediaTarget, NonLinear,
    PointOffset, TrackingPoint,
};
pub use document::{AdDocument, Arena, DocId};
pub use error::{Result, VastError};
pub use fetch::{Fetch, HttpFetcher};
pub use resolver::{AdsQuery, Settled, VastSession};
pub use tracking::{Beacon, HttpBeacon, TrackingRegistry};
pub use vmap::{AdBreak, BreakPosition, BreakSchedule, BreakSource};
