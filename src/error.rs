use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while fetching and resolving VAST documents
///
/// Cloneable so a single failure can be recorded on the document where it
/// happened and handed to the query's availability channel.
#[derive(Error, Debug, Clone)]
pub enum VastError {
    #[error("Failed to parse XML: {0}")]
    XmlParseError(#[from] quick_xml::Error),

    #[error("Failed to read file: {0}")]
    IoError(Arc<std::io::Error>),

    #[error("URL error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Failed to fetch '{url}': {reason}")]
    FetchError { url: String, reason: String },

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Malformed ad: {0}")]
    MalformedAd(String),

    #[error("No ads available")]
    NoAds,

    #[error("Wrapper target '{0}' did not yield a playable ad")]
    EmptyWrapper(String),

    #[error("Reached abort limit of ({limit}) wrappers.")]
    AbortLimit { limit: usize },

    #[error("Wrapper loop detected at '{0}'")]
    WrapperLoop(String),

    #[error("Unknown error: {0}")]
    Other(String),
}

impl From<std::io::Error> for VastError {
    fn from(e: std::io::Error) -> Self {
        VastError::IoError(Arc::new(e))
    }
}

pub type Result<T> = std::result::Result<T, VastError>;

/// Flattens an error and its sources into one log line
pub(crate) fn error_chain(err: &dyn std::error::Error) -> String {
    let mut line = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        line.push_str(": ");
        line.push_str(cause.to_string().trim());
        source = cause.source();
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_limit_message_names_the_limit() {
        let err = VastError::AbortLimit { limit: 1 };
        assert_eq!(err.to_string(), "Reached abort limit of (1) wrappers.");
    }

    #[test]
    fn io_errors_convert_and_clone() {
        let err: VastError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        let copy = err.clone();
        assert!(matches!(copy, VastError::IoError(_)));
        assert!(error_chain(&copy).contains("gone"));
    }
}
