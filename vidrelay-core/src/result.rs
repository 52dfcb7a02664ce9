use std::fmt;

use serde::Serialize;

use crate::proto::StreamResponse;

/// Terminal outcome of a session, returned once per upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamResult {
    pub success: bool,
    pub message: String,
}

impl StreamResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

impl From<StreamResponse> for StreamResult {
    fn from(response: StreamResponse) -> Self {
        Self {
            success: response.success,
            message: response.message,
        }
    }
}

impl From<StreamResult> for StreamResponse {
    fn from(result: StreamResult) -> Self {
        Self {
            success: result.success,
            message: result.message,
        }
    }
}

impl fmt::Display for StreamResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = if self.success { "ok" } else { "failed" };
        write!(f, "[{label}] {}", self.message)
    }
}

/// Outcome of one rendition attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenditionResult {
    pub profile_name: String,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl RenditionResult {
    pub fn succeeded(profile_name: impl Into<String>) -> Self {
        Self {
            profile_name: profile_name.into(),
            succeeded: true,
            error_detail: None,
        }
    }

    pub fn failed(profile_name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            profile_name: profile_name.into(),
            succeeded: false,
            error_detail: Some(detail.into()),
        }
    }
}

/// Folds per-profile outcomes into the session's terminal result.
///
/// The session succeeds when at least one rendition succeeded; every failing
/// profile is named in the message.
pub fn aggregate(results: &[RenditionResult]) -> StreamResult {
    let total = results.len();
    let succeeded = results.iter().filter(|result| result.succeeded).count();
    let failures = results
        .iter()
        .filter(|result| !result.succeeded)
        .map(|result| match &result.error_detail {
            Some(detail) => format!("{}: {detail}", result.profile_name),
            None => result.profile_name.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ");

    if total > 0 && succeeded == total {
        StreamResult::success(format!("all {total} renditions succeeded"))
    } else if succeeded > 0 {
        StreamResult::success(format!("{succeeded}/{total} succeeded; failures: [{failures}]"))
    } else {
        StreamResult::failure(format!("all renditions failed; failures: [{failures}]"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILES: [&str; 4] = ["1080p", "720p", "480p", "360p"];

    #[test]
    fn every_rendition_succeeding() {
        let results: Vec<_> = PROFILES.iter().map(|name| RenditionResult::succeeded(*name)).collect();
        assert_eq!(
            aggregate(&results),
            StreamResult::success("all 4 renditions succeeded")
        );
    }

    #[test]
    fn partial_failure_names_failing_profiles() {
        let results = vec![
            RenditionResult::succeeded("1080p"),
            RenditionResult::failed("720p", "conversion failed"),
            RenditionResult::succeeded("480p"),
            RenditionResult::failed("360p", "directory creation failed"),
        ];
        let result = aggregate(&results);
        assert!(result.success);
        assert_eq!(
            result.message,
            "2/4 succeeded; failures: [720p: conversion failed, 360p: directory creation failed]"
        );
    }

    #[test]
    fn total_failure_is_a_session_failure() {
        let results: Vec<_> = PROFILES
            .iter()
            .map(|name| RenditionResult::failed(*name, "conversion failed"))
            .collect();
        let result = aggregate(&results);
        assert!(!result.success);
        assert!(result.message.starts_with("all renditions failed; failures: ["));
        for name in PROFILES {
            assert!(result.message.contains(name), "missing {name}");
        }
    }

    #[test]
    fn converts_to_and_from_wire_response() {
        let response = StreamResponse {
            success: true,
            message: "done".into(),
        };
        let result = StreamResult::from(response.clone());
        assert_eq!(StreamResponse::from(result), response);
    }
}
