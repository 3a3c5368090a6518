use thiserror::Error;

/// Upstream bodies are cut to this many characters before being surfaced.
pub const SNIPPET_LEN: usize = 300;

pub type Result<T> = std::result::Result<T, AnalyticsError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalyticsError {
    #[error("{source_name} unavailable")]
    UpstreamUnavailable {
        source_name: &'static str,
        status: Option<u16>,
        details: String,
    },

    #[error("{source_name} timed out after {timeout_ms}ms")]
    UpstreamTimeout {
        source_name: &'static str,
        timeout_ms: u64,
    },

    #[error("{source_name} returned an unexpected payload")]
    UpstreamShapeInvalid {
        source_name: &'static str,
        details: String,
    },

    #[error("no column suitable for {role}")]
    SchemaResolution {
        role: &'static str,
        candidates: Vec<String>,
    },

    #[error("drug not found in top list")]
    NotFound { drug: String },

    #[error("invalid request")]
    InvalidRequest(String),
}

impl AnalyticsError {
    /// Short machine-readable name, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalyticsError::UpstreamUnavailable { .. } => "upstream_unavailable",
            AnalyticsError::UpstreamTimeout { .. } => "upstream_timeout",
            AnalyticsError::UpstreamShapeInvalid { .. } => "upstream_shape_invalid",
            AnalyticsError::SchemaResolution { .. } => "schema_resolution",
            AnalyticsError::NotFound { .. } => "not_found",
            AnalyticsError::InvalidRequest(_) => "invalid_request",
        }
    }

    /// Human-readable explanation for the `details` field of error bodies.
    pub fn details(&self) -> String {
        match self {
            AnalyticsError::UpstreamUnavailable {
                status: Some(status),
                details,
                ..
            } => format!("HTTP {status}: {details}"),
            AnalyticsError::UpstreamUnavailable { details, .. } => details.clone(),
            AnalyticsError::UpstreamTimeout { .. } => self.to_string(),
            AnalyticsError::UpstreamShapeInvalid { details, .. } => details.clone(),
            AnalyticsError::SchemaResolution { candidates, .. } => {
                if candidates.is_empty() {
                    "no candidate columns".to_string()
                } else {
                    format!("candidate columns: {}", candidates.join(", "))
                }
            }
            AnalyticsError::NotFound { drug } => {
                format!("'{drug}' is not among the top drugs by exposure")
            }
            AnalyticsError::InvalidRequest(reason) => reason.clone(),
        }
    }
}

/// Cut `body` to [`SNIPPET_LEN`] characters, marking the cut.
pub fn snippet(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(SNIPPET_LEN) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snippet_truncates_on_char_boundary() {
        let long = "é".repeat(SNIPPET_LEN + 10);
        let cut = snippet(&long);
        assert_eq!(cut.chars().count(), SNIPPET_LEN + 3);
        assert!(cut.ends_with("..."));

        assert_eq!(snippet("  short body \n"), "short body");
    }

    #[test]
    fn test_details() {
        let err = AnalyticsError::UpstreamUnavailable {
            source_name: "openFDA labels",
            status: Some(503),
            details: "down".to_string(),
        };
        assert_eq!(err.details(), "HTTP 503: down");

        let err = AnalyticsError::UpstreamTimeout {
            source_name: "CMS Part D",
            timeout_ms: 12000,
        };
        assert_eq!(err.details(), "CMS Part D timed out after 12000ms");

        let err = AnalyticsError::SchemaResolution {
            role: "drug name",
            candidates: vec!["tot_clms".to_string()],
        };
        assert_eq!(err.details(), "candidate columns: tot_clms");
    }
}
