//! Pipeline direction tags.

use serde::{Deserialize, Serialize};

/// Direction of traffic through the plugin pipeline.
///
/// A plugin both *declares* the flows it supports (via its capabilities)
/// and is *configured* with the flows it is permitted to run in. Only the
/// intersection of the two is ever dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flow {
    /// Inbound HTTP requests, before they reach the upstream handler.
    Request,
    /// Outbound HTTP responses, after the upstream handler has run.
    Response,
}

impl std::fmt::Display for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request => write!(f, "request"),
            Self::Response => write!(f, "response"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_serde_lowercase() {
        #[derive(Deserialize)]
        struct Holder {
            flows: Vec<Flow>,
        }

        let holder: Holder = toml::from_str(r#"flows = ["request", "response"]"#).unwrap();
        assert_eq!(holder.flows, vec![Flow::Request, Flow::Response]);
    }

    #[test]
    fn test_flow_display() {
        assert_eq!(Flow::Request.to_string(), "request");
        assert_eq!(Flow::Response.to_string(), "response");
    }
}
