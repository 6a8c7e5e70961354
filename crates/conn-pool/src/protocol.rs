//! Application protocols a pool can speak

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// HTTP protocol versions understood by the outbound connection layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "http/1.1")]
    Http11,
    #[serde(rename = "h2")]
    Http2,
    #[serde(rename = "h3")]
    Http3,
}

impl Protocol {
    /// ALPN-style label used in logs, metrics, and config files.
    pub fn label(&self) -> &'static str {
        match self {
            Protocol::Http11 => "http/1.1",
            Protocol::Http2 => "h2",
            Protocol::Http3 => "h3",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Returned when a protocol label is not one of `http/1.1`, `h2`, `h3`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown protocol: {0}")]
pub struct UnknownProtocol(pub String);

impl FromStr for Protocol {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http/1.1" | "http1.1" | "http11" => Ok(Protocol::Http11),
            "h2" | "http/2" | "http2" => Ok(Protocol::Http2),
            "h3" | "http/3" | "http3" => Ok(Protocol::Http3),
            other => Err(UnknownProtocol(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_alpn_labels_and_aliases() {
        assert_eq!("http/1.1".parse::<Protocol>().unwrap(), Protocol::Http11);
        assert_eq!("H2".parse::<Protocol>().unwrap(), Protocol::Http2);
        assert_eq!(" http3 ".parse::<Protocol>().unwrap(), Protocol::Http3);
    }

    #[test]
    fn rejects_unknown_label() {
        let err = "spdy/3".parse::<Protocol>().unwrap_err();
        assert_eq!(err.to_string(), "unknown protocol: spdy/3");
    }

    #[test]
    fn deserializes_from_toml_labels() {
        #[derive(Deserialize)]
        struct Doc {
            protocols: Vec<Protocol>,
        }
        let doc: Doc = toml::from_str(r#"protocols = ["http/1.1", "h2", "h3"]"#).unwrap();
        assert_eq!(
            doc.protocols,
            vec![Protocol::Http11, Protocol::Http2, Protocol::Http3]
        );
    }

    #[test]
    fn display_matches_label() {
        assert_eq!(Protocol::Http3.to_string(), "h3");
        assert_eq!(Protocol::Http11.to_string(), Protocol::Http11.label());
    }
}
