//! Per-message envelope.

use serde::{Deserialize, Serialize};

/// Header carried in front of every request and response body.
///
/// `seq` correlates a response with its request on one connection. It is
/// unique among calls in flight, not globally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    /// Target method, formatted as `"Service.Method"`.
    pub service_method: String,
    /// Sequence number chosen by the client.
    pub seq: u64,
    /// Error reported by the server; empty on success.
    #[serde(default)]
    pub error: String,
}

impl Header {
    /// Create a request header with an empty error.
    pub fn new(service_method: impl Into<String>, seq: u64) -> Self {
        Self {
            service_method: service_method.into(),
            seq,
            error: String::new(),
        }
    }

    /// Overwrite this header in place for a new request, reusing its buffers.
    pub fn reset(&mut self, service_method: &str, seq: u64) {
        self.service_method.clear();
        self.service_method.push_str(service_method);
        self.seq = seq;
        self.error.clear();
    }

    /// Check if the server reported an error.
    #[inline]
    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_has_no_error() {
        let header = Header::new("Foo.Sum", 3);
        assert_eq!(header.service_method, "Foo.Sum");
        assert_eq!(header.seq, 3);
        assert!(!header.is_error());
    }

    #[test]
    fn test_reset_clears_error() {
        let mut header = Header::new("Foo.Sum", 1);
        header.error = "boom".to_string();

        header.reset("Bar.Mul", 9);
        assert_eq!(header, Header::new("Bar.Mul", 9));
    }

    #[test]
    fn test_json_field_names() {
        let header = Header::new("Foo.Sum", 7);
        let json = serde_json::to_value(&header).unwrap();
        assert_eq!(json["serviceMethod"], "Foo.Sum");
        assert_eq!(json["seq"], 7);
        assert_eq!(json["error"], "");
    }

    #[test]
    fn test_missing_error_defaults_to_empty() {
        let header: Header =
            serde_json::from_str(r#"{"serviceMethod":"Foo.Sum","seq":2}"#).unwrap();
        assert!(!header.is_error());
    }
}
