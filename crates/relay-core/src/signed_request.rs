use std::collections::HashMap;

/// An opaque, provider-specific HTTP request pre-authorized by a preprocessor
/// (SigV4 for AWS, OAuth bearer exchange for GCP, a plain header for everyone
/// else). The dispatcher makes no assumptions about how it was produced.
#[derive(Clone, Debug)]
pub struct SignedRequest {
    pub method: &'static str,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl SignedRequest {
    pub fn post(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: "POST",
            url: url.into(),
            headers: HashMap::new(),
            body,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_accumulates_headers() {
        let req = SignedRequest::post("https://example.com", b"body".to_vec())
            .with_header("Authorization", "Bearer abc")
            .with_header("X-Api-Key", "k");
        assert_eq!(req.headers.get("Authorization").unwrap(), "Bearer abc");
        assert_eq!(req.headers.len(), 2);
    }
}
