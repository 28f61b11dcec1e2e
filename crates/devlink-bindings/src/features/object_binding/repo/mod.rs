use crate::features::service_binding::repo::{BindingRequest, BindingResponse};
use devlink_core::{CoreError, Result};
use devlink_proto::{
    OBJECT_CLASS_HEADER, OBJECT_ID_HEADER, OBJECT_NAME_HEADER, OBJECT_PROXY_PATH,
    OBJECT_URL_HEADER,
};

/// What the exporting instance needs to route a call to one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectProxyEnvelope {
    pub original_url: String,
    pub class_name: String,
    pub object_id: String,
    pub object_name: Option<String>,
}

impl ObjectProxyEnvelope {
    /// Moves the original URL into a header and points the request at the
    /// reserved object-proxy path. The origin is rewritten at dispatch.
    pub fn encode(&self, mut request: BindingRequest) -> BindingRequest {
        request.url = format!("http://localhost{OBJECT_PROXY_PATH}");
        request.set_header(OBJECT_URL_HEADER, self.original_url.clone());
        request.set_header(OBJECT_CLASS_HEADER, self.class_name.clone());
        request.set_header(OBJECT_ID_HEADER, self.object_id.clone());
        match &self.object_name {
            Some(name) => request.set_header(OBJECT_NAME_HEADER, name.clone()),
            None => {
                request.remove_header(OBJECT_NAME_HEADER);
            }
        }
        request
    }

    /// Restores the request an object stub originally made.
    pub fn decode(request: &BindingRequest) -> Result<(Self, BindingRequest)> {
        let required = |name: &str| {
            request
                .header(name)
                .map(str::to_string)
                .ok_or_else(|| CoreError::InvalidRecord(format!("missing {name} header")))
        };

        let envelope = Self {
            original_url: required(OBJECT_URL_HEADER)?,
            class_name: required(OBJECT_CLASS_HEADER)?,
            object_id: required(OBJECT_ID_HEADER)?,
            object_name: request.header(OBJECT_NAME_HEADER).map(str::to_string),
        };

        let mut original = request.clone();
        original.url = envelope.original_url.clone();
        for header in [
            OBJECT_URL_HEADER,
            OBJECT_CLASS_HEADER,
            OBJECT_ID_HEADER,
            OBJECT_NAME_HEADER,
        ] {
            original.remove_header(header);
        }
        Ok((envelope, original))
    }

    /// Like [`decode`](Self::decode), but answers malformed envelopes with
    /// the 400 response the receiving side should send.
    pub fn decode_or_reject(
        request: &BindingRequest,
    ) -> std::result::Result<(Self, BindingRequest), BindingResponse> {
        Self::decode(request).map_err(|error| {
            BindingResponse::diagnostic(400, format!("Bad object proxy request: {error}"))
        })
    }
}

/// Whether `url` addresses the reserved object-proxy path.
pub fn is_object_proxy_url(url: &str) -> bool {
    reqwest::Url::parse(url)
        .map(|parsed| parsed.path() == OBJECT_PROXY_PATH)
        .unwrap_or_else(|_| url.split('?').next() == Some(OBJECT_PROXY_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> ObjectProxyEnvelope {
        ObjectProxyEnvelope {
            original_url: "https://app.example/ledger/entries?limit=5".to_string(),
            class_name: "Ledger".to_string(),
            object_id: "6163636f756e742d31".to_string(),
            object_name: Some("account-1".to_string()),
        }
    }

    #[test]
    fn test_encode_moves_url_into_headers() {
        let request = BindingRequest::new("POST", "https://app.example/ledger/entries?limit=5")
            .with_header("content-type", "application/json")
            .with_body("{}");

        let encoded = envelope().encode(request);

        assert!(is_object_proxy_url(&encoded.url));
        assert_eq!(
            encoded.header(OBJECT_URL_HEADER),
            Some("https://app.example/ledger/entries?limit=5")
        );
        assert_eq!(encoded.header(OBJECT_CLASS_HEADER), Some("Ledger"));
        assert_eq!(encoded.header(OBJECT_NAME_HEADER), Some("account-1"));
        assert_eq!(encoded.header("content-type"), Some("application/json"));
    }

    #[test]
    fn test_decode_restores_original_request() {
        let original = BindingRequest::new("POST", "https://app.example/ledger/entries?limit=5")
            .with_header("content-type", "application/json")
            .with_body("{}");

        let (decoded, restored) = ObjectProxyEnvelope::decode(&envelope().encode(original.clone())).unwrap();

        assert_eq!(decoded, envelope());
        assert_eq!(restored, original);
    }

    #[test]
    fn test_decode_without_headers_is_bad_request() {
        let request = BindingRequest::get(format!("http://localhost{OBJECT_PROXY_PATH}"))
            .with_header(OBJECT_CLASS_HEADER, "Ledger");

        assert!(ObjectProxyEnvelope::decode(&request).is_err());
        let response = ObjectProxyEnvelope::decode_or_reject(&request).unwrap_err();
        assert_eq!(response.status, 400);
        assert!(response.text().contains(OBJECT_URL_HEADER));
    }

    #[test]
    fn test_object_proxy_url_detection() {
        assert!(is_object_proxy_url(&format!("http://127.0.0.1:9000{OBJECT_PROXY_PATH}")));
        assert!(is_object_proxy_url(OBJECT_PROXY_PATH));
        assert!(!is_object_proxy_url("http://127.0.0.1:9000/other"));
    }
}
