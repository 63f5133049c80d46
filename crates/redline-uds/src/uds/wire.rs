//! Request/response framing
//!
//! Requests and responses are ephemeral values built per call; they never
//! outlive the exchange that produced them.

use std::time::Instant;

use super::{service_id, DiagError, Nrc};

/// A single outgoing diagnostic request
#[derive(Debug, Clone)]
pub struct DiagnosticRequest {
    pub service: u8,
    pub sub_function: Option<u8>,
    pub payload: Vec<u8>,
    pub target: u32,
    pub timestamp: Instant,
}

impl DiagnosticRequest {
    pub fn new(service: u8, target: u32) -> Self {
        Self {
            service,
            sub_function: None,
            payload: Vec::new(),
            target,
            timestamp: Instant::now(),
        }
    }

    pub fn with_sub_function(mut self, sub_function: u8) -> Self {
        self.sub_function = Some(sub_function);
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Wire bytes: service id, optional sub-function, payload
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(2 + self.payload.len());
        bytes.push(self.service);
        if let Some(sf) = self.sub_function {
            bytes.push(sf);
        }
        bytes.extend_from_slice(&self.payload);
        bytes
    }
}

/// A validated positive response
#[derive(Debug, Clone)]
pub struct DiagnosticResponse {
    /// Positive response service id (request id + 0x40)
    pub service: u8,
    /// Everything after the response service id
    pub data: Vec<u8>,
    pub source: u32,
    pub timestamp: Instant,
}

impl DiagnosticResponse {
    /// Validate a raw frame against the request service id.
    ///
    /// A `[0x7F, sid, nrc]` frame becomes `DiagError::NegativeResponse`;
    /// a positive response must carry exactly `request_service + 0x40`.
    pub fn parse(
        request_service: u8,
        source: u32,
        raw: &[u8],
        timestamp: Instant,
    ) -> Result<Self, DiagError> {
        let first = *raw.first().ok_or_else(|| DiagError::MalformedResponse {
            service: request_service,
            detail: "empty frame".to_string(),
        })?;

        if first == service_id::NEGATIVE_RESPONSE {
            if raw.len() < 3 {
                return Err(DiagError::MalformedResponse {
                    service: request_service,
                    detail: format!("negative response too short ({} bytes)", raw.len()),
                });
            }
            return Err(DiagError::NegativeResponse {
                service: raw[1],
                nrc: Nrc::from(raw[2]),
            });
        }

        let expected = service_id::positive(request_service);
        if first != expected {
            return Err(DiagError::UnexpectedService {
                expected,
                actual: first,
            });
        }

        Ok(Self {
            service: first,
            data: raw[1..].to_vec(),
            source,
            timestamp,
        })
    }

    /// Data after skipping `n` echo bytes (sub-function, DID, address...),
    /// with a length check.
    pub fn data_after(&self, n: usize) -> Result<&[u8], DiagError> {
        if self.data.len() < n {
            return Err(DiagError::MalformedResponse {
                service: self.service,
                detail: format!("expected at least {} bytes, got {}", n, self.data.len()),
            });
        }
        Ok(&self.data[n..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_request_encoding() {
        let req = DiagnosticRequest::new(0x27, 0x7E0)
            .with_sub_function(0x09)
            .with_payload(vec![0xDE, 0xAD]);
        assert_eq!(req.encode(), vec![0x27, 0x09, 0xDE, 0xAD]);

        let req = DiagnosticRequest::new(0x3E, 0x7E0).with_sub_function(0x00);
        assert_eq!(req.encode(), vec![0x3E, 0x00]);
    }

    #[test]
    fn test_positive_response_id_arithmetic() {
        let resp =
            DiagnosticResponse::parse(0x10, 0x7E8, &[0x50, 0x03, 0x00, 0x19], Instant::now())
                .unwrap();
        assert_eq!(resp.service, 0x50);
        assert_eq!(resp.data, vec![0x03, 0x00, 0x19]);
    }

    #[test]
    fn test_mismatched_service_id() {
        let err =
            DiagnosticResponse::parse(0x10, 0x7E8, &[0x62, 0x01], Instant::now()).unwrap_err();
        assert_eq!(
            err,
            DiagError::UnexpectedService {
                expected: 0x50,
                actual: 0x62
            }
        );
    }

    #[test]
    fn test_negative_response() {
        let err =
            DiagnosticResponse::parse(0x27, 0x7E8, &[0x7F, 0x27, 0x35], Instant::now())
                .unwrap_err();
        assert_eq!(
            err,
            DiagError::NegativeResponse {
                service: 0x27,
                nrc: Nrc::InvalidKey
            }
        );
    }

    #[test]
    fn test_short_negative_response() {
        let err = DiagnosticResponse::parse(0x27, 0x7E8, &[0x7F], Instant::now()).unwrap_err();
        assert!(matches!(err, DiagError::MalformedResponse { .. }));
    }

    #[test]
    fn test_data_after_bounds() {
        let resp =
            DiagnosticResponse::parse(0x22, 0x7E8, &[0x62, 0xF1, 0x90, 0x41], Instant::now())
                .unwrap();
        assert_eq!(resp.data_after(2).unwrap(), &[0x41]);
        assert!(resp.data_after(5).is_err());
    }
}
