//! MIME entity model.
//!
//! A [`MimeBody`] is a header block plus the content exactly as it travels on
//! the wire (already transfer-encoded). Keeping the encoded form matters: MIC
//! digests and signatures are computed over these bytes, not over a decoded
//! view.
//!
//! ```text
//! multipart/report; report-type=disposition-notification
//! ├── text/plain                          (human readable)
//! └── message/disposition-notification    (machine readable)
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    error::MimeError,
    headers::{CONTENT_TRANSFER_ENCODING, CONTENT_TYPE, Headers},
};

pub const APPLICATION_PKCS7_MIME: &str = "application/pkcs7-mime";
pub const APPLICATION_X_PKCS7_MIME: &str = "application/x-pkcs7-mime";
pub const APPLICATION_PKCS7_SIGNATURE: &str = "application/pkcs7-signature";
pub const MESSAGE_DISPOSITION_NOTIFICATION: &str = "message/disposition-notification";
pub const MULTIPART_REPORT: &str = "multipart/report";
pub const MULTIPART_SIGNED: &str = "multipart/signed";
pub const TEXT_PLAIN: &str = "text/plain";

pub const SMIME_ENVELOPED: &str = "enveloped-data";
pub const SMIME_COMPRESSED: &str = "compressed-data";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MimeBody {
    headers: Headers,
    content: Arc<[u8]>,
}

impl MimeBody {
    /// Build an entity with a `Content-Type` header and the given content.
    #[must_use]
    pub fn new(content_type: &str, content: impl Into<Arc<[u8]>>) -> Self {
        let mut headers = Headers::new();
        headers.set(CONTENT_TYPE, content_type);
        Self {
            headers,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn from_parts(headers: Headers, content: impl Into<Arc<[u8]>>) -> Self {
        Self {
            headers,
            content: content.into(),
        }
    }

    /// Split raw bytes into headers and content.
    ///
    /// # Errors
    /// If the header block is malformed.
    pub fn parse(raw: &[u8]) -> Result<Self, MimeError> {
        let (parsed, offset) = mailparse::parse_headers(raw)?;
        let headers = parsed
            .iter()
            .map(|header| (header.get_key(), header.get_value()))
            .collect();

        Ok(Self {
            headers,
            content: Arc::from(&raw[offset.min(raw.len())..]),
        })
    }

    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    pub const fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    #[must_use]
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    #[must_use]
    pub fn content_arc(&self) -> Arc<[u8]> {
        Arc::clone(&self.content)
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE)
    }

    /// Lower-cased `type/subtype` of the entity, `text/plain` when absent.
    #[must_use]
    pub fn mime_type(&self) -> String {
        self.content_type().map_or_else(
            || TEXT_PLAIN.to_string(),
            |value| mailparse::parse_content_type(value).mimetype,
        )
    }

    /// A `Content-Type` parameter, matched case-insensitively.
    #[must_use]
    pub fn content_type_param(&self, name: &str) -> Option<String> {
        let parsed = mailparse::parse_content_type(self.content_type()?);
        parsed
            .params
            .into_iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    #[must_use]
    pub fn content_transfer_encoding(&self) -> Option<&str> {
        self.headers.get(CONTENT_TRANSFER_ENCODING)
    }

    fn is_pkcs7_mime(&self) -> bool {
        let mime = self.mime_type();
        mime == APPLICATION_PKCS7_MIME || mime == APPLICATION_X_PKCS7_MIME
    }

    fn smime_type_is(&self, expected: &str) -> bool {
        self.content_type_param("smime-type")
            .is_some_and(|value| value.eq_ignore_ascii_case(expected))
    }

    /// `application/pkcs7-mime; smime-type=enveloped-data`
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.is_pkcs7_mime() && self.smime_type_is(SMIME_ENVELOPED)
    }

    /// `application/pkcs7-mime; smime-type=compressed-data`
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.is_pkcs7_mime() && self.smime_type_is(SMIME_COMPRESSED)
    }

    /// `multipart/signed`
    #[must_use]
    pub fn is_signed(&self) -> bool {
        self.mime_type() == MULTIPART_SIGNED
    }

    /// Headers followed by the blank separator line, as fed into a MIC.
    #[must_use]
    pub fn header_block(&self) -> String {
        let mut block = self.headers.to_lines();
        block.push_str("\r\n");
        block
    }

    /// Full wire form: headers, blank line, content.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let block = self.header_block();
        let mut out = Vec::with_capacity(block.len() + self.content.len());
        out.extend_from_slice(block.as_bytes());
        out.extend_from_slice(&self.content);
        out
    }

    /// Content with its transfer encoding removed.
    ///
    /// # Errors
    /// If the content does not decode under the declared encoding.
    pub fn decoded_content(&self) -> Result<Vec<u8>, MimeError> {
        match self.content_transfer_encoding() {
            None => Ok(self.content.to_vec()),
            Some(encoding)
                if encoding.eq_ignore_ascii_case("7bit")
                    || encoding.eq_ignore_ascii_case("8bit")
                    || encoding.eq_ignore_ascii_case("binary") =>
            {
                Ok(self.content.to_vec())
            }
            Some(_) => {
                let mut raw = format!(
                    "{CONTENT_TRANSFER_ENCODING}: {}\r\n\r\n",
                    self.content_transfer_encoding().unwrap_or_default()
                )
                .into_bytes();
                raw.extend_from_slice(&self.content);

                mailparse::parse_mail(&raw)
                    .and_then(|mail| mail.get_body_raw())
                    .map_err(|e| MimeError::Decode(e.to_string()))
            }
        }
    }

    /// Assemble a multipart entity.
    ///
    /// `content_type` is the full type without the boundary, e.g.
    /// `multipart/report; report-type=disposition-notification`.
    #[must_use]
    pub fn multipart(content_type: &str, parts: &[Self]) -> Self {
        let boundary = generate_boundary();
        let mut content = Vec::new();

        for part in parts {
            content.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            content.extend_from_slice(&part.to_bytes());
            content.extend_from_slice(b"\r\n");
        }
        content.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

        Self::new(
            &format!("{content_type}; boundary=\"{boundary}\""),
            content,
        )
    }

    /// Split a multipart entity into its body parts.
    ///
    /// The CRLF preceding each delimiter line belongs to the delimiter and is
    /// not part of the preceding body part.
    ///
    /// # Errors
    /// If the entity is not multipart or its delimiters are malformed.
    pub fn parts(&self) -> Result<Vec<Self>, MimeError> {
        let boundary = self
            .content_type_param("boundary")
            .filter(|_| self.mime_type().starts_with("multipart/"))
            .ok_or_else(|| MimeError::NotMultipart(self.mime_type()))?;

        let delimiter = format!("--{boundary}");
        let content = &self.content[..];

        // (start of delimiter line, first byte after it, closing delimiter)
        let mut delimiters = Vec::new();
        let mut cursor = 0;
        while let Some(position) = find(content, delimiter.as_bytes(), cursor) {
            let after = position + delimiter.len();
            if position == 0 || content[position - 1] == b'\n' {
                let closing = content[after..].starts_with(b"--");
                let line_end = find(content, b"\n", after).map_or(content.len(), |p| p + 1);
                delimiters.push((position, line_end, closing));
                if closing {
                    break;
                }
                cursor = line_end;
            } else {
                cursor = after;
            }
        }

        if !delimiters.last().is_some_and(|(_, _, closing)| *closing) {
            return Err(MimeError::MalformedMultipart(
                "missing closing delimiter".to_string(),
            ));
        }
        if delimiters.len() < 2 {
            return Err(MimeError::MalformedMultipart(
                "no body parts".to_string(),
            ));
        }

        delimiters
            .windows(2)
            .map(|pair| {
                let (_, start, _) = pair[0];
                let (end, _, _) = pair[1];
                let mut slice = &content[start..end];
                if let Some(stripped) = slice.strip_suffix(b"\r\n") {
                    slice = stripped;
                } else if let Some(stripped) = slice.strip_suffix(b"\n") {
                    slice = stripped;
                }
                Self::parse(slice)
            })
            .collect()
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|position| position + from)
}

fn generate_boundary() -> String {
    format!(
        "----=_Part_{}_{}",
        ulid::Ulid::new(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros()
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_parse_splits_headers_and_content() {
        let body = MimeBody::parse(
            b"Content-Type: application/edi-x12\r\nContent-Transfer-Encoding: binary\r\n\r\nISA*00*",
        )
        .unwrap();

        assert_eq!(body.mime_type(), "application/edi-x12");
        assert_eq!(body.content_transfer_encoding(), Some("binary"));
        assert_eq!(body.content(), b"ISA*00*");
    }

    #[test]
    fn test_wire_form() {
        let mut body = MimeBody::new("text/plain", b"hello".as_slice());
        body.set_header(CONTENT_TRANSFER_ENCODING, "7bit");
        assert_eq!(
            body.to_bytes(),
            b"Content-Type: text/plain\r\nContent-Transfer-Encoding: 7bit\r\n\r\nhello".to_vec()
        );
    }

    #[test]
    fn test_security_content_types() {
        let encrypted = MimeBody::new(
            "application/pkcs7-mime; smime-type=enveloped-data; name=smime.p7m",
            Vec::new(),
        );
        assert!(encrypted.is_encrypted());
        assert!(!encrypted.is_compressed());
        assert!(!encrypted.is_signed());

        let compressed = MimeBody::new(
            "application/x-pkcs7-mime; smime-type=\"Compressed-Data\"",
            Vec::new(),
        );
        assert!(compressed.is_compressed());
        assert!(!compressed.is_encrypted());

        let signed = MimeBody::new(
            "multipart/signed; protocol=\"application/pkcs7-signature\"; micalg=sha-256; boundary=x",
            Vec::new(),
        );
        assert!(signed.is_signed());
    }

    #[test]
    fn test_multipart_round_trip() {
        let first = MimeBody::new("text/plain", b"line one\r\nline two".as_slice());
        let second = MimeBody::new(MESSAGE_DISPOSITION_NOTIFICATION, b"Field: x\r\n".as_slice());

        let report = MimeBody::multipart(
            "multipart/report; report-type=disposition-notification",
            &[first.clone(), second.clone()],
        );

        assert_eq!(report.mime_type(), MULTIPART_REPORT);
        assert_eq!(
            report.content_type_param("report-type").as_deref(),
            Some("disposition-notification")
        );

        let parts = report.parts().unwrap();
        assert_eq!(parts, vec![first, second]);
    }

    #[test]
    fn test_parts_rejects_non_multipart() {
        let body = MimeBody::new("text/plain", b"x".as_slice());
        assert!(matches!(body.parts(), Err(MimeError::NotMultipart(_))));
    }

    #[test]
    fn test_parts_requires_closing_delimiter() {
        let body = MimeBody::new(
            "multipart/mixed; boundary=\"b\"",
            b"--b\r\nContent-Type: text/plain\r\n\r\nx\r\n".as_slice(),
        );
        assert!(matches!(
            body.parts(),
            Err(MimeError::MalformedMultipart(_))
        ));
    }

    #[test]
    fn test_parts_ignores_preamble_and_inline_boundary_text() {
        let body = MimeBody::new(
            "multipart/mixed; boundary=\"b\"",
            b"preamble\r\n--b\r\nContent-Type: text/plain\r\n\r\nsee --b inline\r\n--b--\r\n"
                .as_slice(),
        );
        let parts = body.parts().unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].content(), b"see --b inline");
    }

    #[test]
    fn test_decoded_content_base64() {
        let mut body = MimeBody::new("application/octet-stream", b"aGVs\r\nbG8=\r\n".as_slice());
        body.set_header(CONTENT_TRANSFER_ENCODING, "base64");
        assert_eq!(body.decoded_content().unwrap(), b"hello");
    }
}
