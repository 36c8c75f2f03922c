//! Tab-separated bodies used by the HTTP RPC endpoints.
//!
//! Requests are always sent as `colenc=U`: one `key\tvalue` line per field,
//! both columns percent-encoded. Responses name their column encoding in the
//! `Content-Type` header.

use crate::error::ProtocolError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use percent_encoding::{percent_decode, percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Content type sent with every RPC request.
pub const RPC_CONTENT_TYPE: &str = "text/tab-separated-values; colenc=U";

/// Everything except the RFC 3986 unreserved characters is escaped.
const QUOTE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Column encoding of a TSV body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnEncoding {
    /// `colenc=U`: percent-encoded.
    Url,
    /// `colenc=B`: base64.
    Base64,
    /// No `colenc` parameter: columns are raw.
    Raw,
}

impl ColumnEncoding {
    /// Picks the encoding named by a `Content-Type` header value.
    pub fn from_content_type(content_type: &str) -> Self {
        let content_type = content_type.trim_end();
        if content_type.ends_with("colenc=B") {
            ColumnEncoding::Base64
        } else if content_type.ends_with("colenc=U") {
            ColumnEncoding::Url
        } else {
            ColumnEncoding::Raw
        }
    }

    /// Decodes a single column.
    pub fn decode(&self, column: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        match self {
            ColumnEncoding::Url => Ok(unquote(column)),
            ColumnEncoding::Base64 => STANDARD
                .decode(column)
                .map_err(|e| ProtocolError::Malformed(format!("bad base64 column: {}", e))),
            ColumnEncoding::Raw => Ok(column.to_vec()),
        }
    }
}

/// Percent-encodes `bytes`, leaving only unreserved characters as-is.
pub fn quote(bytes: &[u8]) -> String {
    percent_encode(bytes, QUOTE_SET).to_string()
}

/// Reverses [`quote`]. Malformed escapes are kept literally.
pub fn unquote(bytes: &[u8]) -> Vec<u8> {
    percent_decode(bytes).collect()
}

/// Builder for a `colenc=U` request body.
#[derive(Debug, Default, Clone)]
pub struct TsvWriter {
    body: String,
}

impl TsvWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one `key\tvalue` line.
    pub fn field(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> &mut Self {
        if !self.body.is_empty() {
            self.body.push('\n');
        }
        self.body.push_str(&quote(key.as_ref()));
        self.body.push('\t');
        self.body.push_str(&quote(value.as_ref()));
        self
    }

    /// Appends a record field: the key gets the `_` prefix that keeps it
    /// apart from metadata fields such as `num` or `atomic`.
    pub fn record(&mut self, key: &[u8], value: impl AsRef<[u8]>) -> &mut Self {
        let mut prefixed = Vec::with_capacity(key.len() + 1);
        prefixed.push(b'_');
        prefixed.extend_from_slice(key);
        self.field(prefixed, value)
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn finish(self) -> String {
        self.body
    }
}

/// Decodes a response body into ordered `(key, value)` pairs.
///
/// Lines that do not have exactly two columns are skipped.
pub fn decode(body: &[u8], encoding: ColumnEncoding) -> Result<Vec<(Bytes, Bytes)>, ProtocolError> {
    let mut pairs = Vec::new();

    for line in body.split(|&b| b == b'\n') {
        let mut columns = line.split(|&b| b == b'\t');
        let (Some(key), Some(value), None) = (columns.next(), columns.next(), columns.next())
        else {
            continue;
        };
        pairs.push((
            Bytes::from(encoding.decode(key)?),
            Bytes::from(encoding.decode(value)?),
        ));
    }

    Ok(pairs)
}

/// Strips the single leading `_` that marks a record key.
pub fn strip_record_prefix(key: &[u8]) -> Option<&[u8]> {
    key.strip_prefix(b"_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_quote_unreserved() {
        assert_eq!(quote(b"abc-._~XYZ09"), "abc-._~XYZ09");
        assert_eq!(quote(b"a b/c\t\n"), "a%20b%2Fc%09%0A");
        assert_eq!(quote(&[0x00, 0xff]), "%00%FF");
    }

    #[test]
    fn test_writer() {
        let mut writer = TsvWriter::new();
        writer.field("CUR", "3").record(b"k 1", "v\t").field("atomic", "");
        assert_eq!(writer.finish(), "CUR\t3\n_k%201\tv%09\natomic\t");
    }

    #[test]
    fn test_content_type_selection() {
        assert_eq!(
            ColumnEncoding::from_content_type("text/tab-separated-values; colenc=U"),
            ColumnEncoding::Url
        );
        assert_eq!(
            ColumnEncoding::from_content_type("text/tab-separated-values; colenc=B"),
            ColumnEncoding::Base64
        );
        assert_eq!(
            ColumnEncoding::from_content_type("text/tab-separated-values"),
            ColumnEncoding::Raw
        );
        assert_eq!(ColumnEncoding::from_content_type(""), ColumnEncoding::Raw);
    }

    #[test]
    fn test_decode_url() {
        let pairs = decode(b"_a%20b\t1\nnum\t1\n", ColumnEncoding::Url).unwrap();
        assert_eq!(
            pairs,
            vec![
                (Bytes::from_static(b"_a b"), Bytes::from_static(b"1")),
                (Bytes::from_static(b"num"), Bytes::from_static(b"1")),
            ]
        );
    }

    #[test]
    fn test_decode_base64() {
        let pairs = decode(b"a2V5\tdmFsdWU=", ColumnEncoding::Base64).unwrap();
        assert_eq!(
            pairs,
            vec![(Bytes::from_static(b"key"), Bytes::from_static(b"value"))]
        );

        assert!(decode(b"!!\t??", ColumnEncoding::Base64).is_err());
    }

    #[test]
    fn test_decode_raw_skips_bad_lines() {
        let pairs = decode(b"a%20\tb\nno-tab\nx\ty\tz\n\n", ColumnEncoding::Raw).unwrap();
        assert_eq!(
            pairs,
            vec![(Bytes::from_static(b"a%20"), Bytes::from_static(b"b"))]
        );
    }

    #[test]
    fn test_strip_record_prefix() {
        assert_eq!(strip_record_prefix(b"_key"), Some(&b"key"[..]));
        assert_eq!(strip_record_prefix(b"__key"), Some(&b"_key"[..]));
        assert_eq!(strip_record_prefix(b"num"), None);
    }

    proptest! {
        #[test]
        fn prop_quote_roundtrip(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
            let quoted = quote(&bytes);
            prop_assert!(!quoted.contains('\t'));
            prop_assert!(!quoted.contains('\n'));
            prop_assert_eq!(unquote(quoted.as_bytes()), bytes);
        }

        #[test]
        fn prop_body_roundtrip(
            fields in prop::collection::vec(
                (prop::collection::vec(any::<u8>(), 0..16), prop::collection::vec(any::<u8>(), 0..16)),
                0..8,
            )
        ) {
            let mut writer = TsvWriter::new();
            for (k, v) in &fields {
                writer.field(k, v);
            }
            let body = writer.finish();

            let decoded = decode(body.as_bytes(), ColumnEncoding::Url).unwrap();
            let expected: Vec<(Bytes, Bytes)> = fields
                .iter()
                .map(|(k, v)| (Bytes::from(k.clone()), Bytes::from(v.clone())))
                .collect();
            prop_assert_eq!(decoded, expected);
        }
    }
}
