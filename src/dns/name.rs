//! Question-name extraction from raw DNS messages.
//!
//! Only the uncompressed label sequence of the first question is read. The
//! relay never decodes anything else in the message: the query is forwarded
//! byte for byte once its name has picked an upstream.

use std::fmt;

use crate::error::NameError;

/// Size of the fixed DNS message header.
pub const HEADER_LEN: usize = 12;

/// Upper bound on the number of name bytes scanned.
pub const MAX_DOMAIN_LEN: usize = 255;

const RESPONSE_FLAG: u16 = 0x8000;
const POINTER_MASK: u8 = 0xC0;

/// A fully-qualified domain in dotted form, always ending with `.`.
///
/// Label bytes are kept as received; matching against routing suffixes is an
/// exact byte comparison.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DomainName(Vec<u8>);

impl DomainName {
    /// The root domain, `"."`.
    pub fn root() -> Self {
        Self(vec![b'.'])
    }

    /// Normalize a configured domain by appending the trailing dot if missing.
    ///
    /// An empty string becomes the root domain.
    pub fn from_dotted(domain: &str) -> Self {
        let mut bytes = domain.as_bytes().to_vec();
        if bytes.last() != Some(&b'.') {
            bytes.push(b'.');
        }
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false for a normalized name.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.0 == b"."
    }

    /// `self` equals `suffix` or ends with it.
    pub fn has_suffix(&self, suffix: &DomainName) -> bool {
        self.0.ends_with(&suffix.0)
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DomainName({self})")
    }
}

impl From<&str> for DomainName {
    fn from(value: &str) -> Self {
        Self::from_dotted(value)
    }
}

/// True when the header's QR bit marks the message as a response.
///
/// Callers must have checked that `message` holds a full header.
pub fn is_response(message: &[u8]) -> bool {
    let flags = u16::from_be_bytes([message[2], message[3]]);
    flags & RESPONSE_FLAG != 0
}

/// Parse the question name that starts at the beginning of `labels`.
///
/// `labels` is the message with its 12-byte header removed. Scanning stops at
/// the terminating zero label, at the end of the buffer, or after
/// [`MAX_DOMAIN_LEN`] bytes, whichever comes first; only a label that claims
/// bytes past the end of the buffer or a compression pointer is an error.
pub fn parse_domain(labels: &[u8]) -> Result<DomainName, NameError> {
    let mut domain = Vec::with_capacity(labels.len().min(MAX_DOMAIN_LEN));
    let mut i = 0;

    while i < MAX_DOMAIN_LEN && i < labels.len() {
        let size = labels[i];
        if size == 0 {
            break;
        }

        if size & POINTER_MASK == POINTER_MASK {
            return Err(NameError::UnsupportedCompression { offset: i });
        }

        let size = usize::from(size);
        let label_end = i + 1 + size;
        if label_end > labels.len() {
            return Err(NameError::MalformedName {
                label_end,
                packet_len: labels.len(),
            });
        }

        domain.extend_from_slice(&labels[i + 1..label_end]);
        domain.push(b'.');
        i = label_end;
    }

    if domain.is_empty() {
        return Ok(DomainName::root());
    }
    Ok(DomainName(domain))
}
