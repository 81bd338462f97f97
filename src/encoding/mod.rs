//! Key and value encodings. The interesting piece is [`IdKeyCodec`], which
//! rewrites the trailing decimal id of a logical key into an order-preserving
//! packed form so that byte order over physical keys equals numeric id order.

use std::marker::PhantomData;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub mod lexint;

pub use lexint::UnpackError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid codec config: {reason}")]
    Config { reason: String },
    #[error("key {key:?} has {found} segments, expected {expected}")]
    Shape {
        key: String,
        found: usize,
        expected: usize,
    },
    #[error("id segment {0:?} is not a canonical decimal integer")]
    Id(String),
    #[error("packed id segment {segment:?} is invalid")]
    Packed {
        segment: String,
        #[source]
        source: UnpackError,
    },
    #[error("physical key is not valid utf-8")]
    Utf8,
}

/// Reusable output buffer for key encoding.
#[derive(Debug, Default)]
pub struct KeyWriter {
    buf: Vec<u8>,
}

impl KeyWriter {
    pub fn new() -> Self {
        KeyWriter { buf: Vec::new() }
    }

    pub fn clear(&mut self) {
        self.buf.clear()
    }

    pub fn reserve(&mut self, additional: usize) {
        self.buf.reserve(additional)
    }

    pub fn write(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Reusable input buffer for key decoding.
#[derive(Debug, Default)]
pub struct KeyReader {
    buf: Vec<u8>,
    from: usize,
}

impl KeyReader {
    pub fn new() -> Self {
        KeyReader {
            buf: Vec::new(),
            from: 0,
        }
    }

    pub fn load(&mut self, bytes: &[u8]) {
        self.buf.clear();
        self.buf.extend_from_slice(bytes);
        self.from = 0;
    }

    /// Consume and return everything not yet read.
    pub fn take_rest(&mut self) -> &[u8] {
        let rest = &self.buf[self.from..];
        self.from = self.buf.len();
        rest
    }
}

/// Pluggable key encoding, installed wherever keys in a namespace are read or
/// written. Implementations map logical string keys to physical byte keys and
/// back.
pub trait KeyEncoding {
    /// Upper bound on the encoded size of `key`, for buffer reservation.
    fn estimate_size(&self, key: &str) -> usize;
    fn encode(&self, kw: &mut KeyWriter, key: &str) -> Result<(), CodecError>;
    fn decode(&self, kr: &mut KeyReader) -> Result<String, CodecError>;
}

/// Passthrough encoding for namespaces whose keys carry no id segment.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainKeys;

impl KeyEncoding for PlainKeys {
    fn estimate_size(&self, key: &str) -> usize {
        key.len()
    }

    fn encode(&self, kw: &mut KeyWriter, key: &str) -> Result<(), CodecError> {
        kw.write(key.as_bytes());
        Ok(())
    }

    fn decode(&self, kr: &mut KeyReader) -> Result<String, CodecError> {
        let text = std::str::from_utf8(kr.take_rest()).map_err(|_| CodecError::Utf8)?;
        Ok(text.to_owned())
    }
}

/// Order-preserving codec for id-bearing keys.
///
/// A logical key is `depth` segments joined by `delimiter`, the last of which
/// is a decimal id: with the default config, `/sensors/12`. The physical form
/// replaces the id with its packed-hex rendering, so physical byte order
/// equals numeric id order across digit-count boundaries (`9` sorts before
/// `10`). Keys of any other shape are rejected, not passed through; plain
/// namespaces use [`PlainKeys`] instead.
#[derive(Debug, Clone)]
pub struct IdKeyCodec {
    delimiter: char,
    depth: usize,
}

impl Default for IdKeyCodec {
    fn default() -> Self {
        IdKeyCodec {
            delimiter: '/',
            depth: 3,
        }
    }
}

impl IdKeyCodec {
    pub fn new(delimiter: char, depth: usize) -> Result<Self, CodecError> {
        if !delimiter.is_ascii() {
            return Err(CodecError::Config {
                reason: format!("delimiter {:?} is not a single-byte ascii character", delimiter),
            });
        }
        if delimiter.is_ascii_hexdigit() {
            // The packed id segment is lowercase hex; a hex-digit delimiter
            // could split it apart.
            return Err(CodecError::Config {
                reason: format!("delimiter {:?} collides with packed id segments", delimiter),
            });
        }
        if depth < 2 {
            return Err(CodecError::Config {
                reason: format!("depth {} leaves no room for a namespace and an id", depth),
            });
        }
        Ok(IdKeyCodec { delimiter, depth })
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    fn split<'k>(&self, key: &'k str) -> Result<Vec<&'k str>, CodecError> {
        let segments: Vec<&str> = key.split(self.delimiter).collect();
        if segments.len() != self.depth {
            return Err(CodecError::Shape {
                key: key.to_owned(),
                found: segments.len(),
                expected: self.depth,
            });
        }
        Ok(segments)
    }

    fn check_sub(&self, sub: &str) -> Result<(), CodecError> {
        let found = sub.split(self.delimiter).count();
        if found != self.depth - 1 {
            return Err(CodecError::Shape {
                key: sub.to_owned(),
                found,
                expected: self.depth - 1,
            });
        }
        Ok(())
    }

    fn parse_id(segment: &str) -> Result<u64, CodecError> {
        let canonical = !segment.is_empty()
            && segment.bytes().all(|b| b.is_ascii_digit())
            && (segment.len() == 1 || !segment.starts_with('0'));
        if !canonical {
            return Err(CodecError::Id(segment.to_owned()));
        }
        segment
            .parse::<u64>()
            .map_err(|_| CodecError::Id(segment.to_owned()))
    }

    /// Logical text key to physical text key.
    pub fn pack_key(&self, key: &str) -> Result<String, CodecError> {
        let mut segments = self.split(key)?;
        let id = Self::parse_id(segments[self.depth - 1])?;
        let packed = lexint::pack_hex(id);
        segments[self.depth - 1] = &packed;
        let delim = self.delimiter.to_string();
        Ok(segments.join(delim.as_str()))
    }

    /// Physical text key back to logical text key.
    pub fn unpack_key(&self, key: &str) -> Result<String, CodecError> {
        let mut segments = self.split(key)?;
        let packed = segments[self.depth - 1];
        let id = lexint::unpack_hex(packed).map_err(|source| CodecError::Packed {
            segment: packed.to_owned(),
            source,
        })?;
        let decimal = id.to_string();
        segments[self.depth - 1] = &decimal;
        let delim = self.delimiter.to_string();
        Ok(segments.join(delim.as_str()))
    }

    /// Decode just the id suffix of a physical key.
    pub fn id_of(&self, physical: &[u8]) -> Result<u64, CodecError> {
        let text = std::str::from_utf8(physical).map_err(|_| CodecError::Utf8)?;
        let segments = self.split(text)?;
        let packed = segments[self.depth - 1];
        lexint::unpack_hex(packed).map_err(|source| CodecError::Packed {
            segment: packed.to_owned(),
            source,
        })
    }

    /// Logical key for `id` under `sub`.
    pub fn logical_key(&self, sub: &str, id: u64) -> Result<String, CodecError> {
        self.check_sub(sub)?;
        Ok(format!("{}{}{}", sub, self.delimiter, id))
    }

    /// Byte prefix shared by every physical key in `sub`: the namespace
    /// followed by the delimiter. Exclusive lower bound for namespace scans.
    pub fn namespace_prefix(&self, sub: &str) -> Result<Vec<u8>, CodecError> {
        self.check_sub(sub)?;
        let mut prefix = sub.as_bytes().to_vec();
        prefix.push(self.delimiter as u8);
        Ok(prefix)
    }
}

impl KeyEncoding for IdKeyCodec {
    fn estimate_size(&self, key: &str) -> usize {
        // The id segment can only grow to at most the longest packed-hex form.
        key.len() + lexint::MAX_PACKED_HEX_LEN
    }

    fn encode(&self, kw: &mut KeyWriter, key: &str) -> Result<(), CodecError> {
        kw.write(self.pack_key(key)?.as_bytes());
        Ok(())
    }

    fn decode(&self, kr: &mut KeyReader) -> Result<String, CodecError> {
        let text = std::str::from_utf8(kr.take_rest()).map_err(|_| CodecError::Utf8)?;
        self.unpack_key(text)
    }
}

/// Decode a physical key yielded by a range scan back to its logical form.
pub fn decode_key<E: KeyEncoding>(encoding: &E, physical: &[u8]) -> Result<String, CodecError> {
    let mut kr = KeyReader::new();
    kr.load(physical);
    encoding.decode(&mut kr)
}

/// Smallest byte string strictly greater than every key starting with
/// `prefix`: increment the last byte, dropping trailing 0xff bytes first.
/// An all-0xff prefix has no successor.
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut out = prefix.to_vec();
    while let Some(last) = out.last_mut() {
        if *last < 0xff {
            *last += 1;
            return Some(out);
        }
        out.pop();
    }
    None
}

/// Pluggable value encoding for transaction reads and writes.
pub trait ValueEncoding {
    type Value;
    fn encode(&self, value: &Self::Value) -> anyhow::Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> anyhow::Result<Self::Value>;
}

/// Identity value encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawBytes;

impl ValueEncoding for RawBytes {
    type Value = Vec<u8>;

    fn encode(&self, value: &Vec<u8>) -> anyhow::Result<Vec<u8>> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// JSON value encoding via serde.
#[derive(Debug)]
pub struct Json<T>(PhantomData<T>);

impl<T> Json<T> {
    pub fn new() -> Self {
        Json(PhantomData)
    }
}

impl<T> Default for Json<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ValueEncoding for Json<T>
where
    T: Serialize + DeserializeOwned,
{
    type Value = T;

    fn encode(&self, value: &T) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> anyhow::Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
