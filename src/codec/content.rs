//! Streaming `Content-Encoding` decoders.

use std::fmt;
use std::io::{self, Write};

use bytes::Bytes;
use flate2::write::{DeflateDecoder, GzDecoder, ZlibDecoder};

/// Body decoder selected from a response's `Content-Encoding`.
///
/// Decoded bytes are produced incrementally as compressed chunks arrive.
pub(crate) enum ContentDecoder {
    Identity,
    Gzip(GzDecoder<Vec<u8>>),
    Deflate(Deflate),
}

/// `deflate` is sent both zlib-wrapped and raw in the wild; the first two
/// bytes decide which decoder is used.
pub(crate) enum Deflate {
    Sniffing(Vec<u8>),
    Zlib(ZlibDecoder<Vec<u8>>),
    Raw(DeflateDecoder<Vec<u8>>),
}

impl fmt::Debug for ContentDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentDecoder::Identity => f.write_str("Identity"),
            ContentDecoder::Gzip(_) => f.write_str("Gzip"),
            ContentDecoder::Deflate(_) => f.write_str("Deflate"),
        }
    }
}

impl ContentDecoder {
    /// Select a decoder for the given `Content-Encoding`. Unknown codings pass
    /// through untouched.
    pub(crate) fn for_encoding(encoding: Option<&str>) -> Self {
        let Some(encoding) = encoding else {
            return ContentDecoder::Identity;
        };

        match encoding.trim().to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => ContentDecoder::Gzip(GzDecoder::new(Vec::new())),
            "deflate" => ContentDecoder::Deflate(Deflate::Sniffing(Vec::new())),
            _ => ContentDecoder::Identity,
        }
    }

    pub(crate) fn is_identity(&self) -> bool {
        matches!(self, ContentDecoder::Identity)
    }

    /// Feed a chunk of encoded body, returning whatever decoded output is
    /// ready.
    pub(crate) fn decode(&mut self, chunk: &[u8]) -> io::Result<Bytes> {
        match self {
            ContentDecoder::Identity => Ok(Bytes::copy_from_slice(chunk)),
            ContentDecoder::Gzip(decoder) => {
                decoder.write_all(chunk)?;
                Ok(drain(decoder.get_mut()))
            }
            ContentDecoder::Deflate(deflate) => deflate.decode(chunk),
        }
    }

    /// Flush any remaining output once the body is complete.
    pub(crate) fn finish(&mut self) -> io::Result<Bytes> {
        match self {
            ContentDecoder::Identity => Ok(Bytes::new()),
            ContentDecoder::Gzip(decoder) => {
                decoder.try_finish()?;
                Ok(drain(decoder.get_mut()))
            }
            ContentDecoder::Deflate(deflate) => deflate.finish(),
        }
    }
}

impl Deflate {
    fn decode(&mut self, chunk: &[u8]) -> io::Result<Bytes> {
        if let Deflate::Sniffing(prefix) = self {
            prefix.extend_from_slice(chunk);
            if prefix.len() < 2 {
                return Ok(Bytes::new());
            }
            let buffered = std::mem::take(prefix);
            *self = if is_zlib_header(&buffered) {
                Deflate::Zlib(ZlibDecoder::new(Vec::new()))
            } else {
                Deflate::Raw(DeflateDecoder::new(Vec::new()))
            };
            return self.decode(&buffered);
        }

        match self {
            Deflate::Zlib(decoder) => {
                decoder.write_all(chunk)?;
                Ok(drain(decoder.get_mut()))
            }
            Deflate::Raw(decoder) => {
                decoder.write_all(chunk)?;
                Ok(drain(decoder.get_mut()))
            }
            Deflate::Sniffing(_) => Ok(Bytes::new()),
        }
    }

    fn finish(&mut self) -> io::Result<Bytes> {
        match self {
            Deflate::Sniffing(prefix) if prefix.is_empty() => Ok(Bytes::new()),
            Deflate::Sniffing(prefix) => {
                let buffered = std::mem::take(prefix);
                *self = Deflate::Raw(DeflateDecoder::new(Vec::new()));
                let mut out = self.decode(&buffered)?.to_vec();
                out.extend_from_slice(&self.finish()?);
                Ok(out.into())
            }
            Deflate::Zlib(decoder) => {
                decoder.try_finish()?;
                Ok(drain(decoder.get_mut()))
            }
            Deflate::Raw(decoder) => {
                decoder.try_finish()?;
                Ok(drain(decoder.get_mut()))
            }
        }
    }
}

/// RFC 1950: CM must be 8 and the first two bytes a multiple of 31.
fn is_zlib_header(prefix: &[u8]) -> bool {
    let (cmf, flg) = (prefix[0], prefix[1]);
    cmf & 0x0f == 8 && (u16::from(cmf) << 8 | u16::from(flg)) % 31 == 0
}

fn drain(buffer: &mut Vec<u8>) -> Bytes {
    Bytes::from(std::mem::take(buffer))
}
