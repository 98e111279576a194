//! Representation content streams
//!
//! Reconstructs the content of a representation window by window,
//! verifying its MD5 digest once the last byte has been produced and
//! filling the fulltext cache after a complete read.

use crate::cache::{RepKey, cache_get, cache_set};
use crate::chain::{ChainBase, RepChain, build_rep_chain};
use crate::error::{FsError, Result};
use crate::fs::FsFs;
use crate::noderev::NodeRevision;
use crate::representation::Representation;
use bytes::Bytes;
use std::io::{self, Cursor, Read};
use tracing::debug;

/// Pull-based stream over the content of one representation
pub struct ContentStream<'a> {
    inner: StreamInner<'a>,
}

enum StreamInner<'a> {
    Empty,
    Buffered(Cursor<Bytes>),
    Rep(Box<RepReader<'a>>),
}

impl ContentStream<'_> {
    /// Read up to `buf.len()` bytes; 0 means the content is complete.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        match &mut self.inner {
            StreamInner::Empty => Ok(0),
            StreamInner::Buffered(cursor) => Ok(cursor.read(buf)?),
            StreamInner::Rep(reader) => reader.read(buf),
        }
    }

    /// Read the remaining content into memory.
    pub fn read_all(mut self) -> Result<Bytes> {
        if let StreamInner::Buffered(cursor) = &self.inner {
            if cursor.position() == 0 {
                return Ok(cursor.get_ref().clone());
            }
        }
        let mut out = Vec::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = self.read_chunk(&mut buf)?;
            if n == 0 {
                return Ok(Bytes::from(out));
            }
            out.extend_from_slice(&buf[..n]);
        }
    }
}

impl Read for ContentStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_chunk(buf)?)
    }
}

/// Reads one representation through its delta chain
struct RepReader<'a> {
    fs: &'a FsFs,
    chain: RepChain,
    locator: String,
    /// Next window index to reconstruct
    chunk_index: u64,
    buf: Bytes,
    buf_pos: usize,
    /// Read position in a cached base when there are no delta links
    cached_pos: usize,
    md5: Option<md5::Context>,
    md5_digest: [u8; 16],
    len: u64,
    off: u64,
    fulltext: Option<(RepKey, Vec<u8>)>,
}

impl<'a> RepReader<'a> {
    fn new(fs: &'a FsFs, rep: &Representation, fulltext_key: Option<RepKey>) -> Result<Self> {
        let chain = build_rep_chain(fs, rep)?;
        let len = chain.expanded_size;
        Ok(Self {
            fs,
            chain,
            locator: rep.unparse(),
            chunk_index: 0,
            buf: Bytes::new(),
            buf_pos: 0,
            cached_pos: 0,
            md5: Some(md5::Context::new()),
            md5_digest: rep.md5_digest,
            len,
            off: 0,
            fulltext: fulltext_key.map(|key| (key, Vec::with_capacity(len as usize))),
        })
    }

    /// Reconstruct the next window of the top representation.
    fn get_combined_window(&mut self) -> Result<Bytes> {
        let fs = self.fs;
        let chunk = self.chunk_index;
        let RepChain { files, links, base, .. } = &mut self.chain;

        // Deeper windows are only needed while the shallower ones copy
        // from their source view.
        let mut windows = Vec::with_capacity(links.len());
        for link in links.iter_mut() {
            let window = link.read_delta_window(fs, files, chunk)?;
            let independent = window.src_ops == 0;
            windows.push(window);
            if independent {
                break;
            }
        }

        let mut buf: Option<Bytes> = None;
        for (i, window) in windows.iter().enumerate().rev() {
            let plain: Vec<u8>;
            let source: Option<&[u8]> = if window.src_ops == 0 {
                None
            } else if let Some(prev) = buf.as_deref() {
                Some(prev)
            } else {
                match base {
                    ChainBase::Empty => None,
                    ChainBase::Plain(state) => {
                        plain = state.read_plain(fs, files, window.sview_offset, window.sview_len)?;
                        Some(&plain)
                    }
                    ChainBase::Cached(bytes) => Some(source_view(bytes, window.sview_offset, window.sview_len)?),
                }
            };

            let target = Bytes::from(window.apply(source)?);

            let link = &mut links[i];
            if chunk == 0 && link.is_exhausted() {
                if let Some(key) = link.rep_key() {
                    cache_set(&fs.caches().combined_window, key, target.clone());
                }
            }
            link.chunk_index += 1;
            buf = Some(target);
        }

        Ok(buf.unwrap_or_default())
    }

    fn get_contents(&mut self, out: &mut [u8]) -> Result<usize> {
        if self.chain.links.is_empty() {
            return match &mut self.chain.base {
                ChainBase::Cached(bytes) => {
                    let start = self.cached_pos.min(bytes.len());
                    let n = out.len().min(bytes.len() - start);
                    out[..n].copy_from_slice(&bytes[start..start + n]);
                    self.cached_pos += n;
                    Ok(n)
                }
                ChainBase::Plain(state) => {
                    let n = (out.len() as u64).min(state.size - state.current) as usize;
                    if n == 0 {
                        return Ok(0);
                    }
                    let data = state.read_plain(self.fs, &mut self.chain.files, state.current, n)?;
                    out[..n].copy_from_slice(&data);
                    Ok(n)
                }
                ChainBase::Empty => Ok(0),
            };
        }

        let mut written = 0;
        while written < out.len() {
            if self.buf_pos < self.buf.len() {
                let n = (self.buf.len() - self.buf_pos).min(out.len() - written);
                out[written..written + n].copy_from_slice(&self.buf[self.buf_pos..self.buf_pos + n]);
                self.buf_pos += n;
                written += n;
                continue;
            }
            if self.chain.links[0].is_exhausted() {
                break;
            }
            self.buf = self.get_combined_window()?;
            self.buf_pos = 0;
            self.chunk_index += 1;
        }
        Ok(written)
    }

    fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        self.read_verified(out)
            .map_err(|e| e.in_representation(|| self.locator.clone()))
    }

    fn read_verified(&mut self, out: &mut [u8]) -> Result<usize> {
        let n = self.get_contents(out)?;
        let data = &out[..n];
        self.off += n as u64;
        if self.off > self.len {
            return Err(FsError::corrupt(format!(
                "Representation content exceeds its expanded size {}",
                self.len
            )));
        }

        if let Some(ctx) = self.md5.as_mut() {
            ctx.consume(data);
        }
        if let Some((_, text)) = self.fulltext.as_mut() {
            text.extend_from_slice(data);
        }

        if self.off == self.len {
            if let Some(ctx) = self.md5.take() {
                let actual = ctx.compute().0;
                // an all-zero digest is unknown and matches anything
                if self.md5_digest != [0; 16] && actual != self.md5_digest {
                    self.fulltext = None;
                    return Err(FsError::ChecksumMismatch {
                        expected: hex::encode(self.md5_digest),
                        actual: hex::encode(actual),
                    });
                }
            }
            if let Some((key, text)) = self.fulltext.take() {
                debug!(revision = key.revision, offset = key.offset, len = text.len(), "caching fulltext");
                cache_set(&self.fs.caches().fulltext, key, Bytes::from(text));
            }
        } else if n == 0 && !out.is_empty() {
            return Err(FsError::corrupt(format!(
                "Representation content ends after {} of {} bytes",
                self.off, self.len
            )));
        }
        Ok(n)
    }
}

/// Slice a window's source view out of reconstructed base content.
fn source_view(content: &[u8], offset: u64, len: usize) -> Result<&[u8]> {
    let start = offset as usize;
    content
        .get(start..start + len)
        .ok_or_else(|| FsError::corrupt("svndiff source view exceeds the base representation"))
}

impl FsFs {
    /// Stream the content of `rep`; no representation reads as empty.
    pub fn get_contents(&self, rep: Option<&Representation>) -> Result<ContentStream<'_>> {
        let Some(rep) = rep else {
            return Ok(ContentStream {
                inner: StreamInner::Empty,
            });
        };

        let key = RepKey {
            revision: rep.revision,
            offset: rep.offset,
        };
        let fulltext_key = match &self.caches().fulltext {
            Some(cache) if !rep.is_txn() && cache.is_cachable(rep.content_len()) => {
                if let Some(text) = cache.get(&key) {
                    return Ok(ContentStream {
                        inner: StreamInner::Buffered(Cursor::new(text)),
                    });
                }
                Some(key)
            }
            _ => None,
        };

        let reader = RepReader::new(self, rep, fulltext_key)?;
        Ok(ContentStream {
            inner: StreamInner::Rep(Box::new(reader)),
        })
    }

    /// Read the complete content of `rep`.
    pub fn read_contents(&self, rep: &Representation) -> Result<Bytes> {
        self.get_contents(Some(rep))?.read_all()
    }

    /// Stream the text of a file node.
    pub fn get_file_contents(&self, noderev: &NodeRevision) -> Result<ContentStream<'_>> {
        self.get_contents(noderev.data_rep.as_ref())
    }

    /// Run `process` over the cached fulltext of a file node.
    ///
    /// Returns `None` without reading anything when the text is not cached.
    pub fn try_process_file_contents<T>(
        &self,
        noderev: &NodeRevision,
        process: impl FnOnce(&[u8]) -> T,
    ) -> Result<Option<T>> {
        let Some(rep) = noderev.data_rep.as_ref().filter(|rep| !rep.is_txn()) else {
            return Ok(None);
        };
        let key = RepKey {
            revision: rep.revision,
            offset: rep.offset,
        };
        Ok(cache_get(&self.caches().fulltext, &key).map(|text| process(&text)))
    }
}
