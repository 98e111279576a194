//! Delta streams between two file texts
//!
//! When the stored representation of the target is already a delta
//! against the source (or against nothing), its windows are handed out as
//! they are on disk.  Otherwise the delta is computed from both fulltexts.

use crate::error::Result;
use crate::file::FileArena;
use crate::fs::FsFs;
use crate::noderev::NodeRevision;
use crate::rep_state::{RepState, create_rep_state};
use crate::representation::RepKind;
use crate::svndiff::{DELTA_WINDOW_SIZE, Op, Window};
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

/// Windows turning the source text into the target text
pub struct DeltaStream<'a> {
    inner: DeltaInner<'a>,
    target_md5: [u8; 16],
}

enum DeltaInner<'a> {
    Stored {
        fs: &'a FsFs,
        files: FileArena,
        state: RepState,
        next_chunk: u64,
    },
    Computed {
        source: Bytes,
        target: Bytes,
        next_chunk: usize,
    },
}

impl DeltaStream<'_> {
    /// MD5 digest of the text the windows produce
    pub fn target_md5(&self) -> [u8; 16] {
        self.target_md5
    }

    /// Whether the windows come straight from the stored representation
    pub fn is_stored(&self) -> bool {
        matches!(self.inner, DeltaInner::Stored { .. })
    }

    /// The next window, `None` once the target is complete.
    pub fn next_window(&mut self) -> Result<Option<Window>> {
        match &mut self.inner {
            DeltaInner::Stored {
                fs,
                files,
                state,
                next_chunk,
            } => {
                if state.is_exhausted() {
                    return Ok(None);
                }
                let window = state.read_delta_window(*fs, files, *next_chunk)?;
                state.chunk_index += 1;
                *next_chunk += 1;
                Ok(Some(Arc::unwrap_or_clone(window)))
            }
            DeltaInner::Computed {
                source,
                target,
                next_chunk,
            } => {
                let window = compute_window(target, Some(source), *next_chunk, DELTA_WINDOW_SIZE);
                if window.is_some() {
                    *next_chunk += 1;
                }
                Ok(window)
            }
        }
    }
}

impl Iterator for DeltaStream<'_> {
    type Item = Result<Window>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_window().transpose()
    }
}

/// Window `index` of the delta from `source` to `target`.
///
/// Window `k` covers target bytes `[k*W, (k+1)*W)` and uses the source
/// bytes at the same position as its source view.
fn compute_window(target: &[u8], source: Option<&[u8]>, index: usize, window_size: usize) -> Option<Window> {
    let tstart = index.checked_mul(window_size)?;
    if tstart >= target.len() {
        return None;
    }
    let tview = &target[tstart..target.len().min(tstart + window_size)];

    let source = source.unwrap_or(&[]);
    let sstart = tstart.min(source.len());
    let sview = &source[sstart..source.len().min(sstart + window_size)];

    let prefix = sview.iter().zip(tview).take_while(|(s, t)| s == t).count();
    let suffix = sview[prefix..]
        .iter()
        .rev()
        .zip(tview[prefix..].iter().rev())
        .take_while(|(s, t)| s == t)
        .count();
    let middle = &tview[prefix..tview.len() - suffix];

    let mut ops = Vec::with_capacity(3);
    if prefix > 0 {
        ops.push(Op::source(0, prefix));
    }
    if !middle.is_empty() {
        ops.push(Op::new_data(middle.len()));
    }
    if suffix > 0 {
        ops.push(Op::source(sview.len() - suffix, suffix));
    }

    Some(Window::new(
        sstart as u64,
        sview.len(),
        tview.len(),
        ops,
        Bytes::copy_from_slice(middle),
    ))
}

/// All windows of the delta from `source` to `target`.
pub(crate) fn compute_windows(target: &[u8], source: Option<&[u8]>, window_size: usize) -> Vec<Window> {
    (0..)
        .map_while(|index| compute_window(target, source, index, window_size))
        .collect()
}

impl FsFs {
    /// Delta from the text of `source` (or the empty text) to the text of `target`.
    pub fn get_file_delta_stream(
        &self,
        source: Option<&NodeRevision>,
        target: &NodeRevision,
    ) -> Result<DeltaStream<'_>> {
        let target_md5 = match &target.data_rep {
            Some(rep) => rep.md5_digest,
            None => md5::compute(b"").0,
        };

        if let (Some(source_rep), Some(target_rep)) = (source.and_then(|s| s.data_rep.as_ref()), &target.data_rep) {
            let mut files = FileArena::new();
            let (state, header) = create_rep_state(self, target_rep, &mut files, &mut None)?;
            let reusable = match header.kind {
                RepKind::SelfDelta => true,
                RepKind::Delta {
                    base_revision,
                    base_offset,
                    ..
                } => base_revision == source_rep.revision && base_offset == source_rep.offset,
                RepKind::Plain => false,
            };
            if reusable {
                debug!(target = %target.id, "reusing stored delta");
                return Ok(DeltaStream {
                    inner: DeltaInner::Stored {
                        fs: self,
                        files,
                        state,
                        next_chunk: 0,
                    },
                    target_md5,
                });
            }
        }

        let source = match source {
            Some(noderev) => self.get_file_contents(noderev)?.read_all()?,
            None => Bytes::new(),
        };
        let target_text = self.get_file_contents(target)?.read_all()?;
        Ok(DeltaStream {
            inner: DeltaInner::Computed {
                source,
                target: target_text,
                next_chunk: 0,
            },
            target_md5,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rebuild(windows: &[Window], source: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for window in windows {
            let start = window.sview_offset as usize;
            out.extend(window.apply(Some(&source[start..start + window.sview_len])).unwrap());
        }
        out
    }

    #[test]
    fn test_prefix_and_suffix_copies() {
        let windows = compute_windows(b"hello brave world", Some(&b"hello world"[..]), 1024);
        assert_eq!(windows.len(), 1);
        let window = &windows[0];
        assert_eq!(
            window.ops,
            vec![Op::source(0, 6), Op::new_data(6), Op::source(6, 5)]
        );
        assert_eq!(window.new_data, Bytes::from_static(b"brave "));
        assert_eq!(rebuild(&windows, b"hello world"), b"hello brave world");
    }

    #[test]
    fn test_windows_follow_source_positions() {
        let source = vec![b'a'; 10];
        let target: Vec<u8> = (0..25u8).collect();
        let windows = compute_windows(&target, Some(source.as_slice()), 8);
        assert_eq!(windows.len(), 4);
        assert_eq!(windows[1].sview_offset, 8);
        assert_eq!(windows[1].sview_len, 2);
        assert_eq!(windows[2].sview_len, 0);
        assert_eq!(rebuild(&windows, &source), target);
    }

    #[test]
    fn test_empty_target_has_no_windows() {
        assert!(compute_windows(b"", Some(&b"abc"[..]), 8).is_empty());
    }

    #[test]
    fn test_identical_texts_copy_everything() {
        let windows = compute_windows(b"same", Some(&b"same"[..]), 8);
        assert_eq!(windows[0].ops, vec![Op::source(0, 4)]);
        assert!(windows[0].new_data.is_empty());
    }
}
