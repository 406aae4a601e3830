//! The bounded span queue.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Condvar, Mutex, RawRwLock, RwLock};

use crate::error::{Result, RingError};

/// How long blocked ring operations sleep before re-checking state.
const WAIT_SLICE: Duration = Duration::from_millis(500);

/// Sentinel generation for a slot that has never been written.
const EMPTY: u64 = u64::MAX;

/// Memory residency of a ring.
///
/// Fixed at construction; the pipeline validates that the stages on both
/// ends of a ring run on a compatible device when they bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    /// Host (CPU) memory.
    Host,
    /// Memory owned by compute device `id`; producer and consumer must both
    /// run on that device.
    Device(usize),
}

struct SeqRecord {
    time_tag: i64,
    header: Box<[u8]>,
    begin: u64,
}

struct SeqEntry {
    rec: Arc<SeqRecord>,
    /// Absolute index one past the last span, set when the sequence closes.
    end: Option<u64>,
}

struct Slot {
    buf: Arc<RwLock<Box<[u8]>>>,
    /// Absolute span index currently held, or [`EMPTY`].
    gen: u64,
    /// Committed byte length of that span.
    len: usize,
}

struct ReaderState {
    cursor: u64,
    guarantee: bool,
}

struct Ctrl {
    span_bytes: usize,
    slots: Vec<Slot>,
    /// Next absolute span index to be committed.
    head: u64,
    seqs: Vec<SeqEntry>,
    open_sequence: bool,
    writer_active: bool,
    writing_ended: bool,
    readers: HashMap<u64, ReaderState>,
    next_reader_id: u64,
}

struct Inner {
    name: String,
    residency: Residency,
    ctrl: Mutex<Ctrl>,
    /// Signalled on span commit, sequence open/close, and writer exit.
    readable: Condvar,
    /// Signalled when a guaranteed reader advances or deregisters.
    writable: Condvar,
}

/// A bounded single-producer span queue organized into sequences.
///
/// Cloning is shallow: clones share the same buffer and state.
///
/// # Example
///
/// ```rust
/// use epic_ring::{Residency, Ring};
///
/// let ring = Ring::new("capture", Residency::Host);
/// ring.resize(8, 4).unwrap();
///
/// let mut stream = ring.read(true);
/// {
///     let mut writer = ring.begin_writing().unwrap();
///     let mut seq = writer.begin_sequence(7_840_000, b"header").unwrap();
///     seq.reserve(8).unwrap().data().copy_from_slice(&[1u8; 8]);
/// } // writer drops: writing ends, readers drain and stop
///
/// let mut seq = stream.next().unwrap();
/// assert_eq!(seq.time_tag(), 7_840_000);
/// assert_eq!(seq.header(), b"header");
/// let span = seq.next_span().unwrap();
/// assert_eq!(span.data(), [1u8; 8]);
/// drop(span);
/// assert!(seq.next_span().is_none());
/// assert!(ring.writing_ended());
/// ```
#[derive(Clone)]
pub struct Ring {
    inner: Arc<Inner>,
}

impl Ring {
    /// Creates an empty ring. Call [`Ring::resize`] before writing.
    pub fn new(name: impl Into<String>, residency: Residency) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                residency,
                ctrl: Mutex::new(Ctrl {
                    span_bytes: 0,
                    slots: Vec::new(),
                    head: 0,
                    seqs: Vec::new(),
                    open_sequence: false,
                    writer_active: false,
                    writing_ended: false,
                    readers: HashMap::new(),
                    next_reader_id: 0,
                }),
                readable: Condvar::new(),
                writable: Condvar::new(),
            }),
        }
    }

    /// Ring name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Declared residency.
    pub fn residency(&self) -> Residency {
        self.inner.residency
    }

    /// Sets the span size and reserves `buffer_factor * span_bytes` bytes.
    ///
    /// A no-op when the geometry is unchanged (stages re-issue their resize
    /// at each sequence start). Outstanding reader cursors are clamped
    /// forward when the buffer is rebuilt.
    pub fn resize(&self, span_bytes: usize, buffer_factor: usize) -> Result<()> {
        if span_bytes == 0 || buffer_factor == 0 {
            return Err(RingError::Unsized(self.inner.name.clone()));
        }
        let mut ctrl = self.inner.ctrl.lock();
        if ctrl.open_sequence {
            return Err(RingError::ResizeLocked(self.inner.name.clone()));
        }
        if ctrl.span_bytes == span_bytes && ctrl.slots.len() == buffer_factor {
            return Ok(());
        }
        ctrl.span_bytes = span_bytes;
        ctrl.slots = (0..buffer_factor)
            .map(|_| Slot {
                buf: Arc::new(RwLock::new(vec![0u8; span_bytes].into_boxed_slice())),
                gen: EMPTY,
                len: 0,
            })
            .collect();
        let head = ctrl.head;
        for r in ctrl.readers.values_mut() {
            r.cursor = r.cursor.max(head);
        }
        Ok(())
    }

    /// Acquires exclusive write access. Dropping the returned guard marks
    /// writing as ended, terminating all reader iteration.
    pub fn begin_writing(&self) -> Result<RingWriter> {
        let mut ctrl = self.inner.ctrl.lock();
        if ctrl.writer_active {
            return Err(RingError::WriterConflict(self.inner.name.clone()));
        }
        if ctrl.writing_ended {
            return Err(RingError::WritingEnded(self.inner.name.clone()));
        }
        ctrl.writer_active = true;
        Ok(RingWriter {
            inner: self.inner.clone(),
        })
    }

    /// Opens a reader over the ring's sequences.
    ///
    /// With `guarantee`, the writer blocks rather than overwrite spans this
    /// reader has not consumed. Without it, the reader skips forward past
    /// overwritten spans. A reader attaching mid-run starts at the oldest
    /// span still resident in the buffer and the sequence containing it.
    pub fn read(&self, guarantee: bool) -> SequenceStream {
        let mut ctrl = self.inner.ctrl.lock();
        let id = ctrl.next_reader_id;
        ctrl.next_reader_id += 1;
        let cursor = ctrl.head.saturating_sub(ctrl.slots.len() as u64);
        ctrl.readers.insert(id, ReaderState { cursor, guarantee });
        let next_seq = ctrl
            .seqs
            .iter()
            .position(|e| e.end.map_or(true, |end| end > cursor))
            .unwrap_or(ctrl.seqs.len());
        SequenceStream {
            inner: self.inner.clone(),
            id,
            guarantee,
            next_seq,
        }
    }

    /// Whether the producer has released the ring.
    pub fn writing_ended(&self) -> bool {
        self.inner.ctrl.lock().writing_ended
    }
}

/// Exclusive write access to a ring. Dropping ends writing permanently.
pub struct RingWriter {
    inner: Arc<Inner>,
}

impl RingWriter {
    /// Opens a new sequence. Spans reserved through the returned guard
    /// inherit `header` until the guard drops and closes the sequence.
    pub fn begin_sequence(&mut self, time_tag: i64, header: &[u8]) -> Result<SequenceWriter<'_>> {
        let mut ctrl = self.inner.ctrl.lock();
        if ctrl.span_bytes == 0 {
            return Err(RingError::Unsized(self.inner.name.clone()));
        }
        let rec = Arc::new(SeqRecord {
            time_tag,
            header: header.to_vec().into_boxed_slice(),
            begin: ctrl.head,
        });
        ctrl.seqs.push(SeqEntry { rec, end: None });
        ctrl.open_sequence = true;
        drop(ctrl);
        self.inner.readable.notify_all();
        Ok(SequenceWriter { writer: self })
    }
}

impl Drop for RingWriter {
    fn drop(&mut self) {
        let mut ctrl = self.inner.ctrl.lock();
        ctrl.writer_active = false;
        ctrl.writing_ended = true;
        drop(ctrl);
        self.inner.readable.notify_all();
        self.inner.writable.notify_all();
    }
}

/// An open sequence. Dropping closes it.
pub struct SequenceWriter<'w> {
    writer: &'w mut RingWriter,
}

impl SequenceWriter<'_> {
    /// Reserves a mutable span of `nbytes` (at most the span size; smaller
    /// is allowed for a final partial gulp). Blocks while every slot is
    /// still owed to a guaranteed reader. The span is committed and made
    /// visible when the returned guard drops.
    pub fn reserve(&mut self, nbytes: usize) -> Result<SpanWriter<'_>> {
        let inner = self.writer.inner.clone();
        let mut ctrl = inner.ctrl.lock();
        if ctrl.span_bytes == 0 {
            return Err(RingError::Unsized(inner.name.clone()));
        }
        if nbytes > ctrl.span_bytes {
            return Err(RingError::SpanTooLarge {
                requested: nbytes,
                span: ctrl.span_bytes,
            });
        }
        // Producer-side backpressure: never lap a guaranteed reader.
        loop {
            let nslots = ctrl.slots.len() as u64;
            let lagging = ctrl
                .readers
                .values()
                .filter(|r| r.guarantee)
                .map(|r| r.cursor)
                .min();
            match lagging {
                Some(cursor) if ctrl.head - cursor >= nslots => {
                    let _ = inner.writable.wait_for(&mut ctrl, WAIT_SLICE);
                }
                _ => break,
            }
        }
        let idx = ctrl.head;
        let slot = (idx % ctrl.slots.len() as u64) as usize;
        let buf = ctrl.slots[slot].buf.clone();
        drop(ctrl);
        // May additionally block on a lossy reader still holding this slot.
        let guard = buf.write_arc();
        Ok(SpanWriter {
            inner: self.writer.inner.clone(),
            guard,
            idx,
            len: nbytes,
            _seq: PhantomData,
        })
    }
}

impl Drop for SequenceWriter<'_> {
    fn drop(&mut self) {
        let mut ctrl = self.writer.inner.ctrl.lock();
        let head = ctrl.head;
        if let Some(entry) = ctrl.seqs.last_mut() {
            entry.end = Some(head);
        }
        ctrl.open_sequence = false;
        drop(ctrl);
        self.writer.inner.readable.notify_all();
    }
}

/// A reserved, uncommitted span. Committed on drop.
pub struct SpanWriter<'s> {
    inner: Arc<Inner>,
    guard: ArcRwLockWriteGuard<RawRwLock, Box<[u8]>>,
    idx: u64,
    len: usize,
    _seq: PhantomData<&'s mut ()>,
}

impl SpanWriter<'_> {
    /// The writable span contents.
    pub fn data(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut self.guard[..len]
    }

    /// Committed size of this span in bytes.
    pub fn size(&self) -> usize {
        self.len
    }
}

impl Drop for SpanWriter<'_> {
    fn drop(&mut self) {
        let mut ctrl = self.inner.ctrl.lock();
        let slot = (self.idx % ctrl.slots.len() as u64) as usize;
        ctrl.slots[slot].gen = self.idx;
        ctrl.slots[slot].len = self.len;
        ctrl.head = self.idx + 1;
        drop(ctrl);
        // Readers woken here may briefly block on the slot lock until the
        // guard releases when this struct finishes dropping.
        self.inner.readable.notify_all();
    }
}

/// Iterator over the sequences of a ring, in begin order.
pub struct SequenceStream {
    inner: Arc<Inner>,
    id: u64,
    guarantee: bool,
    next_seq: usize,
}

impl SequenceStream {
    /// Blocks until the next sequence opens; `None` once writing has ended
    /// and all sequences have been delivered.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<SequenceReader> {
        let mut ctrl = self.inner.ctrl.lock();
        loop {
            if self.next_seq < ctrl.seqs.len() {
                let seq_index = self.next_seq;
                self.next_seq += 1;
                let rec = ctrl.seqs[seq_index].rec.clone();
                let begin = rec.begin;
                if let Some(r) = ctrl.readers.get_mut(&self.id) {
                    r.cursor = r.cursor.max(begin);
                }
                return Some(SequenceReader {
                    inner: self.inner.clone(),
                    id: self.id,
                    guarantee: self.guarantee,
                    seq_index,
                    rec,
                });
            }
            if ctrl.writing_ended {
                return None;
            }
            let _ = self.inner.readable.wait_for(&mut ctrl, WAIT_SLICE);
        }
    }
}

impl Iterator for SequenceStream {
    type Item = SequenceReader;

    fn next(&mut self) -> Option<SequenceReader> {
        SequenceStream::next(self)
    }
}

impl Drop for SequenceStream {
    fn drop(&mut self) {
        let mut ctrl = self.inner.ctrl.lock();
        ctrl.readers.remove(&self.id);
        drop(ctrl);
        self.inner.writable.notify_all();
    }
}

/// One sequence as seen by a reader.
pub struct SequenceReader {
    inner: Arc<Inner>,
    id: u64,
    guarantee: bool,
    seq_index: usize,
    rec: Arc<SeqRecord>,
}

impl SequenceReader {
    /// The sequence time tag.
    pub fn time_tag(&self) -> i64 {
        self.rec.time_tag
    }

    /// The raw header bytes.
    pub fn header(&self) -> &[u8] {
        &self.rec.header
    }

    /// Blocks for the next span of this sequence; `None` at sequence end
    /// (or once writing ends with the sequence left open).
    pub fn next_span(&mut self) -> Option<SpanReader> {
        loop {
            let mut ctrl = self.inner.ctrl.lock();
            let end = ctrl.seqs[self.seq_index].end;
            let nslots = ctrl.slots.len() as u64;
            let head = ctrl.head;
            let mut cursor = match ctrl.readers.get(&self.id) {
                Some(r) => r.cursor,
                None => return None,
            };
            if !self.guarantee && nslots > 0 {
                // Skip forward past spans the writer has reclaimed.
                let oldest = head.saturating_sub(nslots - 1);
                if cursor < oldest {
                    cursor = oldest;
                    if let Some(r) = ctrl.readers.get_mut(&self.id) {
                        r.cursor = cursor;
                    }
                }
            }
            if let Some(end) = end {
                if cursor >= end {
                    return None;
                }
            }
            if cursor < head {
                let slot = (cursor % nslots) as usize;
                let entry = &ctrl.slots[slot];
                debug_assert!(self.guarantee || entry.gen >= cursor);
                if self.guarantee {
                    debug_assert_eq!(entry.gen, cursor);
                }
                let buf = entry.buf.clone();
                drop(ctrl);
                let guard = buf.read_arc();
                // Re-validate: a lossy reader may have lost the race.
                let ctrl = self.inner.ctrl.lock();
                let entry = &ctrl.slots[slot];
                if entry.gen != cursor {
                    continue;
                }
                let len = entry.len;
                drop(ctrl);
                return Some(SpanReader {
                    inner: self.inner.clone(),
                    id: self.id,
                    guard,
                    idx: cursor,
                    len,
                });
            }
            if ctrl.writing_ended {
                return None;
            }
            let _ = self.inner.readable.wait_for(&mut ctrl, WAIT_SLICE);
        }
    }
}

impl Iterator for SequenceReader {
    type Item = SpanReader;

    fn next(&mut self) -> Option<SpanReader> {
        self.next_span()
    }
}

/// One committed span. The reader's cursor advances when this drops.
pub struct SpanReader {
    inner: Arc<Inner>,
    id: u64,
    guard: ArcRwLockReadGuard<RawRwLock, Box<[u8]>>,
    idx: u64,
    len: usize,
}

impl SpanReader {
    /// The span contents.
    pub fn data(&self) -> &[u8] {
        &self.guard[..self.len]
    }

    /// Committed size in bytes.
    pub fn size(&self) -> usize {
        self.len
    }

    /// Absolute span index within the ring.
    pub fn index(&self) -> u64 {
        self.idx
    }
}

impl Drop for SpanReader {
    fn drop(&mut self) {
        let mut ctrl = self.inner.ctrl.lock();
        if let Some(r) = ctrl.readers.get_mut(&self.id) {
            r.cursor = r.cursor.max(self.idx + 1);
        }
        drop(ctrl);
        self.inner.writable.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn fill(span: &mut SpanWriter<'_>, value: u8) {
        for b in span.data().iter_mut() {
            *b = value;
        }
    }

    #[test]
    fn header_visible_before_spans_and_order_kept() {
        let ring = Ring::new("t", Residency::Host);
        ring.resize(16, 4).unwrap();
        let mut stream = ring.read(true);

        let writer_ring = ring.clone();
        let producer = thread::spawn(move || {
            let mut writer = writer_ring.begin_writing().unwrap();
            for seq in 0..2u8 {
                let mut s = writer
                    .begin_sequence(100 + seq as i64, format!("hdr{seq}").as_bytes())
                    .unwrap();
                for n in 0..3u8 {
                    let mut span = s.reserve(16).unwrap();
                    fill(&mut span, seq * 10 + n);
                }
            }
        });

        for seq in 0..2u8 {
            let mut reader = stream.next().expect("sequence");
            assert_eq!(reader.time_tag(), 100 + seq as i64);
            assert_eq!(reader.header(), format!("hdr{seq}").as_bytes());
            for n in 0..3u8 {
                let span = reader.next_span().expect("span");
                assert_eq!(span.size(), 16);
                assert!(span.data().iter().all(|&b| b == seq * 10 + n));
            }
            assert!(reader.next_span().is_none());
        }
        producer.join().unwrap();
        assert!(stream.next().is_none());
        assert!(ring.writing_ended());
    }

    #[test]
    fn short_final_span_is_delivered() {
        let ring = Ring::new("t", Residency::Host);
        ring.resize(16, 4).unwrap();
        let mut stream = ring.read(true);
        {
            let mut writer = ring.begin_writing().unwrap();
            let mut s = writer.begin_sequence(0, b"h").unwrap();
            fill(&mut s.reserve(16).unwrap(), 1);
            fill(&mut s.reserve(7).unwrap(), 2);
        }
        let mut reader = stream.next().unwrap();
        assert_eq!(reader.next_span().unwrap().size(), 16);
        let short = reader.next_span().unwrap();
        assert_eq!(short.size(), 7);
        assert!(short.data().iter().all(|&b| b == 2));
    }

    #[test]
    fn backpressure_delivers_every_span_to_guaranteed_reader() {
        let ring = Ring::new("t", Residency::Host);
        ring.resize(8, 2).unwrap();
        let mut stream = ring.read(true);

        let writer_ring = ring.clone();
        let producer = thread::spawn(move || {
            let mut writer = writer_ring.begin_writing().unwrap();
            let mut s = writer.begin_sequence(0, b"h").unwrap();
            for n in 0..20u8 {
                fill(&mut s.reserve(8).unwrap(), n);
            }
        });

        let mut reader = stream.next().unwrap();
        for n in 0..20u8 {
            let span = reader.next_span().expect("span");
            assert!(span.data().iter().all(|&b| b == n), "span {n} intact");
            // Simulate a slow consumer so the writer laps the buffer.
            thread::sleep(Duration::from_millis(1));
        }
        assert!(reader.next_span().is_none());
        producer.join().unwrap();
    }

    #[test]
    fn lossy_reader_skips_reclaimed_spans() {
        let ring = Ring::new("t", Residency::Host);
        ring.resize(8, 3).unwrap();
        let mut stream = ring.read(false);
        {
            let mut writer = ring.begin_writing().unwrap();
            let mut s = writer.begin_sequence(0, b"h").unwrap();
            for n in 0..10u8 {
                fill(&mut s.reserve(8).unwrap(), n);
            }
        }
        let mut reader = stream.next().unwrap();
        let first = reader.next_span().expect("some span survives");
        assert!(first.index() >= 8, "early spans were reclaimed");
        drop(first);
        let mut count = 1;
        while reader.next_span().is_some() {
            count += 1;
        }
        assert!(count <= 3);
    }

    #[test]
    fn second_writer_is_rejected() {
        let ring = Ring::new("t", Residency::Host);
        ring.resize(8, 2).unwrap();
        let _w = ring.begin_writing().unwrap();
        assert!(matches!(
            ring.begin_writing(),
            Err(RingError::WriterConflict(_))
        ));
    }

    #[test]
    fn resize_is_idempotent_and_locked_during_sequence() {
        let ring = Ring::new("t", Residency::Host);
        ring.resize(8, 2).unwrap();
        ring.resize(8, 2).unwrap();
        let mut writer = ring.begin_writing().unwrap();
        let _s = writer.begin_sequence(0, b"h").unwrap();
        assert!(matches!(
            ring.resize(16, 2),
            Err(RingError::ResizeLocked(_))
        ));
    }

    #[test]
    fn residency_is_declared() {
        assert_eq!(
            Ring::new("a", Residency::Device(0)).residency(),
            Residency::Device(0)
        );
        assert_eq!(Ring::new("b", Residency::Host).residency(), Residency::Host);
    }
}
