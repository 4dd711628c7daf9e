//! The pipe operator: wire a readable into a writable.
//!
//! `pipe` registers a `readable` listener on the source and forwards whatever
//! [`ReadStream::read`] returns into [`WriteStream::write`] — a push of the
//! buffered payload as-is, not chunked to any particular size. Source completion
//! ends the target (unless disabled), and errors are relayed under one of three
//! policies, wrapped with provenance so multi-stage pipelines can report which
//! stage failed.
//!
//! The advisory keep-writing boolean from the target is intentionally ignored:
//! end-to-end flow control is a documented gap, not a hidden feature.

use crate::error::StreamError;
use crate::readable::ReadStream;
use crate::writable::WriteStream;

/// What the pipe does with errors emitted by the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipeErrorMode {
    /// Drop silently; the caller wires its own error handling.
    Ignore,
    /// Relay the first error to the target and end it; later errors are dropped.
    #[default]
    ForwardOnceAndEnd,
    /// Relay every error to the target without ending it.
    ForwardAll,
}

#[derive(Debug, Clone, Copy)]
pub struct PipeOptions {
    /// End the target when the source ends. Defaults to true.
    pub pass_end: bool,
    pub error_mode: PipeErrorMode,
}

impl Default for PipeOptions {
    fn default() -> Self {
        Self { pass_end: true, error_mode: PipeErrorMode::default() }
    }
}

/// Pipes `source` into `target` with default options (`pass_end`, forward the
/// first error and end).
pub fn pipe(source: &ReadStream, target: &WriteStream) {
    pipe_with(source, target, PipeOptions::default());
}

pub fn pipe_with(source: &ReadStream, target: &WriteStream, options: PipeOptions) {
    if options.pass_end {
        if source.is_ended() {
            // a source with nothing to say still ends the target immediately
            if !target.is_ended() {
                target.end();
            }
        } else {
            let downstream = target.clone();
            source.once_end(move |_| {
                if !downstream.is_ended() {
                    downstream.end();
                }
            });
        }
    }

    let (relay_kind, relay_id) = source.identity();
    match options.error_mode {
        PipeErrorMode::Ignore => {}
        PipeErrorMode::ForwardOnceAndEnd => {
            let downstream = target.clone();
            source.once_error(move |e| {
                downstream.emit_error(StreamError::piped(&e, relay_kind, relay_id));
                if !downstream.is_ended() {
                    downstream.end();
                }
            });
        }
        PipeErrorMode::ForwardAll => {
            let downstream = target.clone();
            source.on_error(move |e| {
                downstream.emit_error(StreamError::piped(&e, relay_kind, relay_id));
            });
        }
    }

    let upstream = source.clone();
    let downstream = target.clone();
    source.on_readable(move |_| {
        if let Some(chunk) = upstream.read(None) {
            downstream.write(chunk, None);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writable::WriteSink;
    use bytes::Bytes;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct Recording {
        chunks: Rc<RefCell<Vec<Bytes>>>,
        finished: Rc<Cell<bool>>,
    }

    impl WriteSink for Recording {
        fn deliver(&mut self, chunk: Bytes) {
            self.chunks.borrow_mut().push(chunk);
        }

        fn finish(&mut self) {
            self.finished.set(true);
        }
    }

    #[test]
    fn forwards_payloads_and_end() {
        let source = ReadStream::new();
        let sink = Recording::default();
        let target = WriteStream::new(sink.clone());

        pipe(&source, &target);

        source.push(Bytes::from_static(b"one"));
        source.push(Bytes::from_static(b"two"));
        source.push_eof();

        assert_eq!(*sink.chunks.borrow(), vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]);
        assert!(sink.finished.get());
        assert!(target.is_finished());
    }

    #[test]
    fn already_ended_source_ends_target_immediately() {
        let source = ReadStream::new();
        source.push_eof();

        let sink = Recording::default();
        let target = WriteStream::new(sink.clone());

        pipe(&source, &target);
        assert!(target.is_ended());
        assert!(sink.finished.get());
    }

    #[test]
    fn pass_end_false_leaves_target_open() {
        let source = ReadStream::new();
        let target = WriteStream::new(Recording::default());

        pipe_with(&source, &target, PipeOptions { pass_end: false, ..PipeOptions::default() });
        source.push_eof();

        assert!(!target.is_ended());
    }

    #[test]
    fn forward_once_and_end_relays_exactly_first_error() {
        let source = ReadStream::new();
        let sink = Recording::default();
        let target = WriteStream::new(sink.clone());

        let relayed = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&relayed);
        target.on_error(move |e| seen.borrow_mut().push(e));

        pipe_with(&source, &target, PipeOptions { pass_end: true, error_mode: PipeErrorMode::ForwardOnceAndEnd });

        source.push(Bytes::from_static(b"partial"));
        source.emit_error(StreamError::other("upstream broke"));
        source.emit_error(StreamError::other("again"));

        let errors = relayed.borrow();
        assert_eq!(errors.len(), 1);
        let StreamError::Piped { origin_kind, ref message, .. } = errors[0] else {
            panic!("expected piped provenance");
        };
        assert_eq!(origin_kind, "read-stream");
        assert_eq!(message, "upstream broke");
        assert!(target.is_ended());
    }

    #[test]
    fn forward_all_relays_every_error_without_ending() {
        let source = ReadStream::new();
        let target = WriteStream::new(Recording::default());

        let relayed = Rc::new(Cell::new(0));
        let counter = Rc::clone(&relayed);
        target.on_error(move |_| counter.set(counter.get() + 1));

        pipe_with(&source, &target, PipeOptions { pass_end: true, error_mode: PipeErrorMode::ForwardAll });

        source.emit_error(StreamError::other("one"));
        source.emit_error(StreamError::other("two"));

        assert_eq!(relayed.get(), 2);
        assert!(!target.is_ended());
    }

    #[test]
    fn two_stage_pipeline_reports_first_origin_and_last_relay() {
        // source -> middle (writable+readable pair glued by hand) -> target
        let source = ReadStream::new();
        let middle = ReadStream::new();
        let sink = Recording::default();
        let target = WriteStream::new(sink.clone());

        // glue: errors crossing the first stage land on the middle readable
        let (src_kind, src_id) = source.identity();
        let relay = middle.clone();
        source.on_error(move |e| relay.emit_error(StreamError::piped(&e, src_kind, src_id)));

        let relayed = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&relayed);
        target.on_error(move |e| seen.borrow_mut().push(e));

        pipe_with(&middle, &target, PipeOptions { pass_end: false, error_mode: PipeErrorMode::ForwardAll });

        source.emit_error(StreamError::other("root cause"));

        let errors = relayed.borrow();
        assert_eq!(errors.len(), 1);
        let StreamError::Piped { origin_id, relay_id, .. } = errors[0] else {
            panic!("expected piped provenance");
        };
        assert_eq!(origin_id, src_id);
        assert_eq!(relay_id, middle.identity().1);
    }
}
