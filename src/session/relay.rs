//! Output routing for detachable sessions.
//!
//! Every chunk a session's process produces goes to exactly one destination:
//! the attached surface's event channel, or the session's bounded buffer when
//! no surface is attached.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

/// Capacity of the detached output buffer, in bytes.
///
/// Detached sessions can run indefinitely (a long build, a log tail), so only
/// the most recent output up to this bound is retained.
pub const DETACHED_BUFFER_CAP: usize = 100 * 1024;

/// Events delivered to an attached surface, in production order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A chunk of raw output bytes.
    Output(Vec<u8>),
    /// The process exited. Terminal event; nothing follows it.
    Exited { code: i32 },
}

/// Result of attaching a surface to a session.
pub struct Attachment {
    /// Output accumulated while detached, drained exactly once.
    pub buffered: String,
    /// Live event stream. Dropping the receiver detaches the surface.
    pub events: Receiver<SessionEvent>,
}

/// Bounded FIFO of raw output bytes.
///
/// Appending past the cap discards the oldest bytes first, so the buffer
/// always holds the most recent output (truncate from the front, not the
/// back).
#[derive(Debug, Default)]
pub struct OutputBuffer {
    bytes: Vec<u8>,
}

impl OutputBuffer {
    /// Append a chunk, evicting the oldest bytes if the cap is exceeded.
    pub fn push(&mut self, chunk: &[u8]) {
        if chunk.len() >= DETACHED_BUFFER_CAP {
            self.bytes.clear();
            self.bytes
                .extend_from_slice(&chunk[chunk.len() - DETACHED_BUFFER_CAP..]);
            return;
        }
        self.bytes.extend_from_slice(chunk);
        if self.bytes.len() > DETACHED_BUFFER_CAP {
            let excess = self.bytes.len() - DETACHED_BUFFER_CAP;
            self.bytes.drain(0..excess);
        }
    }

    /// Drain the buffer, leaving it empty.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Default)]
struct RelayState {
    surface: Option<Sender<SessionEvent>>,
    buffer: OutputBuffer,
}

/// Routes one session's output to its attached surface or its buffer.
///
/// The buffer is non-empty only while no surface is attached: attaching drains
/// it, and a live delivery never buffers.
#[derive(Default)]
pub struct OutputRelay {
    state: Mutex<RelayState>,
}

impl OutputRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route one output chunk.
    ///
    /// A failed send means the surface was torn down without detaching; the
    /// relay treats that as an implicit detach and buffers the chunk instead.
    pub fn deliver(&self, chunk: &[u8]) {
        let mut state = self.state.lock().unwrap();
        if let Some(surface) = &state.surface {
            if surface.send(SessionEvent::Output(chunk.to_vec())).is_ok() {
                return;
            }
            tracing::debug!("surface channel closed without detach, buffering output");
            state.surface = None;
        }
        state.buffer.push(chunk);
    }

    /// Attach a surface: drains the buffer exactly once and installs a fresh
    /// event channel. A previously attached surface is replaced.
    pub fn attach(&self) -> Attachment {
        let mut state = self.state.lock().unwrap();
        let (tx, rx) = mpsc::channel();
        let drained = state.buffer.take();
        state.surface = Some(tx);
        Attachment {
            buffered: String::from_utf8_lossy(&drained).into_owned(),
            events: rx,
        }
    }

    /// Detach the current surface, if any. Output buffers from here on.
    pub fn detach(&self) {
        self.state.lock().unwrap().surface = None;
    }

    /// Deliver the exit notification to an attached surface, if any.
    pub fn notify_exit(&self, code: i32) {
        let mut state = self.state.lock().unwrap();
        if let Some(surface) = state.surface.take() {
            let _ = surface.send(SessionEvent::Exited { code });
        }
    }

    pub fn is_attached(&self) -> bool {
        self.state.lock().unwrap().surface.is_some()
    }

    /// Bytes currently held for a detached surface.
    pub fn buffered_len(&self) -> usize {
        self.state.lock().unwrap().buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_holds_everything_under_the_cap() {
        let mut buffer = OutputBuffer::default();
        buffer.push(b"hello ");
        buffer.push(b"world");
        assert_eq!(buffer.take(), b"hello world");
        assert!(buffer.is_empty());
    }

    #[test]
    fn buffer_keeps_the_most_recent_bytes_when_overflowing() {
        let mut buffer = OutputBuffer::default();
        // 150 KiB in 1 KiB chunks, each filled with its index (mod 256).
        for i in 0..150 {
            buffer.push(&[i as u8; 1024]);
        }
        let bytes = buffer.take();
        assert_eq!(bytes.len(), DETACHED_BUFFER_CAP);
        // The suffix of the production sequence: chunks 50..150.
        assert_eq!(bytes[0], 50);
        assert_eq!(bytes[bytes.len() - 1], 149);
    }

    #[test]
    fn buffer_truncates_a_single_oversized_chunk_from_the_front() {
        let mut buffer = OutputBuffer::default();
        let mut chunk = vec![0u8; DETACHED_BUFFER_CAP];
        chunk.extend_from_slice(&[1u8; 10]);
        buffer.push(&chunk);
        let bytes = buffer.take();
        assert_eq!(bytes.len(), DETACHED_BUFFER_CAP);
        assert_eq!(&bytes[bytes.len() - 10..], &[1u8; 10]);
    }

    #[test]
    fn buffer_length_never_exceeds_the_cap() {
        let mut buffer = OutputBuffer::default();
        for chunk_len in [1usize, 100, 4096, DETACHED_BUFFER_CAP, DETACHED_BUFFER_CAP + 7] {
            buffer.push(&vec![0u8; chunk_len]);
            assert!(buffer.len() <= DETACHED_BUFFER_CAP);
        }
    }

    #[test]
    fn detached_output_is_buffered() {
        let relay = OutputRelay::new();
        relay.deliver(b"abc");
        assert!(!relay.is_attached());
        assert_eq!(relay.buffered_len(), 3);
    }

    #[test]
    fn attach_flushes_the_buffer_exactly_once() {
        let relay = OutputRelay::new();
        relay.deliver(b"first ");
        relay.deliver(b"second");

        let attachment = relay.attach();
        assert_eq!(attachment.buffered, "first second");
        assert_eq!(relay.buffered_len(), 0);

        // A second attach finds nothing buffered.
        let attachment = relay.attach();
        assert_eq!(attachment.buffered, "");
    }

    #[test]
    fn buffered_then_live_output_is_ordered_with_no_gaps() {
        let relay = OutputRelay::new();
        relay.deliver(b"a");
        relay.deliver(b"b");

        let attachment = relay.attach();
        relay.deliver(b"c");
        relay.deliver(b"d");

        let mut received = attachment.buffered.into_bytes();
        while let Ok(SessionEvent::Output(chunk)) = attachment.events.try_recv() {
            received.extend_from_slice(&chunk);
        }
        assert_eq!(received, b"abcd");
    }

    #[test]
    fn dropped_receiver_falls_back_to_buffering() {
        let relay = OutputRelay::new();
        let attachment = relay.attach();
        drop(attachment.events);

        relay.deliver(b"late");
        assert!(!relay.is_attached());
        assert_eq!(relay.buffered_len(), 4);

        // Nothing was lost: the next attach returns the chunk.
        assert_eq!(relay.attach().buffered, "late");
    }

    #[test]
    fn explicit_detach_resumes_buffering() {
        let relay = OutputRelay::new();
        let attachment = relay.attach();
        relay.detach();
        relay.deliver(b"while away");
        assert_eq!(relay.buffered_len(), 10);
        // The old channel got nothing after detach.
        assert!(attachment.events.try_recv().is_err());
    }

    #[test]
    fn notify_exit_reaches_the_attached_surface() {
        let relay = OutputRelay::new();
        let attachment = relay.attach();
        relay.notify_exit(0);
        assert_eq!(
            attachment.events.try_recv(),
            Ok(SessionEvent::Exited { code: 0 })
        );
        assert!(!relay.is_attached());
    }

    #[test]
    fn notify_exit_without_surface_is_a_noop() {
        let relay = OutputRelay::new();
        relay.deliver(b"output");
        relay.notify_exit(1);
        assert_eq!(relay.buffered_len(), 6);
    }
}
