//! Window-to-renderer event channel
//!
//! The window layer sends [`SurfaceEvent`]s; the renderer owns the receiver and drains
//! it once per frame. Nothing on the window side holds a reference to the renderer.

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

/// Surface change reported by the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// Framebuffer size in pixels; zero while minimized
    Resized { width: u32, height: u32 },
    CloseRequested,
}

/// Sending half, held by the window
#[derive(Debug, Clone)]
pub struct SurfaceEventSender {
    sender: Sender<SurfaceEvent>,
}

impl SurfaceEventSender {
    /// Returns false once the receiver is gone
    pub fn send(&self, event: SurfaceEvent) -> bool {
        self.sender.send(event).is_ok()
    }
}

/// Receiving half, held by the renderer
#[derive(Debug)]
pub struct SurfaceEventReceiver {
    receiver: Receiver<SurfaceEvent>,
}

/// Outcome of draining pending events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingSurfaceChanges {
    /// Most recent size, if any resize arrived
    pub resized: Option<(u32, u32)>,
    pub close_requested: bool,
}

impl SurfaceEventReceiver {
    /// Collapse everything queued so far; only the last resize matters
    pub fn drain(&self) -> PendingSurfaceChanges {
        let mut pending = PendingSurfaceChanges::default();
        loop {
            match self.receiver.try_recv() {
                Ok(SurfaceEvent::Resized { width, height }) => pending.resized = Some((width, height)),
                Ok(SurfaceEvent::CloseRequested) => pending.close_requested = true,
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        pending
    }
}

/// Connected sender/receiver pair
pub fn surface_channel() -> (SurfaceEventSender, SurfaceEventReceiver) {
    let (sender, receiver) = mpsc::channel();
    (SurfaceEventSender { sender }, SurfaceEventReceiver { receiver })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_keeps_latest_resize() {
        let (sender, receiver) = surface_channel();
        sender.send(SurfaceEvent::Resized { width: 100, height: 100 });
        sender.send(SurfaceEvent::Resized { width: 0, height: 0 });
        sender.send(SurfaceEvent::Resized { width: 640, height: 480 });

        let pending = receiver.drain();
        assert_eq!(pending.resized, Some((640, 480)));
        assert!(!pending.close_requested);
        assert_eq!(receiver.drain(), PendingSurfaceChanges::default());
    }

    #[test]
    fn test_close_and_disconnect() {
        let (sender, receiver) = surface_channel();
        sender.send(SurfaceEvent::CloseRequested);
        drop(sender);
        assert!(receiver.drain().close_requested);
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (sender, receiver) = surface_channel();
        drop(receiver);
        assert!(!sender.send(SurfaceEvent::CloseRequested));
    }
}
