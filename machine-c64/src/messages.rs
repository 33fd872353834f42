//! Lifecycle messages from the emulation worker to the host.
//!
//! The worker is the only producer. The host (GUI, test harness) takes
//! the single consumer endpoint once and polls it; send never blocks.

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};

use emu_core::StopReason;

/// An event the host may care about. FIFO order is preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    PowerOn,
    PowerOff,
    Reset,
    /// A frame finished rendering.
    Frame { number: u64 },
    /// The run loop suspended at an instruction boundary.
    Stopped(StopReason),
    /// Emulation resumed.
    Resumed,
    DriveLed { on: bool },
    DriveMotor { spinning: bool },
    DiskInserted,
    DiskEjected,
    /// A disk write landed; the image differs from its file.
    DiskModified,
    SnapshotTaken,
    WarpChanged { on: bool },
}

/// Single-producer/single-consumer message queue.
pub struct MessageQueue {
    tx: Sender<Message>,
    rx: Option<Receiver<Message>>,
}

impl MessageQueue {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx: Some(rx) }
    }

    /// Post a message. Never blocks; if the consumer is gone the message
    /// is dropped.
    pub fn post(&self, message: Message) {
        let _ = self.tx.send(message);
    }

    /// Hand out the consumer endpoint. Callable once.
    pub fn take_receiver(&mut self) -> Option<Receiver<Message>> {
        self.rx.take()
    }

    /// Drain pending messages without blocking (for in-process tests and
    /// the default host loop).
    pub fn drain(&self) -> Vec<Message> {
        let mut out = Vec::new();
        if let Some(rx) = &self.rx {
            loop {
                match rx.try_recv() {
                    Ok(m) => out.push(m),
                    Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
                }
            }
        }
        out
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_preserved() {
        let q = MessageQueue::new();
        q.post(Message::PowerOn);
        q.post(Message::Frame { number: 1 });
        q.post(Message::Frame { number: 2 });
        assert_eq!(
            q.drain(),
            vec![
                Message::PowerOn,
                Message::Frame { number: 1 },
                Message::Frame { number: 2 }
            ]
        );
        assert!(q.drain().is_empty());
    }

    #[test]
    fn receiver_taken_once() {
        let mut q = MessageQueue::new();
        let rx = q.take_receiver().expect("first take");
        assert!(q.take_receiver().is_none());
        q.post(Message::Reset);
        assert_eq!(rx.try_recv(), Ok(Message::Reset));
    }

    #[test]
    fn send_without_receiver_does_not_block() {
        let mut q = MessageQueue::new();
        drop(q.take_receiver());
        q.post(Message::PowerOff); // Dropped silently
    }
}
