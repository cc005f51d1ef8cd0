//! Cooperative scheduler and event mailbox.
//!
//! There is exactly one thread of control. Periodic tasks run from the
//! main loop's `process()` call in registration order; stack callbacks
//! hand work to the main loop through the bounded [`Mailbox`].
//!
//! Neither type blocks: `Mailbox::try_wait` returns `None` when empty and
//! `Scheduler::process` only runs tasks whose period has elapsed.

use heapless::{Deque, Vec};

/// A periodic task operating on the loop context `C`.
pub type Task<C> = fn(&mut C);

/// The scheduler has no free slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SchedulerFull;

struct Entry<C> {
    task: Task<C>,
    period_ms: u32,
    last_run_ms: u32,
}

/// Round-robin periodic task table.
pub struct Scheduler<C, const N: usize> {
    entries: Vec<Entry<C>, N>,
}

impl<C, const N: usize> Scheduler<C, N> {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register `task` to run every `period_ms`, counting from `now_ms`.
    pub fn add(&mut self, task: Task<C>, period_ms: u32, now_ms: u32) -> Result<(), SchedulerFull> {
        self.entries
            .push(Entry {
                task,
                period_ms,
                last_run_ms: now_ms,
            })
            .map_err(|_| SchedulerFull)
    }

    /// Run every task whose period has elapsed at `now_ms`.
    ///
    /// Returns the number of tasks invoked.
    pub fn process(&mut self, now_ms: u32, ctx: &mut C) -> usize {
        let mut ran = 0;
        for entry in self.entries.iter_mut() {
            if now_ms.wrapping_sub(entry.last_run_ms) >= entry.period_ms {
                entry.last_run_ms = now_ms;
                (entry.task)(ctx);
                ran += 1;
            }
        }
        ran
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<C, const N: usize> Default for Scheduler<C, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-byte event codes exchanged through the mailbox.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MailboxMessage {
    /// A peer connected (link not yet encrypted).
    Connected = 0x01,
    /// The link dropped; advertising has been restarted.
    Disconnected = 0x02,
    /// The link is encrypted; credentials may be typed.
    Encrypted = 0x03,
    /// The peer asked for a passkey; the UI should collect digits.
    PasskeyRequested = 0x04,
    /// The UI finished keying in the passkey.
    PasskeyEntered = 0x05,
    /// Pairing or security re-establishment failed.
    PairingFailed = 0x06,
    /// The host suspended the HID device.
    HostSuspended = 0x07,
    /// The host left suspend.
    HostResumed = 0x08,
    /// The host wrote a new keyboard LED output report.
    LedsChanged = 0x09,
}

impl TryFrom<u8> for MailboxMessage {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0x01 => MailboxMessage::Connected,
            0x02 => MailboxMessage::Disconnected,
            0x03 => MailboxMessage::Encrypted,
            0x04 => MailboxMessage::PasskeyRequested,
            0x05 => MailboxMessage::PasskeyEntered,
            0x06 => MailboxMessage::PairingFailed,
            0x07 => MailboxMessage::HostSuspended,
            0x08 => MailboxMessage::HostResumed,
            0x09 => MailboxMessage::LedsChanged,
            other => return Err(other),
        })
    }
}

impl From<MailboxMessage> for u8 {
    fn from(msg: MailboxMessage) -> Self {
        msg as u8
    }
}

/// The mailbox was full; the posted message was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MailboxFull;

/// Bounded FIFO of event codes.
///
/// When full, `post` drops the new message, counts it and tells the
/// producer. Already queued messages are never overwritten.
pub struct Mailbox<const N: usize> {
    queue: Deque<u8, N>,
    dropped: u32,
}

impl<const N: usize> Mailbox<N> {
    pub const fn new() -> Self {
        Self {
            queue: Deque::new(),
            dropped: 0,
        }
    }

    pub fn post(&mut self, msg: MailboxMessage) -> Result<(), MailboxFull> {
        match self.queue.push_back(msg.into()) {
            Ok(()) => Ok(()),
            Err(_) => {
                self.dropped = self.dropped.saturating_add(1);
                warn!("mailbox full, dropping {}", msg);
                Err(MailboxFull)
            }
        }
    }

    /// Non-blocking poll: the oldest message, or `None` when empty.
    pub fn try_wait(&mut self) -> Option<MailboxMessage> {
        while let Some(code) = self.queue.pop_front() {
            if let Ok(msg) = MailboxMessage::try_from(code) {
                return Some(msg);
            }
        }
        None
    }

    pub fn is_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Messages dropped because the mailbox was full.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}

impl<const N: usize> Default for Mailbox<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Trace {
        calls: std::vec::Vec<&'static str>,
    }

    fn led(t: &mut Trace) {
        t.calls.push("led");
    }

    fn stack(t: &mut Trace) {
        t.calls.push("stack");
    }

    #[test]
    fn tasks_run_in_registration_order_when_due() {
        let mut sched: Scheduler<Trace, 4> = Scheduler::new();
        sched.add(led, 10, 0).unwrap();
        sched.add(stack, 1, 0).unwrap();

        let mut trace = Trace::default();
        assert_eq!(sched.process(1, &mut trace), 1);
        assert_eq!(trace.calls, ["stack"]);

        trace.calls.clear();
        assert_eq!(sched.process(10, &mut trace), 2);
        assert_eq!(trace.calls, ["led", "stack"]);
    }

    #[test]
    fn scheduler_period_survives_wraparound() {
        let mut sched: Scheduler<Trace, 1> = Scheduler::new();
        sched.add(led, 5, u32::MAX - 2).unwrap();
        let mut trace = Trace::default();
        assert_eq!(sched.process(1, &mut trace), 0);
        assert_eq!(sched.process(2, &mut trace), 1);
    }

    #[test]
    fn scheduler_rejects_overflow() {
        let mut sched: Scheduler<Trace, 1> = Scheduler::new();
        sched.add(led, 5, 0).unwrap();
        assert_eq!(sched.add(stack, 5, 0), Err(SchedulerFull));
        assert_eq!(sched.len(), 1);
    }

    #[test]
    fn mailbox_is_fifo() {
        let mut mb: Mailbox<4> = Mailbox::new();
        assert!(!mb.is_pending());
        mb.post(MailboxMessage::Connected).unwrap();
        mb.post(MailboxMessage::Encrypted).unwrap();
        assert!(mb.is_pending());
        assert_eq!(mb.try_wait(), Some(MailboxMessage::Connected));
        assert_eq!(mb.try_wait(), Some(MailboxMessage::Encrypted));
        assert_eq!(mb.try_wait(), None);
    }

    #[test]
    fn full_mailbox_drops_newest_and_reports_it() {
        let mut mb: Mailbox<2> = Mailbox::new();
        mb.post(MailboxMessage::Connected).unwrap();
        mb.post(MailboxMessage::Encrypted).unwrap();
        assert_eq!(mb.post(MailboxMessage::Disconnected), Err(MailboxFull));
        assert_eq!(mb.dropped(), 1);
        assert_eq!(mb.try_wait(), Some(MailboxMessage::Connected));
        assert_eq!(mb.try_wait(), Some(MailboxMessage::Encrypted));
        assert_eq!(mb.try_wait(), None);
    }

    #[test]
    fn message_codes_roundtrip_through_u8() {
        for code in 0x01..=0x09u8 {
            let msg = MailboxMessage::try_from(code).unwrap();
            assert_eq!(u8::from(msg), code);
        }
        assert_eq!(MailboxMessage::try_from(0x42), Err(0x42));
    }
}
