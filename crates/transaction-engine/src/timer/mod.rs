//! # Transaction Timers
//!
//! RFC 3261 section 17 drives every transaction with timers: retransmission
//! timers (A, E, G) resend a message with exponential backoff, timeout timers
//! (B, F, H) give up on the peer, and linger timers (D, I, J, K) keep a
//! finished transaction around long enough to absorb retransmissions.
//!
//! ```text
//! Timer   Default         Meaning
//! -----   -------------   ------------------------------------------------
//! A       T1, doubling    INVITE request retransmission (UDP only)
//! B       64*T1           INVITE transaction timeout
//! D       32s             response retransmission window after ACK (UDP)
//! E       T1, max T2      non-INVITE request retransmission (UDP only)
//! F       64*T1           non-INVITE transaction timeout
//! G       T1, max T2      INVITE final response retransmission (UDP only)
//! H       64*T1           wait for ACK
//! I       T4              ACK retransmission window (UDP)
//! J       64*T1           request retransmission window (UDP)
//! K       T4              response retransmission window (UDP)
//! ```
//!
//! Each transaction owns two slots: a *main* slot for the state timer and a
//! *retransmit* slot. Starting a timer replaces whatever ran in its slot.
//! Timers are tokio tasks spawned on the runtime captured when the manager was
//! built; each start bumps the slot generation so an expiry that raced with a
//! restart or cancel is ignored.

mod types;

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

pub use types::{TimerSettings, TimerType};

use crate::error::Error;
use crate::message::Message;
use crate::transaction::{StateChangeReason, Transaction, TransactionState};

/// Which of the two timer slots of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotId {
    Main,
    Retransmit,
}

#[derive(Debug, Default)]
pub(crate) struct TimerSlot {
    generation: u64,
    timer: Option<TimerType>,
    handle: Option<JoinHandle<()>>,
}

impl TimerSlot {
    fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.timer = None;
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct TransactionTimers {
    main: TimerSlot,
    retransmit: TimerSlot,
    /// Current retransmission interval
    pub interval: Duration,
}

impl TransactionTimers {
    fn slot_mut(&mut self, slot: SlotId) -> &mut TimerSlot {
        match slot {
            SlotId::Main => &mut self.main,
            SlotId::Retransmit => &mut self.retransmit,
        }
    }

    /// Timer currently armed in `slot`
    pub fn active(&self, slot: SlotId) -> Option<TimerType> {
        match slot {
            SlotId::Main => self.main.timer,
            SlotId::Retransmit => self.retransmit.timer,
        }
    }

    pub fn cancel(&mut self, slot: SlotId) {
        self.slot_mut(slot).cancel();
    }

    pub fn cancel_all(&mut self) {
        self.main.cancel();
        self.retransmit.cancel();
    }
}

impl Transaction {
    pub(crate) fn timer_settings(&self) -> &TimerSettings {
        &self.config.timers
    }

    /// Arms `timer` in `slot`, replacing whatever ran there
    pub(crate) fn start_timer(&self, slot: SlotId, timer: TimerType, delay: Duration) {
        let Some(runtime) = self.core.upgrade().and_then(|core| core.runtime.clone()) else {
            warn!(id = %self.id(), %timer, "no tokio runtime, timer not started");
            return;
        };

        let weak = self.this.clone();
        let mut inner = self.inner.lock();
        let entry = inner.timers.slot_mut(slot);
        entry.cancel();
        let generation = entry.generation;
        entry.timer = Some(timer);
        entry.handle = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(transaction) = weak.upgrade() {
                transaction.on_timer_expired(slot, timer, generation);
            }
        }));
        trace!(id = %self.id(), %timer, ?delay, "timer started");
    }

    /// Starts retransmitting with `timer` at `interval`
    pub(crate) fn start_retransmission(&self, timer: TimerType, interval: Duration) {
        self.inner.lock().timers.interval = interval;
        self.start_timer(SlotId::Retransmit, timer, interval);
    }

    pub(crate) fn cancel_timers(&self) {
        self.inner.lock().timers.cancel_all();
    }

    pub(crate) fn cancel_timer(&self, slot: SlotId) {
        self.inner.lock().timers.cancel(slot);
    }

    pub(crate) fn active_timer(&self, slot: SlotId) -> Option<TimerType> {
        self.inner.lock().timers.active(slot)
    }

    fn on_timer_expired(&self, slot: SlotId, timer: TimerType, generation: u64) {
        let _guard = self.lock.lock();
        {
            let mut inner = self.inner.lock();
            if inner.state.is_terminated() {
                return;
            }
            let entry = inner.timers.slot_mut(slot);
            if entry.generation != generation {
                trace!(id = %self.id(), %timer, "stale timer ignored");
                return;
            }
            entry.timer = None;
            // Dropping the handle detaches the running task instead of aborting it
            entry.handle = None;
        }
        debug!(id = %self.id(), %timer, "timer fired");

        if timer.is_retransmission() {
            self.retransmit(timer);
            return;
        }

        let result = match timer {
            TimerType::B
            | TimerType::F
            | TimerType::H
            | TimerType::CancelTimeout
            | TimerType::AwaitAck => self.terminate_with(StateChangeReason::TimeOut),
            TimerType::ReliableProvisionalTimeout => {
                self.terminate_with(StateChangeReason::RelProvResponseTimeout)
            }
            TimerType::ProvisionalTimeout => self.provisional_timeout(),
            _ => self.terminate_with(StateChangeReason::NormalTermination),
        };
        if let Err(e) = result {
            trace!(id = %self.id(), %timer, "timer handling ended with {}", e);
        }
    }

    fn provisional_timeout(&self) -> crate::Result<()> {
        if self.config.enable_proceeding_timeout_state
            && self.state() == TransactionState::InviteProceeding
        {
            self.change_state(
                TransactionState::InviteProceedingTimeout,
                StateChangeReason::TimeOut,
            )
        } else {
            self.terminate_with(StateChangeReason::TimeOut)
        }
    }

    fn retransmit(&self, timer: TimerType) {
        let (message, destination, interval) = {
            let inner = self.inner.lock();
            let message = match timer {
                TimerType::A | TimerType::E => inner.request.clone().map(Message::Request),
                TimerType::G => inner.last_response.clone().map(Message::Response),
                _ => inner.reliable.pending.clone().map(Message::Response),
            };
            (message, inner.destination, inner.timers.interval)
        };
        let (Some(message), Some(destination)) = (message, destination) else {
            return;
        };

        trace!(id = %self.id(), %timer, "retransmitting {}", message.summary());
        match self.transmit(&message, &destination) {
            Ok(()) => {}
            Err(Error::Transport(_)) => {
                self.handle_send_failure();
                return;
            }
            Err(_) => return,
        }

        // INVITE requests and reliable provisionals keep doubling; E and G stop at T2
        let capped = matches!(timer, TimerType::E | TimerType::G);
        let next = self.timer_settings().next_interval(interval, capped);
        self.start_retransmission(timer, next);
    }
}
