// Copyright (c) 2026 Poa Ledger Contributors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Authority round scheduler: round-robin proposer selection, and the three
//! concurrent cancellable one-shot timers that drive block production,
//! proposer rotation on silence, and desync-triggered resync.
//!
//! Grounded in the original node's `currency/poa.go`: a single `currentSigner`
//! cursor, `isProposer` comparing `currentSigner % len(validSet)` against this
//! node's own index, and `mine` firing when it is this node's turn.

use crate::core::types::{Address, ValidatorSet};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Events a running [`TimerSet`] emits; the node event loop reacts to each.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerEvent {
    /// It is this node's turn and `block_interval` has elapsed: propose.
    Mine,
    /// `block_timeout` elapsed with no commit at the current height/round:
    /// rotate the signer cursor and retry.
    Silence,
    /// `desync_interval` of total commit silence elapsed: trigger a resync
    /// against the configured sync peers.
    Desync,
}

/// Pure round-robin signer cursor, independent of any timer plumbing so it
/// can be unit-tested without `tokio::time`.
#[derive(Clone, Debug)]
pub struct Scheduler {
    validators: ValidatorSet,
    cursor: u64,
    round: u64,
    my_address: Address,
}

impl Scheduler {
    /// Build a scheduler over the genesis validator set, starting at cursor 0.
    pub fn new(validators: ValidatorSet, my_address: Address) -> Self {
        Self {
            validators,
            cursor: 0,
            round: 0,
            my_address,
        }
    }

    /// Replace the validator set (e.g. after `AddValidator`/`RemoveValidator`).
    pub fn set_validators(&mut self, validators: ValidatorSet) {
        self.validators = validators;
    }

    /// The validator whose turn it currently is.
    pub fn current_proposer(&self) -> Option<Address> {
        if self.validators.is_empty() {
            return None;
        }
        Some(self.validators.at_cursor(self.cursor))
    }

    /// True iff this node is the current proposer.
    pub fn is_proposer(&self) -> bool {
        self.current_proposer() == Some(self.my_address)
    }

    /// Current cursor value (exposed for logging/metrics).
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Current round within the height now being decided. Every vote cast
    /// at this height must carry this round so that a proposer rotation
    /// (which starts a fresh `(height, round)` bucket in the engine) can't
    /// collide with a vote this node already cast for the abandoned
    /// proposal at the same height.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// Called when a block at `height` is committed: the cursor jumps
    /// forward to track the chain height directly, and the round resets for
    /// the new height.
    pub fn on_commit(&mut self, height: u64) {
        self.cursor = height;
        self.round = 0;
    }

    /// Called when `block_timeout` elapses with no commit: advance to the
    /// next validator in rotation without changing height, and bump the
    /// round so votes at the new proposer's attempt land in a fresh bucket.
    pub fn on_silence_timeout(&mut self) {
        self.cursor = self.cursor.wrapping_add(1);
        self.round = self.round.wrapping_add(1);
    }
}

/// Owns the three cancellable one-shot timers and republishes their
/// elapsed-deadline as [`TimerEvent`]s on a bounded channel.
pub struct TimerSet {
    block_interval: Duration,
    block_timeout: Duration,
    desync_interval: Duration,
    tx: mpsc::Sender<TimerEvent>,
    mine_deadline: Option<Instant>,
    silence_deadline: Option<Instant>,
    desync_deadline: Option<Instant>,
}

impl TimerSet {
    /// Build a new timer set and the receiver it publishes to.
    pub fn new(
        block_interval: Duration,
        block_timeout: Duration,
        desync_interval: Duration,
    ) -> (Self, mpsc::Receiver<TimerEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (
            Self {
                block_interval,
                block_timeout,
                desync_interval,
                tx,
                mine_deadline: None,
                silence_deadline: None,
                desync_deadline: None,
            },
            rx,
        )
    }

    /// (Re)arm the mine timer for `block_interval` from now.
    pub fn arm_mine(&mut self) {
        self.mine_deadline = Some(Instant::now() + self.block_interval);
    }

    /// Cancel the mine timer.
    pub fn cancel_mine(&mut self) {
        self.mine_deadline = None;
    }

    /// (Re)arm the silence timer for `block_timeout` from now. Called on
    /// every height/round transition.
    pub fn arm_silence(&mut self) {
        self.silence_deadline = Some(Instant::now() + self.block_timeout);
    }

    /// Cancel the silence timer (e.g. a commit just landed).
    pub fn cancel_silence(&mut self) {
        self.silence_deadline = None;
    }

    /// (Re)arm the desync timer for `desync_interval` from now. Called on
    /// every successful commit.
    pub fn arm_desync(&mut self) {
        self.desync_deadline = Some(Instant::now() + self.desync_interval);
    }

    /// Cancel the desync timer.
    pub fn cancel_desync(&mut self) {
        self.desync_deadline = None;
    }

    /// Wait for whichever armed timer elapses first and emit its event.
    /// Timers left unarmed (`None`) are simply not polled. Returns `None`
    /// if the event channel has no more room and the event was dropped —
    /// mirrors the gossip layer's drop-on-full policy for non-critical
    /// observational signals.
    pub async fn tick(&mut self) {
        let mine = far_future_if_none(self.mine_deadline);
        let silence = far_future_if_none(self.silence_deadline);
        let desync = far_future_if_none(self.desync_deadline);

        tokio::select! {
            _ = tokio::time::sleep_until(mine), if self.mine_deadline.is_some() => {
                self.mine_deadline = None;
                let _ = self.tx.try_send(TimerEvent::Mine);
            }
            _ = tokio::time::sleep_until(silence), if self.silence_deadline.is_some() => {
                self.silence_deadline = None;
                let _ = self.tx.try_send(TimerEvent::Silence);
            }
            _ = tokio::time::sleep_until(desync), if self.desync_deadline.is_some() => {
                self.desync_deadline = None;
                let _ = self.tx.try_send(TimerEvent::Desync);
            }
        }
    }
}

fn far_future_if_none(deadline: Option<Instant>) -> Instant {
    deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400 * 365))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 20])
    }

    #[test]
    fn proposer_rotates_round_robin_by_cursor() {
        let a = addr(1);
        let b = addr(2);
        let c = addr(3);
        let validators = ValidatorSet::new(vec![a, b, c]);
        let mut sched = Scheduler::new(validators, a);
        assert!(sched.is_proposer());
        sched.on_silence_timeout();
        assert_eq!(sched.current_proposer(), Some(b));
        sched.on_silence_timeout();
        assert_eq!(sched.current_proposer(), Some(c));
        sched.on_silence_timeout();
        assert_eq!(sched.current_proposer(), Some(a));
    }

    #[test]
    fn commit_jumps_cursor_to_height() {
        let a = addr(1);
        let b = addr(2);
        let validators = ValidatorSet::new(vec![a, b]);
        let mut sched = Scheduler::new(validators, a);
        sched.on_commit(7);
        assert_eq!(sched.cursor(), 7);
        assert_eq!(sched.current_proposer(), Some(b));
    }

    #[test]
    fn round_advances_on_silence_and_resets_on_commit() {
        let a = addr(1);
        let b = addr(2);
        let validators = ValidatorSet::new(vec![a, b]);
        let mut sched = Scheduler::new(validators, a);
        assert_eq!(sched.round(), 0);
        sched.on_silence_timeout();
        assert_eq!(sched.round(), 1);
        sched.on_silence_timeout();
        assert_eq!(sched.round(), 2);
        sched.on_commit(1);
        assert_eq!(sched.round(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn mine_timer_fires_after_interval() {
        let (mut timers, mut rx) = TimerSet::new(
            Duration::from_millis(10),
            Duration::from_secs(100),
            Duration::from_secs(100),
        );
        timers.arm_mine();
        tokio::spawn(async move {
            timers.tick().await;
        });
        let evt = rx.recv().await.unwrap();
        assert_eq!(evt, TimerEvent::Mine);
    }
}
