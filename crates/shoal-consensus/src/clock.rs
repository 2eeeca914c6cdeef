// crates/shoal-consensus/src/clock.rs
//
// Epoch clock for the Shoal subnet protocol.
//
// An epoch is a fixed-length wall-clock window split into three
// non-overlapping phases: Commit, Reveal, Settled. The clock is a pure
// function of `now` and the configured durations — no mutable state, no
// coordination — so every correctly-clocked peer derives the same epoch
// index and phase independently, and a restarted node simply recomputes
// where it is.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use shoal_core::error::ShoalError;

/// The current phase within an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EpochPhase {
    /// Peers publish commitments to their score vectors.
    Commit,
    /// Peers disclose the salt and scores behind their commitments.
    Reveal,
    /// Reveals are validated and aggregated; results are final.
    Settled,
}

/// Pure epoch/phase arithmetic over wall-clock time.
#[derive(Debug, Clone, Copy)]
pub struct EpochClock {
    genesis: DateTime<Utc>,
    commit_window: Duration,
    reveal_window: Duration,
    settle_window: Duration,
    /// Tolerance applied on phase-window edges when judging whether a
    /// peer's record arrived in time. Absorbs small clock skew between
    /// peers; never shifts our own phase transitions.
    grace: Duration,
}

impl EpochClock {
    pub fn new(
        genesis: DateTime<Utc>,
        commit_window: Duration,
        reveal_window: Duration,
        settle_window: Duration,
        grace: Duration,
    ) -> Result<Self, ShoalError> {
        for (name, window) in [
            ("commit_window", commit_window),
            ("reveal_window", reveal_window),
            ("settle_window", settle_window),
        ] {
            if window <= Duration::zero() {
                return Err(ShoalError::Clock(format!(
                    "{} must be positive, got {}s",
                    name,
                    window.num_seconds()
                )));
            }
        }
        if grace < Duration::zero() {
            return Err(ShoalError::Clock("grace must be non-negative".to_string()));
        }

        Ok(EpochClock {
            genesis,
            commit_window,
            reveal_window,
            settle_window,
            grace,
        })
    }

    pub fn genesis(&self) -> DateTime<Utc> {
        self.genesis
    }

    /// Full epoch duration (commit + reveal + settle).
    pub fn epoch_length(&self) -> Duration {
        self.commit_window + self.reveal_window + self.settle_window
    }

    /// The epoch index containing `now`.
    ///
    /// A clock before genesis is a configuration error and is reported as
    /// such — it must never silently default to epoch 0.
    pub fn epoch_at(&self, now: DateTime<Utc>) -> Result<u64, ShoalError> {
        let elapsed = now - self.genesis;
        if elapsed < Duration::zero() {
            return Err(ShoalError::Clock(format!(
                "local time {} is before genesis {}",
                now, self.genesis
            )));
        }
        Ok((elapsed.num_milliseconds() / self.epoch_length().num_milliseconds()) as u64)
    }

    /// The phase containing `now`.
    pub fn phase_at(&self, now: DateTime<Utc>) -> Result<EpochPhase, ShoalError> {
        let epoch = self.epoch_at(now)?;
        let into_epoch = now - self.epoch_start(epoch);

        if into_epoch < self.commit_window {
            Ok(EpochPhase::Commit)
        } else if into_epoch < self.commit_window + self.reveal_window {
            Ok(EpochPhase::Reveal)
        } else {
            Ok(EpochPhase::Settled)
        }
    }

    /// Start of the given epoch.
    pub fn epoch_start(&self, epoch: u64) -> DateTime<Utc> {
        self.genesis + self.epoch_length() * epoch as i32
    }

    /// Start of the given phase within an epoch.
    pub fn phase_start(&self, epoch: u64, phase: EpochPhase) -> DateTime<Utc> {
        let start = self.epoch_start(epoch);
        match phase {
            EpochPhase::Commit => start,
            EpochPhase::Reveal => start + self.commit_window,
            EpochPhase::Settled => start + self.commit_window + self.reveal_window,
        }
    }

    /// End of the given phase's window within an epoch.
    pub fn phase_deadline(&self, epoch: u64, phase: EpochPhase) -> DateTime<Utc> {
        match phase {
            EpochPhase::Commit => self.phase_start(epoch, EpochPhase::Reveal),
            EpochPhase::Reveal => self.phase_start(epoch, EpochPhase::Settled),
            EpochPhase::Settled => self.epoch_start(epoch + 1),
        }
    }

    /// The next phase boundary strictly after `now`. Periodic tasks use
    /// this to re-poll tightly around transitions instead of oversleeping.
    pub fn next_boundary(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, ShoalError> {
        let epoch = self.epoch_at(now)?;
        for phase in [EpochPhase::Commit, EpochPhase::Reveal, EpochPhase::Settled] {
            let deadline = self.phase_deadline(epoch, phase);
            if deadline > now {
                return Ok(deadline);
            }
        }
        Ok(self.epoch_start(epoch + 1))
    }

    /// Whether a record timestamp falls within the given phase window,
    /// with the grace tolerance applied on both edges. Used when judging
    /// peers' records, whose clocks may be slightly skewed from ours.
    pub fn within_phase(
        &self,
        submitted_at: DateTime<Utc>,
        epoch: u64,
        phase: EpochPhase,
    ) -> bool {
        let start = self.phase_start(epoch, phase) - self.grace;
        let deadline = self.phase_deadline(epoch, phase) + self.grace;
        submitted_at >= start && submitted_at < deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_clock() -> EpochClock {
        let genesis = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        EpochClock::new(
            genesis,
            Duration::seconds(60),
            Duration::seconds(60),
            Duration::seconds(60),
            Duration::seconds(3),
        )
        .unwrap()
    }

    #[test]
    fn test_phase_is_pure_and_deterministic() {
        let clock = test_clock();
        let now = clock.genesis() + Duration::seconds(42);
        assert_eq!(clock.phase_at(now).unwrap(), clock.phase_at(now).unwrap());
        assert_eq!(clock.epoch_at(now).unwrap(), clock.epoch_at(now).unwrap());
    }

    #[test]
    fn test_phases_partition_the_epoch() {
        let clock = test_clock();

        // Walk two full epochs in one-second steps: every instant has
        // exactly one phase, and phase order is Commit -> Reveal -> Settled.
        let mut last_phase = None;
        for s in 0..360 {
            let now = clock.genesis() + Duration::seconds(s);
            let phase = clock.phase_at(now).unwrap();

            let expected = match s % 180 {
                0..=59 => EpochPhase::Commit,
                60..=119 => EpochPhase::Reveal,
                _ => EpochPhase::Settled,
            };
            assert_eq!(phase, expected, "at {}s", s);
            last_phase = Some(phase);
        }
        assert_eq!(last_phase, Some(EpochPhase::Settled));
    }

    #[test]
    fn test_epoch_index_advances_at_boundary() {
        let clock = test_clock();
        assert_eq!(clock.epoch_at(clock.genesis()).unwrap(), 0);
        assert_eq!(
            clock
                .epoch_at(clock.genesis() + Duration::seconds(179))
                .unwrap(),
            0
        );
        assert_eq!(
            clock
                .epoch_at(clock.genesis() + Duration::seconds(180))
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_before_genesis_is_fatal() {
        let clock = test_clock();
        let before = clock.genesis() - Duration::seconds(1);
        assert!(clock.epoch_at(before).is_err());
        assert!(clock.phase_at(before).is_err());
    }

    #[test]
    fn test_phase_deadlines_chain_without_gaps() {
        let clock = test_clock();
        for epoch in [0u64, 1, 7] {
            assert_eq!(
                clock.phase_deadline(epoch, EpochPhase::Commit),
                clock.phase_start(epoch, EpochPhase::Reveal)
            );
            assert_eq!(
                clock.phase_deadline(epoch, EpochPhase::Reveal),
                clock.phase_start(epoch, EpochPhase::Settled)
            );
            assert_eq!(
                clock.phase_deadline(epoch, EpochPhase::Settled),
                clock.epoch_start(epoch + 1)
            );
        }
    }

    #[test]
    fn test_within_phase_applies_grace() {
        let clock = test_clock();

        let commit_deadline = clock.phase_deadline(3, EpochPhase::Commit);
        // Just past the deadline but inside grace: accepted.
        assert!(clock.within_phase(
            commit_deadline + Duration::seconds(2),
            3,
            EpochPhase::Commit
        ));
        // Past the grace edge: rejected.
        assert!(!clock.within_phase(
            commit_deadline + Duration::seconds(3),
            3,
            EpochPhase::Commit
        ));
        // Slightly before the phase start, inside grace: accepted.
        assert!(clock.within_phase(
            clock.phase_start(3, EpochPhase::Commit) - Duration::seconds(2),
            3,
            EpochPhase::Commit
        ));
    }

    #[test]
    fn test_next_boundary() {
        let clock = test_clock();
        let now = clock.genesis() + Duration::seconds(30);
        assert_eq!(
            clock.next_boundary(now).unwrap(),
            clock.phase_deadline(0, EpochPhase::Commit)
        );

        let in_settled = clock.genesis() + Duration::seconds(170);
        assert_eq!(
            clock.next_boundary(in_settled).unwrap(),
            clock.epoch_start(1)
        );
    }

    #[test]
    fn test_zero_window_rejected() {
        let genesis = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let result = EpochClock::new(
            genesis,
            Duration::seconds(0),
            Duration::seconds(60),
            Duration::seconds(60),
            Duration::zero(),
        );
        assert!(result.is_err());
    }
}
