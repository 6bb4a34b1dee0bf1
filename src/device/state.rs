//! Explicit device state machine.
//!
//! The device state is the pair `(streaming_counter, producer)`. Every transition
//! is a pure function of that pair and a [`StateChange`] and yields the
//! [`TimerCommand`] the device has to apply to its single timer slot.

use crate::media::ClientId;
use std::fmt;

/// A lifecycle event reported by one of the streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    /// A consumer started streaming from the source.
    ConsumerConnecting,
    /// A consumer stopped streaming from the source.
    ConsumerDisconnecting,
    /// A producer started streaming into the sink.
    ProducerConnecting(ClientId),
    /// The producer stopped streaming into the sink.
    ProducerDisconnecting,
}

/// What the device presents, derived from its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    /// No consumer is connected, no timer runs.
    Idle,
    /// Consumers are connected but no producer, the landing page is shown.
    LandingPage,
    /// Consumers and a producer are connected, producer frames are pumped.
    Streaming,
}

/// The kind of timer the device has to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerRequest {
    /// Send the landing page at the idle frame rate.
    LandingPage,
    /// Pull producer frames and push them to consumers at the frame rate.
    PullPush,
}

/// How a transition affects the timer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCommand {
    /// Leave the current timer alone.
    Keep,
    /// Cancel the current timer, leave the slot empty.
    Stop,
    /// Cancel the current timer, then start the requested one.
    Replace(TimerRequest),
}

/// Consumer count and producer identity of a device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceState {
    streaming_counter: u32,
    producer: Option<ClientId>,
}

impl DeviceState {
    /// Number of connected consumers.
    pub fn streaming_counter(&self) -> u32 {
        self.streaming_counter
    }

    /// The attached producer.
    pub fn producer(&self) -> Option<ClientId> {
        self.producer
    }

    /// The mode derived from the state.
    pub fn mode(&self) -> DeviceMode {
        match (self.streaming_counter, self.producer) {
            (0, _) => DeviceMode::Idle,
            (_, None) => DeviceMode::LandingPage,
            (_, Some(_)) => DeviceMode::Streaming,
        }
    }

    /// The timer that has to run in the current state, if any.
    pub fn required_timer(&self) -> Option<TimerRequest> {
        match self.mode() {
            DeviceMode::Idle => None,
            DeviceMode::LandingPage => Some(TimerRequest::LandingPage),
            DeviceMode::Streaming => Some(TimerRequest::PullPush),
        }
    }

    /// Applies `change` and returns the command for the timer slot.
    pub fn apply(&mut self, change: StateChange) -> TimerCommand {
        match change {
            StateChange::ConsumerConnecting => {
                self.streaming_counter = self.streaming_counter.saturating_add(1);
                if self.streaming_counter == 1 {
                    // First consumer, a stream must be started.
                    self.required_timer()
                        .map_or(TimerCommand::Stop, TimerCommand::Replace)
                } else {
                    TimerCommand::Keep
                }
            }
            StateChange::ConsumerDisconnecting => {
                // Stops may underrun, the counter floors at zero.
                self.streaming_counter = self.streaming_counter.saturating_sub(1);
                if self.streaming_counter == 0 {
                    TimerCommand::Stop
                } else {
                    TimerCommand::Keep
                }
            }
            StateChange::ProducerConnecting(client) => {
                self.producer = Some(client);
                if self.streaming_counter > 0 {
                    TimerCommand::Replace(TimerRequest::PullPush)
                } else {
                    TimerCommand::Keep
                }
            }
            StateChange::ProducerDisconnecting => {
                self.producer = None;
                if self.streaming_counter > 0 {
                    TimerCommand::Replace(TimerRequest::LandingPage)
                } else {
                    TimerCommand::Stop
                }
            }
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "connected consumers: {}, producer: {}",
            self.streaming_counter,
            u8::from(self.producer.is_some())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_consumer_starts_landing_page() {
        let mut state = DeviceState::default();
        assert_eq!(state.mode(), DeviceMode::Idle);

        assert_eq!(
            state.apply(StateChange::ConsumerConnecting),
            TimerCommand::Replace(TimerRequest::LandingPage)
        );
        assert_eq!(state.apply(StateChange::ConsumerConnecting), TimerCommand::Keep);
        assert_eq!(state.mode(), DeviceMode::LandingPage);
        assert_eq!(state.streaming_counter(), 2);
    }

    #[test]
    fn test_first_consumer_with_producer_starts_pull_push() {
        let mut state = DeviceState::default();
        assert_eq!(
            state.apply(StateChange::ProducerConnecting(ClientId::new(1))),
            TimerCommand::Keep
        );
        assert_eq!(
            state.apply(StateChange::ConsumerConnecting),
            TimerCommand::Replace(TimerRequest::PullPush)
        );
        assert_eq!(state.mode(), DeviceMode::Streaming);
    }

    #[test]
    fn test_producer_switches_timer_kind_while_streaming() {
        let mut state = DeviceState::default();
        let _ = state.apply(StateChange::ConsumerConnecting);

        assert_eq!(
            state.apply(StateChange::ProducerConnecting(ClientId::new(1))),
            TimerCommand::Replace(TimerRequest::PullPush)
        );
        assert_eq!(
            state.apply(StateChange::ProducerDisconnecting),
            TimerCommand::Replace(TimerRequest::LandingPage)
        );
        assert_eq!(state.producer(), None);
    }

    #[test]
    fn test_last_consumer_stops_timer() {
        let mut state = DeviceState::default();
        let _ = state.apply(StateChange::ConsumerConnecting);
        let _ = state.apply(StateChange::ConsumerConnecting);

        assert_eq!(state.apply(StateChange::ConsumerDisconnecting), TimerCommand::Keep);
        assert_eq!(state.apply(StateChange::ConsumerDisconnecting), TimerCommand::Stop);
        assert_eq!(state.required_timer(), None);
    }

    #[test]
    fn test_disconnect_underrun_floors_at_zero() {
        let mut state = DeviceState::default();
        assert_eq!(state.apply(StateChange::ConsumerDisconnecting), TimerCommand::Stop);
        assert_eq!(state.streaming_counter(), 0);

        assert_eq!(
            state.apply(StateChange::ConsumerConnecting),
            TimerCommand::Replace(TimerRequest::LandingPage)
        );
    }

    #[test]
    fn test_required_timer_matches_commands_for_all_sequences() {
        let producer = ClientId::new(3);
        let changes = [
            StateChange::ConsumerConnecting,
            StateChange::ConsumerDisconnecting,
            StateChange::ProducerConnecting(producer),
            StateChange::ProducerDisconnecting,
        ];

        // Every sequence of four changes: the slot always holds the required timer.
        for sequence in 0..changes.len().pow(4) {
            let mut state = DeviceState::default();
            let mut slot: Option<TimerRequest> = None;
            let mut index = sequence;
            for _ in 0..4 {
                match state.apply(changes[index % changes.len()]) {
                    TimerCommand::Keep => {}
                    TimerCommand::Stop => slot = None,
                    TimerCommand::Replace(request) => slot = Some(request),
                }
                index /= changes.len();
                assert_eq!(slot, state.required_timer(), "sequence {sequence}");
            }
        }
    }

    #[test]
    fn test_display() {
        let mut state = DeviceState::default();
        let _ = state.apply(StateChange::ConsumerConnecting);
        let _ = state.apply(StateChange::ProducerConnecting(ClientId::new(1)));
        assert_eq!(state.to_string(), "connected consumers: 1, producer: 1");
    }
}
