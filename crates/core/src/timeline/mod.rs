use std::collections::VecDeque;

use serde::Serialize;

use crate::source::{MediaEvent, SourceId};

/// Work items processed by the engine, strictly in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Display refresh: analyze, publish, adapt mood.
    DisplayTick,
    /// One step of the running crossfade ramp.
    CrossfadeStep,
    /// Notification raised by a bound media source.
    Media { source: SourceId, event: MediaEvent },
}

/// Single FIFO fed by display ticks, timers and media callbacks.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<EngineEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: EngineEvent) {
        self.events.push_back(event);
    }

    pub fn pop(&mut self) -> Option<EngineEvent> {
        self.events.pop_front()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TimerId(u64);

#[derive(Debug, Clone)]
struct Interval {
    id: TimerId,
    start: f64,
    period: f64,
    fired: u64,
    event: EngineEvent,
}

impl Interval {
    fn next_due(&self) -> f64 {
        self.start + (self.fired + 1) as f64 * self.period
    }
}

// Absorbs rounding in the frame clock so a timer due exactly on a block
// boundary fires in that block.
const DUE_EPSILON: f64 = 1e-9;

/// Fixed-interval timers driven by context time.
#[derive(Debug, Default)]
pub struct Timers {
    intervals: Vec<Interval>,
    next_id: u64,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires `event` every `period` seconds, first at `start + period`.
    pub fn set_interval(&mut self, start: f64, period: f64, event: EngineEvent) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.intervals.push(Interval {
            id,
            start,
            period: period.max(f64::EPSILON),
            fired: 0,
            event,
        });
        id
    }

    /// Cancels a timer. Returns whether it existed.
    pub fn clear(&mut self, id: TimerId) -> bool {
        let before = self.intervals.len();
        self.intervals.retain(|interval| interval.id != id);
        before != self.intervals.len()
    }

    pub fn clear_all(&mut self) {
        self.intervals.clear();
    }

    pub fn is_active(&self, id: TimerId) -> bool {
        self.intervals.iter().any(|interval| interval.id == id)
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Enqueues one event for every period elapsed up to `now`, oldest due
    /// time first.
    pub fn collect_due(&mut self, now: f64, queue: &mut EventQueue) {
        let mut due: Vec<(f64, EngineEvent)> = Vec::new();
        for interval in &mut self.intervals {
            loop {
                let at = interval.next_due();
                if at > now + DUE_EPSILON {
                    break;
                }
                interval.fired += 1;
                due.push((at, interval.event.clone()));
            }
        }
        due.sort_by(|a, b| a.0.total_cmp(&b.0));
        for (_, event) in due {
            queue.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_preserves_arrival_order() {
        let mut queue = EventQueue::new();
        queue.push(EngineEvent::CrossfadeStep);
        queue.push(EngineEvent::DisplayTick);

        assert_eq!(queue.pop(), Some(EngineEvent::CrossfadeStep));
        assert_eq!(queue.pop(), Some(EngineEvent::DisplayTick));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn intervals_fire_once_per_elapsed_period() {
        let mut timers = Timers::new();
        let mut queue = EventQueue::new();
        timers.set_interval(1.0, 0.1, EngineEvent::CrossfadeStep);

        timers.collect_due(1.05, &mut queue);
        assert!(queue.is_empty());

        timers.collect_due(1.3, &mut queue);
        assert_eq!(queue.len(), 3);

        timers.collect_due(1.3, &mut queue);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn boundary_times_fire_despite_rounding() {
        let mut timers = Timers::new();
        let mut queue = EventQueue::new();
        timers.set_interval(0.0, 0.1, EngineEvent::CrossfadeStep);

        // 4800 frames at 48 kHz, accumulated the way the context clock does.
        timers.collect_due(4_800.0 / 48_000.0, &mut queue);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn cleared_timers_stop_firing() {
        let mut timers = Timers::new();
        let mut queue = EventQueue::new();
        let id = timers.set_interval(0.0, 0.1, EngineEvent::CrossfadeStep);

        assert!(timers.clear(id));
        assert!(!timers.clear(id));
        timers.collect_due(5.0, &mut queue);
        assert!(queue.is_empty());
    }
}
