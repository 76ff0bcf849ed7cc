use std::collections::VecDeque;

use crate::types::PredictedPoint;

pub const DEFAULT_WINDOW: usize = 3;

/// Bounded history of one joint's recent estimates.
#[derive(Clone, Debug)]
pub struct MovingAverageFilter {
    limit: usize,
    elements: VecDeque<PredictedPoint>,
}

impl MovingAverageFilter {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            elements: VecDeque::with_capacity(limit),
        }
    }

    pub fn add(&mut self, element: PredictedPoint) {
        if self.elements.len() >= self.limit {
            self.elements.pop_front();
        }
        self.elements.push_back(element);
    }

    /// Arithmetic mean of the held positions. The confidence is the most
    /// recently added sample's, not an average.
    pub fn averaged_value(&self) -> Option<PredictedPoint> {
        let last = self.elements.back()?;
        let count = self.elements.len() as f32;
        let (sum_x, sum_y) = self
            .elements
            .iter()
            .fold((0.0_f32, 0.0_f32), |acc, p| (acc.0 + p.x, acc.1 + p.y));

        Some(PredictedPoint::new(
            sum_x / count,
            sum_y / count,
            last.confidence,
        ))
    }
}

/// One [`MovingAverageFilter`] per joint, lazily sized to the model's joint
/// count.
///
/// Not synchronised: feed it one frame at a time from a single context.
#[derive(Debug)]
pub struct TemporalSmoother {
    window: usize,
    filters: Vec<MovingAverageFilter>,
}

impl Default for TemporalSmoother {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl TemporalSmoother {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            filters: Vec::new(),
        }
    }

    /// Feeds this frame's points through the filters and overwrites them with
    /// the smoothed values.
    ///
    /// A change in point count rebuilds every filter. Absent points leave their
    /// filter untouched; the slot reports the filter's existing average, or
    /// stays `None` if it has never seen a sample.
    pub fn smooth(&mut self, points: &mut [Option<PredictedPoint>]) {
        if points.len() != self.filters.len() {
            if !self.filters.is_empty() {
                log::debug!(
                    "joint count changed {} -> {}, resetting smoothing filters",
                    self.filters.len(),
                    points.len()
                );
            }
            self.filters = (0..points.len())
                .map(|_| MovingAverageFilter::new(self.window))
                .collect();
        }

        for (slot, filter) in points.iter_mut().zip(self.filters.iter_mut()) {
            if let Some(point) = slot {
                filter.add(*point);
            }
            *slot = filter.averaged_value();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(x: f32, y: f32, c: f32) -> PredictedPoint {
        PredictedPoint::new(x, y, c)
    }

    #[test]
    fn averages_up_to_the_last_three_positions() {
        let mut filter = MovingAverageFilter::new(3);
        assert!(filter.averaged_value().is_none());

        filter.add(pt(0.1, 0.2, 0.5));
        let avg = filter.averaged_value().unwrap();
        assert!((avg.x - 0.1).abs() < 1e-6);

        filter.add(pt(0.3, 0.4, 0.6));
        let avg = filter.averaged_value().unwrap();
        assert!((avg.x - 0.2).abs() < 1e-6);
        assert!((avg.y - 0.3).abs() < 1e-6);

        filter.add(pt(0.5, 0.6, 0.7));
        filter.add(pt(0.7, 0.8, 0.8));
        let avg = filter.averaged_value().unwrap();
        assert!((avg.x - 0.5).abs() < 1e-6);
        assert!((avg.y - 0.6).abs() < 1e-6);
    }

    #[test]
    fn confidence_comes_from_last_sample() {
        let mut filter = MovingAverageFilter::new(3);
        filter.add(pt(0.0, 0.0, 0.9));
        filter.add(pt(0.0, 0.0, 0.1));
        assert_eq!(filter.averaged_value().unwrap().confidence, 0.1);
    }

    #[test]
    fn absent_points_skip_the_update_without_reset() {
        let mut smoother = TemporalSmoother::default();
        let mut frame = vec![Some(pt(0.2, 0.2, 0.9)), Some(pt(0.4, 0.4, 0.9))];
        smoother.smooth(&mut frame);

        let mut frame = vec![None, Some(pt(0.6, 0.6, 0.9))];
        smoother.smooth(&mut frame);

        let first = frame[0].unwrap();
        assert!((first.x - 0.2).abs() < 1e-6);
        let second = frame[1].unwrap();
        assert!((second.x - 0.5).abs() < 1e-6);
    }

    #[test]
    fn never_seen_joint_stays_absent() {
        let mut smoother = TemporalSmoother::default();
        let mut frame = vec![None, Some(pt(0.5, 0.5, 0.5))];
        smoother.smooth(&mut frame);
        assert!(frame[0].is_none());
        assert!(frame[1].is_some());
    }

    #[test]
    fn joint_count_change_resets_history() {
        let mut smoother = TemporalSmoother::default();
        let mut frame = vec![Some(pt(0.9, 0.9, 0.9)); 2];
        smoother.smooth(&mut frame);

        let mut frame = vec![Some(pt(0.1, 0.1, 0.9)); 3];
        smoother.smooth(&mut frame);
        assert_eq!(frame.len(), 3);
        assert!((frame[0].unwrap().x - 0.1).abs() < 1e-6);
        assert!((frame[2].unwrap().x - 0.1).abs() < 1e-6);
    }

    #[test]
    fn oscillating_input_stays_inside_its_envelope() {
        let mut smoother = TemporalSmoother::default();
        let (a, b) = (0.2_f32, 0.8_f32);
        let mut previous_raw = a;

        for i in 0..20 {
            let raw = if i % 2 == 0 { a } else { b };
            let mut frame = vec![Some(pt(raw, raw, 0.9))];
            smoother.smooth(&mut frame);
            let smoothed = frame[0].unwrap();

            assert!(smoothed.x >= a - 1e-6 && smoothed.x <= b + 1e-6);
            if i > 0 {
                // The average lags behind a jump instead of reaching it.
                assert!((smoothed.x - raw).abs() > 1e-3);
                assert!((smoothed.x - raw).abs() < (raw - previous_raw).abs());
            }
            previous_raw = raw;
        }
    }
}
