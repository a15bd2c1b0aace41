use tracing::info;

/// A mode-changing edge emitted by [`DayNightController::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayNightEvent {
    Enter,
    Exit,
}

/// Hysteretic day/night detector. Entering night requires `min_dark_frames`
/// consecutive frames below `dark_threshold`; leaving requires only a single
/// frame above `bright_threshold`. The asymmetry biases toward fast recovery
/// to day over a stubborn commitment to night.
#[derive(Debug, Clone)]
pub struct DayNightController {
    dark_threshold: f64,
    bright_threshold: f64,
    min_dark_frames: u32,
    active: bool,
    dark_count: u32,
}

impl DayNightController {
    pub fn new(dark_threshold: f64, bright_threshold: f64, min_dark_frames: u32) -> Self {
        assert!(
            bright_threshold > dark_threshold,
            "bright_threshold must exceed dark_threshold"
        );
        Self {
            dark_threshold,
            bright_threshold,
            min_dark_frames,
            active: false,
            dark_count: 0,
        }
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn dark_threshold(&self) -> f64 {
        self.dark_threshold
    }

    pub fn bright_threshold(&self) -> f64 {
        self.bright_threshold
    }

    /// Feed one brightness score, returning the event this observation
    /// produced, if any.
    pub fn update(&mut self, score: f64) -> Option<DayNightEvent> {
        if score < self.dark_threshold {
            self.dark_count += 1;
        } else {
            self.dark_count = 0;
        }

        if !self.active && self.dark_count >= self.min_dark_frames {
            self.active = true;
            info!(score, dark_count = self.dark_count, "day/night controller entering night");
            Some(DayNightEvent::Enter)
        } else if self.active && score > self.bright_threshold {
            self.active = false;
            info!(score, "day/night controller exiting night");
            Some(DayNightEvent::Exit)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_sequence_yields_enter_then_exit() {
        let mut controller = DayNightController::new(35.0, 55.0, 3);
        let scores = [40.0, 30.0, 30.0, 30.0, 40.0, 60.0, 20.0, 20.0];
        let events: Vec<Option<DayNightEvent>> = scores.iter().map(|&s| controller.update(s)).collect();
        assert_eq!(
            events,
            vec![
                None,
                None,
                None,
                Some(DayNightEvent::Enter),
                None,
                Some(DayNightEvent::Exit),
                None,
                None,
            ]
        );
    }

    #[test]
    fn entering_night_requires_k_consecutive_dark_frames() {
        let mut controller = DayNightController::new(35.0, 55.0, 3);
        assert_eq!(controller.update(10.0), None);
        assert_eq!(controller.update(10.0), None);
        assert_eq!(controller.update(10.0), Some(DayNightEvent::Enter));
        assert!(controller.active());
    }

    #[test]
    fn single_bright_frame_exits_night() {
        let mut controller = DayNightController::new(35.0, 55.0, 1);
        controller.update(10.0);
        assert!(controller.active());
        assert_eq!(controller.update(60.0), Some(DayNightEvent::Exit));
        assert!(!controller.active());
    }

    #[test]
    fn intermediate_scores_between_thresholds_reset_dark_count_without_events() {
        let mut controller = DayNightController::new(35.0, 55.0, 2);
        assert_eq!(controller.update(10.0), None);
        assert_eq!(controller.update(45.0), None); // resets dark_count, not bright enough to exit (inactive anyway)
        assert_eq!(controller.update(10.0), None);
        assert_eq!(controller.update(10.0), Some(DayNightEvent::Enter));
    }

    #[test]
    #[should_panic]
    fn construction_rejects_inverted_thresholds() {
        DayNightController::new(55.0, 35.0, 3);
    }
}
