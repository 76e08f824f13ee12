use crate::ClickKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSignature {
    pub numerator: u32,
    pub denominator: u32,
}

impl TimeSignature {
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    pub fn beats_per_bar(&self) -> u32 {
        self.numerator
    }
}

impl std::fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::new(4, 4)
    }
}

impl From<(u32, u32)> for TimeSignature {
    fn from((numerator, denominator): (u32, u32)) -> Self {
        Self::new(numerator, denominator)
    }
}

/// Musical position derived from a frame position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatSnapshot {
    /// 1-based bar number.
    pub bar: u64,
    /// 1-based beat within the bar.
    pub beat: u32,
    pub samples_until_next_beat: u64,
    /// Elapsed fraction of the current beat, in `[0, 1)`.
    pub progress_within_beat: f64,
}

impl std::fmt::Display for BeatSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.bar, self.beat)
    }
}

/// Maps frame positions to bars and beats for one fixed tempo.
///
/// `samples_per_beat` is rounded once at construction and reused by every call.
#[derive(Debug, Clone, Copy)]
pub struct BeatClock {
    sample_rate: u32,
    bpm: f64,
    time_signature: TimeSignature,
    samples_per_beat: u64,
}

impl BeatClock {
    /// # Panics
    ///
    /// Panics if `sample_rate` is 0 or `bpm` is not a positive finite number.
    pub fn new(sample_rate: u32, bpm: f64) -> Self {
        Self::with_time_signature(sample_rate, bpm, TimeSignature::default())
    }

    /// # Panics
    ///
    /// Panics on a zero sample rate, a non-positive bpm or an empty bar.
    pub fn with_time_signature(
        sample_rate: u32,
        bpm: f64,
        time_signature: impl Into<TimeSignature>,
    ) -> Self {
        let time_signature = time_signature.into();
        assert!(sample_rate > 0, "sample_rate must be greater than 0");
        assert!(bpm.is_finite() && bpm > 0.0, "bpm must be positive");
        assert!(
            time_signature.beats_per_bar() > 0,
            "beats_per_bar must be greater than 0"
        );

        let samples_per_beat = samples_per_beat(sample_rate, bpm);
        Self {
            sample_rate,
            bpm,
            time_signature,
            samples_per_beat,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.time_signature
    }

    pub fn beats_per_bar(&self) -> u32 {
        self.time_signature.beats_per_bar()
    }

    #[inline]
    pub fn samples_per_beat(&self) -> u64 {
        self.samples_per_beat
    }

    #[inline]
    pub fn beat_index(&self, position: u64) -> u64 {
        position / self.samples_per_beat
    }

    pub fn compute(&self, position: u64) -> BeatSnapshot {
        let beats_per_bar = self.beats_per_bar() as u64;
        let beat_index = self.beat_index(position);
        let into_beat = position % self.samples_per_beat;

        BeatSnapshot {
            bar: beat_index / beats_per_bar + 1,
            beat: (beat_index % beats_per_bar) as u32 + 1,
            samples_until_next_beat: self.samples_per_beat - into_beat,
            progress_within_beat: into_beat as f64 / self.samples_per_beat as f64,
        }
    }

    /// The click a frame starts, if it is the first frame of a beat.
    #[inline]
    pub fn boundary(&self, position: u64) -> Option<ClickKind> {
        if position % self.samples_per_beat != 0 {
            return None;
        }
        if self.beat_index(position) % self.beats_per_bar() as u64 == 0 {
            Some(ClickKind::Bar)
        } else {
            Some(ClickKind::Beat)
        }
    }

    /// First frame at or after `position` that starts a beat.
    #[inline]
    pub fn next_boundary(&self, position: u64) -> u64 {
        position.div_ceil(self.samples_per_beat) * self.samples_per_beat
    }
}

fn samples_per_beat(sample_rate: u32, bpm: f64) -> u64 {
    ((sample_rate as f64 * 60.0 / bpm).round() as u64).max(1)
}

/// One-shot form of [`BeatClock::compute`].
///
/// # Panics
///
/// Panics on a zero sample rate, a non-positive bpm or zero beats per bar.
pub fn compute_beat(position: u64, sample_rate: u32, bpm: f64, beats_per_bar: u32) -> BeatSnapshot {
    BeatClock::with_time_signature(sample_rate, bpm, (beats_per_bar, 4)).compute(position)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPB: u64 = 20672;

    fn clock() -> BeatClock {
        BeatClock::new(44100, 128.0)
    }

    #[test]
    fn time_signature_displays_as_fraction() {
        assert_eq!(TimeSignature::new(3, 4).to_string(), "3/4");
        assert_eq!(TimeSignature::from((6, 8)).to_string(), "6/8");
    }

    #[test]
    fn samples_per_beat_is_rounded() {
        assert_eq!(clock().samples_per_beat(), SPB);
        // 48000 * 60 / 140 = 20571.43
        assert_eq!(BeatClock::new(48000, 140.0).samples_per_beat(), 20571);
    }

    #[test]
    fn position_zero_is_first_beat_of_first_bar() {
        let snap = clock().compute(0);
        assert_eq!(snap.bar, 1);
        assert_eq!(snap.beat, 1);
        assert_eq!(snap.samples_until_next_beat, SPB);
        assert_eq!(snap.progress_within_beat, 0.0);
    }

    #[test]
    fn second_beat_starts_after_one_beat_of_samples() {
        let snap = clock().compute(SPB);
        assert_eq!((snap.bar, snap.beat), (1, 2));
        assert_eq!(snap.samples_until_next_beat, SPB);

        let just_before = clock().compute(SPB - 1);
        assert_eq!((just_before.bar, just_before.beat), (1, 1));
        assert_eq!(just_before.samples_until_next_beat, 1);
    }

    #[test]
    fn fifth_beat_starts_bar_two() {
        let snap = clock().compute(4 * SPB);
        assert_eq!((snap.bar, snap.beat), (2, 1));

        let snap = clock().compute(11 * SPB + 5);
        assert_eq!((snap.bar, snap.beat), (3, 4));
    }

    #[test]
    fn progress_stays_below_one() {
        let clock = clock();
        let half = clock.compute(SPB / 2);
        assert!((half.progress_within_beat - 0.5).abs() < 1e-9);

        let last = clock.compute(SPB - 1);
        assert!(last.progress_within_beat < 1.0);
    }

    #[test]
    fn one_shot_matches_cached_clock() {
        for position in [0, 1, SPB - 1, SPB, 3 * SPB + 17, 1_000_000] {
            assert_eq!(compute_beat(position, 44100, 128.0, 4), clock().compute(position));
        }
    }

    #[test]
    fn custom_bar_length() {
        let clock = BeatClock::with_time_signature(44100, 128.0, (3, 4));
        let snap = clock.compute(3 * SPB);
        assert_eq!((snap.bar, snap.beat), (2, 1));
    }

    #[test]
    fn boundaries_distinguish_bars_from_beats() {
        let clock = clock();
        assert_eq!(clock.boundary(0), Some(ClickKind::Bar));
        assert_eq!(clock.boundary(SPB), Some(ClickKind::Beat));
        assert_eq!(clock.boundary(4 * SPB), Some(ClickKind::Bar));
        assert_eq!(clock.boundary(SPB + 1), None);

        assert_eq!(clock.next_boundary(0), 0);
        assert_eq!(clock.next_boundary(1), SPB);
        assert_eq!(clock.next_boundary(SPB), SPB);
    }

    #[test]
    fn display_is_bar_dot_beat() {
        assert_eq!(clock().compute(5 * SPB).to_string(), "2.2");
    }

    #[test]
    #[should_panic(expected = "bpm must be positive")]
    fn rejects_zero_bpm() {
        BeatClock::new(44100, 0.0);
    }

    #[test]
    #[should_panic(expected = "sample_rate must be greater than 0")]
    fn rejects_zero_sample_rate() {
        BeatClock::new(0, 120.0);
    }
}
