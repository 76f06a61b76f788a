use crate::config::LimiterConfig;
use crate::controller::CurrentLimit;
use crate::display::Content;

/// Result of incrementing the selected digit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DigitChange {
    Accepted,
    /// The composed value would exceed the maximum; the digit was reset to 0.
    Rejected,
}

/// Digit-by-digit editor for a current limit.
///
/// Digits roll over from 9 to 0 without carrying. The selection starts on the
/// most significant digit and moves toward the ones digit, wrapping around.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DigitEditor {
    value: u32,
    selected: u8,
    width: u8,
    max: u32,
}

impl DigitEditor {
    #[must_use]
    pub fn new(start: CurrentLimit, cfg: &LimiterConfig) -> Self {
        Self {
            value: u32::from(start.milliamps()),
            selected: 0,
            width: cfg.current_digits(),
            max: u32::from(cfg.max_current_ma),
        }
    }

    fn place(&self) -> u32 {
        10u32.pow(u32::from(self.width - 1 - self.selected))
    }

    #[must_use]
    pub fn digit(&self) -> u8 {
        u8::try_from(self.value / self.place() % 10).unwrap_or(0)
    }

    /// Index of the selected digit, 0 being the most significant.
    #[must_use]
    pub const fn selected(&self) -> u8 {
        self.selected
    }

    pub fn increment(&mut self) -> DigitChange {
        let place = self.place();
        let digit = self.value / place % 10;
        let cleared = self.value - digit * place;
        let candidate = cleared + (digit + 1) % 10 * place;
        if candidate > self.max {
            self.value = cleared;
            DigitChange::Rejected
        } else {
            self.value = candidate;
            DigitChange::Accepted
        }
    }

    pub fn advance(&mut self) {
        self.selected = (self.selected + 1) % self.width;
    }

    #[must_use]
    pub fn milliamps(&self) -> u16 {
        u16::try_from(self.value).unwrap_or(0)
    }

    /// Composed value. Always within the configured range.
    #[must_use]
    pub fn limit(&self, cfg: &LimiterConfig) -> CurrentLimit {
        CurrentLimit::new(self.milliamps(), cfg).unwrap_or(CurrentLimit::ZERO)
    }

    #[must_use]
    pub fn content(&self) -> Content<'static> {
        Content::Digits {
            value: self.milliamps(),
            selected: self.selected,
            width: self.width,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CFG: LimiterConfig = LimiterConfig::DEFAULT;

    fn editor(milliamps: u16) -> DigitEditor {
        DigitEditor::new(CurrentLimit::new(milliamps, &CFG).unwrap(), &CFG)
    }

    #[test]
    fn digits_roll_over_without_carry() {
        let mut edit = editor(0);
        for _ in 0..4 {
            edit.advance();
        }
        for _ in 0..9 {
            edit.increment();
        }
        assert_eq!(edit.milliamps(), 9);
        assert_eq!(edit.increment(), DigitChange::Accepted);
        assert_eq!(edit.milliamps(), 0);
    }

    #[test]
    fn selection_moves_toward_ones_and_wraps() {
        let mut edit = editor(0);
        assert_eq!(edit.selected(), 0);
        for expected in [1, 2, 3, 4, 0] {
            edit.advance();
            assert_eq!(edit.selected(), expected);
        }
    }

    #[test]
    fn exceeding_maximum_resets_digit_to_zero() {
        let mut edit = editor(9_500);
        assert_eq!(edit.increment(), DigitChange::Rejected);
        assert_eq!(edit.milliamps(), 9_500);
        assert_eq!(edit.digit(), 0);

        let mut edit = editor(2_500);
        edit.advance();
        edit.advance();
        for _ in 0..4 {
            edit.increment();
        }
        assert_eq!(edit.milliamps(), 2_900);
    }

    #[test]
    fn never_composes_value_above_maximum() {
        for start in (0..=CFG.max_current_ma).step_by(373) {
            let mut edit = editor(start);
            for step in 0..200u32 {
                if step % 7 == 0 {
                    edit.advance();
                } else {
                    edit.increment();
                }
                assert!(edit.milliamps() <= CFG.max_current_ma);
            }
        }
    }

    #[test]
    fn rejected_increment_leaves_zero_not_prior_digit() {
        let mut edit = editor(10_000);
        assert_eq!(edit.increment(), DigitChange::Rejected);
        assert_eq!(edit.milliamps(), 0);
    }
}
