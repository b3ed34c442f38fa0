//! Time-of-day overlay computation.
//!
//! The clock renders a 12-hour face as a horizontal strip of 36 cells
//! (three per hour) at a fixed canvas offset. Each hour is divided into
//! six 10-minute stages; a stage is a row in a fixed finite-state table
//! giving its minute range, a 4-bit mask of lit cells (window anchored at
//! `displayed_hour * 3`, wrapping around the strip), and the stage that
//! follows it. Lit cells take the AM or PM color; unlit cells take the
//! strip background. When the stage wraps back to the first one the
//! displayed hour advances, rolling the date at hour 24.
//!
//! [`compute_overlay`] is pure: the daemon-side controller applies the
//! patches to the guard region and re-arms itself after `next_wake`.

use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, Timelike};

use crate::palette::ColorCode;

/// Canvas x of the leftmost strip cell.
pub const STRIP_LEFT: u32 = 340;

/// Canvas y of the strip row.
pub const STRIP_TOP: u32 = 185;

/// Number of cells in the strip: 12 hours x 3 cells.
pub const STRIP_LEN: u32 = 36;

/// Color of lit cells before noon.
const AM_COLOR: ColorCode = match ColorCode::from_ascii(b'D') {
    Some(code) => code,
    None => panic!("AM color must be a palette member"),
};

/// Color of lit cells from noon on.
const PM_COLOR: ColorCode = match ColorCode::from_ascii(b'E') {
    Some(code) => code,
    None => panic!("PM color must be a palette member"),
};

/// Color of unlit cells.
const BACKGROUND_COLOR: ColorCode = match ColorCode::from_ascii(b'1') {
    Some(code) => code,
    None => panic!("background color must be a palette member"),
};

/// Floor on the re-arm delay. Timer wake-ups can fire slightly before the
/// requested instant; without the floor a wake-up at 09:59:59.9 would
/// recompute the same stage and re-arm for sub-second delays in a tight
/// loop.
pub const MIN_WAKE: Duration = Duration::from_secs(10);

/// One row of the stage table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ClockStage {
    /// First minute-of-hour covered by this stage.
    start_minute: u32,
    /// Last minute-of-hour covered by this stage (inclusive).
    end_minute: u32,
    /// Lit cells within the 4-cell window, most significant bit first.
    mask: u8,
    /// Index of the following stage.
    next: usize,
}

/// The 6-stage-per-hour state machine, keyed by minute-of-hour.
const STAGES: [ClockStage; 6] = [
    ClockStage { start_minute: 0, end_minute: 9, mask: 0b1000, next: 1 },
    ClockStage { start_minute: 10, end_minute: 19, mask: 0b1100, next: 2 },
    ClockStage { start_minute: 20, end_minute: 29, mask: 0b0100, next: 3 },
    ClockStage { start_minute: 30, end_minute: 39, mask: 0b0110, next: 4 },
    ClockStage { start_minute: 40, end_minute: 49, mask: 0b0010, next: 5 },
    ClockStage { start_minute: 50, end_minute: 59, mask: 0b0011, next: 0 },
];

fn stage_for_minute(minute: u32) -> usize {
    // Six 10-minute stages cover every minute of the hour.
    (minute / 10).min(5) as usize
}

/// The desired strip state for one instant, plus when to recompute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayFrame {
    /// Desired color for every strip cell, in canvas coordinates.
    pub patches: Vec<(u32, u32, ColorCode)>,
    /// Delay until the next stage boundary, floored at [`MIN_WAKE`].
    pub next_wake: Duration,
}

/// Compute the overlay for `now`.
#[must_use]
pub fn compute_overlay(now: NaiveDateTime) -> OverlayFrame {
    let hour = now.hour();
    let display_hour = hour % 12;
    let lit_color = if hour >= 12 { PM_COLOR } else { AM_COLOR };

    let stage_index = stage_for_minute(now.minute());
    let stage = STAGES[stage_index];

    // Lit window: four cells anchored at the displayed hour, wrapping.
    let mut lit = [false; STRIP_LEN as usize];
    for bit in 0..4 {
        if stage.mask & (0b1000 >> bit) != 0 {
            lit[((display_hour * 3 + bit) % STRIP_LEN) as usize] = true;
        }
    }

    let patches = (0..STRIP_LEN)
        .map(|cell| {
            let color = if lit[cell as usize] {
                lit_color
            } else {
                BACKGROUND_COLOR
            };
            (STRIP_LEFT + cell, STRIP_TOP, color)
        })
        .collect();

    OverlayFrame {
        patches,
        next_wake: delay_to_next_stage(now, stage_index),
    }
}

/// Delay from `now` to the start of the following stage's minute, with
/// hour advance on stage wrap and date rollover at hour 24.
fn delay_to_next_stage(now: NaiveDateTime, stage_index: usize) -> Duration {
    let next = STAGES[STAGES[stage_index].next];

    let mut hour = now.hour();
    if STAGES[stage_index].next == 0 {
        hour += 1;
    }

    let mut date = now.date();
    if hour >= 24 {
        hour %= 24;
        date = next_day(date);
    }

    let target = date
        .and_hms_opt(hour, next.start_minute, 0)
        .unwrap_or_else(|| now + chrono::Duration::seconds(MIN_WAKE.as_secs() as i64));

    let seconds = (target - now).num_seconds().max(MIN_WAKE.as_secs() as i64);
    Duration::from_secs(seconds as u64)
}

fn next_day(date: NaiveDate) -> NaiveDate {
    date.succ_opt().unwrap_or(date)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn at(y: i32, m: u32, d: u32, hh: u32, mm: u32, ss: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(hh, mm, ss)
            .unwrap()
    }

    fn lit_cells(frame: &OverlayFrame) -> Vec<u32> {
        frame
            .patches
            .iter()
            .filter(|(_, _, color)| *color != BACKGROUND_COLOR)
            .map(|(x, _, _)| x - STRIP_LEFT)
            .collect()
    }

    #[test]
    fn strip_covers_every_cell() {
        let frame = compute_overlay(at(2024, 6, 1, 9, 5, 0));
        assert_eq!(frame.patches.len(), STRIP_LEN as usize);
        assert!(frame.patches.iter().all(|&(_, y, _)| y == STRIP_TOP));
    }

    #[test]
    fn stage_masks_follow_the_minute() {
        // 09:05 is stage 0 (mask 1000): only cell 27 lit.
        assert_eq!(lit_cells(&compute_overlay(at(2024, 6, 1, 9, 5, 0))), vec![27]);
        // 09:15 is stage 1 (mask 1100): cells 27 and 28.
        assert_eq!(
            lit_cells(&compute_overlay(at(2024, 6, 1, 9, 15, 0))),
            vec![27, 28]
        );
        // 09:55 is stage 5 (mask 0011): cells 29 and 30.
        assert_eq!(
            lit_cells(&compute_overlay(at(2024, 6, 1, 9, 55, 0))),
            vec![29, 30]
        );
    }

    #[test]
    fn window_wraps_around_the_strip() {
        // 11:55, mask 0011 anchored at cell 33: cells 35 and 0.
        assert_eq!(
            lit_cells(&compute_overlay(at(2024, 6, 1, 11, 55, 0))),
            vec![0, 35]
        );
    }

    #[test]
    fn am_and_pm_use_different_colors() {
        let am = compute_overlay(at(2024, 6, 1, 9, 5, 0));
        let pm = compute_overlay(at(2024, 6, 1, 21, 5, 0));
        let am_lit = am.patches.iter().find(|(_, _, c)| *c != BACKGROUND_COLOR);
        let pm_lit = pm.patches.iter().find(|(_, _, c)| *c != BACKGROUND_COLOR);
        assert_eq!(am_lit.unwrap().2, AM_COLOR);
        assert_eq!(pm_lit.unwrap().2, PM_COLOR);
    }

    #[test]
    fn wake_delay_targets_next_stage_boundary() {
        // 09:02:00 -> next boundary 09:10:00 = 480s.
        let frame = compute_overlay(at(2024, 6, 1, 9, 2, 0));
        assert_eq!(frame.next_wake, Duration::from_secs(480));
    }

    #[test]
    fn wake_delay_is_floored_near_a_boundary() {
        // 09:59:58 is 2s from the boundary; the floor wins.
        let frame = compute_overlay(at(2024, 6, 1, 9, 59, 58));
        assert!(frame.next_wake >= MIN_WAKE);
        assert_eq!(frame.next_wake, MIN_WAKE);
    }

    #[test]
    fn hour_advances_on_stage_wrap() {
        // 10:55:00, stage 5 wraps: next boundary is 11:00:00 = 300s.
        let frame = compute_overlay(at(2024, 6, 1, 10, 55, 0));
        assert_eq!(frame.next_wake, Duration::from_secs(300));
    }

    #[test]
    fn day_rolls_over_at_hour_24() {
        // 23:58:00 -> next boundary 00:00:00 next day = 120s.
        let frame = compute_overlay(at(2024, 6, 1, 23, 58, 0));
        assert_eq!(frame.next_wake, Duration::from_secs(120));
    }
}
