//! Frame clock: pause state, frame counting and FPS.
//!
//! The simulation does not integrate wall-clock time. Each frame it is handed
//! a fixed step derived from the grid (see [`app_time_step`]) and the solver's
//! accumulator decides whether that step is applied. Wall-clock time is only
//! used for the FPS readout.

use std::time::{Duration, Instant};

use crate::grid::GridSize;

/// Per-frame step the demo hands to the fluid: `2 / y` for volumetric grids,
/// `1 / y` for 2-D grids, zero while paused.
pub fn app_time_step(size: GridSize, paused: bool) -> f32 {
    if paused {
        return 0.0;
    }
    let cells = if size.is_volumetric() { 2.0 } else { 1.0 };
    cells / size.y as f32
}

#[derive(Debug)]
pub struct FrameClock {
    grid: GridSize,
    paused: bool,
    frame_count: u64,
    fps: f32,
    fps_frame_count: u64,
    fps_update_time: Instant,
    fps_update_interval: Duration,
}

impl FrameClock {
    pub fn new(grid: GridSize) -> Self {
        Self {
            grid,
            paused: false,
            frame_count: 0,
            fps: 0.0,
            fps_frame_count: 0,
            fps_update_time: Instant::now(),
            fps_update_interval: Duration::from_millis(500),
        }
    }

    /// Count a frame and return its time step.
    pub fn tick(&mut self) -> f32 {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> f32 {
        self.frame_count += 1;

        let fps_elapsed = now.saturating_duration_since(self.fps_update_time);
        if fps_elapsed >= self.fps_update_interval {
            let frames_since = self.frame_count - self.fps_frame_count;
            self.fps = frames_since as f32 / fps_elapsed.as_secs_f32();
            self.fps_frame_count = self.frame_count;
            self.fps_update_time = now;
        }

        app_time_step(self.grid, self.paused)
    }

    #[inline]
    pub fn frame(&self) -> u64 {
        self.frame_count
    }

    #[inline]
    pub fn fps(&self) -> f32 {
        self.fps
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_time_step() {
        assert_eq!(app_time_step(GridSize::new(128, 128, 128), false), 2.0 / 128.0);
        assert_eq!(app_time_step(GridSize::new(256, 64, 1), false), 1.0 / 64.0);
        assert_eq!(app_time_step(GridSize::new(64, 64, 64), true), 0.0);
    }

    #[test]
    fn test_pause_zeroes_step() {
        let mut clock = FrameClock::new(GridSize::new(64, 64, 1));
        assert!(clock.tick() > 0.0);
        clock.toggle_pause();
        assert_eq!(clock.tick(), 0.0);
        assert!(clock.is_paused());
        clock.toggle_pause();
        assert!(clock.tick() > 0.0);
        assert_eq!(clock.frame(), 3);
    }

    #[test]
    fn test_fps_updates_after_interval() {
        let mut clock = FrameClock::new(GridSize::default());
        let start = clock.fps_update_time;
        for i in 1..=30 {
            clock.tick_at(start + Duration::from_millis(i * 20));
        }
        // 25 frames landed in the first 500ms window.
        assert!((clock.fps() - 50.0).abs() < 0.5, "fps = {}", clock.fps());
    }
}
