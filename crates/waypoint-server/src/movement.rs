//! Anti-abuse movement validation.
//!
//! Clients report their own position and velocity. A report is accepted only
//! when it arrives inside the expected time window, its velocity uses the
//! server's discrete speed unit, the implied speed since the last accepted
//! position is plausible, and the player has been heartbeating.

use std::time::Instant;

use crate::config::MovementConfig;
use crate::player::Player;

/// Which kind of report is being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Client-initiated full sync on the heartbeat cadence. Advances the
    /// window anchor.
    Synchronous,
    /// Sync triggered by a velocity change. Only bounded from above and
    /// leaves the anchor alone.
    Asynchronous,
}

/// Position and velocity claimed by a client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementReport {
    pub x: f64,
    pub y: f64,
    pub dx: f64,
    pub dy: f64,
}

#[derive(Debug, Clone)]
pub struct MovementValidator {
    config: MovementConfig,
}

impl MovementValidator {
    pub fn new(config: MovementConfig) -> Self {
        Self { config }
    }

    /// Recompute `player.responsive` from the time since the last heartbeat.
    pub fn refresh_responsiveness(&self, player: &mut Player, now: Instant) -> bool {
        let elapsed = now
            .saturating_duration_since(player.last_response)
            .as_secs_f64();
        player.responsive = (elapsed * 10.0).round() <= f64::from(self.config.responsive_tenths);
        player.responsive
    }

    /// Judge a report and apply it to `player`. Returns whether the position
    /// was accepted. Velocity is recorded either way.
    pub fn evaluate(
        &self,
        player: &mut Player,
        report: MovementReport,
        mode: SyncMode,
        now: Instant,
    ) -> bool {
        let elapsed = now
            .saturating_duration_since(player.last_response)
            .as_secs_f64();
        let t = (elapsed * 100.0).round() / 100.0;

        let accepted = self.judge(player, &report, mode, t);
        if accepted {
            player.x = report.x;
            player.y = report.y;
            player.lx = report.x;
            player.ly = report.y;
        } else {
            // A rejected jump must not become the baseline for the next report
            player.lx = player.x;
            player.ly = player.y;
        }

        player.dx = report.dx;
        player.dy = report.dy;

        if mode == SyncMode::Synchronous {
            player.last_response = now;
        }

        accepted
    }

    fn judge(&self, player: &Player, report: &MovementReport, mode: SyncMode, t: f64) -> bool {
        let in_window = match mode {
            SyncMode::Synchronous => {
                t >= self.config.sync_window_min && t <= self.config.sync_window_max
            },
            SyncMode::Asynchronous => t <= self.config.async_window_max,
        };

        in_window
            && self.is_valid_delta(report.dx)
            && self.is_valid_delta(report.dy)
            && self.within_speed((player.lx - report.x).abs(), t)
            && self.within_speed((player.ly - report.y).abs(), t)
            && player.responsive
    }

    /// Only standing still or moving at exactly the configured speed.
    fn is_valid_delta(&self, d: f64) -> bool {
        d == 0.0 || d.abs() == self.config.speed
    }

    fn within_speed(&self, displacement: f64, t: f64) -> bool {
        if t <= 0.0 {
            return false;
        }
        displacement / t <= self.config.speed * 100.0
    }
}
