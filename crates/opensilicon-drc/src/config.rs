use serde::{Deserialize, Serialize};

use crate::error::DrcError;

/// Environment variable that forces whole-square redisplay after every
/// recheck, bypassing the error diff.
pub const FULL_REDISPLAY_ENV: &str = "OPENSILICON_DRC_FULL_REDISPLAY";

/// Default hierarchy depth guard.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// User-facing checker settings. Unset values are derived from the rule
/// deck when a checker is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DrcConfig {
    /// Checkerboard step. Defaults to 16 halos (64 when the halo is zero).
    pub step_size: Option<i64>,
    /// Interaction radius. Defaults to the largest rule distance.
    pub halo: Option<i64>,
    /// Redisplay the whole square after each recheck.
    pub display_check_tiles: bool,
    /// Skip the diff and redisplay the whole square.
    pub force_full_redisplay: bool,
    pub max_depth: usize,
}

impl Default for DrcConfig {
    fn default() -> Self {
        Self {
            step_size: None,
            halo: None,
            display_check_tiles: false,
            force_full_redisplay: false,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Settings fixed for the lifetime of a checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub step: i64,
    pub halo: i64,
    pub display_check_tiles: bool,
    pub force_full_redisplay: bool,
    pub max_depth: usize,
}

impl DrcConfig {
    pub fn from_json(json: &str) -> Result<Self, DrcError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_step(mut self, step: i64) -> Self {
        self.step_size = Some(step);
        self
    }

    pub fn with_halo(mut self, halo: i64) -> Self {
        self.halo = Some(halo);
        self
    }

    /// Fill in derived values. `max_rule_distance` is the largest distance
    /// any rule looks across; the halo may not be smaller.
    pub fn resolve(&self, max_rule_distance: i64) -> Result<ResolvedConfig, DrcError> {
        let halo = match self.halo {
            Some(h) if h < 0 => {
                return Err(DrcError::InvalidConfig(format!("halo {} is negative", h)));
            }
            Some(h) if h < max_rule_distance => {
                return Err(DrcError::InvalidConfig(format!(
                    "halo {} is smaller than the largest rule distance {}",
                    h, max_rule_distance
                )));
            }
            Some(h) => h,
            None => max_rule_distance.max(0),
        };

        let step = match self.step_size {
            Some(s) if s < 0 => {
                return Err(DrcError::InvalidConfig(format!("step size {} is negative", s)));
            }
            Some(s) if s > 0 => s,
            _ if halo > 0 => 16 * halo,
            _ => 64,
        };
        if step < 16 {
            log::warn!("DRC step size {} is very small; checking will be slow", step);
        }

        let max_depth = if self.max_depth == 0 {
            DEFAULT_MAX_DEPTH
        } else {
            self.max_depth
        };

        Ok(ResolvedConfig {
            step,
            halo,
            display_check_tiles: self.display_check_tiles,
            force_full_redisplay: self.force_full_redisplay || env_flag(FULL_REDISPLAY_ENV),
            max_depth,
        })
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).map_or(false, |v| !v.is_empty() && v != "0")
}
