use anyhow::Result;

use super::env_or_parse;

/// Thresholds that drive moderation, retirement and feed paging.
///
/// Built once at startup and handed to every service that needs it, so tests can
/// construct their own without touching the process environment.
#[derive(Debug, Clone, Copy)]
pub struct Policy {
    /// A video is banned once `net score - 2 * flags` drops to or below this value.
    pub delete_threshold: i64,
    /// Number of banned videos after which the owner loses post and vote rights.
    pub restrict_threshold: i64,
    pub hall_of_fame_limit: i64,
    pub min_password_length: usize,
    pub search_radius_km: f64,
    pub feed_default_limit: i64,
    pub feed_max_limit: i64,
    pub retirement_age_hours: i64,
}

/// Flag weight relative to a downvote when computing ban pressure.
pub const FLAG_WEIGHT: i64 = 2;

impl Default for Policy {
    fn default() -> Self {
        Self {
            delete_threshold: -4,
            restrict_threshold: 3,
            hall_of_fame_limit: 10,
            min_password_length: 8,
            search_radius_km: 2.5,
            feed_default_limit: 10,
            feed_max_limit: 20,
            retirement_age_hours: 72,
        }
    }
}

impl Policy {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            delete_threshold: env_or_parse("DELETE_THRESHOLD", &defaults.delete_threshold.to_string())?,
            restrict_threshold: env_or_parse(
                "RESTRICT_THRESHOLD",
                &defaults.restrict_threshold.to_string(),
            )?,
            hall_of_fame_limit: env_or_parse(
                "HALL_OF_FAME_LIMIT",
                &defaults.hall_of_fame_limit.to_string(),
            )?,
            min_password_length: env_or_parse(
                "MIN_PASSWORD_LENGTH",
                &defaults.min_password_length.to_string(),
            )?,
            search_radius_km: env_or_parse("SEARCH_RADIUS_KM", &defaults.search_radius_km.to_string())?,
            feed_default_limit: env_or_parse(
                "FEED_DEFAULT_LIMIT",
                &defaults.feed_default_limit.to_string(),
            )?,
            feed_max_limit: env_or_parse("FEED_MAX_LIMIT", &defaults.feed_max_limit.to_string())?,
            retirement_age_hours: env_or_parse(
                "RETIREMENT_AGE_HOURS",
                &defaults.retirement_age_hours.to_string(),
            )?,
        })
    }

    /// True when the combined downvote and flag pressure warrants a ban.
    pub fn exceeds_ban_pressure(&self, net_score: i64, flag_count: i64) -> bool {
        net_score - FLAG_WEIGHT * flag_count <= self.delete_threshold
    }

    pub fn should_restrict(&self, warning_count: i64) -> bool {
        warning_count >= self.restrict_threshold
    }

    /// Clamp a requested page size into `1..=feed_max_limit`.
    pub fn clamp_feed_limit(&self, requested: Option<i64>) -> i64 {
        requested
            .unwrap_or(self.feed_default_limit)
            .clamp(1, self.feed_max_limit)
    }
}
