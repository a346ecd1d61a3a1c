//! Entry confidence scoring
//!
//! Combines three weakly-correlated signals into one 0-100 confidence:
//! - GPS: distance to the space's reference point
//! - WiFi: exact SSID match against the space's network
//! - Motion: speed consistent with someone walking in or out
//!
//! Missing signals are left out and the configured weights are renormalized
//! over the signals that were supplied, so a client without GPS is judged on
//! WiFi and motion alone instead of being scored zero for GPS.

use crate::domain::error::ValidationError;
use crate::domain::types::SignalScores;
use crate::infra::config::Config;

/// Relative weight of each signal
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalWeights {
    pub gps: u32,
    pub wifi: u32,
    pub motion: u32,
}

/// Thresholds and weights used by the scorer
#[derive(Debug, Clone)]
pub struct ScoringPolicy {
    pub inside_radius_m: f64,
    pub outside_radius_m: f64,
    pub stationary_kmh: f64,
    pub max_speed_kmh: f64,
    pub expected_ssid: String,
    pub weights: SignalWeights,
    pub auto_threshold: u8,
    pub borderline_floor: u8,
}

impl ScoringPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            inside_radius_m: config.inside_radius_m(),
            outside_radius_m: config.outside_radius_m(),
            stationary_kmh: config.stationary_kmh(),
            max_speed_kmh: config.max_speed_kmh(),
            expected_ssid: config.expected_ssid().to_string(),
            weights: SignalWeights {
                gps: config.gps_weight(),
                wifi: config.wifi_weight(),
                motion: config.motion_weight(),
            },
            auto_threshold: config.auto_threshold(),
            borderline_floor: config.borderline_floor(),
        }
    }
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Signals observed for one submission
#[derive(Debug, Clone, Default)]
pub struct SignalInputs {
    pub gps_distance_m: Option<f64>,
    pub wifi_ssid: Option<String>,
    pub speed_kmh: Option<f64>,
    pub manual_confirm: bool,
}

/// Outcome of scoring a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Score reached the auto threshold
    AutoAccepted,
    /// Caller asserted presence; score was not consulted
    ManualConfirmed,
    /// Score fell in the borderline band; caller may resubmit with confirmation
    ManualConfirmationRequired,
    /// Score fell below the borderline band
    ConfidenceTooLow,
}

impl Decision {
    #[inline]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Decision::AutoAccepted | Decision::ManualConfirmed)
    }

    /// Client-facing reason for a rejection
    pub fn rejection_message(&self) -> Option<&'static str> {
        match self {
            Decision::ManualConfirmationRequired => Some("manual confirmation required"),
            Decision::ConfidenceTooLow => Some("confidence too low"),
            Decision::AutoAccepted | Decision::ManualConfirmed => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::AutoAccepted => "auto_accepted",
            Decision::ManualConfirmed => "manual_confirmed",
            Decision::ManualConfirmationRequired => "borderline",
            Decision::ConfidenceTooLow => "too_low",
        }
    }
}

/// Confidence breakdown and decision for one submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assessment {
    pub total: u8,
    pub signals: SignalScores,
    pub decision: Decision,
}

impl Assessment {
    #[inline]
    pub fn accepted(&self) -> bool {
        self.decision.is_accepted()
    }

    /// Accepted events are always logged without further confirmation
    #[inline]
    pub fn auto_logged(&self) -> bool {
        self.decision.is_accepted()
    }
}

/// Linear ramp: 100 up to `full_until`, 0 from `zero_at`, straight line between
#[inline]
fn ramp_down(value: f64, full_until: f64, zero_at: f64) -> f64 {
    if value <= full_until {
        100.0
    } else if value >= zero_at {
        0.0
    } else {
        100.0 * (zero_at - value) / (zero_at - full_until)
    }
}

#[inline]
fn to_score(raw: f64) -> u8 {
    raw.round().clamp(0.0, 100.0) as u8
}

/// Pure scorer; holds no state besides its policy
#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    policy: ScoringPolicy,
}

impl ConfidenceScorer {
    pub fn new(policy: ScoringPolicy) -> Self {
        Self { policy }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(ScoringPolicy::from_config(config))
    }

    pub fn policy(&self) -> &ScoringPolicy {
        &self.policy
    }

    /// Reject inputs that cannot be scored
    pub fn validate(inputs: &SignalInputs) -> Result<(), ValidationError> {
        if let Some(d) = inputs.gps_distance_m {
            if !d.is_finite() || d < 0.0 {
                return Err(ValidationError::InvalidDistance(d));
            }
        }
        if let Some(s) = inputs.speed_kmh {
            if !s.is_finite() || s < 0.0 {
                return Err(ValidationError::InvalidSpeed(s));
            }
        }
        Ok(())
    }

    fn gps_score(&self, distance_m: f64) -> f64 {
        ramp_down(distance_m, self.policy.inside_radius_m, self.policy.outside_radius_m)
    }

    fn wifi_score(&self, ssid: &str) -> f64 {
        if ssid == self.policy.expected_ssid {
            100.0
        } else {
            0.0
        }
    }

    fn motion_score(&self, speed_kmh: f64) -> f64 {
        ramp_down(speed_kmh, self.policy.stationary_kmh, self.policy.max_speed_kmh)
    }

    /// Score a submission and decide whether it is accepted
    pub fn assess(&self, inputs: &SignalInputs) -> Result<Assessment, ValidationError> {
        Self::validate(inputs)?;

        let weights = self.policy.weights;
        let gps = inputs.gps_distance_m.map(|d| self.gps_score(d));
        // An empty SSID is what clients send when not associated with any network
        let wifi = inputs.wifi_ssid.as_deref().filter(|s| !s.is_empty()).map(|s| self.wifi_score(s));
        let motion = inputs.speed_kmh.map(|s| self.motion_score(s));

        // Summed in f64 so no weight combination can overflow
        let mut weighted_sum = 0.0;
        let mut weight_sum = 0.0;
        for (score, weight) in [(gps, weights.gps), (wifi, weights.wifi), (motion, weights.motion)] {
            if let Some(score) = score {
                weighted_sum += score * f64::from(weight);
                weight_sum += f64::from(weight);
            }
        }
        let total = if weight_sum == 0.0 { 0 } else { to_score(weighted_sum / weight_sum) };

        let decision = if inputs.manual_confirm {
            Decision::ManualConfirmed
        } else if total >= self.policy.auto_threshold {
            Decision::AutoAccepted
        } else if total >= self.policy.borderline_floor {
            Decision::ManualConfirmationRequired
        } else {
            Decision::ConfidenceTooLow
        };

        Ok(Assessment {
            total,
            signals: SignalScores {
                gps: gps.map(to_score),
                wifi: wifi.map(to_score),
                motion: motion.map(to_score),
            },
            decision,
        })
    }
}
