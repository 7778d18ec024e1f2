//! Conversion and limit model for one rotary encoder

use std::f64::consts::PI;

use snafu::Snafu;

/// Error returned when constructing an [`Encoder`] from invalid geometry
///
/// These are configuration errors: fatal at startup, never retried.
#[derive(Clone, Debug, PartialEq, Snafu)]
pub enum EncoderError {
    /// Resolution must be in (0, 32]
    #[snafu(display("Encoder resolution of {bits} is not within range (0, 32]"))]
    InvalidResolution {
        /// The rejected bit count
        bits: u8,
    },
    /// The safety margin cannot be negative
    #[snafu(display("Safety margin of {margin_rad} rad is below zero"))]
    NegativeSafetyMargin {
        /// The rejected margin
        margin_rad: f64,
    },
    /// The soft limits collapsed or inverted
    #[snafu(display(
        "Invalid range of motion. Safety margin too large or min/max position invalid. \
         lowerSoftLimit: {lower_soft_iu} IU, upperSoftLimit: {upper_soft_iu} IU"
    ))]
    InvalidRangeOfMotion {
        /// Computed lower soft limit
        lower_soft_iu: i32,
        /// Computed upper soft limit
        upper_soft_iu: i32,
    },
}

/// Converts between raw integer units (IU) and radians for one rotary
/// sensor, and holds its calibrated limits
///
/// Hard limits are the mechanical end of travel; soft limits shrink the
/// hard interval by the safety margin and are what actuation targets are
/// validated against. Immutable after construction.
#[derive(Clone, Debug)]
pub struct Encoder {
    total_positions: i64,
    zero_position_iu: i32,
    lower_hard_limit_iu: i32,
    upper_hard_limit_iu: i32,
    lower_soft_limit_iu: i32,
    upper_soft_limit_iu: i32,
}

impl Encoder {
    /// Create an encoder with calibrated limits
    ///
    /// `safety_margin_rad` is subtracted (converted to IU) from both hard
    /// limits to derive the soft interval.
    pub fn new(
        resolution_bits: u8,
        lower_hard_limit_iu: i32,
        upper_hard_limit_iu: i32,
        zero_position_iu: i32,
        safety_margin_rad: f64,
    ) -> Result<Self, EncoderError> {
        if resolution_bits == 0 || resolution_bits > 32 {
            return InvalidResolutionSnafu {
                bits: resolution_bits,
            }
            .fail();
        }
        if safety_margin_rad < 0.0 {
            return NegativeSafetyMarginSnafu {
                margin_rad: safety_margin_rad,
            }
            .fail();
        }

        let total_positions = (1i64 << resolution_bits) - 1;
        let safety_margin_iu =
            (safety_margin_rad * total_positions as f64 / (2.0 * PI)).round() as i32;
        let lower_soft_limit_iu = lower_hard_limit_iu.saturating_add(safety_margin_iu);
        let upper_soft_limit_iu = upper_hard_limit_iu.saturating_sub(safety_margin_iu);

        if lower_soft_limit_iu >= upper_soft_limit_iu {
            return InvalidRangeOfMotionSnafu {
                lower_soft_iu: lower_soft_limit_iu,
                upper_soft_iu: upper_soft_limit_iu,
            }
            .fail();
        }

        Ok(Self {
            total_positions,
            zero_position_iu,
            lower_hard_limit_iu,
            upper_hard_limit_iu,
            lower_soft_limit_iu,
            upper_soft_limit_iu,
        })
    }

    /// Create an encoder used purely for unit conversion
    ///
    /// Incremental encoders accumulate counts without an absolute reference,
    /// so there is nothing meaningful to gate against: the limit interval
    /// spans the whole representable range and the zero position is 0.
    pub fn incremental(resolution_bits: u8) -> Result<Self, EncoderError> {
        Self::new(resolution_bits, i32::MIN, i32::MAX, 0, 0.0)
    }

    /// Convert a raw reading to radians
    pub fn iu_to_rad(&self, iu: i32) -> f64 {
        (iu - self.zero_position_iu) as f64 * 2.0 * PI / self.total_positions as f64
    }

    /// Convert an angle in radians to the nearest raw value
    pub fn rad_to_iu(&self, rad: f64) -> i32 {
        (rad * self.total_positions as f64 / (2.0 * PI)).round() as i32 + self.zero_position_iu
    }

    /// The angle represented by a single count, in radians
    pub fn rad_per_iu(&self) -> f64 {
        2.0 * PI / self.total_positions as f64
    }

    /// Strict membership test against the mechanical limits
    pub fn is_within_hard_limits_iu(&self, position_iu: i32) -> bool {
        position_iu > self.lower_hard_limit_iu && position_iu < self.upper_hard_limit_iu
    }

    /// Strict membership test against the software limits
    pub fn is_within_soft_limits_iu(&self, position_iu: i32) -> bool {
        position_iu > self.lower_soft_limit_iu && position_iu < self.upper_soft_limit_iu
    }

    /// Validate an actuation target against the soft limits
    ///
    /// A target inside the soft interval is always accepted. When the
    /// current position is already at or beyond a soft limit, the target is
    /// accepted only if it moves back toward the interval and does not cross
    /// the opposite soft limit, so an over-limit joint can be recovered but
    /// never pushed further out.
    pub fn is_valid_target_iu(&self, current_iu: i32, target_iu: i32) -> bool {
        if self.is_within_soft_limits_iu(target_iu) {
            return true;
        }

        if current_iu >= self.upper_soft_limit_iu {
            return target_iu <= current_iu && target_iu > self.lower_soft_limit_iu;
        }

        if current_iu <= self.lower_soft_limit_iu {
            return target_iu >= current_iu && target_iu < self.upper_soft_limit_iu;
        }

        false
    }

    /// Lower soft limit in IU
    pub fn lower_soft_limit_iu(&self) -> i32 {
        self.lower_soft_limit_iu
    }

    /// Upper soft limit in IU
    pub fn upper_soft_limit_iu(&self) -> i32 {
        self.upper_soft_limit_iu
    }

    /// Lower hard limit in IU
    pub fn lower_hard_limit_iu(&self) -> i32 {
        self.lower_hard_limit_iu
    }

    /// Upper hard limit in IU
    pub fn upper_hard_limit_iu(&self) -> i32 {
        self.upper_hard_limit_iu
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assertables::assert_in_delta;

    fn encoder() -> Encoder {
        Encoder::new(16, 2000, 40000, 3000, 0.05).unwrap()
    }

    #[test]
    fn soft_limits_inside_hard_limits() {
        let enc = encoder();
        assert!(enc.lower_soft_limit_iu() > enc.lower_hard_limit_iu());
        assert!(enc.upper_soft_limit_iu() < enc.upper_hard_limit_iu());
        assert!(enc.lower_soft_limit_iu() < enc.upper_soft_limit_iu());
    }

    #[test]
    fn invalid_geometry_is_rejected() {
        assert!(matches!(
            Encoder::new(0, 0, 100, 0, 0.0),
            Err(EncoderError::InvalidResolution { .. })
        ));
        assert!(matches!(
            Encoder::new(33, 0, 100, 0, 0.0),
            Err(EncoderError::InvalidResolution { .. })
        ));
        assert!(matches!(
            Encoder::new(16, 0, 100, 0, -0.1),
            Err(EncoderError::NegativeSafetyMargin { .. })
        ));
        // Margin so large the soft interval collapses
        assert!(matches!(
            Encoder::new(16, 2000, 2100, 0, 1.0),
            Err(EncoderError::InvalidRangeOfMotion { .. })
        ));
    }

    #[test]
    fn invariant_holds_for_valid_constructions() {
        for bits in [12u8, 16, 17, 20] {
            for margin in [0.0, 0.01, 0.1] {
                if let Ok(enc) = Encoder::new(bits, 100, 4000, 500, margin) {
                    assert!(enc.lower_soft_limit_iu() < enc.upper_soft_limit_iu());
                }
            }
        }
    }

    #[test]
    fn iu_rad_round_trip() {
        let enc = encoder();
        for iu in [2000, 3000, 12345, 39999] {
            assert_eq!(enc.rad_to_iu(enc.iu_to_rad(iu)), iu);
        }
        for rad in [-0.05, 0.0, 0.7, 2.1] {
            let there_and_back = enc.iu_to_rad(enc.rad_to_iu(rad));
            assert_in_delta!(there_and_back, rad, enc.rad_per_iu());
        }
    }

    #[test]
    fn zero_position_maps_to_zero_rad() {
        let enc = encoder();
        assert_eq!(enc.iu_to_rad(3000), 0.0);
        assert_eq!(enc.rad_to_iu(0.0), 3000);
    }

    #[test]
    fn target_validation_inside_limits() {
        let enc = encoder();
        assert!(enc.is_valid_target_iu(5000, 6000));
        assert!(!enc.is_valid_target_iu(5000, enc.upper_soft_limit_iu()));
        assert!(!enc.is_valid_target_iu(5000, enc.upper_hard_limit_iu() + 1));
    }

    #[test]
    fn target_validation_recovers_from_upper_overshoot() {
        let enc = encoder();
        let over = enc.upper_soft_limit_iu() + 5;
        // Moving back toward the interval is allowed
        assert!(enc.is_valid_target_iu(over, over - 1));
        assert!(enc.is_valid_target_iu(over, over));
        // Moving further out is not
        assert!(!enc.is_valid_target_iu(over, over + 1));
        // Nor is jumping across to beyond the opposite soft limit
        assert!(!enc.is_valid_target_iu(over, enc.lower_soft_limit_iu()));
    }

    #[test]
    fn target_validation_recovers_from_lower_overshoot() {
        let enc = encoder();
        let under = enc.lower_soft_limit_iu() - 5;
        assert!(enc.is_valid_target_iu(under, under + 1));
        assert!(enc.is_valid_target_iu(under, under));
        assert!(!enc.is_valid_target_iu(under, under - 1));
        assert!(!enc.is_valid_target_iu(under, enc.upper_soft_limit_iu()));
    }

    #[test]
    fn boundary_position_accepts_recovery_band() {
        let enc = encoder();
        let at_limit = enc.upper_soft_limit_iu();
        // From exactly the soft limit, anything between the limits and back
        // toward the interval is accepted
        assert!(enc.is_valid_target_iu(at_limit, at_limit - 1));
        assert!(enc.is_valid_target_iu(at_limit, at_limit));
        assert!(!enc.is_valid_target_iu(at_limit, at_limit + 1));
    }
}
