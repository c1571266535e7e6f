//! Carry and flight-shape calculation from measured launch conditions.
//!
//! Every call builds fresh simulators, so one `TrajectoryCalculator` can be
//! shared across threads.

mod flight;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

pub use flight::{
    Atmosphere, FlightError, FlightSimulator, LaunchState, Vector3, BALL_DIAMETER_M,
    BALL_MASS_KG, MAX_FLIGHT_SECONDS, TIME_STEP,
};

pub const DEFAULT_TEMPERATURE_F: f64 = 70.0;
pub const DEFAULT_ELEVATION_FT: f64 = 0.0;
pub const DEFAULT_WIND_SPEED_MPH: f64 = 0.0;
pub const DEFAULT_WIND_DIRECTION_DEG: f64 = 0.0;
pub const DEFAULT_WIND_HEIGHT_FT: f64 = 0.0;
pub const DEFAULT_HUMIDITY_PERCENT: f64 = 50.0;
pub const DEFAULT_PRESSURE_INHG: f64 = 29.92;

pub const SUCCESS_MESSAGE: &str = "Calculated with Nathan golf ball aerodynamics";
pub const INVALID_INPUT_MESSAGE: &str = "Invalid input parameters";
pub const CALCULATION_ERROR_PREFIX: &str = "flight calculation error: ";

/// Launch conditions plus optional weather. Unset weather fields take the
/// `DEFAULT_*` values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryInput {
    pub initial_velocity_mph: f64,
    pub vertical_launch_angle_deg: f64,
    pub horizontal_launch_angle_deg: f64,
    pub backspin_rpm: f64,
    pub sidespin_rpm: f64,
    #[serde(default)]
    pub temperature_f: Option<f64>,
    #[serde(default)]
    pub elevation_ft: Option<f64>,
    #[serde(default)]
    pub wind_speed_mph: Option<f64>,
    #[serde(default)]
    pub wind_direction_deg: Option<f64>,
    #[serde(default)]
    pub humidity_percent: Option<f64>,
    #[serde(default)]
    pub pressure_inhg: Option<f64>,
}

impl TrajectoryInput {
    pub fn new(
        initial_velocity_mph: f64,
        vertical_launch_angle_deg: f64,
        horizontal_launch_angle_deg: f64,
        backspin_rpm: f64,
        sidespin_rpm: f64,
    ) -> Self {
        Self {
            initial_velocity_mph,
            vertical_launch_angle_deg,
            horizontal_launch_angle_deg,
            backspin_rpm,
            sidespin_rpm,
            temperature_f: None,
            elevation_ft: None,
            wind_speed_mph: None,
            wind_direction_deg: None,
            humidity_percent: None,
            pressure_inhg: None,
        }
    }

    fn launch_state(&self) -> LaunchState {
        LaunchState {
            position: Vector3::ZERO,
            speed_mph: self.initial_velocity_mph,
            launch_angle_deg: self.vertical_launch_angle_deg,
            direction_deg: self.horizontal_launch_angle_deg,
            backspin_rpm: self.backspin_rpm,
            sidespin_rpm: self.sidespin_rpm,
        }
    }

    fn atmosphere(&self) -> Atmosphere {
        Atmosphere {
            temperature_f: self.temperature_f.unwrap_or(DEFAULT_TEMPERATURE_F),
            elevation_ft: self.elevation_ft.unwrap_or(DEFAULT_ELEVATION_FT),
            wind_speed_mph: self.wind_speed_mph.unwrap_or(DEFAULT_WIND_SPEED_MPH),
            wind_direction_deg: self
                .wind_direction_deg
                .unwrap_or(DEFAULT_WIND_DIRECTION_DEG),
            wind_height_ft: DEFAULT_WIND_HEIGHT_FT,
            humidity_percent: self.humidity_percent.unwrap_or(DEFAULT_HUMIDITY_PERCENT),
            pressure_inhg: self.pressure_inhg.unwrap_or(DEFAULT_PRESSURE_INHG),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrajectoryResult {
    pub carry_distance_yards: f64,
    pub flight_time_seconds: f64,
    pub max_height_yards: f64,
    pub landing_angle_deg: f64,
    pub calculation_successful: bool,
    pub message: String,
}

impl TrajectoryResult {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            carry_distance_yards: 0.0,
            flight_time_seconds: 0.0,
            max_height_yards: 0.0,
            landing_angle_deg: 0.0,
            calculation_successful: false,
            message: message.into(),
        }
    }
}

/// Plausibility window for measured launch conditions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrajectoryLimits {
    pub min_speed_mph: f64,
    pub max_speed_mph: f64,
    pub min_launch_angle_deg: f64,
    pub max_launch_angle_deg: f64,
    pub max_side_angle_deg: f64,
    pub max_spin_rpm: f64,
}

impl Default for TrajectoryLimits {
    fn default() -> Self {
        Self {
            min_speed_mph: 50.0,
            max_speed_mph: 250.0,
            min_launch_angle_deg: -10.0,
            max_launch_angle_deg: 60.0,
            max_side_angle_deg: 45.0,
            max_spin_rpm: 10_000.0,
        }
    }
}

impl TrajectoryLimits {
    pub fn validate(&self) -> Result<()> {
        if !(self.min_speed_mph > 0.0 && self.min_speed_mph < self.max_speed_mph) {
            return Err(anyhow!(
                "trajectory speed range {}..{} mph is invalid",
                self.min_speed_mph,
                self.max_speed_mph
            ));
        }
        if self.min_launch_angle_deg >= self.max_launch_angle_deg
            || self.max_launch_angle_deg > 90.0
            || self.min_launch_angle_deg < -90.0
        {
            return Err(anyhow!(
                "trajectory launch angle range {}..{} deg is invalid",
                self.min_launch_angle_deg,
                self.max_launch_angle_deg
            ));
        }
        if !(self.max_side_angle_deg > 0.0 && self.max_side_angle_deg <= 90.0) {
            return Err(anyhow!("trajectory max_side_angle_deg must be within (0, 90]"));
        }
        if !(self.max_spin_rpm > 0.0) {
            return Err(anyhow!("trajectory max_spin_rpm must be positive"));
        }
        Ok(())
    }

    /// Describe the first limit the input breaks, if any.
    fn violation(&self, input: &TrajectoryInput) -> Option<String> {
        let speed = input.initial_velocity_mph;
        if !(self.min_speed_mph..=self.max_speed_mph).contains(&speed) {
            return Some(format!(
                "speed {} mph outside {}..{}",
                speed, self.min_speed_mph, self.max_speed_mph
            ));
        }
        let vertical = input.vertical_launch_angle_deg;
        if !(self.min_launch_angle_deg..=self.max_launch_angle_deg).contains(&vertical) {
            return Some(format!(
                "vertical launch angle {} deg outside {}..{}",
                vertical, self.min_launch_angle_deg, self.max_launch_angle_deg
            ));
        }
        // NaN fails every comparison, so test for the accepted case.
        if !(input.horizontal_launch_angle_deg.abs() <= self.max_side_angle_deg) {
            return Some(format!(
                "horizontal launch angle {} deg exceeds {}",
                input.horizontal_launch_angle_deg, self.max_side_angle_deg
            ));
        }
        for (label, rpm) in [
            ("backspin", input.backspin_rpm),
            ("sidespin", input.sidespin_rpm),
        ] {
            if !(rpm.abs() <= self.max_spin_rpm) {
                return Some(format!(
                    "{} {} rpm exceeds {}",
                    label, rpm, self.max_spin_rpm
                ));
            }
        }
        None
    }
}

#[derive(Clone, Debug, Default)]
pub struct TrajectoryCalculator {
    limits: TrajectoryLimits,
}

impl TrajectoryCalculator {
    pub fn new(limits: TrajectoryLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &TrajectoryLimits {
        &self.limits
    }

    /// All-or-nothing: one out-of-range value rejects the whole shot.
    pub fn validate_input(&self, input: &TrajectoryInput) -> bool {
        self.limits.violation(input).is_none()
    }

    /// Fill every unset weather field.
    pub fn apply_defaults(&self, input: &TrajectoryInput) -> TrajectoryInput {
        let atmosphere = input.atmosphere();
        TrajectoryInput {
            temperature_f: Some(atmosphere.temperature_f),
            elevation_ft: Some(atmosphere.elevation_ft),
            wind_speed_mph: Some(atmosphere.wind_speed_mph),
            wind_direction_deg: Some(atmosphere.wind_direction_deg),
            humidity_percent: Some(atmosphere.humidity_percent),
            pressure_inhg: Some(atmosphere.pressure_inhg),
            ..input.clone()
        }
    }

    pub fn calculate_carry(&self, input: &TrajectoryInput) -> TrajectoryResult {
        if let Some(reason) = self.limits.violation(input) {
            log::warn!("TrajectoryCalculator: rejected shot: {}", reason);
            return TrajectoryResult::failure(format!("{}: {}", INVALID_INPUT_MESSAGE, reason));
        }
        let input = self.apply_defaults(input);

        match self.integrate(&input) {
            Ok(result) => {
                log::debug!(
                    "TrajectoryCalculator: carry {:.1} yd, {:.2}s, apex {:.1} yd",
                    result.carry_distance_yards,
                    result.flight_time_seconds,
                    result.max_height_yards
                );
                result
            }
            Err(err) => {
                log::error!("TrajectoryCalculator: {}", err);
                TrajectoryResult::failure(format!("{}{}", CALCULATION_ERROR_PREFIX, err))
            }
        }
    }

    /// `[side, forward, height]` samples in yards, `TIME_STEP` apart. Empty
    /// when the input is rejected or the flight cannot be integrated.
    pub fn calculate_full_trajectory(&self, input: &TrajectoryInput) -> Vec<[f64; 3]> {
        if let Some(reason) = self.limits.violation(input) {
            log::warn!("TrajectoryCalculator: rejected shot: {}", reason);
            return Vec::new();
        }
        let input = self.apply_defaults(input);
        match FlightSimulator::new(&input.launch_state(), &input.atmosphere()).run_path() {
            Ok(path) => path.into_iter().map(Vector3::to_array).collect(),
            Err(err) => {
                log::error!("TrajectoryCalculator: {}", err);
                Vec::new()
            }
        }
    }

    fn integrate(&self, input: &TrajectoryInput) -> Result<TrajectoryResult, FlightError> {
        let launch = input.launch_state();
        let atmosphere = input.atmosphere();
        // Separate runs: one stops at the ground, the other keeps the path.
        let landing = FlightSimulator::new(&launch, &atmosphere).run_landing()?;
        let path = FlightSimulator::new(&launch, &atmosphere).run_path()?;

        let carry = landing.y;
        let flight_time = path
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, point)| point.y >= carry)
            .map(|(index, _)| index as f64 * TIME_STEP)
            .unwrap_or(path.len() as f64 * TIME_STEP);
        let max_height = path.iter().fold(0.0_f64, |max, point| max.max(point.z));
        let landing_angle = match path.as_slice() {
            [.., before, last] => (last.z - before.z).atan2(last.y - before.y).to_degrees(),
            _ => 0.0,
        };

        Ok(TrajectoryResult {
            carry_distance_yards: carry,
            flight_time_seconds: flight_time,
            max_height_yards: max_height,
            landing_angle_deg: landing_angle,
            calculation_successful: true,
            message: SUCCESS_MESSAGE.to_string(),
        })
    }
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> TrajectoryInput {
        TrajectoryInput::new(165.0, 12.0, 0.0, 2600.0, 200.0)
    }

    #[test]
    fn accepts_typical_driver() {
        assert!(TrajectoryCalculator::default().validate_input(&driver()));
    }

    #[test]
    fn rejects_each_out_of_range_value() {
        let calc = TrajectoryCalculator::default();
        let cases = [
            TrajectoryInput {
                initial_velocity_mph: -5.0,
                ..driver()
            },
            TrajectoryInput {
                vertical_launch_angle_deg: 90.0,
                ..driver()
            },
            TrajectoryInput {
                horizontal_launch_angle_deg: 50.0,
                ..driver()
            },
            TrajectoryInput {
                backspin_rpm: 1_000_000.0,
                ..driver()
            },
            TrajectoryInput {
                sidespin_rpm: -10_001.0,
                ..driver()
            },
            TrajectoryInput {
                horizontal_launch_angle_deg: f64::NAN,
                ..driver()
            },
        ];
        for input in &cases {
            assert!(!calc.validate_input(input), "{:?}", input);
        }
    }

    #[test]
    fn limits_are_inclusive() {
        let calc = TrajectoryCalculator::default();
        let edge = TrajectoryInput {
            initial_velocity_mph: 250.0,
            vertical_launch_angle_deg: -10.0,
            horizontal_launch_angle_deg: -45.0,
            backspin_rpm: 10_000.0,
            sidespin_rpm: -10_000.0,
            ..driver()
        };
        assert!(calc.validate_input(&edge));
    }

    #[test]
    fn defaults_fill_only_missing_fields() {
        let calc = TrajectoryCalculator::default();
        let input = TrajectoryInput {
            temperature_f: Some(95.0),
            ..driver()
        };
        let filled = calc.apply_defaults(&input);
        assert_eq!(filled.temperature_f, Some(95.0));
        assert_eq!(filled.elevation_ft, Some(DEFAULT_ELEVATION_FT));
        assert_eq!(filled.humidity_percent, Some(DEFAULT_HUMIDITY_PERCENT));
        assert_eq!(filled.pressure_inhg, Some(DEFAULT_PRESSURE_INHG));
        assert_eq!(filled.initial_velocity_mph, input.initial_velocity_mph);
    }

    #[test]
    fn driver_metrics_are_consistent() {
        let result = TrajectoryCalculator::default().calculate_carry(&driver());
        assert!(result.calculation_successful, "{}", result.message);
        assert_eq!(result.message, SUCCESS_MESSAGE);
        assert!(result.carry_distance_yards > 200.0);
        assert!(result.flight_time_seconds > 4.0 && result.flight_time_seconds < 10.0);
        assert!(result.max_height_yards > 10.0);
        assert!(result.landing_angle_deg < 0.0);
    }

    #[test]
    fn invalid_shot_reports_failure() {
        let input = TrajectoryInput {
            initial_velocity_mph: 300.0,
            ..driver()
        };
        let result = TrajectoryCalculator::default().calculate_carry(&input);
        assert!(!result.calculation_successful);
        assert_eq!(result.carry_distance_yards, 0.0);
        assert!(result.message.starts_with(INVALID_INPUT_MESSAGE));
    }

    #[test]
    fn integration_fault_becomes_failure_result() {
        // Passes the range checks but poisons the air density.
        let input = TrajectoryInput {
            temperature_f: Some(f64::NAN),
            ..driver()
        };
        let result = TrajectoryCalculator::default().calculate_carry(&input);
        assert!(!result.calculation_successful);
        assert_eq!(result.carry_distance_yards, 0.0);
        assert!(result.message.starts_with(CALCULATION_ERROR_PREFIX));
        assert!(TrajectoryCalculator::default()
            .calculate_full_trajectory(&input)
            .is_empty());
    }

    #[test]
    fn full_trajectory_starts_at_origin_and_matches_carry() {
        let calc = TrajectoryCalculator::default();
        let path = calc.calculate_full_trajectory(&driver());
        let carry = calc.calculate_carry(&driver()).carry_distance_yards;
        assert_eq!(path.first(), Some(&[0.0, 0.0, 0.0]));
        let last = path.last().expect("path has samples");
        assert!(last[2] < 0.0);
        assert!(last[1] >= carry);
    }

    #[test]
    fn full_trajectory_is_empty_for_rejected_shot() {
        let input = TrajectoryInput {
            vertical_launch_angle_deg: 75.0,
            ..driver()
        };
        assert!(TrajectoryCalculator::default()
            .calculate_full_trajectory(&input)
            .is_empty());
    }

    #[test]
    fn tighter_limits_reject_slow_shots() {
        let calc = TrajectoryCalculator::new(TrajectoryLimits {
            min_speed_mph: 170.0,
            ..TrajectoryLimits::default()
        });
        assert!(!calc.validate_input(&driver()));
    }

    #[test]
    fn inverted_limits_fail_validation() {
        let limits = TrajectoryLimits {
            min_speed_mph: 200.0,
            max_speed_mph: 100.0,
            ..TrajectoryLimits::default()
        };
        assert!(limits.validate().is_err());
        assert!(TrajectoryLimits::default().validate().is_ok());
    }
}
