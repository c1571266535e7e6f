//! Golf ball flight integrator.
//!
//! Aerodynamics follow Nathan's golf model: drag and lift coefficients are
//! linear/power functions of the spin factor `S = r|w| / |v|`, spin decays
//! exponentially with a speed-dependent time constant, and air density comes
//! from temperature, pressure, elevation and relative humidity. The state is
//! integrated in SI units with fixed-step RK4; every position handed back to
//! callers is in yards with x = side, y = forward and z = height.

use std::ops::{Add, Mul, Sub};

use serde::Serialize;
use thiserror::Error;

/// Integration step in seconds.
pub const TIME_STEP: f64 = 0.01;
/// A flight still airborne after this many seconds is rejected.
pub const MAX_FLIGHT_SECONDS: f64 = 30.0;

pub const BALL_MASS_KG: f64 = 0.04593;
pub const BALL_DIAMETER_M: f64 = 0.04267;

const GRAVITY: f64 = 9.80665;
const MPH_TO_MPS: f64 = 0.44704;
const FEET_TO_METERS: f64 = 0.3048;
const YARDS_TO_METERS: f64 = 0.9144;
const RPM_TO_RAD_PER_SEC: f64 = std::f64::consts::PI / 30.0;

const DRAG_BASE: f64 = 0.171;
const DRAG_SPIN: f64 = 0.62;
const LIFT_SCALE: f64 = 0.54;
const LIFT_EXPONENT: f64 = 0.4;
const SPIN_DECAY: f64 = 0.00002;

#[derive(Debug, Error, PartialEq)]
pub enum FlightError {
    #[error("state became non-finite at t={time:.2}s")]
    NonFinite { time: f64 },
    #[error("ball still airborne after {seconds:.0}s")]
    NoLanding { seconds: f64 },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn dot(&self, other: &Vector3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(&self, other: &Vector3) -> Vector3 {
        Vector3 {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

impl Add for Vector3 {
    type Output = Vector3;

    fn add(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vector3 {
    type Output = Vector3;

    fn sub(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vector3 {
    type Output = Vector3;

    fn mul(self, rhs: f64) -> Vector3 {
        Vector3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// Ball state at club separation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LaunchState {
    /// Start position in yards.
    pub position: Vector3,
    pub speed_mph: f64,
    /// Vertical launch angle; positive is up.
    pub launch_angle_deg: f64,
    /// Horizontal launch angle; positive is right of target.
    pub direction_deg: f64,
    pub backspin_rpm: f64,
    /// Positive sidespin curves the ball right.
    pub sidespin_rpm: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Atmosphere {
    pub temperature_f: f64,
    pub elevation_ft: f64,
    pub wind_speed_mph: f64,
    /// 0 blows straight down the target line, 90 blows left to right.
    pub wind_direction_deg: f64,
    /// Wind only acts on the ball above this height.
    pub wind_height_ft: f64,
    pub humidity_percent: f64,
    pub pressure_inhg: f64,
}

impl Default for Atmosphere {
    fn default() -> Self {
        Self {
            temperature_f: 70.0,
            elevation_ft: 0.0,
            wind_speed_mph: 0.0,
            wind_direction_deg: 0.0,
            wind_height_ft: 0.0,
            humidity_percent: 50.0,
            pressure_inhg: 29.92,
        }
    }
}

impl Atmosphere {
    /// Humid air density in kg/m^3.
    pub fn air_density(&self) -> f64 {
        let temp_c = (self.temperature_f - 32.0) * 5.0 / 9.0;
        let saturation_mmhg =
            4.5841 * ((18.687 - temp_c / 234.5) * temp_c / (257.14 + temp_c)).exp();
        let pressure_mmhg = self.pressure_inhg * 1000.0 / 39.37;
        let elevation_m = self.elevation_ft * FEET_TO_METERS;
        let station_mmhg = pressure_mmhg * (-0.0001217 * elevation_m).exp();
        let vapor_mmhg = 0.3783 * self.humidity_percent * saturation_mmhg / 100.0;
        1.2929 * (273.0 / (temp_c + 273.0)) * (station_mmhg - vapor_mmhg) / 760.0
    }

    fn wind_velocity(&self) -> Vector3 {
        let speed = self.wind_speed_mph * MPH_TO_MPS;
        let heading = self.wind_direction_deg.to_radians();
        Vector3::new(speed * heading.sin(), speed * heading.cos(), 0.0)
    }
}

#[derive(Clone, Copy, Debug)]
struct BallState {
    position: Vector3,
    velocity: Vector3,
    spin: Vector3,
}

/// One flight. Both entry points consume the simulator.
#[derive(Clone, Debug)]
pub struct FlightSimulator {
    state: BallState,
    drag_factor: f64,
    radius: f64,
    wind: Vector3,
    wind_height_m: f64,
    time: f64,
}

impl FlightSimulator {
    pub fn new(launch: &LaunchState, atmosphere: &Atmosphere) -> Self {
        let speed = launch.speed_mph * MPH_TO_MPS;
        let elevation = launch.launch_angle_deg.to_radians();
        let heading = launch.direction_deg.to_radians();
        let velocity = Vector3::new(
            speed * elevation.cos() * heading.sin(),
            speed * elevation.cos() * heading.cos(),
            speed * elevation.sin(),
        );
        // Backspin turns about the horizontal axis normal to the heading.
        let backspin = launch.backspin_rpm * RPM_TO_RAD_PER_SEC;
        let spin = Vector3::new(
            backspin * heading.cos(),
            -backspin * heading.sin(),
            -launch.sidespin_rpm * RPM_TO_RAD_PER_SEC,
        );
        let radius = BALL_DIAMETER_M / 2.0;
        let area = std::f64::consts::PI * radius * radius;

        Self {
            state: BallState {
                position: launch.position * YARDS_TO_METERS,
                velocity,
                spin,
            },
            drag_factor: atmosphere.air_density() * area / (2.0 * BALL_MASS_KG),
            radius,
            wind: atmosphere.wind_velocity(),
            wind_height_m: atmosphere.wind_height_ft * FEET_TO_METERS,
            time: 0.0,
        }
    }

    /// Integrate until the ball crosses the ground and return the crossing
    /// point, interpolated between the bracketing samples.
    pub fn run_landing(mut self) -> Result<Vector3, FlightError> {
        loop {
            let previous = self.state.position;
            self.step()?;
            let current = self.state.position;
            if current.z < 0.0 {
                let span = previous.z - current.z;
                let fraction = if span > 0.0 { previous.z / span } else { 0.0 };
                let landing = previous + (current - previous) * fraction;
                return Ok(landing * (1.0 / YARDS_TO_METERS));
            }
        }
    }

    /// Every sample from launch through the first one below ground.
    pub fn run_path(mut self) -> Result<Vec<Vector3>, FlightError> {
        let mut path = vec![self.state.position * (1.0 / YARDS_TO_METERS)];
        loop {
            self.step()?;
            path.push(self.state.position * (1.0 / YARDS_TO_METERS));
            if self.state.position.z < 0.0 {
                return Ok(path);
            }
        }
    }

    fn step(&mut self) -> Result<(), FlightError> {
        if self.time >= MAX_FLIGHT_SECONDS {
            return Err(FlightError::NoLanding {
                seconds: MAX_FLIGHT_SECONDS,
            });
        }
        let dt = TIME_STEP;
        let s = self.state;

        let k1v = self.acceleration(s.position, s.velocity, s.spin);
        let k1p = s.velocity;
        let k2v = self.acceleration(
            s.position + k1p * (dt / 2.0),
            s.velocity + k1v * (dt / 2.0),
            s.spin,
        );
        let k2p = s.velocity + k1v * (dt / 2.0);
        let k3v = self.acceleration(
            s.position + k2p * (dt / 2.0),
            s.velocity + k2v * (dt / 2.0),
            s.spin,
        );
        let k3p = s.velocity + k2v * (dt / 2.0);
        let k4v = self.acceleration(s.position + k3p * dt, s.velocity + k3v * dt, s.spin);
        let k4p = s.velocity + k3v * dt;

        let position = s.position + (k1p + k2p * 2.0 + k3p * 2.0 + k4p) * (dt / 6.0);
        let velocity = s.velocity + (k1v + k2v * 2.0 + k3v * 2.0 + k4v) * (dt / 6.0);

        let speed = velocity.norm();
        let spin = if speed > 0.0 {
            let tau = self.radius / (SPIN_DECAY * speed);
            s.spin * (-dt / tau).exp()
        } else {
            s.spin
        };

        self.time += dt;
        if !position.is_finite() || !velocity.is_finite() || !spin.is_finite() {
            return Err(FlightError::NonFinite { time: self.time });
        }
        self.state = BallState {
            position,
            velocity,
            spin,
        };
        Ok(())
    }

    fn acceleration(&self, position: Vector3, velocity: Vector3, spin: Vector3) -> Vector3 {
        let gravity = Vector3::new(0.0, 0.0, -GRAVITY);
        let relative = if position.z >= self.wind_height_m {
            velocity - self.wind
        } else {
            velocity
        };
        let speed = relative.norm();
        if speed <= f64::EPSILON {
            return gravity;
        }

        let spin_rate = spin.norm();
        let spin_factor = self.radius * spin_rate / speed;
        let drag_coefficient = DRAG_BASE + DRAG_SPIN * spin_factor;
        let drag = relative * (-self.drag_factor * drag_coefficient * speed);

        let magnus = spin.cross(&relative);
        let magnus_norm = magnus.norm();
        let lift = if spin_rate > f64::EPSILON && magnus_norm > f64::EPSILON {
            let lift_coefficient = LIFT_SCALE * spin_factor.powf(LIFT_EXPONENT);
            magnus * (self.drag_factor * lift_coefficient * speed * speed / magnus_norm)
        } else {
            Vector3::ZERO
        };

        gravity + drag + lift
    }
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> LaunchState {
        LaunchState {
            position: Vector3::ZERO,
            speed_mph: 150.0,
            launch_angle_deg: 12.0,
            direction_deg: 0.0,
            backspin_rpm: 2700.0,
            sidespin_rpm: 0.0,
        }
    }

    fn carry(launch: LaunchState, atmosphere: Atmosphere) -> f64 {
        FlightSimulator::new(&launch, &atmosphere)
            .run_landing()
            .expect("flight lands")
            .y
    }

    #[test]
    fn standard_air_density() {
        let rho = Atmosphere::default().air_density();
        assert!((rho - 1.194).abs() < 0.01, "rho = {}", rho);
    }

    #[test]
    fn thinner_air_at_altitude() {
        let sea = Atmosphere::default().air_density();
        let mile_high = Atmosphere {
            elevation_ft: 5280.0,
            ..Atmosphere::default()
        }
        .air_density();
        assert!(mile_high < sea * 0.9);
    }

    #[test]
    fn driver_carry_is_plausible() {
        let yards = carry(driver(), Atmosphere::default());
        assert!((220.0..290.0).contains(&yards), "carry = {}", yards);
    }

    #[test]
    fn tailwind_carries_further_than_headwind() {
        let wind = |direction| Atmosphere {
            wind_speed_mph: 10.0,
            wind_direction_deg: direction,
            ..Atmosphere::default()
        };
        let calm = carry(driver(), Atmosphere::default());
        let tail = carry(driver(), wind(0.0));
        let head = carry(driver(), wind(180.0));
        assert!(tail > calm && calm > head);
    }

    #[test]
    fn positive_sidespin_curves_right() -> Result<(), FlightError> {
        let launch = LaunchState {
            sidespin_rpm: 800.0,
            ..driver()
        };
        let landing = FlightSimulator::new(&launch, &Atmosphere::default()).run_landing()?;
        assert!(landing.x > 10.0, "side = {}", landing.x);
        Ok(())
    }

    #[test]
    fn path_ends_on_first_sample_below_ground() -> Result<(), FlightError> {
        let path = FlightSimulator::new(&driver(), &Atmosphere::default()).run_path()?;
        let (last, rest) = path.split_last().expect("non-empty path");
        assert!(last.z < 0.0);
        assert!(rest.iter().all(|p| p.z >= 0.0));
        assert_eq!(path[0], Vector3::ZERO);
        Ok(())
    }

    #[test]
    fn downward_launch_lands_immediately() -> Result<(), FlightError> {
        let launch = LaunchState {
            speed_mph: 50.0,
            launch_angle_deg: -10.0,
            backspin_rpm: 0.0,
            ..driver()
        };
        let landing = FlightSimulator::new(&launch, &Atmosphere::default()).run_landing()?;
        assert_eq!(landing.y, 0.0);
        let path = FlightSimulator::new(&launch, &Atmosphere::default()).run_path()?;
        assert_eq!(path.len(), 2);
        Ok(())
    }

    #[test]
    fn non_finite_launch_is_an_error() {
        let launch = LaunchState {
            speed_mph: f64::NAN,
            ..driver()
        };
        let result = FlightSimulator::new(&launch, &Atmosphere::default()).run_landing();
        assert!(matches!(result, Err(FlightError::NonFinite { .. })));
    }
}
