use std::thread;

use launch_monitor_core::trajectory::{
    TrajectoryCalculator, TrajectoryInput, TrajectoryLimits, TIME_STEP,
};

fn driver() -> TrajectoryInput {
    TrajectoryInput::new(165.0, 12.0, 0.0, 2600.0, 200.0)
}

#[test]
fn validation_accepts_driver_and_rejects_outliers() {
    let calc = TrajectoryCalculator::default();
    assert!(calc.validate_input(&driver()));

    let rejected = [
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
    ];
    for input in &rejected {
        assert!(!calc.validate_input(input), "accepted {:?}", input);
    }
}

#[test]
fn typical_driver_produces_a_full_result() {
    let result = TrajectoryCalculator::default().calculate_carry(&driver());
    assert!(result.calculation_successful, "{}", result.message);
    assert!(result.carry_distance_yards > 0.0);
    assert!(result.flight_time_seconds > 0.0);
    assert!(result.max_height_yards > 0.0);
    assert!(result.landing_angle_deg < 0.0);
}

#[test]
fn invalid_input_fails_with_zero_carry() {
    let input = TrajectoryInput {
        backspin_rpm: 1_000_000.0,
        ..driver()
    };
    let result = TrajectoryCalculator::default().calculate_carry(&input);
    assert!(!result.calculation_successful);
    assert_eq!(result.carry_distance_yards, 0.0);
    assert!(!result.message.is_empty());
}

#[test]
fn weather_moves_carry_the_expected_way() {
    let calc = TrajectoryCalculator::default();
    let carry = |input: TrajectoryInput| calc.calculate_carry(&input).carry_distance_yards;

    let calm = carry(driver());
    let altitude = carry(TrajectoryInput {
        elevation_ft: Some(5280.0),
        ..driver()
    });
    let cold = carry(TrajectoryInput {
        temperature_f: Some(40.0),
        ..driver()
    });
    let into_wind = carry(TrajectoryInput {
        wind_speed_mph: Some(15.0),
        wind_direction_deg: Some(180.0),
        ..driver()
    });
    assert!(altitude > calm);
    assert!(cold < calm);
    assert!(into_wind < calm);
}

#[test]
fn explicit_defaults_match_omitted_fields() {
    let calc = TrajectoryCalculator::default();
    let omitted = calc.calculate_carry(&driver());
    let explicit = calc.calculate_carry(&calc.apply_defaults(&driver()));
    assert_eq!(omitted, explicit);
}

#[test]
fn path_length_agrees_with_flight_time() {
    let calc = TrajectoryCalculator::default();
    let result = calc.calculate_carry(&driver());
    let path = calc.calculate_full_trajectory(&driver());
    assert!(!path.is_empty());
    let samples_in_air = (result.flight_time_seconds / TIME_STEP).round() as usize;
    assert!(samples_in_air < path.len());
    assert!(path.len() - samples_in_air <= 2);

    let apex = path.iter().map(|p| p[2]).fold(0.0, f64::max);
    assert_eq!(apex, result.max_height_yards);
}

#[test]
fn slice_drifts_right() {
    let input = TrajectoryInput {
        horizontal_launch_angle_deg: 2.0,
        sidespin_rpm: 1500.0,
        ..driver()
    };
    let path = TrajectoryCalculator::default().calculate_full_trajectory(&input);
    let last = path.last().expect("non-empty path");
    assert!(last[0] > 0.0);
}

#[test]
fn concurrent_calls_share_one_calculator() {
    let calc = TrajectoryCalculator::new(TrajectoryLimits::default());
    let expected = calc.calculate_carry(&driver());
    thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| calc.calculate_carry(&driver())))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().expect("worker"), expected);
        }
    });
}
