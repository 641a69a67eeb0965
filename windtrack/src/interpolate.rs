//! Resampling of a sparse weather series at arbitrary timestamps.
//!
//! Every numeric field is fitted on its own with a natural cubic spline over the
//! epoch-millisecond time axis and evaluated at each target inside the knot range.
//! Targets outside that range keep a zero value; nothing is extrapolated.
//!
//! Wind direction is a circular quantity. [`DirectionMode::Scalar`] fits raw degrees
//! like any other field, which bends the curve the long way round when readings cross
//! north (350° to 10° passes through 180°). That behaviour is the default so results
//! stay comparable with earlier runs. [`DirectionMode::Circular`] unwraps the knots
//! into a continuous sequence before fitting and wraps the result into `[0, 360)`.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::units::epoch_millis;
use crate::{Timestamp, WeatherPoint, WtError};

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DirectionMode {
    #[default]
    Scalar,
    Circular,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WeatherField {
    WindSpeed,
    GustSpeed,
    Direction,
    Temperature,
    Chill,
}

impl WeatherField {
    pub const ALL: [WeatherField; 5] = [
        WeatherField::WindSpeed,
        WeatherField::GustSpeed,
        WeatherField::Direction,
        WeatherField::Temperature,
        WeatherField::Chill,
    ];

    pub fn name(self) -> &'static str {
        FIELD_TABLE[self as usize].name
    }

    pub fn get(self, point: &WeatherPoint) -> f64 {
        (FIELD_TABLE[self as usize].get)(point)
    }

    pub fn set(self, point: &mut WeatherPoint, value: f64) {
        (FIELD_TABLE[self as usize].set)(point, value)
    }
}

struct FieldAccessor {
    field: WeatherField,
    name: &'static str,
    get: fn(&WeatherPoint) -> f64,
    set: fn(&mut WeatherPoint, f64),
}

// Indexed by `WeatherField as usize`.
const FIELD_TABLE: [FieldAccessor; 5] = [
    FieldAccessor {
        field: WeatherField::WindSpeed,
        name: "wind_kmh",
        get: |p| p.wind_kmh,
        set: |p, v| p.wind_kmh = v,
    },
    FieldAccessor {
        field: WeatherField::GustSpeed,
        name: "gust_kmh",
        get: |p| p.gust_kmh,
        set: |p, v| p.gust_kmh = v,
    },
    FieldAccessor {
        field: WeatherField::Direction,
        name: "direction_deg",
        get: |p| p.direction_deg,
        set: |p, v| p.direction_deg = v,
    },
    FieldAccessor {
        field: WeatherField::Temperature,
        name: "temperature_c",
        get: |p| p.temperature_c,
        set: |p, v| p.temperature_c = v,
    },
    FieldAccessor {
        field: WeatherField::Chill,
        name: "chill_c",
        get: |p| p.chill_c,
        set: |p, v| p.chill_c = v,
    },
];

/// Natural cubic spline (zero curvature at both ends) through ordered knots.
#[derive(Clone, Debug)]
pub struct NaturalSpline {
    xs: Array1<f64>,
    ys: Array1<f64>,
    b: Array1<f64>,
    c: Array1<f64>,
    d: Array1<f64>,
}

impl NaturalSpline {
    /// Fits the spline. Needs at least two knots with strictly increasing, finite `xs`.
    /// Two knots give the straight line through them.
    pub fn fit(xs: &[f64], ys: &[f64]) -> Result<Self, WtError> {
        let n = xs.len();
        if ys.len() != n {
            return Err(WtError::InvalidSeries(format!(
                "{} x values but {} y values",
                n,
                ys.len()
            )));
        }
        if n < 2 {
            return Err(WtError::InsufficientData { available: n });
        }
        if let Some(idx) = xs
            .windows(2)
            .position(|w| !(w[1] > w[0]) || !w[0].is_finite() || !w[1].is_finite())
        {
            return Err(WtError::InvalidSeries(format!(
                "knot {} is not strictly after knot {}",
                idx + 1,
                idx
            )));
        }

        let k = n - 1;
        let h: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();

        let mut alpha = vec![0.0; n];
        for i in 1..k {
            alpha[i] = 3.0 / h[i] * (ys[i + 1] - ys[i]) - 3.0 / h[i - 1] * (ys[i] - ys[i - 1]);
        }

        // Forward sweep of the tridiagonal system for the curvature terms.
        let mut l = vec![1.0; n];
        let mut mu = vec![0.0; n];
        let mut z = vec![0.0; n];
        for i in 1..k {
            l[i] = 2.0 * (xs[i + 1] - xs[i - 1]) - h[i - 1] * mu[i - 1];
            mu[i] = h[i] / l[i];
            z[i] = (alpha[i] - h[i - 1] * z[i - 1]) / l[i];
        }

        let mut c = Array1::<f64>::zeros(n);
        let mut b = Array1::<f64>::zeros(k);
        let mut d = Array1::<f64>::zeros(k);
        for j in (0..k).rev() {
            c[j] = z[j] - mu[j] * c[j + 1];
            b[j] = (ys[j + 1] - ys[j]) / h[j] - h[j] * (c[j + 1] + 2.0 * c[j]) / 3.0;
            d[j] = (c[j + 1] - c[j]) / (3.0 * h[j]);
        }

        Ok(Self {
            xs: Array1::from_vec(xs.to_vec()),
            ys: Array1::from_vec(ys.to_vec()),
            b,
            c,
            d,
        })
    }

    pub fn domain(&self) -> (f64, f64) {
        (self.xs[0], self.xs[self.xs.len() - 1])
    }

    /// Value at `x`, or `None` outside the knot range.
    pub fn evaluate(&self, x: f64) -> Option<f64> {
        let (lo, hi) = self.domain();
        if !(lo..=hi).contains(&x) {
            return None;
        }
        let last_piece = self.xs.len() - 2;
        let knots = self.xs.as_slice()?;
        let piece = knots
            .partition_point(|&knot| knot <= x)
            .saturating_sub(1)
            .min(last_piece);
        let dx = x - self.xs[piece];
        Some(
            self.ys[piece]
                + self.b[piece] * dx
                + self.c[piece] * dx * dx
                + self.d[piece] * dx * dx * dx,
        )
    }
}

/// Resamples `points` at every `target`, one output per target in target order.
///
/// Fails with [`WtError::InsufficientData`] for fewer than two source points.
pub fn interpolate(
    points: &[WeatherPoint],
    targets: &[Timestamp],
    mode: DirectionMode,
) -> Result<Vec<WeatherPoint>, WtError> {
    if points.len() < 2 {
        return Err(WtError::InsufficientData {
            available: points.len(),
        });
    }

    let xs: Vec<f64> = points.iter().map(|p| epoch_millis(p.time)).collect();
    let target_xs: Vec<f64> = targets.iter().map(|&t| epoch_millis(t)).collect();
    let mut out: Vec<WeatherPoint> = targets.iter().map(|&t| WeatherPoint::empty_at(t)).collect();

    for accessor in &FIELD_TABLE {
        let circular = mode == DirectionMode::Circular && accessor.field == WeatherField::Direction;
        let mut ys: Vec<f64> = points.iter().map(accessor.get).collect();
        if circular {
            unwrap_degrees(&mut ys);
        }
        let spline = NaturalSpline::fit(&xs, &ys)?;
        for (point, &x) in out.iter_mut().zip(&target_xs) {
            if let Some(value) = spline.evaluate(x) {
                let value = if circular { value.rem_euclid(360.0) } else { value };
                (accessor.set)(point, value);
            }
        }
    }

    Ok(out)
}

/// Rewrites a degree sequence so that consecutive values never jump by more than 180°.
fn unwrap_degrees(values: &mut [f64]) {
    for i in 1..values.len() {
        let mut step = (values[i] - values[i - 1]).rem_euclid(360.0);
        if step > 180.0 {
            step -= 360.0;
        }
        values[i] = values[i - 1] + step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ts, weather_point};

    fn series(samples: &[(i64, f64)]) -> Vec<WeatherPoint> {
        samples.iter().map(|&(s, w)| weather_point(s, w)).collect()
    }

    #[test]
    fn test_monotone_input_has_no_overshoot() {
        let points = series(&[(0, 5.0), (10, 10.0), (20, 15.0), (30, 20.0)]);
        let out = interpolate(&points, &[ts(15)], DirectionMode::Scalar).unwrap();
        assert!(out[0].wind_kmh >= 10.0 && out[0].wind_kmh <= 15.0);
        assert!((out[0].wind_kmh - 12.5).abs() < 1e-9);
    }

    #[test]
    fn test_identity_at_knots() {
        let points = series(&[(0, 3.0), (600, 11.0), (1200, 7.5), (1800, 9.0), (2400, 4.0)]);
        let targets: Vec<Timestamp> = points.iter().map(|p| p.time).collect();
        let out = interpolate(&points, &targets, DirectionMode::Scalar).unwrap();
        for (src, got) in points.iter().zip(&out) {
            assert_eq!(src.time, got.time);
            for field in WeatherField::ALL {
                assert!(
                    (field.get(src) - field.get(got)).abs() < 1e-6,
                    "{} at {}",
                    field.name(),
                    src.time
                );
            }
        }
    }

    #[test]
    fn test_output_length_matches_targets() {
        let points = series(&[(0, 5.0), (10, 10.0)]);
        for count in [0usize, 1, 7, 50] {
            let targets: Vec<Timestamp> = (0..count as i64).map(|i| ts(i - 3)).collect();
            let out = interpolate(&points, &targets, DirectionMode::Scalar).unwrap();
            assert_eq!(out.len(), count);
        }
    }

    #[test]
    fn test_targets_outside_range_stay_zero() {
        let points = series(&[(10, 5.0), (20, 10.0)]);
        let out = interpolate(&points, &[ts(5), ts(15), ts(25)], DirectionMode::Scalar).unwrap();
        assert_eq!(out[0], WeatherPoint::empty_at(ts(5)));
        assert!((out[1].wind_kmh - 7.5).abs() < 1e-9);
        assert!((out[1].temperature_c - 21.0).abs() < 1e-9);
        assert_eq!(out[2], WeatherPoint::empty_at(ts(25)));
    }

    #[test]
    fn test_requires_two_points() {
        let points = series(&[(0, 5.0)]);
        assert_eq!(
            interpolate(&points, &[ts(0)], DirectionMode::Scalar),
            Err(WtError::InsufficientData { available: 1 })
        );
        assert!(interpolate(&[], &[], DirectionMode::Scalar).is_err());
    }

    #[test]
    fn test_direction_wraparound_modes() {
        let mut points = series(&[(0, 5.0), (10, 5.0)]);
        points[0].direction_deg = 350.0;
        points[1].direction_deg = 10.0;

        let scalar = interpolate(&points, &[ts(5)], DirectionMode::Scalar).unwrap();
        assert!((scalar[0].direction_deg - 180.0).abs() < 1e-9);

        let circular = interpolate(&points, &[ts(5)], DirectionMode::Circular).unwrap();
        let dir = circular[0].direction_deg;
        assert!(dir < 1e-9 || (360.0 - dir) < 1e-9, "got {}", dir);
    }

    #[test]
    fn test_spline_rejects_unordered_knots() {
        assert!(matches!(
            NaturalSpline::fit(&[0.0, 0.0, 1.0], &[1.0, 2.0, 3.0]),
            Err(WtError::InvalidSeries(_))
        ));
        assert!(NaturalSpline::fit(&[0.0, 1.0], &[1.0]).is_err());
    }

    #[test]
    fn test_spline_is_smooth_through_curved_data() {
        let xs = [0.0, 1.0, 2.0, 3.0];
        let ys = [0.0, 1.0, 0.0, 1.0];
        let spline = NaturalSpline::fit(&xs, &ys).unwrap();
        assert_eq!(spline.domain(), (0.0, 3.0));
        assert!(spline.evaluate(-0.1).is_none());
        assert!(spline.evaluate(3.1).is_none());
        let eps = 1e-6;
        for knot in [1.0, 2.0] {
            let left = (spline.evaluate(knot).unwrap() - spline.evaluate(knot - eps).unwrap()) / eps;
            let right = (spline.evaluate(knot + eps).unwrap() - spline.evaluate(knot).unwrap()) / eps;
            assert!((left - right).abs() < 1e-3);
        }
    }

    #[test]
    fn test_unwrap_degrees() {
        let mut values = [350.0, 10.0, 30.0, 340.0];
        unwrap_degrees(&mut values);
        assert_eq!(values, [350.0, 370.0, 390.0, 340.0]);
    }
}
