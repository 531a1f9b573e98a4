//! Raw ADC to volumetric water content conversion.
//!
//! Conversion is a piecewise-linear interpolation over a fixed factory curve,
//! followed by a per-site linear correction and an optional temperature
//! correction, with a final clamp to the physical VWC range.

/// Factory (raw, theta) breakpoints for the capacitive probe. Raw counts
/// outside the endpoints clamp to the endpoint theta.
pub const FACTORY_CURVE: [(f64, f64); 5] = [
    (250.0, 0.00),
    (450.0, 0.10),
    (650.0, 0.25),
    (850.0, 0.40),
    (1000.0, 0.50),
];

/// Physical ceiling of volumetric water content, m3/m3.
pub const THETA_CEILING: f64 = 0.50;

/// Reference temperature for the temperature correction, degrees C.
pub const TEMP_REF_C: f64 = 20.0;

/// Result of one conversion. `unclamped` carries the value before the final
/// clamp so QC can flag site corrections that push theta out of bounds.
#[derive(Debug, Clone, Copy)]
pub struct Conversion {
    pub theta: f64,
    pub unclamped: f64,
}

/// Per-site calibration applied on top of the factory curve.
///
/// `theta' = gain * theta + offset`, then
/// `theta'' = theta' + temp_coeff * (temp_c - temp_ref_c)`.
#[derive(Debug, Clone, Copy)]
pub struct SensorCalibration {
    pub gain: f64,
    pub offset: f64,
    /// Temperature compensation coefficient. Defaults to 0 (disabled); any
    /// non-zero value should be documented with the site notes.
    pub temp_coeff: f64,
    pub temp_ref_c: f64,
}

impl Default for SensorCalibration {
    fn default() -> Self {
        Self {
            gain: 1.0,
            offset: 0.0,
            temp_coeff: 0.0,
            temp_ref_c: TEMP_REF_C,
        }
    }
}

impl SensorCalibration {
    pub fn new(gain: f64, offset: f64, temp_coeff: f64, temp_ref_c: f64) -> Self {
        Self {
            gain,
            offset,
            temp_coeff,
            temp_ref_c,
        }
    }

    /// Convert a raw ADC count and probe temperature to VWC.
    pub fn convert(&self, raw: i32, temp_c: f64) -> Conversion {
        let factory = interp_factory(raw as f64);
        let site = self.gain * factory + self.offset;
        let corrected = site + self.temp_coeff * (temp_c - self.temp_ref_c);
        Conversion {
            theta: corrected.clamp(0.0, THETA_CEILING),
            unclamped: corrected,
        }
    }

    /// Invert the factory curve: the raw count that maps to `theta` under
    /// default site correction. Used by the simulator and by tests to drive
    /// the pipeline with theta-shaped trajectories.
    pub fn raw_for_theta(&self, theta: f64) -> i32 {
        let target = (theta.clamp(0.0, THETA_CEILING) - self.offset) / self.gain;
        let first = FACTORY_CURVE[0];
        let last = FACTORY_CURVE[FACTORY_CURVE.len() - 1];
        if target <= first.1 {
            return first.0 as i32;
        }
        if target >= last.1 {
            return last.0 as i32;
        }
        for pair in FACTORY_CURVE.windows(2) {
            let (r0, t0) = pair[0];
            let (r1, t1) = pair[1];
            if target >= t0 && target <= t1 {
                let frac = (target - t0) / (t1 - t0);
                return (r0 + frac * (r1 - r0)).round() as i32;
            }
        }
        last.0 as i32
    }
}

fn interp_factory(raw: f64) -> f64 {
    let first = FACTORY_CURVE[0];
    let last = FACTORY_CURVE[FACTORY_CURVE.len() - 1];
    if raw <= first.0 {
        return first.1;
    }
    if raw >= last.0 {
        return last.1;
    }
    for pair in FACTORY_CURVE.windows(2) {
        let (r0, t0) = pair[0];
        let (r1, t1) = pair[1];
        if raw >= r0 && raw <= r1 {
            let frac = (raw - r0) / (r1 - r0);
            return t0 + frac * (t1 - t0);
        }
    }
    last.1
}
