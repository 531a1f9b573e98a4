//! van Genuchten soil-water retention and Mualem conductivity.
//!
//! Matric potential is handled internally in cm of water (positive
//! magnitude) and reported in kPa as `psi_cm / 10`.

/// Matric potential, cm H2O, that defines field capacity (about -33 kPa).
pub const FC_PSI_CM: f64 = 330.0;

/// Matric potential, cm H2O, that defines the permanent wilting point
/// (about -1500 kPa).
pub const PWP_PSI_CM: f64 = 15_000.0;

/// Margin kept away from the residual/saturated limits before inversion.
const INVERSION_MARGIN: f64 = 0.001;

/// Mualem pore-connectivity exponent.
const MUALEM_L: f64 = 0.5;

/// van Genuchten retention parameters for one soil.
#[derive(Debug, Clone, Copy)]
pub struct VanGenuchten {
    /// Residual water content, m3/m3.
    pub theta_r: f64,
    /// Saturated water content, m3/m3.
    pub theta_s: f64,
    /// Inverse air-entry pressure, 1/cm.
    pub alpha: f64,
    /// Pore-size distribution index (n > 1).
    pub n: f64,
    /// Saturated hydraulic conductivity, cm/day.
    pub k_s: f64,
}

/// Default parameters: loam.
pub const LOAM: VanGenuchten = VanGenuchten {
    theta_r: 0.078,
    theta_s: 0.43,
    alpha: 0.036,
    n: 1.56,
    k_s: 25.0,
};

impl Default for VanGenuchten {
    fn default() -> Self {
        LOAM
    }
}

impl VanGenuchten {
    fn m(&self) -> f64 {
        1.0 - 1.0 / self.n
    }

    /// Retention curve: theta at matric potential `psi_cm` (magnitude, cm).
    /// Non-positive psi means saturation.
    pub fn theta_at_psi_cm(&self, psi_cm: f64) -> f64 {
        if psi_cm <= 0.0 {
            return self.theta_s;
        }
        let term = 1.0 + (self.alpha * psi_cm).powf(self.n);
        self.theta_r + (self.theta_s - self.theta_r) * term.powf(-self.m())
    }

    /// Inverse retention: matric potential magnitude (cm) at `theta`.
    /// Theta is clamped just inside the (theta_r, theta_s) interval first.
    pub fn psi_cm_at_theta(&self, theta: f64) -> f64 {
        let theta = theta.clamp(
            self.theta_r + INVERSION_MARGIN,
            self.theta_s - INVERSION_MARGIN,
        );
        let se = (theta - self.theta_r) / (self.theta_s - self.theta_r);
        let m = self.m();
        (se.powf(-1.0 / m) - 1.0).powf(1.0 / self.n) / self.alpha
    }

    /// Matric potential magnitude in kPa at `theta`.
    pub fn psi_kpa_at_theta(&self, theta: f64) -> f64 {
        self.psi_cm_at_theta(theta) / 10.0
    }

    /// Field capacity: theta after gravity drainage has essentially ceased.
    pub fn field_capacity(&self) -> f64 {
        self.theta_at_psi_cm(FC_PSI_CM)
    }

    /// Permanent wilting point.
    pub fn wilting_point(&self) -> f64 {
        self.theta_at_psi_cm(PWP_PSI_CM)
    }

    /// Effective saturation Se in [0, 1].
    pub fn effective_saturation(&self, theta: f64) -> f64 {
        ((theta - self.theta_r) / (self.theta_s - self.theta_r)).clamp(0.0, 1.0)
    }

    /// Mualem-van Genuchten unsaturated hydraulic conductivity, cm/day.
    pub fn conductivity(&self, theta: f64) -> f64 {
        let se = self.effective_saturation(theta);
        if se >= 1.0 {
            return self.k_s;
        }
        if se <= 0.01 {
            return self.k_s * 1e-10;
        }
        let m = self.m();
        let inner = 1.0 - (1.0 - se.powf(1.0 / m)).powf(m);
        self.k_s * se.powf(MUALEM_L) * inner * inner
    }
}

// ─── Available water ─────────────────────────────────────────────

/// Plant-available water accounting over the root zone.
#[derive(Debug, Clone, Copy)]
pub struct AvailableWater {
    /// Total available water between field capacity and wilting point, mm.
    pub taw_mm: f64,
    /// Currently available water, mm.
    pub aw_mm: f64,
    /// Depletion from field capacity, mm.
    pub depletion_mm: f64,
    /// Fraction of TAW already used, [0, 1].
    pub fraction_depleted: f64,
}

/// Compute the water balance for root depth `root_depth_cm`.
pub fn available_water(
    theta: f64,
    theta_fc: f64,
    theta_pwp: f64,
    root_depth_cm: f64,
) -> AvailableWater {
    // (m3/m3) * cm * 10 gives a depth in mm.
    let taw_mm = ((theta_fc - theta_pwp) * root_depth_cm * 10.0).max(0.0);
    let aw_mm = ((theta - theta_pwp) * root_depth_cm * 10.0).max(0.0);
    let depletion_mm = (taw_mm - aw_mm).max(0.0);
    let fraction_depleted = if taw_mm > 0.0 {
        (depletion_mm / taw_mm).clamp(0.0, 1.0)
    } else {
        0.0
    };
    AvailableWater {
        taw_mm,
        aw_mm,
        depletion_mm,
        fraction_depleted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturation_returns_theta_s() {
        assert_eq!(LOAM.theta_at_psi_cm(0.0), LOAM.theta_s);
        assert_eq!(LOAM.theta_at_psi_cm(-5.0), LOAM.theta_s);
    }

    #[test]
    fn test_retention_is_monotone_decreasing() {
        let mut prev = LOAM.theta_at_psi_cm(1.0);
        for psi in [10.0, 100.0, 330.0, 1000.0, 15_000.0] {
            let theta = LOAM.theta_at_psi_cm(psi);
            assert!(theta < prev, "theta must fall as psi grows");
            prev = theta;
        }
    }

    #[test]
    fn test_loam_landmarks() {
        // Loam under these parameters drains to roughly 0.165 at -33 kPa and
        // wilts near 0.088.
        let fc = LOAM.field_capacity();
        let pwp = LOAM.wilting_point();
        assert!((fc - 0.165).abs() < 0.005, "fc = {fc}");
        assert!((pwp - 0.088).abs() < 0.005, "pwp = {pwp}");
        assert!(pwp < fc);
    }

    #[test]
    fn test_round_trip_within_tolerance() {
        for i in 1..50 {
            let theta = LOAM.theta_r + 0.002
                + (LOAM.theta_s - LOAM.theta_r - 0.004) * (i as f64 / 50.0);
            let psi = LOAM.psi_cm_at_theta(theta);
            let back = LOAM.theta_at_psi_cm(psi);
            assert!(
                (back - theta).abs() < 1e-4,
                "round trip failed at theta {theta}: {back}"
            );
        }
    }

    #[test]
    fn test_psi_kpa_is_cm_over_ten() {
        let theta = 0.25;
        assert!(
            (LOAM.psi_kpa_at_theta(theta) - LOAM.psi_cm_at_theta(theta) / 10.0).abs() < 1e-12
        );
    }

    #[test]
    fn test_conductivity_guards() {
        assert_eq!(LOAM.conductivity(LOAM.theta_s), LOAM.k_s);
        assert_eq!(LOAM.conductivity(LOAM.theta_s + 0.1), LOAM.k_s);
        let dry = LOAM.conductivity(LOAM.theta_r);
        assert!((dry - LOAM.k_s * 1e-10).abs() < 1e-18);
        // Conductivity falls steeply away from saturation.
        let mid = LOAM.conductivity(0.25);
        assert!(mid > 0.0 && mid < LOAM.k_s);
    }

    #[test]
    fn test_available_water_accounting() {
        let fc = 0.165;
        let pwp = 0.088;
        let aw = available_water(0.13, fc, pwp, 30.0);
        assert!((aw.taw_mm - (fc - pwp) * 300.0).abs() < 1e-9);
        assert!((aw.aw_mm - (0.13 - pwp) * 300.0).abs() < 1e-9);
        assert!(aw.fraction_depleted > 0.0 && aw.fraction_depleted < 1.0);

        // Below wilting point: nothing available, fully depleted.
        let dry = available_water(0.05, fc, pwp, 30.0);
        assert_eq!(dry.aw_mm, 0.0);
        assert_eq!(dry.fraction_depleted, 1.0);

        // Above field capacity the fraction clamps at zero depletion.
        let wet = available_water(0.30, fc, pwp, 30.0);
        assert_eq!(wet.fraction_depleted, 0.0);
    }
}
