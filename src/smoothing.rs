use nalgebra::{DMatrix, DVector};

pub const DEFAULT_WINDOW: usize = 11;
pub const DEFAULT_POLY_ORDER: usize = 3;

/// Map an angle in degrees into `[-180, 180)`.
pub fn wrap_degrees(angle: f64) -> f64 {
    (angle + 180.0).rem_euclid(360.0) - 180.0
}

/// Remove artificial ±360° jumps from an angle series (degrees).
///
/// Any step larger than 180° in magnitude is replaced by its equivalent
/// step in `[-180, 180]`, carrying the correction forward.
pub fn unwrap_degrees(angles: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(angles.len());
    let Some(&first) = angles.first() else {
        return out;
    };
    out.push(first);

    let mut correction = 0.0;
    for pair in angles.windows(2) {
        let step = pair[1] - pair[0];
        if step.abs() >= 180.0 {
            let mut wrapped = wrap_degrees(step);
            if wrapped == -180.0 && step > 0.0 {
                wrapped = 180.0;
            }
            correction += wrapped - step;
        }
        out.push(pair[1] + correction);
    }
    out
}

/// Savitzky–Golay smoothing filter.
///
/// Interior points use the centred least-squares fit over `window` samples.
/// The first and last `window / 2` points are read off the polynomial
/// fitted to the first and last full windows.
#[derive(Debug, Clone)]
pub struct SavitzkyGolay {
    window: usize,
    order: usize,
}

impl Default for SavitzkyGolay {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_POLY_ORDER)
    }
}

impl SavitzkyGolay {
    /// An even window is widened by one.
    pub fn new(window: usize, order: usize) -> Self {
        let window = if window % 2 == 0 { window + 1 } else { window };
        Self { window, order }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Maps a window of samples to polynomial coefficients in coordinates
    /// centred on the middle sample. `None` if the normal equations are
    /// singular.
    fn projection(&self) -> Option<DMatrix<f64>> {
        let half = (self.window / 2) as f64;
        let design = DMatrix::from_fn(self.window, self.order + 1, |row, col| {
            (row as f64 - half).powi(col as i32)
        });
        let normal = design.transpose() * &design;
        let inverse = normal.try_inverse()?;
        Some(inverse * design.transpose())
    }

    fn evaluate(coefficients: &DVector<f64>, t: f64) -> f64 {
        coefficients
            .iter()
            .enumerate()
            .map(|(power, c)| c * t.powi(power as i32))
            .sum()
    }

    fn try_smooth(&self, values: &[f64]) -> Option<Vec<f64>> {
        let n = values.len();
        let half = self.window / 2;
        let projection = self.projection()?;

        let fit = |start: usize| -> DVector<f64> {
            let window = DVector::from_column_slice(&values[start..start + self.window]);
            &projection * window
        };

        let mut out = vec![0.0; n];

        let head = fit(0);
        for (i, slot) in out.iter_mut().enumerate().take(half) {
            *slot = Self::evaluate(&head, i as f64 - half as f64);
        }

        for i in half..n - half {
            out[i] = fit(i - half)[0];
        }

        let tail_start = n - self.window;
        let tail = fit(tail_start);
        for i in n - half..n {
            out[i] = Self::evaluate(&tail, (i - tail_start) as f64 - half as f64);
        }

        out.iter().all(|v| v.is_finite()).then_some(out)
    }

    /// Smoothed copy of `values`. Series shorter than the window, or any
    /// numerical failure, give the raw series back unchanged.
    pub fn smooth(&self, values: &[f64]) -> Vec<f64> {
        if values.len() < self.window || self.order >= self.window {
            return values.to_vec();
        }

        match self.try_smooth(values) {
            Some(smoothed) => smoothed,
            None => {
                log::warn!("[FORM] Smoothing failed, keeping raw series ({} samples)", values.len());
                values.to_vec()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrap_then_wrap_round_trips() {
        let original = [170.0, 179.0, -178.0, -160.0, 175.0, -179.5, 0.0, 90.0, -90.0, 179.9];
        let unwrapped = unwrap_degrees(&original);

        for pair in unwrapped.windows(2) {
            assert!((pair[1] - pair[0]).abs() <= 180.0);
        }
        for (a, b) in original.iter().zip(unwrapped.iter()) {
            assert!((wrap_degrees(*b) - a).abs() < 1e-9, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_unwrap_removes_boundary_jump() {
        let unwrapped = unwrap_degrees(&[178.0, -178.0, -170.0]);
        assert!((unwrapped[1] - 182.0).abs() < 1e-12);
        assert!((unwrapped[2] - 190.0).abs() < 1e-12);
        assert!(unwrap_degrees(&[]).is_empty());
    }

    #[test]
    fn test_wrap_range() {
        assert_eq!(wrap_degrees(180.0), -180.0);
        assert_eq!(wrap_degrees(-180.0), -180.0);
        assert!((wrap_degrees(540.0) + 180.0).abs() < 1e-12);
        assert!((wrap_degrees(-190.0) - 170.0).abs() < 1e-12);
    }

    #[test]
    fn test_cubic_passes_through_unchanged() {
        let values: Vec<f64> = (0..20)
            .map(|i| {
                let x = i as f64 * 0.5;
                0.2 * x * x * x - x * x + 3.0 * x - 7.0
            })
            .collect();
        let smoothed = SavitzkyGolay::default().smooth(&values);
        assert_eq!(smoothed.len(), values.len());
        for (a, b) in values.iter().zip(smoothed.iter()) {
            assert!((a - b).abs() < 1e-6, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_short_series_is_not_smoothed() {
        let values = vec![1.0, 5.0, 2.0, 8.0];
        assert_eq!(SavitzkyGolay::default().smooth(&values), values);
    }

    #[test]
    fn test_noise_is_reduced() {
        let values: Vec<f64> = (0..30).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let smoothed = SavitzkyGolay::default().smooth(&values);
        let interior_peak = smoothed[5..25].iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        assert!(interior_peak < 0.5);
    }
}
