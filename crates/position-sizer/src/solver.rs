use crate::SolverError;

/// Everything a solver sees for one bar. All slices share the horizon length.
#[derive(Debug, Clone, Copy)]
pub struct SolverInput<'a> {
    pub current: f64,
    /// Fine forecast of each of the next bars' log return.
    pub forecast: &'a [f64],
    /// Position-adjusted variance of each of the next bars.
    pub variance: &'a [f64],
    /// Per-horizon transaction cost, in log-return units.
    pub cost: &'a [f64],
    pub weights: &'a [f64],
}

impl SolverInput<'_> {
    pub fn horizon(&self) -> usize {
        self.forecast.len()
    }

    fn check(&self) -> Result<(), SolverError> {
        let h = self.horizon();
        if h == 0 {
            return Err(SolverError::InvalidInput("empty horizon".to_string()));
        }
        if self.variance.len() != h || self.cost.len() != h || self.weights.len() != h {
            return Err(SolverError::InvalidInput(format!(
                "horizon lengths differ: forecast {h}, variance {}, cost {}, weights {}",
                self.variance.len(),
                self.cost.len(),
                self.weights.len()
            )));
        }
        Ok(())
    }
}

/// Target-position optimizer called once per bar.
pub trait PositionSolver {
    fn solve(&self, input: &SolverInput<'_>) -> Result<f64, SolverError>;
}

/// Single-position mean-variance objective with an L1 trading cost.
///
/// Holding `p` for each horizon `h` earns `p·R_h` (cumulative forecast) at a
/// risk of `λ/2·p²·V_h` (cumulative variance). Summing with the horizon
/// weights gives `B·p − A/2·p² − c·|p − p0|`, whose maximizer is
/// `(B ∓ c)/A` outside the no-trade band `|B − A·p0| ≤ c`, and `p0` inside it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeanVarianceSolver {
    pub risk_aversion: f64,
}

impl MeanVarianceSolver {
    pub fn new(risk_aversion: f64) -> Self {
        Self { risk_aversion }
    }
}

impl Default for MeanVarianceSolver {
    fn default() -> Self {
        Self { risk_aversion: 1.0 }
    }
}

impl PositionSolver for MeanVarianceSolver {
    fn solve(&self, input: &SolverInput<'_>) -> Result<f64, SolverError> {
        input.check()?;

        let mut cum_r = 0.0;
        let mut cum_v = 0.0;
        let (mut b, mut a, mut c, mut wsum) = (0.0, 0.0, 0.0, 0.0);
        for h in 0..input.horizon() {
            let w = input.weights[h];
            cum_r += input.forecast[h];
            cum_v += input.variance[h];
            b += w * cum_r;
            a += w * cum_v;
            c += w * input.cost[h];
            wsum += w;
        }
        if wsum <= 0.0 {
            return Err(SolverError::InvalidInput("all horizon weights are zero".to_string()));
        }
        c /= wsum;
        a *= self.risk_aversion;

        if a.is_nan() || a <= f64::EPSILON {
            return Err(SolverError::NonConvergence(format!(
                "non-positive curvature {a}"
            )));
        }

        let gradient = b - a * input.current;
        let target = if gradient > c {
            (b - c) / a
        } else if gradient < -c {
            (b + c) / a
        } else {
            input.current
        };
        Ok(target)
    }
}
