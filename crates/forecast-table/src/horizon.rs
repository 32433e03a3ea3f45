use nalgebra::DMatrix;
use serde::Serialize;

use crate::ForecastError;

/// Cumulative bucket endpoints of a coarse forecast.
///
/// Bucket `i` covers fine offsets `(ixf[i-1], ixf[i]]`, with a virtual
/// `ixf[-1] = -1`, so bucket 0 is always the single offset 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HorizonIndex(Vec<usize>);

impl HorizonIndex {
    /// Validate `ixf` against a day of `n` bars.
    pub fn new(ixf: Vec<usize>, n: usize) -> Result<Self, ForecastError> {
        if ixf.is_empty() {
            return Err(ForecastError::InvalidHorizonIndex("empty".to_string()));
        }
        if ixf[0] != 0 {
            return Err(ForecastError::InvalidHorizonIndex(format!(
                "ixf[0] must be 0, got {}",
                ixf[0]
            )));
        }
        if let Some(w) = ixf.windows(2).find(|w| w[1] <= w[0]) {
            return Err(ForecastError::InvalidHorizonIndex(format!(
                "not strictly increasing at {} -> {}",
                w[0], w[1]
            )));
        }
        let last = ixf[ixf.len() - 1];
        if last >= n {
            return Err(ForecastError::InvalidHorizonIndex(format!(
                "last endpoint {last} exceeds day length {n}"
            )));
        }
        Ok(Self(ixf))
    }

    /// Number of coarse buckets.
    pub fn nf(&self) -> usize {
        self.0.len()
    }

    /// Number of fine bars covered.
    pub fn nx(&self) -> usize {
        self.0[self.0.len() - 1] + 1
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    /// First fine offset of bucket `i`.
    pub fn bucket_start(&self, i: usize) -> usize {
        if i == 0 {
            0
        } else {
            self.0[i - 1] + 1
        }
    }

    /// Last fine offset of bucket `i` (inclusive).
    pub fn bucket_end(&self, i: usize) -> usize {
        self.0[i]
    }

    pub fn bucket_len(&self, i: usize) -> usize {
        self.bucket_end(i) + 1 - self.bucket_start(i)
    }

    /// Bucket index of every fine offset, length `nx`.
    pub fn bucket_of_offsets(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.nx());
        for i in 0..self.nf() {
            out.extend(std::iter::repeat(i).take(self.bucket_len(i)));
        }
        out
    }
}

/// Variance-weighted mapping between coarse (`nf`) and fine (`nx`) forecasts.
///
/// Fine offset `j` of a forecast made at bar `k` is the return of bar
/// `(k + j + 1) mod n`. Within each bucket the coarse value is split across
/// its bars in proportion to their variance, so summing a bucket's fine
/// values recovers the coarse value.
#[derive(Debug, Clone)]
pub struct HorizonMap {
    n: usize,
    ixf: HorizonIndex,
    stdv: Vec<f64>,
    /// `n × nx`: share of bucket variance carried by each fine bar, per origin bar.
    w: DMatrix<f64>,
    /// `nf × nx` bucket membership indicator.
    wix: DMatrix<f64>,
}

impl HorizonMap {
    /// Build a map for `n` bars per day. `stdv` defaults to all ones.
    pub fn new(n: usize, ixf: HorizonIndex, stdv: Option<&[f64]>) -> Result<Self, ForecastError> {
        if n == 0 {
            return Err(ForecastError::InvalidHorizonIndex(
                "bars per day must be positive".to_string(),
            ));
        }
        if ixf.nx() > n {
            return Err(ForecastError::InvalidHorizonIndex(format!(
                "horizon of {} bars exceeds day length {n}",
                ixf.nx()
            )));
        }
        let stdv = match stdv {
            Some(s) => smooth_stdv(s, n)?,
            None => vec![1.0; n],
        };
        let wix = indicator(&ixf);
        let w = variance_weights(n, &ixf, &stdv);
        Ok(Self {
            n,
            ixf,
            stdv,
            w,
            wix,
        })
    }

    /// Recompute the weights for a new day's variance profile.
    pub fn upd_stdv(&mut self, stdv: &[f64]) -> Result<(), ForecastError> {
        let stdv = smooth_stdv(stdv, self.n)?;
        self.w = variance_weights(self.n, &self.ixf, &stdv);
        self.stdv = stdv;
        Ok(())
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn nf(&self) -> usize {
        self.ixf.nf()
    }

    pub fn nx(&self) -> usize {
        self.ixf.nx()
    }

    pub fn horizon(&self) -> &HorizonIndex {
        &self.ixf
    }

    /// The smoothed per-bar standard deviation currently in use.
    pub fn stdv(&self) -> &[f64] {
        &self.stdv
    }

    pub fn weights(&self) -> &DMatrix<f64> {
        &self.w
    }

    pub fn indicator(&self) -> &DMatrix<f64> {
        &self.wix
    }

    /// Coarse → fine for a forecast made at bar `k`.
    pub fn fnx_k(&self, k: usize, coarse: &[f64]) -> Result<Vec<f64>, ForecastError> {
        self.check_bar(k)?;
        self.check_len("coarse forecast", self.nf(), coarse.len())?;
        let buckets = self.ixf.bucket_of_offsets();
        Ok((0..self.nx())
            .map(|j| coarse[buckets[j]] * self.w[(k % self.n, j)])
            .collect())
    }

    /// Fine → coarse: sum each bucket.
    pub fn fnf_k(&self, fine: &[f64]) -> Result<Vec<f64>, ForecastError> {
        self.check_len("fine forecast", self.nx(), fine.len())?;
        Ok((0..self.nf())
            .map(|i| fine[self.ixf.bucket_start(i)..=self.ixf.bucket_end(i)].iter().sum())
            .collect())
    }

    /// Coarse → fine for consecutive bars. Row `t` of `coarse` (`T × nf`) is
    /// the forecast made at bar `t mod n`; the result is `T × nx`.
    pub fn fnx_days(&self, coarse: &DMatrix<f64>) -> Result<DMatrix<f64>, ForecastError> {
        self.check_len("coarse forecast columns", self.nf(), coarse.ncols())?;
        let spread = coarse * &self.wix;
        Ok(DMatrix::from_fn(spread.nrows(), self.nx(), |t, j| {
            spread[(t, j)] * self.w[(t % self.n, j)]
        }))
    }

    /// Fine → coarse for consecutive bars: `T × nx` to `T × nf`.
    pub fn fnf_days(&self, fine: &DMatrix<f64>) -> Result<DMatrix<f64>, ForecastError> {
        self.check_len("fine forecast columns", self.nx(), fine.ncols())?;
        Ok(fine * self.wix.transpose())
    }

    /// Variance of each of the next `len` bars after bar `k`, aligned with
    /// the fine forecast made at `k`.
    pub fn variance_k(&self, k: usize, len: usize) -> Vec<f64> {
        (0..len)
            .map(|j| self.stdv[(k + j + 1) % self.n].powi(2))
            .collect()
    }

    fn check_bar(&self, k: usize) -> Result<(), ForecastError> {
        if k >= self.n {
            return Err(ForecastError::BarOutOfRange {
                bar: k,
                limit: self.n,
            });
        }
        Ok(())
    }

    fn check_len(&self, context: &str, expected: usize, actual: usize) -> Result<(), ForecastError> {
        if expected != actual {
            return Err(ForecastError::ShapeMismatch {
                context: context.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }
}

fn indicator(ixf: &HorizonIndex) -> DMatrix<f64> {
    let buckets = ixf.bucket_of_offsets();
    DMatrix::from_fn(ixf.nf(), ixf.nx(), |i, j| if buckets[j] == i { 1.0 } else { 0.0 })
}

/// Per-origin-bar variance shares.
///
/// The variance profile is tiled three times so that a bucket starting late in
/// the day wraps into the next day's bars; bucket sums come from a prefix sum
/// over the tiled array indexed by explicit start/end offset matrices.
fn variance_weights(n: usize, ixf: &HorizonIndex, stdv: &[f64]) -> DMatrix<f64> {
    let var: Vec<f64> = stdv.iter().map(|s| s * s).collect();

    let mut csum = vec![0.0; 3 * n + 1];
    for t in 0..3 * n {
        csum[t + 1] = csum[t] + var[t % n];
    }

    let nf = ixf.nf();
    // tiled positions of the first and last bar of bucket i for origin bar k
    let lo = DMatrix::from_fn(n, nf, |k, i| k + ixf.bucket_start(i) + 1);
    let hi = DMatrix::from_fn(n, nf, |k, i| k + ixf.bucket_end(i) + 1);
    let bucket_var = DMatrix::from_fn(n, nf, |k, i| csum[hi[(k, i)] + 1] - csum[lo[(k, i)]]);

    let buckets = ixf.bucket_of_offsets();
    DMatrix::from_fn(n, ixf.nx(), |k, j| {
        var[(k + j + 1) % n] / bucket_var[(k, buckets[j])]
    })
}

/// Validate a per-bar stdv profile, replacing zero or non-finite entries with
/// the previous valid entry (the next valid one for a leading run).
fn smooth_stdv(stdv: &[f64], n: usize) -> Result<Vec<f64>, ForecastError> {
    if stdv.len() != n {
        return Err(ForecastError::ShapeMismatch {
            context: "stdv".to_string(),
            expected: n,
            actual: stdv.len(),
        });
    }
    if let Some(i) = stdv.iter().position(|s| *s < 0.0) {
        return Err(ForecastError::InvalidVariance(format!(
            "negative stdv {} at bar {i}",
            stdv[i]
        )));
    }

    let valid = |s: f64| s.is_finite() && s > 0.0;
    let first = stdv
        .iter()
        .copied()
        .find(|s| valid(*s))
        .ok_or_else(|| ForecastError::InvalidVariance("no positive finite stdv".to_string()))?;

    let mut out = Vec::with_capacity(n);
    let mut last = first;
    let mut replaced = 0usize;
    for s in stdv {
        if valid(*s) {
            last = *s;
        } else {
            replaced += 1;
        }
        out.push(last);
    }
    if replaced > 0 {
        tracing::warn!(replaced, n, "replaced degenerate stdv entries with neighbouring values");
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn golden_map() -> HorizonMap {
        let n = 10;
        let stdv: Vec<f64> = (1..=10).map(f64::from).collect();
        let ixf = HorizonIndex::new(vec![0, 1, 2, 5, 9], n).unwrap();
        HorizonMap::new(n, ixf, Some(stdv.as_slice())).unwrap()
    }

    #[test]
    fn test_horizon_index_validation() {
        assert!(HorizonIndex::new(vec![1, 2], 10).is_err());
        assert!(HorizonIndex::new(vec![0, 3, 3], 10).is_err());
        assert!(HorizonIndex::new(vec![0, 10], 10).is_err());
        assert!(HorizonIndex::new(vec![], 10).is_err());

        let ixf = HorizonIndex::new(vec![0, 1, 2, 5, 9], 10).unwrap();
        assert_eq!(ixf.nf(), 5);
        assert_eq!(ixf.nx(), 10);
        assert_eq!(ixf.bucket_len(3), 3);
        assert_eq!(ixf.bucket_of_offsets(), vec![0, 1, 2, 3, 3, 3, 4, 4, 4, 4]);
    }

    #[test]
    fn test_fnx_days_golden_values() {
        let map = golden_map();
        let coarse = DMatrix::from_row_slice(
            2,
            5,
            &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
        );
        let fine = map.fnx_days(&coarse).unwrap();
        let expected = [
            0.0, 1.0, 2.0, 0.68181818, 0.98181818, 1.33636364, 1.04065041, 1.31707317,
            1.62601626, 0.01626016,
        ];
        for (j, e) in expected.iter().enumerate() {
            assert_abs_diff_eq!(fine[(0, j)], *e, epsilon = 1e-7);
        }

        // round trip for both rows
        let back = map.fnf_days(&fine).unwrap();
        for t in 0..2 {
            for i in 0..5 {
                assert_abs_diff_eq!(back[(t, i)], coarse[(t, i)], epsilon = 1e-7);
            }
        }
    }

    #[test]
    fn test_fnx_k_matches_fnx_days_row() {
        let map = golden_map();
        let coarse = [5.0, 6.0, 7.0, 8.0, 9.0];
        let days = map
            .fnx_days(&DMatrix::from_row_slice(2, 5, &[0.0, 0.0, 0.0, 0.0, 0.0, 5.0, 6.0, 7.0, 8.0, 9.0]))
            .unwrap();
        let row = map.fnx_k(1, &coarse).unwrap();
        for j in 0..10 {
            assert_abs_diff_eq!(row[j], days[(1, j)], epsilon = 1e-12);
        }
        assert_eq!(map.fnf_k(&row).unwrap().len(), 5);
    }

    #[test]
    fn test_uniform_stdv_degenerates_to_equal_weighting() {
        let ixf = HorizonIndex::new(vec![0, 2, 5, 6], 8).unwrap();
        let map = HorizonMap::new(8, ixf.clone(), None).unwrap();
        let buckets = ixf.bucket_of_offsets();
        for k in 0..8 {
            for j in 0..ixf.nx() {
                let expected = 1.0 / ixf.bucket_len(buckets[j]) as f64;
                assert_abs_diff_eq!(map.weights()[(k, j)], expected, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_round_trip_random_horizons() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let n: usize = rng.gen_range(2..40);
            let mut ixf = vec![0usize];
            let nx_target = rng.gen_range(1..=n);
            let mut next = 1;
            while next < nx_target {
                next += rng.gen_range(0..3);
                if next < nx_target {
                    ixf.push(next);
                    next += 1;
                }
            }
            let ixf = HorizonIndex::new(ixf, n).unwrap();
            let stdv: Vec<f64> = (0..n).map(|_| rng.gen_range(0.1..5.0)).collect();
            let map = HorizonMap::new(n, ixf, Some(stdv.as_slice())).unwrap();

            let t: usize = rng.gen_range(1..3 * n);
            let coarse = DMatrix::from_fn(t, map.nf(), |_, _| rng.gen_range(-3.0..3.0));
            let back = map.fnf_days(&map.fnx_days(&coarse).unwrap()).unwrap();
            for r in 0..t {
                for c in 0..map.nf() {
                    assert_abs_diff_eq!(back[(r, c)], coarse[(r, c)], epsilon = 1e-7);
                }
            }
        }
    }

    #[test]
    fn test_wraparound_bucket_uses_next_day_bars() {
        // last bar of the day: its next bar is bar 0 of the next day
        let map = golden_map();
        let fine = map.fnx_k(9, &[1.0, 0.0, 0.0, 0.0, 0.0]).unwrap();
        assert_abs_diff_eq!(fine[0], 1.0, epsilon = 1e-12);
        assert_eq!(map.variance_k(9, 2), vec![1.0, 4.0]);
    }

    #[test]
    fn test_shape_and_variance_errors() {
        let ixf = HorizonIndex::new(vec![0, 1], 4).unwrap();
        assert!(matches!(
            HorizonMap::new(4, ixf.clone(), Some(&[1.0, 1.0][..])),
            Err(ForecastError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            HorizonMap::new(4, ixf.clone(), Some(&[1.0, -1.0, 1.0, 1.0][..])),
            Err(ForecastError::InvalidVariance(_))
        ));
        assert!(matches!(
            HorizonMap::new(4, ixf.clone(), Some(&[0.0, 0.0, f64::NAN, 0.0][..])),
            Err(ForecastError::InvalidVariance(_))
        ));

        let map = HorizonMap::new(4, ixf, None).unwrap();
        assert!(matches!(map.fnx_k(4, &[1.0, 1.0]), Err(ForecastError::BarOutOfRange { .. })));
        assert!(matches!(map.fnx_k(0, &[1.0]), Err(ForecastError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_degenerate_stdv_is_smoothed() {
        let ixf = HorizonIndex::new(vec![0, 1, 3], 4).unwrap();
        let mut map = HorizonMap::new(4, ixf, None).unwrap();
        map.upd_stdv(&[0.0, 2.0, f64::INFINITY, 3.0]).unwrap();
        assert_eq!(map.stdv(), &[2.0, 2.0, 2.0, 3.0]);
        assert!(map.weights().iter().all(|w| w.is_finite()));
    }
}
