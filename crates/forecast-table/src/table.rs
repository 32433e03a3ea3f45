use chrono::NaiveDate;
use nalgebra::DMatrix;

use crate::history::{latest_in_row, limit_at, DaySnapshot, ForecastHistory};
use crate::{ForecastError, ForecastSource, HorizonIndex, HorizonMap};

/// Handle to a model registered in a [`ForecastTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelId(usize);

impl ModelId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Registration parameters for one forecasting model.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub name: String,
    /// Bucket endpoints of the coarse forecasts the model emits.
    pub horizon: Vec<usize>,
    /// Initial per-bar standard deviation; all ones when absent.
    pub stdv: Option<Vec<f64>>,
    /// Blend weight applied to every contribution of this model.
    pub weight: f64,
    /// `n × n` quality matrix indexed `(origin bar, offset)`. Cells `<= 0`
    /// mask the model out of that slot. All ones when absent.
    pub quality: Option<DMatrix<f64>>,
}

impl ModelSpec {
    pub fn new(name: &str, horizon: Vec<usize>) -> Self {
        Self {
            name: name.to_string(),
            horizon,
            stdv: None,
            weight: 1.0,
            quality: None,
        }
    }

    /// Registration matching a source's name and horizon.
    pub fn from_source(source: &dyn ForecastSource) -> Self {
        Self::new(source.name(), source.horizon().to_vec())
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_quality(mut self, quality: DMatrix<f64>) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn with_stdv(mut self, stdv: Vec<f64>) -> Self {
        self.stdv = Some(stdv);
        self
    }
}

#[derive(Debug, Clone)]
struct ModelSlot {
    name: String,
    map: HorizonMap,
    weight: f64,
    quality: DMatrix<f64>,
}

/// Rolling `(2n, n)` table of fine forecasts for one instrument.
///
/// Row `r` is the delivery bar (today's bars `0..n`, tomorrow's `n..2n`),
/// column `c` the bar at whose close the forecast was written. Each write
/// carries a sequence stamp so reads can reconstruct "the latest forecast as
/// of bar k" even after later bars of the same day have been written.
#[derive(Debug, Clone)]
pub struct ForecastTable {
    n: usize,
    models: Vec<ModelSlot>,
    fcst: DMatrix<f64>,
    stamps: DMatrix<u64>,
    next_stamp: u64,
    day_start_stamp: u64,
    watermarks: Vec<Option<u64>>,
    days_completed: usize,
    history: Option<ForecastHistory>,
}

impl ForecastTable {
    pub fn new(n: usize, specs: Vec<ModelSpec>, save_history: bool) -> Result<Self, ForecastError> {
        if n == 0 {
            return Err(ForecastError::InvalidModel(
                "bars per day must be positive".to_string(),
            ));
        }
        if specs.is_empty() {
            return Err(ForecastError::InvalidModel(
                "at least one model is required".to_string(),
            ));
        }

        let mut models: Vec<ModelSlot> = Vec::with_capacity(specs.len());
        for spec in specs {
            if models.iter().any(|m| m.name == spec.name) {
                return Err(ForecastError::DuplicateModel(spec.name));
            }
            if !spec.weight.is_finite() || spec.weight < 0.0 {
                return Err(ForecastError::InvalidModel(format!(
                    "{}: weight must be finite and non-negative, got {}",
                    spec.name, spec.weight
                )));
            }
            let ixf = HorizonIndex::new(spec.horizon, n)?;
            let map = HorizonMap::new(n, ixf, spec.stdv.as_deref())?;
            let quality = match spec.quality {
                Some(q) => {
                    check_quality(&spec.name, n, &q)?;
                    q
                }
                None => DMatrix::from_element(n, n, 1.0),
            };
            models.push(ModelSlot {
                name: spec.name,
                map,
                weight: spec.weight,
                quality,
            });
        }

        tracing::debug!(n, models = models.len(), save_history, "forecast table created");

        Ok(Self {
            n,
            models,
            fcst: DMatrix::zeros(2 * n, n),
            stamps: DMatrix::zeros(2 * n, n),
            next_stamp: 1,
            day_start_stamp: 1,
            watermarks: vec![None; n],
            days_completed: 0,
            history: save_history.then(ForecastHistory::new),
        })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    pub fn days_completed(&self) -> usize {
        self.days_completed
    }

    pub fn model_id(&self, name: &str) -> Result<ModelId, ForecastError> {
        self.models
            .iter()
            .position(|m| m.name == name)
            .map(ModelId)
            .ok_or_else(|| ForecastError::UnknownModel(name.to_string()))
    }

    pub fn model_name(&self, id: ModelId) -> Result<&str, ForecastError> {
        self.slot(id).map(|m| m.name.as_str())
    }

    pub fn horizon_map(&self, id: ModelId) -> Result<&HorizonMap, ForecastError> {
        self.slot(id).map(|m| &m.map)
    }

    pub fn set_quality(&mut self, id: ModelId, quality: DMatrix<f64>) -> Result<(), ForecastError> {
        let n = self.n;
        let slot = self
            .models
            .get_mut(id.0)
            .ok_or_else(|| ForecastError::UnknownModel(format!("#{}", id.0)))?;
        check_quality(&slot.name, n, &quality)?;
        slot.quality = quality;
        Ok(())
    }

    pub fn set_weight(&mut self, id: ModelId, weight: f64) -> Result<(), ForecastError> {
        if !weight.is_finite() || weight < 0.0 {
            return Err(ForecastError::InvalidModel(format!(
                "weight must be finite and non-negative, got {weight}"
            )));
        }
        let slot = self
            .models
            .get_mut(id.0)
            .ok_or_else(|| ForecastError::UnknownModel(format!("#{}", id.0)))?;
        slot.weight = weight;
        Ok(())
    }

    /// Write the blended fine forecast made at the close of bar `k`.
    ///
    /// Each model's coarse forecast is decomposed through its horizon map.
    /// Slots where the model's quality is not positive are skipped. Each
    /// remaining slot holds `Σ w·q·fine / Σ w·q` over the contributing
    /// models, so quality and weight shift the blend but never its scale.
    /// Slots with no contributor are left unwritten.
    pub fn ni_update_k(&mut self, k: usize, inputs: &[(ModelId, &[f64])]) -> Result<(), ForecastError> {
        let n = self.n;
        if k >= n {
            return Err(ForecastError::BarOutOfRange { bar: k, limit: n });
        }

        let mut acc = vec![0.0; n];
        let mut total = vec![0.0; n];
        let mut seen = vec![false; self.models.len()];

        for (id, coarse) in inputs {
            let slot = self.slot(*id)?;
            if seen[id.0] {
                return Err(ForecastError::DuplicateModel(slot.name.clone()));
            }
            seen[id.0] = true;
            if coarse.iter().any(|x| !x.is_finite()) {
                return Err(ForecastError::NonFinite {
                    model: slot.name.clone(),
                    bar: k,
                });
            }

            let fine = slot.map.fnx_k(k, coarse)?;
            for (j, f) in fine.iter().enumerate() {
                let wq = slot.weight * slot.quality[(k, j)];
                if slot.quality[(k, j)] > 0.0 && wq > 0.0 {
                    acc[j] += wq * f;
                    total[j] += wq;
                }
            }
        }

        let stamp = self.next_stamp;
        self.next_stamp += 1;
        for j in 0..n {
            let (value, s) = if total[j] > 0.0 {
                (acc[j] / total[j], stamp)
            } else {
                (0.0, 0)
            };
            self.fcst[(k + j, k)] = value;
            self.stamps[(k + j, k)] = s;
        }
        self.watermarks[k] = Some(stamp);

        tracing::trace!(bar = k, models = inputs.len(), stamp, "forecast update");
        Ok(())
    }

    /// Replay a whole day of coarse forecasts, bar by bar. Each matrix is
    /// `n × nf` for its model.
    pub fn ni_update_day(&mut self, inputs: &[(ModelId, &DMatrix<f64>)]) -> Result<(), ForecastError> {
        for (id, coarse) in inputs {
            let slot = self.slot(*id)?;
            if coarse.nrows() != self.n || coarse.ncols() != slot.map.nf() {
                return Err(ForecastError::ShapeMismatch {
                    context: format!("day forecasts of {}", slot.name),
                    expected: self.n * slot.map.nf(),
                    actual: coarse.nrows() * coarse.ncols(),
                });
            }
        }

        for k in 0..self.n {
            let rows: Vec<Vec<f64>> = inputs
                .iter()
                .map(|(_, m)| m.row(k).iter().copied().collect())
                .collect();
            let per_bar: Vec<(ModelId, &[f64])> = inputs
                .iter()
                .zip(&rows)
                .map(|((id, _), r)| (*id, r.as_slice()))
                .collect();
            self.ni_update_k(k, &per_bar)?;
        }
        Ok(())
    }

    /// Poll every source for bar `k` of `day` and write the blend. Returns
    /// the number of sources that produced a forecast.
    pub fn update_from_sources(
        &mut self,
        day: NaiveDate,
        k: usize,
        sources: &mut [Box<dyn ForecastSource + Send>],
    ) -> Result<usize, ForecastError> {
        let mut produced: Vec<(ModelId, Vec<f64>)> = Vec::with_capacity(sources.len());
        for source in sources.iter_mut() {
            let id = self.model_id(source.name())?;
            if let Some(coarse) = source.produce(day, k)? {
                produced.push((id, coarse));
            }
        }
        let inputs: Vec<(ModelId, &[f64])> = produced
            .iter()
            .map(|(id, c)| (*id, c.as_slice()))
            .collect();
        self.ni_update_k(k, &inputs)?;
        Ok(inputs.len())
    }

    /// Latest fine forecast as of the close of bar `k` for the next `h` bars.
    ///
    /// `k == n` reads from the start of tomorrow using everything written
    /// today. Slots nobody has written read as zero.
    pub fn fnx_k(&self, k: usize, h: usize) -> Result<Vec<f64>, ForecastError> {
        if k > self.n {
            return Err(ForecastError::BarOutOfRange {
                bar: k,
                limit: self.n,
            });
        }
        self.check_h(h)?;
        let limit = limit_at(&self.watermarks, k, self.day_start_stamp);
        Ok((0..h)
            .map(|j| latest_in_row(&self.fcst, &self.stamps, k + j, limit))
            .collect())
    }

    /// `n × h` matrix whose row `k` is [`Self::fnx_k`]`(k, h)`.
    pub fn fnx_day(&self, h: usize) -> Result<DMatrix<f64>, ForecastError> {
        self.check_h(h)?;
        let mut out = DMatrix::zeros(self.n, h);
        for k in 0..self.n {
            for (j, v) in self.fnx_k(k, h)?.into_iter().enumerate() {
                out[(k, j)] = v;
            }
        }
        Ok(out)
    }

    /// Per-bar variance for the `h` bars after bar `k`, from the first
    /// registered model's current profile.
    pub fn variance_k(&self, k: usize, h: usize) -> Vec<f64> {
        self.models
            .first()
            .map(|m| m.map.variance_k(k % self.n, h))
            .unwrap_or_else(|| vec![0.0; h])
    }

    /// Close the day: optionally snapshot, shift tomorrow's block up, clear
    /// the bottom half, and install the new variance profile in every map.
    ///
    /// The new profile is validated before anything is mutated.
    pub fn eod(&mut self, new_stdv: Option<&[f64]>) -> Result<(), ForecastError> {
        let n = self.n;
        let new_maps = match new_stdv {
            Some(stdv) => Some(
                self.models
                    .iter()
                    .map(|m| {
                        let mut map = m.map.clone();
                        map.upd_stdv(stdv)?;
                        Ok(map)
                    })
                    .collect::<Result<Vec<_>, ForecastError>>()?,
            ),
            None => None,
        };

        if let Some(history) = self.history.as_mut() {
            history.push(DaySnapshot {
                values: self.fcst.rows(0, n).into_owned(),
                stamps: self.stamps.rows(0, n).into_owned(),
                watermarks: self.watermarks.clone(),
                start_stamp: self.day_start_stamp,
            });
        }

        let tomorrow = self.fcst.rows(n, n).into_owned();
        self.fcst.rows_mut(0, n).copy_from(&tomorrow);
        self.fcst.rows_mut(n, n).fill(0.0);
        let tomorrow_stamps = self.stamps.rows(n, n).into_owned();
        self.stamps.rows_mut(0, n).copy_from(&tomorrow_stamps);
        self.stamps.rows_mut(n, n).fill(0);

        self.watermarks = vec![None; n];
        self.day_start_stamp = self.next_stamp;
        self.days_completed += 1;

        if let Some(maps) = new_maps {
            for (slot, map) in self.models.iter_mut().zip(maps) {
                slot.map = map;
            }
        }

        tracing::debug!(day = self.days_completed, "forecast table rolled");
        Ok(())
    }

    pub fn history(&self) -> Option<&ForecastHistory> {
        self.history.as_ref()
    }

    /// For each absolute bar index `b = day × n + k` (days counted from
    /// table creation), the fine forecast that [`Self::fnx_k`]`(k, h)`
    /// returned at the close of that bar. Result is `bars.len() × h`.
    pub fn fnx_hist_latest(&self, bars: &[usize], h: usize) -> Result<DMatrix<f64>, ForecastError> {
        let history = self.history.as_ref().ok_or_else(|| {
            ForecastError::HistoryUnavailable("history saving is disabled".to_string())
        })?;
        self.check_h(h)?;

        let n = self.n;
        let mut out = DMatrix::zeros(bars.len(), h);
        for (r, &b) in bars.iter().enumerate() {
            let (d, k) = (b / n, b % n);
            let snap = history.day(d).ok_or_else(|| {
                ForecastError::HistoryUnavailable(format!(
                    "bar {b} falls on day {d}, only {} finalized",
                    history.len()
                ))
            })?;
            let limit = limit_at(&snap.watermarks, k, snap.start_stamp);
            let next = history.day(d + 1);

            for j in 0..h {
                let row = k + j;
                out[(r, j)] = if row < n {
                    latest_in_row(&snap.values, &snap.stamps, row, limit)
                } else {
                    match next {
                        Some(s) => latest_in_row(&s.values, &s.stamps, row - n, limit),
                        None => latest_in_row(&self.fcst, &self.stamps, row - n, limit),
                    }
                };
            }
        }
        Ok(out)
    }

    /// The raw `(2n, n)` value matrix.
    pub fn raw(&self) -> &DMatrix<f64> {
        &self.fcst
    }

    fn slot(&self, id: ModelId) -> Result<&ModelSlot, ForecastError> {
        self.models
            .get(id.0)
            .ok_or_else(|| ForecastError::UnknownModel(format!("#{}", id.0)))
    }

    fn check_h(&self, h: usize) -> Result<(), ForecastError> {
        if h > self.n {
            return Err(ForecastError::ShapeMismatch {
                context: "forecast horizon".to_string(),
                expected: self.n,
                actual: h,
            });
        }
        Ok(())
    }
}

fn check_quality(name: &str, n: usize, q: &DMatrix<f64>) -> Result<(), ForecastError> {
    if q.nrows() != n || q.ncols() != n {
        return Err(ForecastError::ShapeMismatch {
            context: format!("quality matrix of {name}"),
            expected: n * n,
            actual: q.nrows() * q.ncols(),
        });
    }
    if q.iter().any(|x| !x.is_finite()) {
        return Err(ForecastError::InvalidModel(format!(
            "{name}: quality matrix has non-finite entries"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const IXF: [usize; 5] = [0, 1, 2, 5, 9];

    fn stdv10() -> Vec<f64> {
        (1..=10).map(|x| x as f64).collect()
    }

    /// `mdl1` trusted only on the diagonal, `mdl2` (half weight) on and above it.
    fn two_model_table() -> ForecastTable {
        let n = 10;
        let q2 = DMatrix::from_fn(n, n, |k, j| if j >= k { 1.0 } else { 0.0 });
        let specs = vec![
            ModelSpec::new("mdl1", IXF.to_vec())
                .with_stdv(stdv10())
                .with_quality(DMatrix::identity(n, n)),
            ModelSpec::new("mdl2", IXF.to_vec())
                .with_stdv(stdv10())
                .with_weight(0.5)
                .with_quality(q2),
        ];
        ForecastTable::new(n, specs, false).unwrap()
    }

    fn single_model_table(n: usize, save_history: bool) -> ForecastTable {
        ForecastTable::new(n, vec![ModelSpec::new("m", IXF.to_vec())], save_history).unwrap()
    }

    fn random_day(rng: &mut StdRng, n: usize, nf: usize) -> DMatrix<f64> {
        DMatrix::from_fn(n, nf, |_, _| rng.gen_range(-1.0..1.0))
    }

    #[test]
    fn test_two_model_blend_at_bar_zero() {
        let mut table = two_model_table();
        let coarse = [0.0, 1.0, 2.0, 3.0, 4.0];
        let m1 = table.model_id("mdl1").unwrap();
        let m2 = table.model_id("mdl2").unwrap();
        table
            .ni_update_k(0, &[(m1, &coarse[..]), (m2, &coarse[..])])
            .unwrap();

        // Past offset 0 only mdl2 is unmasked, so its own fine forecast comes through.
        let got = table.fnx_k(0, 10).unwrap();
        let expected = [
            0.0, 1.0, 2.0, 0.68181818, 0.98181818, 1.33636364, 1.04065041, 1.31707317, 1.62601626,
            0.01626016,
        ];
        for (g, e) in got.iter().zip(expected) {
            assert_relative_eq!(*g, e, epsilon = 1e-7);
        }
    }

    #[test]
    fn test_two_model_blend_weights_shared_slot() {
        let mut table = two_model_table();
        let m1 = table.model_id("mdl1").unwrap();
        let m2 = table.model_id("mdl2").unwrap();
        table
            .ni_update_k(0, &[(m1, &[2.0, 0.0, 0.0, 0.0, 0.0][..]), (m2, &[5.0, 1.0, 2.0, 3.0, 4.0][..])])
            .unwrap();

        let got = table.fnx_k(0, 3).unwrap();
        // offset 0 is a one-bar bucket for both: (1·2 + 0.5·5) / 1.5
        assert_relative_eq!(got[0], 3.0, epsilon = 1e-9);
        assert_relative_eq!(got[1], 1.0, epsilon = 1e-9);
        assert_relative_eq!(got[2], 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_quality_shifts_blend_without_scaling() {
        let n = 10;
        let specs = vec![
            ModelSpec::new("a", IXF.to_vec()).with_quality(DMatrix::from_element(n, n, 2.0)),
            ModelSpec::new("b", IXF.to_vec()).with_quality(DMatrix::from_element(n, n, 1.0)),
        ];
        let mut pair = ForecastTable::new(n, specs, false).unwrap();
        let mut solo = single_model_table(n, false);
        let coarse = [1.0, 1.0, -0.5, 0.25, 2.0];

        let (a, b) = (pair.model_id("a").unwrap(), pair.model_id("b").unwrap());
        pair.ni_update_k(0, &[(a, &coarse[..]), (b, &coarse[..])]).unwrap();
        let m = solo.model_id("m").unwrap();
        solo.ni_update_k(0, &[(m, &coarse[..])]).unwrap();

        let blended = pair.fnx_k(0, n).unwrap();
        for (got, want) in blended.iter().zip(solo.fnx_k(0, n).unwrap()) {
            assert_relative_eq!(*got, want, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_quality_and_weight_set_the_mix() {
        let n = 10;
        let q_a = DMatrix::from_fn(n, n, |k, _| if k < 5 { 3.0 } else { 0.5 });
        let specs = vec![
            ModelSpec::new("a", IXF.to_vec()).with_stdv(stdv10()).with_quality(q_a),
            ModelSpec::new("b", IXF.to_vec()).with_stdv(stdv10()),
        ];
        let mut table = ForecastTable::new(n, specs, false).unwrap();
        let (a, b) = (table.model_id("a").unwrap(), table.model_id("b").unwrap());
        let ca = [0.4, -0.1, 0.3, 0.2, -0.6];
        let cb = [-0.2, 0.5, 0.1, -0.3, 0.8];
        let fine = |table: &ForecastTable, id, k, c: &[f64]| table.horizon_map(id).unwrap().fnx_k(k, c).unwrap();

        table.ni_update_k(2, &[(a, &ca[..]), (b, &cb[..])]).unwrap();
        let (fa, fb) = (fine(&table, a, 2, &ca), fine(&table, b, 2, &cb));
        let got = table.fnx_k(2, 8).unwrap();
        for j in 0..8 {
            assert_relative_eq!(got[j], (3.0 * fa[j] + fb[j]) / 4.0, epsilon = 1e-12);
        }

        table.set_weight(b, 2.0).unwrap();
        table.ni_update_k(6, &[(a, &ca[..]), (b, &cb[..])]).unwrap();
        let (fa, fb) = (fine(&table, a, 6, &ca), fine(&table, b, 6, &cb));
        let got = table.fnx_k(6, 4).unwrap();
        for j in 0..4 {
            assert_relative_eq!(got[j], (0.5 * fa[j] + 2.0 * fb[j]) / 2.5, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_quality_refresh_mid_day() {
        let n = 10;
        let specs = vec![ModelSpec::new("a", IXF.to_vec()), ModelSpec::new("b", IXF.to_vec())];
        let mut table = ForecastTable::new(n, specs, false).unwrap();
        let (a, b) = (table.model_id("a").unwrap(), table.model_id("b").unwrap());
        let ca = [1.0, 1.0, 1.0, 1.0, 1.0];
        let cb = [3.0, 3.0, 3.0, 3.0, 3.0];

        table.ni_update_k(0, &[(a, &ca[..]), (b, &cb[..])]).unwrap();
        let at0 = table.fnx_k(0, 1).unwrap();
        assert_relative_eq!(at0[0], 2.0, epsilon = 1e-12);

        // a loses all trust from here on; earlier writes keep their blend
        table.set_quality(a, DMatrix::zeros(n, n)).unwrap();
        table.ni_update_k(1, &[(a, &ca[..]), (b, &cb[..])]).unwrap();
        let fb = table.horizon_map(b).unwrap().fnx_k(1, &cb).unwrap();
        assert_eq!(table.fnx_k(1, 9).unwrap(), fb[..9].to_vec());
        assert_eq!(table.fnx_k(0, 1).unwrap(), at0);

        assert!(table.set_quality(a, DMatrix::zeros(3, 3)).is_err());
        assert!(table.set_quality(ModelId(9), DMatrix::zeros(n, n)).is_err());
        assert!(table.set_weight(b, -1.0).is_err());
        assert!(table.set_weight(ModelId(9), 1.0).is_err());
    }

    #[test]
    fn test_zero_weight_model_is_ignored() {
        let n = 10;
        let specs = vec![
            ModelSpec::new("a", IXF.to_vec()).with_weight(0.0),
            ModelSpec::new("b", IXF.to_vec()),
        ];
        let mut table = ForecastTable::new(n, specs, false).unwrap();
        let (a, b) = (table.model_id("a").unwrap(), table.model_id("b").unwrap());
        table.ni_update_k(0, &[(a, &[9.0; 5][..])]).unwrap();
        assert_eq!(table.fnx_k(0, 3).unwrap(), vec![0.0; 3]);

        table.ni_update_k(1, &[(a, &[9.0; 5][..]), (b, &[1.0; 5][..])]).unwrap();
        assert_relative_eq!(table.fnx_k(1, 1).unwrap()[0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_single_model_day_passes_through_horizon_map() {
        let n = 10;
        let mut table = single_model_table(n, false);
        let id = table.model_id("m").unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let coarse = random_day(&mut rng, n, IXF.len());

        table.ni_update_day(&[(id, &coarse)]).unwrap();
        let nx = table.horizon_map(id).unwrap().nx();
        let got = table.fnx_day(nx).unwrap();
        let expected = table.horizon_map(id).unwrap().fnx_days(&coarse).unwrap();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_identical_models_are_averaged_not_summed() {
        let n = 10;
        let specs = vec![ModelSpec::new("a", IXF.to_vec()), ModelSpec::new("b", IXF.to_vec())];
        let mut pair = ForecastTable::new(n, specs, false).unwrap();
        let mut solo = single_model_table(n, false);
        let coarse = [0.3, -0.2, 0.1, 0.4, -0.5];

        let (a, b) = (pair.model_id("a").unwrap(), pair.model_id("b").unwrap());
        pair.ni_update_k(3, &[(a, &coarse[..]), (b, &coarse[..])]).unwrap();
        let m = solo.model_id("m").unwrap();
        solo.ni_update_k(3, &[(m, &coarse[..])]).unwrap();

        assert_eq!(pair.fnx_k(3, 10).unwrap(), solo.fnx_k(3, 10).unwrap());
    }

    #[test]
    fn test_eod_moves_tomorrow_to_today() {
        let n = 10;
        let mut table = single_model_table(n, false);
        let id = table.model_id("m").unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        table.ni_update_day(&[(id, &random_day(&mut rng, n, IXF.len()))]).unwrap();

        let before = table.fnx_k(n, n).unwrap();
        assert!(before.iter().any(|v| *v != 0.0));
        table.eod(None).unwrap();
        let after = table.fnx_k(0, n).unwrap();
        assert_eq!(before, after);
        assert!(table.raw().rows(n, n).iter().all(|v| *v == 0.0));
        assert_eq!(table.days_completed(), 1);
    }

    #[test]
    fn test_eod_rejects_bad_stdv_without_mutation() {
        let n = 10;
        let mut table = single_model_table(n, false);
        let id = table.model_id("m").unwrap();
        table.ni_update_k(0, &[(id, &[1.0, 1.0, 1.0, 1.0, 1.0][..])]).unwrap();
        let raw = table.raw().clone();

        assert!(table.eod(Some(&[1.0, 2.0][..])).is_err());
        assert_eq!(table.raw(), &raw);
        assert_eq!(table.days_completed(), 0);
    }

    #[test]
    fn test_eod_propagates_stdv_to_every_model() {
        let mut table = two_model_table();
        let flat = vec![2.0; 10];
        table.eod(Some(flat.as_slice())).unwrap();
        for name in ["mdl1", "mdl2"] {
            let id = table.model_id(name).unwrap();
            assert_eq!(table.horizon_map(id).unwrap().stdv(), flat.as_slice());
        }
        assert_relative_eq!(table.variance_k(0, 1)[0], 4.0);
    }

    #[test]
    fn test_masked_slot_keeps_older_forecast() {
        let n = 10;
        let q = DMatrix::from_fn(n, n, |k, _| if k == 1 { 0.0 } else { 1.0 });
        let mut table =
            ForecastTable::new(n, vec![ModelSpec::new("m", IXF.to_vec()).with_quality(q)], false).unwrap();
        let id = table.model_id("m").unwrap();

        table.ni_update_k(0, &[(id, &[1.0, 1.0, 1.0, 1.0, 1.0][..])]).unwrap();
        let at0 = table.fnx_k(0, 10).unwrap();
        table.ni_update_k(1, &[(id, &[9.0, 9.0, 9.0, 9.0, 9.0][..])]).unwrap();

        // bar 1 is fully masked, so its view is still bar 0's forecast
        let at1 = table.fnx_k(1, 9).unwrap();
        assert_eq!(at1, at0[1..].to_vec());
    }

    #[test]
    fn test_later_bars_do_not_leak_into_earlier_views() {
        let n = 10;
        let mut table = single_model_table(n, false);
        let id = table.model_id("m").unwrap();
        table.ni_update_k(2, &[(id, &[1.0, 1.0, 1.0, 1.0, 1.0][..])]).unwrap();
        let before = table.fnx_k(2, 5).unwrap();
        table.ni_update_k(3, &[(id, &[-4.0, -4.0, -4.0, -4.0, -4.0][..])]).unwrap();
        assert_eq!(table.fnx_k(2, 5).unwrap(), before);
        assert_ne!(table.fnx_k(3, 5).unwrap(), table.fnx_k(2, 6).unwrap()[1..].to_vec());
    }

    #[test]
    fn test_update_errors() {
        let n = 10;
        let mut table = single_model_table(n, false);
        let id = table.model_id("m").unwrap();
        let good = [0.0; 5];

        assert!(matches!(table.model_id("nope"), Err(ForecastError::UnknownModel(_))));
        assert!(matches!(
            table.ni_update_k(n, &[(id, &good[..])]),
            Err(ForecastError::BarOutOfRange { .. })
        ));
        assert!(matches!(
            table.ni_update_k(0, &[(id, &good[..]), (id, &good[..])]),
            Err(ForecastError::DuplicateModel(_))
        ));
        assert!(matches!(
            table.ni_update_k(0, &[(id, &[0.0, f64::NAN, 0.0, 0.0, 0.0][..])]),
            Err(ForecastError::NonFinite { bar: 0, .. })
        ));
        assert!(matches!(
            table.ni_update_k(0, &[(ModelId(7), &good[..])]),
            Err(ForecastError::UnknownModel(_))
        ));
        assert!(table.fnx_k(n + 1, 1).is_err());
        assert!(table.fnx_k(0, n + 1).is_err());
    }

    #[test]
    fn test_registration_errors() {
        let dup = vec![ModelSpec::new("m", IXF.to_vec()), ModelSpec::new("m", IXF.to_vec())];
        assert!(matches!(
            ForecastTable::new(10, dup, false),
            Err(ForecastError::DuplicateModel(_))
        ));
        let bad_q = vec![ModelSpec::new("m", IXF.to_vec()).with_quality(DMatrix::zeros(3, 3))];
        assert!(ForecastTable::new(10, bad_q, false).is_err());
        let bad_w = vec![ModelSpec::new("m", IXF.to_vec()).with_weight(f64::NAN)];
        assert!(ForecastTable::new(10, bad_w, false).is_err());
        assert!(ForecastTable::new(10, vec![], false).is_err());
    }

    #[test]
    fn test_history_replays_live_views() {
        let n = 10;
        let mut table = single_model_table(n, true);
        let id = table.model_id("m").unwrap();
        let mut rng = StdRng::seed_from_u64(5);

        let mut live = Vec::new();
        for _day in 0..3 {
            let coarse = random_day(&mut rng, n, IXF.len());
            for k in 0..n {
                let row: Vec<f64> = coarse.row(k).iter().copied().collect();
                table.ni_update_k(k, &[(id, row.as_slice())]).unwrap();
                live.push(table.fnx_k(k, n).unwrap());
            }
            table.eod(None).unwrap();
        }

        let bars: Vec<usize> = (0..3 * n).collect();
        let replay = table.fnx_hist_latest(&bars, n).unwrap();
        for (b, view) in live.iter().enumerate() {
            let row: Vec<f64> = replay.row(b).iter().copied().collect();
            assert_eq!(&row, view, "bar {b}");
        }
        assert_eq!(table.history().unwrap().len(), 3);
    }

    #[test]
    fn test_history_errors() {
        let table = single_model_table(10, false);
        assert!(matches!(
            table.fnx_hist_latest(&[0], 1),
            Err(ForecastError::HistoryUnavailable(_))
        ));

        let mut table_h = single_model_table(10, true);
        assert!(table_h.fnx_hist_latest(&[0], 1).is_err());
        table_h.eod(None).unwrap();
        assert!(table_h.fnx_hist_latest(&[9], 1).is_ok());
        assert!(table_h.fnx_hist_latest(&[10], 1).is_err());
    }

    struct Constant {
        ixf: Vec<usize>,
    }

    impl ForecastSource for Constant {
        fn name(&self) -> &str {
            "m"
        }
        fn horizon(&self) -> &[usize] {
            &self.ixf
        }
        fn produce(&mut self, _day: NaiveDate, bar: usize) -> Result<Option<Vec<f64>>, ForecastError> {
            Ok((bar % 2 == 0).then(|| vec![1.0; self.ixf.len()]))
        }
    }

    #[test]
    fn test_update_from_sources() {
        let source = Constant { ixf: IXF.to_vec() };
        let spec = ModelSpec::from_source(&source);
        let mut table = ForecastTable::new(10, vec![spec], false).unwrap();
        let mut sources: Vec<Box<dyn ForecastSource + Send>> = vec![Box::new(source)];
        let day = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();

        assert_eq!(table.update_from_sources(day, 0, &mut sources).unwrap(), 1);
        assert_eq!(table.update_from_sources(day, 1, &mut sources).unwrap(), 0);
        assert!(table.fnx_k(0, 1).unwrap()[0] != 0.0);
    }
}
