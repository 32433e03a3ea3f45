use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::MarketError;

/// Static trading parameters for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    pub symbol: String,
    /// Currency-pair legs for FX instruments, e.g. `("EUR", "USD")` for EURUSD.
    #[serde(default)]
    pub currencies: Option<(String, String)>,
    /// Multiplier from price points to account currency.
    #[serde(default = "default_contract_size")]
    pub contract_size: f64,
    pub tick_size: f64,
    /// Expected per-lot execution cost, in price units.
    pub tcost: f64,
    /// Fixed fee per trade, in account currency.
    #[serde(default)]
    pub fee: f64,
}

fn default_contract_size() -> f64 {
    1.0
}

/// A resolved currency pair. `inverted` is set when the listed instrument
/// quotes the legs in the opposite order to the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub symbol: String,
    pub base: String,
    pub quote: String,
    pub inverted: bool,
}

/// Immutable instrument table, built once and passed by reference.
/// Deserializes from a plain list of [`InstrumentSpec`], validated on load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<InstrumentSpec>", into = "Vec<InstrumentSpec>")]
pub struct InstrumentUniverse {
    instruments: Vec<InstrumentSpec>,
    by_symbol: HashMap<String, usize>,
    by_legs: HashMap<(String, String), usize>,
}

impl TryFrom<Vec<InstrumentSpec>> for InstrumentUniverse {
    type Error = MarketError;

    fn try_from(instruments: Vec<InstrumentSpec>) -> Result<Self, Self::Error> {
        Self::new(instruments)
    }
}

impl From<InstrumentUniverse> for Vec<InstrumentSpec> {
    fn from(universe: InstrumentUniverse) -> Self {
        universe.instruments
    }
}

impl InstrumentUniverse {
    pub fn new(instruments: Vec<InstrumentSpec>) -> Result<Self, MarketError> {
        let mut by_symbol = HashMap::new();
        let mut by_legs = HashMap::new();

        for (i, spec) in instruments.iter().enumerate() {
            let positive = |x: f64| x.is_finite() && x > 0.0;
            let non_negative = |x: f64| x.is_finite() && x >= 0.0;
            if !positive(spec.tick_size) || !positive(spec.contract_size) {
                return Err(MarketError::InvalidData(format!(
                    "{}: tick_size and contract_size must be positive",
                    spec.symbol
                )));
            }
            if !non_negative(spec.tcost) || !non_negative(spec.fee) {
                return Err(MarketError::InvalidData(format!(
                    "{}: tcost and fee must be non-negative",
                    spec.symbol
                )));
            }
            if by_symbol.insert(spec.symbol.clone(), i).is_some() {
                return Err(MarketError::InvalidData(format!(
                    "duplicate instrument {}",
                    spec.symbol
                )));
            }
            if let Some((base, quote)) = &spec.currencies {
                by_legs.insert((base.clone(), quote.clone()), i);
            }
        }

        Ok(Self {
            instruments,
            by_symbol,
            by_legs,
        })
    }

    pub fn get(&self, symbol: &str) -> Result<&InstrumentSpec, MarketError> {
        self.by_symbol
            .get(symbol)
            .map(|i| &self.instruments[*i])
            .ok_or_else(|| MarketError::NotFound(format!("instrument {symbol}")))
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.instruments.iter().map(|s| s.symbol.as_str())
    }

    /// Every currency appearing as a leg of some listed pair, sorted.
    pub fn currencies(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .by_legs
            .keys()
            .flat_map(|(b, q)| [b.clone(), q.clone()])
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Find the listed pair trading `ccy1` against `ccy2`, trying `ccy1ccy2`
    /// first and then `ccy2ccy1`.
    pub fn pair_for(&self, ccy1: &str, ccy2: &str) -> Result<CurrencyPair, MarketError> {
        let direct = (ccy1.to_string(), ccy2.to_string());
        if let Some(i) = self.by_legs.get(&direct) {
            return Ok(CurrencyPair {
                symbol: self.instruments[*i].symbol.clone(),
                base: direct.0,
                quote: direct.1,
                inverted: false,
            });
        }

        let reverse = (ccy2.to_string(), ccy1.to_string());
        if let Some(i) = self.by_legs.get(&reverse) {
            return Ok(CurrencyPair {
                symbol: self.instruments[*i].symbol.clone(),
                base: reverse.0,
                quote: reverse.1,
                inverted: true,
            });
        }

        Err(MarketError::NotFound(format!("currency pair {ccy1}/{ccy2}")))
    }
}
