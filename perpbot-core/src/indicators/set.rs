//! IndicatorSet — the configured bundle of indicators for one strategy.

use super::snapshot::{IndicatorSnapshot, SnapshotSeries};
use super::{Atr, Cvd, Fvg, Indicator, Tva, Vfi};
use crate::domain::{closed_only, Candle};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum IndicatorConfigError {
    #[error("{indicator}: {field} must be >= 1, got {value}")]
    ZeroLength {
        indicator: &'static str,
        field: &'static str,
        value: usize,
    },

    #[error("fvg: step_size must be a finite value >= 0, got {0}")]
    InvalidStepSize(f64),
}

/// ATR is always computed: every signal needs it for the bracket distances.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AtrSettings {
    pub length: usize,
}

impl Default for AtrSettings {
    fn default() -> Self {
        Self { length: 14 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CvdSettings {
    pub enabled: bool,
    pub cumulation_length: usize,
}

impl Default for CvdSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cumulation_length: 25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VfiSettings {
    pub enabled: bool,
    pub lookback: usize,
}

impl Default for VfiSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            lookback: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TvaSettings {
    pub enabled: bool,
    pub length: usize,
    pub smoothing: usize,
}

impl Default for TvaSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            length: 15,
            smoothing: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FvgSettings {
    pub enabled: bool,
    /// Minimum gap width in price units.
    pub step_size: f64,
}

impl Default for FvgSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            step_size: 0.0,
        }
    }
}

/// Enable flags and parameters for every indicator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct IndicatorSettings {
    pub atr: AtrSettings,
    pub cvd: CvdSettings,
    pub vfi: VfiSettings,
    pub tva: TvaSettings,
    pub fvg: FvgSettings,
}

impl IndicatorSettings {
    pub fn validate(&self) -> Result<(), IndicatorConfigError> {
        let lengths = [
            ("atr", "length", self.atr.length, true),
            ("cvd", "cumulation_length", self.cvd.cumulation_length, self.cvd.enabled),
            ("vfi", "lookback", self.vfi.lookback, self.vfi.enabled),
            ("tva", "length", self.tva.length, self.tva.enabled),
            ("tva", "smoothing", self.tva.smoothing, self.tva.enabled),
        ];
        for (indicator, field, value, enabled) in lengths {
            if enabled && value == 0 {
                return Err(IndicatorConfigError::ZeroLength {
                    indicator,
                    field,
                    value,
                });
            }
        }
        if self.fvg.enabled && !(self.fvg.step_size.is_finite() && self.fvg.step_size >= 0.0) {
            return Err(IndicatorConfigError::InvalidStepSize(self.fvg.step_size));
        }
        Ok(())
    }

    /// Number of enabled directional indicators (ATR excluded).
    pub fn enabled_directional(&self) -> usize {
        [
            self.cvd.enabled,
            self.vfi.enabled,
            self.tva.enabled,
            self.fvg.enabled,
        ]
        .iter()
        .filter(|e| **e)
        .count()
    }
}

/// The configured indicators. Disabled indicators are not computed at all.
#[derive(Debug, Clone)]
pub struct IndicatorSet {
    atr: Atr,
    cvd: Option<Cvd>,
    vfi: Option<Vfi>,
    tva: Option<Tva>,
    fvg: Option<Fvg>,
}

impl IndicatorSet {
    pub fn new(settings: &IndicatorSettings) -> Result<Self, IndicatorConfigError> {
        settings.validate()?;
        Ok(Self {
            atr: Atr::new(settings.atr.length),
            cvd: settings
                .cvd
                .enabled
                .then(|| Cvd::new(settings.cvd.cumulation_length)),
            vfi: settings.vfi.enabled.then(|| Vfi::new(settings.vfi.lookback)),
            tva: settings
                .tva
                .enabled
                .then(|| Tva::new(settings.tva.length, settings.tva.smoothing)),
            fvg: settings.fvg.enabled.then(|| Fvg::new(settings.fvg.step_size)),
        })
    }

    /// Longest warm-up among the configured indicators.
    pub fn lookback(&self) -> usize {
        [
            Some(self.atr.lookback()),
            self.cvd.as_ref().map(Indicator::lookback),
            self.vfi.as_ref().map(Indicator::lookback),
            self.tva.as_ref().map(Indicator::lookback),
            self.fvg.as_ref().map(Indicator::lookback),
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(0)
    }

    /// Closed candles needed before every configured indicator has a value.
    pub fn warmup_candles(&self) -> usize {
        self.lookback() + 1
    }

    /// Compute one snapshot per closed candle. Forming candles are dropped first.
    pub fn compute(&self, candles: &[Candle]) -> Vec<IndicatorSnapshot> {
        let closed = closed_only(candles);
        let n = closed.len();

        let atr = self.atr.compute(&closed);
        let cvd = series_or_none(self.cvd.as_ref(), &closed);
        let vfi = series_or_none(self.vfi.as_ref(), &closed);
        let tva = series_or_none(self.tva.as_ref(), &closed);
        let fvg = series_or_none(self.fvg.as_ref(), &closed);

        (0..n)
            .map(|i| IndicatorSnapshot {
                bar_time: closed[i].start_time,
                close: closed[i].close,
                atr: atr[i],
                cvd: cvd[i],
                vfi: vfi[i],
                tva: tva[i],
                fvg: fvg[i],
            })
            .collect()
    }

    /// Append snapshots for bars newer than the series' latest entry.
    /// Returns how many were appended.
    pub fn update(&self, series: &mut SnapshotSeries, candles: &[Candle]) -> usize {
        let latest = series.latest_time();
        self.compute(candles)
            .into_iter()
            .filter(|s| latest.map_or(true, |t| s.bar_time > t))
            .filter(|s| series.append(s.clone()))
            .count()
    }
}

fn series_or_none<I: Indicator>(indicator: Option<&I>, candles: &[Candle]) -> Vec<Option<I::Output>> {
    match indicator {
        Some(ind) => ind.compute(candles),
        None => vec![None; candles.len()],
    }
}
