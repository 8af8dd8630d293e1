pub mod cross_talk;
pub mod dual_template;
pub mod interpolate;
pub mod non_stationary;
pub mod single_channel;

use serde::{Serialize, Deserialize};

use crate::{Result, SENTINEL};


/// Sub-bin refinement of a fit, in the same units as the discrete result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interpolation {
	pub delay: f64,
	pub chisq: f64,
	pub amplitudes: Vec<f64>,
}

/// Result of one fit.  Amplitudes are pulse heights (normalized amplitude times template max), one per
/// template or channel, and the delay is in time units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
	pub amplitudes: Vec<f64>,
	pub amplitudes_zero_delay: Vec<f64>,
	pub delay: f64,
	pub chisq: f64,
	pub chisq_base: f64,
	pub chisq_lf: Option<f64>,
	pub interpolated: Option<Interpolation>,
}

impl FitResult {

	/// A result whose every field holds `SENTINEL`.
	pub fn sentinel(n_amplitudes:usize, interpolated:bool) -> Self {
		FitResult {
			amplitudes: vec![SENTINEL; n_amplitudes],
			amplitudes_zero_delay: vec![SENTINEL; n_amplitudes],
			delay: SENTINEL,
			chisq: SENTINEL,
			chisq_base: SENTINEL,
			chisq_lf: None,
			interpolated: if interpolated { Some(Interpolation{ delay: SENTINEL, chisq: SENTINEL, amplitudes: vec![SENTINEL; n_amplitudes] }) } else { None },
		}
	}

	pub fn is_sentinel(&self) -> bool {
		let interp_ok = match &self.interpolated {
			Some(i) => i.delay == SENTINEL && i.chisq == SENTINEL && i.amplitudes.iter().all(|a| *a == SENTINEL),
			None => true,
		};
		self.delay == SENTINEL && self.chisq == SENTINEL && self.chisq_base == SENTINEL
			&& self.amplitudes.iter().chain(self.amplitudes_zero_delay.iter()).all(|a| *a == SENTINEL)
			&& self.chisq_lf.map(|c| c == SENTINEL).unwrap_or(true)
			&& interp_ok
	}

	pub fn amplitude(&self) -> f64 { self.amplitudes.first().cloned().unwrap_or(SENTINEL) }

}

/// Common surface of the filters that only need the waveforms to produce a result, so that batches can
/// be run without knowing which variant a detector needs.
pub trait MatchedFilter {
	type Output: Send;

	/// Number of waveforms `fit` expects, in channel order.
	fn n_channels(&self) -> usize;
	fn set_search_window(&mut self, low:i64, high:i64) -> Result<()>;
	fn fit(&self, waveforms:&[&[f64]]) -> Result<Self::Output>;
}

/// Index of the largest value over `lags`; the first one wins ties.
pub(crate) fn arg_max(series:&[f64], lags:&[usize]) -> Option<usize> {
	let mut best:Option<usize> = None;
	for &lag in lags {
		match best {
			Some(b) if series[b] >= series[lag] => {},
			_ => best = Some(lag),
		}
	}
	best
}

/// Index of the smallest value over `lags`; the first one wins ties.
pub(crate) fn arg_min(series:&[f64], lags:&[usize]) -> Option<usize> {
	let mut best:Option<usize> = None;
	for &lag in lags {
		match best {
			Some(b) if series[b] <= series[lag] => {},
			_ => best = Some(lag),
		}
	}
	best
}
