pub mod sparse;

use serde::{Serialize, Deserialize};

use crate::{OptFiltErr, Result};


/// Maps a lag index in `0..n` onto the signed range `[-n/2, n/2)`.
pub fn signed_lag(idx:usize, n:usize) -> i64 {
	if idx < n/2 { idx as i64 } else { (idx as i64) - (n as i64) }
}

/// Maps any signed lag onto `0..n`.
pub fn cyclic_index(lag:i64, n:usize) -> usize { lag.rem_euclid(n as i64) as usize }

/// Signed, fractional version of `signed_lag` used after interpolation.
pub fn wrap_delay(delay_bins:f64, n:usize) -> f64 {
	let n = n as f64;
	let d = delay_bins.rem_euclid(n);
	if d >= n / 2.0 { d - n } else { d }
}

/// A half-open range `[low, high)` of signed cyclic lags.  A negative `low` wraps around the end of
/// the trace, so `[-w, w1)` covers `0..w1` followed by `N-w..N`.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub struct SearchWindow {
	pub low: i64,
	pub high: i64,
}

impl SearchWindow {

	pub fn new(low:i64, high:i64) -> Self { SearchWindow{ low, high } }

	pub fn full(n:usize) -> Self { SearchWindow{ low: 0, high: n as i64 } }

	/// Window from an inclusive pair of bounds, the way pulse-timing windows are usually quoted.
	pub fn inclusive(min:i64, max:i64) -> Self { SearchWindow{ low: min, high: max + 1 } }

	pub fn validate(&self, n:usize) -> Result<()> {
		let n = n as i64;
		if self.high <= self.low { Err(OptFiltErr::InvalidInput("Search window is empty")) }
		else if self.high - self.low > n { Err(OptFiltErr::InvalidInput("Search window is longer than the trace")) }
		else if self.low < -n || self.high > n { Err(OptFiltErr::InvalidInput("Search window bound outside of the trace")) }
		else { Ok(()) }
	}

	/// Lag indices in `0..n`, in scan order: `0..high` first, then the wrapped part at the end of the trace.
	pub fn lags(&self, n:usize) -> Result<Vec<usize>> {
		self.validate(n)?;
		let mut lags:Vec<usize> = (self.low..self.high).map(|lag| cyclic_index(lag, n)).collect();
		lags.sort_unstable();
		Ok(lags)
	}

	pub fn contains(&self, idx:usize, n:usize) -> bool {
		let offset = (idx as i64 - self.low).rem_euclid(n as i64);
		offset < self.high - self.low
	}

}

/// Injects `amplitude * template`, cyclically delayed by `delay_bins`, onto a noise trace.
pub fn construct_fake_pulse(noise:&[f64], template:&[f64], amplitude:f64, delay_bins:i64) -> Result<Vec<f64>> {
	crate::check_len(noise.len(), template.len())?;
	let n = noise.len();
	let mut pulse = noise.to_vec();
	for (i, t) in template.iter().enumerate() {
		let j = cyclic_index((i as i64) + delay_bins, n);
		pulse[j] += amplitude * t;
	}
	Ok(pulse)
}
