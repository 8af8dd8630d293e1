use log::{debug, trace};
use serde::{Serialize, Deserialize};

use super::{arg_min, interpolate, FitResult, Interpolation, MatchedFilter};
use crate::fourier_analysis::SpectralTransform;
use crate::model::cross_talk::{CrossTalkSet, SideModel};
use crate::utils::{cyclic_index, signed_lag, SearchWindow};
use crate::{check_len, ChannelTag, OptFiltErr, Result, Side};

/// Result for the channels of one side.  `fit.amplitudes` follows `channels`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SideResult {
	pub side: Side,
	pub channels: Vec<ChannelTag>,
	pub fit: FitResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossTalkResult {
	/// Hundreds digit: 1 single channel, 2 coupled pair.  Tens: interpolation applied.  Units: time
	/// constraint between sides applied.
	pub of_flag: u32,
	pub sides: Vec<SideResult>,
}

impl CrossTalkResult {

	pub fn side(&self, side:Side) -> Option<&SideResult> { self.sides.iter().find(|s| s.side == side) }

	pub fn amplitude(&self, tag:ChannelTag) -> Option<f64> {
		self.sides.iter().find_map(|s| s.channels.iter().position(|c| *c == tag).map(|i| s.fit.amplitudes[i]))
	}

}

/// Per-lag series of one side.
struct SideSeries {
	amps: Vec<Vec<f64>>,
	chisq: Vec<f64>,
	chisq_base: f64,
}

/// Optimal filter over 1, 2 or 4 channels where each coupled pair leaks into itself through cross-talk
/// templates.  Channels on different sides share no templates but may be tied in time.
#[derive(Debug, Clone, Default)]
pub struct CrossTalkMatchedFilter {
	set: Option<CrossTalkSet>,
	transform: Option<SpectralTransform>,
	window: Option<SearchWindow>,
	time_constraint: Option<(i64, i64)>,
	interpolate: bool,
}

impl CrossTalkMatchedFilter {

	pub fn new() -> Self { Self::default() }

	pub fn load_channel_set(&mut self, set:CrossTalkSet) -> Result<()> {
		if let Some(window) = self.window { window.validate(set.len())?; }
		self.transform = Some(SpectralTransform::new(set.len())?);
		debug!("Cross-talk filter loaded with channels {:?}", set.channels());
		self.set = Some(set);
		Ok(())
	}

	pub fn channel_set(&self) -> Option<&CrossTalkSet> { self.set.as_ref() }

	/// Lags `[low, high)` searched on side 1 (and on side 2 when unconstrained).
	pub fn set_search_window(&mut self, low:i64, high:i64) -> Result<()> {
		let window = SearchWindow::new(low, high);
		if let Some(set) = &self.set { window.validate(set.len())?; }
		self.window = Some(window);
		Ok(())
	}

	/// Restricts the side 2 lag to `side1 + z` for `z` in `[z_min, z_max]`; `None` lifts the constraint.
	pub fn set_time_constraint(&mut self, window:Option<(i64, i64)>) -> Result<()> {
		if let Some((z_min, z_max)) = window {
			if z_max < z_min { return Err(OptFiltErr::InvalidInput("Time constraint window is empty")); }
		}
		self.time_constraint = window;
		Ok(())
	}

	pub fn set_interpolation(&mut self, on:bool) { self.interpolate = on; }

	fn side_series(transform:&SpectralTransform, side:&SideModel, waveforms:&[&[f64]]) -> Result<SideSeries> {
		let mut spectra = vec![];
		for w in waveforms.iter() { spectra.push(transform.forward(w)?); }

		let filtered = side.filtered_spectra(&spectra)?;
		let mut pp = vec![];
		for f in filtered.iter() { pp.push(transform.correlate(f)?); }

		let n = transform.len();
		let m = side.len();
		let w_inv = side.weighting_inverse();
		let chisq_base = side.chisq_base(&spectra)?;

		let mut amps = vec![vec![0.0; n]; m];
		let mut chisq = vec![chisq_base; n];
		for lag in 0..n {
			for i in 0..m {
				amps[i][lag] = (0..m).map(|j| w_inv[(i, j)] * pp[j][lag]).sum();
			}
			for i in 0..m {
				chisq[lag] -= amps[i][lag] * pp[i][lag];
			}
		}

		Ok(SideSeries{ amps, chisq, chisq_base })
	}

	fn side_result(&self, side:&SideModel, series:&SideSeries, lag:usize, dt:f64) -> SideResult {
		let n = series.chisq.len();
		let tmax:Vec<f64> = side.models().iter().map(|m| m.template.template_max()).collect();

		let interpolated = if self.interpolate {
			let amp_refs:Vec<&[f64]> = series.amps.iter().map(|a| a.as_slice()).collect();
			let r = interpolate::refine(lag, &series.chisq, &amp_refs);
			Some(Interpolation {
				delay: r.delay_bins * dt,
				chisq: r.chisq,
				amplitudes: r.amplitudes.iter().zip(tmax.iter()).map(|(a, t)| a * t).collect(),
			})
		} else { None };

		SideResult {
			side: side.side,
			channels: side.channels(),
			fit: FitResult {
				amplitudes: series.amps.iter().zip(tmax.iter()).map(|(a, t)| a[lag] * t).collect(),
				amplitudes_zero_delay: series.amps.iter().zip(tmax.iter()).map(|(a, t)| a[0] * t).collect(),
				delay: (signed_lag(lag, n) as f64) * dt,
				chisq: series.chisq[lag],
				chisq_base: series.chisq_base,
				chisq_lf: None,
				interpolated,
			}
		}
	}

	/// Waveforms in the order of `CrossTalkSet::channels`.
	pub fn fit(&self, waveforms:&[&[f64]]) -> Result<CrossTalkResult> {
		let set = self.set.as_ref().ok_or(OptFiltErr::UninitializedState("no channel set loaded"))?;
		let transform = self.transform.as_ref().ok_or(OptFiltErr::UninitializedState("filter not prepared"))?;
		let window = self.window.ok_or(OptFiltErr::UninitializedState("no search window set"))?;
		check_len(set.n_channels(), waveforms.len())?;
		let n = set.len();
		for w in waveforms.iter() { check_len(n, w.len())?; }

		let mut series = vec![];
		let mut offset = 0;
		for side in set.sides().iter() {
			series.push(Self::side_series(transform, side, &waveforms[offset..offset + side.len()])?);
			offset += side.len();
		}

		let lags = window.lags(n)?;
		let constrained = series.len() == 2 && self.time_constraint.is_some();
		let chosen:Vec<usize> = match (constrained, self.time_constraint) {
			(true, Some((z_min, z_max))) => {
				let mut best:Option<(f64, usize, usize)> = None;
				for &d1 in lags.iter() {
					for z in z_min..=z_max {
						let d2 = cyclic_index(d1 as i64 + z, n);
						let total = series[0].chisq[d1] + series[1].chisq[d2];
						match best {
							Some((b, _, _)) if b <= total => {},
							_ => best = Some((total, d1, d2)),
						}
					}
				}
				let (_, d1, d2) = best.ok_or(OptFiltErr::InvalidInput("Search window is empty"))?;
				vec![d1, d2]
			},
			_ => {
				let mut chosen = vec![];
				for s in series.iter() {
					chosen.push(arg_min(&s.chisq, &lags).ok_or(OptFiltErr::InvalidInput("Search window is empty"))?);
				}
				chosen
			},
		};

		let dt = set.dt();
		let sides:Vec<SideResult> = set.sides().iter().zip(series.iter()).zip(chosen.iter())
			.map(|((side, s), lag)| self.side_result(side, s, *lag, dt))
			.collect();

		let pair = set.sides().iter().any(|s| s.len() == 2);
		let of_flag = (if pair { 200 } else { 100 }) + (if self.interpolate { 10 } else { 0 }) + (if constrained { 1 } else { 0 });
		trace!("Cross-talk fit: flag={} delays={:?}", of_flag, sides.iter().map(|s| s.fit.delay).collect::<Vec<f64>>());

		Ok(CrossTalkResult{ of_flag, sides })
	}

}

impl MatchedFilter for CrossTalkMatchedFilter {
	type Output = CrossTalkResult;

	fn n_channels(&self) -> usize { self.set.as_ref().map(|s| s.n_channels()).unwrap_or(0) }

	fn set_search_window(&mut self, low:i64, high:i64) -> Result<()> {
		CrossTalkMatchedFilter::set_search_window(self, low, high)
	}

	fn fit(&self, waveforms:&[&[f64]]) -> Result<CrossTalkResult> { CrossTalkMatchedFilter::fit(self, waveforms) }
}
