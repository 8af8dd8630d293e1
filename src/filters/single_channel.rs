use log::trace;
use num_complex::Complex;

use super::{arg_max, interpolate, FitResult, Interpolation, MatchedFilter};
use crate::fourier_analysis::{apply_kernel, shift_phase, SpectralTransform};
use crate::model::{NoiseModel, OptimalKernel, Template};
use crate::utils::{signed_lag, SearchWindow};
use crate::{check_len, OptFiltErr, Result, SENTINEL};

/// Stationary-noise optimal filter for one channel and one template.
#[derive(Debug, Clone, Default)]
pub struct SingleChannelMatchedFilter {
	template: Option<Template>,
	noise: Option<NoiseModel>,
	prepared: Option<(SpectralTransform, OptimalKernel)>,
	window: Option<SearchWindow>,
	interpolate: bool,
	low_freq_cutoff_hz: Option<f64>,
}

impl SingleChannelMatchedFilter {

	pub fn new() -> Self { Self::default() }

	pub fn load_template(&mut self, template:Template) -> Result<()> {
		self.template = Some(template);
		self.prepare()
	}

	pub fn load_noise_model(&mut self, noise:NoiseModel) -> Result<()> {
		self.noise = Some(noise);
		self.prepare()
	}

	/// Lags `[low, high)` are searched; a negative `low` wraps to the end of the trace.
	pub fn set_search_window(&mut self, low:i64, high:i64) -> Result<()> {
		let window = SearchWindow::new(low, high);
		if let Some(template) = &self.template { window.validate(template.len())?; }
		self.window = Some(window);
		Ok(())
	}

	pub fn set_interpolation(&mut self, on:bool) { self.interpolate = on; }

	/// Adds a chi-square restricted to frequencies up to `cutoff_hz` to every result.
	pub fn set_low_freq_cutoff(&mut self, cutoff_hz:Option<f64>) { self.low_freq_cutoff_hz = cutoff_hz; }

	/// Drops the loaded template and noise model.
	pub fn clear(&mut self) {
		self.template = None;
		self.noise = None;
		self.prepared = None;
	}

	pub fn template(&self) -> Option<&Template> { self.template.as_ref() }
	pub fn kernel(&self) -> Option<&OptimalKernel> { self.prepared.as_ref().map(|(_, k)| k) }

	fn prepare(&mut self) -> Result<()> {
		self.prepared = None;
		if let (Some(template), Some(noise)) = (&self.template, &self.noise) {
			check_len(template.len(), noise.len())?;
			if let Some(window) = self.window { window.validate(template.len())?; }
			self.prepared = Some((SpectralTransform::new(template.len())?, OptimalKernel::new(template, noise)?));
		}
		Ok(())
	}

	fn ready(&self) -> Result<(&Template, &NoiseModel, &SpectralTransform, &OptimalKernel, SearchWindow)> {
		let template = self.template.as_ref().ok_or(OptFiltErr::UninitializedState("no template loaded"))?;
		let noise = self.noise.as_ref().ok_or(OptFiltErr::UninitializedState("no noise model loaded"))?;
		let (transform, kernel) = self.prepared.as_ref().ok_or(OptFiltErr::UninitializedState("filter not prepared"))?;
		let window = self.window.ok_or(OptFiltErr::UninitializedState("no search window set"))?;
		Ok((template, noise, transform, kernel, window))
	}

	/// Normalized amplitude at every lag for an already transformed pulse.
	pub fn amplitude_series(&self, spectrum:&[Complex<f64>]) -> Result<Vec<f64>> {
		let (_, _, transform, kernel, _) = self.ready()?;
		let s = kernel.sig_to_noise_sq;
		Ok(transform.correlate(&apply_kernel(spectrum, &kernel.kernel))?.into_iter().map(|v| v / s).collect())
	}

	pub fn fit(&self, waveform:&[f64]) -> Result<FitResult> {
		let (template, noise, transform, kernel, window) = self.ready()?;
		let n = template.len();
		check_len(n, waveform.len())?;

		let p = transform.forward(waveform)?;
		let amps = self.amplitude_series(&p)?;
		let lags = window.lags(n)?;
		let best = arg_max(&amps, &lags).ok_or(OptFiltErr::InvalidInput("Search window is empty"))?;

		let amp = amps[best];
		let delay_bins = signed_lag(best, n);
		let bins:Vec<usize> = (1..n).collect();
		let chisq = residual_chisq(&p, template.spectrum(), noise.power(), amp, delay_bins, &bins);
		let chisq_base = noise.weighted_energy(&p)?;

		let chisq_lf = self.low_freq_cutoff_hz.map(|fc| {
			match low_frequency_bins(fc, template.dt(), n) {
				Some(bins) => residual_chisq(&p, template.spectrum(), noise.power(), amp, delay_bins, &bins),
				None => SENTINEL,
			}
		});

		let tmax = template.template_max();
		let dt = template.dt();
		let interpolated = if self.interpolate {
			// at its best amplitude, each lag has chisq = base - S A^2
			let s = kernel.sig_to_noise_sq;
			let chisq_series:Vec<f64> = amps.iter().map(|a| chisq_base - s*a*a).collect();
			let r = interpolate::refine(best, &chisq_series, &[&amps]);
			Some(Interpolation{ delay: r.delay_bins * dt, chisq: r.chisq, amplitudes: r.amplitudes.iter().map(|a| a * tmax).collect() })
		} else { None };

		trace!("{}: amp={:.4} delay={} bins chisq={:.3}", template.tag, amp, delay_bins, chisq);

		Ok(FitResult {
			amplitudes: vec![amp * tmax],
			amplitudes_zero_delay: vec![amps[0] * tmax],
			delay: (delay_bins as f64) * dt,
			chisq,
			chisq_base,
			chisq_lf,
			interpolated,
		})
	}

}

impl MatchedFilter for SingleChannelMatchedFilter {
	type Output = FitResult;

	fn n_channels(&self) -> usize { 1 }

	fn set_search_window(&mut self, low:i64, high:i64) -> Result<()> {
		SingleChannelMatchedFilter::set_search_window(self, low, high)
	}

	fn fit(&self, waveforms:&[&[f64]]) -> Result<FitResult> {
		check_len(1, waveforms.len())?;
		SingleChannelMatchedFilter::fit(self, waveforms[0])
	}
}

/// `sum_{k in bins} |P_k - A T_k exp(-2 pi i k d / N)|^2 / J_k`
pub(crate) fn residual_chisq(p:&[Complex<f64>], t:&[Complex<f64>], power:&[f64], amp:f64, delay_bins:i64, bins:&[usize]) -> f64 {
	let shifted = shift_phase(t, -delay_bins);
	bins.iter().map(|&k| (p[k] - shifted[k] * amp).norm_sqr() / power[k]).sum()
}

/// Bins at or below `cutoff_hz` on both halves of the spectrum, DC excluded.  `None` when the cutoff
/// does not select a proper sub-band.
pub(crate) fn low_frequency_bins(cutoff_hz:f64, dt:f64, n:usize) -> Option<Vec<usize>> {
	let dnu = 1.0 / (dt * (n as f64));
	if !(cutoff_hz > 0.0) { return None; }
	let pos = (cutoff_hz / dnu).floor() as usize;
	let neg = (n + 1).saturating_sub((cutoff_hz / dnu).ceil() as usize);
	if pos < 1 || pos > n/2 || neg + 1 > n || neg < n/2 + 1 { return None; }
	Some((1..=pos).chain(neg..n).collect())
}
