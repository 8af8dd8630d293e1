pub mod covariance;
pub mod cross_talk;

use log::debug;
use num_complex::Complex;
use num_traits::Zero;
use serde::{Serialize, Deserialize};

use crate::fourier_analysis::SpectralTransform;
use crate::{check_len, ChannelTag, OptFiltErr, Result};

#[cfg(test)]
mod tests;

/// Expected pulse shape of one channel, held in the frequency domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
	pub tag: ChannelTag,
	spectrum: Vec<Complex<f64>>,
	template_max: f64,
	dt: f64,
}

impl Template {

	/// Builds a template from a time-domain trace.  The template max is the largest sample and is used to
	/// express fitted amplitudes as pulse heights.
	pub fn from_waveform(tag:ChannelTag, waveform:&[f64], dt:f64) -> Result<Self> {
		let transform = SpectralTransform::new(waveform.len())?;
		let template_max = waveform.iter().cloned().fold(std::f64::MIN, f64::max);
		Self::from_spectrum(tag, transform.forward(waveform)?, template_max, dt)
	}

	pub fn from_spectrum(tag:ChannelTag, spectrum:Vec<Complex<f64>>, template_max:f64, dt:f64) -> Result<Self> {
		if spectrum.is_empty() { return Err(OptFiltErr::InvalidInput("Empty template")); }
		if !(dt > 0.0) { return Err(OptFiltErr::InvalidInput("Sample period must be positive")); }
		Ok(Template{ tag, spectrum, template_max, dt })
	}

	pub fn len(&self) -> usize { self.spectrum.len() }
	pub fn spectrum(&self) -> &[Complex<f64>] { &self.spectrum }
	pub fn template_max(&self) -> f64 { self.template_max }
	pub fn dt(&self) -> f64 { self.dt }

	pub fn is_zero(&self) -> bool { self.spectrum.iter().all(|c| c.is_zero()) }

}

/// Stationary noise: the expected value of |forward(noise)|^2 in every frequency bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseModel {
	pub tag: ChannelTag,
	power: Vec<f64>,
}

impl NoiseModel {

	pub fn new(tag:ChannelTag, power:Vec<f64>) -> Result<Self> {
		if power.is_empty() { return Err(OptFiltErr::InvalidInput("Empty noise spectrum")); }
		// DC never enters a sum, so only the other bins have to be usable as divisors
		if power.iter().skip(1).any(|p| !(*p > 0.0) || !p.is_finite()) {
			return Err(OptFiltErr::InvalidInput("Noise power must be positive and finite outside of DC"));
		}
		Ok(NoiseModel{ tag, power })
	}

	/// Unfolds a one-sided amplitude spectral density (N/2+1 bins, units per root hertz) into per-bin
	/// noise power for an N-sample trace.
	pub fn from_psd(tag:ChannelTag, psd:&[f64], sample_rate:f64) -> Result<Self> {
		if psd.len() < 2 { return Err(OptFiltErr::InvalidInput("One-sided PSD needs at least two bins")); }
		if !(sample_rate > 0.0) { return Err(OptFiltErr::InvalidInput("Sample rate must be positive")); }

		let n = 2 * (psd.len() - 1);
		let nyquist = n / 2;
		let mut two_sided = vec![0.0; n];
		for k in 0..=nyquist {
			let v = if k == 0 || k == nyquist { psd[k] } else { psd[k] / std::f64::consts::SQRT_2 };
			two_sided[k] = v;
			if k > 0 && k < nyquist { two_sided[n - k] = v; }
		}

		let power = two_sided.iter().map(|v| v * v * sample_rate).collect();
		debug!("Unfolded {}-bin PSD for {} into {} bins", psd.len(), tag, n);
		Self::new(tag, power)
	}

	/// Averages |forward(trace)|^2 over a set of noise-only traces.
	pub fn from_traces(tag:ChannelTag, traces:&[Vec<f64>]) -> Result<Self> {
		let first = traces.first().ok_or(OptFiltErr::InvalidInput("No noise traces supplied"))?;
		let transform = SpectralTransform::new(first.len())?;

		let mut power = vec![0.0; first.len()];
		for trace in traces.iter() {
			for (p, c) in power.iter_mut().zip(transform.forward(trace)?.iter()) { *p += c.norm_sqr(); }
		}
		let count = traces.len() as f64;
		Self::new(tag, power.into_iter().map(|p| p / count).collect())
	}

	pub fn len(&self) -> usize { self.power.len() }
	pub fn power(&self) -> &[f64] { &self.power }

	/// `sum_{k>=1} |x_k|^2 / J_k`, the noise-weighted energy of a spectrum.
	pub fn weighted_energy(&self, spectrum:&[Complex<f64>]) -> Result<f64> {
		check_len(self.power.len(), spectrum.len())?;
		Ok(spectrum.iter().zip(self.power.iter()).skip(1).map(|(x, j)| x.norm_sqr() / j).sum())
	}

	/// `sum_{k>=1} a_k conj(b_k) / J_k`
	pub fn weighted_inner(&self, a:&[Complex<f64>], b:&[Complex<f64>]) -> Result<Complex<f64>> {
		check_len(self.power.len(), a.len())?;
		check_len(self.power.len(), b.len())?;
		Ok((1..self.power.len()).map(|k| a[k] * b[k].conj() / self.power[k]).sum())
	}

	/// Classical optimal filter `conj(T)/J`, with the DC bin zeroed.
	pub fn kernel(&self, template:&[Complex<f64>]) -> Result<Vec<Complex<f64>>> {
		check_len(self.power.len(), template.len())?;
		Ok(template.iter().zip(self.power.iter()).enumerate()
			.map(|(k, (t, j))| if k == 0 { Complex::zero() } else { t.conj() / *j })
			.collect())
	}

}

/// Everything the stationary filters derive once from a (template, noise) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimalKernel {
	pub kernel: Vec<Complex<f64>>,
	pub sig_to_noise_sq: f64,
}

impl OptimalKernel {

	pub fn new(template:&Template, noise:&NoiseModel) -> Result<Self> {
		check_len(template.len(), noise.len())?;
		let kernel = noise.kernel(template.spectrum())?;
		let sig_to_noise_sq = noise.weighted_energy(template.spectrum())?;
		if !(sig_to_noise_sq > 0.0) {
			return Err(OptFiltErr::SingularMatrix("Template carries no signal outside of DC"));
		}
		debug!("Optimal filter for {}: N={}, S={:.6e}", template.tag, template.len(), sig_to_noise_sq);
		Ok(OptimalKernel{ kernel, sig_to_noise_sq })
	}

	/// Expected amplitude resolution for this template and noise.
	pub fn resolution(&self) -> f64 { 1.0 / self.sig_to_noise_sq.sqrt() }

}

/// Relative singularity test for weighting matrices: `|det W| <= 1e-12 |prod diag W|`.
pub(crate) fn is_singular(det:f64, diagonal:&[f64]) -> bool {
	let scale:f64 = diagonal.iter().product();
	!det.is_finite() || det.abs() <= 1e-12 * scale.abs()
}
