use log::{debug, trace};
use num_complex::Complex;
use num_traits::Zero;
use serde::{Serialize, Deserialize};

use super::arg_max;
use crate::fourier_analysis::{apply_kernel, shift_phase, SpectralTransform};
use crate::model::covariance::{Factorization, NoiseCovariance};
use crate::model::{NoiseModel, Template};
use crate::utils::sparse::DownCast;
use crate::utils::{cyclic_index, signed_lag, SearchWindow};
use crate::{check_len, OptFiltErr, Result, SENTINEL};

/// Starting point taken from a stationary fit of the same pulse.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Seed {
	/// Pulse height as reported by the stationary fit, i.e. already scaled by the template max.
	pub amplitude: f64,
	/// Seconds.
	pub delay: f64,
	/// Random triggers are always fitted, whatever their amplitude.
	pub random_trigger: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NonStationaryParams {
	/// Lags `seed - half_width ..= seed + half_width` are evaluated.
	pub chi_half_width: usize,
	/// Compared with the seed amplitude divided by the template max, the same normalized amplitude that
	/// scales the position covariance.
	pub amplitude_threshold: f64,
	/// Ignore the position-dependent term and reuse one factorization for every pulse.
	pub base_only: bool,
	pub down_cast: Option<DownCast>,
}

impl Default for NonStationaryParams {
	fn default() -> Self {
		NonStationaryParams{ chi_half_width: 5, amplitude_threshold: 0.0, base_only: false, down_cast: None }
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaxAmplitude {
	pub amplitude: f64,
	pub delay: f64,
	/// `SENTINEL` when the lag falls outside the chi-square window around the seed.
	pub chisq: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonStationaryResult {
	pub amplitude: f64,
	pub amplitude_zero_delay: f64,
	pub delay: f64,
	pub chisq: f64,
	/// The seed was below threshold and passed through unchanged.
	pub short_circuited: bool,
	pub max_amplitude: Option<MaxAmplitude>,
}

/// Optimal filter with a full noise covariance `base + A_seed^2 * position`, evaluated near a seed delay.
#[derive(Debug, Clone, Default)]
pub struct NonStationaryMatchedFilter {
	template: Option<Template>,
	noise: Option<NoiseModel>,
	transform: Option<SpectralTransform>,
	base: Option<NoiseCovariance>,
	position: Option<NoiseCovariance>,
	params: NonStationaryParams,
	window: Option<SearchWindow>,
	cached: Option<Factorization>,
}

impl NonStationaryMatchedFilter {

	pub fn new(params:NonStationaryParams) -> Self {
		NonStationaryMatchedFilter{ params, ..Self::default() }
	}

	pub fn load_template(&mut self, template:Template) -> Result<()> {
		self.transform = Some(SpectralTransform::new(template.len())?);
		self.template = Some(template);
		self.check_shapes()
	}

	/// Also sets the base covariance to the diagonal equivalent of `noise` unless one was loaded.
	pub fn load_noise_model(&mut self, noise:NoiseModel) -> Result<()> {
		if self.base.is_none() {
			self.base = Some(NoiseCovariance::from_noise_model(&noise));
		}
		self.noise = Some(noise);
		self.check_shapes()?;
		self.refresh_cache()
	}

	pub fn load_covariance(&mut self, base:NoiseCovariance, position:Option<NoiseCovariance>) -> Result<()> {
		if let Some(pos) = &position { check_len(base.dim(), pos.dim())?; }
		self.base = Some(base);
		self.position = position;
		self.check_shapes()?;
		self.refresh_cache()
	}

	pub fn set_params(&mut self, params:NonStationaryParams) -> Result<()> {
		self.params = params;
		self.refresh_cache()
	}

	pub fn params(&self) -> &NonStationaryParams { &self.params }

	/// Enables the max-amplitude result over lags `[low, high)`.
	pub fn set_search_window(&mut self, low:i64, high:i64) -> Result<()> {
		let window = SearchWindow::new(low, high);
		if let Some(t) = &self.template { window.validate(t.len())?; }
		self.window = Some(window);
		Ok(())
	}

	fn check_shapes(&self) -> Result<()> {
		let n = match &self.template { Some(t) => t.len(), None => return Ok(()) };
		if let Some(noise) = &self.noise { check_len(n, noise.len())?; }
		if let Some(base) = &self.base { check_len(n, base.dim())?; }
		if let Some(window) = self.window { window.validate(n)?; }
		Ok(())
	}

	fn refresh_cache(&mut self) -> Result<()> {
		self.cached = None;
		if self.params.base_only {
			if let Some(base) = &self.base {
				self.cached = Some(base.factorize(self.params.down_cast)?);
				debug!("Cached base-only covariance factorization");
			}
		}
		Ok(())
	}

	fn factorization(&self, seed_amplitude:f64) -> Result<Factorization> {
		if let Some(cached) = &self.cached { return Ok(cached.clone()); }
		let base = self.base.as_ref().ok_or(OptFiltErr::UninitializedState("no noise covariance loaded"))?;
		match (&self.position, self.params.base_only) {
			(Some(pos), false) => base.with_position_term(pos, seed_amplitude)?.factorize(self.params.down_cast),
			_ => base.factorize(self.params.down_cast),
		}
	}

	pub fn fit(&self, waveform:&[f64], seed:Seed) -> Result<NonStationaryResult> {
		let template = self.template.as_ref().ok_or(OptFiltErr::UninitializedState("no template loaded"))?;
		let transform = self.transform.as_ref().ok_or(OptFiltErr::UninitializedState("filter not prepared"))?;
		let n = template.len();
		let dt = template.dt();
		check_len(n, waveform.len())?;
		let tmax = template.template_max();
		if tmax == 0.0 || !tmax.is_finite() {
			return Err(OptFiltErr::InvalidInput("Template max must be finite and non-zero"));
		}
		let seed_amplitude = seed.amplitude / tmax;

		if !seed.random_trigger && seed_amplitude <= self.params.amplitude_threshold {
			return Ok(NonStationaryResult {
				amplitude: seed.amplitude,
				amplitude_zero_delay: SENTINEL,
				delay: seed.delay,
				chisq: SENTINEL,
				short_circuited: true,
				max_amplitude: None,
			});
		}

		let fact = self.factorization(seed_amplitude)?;

		let mut t = template.spectrum().to_vec();
		t[0] = Complex::zero();
		let kernel:Vec<Complex<f64>> = fact.solve(&t)?.into_iter().map(|f| f.conj()).collect();
		let norm:f64 = kernel.iter().zip(t.iter()).skip(1).map(|(of, tk)| (of * tk).re).sum();
		if !(norm > 0.0) {
			return Err(OptFiltErr::SingularMatrix("Template has no weight under this covariance"));
		}

		let p = transform.forward(waveform)?;
		let a_hat:Vec<f64> = transform.correlate(&apply_kernel(&p, &kernel))?.into_iter().map(|v| v / norm).collect();

		let chisq_at = |lag:i64| -> Result<f64> {
			let a = a_hat[cyclic_index(lag, n)];
			let mut r:Vec<Complex<f64>> = shift_phase(&p, lag).iter().zip(t.iter()).map(|(pk, tk)| pk - tk * a).collect();
			r[0] = Complex::zero();
			fact.weighted_energy(&r)
		};

		let hw = self.params.chi_half_width as i64;
		let seed_bins = (seed.delay / dt).round() as i64;
		let mut best:Option<(f64, i64)> = None;
		for lag in (seed_bins - hw)..=(seed_bins + hw) {
			let chisq = chisq_at(lag)?;
			match best {
				Some((b, _)) if b <= chisq => {},
				_ => best = Some((chisq, lag)),
			}
		}
		let (chisq, lag) = best.ok_or(OptFiltErr::InvalidInput("Empty chi-square window"))?;
		let idx = cyclic_index(lag, n);

		let max_amplitude = match self.window {
			Some(window) => {
				let best_idx = arg_max(&a_hat, &window.lags(n)?).ok_or(OptFiltErr::InvalidInput("Search window is empty"))?;
				let signed = signed_lag(best_idx, n);
				let distance = signed_lag(cyclic_index(signed - seed_bins, n), n).abs();
				Some(MaxAmplitude {
					amplitude: a_hat[best_idx] * tmax,
					delay: (signed as f64) * dt,
					chisq: if distance <= hw { chisq_at(signed)? } else { SENTINEL },
				})
			},
			None => None,
		};

		trace!("{} non-stationary: amp={:.4} lag={} chisq={:.3}", template.tag, a_hat[idx], lag, chisq);

		Ok(NonStationaryResult {
			amplitude: a_hat[idx] * tmax,
			amplitude_zero_delay: a_hat[0] * tmax,
			delay: (signed_lag(idx, n) as f64) * dt,
			chisq,
			short_circuited: false,
			max_amplitude,
		})
	}

}
