use log::{trace, warn};
use nalgebra::{Matrix2, Vector2};
use num_complex::Complex;

use super::{arg_min, interpolate, FitResult, Interpolation, MatchedFilter};
use crate::fourier_analysis::{apply_kernel, SpectralTransform};
use crate::model::{is_singular, NoiseModel, Template};
use crate::utils::{signed_lag, SearchWindow};
use crate::{check_len, OptFiltErr, Result};

#[derive(Debug, Clone)]
struct DualKernels {
	transform: SpectralTransform,
	kernels: [Vec<Complex<f64>>; 2],
	/// `None` when the two templates are degenerate under this noise.
	w_inv: Option<Matrix2<f64>>,
}

/// Fits one waveform as `a_slow * T_slow + a_fast * T_fast`, sharing a single delay.
#[derive(Debug, Clone, Default)]
pub struct DualTemplateFilter {
	templates: Option<[Template; 2]>,
	noise: Option<NoiseModel>,
	prepared: Option<DualKernels>,
	window: Option<SearchWindow>,
	interpolate: bool,
}

impl DualTemplateFilter {

	pub fn new() -> Self { Self::default() }

	pub fn load_templates(&mut self, slow:Template, fast:Template) -> Result<()> {
		check_len(slow.len(), fast.len())?;
		self.templates = Some([slow, fast]);
		self.prepare()
	}

	pub fn load_noise_model(&mut self, noise:NoiseModel) -> Result<()> {
		self.noise = Some(noise);
		self.prepare()
	}

	pub fn set_search_window(&mut self, low:i64, high:i64) -> Result<()> {
		let window = SearchWindow::new(low, high);
		if let Some([slow, _]) = &self.templates { window.validate(slow.len())?; }
		self.window = Some(window);
		Ok(())
	}

	pub fn set_interpolation(&mut self, on:bool) { self.interpolate = on; }

	/// Weighting matrix `W[r][c] = Re sum_{k>=1} T_r conj(T_c) / J`.
	pub fn weighting_matrix(&self) -> Result<Matrix2<f64>> {
		let [slow, fast] = self.templates.as_ref().ok_or(OptFiltErr::UninitializedState("no templates loaded"))?;
		let noise = self.noise.as_ref().ok_or(OptFiltErr::UninitializedState("no noise model loaded"))?;
		let t = [slow.spectrum(), fast.spectrum()];
		let mut w = Matrix2::zeros();
		for r in 0..2 {
			for c in 0..2 {
				w[(r, c)] = noise.weighted_inner(t[r], t[c])?.re;
			}
		}
		Ok(w)
	}

	fn prepare(&mut self) -> Result<()> {
		self.prepared = None;
		if let (Some([slow, fast]), Some(noise)) = (&self.templates, &self.noise) {
			check_len(slow.len(), noise.len())?;
			let kernels = [noise.kernel(slow.spectrum())?, noise.kernel(fast.spectrum())?];
			let w = self.weighting_matrix()?;

			// a railed channel can make the templates indistinguishable, which is reported per pulse
			let w_inv = if is_singular(w.determinant(), &[w[(0, 0)], w[(1, 1)]]) { None } else { w.try_inverse() };
			if w_inv.is_none() {
				warn!("1x2 weighting matrix for {}/{} is singular, fits will return sentinel values", slow.tag, fast.tag);
			}

			self.prepared = Some(DualKernels{ transform: SpectralTransform::new(slow.len())?, kernels, w_inv });
		}
		Ok(())
	}

	pub fn fit(&self, waveform:&[f64]) -> Result<FitResult> {
		let [slow, fast] = self.templates.as_ref().ok_or(OptFiltErr::UninitializedState("no templates loaded"))?;
		let noise = self.noise.as_ref().ok_or(OptFiltErr::UninitializedState("no noise model loaded"))?;
		let prepared = self.prepared.as_ref().ok_or(OptFiltErr::UninitializedState("filter not prepared"))?;
		let window = self.window.ok_or(OptFiltErr::UninitializedState("no search window set"))?;
		let n = slow.len();
		check_len(n, waveform.len())?;

		let w_inv = match prepared.w_inv {
			Some(w_inv) => w_inv,
			None => return Ok(FitResult::sentinel(2, self.interpolate)),
		};

		let p = prepared.transform.forward(waveform)?;
		let pp_slow = prepared.transform.correlate(&apply_kernel(&p, &prepared.kernels[0]))?;
		let pp_fast = prepared.transform.correlate(&apply_kernel(&p, &prepared.kernels[1]))?;
		let chisq_base = noise.weighted_energy(&p)?;

		let mut amp_slow = vec![0.0; n];
		let mut amp_fast = vec![0.0; n];
		let mut chisq = vec![0.0; n];
		for lag in 0..n {
			let pp = Vector2::new(pp_slow[lag], pp_fast[lag]);
			let a = w_inv * pp;
			amp_slow[lag] = a[0];
			amp_fast[lag] = a[1];
			chisq[lag] = chisq_base - a.dot(&pp);
		}

		let best = arg_min(&chisq, &window.lags(n)?).ok_or(OptFiltErr::InvalidInput("Search window is empty"))?;
		let tmax = [slow.template_max(), fast.template_max()];
		let dt = slow.dt();

		let interpolated = if self.interpolate {
			let r = interpolate::refine(best, &chisq, &[&amp_slow, &amp_fast]);
			Some(Interpolation{ delay: r.delay_bins * dt, chisq: r.chisq, amplitudes: vec![r.amplitudes[0] * tmax[0], r.amplitudes[1] * tmax[1]] })
		} else { None };

		trace!("{}/{}: slow={:.4} fast={:.4} lag={} chisq={:.3}", slow.tag, fast.tag, amp_slow[best], amp_fast[best], best, chisq[best]);

		Ok(FitResult {
			amplitudes: vec![amp_slow[best] * tmax[0], amp_fast[best] * tmax[1]],
			amplitudes_zero_delay: vec![amp_slow[0] * tmax[0], amp_fast[0] * tmax[1]],
			delay: (signed_lag(best, n) as f64) * dt,
			chisq: chisq[best],
			chisq_base,
			chisq_lf: None,
			interpolated,
		})
	}

}

impl MatchedFilter for DualTemplateFilter {
	type Output = FitResult;

	fn n_channels(&self) -> usize { 1 }

	fn set_search_window(&mut self, low:i64, high:i64) -> Result<()> {
		DualTemplateFilter::set_search_window(self, low, high)
	}

	fn fit(&self, waveforms:&[&[f64]]) -> Result<FitResult> {
		check_len(1, waveforms.len())?;
		DualTemplateFilter::fit(self, waveforms[0])
	}
}
