
use std::f64::consts;
use std::fmt;
use std::sync::Arc;

use num_complex::Complex;
use num_traits::Zero;
use rustfft::{Fft, FftPlanner};

use crate::{check_len, OptFiltErr, Result};

#[cfg(test)]
mod tests;

/// Forward and inverse DFT of a fixed length.  Both directions carry a 1/sqrt(N) factor so that
/// `inverse(forward(x)) == x` and Parseval's theorem holds without extra bookkeeping.
#[derive(Clone)]
pub struct SpectralTransform {
	n: usize,
	scale: f64,
	fwd: Arc<dyn Fft<f64>>,
	inv: Arc<dyn Fft<f64>>,
}

impl fmt::Debug for SpectralTransform {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.debug_struct("SpectralTransform").field("n", &self.n).finish()
	}
}

impl SpectralTransform {

	pub fn new(n:usize) -> Result<Self> {
		if n == 0 { return Err(OptFiltErr::InvalidInput("Zero-length transform")); }

		let mut planner = FftPlanner::new();
		let fwd = planner.plan_fft_forward(n);
		let inv = planner.plan_fft_inverse(n);

		Ok(SpectralTransform{ n, scale: 1.0 / (n as f64).sqrt(), fwd, inv })
	}

	pub fn len(&self) -> usize { self.n }

	pub fn forward(&self, waveform:&[f64]) -> Result<Vec<Complex<f64>>> {
		check_len(self.n, waveform.len())?;
		let mut buffer:Vec<Complex<f64>> = waveform.iter().map(|x| Complex{ re: *x, im: 0.0 }).collect();
		self.fwd.process(&mut buffer);
		Ok(buffer.into_iter().map(|c| c * self.scale).collect())
	}

	/// Inverse transform, keeping only the real part.
	pub fn inverse(&self, spectrum:&[Complex<f64>]) -> Result<Vec<f64>> {
		check_len(self.n, spectrum.len())?;
		let mut buffer:Vec<Complex<f64>> = spectrum.to_vec();
		self.inv.process(&mut buffer);
		Ok(buffer.into_iter().map(|c| c.re * self.scale).collect())
	}

	/// Returns `sum_k x[k] exp(+2 pi i k lag / N)` for every lag in `0..N`, without normalization.
	/// This is the cyclic cross-correlation of the two spectra whose product is `x`.
	pub fn correlate(&self, product:&[Complex<f64>]) -> Result<Vec<f64>> {
		check_len(self.n, product.len())?;
		let mut buffer:Vec<Complex<f64>> = product.to_vec();
		self.inv.process(&mut buffer);
		Ok(buffer.into_iter().map(|c| c.re).collect())
	}

}

pub fn forward(waveform:&[f64]) -> Result<Vec<Complex<f64>>> {
	SpectralTransform::new(waveform.len())?.forward(waveform)
}

pub fn inverse(spectrum:&[Complex<f64>]) -> Result<Vec<f64>> {
	SpectralTransform::new(spectrum.len())?.inverse(spectrum)
}

/// Multiplies bin k by `exp(+2 pi i k lag / N)`, which moves a pulse sitting at `lag` back to lag 0.
pub fn shift_phase(spectrum:&[Complex<f64>], lag:i64) -> Vec<Complex<f64>> {
	let n = spectrum.len();
	let l = lag.rem_euclid(n.max(1) as i64) as usize;
	spectrum.iter().enumerate().map(|(k, x)| {
		let phase = 2.0 * consts::PI * (((k * l) % n) as f64) / (n as f64);
		x * Complex{ re: phase.cos(), im: phase.sin() }
	}).collect()
}

/// Pointwise product of a spectrum with a filter kernel, DC bin forced to zero.
pub fn apply_kernel(spectrum:&[Complex<f64>], kernel:&[Complex<f64>]) -> Vec<Complex<f64>> {
	let mut product:Vec<Complex<f64>> = spectrum.iter().zip(kernel.iter()).map(|(a,b)| a*b).collect();
	if let Some(dc) = product.first_mut() { *dc = Complex::zero(); }
	product
}
