use std::fmt;
use std::sync::Arc;

use log::debug;
use nalgebra::DMatrix;
use nalgebra_sparse::factorization::CscCholesky;
use num_complex::Complex;

use super::NoiseModel;
use crate::utils::sparse::{DownCast, SparseMatrix};
use crate::{check_len, OptFiltErr, Result};

/// Noise covariance between frequency bins, for noise that is not stationary over the trace.  It must be
/// Hermitian positive definite to be factorized.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseCovariance {
	matrix: SparseMatrix,
}

impl NoiseCovariance {

	pub fn new(matrix:SparseMatrix) -> Result<Self> {
		let scale = matrix.diagonal().iter().map(|c| c.norm()).fold(0.0, f64::max).max(1.0);
		if !matrix.is_hermitian(1e-9 * scale) {
			return Err(OptFiltErr::InvalidInput("Noise covariance must be Hermitian"));
		}
		Ok(NoiseCovariance{ matrix })
	}

	/// Diagonal covariance equivalent to a stationary noise model.  DC takes the largest bin power so that
	/// the matrix stays invertible.
	pub fn from_noise_model(noise:&NoiseModel) -> Self {
		let max = noise.power().iter().skip(1).cloned().fold(0.0, f64::max);
		let mut diag = noise.power().to_vec();
		diag[0] = max;
		NoiseCovariance{ matrix: SparseMatrix::from_diagonal(&diag) }
	}

	pub fn dim(&self) -> usize { self.matrix.dim() }
	pub fn matrix(&self) -> &SparseMatrix { &self.matrix }

	/// `self + amplitude^2 * position`
	pub fn with_position_term(&self, position:&NoiseCovariance, amplitude:f64) -> Result<Self> {
		Ok(NoiseCovariance{ matrix: self.matrix.add_scaled(&position.matrix, amplitude * amplitude)? })
	}

	pub fn factorize(&self, down_cast:Option<DownCast>) -> Result<Factorization> {
		let reduced = match down_cast {
			Some(dc) => self.matrix.down_cast(dc)?,
			None => self.matrix.clone(),
		};
		let cholesky = CscCholesky::factor(&reduced.to_real_csc())
			.map_err(|_| OptFiltErr::SingularMatrix("Noise covariance factorization"))?;
		debug!("Factorized {}x{} covariance ({} non-zeros)", reduced.dim(), reduced.dim(), reduced.nnz());
		Ok(Factorization{ n: self.dim(), m: reduced.dim(), down_cast, cholesky: Arc::new(cholesky) })
	}

}

/// Sparse Cholesky factors of a (possibly down-cast) covariance, held in its real symmetric form.  Cloning
/// shares the factors, and solving only reads them, so one factorization can serve many threads.
#[derive(Clone)]
pub struct Factorization {
	n: usize,
	m: usize,
	down_cast: Option<DownCast>,
	cholesky: Arc<CscCholesky<f64>>,
}

impl fmt::Debug for Factorization {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.debug_struct("Factorization").field("n", &self.n).field("m", &self.m).field("down_cast", &self.down_cast).finish()
	}
}

impl Factorization {

	pub fn len(&self) -> usize { self.n }

	/// Solves `C x = rhs` for a full-length right hand side.  With a down-cast, bins outside the kept
	/// window come back as zero.
	pub fn solve(&self, rhs:&[Complex<f64>]) -> Result<Vec<Complex<f64>>> {
		check_len(self.n, rhs.len())?;
		let reduced = match self.down_cast {
			Some(dc) => dc.down_cast_vector(rhs),
			None => rhs.to_vec(),
		};
		let m = self.m;
		let b = DMatrix::from_fn(2*m, 1, |i, _| if i < m { reduced[i].re } else { reduced[i - m].im });
		let x = self.cholesky.solve(&b);
		if x.iter().any(|v| !v.is_finite()) {
			return Err(OptFiltErr::SingularMatrix("Noise covariance solve"));
		}
		let x:Vec<Complex<f64>> = (0..m).map(|i| Complex::new(x[(i, 0)], x[(i + m, 0)])).collect();
		Ok(match self.down_cast {
			Some(dc) => dc.up_cast_vector(&x, self.n),
			None => x,
		})
	}

	/// `Re(r^H C^-1 r)` over the bins above DC.
	pub fn weighted_energy(&self, r:&[Complex<f64>]) -> Result<f64> {
		let s = self.solve(r)?;
		Ok(s.iter().zip(r.iter()).skip(1).map(|(a, b)| (a.conj() * b).re).sum())
	}

}
