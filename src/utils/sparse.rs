use nalgebra_sparse::{CooMatrix, CscMatrix};
use num_complex::Complex;
use num_traits::Zero;
use serde::{Serialize, Deserialize};

use crate::{OptFiltErr, Result};

/// Shrinks an N x N covariance to a cheaper effective window before factorization.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum DownCast {
	/// Keep indices `0..half` and `N-half..N`, i.e. the low-frequency corner of a spectral covariance.
	Outer(usize),
	/// Keep indices `N/2-half..N/2+half`, the middle band.
	Inner(usize),
}

impl DownCast {

	pub fn reduced_len(&self) -> usize {
		match self { DownCast::Outer(half) | DownCast::Inner(half) => 2 * half }
	}

	/// Position of full index `i` in the reduced space, if it is kept.
	pub fn map_index(&self, i:usize, n:usize) -> Option<usize> {
		match *self {
			DownCast::Outer(half) => {
				if i < half { Some(i) }
				else if i >= n.saturating_sub(half) { Some(i + 2*half - n) }
				else { None }
			},
			DownCast::Inner(half) => {
				let start = (n/2).saturating_sub(half);
				if i >= start && i < start + 2*half { Some(i - start) } else { None }
			},
		}
	}

	pub fn check(&self, n:usize) -> Result<()> {
		let half = match self { DownCast::Outer(half) | DownCast::Inner(half) => *half };
		if half == 0 || 2*half > n { Err(OptFiltErr::Configuration(format!("Down-cast half width {} does not fit a dimension of {}", half, n))) }
		else { Ok(()) }
	}

	pub fn down_cast_vector(&self, x:&[Complex<f64>]) -> Vec<Complex<f64>> {
		let n = x.len();
		let mut out = vec![Complex::zero(); self.reduced_len()];
		for (i, v) in x.iter().enumerate() {
			if let Some(j) = self.map_index(i, n) { out[j] = *v; }
		}
		out
	}

	/// Scatters a reduced vector back into the full space, leaving dropped entries at zero.
	pub fn up_cast_vector(&self, x:&[Complex<f64>], n:usize) -> Vec<Complex<f64>> {
		let mut out = vec![Complex::zero(); n];
		for i in 0..n {
			if let Some(j) = self.map_index(i, n) { out[i] = x[j]; }
		}
		out
	}

}

/// Square complex matrix stored as (row, col, value) triplets.  Duplicates are summed by `compress`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseMatrix {
	dim: usize,
	entries: Vec<(usize, usize, Complex<f64>)>,
}

impl SparseMatrix {

	pub fn new(dim:usize) -> Self { SparseMatrix{ dim, entries: vec![] } }

	pub fn from_triplets(dim:usize, triplets:Vec<(usize, usize, Complex<f64>)>) -> Result<Self> {
		if triplets.iter().any(|(r, c, _)| *r >= dim || *c >= dim) {
			return Err(OptFiltErr::InvalidInput("Sparse matrix entry outside of its dimension"));
		}
		let mut m = SparseMatrix{ dim, entries: triplets };
		m.compress();
		Ok(m)
	}

	pub fn from_diagonal(diag:&[f64]) -> Self {
		let entries = diag.iter().enumerate().map(|(i, v)| (i, i, Complex{ re: *v, im: 0.0 })).collect();
		SparseMatrix{ dim: diag.len(), entries }
	}

	pub fn dim(&self) -> usize { self.dim }
	pub fn nnz(&self) -> usize { self.entries.len() }

	pub fn insert(&mut self, row:usize, col:usize, val:Complex<f64>) -> Result<()> {
		if row >= self.dim || col >= self.dim { return Err(OptFiltErr::InvalidInput("Sparse matrix entry outside of its dimension")); }
		self.entries.push((row, col, val));
		Ok(())
	}

	/// Sorts entries row-major, merges duplicates and drops explicit zeros.
	pub fn compress(&mut self) {
		self.entries.sort_by_key(|(r, c, _)| (*r, *c));
		let mut merged:Vec<(usize, usize, Complex<f64>)> = Vec::with_capacity(self.entries.len());
		for (r, c, v) in self.entries.drain(..) {
			match merged.last_mut() {
				Some(last) if last.0 == r && last.1 == c => last.2 += v,
				_ => merged.push((r, c, v)),
			}
		}
		merged.retain(|(_, _, v)| !v.is_zero());
		self.entries = merged;
	}

	pub fn get(&self, row:usize, col:usize) -> Complex<f64> {
		self.entries.iter().filter(|(r, c, _)| *r == row && *c == col).map(|(_, _, v)| v).sum()
	}

	/// `self + scale * other`
	pub fn add_scaled(&self, other:&SparseMatrix, scale:f64) -> Result<Self> {
		crate::check_len(self.dim, other.dim)?;
		let mut entries = self.entries.clone();
		entries.extend(other.entries.iter().map(|(r, c, v)| (*r, *c, v * scale)));
		let mut m = SparseMatrix{ dim: self.dim, entries };
		m.compress();
		Ok(m)
	}

	pub fn is_hermitian(&self, tol:f64) -> bool {
		let mut merged = self.clone();
		merged.compress();
		merged.entries.iter().all(|(r, c, v)| (merged.get(*c, *r).conj() - v).norm() <= tol)
	}

	pub fn diagonal(&self) -> Vec<Complex<f64>> {
		let mut d = vec![Complex::zero(); self.dim];
		for (r, c, v) in self.entries.iter() {
			if r == c { d[*r] += v; }
		}
		d
	}

	/// Real symmetric form `[[Re C, -Im C], [Im C, Re C]]` of a Hermitian matrix, in compressed columns.
	/// A complex vector `x + iy` maps to `[x; y]`.
	pub fn to_real_csc(&self) -> CscMatrix<f64> {
		let n = self.dim;
		let mut coo = CooMatrix::new(2*n, 2*n);
		for (r, c, v) in self.entries.iter() {
			if v.re != 0.0 {
				coo.push(*r, *c, v.re);
				coo.push(*r + n, *c + n, v.re);
			}
			if v.im != 0.0 {
				coo.push(*r, *c + n, -v.im);
				coo.push(*r + n, *c, v.im);
			}
		}
		CscMatrix::from(&coo)
	}

	pub fn down_cast(&self, dc:DownCast) -> Result<Self> {
		dc.check(self.dim)?;
		let entries = self.entries.iter().filter_map(|(r, c, v)| {
			match (dc.map_index(*r, self.dim), dc.map_index(*c, self.dim)) {
				(Some(rr), Some(cc)) => Some((rr, cc, *v)),
				_ => None,
			}
		}).collect();
		Ok(SparseMatrix{ dim: dc.reduced_len(), entries })
	}

}
