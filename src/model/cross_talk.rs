use log::{debug, warn};
use nalgebra::DMatrix;
use num_complex::Complex;

use super::{is_singular, NoiseModel, Template};
use crate::{check_len, ChannelTag, OptFiltErr, Result, Side};

/// One channel of a coupled set: its own template and noise, plus the template of the partner's
/// signal as it leaks into this channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelModel {
	pub template: Template,
	pub noise: NoiseModel,
	pub cross_talk: Option<Template>,
	pub side: Side,
}

impl ChannelModel {

	pub fn new(template:Template, noise:NoiseModel, side:Side) -> Result<Self> {
		check_len(template.len(), noise.len())?;
		Ok(ChannelModel{ template, noise, cross_talk: None, side })
	}

	pub fn with_cross_talk(mut self, cross_talk:Template) -> Result<Self> {
		check_len(self.template.len(), cross_talk.len())?;
		self.cross_talk = Some(cross_talk);
		Ok(self)
	}

	pub fn tag(&self) -> ChannelTag { self.template.tag }

}

/// Where a side's inverse weighting matrix comes from.
#[derive(Debug, Clone, PartialEq)]
enum WeightingInverse {
	Derived,
	Railed,
	/// Row-major, as stored by the calibration: `[QI, QOX, QIX, QO]` for a pair, one entry for a single channel.
	Supplied(Vec<f64>),
}

/// The channels of one side together with their weighting matrix and its inverse.
#[derive(Debug, Clone)]
pub struct SideModel {
	pub side: Side,
	models: Vec<ChannelModel>,
	kernels: Vec<Vec<Complex<f64>>>,
	cross_kernels: Vec<Vec<Complex<f64>>>,
	weighting: DMatrix<f64>,
	w_inv: DMatrix<f64>,
}

impl SideModel {

	fn build(side:Side, models:Vec<ChannelModel>, inverse:WeightingInverse) -> Result<Self> {
		let m = models.len();
		if m == 0 || m > 2 {
			return Err(OptFiltErr::Configuration(format!("Side {:?} has {} channels, expected 1 or 2", side, m)));
		}

		let mut kernels = vec![];
		let mut cross_kernels = vec![];
		for model in models.iter() {
			kernels.push(model.noise.kernel(model.template.spectrum())?);
			if m == 2 {
				let cross = model.cross_talk.as_ref().ok_or_else(|| OptFiltErr::MissingModel(model.tag().cross_talk().unwrap_or(model.tag())))?;
				cross_kernels.push(model.noise.kernel(cross.spectrum())?);
			}
		}

		let weighting = Self::weighting_matrix(&models)?;
		let derived = if is_singular(weighting.determinant(), weighting.diagonal().as_slice()) { None } else { weighting.clone().try_inverse() };
		let w_inv = match (inverse, derived) {
			(WeightingInverse::Supplied(row_major), _) => {
				if row_major.len() != m * m {
					return Err(OptFiltErr::Configuration(format!("Side {:?} has {} channel(s) but the supplied W-inverse has {} entries", side, m, row_major.len())));
				}
				DMatrix::from_row_slice(m, m, &row_major)
			},
			(_, Some(w_inv)) => w_inv,
			(WeightingInverse::Railed, None) => {
				warn!("Weighting matrix for side {:?} is not invertible, falling back to identity", side);
				DMatrix::identity(m, m)
			},
			(WeightingInverse::Derived, None) => return Err(OptFiltErr::SingularMatrix("Cross-talk weighting matrix")),
		};
		debug!("Side {:?}: {} channel(s), W-inverse = {:?}", side, m, w_inv.as_slice());

		Ok(SideModel{ side, models, kernels, cross_kernels, weighting, w_inv })
	}

	/// Normal-equation matrix of the coupled least-squares fit.  For a pair (i, j) with cross-talk templates
	/// X_i (j's signal seen in i) and X_j:
	///   M_ii = <T_i,T_i>_i + <X_j,X_j>_j
	///   M_ij = Re(<X_i,T_i>_i + <T_j,X_j>_j)
	fn weighting_matrix(models:&[ChannelModel]) -> Result<DMatrix<f64>> {
		let m = models.len();
		let mut w = DMatrix::zeros(m, m);
		for i in 0..m {
			w[(i, i)] = models[i].noise.weighted_energy(models[i].template.spectrum())?;
		}
		if m == 2 {
			let x:Vec<&Template> = models.iter().filter_map(|model| model.cross_talk.as_ref()).collect();
			check_len(2, x.len())?;
			w[(0, 0)] += models[1].noise.weighted_energy(x[1].spectrum())?;
			w[(1, 1)] += models[0].noise.weighted_energy(x[0].spectrum())?;
			let off = models[0].noise.weighted_inner(x[0].spectrum(), models[0].template.spectrum())?.re
			        + models[1].noise.weighted_inner(models[1].template.spectrum(), x[1].spectrum())?.re;
			w[(0, 1)] = off;
			w[(1, 0)] = off;
		}
		Ok(w)
	}

	pub fn len(&self) -> usize { self.models.len() }
	pub fn channels(&self) -> Vec<ChannelTag> { self.models.iter().map(|m| m.tag()).collect() }
	pub fn models(&self) -> &[ChannelModel] { &self.models }
	pub fn weighting(&self) -> &DMatrix<f64> { &self.weighting }
	pub fn weighting_inverse(&self) -> &DMatrix<f64> { &self.w_inv }

	/// Per-channel filtered spectra: `P_i OF_i + sum_{j != i} P_j OF_{X_j}`, DC zeroed.
	pub fn filtered_spectra(&self, spectra:&[Vec<Complex<f64>>]) -> Result<Vec<Vec<Complex<f64>>>> {
		check_len(self.models.len(), spectra.len())?;
		let n = self.models[0].template.len();
		let mut out = vec![];
		for i in 0..self.models.len() {
			check_len(n, spectra[i].len())?;
			let mut acc = crate::fourier_analysis::apply_kernel(&spectra[i], &self.kernels[i]);
			for j in 0..self.cross_kernels.len() {
				if j == i { continue; }
				for (a, b) in acc.iter_mut().zip(crate::fourier_analysis::apply_kernel(&spectra[j], &self.cross_kernels[j]).iter()) { *a += b; }
			}
			out.push(acc);
		}
		Ok(out)
	}

	/// Lag-independent part of the chi-square, `sum_i sum_{k>=1} |P_i|^2 / J_i`.
	pub fn chisq_base(&self, spectra:&[Vec<Complex<f64>>]) -> Result<f64> {
		let mut base = 0.0;
		for (model, p) in self.models.iter().zip(spectra.iter()) { base += model.noise.weighted_energy(p)?; }
		Ok(base)
	}

}

/// Channels grouped into up to two sides.
#[derive(Debug, Clone)]
pub struct CrossTalkSet {
	n: usize,
	dt: f64,
	sides: Vec<SideModel>,
}

impl CrossTalkSet {

	pub fn new(channels:Vec<ChannelModel>) -> Result<Self> { Self::build(channels, None, false) }

	/// Same as `new`, but a singular weighting matrix (typically from a railed channel) is replaced by the
	/// identity with a warning instead of failing.
	pub fn with_railed_fallback(channels:Vec<ChannelModel>) -> Result<Self> { Self::build(channels, None, true) }

	/// Uses a calibrated inverse weighting matrix for `side` instead of deriving it from the templates.
	/// `w_inverse` is row-major (`[QI, QOX, QIX, QO]` for a pair) and must hold one entry per channel pair
	/// of that side.  Other sides derive theirs as in `new`.
	pub fn with_w_inverse(channels:Vec<ChannelModel>, side:Side, w_inverse:Vec<f64>) -> Result<Self> {
		if w_inverse.len() != 1 && w_inverse.len() != 4 {
			return Err(OptFiltErr::Configuration(format!("W-inverse must have 1 or 4 entries, got {}", w_inverse.len())));
		}
		if !channels.iter().any(|c| c.side == side) {
			return Err(OptFiltErr::Configuration(format!("W-inverse supplied for side {:?}, which has no channels", side)));
		}
		Self::build(channels, Some((side, w_inverse)), false)
	}

	fn build(channels:Vec<ChannelModel>, supplied:Option<(Side, Vec<f64>)>, railed_fallback:bool) -> Result<Self> {
		let first = channels.first().ok_or_else(|| OptFiltErr::Configuration("No channels in cross-talk set".to_string()))?;
		let n = first.template.len();
		let dt = first.template.dt();
		for c in channels.iter() {
			check_len(n, c.template.len())?;
			if (c.template.dt() - dt).abs() > 1e-12 * dt {
				return Err(OptFiltErr::Configuration(format!("Channel {} has a different sample period", c.tag())));
			}
		}
		let mut tags:Vec<ChannelTag> = channels.iter().map(|c| c.tag()).collect();
		tags.sort();
		tags.dedup();
		if tags.len() != channels.len() {
			return Err(OptFiltErr::Configuration("Channel listed twice in cross-talk set".to_string()));
		}

		let (s1, s2):(Vec<ChannelModel>, Vec<ChannelModel>) = channels.into_iter().partition(|c| c.side == Side::S1);
		let mut sides = vec![];
		for (side, models) in vec![(Side::S1, s1), (Side::S2, s2)] {
			if models.is_empty() { continue; }
			let inverse = match &supplied {
				Some((s, w)) if *s == side => WeightingInverse::Supplied(w.clone()),
				_ if railed_fallback => WeightingInverse::Railed,
				_ => WeightingInverse::Derived,
			};
			sides.push(SideModel::build(side, models, inverse)?);
		}

		Ok(CrossTalkSet{ n, dt, sides })
	}

	pub fn len(&self) -> usize { self.n }
	pub fn dt(&self) -> f64 { self.dt }
	pub fn sides(&self) -> &[SideModel] { &self.sides }
	pub fn n_channels(&self) -> usize { self.sides.iter().map(|s| s.len()).sum() }

	/// Channel order expected by `CrossTalkMatchedFilter::fit`: side 1 first, then side 2.
	pub fn channels(&self) -> Vec<ChannelTag> { self.sides.iter().flat_map(|s| s.channels()).collect() }

	/// Row-major inverse weighting matrix of a side, e.g. `[QI, QOX, QIX, QO]` for a charge pair.
	pub fn w_inverse(&self, side:Side) -> Option<Vec<f64>> {
		self.sides.iter().find(|s| s.side == side).map(|s| s.w_inv.transpose().as_slice().to_vec())
	}

}
