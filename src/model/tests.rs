
use approx::assert_abs_diff_eq;
use num_complex::Complex;

use super::*;
use super::covariance::NoiseCovariance;
use super::cross_talk::{ChannelModel, CrossTalkSet};
use crate::utils::sparse::{DownCast, SparseMatrix};
use crate::{ChannelTag, OptFiltErr, Side};

fn impulse(n:usize, at:usize) -> Vec<f64> {
	let mut x = vec![0.0; n];
	x[at] = 1.0;
	x
}

fn exp_pulse(n:usize, rise:f64, fall:f64) -> Vec<f64> {
	let raw:Vec<f64> = (0..n).map(|i| { let t = i as f64; (-t/fall).exp() - (-t/rise).exp() }).collect();
	let max = raw.iter().cloned().fold(std::f64::MIN, f64::max);
	raw.into_iter().map(|v| v / max).collect()
}

#[test]
fn template_records_max() {
	let t = Template::from_waveform(ChannelTag::PT, &[0.0, 2.5, 1.0, 0.0], 1e-6).unwrap();
	assert_eq!(t.template_max(), 2.5);
	assert_eq!(t.len(), 4);
	assert!(Template::from_waveform(ChannelTag::PT, &[], 1e-6).is_err());
	assert!(Template::from_waveform(ChannelTag::PT, &[1.0], 0.0).is_err());
}

#[test]
fn noise_rejects_zero_power_above_dc() {
	assert!(NoiseModel::new(ChannelTag::PA, vec![0.0, 1.0, 1.0]).is_ok());
	assert_eq!(NoiseModel::new(ChannelTag::PA, vec![1.0, 0.0, 1.0]).unwrap_err(),
		OptFiltErr::InvalidInput("Noise power must be positive and finite outside of DC"));
}

#[test]
fn psd_unfolding() {
	// white noise of unit variance per sample at 1 MHz has a one-sided density of sqrt(2/fs)
	let fs:f64 = 1.0e6;
	let density = (2.0 / fs).sqrt();
	let mut psd = vec![density; 5];
	psd[0] = 1.0 / fs.sqrt();
	psd[4] = 1.0 / fs.sqrt();

	let noise = NoiseModel::from_psd(ChannelTag::PT, &psd, fs).unwrap();
	assert_eq!(noise.len(), 8);
	for p in noise.power() {
		assert_abs_diff_eq!(*p, 1.0, epsilon = 1e-12);
	}
}

#[test]
fn psd_unfolding_mirrors_upper_half() {
	let noise = NoiseModel::from_psd(ChannelTag::PT, &[1.0, 2.0, 3.0], 2.0).unwrap();
	let p = noise.power();
	assert_abs_diff_eq!(p[0], 2.0, epsilon = 1e-12);
	assert_abs_diff_eq!(p[1], 4.0, epsilon = 1e-12);
	assert_abs_diff_eq!(p[2], 18.0, epsilon = 1e-12);
	assert_abs_diff_eq!(p[3], 4.0, epsilon = 1e-12);
}

#[test]
fn noise_from_traces_averages_power() {
	let traces = vec![impulse(4, 0), impulse(4, 2)];
	let noise = NoiseModel::from_traces(ChannelTag::PB, &traces).unwrap();
	for p in noise.power() {
		assert_abs_diff_eq!(*p, 0.25, epsilon = 1e-12);
	}
	assert!(NoiseModel::from_traces(ChannelTag::PB, &[]).is_err());
}

#[test]
fn kernel_and_signal_to_noise() {
	let t = Template::from_waveform(ChannelTag::PT, &impulse(8, 0), 1.0).unwrap();
	let noise = NoiseModel::new(ChannelTag::PT, vec![1.0; 8]).unwrap();
	let k = OptimalKernel::new(&t, &noise).unwrap();

	// every bin of an impulse is 1/sqrt(8), seven of them count
	assert_abs_diff_eq!(k.sig_to_noise_sq, 7.0 / 8.0, epsilon = 1e-12);
	assert_eq!(k.kernel[0], Complex::new(0.0, 0.0));
	assert_abs_diff_eq!(k.resolution(), (8.0f64 / 7.0).sqrt(), epsilon = 1e-12);
}

fn charge_pair(n:usize, leak:f64) -> Vec<ChannelModel> {
	let qi = exp_pulse(n, 2.0, 10.0);
	let qo = exp_pulse(n, 3.0, 6.0);
	let qix:Vec<f64> = qo.iter().map(|v| v * leak).collect();
	let qox:Vec<f64> = qi.iter().map(|v| v * leak).collect();
	let noise = |tag| NoiseModel::new(tag, vec![1.0; n]).unwrap();

	vec![
		ChannelModel::new(Template::from_waveform(ChannelTag::QI, &qi, 1.0).unwrap(), noise(ChannelTag::QI), Side::S1).unwrap()
			.with_cross_talk(Template::from_waveform(ChannelTag::QIX, &qix, 1.0).unwrap()).unwrap(),
		ChannelModel::new(Template::from_waveform(ChannelTag::QO, &qo, 1.0).unwrap(), noise(ChannelTag::QO), Side::S1).unwrap()
			.with_cross_talk(Template::from_waveform(ChannelTag::QOX, &qox, 1.0).unwrap()).unwrap(),
	]
}

#[test]
fn weighting_matrix_is_symmetric_and_inverted() {
	let set = CrossTalkSet::new(charge_pair(32, 0.2)).unwrap();
	let side = &set.sides()[0];
	let w = side.weighting();
	assert_abs_diff_eq!(w[(0, 1)], w[(1, 0)], epsilon = 1e-12);

	let product = w * side.weighting_inverse();
	assert_abs_diff_eq!(product[(0, 0)], 1.0, epsilon = 1e-9);
	assert_abs_diff_eq!(product[(0, 1)], 0.0, epsilon = 1e-9);
	assert_abs_diff_eq!(product[(1, 1)], 1.0, epsilon = 1e-9);

	let flat = set.w_inverse(Side::S1).unwrap();
	assert_eq!(flat.len(), 4);
	assert_abs_diff_eq!(flat[1], side.weighting_inverse()[(0, 1)], epsilon = 1e-15);
	assert!(set.w_inverse(Side::S2).is_none());
	assert_eq!(set.channels(), vec![ChannelTag::QI, ChannelTag::QO]);
}

#[test]
fn missing_cross_talk_template() {
	let mut pair = charge_pair(16, 0.1);
	pair[1].cross_talk = None;
	assert_eq!(CrossTalkSet::new(pair).unwrap_err(), OptFiltErr::MissingModel(ChannelTag::QOX));
}

#[test]
fn singular_weighting_matrix() {
	// identical shapes and full leakage make both rows of the weighting matrix the same
	let n = 16;
	let shape = exp_pulse(n, 2.0, 5.0);
	let noise = |tag| NoiseModel::new(tag, vec![1.0; n]).unwrap();
	let model = |tag, xtag, side| {
		ChannelModel::new(Template::from_waveform(tag, &shape, 1.0).unwrap(), noise(tag), side).unwrap()
			.with_cross_talk(Template::from_waveform(xtag, &shape, 1.0).unwrap()).unwrap()
	};
	let pair = vec![model(ChannelTag::QI, ChannelTag::QIX, Side::S1), model(ChannelTag::QO, ChannelTag::QOX, Side::S1)];

	assert_eq!(CrossTalkSet::new(pair.clone()).unwrap_err(), OptFiltErr::SingularMatrix("Cross-talk weighting matrix"));

	let fallback = CrossTalkSet::with_railed_fallback(pair).unwrap();
	assert_eq!(fallback.w_inverse(Side::S1).unwrap(), vec![1.0, 0.0, 0.0, 1.0]);
}

#[test]
fn rank_one_coupling_is_singular() {
	// every template is a multiple of one shape, so W has rank one without an exactly zero determinant
	let n = 32;
	let s = exp_pulse(n, 2.0, 7.0);
	let scaled = |k:f64| -> Vec<f64> { s.iter().map(|v| v * k).collect() };
	let noise = |tag| NoiseModel::new(tag, vec![1.0; n]).unwrap();
	let pair = vec![
		ChannelModel::new(Template::from_waveform(ChannelTag::QI, &s, 1.0).unwrap(), noise(ChannelTag::QI), Side::S1).unwrap()
			.with_cross_talk(Template::from_waveform(ChannelTag::QIX, &scaled(3.1), 1.0).unwrap()).unwrap(),
		ChannelModel::new(Template::from_waveform(ChannelTag::QO, &scaled(2.17), 1.0).unwrap(), noise(ChannelTag::QO), Side::S1).unwrap()
			.with_cross_talk(Template::from_waveform(ChannelTag::QOX, &scaled(0.7), 1.0).unwrap()).unwrap(),
	];

	assert_eq!(CrossTalkSet::new(pair.clone()).unwrap_err(), OptFiltErr::SingularMatrix("Cross-talk weighting matrix"));
	assert_eq!(CrossTalkSet::with_railed_fallback(pair).unwrap().w_inverse(Side::S1).unwrap(), vec![1.0, 0.0, 0.0, 1.0]);
}

#[test]
fn singularity_test_is_relative() {
	assert!(is_singular(0.0, &[1.0, 1.0]));
	assert!(is_singular(1e-3, &[1e8, 1e8]));
	assert!(!is_singular(1e-3, &[1e-2, 1e-2]));
	assert!(is_singular(std::f64::NAN, &[1.0, 1.0]));
	assert!(!is_singular(2.0, &[2.0]));
}

#[test]
fn supplied_w_inverse_replaces_derived_one() {
	let supplied = vec![0.5, -0.1, -0.1, 0.25];
	let set = CrossTalkSet::with_w_inverse(charge_pair(16, 0.1), Side::S1, supplied.clone()).unwrap();
	assert_eq!(set.w_inverse(Side::S1).unwrap(), supplied);
	assert_abs_diff_eq!(set.sides()[0].weighting_inverse()[(0, 1)], -0.1, epsilon = 1e-15);

	// a calibrated inverse also stands in for a singular derived one
	let n = 16;
	let shape = exp_pulse(n, 2.0, 5.0);
	let model = |tag, xtag| {
		ChannelModel::new(Template::from_waveform(tag, &shape, 1.0).unwrap(), NoiseModel::new(tag, vec![1.0; n]).unwrap(), Side::S1).unwrap()
			.with_cross_talk(Template::from_waveform(xtag, &shape, 1.0).unwrap()).unwrap()
	};
	let degenerate = vec![model(ChannelTag::QI, ChannelTag::QIX), model(ChannelTag::QO, ChannelTag::QOX)];
	assert!(CrossTalkSet::with_w_inverse(degenerate, Side::S1, vec![1.0, 0.0, 0.0, 1.0]).is_ok());

	match CrossTalkSet::with_w_inverse(charge_pair(16, 0.1), Side::S1, vec![1.0]) {
		Err(OptFiltErr::Configuration(_)) => {},
		other => panic!("unexpected {:?}", other),
	}
	assert!(CrossTalkSet::with_w_inverse(charge_pair(16, 0.1), Side::S1, vec![1.0, 2.0, 3.0]).is_err());
	assert!(CrossTalkSet::with_w_inverse(charge_pair(16, 0.1), Side::S2, vec![1.0, 0.0, 0.0, 1.0]).is_err());
}

#[test]
fn too_many_channels_on_one_side() {
	let mut set = charge_pair(16, 0.1);
	let extra = ChannelModel::new(
		Template::from_waveform(ChannelTag::PA, &exp_pulse(16, 1.0, 4.0), 1.0).unwrap(),
		NoiseModel::new(ChannelTag::PA, vec![1.0; 16]).unwrap(), Side::S1).unwrap();
	set.push(extra);
	match CrossTalkSet::new(set) {
		Err(OptFiltErr::Configuration(_)) => {},
		other => panic!("unexpected {:?}", other),
	}
}

#[test]
fn stationary_covariance_is_diagonal_with_finite_dc() {
	let noise = NoiseModel::new(ChannelTag::PT, vec![0.0, 2.0, 5.0, 2.0]).unwrap();
	let cov = NoiseCovariance::from_noise_model(&noise);
	let diag:Vec<f64> = cov.matrix().diagonal().iter().map(|c| c.re).collect();
	assert_eq!(diag, vec![5.0, 2.0, 5.0, 2.0]);

	let fact = cov.factorize(None).unwrap();
	let r = vec![Complex::new(0.0, 0.0), Complex::new(2.0, 0.0), Complex::new(0.0, 5.0), Complex::new(1.0, 1.0)];
	assert_abs_diff_eq!(fact.weighted_energy(&r).unwrap(), 4.0/2.0 + 25.0/5.0 + 2.0/2.0, epsilon = 1e-12);
}

#[test]
fn position_term_scales_with_amplitude() {
	let base = NoiseCovariance::new(SparseMatrix::from_diagonal(&[1.0, 1.0])).unwrap();
	let pos = NoiseCovariance::new(SparseMatrix::from_diagonal(&[0.5, 2.0])).unwrap();
	let eff = base.with_position_term(&pos, 2.0).unwrap();
	assert_eq!(eff.matrix().get(1, 1), Complex::new(9.0, 0.0));
}

#[test]
fn non_hermitian_covariance_is_rejected() {
	let m = SparseMatrix::from_triplets(2, vec![(0, 0, Complex::new(1.0, 0.0)), (0, 1, Complex::new(0.5, 0.0)), (1, 1, Complex::new(1.0, 0.0))]).unwrap();
	assert!(NoiseCovariance::new(m).is_err());
}

#[test]
fn singular_covariance() {
	let m = SparseMatrix::from_diagonal(&[1.0, 0.0, 1.0, 1.0]);
	assert!(NoiseCovariance::new(m).unwrap().factorize(None).is_err());
}

#[test]
fn complex_off_diagonal_solve() {
	let m = SparseMatrix::from_triplets(2, vec![
		(0, 0, Complex::new(2.0, 0.0)), (0, 1, Complex::new(0.0, 1.0)),
		(1, 0, Complex::new(0.0, -1.0)), (1, 1, Complex::new(2.0, 0.0)),
	]).unwrap();
	let fact = NoiseCovariance::new(m).unwrap().factorize(None).unwrap();
	let x = fact.solve(&[Complex::new(1.0, 0.0), Complex::new(0.0, 0.0)]).unwrap();
	assert_abs_diff_eq!(x[0].re, 2.0/3.0, epsilon = 1e-12);
	assert_abs_diff_eq!(x[0].im, 0.0, epsilon = 1e-12);
	assert_abs_diff_eq!(x[1].re, 0.0, epsilon = 1e-12);
	assert_abs_diff_eq!(x[1].im, 1.0/3.0, epsilon = 1e-12);
}

#[test]
fn long_diagonal_covariance_stays_sparse() {
	let n = 4096;
	let diag:Vec<f64> = (0..n).map(|i| 1.0 + (i % 7) as f64).collect();
	let fact = NoiseCovariance::new(SparseMatrix::from_diagonal(&diag)).unwrap().factorize(None).unwrap();
	let rhs:Vec<Complex<f64>> = diag.iter().map(|d| Complex::new(*d, -*d)).collect();
	let x = fact.solve(&rhs).unwrap();
	assert_eq!(x.len(), n);
	for v in x.iter() {
		assert_abs_diff_eq!(v.re, 1.0, epsilon = 1e-12);
		assert_abs_diff_eq!(v.im, -1.0, epsilon = 1e-12);
	}
}

#[test]
fn indefinite_covariance_is_not_factorized() {
	let m = SparseMatrix::from_diagonal(&[1.0, -2.0, 1.0]);
	assert_eq!(NoiseCovariance::new(m).unwrap().factorize(None).unwrap_err(), OptFiltErr::SingularMatrix("Noise covariance factorization"));
}

#[test]
fn down_cast_solve_zeroes_dropped_bins() {
	let cov = NoiseCovariance::new(SparseMatrix::from_diagonal(&[1.0, 2.0, 4.0, 8.0, 4.0, 2.0])).unwrap();
	let fact = cov.factorize(Some(DownCast::Outer(2))).unwrap();
	let rhs = vec![Complex::new(1.0, 0.0); 6];
	let x = fact.solve(&rhs).unwrap();
	let re:Vec<f64> = x.iter().map(|c| c.re).collect();
	assert_eq!(re, vec![1.0, 0.5, 0.0, 0.0, 0.25, 0.5]);
}
