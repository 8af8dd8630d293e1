
use approx::assert_abs_diff_eq;
use num_complex::Complex;

use super::*;
use crate::OptFiltErr;

#[test]
fn round_trip() {
	let x:Vec<f64> = (0..64).map(|i| ((i as f64) * 0.37).sin() + 0.1 * (i as f64)).collect();
	let xp = inverse(&forward(&x).unwrap()).unwrap();

	for (a, b) in x.iter().zip(xp.iter()) {
		assert_abs_diff_eq!(a, b, epsilon = 1e-10);
	}
}

#[test]
fn round_trip_non_power_of_two() {
	let x:Vec<f64> = vec![1.0, -2.0, 0.5, 3.0, 4.5, -1.0];
	let xp = inverse(&forward(&x).unwrap()).unwrap();

	for (a, b) in x.iter().zip(xp.iter()) {
		assert_abs_diff_eq!(a, b, epsilon = 1e-12);
	}
}

#[test]
fn zero_length_is_rejected() {
	assert_eq!(forward(&[]).unwrap_err(), OptFiltErr::InvalidInput("Zero-length transform"));
}

#[test]
fn wrong_length_is_rejected() {
	let t = SpectralTransform::new(8).unwrap();
	assert_eq!(t.forward(&[0.0; 4]).unwrap_err(), OptFiltErr::LengthMismatch{ expected: 8, actual: 4 });
}

#[test]
fn parseval() {
	let x:Vec<f64> = (0..32).map(|i| ((i * 7) % 5) as f64 - 2.0).collect();
	let energy_time:f64 = x.iter().map(|v| v*v).sum();
	let energy_freq:f64 = forward(&x).unwrap().iter().map(|c| c.norm_sqr()).sum();
	assert_abs_diff_eq!(energy_time, energy_freq, epsilon = 1e-9);
}

#[test]
fn correlation_peaks_at_shift() {
	let n = 16;
	let t = SpectralTransform::new(n).unwrap();
	let mut a = vec![0.0; n];
	let mut b = vec![0.0; n];
	a[0] = 1.0;
	b[5] = 1.0;

	let fa = t.forward(&a).unwrap();
	let fb = t.forward(&b).unwrap();
	let product:Vec<Complex<f64>> = fb.iter().zip(fa.iter()).map(|(x, y)| x * y.conj()).collect();
	let corr = t.correlate(&product).unwrap();

	let (best_idx, _) = corr.iter().enumerate().fold((0, std::f64::MIN), |acc, (i, v)| if *v > acc.1 { (i, *v) } else { acc });
	assert_eq!(best_idx, 5);
	assert_abs_diff_eq!(corr[5], 1.0, epsilon = 1e-12);
}

#[test]
fn phase_shift_undoes_delay() {
	let n = 8;
	let mut a = vec![0.0; n];
	let mut b = vec![0.0; n];
	a[1] = 2.0;
	b[4] = 2.0;

	let shifted = shift_phase(&forward(&b).unwrap(), 3);
	let expected = forward(&a).unwrap();
	for (x, y) in shifted.iter().zip(expected.iter()) {
		assert_abs_diff_eq!(x.re, y.re, epsilon = 1e-12);
		assert_abs_diff_eq!(x.im, y.im, epsilon = 1e-12);
	}
}

#[test]
fn kernel_product_drops_dc() {
	let spectrum = vec![Complex::new(3.0, 0.0), Complex::new(1.0, 1.0)];
	let kernel = vec![Complex::new(2.0, 0.0), Complex::new(0.0, 1.0)];
	let product = apply_kernel(&spectrum, &kernel);
	assert_eq!(product[0], Complex::new(0.0, 0.0));
	assert_eq!(product[1], Complex::new(-1.0, 1.0));
}
