use crate::utils::wrap_delay;

/// Values at the center of a parabolic fit, before conversion to physical units.
#[derive(Debug, Clone, PartialEq)]
pub struct Refinement {
	/// Signed delay in (fractional) bins.
	pub delay_bins: f64,
	pub chisq: f64,
	pub amplitudes: Vec<f64>,
	/// False when the neighbors did not bracket a minimum and the discrete values were returned.
	pub applied: bool,
}

/// `[series[lag-1], series[lag], series[lag+1]]` with cyclic wrap.
pub fn neighbors(series:&[f64], lag:usize) -> [f64; 3] {
	let n = series.len();
	[series[(lag + n - 1) % n], series[lag], series[(lag + 1) % n]]
}

/// Coefficients (a, b, c) of `y = a x^2 + b x + c` through x = -1, 0, 1.
fn parabola(y:&[f64; 3]) -> (f64, f64, f64) {
	let a = 0.5*y[0] - y[1] + 0.5*y[2];
	let b = 0.5*(y[2] - y[0]);
	(a, b, y[1])
}

/// Refines the chi-square minimum at `lag`.  Each amplitude series is interpolated with its own parabola
/// at the offset of the chi-square minimum.
pub fn refine(lag:usize, chisq:&[f64], amplitudes:&[&[f64]]) -> Refinement {
	let n = chisq.len();
	let y = neighbors(chisq, lag);
	let discrete = Refinement {
		delay_bins: wrap_delay(lag as f64, n),
		chisq: y[1],
		amplitudes: amplitudes.iter().map(|a| a[lag]).collect(),
		applied: false,
	};

	// only interpolate inside a genuine local minimum
	if n < 3 || !(y[0] > y[1] && y[2] > y[1]) { return discrete; }

	let (a, b, c) = parabola(&y);
	let x = -b / (2.0*a);

	Refinement {
		delay_bins: wrap_delay(lag as f64 + x, n),
		chisq: c - b*b/(4.0*a),
		amplitudes: amplitudes.iter().map(|series| {
			let (a, b, c) = parabola(&neighbors(series, lag));
			a*x*x + b*x + c
		}).collect(),
		applied: true,
	}
}
