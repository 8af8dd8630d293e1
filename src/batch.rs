use log::{debug, warn};
use rayon::prelude::*;

use crate::filters::MatchedFilter;
use crate::filters::non_stationary::{NonStationaryMatchedFilter, NonStationaryResult, Seed};
use crate::Result;

/// One pulse: a waveform per channel, in the filter's channel order.
pub type Pulse = Vec<Vec<f64>>;

/// Fits every pulse in parallel against one configured filter.  Results keep the input order, and a
/// failed pulse does not stop the others.
pub fn fit_all<F>(filter:&F, pulses:&[Pulse]) -> Vec<Result<F::Output>>
	where F: MatchedFilter + Sync
{
	debug!("Fitting {} pulses over {} channel(s)", pulses.len(), filter.n_channels());
	let results:Vec<Result<F::Output>> = pulses.par_iter().map(|pulse| {
		let waveforms:Vec<&[f64]> = pulse.iter().map(|w| w.as_slice()).collect();
		filter.fit(&waveforms)
	}).collect();

	let failures = results.iter().filter(|r| r.is_err()).count();
	if failures > 0 { warn!("{} of {} pulses failed", failures, pulses.len()); }
	results
}

/// Parallel non-stationary fits, each with the seed of its own stationary fit.
pub fn fit_all_seeded(filter:&NonStationaryMatchedFilter, pulses:&[(Vec<f64>, Seed)]) -> Vec<Result<NonStationaryResult>> {
	pulses.par_iter().map(|(waveform, seed)| filter.fit(waveform, *seed)).collect()
}

#[cfg(test)]
mod tests {

	use super::*;
	use crate::filters::single_channel::SingleChannelMatchedFilter;
	use crate::filters::non_stationary::NonStationaryParams;
	use crate::model::{NoiseModel, Template};
	use crate::utils::construct_fake_pulse;
	use crate::ChannelTag;

	fn shape(n:usize) -> Vec<f64> {
		(0..n).map(|i| { let t = i as f64; (-t/6.0).exp() - (-t/1.5).exp() }).collect()
	}

	#[test]
	fn parallel_matches_sequential() {
		let n = 64;
		let s = shape(n);
		let mut of = SingleChannelMatchedFilter::new();
		of.load_template(Template::from_waveform(ChannelTag::PT, &s, 1e-6).unwrap()).unwrap();
		of.load_noise_model(NoiseModel::new(ChannelTag::PT, vec![1.0; n]).unwrap()).unwrap();
		of.set_search_window(-8, 8).unwrap();

		let mut pulses:Vec<Pulse> = (0..20).map(|i| vec![construct_fake_pulse(&vec![0.0; n], &s, 1.0 + i as f64, (i % 7) as i64 - 3).unwrap()]).collect();
		pulses.push(vec![vec![0.0; 3]]);

		let results = fit_all(&of, &pulses);
		assert_eq!(results.len(), 21);
		for (pulse, result) in pulses.iter().zip(results.iter()).take(20) {
			assert_eq!(result.as_ref().unwrap(), &of.fit(&pulse[0]).unwrap());
		}
		assert!(results[20].is_err());
	}

	#[test]
	fn seeded_batch() {
		let n = 32;
		let s = shape(n);
		let mut of = NonStationaryMatchedFilter::new(NonStationaryParams{ amplitude_threshold: 1.5, base_only: true, ..NonStationaryParams::default() });
		of.load_template(Template::from_waveform(ChannelTag::PT, &s, 1e-6).unwrap()).unwrap();
		of.load_noise_model(NoiseModel::new(ChannelTag::PT, vec![1.0; n]).unwrap()).unwrap();

		let tmax = s.iter().cloned().fold(std::f64::MIN, f64::max);
		let pulses:Vec<(Vec<f64>, Seed)> = (0..4).map(|i| {
			let a = i as f64;
			(construct_fake_pulse(&vec![0.0; n], &s, a, 0).unwrap(), Seed{ amplitude: a * tmax, delay: 0.0, random_trigger: false })
		}).collect();
		let results = fit_all_seeded(&of, &pulses);
		let short:Vec<bool> = results.iter().map(|r| r.as_ref().unwrap().short_circuited).collect();
		assert_eq!(short, vec![true, true, false, false]);
	}

}
