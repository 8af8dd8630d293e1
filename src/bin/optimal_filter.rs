use std::fs::File;
use std::io::BufReader;

use clap::{Arg, App};
use colored::*;
use serde::{Serialize, Deserialize};
use tracing_subscriber::filter::LevelFilter;

use optimal_filter::batch;
use optimal_filter::config::FilterConfig;
use optimal_filter::filters::FitResult;
use optimal_filter::filters::cross_talk::{CrossTalkMatchedFilter, CrossTalkResult};
use optimal_filter::filters::dual_template::DualTemplateFilter;
use optimal_filter::filters::non_stationary::{NonStationaryMatchedFilter, NonStationaryResult, Seed};
use optimal_filter::filters::single_channel::SingleChannelMatchedFilter;
use optimal_filter::model::cross_talk::{ChannelModel, CrossTalkSet};
use optimal_filter::model::{NoiseModel, Template};
use optimal_filter::{ChannelTag, OptFiltErr, Side};

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
enum FilterKind {
	Single,
	Dual,
	CrossTalk,
	NonStationary,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChannelSpec {
	tag: ChannelTag,
	#[serde(default = "default_side")]
	side: Side,
	template: Vec<f64>,
	/// Second basis shape for the 1x2 filter.
	fast_template: Option<Vec<f64>>,
	cross_talk: Option<(ChannelTag, Vec<f64>)>,
	/// One-sided amplitude spectral density.
	noise_psd: Option<Vec<f64>>,
	/// Per-bin power, used when no PSD is given.
	noise_power: Option<Vec<f64>>,
}

fn default_side() -> Side { Side::S1 }

#[derive(Debug, Serialize, Deserialize)]
struct JobSpec {
	filter: FilterKind,
	config: FilterConfig,
	channels: Vec<ChannelSpec>,
	/// Each pulse holds one waveform per channel, in channel order.
	pulses: Vec<Vec<Vec<f64>>>,
}

impl ChannelSpec {

	fn template(&self, dt:f64) -> Result<Template, String> {
		Template::from_waveform(self.tag, &self.template, dt).map_err(|e| e.to_string())
	}

	fn noise(&self, sample_rate:f64) -> Result<NoiseModel, String> {
		let noise = match (&self.noise_psd, &self.noise_power) {
			(Some(psd), _) => NoiseModel::from_psd(self.tag, psd, sample_rate),
			(None, Some(power)) => NoiseModel::new(self.tag, power.clone()),
			(None, None) => return Err(format!("Channel {} has no noise model", self.tag)),
		};
		noise.map_err(|e| e.to_string())
	}

}

fn report(idx:usize, label:&str, result:&FitResult) {
	let line = format!("{:5} {:5} amp={:?} delay={:.3e} [sec] chisq={:.2}", idx, label, result.amplitudes, result.delay, result.chisq);
	if result.is_sentinel() { eprintln!("{}", line.red()); }
	else { eprintln!("{}", line.green()); }
}

fn report_failure(idx:usize, label:&str, err:&OptFiltErr) {
	eprintln!("{}", format!("{:5} {:5} failed: {}", idx, label, err).red());
}

/// Reports every (pulse index, result) pair and keeps failed ones as `None` so the output stays aligned
/// with the input.
fn tabulate<T, I, F>(results:I, label:&str, quiet:bool, show:F) -> Vec<Option<T>>
	where I: IntoIterator<Item=(usize, Result<T, OptFiltErr>)>, F: Fn(usize, &T) {
	results.into_iter().map(|(idx, r)| match r {
		Ok(r) => {
			if !quiet { show(idx, &r); }
			Some(r)
		},
		Err(e) => {
			report_failure(idx, label, &e);
			None
		},
	}).collect()
}

/// Seeds for the non-stationary pass and the pulse index each one came from.  Pulses whose stationary fit
/// failed have no seed and stay null.
fn seeds(pulses:&[Vec<Vec<f64>>], stationary:&[Option<FitResult>]) -> (Vec<(Vec<f64>, Seed)>, Vec<usize>) {
	let mut seeded = vec![];
	let mut slots = vec![];
	for (idx, (pulse, r)) in pulses.iter().zip(stationary.iter()).enumerate() {
		if let (Some(r), Some(waveform)) = (r, pulse.first()) {
			seeded.push((waveform.clone(), Seed{ amplitude: r.amplitude(), delay: r.delay, random_trigger: false }));
			slots.push(idx);
		}
	}
	(seeded, slots)
}

fn main() -> Result<(), String> {

	let matches = App::new("Optimal Filter")
		.version("0.1.0")
		.about("Fits pulses from a JSON job file with an optimal filter and prints amplitude, delay and chi-square as JSON")
		.arg(Arg::with_name("job")
			.short("j").long("job")
			.help("JSON job file with templates, noise, configuration and pulses")
			.required(true).takes_value(true))
		.arg(Arg::with_name("quiet")
			.short("q").long("quiet")
			.help("Suppress per-pulse status lines and library warnings; failures are still reported"))
		.arg(Arg::with_name("verbose")
			.short("v").long("verbose")
			.help("Log filter construction details"))
		.get_matches();

	let level = if matches.is_present("verbose") { LevelFilter::DEBUG }
		else if matches.is_present("quiet") { LevelFilter::ERROR }
		else { LevelFilter::WARN };
	tracing_subscriber::fmt()
		.with_max_level(level)
		.with_writer(std::io::stderr)
		.init();

	let job:JobSpec = {
		let fname:&str = matches.value_of("job").ok_or("No job file provided")?;
		let file = File::open(fname).map_err(|e| format!("Unable to open job file: {}", e))?;
		serde_json::from_reader(BufReader::new(file)).map_err(|e| format!("Unable to parse job file: {}", e))?
	};
	job.config.validate().map_err(|e| e.to_string())?;
	let quiet = matches.is_present("quiet");
	let dt = job.config.sample_period;
	let fs = job.config.sample_rate();

	let output:String = match job.filter {
		FilterKind::Single | FilterKind::NonStationary => {
			let ch = job.channels.first().ok_or("Job has no channels")?;
			let mut of = SingleChannelMatchedFilter::new();
			of.load_template(ch.template(dt)?).map_err(|e| e.to_string())?;
			of.load_noise_model(ch.noise(fs)?).map_err(|e| e.to_string())?;
			job.config.configure_single(&mut of).map_err(|e| e.to_string())?;

			let results = tabulate(batch::fit_all(&of, &job.pulses).into_iter().enumerate(), "OF", quiet, |idx, r| report(idx, "OF", r));
			if job.filter == FilterKind::Single {
				serde_json::to_string_pretty(&results).map_err(|e| e.to_string())?
			} else {
				let mut ns = NonStationaryMatchedFilter::new(Default::default());
				ns.load_template(ch.template(dt)?).map_err(|e| e.to_string())?;
				ns.load_noise_model(ch.noise(fs)?).map_err(|e| e.to_string())?;
				job.config.configure_non_stationary(&mut ns).map_err(|e| e.to_string())?;

				let (seeded, slots) = seeds(&job.pulses, &results);
				let fitted = tabulate(slots.iter().cloned().zip(batch::fit_all_seeded(&ns, &seeded)), "NS", quiet, |idx, r:&NonStationaryResult| {
					eprintln!("{}", format!("{:5} NS    amp={:.4e} delay={:.3e} [sec] chisq={:.2}", idx, r.amplitude, r.delay, r.chisq).green());
				});
				let mut ns_results = vec![None; job.pulses.len()];
				for (slot, r) in slots.into_iter().zip(fitted.into_iter()) { ns_results[slot] = r; }
				serde_json::to_string_pretty(&ns_results).map_err(|e| e.to_string())?
			}
		},
		FilterKind::Dual => {
			let ch = job.channels.first().ok_or("Job has no channels")?;
			let fast = ch.fast_template.as_ref().ok_or("The 1x2 filter needs a fast_template")?;
			let mut of = DualTemplateFilter::new();
			of.load_templates(ch.template(dt)?, Template::from_waveform(ch.tag, fast, dt).map_err(|e| e.to_string())?).map_err(|e| e.to_string())?;
			of.load_noise_model(ch.noise(fs)?).map_err(|e| e.to_string())?;
			job.config.configure_dual(&mut of).map_err(|e| e.to_string())?;

			let results = tabulate(batch::fit_all(&of, &job.pulses).into_iter().enumerate(), "1x2", quiet, |idx, r| report(idx, "1x2", r));
			serde_json::to_string_pretty(&results).map_err(|e| e.to_string())?
		},
		FilterKind::CrossTalk => {
			let mut models = vec![];
			for ch in job.channels.iter() {
				let mut model = ChannelModel::new(ch.template(dt)?, ch.noise(fs)?, ch.side).map_err(|e| e.to_string())?;
				if let Some((xtag, x)) = &ch.cross_talk {
					model = model.with_cross_talk(Template::from_waveform(*xtag, x, dt).map_err(|e| e.to_string())?).map_err(|e| e.to_string())?;
				}
				models.push(model);
			}
			// the filter expects side 1 first; reorder the pulse waveforms to match
			let set = CrossTalkSet::new(models).map_err(|e| e.to_string())?;
			let order:Vec<usize> = set.channels().iter()
				.map(|tag| job.channels.iter().position(|c| c.tag == *tag).ok_or(format!("Channel {} missing", tag)))
				.collect::<Result<Vec<usize>, String>>()?;
			let pulses:Vec<Vec<Vec<f64>>> = job.pulses.iter()
				.map(|p| order.iter().map(|i| p.get(*i).cloned().unwrap_or_default()).collect())
				.collect();

			let mut of = CrossTalkMatchedFilter::new();
			of.load_channel_set(set).map_err(|e| e.to_string())?;
			job.config.configure_cross_talk(&mut of).map_err(|e| e.to_string())?;

			let results = tabulate(batch::fit_all(&of, &pulses).into_iter().enumerate(), "NxN", quiet, |idx, r:&CrossTalkResult| {
				for side in r.sides.iter() { report(idx, &format!("{:?}", side.side), &side.fit); }
			});
			serde_json::to_string_pretty(&results).map_err(|e| e.to_string())?
		},
	};

	println!("{}", output);
	Ok(())

}
