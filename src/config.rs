use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::{Serialize, Deserialize};

use crate::filters::cross_talk::CrossTalkMatchedFilter;
use crate::filters::dual_template::DualTemplateFilter;
use crate::filters::non_stationary::{NonStationaryMatchedFilter, NonStationaryParams};
use crate::filters::single_channel::SingleChannelMatchedFilter;
use crate::utils::SearchWindow;
use crate::{OptFiltErr, Result};

/// Per-detector filter settings as supplied by the calibration layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
	/// Seconds per sample.
	pub sample_period: f64,
	pub search_window: Option<SearchWindow>,
	/// Inclusive `[z_min, z_max]` offset of the side 2 delay relative to side 1, in bins.
	pub time_constraint: Option<(i64, i64)>,
	pub interpolate: bool,
	pub low_freq_cutoff_hz: Option<f64>,
	pub non_stationary: Option<NonStationaryParams>,
}

impl Default for FilterConfig {
	fn default() -> Self {
		FilterConfig {
			sample_period: 1.6e-6,
			search_window: None,
			time_constraint: None,
			interpolate: false,
			low_freq_cutoff_hz: None,
			non_stationary: None,
		}
	}
}

impl FilterConfig {

	pub fn from_reader<R: Read>(reader:R) -> Result<Self> {
		let cfg:FilterConfig = serde_json::from_reader(reader).map_err(|e| OptFiltErr::Configuration(format!("Unable to parse filter configuration: {}", e)))?;
		cfg.validate()?;
		Ok(cfg)
	}

	pub fn from_path<P: AsRef<Path>>(path:P) -> Result<Self> {
		let file = File::open(path.as_ref()).map_err(|e| OptFiltErr::Configuration(format!("Unable to open {}: {}", path.as_ref().display(), e)))?;
		Self::from_reader(BufReader::new(file))
	}

	pub fn validate(&self) -> Result<()> {
		if !(self.sample_period > 0.0) {
			return Err(OptFiltErr::Configuration("sample_period must be positive".to_string()));
		}
		if let Some(w) = self.search_window {
			if w.high <= w.low { return Err(OptFiltErr::Configuration("search_window is empty".to_string())); }
		}
		if let Some((z_min, z_max)) = self.time_constraint {
			if z_max < z_min { return Err(OptFiltErr::Configuration("time_constraint is empty".to_string())); }
		}
		if let Some(fc) = self.low_freq_cutoff_hz {
			if !(fc > 0.0) { return Err(OptFiltErr::Configuration("low_freq_cutoff_hz must be positive".to_string())); }
		}
		Ok(())
	}

	pub fn sample_rate(&self) -> f64 { 1.0 / self.sample_period }

	fn window(&self) -> Result<SearchWindow> {
		self.search_window.ok_or_else(|| OptFiltErr::Configuration("search_window is required".to_string()))
	}

	pub fn configure_single(&self, filter:&mut SingleChannelMatchedFilter) -> Result<()> {
		let w = self.window()?;
		filter.set_search_window(w.low, w.high)?;
		filter.set_interpolation(self.interpolate);
		filter.set_low_freq_cutoff(self.low_freq_cutoff_hz);
		Ok(())
	}

	pub fn configure_dual(&self, filter:&mut DualTemplateFilter) -> Result<()> {
		let w = self.window()?;
		filter.set_search_window(w.low, w.high)?;
		filter.set_interpolation(self.interpolate);
		Ok(())
	}

	pub fn configure_cross_talk(&self, filter:&mut CrossTalkMatchedFilter) -> Result<()> {
		let w = self.window()?;
		filter.set_search_window(w.low, w.high)?;
		filter.set_time_constraint(self.time_constraint)?;
		filter.set_interpolation(self.interpolate);
		Ok(())
	}

	pub fn configure_non_stationary(&self, filter:&mut NonStationaryMatchedFilter) -> Result<()> {
		filter.set_params(self.non_stationary.unwrap_or_default())?;
		if let Some(w) = self.search_window { filter.set_search_window(w.low, w.high)?; }
		Ok(())
	}

}
