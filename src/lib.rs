
use std::fmt;

use serde::{Serialize, Deserialize};

pub mod batch;
pub mod config;
pub mod filters;
pub mod fourier_analysis;
pub mod model;
pub mod utils;

/// Value written into every output field of a fit that could not be carried out.
pub const SENTINEL:f64 = -999999.0;

/// Closed set of channel names a detector can expose.  The `X` variants are cross-talk templates,
/// i.e. the shape of the partner channel's signal as it appears in the named channel.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChannelTag {
	QI, QO, QIX, QOX,
	PA, PB, PC, PD,
	PT, PS1, PS2,
}

impl ChannelTag {

	pub fn is_charge(&self) -> bool {
		match self {
			ChannelTag::QI | ChannelTag::QO | ChannelTag::QIX | ChannelTag::QOX => true,
			_ => false,
		}
	}

	pub fn is_cross_talk(&self) -> bool { *self == ChannelTag::QIX || *self == ChannelTag::QOX }

	/// The cross-talk template describing how the partner's signal leaks into this channel.
	pub fn cross_talk(&self) -> Option<ChannelTag> {
		match self {
			ChannelTag::QI => Some(ChannelTag::QIX),
			ChannelTag::QO => Some(ChannelTag::QOX),
			_ => None,
		}
	}

}

impl fmt::Display for ChannelTag {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "{:?}", self) }
}

/// Detector side a channel belongs to.  Only the cross-talk filter distinguishes sides.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
	S1,
	S2,
}

#[derive(Debug, PartialEq, Clone)]
pub enum OptFiltErr {
	InvalidInput(&'static str),
	LengthMismatch { expected: usize, actual: usize },
	UninitializedState(&'static str),
	SingularMatrix(&'static str),
	MissingModel(ChannelTag),
	Configuration(String),
}

impl fmt::Display for OptFiltErr {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			OptFiltErr::InvalidInput(msg)       => write!(f, "Invalid input: {}", msg),
			OptFiltErr::LengthMismatch{ expected, actual } => write!(f, "Length mismatch: expected {} samples, got {}", expected, actual),
			OptFiltErr::UninitializedState(msg) => write!(f, "Filter not ready: {}", msg),
			OptFiltErr::SingularMatrix(msg)     => write!(f, "Non-invertible matrix: {}", msg),
			OptFiltErr::MissingModel(tag)       => write!(f, "No template or noise model loaded for channel {}", tag),
			OptFiltErr::Configuration(msg)      => write!(f, "Configuration error: {}", msg),
		}
	}
}

impl std::error::Error for OptFiltErr {}

pub type Result<T> = std::result::Result<T, OptFiltErr>;

/// Checks that a waveform or spectrum has the length the filter was built for.
pub fn check_len(expected:usize, actual:usize) -> Result<()> {
	if expected == actual { Ok(()) }
	else { Err(OptFiltErr::LengthMismatch{ expected, actual }) }
}
