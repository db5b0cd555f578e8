use std::fmt::Display;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// How a chromatographic peak's intensity is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArgIntensityMode {
    #[default]
    /// The intensity of the most intense isotopic envelope
    Apex,
    /// The summed intensity of every isotopic envelope in the peak
    Integrate,
}

impl ArgIntensityMode {
    pub fn integrate(&self) -> bool {
        matches!(self, Self::Integrate)
    }
}

impl Display for ArgIntensityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub(crate) fn non_negative_float_f64(s: &str) -> Result<f64, String> {
    let value = s.parse::<f64>().map_err(|e| e.to_string())?;
    if value < 0.0 {
        Err(format!("`{s}` is less than zero"))
    } else {
        Ok(value)
    }
}

pub(crate) fn positive_float_f64(s: &str) -> Result<f64, String> {
    let value = s.parse::<f64>().map_err(|e| e.to_string())?;
    if value <= 0.0 {
        Err(format!("`{s}` must be greater than zero"))
    } else {
        Ok(value)
    }
}
