//! Serialisable layer descriptions and the registry that rebuilds layers from them.

use serde::{Serialize, Deserialize};

use crate::error::{LayerError, Result};
use crate::layers::{Dropout, DropoutConfig, Layer, Linear, LinearConfig, Recurrent, RecurrentConfig, GRU, LSTM};
use crate::wrappers::{Bidirectional, BidirectionalConfig, TimeDistributed, TimeDistributedConfig};

/// `{"class_name": ..., "config": {...}}` description of any known layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class_name", content = "config")]
pub enum LayerConfig {
    Linear(LinearConfig),
    Dropout(DropoutConfig),
    #[serde(rename = "LSTM")]
    Lstm(RecurrentConfig),
    #[serde(rename = "GRU")]
    Gru(RecurrentConfig),
    TimeDistributed(TimeDistributedConfig),
    Bidirectional(BidirectionalConfig),
}

impl LayerConfig {
    pub fn class_name(&self) -> &'static str {
        match self {
            LayerConfig::Linear(_) => "Linear",
            LayerConfig::Dropout(_) => "Dropout",
            LayerConfig::Lstm(_) => "LSTM",
            LayerConfig::Gru(_) => "GRU",
            LayerConfig::TimeDistributed(_) => "TimeDistributed",
            LayerConfig::Bidirectional(_) => "Bidirectional",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            LayerConfig::Linear(c) => &c.name,
            LayerConfig::Dropout(c) => &c.name,
            LayerConfig::Lstm(c) | LayerConfig::Gru(c) => &c.name,
            LayerConfig::TimeDistributed(c) => &c.name,
            LayerConfig::Bidirectional(c) => &c.name,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Builds a fresh, unbuilt layer from its description.
pub fn layer_from_config(config: &LayerConfig) -> Result<Box<dyn Layer>> {
    Ok(match config {
        LayerConfig::Linear(c) => Box::new(Linear::new(c.clone())),
        LayerConfig::Dropout(c) => Box::new(Dropout::new(c.clone())?),
        LayerConfig::Lstm(c) => Box::new(LSTM::new(c.clone())),
        LayerConfig::Gru(c) => Box::new(GRU::new(c.clone())),
        LayerConfig::TimeDistributed(c) => Box::new(TimeDistributed::from_config(c)?),
        LayerConfig::Bidirectional(c) => Box::new(Bidirectional::from_config(c)?),
    })
}

/// Like [`layer_from_config`], restricted to recurrent layers.
pub fn recurrent_from_config(config: &LayerConfig) -> Result<Box<dyn Recurrent>> {
    match config {
        LayerConfig::Lstm(c) => Ok(Box::new(LSTM::new(c.clone()))),
        LayerConfig::Gru(c) => Ok(Box::new(GRU::new(c.clone()))),
        other => Err(LayerError::config(format!(
            "`{}` ({}) is not a recurrent layer",
            other.name(),
            other.class_name()
        ))),
    }
}
