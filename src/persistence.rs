use serde::{Serialize, Deserialize};
use std::fs::File;
use std::io::{Write, Read};
use std::path::Path;

use crate::backend::Tensor;
use crate::error::{LayerError, Result};
use crate::layers::{layer_from_config, Layer, LayerConfig};
use crate::shape::{Nested, Shape};

/// Serializable version of a tensor: row-major data plus dims
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SerializableTensor {
    data: Vec<f64>,
    shape: Vec<usize>,
}

impl From<&Tensor> for SerializableTensor {
    fn from(tensor: &Tensor) -> Self {
        Self {
            data: tensor.iter().cloned().collect(),
            shape: tensor.shape().to_vec(),
        }
    }
}

impl TryFrom<SerializableTensor> for Tensor {
    type Error = LayerError;

    fn try_from(tensor: SerializableTensor) -> Result<Self> {
        Ok(Tensor::from_shape_vec(tensor.shape, tensor.data)?)
    }
}

/// Layer metadata recorded alongside the saved config
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LayerMetadata {
    pub layer_name: String,
    pub class_name: String,
    pub version: String,
    pub created_at: String,
    pub num_weights: usize,
    pub description: Option<String>,
}

/// Complete saved layer: config, the shape it was built on, and weights
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SavedLayer {
    pub config: LayerConfig,
    pub input_shape: Option<Vec<Shape>>,
    pub weights: Vec<SerializableTensor>,
    pub metadata: LayerMetadata,
}

/// Layer persistence operations
pub struct LayerPersistence;

impl LayerPersistence {
    /// Save a layer to JSON format (human-readable)
    pub fn save_to_json<P: AsRef<Path>>(saved: &SavedLayer, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(saved)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    /// Load a layer from JSON format
    pub fn load_from_json<P: AsRef<Path>>(path: P) -> Result<SavedLayer> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let saved = serde_json::from_str(&contents)?;
        Ok(saved)
    }

    /// Save a weight list to binary format (compact and fast)
    pub fn save_weights_binary<P: AsRef<Path>>(weights: &[Tensor], path: P) -> Result<()> {
        let snapshot: Vec<SerializableTensor> = weights.iter().map(SerializableTensor::from).collect();
        let encoded = bincode::serialize(&snapshot)?;
        let mut file = File::create(path)?;
        file.write_all(&encoded)?;
        Ok(())
    }

    /// Load a weight list from binary format
    pub fn load_weights_binary<P: AsRef<Path>>(path: P) -> Result<Vec<Tensor>> {
        let mut file = File::open(path)?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;
        let snapshot: Vec<SerializableTensor> = bincode::deserialize(&contents)?;
        snapshot.into_iter().map(Tensor::try_from).collect()
    }

    /// Capture a layer together with metadata
    pub fn create_saved_layer<L: Layer + ?Sized>(
        layer: &L,
        input_shape: Option<&Nested<Shape>>,
        description: Option<String>,
    ) -> SavedLayer {
        let weights: Vec<SerializableTensor> = layer
            .get_weights()
            .iter()
            .map(SerializableTensor::from)
            .collect();
        let metadata = LayerMetadata {
            layer_name: layer.name().to_string(),
            class_name: layer.class_name().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            num_weights: weights.len(),
            description,
        };

        SavedLayer {
            config: layer.get_config(),
            input_shape: input_shape.map(|shape| shape.as_slice().to_vec()),
            weights,
            metadata,
        }
    }

    /// Rebuild a layer from its saved form: construct from config, build on
    /// the recorded input shape, then restore the weights.
    pub fn build_from_saved(saved: &SavedLayer) -> Result<Box<dyn Layer>> {
        let mut layer = layer_from_config(&saved.config)?;
        match &saved.input_shape {
            Some(shapes) => layer.build(&Nested::collapse(shapes.clone()))?,
            None if saved.weights.is_empty() => return Ok(layer),
            None => {
                return Err(LayerError::config(format!(
                    "saved layer `{}` has weights but no input shape to build on",
                    saved.metadata.layer_name
                )))
            }
        }

        let weights = saved
            .weights
            .iter()
            .cloned()
            .map(Tensor::try_from)
            .collect::<Result<Vec<_>>>()?;
        layer.set_weights(&weights)?;
        Ok(layer)
    }

    /// Load and rebuild a layer saved with [`PersistentLayer::save`]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<(Box<dyn Layer>, LayerMetadata)> {
        let saved = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => Self::load_from_json(path)?,
            _ => return Err(unsupported_extension(path.as_ref())),
        };
        let layer = Self::build_from_saved(&saved)?;
        Ok((layer, saved.metadata))
    }
}

fn unsupported_extension(path: &Path) -> LayerError {
    LayerError::config(format!(
        "layers are saved as JSON; expected a `.json` path, got {}",
        path.display()
    ))
}

/// Convenience trait for saving layers and their weights
pub trait PersistentLayer {
    /// Save the full layer (format determined by file extension; JSON only)
    fn save<P: AsRef<Path>>(&self, path: P, input_shape: &Nested<Shape>, description: Option<String>) -> Result<()>;

    /// Save the current weights as a binary snapshot
    fn save_weights<P: AsRef<Path>>(&self, path: P) -> Result<()>;

    /// Restore weights from a binary snapshot
    fn load_weights<P: AsRef<Path>>(&mut self, path: P) -> Result<()>;
}

impl<L: Layer + ?Sized> PersistentLayer for L {
    fn save<P: AsRef<Path>>(&self, path: P, input_shape: &Nested<Shape>, description: Option<String>) -> Result<()> {
        if !self.built() {
            return Err(LayerError::NotBuilt(self.name().to_string()));
        }
        match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => {
                let saved = LayerPersistence::create_saved_layer(self, Some(input_shape), description);
                LayerPersistence::save_to_json(&saved, path)
            }
            _ => Err(unsupported_extension(path.as_ref())),
        }
    }

    fn save_weights<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        LayerPersistence::save_weights_binary(&self.get_weights(), path)
    }

    fn load_weights<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let weights = LayerPersistence::load_weights_binary(path)?;
        self.set_weights(&weights)
    }
}
