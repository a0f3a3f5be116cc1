//! # Rust Layer Wrappers
//!
//! Layers that wrap other layers: apply one layer to every step of a
//! sequence, or run a recurrent layer over a sequence in both directions.
//!
//! ## Core Components
//!
//! - **Wrappers**: `TimeDistributed` and `Bidirectional`, both a [`Wrapper`]
//!   around a strategy, delegating weights, losses, updates and constraints to
//!   the layers they own
//! - **Layers**: the [`Layer`] contract plus `Linear`, `Dropout`, `LSTM` and `GRU`
//! - **Shapes**: static shapes with dynamic axes, input specs, single-or-list values
//! - **Backend**: eager `ndarray` primitives, including the `rnn` stepping loop
//! - **Persistence**: JSON layer configs with weights, binary weight snapshots
//!
//! ## Quick Start
//!
//! ```rust
//! use rust_layer_wrappers::{Bidirectional, Layer, LSTM, MergeMode, RecurrentConfig, Shape};
//!
//! let template = LSTM::new(RecurrentConfig::new(10));
//! let mut bi = Bidirectional::new(&template, Some(MergeMode::Concat)).unwrap();
//! bi.build(&Shape::fixed(&[32, 5, 10]).into()).unwrap();
//! assert_eq!(bi.output_shape().unwrap().into_single().unwrap(), Shape::fixed(&[32, 20]));
//! ```

pub mod activations;
pub mod backend;
pub mod constraints;
pub mod error;
pub mod layers;
pub mod persistence;
pub mod regularizers;
pub mod shape;
pub mod wrappers;

// Re-export commonly used items
pub use backend::{BackendConfig, ExecutionStrategy, Mask, Tensor};
pub use error::{LayerError, Result};
pub use layers::{
    layer_from_config, no_mask, Dropout, DropoutConfig, Layer, LayerConfig, Linear, LinearConfig,
    Recurrent, RecurrentConfig, GRU, LSTM,
};
pub use persistence::{LayerMetadata, LayerPersistence, PersistentLayer, SavedLayer};
pub use shape::{InputSpec, Nested, Shape};
pub use wrappers::{Bidirectional, MergeMode, TimeDistributed, Wrapper};
