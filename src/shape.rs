//! Static shape algebra shared by layers and wrappers.
//!
//! A [`Shape`] is what a layer knows about its input before any data flows
//! through it: one optional size per axis, `None` meaning "only known at run
//! time". Axis 0 is always the batch axis; for sequence inputs axis 1 is the
//! time axis.

use std::fmt;
use serde::{Serialize, Deserialize};

use crate::error::{LayerError, Result};

/// Ordered per-axis sizes, `None` for dynamic axes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape(pub Vec<Option<usize>>);

impl Shape {
    pub fn new(dims: Vec<Option<usize>>) -> Self {
        Shape(dims)
    }

    /// Shape with every axis known, batch axis included.
    pub fn fixed(dims: &[usize]) -> Self {
        Shape(dims.iter().map(|&d| Some(d)).collect())
    }

    /// Shape with a dynamic batch axis followed by `dims`.
    pub fn with_dynamic_batch(dims: &[usize]) -> Self {
        let mut all = Vec::with_capacity(dims.len() + 1);
        all.push(None);
        all.extend(dims.iter().map(|&d| Some(d)));
        Shape(all)
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn dims(&self) -> &[Option<usize>] {
        &self.0
    }

    pub fn dim(&self, axis: usize) -> Option<usize> {
        self.0.get(axis).copied().flatten()
    }

    pub fn batch(&self) -> Option<usize> {
        self.dim(0)
    }

    pub fn timesteps(&self) -> Option<usize> {
        self.dim(1)
    }

    pub fn last(&self) -> Option<usize> {
        self.0.last().copied().flatten()
    }

    /// Drops the time axis: `(batch,) + shape[2..]`.
    pub fn without_time_axis(&self) -> Shape {
        let mut dims = Vec::with_capacity(self.rank().saturating_sub(1));
        dims.extend(self.0.first().copied());
        dims.extend(self.0.iter().skip(2).copied());
        Shape(dims)
    }

    /// Inverse of [`Shape::without_time_axis`]: inserts `timesteps` at axis 1.
    pub fn with_time_axis(&self, timesteps: Option<usize>) -> Shape {
        let mut dims = self.0.clone();
        let at = dims.len().min(1);
        dims.insert(at, timesteps);
        Shape(dims)
    }

    pub fn with_last(&self, dim: Option<usize>) -> Shape {
        let mut dims = self.0.clone();
        match dims.last_mut() {
            Some(last) => *last = dim,
            None => dims.push(dim),
        }
        Shape(dims)
    }

    /// Axes after the time axis, all of which must be known.
    pub fn known_trailing(&self, from: usize) -> Option<Vec<usize>> {
        self.0.iter().skip(from).copied().collect()
    }

    /// Whether concrete `dims` satisfy every declared axis.
    pub fn accepts(&self, dims: &[usize]) -> bool {
        self.rank() == dims.len()
            && self.0.iter().zip(dims).all(|(declared, actual)| match declared {
                Some(d) => d == actual,
                None => true,
            })
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, dim) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match dim {
                Some(d) => write!(f, "{}", d)?,
                None => write!(f, "None")?,
            }
        }
        if self.0.len() == 1 {
            write!(f, ",")?;
        }
        write!(f, ")")
    }
}

impl From<Vec<Option<usize>>> for Shape {
    fn from(dims: Vec<Option<usize>>) -> Self {
        Shape(dims)
    }
}

/// A single value or a list of values: the argument form for layers that may
/// take several inputs or produce several outputs.
#[derive(Clone, Debug, PartialEq)]
pub enum Nested<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Nested<T> {
    /// Collapses a one-element list into `One`.
    pub fn collapse(mut items: Vec<T>) -> Self {
        if items.len() == 1 {
            if let Some(item) = items.pop() {
                return Nested::One(item);
            }
        }
        Nested::Many(items)
    }

    pub fn len(&self) -> usize {
        match self {
            Nested::One(_) => 1,
            Nested::Many(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_many(&self) -> bool {
        matches!(self, Nested::Many(_))
    }

    pub fn as_slice(&self) -> &[T] {
        match self {
            Nested::One(item) => std::slice::from_ref(item),
            Nested::Many(items) => items,
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.as_slice().iter()
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            Nested::One(item) => vec![item],
            Nested::Many(items) => items,
        }
    }

    /// The bare value of a `One`, or `None` for lists.
    pub fn single(&self) -> Option<&T> {
        match self {
            Nested::One(item) => Some(item),
            Nested::Many(_) => None,
        }
    }

    pub fn into_single(self) -> Option<T> {
        match self {
            Nested::One(item) => Some(item),
            Nested::Many(_) => None,
        }
    }

    pub fn map<U, F: FnMut(&T) -> U>(&self, mut f: F) -> Nested<U> {
        match self {
            Nested::One(item) => Nested::One(f(item)),
            Nested::Many(items) => Nested::Many(items.iter().map(f).collect()),
        }
    }

    pub fn try_map<U, F: FnMut(&T) -> Result<U>>(&self, mut f: F) -> Result<Nested<U>> {
        Ok(match self {
            Nested::One(item) => Nested::One(f(item)?),
            Nested::Many(items) => Nested::Many(items.iter().map(f).collect::<Result<_>>()?),
        })
    }
}

impl<T> From<T> for Nested<T> {
    fn from(item: T) -> Self {
        Nested::One(item)
    }
}

impl Nested<Shape> {
    /// The single shape of a one-input layer, or a `ShapeMismatch` naming `layer`.
    pub fn expect_single(&self, layer: &str) -> Result<&Shape> {
        self.single().ok_or_else(|| {
            LayerError::shape(format!("layer `{}` expects a single input, got {}", layer, self.len()))
        })
    }
}

/// Shape constraint recorded at build time and checked on every call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    pub shape: Shape,
}

impl InputSpec {
    pub fn new(shape: Shape) -> Self {
        InputSpec { shape }
    }

    pub fn check(&self, layer: &str, index: usize, dims: &[usize]) -> Result<()> {
        if self.shape.accepts(dims) {
            Ok(())
        } else {
            Err(LayerError::shape(format!(
                "input {} of layer `{}` is incompatible with the layer: expected shape {}, found {:?}",
                index, layer, self.shape, dims
            )))
        }
    }
}
