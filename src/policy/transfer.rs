//! Boundary-crossing policy form and its persistence

use std::{
    fs::File,
    io::{Read, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{error::Result, nn::Activation};

#[cfg(feature = "training")]
use crate::error::ColosseumError;

/// Layer shape of a flattened network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapeMetadata {
    /// Layer widths, input first
    pub sizes: Vec<usize>,
    /// Activation after hidden layers
    pub hidden_activation: Activation,
    /// Activation after the output layer
    pub output_activation: Activation,
}

/// Flattened policy: shape metadata plus every parameter in one vector
///
/// This is the only form in which a policy crosses into a worker domain.
/// Each side rebuilds and owns its own copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transferable {
    /// Implementation tag checked when rebuilding
    pub kind: String,
    /// Layer shape
    pub shape: ShapeMetadata,
    /// Parameters in layer order
    pub flat_weights: Vec<f32>,
}

impl Transferable {
    /// Save to a JSON file
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    /// Load from a JSON file
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let model = serde_json::from_str(&contents)?;
        Ok(model)
    }

    /// Save to binary format (bincode)
    /// Only available with the "training" feature
    #[cfg(feature = "training")]
    pub fn save_bincode<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let encoded =
            bincode::serialize(self).map_err(|e| ColosseumError::Transfer(e.to_string()))?;
        let mut file = File::create(path)?;
        file.write_all(&encoded)?;
        Ok(())
    }

    /// Load from binary format (bincode)
    /// Only available with the "training" feature
    #[cfg(feature = "training")]
    pub fn load_bincode<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        bincode::deserialize(&buffer).map_err(|e| ColosseumError::Transfer(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::NamedTempFile;

    use super::*;

    fn create_test_transferable() -> Transferable {
        Transferable {
            kind: "mlp".to_string(),
            shape: ShapeMetadata {
                sizes: vec![2, 1],
                hidden_activation: Activation::Relu,
                output_activation: Activation::Tanh,
            },
            flat_weights: vec![0.5, -0.5, 0.1],
        }
    }

    #[test]
    fn test_json_field_names() {
        let json = serde_json::to_value(create_test_transferable()).unwrap();
        assert!(json.get("flatWeights").is_some());
        assert_eq!(json["shape"]["outputActivation"], "tanh");
    }

    #[test]
    fn test_json_file_roundtrip() -> anyhow::Result<()> {
        let model = create_test_transferable();
        let temp_file = NamedTempFile::new()?;

        model.save_json(temp_file.path())?;
        let loaded = Transferable::load_json(temp_file.path())?;

        assert_eq!(model, loaded);
        Ok(())
    }

    #[test]
    #[cfg(feature = "training")]
    fn test_bincode_roundtrip() -> anyhow::Result<()> {
        let model = create_test_transferable();
        let temp_file = NamedTempFile::new()?;

        model.save_bincode(temp_file.path())?;
        let loaded = Transferable::load_bincode(temp_file.path())?;

        assert_eq!(model, loaded);
        Ok(())
    }
}
