use crate::net::Network;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Saves a flattened parameter vector as a named binary blob.
pub fn save_weights(path: &Path, weights: &[f32]) -> Result<()> {
    let bytes = bincode::serialize(weights).context("failed to encode weight vector")?;
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Loads a flattened parameter vector from a blob written by `save_weights`.
pub fn load_weights(path: &Path) -> Result<Vec<f32>> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    bincode::deserialize(&bytes)
        .with_context(|| format!("failed to decode weight vector in {}", path.display()))
}

/// Loads weights from disk into an existing network, validating the length
/// against the network's parameter count first. All-or-nothing: on any
/// failure the network keeps its current parameters.
pub fn load_into(path: &Path, net: &mut Network) -> Result<()> {
    let flat = load_weights(path)?;
    net.restore(&flat).with_context(|| {
        format!("weights in {} do not match the network topology", path.display())
    })
}
