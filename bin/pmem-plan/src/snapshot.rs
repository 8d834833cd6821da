use std::path::Path;

use pmem_error::{ErrorContext as _, GenericError};
use pmem_planner::namespace::Inventory;
use tracing::info;

/// Loads an inventory snapshot from the given YAML file.
pub fn load(path: &Path) -> Result<Inventory, GenericError> {
    let contents = std::fs::read_to_string(path)
        .with_error_context(|| format!("Failed to read snapshot file '{}'.", path.display()))?;
    let inventory: Inventory = serde_yaml::from_str(&contents)
        .with_error_context(|| format!("Failed to parse snapshot file '{}'.", path.display()))?;

    info!(
        dimms = inventory.dimms.len(),
        pools = inventory.pools.len(),
        namespaces = inventory.namespaces.len(),
        "Loaded inventory snapshot."
    );

    Ok(inventory)
}
