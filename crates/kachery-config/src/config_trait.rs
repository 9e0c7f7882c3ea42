use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};

/// Blanket `load`/`save` over YAML, the same shape every config type in the
/// reference workspace gets by implementing the marker trait and nothing
/// else (`impl Config for NodeConfig {}`).
pub trait Config: Serialize + DeserializeOwned {
    fn load<P: AsRef<Path>>(path: P) -> Result<Self>
    where
        Self: Sized,
    {
        let bytes = fs::read(path.as_ref())
            .map_err(|e| anyhow::anyhow!("reading config at {}: {e}", path.as_ref().display()))?;
        Ok(serde_yaml::from_slice(&bytes)?)
    }

    fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let bytes = serde_yaml::to_vec(self)?;
        fs::write(path.as_ref(), bytes)
            .map_err(|e| anyhow::anyhow!("writing config to {}: {e}", path.as_ref().display()))?;
        Ok(())
    }
}
