//! Directory-backed key lookup served by the daemon: key `k` is the file `<root>/k`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};

use crate::responder::{get_value_fn, GetValue};

#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Only plain file names are keys; anything that could leave the root is rejected.
    fn path_for(&self, key: &str) -> anyhow::Result<PathBuf> {
        if key.is_empty() || key.starts_with('.') || key.contains(&['/', '\\', '\0'][..]) {
            bail!("invalid key {key:?}");
        }
        Ok(self.root.join(key))
    }

    pub async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))
    }

    pub fn into_get_value(self) -> GetValue {
        get_value_fn(move |_ctx, key| {
            let store = self.clone();
            async move { store.get(&key).await }
        })
    }
}
