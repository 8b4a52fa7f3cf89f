use std::path::Path;

use anyhow::Context;
use dfs_blockstore::DataNodeConfig;
use dfs_client::ClientConfig;
use dfs_meta::MetaConfig;
use serde::{Deserialize, Serialize};

use crate::cli::Cli;

/// Contents of the `--config` file. Every table is optional.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub meta: MetaConfig,
    pub data: DataNodeConfig,
    pub client: ClientConfig,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    /// File (or defaults) with the global `--meta` and `--user` flags applied.
    pub fn resolve(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        if let Some(meta) = &cli.meta {
            config.client.meta_addr = meta.clone();
            config.data.meta_addr = meta.clone();
        }
        if let Some(user) = &cli.user {
            config.client.user = user.clone();
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[test]
    fn flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [meta]
            bind_addr = "127.0.0.1:7000"
            db_path = "/tmp/ns.log"

            [client]
            meta_addr = "10.0.0.1:9527"
            user = "alice"
            "#
        )
        .unwrap();
        let path = file.path().to_str().unwrap();

        let cli = Cli::try_parse_from(["dfs", "--config", path, "ls"]).unwrap();
        let config = FileConfig::resolve(&cli).unwrap();
        assert_eq!(config.meta.bind_addr.port(), 7000);
        assert_eq!(config.client.user, "alice");
        assert_eq!(config.data.node_id, "dfs101");

        let cli = Cli::try_parse_from(["dfs", "--config", path, "--user", "bob", "--meta", "h:1", "ls"]).unwrap();
        let config = FileConfig::resolve(&cli).unwrap();
        assert_eq!(config.client.user, "bob");
        assert_eq!(config.client.meta_addr, "h:1");
        assert_eq!(config.data.meta_addr, "h:1");
    }

    #[test]
    fn defaults_without_file() {
        let cli = Cli::try_parse_from(["dfs", "ls"]).unwrap();
        let config = FileConfig::resolve(&cli).unwrap();
        assert_eq!(config.client.user, "dfs");
        assert_eq!(config.client.meta_addr, "127.0.0.1:9527");
        assert_eq!(config.meta.max_connections, 100);
    }
}
