use std::{fs::File, io, io::BufReader, net::SocketAddr, path::Path};

use serde::Deserialize;

/// Configuration of networked multi-party transport.
#[derive(Clone, Debug, Deserialize)]
pub struct NetworkConfig {
    pub parties: Vec<NetworkPartyConfig>,
}

/// Details about party in networked multiparty protocol.
#[derive(Clone, Debug, Deserialize)]
pub struct NetworkPartyConfig {
    pub address: SocketAddr,
}

impl NetworkConfig {
    /// Load configuration from JSON file.
    pub fn load(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).map_err(io::Error::from)
    }
}
