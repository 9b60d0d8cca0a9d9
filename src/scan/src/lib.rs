//! # rolewalk scan
//!
//! Concurrent discovery of reachable identities.
//!
//! ## Module Structure
//!
//! ```text
//! scan/
//! ├── config/     - TOML scan configuration
//! ├── pool/       - fixed-size worker pool
//! ├── scheduler/  - depth-bounded assumption over the worklists
//! └── plugins/    - role discovery and revocation sources
//! ```
//!
//! ## Example
//!
//! ```ignore
//! let config = ScanConfig::load("rolewalk.toml")?;
//! config.validate()?;
//! let plugins = default_plugins(&config, None, None);
//! let scheduler = DiscoveryScheduler::new(config, scope, graph.clone(), plugins);
//! scheduler.run(starting).await?;
//! scheduler.shutdown().await;
//! graph.save("graph.json")?;
//! ```

pub mod config;
pub mod plugins;
pub mod pool;
pub mod scheduler;

pub use config::ScanConfig;
pub use plugins::{default_plugins, Plugin};
pub use pool::WorkerPool;
pub use scheduler::{Accessible, Discovery, DiscoveryScheduler};
