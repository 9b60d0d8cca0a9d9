use super::Plugin;
use crate::scheduler::Discovery;
use rolewalk_core::Role;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Role ARNs in a newline separated file
///
/// Surrounding whitespace is trimmed. Blank lines and `#` comments are
/// skipped.
pub fn parse_role_file(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Adds the roles listed in a file
pub struct FilePlugin {
    path: Option<PathBuf>,
}

impl FilePlugin {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl Plugin for FilePlugin {
    fn name(&self) -> &'static str {
        "file"
    }

    fn enabled(&self) -> (bool, String) {
        match &self.path {
            Some(path) => (true, format!("will read roles from {}", path.display())),
            None => (false, "no role_file configured".to_string()),
        }
    }

    fn start(self: Arc<Self>, discovery: &Arc<Discovery>) {
        let Some(path) = self.path.clone() else {
            return;
        };

        let discovery_ref = discovery.clone();
        discovery.submit(async move {
            let contents = match tokio::fs::read_to_string(&path).await {
                Ok(contents) => contents,
                Err(e) => {
                    error!("error reading {}: {}", path.display(), e);
                    return;
                }
            };

            let mut added = 0;
            for arn in parse_role_file(&contents) {
                if !discovery_ref.in_scope(&arn) {
                    debug!("not in scope, skipping: {}", arn);
                    continue;
                }
                if discovery_ref.add_role(Role::new(arn.clone())) {
                    debug!("file: found role {}", arn);
                    added += 1;
                }
            }
            info!("read {} roles from {}", added, path.display());
        });
    }
}
