use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::access::parse_access;

/// Symbolic register names mapped to their definitions.
#[derive(Debug, Default)]
pub struct NameTable {
    definitions: HashMap<String, String>,
}

impl NameTable {
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading registers file {}", path.display()))?;
        let before = self.definitions.len();
        self.parse(&text, &path.display().to_string());
        debug!(
            path = %path.display(),
            added = self.definitions.len() - before,
            "loaded register names"
        );
        Ok(())
    }

    /// Adds every valid `name definition` line of `text`. Later names win.
    pub fn parse(&mut self, text: &str, source: &str) {
        for (number, line) in text.lines().enumerate() {
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            let &[name, definition] = fields.as_slice() else {
                warn!("{source}:{}: expected `name definition`, skipping", number + 1);
                continue;
            };
            if let Err(e) = parse_access(definition, &HashMap::new()) {
                warn!("{source}:{}: bad definition for {name}: {e}", number + 1);
                continue;
            }
            self.definitions
                .insert(name.to_string(), definition.to_string());
        }
    }

    pub fn definitions(&self) -> &HashMap<String, String> {
        &self.definitions
    }
}
