use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::spec::Asset;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RunCounters {
    pub created: usize,
    pub remaining: usize,
    pub total: usize,
}

impl RunCounters {
    /// Snapshot taken from the filesystem; `remaining` is never carried over
    /// from the run itself.
    pub fn snapshot(created: usize, assets: &[Asset], out_dir: &Path) -> Self {
        Self {
            created,
            remaining: count_missing(assets, out_dir),
            total: assets.len(),
        }
    }
}

impl fmt::Display for RunCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Created {}; {} remaining; {} total.",
            self.created, self.remaining, self.total
        )
    }
}

pub fn count_missing(assets: &[Asset], out_dir: &Path) -> usize {
    assets
        .iter()
        .filter(|asset| !out_dir.join(&asset.filename).exists())
        .count()
}
