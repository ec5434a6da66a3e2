//! Named subsets of the pipeline used by the CLI.

use super::clang::REPORT_STAGE;
use crate::core::StageKind;
use crate::pipeline::StageGraph;
use std::fmt;

/// A CLI-level goal. Each selects target stages; the orchestrator adds
/// their ancestors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Every stage.
    RunAll,
    /// Source downloads only.
    DownloadSources,
    /// Every toolchain build and post-link optimization.
    BuildAll,
    /// Measurements, comparisons and the final report.
    Results,
}

impl Target {
    /// The stage ids selected by this goal. Empty means the whole graph.
    #[must_use]
    pub fn stages(self, graph: &StageGraph) -> Vec<String> {
        let of_kind = |kinds: &[StageKind]| -> Vec<String> {
            graph
                .stages()
                .iter()
                .filter(|s| kinds.contains(&s.kind))
                .map(|s| s.id.clone())
                .collect()
        };

        match self {
            Self::RunAll => Vec::new(),
            Self::DownloadSources => of_kind(&[StageKind::Download]),
            Self::BuildAll => of_kind(&[StageKind::Build, StageKind::Optimize]),
            Self::Results => vec![REPORT_STAGE.to_string()],
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RunAll => write!(f, "run-all"),
            Self::DownloadSources => write!(f, "download-sources"),
            Self::BuildAll => write!(f, "build-all"),
            Self::Results => write!(f, "results"),
        }
    }
}
