//! Figure change detection and export.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::engine::{FigureFormat, FigureInfo, RenderedFigure};

/// An exported figure, referenced by path in execution results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FigureFile {
    pub figure_id: u32,
    pub format: FigureFormat,
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub size_bytes: u64,
}

/// Destination for rendered figures.
#[async_trait]
pub trait FigureSink: Send + Sync {
    /// Store `figure` for execution `seq` of `session_id` and return its path.
    async fn export(
        &self,
        session_id: &str,
        seq: u64,
        figure: &RenderedFigure,
    ) -> std::io::Result<PathBuf>;
}

/// Figures opened or modified between two listings.
pub fn changed_figures(before: &[FigureInfo], after: &[FigureInfo]) -> Vec<FigureInfo> {
    let seen: HashMap<u32, u64> = before.iter().map(|f| (f.id, f.revision)).collect();
    after
        .iter()
        .filter(|f| seen.get(&f.id) != Some(&f.revision))
        .cloned()
        .collect()
}

/// Writes figures to `<root>/<session_id>/exec<seq>_figure<id>.<ext>`.
#[derive(Debug, Clone)]
pub struct FsFigureSink {
    root: PathBuf,
}

impl FsFigureSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn file_name(seq: u64, figure_id: u32, format: FigureFormat) -> String {
        format!("exec{seq}_figure{figure_id}.{}", format.extension())
    }
}

fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl FigureSink for FsFigureSink {
    async fn export(
        &self,
        session_id: &str,
        seq: u64,
        figure: &RenderedFigure,
    ) -> std::io::Result<PathBuf> {
        let dir = self.root.join(session_id);
        let path = dir.join(Self::file_name(seq, figure.id, figure.format));
        let bytes = figure.bytes.clone();
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&dir, &target, &bytes))
            .await
            .map_err(std::io::Error::other)??;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: u32, revision: u64) -> FigureInfo {
        FigureInfo {
            id,
            revision,
            title: None,
        }
    }

    #[test]
    fn detects_new_and_modified() {
        let before = vec![info(1, 3), info(2, 1)];
        let after = vec![info(1, 3), info(2, 2), info(3, 1)];
        let ids: Vec<u32> = changed_figures(&before, &after)
            .iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn unchanged_figures_are_skipped() {
        let figs = vec![info(1, 1)];
        assert!(changed_figures(&figs, &figs).is_empty());
    }

    #[test]
    fn file_names_are_sequenced() {
        assert_eq!(
            FsFigureSink::file_name(4, 2, FigureFormat::Svg),
            "exec4_figure2.svg"
        );
    }

    #[tokio::test]
    async fn fs_sink_writes_under_session_dir() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsFigureSink::new(dir.path());
        let figure = RenderedFigure {
            id: 1,
            format: FigureFormat::Svg,
            bytes: b"<svg/>".to_vec(),
        };
        let path = sink.export("abc", 7, &figure).await.unwrap();
        assert_eq!(path, dir.path().join("abc").join("exec7_figure1.svg"));
        assert_eq!(std::fs::read(&path).unwrap(), b"<svg/>");
    }

    #[tokio::test]
    async fn fs_sink_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsFigureSink::new(dir.path());
        let mut figure = RenderedFigure {
            id: 1,
            format: FigureFormat::Svg,
            bytes: b"first".to_vec(),
        };
        sink.export("s", 1, &figure).await.unwrap();
        figure.bytes = b"second".to_vec();
        let path = sink.export("s", 1, &figure).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
    }
}
