//! Export orchestration.
//!
//! Runs one export request through resolve → walk → accumulate → write,
//! aborting on the first error. Nothing reaches the sink until every
//! image has been resolved and walked.

use imgpack_core::config::ExportConfig;
use imgpack_core::error::{ErrorKind, ExportError, Result};
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

use super::archive::ArchiveWriter;
use super::descriptor::Platform;
use super::export_set::ExportSet;
use super::reference::ImageReference;
use super::store::ContentStore;
use super::walker::ManifestWalker;

/// Images to export and an optional platform restriction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    /// Raw image references, in request order
    pub images: Vec<String>,
    /// Only export manifests for this platform; `None` exports all
    pub platform: Option<Platform>,
}

impl ExportRequest {
    pub fn new<I, T>(images: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            images: images.into_iter().map(Into::into).collect(),
            platform: None,
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }
}

/// Summary of a completed export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    /// Canonical references written to the archive index
    pub images: Vec<String>,
    /// Unique blobs written
    pub blobs: usize,
    /// Archive size in bytes
    pub bytes_written: u64,
}

/// Pipeline phase of an [`Exporter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportPhase {
    Idle,
    Resolving,
    Walking,
    Accumulating,
    Writing,
    Done,
    Failed(ErrorKind),
}

impl std::fmt::Display for ExportPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Resolving => write!(f, "resolving"),
            Self::Walking => write!(f, "walking"),
            Self::Accumulating => write!(f, "accumulating"),
            Self::Writing => write!(f, "writing"),
            Self::Done => write!(f, "done"),
            Self::Failed(kind) => write!(f, "failed ({})", kind),
        }
    }
}

/// Exports images from a content store into a single archive.
///
/// One exporter serves one export call; run concurrent exports with
/// separate exporters sharing the store.
pub struct Exporter<S> {
    store: S,
    config: ExportConfig,
    cancel: CancellationToken,
    phase: ExportPhase,
}

impl<S: ContentStore> Exporter<S> {
    pub fn new(store: S, config: ExportConfig) -> Self {
        Self {
            store,
            config,
            cancel: CancellationToken::new(),
            phase: ExportPhase::Idle,
        }
    }

    /// Observe `cancel` instead of a private token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels this exporter.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn phase(&self) -> ExportPhase {
        self.phase
    }

    /// Export the requested images into `sink`.
    ///
    /// The first failure is returned unchanged and leaves the exporter in
    /// `Failed`. A failed export never writes the trailing `index.json`.
    pub async fn export<W>(&mut self, request: &ExportRequest, sink: W) -> Result<ExportReport>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let result = self.run(request, sink).await;
        match &result {
            Ok(report) => {
                self.transition(ExportPhase::Done);
                tracing::info!(
                    images = report.images.len(),
                    blobs = report.blobs,
                    bytes = report.bytes_written,
                    "Export complete"
                );
            }
            Err(e) => {
                self.transition(ExportPhase::Failed(e.kind()));
                tracing::warn!(error = %e, "Export failed");
            }
        }
        result
    }

    async fn run<W>(&mut self, request: &ExportRequest, sink: W) -> Result<ExportReport>
    where
        W: AsyncWrite + Unpin + Send,
    {
        self.config.validate()?;
        if request.images.is_empty() {
            return Err(ExportError::invalid_reference("", "no images specified"));
        }

        self.transition(ExportPhase::Resolving);
        let mut references: Vec<ImageReference> = Vec::with_capacity(request.images.len());
        for raw in &request.images {
            self.check_cancelled()?;
            let reference = ImageReference::parse(raw)?;
            if references.contains(&reference) {
                tracing::debug!(reference = %reference, "Skipping duplicate reference");
                continue;
            }
            references.push(reference);
        }

        self.transition(ExportPhase::Walking);
        let walker = ManifestWalker::new(
            &self.store,
            request.platform.as_ref(),
            self.config.max_depth,
        );
        let mut images = Vec::with_capacity(references.len());
        for reference in &references {
            self.check_cancelled()?;
            images.push(walker.walk(reference).await?);
        }

        self.transition(ExportPhase::Accumulating);
        let mut set = ExportSet::new();
        for image in &images {
            let added = set.accumulate(&image.descriptors)?;
            tracing::debug!(
                reference = %image.reference,
                blobs = image.descriptors.len(),
                new = added,
                "Accumulated image blobs"
            );
        }

        self.transition(ExportPhase::Writing);
        self.check_cancelled()?;
        let mut writer = ArchiveWriter::new(sink, self.config.clone());
        let stats = writer
            .write_archive(&self.store, &images, &set, &self.cancel)
            .await?;

        Ok(ExportReport {
            images: references.iter().map(|r| r.full_reference()).collect(),
            blobs: stats.blobs,
            bytes_written: stats.bytes_written,
        })
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(ExportError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn transition(&mut self, next: ExportPhase) {
        tracing::debug!(from = %self.phase, to = %next, "Export phase");
        self.phase = next;
    }
}
