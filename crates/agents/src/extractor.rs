//! Document text extraction with per-page OCR fallback
//!
//! Each page is first read from the PDF text layer. Pages that yield too
//! little text are treated as scans: the page is rendered to an image and
//! run through OCR instead.

use crate::{AgentError, Result};
use async_trait::async_trait;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_MIN_PAGE_CHARS: usize = 30;
pub const DEFAULT_OCR_DPI: u32 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractorConfig {
    /// Pages with fewer trimmed characters than this go through OCR
    pub min_page_chars: usize,
    /// Render resolution for OCR
    pub ocr_dpi: u32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            min_page_chars: DEFAULT_MIN_PAGE_CHARS,
            ocr_dpi: DEFAULT_OCR_DPI,
        }
    }
}

/// Reads the text layer of a document, one string per page.
pub trait LayoutExtractor: Send + Sync {
    fn pages(&self, document: &[u8]) -> Result<Vec<String>>;
}

/// Recognizes the text of one rendered page.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, document: &[u8], page_index: usize, dpi: u32) -> Result<String>;
}

/// PDF text layer via `pdf-extract`
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfTextLayer;

impl LayoutExtractor for PdfTextLayer {
    fn pages(&self, document: &[u8]) -> Result<Vec<String>> {
        // pdf-extract panics on some malformed inputs
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem_by_pages(document)
        }));

        match result {
            Ok(Ok(pages)) => Ok(pages),
            Ok(Err(e)) => Err(AgentError::Extraction(format!("Failed to parse PDF: {}", e))),
            Err(_) => Err(AgentError::Extraction("PDF parser panicked".into())),
        }
    }
}

/// OCR by shelling out to poppler's `pdftoppm` and `tesseract`.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    tesseract_bin: String,
    pdftoppm_bin: String,
    language: String,
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self {
            tesseract_bin: "tesseract".to_string(),
            pdftoppm_bin: "pdftoppm".to_string(),
            language: "eng".to_string(),
        }
    }
}

impl TesseractOcr {
    pub fn new(tesseract_bin: impl Into<String>, pdftoppm_bin: impl Into<String>) -> Self {
        Self {
            tesseract_bin: tesseract_bin.into(),
            pdftoppm_bin: pdftoppm_bin.into(),
            ..Self::default()
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    async fn run(&self, program: &str, args: &[&str], cwd: &Path) -> Result<Vec<u8>> {
        let output = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .output()
            .await
            .map_err(|e| AgentError::Extraction(format!("Failed to run {}: {}", program, e)))?;

        if !output.status.success() {
            return Err(AgentError::Extraction(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn recognize(&self, document: &[u8], page_index: usize, dpi: u32) -> Result<String> {
        let workdir = tempfile::tempdir()
            .map_err(|e| AgentError::Extraction(format!("Failed to create OCR workdir: {}", e)))?;
        tokio::fs::write(workdir.path().join("document.pdf"), document)
            .await
            .map_err(|e| AgentError::Extraction(format!("Failed to stage document: {}", e)))?;

        let page = (page_index + 1).to_string();
        let dpi = dpi.to_string();
        self.run(
            &self.pdftoppm_bin,
            &[
                "-r", &dpi, "-f", &page, "-l", &page, "-png", "-singlefile", "document.pdf", "page",
            ],
            workdir.path(),
        )
        .await?;

        let stdout = self
            .run(
                &self.tesseract_bin,
                &["page.png", "stdout", "-l", &self.language],
                workdir.path(),
            )
            .await?;

        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }
}

/// Turns raw document bytes into plain text.
#[derive(Clone)]
pub struct TextExtractor {
    layout: Arc<dyn LayoutExtractor>,
    ocr: Arc<dyn OcrEngine>,
    config: ExtractorConfig,
}

impl TextExtractor {
    pub fn new(
        layout: Arc<dyn LayoutExtractor>,
        ocr: Arc<dyn OcrEngine>,
        config: ExtractorConfig,
    ) -> Self {
        Self { layout, ocr, config }
    }

    /// PDF text layer with Tesseract fallback
    pub fn pdf(ocr: TesseractOcr, config: ExtractorConfig) -> Self {
        Self::new(Arc::new(PdfTextLayer), Arc::new(ocr), config)
    }

    pub fn config(&self) -> ExtractorConfig {
        self.config
    }

    /// Extract every page in order, each followed by a newline.
    ///
    /// Fails only when the document cannot be parsed or a needed OCR pass
    /// fails; callers treat that as a failure of this document alone.
    #[instrument(skip(self, document), fields(bytes = document.len()))]
    pub async fn extract(&self, document: &[u8]) -> Result<String> {
        let layout = Arc::clone(&self.layout);
        let owned = document.to_vec();
        let pages = tokio::task::spawn_blocking(move || layout.pages(&owned))
            .await
            .map_err(|e| AgentError::Extraction(format!("Extraction task failed: {}", e)))??;

        let mut text = String::new();
        let mut ocr_pages = 0;
        for (index, page_text) in pages.iter().enumerate() {
            if page_text.trim().chars().count() < self.config.min_page_chars {
                debug!("Page {} has little text, falling back to OCR", index + 1);
                let recognized = self
                    .ocr
                    .recognize(document, index, self.config.ocr_dpi)
                    .await
                    .map_err(|e| {
                        warn!("OCR failed on page {}: {}", index + 1, e);
                        e
                    })?;
                text.push_str(&recognized);
                ocr_pages += 1;
            } else {
                text.push_str(page_text);
            }
            text.push('\n');
        }

        info!(
            "Extracted {} chars from {} pages ({} via OCR)",
            text.len(),
            pages.len(),
            ocr_pages
        );
        Ok(text)
    }
}
