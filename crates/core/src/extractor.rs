use crate::error::PipelineError;
use lopdf::Document;

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    PlainText,
}

impl DocumentKind {
    pub fn from_file_name(name: &str) -> Result<Self, PipelineError> {
        let extension = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "pdf" => Ok(Self::Pdf),
            "txt" | "md" | "text" => Ok(Self::PlainText),
            _ => Err(PipelineError::UnsupportedFormat(name.to_string())),
        }
    }
}

pub trait DocumentExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, PipelineError>;
}

#[derive(Default)]
pub struct PdfDocumentExtractor;

impl DocumentExtractor for PdfDocumentExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, PipelineError> {
        let document =
            Document::load_mem(bytes).map_err(|error| PipelineError::Extraction(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| PipelineError::Extraction(error.to_string()))?;

            if !text.trim().is_empty() {
                pages.push(PageText {
                    number: page_no,
                    text,
                });
            }
        }

        if pages.is_empty() {
            return Err(PipelineError::Extraction(
                "pdf had no readable page text".to_string(),
            ));
        }

        Ok(pages)
    }
}

/// Plain text carries no pagination; form feeds are honored as page breaks
/// when present, otherwise the whole body becomes page 1.
#[derive(Default)]
pub struct PlainTextExtractor;

impl DocumentExtractor for PlainTextExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, PipelineError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|error| PipelineError::Extraction(format!("not valid utf-8: {error}")))?;

        let pages = text
            .split('\u{000c}')
            .enumerate()
            .filter_map(|(index, chunk)| {
                let trimmed = chunk.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(PageText {
                        number: (index + 1) as u32,
                        text: trimmed.to_string(),
                    })
                }
            })
            .collect::<Vec<_>>();

        if pages.is_empty() {
            return Err(PipelineError::Extraction(
                "document had no readable text".to_string(),
            ));
        }

        Ok(pages)
    }
}

/// Dispatches on the file name's extension and extracts (page, text) pairs.
/// Pure transformation; callers persist the result.
pub fn extract_document(file_name: &str, bytes: &[u8]) -> Result<Vec<PageText>, PipelineError> {
    match DocumentKind::from_file_name(file_name)? {
        DocumentKind::Pdf => PdfDocumentExtractor.extract_pages(bytes),
        DocumentKind::PlainText => PlainTextExtractor.extract_pages(bytes),
    }
}
