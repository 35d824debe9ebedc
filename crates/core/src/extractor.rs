use crate::error::IngestError;
use crate::models::DocumentKind;
use lopdf::Document;
use std::fs;
use std::path::Path;

/// Extensions read as UTF-8 text.
pub const TEXT_EXTENSIONS: [&str; 11] = [
    "txt", "md", "py", "js", "html", "css", "json", "csv", "xml", "yaml", "yml",
];

pub trait TextExtractor {
    fn extract(&self, path: &Path) -> Result<String, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> Result<String, IngestError> {
        Ok(fs::read_to_string(path)?)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn extract(&self, path: &Path) -> Result<String, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;
            pages.push((page_no, text));
        }

        let text = join_pages(pages);
        if text.is_empty() {
            return Err(IngestError::PdfParse(format!(
                "pdf had no readable page text: {}",
                path.display()
            )));
        }

        Ok(text)
    }
}

/// Render page texts as `\nPage N:\n...`, skipping pages without text.
fn join_pages(pages: impl IntoIterator<Item = (u32, String)>) -> String {
    let mut text = String::new();
    for (number, page_text) in pages {
        if page_text.trim().is_empty() {
            continue;
        }
        text.push_str(&format!("\nPage {number}:\n{page_text}"));
    }
    text
}

impl DocumentKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();

        if extension == "pdf" {
            Some(Self::Pdf)
        } else if TEXT_EXTENSIONS.contains(&extension.as_str()) {
            Some(Self::PlainText)
        } else {
            None
        }
    }

    pub fn extractor(self) -> &'static dyn TextExtractor {
        match self {
            Self::PlainText => &PlainTextExtractor,
            Self::Pdf => &PdfExtractor,
        }
    }
}
