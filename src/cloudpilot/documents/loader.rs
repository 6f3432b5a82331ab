//! File loaders and chunking policies.
//!
//! Every supported extension maps to exactly one (loader, chunking policy)
//! pair; [`validate_loader_table`] checks that mapping exhaustively at
//! startup so a missing pairing is a boot failure, not a silent skip at
//! ingestion time. Unknown extensions remain a silent skip at the call site.
//!
//! Page-granular formats (pdf, office documents) already split at the
//! page/slide/sheet boundary and ignore the character splitter.

use std::error::Error;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};

/// Extensions the ingestion pipeline accepts.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "pdf", "html", "doc", "docx", "ppt", "pptx", "xls", "xlsx", "txt",
];

/// How loaded content is further split when page splitting is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPolicy {
    /// Loader output is already page/slide/sheet granular.
    None,
    /// Character window with overlap.
    Chars { size: usize, overlap: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderKind {
    Pdf,
    Html,
    Word,
    Powerpoint,
    Spreadsheet,
    Text,
}

/// One loaded unit of content before embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedSegment {
    /// Zero-based page/slide/sheet position within the file.
    pub position: u32,
    /// Human-readable section label (sheet name, slide number) when one exists.
    pub section: Option<String>,
    pub content: String,
}

/// The (loader, chunking policy) pair for an extension, `None` when the
/// extension is unsupported.
pub fn loader_for_extension(extension: &str) -> Option<(LoaderKind, ChunkPolicy)> {
    match extension.to_lowercase().as_str() {
        "pdf" => Some((LoaderKind::Pdf, ChunkPolicy::None)),
        "html" => Some((
            LoaderKind::Html,
            ChunkPolicy::Chars {
                size: 2000,
                overlap: 20,
            },
        )),
        "doc" | "docx" => Some((LoaderKind::Word, ChunkPolicy::None)),
        "ppt" | "pptx" => Some((LoaderKind::Powerpoint, ChunkPolicy::None)),
        "xls" | "xlsx" => Some((LoaderKind::Spreadsheet, ChunkPolicy::None)),
        "txt" => Some((
            LoaderKind::Text,
            ChunkPolicy::Chars {
                size: 300,
                overlap: 20,
            },
        )),
        _ => None,
    }
}

/// Confirm every supported extension resolves to a loader pairing.
pub fn validate_loader_table() -> Result<(), Box<dyn Error + Send + Sync>> {
    for extension in SUPPORTED_EXTENSIONS {
        if loader_for_extension(extension).is_none() {
            return Err(format!("no loader registered for extension '{}'", extension).into());
        }
    }
    Ok(())
}

/// Load a file into one or more segments according to its extension's loader.
pub fn load_file(path: &Path) -> Result<Vec<LoadedSegment>, Box<dyn Error + Send + Sync>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    let (kind, _) = loader_for_extension(extension)
        .ok_or_else(|| format!("unsupported extension '{}'", extension))?;
    match kind {
        LoaderKind::Pdf => load_pdf(path),
        LoaderKind::Html => load_html(path),
        LoaderKind::Word => load_word(path),
        LoaderKind::Powerpoint => load_powerpoint(path),
        LoaderKind::Spreadsheet => load_spreadsheet(path),
        LoaderKind::Text => load_text(path),
    }
}

/// Character-window splitter with overlap; returns the input unchanged when it
/// fits in one window.
pub fn split_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= size {
        return vec![text.to_string()];
    }
    // overlap < size is guaranteed by the fixed policy table
    let step = size - overlap;
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

/// Apply a chunk policy to loaded segments, renumbering positions when the
/// splitter expands one segment into several.
pub fn apply_chunk_policy(segments: Vec<LoadedSegment>, policy: ChunkPolicy) -> Vec<LoadedSegment> {
    match policy {
        ChunkPolicy::None => segments,
        ChunkPolicy::Chars { size, overlap } => {
            let mut chunked = Vec::new();
            for segment in segments {
                for piece in split_text(&segment.content, size, overlap) {
                    chunked.push(LoadedSegment {
                        position: chunked.len() as u32,
                        section: segment.section.clone(),
                        content: piece,
                    });
                }
            }
            chunked
        }
    }
}

fn load_text(path: &Path) -> Result<Vec<LoadedSegment>, Box<dyn Error + Send + Sync>> {
    let content = std::fs::read_to_string(path)?;
    Ok(vec![LoadedSegment {
        position: 0,
        section: None,
        content,
    }])
}

fn load_html(path: &Path) -> Result<Vec<LoadedSegment>, Box<dyn Error + Send + Sync>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(vec![LoadedSegment {
        position: 0,
        section: None,
        content: strip_markup(&raw),
    }])
}

fn load_pdf(path: &Path) -> Result<Vec<LoadedSegment>, Box<dyn Error + Send + Sync>> {
    let document = lopdf::Document::load(path)?;
    let mut segments = Vec::new();
    for (index, (page_number, _)) in document.get_pages().into_iter().enumerate() {
        let text = document.extract_text(&[page_number]).unwrap_or_default();
        if text.trim().is_empty() {
            continue;
        }
        segments.push(LoadedSegment {
            position: index as u32,
            section: Some(format!("page {}", page_number)),
            content: text,
        });
    }
    Ok(segments)
}

fn load_word(path: &Path) -> Result<Vec<LoadedSegment>, Box<dyn Error + Send + Sync>> {
    let xml = read_zip_entry(path, "word/document.xml")?;
    Ok(vec![LoadedSegment {
        position: 0,
        section: None,
        content: strip_markup(&xml),
    }])
}

fn load_powerpoint(path: &Path) -> Result<Vec<LoadedSegment>, Box<dyn Error + Send + Sync>> {
    let file = File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|name| name.starts_with("ppt/slides/slide") && name.ends_with(".xml"))
        .map(|name| name.to_string())
        .collect();
    slide_names.sort_by_key(|name| slide_ordinal(name));

    let mut segments = Vec::new();
    for (index, name) in slide_names.iter().enumerate() {
        let mut entry = archive.by_name(name)?;
        let mut xml = String::new();
        entry.read_to_string(&mut xml)?;
        let content = strip_markup(&xml);
        if content.trim().is_empty() {
            continue;
        }
        segments.push(LoadedSegment {
            position: index as u32,
            section: Some(format!("slide {}", index + 1)),
            content,
        });
    }
    Ok(segments)
}

fn load_spreadsheet(path: &Path) -> Result<Vec<LoadedSegment>, Box<dyn Error + Send + Sync>> {
    let mut workbook = open_workbook_auto(path)?;
    let sheet_names = workbook.sheet_names().to_vec();
    let mut segments = Vec::new();
    for (index, sheet) in sheet_names.iter().enumerate() {
        let range = match workbook.worksheet_range(sheet) {
            Ok(range) => range,
            Err(_) => continue,
        };
        let mut lines = Vec::new();
        for row in range.rows() {
            let cells: Vec<String> = row.iter().map(cell_to_string).collect();
            if cells.iter().any(|c| !c.is_empty()) {
                lines.push(cells.join("\t"));
            }
        }
        if lines.is_empty() {
            continue;
        }
        segments.push(LoadedSegment {
            position: index as u32,
            section: Some(sheet.clone()),
            content: lines.join("\n"),
        });
    }
    Ok(segments)
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(d) => d.to_string(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("{:?}", e),
    }
}

fn read_zip_entry(path: &Path, entry: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
    let file = File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut reader = archive.by_name(entry)?;
    let mut contents = String::new();
    reader.read_to_string(&mut contents)?;
    Ok(contents)
}

fn slide_ordinal(name: &str) -> u32 {
    name.trim_start_matches("ppt/slides/slide")
        .trim_end_matches(".xml")
        .parse()
        .unwrap_or(u32::MAX)
}

/// Drop tags and collapse whitespace; tag boundaries become spaces so words in
/// adjacent elements do not fuse.
fn strip_markup(raw: &str) -> String {
    let mut text = String::with_capacity(raw.len());
    let mut in_tag = false;
    for c in raw.chars() {
        match c {
            '<' => {
                in_tag = true;
                text.push(' ');
            }
            '>' => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loader_table_is_exhaustive() {
        validate_loader_table().unwrap();
        assert!(loader_for_extension("exe").is_none());
        assert!(loader_for_extension("PDF").is_some());
    }

    #[test]
    fn chunk_policies_match_by_type() {
        assert_eq!(
            loader_for_extension("html").map(|(_, p)| p),
            Some(ChunkPolicy::Chars {
                size: 2000,
                overlap: 20
            })
        );
        assert_eq!(
            loader_for_extension("txt").map(|(_, p)| p),
            Some(ChunkPolicy::Chars {
                size: 300,
                overlap: 20
            })
        );
        assert_eq!(
            loader_for_extension("pdf").map(|(_, p)| p),
            Some(ChunkPolicy::None)
        );
    }

    #[test]
    fn splitter_overlaps_windows() {
        let text = "abcdefghij";
        let chunks = split_text(text, 4, 2);
        assert_eq!(chunks, vec!["abcd", "cdef", "efgh", "ghij"]);
        assert_eq!(split_text("short", 300, 20), vec!["short"]);
    }

    #[test]
    fn markup_stripping_preserves_word_boundaries() {
        let html = "<html><body><h1>Runbook</h1><p>Restart the VM.</p></body></html>";
        assert_eq!(strip_markup(html), "Runbook Restart the VM.");
    }

    #[test]
    fn chunk_policy_renumbers_positions() {
        let segments = vec![LoadedSegment {
            position: 0,
            section: None,
            content: "abcdefghij".to_string(),
        }];
        let chunked = apply_chunk_policy(
            segments,
            ChunkPolicy::Chars {
                size: 4,
                overlap: 2,
            },
        );
        assert_eq!(chunked.len(), 4);
        assert_eq!(chunked[2].position, 2);
    }

    #[test]
    fn text_files_load_as_single_segment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        let mut file = File::create(&path).unwrap();
        write!(file, "escalation contacts").unwrap();

        let segments = load_file(&path).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].content, "escalation contacts");
    }

    #[test]
    fn slide_entries_sort_numerically() {
        let mut names = vec![
            "ppt/slides/slide10.xml".to_string(),
            "ppt/slides/slide2.xml".to_string(),
            "ppt/slides/slide1.xml".to_string(),
        ];
        names.sort_by_key(|n| slide_ordinal(n));
        assert_eq!(names[0], "ppt/slides/slide1.xml");
        assert_eq!(names[2], "ppt/slides/slide10.xml");
    }
}
