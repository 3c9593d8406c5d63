//! Where page images come from.
//!
//! Pages are either already sitting in a directory as `page_NNN.png`, or they
//! are rendered from a PDF using Poppler's `pdftocairo`.

use std::{collections::BTreeMap, fmt, sync::LazyLock};

use clap::Args;
use regex::Regex;
use tokio::{fs, process::Command};

use crate::{
    commands::{check_for_command_failure, is_error_line},
    prelude::*,
};

/// Page images in a directory must be named like this.
static PAGE_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^page_(?P<number>\d+)\.png$").expect("failed to compile regex")
});

/// `pdftocairo` names its output files `{root}-{page}.png`, zero-padding the
/// page number to the width of the last page.
static RENDERED_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-(?P<number>\d+)\.png$").expect("failed to compile regex")
});

/// Image types we can send to an OCR engine as-is.
pub const SUPPORTED_IMAGE_TYPES: &[&str] =
    &["image/png", "image/jpeg", "image/webp"];

/// A single page image to OCR.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageImage {
    /// The 1-based page number.
    pub page_number: u32,

    /// Where the image lives.
    pub path: PathBuf,
}

impl PageImage {
    /// The file name of the image, for reports.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// An inclusive range of page numbers. Either end may be open.
#[derive(Args, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageRange {
    /// First page number to process (1-based, inclusive).
    #[clap(long = "start-page", value_parser = clap::value_parser!(u32).range(1..))]
    pub start: Option<u32>,

    /// Last page number to process (1-based, inclusive).
    #[clap(long = "end-page", value_parser = clap::value_parser!(u32).range(1..))]
    pub end: Option<u32>,
}

impl PageRange {
    /// Does this range include `page_number`?
    pub fn contains(&self, page_number: u32) -> bool {
        self.start.is_none_or(|start| page_number >= start)
            && self.end.is_none_or(|end| page_number <= end)
    }

    /// Clamp this range to a document with `page_count` pages. Returns `None`
    /// if no pages are left.
    pub fn clamp_to(&self, page_count: u32) -> Option<(u32, u32)> {
        let first = self.start.unwrap_or(1).max(1);
        let last = self.end.unwrap_or(page_count).min(page_count);
        if first <= last { Some((first, last)) } else { None }
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.start, self.end) {
            (None, None) => write!(f, "all pages"),
            (Some(start), None) => write!(f, "pages {start}-"),
            (None, Some(end)) => write!(f, "pages 1-{end}"),
            (Some(start), Some(end)) => write!(f, "pages {start}-{end}"),
        }
    }
}

/// List the `page_NNN.png` images in `dir` that fall within `range`, in
/// ascending page order. Other files are ignored.
#[instrument(level = "debug", skip_all, fields(dir = %dir.display()))]
pub async fn list_page_images(dir: &Path, range: &PageRange) -> Result<Vec<PageImage>> {
    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to read image directory {:?}", dir.display()))?;

    let mut pages = vec![];
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("failed to read entry in {:?}", dir.display()))?
    {
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        let Some(caps) = PAGE_FILE_RE.captures(&file_name) else {
            continue;
        };
        let Ok(page_number) = caps["number"].parse::<u32>() else {
            warn!(file = ?file_name, "Ignoring page with an out-of-range page number");
            continue;
        };
        if page_number == 0 {
            warn!(file = ?file_name, "Ignoring page 0; pages are numbered from 1");
            continue;
        }
        if range.contains(page_number) {
            pages.push(PageImage {
                page_number,
                path: entry.path(),
            });
        }
    }
    pages.sort_by_key(|page| page.page_number);
    if let Some(dup) = pages.windows(2).find(|w| w[0].page_number == w[1].page_number) {
        return Err(anyhow!(
            "page {} appears twice: {:?} and {:?}",
            dup[0].page_number,
            dup[0].path.display(),
            dup[1].path.display(),
        ));
    }
    debug!(count = pages.len(), "Found page images");
    Ok(pages)
}

/// Render the pages of `pdf` in `range` as PNG images named
/// `{file_prefix}{NNN}.png` in `images_dir`.
#[instrument(level = "debug", skip_all, fields(pdf = %pdf.display(), dpi = dpi))]
pub async fn render_pdf_pages(
    pdf: &Path,
    images_dir: &Path,
    file_prefix: &str,
    dpi: u32,
    range: &PageRange,
) -> Result<Vec<PageImage>> {
    let page_count = get_pdf_page_count(pdf).await?;
    let Some((first, last)) = range.clamp_to(page_count) else {
        warn!(page_count, %range, "No pages of the PDF fall within the range");
        return Ok(vec![]);
    };

    fs::create_dir_all(images_dir).await.with_context(|| {
        format!("failed to create image directory {:?}", images_dir.display())
    })?;

    // Render into a scratch directory next to the final images, so that the
    // final rename never crosses a filesystem boundary.
    let scratch = tempfile::TempDir::with_prefix_in(".render", images_dir)
        .context("failed to create scratch directory")?;
    let out_root = scratch.path().join("page");
    let output = Command::new("pdftocairo")
        .arg("-png")
        .arg("-r")
        .arg(dpi.to_string())
        .arg("-f")
        .arg(first.to_string())
        .arg("-l")
        .arg(last.to_string())
        .arg(pdf)
        .arg(&out_root)
        .output()
        .await
        .with_context(|| format!("failed to run pdftocairo on {:?}", pdf.display()))?;
    check_for_command_failure("pdftocairo", &output, Some(&is_error_line))?;

    let mut pages = vec![];
    let mut entries = fs::read_dir(scratch.path())
        .await
        .context("failed to read scratch directory")?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .context("failed to read entry in scratch directory")?
    {
        let rendered = entry.path();
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        let Some(caps) = RENDERED_FILE_RE.captures(&file_name) else {
            warn!(file = ?file_name, "Unexpected file from pdftocairo");
            continue;
        };
        let page_number = caps["number"]
            .parse::<u32>()
            .with_context(|| format!("bad page number in {:?}", file_name))?;
        let path = images_dir.join(page_file_name(file_prefix, page_number));
        fs::rename(&rendered, &path).await.with_context(|| {
            format!("failed to move {:?} to {:?}", rendered.display(), path.display())
        })?;
        pages.push(PageImage { page_number, path });
    }
    pages.sort_by_key(|page| page.page_number);

    if let Err(err) = scratch.close() {
        warn!("failed to delete scratch directory: {}", err);
    }
    debug!(count = pages.len(), first, last, "Rendered pages");
    Ok(pages)
}

/// The file name for a page image.
pub fn page_file_name(file_prefix: &str, page_number: u32) -> String {
    format!("{file_prefix}{page_number:03}.png")
}

/// Get the number of pages in a PDF file.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn get_pdf_page_count(path: &Path) -> Result<u32> {
    let output = Command::new("pdfinfo")
        .arg(path)
        .output()
        .await
        .with_context(|| format!("failed to run pdfinfo on {:?}", path.display()))?;
    check_for_command_failure("pdfinfo", &output, None)?;

    let output =
        String::from_utf8(output.stdout).context("pdfinfo output was not valid UTF-8")?;
    parse_pdfinfo_page_count(&output).with_context(|| {
        format!(
            "failed to get page count for {:?} from pdfinfo output",
            path.display()
        )
    })
}

/// Find the `Pages:` property in `pdfinfo` output.
fn parse_pdfinfo_page_count(output: &str) -> Result<u32> {
    let mut properties = BTreeMap::new();
    for line in output.lines() {
        let mut parts = line.splitn(2, ':');
        let key = parts.next().unwrap_or("").trim();
        let value = parts.next().unwrap_or("").trim();
        properties.insert(key, value);
    }
    let page_count_str = properties
        .get("Pages")
        .ok_or_else(|| anyhow!("no \"Pages\" line"))?;
    Ok(page_count_str.parse::<u32>()?)
}

/// Get the MIME type of a file by sniffing its contents.
pub fn get_mime_type(path: &Path) -> Result<String> {
    Ok(infer::get_from_path(path)
        .with_context(|| format!("failed to get MIME type for {:?}", path.display()))?
        .ok_or_else(|| anyhow!("unknown MIME type for {:?}", path.display()))?
        .mime_type()
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    static TEST_PDF_PATH: &str = "tests/fixtures/two_pages.pdf";

    async fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"").await.unwrap();
    }

    #[tokio::test]
    async fn lists_pages_in_numeric_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for name in [
            "page_010.png",
            "page_002.png",
            "page_001.png",
            "notes.txt",
            "cover.png",
            "page_3.jpg",
        ] {
            touch(dir.path(), name).await;
        }

        let pages = list_page_images(dir.path(), &PageRange::default()).await?;
        let numbers = pages.iter().map(|p| p.page_number).collect::<Vec<_>>();
        assert_eq!(numbers, vec![1, 2, 10]);
        assert_eq!(pages[2].file_name(), "page_010.png");
        Ok(())
    }

    #[tokio::test]
    async fn skips_page_numbers_that_overflow() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for name in ["page_001.png", "page_99999999999.png", "page_002.png"] {
            touch(dir.path(), name).await;
        }

        let pages = list_page_images(dir.path(), &PageRange::default()).await?;
        let numbers = pages.iter().map(|p| p.page_number).collect::<Vec<_>>();
        assert_eq!(numbers, vec![1, 2]);
        Ok(())
    }

    #[tokio::test]
    async fn range_filters_by_page_number() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for n in [1, 2, 5, 6, 9] {
            touch(dir.path(), &page_file_name("page_", n)).await;
        }

        let range = PageRange {
            start: Some(2),
            end: Some(6),
        };
        let pages = list_page_images(dir.path(), &range).await?;
        let numbers = pages.iter().map(|p| p.page_number).collect::<Vec<_>>();
        assert_eq!(numbers, vec![2, 5, 6]);
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_page_numbers_are_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        touch(dir.path(), "page_7.png").await;
        touch(dir.path(), "page_007.png").await;
        assert!(list_page_images(dir.path(), &PageRange::default()).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let result =
            list_page_images(Path::new("does/not/exist"), &PageRange::default()).await;
        assert!(result.is_err());
    }

    #[test]
    fn clamps_ranges_to_documents() {
        let open = PageRange::default();
        assert_eq!(open.clamp_to(12), Some((1, 12)));
        let tail = PageRange {
            start: Some(10),
            end: Some(40),
        };
        assert_eq!(tail.clamp_to(12), Some((10, 12)));
        let past_end = PageRange {
            start: Some(13),
            end: None,
        };
        assert_eq!(past_end.clamp_to(12), None);
    }

    #[test]
    fn parses_pdfinfo_output() {
        let output = "Title:          Lalita\nPages:          42\nEncrypted:      no\n";
        assert_eq!(parse_pdfinfo_page_count(output).unwrap(), 42);
        assert!(parse_pdfinfo_page_count("Title: x\n").is_err());
    }

    #[tokio::test]
    #[ignore = "Requires poppler-utils and a PDF fixture"]
    async fn renders_requested_pages() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let range = PageRange {
            start: Some(2),
            end: None,
        };
        let pages =
            render_pdf_pages(Path::new(TEST_PDF_PATH), dir.path(), "doc_page_", 72, &range)
                .await?;
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page_number, 2);
        assert_eq!(pages[0].file_name(), "doc_page_002.png");
        Ok(())
    }
}
