//! Parsers for poppler command output (`pdftotext`, `pdfimages -list`).
//!
//! Running the tools is left to the caller; these functions only turn their
//! output into [`PageContent`] values for triage.

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::warn;

use crate::triage::{ImageRegion, POINTS_PER_INCH, PageContent};

const FORM_FEED: char = '\u{c}';

// page num type width height color comp bpc enc interp object ID x-ppi y-ppi ...
const COL_PAGE: usize = 0;
const COL_TYPE: usize = 2;
const COL_WIDTH: usize = 3;
const COL_HEIGHT: usize = 4;
const COL_X_PPI: usize = 12;
const COL_Y_PPI: usize = 13;

#[derive(Debug, Error, PartialEq)]
pub enum ListingError {
    #[error("image listing line {line}: {detail}")]
    Malformed { line: usize, detail: String },
}

/// One row of `pdfimages -list`.
#[derive(Clone, Debug, PartialEq)]
pub struct ListedImage {
    /// One-based page number, as printed by poppler.
    pub page: u32,
    /// `image`, `mask`, `smask` or `stencil`.
    pub kind: String,
    pub width_px: u32,
    pub height_px: u32,
    pub x_ppi: f64,
    pub y_ppi: f64,
}

impl ListedImage {
    /// Size the image is drawn at on the page.
    pub fn displayed(&self) -> ImageRegion {
        ImageRegion {
            width: f64::from(self.width_px) / self.x_ppi * POINTS_PER_INCH,
            height: f64::from(self.height_px) / self.y_ppi * POINTS_PER_INCH,
        }
    }

    /// Soft masks and stencils describe another image's alpha, not extra coverage.
    pub fn is_raster(&self) -> bool {
        self.kind == "image"
    }
}

/// Split `pdftotext` output into per-page text. Pages end with a form feed.
pub fn split_pages(output: &str) -> Vec<String> {
    if output.is_empty() {
        return Vec::new();
    }
    let body = output.strip_suffix(FORM_FEED).unwrap_or(output);
    body.split(FORM_FEED).map(str::to_string).collect()
}

/// Parse `pdfimages -list` output. Header and separator lines are skipped.
pub fn parse_image_listing(output: &str) -> Result<Vec<ListedImage>, ListingError> {
    let mut images = Vec::new();
    for (idx, raw) in output.lines().enumerate() {
        let line = raw.trim();
        if !line.starts_with(|c: char| c.is_ascii_digit()) {
            continue;
        }
        let line_no = idx + 1;
        let malformed = |detail: String| ListingError::Malformed {
            line: line_no,
            detail,
        };
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() <= COL_Y_PPI {
            return Err(malformed(format!(
                "expected at least {} columns, found {}",
                COL_Y_PPI + 1,
                fields.len()
            )));
        }

        let int = |col: usize, name: &str| {
            fields[col]
                .parse::<u32>()
                .map_err(|_| malformed(format!("invalid {name} {:?}", fields[col])))
        };
        let ppi = |col: usize, name: &str| match fields[col].parse::<f64>() {
            Ok(v) if v.is_finite() && v > 0.0 => Ok(v),
            _ => Err(malformed(format!("invalid {name} {:?}", fields[col]))),
        };

        let page = int(COL_PAGE, "page")?;
        if page == 0 {
            return Err(malformed("page numbers start at 1".to_string()));
        }
        images.push(ListedImage {
            page,
            kind: fields[COL_TYPE].to_string(),
            width_px: int(COL_WIDTH, "width")?,
            height_px: int(COL_HEIGHT, "height")?,
            x_ppi: ppi(COL_X_PPI, "x-ppi")?,
            y_ppi: ppi(COL_Y_PPI, "y-ppi")?,
        });
    }
    Ok(images)
}

/// Sorted, unique one-based page numbers that carry at least one image.
pub fn pages_with_images(images: &[ListedImage]) -> Vec<u32> {
    images
        .iter()
        .map(|img| img.page)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Drop control characters (except newline, tab, carriage return), invisible
/// format characters, private-use code points and Unicode noncharacters.
pub fn clean_printable_unicode(text: &str) -> String {
    text.chars().filter(|c| is_printable(*c)).collect()
}

fn is_printable(c: char) -> bool {
    if matches!(c, '\n' | '\t' | '\r') {
        return true;
    }
    if c.is_control() {
        return false;
    }
    let cp = u32::from(c);
    let format = matches!(
        cp,
        0x00AD
            | 0x0600..=0x0605
            | 0x061C
            | 0x06DD
            | 0x070F
            | 0x180E
            | 0x200B..=0x200F
            | 0x202A..=0x202E
            | 0x2060..=0x2064
            | 0x2066..=0x206F
            | 0xFEFF
            | 0xFFF9..=0xFFFB
            | 0x110BD
            | 0xE0001
            | 0xE0020..=0xE007F
    );
    let private_use = matches!(cp, 0xE000..=0xF8FF | 0xF0000..=0xFFFFD | 0x100000..=0x10FFFD);
    let nonchar = (0xFDD0..=0xFDEF).contains(&cp) || cp & 0xFFFE == 0xFFFE;
    !(format || private_use || nonchar)
}

/// Collapse whitespace runs inside each line to one space; keep line breaks.
pub fn compress_line_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build triage input from `pdftotext` output and an optional image listing.
///
/// Every page gets the same `width` x `height` in points. Text is cleaned with
/// [`clean_printable_unicode`] and [`compress_line_whitespace`]. Only raster
/// images count toward coverage.
pub fn assemble_pages(
    pdftotext_output: &str,
    images: &[ListedImage],
    width: f64,
    height: f64,
) -> Vec<PageContent> {
    let mut pages: Vec<PageContent> = split_pages(pdftotext_output)
        .into_iter()
        .enumerate()
        .map(|(idx, text)| PageContent {
            page: idx as u32,
            width,
            height,
            text: compress_line_whitespace(&clean_printable_unicode(&text)),
            images: Vec::new(),
        })
        .collect();

    for image in images.iter().filter(|img| img.is_raster()) {
        let slot = (image.page as usize).checked_sub(1);
        match slot.and_then(|idx| pages.get_mut(idx)) {
            Some(page) => page.images.push(image.displayed()),
            None => warn!(
                "image listed on page {} but the text has only {} pages",
                image.page,
                pages.len()
            ),
        }
    }
    pages
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
page   num  type   width height color comp bpc  enc interp  object ID x-ppi y-ppi size ratio
--------------------------------------------------------------------------------------------
   1     0 image    2550  3300  gray    1   8  jpeg   no         7  0   300   300  412K 5.0%
   1     1 smask    2550  3300  gray    1   8  image  no         7  0   300   300  9.2K 0.1%
   3     2 image     600   400  rgb     3   8  jpeg   no        21  0   150   150   48K 6.7%
";

    #[test]
    fn splits_on_form_feeds() {
        let pages = split_pages("first page\n\u{c}second\n\u{c}");
        assert_eq!(pages, vec!["first page\n", "second\n"]);
        assert_eq!(split_pages("no trailing feed"), vec!["no trailing feed"]);
        assert!(split_pages("").is_empty());
        assert_eq!(split_pages("\u{c}\u{c}"), vec!["", ""]);
    }

    #[test]
    fn parses_image_rows() {
        let images = parse_image_listing(LISTING).unwrap();
        assert_eq!(images.len(), 3);
        assert_eq!(images[0].page, 1);
        assert_eq!(images[1].kind, "smask");
        assert!(!images[1].is_raster());
        let shown = images[0].displayed();
        assert!((shown.width - 612.0).abs() < 1e-9);
        assert!((shown.height - 792.0).abs() < 1e-9);
        assert_eq!(pages_with_images(&images), vec![1, 3]);
    }

    #[test]
    fn rejects_truncated_rows() {
        let err = parse_image_listing("   2     0 image 100 100 rgb\n").unwrap_err();
        assert!(matches!(err, ListingError::Malformed { line: 1, .. }));
        let err = parse_image_listing(
            "1 0 image 10 10 rgb 3 8 jpeg no 7 0 0 300 1K 1%\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("x-ppi"));
    }

    #[test]
    fn empty_listing_has_no_images() {
        assert!(parse_image_listing("").unwrap().is_empty());
    }

    #[test]
    fn cleans_control_and_noncharacters() {
        let dirty = "a\u{0}b\u{200B}c\u{FDD0}d\u{FFFE}e\u{E000}f\tg\nh\u{1}";
        assert_eq!(clean_printable_unicode(dirty), "abcdef\tg\nh");
        assert_eq!(clean_printable_unicode("café – ok"), "café – ok");
    }

    #[test]
    fn compresses_whitespace_per_line() {
        let text = "  Chronic   kidney\tdisease \n\n stage   3 ";
        assert_eq!(compress_line_whitespace(text), "Chronic kidney disease\n\nstage 3");
    }

    #[test]
    fn assembles_pages_with_raster_images_only() {
        let text = "Diagnosis:\u{0}  hypertension\u{c}\u{c}appendix\u{c}";
        let images = parse_image_listing(LISTING).unwrap();
        let pages = assemble_pages(text, &images, 612.0, 792.0);
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].text, "Diagnosis: hypertension");
        assert_eq!(pages[0].images.len(), 1);
        assert!(pages[1].images.is_empty());
        assert_eq!(pages[2].page, 2);
        assert_eq!(pages[2].images.len(), 1);
    }

    #[test]
    fn images_past_the_last_page_are_ignored() {
        let images = parse_image_listing(LISTING).unwrap();
        let pages = assemble_pages("only one page\u{c}", &images, 612.0, 792.0);
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].images.len(), 1);
    }
}
