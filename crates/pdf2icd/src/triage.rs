//! Page triage: decide which pages need OCR before their text is trusted.
//!
//! Rules run in order and the first one that fires decides the page:
//! invalid geometry, no text, low text density, noisy text, image dominated,
//! then borderline (any signal close to its threshold). Everything else is
//! light. Uncertain pages always go to the heavy branch.

use icd_types::{PageClassification, PageSignals, TriageReason};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ConfigError;

/// PDF user-space units per inch.
pub const POINTS_PER_INCH: f64 = 72.0;
const SQ_POINTS_PER_SQ_INCH: f64 = POINTS_PER_INCH * POINTS_PER_INCH;

/// Thresholds for [`classify`]. Missing fields take their defaults when deserialized.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
    /// Pages with fewer non-whitespace characters per square inch are heavy.
    pub min_chars_per_sq_inch: f64,
    /// Pages whose non-alphanumeric share exceeds this are heavy.
    pub max_noise_ratio: f64,
    /// Image coverage at or above this, with little text, makes a page heavy.
    pub max_image_coverage: f64,
    /// Character count below which an image-covered page is image dominated.
    pub image_text_min_chars: usize,
    /// Relative distance to a threshold that still counts as borderline.
    pub borderline_margin: f64,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            min_chars_per_sq_inch: 1.0,
            max_noise_ratio: 0.5,
            max_image_coverage: 0.5,
            image_text_min_chars: 200,
            borderline_margin: 0.1,
        }
    }
}

impl TriageConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check(
            "min_chars_per_sq_inch",
            "a finite number >= 0",
            self.min_chars_per_sq_inch,
            |v| v.is_finite() && v >= 0.0,
        )?;
        check("max_noise_ratio", "between 0 and 1", self.max_noise_ratio, |v| {
            (0.0..=1.0).contains(&v)
        })?;
        check(
            "max_image_coverage",
            "between 0 and 1",
            self.max_image_coverage,
            |v| (0.0..=1.0).contains(&v),
        )?;
        check(
            "borderline_margin",
            "between 0 (inclusive) and 1 (exclusive)",
            self.borderline_margin,
            |v| (0.0..1.0).contains(&v),
        )?;
        Ok(())
    }
}

fn check(
    name: &'static str,
    expected: &'static str,
    value: f64,
    ok: impl Fn(f64) -> bool,
) -> Result<(), ConfigError> {
    if ok(value) {
        Ok(())
    } else {
        Err(ConfigError::Triage {
            name,
            expected,
            value,
        })
    }
}

/// Displayed size of an embedded raster image, in points.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageRegion {
    pub width: f64,
    pub height: f64,
}

impl ImageRegion {
    fn area(&self) -> f64 {
        if self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0 {
            self.width * self.height
        } else {
            0.0
        }
    }
}

/// Everything triage looks at for one page.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PageContent {
    /// Zero-based page index.
    pub page: u32,
    /// Page width in points.
    pub width: f64,
    /// Page height in points.
    pub height: f64,
    /// Directly extracted text, before any OCR.
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub images: Vec<ImageRegion>,
}

impl PageContent {
    fn has_valid_geometry(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

/// Text and image measurements for a page. Zeroed when the geometry is invalid.
pub fn measure(page: &PageContent) -> PageSignals {
    if !page.has_valid_geometry() {
        return PageSignals::default();
    }
    let mut char_count = 0usize;
    let mut noisy = 0usize;
    for c in page.text.chars().filter(|c| !c.is_whitespace()) {
        char_count += 1;
        if !c.is_alphanumeric() {
            noisy += 1;
        }
    }

    let area = page.width * page.height;
    let sq_inches = area / SQ_POINTS_PER_SQ_INCH;
    let image_area: f64 = page.images.iter().map(ImageRegion::area).sum();
    PageSignals {
        char_count,
        chars_per_sq_inch: char_count as f64 / sq_inches,
        noise_ratio: if char_count == 0 {
            0.0
        } else {
            noisy as f64 / char_count as f64
        },
        image_coverage: (image_area / area).min(1.0),
    }
}

/// Route one page to the light or heavy extraction path.
pub fn classify(page: &PageContent, config: &TriageConfig) -> PageClassification {
    let signals = measure(page);
    let reason = if !page.has_valid_geometry() {
        Some(TriageReason::InvalidGeometry)
    } else if signals.char_count == 0 {
        Some(TriageReason::NoText)
    } else if signals.chars_per_sq_inch < config.min_chars_per_sq_inch {
        Some(TriageReason::LowTextDensity)
    } else if signals.noise_ratio > config.max_noise_ratio {
        Some(TriageReason::NoisyText)
    } else if signals.image_coverage >= config.max_image_coverage
        && signals.char_count < config.image_text_min_chars
    {
        Some(TriageReason::ImageDominated)
    } else if is_borderline(&signals, config) {
        Some(TriageReason::Borderline)
    } else {
        None
    };

    if let Some(reason) = reason {
        debug!("page {} needs heavy processing: {reason}", page.page);
    }
    PageClassification {
        page: page.page,
        requires_heavy_processing: reason.is_some(),
        reason,
        signals,
    }
}

// Only called once every hard rule has passed.
fn is_borderline(signals: &PageSignals, config: &TriageConfig) -> bool {
    let m = config.borderline_margin;
    let density_close = signals.chars_per_sq_inch < config.min_chars_per_sq_inch * (1.0 + m);
    let noise_close = signals.noise_ratio > config.max_noise_ratio * (1.0 - m);
    let images_close = signals.image_coverage >= config.max_image_coverage * (1.0 - m)
        && (signals.char_count as f64) < config.image_text_min_chars as f64 * (1.0 + m);
    density_close || noise_close || images_close
}

/// Classify every page of a document, in input order.
pub fn classify_document(pages: &[PageContent], config: &TriageConfig) -> Vec<PageClassification> {
    let classified: Vec<_> = pages.iter().map(|p| classify(p, config)).collect();
    let heavy = classified
        .iter()
        .filter(|c| c.requires_heavy_processing)
        .count();
    info!("triaged {} pages: {heavy} heavy", classified.len());
    classified
}

#[cfg(test)]
mod tests {
    use super::*;

    // US letter: 8.5 x 11 in = 93.5 sq in.
    const LETTER_W: f64 = 612.0;
    const LETTER_H: f64 = 792.0;

    fn letter(text: &str, images: Vec<ImageRegion>) -> PageContent {
        PageContent {
            page: 0,
            width: LETTER_W,
            height: LETTER_H,
            text: text.to_string(),
            images,
        }
    }

    fn prose(chars: usize) -> String {
        "a".repeat(chars)
    }

    fn classify_default(page: &PageContent) -> PageClassification {
        classify(page, &TriageConfig::default())
    }

    #[test]
    fn dense_clean_page_is_light() {
        let result = classify_default(&letter(&prose(3000), Vec::new()));
        assert!(!result.requires_heavy_processing);
        assert_eq!(result.reason, None);
        assert_eq!(result.signals.char_count, 3000);
    }

    #[test]
    fn invalid_geometry_is_heavy() {
        let mut page = letter(&prose(3000), Vec::new());
        page.height = 0.0;
        assert_eq!(classify_default(&page).reason, Some(TriageReason::InvalidGeometry));
        page.height = f64::NAN;
        assert_eq!(classify_default(&page).reason, Some(TriageReason::InvalidGeometry));
        page.height = -10.0;
        assert!(classify_default(&page).requires_heavy_processing);
    }

    #[test]
    fn blank_page_has_no_text() {
        let result = classify_default(&letter(" \n\t ", Vec::new()));
        assert_eq!(result.reason, Some(TriageReason::NoText));
    }

    #[test]
    fn low_density_with_large_image_is_heavy() {
        let scan = ImageRegion {
            width: LETTER_W,
            height: LETTER_H,
        };
        let result = classify_default(&letter("Page 1 of 3", vec![scan]));
        assert!(result.requires_heavy_processing);
        assert_eq!(result.reason, Some(TriageReason::LowTextDensity));
        assert_eq!(result.signals.image_coverage, 1.0);
    }

    #[test]
    fn symbol_soup_is_noisy() {
        let text = format!("{}{}", prose(100), "#".repeat(200));
        let result = classify_default(&letter(&text, Vec::new()));
        assert_eq!(result.reason, Some(TriageReason::NoisyText));
    }

    #[test]
    fn image_with_little_text_is_image_dominated() {
        let half = ImageRegion {
            width: LETTER_W,
            height: LETTER_H * 0.8,
        };
        let result = classify_default(&letter(&prose(150), vec![half]));
        assert_eq!(result.reason, Some(TriageReason::ImageDominated));
    }

    #[test]
    fn image_with_plenty_of_text_is_light() {
        let figure = ImageRegion {
            width: LETTER_W,
            height: LETTER_H * 0.8,
        };
        let result = classify_default(&letter(&prose(3000), vec![figure]));
        assert!(!result.requires_heavy_processing);
    }

    #[test]
    fn near_threshold_density_is_borderline() {
        // 100 chars / 93.5 sq in = 1.07, inside 10% of the 1.0 minimum.
        let result = classify_default(&letter(&prose(100), Vec::new()));
        assert_eq!(result.reason, Some(TriageReason::Borderline));
        assert!(result.requires_heavy_processing);
    }

    #[test]
    fn near_threshold_noise_is_borderline() {
        let text = format!("{}{}", prose(1000), "-".repeat(900));
        let result = classify_default(&letter(&text, Vec::new()));
        assert_eq!(result.reason, Some(TriageReason::Borderline));
    }

    #[test]
    fn zero_margin_disables_borderline() {
        let config = TriageConfig {
            borderline_margin: 0.0,
            ..TriageConfig::default()
        };
        let result = classify(&letter(&prose(100), Vec::new()), &config);
        assert!(!result.requires_heavy_processing);
    }

    #[test]
    fn coverage_is_capped_and_ignores_bad_images() {
        let images = vec![
            ImageRegion {
                width: LETTER_W,
                height: LETTER_H,
            },
            ImageRegion {
                width: LETTER_W,
                height: LETTER_H,
            },
            ImageRegion {
                width: -1.0,
                height: 50.0,
            },
        ];
        let signals = measure(&letter("x", images));
        assert_eq!(signals.image_coverage, 1.0);
        let signals = measure(&letter(
            "x",
            vec![ImageRegion {
                width: f64::INFINITY,
                height: 10.0,
            }],
        ));
        assert_eq!(signals.image_coverage, 0.0);
    }

    #[test]
    fn document_keeps_page_order() {
        let mut second = letter("", Vec::new());
        second.page = 1;
        let pages = vec![letter(&prose(3000), Vec::new()), second];
        let result = classify_document(&pages, &TriageConfig::default());
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].page, 0);
        assert_eq!(result[1].reason, Some(TriageReason::NoText));
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config: TriageConfig = serde_json::from_str(r#"{"max_noise_ratio":0.2}"#).unwrap();
        assert_eq!(config.max_noise_ratio, 0.2);
        assert_eq!(config.image_text_min_chars, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_rejects_out_of_range_values() {
        let bad = TriageConfig {
            max_noise_ratio: 1.5,
            ..TriageConfig::default()
        };
        assert!(matches!(
            bad.validate(),
            Err(ConfigError::Triage {
                name: "max_noise_ratio",
                ..
            })
        ));
        let bad = TriageConfig {
            borderline_margin: 1.0,
            ..TriageConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad = TriageConfig {
            min_chars_per_sq_inch: f64::NAN,
            ..TriageConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
