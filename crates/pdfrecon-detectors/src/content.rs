use anyhow::Result;

use pdfrecon_core::detect::{Cost, Evaluator, Needs};
use pdfrecon_core::model::{Finding, IndicatorKind};
use pdfrecon_core::scan::ScanContext;

const MAX_FLAGGED_PAGES: usize = 10;

/// Dense text positioning inside one BT/ET block is how overlaid or
/// reconstructed text is laid down glyph run by glyph run.
pub struct TextPositioningEvaluator;

impl Evaluator for TextPositioningEvaluator {
    fn id(&self) -> &'static str {
        "text_positioning"
    }

    fn needs(&self) -> Needs {
        Needs::PAGE_CONTENT
    }

    fn cost(&self) -> Cost {
        Cost::Moderate
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Finding>> {
        let threshold = ctx.config.text_positioning_threshold;
        let mut findings = Vec::new();
        for (page_index, page) in ctx.page_stats().iter().enumerate() {
            if findings.len() >= MAX_FLAGGED_PAGES {
                break;
            }
            if page.stats.max_positioning_per_block < threshold {
                continue;
            }
            let mut finding = Finding::new(
                IndicatorKind::SuspiciousTextPositioning,
                format!(
                    "Page {} positions text {} times within a single text block (threshold {})",
                    page_index + 1,
                    page.stats.max_positioning_per_block,
                    threshold
                ),
            )
            .object(page.page.0, page.page.1)
            .meta("page", (page_index + 1).to_string())
            .meta("positioning_ops", page.stats.max_positioning_per_block.to_string());
            if let Some(run) = page.stats.invisible_text_runs.first() {
                finding = finding.meta("invisible_text_preview", preview(run));
            }
            findings.push(finding);
        }
        Ok(findings)
    }
}

/// White-filled rectangles are the classic way to hide content without
/// removing it.
pub struct WhiteRectangleEvaluator;

impl Evaluator for WhiteRectangleEvaluator {
    fn id(&self) -> &'static str {
        "white_rectangles"
    }

    fn needs(&self) -> Needs {
        Needs::PAGE_CONTENT
    }

    fn cost(&self) -> Cost {
        Cost::Moderate
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();
        for (page_index, page) in ctx.page_stats().iter().enumerate() {
            if findings.len() >= MAX_FLAGGED_PAGES {
                break;
            }
            if page.stats.white_rect_fills < 2 {
                continue;
            }
            findings.push(
                Finding::new(
                    IndicatorKind::WhiteRectangleOverlay,
                    format!(
                        "Page {} draws {} white-filled rectangle(s); content may be covered",
                        page_index + 1,
                        page.stats.white_rect_fills
                    ),
                )
                .object(page.page.0, page.page.1)
                .meta("page", (page_index + 1).to_string())
                .meta("white_rects", page.stats.white_rect_fills.to_string()),
            );
        }
        Ok(findings)
    }
}

/// An unusual volume of drawing operators on one page suggests overlaid or
/// redrawn content.
pub struct DrawingOpsEvaluator;

impl Evaluator for DrawingOpsEvaluator {
    fn id(&self) -> &'static str {
        "drawing_ops"
    }

    fn needs(&self) -> Needs {
        Needs::PAGE_CONTENT
    }

    fn cost(&self) -> Cost {
        Cost::Moderate
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Finding>> {
        let threshold = ctx.config.drawing_ops_threshold;
        let mut findings = Vec::new();
        for (page_index, page) in ctx.page_stats().iter().enumerate() {
            if findings.len() >= MAX_FLAGGED_PAGES {
                break;
            }
            if page.stats.drawing_ops <= threshold {
                continue;
            }
            findings.push(
                Finding::new(
                    IndicatorKind::ExcessiveDrawingOperations,
                    format!(
                        "Page {} contains {} drawing operators (threshold {})",
                        page_index + 1,
                        page.stats.drawing_ops,
                        threshold
                    ),
                )
                .object(page.page.0, page.page.1)
                .meta("page", (page_index + 1).to_string())
                .meta("drawing_ops", page.stats.drawing_ops.to_string()),
            );
        }
        Ok(findings)
    }
}

fn preview(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take(80)
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
        .collect()
}
