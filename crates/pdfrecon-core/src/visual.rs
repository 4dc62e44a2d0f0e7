use tracing::{debug, warn};

/// A rendered page, RGB8, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbBitmap {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Rendering is an external collaborator: the analyzer never rasterizes
/// pages itself. The driver supplies an implementation backed by whatever
/// rendering library the product ships.
pub trait PageRenderer: Send + Sync {
    fn render(&self, document: &[u8], page_index: usize, dpi: u32) -> anyhow::Result<RgbBitmap>;
}

/// Compares the first pages of a revision against the final document,
/// byte-for-byte after RGB8 normalization. `true` only when every compared
/// page exists in both and matches exactly; dimension mismatches are
/// non-identical. Render failures keep the revision (conservatively not
/// identical), matching the stance that errors never discard evidence.
pub fn revision_visually_identical(
    renderer: &dyn PageRenderer,
    original: &[u8],
    revision: &[u8],
    original_pages: usize,
    revision_pages: usize,
    max_pages: usize,
    dpi: u32,
) -> bool {
    let pages = original_pages.min(revision_pages).min(max_pages);
    if pages == 0 {
        return false;
    }
    for page in 0..pages {
        let rendered_original = match renderer.render(original, page, dpi) {
            Ok(b) => b,
            Err(e) => {
                warn!(domain = "visual", page, error = %e, "original page render failed");
                return false;
            }
        };
        let rendered_revision = match renderer.render(revision, page, dpi) {
            Ok(b) => b,
            Err(e) => {
                warn!(domain = "visual", page, error = %e, "revision page render failed");
                return false;
            }
        };
        if rendered_original.width != rendered_revision.width
            || rendered_original.height != rendered_revision.height
        {
            debug!(domain = "visual", page, "page dimensions differ");
            return false;
        }
        if rendered_original.data != rendered_revision.data {
            debug!(domain = "visual", page, "pixel difference found");
            return false;
        }
    }
    true
}
