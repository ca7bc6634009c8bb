/// Template localization by zero-mean normalised cross-correlation.
///
/// Scores follow the usual `TM_CCOEFF_NORMED` definition computed on luma,
/// with negative correlations clamped to 0 so every score lies in [0, 1].
/// Window sums come from summed-area tables. Templates whose short side is at
/// least twice `COARSE_TARGET` are searched exhaustively on a power-of-two
/// pyramid level and then refined level by level around the peak. The
/// `*_offloaded` wrappers run the CPU-bound searches on tokio's blocking pool.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::{s, Array2};

use crate::errors::{TileGridError, TileGridResult};
use crate::perception::grid::Tile;
use crate::perception::types::{Detection, Frame, Rect};

const COARSE_TARGET: u32 = 24;
/// Search radius on each finer level; a peak is only known to ±1 px one level up.
const REFINE_RADIUS: usize = 2;
const FLAT_EPS: f64 = 1e-3;

/// Named reference image with the minimum score its callers act on.
#[derive(Debug, Clone)]
pub struct Template {
    pub name: String,
    pub path: PathBuf,
    pub image: RgbImage,
    pub min_score: f64,
}

impl Template {
    /// Load a template from disk. Absent or undecodable files are `AssetMissing`.
    pub fn load(path: impl AsRef<Path>, min_score: f64) -> TileGridResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(TileGridError::AssetMissing(path.to_path_buf()));
        }
        let image = image::open(path)
            .map_err(|e| {
                tracing::error!(path = %path.display(), error = %e, "template unreadable");
                TileGridError::AssetMissing(path.to_path_buf())
            })?
            .to_rgb8();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::from_image(name, image, min_score).with_path(path))
    }

    pub fn from_image(name: impl Into<String>, image: RgbImage, min_score: f64) -> Self {
        Self {
            name: name.into(),
            path: PathBuf::new(),
            image,
            min_score,
        }
    }

    fn with_path(mut self, path: &Path) -> Self {
        self.path = path.to_path_buf();
        self
    }
}

/// Best placement of a template: detection in frame coordinates plus the crop under it.
#[derive(Debug, Clone)]
pub struct Placement {
    pub detection: Detection,
    pub crop: RgbImage,
    /// Scale factor applied to the template for this placement.
    pub scale: f64,
}

impl Placement {
    pub fn score(&self) -> f64 {
        self.detection.score
    }
}

// ── Correlation primitives ───────────────────────────────────────────────────

fn to_luma(img: &RgbImage) -> Array2<f32> {
    let (w, h) = img.dimensions();
    let mut out = Array2::<f32>::zeros((h as usize, w as usize));
    for (x, y, p) in img.enumerate_pixels() {
        out[[y as usize, x as usize]] =
            0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32;
    }
    out
}

/// Luma plane with summed-area tables for O(1) window mean/variance.
struct SearchImage {
    pixels: Array2<f32>,
    sum: Array2<f64>,
    sq_sum: Array2<f64>,
}

impl SearchImage {
    fn new(img: &RgbImage) -> Self {
        let pixels = to_luma(img);
        let (h, w) = pixels.dim();
        let mut sum = Array2::<f64>::zeros((h + 1, w + 1));
        let mut sq_sum = Array2::<f64>::zeros((h + 1, w + 1));
        for y in 0..h {
            let mut row = 0.0f64;
            let mut row_sq = 0.0f64;
            for x in 0..w {
                let v = pixels[[y, x]] as f64;
                row += v;
                row_sq += v * v;
                sum[[y + 1, x + 1]] = sum[[y, x + 1]] + row;
                sq_sum[[y + 1, x + 1]] = sq_sum[[y, x + 1]] + row_sq;
            }
        }
        Self { pixels, sum, sq_sum }
    }

    fn width(&self) -> usize {
        self.pixels.dim().1
    }

    fn height(&self) -> usize {
        self.pixels.dim().0
    }

    fn window_stats(&self, x: usize, y: usize, w: usize, h: usize) -> (f64, f64) {
        let area = |t: &Array2<f64>| t[[y + h, x + w]] - t[[y, x + w]] - t[[y + h, x]] + t[[y, x]];
        (area(&self.sum), area(&self.sq_sum))
    }
}

/// Template luma with its mean removed; `norm` is the L2 norm of the centred values.
struct PreparedTemplate {
    centered: Array2<f32>,
    norm: f64,
}

impl PreparedTemplate {
    fn new(img: &RgbImage) -> Self {
        let pixels = to_luma(img);
        let n = pixels.len().max(1) as f64;
        let mean = pixels.iter().map(|v| *v as f64).sum::<f64>() / n;
        let centered = pixels.mapv(|v| (v as f64 - mean) as f32);
        let norm = centered.iter().map(|v| (*v as f64) * (*v as f64)).sum::<f64>().sqrt();
        Self { centered, norm }
    }

    fn width(&self) -> usize {
        self.centered.dim().1
    }

    fn height(&self) -> usize {
        self.centered.dim().0
    }
}

fn correlate_at(src: &SearchImage, t: &PreparedTemplate, x: usize, y: usize) -> f64 {
    let (tw, th) = (t.width(), t.height());
    let n = (tw * th) as f64;
    if t.norm <= FLAT_EPS {
        return 0.0;
    }
    let (s, sq) = src.window_stats(x, y, tw, th);
    let var = sq - s * s / n;
    if var <= FLAT_EPS {
        return 0.0;
    }
    // Σ(I − Ī)·T' equals Σ I·T' because T' has zero mean.
    let window = src.pixels.slice(s![y..y + th, x..x + tw]);
    let cross: f64 = window
        .iter()
        .zip(t.centered.iter())
        .map(|(a, b)| *a as f64 * *b as f64)
        .sum();
    (cross / (var.sqrt() * t.norm)).clamp(0.0, 1.0)
}

/// Exhaustive search over top-left positions in `[x0, x1] × [y0, y1]`.
/// Strictly greater wins, so ties resolve to the first position in raster order.
fn search_window(
    src: &SearchImage,
    t: &PreparedTemplate,
    (x0, x1): (usize, usize),
    (y0, y1): (usize, usize),
) -> (f64, usize, usize) {
    let mut best = (-1.0f64, x0, y0);
    for y in y0..=y1 {
        for x in x0..=x1 {
            let score = correlate_at(src, t, x, y);
            if score > best.0 {
                best = (score, x, y);
            }
        }
    }
    best
}

fn downscale(img: &RgbImage, factor: u32) -> RgbImage {
    let w = (img.width() / factor).max(1);
    let h = (img.height() / factor).max(1);
    image::imageops::resize(img, w, h, FilterType::Triangle)
}

/// Power-of-two pyramid over one haystack. Levels are built on first use and
/// shared by every search against the same frame (all scales, all tiles).
struct SearchPyramid<'a> {
    base: &'a RgbImage,
    levels: BTreeMap<u32, SearchImage>,
}

impl<'a> SearchPyramid<'a> {
    fn new(base: &'a RgbImage) -> Self {
        Self { base, levels: BTreeMap::new() }
    }

    fn level(&mut self, factor: u32) -> &SearchImage {
        let base = self.base;
        self.levels.entry(factor).or_insert_with(|| {
            if factor == 1 {
                SearchImage::new(base)
            } else {
                SearchImage::new(&downscale(base, factor))
            }
        })
    }
}

/// Coarsest pyramid level for a template: the largest power of two that
/// keeps its short side at or above `COARSE_TARGET`.
fn top_factor(tw: u32, th: u32) -> u32 {
    let ratio = (tw.min(th) / COARSE_TARGET).max(1);
    1 << (31 - ratio.leading_zeros())
}

fn locate(pyramid: &mut SearchPyramid<'_>, needle: &RgbImage) -> Option<Detection> {
    let (tw, th) = needle.dimensions();
    let (fw, fh) = pyramid.base.dimensions();
    if tw == 0 || th == 0 || tw > fw || th > fh {
        return None;
    }

    // Exhaustive at the top level, then ±REFINE_RADIUS around the doubled
    // peak on every finer level down to full resolution.
    let mut factor = top_factor(tw, th);
    let mut peak: Option<(f64, usize, usize)> = None;
    loop {
        let t = if factor == 1 {
            PreparedTemplate::new(needle)
        } else {
            PreparedTemplate::new(&downscale(needle, factor))
        };
        let src = pyramid.level(factor);
        let max_x = src.width().saturating_sub(t.width());
        let max_y = src.height().saturating_sub(t.height());
        let found = match peak {
            None => search_window(src, &t, (0, max_x), (0, max_y)),
            Some((_, px, py)) => {
                let (cx, cy) = ((px * 2).min(max_x), (py * 2).min(max_y));
                search_window(
                    src,
                    &t,
                    (cx.saturating_sub(REFINE_RADIUS), (cx + REFINE_RADIUS).min(max_x)),
                    (cy.saturating_sub(REFINE_RADIUS), (cy + REFINE_RADIUS).min(max_y)),
                )
            }
        };
        peak = Some(found);
        if factor == 1 {
            break;
        }
        factor /= 2;
    }

    let (score, x, y) = peak?;
    Some(Detection::new(
        score.max(0.0),
        Rect::new(x as u32, y as u32, tw, th),
    ))
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Best placement of `needle` inside `haystack`, or `None` when it cannot fit.
pub fn match_image(haystack: &RgbImage, needle: &RgbImage) -> Option<Detection> {
    locate(&mut SearchPyramid::new(haystack), needle)
}

fn crop(frame: &RgbImage, rect: Rect) -> RgbImage {
    image::imageops::crop_imm(frame, rect.x, rect.y, rect.width, rect.height).to_image()
}

/// Single-scale match of a template against a frame. Never fails on a low score;
/// callers compare `Placement::score` with their own threshold.
pub fn match_best(frame: &Frame, template: &Template) -> Option<Placement> {
    let detection = match_image(frame.image(), &template.image)?;
    tracing::debug!(
        template = %template.name,
        score = detection.score,
        x = detection.rect.x,
        y = detection.rect.y,
        "template match"
    );
    Some(Placement {
        crop: crop(frame.image(), detection.rect),
        detection,
        scale: 1.0,
    })
}

/// Repeat the search for every factor in `scales` and keep the strictly best placement.
pub fn match_multiscale(frame: &Frame, template: &Template, scales: &[f64]) -> Option<Placement> {
    let mut pyramid = SearchPyramid::new(frame.image());
    let (w0, h0) = template.image.dimensions();
    let mut best: Option<(Detection, f64)> = None;

    for &scale in scales {
        let tw = ((w0 as f64 * scale) as u32).max(1);
        let th = ((h0 as f64 * scale) as u32).max(1);
        let scaled = if (tw, th) == (w0, h0) {
            template.image.clone()
        } else {
            image::imageops::resize(&template.image, tw, th, FilterType::Triangle)
        };
        let Some(det) = locate(&mut pyramid, &scaled) else {
            continue;
        };
        if best.map_or(true, |(b, _)| det.score > b.score) {
            best = Some((det, scale));
        }
    }

    let (detection, scale) = best?;
    tracing::debug!(
        template = %template.name,
        score = detection.score,
        scale,
        x = detection.rect.x,
        y = detection.rect.y,
        "multiscale match"
    );
    Some(Placement {
        crop: crop(frame.image(), detection.rect),
        detection,
        scale,
    })
}

/// Re-detect every tile crop of the current round inside a fresh frame.
/// Tiles whose crop cannot be placed are absent from the result.
pub fn locate_tiles(frame: &Frame, tiles: &[Tile]) -> BTreeMap<u8, Detection> {
    let mut pyramid = SearchPyramid::new(frame.image());
    let mut detections = BTreeMap::new();
    for tile in tiles {
        if let Some(det) = locate(&mut pyramid, &tile.crop) {
            detections.insert(tile.index, det);
        }
    }
    tracing::debug!(
        detected = detections.len(),
        expected = tiles.len(),
        "tiles relocated"
    );
    detections
}

// ── Blocking-pool wrappers ───────────────────────────────────────────────────

async fn offload<T, F>(job: F) -> TileGridResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| TileGridError::Perception(format!("join: {e}")))
}

/// `match_best` on the blocking pool.
pub async fn match_best_offloaded(frame: &Frame, template: &Template) -> TileGridResult<Option<Placement>> {
    let (frame, template) = (frame.clone(), template.clone());
    offload(move || match_best(&frame, &template)).await
}

/// `match_multiscale` on the blocking pool.
pub async fn match_multiscale_offloaded(
    frame: &Frame,
    template: &Template,
    scales: &[f64],
) -> TileGridResult<Option<Placement>> {
    let (frame, template, scales) = (frame.clone(), template.clone(), scales.to_vec());
    offload(move || match_multiscale(&frame, &template, &scales)).await
}

/// `locate_tiles` on the blocking pool.
pub async fn locate_tiles_offloaded(frame: &Frame, tiles: &[Tile]) -> TileGridResult<BTreeMap<u8, Detection>> {
    let (frame, tiles) = (frame.clone(), tiles.to_vec());
    offload(move || locate_tiles(&frame, &tiles)).await
}
