//! Sprite-sheet scanner.
//! Loads the sheet as RGB8 and runs three heuristics over it:
//! checkerboard cell width along the top row, then the first pixel in
//! row-major order that falls in each configured color range.
//! Read-only: the image is never modified.

use anyhow::{Context, Result, bail};
use image::{Rgb, RgbImage};
use std::fmt;
use std::path::Path;
use std::time::Instant;
use tracing::debug;

use crate::config::{ColorRange, ScanThresholds};

/// Outcome of the checkerboard pass over the top row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellWidth {
    /// Column of the first pixel whose color differs from (0,0).
    Found(u32),
    /// No color change before the right edge; carries the image width.
    Uniform(u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelMatch {
    pub x: u32,
    pub y: u32,
    pub color: Rgb<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanReport {
    pub top_left: Rgb<u8>,
    pub cell_width: CellWidth,
    pub red: Option<PixelMatch>,
    pub ground: Option<PixelMatch>,
}

/// Opens and decodes `path`, converting whatever it holds to RGB8.
pub fn load_sheet(path: impl AsRef<Path>) -> Result<RgbImage> {
    let path = path.as_ref();
    let sheet = image::open(path)
        .with_context(|| format!("Failed to open sprite sheet {}", path.display()))?
        .into_rgb8();

    if sheet.width() == 0 || sheet.height() == 0 {
        bail!("Sprite sheet {} is empty ({}x{})", path.display(), sheet.width(), sheet.height());
    }

    Ok(sheet)
}

/// Width of one checkerboard cell, read off the first color change on row 0.
/// The caller guarantees a non-empty image.
pub fn detect_cell_width(sheet: &RgbImage) -> CellWidth {
    let reference = sheet.get_pixel(0, 0);
    (1..sheet.width())
        .find(|&x| sheet.get_pixel(x, 0) != reference)
        .map_or(CellWidth::Uniform(sheet.width()), CellWidth::Found)
}

/// First pixel (rows top-down, columns left-right) inside `range`.
pub fn find_first(sheet: &RgbImage, range: &ColorRange) -> Option<PixelMatch> {
    // Rows the range excludes can't hold the first match, so skip them outright.
    let first_row = range.after_row.map_or(0, |row| row.saturating_add(1));

    (first_row..sheet.height())
        .flat_map(|y| (0..sheet.width()).map(move |x| (x, y)))
        .map(|(x, y)| PixelMatch {
            x,
            y,
            color: *sheet.get_pixel(x, y),
        })
        .find(|m| range.matches(m.y, &m.color))
}

pub fn analyze(sheet: &RgbImage, thresholds: &ScanThresholds) -> ScanReport {
    ScanReport {
        top_left: *sheet.get_pixel(0, 0),
        cell_width: detect_cell_width(sheet),
        red: find_first(sheet, &thresholds.red),
        ground: find_first(sheet, &thresholds.ground),
    }
}

/// Load + analyze in one go; this is what `sprite-probe scan` runs.
pub fn run(path: impl AsRef<Path>, thresholds: &ScanThresholds) -> Result<ScanReport> {
    let start = Instant::now();
    let sheet = load_sheet(path)?;
    debug!(width = sheet.width(), height = sheet.height(), "sprite sheet loaded");

    let report = analyze(&sheet, thresholds);
    debug!("scan latency: {:?}", start.elapsed());

    Ok(report)
}

fn rgb_tuple(color: &Rgb<u8>) -> String {
    let [r, g, b] = color.0;
    format!("({},{},{})", r, g, b)
}

impl fmt::Display for ScanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.top_left.0;
        writeln!(f, "Top-left color: ({}, {}, {})", r, g, b)?;

        match self.cell_width {
            CellWidth::Found(n) => write!(f, "Checkerboard grid size: {}", n)?,
            CellWidth::Uniform(w) => write!(
                f,
                "Checkerboard grid size: not found (top row uniform across {} px)",
                w
            )?,
        }

        if let Some(m) = &self.red {
            write!(
                f,
                "\nFirst Mario red found at ({}, {}), color: {}",
                m.x,
                m.y,
                rgb_tuple(&m.color)
            )?;
        }
        if let Some(m) = &self.ground {
            write!(
                f,
                "\nGround/Brick color found at ({}, {}), color: {}",
                m.x,
                m.y,
                rgb_tuple(&m.color)
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GREY: Rgb<u8> = Rgb([200, 200, 200]);
    const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

    /// Checkerboard with `cell`-pixel squares of GREY/WHITE.
    fn checkerboard(width: u32, height: u32, cell: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            if (x / cell + y / cell) % 2 == 0 { GREY } else { WHITE }
        })
    }

    #[test]
    fn test_cell_width_is_first_change_on_top_row() {
        let sheet = checkerboard(64, 32, 8);
        assert_eq!(detect_cell_width(&sheet), CellWidth::Found(8));
        assert_eq!(*sheet.get_pixel(0, 0), GREY);
    }

    #[test]
    fn test_cell_width_ignores_rows_below_the_first() {
        let mut sheet = RgbImage::from_pixel(20, 4, GREY);
        sheet.put_pixel(1, 1, WHITE);
        sheet.put_pixel(13, 0, WHITE);
        assert_eq!(detect_cell_width(&sheet), CellWidth::Found(13));
    }

    #[test]
    fn test_cell_width_uniform_top_row_reports_full_width() {
        let sheet = RgbImage::from_pixel(37, 5, GREY);
        assert_eq!(detect_cell_width(&sheet), CellWidth::Uniform(37));

        let single = RgbImage::from_pixel(1, 1, GREY);
        assert_eq!(detect_cell_width(&single), CellWidth::Uniform(1));
    }

    #[test]
    fn test_no_red_pixel_gives_no_match() {
        let sheet = checkerboard(32, 32, 4);
        assert_eq!(find_first(&sheet, &ColorRange::RED), None);

        let report = analyze(&sheet, &ScanThresholds::default());
        assert!(!report.to_string().contains("Mario red found"));
    }

    #[test]
    fn test_single_red_pixel_is_reported_at_its_coordinates() {
        let mut sheet = checkerboard(16, 16, 4);
        sheet.put_pixel(5, 7, Rgb([200, 50, 50]));

        let found = find_first(&sheet, &ColorRange::RED).unwrap();
        assert_eq!((found.x, found.y), (5, 7));
        assert_eq!(found.color, Rgb([200, 50, 50]));
    }

    #[test]
    fn test_first_match_is_row_major() {
        let mut sheet = RgbImage::from_pixel(16, 16, GREY);
        sheet.put_pixel(10, 3, Rgb([250, 10, 10]));
        sheet.put_pixel(2, 4, Rgb([250, 10, 10]));
        sheet.put_pixel(1, 3, Rgb([190, 90, 90]));

        let found = find_first(&sheet, &ColorRange::RED).unwrap();
        assert_eq!((found.x, found.y), (1, 3));
    }

    #[test]
    fn test_ground_skips_bricks_above_row_200() {
        let brick = Rgb([200, 100, 40]);
        let mut sheet = RgbImage::from_pixel(8, 240, WHITE);
        sheet.put_pixel(0, 10, brick);
        sheet.put_pixel(3, 200, brick);
        sheet.put_pixel(6, 201, brick);

        let found = find_first(&sheet, &ColorRange::GROUND).unwrap();
        assert_eq!((found.x, found.y), (6, 201));
    }

    #[test]
    fn test_ground_on_short_sheet_gives_no_match() {
        let sheet = RgbImage::from_pixel(8, 150, Rgb([200, 100, 40]));
        assert_eq!(find_first(&sheet, &ColorRange::GROUND), None);
    }

    #[test]
    fn test_report_lines() {
        let mut sheet = RgbImage::from_pixel(16, 220, GREY);
        sheet.put_pixel(4, 0, WHITE);
        sheet.put_pixel(5, 7, Rgb([200, 50, 50]));
        sheet.put_pixel(2, 210, Rgb([180, 90, 30]));

        let report = analyze(&sheet, &ScanThresholds::default());
        assert_eq!(
            report.to_string(),
            "Top-left color: (200, 200, 200)\n\
             Checkerboard grid size: 4\n\
             First Mario red found at (5, 7), color: (200,50,50)\n\
             Ground/Brick color found at (2, 210), color: (180,90,30)"
        );
    }

    #[test]
    fn test_report_uniform_row_says_not_found() {
        let sheet = RgbImage::from_pixel(12, 12, GREY);
        let report = analyze(&sheet, &ScanThresholds::default());
        let text = report.to_string();
        assert!(text.contains("Checkerboard grid size: not found (top row uniform across 12 px)"));
    }

    #[test]
    fn test_run_reads_png_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("SpriteSheet.png");
        let mut sheet = checkerboard(24, 24, 6);
        sheet.put_pixel(5, 7, Rgb([200, 50, 50]));
        sheet.save(&path).unwrap();

        let report = run(&path, &ScanThresholds::default()).unwrap();
        assert_eq!(report.cell_width, CellWidth::Found(6));
        assert_eq!(report.red.map(|m| (m.x, m.y)), Some((5, 7)));
        assert_eq!(report.ground, None);
    }

    #[test]
    fn test_run_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(dir.path().join("SpriteSheet.png"), &ScanThresholds::default()).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to open sprite sheet"));
    }

    #[test]
    fn test_run_undecodable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("SpriteSheet.png");
        std::fs::write(&path, b"definitely not a png").unwrap();
        assert!(run(&path, &ScanThresholds::default()).is_err());
    }
}
