//! Checkerboard finder backed by the `chess-corners` ChESS detector.

use crate::blob::BlobGridFinder;
use crate::finder::{BoardSize, CircleGridMode, PatternFinder};
use crate::grid_order::{order_grid_candidates, GridLayout, GridOrderParams};
use chess_corners::{find_chess_corners_image, ChessConfig, CornerDescriptor};
use nalgebra::Point2;
use planar_pose_core::Frame;

/// Reasonable default settings for the ChESS detector on calibration frames.
pub fn default_chess_config() -> ChessConfig {
    let mut cfg = ChessConfig::single_scale();
    cfg.params.threshold_rel = 0.2;
    cfg.params.nms_radius = 2;
    cfg
}

/// ChESS corners for checkerboards, [`BlobGridFinder`] for circle grids.
pub struct ChessCornersFinder {
    pub chess: ChessConfig,
    pub grid: GridOrderParams,
    pub circles: BlobGridFinder,
}

impl Default for ChessCornersFinder {
    fn default() -> Self {
        Self {
            chess: default_chess_config(),
            grid: GridOrderParams::default(),
            circles: BlobGridFinder::default(),
        }
    }
}

impl ChessCornersFinder {
    fn detect_raw(&self, frame: &Frame) -> Vec<CornerDescriptor> {
        let gray = frame.to_gray();
        match ::image::GrayImage::from_raw(gray.width as u32, gray.height as u32, gray.data) {
            Some(img) => find_chess_corners_image(&img, &self.chess),
            None => Vec::new(),
        }
    }
}

impl PatternFinder for ChessCornersFinder {
    fn find_chessboard_corners(&self, frame: &Frame, board: BoardSize) -> Option<Vec<Point2<f64>>> {
        let mut raw = self.detect_raw(frame);
        let n = board.count();
        if raw.len() < n {
            log::debug!("ChESS found {} corners, need {n}", raw.len());
            return None;
        }
        raw.sort_by(|a, b| b.response.total_cmp(&a.response));
        // Background clutter can outscore board corners; keep spares for pruning.
        let strongest: Vec<Point2<f64>> = raw
            .iter()
            .take(2 * n)
            .map(|c| Point2::new(c.x as f64, c.y as f64))
            .collect();
        order_grid_candidates(&strongest, board, GridLayout::Regular, &self.grid)
    }

    fn find_circles_grid(
        &self,
        frame: &Frame,
        board: BoardSize,
        mode: CircleGridMode,
    ) -> Option<Vec<Point2<f64>>> {
        self.circles.find_circles_grid(frame, board, mode)
    }
}
