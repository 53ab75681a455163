//! Dark-blob circle grid finder.
//!
//! The frame is binarized at a global threshold, dark pixels are grouped into
//! 4-connected components with a union-find pass, and components are filtered
//! by size and shape. The remaining centroids are ordered into the grid by
//! [`order_grid_points`].

use crate::finder::{BoardSize, CircleGridMode, PatternFinder};
use crate::grid_order::{order_grid_points, GridOrderParams};
use nalgebra::Point2;
use planar_pose_core::{Frame, GrayImage};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobParams {
    /// Fixed binarization threshold; `None` uses the midpoint of the frame's
    /// darkest and brightest pixel.
    pub threshold: Option<u8>,
    pub min_area: usize,
    /// Upper area bound as a fraction of the frame area.
    pub max_area_rel: f64,
    /// Accepted range of `area / bounding-box area`.
    pub min_fill: f64,
    pub max_fill: f64,
    /// Largest accepted bounding-box aspect ratio (long side / short side).
    pub max_aspect: f64,
    pub grid: GridOrderParams,
}

impl Default for BlobParams {
    fn default() -> Self {
        Self {
            threshold: None,
            min_area: 6,
            max_area_rel: 0.05,
            min_fill: 0.5,
            max_fill: 0.95,
            max_aspect: 4.0,
            grid: GridOrderParams::default(),
        }
    }
}

/// A connected dark region.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Blob {
    pub center: Point2<f64>,
    pub area: usize,
}

/// Disjoint-set forest over pixel indices.
struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            size: vec![1; len],
        }
    }

    fn find(&mut self, mut id: usize) -> usize {
        let mut root = id;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        while self.parent[id] != root {
            let next = self.parent[id];
            self.parent[id] = root;
            id = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        let (big, small) = if self.size[ra] >= self.size[rb] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[small] = big;
        self.size[big] += self.size[small];
    }
}

#[derive(Clone, Copy)]
struct Component {
    area: usize,
    sum_x: f64,
    sum_y: f64,
    min_x: usize,
    max_x: usize,
    min_y: usize,
    max_y: usize,
}

/// Find dark blobs that look like filled circles or ellipses.
pub fn detect_blobs(gray: &GrayImage, params: &BlobParams) -> Vec<Blob> {
    let (w, h) = (gray.width, gray.height);
    if w == 0 || h == 0 {
        return Vec::new();
    }
    let threshold = params.threshold.unwrap_or_else(|| {
        let (lo, hi) = gray
            .data
            .iter()
            .fold((u8::MAX, u8::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        ((lo as u16 + hi as u16) / 2) as u8
    });
    let dark: Vec<bool> = gray.data.iter().map(|&v| v < threshold).collect();

    let mut uf = UnionFind::new(w * h);
    for y in 0..h {
        for x in 0..w {
            let idx = y * w + x;
            if !dark[idx] {
                continue;
            }
            if x + 1 < w && dark[idx + 1] {
                uf.union(idx, idx + 1);
            }
            if y + 1 < h && dark[idx + w] {
                uf.union(idx, idx + w);
            }
        }
    }

    let mut components: std::collections::HashMap<usize, Component> =
        std::collections::HashMap::new();
    for y in 0..h {
        for x in 0..w {
            let idx = y * w + x;
            if !dark[idx] {
                continue;
            }
            let root = uf.find(idx);
            let c = components.entry(root).or_insert(Component {
                area: 0,
                sum_x: 0.0,
                sum_y: 0.0,
                min_x: x,
                max_x: x,
                min_y: y,
                max_y: y,
            });
            c.area += 1;
            c.sum_x += x as f64;
            c.sum_y += y as f64;
            c.min_x = c.min_x.min(x);
            c.max_x = c.max_x.max(x);
            c.min_y = c.min_y.min(y);
            c.max_y = c.max_y.max(y);
        }
    }

    let max_area = (params.max_area_rel * (w * h) as f64) as usize;
    let mut blobs: Vec<Blob> = components
        .into_values()
        .filter(|c| {
            if c.area < params.min_area || c.area > max_area {
                return false;
            }
            if c.min_x == 0 || c.min_y == 0 || c.max_x + 1 == w || c.max_y + 1 == h {
                return false;
            }
            let bw = (c.max_x - c.min_x + 1) as f64;
            let bh = (c.max_y - c.min_y + 1) as f64;
            let fill = c.area as f64 / (bw * bh);
            let aspect = bw.max(bh) / bw.min(bh);
            fill >= params.min_fill && fill <= params.max_fill && aspect <= params.max_aspect
        })
        .map(|c| Blob {
            center: Point2::new(c.sum_x / c.area as f64, c.sum_y / c.area as f64),
            area: c.area,
        })
        .collect();
    blobs.sort_by(|a, b| {
        a.center
            .y
            .total_cmp(&b.center.y)
            .then(a.center.x.total_cmp(&b.center.x))
    });
    blobs
}

/// Keep the `n` blobs whose area is closest to the median area.
fn select_consistent(mut blobs: Vec<Blob>, n: usize) -> Vec<Blob> {
    if blobs.len() <= n {
        return blobs;
    }
    let mut areas: Vec<usize> = blobs.iter().map(|b| b.area).collect();
    areas.sort_unstable();
    let median = areas[areas.len() / 2] as f64;
    blobs.sort_by(|a, b| {
        (a.area as f64 - median)
            .abs()
            .total_cmp(&(b.area as f64 - median).abs())
    });
    blobs.truncate(n);
    blobs
}

/// Circle-grid finder built on [`detect_blobs`].
///
/// It does not detect checkerboards.
#[derive(Clone, Debug, Default)]
pub struct BlobGridFinder {
    pub params: BlobParams,
}

impl BlobGridFinder {
    pub fn new(params: BlobParams) -> Self {
        Self { params }
    }
}

impl PatternFinder for BlobGridFinder {
    fn find_chessboard_corners(
        &self,
        _frame: &Frame,
        _board: BoardSize,
    ) -> Option<Vec<Point2<f64>>> {
        None
    }

    fn find_circles_grid(
        &self,
        frame: &Frame,
        board: BoardSize,
        mode: CircleGridMode,
    ) -> Option<Vec<Point2<f64>>> {
        let blobs = detect_blobs(&frame.to_gray(), &self.params);
        let n = board.count();
        if blobs.len() < n {
            log::debug!("found {} blobs, need {n}", blobs.len());
            return None;
        }
        let centers: Vec<Point2<f64>> = select_consistent(blobs, n)
            .into_iter()
            .map(|b| b.center)
            .collect();
        order_grid_points(&centers, board, mode.into(), &self.params.grid)
    }
}
