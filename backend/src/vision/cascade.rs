//! Viola-Jones face detection driven by an OpenCV cascade XML file.
//!
//! Only the "new style" format written by `opencv_traincascade` is
//! understood (`opencv_storage/cascade` with `BOOST` stages and upright
//! `HAAR` features), which is what the stock frontal-face cascades ship as.
//! Scanning and grouping follow `CascadeClassifier::detectMultiScale`.

use image::GrayImage;
use image::imageops::{self, FilterType};
use roxmltree::Node;
use std::path::Path;

use super::{FaceDetector, Region};
use crate::config::DetectorConfig;
use crate::inference::runtime::LoadError;

/// Similarity tolerance used when merging raw hits.
const GROUP_EPS: f64 = 0.2;

/// Subtracted from every stage threshold at load, as OpenCV does.
const THRESHOLD_EPS: f64 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionParams {
    pub scale_factor: f64,
    pub min_neighbors: usize,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 3,
        }
    }
}

impl From<&DetectorConfig> for DetectionParams {
    fn from(config: &DetectorConfig) -> Self {
        Self {
            scale_factor: config.scale_factor,
            min_neighbors: config.min_neighbors,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct WeightedRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    weight: f64,
}

#[derive(Debug, Clone)]
struct HaarFeature {
    rects: Vec<WeightedRect>,
}

impl HaarFeature {
    fn value(&self, integral: &IntegralImage, x: u32, y: u32) -> f64 {
        self.rects
            .iter()
            .map(|r| r.weight * integral.sum(x + r.x, y + r.y, r.width, r.height) as f64)
            .sum()
    }
}

/// Internal node: child indices > 0 are nodes, <= 0 index the leaves.
#[derive(Debug, Clone, Copy)]
struct TreeNode {
    left: i32,
    right: i32,
    feature: usize,
    threshold: f64,
}

#[derive(Debug, Clone)]
struct WeakClassifier {
    nodes: Vec<TreeNode>,
    leaves: Vec<f64>,
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f64,
    classifiers: Vec<WeakClassifier>,
}

#[derive(Debug, Clone)]
pub struct HaarCascade {
    window_width: u32,
    window_height: u32,
    stages: Vec<Stage>,
    features: Vec<HaarFeature>,
    params: DetectionParams,
}

impl HaarCascade {
    pub fn load(path: &Path, params: DetectionParams) -> Result<Self, LoadError> {
        if !path.exists() {
            return Err(LoadError::NotFound(path.display().to_string()));
        }
        let xml = std::fs::read_to_string(path)?;
        Self::parse(&xml, params)
    }

    pub fn parse(xml: &str, params: DetectionParams) -> Result<Self, LoadError> {
        if !(params.scale_factor > 1.0) {
            return Err(cascade_error(format!(
                "scale factor must be greater than 1, got {}",
                params.scale_factor
            )));
        }

        let doc = roxmltree::Document::parse(xml).map_err(|e| cascade_error(e.to_string()))?;
        let cascade = doc
            .descendants()
            .find(|n| n.has_tag_name("cascade"))
            .ok_or_else(|| cascade_error("no <cascade> element (old-style cascades are not supported)"))?;

        let stage_type = child_text(cascade, "stageType")?;
        if stage_type != "BOOST" {
            return Err(cascade_error(format!("unsupported stage type {}", stage_type)));
        }
        let feature_type = child_text(cascade, "featureType")?;
        if feature_type != "HAAR" {
            return Err(cascade_error(format!("unsupported feature type {}", feature_type)));
        }

        let window_width: u32 = parse_value(child_text(cascade, "width")?)?;
        let window_height: u32 = parse_value(child_text(cascade, "height")?)?;
        if window_width < 3 || window_height < 3 {
            return Err(cascade_error("detection window is too small"));
        }

        let features = elements(child(cascade, "features")?)
            .map(|node| parse_feature(node, window_width, window_height))
            .collect::<Result<Vec<_>, _>>()?;

        let stages = elements(child(cascade, "stages")?)
            .map(|node| parse_stage(node, features.len()))
            .collect::<Result<Vec<_>, _>>()?;
        if stages.is_empty() {
            return Err(cascade_error("cascade has no stages"));
        }

        Ok(Self {
            window_width,
            window_height,
            stages,
            features,
            params,
        })
    }

    pub fn window_size(&self) -> (u32, u32) {
        (self.window_width, self.window_height)
    }

    /// Raw, ungrouped hits over the whole image pyramid.
    fn scan(&self, gray: &GrayImage) -> Vec<Region> {
        let (image_width, image_height) = gray.dimensions();
        let mut hits = Vec::new();
        let mut factor = 1.0f64;

        loop {
            let scaled_width = (image_width as f64 / factor).round() as u32;
            let scaled_height = (image_height as f64 / factor).round() as u32;
            if scaled_width < self.window_width || scaled_height < self.window_height {
                break;
            }
            let window_width = (self.window_width as f64 * factor).round() as u32;
            let window_height = (self.window_height as f64 * factor).round() as u32;
            if window_width > image_width || window_height > image_height {
                break;
            }

            let scaled = if factor == 1.0 {
                gray.clone()
            } else {
                imageops::resize(gray, scaled_width, scaled_height, FilterType::Triangle)
            };
            let integral = IntegralImage::new(&scaled);
            let step = if factor > 2.0 { 1 } else { 2 };

            for y in (0..=scaled_height - self.window_height).step_by(step) {
                for x in (0..=scaled_width - self.window_width).step_by(step) {
                    if self.accepts(&integral, x, y) {
                        hits.push(Region {
                            x: (x as f64 * factor).round() as u32,
                            y: (y as f64 * factor).round() as u32,
                            width: window_width,
                            height: window_height,
                        });
                    }
                }
            }

            factor *= self.params.scale_factor;
        }

        hits
    }

    /// Runs every stage on the window at `(x, y)`.
    fn accepts(&self, integral: &IntegralImage, x: u32, y: u32) -> bool {
        let inner_width = self.window_width - 2;
        let inner_height = self.window_height - 2;
        let area = (inner_width * inner_height) as f64;
        let sum = integral.sum(x + 1, y + 1, inner_width, inner_height) as f64;
        let squares = integral.squared_sum(x + 1, y + 1, inner_width, inner_height) as f64;

        // Flat windows are rejected before any stage runs.
        let variance = area * squares - sum * sum;
        if variance <= 0.0 {
            return false;
        }
        let norm = 1.0 / variance.sqrt();
        if area * norm >= 0.1 {
            return false;
        }

        for stage in &self.stages {
            let mut total = 0.0;
            for classifier in &stage.classifiers {
                let mut index = 0i32;
                loop {
                    let node = &classifier.nodes[index as usize];
                    let value = self.features[node.feature].value(integral, x, y) * norm;
                    index = if value < node.threshold {
                        node.left
                    } else {
                        node.right
                    };
                    if index <= 0 {
                        break;
                    }
                }
                total += classifier.leaves[(-index) as usize];
            }
            if total < stage.threshold {
                return false;
            }
        }
        true
    }
}

impl FaceDetector for HaarCascade {
    fn detect(&self, gray: &GrayImage) -> Vec<Region> {
        let hits = self.scan(gray);
        log::debug!("Cascade produced {} raw hits", hits.len());
        group_rectangles(&hits, self.params.min_neighbors, GROUP_EPS)
    }
}

/// Summed-area tables for pixel values and their squares, one row and one
/// column larger than the image.
struct IntegralImage {
    stride: usize,
    sums: Vec<u64>,
    squares: Vec<u64>,
}

impl IntegralImage {
    fn new(image: &GrayImage) -> Self {
        let (width, height) = image.dimensions();
        let stride = width as usize + 1;
        let mut sums = vec![0u64; stride * (height as usize + 1)];
        let mut squares = vec![0u64; sums.len()];

        for y in 0..height as usize {
            let mut row_sum = 0u64;
            let mut row_squares = 0u64;
            for x in 0..width as usize {
                let pixel = image.get_pixel(x as u32, y as u32).0[0] as u64;
                row_sum += pixel;
                row_squares += pixel * pixel;
                let at = (y + 1) * stride + x + 1;
                sums[at] = sums[at - stride] + row_sum;
                squares[at] = squares[at - stride] + row_squares;
            }
        }

        Self {
            stride,
            sums,
            squares,
        }
    }

    fn sum(&self, x: u32, y: u32, width: u32, height: u32) -> i64 {
        Self::area(&self.sums, self.stride, x, y, width, height)
    }

    fn squared_sum(&self, x: u32, y: u32, width: u32, height: u32) -> i64 {
        Self::area(&self.squares, self.stride, x, y, width, height)
    }

    fn area(table: &[u64], stride: usize, x: u32, y: u32, width: u32, height: u32) -> i64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + width as usize, y0 + height as usize);
        table[y1 * stride + x1] as i64 - table[y0 * stride + x1] as i64
            - table[y1 * stride + x0] as i64
            + table[y0 * stride + x0] as i64
    }
}

/// Clusters similar rectangles, keeps clusters with more than
/// `group_threshold` members as their average, then drops clusters nested
/// inside a stronger one. A zero threshold returns the input unchanged.
pub fn group_rectangles(rects: &[Region], group_threshold: usize, eps: f64) -> Vec<Region> {
    if group_threshold == 0 || rects.is_empty() {
        return rects.to_vec();
    }

    let (labels, class_count) = partition(rects, eps);

    let mut totals = vec![[0i64; 4]; class_count];
    let mut counts = vec![0usize; class_count];
    for (rect, &label) in rects.iter().zip(&labels) {
        totals[label][0] += rect.x as i64;
        totals[label][1] += rect.y as i64;
        totals[label][2] += rect.width as i64;
        totals[label][3] += rect.height as i64;
        counts[label] += 1;
    }

    let averaged: Vec<Region> = totals
        .iter()
        .zip(&counts)
        .map(|(total, &count)| {
            let mean = |v: i64| (v as f64 / count as f64).round() as u32;
            Region {
                x: mean(total[0]),
                y: mean(total[1]),
                width: mean(total[2]),
                height: mean(total[3]),
            }
        })
        .collect();

    let mut grouped = Vec::new();
    for (i, r1) in averaged.iter().enumerate() {
        let n1 = counts[i];
        if n1 <= group_threshold {
            continue;
        }
        let nested = averaged.iter().enumerate().any(|(j, r2)| {
            let n2 = counts[j];
            if j == i || n2 <= group_threshold {
                return false;
            }
            let dx = (r2.width as f64 * eps).round() as i64;
            let dy = (r2.height as f64 * eps).round() as i64;
            let (x1, y1) = (r1.x as i64, r1.y as i64);
            let (x2, y2) = (r2.x as i64, r2.y as i64);
            x1 >= x2 - dx
                && y1 >= y2 - dy
                && x1 + r1.width as i64 <= x2 + r2.width as i64 + dx
                && y1 + r1.height as i64 <= y2 + r2.height as i64 + dy
                && (n2 > n1.max(3) || n1 < 3)
        });
        if !nested {
            grouped.push(*r1);
        }
    }
    grouped
}

fn similar(a: &Region, b: &Region, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) + a.height.min(b.height)) as f64 * 0.5;
    let close = |p: u32, q: u32| (p as f64 - q as f64).abs() <= delta;
    close(a.x, b.x)
        && close(a.y, b.y)
        && close(a.x + a.width, b.x + b.width)
        && close(a.y + a.height, b.y + b.height)
}

/// Union-find over the similarity relation. Classes are numbered in order of
/// first appearance.
fn partition(rects: &[Region], eps: f64) -> (Vec<usize>, usize) {
    let mut parent: Vec<usize> = (0..rects.len()).collect();

    fn root(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..rects.len() {
        for j in (i + 1)..rects.len() {
            if similar(&rects[i], &rects[j], eps) {
                let (a, b) = (root(&mut parent, i), root(&mut parent, j));
                if a != b {
                    parent[b] = a;
                }
            }
        }
    }

    let mut class_of_root = vec![usize::MAX; rects.len()];
    let mut labels = Vec::with_capacity(rects.len());
    let mut class_count = 0;
    for i in 0..rects.len() {
        let r = root(&mut parent, i);
        if class_of_root[r] == usize::MAX {
            class_of_root[r] = class_count;
            class_count += 1;
        }
        labels.push(class_of_root[r]);
    }
    (labels, class_count)
}

fn cascade_error(message: impl Into<String>) -> LoadError {
    LoadError::Cascade(message.into())
}

fn elements<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.is_element())
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Result<Node<'a, 'input>, LoadError> {
    elements(node)
        .find(|n| n.has_tag_name(name))
        .ok_or_else(|| cascade_error(format!("missing <{}>", name)))
}

fn child_text<'a>(node: Node<'a, '_>, name: &str) -> Result<&'a str, LoadError> {
    Ok(child(node, name)?.text().unwrap_or("").trim())
}

fn parse_value<T: std::str::FromStr>(text: &str) -> Result<T, LoadError> {
    text.parse()
        .map_err(|_| cascade_error(format!("invalid number '{}'", text)))
}

fn numbers(text: &str) -> Result<Vec<f64>, LoadError> {
    text.split_whitespace().map(parse_value).collect()
}

fn parse_feature(node: Node, window_width: u32, window_height: u32) -> Result<HaarFeature, LoadError> {
    if let Ok(tilted) = child_text(node, "tilted") {
        if tilted != "0" {
            return Err(cascade_error("tilted features are not supported"));
        }
    }

    let mut rects = Vec::new();
    for rect in elements(child(node, "rects")?) {
        let values = numbers(rect.text().unwrap_or(""))?;
        let [x, y, width, height, weight] = values[..] else {
            return Err(cascade_error("feature rectangle needs 5 values"));
        };
        if x < 0.0 || y < 0.0 || width <= 0.0 || height <= 0.0 {
            return Err(cascade_error("feature rectangle has negative geometry"));
        }
        let rect = WeightedRect {
            x: x as u32,
            y: y as u32,
            width: width as u32,
            height: height as u32,
            weight,
        };
        if rect.x + rect.width > window_width || rect.y + rect.height > window_height {
            return Err(cascade_error("feature rectangle exceeds the detection window"));
        }
        rects.push(rect);
    }
    if rects.is_empty() {
        return Err(cascade_error("feature without rectangles"));
    }
    Ok(HaarFeature { rects })
}

fn parse_stage(node: Node, feature_count: usize) -> Result<Stage, LoadError> {
    let threshold = parse_value::<f64>(child_text(node, "stageThreshold")?)? - THRESHOLD_EPS;
    let classifiers = elements(child(node, "weakClassifiers")?)
        .map(|weak| parse_weak_classifier(weak, feature_count))
        .collect::<Result<Vec<_>, _>>()?;
    if classifiers.is_empty() {
        return Err(cascade_error("stage without weak classifiers"));
    }
    Ok(Stage {
        threshold,
        classifiers,
    })
}

fn parse_weak_classifier(node: Node, feature_count: usize) -> Result<WeakClassifier, LoadError> {
    let internal = numbers(child_text(node, "internalNodes")?)?;
    let leaves = numbers(child_text(node, "leafValues")?)?;
    if internal.is_empty() || internal.len() % 4 != 0 {
        return Err(cascade_error("internal nodes come in groups of 4"));
    }

    let nodes: Vec<TreeNode> = internal
        .chunks_exact(4)
        .map(|v| TreeNode {
            left: v[0] as i32,
            right: v[1] as i32,
            feature: v[2] as usize,
            threshold: v[3],
        })
        .collect();

    for (index, node) in nodes.iter().enumerate() {
        if node.feature >= feature_count {
            return Err(cascade_error(format!("feature index {} out of range", node.feature)));
        }
        // Children must point forward so every walk ends at a leaf.
        for child in [node.left, node.right] {
            let valid = if child > 0 {
                (child as usize) > index && (child as usize) < nodes.len()
            } else {
                ((-child) as usize) < leaves.len()
            };
            if !valid {
                return Err(cascade_error(format!("tree child {} out of range", child)));
            }
        }
    }

    Ok(WeakClassifier { nodes, leaves })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// One stage, one stump: fires on windows that are brighter on the left.
    const EDGE_CASCADE: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier">
  <stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>8</height>
  <width>8</width>
  <stageNum>1</stageNum>
  <stages>
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>0.5</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 0 0.5</internalNodes>
          <leafValues>
            -1. 1.</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>
          0 0 4 8 1.</_>
        <_>
          4 0 4 8 -1.</_></rects>
      <tilted>0</tilted></_></features></cascade>
</opencv_storage>
"#;

    fn region(x: u32, y: u32, width: u32, height: u32) -> Region {
        Region {
            x,
            y,
            width,
            height,
        }
    }

    fn edge_image() -> GrayImage {
        GrayImage::from_fn(40, 40, |x, _| if x < 20 { Luma([255]) } else { Luma([0]) })
    }

    #[test]
    fn parses_new_style_cascade() {
        let cascade = HaarCascade::parse(EDGE_CASCADE, DetectionParams::default()).unwrap();
        assert_eq!(cascade.window_size(), (8, 8));
        assert_eq!(cascade.stages.len(), 1);
        assert_eq!(cascade.features[0].rects.len(), 2);
        assert_eq!(cascade.stages[0].classifiers[0].leaves, vec![-1.0, 1.0]);
        assert!((cascade.stages[0].threshold - (0.5 - 1e-5)).abs() < 1e-12);
    }

    #[test]
    fn rejects_tilted_features() {
        let xml = EDGE_CASCADE.replace("<tilted>0</tilted>", "<tilted>1</tilted>");
        assert!(matches!(
            HaarCascade::parse(&xml, DetectionParams::default()),
            Err(LoadError::Cascade(_))
        ));
    }

    #[test]
    fn rejects_other_feature_types() {
        let xml = EDGE_CASCADE.replace("HAAR", "LBP");
        assert!(HaarCascade::parse(&xml, DetectionParams::default()).is_err());
    }

    #[test]
    fn rejects_out_of_range_feature_index() {
        let xml = EDGE_CASCADE.replace("0 -1 0 0.5", "0 -1 3 0.5");
        assert!(HaarCascade::parse(&xml, DetectionParams::default()).is_err());
    }

    fn with_tree(internal: &str, leaves: &str) -> String {
        EDGE_CASCADE
            .replace("0 -1 0 0.5", internal)
            .replace("-1. 1.</leafValues>", &format!("{}</leafValues>", leaves))
    }

    #[test]
    fn rejects_trees_that_loop_back() {
        let self_loop = with_tree("1 -1 0 0.5\n 1 -2 0 0.5", "-1. 1. 0.");
        assert!(matches!(
            HaarCascade::parse(&self_loop, DetectionParams::default()),
            Err(LoadError::Cascade(_))
        ));

        let backward = with_tree("1 -1 0 0.5\n 2 -2 0 0.5\n 1 -3 0 0.5", "-1. 1. 0. 1.");
        assert!(matches!(
            HaarCascade::parse(&backward, DetectionParams::default()),
            Err(LoadError::Cascade(_))
        ));

        let forward = with_tree("1 -1 0 0.5\n -2 -3 0 0.5", "-1. 1. 0. 1.");
        assert!(HaarCascade::parse(&forward, DetectionParams::default()).is_ok());
    }

    #[test]
    fn rejects_non_increasing_scale() {
        let params = DetectionParams {
            scale_factor: 1.0,
            min_neighbors: 3,
        };
        assert!(HaarCascade::parse(EDGE_CASCADE, params).is_err());
    }

    #[test]
    fn missing_cascade_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            HaarCascade::load(&dir.path().join("cascade.xml"), DetectionParams::default()),
            Err(LoadError::NotFound(_))
        ));
    }

    #[test]
    fn integral_image_sums_rectangles() {
        let image = GrayImage::from_fn(4, 3, |x, y| Luma([(x + y * 4) as u8]));
        let integral = IntegralImage::new(&image);
        assert_eq!(integral.sum(0, 0, 4, 3), (0..12).sum::<i64>());
        assert_eq!(integral.sum(1, 1, 2, 2), 5 + 6 + 9 + 10);
        assert_eq!(integral.squared_sum(1, 1, 1, 1), 25);
    }

    #[test]
    fn grouping_averages_dense_clusters_and_drops_sparse_ones() {
        let rects = vec![
            region(10, 10, 20, 20),
            region(11, 10, 20, 20),
            region(10, 11, 20, 20),
            region(12, 12, 20, 20),
            region(100, 100, 20, 20),
        ];
        assert_eq!(group_rectangles(&rects, 3, GROUP_EPS), vec![region(11, 11, 20, 20)]);
    }

    #[test]
    fn grouping_drops_rectangles_nested_in_stronger_clusters() {
        let mut rects = vec![region(0, 0, 100, 100); 5];
        rects.extend(vec![region(10, 10, 20, 20); 4]);
        assert_eq!(group_rectangles(&rects, 3, GROUP_EPS), vec![region(0, 0, 100, 100)]);
    }

    #[test]
    fn zero_threshold_keeps_raw_hits() {
        let rects = vec![region(0, 0, 10, 10), region(50, 50, 10, 10)];
        assert_eq!(group_rectangles(&rects, 0, GROUP_EPS), rects);
    }

    #[test]
    fn detects_vertical_edge() {
        let cascade = HaarCascade::parse(EDGE_CASCADE, DetectionParams::default()).unwrap();
        let faces = cascade.detect(&edge_image());
        assert!(!faces.is_empty());
        for face in faces {
            assert!(face.x <= 21, "{:?}", face);
            assert!(face.x + face.width >= 19, "{:?}", face);
        }
    }

    #[test]
    fn uniform_image_has_no_detections() {
        let cascade = HaarCascade::parse(EDGE_CASCADE, DetectionParams::default()).unwrap();
        let flat = GrayImage::from_pixel(40, 40, Luma([128]));
        assert!(cascade.detect(&flat).is_empty());
    }
}
