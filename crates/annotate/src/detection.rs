//! Raw detector output before naming and normalization.

/// Box coordinates in whatever frame the detector reports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawBox {
    /// Center, width and height as fractions of the image the model saw.
    NormalizedCxcywh { cx: f32, cy: f32, w: f32, h: f32 },
    /// Corner coordinates in source-image pixels.
    PixelXyxy { x1: f32, y1: f32, x2: f32, y2: f32 },
}

impl RawBox {
    /// Top-left origin, width and height in pixels of an image of the given size.
    pub fn to_pixel_xywh(&self, width: u32, height: u32) -> [f32; 4] {
        match *self {
            RawBox::NormalizedCxcywh { cx, cy, w, h } => {
                let (img_w, img_h) = (width as f32, height as f32);
                let box_w = w * img_w;
                let box_h = h * img_h;
                [
                    cx * img_w - box_w / 2.0,
                    cy * img_h - box_h / 2.0,
                    box_w,
                    box_h,
                ]
            }
            RawBox::PixelXyxy { x1, y1, x2, y2 } => [x1, y1, x2 - x1, y2 - y1],
        }
    }

    pub fn to_pixel_xyxy(&self, width: u32, height: u32) -> [f32; 4] {
        let [x, y, w, h] = self.to_pixel_xywh(width, height);
        [x, y, x + w, y + h]
    }

    /// Resolve against a `width` x `height` frame, then shift by `(dx, dy)`.
    pub fn translated(&self, dx: f32, dy: f32, width: u32, height: u32) -> RawBox {
        let [x1, y1, x2, y2] = self.to_pixel_xyxy(width, height);
        RawBox::PixelXyxy {
            x1: x1 + dx,
            y1: y1 + dy,
            x2: x2 + dx,
            y2: y2 + dy,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub bbox: RawBox,
    pub confidence: f32,
    pub class_id: Option<u32>,
}

impl RawDetection {
    pub fn new(bbox: RawBox, confidence: f32, class_id: Option<u32>) -> Self {
        Self {
            bbox,
            confidence,
            class_id,
        }
    }
}

/// Intersection over union of two `[x1, y1, x2, y2]` boxes.
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let intersection = inter_w * inter_h;

    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Greedy suppression: keeps the highest-confidence box of every group whose
/// pairwise IoU exceeds `iou_threshold`. Boxes are compared in the pixel frame
/// of a `width` x `height` image. Unless `class_agnostic`, only boxes of the
/// same class suppress each other. Output is sorted by descending confidence.
pub fn non_max_suppression(
    mut detections: Vec<RawDetection>,
    iou_threshold: f32,
    class_agnostic: bool,
    width: u32,
    height: u32,
) -> Vec<RawDetection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let corners: Vec<[f32; 4]> = detections
        .iter()
        .map(|d| d.bbox.to_pixel_xyxy(width, height))
        .collect();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        for j in (i + 1)..detections.len() {
            if suppressed[j] {
                continue;
            }
            if !class_agnostic && detections[i].class_id != detections[j].class_id {
                continue;
            }
            if iou(&corners[i], &corners[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    detections
        .into_iter()
        .zip(suppressed)
        .filter_map(|(det, gone)| (!gone).then_some(det))
        .collect()
}
