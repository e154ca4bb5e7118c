use pedwatch_core::detection::{suppress, BBox, DEFAULT_OVERLAP_THRESHOLD};

fn shifted(base: &BBox, dx: f32, dy: f32, confidence: f32) -> BBox {
    BBox::new(base.x1 + dx, base.y1 + dy, base.x2 + dx, base.y2 + dy, confidence)
}

/// Equal boxes in a row, each `step` px right of the previous one, with
/// falling confidence.
fn row(count: usize, step: f32) -> Vec<BBox> {
    let base = BBox::new(0.0, 0.0, 64.0, 128.0, 1.0);
    (0..count)
        .map(|i| shifted(&base, i as f32 * step, 0.0, 1.0 - i as f32 * 0.01))
        .collect()
}

#[test]
fn weaker_heavily_overlapping_box_is_dropped() {
    // Two 100x200 boxes 100/9 px apart overlap with IoU 0.8.
    let strong = BBox::new(50.0, 40.0, 150.0, 240.0, 0.9);
    let weak = shifted(&strong, 100.0 / 9.0, 0.0, 0.6);
    assert!((strong.iou(&weak) - 0.8).abs() < 1e-4);

    let kept = suppress(&[weak, strong], DEFAULT_OVERLAP_THRESHOLD);
    assert_eq!(kept, vec![strong]);
}

#[test]
fn empty_input_gives_empty_output() {
    assert!(suppress(&[], DEFAULT_OVERLAP_THRESHOLD).is_empty());
}

#[test]
fn single_candidate_survives() {
    let only = BBox::new(3.0, 4.0, 67.0, 132.0, -0.2);
    assert_eq!(suppress(&[only], 0.0), vec![only]);
}

#[test]
fn output_is_ordered_by_confidence() {
    let a = BBox::new(0.0, 0.0, 10.0, 10.0, 0.2);
    let b = BBox::new(100.0, 0.0, 110.0, 10.0, 0.9);
    let c = BBox::new(200.0, 0.0, 210.0, 10.0, 0.5);
    let kept = suppress(&[a, b, c], DEFAULT_OVERLAP_THRESHOLD);
    assert_eq!(kept, vec![b, c, a]);
}

#[test]
fn kept_boxes_never_overlap_beyond_the_threshold() {
    let mut candidates = row(12, 7.0);
    candidates.extend(row(6, 19.0).iter().map(|b| shifted(b, 3.0, 11.0, b.confidence - 0.05)));
    for threshold in [0.1, 0.3, 0.5, 0.7] {
        let kept = suppress(&candidates, threshold);
        for (i, a) in kept.iter().enumerate() {
            for b in &kept[i + 1..] {
                assert!(a.iou(b) <= threshold);
            }
        }
    }
}

#[test]
fn suppression_is_idempotent() {
    let mut candidates = row(15, 6.0);
    candidates.extend(row(5, 40.0).iter().map(|b| shifted(b, 0.0, 70.0, b.confidence * 0.7)));
    for threshold in [0.0, 0.3, 0.6, 0.95] {
        let once = suppress(&candidates, threshold);
        let twice = suppress(&once, threshold);
        assert_eq!(once, twice, "threshold {threshold}");
    }
}

#[test]
fn raising_the_threshold_never_keeps_fewer_boxes_in_a_row() {
    let candidates = row(20, 5.0);
    let mut previous = 0;
    for step in 0..=20 {
        let threshold = step as f32 * 0.05;
        let kept = suppress(&candidates, threshold).len();
        assert!(kept >= previous, "threshold {threshold}: {kept} < {previous}");
        previous = kept;
    }
    assert_eq!(suppress(&candidates, 1.0).len(), candidates.len());
}
