use burn::{
    backend::{Autodiff, NdArray},
    tensor::{backend::Backend, Tensor, TensorData, Tolerance, Transaction},
};

use crate::{DetectionLoss, DetectionLossError, DetectionLossOutput, LossWeightsConfig};

pub type TestBackend = NdArray<f32>;

const NUM_ANCHORS: usize = 8;
const NUM_CLASSES: usize = 3;
const MASK_SIZE: usize = 4;
const MATCHED_ANCHOR: usize = 5;

/// A row of touching 10x10 anchors: `[10i, 0, 10i + 10, 10]`.
fn anchor_row<B: Backend>(device: &B::Device) -> Tensor<B, 3> {
    let coords: Vec<f32> = (0..NUM_ANCHORS)
        .flat_map(|i| {
            let x = 10.0 * i as f32;
            [x, 0.0, x + 10.0, 10.0]
        })
        .collect();
    Tensor::<B, 1>::from_floats(coords.as_slice(), device).reshape([1, NUM_ANCHORS, 4])
}

/// Two images: the first without annotations, the second with one class-2 box
/// coinciding with anchor 5.
fn two_image_annotations<B: Backend>(device: &B::Device) -> (Vec<Tensor<B, 2>>, Vec<Tensor<B, 3>>) {
    let x = 10.0 * MATCHED_ANCHOR as f32;
    let boxes = vec![
        Tensor::zeros([0, 5], device),
        Tensor::from_data(TensorData::from([[x, 0.0, x + 10.0, 10.0, 2.0]]), device),
    ];
    let masks = vec![
        Tensor::zeros([0, MASK_SIZE, MASK_SIZE], device),
        Tensor::ones([1, MASK_SIZE, MASK_SIZE], device),
    ];
    (boxes, masks)
}

fn run_two_image_batch<B: Backend>(
    device: &B::Device,
    regression_value: f32,
) -> DetectionLossOutput<B> {
    let classifications = Tensor::<B, 3>::full([2, NUM_ANCHORS, NUM_CLASSES], 0.5, device);
    let regressions = Tensor::<B, 3>::full([2, NUM_ANCHORS, 4], regression_value, device);
    let masks = Tensor::<B, 4>::full([2, NUM_ANCHORS, MASK_SIZE, MASK_SIZE], 0.5, device);
    let (boxes, gt_masks) = two_image_annotations(device);

    DetectionLoss::new()
        .forward(
            classifications,
            regressions,
            masks,
            anchor_row(device),
            &boxes,
            &gt_masks,
        )
        .expect("valid batch")
}

#[test]
fn detection_loss_two_image_batch_matches_hand_computed_values() {
    let device = Default::default();
    let output = run_two_image_batch::<TestBackend>(&device, 0.0);

    assert_eq!(output.per_image.len(), 2);

    // 23 background cells at 0.75 * 0.25 * ln 2 plus one foreground cell at
    // 0.25 * 0.25 * ln 2, normalized by a single positive anchor.
    let image_classification = 3.032518915_f32;
    let ln2 = std::f32::consts::LN_2;

    let empty = &output.per_image[0];
    let annotated = &output.per_image[1];
    let [empty_cls, empty_reg, empty_mask, cls, reg, mask] = Transaction::default()
        .register(empty.classification.clone())
        .register(empty.regression.clone())
        .register(empty.mask.clone())
        .register(annotated.classification.clone())
        .register(annotated.regression.clone())
        .register(annotated.mask.clone())
        .execute()
        .try_into()
        .expect("Correct amount of tensor data");

    let zero = TensorData::from([0.0]);
    empty_cls.assert_approx_eq::<f32>(&zero, Tolerance::default());
    empty_reg.assert_approx_eq::<f32>(&zero, Tolerance::default());
    empty_mask.assert_approx_eq::<f32>(&zero, Tolerance::default());

    cls.assert_approx_eq::<f32>(
        &TensorData::from([image_classification]),
        Tolerance::relative(1e-4),
    );
    reg.assert_approx_eq::<f32>(&zero, Tolerance::absolute(1e-6));
    mask.assert_approx_eq::<f32>(&TensorData::from([ln2]), Tolerance::relative(1e-5));

    let [batch_cls, batch_reg, batch_mask] = Transaction::default()
        .register(output.classification)
        .register(output.regression)
        .register(output.mask)
        .execute()
        .try_into()
        .expect("Correct amount of tensor data");

    batch_cls.assert_approx_eq::<f32>(
        &TensorData::from([image_classification / 2.0]),
        Tolerance::relative(1e-4),
    );
    batch_reg.assert_approx_eq::<f32>(&zero, Tolerance::absolute(1e-6));
    batch_mask.assert_approx_eq::<f32>(&TensorData::from([ln2 / 2.0]), Tolerance::relative(1e-5));
}

#[test]
fn detection_loss_assign_marks_only_the_coinciding_anchor_positive() {
    let device = Default::default();
    let (boxes, _) = two_image_annotations::<TestBackend>(&device);
    let anchors = anchor_row::<TestBackend>(&device).reshape([NUM_ANCHORS, 4]);

    let assignment = DetectionLoss::new().assign(anchors, boxes[1].clone(), NUM_CLASSES);

    assert_eq!(assignment.positives.to_vec(), vec![MATCHED_ANCHOR]);
    let negatives: Vec<bool> = assignment.negative_mask.into_data().iter::<bool>().collect();
    let expected: Vec<bool> = (0..NUM_ANCHORS).map(|i| i != MATCHED_ANCHOR).collect();
    assert_eq!(negatives, expected);
}

#[test]
fn detection_loss_gradients_reach_positive_rows_only() {
    type AutodiffBackend = Autodiff<TestBackend>;

    let device = Default::default();
    let classifications =
        Tensor::<AutodiffBackend, 3>::full([2, NUM_ANCHORS, NUM_CLASSES], 0.5, &device)
            .require_grad();
    let regressions =
        Tensor::<AutodiffBackend, 3>::full([2, NUM_ANCHORS, 4], 0.5, &device).require_grad();
    let masks =
        Tensor::<AutodiffBackend, 4>::full([2, NUM_ANCHORS, MASK_SIZE, MASK_SIZE], 0.5, &device)
            .require_grad();
    let (boxes, gt_masks) = two_image_annotations(&device);

    let output = DetectionLoss::new()
        .forward(
            classifications.clone(),
            regressions.clone(),
            masks.clone(),
            anchor_row(&device),
            &boxes,
            &gt_masks,
        )
        .expect("valid batch");

    let grads = output
        .weighted_total(&LossWeightsConfig::new())
        .backward();

    let cls_grad = classifications
        .grad(&grads)
        .expect("classifications require grad");
    let reg_grad = regressions.grad(&grads).expect("regressions require grad");
    let mask_grad = masks.grad(&grads).expect("masks require grad");

    let cls_values = cls_grad.into_data().to_vec::<f32>().unwrap();
    assert!(cls_values.iter().all(|v| v.is_finite()));
    // The annotation-free first image receives no gradient.
    assert!(cls_values[..NUM_ANCHORS * NUM_CLASSES]
        .iter()
        .all(|v| *v == 0.0));
    assert!(cls_values[NUM_ANCHORS * NUM_CLASSES..]
        .iter()
        .any(|v| *v != 0.0));

    let reg_values = reg_grad.into_data().to_vec::<f32>().unwrap();
    for (index, value) in reg_values.iter().enumerate() {
        let image = index / (NUM_ANCHORS * 4);
        let anchor = (index / 4) % NUM_ANCHORS;
        if image == 1 && anchor == MATCHED_ANCHOR {
            // d/dp of mean smooth-L1 in the linear regime, halved by the batch mean.
            assert!((value.abs() - 0.125).abs() < 1e-5, "got {value}");
        } else {
            assert_eq!(*value, 0.0, "unexpected gradient at image {image}, anchor {anchor}");
        }
    }

    let mask_values = mask_grad.into_data().to_vec::<f32>().unwrap();
    let per_anchor = MASK_SIZE * MASK_SIZE;
    let matched_start = (NUM_ANCHORS + MATCHED_ANCHOR) * per_anchor;
    for (index, value) in mask_values.iter().enumerate() {
        if (matched_start..matched_start + per_anchor).contains(&index) {
            assert!(*value < 0.0, "matched mask pixels should be pushed up");
        } else {
            assert_eq!(*value, 0.0);
        }
    }
}

#[test]
fn detection_loss_rejects_empty_batch() {
    let device = Default::default();
    let result = DetectionLoss::new().forward::<TestBackend>(
        Tensor::zeros([0, NUM_ANCHORS, NUM_CLASSES], &device),
        Tensor::zeros([0, NUM_ANCHORS, 4], &device),
        Tensor::zeros([0, NUM_ANCHORS, MASK_SIZE, MASK_SIZE], &device),
        anchor_row(&device),
        &[],
        &[],
    );

    assert!(matches!(result, Err(DetectionLossError::EmptyBatch)));
}

#[test]
fn detection_loss_rejects_missing_annotation_lists() {
    let device = Default::default();
    let (boxes, gt_masks) = two_image_annotations::<TestBackend>(&device);

    let result = DetectionLoss::new().forward(
        Tensor::full([2, NUM_ANCHORS, NUM_CLASSES], 0.5, &device),
        Tensor::zeros([2, NUM_ANCHORS, 4], &device),
        Tensor::full([2, NUM_ANCHORS, MASK_SIZE, MASK_SIZE], 0.5, &device),
        anchor_row(&device),
        &boxes[..1],
        &gt_masks,
    );

    assert!(matches!(
        result,
        Err(DetectionLossError::BatchSizeMismatch {
            tensor: "bbox_annotations",
            expected: 2,
            actual: 1
        })
    ));
}

#[test]
fn detection_loss_rejects_per_image_anchors() {
    let device = Default::default();
    let (boxes, gt_masks) = two_image_annotations::<TestBackend>(&device);
    let anchors = Tensor::cat(vec![anchor_row(&device), anchor_row(&device)], 0);

    let result = DetectionLoss::new().forward(
        Tensor::full([2, NUM_ANCHORS, NUM_CLASSES], 0.5, &device),
        Tensor::zeros([2, NUM_ANCHORS, 4], &device),
        Tensor::full([2, NUM_ANCHORS, MASK_SIZE, MASK_SIZE], 0.5, &device),
        anchors,
        &boxes,
        &gt_masks,
    );

    assert!(matches!(
        result,
        Err(DetectionLossError::InvalidShape { tensor: "anchors", .. })
    ));
}

#[test]
fn detection_loss_rejects_anchor_count_mismatch() {
    let device = Default::default();
    let (boxes, gt_masks) = two_image_annotations::<TestBackend>(&device);

    let result = DetectionLoss::new().forward(
        Tensor::full([2, NUM_ANCHORS - 1, NUM_CLASSES], 0.5, &device),
        Tensor::zeros([2, NUM_ANCHORS, 4], &device),
        Tensor::full([2, NUM_ANCHORS, MASK_SIZE, MASK_SIZE], 0.5, &device),
        anchor_row(&device),
        &boxes,
        &gt_masks,
    );

    assert!(matches!(
        result,
        Err(DetectionLossError::AnchorCountMismatch {
            tensor: "classification",
            expected: NUM_ANCHORS,
            actual: 7
        })
    ));
}

#[test]
fn detection_loss_regression_is_nonzero_for_offset_predictions() {
    let device = Default::default();
    let output = run_two_image_batch::<TestBackend>(&device, 0.5);

    // |0 - 0.5| - 0.5 / 9, halved by the batch mean.
    let expected = (0.5 - 0.5 / 9.0) / 2.0;
    output
        .regression
        .into_data()
        .assert_approx_eq::<f32>(&TensorData::from([expected]), Tolerance::relative(1e-5));
}

#[test]
fn detection_loss_annotated_images_without_positives_keep_only_classification() {
    let device = Default::default();
    // Image 0: a box far outside every anchor. Image 1: a box overlapping
    // anchor 2 at IoU 0.45, inside the ignore band.
    let boxes = vec![
        Tensor::<TestBackend, 2>::from_data(
            TensorData::from([[500.0, 500.0, 510.0, 510.0, 0.0]]),
            &device,
        ),
        Tensor::from_data(TensorData::from([[20.0, 0.0, 30.0, 4.5, 1.0]]), &device),
    ];
    let gt_masks = vec![
        Tensor::<TestBackend, 3>::ones([1, MASK_SIZE, MASK_SIZE], &device),
        Tensor::ones([1, MASK_SIZE, MASK_SIZE], &device),
    ];

    let output = DetectionLoss::new()
        .forward(
            Tensor::full([2, NUM_ANCHORS, NUM_CLASSES], 0.5, &device),
            Tensor::full([2, NUM_ANCHORS, 4], 0.5, &device),
            Tensor::full([2, NUM_ANCHORS, MASK_SIZE, MASK_SIZE], 0.5, &device),
            anchor_row(&device),
            &boxes,
            &gt_masks,
        )
        .expect("annotated images without positives are valid");

    // Every cell is background at 0.75 * 0.25 * ln 2, normalized by max(0, 1).
    let background_cell = 0.129965096_f32;
    let far_classification = 24.0 * background_cell;
    // Anchor 2 is ignored, leaving 7 background anchors.
    let ignored_classification = 21.0 * background_cell;

    let far = &output.per_image[0];
    let ignored = &output.per_image[1];
    let [far_cls, far_reg, far_mask, ignored_cls, ignored_reg, ignored_mask] =
        Transaction::default()
            .register(far.classification.clone())
            .register(far.regression.clone())
            .register(far.mask.clone())
            .register(ignored.classification.clone())
            .register(ignored.regression.clone())
            .register(ignored.mask.clone())
            .execute()
            .try_into()
            .expect("Correct amount of tensor data");

    let zero = TensorData::from([0.0]);
    far_cls.assert_approx_eq::<f32>(
        &TensorData::from([far_classification]),
        Tolerance::relative(1e-4),
    );
    far_reg.assert_approx_eq::<f32>(&zero, Tolerance::default());
    far_mask.assert_approx_eq::<f32>(&zero, Tolerance::default());
    ignored_cls.assert_approx_eq::<f32>(
        &TensorData::from([ignored_classification]),
        Tolerance::relative(1e-4),
    );
    ignored_reg.assert_approx_eq::<f32>(&zero, Tolerance::default());
    ignored_mask.assert_approx_eq::<f32>(&zero, Tolerance::default());

    let [batch_cls, batch_reg, batch_mask] = Transaction::default()
        .register(output.classification)
        .register(output.regression)
        .register(output.mask)
        .execute()
        .try_into()
        .expect("Correct amount of tensor data");

    batch_cls.assert_approx_eq::<f32>(
        &TensorData::from([(far_classification + ignored_classification) / 2.0]),
        Tolerance::relative(1e-4),
    );
    batch_reg.assert_approx_eq::<f32>(&zero, Tolerance::default());
    batch_mask.assert_approx_eq::<f32>(&zero, Tolerance::default());
}
