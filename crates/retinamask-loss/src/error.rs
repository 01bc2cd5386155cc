use thiserror::Error;

/// Errors raised when the inputs of a detection loss call are malformed.
///
/// Numeric edge cases (images without annotations, anchors without a positive
/// match, degenerate boxes) are not errors; they produce defined loss values.
#[derive(Debug, Error)]
pub enum DetectionLossError {
    /// The batch holds no images, so the batch mean is undefined.
    #[error("batch is empty - at least one image is required")]
    EmptyBatch,

    /// The anchor set holds no anchors.
    #[error("anchor set is empty - at least one anchor is required")]
    EmptyAnchorSet,

    /// A prediction tensor or annotation list disagrees on the number of images.
    #[error("batch size mismatch for {tensor}: expected {expected}, got {actual}")]
    BatchSizeMismatch {
        tensor: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A prediction tensor disagrees with the anchor set on the number of anchors.
    #[error("anchor count mismatch for {tensor}: expected {expected}, got {actual}")]
    AnchorCountMismatch {
        tensor: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A tensor has the wrong layout.
    #[error("invalid shape for {tensor}: expected {expected}, got {actual:?}")]
    InvalidShape {
        tensor: &'static str,
        expected: &'static str,
        actual: Vec<usize>,
    },

    /// Box and mask annotations of an image differ in count.
    #[error("image {image}: {boxes} box annotations but {masks} mask annotations")]
    AnnotationCountMismatch {
        image: usize,
        boxes: usize,
        masks: usize,
    },

    /// Predicted and annotated masks of an image differ in spatial size.
    #[error("image {image}: predicted masks are {predicted:?} but annotated masks are {annotated:?}")]
    MaskShapeMismatch {
        image: usize,
        predicted: [usize; 2],
        annotated: [usize; 2],
    },

    /// An annotation class id is negative or not below the number of classes.
    #[error("image {image}: class id {class_id} is outside 0..{num_classes}")]
    ClassOutOfRange {
        image: usize,
        class_id: i64,
        num_classes: usize,
    },
}

/// A specialized `Result` type for detection loss computation.
pub type DetectionLossResult<T> = Result<T, DetectionLossError>;
