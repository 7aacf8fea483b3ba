//! One-call document conversion: segment, then run the controller.

use tracing::info;

use crate::controller::{ConversionResult, WindowController};
use crate::error::ConvertError;
use crate::segment::{Segmenter, estimate_tokens};

/// Segment `document` and drive it through `controller`.
///
/// Segmentation errors surface before any oracle call is made.
pub async fn convert_document(
    document: &str,
    segmenter: &dyn Segmenter,
    controller: WindowController<'_>,
) -> Result<ConversionResult, ConvertError> {
    let segments = segmenter.segment(document)?;
    info!(
        "Segmented document: ~{} tokens into {} segment(s)",
        estimate_tokens(document),
        segments.len()
    );

    let result = controller.run(&segments).await?;
    info!(
        "Converted into {} passage(s) in {} iteration(s), {}",
        result.passages.len(),
        result.iterations,
        result.usage.summary()
    );
    Ok(result)
}
