#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawBoxes;
use crate::detect::yolo::{self, Thresholds};

type YoloPlan = RunnableModel<TypedFact, Box<dyn TypedOp>, TypedModel>;

/// Tract-based backend for YOLO ONNX exports.
///
/// Loads a local model file once and runs it on RGB frames. The plan itself
/// is immutable, but the backend still sits behind the registry mutex like
/// any other.
pub struct TractBackend {
    model: YoloPlan,
    input_w: u32,
    input_h: u32,
    num_classes: usize,
    thresholds: Thresholds,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        input_w: u32,
        input_h: u32,
        num_classes: usize,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_h as usize, input_w as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_w,
            input_h,
            num_classes,
            thresholds: Thresholds::default(),
        })
    }

    /// Override the default confidence/IoU thresholds.
    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    fn run(&self, input: Tensor) -> Result<(Vec<f32>, Vec<usize>)> {
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        Ok((view.iter().copied().collect(), view.shape().to_vec()))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Option<RawBoxes>> {
        let (chw, letterbox) = yolo::letterbox(pixels, width, height, self.input_w, self.input_h)?;
        let input = tract_ndarray::Array4::from_shape_vec(
            (1, 3, self.input_h as usize, self.input_w as usize),
            chw,
        )
        .context("failed to shape model input")?
        .into_tensor();

        let (output, shape) = self.run(input)?;
        let boxes = yolo::decode(
            &output,
            &shape,
            self.num_classes,
            &letterbox,
            &self.thresholds,
        )?;
        Ok(Some(boxes))
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = vec![0u8; self.input_w as usize * self.input_h as usize * 3];
        self.detect(&blank, self.input_w, self.input_h)
            .map(|_| ())
            .context("model warm-up failed")
    }
}
