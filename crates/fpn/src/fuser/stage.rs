use {
    super::blocks::{ConvNormAct, Upsample2x},
    candle_core::{Result, Tensor},
    candle_nn::{Module, VarBuilder},
};

/// One top-down fusion pass over the pyramid.
///
/// Transforms are stored in processing order, coarsest level first: the
/// first expects the working width, every later one expects twice the
/// working width (own features concatenated with the upsampled coarser
/// output) and compresses back down.
#[derive(Debug)]
pub struct FusionStage<T = ConvNormAct> {
    transforms: Vec<T>,
    upsample: Upsample2x,
}

impl<T: Module> FusionStage<T> {
    pub fn load_with<F>(
        vb: VarBuilder,
        levels: usize,
        width: usize,
        make_transform: &mut F,
    ) -> Result<Self>
    where
        F: FnMut(VarBuilder, usize, usize) -> Result<T>,
    {
        let mut transforms = Vec::with_capacity(levels);
        for idx in 0..levels {
            let in_channels = if idx == 0 { width } else { 2 * width };
            transforms.push(make_transform(vb.pp(format!("{idx}")), in_channels, width)?);
        }
        Ok(Self {
            transforms,
            upsample: Upsample2x,
        })
    }

    /// Run the top-down pass. Input and output are ordered finest to
    /// coarsest; each finer level fuses the already-fused output of the
    /// level above it, not that level's original features.
    pub fn forward(&self, levels: &[Tensor]) -> Result<Vec<Tensor>> {
        if levels.len() != self.transforms.len() {
            candle_core::bail!(
                "expected {} pyramid levels, got {}",
                self.transforms.len(),
                levels.len()
            )
        }

        let mut fused: Vec<Tensor> = Vec::with_capacity(levels.len());
        for (idx, level) in levels.iter().rev().enumerate() {
            let merged = match fused.last() {
                // Coarsest level: no coarser context to pull in
                None => level.clone(),
                Some(coarser) => {
                    let coarser = self.upsample.forward(coarser)?;
                    Tensor::cat(&[level, &coarser], 1)?
                }
            };
            fused.push(self.transforms[idx].forward(&merged)?);
        }
        fused.reverse();
        Ok(fused)
    }
}
