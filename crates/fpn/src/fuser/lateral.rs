use {
    super::blocks::ConvNormAct,
    crate::FpnError,
    candle_core::Tensor,
    candle_nn::{Module, VarBuilder},
};

/// Per-level channel projection to the shared working width.
///
/// Each level is transformed independently; there is no cross-level mixing.
#[derive(Debug)]
pub struct LateralProjector<T = ConvNormAct> {
    transforms: Vec<T>,
    channels_list: Vec<usize>,
}

impl<T: Module> LateralProjector<T> {
    /// Build one transform per level, mapping that level's native channel
    /// count to `out_channels`.
    pub fn load_with<F>(
        vb: VarBuilder,
        channels_list: &[usize],
        out_channels: usize,
        make_transform: &mut F,
    ) -> candle_core::Result<Self>
    where
        F: FnMut(VarBuilder, usize, usize) -> candle_core::Result<T>,
    {
        let mut transforms = Vec::with_capacity(channels_list.len());
        for (idx, &channels) in channels_list.iter().enumerate() {
            transforms.push(make_transform(vb.pp(format!("{idx}")), channels, out_channels)?);
        }
        Ok(Self {
            transforms,
            channels_list: channels_list.to_vec(),
        })
    }

    pub fn levels(&self) -> usize {
        self.channels_list.len()
    }

    /// Project a raw pyramid onto the working width, validating the level
    /// count and each level's native channel count.
    pub fn forward(&self, levels: &[Tensor]) -> Result<Vec<Tensor>, FpnError> {
        if levels.len() != self.channels_list.len() {
            return Err(FpnError::Shape(format!(
                "expected {} pyramid levels, got {}",
                self.channels_list.len(),
                levels.len()
            )));
        }

        let mut projected = Vec::with_capacity(levels.len());
        for (idx, (level, &channels)) in levels.iter().zip(&self.channels_list).enumerate() {
            let (_b, c, _h, _w) = level.dims4()?;
            if c != channels {
                return Err(FpnError::Shape(format!(
                    "level {idx}: expected {channels} input channels, got {c}"
                )));
            }
            projected.push(self.transforms[idx].forward(level)?);
        }
        Ok(projected)
    }
}
