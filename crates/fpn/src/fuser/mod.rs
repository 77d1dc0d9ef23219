mod blocks;
mod lateral;
mod stage;

pub use blocks::{ConvNormAct, Upsample2x};
pub use lateral::LateralProjector;
pub use stage::FusionStage;

use {
    crate::FpnError,
    candle_core::Tensor,
    candle_nn::{Module, VarBuilder},
    serde::{Deserialize, Serialize},
};

fn default_out_channels() -> usize {
    128
}

fn default_reps() -> usize {
    3
}

/// Fusion block configuration, fixed at build time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FpnConfig {
    /// Native channel count of each input level, finest to coarsest.
    pub channels_list: Vec<usize>,
    /// Shared working width after lateral projection.
    #[serde(default = "default_out_channels")]
    pub out_channels: usize,
    /// Number of top-down passes.
    #[serde(default = "default_reps")]
    pub reps: usize,
}

impl FpnConfig {
    pub fn new(channels_list: Vec<usize>) -> Self {
        Self {
            channels_list,
            out_channels: default_out_channels(),
            reps: default_reps(),
        }
    }

    pub fn with_out_channels(mut self, out_channels: usize) -> Self {
        self.out_channels = out_channels;
        self
    }

    pub fn with_reps(mut self, reps: usize) -> Self {
        self.reps = reps;
        self
    }

    fn validate(&self) -> Result<(), FpnError> {
        if self.channels_list.is_empty() {
            return Err(FpnError::Config("channels_list must not be empty".into()));
        }
        if self.channels_list.contains(&0) {
            return Err(FpnError::Config(format!(
                "channels_list entries must be positive, got {:?}",
                self.channels_list
            )));
        }
        if self.out_channels == 0 {
            return Err(FpnError::Config("out_channels must be positive".into()));
        }
        if self.reps == 0 {
            return Err(FpnError::Config("reps must be at least 1".into()));
        }
        Ok(())
    }
}

/// Multi-scale feature pyramid fusion block.
///
/// Projects each backbone level onto a shared working width, then runs a
/// fixed number of top-down fusion passes. Each pass upsamples the refined
/// coarser level, concatenates it with the finer level's own features and
/// compresses back to the working width, so fine levels inherit coarse
/// context while keeping local detail.
///
/// Learned parameters are created at `load` time under `lateral.{i}` and
/// `stage.{r}.{i}` and are only read during `fuse`.
#[derive(Debug)]
pub struct Fpn<T = ConvNormAct> {
    lateral: LateralProjector<T>,
    stages: Vec<FusionStage<T>>,
    out_channels: usize,
}

impl Fpn<ConvNormAct> {
    /// Build with the default convolution + norm + activation transform
    /// (3x3 kernel, stride 1, padding 1).
    pub fn load(vb: VarBuilder, config: &FpnConfig) -> Result<Self, FpnError> {
        Self::load_with(vb, config, |vb, c_in, c_out| {
            ConvNormAct::load(vb, c_in, c_out, 3, 1, 1)
        })
    }
}

impl<T: Module> Fpn<T> {
    /// Build with a caller-supplied transform factory. The factory receives
    /// the variable scope plus input and output channel counts; transforms
    /// must preserve spatial size.
    pub fn load_with<F>(
        vb: VarBuilder,
        config: &FpnConfig,
        mut make_transform: F,
    ) -> Result<Self, FpnError>
    where
        F: FnMut(VarBuilder, usize, usize) -> candle_core::Result<T>,
    {
        config.validate()?;

        let lateral = LateralProjector::load_with(
            vb.pp("lateral"),
            &config.channels_list,
            config.out_channels,
            &mut make_transform,
        )?;

        let mut stages = Vec::with_capacity(config.reps);
        for rep in 0..config.reps {
            stages.push(FusionStage::load_with(
                vb.pp(format!("stage.{rep}")),
                config.channels_list.len(),
                config.out_channels,
                &mut make_transform,
            )?);
        }

        Ok(Self {
            lateral,
            stages,
            out_channels: config.out_channels,
        })
    }

    pub fn levels(&self) -> usize {
        self.lateral.levels()
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// Fuse a raw backbone pyramid, finest to coarsest, into levels of the
    /// working width with unchanged spatial sizes.
    pub fn fuse(&self, levels: &[Tensor]) -> Result<Vec<Tensor>, FpnError> {
        check_halving(levels)?;
        log::debug!(
            "fusing {} levels to width {} over {} passes",
            levels.len(),
            self.out_channels,
            self.stages.len()
        );

        let mut pyramid = self.lateral.forward(levels)?;
        for stage in &self.stages {
            pyramid = stage.forward(&pyramid)?;
        }
        Ok(pyramid)
    }
}

/// Adjacent levels must be in an exact 2:1 spatial ratio; anything else
/// would silently misalign the upsampled tensors before concatenation.
fn check_halving(levels: &[Tensor]) -> Result<(), FpnError> {
    for (idx, pair) in levels.windows(2).enumerate() {
        let (_b, _c, fine_h, fine_w) = pair[0].dims4()?;
        let (_b, _c, coarse_h, coarse_w) = pair[1].dims4()?;
        if fine_h != 2 * coarse_h || fine_w != 2 * coarse_w {
            return Err(FpnError::Shape(format!(
                "levels {} and {} must halve spatially, got {}x{} followed by {}x{}",
                idx,
                idx + 1,
                fine_h,
                fine_w,
                coarse_h,
                coarse_w
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Tensor};
    use candle_nn::{VarBuilder, VarMap};

    #[test]
    fn test_config_defaults() {
        let config = FpnConfig::new(vec![64, 128, 256]);
        assert_eq!(config.out_channels, 128);
        assert_eq!(config.reps, 3);
    }

    #[test]
    fn test_config_from_json_fills_defaults() {
        let config: FpnConfig = serde_json::from_str(r#"{"channels_list":[64,128,256]}"#).unwrap();
        assert_eq!(config.channels_list, vec![64, 128, 256]);
        assert_eq!(config.out_channels, 128);
        assert_eq!(config.reps, 3);
    }

    #[test]
    fn test_load_rejects_bad_config() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        for config in [
            FpnConfig::new(vec![]),
            FpnConfig::new(vec![64, 0]),
            FpnConfig::new(vec![64]).with_reps(0),
            FpnConfig::new(vec![64]).with_out_channels(0),
        ] {
            let err = Fpn::load(vb.pp("fpn"), &config).unwrap_err();
            assert!(matches!(err, FpnError::Config(_)), "config {config:?}");
        }
    }

    #[test]
    fn test_fuse_output_shapes() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let config = FpnConfig::new(vec![64, 128, 256]).with_out_channels(32).with_reps(1);
        let fpn = Fpn::load(vb.pp("fpn"), &config).unwrap();
        assert_eq!(fpn.levels(), 3);
        assert_eq!(fpn.out_channels(), 32);

        let levels = vec![
            Tensor::zeros(&[1, 64, 64, 64], DType::F32, &device).unwrap(),
            Tensor::zeros(&[1, 128, 32, 32], DType::F32, &device).unwrap(),
            Tensor::zeros(&[1, 256, 16, 16], DType::F32, &device).unwrap(),
        ];
        let fused = fpn.fuse(&levels).unwrap();

        assert_eq!(fused.len(), 3);
        assert_eq!(fused[0].dims(), &[1, 32, 64, 64]);
        assert_eq!(fused[1].dims(), &[1, 32, 32, 32]);
        assert_eq!(fused[2].dims(), &[1, 32, 16, 16]);
    }

    #[test]
    fn test_fuse_rejects_level_count_mismatch() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let config = FpnConfig::new(vec![64, 128]).with_out_channels(16).with_reps(1);
        let fpn = Fpn::load(vb.pp("fpn"), &config).unwrap();

        let levels = vec![Tensor::zeros(&[1, 64, 32, 32], DType::F32, &device).unwrap()];
        let err = fpn.fuse(&levels).unwrap_err();
        assert!(matches!(err, FpnError::Shape(_)));
    }

    #[test]
    fn test_fuse_rejects_non_halving_levels() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let config = FpnConfig::new(vec![64, 128]).with_out_channels(16).with_reps(1);
        let fpn = Fpn::load(vb.pp("fpn"), &config).unwrap();

        let levels = vec![
            Tensor::zeros(&[1, 64, 32, 32], DType::F32, &device).unwrap(),
            Tensor::zeros(&[1, 128, 20, 20], DType::F32, &device).unwrap(),
        ];
        let err = fpn.fuse(&levels).unwrap_err();
        assert!(matches!(err, FpnError::Shape(_)));
        assert!(err.to_string().contains("halve"));
    }
}
