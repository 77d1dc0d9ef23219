use candle_core::{Result, Tensor};
use candle_nn::{batch_norm, conv2d_no_bias, Conv2dConfig, Module, VarBuilder};

/// Convolution + BatchNorm + SiLU, the default learned feature transform.
///
/// Spatial size is preserved whenever `padding == kernel / 2` and
/// `stride == 1`, which is how the fusion block instantiates it.
#[derive(Debug)]
pub struct ConvNormAct {
    conv: candle_nn::Conv2d,
    norm: candle_nn::BatchNorm,
}

impl ConvNormAct {
    pub fn load(
        vb: VarBuilder,
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
    ) -> Result<Self> {
        let conv = conv2d_no_bias(
            in_channels,
            out_channels,
            kernel,
            Conv2dConfig {
                stride,
                padding,
                groups: 1,
                dilation: 1,
                ..Default::default()
            },
            vb.pp("conv"),
        )?;
        let norm = batch_norm(out_channels, 1e-3, vb.pp("norm"))?;
        Ok(Self { conv, norm })
    }
}

impl Module for ConvNormAct {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        xs.apply(&self.conv)?.apply_t(&self.norm, false)?.silu()
    }
}

/// 2x bilinear upsampling with half-pixel-center sampling.
///
/// Output pixel centers sit at `(i + 0.5) / 2 - 0.5` in input coordinates,
/// so along each axis even outputs blend 1/4 of the previous input sample
/// with 3/4 of the current one and odd outputs the mirror of that, with
/// indices clamped at the borders.
#[derive(Debug, Clone, Copy)]
pub struct Upsample2x;

impl Upsample2x {
    /// Interpolate one spatial axis (2 for height, 3 for width) of an NCHW
    /// tensor, doubling its extent.
    fn interpolate_axis(xs: &Tensor, dim: usize) -> Result<Tensor> {
        let (b, c, h, w) = xs.dims4()?;
        let n = xs.dim(dim)? as u32;
        let device = xs.device();

        let below: Vec<u32> = (0..n).map(|j| j.saturating_sub(1)).collect();
        let above: Vec<u32> = (0..n).map(|j| (j + 1).min(n - 1)).collect();
        let below = xs.index_select(&Tensor::new(below.as_slice(), device)?, dim)?;
        let above = xs.index_select(&Tensor::new(above.as_slice(), device)?, dim)?;

        let even = ((below * 0.25)? + (xs * 0.75)?)?;
        let odd = ((xs * 0.75)? + (above * 0.25)?)?;

        // Interleave even/odd samples along the axis: (.., n, 2, ..) -> (.., 2n, ..)
        let doubled = if dim == 2 { (b, c, 2 * h, w) } else { (b, c, h, 2 * w) };
        Tensor::stack(&[&even, &odd], dim + 1)?.reshape(doubled)
    }
}

impl Module for Upsample2x {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = Self::interpolate_axis(xs, 2)?;
        Self::interpolate_axis(&xs, 3)
    }
}
