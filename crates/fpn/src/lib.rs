pub mod error;
pub mod fuser;

pub use error::FpnError;
pub use fuser::{ConvNormAct, Fpn, FpnConfig, FusionStage, LateralProjector, Upsample2x};
