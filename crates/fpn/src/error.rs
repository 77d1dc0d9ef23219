use std::fmt;

#[derive(Debug)]
pub enum FpnError {
    Config(String),
    Shape(String),
    Candle(String),
}

impl fmt::Display for FpnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FpnError::Config(msg) => write!(f, "config error: {msg}"),
            FpnError::Shape(msg) => write!(f, "shape error: {msg}"),
            FpnError::Candle(msg) => write!(f, "candle error: {msg}"),
        }
    }
}

impl std::error::Error for FpnError {}

impl From<candle_core::Error> for FpnError {
    fn from(err: candle_core::Error) -> Self {
        FpnError::Candle(err.to_string())
    }
}
