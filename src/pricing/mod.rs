//! Option pricing: Black-Scholes theoretical values and the backtest pricer.

pub mod black_scholes;
pub mod pricer;

pub use black_scholes::{estimate_iv, norm_cdf, round_to_cent, BlackScholes};
pub use pricer::{PriceObservation, PriceSource, Pricer, PricingError};
