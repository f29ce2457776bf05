pub mod loader;
pub mod types;
pub mod yahoo;

pub use loader::{load_option_chains, load_stock_bars, LoaderError, MarketDataLoader};
pub use types::{
    to_expiration, OptionChain, OptionContract, OptionQuote, OptionType, Side, StockBar, Tick,
    CONTRACT_SIZE,
};
pub use yahoo::{PollWindow, SnapshotRow, YahooClient, YahooError};
