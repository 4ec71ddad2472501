pub mod balance;
pub mod instrument;
pub mod ledger;
pub mod order;
pub mod trade;
pub mod user;

pub use balance::BalanceView;
pub use instrument::{Instrument, InstrumentError, QUOTE_TICKER};
pub use ledger::{Balance, EntryType, LedgerEntry, LedgerError};
pub use order::{Direction, Order, OrderError, OrderStatus, OrderType};
pub use trade::Trade;
pub use user::{Role, User};
