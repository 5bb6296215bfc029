//! Transactions - from a send request to consensus bytes.
//!
//! ```text
//! UtxoSet ─select_inputs─→ Selection ─build─→ UnsignedTransaction
//!                                                   │ sign (BIP143)
//!                                                   ▼
//!                            bytes ←─serialize── SignedTransaction
//! ```
//!
//! Amounts are integer satoshis throughout. `inputs == outputs + fee`
//! holds by construction: the fee is never stored separately from the
//! difference.

mod build;
mod codec;
mod fee;
mod payment;
mod select;
mod sign;

pub use build::{build, Recipient, UnsignedTransaction};
pub use codec::{deserialize, deserialize_hex, serialize, serialize_hex};
pub use fee::{estimate_fee, estimate_vsize, estimate_weight, P2WPKH_SCRIPT_LEN};
pub use payment::{FeeChoice, OutgoingPayment, PaymentKind, PaymentState, SendRequest};
pub use select::{select_inputs, Selection, SelectionPolicy};
pub use sign::{sign, SignedTransaction};
