pub mod payment_monitor;
pub mod payout_release;
