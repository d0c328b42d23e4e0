pub mod businesses;
pub mod events;
pub mod transactions;
pub mod users;
pub mod wallets;
