pub mod client;

pub use client::{DeliveryClient, DestinationLiveness, HistoryMessage, HookRef, MessageRef};
