pub(crate) mod collection;
mod data_store;
mod observer;

pub use data_store::DataStore;
pub use observer::{Subscription, UpdateCallback, UpdateEvent};
