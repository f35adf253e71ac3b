//! Infrastructure layer: adapters around the application layer.
//!
//! - **`channel`** – The driver thread and the per-server response routes.
//! - **`driver`** – Concrete drivers.
//! - **`storage`** – Configuration file persistence.
//!
//! **Dependency rule**: the application layer only reaches into this layer
//! for [`channel::DriverHandle`], the transport a server posts through.

pub mod channel;
pub mod driver;
pub mod storage;
