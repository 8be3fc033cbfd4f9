// src/communication/mod.rs - Outbound links to remote consumers
pub mod relay;

pub use relay::{KilnSources, RelayError, RelayLink, SshLauncher, StatusSources, Worker, WorkerLauncher};
